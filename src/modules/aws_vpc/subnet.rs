use async_trait::async_trait;
use serde::Serialize;
use sqlx::FromRow;
use stratus_cloud::{CreateSubnetInput, DescribeRequest};
use stratus_memo_core::Side;
use tracing::info;

use super::vpc::resource_state;
use crate::context::Context;
use crate::error::StratusError;
use crate::mapper::{Applied, Crud, Mapper, UpdateOrReplace, restore_from_cloud, tolerate_gone};
use crate::modules::support::{RowKey, found, missing_row, resolve_ref, target_row};
use crate::modules::tags::Tags;
use crate::record::{Record, RecordId};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subnet {
    pub id: Option<i64>,
    pub subnet_id: Option<String>,
    /// Provider id of the owning VPC; `None` while that VPC is not created yet.
    pub vpc_id: Option<String>,
    pub cidr_block: String,
    pub availability_zone: Option<String>,
    pub available_ip_address_count: Option<i64>,
    pub state: String,
    pub region: String,
    pub tags: Tags,
}

impl Record for Subnet {
    const KIND: &'static str = "subnet";

    fn natural_key(&self) -> Option<Vec<String>> {
        self.subnet_id
            .as_ref()
            .map(|s| vec![s.clone(), self.region.clone()])
    }

    fn region(&self) -> &str {
        &self.region
    }

    fn surrogate_id(&self) -> Option<i64> {
        self.id
    }

    fn set_surrogate_id(&mut self, id: Option<i64>) {
        self.id = id;
    }
}

impl Subnet {
    fn from_cloud(subnet: stratus_cloud::Subnet, region: &str) -> Self {
        Self {
            id: None,
            subnet_id: Some(subnet.subnet_id),
            vpc_id: Some(subnet.vpc_id),
            cidr_block: subnet.cidr_block,
            availability_zone: Some(subnet.availability_zone),
            available_ip_address_count: Some(subnet.available_ip_address_count),
            state: resource_state(subnet.state).to_string(),
            region: region.to_string(),
            tags: Tags::from_cloud(&subnet.tags),
        }
    }
}

/// Key `(subnet_id, region)`. Moving a subnet to another VPC, CIDR block or availability zone
/// replaces it. Nothing else can change in place, so an update restores the cloud record.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubnetMapper;

impl Mapper for SubnetMapper {
    type Record = Subnet;
    type Cloud = SubnetCloud;
    type Db = SubnetDb;

    fn cloud(&self) -> &SubnetCloud {
        &SubnetCloud
    }

    fn db(&self) -> &SubnetDb {
        &SubnetDb
    }

    fn equals(&self, a: &Subnet, b: &Subnet) -> bool {
        a.vpc_id == b.vpc_id
            && a.cidr_block == b.cidr_block
            && a.availability_zone == b.availability_zone
            && a.region == b.region
            && a.tags == b.tags
    }

    fn update_or_replace(&self, old: &Subnet, new: &Subnet) -> UpdateOrReplace {
        let zone_moved = new.availability_zone.is_some()
            && new.availability_zone != old.availability_zone;
        if old.vpc_id != new.vpc_id || old.cidr_block != new.cidr_block || zone_moved {
            UpdateOrReplace::Replace
        } else {
            UpdateOrReplace::Update
        }
    }
}

pub struct SubnetCloud;

#[async_trait]
impl Crud<Subnet> for SubnetCloud {
    const SIDE: Side = Side::Cloud;

    async fn create_one(
        &self,
        ctx: &Context,
        record: &Subnet,
    ) -> Result<Applied<Subnet>, StratusError> {
        let Some(vpc_id) = record.vpc_id.clone() else {
            return Err(StratusError::unresolved(format!(
                "subnet {} references a vpc without a provider id",
                record.cidr_block
            )));
        };
        let region = record.region.as_str();
        let input = CreateSubnetInput {
            vpc_id,
            cidr_block: record.cidr_block.clone(),
            availability_zone: record.availability_zone.clone(),
            tags: record.tags.to_cloud(),
        };
        let created = ctx
            .cloud_call(region, "CreateSubnet", |c| {
                let input = input.clone();
                async move { c.ec2.create_subnet(input).await }
            })
            .await?;
        info!(region, subnet_id = %created.subnet_id, "Subnet created");
        Ok(Applied::Created(Subnet::from_cloud(created, region)))
    }

    async fn read(&self, ctx: &Context, id: &RecordId) -> Result<Option<Subnet>, StratusError> {
        if id.is_pending() {
            return Ok(None);
        }
        let [subnet_id, region] = id.fields_exact::<2>()?;
        let page = found(
            ctx.cloud_call(&region, "DescribeSubnets", |c| {
                let request = DescribeRequest::by_id(subnet_id.as_str());
                async move { c.ec2.describe_subnets(request).await }
            })
            .await,
        )?;
        Ok(page
            .and_then(|p| p.items.into_iter().next())
            .map(|s| Subnet::from_cloud(s, &region)))
    }

    async fn read_all(&self, ctx: &Context) -> Result<Vec<Subnet>, StratusError> {
        ctx.for_each_region(|region| async move {
            let subnets = ctx
                .cloud_pages(&region, "DescribeSubnets", |c, token| async move {
                    c.ec2
                        .describe_subnets(DescribeRequest::all().page(token))
                        .await
                })
                .await?;
            Ok(subnets
                .into_iter()
                .map(|s| Subnet::from_cloud(s, &region))
                .collect())
        })
        .await
    }

    async fn update_one(
        &self,
        ctx: &Context,
        record: &Subnet,
    ) -> Result<Applied<Subnet>, StratusError> {
        restore_from_cloud(ctx, self, &SubnetDb, record).await
    }

    async fn delete_one(
        &self,
        ctx: &Context,
        record: &Subnet,
    ) -> Result<Applied<Subnet>, StratusError> {
        let Some(subnet_id) = record.subnet_id.as_deref() else {
            return Ok(Applied::Deleted);
        };
        tolerate_gone(
            ctx.cloud_call(&record.region, "DeleteSubnet", |c| async move {
                c.ec2.delete_subnet(subnet_id).await
            })
            .await,
        )?;
        info!(region = %record.region, subnet_id, "Subnet deleted");
        Ok(Applied::Deleted)
    }
}

#[derive(FromRow)]
struct SubnetRow {
    id: i64,
    subnet_id: Option<String>,
    vpc_id: Option<String>,
    cidr_block: String,
    availability_zone: Option<String>,
    available_ip_address_count: Option<i64>,
    state: Option<String>,
    region: String,
    tags: Option<String>,
}

impl TryFrom<SubnetRow> for Subnet {
    type Error = StratusError;

    fn try_from(row: SubnetRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Some(row.id),
            subnet_id: row.subnet_id,
            vpc_id: row.vpc_id,
            cidr_block: row.cidr_block,
            availability_zone: row.availability_zone,
            available_ip_address_count: row.available_ip_address_count,
            state: row.state.unwrap_or_default(),
            region: row.region,
            tags: Tags::from_json(row.tags.as_deref())?,
        })
    }
}

const SELECT_SUBNET: &str = r#"
    SELECT s.id, s.subnet_id, v.vpc_id AS vpc_id, s.cidr_block, s.availability_zone,
           s.available_ip_address_count, s.state, s.region, s.tags
    FROM subnet s
    LEFT JOIN vpc v ON v.id = s.vpc
"#;

pub struct SubnetDb;

#[async_trait]
impl Crud<Subnet> for SubnetDb {
    const SIDE: Side = Side::Db;

    async fn create_one(
        &self,
        ctx: &Context,
        record: &Subnet,
    ) -> Result<Applied<Subnet>, StratusError> {
        let vpc = resolve_ref(
            ctx.pool(),
            "vpc",
            "vpc",
            "vpc_id",
            record.vpc_id.as_deref(),
            &record.region,
        )
        .await?;
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO subnet
                (subnet_id, vpc, availability_zone, cidr_block, state,
                 available_ip_address_count, region, tags)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&record.subnet_id)
        .bind(vpc)
        .bind(&record.availability_zone)
        .bind(&record.cidr_block)
        .bind(&record.state)
        .bind(record.available_ip_address_count)
        .bind(&record.region)
        .bind(record.tags.to_json())
        .fetch_one(ctx.pool())
        .await?;

        Ok(Applied::Created(Subnet {
            id: Some(id),
            ..record.clone()
        }))
    }

    async fn read(&self, ctx: &Context, id: &RecordId) -> Result<Option<Subnet>, StratusError> {
        let row = match RowKey::of(id) {
            Some(RowKey::Surrogate(row_id)) => {
                sqlx::query_as::<_, SubnetRow>(&format!("{SELECT_SUBNET} WHERE s.id = ?"))
                    .bind(row_id)
                    .fetch_optional(ctx.pool())
                    .await?
            }
            Some(RowKey::Natural(fields)) if fields.len() == 2 => {
                sqlx::query_as::<_, SubnetRow>(&format!(
                    "{SELECT_SUBNET} WHERE s.subnet_id = ? AND s.region = ?"
                ))
                .bind(&fields[0])
                .bind(&fields[1])
                .fetch_optional(ctx.pool())
                .await?
            }
            _ => None,
        };
        row.map(Subnet::try_from).transpose()
    }

    async fn read_all(&self, ctx: &Context) -> Result<Vec<Subnet>, StratusError> {
        sqlx::query_as::<_, SubnetRow>(&format!("{SELECT_SUBNET} ORDER BY s.id"))
            .fetch_all(ctx.pool())
            .await?
            .into_iter()
            .map(Subnet::try_from)
            .collect()
    }

    async fn update_one(
        &self,
        ctx: &Context,
        record: &Subnet,
    ) -> Result<Applied<Subnet>, StratusError> {
        let row_id = target_row(
            ctx.pool(),
            "subnet",
            "subnet_id",
            record.id,
            record.subnet_id.as_deref(),
            &record.region,
        )
        .await?
        .ok_or_else(|| missing_row(Subnet::KIND, &record.record_id()))?;
        let vpc = resolve_ref(
            ctx.pool(),
            "vpc",
            "vpc",
            "vpc_id",
            record.vpc_id.as_deref(),
            &record.region,
        )
        .await?;

        sqlx::query(
            r#"
            UPDATE subnet
            SET subnet_id = ?, vpc = ?, availability_zone = ?, cidr_block = ?, state = ?,
                available_ip_address_count = ?, region = ?, tags = ?
            WHERE id = ?
            "#,
        )
        .bind(&record.subnet_id)
        .bind(vpc)
        .bind(&record.availability_zone)
        .bind(&record.cidr_block)
        .bind(&record.state)
        .bind(record.available_ip_address_count)
        .bind(&record.region)
        .bind(record.tags.to_json())
        .bind(row_id)
        .execute(ctx.pool())
        .await?;

        Ok(Applied::Updated(Subnet {
            id: Some(row_id),
            ..record.clone()
        }))
    }

    async fn delete_one(
        &self,
        ctx: &Context,
        record: &Subnet,
    ) -> Result<Applied<Subnet>, StratusError> {
        let row_id = target_row(
            ctx.pool(),
            "subnet",
            "subnet_id",
            record.id,
            record.subnet_id.as_deref(),
            &record.region,
        )
        .await?;
        if let Some(row_id) = row_id {
            sqlx::query("DELETE FROM subnet WHERE id = ?")
                .bind(row_id)
                .execute(ctx.pool())
                .await?;
        }
        Ok(Applied::Deleted)
    }
}
