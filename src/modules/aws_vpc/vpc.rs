use async_trait::async_trait;
use serde::Serialize;
use sqlx::FromRow;
use stratus_cloud::{CreateVpcInput, DescribeRequest, ResourceState};
use stratus_memo_core::Side;
use tracing::info;

use crate::context::Context;
use crate::error::StratusError;
use crate::mapper::{Applied, Crud, Mapper, UpdateOrReplace, tolerate_gone};
use crate::modules::support::{RowKey, found, missing_row, target_row};
use crate::modules::tags::{Tags, sync_ec2_tags};
use crate::record::{Record, RecordId};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vpc {
    pub id: Option<i64>,
    pub vpc_id: Option<String>,
    pub cidr_block: String,
    pub state: String,
    pub is_default: bool,
    pub region: String,
    pub tags: Tags,
}

impl Record for Vpc {
    const KIND: &'static str = "vpc";

    fn natural_key(&self) -> Option<Vec<String>> {
        self.vpc_id
            .as_ref()
            .map(|v| vec![v.clone(), self.region.clone()])
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

pub(crate) fn resource_state(state: ResourceState) -> &'static str {
    match state {
        ResourceState::Pending => "pending",
        ResourceState::Available => "available",
    }
}

impl Vpc {
    fn from_cloud(vpc: stratus_cloud::Vpc, region: &str) -> Self {
        Self {
            id: None,
            vpc_id: Some(vpc.vpc_id),
            cidr_block: vpc.cidr_block,
            state: resource_state(vpc.state).to_string(),
            is_default: vpc.is_default,
            region: region.to_string(),
            tags: Tags::from_cloud(&vpc.tags),
        }
    }
}

/// Key `(vpc_id, region)`. A new CIDR block means a new VPC; tags change in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct VpcMapper;

impl Mapper for VpcMapper {
    type Record = Vpc;
    type Cloud = VpcCloud;
    type Db = VpcDb;

    fn cloud(&self) -> &VpcCloud {
        &VpcCloud
    }

    fn db(&self) -> &VpcDb {
        &VpcDb
    }

    fn equals(&self, a: &Vpc, b: &Vpc) -> bool {
        a.cidr_block == b.cidr_block && a.region == b.region && a.tags == b.tags
    }

    fn update_or_replace(&self, old: &Vpc, new: &Vpc) -> UpdateOrReplace {
        if old.cidr_block == new.cidr_block {
            UpdateOrReplace::Update
        } else {
            UpdateOrReplace::Replace
        }
    }
}

pub struct VpcCloud;

#[async_trait]
impl Crud<Vpc> for VpcCloud {
    const SIDE: Side = Side::Cloud;

    async fn create_one(&self, ctx: &Context, record: &Vpc) -> Result<Applied<Vpc>, StratusError> {
        let region = record.region.as_str();
        let input = CreateVpcInput {
            cidr_block: record.cidr_block.clone(),
            tags: record.tags.to_cloud(),
        };
        let created = ctx
            .cloud_call(region, "CreateVpc", |c| {
                let input = input.clone();
                async move { c.ec2.create_vpc(input).await }
            })
            .await?;
        info!(region, vpc_id = %created.vpc_id, "VPC created");
        Ok(Applied::Created(Vpc::from_cloud(created, region)))
    }

    async fn read(&self, ctx: &Context, id: &RecordId) -> Result<Option<Vpc>, StratusError> {
        if id.is_pending() {
            return Ok(None);
        }
        let [vpc_id, region] = id.fields_exact::<2>()?;
        let page = found(
            ctx.cloud_call(&region, "DescribeVpcs", |c| {
                let request = DescribeRequest::by_id(vpc_id.as_str());
                async move { c.ec2.describe_vpcs(request).await }
            })
            .await,
        )?;
        Ok(page
            .and_then(|p| p.items.into_iter().next())
            .map(|v| Vpc::from_cloud(v, &region)))
    }

    async fn read_all(&self, ctx: &Context) -> Result<Vec<Vpc>, StratusError> {
        ctx.for_each_region(|region| async move {
            let vpcs = ctx
                .cloud_pages(&region, "DescribeVpcs", |c, token| async move {
                    c.ec2.describe_vpcs(DescribeRequest::all().page(token)).await
                })
                .await?;
            Ok(vpcs
                .into_iter()
                .map(|v| Vpc::from_cloud(v, &region))
                .collect())
        })
        .await
    }

    async fn update_one(&self, ctx: &Context, record: &Vpc) -> Result<Applied<Vpc>, StratusError> {
        let Some(current) = self.read_cached(ctx, &record.record_id()).await? else {
            return Err(StratusError::unresolved(format!(
                "vpc {} is gone from the cloud",
                record.record_id()
            )));
        };
        let Some(vpc_id) = current.vpc_id.as_deref() else {
            return Err(missing_row(Vpc::KIND, &record.record_id()));
        };
        sync_ec2_tags(ctx, &current.region, vpc_id, &current.tags, &record.tags).await?;
        Ok(Applied::Updated(Vpc {
            tags: record.tags.clone(),
            ..current
        }))
    }

    async fn delete_one(&self, ctx: &Context, record: &Vpc) -> Result<Applied<Vpc>, StratusError> {
        let Some(vpc_id) = record.vpc_id.as_deref() else {
            return Ok(Applied::Deleted);
        };
        tolerate_gone(
            ctx.cloud_call(&record.region, "DeleteVpc", |c| async move {
                c.ec2.delete_vpc(vpc_id).await
            })
            .await,
        )?;
        info!(region = %record.region, vpc_id, "VPC deleted");
        Ok(Applied::Deleted)
    }
}

#[derive(FromRow)]
struct VpcRow {
    id: i64,
    vpc_id: Option<String>,
    cidr_block: String,
    state: Option<String>,
    is_default: bool,
    region: String,
    tags: Option<String>,
}

impl TryFrom<VpcRow> for Vpc {
    type Error = StratusError;

    fn try_from(row: VpcRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Some(row.id),
            vpc_id: row.vpc_id,
            cidr_block: row.cidr_block,
            state: row.state.unwrap_or_default(),
            is_default: row.is_default,
            region: row.region,
            tags: Tags::from_json(row.tags.as_deref())?,
        })
    }
}

const SELECT_VPC: &str = r#"
    SELECT id, vpc_id, cidr_block, state, is_default, region, tags
    FROM vpc
"#;

pub struct VpcDb;

#[async_trait]
impl Crud<Vpc> for VpcDb {
    const SIDE: Side = Side::Db;

    async fn create_one(&self, ctx: &Context, record: &Vpc) -> Result<Applied<Vpc>, StratusError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO vpc (vpc_id, cidr_block, state, is_default, region, tags)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&record.vpc_id)
        .bind(&record.cidr_block)
        .bind(&record.state)
        .bind(record.is_default)
        .bind(&record.region)
        .bind(record.tags.to_json())
        .fetch_one(ctx.pool())
        .await?;

        Ok(Applied::Created(Vpc {
            id: Some(id),
            ..record.clone()
        }))
    }

    async fn read(&self, ctx: &Context, id: &RecordId) -> Result<Option<Vpc>, StratusError> {
        let row = match RowKey::of(id) {
            Some(RowKey::Surrogate(row_id)) => {
                sqlx::query_as::<_, VpcRow>(&format!("{SELECT_VPC} WHERE id = ?"))
                    .bind(row_id)
                    .fetch_optional(ctx.pool())
                    .await?
            }
            Some(RowKey::Natural(fields)) if fields.len() == 2 => {
                sqlx::query_as::<_, VpcRow>(&format!(
                    "{SELECT_VPC} WHERE vpc_id = ? AND region = ?"
                ))
                .bind(&fields[0])
                .bind(&fields[1])
                .fetch_optional(ctx.pool())
                .await?
            }
            _ => None,
        };
        row.map(Vpc::try_from).transpose()
    }

    async fn read_all(&self, ctx: &Context) -> Result<Vec<Vpc>, StratusError> {
        sqlx::query_as::<_, VpcRow>(&format!("{SELECT_VPC} ORDER BY id"))
            .fetch_all(ctx.pool())
            .await?
            .into_iter()
            .map(Vpc::try_from)
            .collect()
    }

    async fn update_one(&self, ctx: &Context, record: &Vpc) -> Result<Applied<Vpc>, StratusError> {
        let row_id = target_row(
            ctx.pool(),
            "vpc",
            "vpc_id",
            record.id,
            record.vpc_id.as_deref(),
            &record.region,
        )
        .await?
        .ok_or_else(|| missing_row(Vpc::KIND, &record.record_id()))?;

        sqlx::query(
            r#"
            UPDATE vpc
            SET vpc_id = ?, cidr_block = ?, state = ?, is_default = ?, region = ?, tags = ?
            WHERE id = ?
            "#,
        )
        .bind(&record.vpc_id)
        .bind(&record.cidr_block)
        .bind(&record.state)
        .bind(record.is_default)
        .bind(&record.region)
        .bind(record.tags.to_json())
        .bind(row_id)
        .execute(ctx.pool())
        .await?;

        Ok(Applied::Updated(Vpc {
            id: Some(row_id),
            ..record.clone()
        }))
    }

    async fn delete_one(&self, ctx: &Context, record: &Vpc) -> Result<Applied<Vpc>, StratusError> {
        let row_id = target_row(
            ctx.pool(),
            "vpc",
            "vpc_id",
            record.id,
            record.vpc_id.as_deref(),
            &record.region,
        )
        .await?;
        if let Some(row_id) = row_id {
            sqlx::query("DELETE FROM vpc WHERE id = ?")
                .bind(row_id)
                .execute(ctx.pool())
                .await?;
        }
        Ok(Applied::Deleted)
    }
}
