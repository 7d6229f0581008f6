use async_trait::async_trait;
use serde::Serialize;
use sqlx::FromRow;
use stratus_cloud::{CreateSecurityGroupInput, DescribeRequest};
use stratus_memo_core::Side;
use tracing::{info, warn};

use crate::context::Context;
use crate::error::StratusError;
use crate::mapper::{Applied, Crud, Mapper, UpdateOrReplace, restore_from_cloud, tolerate_gone};
use crate::modules::support::{RowKey, found, missing_row, resolve_ref, target_row};
use crate::modules::tags::{Tags, sync_ec2_tags};
use crate::record::{Record, RecordId};

/// Name of the group the provider creates with every VPC.
pub const DEFAULT_GROUP: &str = "default";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityGroup {
    pub id: Option<i64>,
    pub group_id: Option<String>,
    pub group_name: String,
    pub description: String,
    pub vpc_id: Option<String>,
    pub owner_id: Option<String>,
    pub region: String,
    pub tags: Tags,
}

impl Record for SecurityGroup {
    const KIND: &'static str = "security_group";

    fn natural_key(&self) -> Option<Vec<String>> {
        self.group_id
            .as_ref()
            .map(|g| vec![g.clone(), self.region.clone()])
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

impl SecurityGroup {
    pub fn is_default(&self) -> bool {
        self.group_name == DEFAULT_GROUP
    }

    fn from_cloud(group: stratus_cloud::SecurityGroup, region: &str) -> Self {
        Self {
            id: None,
            group_id: Some(group.group_id),
            group_name: group.group_name,
            description: group.description,
            vpc_id: Some(group.vpc_id),
            owner_id: Some(group.owner_id),
            region: region.to_string(),
            tags: Tags::from_cloud(&group.tags),
        }
    }

    fn same_identity(&self, other: &Self) -> bool {
        self.group_name == other.group_name
            && self.description == other.description
            && self.vpc_id == other.vpc_id
    }
}

/// Key `(group_id, region)`. Name, description and VPC are fixed at creation, so changing any
/// of them replaces the group; tags change in place.
///
/// The `default` group belongs to its VPC and cannot be deleted or replaced. Deleting it from
/// the database puts the row back, and identity edits on it are undone from the cloud record.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityGroupMapper;

impl Mapper for SecurityGroupMapper {
    type Record = SecurityGroup;
    type Cloud = SecurityGroupCloud;
    type Db = SecurityGroupDb;

    fn cloud(&self) -> &SecurityGroupCloud {
        &SecurityGroupCloud
    }

    fn db(&self) -> &SecurityGroupDb {
        &SecurityGroupDb
    }

    fn equals(&self, a: &SecurityGroup, b: &SecurityGroup) -> bool {
        a.same_identity(b) && a.region == b.region && a.tags == b.tags
    }

    fn update_or_replace(&self, old: &SecurityGroup, new: &SecurityGroup) -> UpdateOrReplace {
        if old.is_default() || old.same_identity(new) {
            UpdateOrReplace::Update
        } else {
            UpdateOrReplace::Replace
        }
    }
}

pub struct SecurityGroupCloud;

#[async_trait]
impl Crud<SecurityGroup> for SecurityGroupCloud {
    const SIDE: Side = Side::Cloud;

    async fn create_one(
        &self,
        ctx: &Context,
        record: &SecurityGroup,
    ) -> Result<Applied<SecurityGroup>, StratusError> {
        let Some(vpc_id) = record.vpc_id.clone() else {
            return Err(StratusError::unresolved(format!(
                "security group {} references a vpc without a provider id",
                record.group_name
            )));
        };
        let region = record.region.as_str();
        let input = CreateSecurityGroupInput {
            group_name: record.group_name.clone(),
            description: record.description.clone(),
            vpc_id,
            tags: record.tags.to_cloud(),
        };
        let created = ctx
            .cloud_call(region, "CreateSecurityGroup", |c| {
                let input = input.clone();
                async move { c.ec2.create_security_group(input).await }
            })
            .await?;
        info!(region, group_id = %created.group_id, group_name = %created.group_name, "Security group created");
        Ok(Applied::Created(SecurityGroup::from_cloud(created, region)))
    }

    async fn read(
        &self,
        ctx: &Context,
        id: &RecordId,
    ) -> Result<Option<SecurityGroup>, StratusError> {
        if id.is_pending() {
            return Ok(None);
        }
        let [group_id, region] = id.fields_exact::<2>()?;
        let page = found(
            ctx.cloud_call(&region, "DescribeSecurityGroups", |c| {
                let request = DescribeRequest::by_id(group_id.as_str());
                async move { c.ec2.describe_security_groups(request).await }
            })
            .await,
        )?;
        Ok(page
            .and_then(|p| p.items.into_iter().next())
            .map(|g| SecurityGroup::from_cloud(g, &region)))
    }

    async fn read_all(&self, ctx: &Context) -> Result<Vec<SecurityGroup>, StratusError> {
        ctx.for_each_region(|region| async move {
            let groups = ctx
                .cloud_pages(&region, "DescribeSecurityGroups", |c, token| async move {
                    c.ec2
                        .describe_security_groups(DescribeRequest::all().page(token))
                        .await
                })
                .await?;
            Ok(groups
                .into_iter()
                .map(|g| SecurityGroup::from_cloud(g, &region))
                .collect())
        })
        .await
    }

    async fn update_one(
        &self,
        ctx: &Context,
        record: &SecurityGroup,
    ) -> Result<Applied<SecurityGroup>, StratusError> {
        let Some(current) = self.read_cached(ctx, &record.record_id()).await? else {
            return Err(StratusError::unresolved(format!(
                "security group {} is gone from the cloud",
                record.record_id()
            )));
        };
        if !current.same_identity(record) {
            return restore_from_cloud(ctx, self, &SecurityGroupDb, record).await;
        }
        let Some(group_id) = current.group_id.as_deref() else {
            return Err(missing_row(SecurityGroup::KIND, &record.record_id()));
        };
        sync_ec2_tags(ctx, &current.region, group_id, &current.tags, &record.tags).await?;
        Ok(Applied::Updated(SecurityGroup {
            tags: record.tags.clone(),
            ..current
        }))
    }

    async fn delete_one(
        &self,
        ctx: &Context,
        record: &SecurityGroup,
    ) -> Result<Applied<SecurityGroup>, StratusError> {
        if record.is_default() {
            SecurityGroupDb
                .create_one(
                    ctx,
                    &SecurityGroup {
                        id: None,
                        ..record.clone()
                    },
                )
                .await?;
            warn!(
                region = %record.region,
                group_id = ?record.group_id,
                "Default security group cannot be deleted; db row recreated"
            );
            return Ok(Applied::Reverted);
        }
        let Some(group_id) = record.group_id.as_deref() else {
            return Ok(Applied::Deleted);
        };
        tolerate_gone(
            ctx.cloud_call(&record.region, "DeleteSecurityGroup", |c| async move {
                c.ec2.delete_security_group(group_id).await
            })
            .await,
        )?;
        info!(region = %record.region, group_id, "Security group deleted");
        Ok(Applied::Deleted)
    }
}

#[derive(FromRow)]
struct SecurityGroupRow {
    id: i64,
    group_id: Option<String>,
    group_name: String,
    description: String,
    vpc_id: Option<String>,
    owner_id: Option<String>,
    region: String,
    tags: Option<String>,
}

impl TryFrom<SecurityGroupRow> for SecurityGroup {
    type Error = StratusError;

    fn try_from(row: SecurityGroupRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Some(row.id),
            group_id: row.group_id,
            group_name: row.group_name,
            description: row.description,
            vpc_id: row.vpc_id,
            owner_id: row.owner_id,
            region: row.region,
            tags: Tags::from_json(row.tags.as_deref())?,
        })
    }
}

const SELECT_GROUP: &str = r#"
    SELECT g.id, g.group_id, g.group_name, g.description, v.vpc_id AS vpc_id, g.owner_id,
           g.region, g.tags
    FROM security_group g
    LEFT JOIN vpc v ON v.id = g.vpc
"#;

pub struct SecurityGroupDb;

#[async_trait]
impl Crud<SecurityGroup> for SecurityGroupDb {
    const SIDE: Side = Side::Db;

    async fn create_one(
        &self,
        ctx: &Context,
        record: &SecurityGroup,
    ) -> Result<Applied<SecurityGroup>, StratusError> {
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
            INSERT INTO security_group
                (group_id, group_name, description, vpc, owner_id, region, tags)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&record.group_id)
        .bind(&record.group_name)
        .bind(&record.description)
        .bind(vpc)
        .bind(&record.owner_id)
        .bind(&record.region)
        .bind(record.tags.to_json())
        .fetch_one(ctx.pool())
        .await?;

        Ok(Applied::Created(SecurityGroup {
            id: Some(id),
            ..record.clone()
        }))
    }

    async fn read(
        &self,
        ctx: &Context,
        id: &RecordId,
    ) -> Result<Option<SecurityGroup>, StratusError> {
        let row = match RowKey::of(id) {
            Some(RowKey::Surrogate(row_id)) => {
                sqlx::query_as::<_, SecurityGroupRow>(&format!("{SELECT_GROUP} WHERE g.id = ?"))
                    .bind(row_id)
                    .fetch_optional(ctx.pool())
                    .await?
            }
            Some(RowKey::Natural(fields)) if fields.len() == 2 => {
                sqlx::query_as::<_, SecurityGroupRow>(&format!(
                    "{SELECT_GROUP} WHERE g.group_id = ? AND g.region = ?"
                ))
                .bind(&fields[0])
                .bind(&fields[1])
                .fetch_optional(ctx.pool())
                .await?
            }
            _ => None,
        };
        row.map(SecurityGroup::try_from).transpose()
    }

    async fn read_all(&self, ctx: &Context) -> Result<Vec<SecurityGroup>, StratusError> {
        sqlx::query_as::<_, SecurityGroupRow>(&format!("{SELECT_GROUP} ORDER BY g.id"))
            .fetch_all(ctx.pool())
            .await?
            .into_iter()
            .map(SecurityGroup::try_from)
            .collect()
    }

    async fn update_one(
        &self,
        ctx: &Context,
        record: &SecurityGroup,
    ) -> Result<Applied<SecurityGroup>, StratusError> {
        let row_id = target_row(
            ctx.pool(),
            "security_group",
            "group_id",
            record.id,
            record.group_id.as_deref(),
            &record.region,
        )
        .await?
        .ok_or_else(|| missing_row(SecurityGroup::KIND, &record.record_id()))?;
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
            UPDATE security_group
            SET group_id = ?, group_name = ?, description = ?, vpc = ?, owner_id = ?,
                region = ?, tags = ?
            WHERE id = ?
            "#,
        )
        .bind(&record.group_id)
        .bind(&record.group_name)
        .bind(&record.description)
        .bind(vpc)
        .bind(&record.owner_id)
        .bind(&record.region)
        .bind(record.tags.to_json())
        .bind(row_id)
        .execute(ctx.pool())
        .await?;

        Ok(Applied::Updated(SecurityGroup {
            id: Some(row_id),
            ..record.clone()
        }))
    }

    async fn delete_one(
        &self,
        ctx: &Context,
        record: &SecurityGroup,
    ) -> Result<Applied<SecurityGroup>, StratusError> {
        let row_id = target_row(
            ctx.pool(),
            "security_group",
            "group_id",
            record.id,
            record.group_id.as_deref(),
            &record.region,
        )
        .await?;
        if let Some(row_id) = row_id {
            sqlx::query("DELETE FROM security_group WHERE id = ?")
                .bind(row_id)
                .execute(ctx.pool())
                .await?;
        }
        Ok(Applied::Deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(name: &str, description: &str) -> SecurityGroup {
        SecurityGroup {
            id: Some(1),
            group_id: Some("sg-1".to_string()),
            group_name: name.to_string(),
            description: description.to_string(),
            vpc_id: Some("vpc-1".to_string()),
            owner_id: None,
            region: "us-east-1".to_string(),
            tags: Tags::default(),
        }
    }

    #[test]
    fn identity_changes_replace_except_on_default() {
        let mapper = SecurityGroupMapper;
        let web = group("web", "web tier");
        let renamed = group("web-2", "web tier");
        assert_eq!(mapper.update_or_replace(&web, &renamed), UpdateOrReplace::Replace);

        let mut tagged = web.clone();
        tagged.tags.insert("team", "edge");
        assert!(!mapper.equals(&web, &tagged));
        assert_eq!(mapper.update_or_replace(&web, &tagged), UpdateOrReplace::Update);

        let default = group(DEFAULT_GROUP, "default VPC security group");
        let edited = group(DEFAULT_GROUP, "edited");
        assert_eq!(mapper.update_or_replace(&default, &edited), UpdateOrReplace::Update);
    }
}
