use async_trait::async_trait;
use serde::Serialize;
use sqlx::FromRow;
use std::collections::HashMap;
use stratus_cloud::{DescribeRequest, InstanceState, RunInstancesInput};
use stratus_memo_core::Side;
use tracing::{debug, info};

use crate::context::{Context, Probe};
use crate::error::StratusError;
use crate::mapper::{Applied, Crud, Mapper, UpdateOrReplace, tolerate_gone};
use crate::modules::support::{RowKey, found, missing_row, resolve_ref, target_row};
use crate::modules::tags::{Tags, sync_ec2_tags};
use crate::record::{Record, RecordId};

const NAME_TAG: &str = "Name";

/// An EC2 instance. The `Name` tag lives in `name`, never in `tags`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instance {
    pub id: Option<i64>,
    pub instance_id: Option<String>,
    pub name: Option<String>,
    pub ami: String,
    pub instance_type: String,
    pub state: String,
    /// Sorted provider group ids.
    pub security_group_ids: Vec<String>,
    /// Linked security group rows without a provider id.
    #[serde(skip)]
    pub unresolved_groups: usize,
    pub region: String,
    pub tags: Tags,
}

impl Record for Instance {
    const KIND: &'static str = "instance";

    fn natural_key(&self) -> Option<Vec<String>> {
        self.instance_id
            .as_ref()
            .map(|i| vec![i.clone(), self.region.clone()])
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

impl Instance {
    fn from_cloud(instance: stratus_cloud::Instance, region: &str) -> Self {
        let mut tags = Tags::from_cloud(&instance.tags);
        let name = tags.remove(NAME_TAG);
        let mut security_group_ids = instance.security_group_ids;
        security_group_ids.sort();
        Self {
            id: None,
            instance_id: Some(instance.instance_id),
            name,
            ami: instance.image_id,
            instance_type: instance.instance_type,
            state: instance.state.as_str().to_string(),
            security_group_ids,
            unresolved_groups: 0,
            region: region.to_string(),
            tags,
        }
    }

    /// Tags as the provider stores them, `Name` included.
    fn provider_tags(&self) -> Tags {
        let mut tags = self.tags.clone();
        if let Some(name) = &self.name {
            tags.insert(NAME_TAG, name.clone());
        }
        tags
    }
}

/// Key `(instance_id, region)`. A new AMI or instance type replaces the instance; security
/// groups, name and tags change in place. Creates wait for `running` and deletes wait for
/// `terminated`. Terminated instances are never read back.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstanceMapper;

impl Mapper for InstanceMapper {
    type Record = Instance;
    type Cloud = InstanceCloud;
    type Db = InstanceDb;

    fn cloud(&self) -> &InstanceCloud {
        &InstanceCloud
    }

    fn db(&self) -> &InstanceDb {
        &InstanceDb
    }

    fn equals(&self, a: &Instance, b: &Instance) -> bool {
        a.name == b.name
            && a.ami == b.ami
            && a.instance_type == b.instance_type
            && a.security_group_ids == b.security_group_ids
            && a.region == b.region
            && a.tags == b.tags
    }

    fn update_or_replace(&self, old: &Instance, new: &Instance) -> UpdateOrReplace {
        if old.ami == new.ami && old.instance_type == new.instance_type {
            UpdateOrReplace::Update
        } else {
            UpdateOrReplace::Replace
        }
    }
}

fn check_groups(record: &Instance) -> Result<(), StratusError> {
    if record.unresolved_groups > 0 {
        return Err(StratusError::unresolved(format!(
            "instance {} references {} security group(s) without a provider id",
            record.name.as_deref().unwrap_or(&record.ami),
            record.unresolved_groups
        )));
    }
    Ok(())
}

pub struct InstanceCloud;

impl InstanceCloud {
    async fn wait_running(
        &self,
        ctx: &Context,
        region: &str,
        instance_id: &str,
    ) -> Result<Instance, StratusError> {
        let id = RecordId::generate([instance_id, region]);
        ctx.wait_for(&format!("instance {instance_id}"), || async {
            match self.read(ctx, &id).await? {
                Some(i) if i.state == InstanceState::Running.as_str() => Ok(Probe::Ready(i)),
                Some(i) => Ok(Probe::Pending(i.state)),
                None => Err(StratusError::validation(format!(
                    "instance {instance_id} terminated while starting"
                ))),
            }
        })
        .await
    }

    async fn wait_terminated(
        &self,
        ctx: &Context,
        region: &str,
        instance_id: &str,
    ) -> Result<(), StratusError> {
        let id = RecordId::generate([instance_id, region]);
        ctx.wait_for(&format!("instance {instance_id} termination"), || async {
            match self.read(ctx, &id).await? {
                None => Ok(Probe::Ready(())),
                Some(i) => Ok(Probe::Pending(i.state)),
            }
        })
        .await
    }
}

#[async_trait]
impl Crud<Instance> for InstanceCloud {
    const SIDE: Side = Side::Cloud;

    async fn create_one(
        &self,
        ctx: &Context,
        record: &Instance,
    ) -> Result<Applied<Instance>, StratusError> {
        check_groups(record)?;
        let region = record.region.as_str();
        let input = RunInstancesInput {
            image_id: record.ami.clone(),
            instance_type: record.instance_type.clone(),
            subnet_id: None,
            security_group_ids: record.security_group_ids.clone(),
            tags: record.provider_tags().to_cloud(),
        };
        let launched = ctx
            .cloud_call(region, "RunInstances", |c| {
                let input = input.clone();
                async move { c.ec2.run_instances(input).await }
            })
            .await?;
        info!(region, instance_id = %launched.instance_id, ami = %launched.image_id, "Instance launched");

        let realized = self
            .wait_running(ctx, region, &launched.instance_id)
            .await?;
        Ok(Applied::Created(realized))
    }

    async fn read(&self, ctx: &Context, id: &RecordId) -> Result<Option<Instance>, StratusError> {
        if id.is_pending() {
            return Ok(None);
        }
        let [instance_id, region] = id.fields_exact::<2>()?;
        let page = found(
            ctx.cloud_call(&region, "DescribeInstances", |c| {
                let request = DescribeRequest::by_id(instance_id.as_str());
                async move { c.ec2.describe_instances(request).await }
            })
            .await,
        )?;
        Ok(page
            .and_then(|p| p.items.into_iter().next())
            .filter(|i| i.state != InstanceState::Terminated)
            .map(|i| Instance::from_cloud(i, &region)))
    }

    async fn read_all(&self, ctx: &Context) -> Result<Vec<Instance>, StratusError> {
        ctx.for_each_region(|region| async move {
            let instances = ctx
                .cloud_pages(&region, "DescribeInstances", |c, token| async move {
                    c.ec2
                        .describe_instances(DescribeRequest::all().page(token))
                        .await
                })
                .await?;
            Ok(instances
                .into_iter()
                .filter(|i| i.state != InstanceState::Terminated)
                .map(|i| Instance::from_cloud(i, &region))
                .collect())
        })
        .await
    }

    async fn update_one(
        &self,
        ctx: &Context,
        record: &Instance,
    ) -> Result<Applied<Instance>, StratusError> {
        check_groups(record)?;
        let Some(current) = self.read_cached(ctx, &record.record_id()).await? else {
            return Err(StratusError::unresolved(format!(
                "instance {} is gone from the cloud",
                record.record_id()
            )));
        };
        let Some(instance_id) = current.instance_id.as_deref() else {
            return Err(missing_row(Instance::KIND, &record.record_id()));
        };
        let region = current.region.as_str();

        // An empty desired set keeps the groups the instance has.
        let mut security_group_ids = current.security_group_ids.clone();
        if !record.security_group_ids.is_empty()
            && record.security_group_ids != current.security_group_ids
        {
            debug!(region, instance_id, groups = ?record.security_group_ids, "Replacing instance security groups");
            ctx.cloud_call(region, "ModifyInstanceAttribute", |c| {
                let groups = record.security_group_ids.clone();
                async move {
                    c.ec2
                        .modify_instance_security_groups(instance_id, &groups)
                        .await
                }
            })
            .await?;
            security_group_ids = record.security_group_ids.clone();
        }
        sync_ec2_tags(
            ctx,
            region,
            instance_id,
            &current.provider_tags(),
            &record.provider_tags(),
        )
        .await?;

        Ok(Applied::Updated(Instance {
            name: record.name.clone(),
            tags: record.tags.clone(),
            security_group_ids,
            ..current
        }))
    }

    async fn delete_one(
        &self,
        ctx: &Context,
        record: &Instance,
    ) -> Result<Applied<Instance>, StratusError> {
        let Some(instance_id) = record.instance_id.clone() else {
            return Ok(Applied::Deleted);
        };
        let region = record.region.as_str();
        let ids = vec![instance_id.clone()];
        tolerate_gone(
            ctx.cloud_call(region, "TerminateInstances", |c| {
                let ids = ids.clone();
                async move { c.ec2.terminate_instances(&ids).await }
            })
            .await,
        )?;
        self.wait_terminated(ctx, region, &instance_id).await?;
        info!(region, instance_id = %instance_id, "Instance terminated");
        Ok(Applied::Deleted)
    }
}

#[derive(FromRow)]
struct InstanceRow {
    id: i64,
    instance_id: Option<String>,
    name: Option<String>,
    ami: String,
    instance_type: String,
    state: Option<String>,
    region: String,
    tags: Option<String>,
}

#[derive(FromRow)]
struct InstanceGroupRow {
    instance: i64,
    group_id: Option<String>,
}

const SELECT_INSTANCE: &str = r#"
    SELECT id, instance_id, name, ami, instance_type, state, region, tags
    FROM instance
"#;

const SELECT_INSTANCE_GROUPS: &str = r#"
    SELECT isg.instance, g.group_id
    FROM instance_security_groups isg
    JOIN security_group g ON g.id = isg.security_group
"#;

pub struct InstanceDb;

impl InstanceDb {
    async fn hydrate(
        &self,
        ctx: &Context,
        rows: Vec<InstanceRow>,
    ) -> Result<Vec<Instance>, StratusError> {
        let links = sqlx::query_as::<_, InstanceGroupRow>(SELECT_INSTANCE_GROUPS)
            .fetch_all(ctx.pool())
            .await?;
        let mut by_instance: HashMap<i64, (Vec<String>, usize)> = HashMap::new();
        for link in links {
            let entry = by_instance.entry(link.instance).or_default();
            match link.group_id {
                Some(group_id) => entry.0.push(group_id),
                None => entry.1 += 1,
            }
        }

        rows.into_iter()
            .map(|row| {
                let (mut security_group_ids, unresolved) =
                    by_instance.remove(&row.id).unwrap_or_default();
                security_group_ids.sort();
                let mut tags = Tags::from_json(row.tags.as_deref())?;
                let name = row.name.or_else(|| tags.remove(NAME_TAG));
                Ok(Instance {
                    id: Some(row.id),
                    instance_id: row.instance_id,
                    name,
                    ami: row.ami,
                    instance_type: row.instance_type,
                    state: row.state.unwrap_or_default(),
                    security_group_ids,
                    unresolved_groups: unresolved,
                    region: row.region,
                    tags,
                })
            })
            .collect()
    }

    async fn write(
        &self,
        ctx: &Context,
        row_id: Option<i64>,
        record: &Instance,
    ) -> Result<i64, StratusError> {
        let mut groups = Vec::with_capacity(record.security_group_ids.len());
        for group_id in &record.security_group_ids {
            groups.push(
                resolve_ref(
                    ctx.pool(),
                    "security group",
                    "security_group",
                    "group_id",
                    Some(group_id),
                    &record.region,
                )
                .await?,
            );
        }

        let mut tx = ctx.pool().begin().await?;
        let id: i64 = match row_id {
            None => {
                sqlx::query_scalar(
                    r#"
                    INSERT INTO instance (instance_id, name, ami, instance_type, state, region, tags)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    RETURNING id
                    "#,
                )
                .bind(&record.instance_id)
                .bind(&record.name)
                .bind(&record.ami)
                .bind(&record.instance_type)
                .bind(&record.state)
                .bind(&record.region)
                .bind(record.tags.to_json())
                .fetch_one(&mut *tx)
                .await?
            }
            Some(row_id) => {
                sqlx::query(
                    r#"
                    UPDATE instance
                    SET instance_id = ?, name = ?, ami = ?, instance_type = ?, state = ?,
                        region = ?, tags = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&record.instance_id)
                .bind(&record.name)
                .bind(&record.ami)
                .bind(&record.instance_type)
                .bind(&record.state)
                .bind(&record.region)
                .bind(record.tags.to_json())
                .bind(row_id)
                .execute(&mut *tx)
                .await?;
                row_id
            }
        };

        sqlx::query("DELETE FROM instance_security_groups WHERE instance = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        for group in groups {
            sqlx::query("INSERT INTO instance_security_groups (instance, security_group) VALUES (?, ?)")
                .bind(id)
                .bind(group)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(id)
    }
}

#[async_trait]
impl Crud<Instance> for InstanceDb {
    const SIDE: Side = Side::Db;

    async fn create_one(
        &self,
        ctx: &Context,
        record: &Instance,
    ) -> Result<Applied<Instance>, StratusError> {
        let id = self.write(ctx, None, record).await?;
        Ok(Applied::Created(Instance {
            id: Some(id),
            ..record.clone()
        }))
    }

    async fn read(&self, ctx: &Context, id: &RecordId) -> Result<Option<Instance>, StratusError> {
        let row = match RowKey::of(id) {
            Some(RowKey::Surrogate(row_id)) => {
                sqlx::query_as::<_, InstanceRow>(&format!("{SELECT_INSTANCE} WHERE id = ?"))
                    .bind(row_id)
                    .fetch_optional(ctx.pool())
                    .await?
            }
            Some(RowKey::Natural(fields)) if fields.len() == 2 => {
                sqlx::query_as::<_, InstanceRow>(&format!(
                    "{SELECT_INSTANCE} WHERE instance_id = ? AND region = ?"
                ))
                .bind(&fields[0])
                .bind(&fields[1])
                .fetch_optional(ctx.pool())
                .await?
            }
            _ => None,
        };
        match row {
            Some(row) => Ok(self.hydrate(ctx, vec![row]).await?.into_iter().next()),
            None => Ok(None),
        }
    }

    async fn read_all(&self, ctx: &Context) -> Result<Vec<Instance>, StratusError> {
        let rows = sqlx::query_as::<_, InstanceRow>(&format!("{SELECT_INSTANCE} ORDER BY id"))
            .fetch_all(ctx.pool())
            .await?;
        self.hydrate(ctx, rows).await
    }

    async fn update_one(
        &self,
        ctx: &Context,
        record: &Instance,
    ) -> Result<Applied<Instance>, StratusError> {
        let row_id = target_row(
            ctx.pool(),
            "instance",
            "instance_id",
            record.id,
            record.instance_id.as_deref(),
            &record.region,
        )
        .await?
        .ok_or_else(|| missing_row(Instance::KIND, &record.record_id()))?;
        let id = self.write(ctx, Some(row_id), record).await?;
        Ok(Applied::Updated(Instance {
            id: Some(id),
            ..record.clone()
        }))
    }

    async fn delete_one(
        &self,
        ctx: &Context,
        record: &Instance,
    ) -> Result<Applied<Instance>, StratusError> {
        let row_id = target_row(
            ctx.pool(),
            "instance",
            "instance_id",
            record.id,
            record.instance_id.as_deref(),
            &record.region,
        )
        .await?;
        if let Some(row_id) = row_id {
            sqlx::query("DELETE FROM instance WHERE id = ?")
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

    fn instance() -> Instance {
        Instance {
            id: None,
            instance_id: Some("i-1".to_string()),
            name: Some("web".to_string()),
            ami: "ami-1".to_string(),
            instance_type: "t3.micro".to_string(),
            state: "running".to_string(),
            security_group_ids: vec!["sg-1".to_string()],
            unresolved_groups: 0,
            region: "us-east-1".to_string(),
            tags: Tags::default(),
        }
    }

    #[test]
    fn state_is_not_compared_and_image_changes_replace() {
        let mapper = InstanceMapper;
        let running = instance();
        let pending = Instance {
            state: "pending".to_string(),
            ..instance()
        };
        assert!(mapper.equals(&running, &pending));

        let resized = Instance {
            instance_type: "t3.large".to_string(),
            ..instance()
        };
        assert_eq!(mapper.update_or_replace(&running, &resized), UpdateOrReplace::Replace);

        let regrouped = Instance {
            security_group_ids: vec!["sg-2".to_string()],
            ..instance()
        };
        assert_eq!(mapper.update_or_replace(&running, &regrouped), UpdateOrReplace::Update);
    }

    #[test]
    fn name_travels_as_a_tag() {
        let tags = instance().provider_tags();
        assert_eq!(tags.get("Name"), Some("web"));
    }
}
