use async_trait::async_trait;
use serde::Serialize;
use sqlx::FromRow;
use stratus_memo_core::Side;
use tracing::info;

use crate::context::Context;
use crate::error::StratusError;
use crate::mapper::{Applied, Crud, Mapper, UpdateOrReplace, restore_from_cloud, tolerate_gone};
use crate::modules::aws_vpc::endpoint::normalized_policy;
use crate::modules::support::{RowKey, found, missing_row, target_row};
use crate::record::{Record, RecordId};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Topic {
    pub id: Option<i64>,
    pub name: String,
    /// Assigned by the provider on create.
    pub arn: Option<String>,
    pub display_name: Option<String>,
    pub policy: Option<String>,
    pub delivery_policy: Option<String>,
    pub region: String,
}

impl Record for Topic {
    const KIND: &'static str = "topic";

    fn natural_key(&self) -> Option<Vec<String>> {
        Some(vec![self.name.clone(), self.region.clone()])
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

impl Topic {
    fn from_cloud(topic: stratus_cloud::types::Topic, region: &str) -> Self {
        Self {
            id: None,
            name: topic.name,
            arn: Some(topic.topic_arn),
            display_name: topic.display_name,
            policy: topic.policy,
            delivery_policy: topic.delivery_policy,
            region: region.to_string(),
        }
    }
}

/// Key `(name, region)`. Attributes are fixed at creation: an update puts the cloud record back
/// into the database.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopicMapper;

impl Mapper for TopicMapper {
    type Record = Topic;
    type Cloud = TopicCloud;
    type Db = TopicDb;

    fn cloud(&self) -> &TopicCloud {
        &TopicCloud
    }

    fn db(&self) -> &TopicDb {
        &TopicDb
    }

    fn equals(&self, a: &Topic, b: &Topic) -> bool {
        a.name == b.name
            && a.region == b.region
            && a.display_name == b.display_name
            && normalized_policy(a.policy.as_deref()) == normalized_policy(b.policy.as_deref())
            && normalized_policy(a.delivery_policy.as_deref())
                == normalized_policy(b.delivery_policy.as_deref())
    }

    fn update_or_replace(&self, _old: &Topic, _new: &Topic) -> UpdateOrReplace {
        UpdateOrReplace::Update
    }
}

pub struct TopicCloud;

impl TopicCloud {
    async fn describe(
        &self,
        ctx: &Context,
        region: &str,
        topic_arn: &str,
    ) -> Result<Option<Topic>, StratusError> {
        let topic = found(
            ctx.cloud_call(region, "GetTopicAttributes", |c| async move {
                c.sns.get_topic_attributes(topic_arn).await
            })
            .await,
        )?;
        Ok(topic.map(|t| Topic::from_cloud(t, region)))
    }

    async fn arns(&self, ctx: &Context, region: &str) -> Result<Vec<String>, StratusError> {
        ctx.cloud_pages(region, "ListTopics", |c, token| async move {
            c.sns.list_topics(token).await
        })
        .await
    }
}

#[async_trait]
impl Crud<Topic> for TopicCloud {
    const SIDE: Side = Side::Cloud;

    async fn create_one(&self, ctx: &Context, record: &Topic) -> Result<Applied<Topic>, StratusError> {
        let region = record.region.as_str();
        let arn = ctx
            .cloud_call(region, "CreateTopic", |c| async move {
                c.sns
                    .create_topic(
                        &record.name,
                        record.display_name.as_deref(),
                        record.policy.as_deref(),
                        record.delivery_policy.as_deref(),
                    )
                    .await
            })
            .await?;
        info!(region, topic_arn = %arn, "Topic created");
        let created = self.describe(ctx, region, &arn).await?.unwrap_or_else(|| Topic {
            arn: Some(arn.clone()),
            ..record.clone()
        });
        Ok(Applied::Created(created))
    }

    async fn read(&self, ctx: &Context, id: &RecordId) -> Result<Option<Topic>, StratusError> {
        if id.is_pending() {
            return Ok(None);
        }
        let [name, region] = id.fields_exact::<2>()?;
        let arns = self.arns(ctx, &region).await?;
        let Some(arn) = arns
            .iter()
            .find(|arn| stratus_cloud::types::Topic::name_from_arn(arn) == Some(name.as_str()))
        else {
            return Ok(None);
        };
        self.describe(ctx, &region, arn).await
    }

    async fn read_all(&self, ctx: &Context) -> Result<Vec<Topic>, StratusError> {
        ctx.for_each_region(|region| async move {
            let mut topics = Vec::new();
            for arn in self.arns(ctx, &region).await? {
                if let Some(topic) = self.describe(ctx, &region, &arn).await? {
                    topics.push(topic);
                }
            }
            Ok(topics)
        })
        .await
    }

    async fn update_one(&self, ctx: &Context, record: &Topic) -> Result<Applied<Topic>, StratusError> {
        restore_from_cloud(ctx, self, &TopicDb, record).await
    }

    async fn delete_one(&self, ctx: &Context, record: &Topic) -> Result<Applied<Topic>, StratusError> {
        let arn = match &record.arn {
            Some(arn) => Some(arn.clone()),
            None => self
                .read(ctx, &record.record_id())
                .await?
                .and_then(|t| t.arn),
        };
        let Some(arn) = arn else {
            return Ok(Applied::Deleted);
        };
        tolerate_gone(
            ctx.cloud_call(&record.region, "DeleteTopic", |c| {
                let arn = arn.clone();
                async move { c.sns.delete_topic(&arn).await }
            })
            .await,
        )?;
        info!(region = %record.region, topic_arn = %arn, "Topic deleted");
        Ok(Applied::Deleted)
    }
}

#[derive(FromRow)]
struct TopicRow {
    id: i64,
    name: String,
    arn: Option<String>,
    display_name: Option<String>,
    policy: Option<String>,
    delivery_policy: Option<String>,
    region: String,
}

impl From<TopicRow> for Topic {
    fn from(row: TopicRow) -> Self {
        Self {
            id: Some(row.id),
            name: row.name,
            arn: row.arn,
            display_name: row.display_name,
            policy: row.policy,
            delivery_policy: row.delivery_policy,
            region: row.region,
        }
    }
}

const SELECT_TOPIC: &str = r#"
    SELECT id, name, arn, display_name, policy, delivery_policy, region
    FROM topic
"#;

pub struct TopicDb;

#[async_trait]
impl Crud<Topic> for TopicDb {
    const SIDE: Side = Side::Db;

    async fn create_one(&self, ctx: &Context, record: &Topic) -> Result<Applied<Topic>, StratusError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO topic (name, arn, display_name, policy, delivery_policy, region)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&record.name)
        .bind(&record.arn)
        .bind(&record.display_name)
        .bind(&record.policy)
        .bind(&record.delivery_policy)
        .bind(&record.region)
        .fetch_one(ctx.pool())
        .await?;

        Ok(Applied::Created(Topic {
            id: Some(id),
            ..record.clone()
        }))
    }

    async fn read(&self, ctx: &Context, id: &RecordId) -> Result<Option<Topic>, StratusError> {
        let row = match RowKey::of(id) {
            Some(RowKey::Surrogate(row_id)) => {
                sqlx::query_as::<_, TopicRow>(&format!("{SELECT_TOPIC} WHERE id = ?"))
                    .bind(row_id)
                    .fetch_optional(ctx.pool())
                    .await?
            }
            Some(RowKey::Natural(fields)) if fields.len() == 2 => {
                sqlx::query_as::<_, TopicRow>(&format!(
                    "{SELECT_TOPIC} WHERE name = ? AND region = ?"
                ))
                .bind(&fields[0])
                .bind(&fields[1])
                .fetch_optional(ctx.pool())
                .await?
            }
            _ => None,
        };
        Ok(row.map(Topic::from))
    }

    async fn read_all(&self, ctx: &Context) -> Result<Vec<Topic>, StratusError> {
        let rows = sqlx::query_as::<_, TopicRow>(&format!("{SELECT_TOPIC} ORDER BY id"))
            .fetch_all(ctx.pool())
            .await?;
        Ok(rows.into_iter().map(Topic::from).collect())
    }

    async fn update_one(&self, ctx: &Context, record: &Topic) -> Result<Applied<Topic>, StratusError> {
        let row_id = target_row(
            ctx.pool(),
            "topic",
            "name",
            record.id,
            Some(&record.name),
            &record.region,
        )
        .await?
        .ok_or_else(|| missing_row(Topic::KIND, &record.record_id()))?;

        sqlx::query(
            r#"
            UPDATE topic
            SET name = ?, arn = ?, display_name = ?, policy = ?, delivery_policy = ?, region = ?
            WHERE id = ?
            "#,
        )
        .bind(&record.name)
        .bind(&record.arn)
        .bind(&record.display_name)
        .bind(&record.policy)
        .bind(&record.delivery_policy)
        .bind(&record.region)
        .bind(row_id)
        .execute(ctx.pool())
        .await?;

        Ok(Applied::Updated(Topic {
            id: Some(row_id),
            ..record.clone()
        }))
    }

    async fn delete_one(&self, ctx: &Context, record: &Topic) -> Result<Applied<Topic>, StratusError> {
        let row_id = target_row(
            ctx.pool(),
            "topic",
            "name",
            record.id,
            Some(&record.name),
            &record.region,
        )
        .await?;
        if let Some(row_id) = row_id {
            sqlx::query("DELETE FROM topic WHERE id = ?")
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

    #[test]
    fn identity_is_name_and_region_not_arn() {
        let topic = Topic {
            id: None,
            name: "orders".to_string(),
            arn: None,
            display_name: None,
            policy: None,
            delivery_policy: None,
            region: "us-east-1".to_string(),
        };
        let created = Topic {
            arn: Some("arn:aws:sns:us-east-1:123456789012:orders".to_string()),
            ..topic.clone()
        };
        assert_eq!(topic.record_id(), created.record_id());
        assert!(!topic.record_id().is_pending());
        assert!(TopicMapper.equals(&topic, &created));
    }
}
