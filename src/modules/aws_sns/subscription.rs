use async_trait::async_trait;
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use stratus_memo_core::Side;
use tracing::warn;

use crate::context::Context;
use crate::error::StratusError;
use crate::mapper::{Applied, Crud, Mapper, UpdateOrReplace, restore_from_cloud};
use crate::modules::support::{found, missing_row, resolve_ref};
use crate::record::{Record, RecordId};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subscription {
    pub id: Option<i64>,
    pub arn: Option<String>,
    /// ARN of the parent topic; `None` while the topic is not created yet.
    pub topic_arn: Option<String>,
    pub endpoint: String,
    pub protocol: String,
    pub region: String,
}

impl Record for Subscription {
    const KIND: &'static str = "subscription";

    fn natural_key(&self) -> Option<Vec<String>> {
        self.topic_arn
            .as_ref()
            .map(|t| vec![t.clone(), self.endpoint.clone(), self.region.clone()])
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

impl Subscription {
    fn from_cloud(subscription: stratus_cloud::types::Subscription, region: &str) -> Self {
        Self {
            id: None,
            arn: Some(subscription.subscription_arn),
            topic_arn: Some(subscription.topic_arn),
            endpoint: subscription.endpoint,
            protocol: subscription.protocol,
            region: region.to_string(),
        }
    }
}

/// Key `(topic_arn, endpoint, region)`.
///
/// Subscriptions only exist once the endpoint owner confirms them out of band, so this kind
/// never writes to the provider. In the apply direction every write is turned around: a row
/// with no cloud counterpart is dropped from the database, a cloud subscription missing from
/// the database is written back into it, and a changed row is overwritten with the cloud record.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscriptionMapper;

impl Mapper for SubscriptionMapper {
    type Record = Subscription;
    type Cloud = SubscriptionCloud;
    type Db = SubscriptionDb;

    fn cloud(&self) -> &SubscriptionCloud {
        &SubscriptionCloud
    }

    fn db(&self) -> &SubscriptionDb {
        &SubscriptionDb
    }

    fn equals(&self, a: &Subscription, b: &Subscription) -> bool {
        a.topic_arn == b.topic_arn
            && a.endpoint == b.endpoint
            && a.protocol == b.protocol
            && a.region == b.region
    }

    fn update_or_replace(&self, _old: &Subscription, _new: &Subscription) -> UpdateOrReplace {
        UpdateOrReplace::Update
    }
}

pub struct SubscriptionCloud;

#[async_trait]
impl Crud<Subscription> for SubscriptionCloud {
    const SIDE: Side = Side::Cloud;

    async fn create_one(
        &self,
        ctx: &Context,
        record: &Subscription,
    ) -> Result<Applied<Subscription>, StratusError> {
        SubscriptionDb.delete_one(ctx, record).await?;
        warn!(
            region = %record.region,
            endpoint = %record.endpoint,
            "Subscriptions cannot be created without confirmation; db row removed"
        );
        Ok(Applied::Reverted)
    }

    async fn read(
        &self,
        ctx: &Context,
        id: &RecordId,
    ) -> Result<Option<Subscription>, StratusError> {
        if id.is_pending() {
            return Ok(None);
        }
        let [topic_arn, endpoint, region] = id.fields_exact::<3>()?;
        let listed = found(
            ctx.cloud_pages(&region, "ListSubscriptionsByTopic", |c, token| {
                let topic_arn = topic_arn.clone();
                async move { c.sns.list_subscriptions_by_topic(&topic_arn, token).await }
            })
            .await,
        )?;
        Ok(listed
            .unwrap_or_default()
            .into_iter()
            .find(|s| s.endpoint == endpoint)
            .map(|s| Subscription::from_cloud(s, &region)))
    }

    async fn read_all(&self, ctx: &Context) -> Result<Vec<Subscription>, StratusError> {
        ctx.for_each_region(|region| async move {
            let subscriptions = ctx
                .cloud_pages(&region, "ListSubscriptions", |c, token| async move {
                    c.sns.list_subscriptions(token).await
                })
                .await?;
            Ok(subscriptions
                .into_iter()
                .map(|s| Subscription::from_cloud(s, &region))
                .collect())
        })
        .await
    }

    async fn update_one(
        &self,
        ctx: &Context,
        record: &Subscription,
    ) -> Result<Applied<Subscription>, StratusError> {
        restore_from_cloud(ctx, self, &SubscriptionDb, record).await
    }

    async fn delete_one(
        &self,
        ctx: &Context,
        record: &Subscription,
    ) -> Result<Applied<Subscription>, StratusError> {
        SubscriptionDb
            .create_one(
                ctx,
                &Subscription {
                    id: None,
                    ..record.clone()
                },
            )
            .await?;
        warn!(
            region = %record.region,
            endpoint = %record.endpoint,
            "Subscriptions cannot be deleted; db row recreated"
        );
        Ok(Applied::Reverted)
    }
}

#[derive(FromRow)]
struct SubscriptionRow {
    id: i64,
    arn: Option<String>,
    topic_arn: Option<String>,
    endpoint: String,
    protocol: String,
    region: String,
}

impl From<SubscriptionRow> for Subscription {
    fn from(row: SubscriptionRow) -> Self {
        Self {
            id: Some(row.id),
            arn: row.arn,
            topic_arn: row.topic_arn,
            endpoint: row.endpoint,
            protocol: row.protocol,
            region: row.region,
        }
    }
}

const SELECT_SUBSCRIPTION: &str = r#"
    SELECT s.id, s.arn, t.arn AS topic_arn, s.endpoint, s.protocol, s.region
    FROM subscription s
    LEFT JOIN topic t ON t.id = s.topic
"#;

/// Row of `record`: the surrogate when known, otherwise the natural key through the topic join.
async fn subscription_row(
    pool: &SqlitePool,
    record: &Subscription,
) -> Result<Option<i64>, StratusError> {
    if let Some(id) = record.id {
        return Ok(Some(id));
    }
    let Some(topic_arn) = &record.topic_arn else {
        return Ok(None);
    };
    let id: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT s.id FROM subscription s
        JOIN topic t ON t.id = s.topic
        WHERE t.arn = ? AND s.endpoint = ? AND s.region = ?
        "#,
    )
    .bind(topic_arn)
    .bind(&record.endpoint)
    .bind(&record.region)
    .fetch_optional(pool)
    .await?;
    Ok(id)
}

pub struct SubscriptionDb;

#[async_trait]
impl Crud<Subscription> for SubscriptionDb {
    const SIDE: Side = Side::Db;

    async fn create_one(
        &self,
        ctx: &Context,
        record: &Subscription,
    ) -> Result<Applied<Subscription>, StratusError> {
        let topic = resolve_ref(
            ctx.pool(),
            "topic",
            "topic",
            "arn",
            record.topic_arn.as_deref(),
            &record.region,
        )
        .await?;
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO subscription (arn, topic, endpoint, protocol, region)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&record.arn)
        .bind(topic)
        .bind(&record.endpoint)
        .bind(&record.protocol)
        .bind(&record.region)
        .fetch_one(ctx.pool())
        .await?;

        Ok(Applied::Created(Subscription {
            id: Some(id),
            ..record.clone()
        }))
    }

    async fn read(
        &self,
        ctx: &Context,
        id: &RecordId,
    ) -> Result<Option<Subscription>, StratusError> {
        let row = if let Some(row_id) = id.pending_surrogate() {
            sqlx::query_as::<_, SubscriptionRow>(&format!("{SELECT_SUBSCRIPTION} WHERE s.id = ?"))
                .bind(row_id)
                .fetch_optional(ctx.pool())
                .await?
        } else if id.is_pending() {
            None
        } else {
            let [topic_arn, endpoint, region] = id.fields_exact::<3>()?;
            sqlx::query_as::<_, SubscriptionRow>(&format!(
                "{SELECT_SUBSCRIPTION} WHERE t.arn = ? AND s.endpoint = ? AND s.region = ?"
            ))
            .bind(topic_arn)
            .bind(endpoint)
            .bind(region)
            .fetch_optional(ctx.pool())
            .await?
        };
        Ok(row.map(Subscription::from))
    }

    async fn read_all(&self, ctx: &Context) -> Result<Vec<Subscription>, StratusError> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "{SELECT_SUBSCRIPTION} ORDER BY s.id"
        ))
        .fetch_all(ctx.pool())
        .await?;
        Ok(rows.into_iter().map(Subscription::from).collect())
    }

    async fn update_one(
        &self,
        ctx: &Context,
        record: &Subscription,
    ) -> Result<Applied<Subscription>, StratusError> {
        let row_id = subscription_row(ctx.pool(), record)
            .await?
            .ok_or_else(|| missing_row(Subscription::KIND, &record.record_id()))?;
        let topic = resolve_ref(
            ctx.pool(),
            "topic",
            "topic",
            "arn",
            record.topic_arn.as_deref(),
            &record.region,
        )
        .await?;

        sqlx::query(
            r#"
            UPDATE subscription
            SET arn = ?, topic = ?, endpoint = ?, protocol = ?, region = ?
            WHERE id = ?
            "#,
        )
        .bind(&record.arn)
        .bind(topic)
        .bind(&record.endpoint)
        .bind(&record.protocol)
        .bind(&record.region)
        .bind(row_id)
        .execute(ctx.pool())
        .await?;

        Ok(Applied::Updated(Subscription {
            id: Some(row_id),
            ..record.clone()
        }))
    }

    async fn delete_one(
        &self,
        ctx: &Context,
        record: &Subscription,
    ) -> Result<Applied<Subscription>, StratusError> {
        if let Some(row_id) = subscription_row(ctx.pool(), record).await? {
            sqlx::query("DELETE FROM subscription WHERE id = ?")
                .bind(row_id)
                .execute(ctx.pool())
                .await?;
        }
        Ok(Applied::Deleted)
    }
}
