//! Pass-scoped execution state.
//!
//! A [`Context`] is built at the start of one reconciliation pass and dropped at its end. It owns
//! the lazily created region clients (each behind its own rate limiter), the memo of records
//! already read during the pass, and the retry and waiter policies. Nothing in here is shared
//! between passes.

mod settings;
mod waiter;

pub use settings::{EngineSettings, RetryPolicy, WaiterPolicy};
pub use waiter::Probe;

use backon::Retryable;
use futures::future::try_join_all;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use sqlx::SqlitePool;
use std::{collections::HashMap, future::Future, num::NonZeroU32, sync::Arc, time::Duration};
use stratus_cloud::{CloudConnector, CloudError, Credentials, Page, RegionClient};
use stratus_memo_core::{MemoStore, Side};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::db::catalog;
use crate::error::{IsRetryable, StratusError};
use crate::record::{Record, RecordId};

#[derive(Clone)]
struct RegionHandle {
    client: RegionClient,
    limiter: Arc<DefaultDirectRateLimiter>,
}

pub struct Context {
    target: String,
    pool: SqlitePool,
    connector: Arc<dyn CloudConnector>,
    credentials: Credentials,
    regions: Vec<String>,
    clients: Mutex<HashMap<String, RegionHandle>>,
    memo: MemoStore,
    settings: EngineSettings,
}

impl Context {
    /// Loads the target's account and enabled regions. Missing credentials are a validation error.
    pub async fn open(
        target: &str,
        pool: SqlitePool,
        connector: Arc<dyn CloudConnector>,
        settings: EngineSettings,
    ) -> Result<Self, StratusError> {
        let credentials = catalog::load_account(&pool)
            .await?
            .filter(|c| !c.is_blank())
            .ok_or_else(|| {
                StratusError::validation(format!("target '{target}' has no provider credentials"))
            })?;
        let regions = catalog::enabled_regions(&pool).await?;
        if regions.is_empty() {
            return Err(StratusError::validation(format!(
                "target '{target}' has no enabled regions"
            )));
        }

        Ok(Self {
            target: target.to_string(),
            pool,
            connector,
            credentials,
            regions,
            clients: Mutex::new(HashMap::new()),
            memo: MemoStore::new(settings.memo_max_capacity),
            settings,
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn enabled_regions(&self) -> &[String] {
        &self.regions
    }

    pub fn is_region_enabled(&self, region: &str) -> bool {
        self.regions.iter().any(|r| r == region)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Client for one region, created on first use and reused for the rest of the pass.
    pub async fn client(&self, region: &str) -> Result<RegionClient, StratusError> {
        Ok(self.region_handle(region).await?.client)
    }

    async fn region_handle(&self, region: &str) -> Result<RegionHandle, StratusError> {
        if !self.is_region_enabled(region) {
            return Err(CloudError::RegionNotEnabled(region.to_string()).into());
        }

        let mut clients = self.clients.lock().await;
        if let Some(handle) = clients.get(region) {
            return Ok(handle.clone());
        }

        let client = self.connector.connect(region, &self.credentials).await?;
        let rps = NonZeroU32::new(self.settings.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let handle = RegionHandle {
            client,
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(rps))),
        };
        clients.insert(region.to_string(), handle.clone());
        debug!(target = %self.target, region, "Region client created");
        Ok(handle)
    }

    /// One provider call: rate limited per region, retried with backoff while the error is transient.
    pub async fn cloud_call<T, F, Fut>(
        &self,
        region: &str,
        operation: &'static str,
        call: F,
    ) -> Result<T, StratusError>
    where
        F: Fn(RegionClient) -> Fut,
        Fut: Future<Output = Result<T, CloudError>>,
    {
        let handle = self.region_handle(region).await?;
        let attempt = || {
            let limiter = handle.limiter.clone();
            let fut = call(handle.client.clone());
            async move {
                limiter.until_ready().await;
                fut.await
            }
        };

        attempt
            .retry(self.settings.retry.backoff())
            .when(|e: &CloudError| e.is_retryable())
            .notify(|err, dur: Duration| {
                warn!(region, operation, "Provider call retrying after {} in {:?}", err, dur);
            })
            .await
            .map_err(StratusError::from)
    }

    /// Drains a paginated listing in one region.
    pub async fn cloud_pages<T, F, Fut>(
        &self,
        region: &str,
        operation: &'static str,
        call: F,
    ) -> Result<Vec<T>, StratusError>
    where
        F: Fn(RegionClient, Option<String>) -> Fut,
        Fut: Future<Output = Result<Page<T>, CloudError>>,
    {
        let mut items = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .cloud_call(region, operation, |client| call(client, token.clone()))
                .await?;
            items.extend(page.items);
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(items)
    }

    /// Runs `f` once per enabled region concurrently and concatenates the results.
    ///
    /// The first error aborts the fan-out.
    pub async fn for_each_region<T, F, Fut>(&self, f: F) -> Result<Vec<T>, StratusError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<Vec<T>, StratusError>>,
    {
        let per_region = try_join_all(self.regions.iter().cloned().map(&f)).await?;
        Ok(per_region.into_iter().flatten().collect())
    }

    pub fn memo(&self) -> &MemoStore {
        &self.memo
    }

    pub fn remember<R: Record>(&self, side: Side, record: &R) {
        self.memo
            .put(side, R::KIND, record.record_id().as_str(), record.clone());
    }

    pub fn recall<R: Record>(&self, side: Side, id: &RecordId) -> Option<R> {
        self.memo.get(side, R::KIND, id.as_str())
    }

    pub fn forget<R: Record>(&self, side: Side, id: &RecordId) {
        self.memo.forget(side, R::KIND, id.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TargetStore;
    use stratus_cloud::{DescribeRequest, Fault, SimulatedCloud};

    async fn context_for(cloud: &SimulatedCloud, regions: &[&str]) -> (tempfile::TempDir, Context) {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TargetStore::new(dir.path());
        let regions: Vec<String> = regions.iter().map(|r| (*r).to_string()).collect();
        let pool = store
            .connect("ctx", &Credentials::new("AKID", "secret"), &regions)
            .await
            .unwrap();
        let ctx = Context::open("ctx", pool, Arc::new(cloud.clone()), EngineSettings::fast())
            .await
            .unwrap();
        (dir, ctx)
    }

    #[tokio::test]
    async fn region_clients_are_created_once() {
        let cloud = SimulatedCloud::default();
        let (_dir, ctx) = context_for(&cloud, &["us-east-1"]).await;

        ctx.client("us-east-1").await.unwrap();
        ctx.client("us-east-1").await.unwrap();
        assert_eq!(cloud.call_count("Connect"), 1);

        let err = ctx.client("eu-west-1").await.unwrap_err();
        assert!(matches!(
            err,
            StratusError::Cloud(CloudError::RegionNotEnabled(_))
        ));
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let cloud = SimulatedCloud::default();
        cloud.inject(Fault::times(
            "DescribeVpcs",
            2,
            CloudError::Throttled("slow down".into()),
        ));
        let (_dir, ctx) = context_for(&cloud, &["us-east-1"]).await;

        let vpcs = ctx
            .cloud_pages("us-east-1", "DescribeVpcs", |c, token| async move {
                c.ec2.describe_vpcs(DescribeRequest::all().page(token)).await
            })
            .await
            .unwrap();
        assert_eq!(vpcs.len(), 1);
        assert_eq!(cloud.call_count("DescribeVpcs"), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let cloud = SimulatedCloud::default();
        cloud.inject(Fault::always(
            "DescribeVpcs",
            CloudError::Internal("boom".into()),
        ));
        let (_dir, ctx) = context_for(&cloud, &["us-east-1"]).await;

        let result = ctx
            .cloud_call("us-east-1", "DescribeVpcs", |c| async move {
                c.ec2.describe_vpcs(DescribeRequest::all()).await
            })
            .await;
        assert!(result.is_err());
        assert_eq!(cloud.call_count("DescribeVpcs"), 1);
    }

    #[tokio::test]
    async fn fan_out_covers_every_enabled_region() {
        let cloud = SimulatedCloud::default();
        let (_dir, ctx) = context_for(&cloud, &["us-east-1", "us-west-2"]).await;

        let regions = ctx
            .for_each_region(|region| async move { Ok(vec![region]) })
            .await
            .unwrap();
        assert_eq!(regions, vec!["us-east-1", "us-west-2"]);
    }
}
