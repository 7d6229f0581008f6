#![allow(dead_code)]

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::sync::Arc;
use stratus::context::EngineSettings;
use stratus::db::TargetStore;
use stratus::registry::ModuleRegistry;
use stratus::service::{self, EngineArgs, EngineHandle};
use stratus_cloud::{Credentials, RegionClient, SimulatedCloud};
use tempfile::TempDir;

pub const TARGET: &str = "acme";
pub const REGION: &str = "us-east-1";

pub fn credentials() -> Credentials {
    Credentials::new("AKIDEXAMPLE", "wJalrXUtnFEMI")
}

/// An engine over a simulated account, with one connected target.
pub struct Harness {
    pub dir: TempDir,
    pub cloud: SimulatedCloud,
    pub engine: EngineHandle,
}

impl Harness {
    pub async fn new(cloud: SimulatedCloud) -> Self {
        Self::with_regions(cloud, &[REGION]).await
    }

    pub async fn with_regions(cloud: SimulatedCloud, regions: &[&str]) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let engine = service::spawn(EngineArgs {
            registry: ModuleRegistry::builtin().expect("builtin registry is valid"),
            data_dir: dir.path().to_path_buf(),
            connector: Arc::new(cloud.clone()),
            settings: EngineSettings::fast(),
            default_regions: vec![REGION.to_string()],
        })
        .await
        .expect("failed to spawn engine");

        engine
            .connect(
                TARGET,
                credentials(),
                regions.iter().map(|r| (*r).to_string()).collect(),
            )
            .await
            .expect("failed to connect target");

        Self { dir, cloud, engine }
    }

    pub async fn with_modules(cloud: SimulatedCloud, modules: &[&str]) -> Self {
        Self::install(Self::new(cloud).await, modules).await
    }

    pub async fn install(harness: Self, modules: &[&str]) -> Self {
        let outcome = harness
            .engine
            .install(
                TARGET,
                modules.iter().map(|m| (*m).to_string()).collect(),
                true,
            )
            .await
            .expect("install failed");
        assert!(
            outcome.sync_error.is_none(),
            "initial sync failed: {:?}",
            outcome.sync_error
        );
        harness
    }

    /// A second pool on the target file, standing in for an ordinary database client.
    pub async fn db(&self) -> SqlitePool {
        let path = TargetStore::new(self.dir.path()).db_path(TARGET);
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(path)
                    .foreign_keys(true),
            )
            .await
            .expect("failed to open target database")
    }

    pub fn client(&self) -> RegionClient {
        self.client_in(REGION)
    }

    pub fn client_in(&self, region: &str) -> RegionClient {
        self.cloud.region_client(region)
    }
}

pub fn quiet_cloud() -> SimulatedCloud {
    SimulatedCloud::builder().settle_polls(0).build()
}
