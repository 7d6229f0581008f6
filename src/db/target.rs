use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};
use stratus_cloud::Credentials;
use tracing::{debug, info};

use crate::db::{
    catalog,
    schema::{CORE_SCHEMA, apply_statements},
};
use crate::error::StratusError;

/// Owns one SQLite pool per connected target, each backed by `<data_dir>/<target>.db`.
pub struct TargetStore {
    data_dir: PathBuf,
    pools: HashMap<String, SqlitePool>,
}

impl TargetStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            pools: HashMap::new(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Target names double as file names, so only `[A-Za-z0-9_-]` is accepted.
    pub fn validate_name(target: &str) -> Result<(), StratusError> {
        if target.trim().is_empty() {
            return Err(StratusError::validation("target name is required"));
        }
        if !target
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(StratusError::validation(format!(
                "target name '{target}' may only contain letters, digits, '_' and '-'"
            )));
        }
        Ok(())
    }

    pub fn db_path(&self, target: &str) -> PathBuf {
        self.data_dir.join(format!("{target}.db"))
    }

    pub fn exists(&self, target: &str) -> bool {
        self.pools.contains_key(target) || self.db_path(target).is_file()
    }

    /// Creates (or reopens) the target, applies the core schema and stores account and regions.
    pub async fn connect(
        &mut self,
        target: &str,
        credentials: &Credentials,
        regions: &[String],
    ) -> Result<SqlitePool, StratusError> {
        Self::validate_name(target)?;
        if credentials.is_blank() {
            return Err(StratusError::validation("missing provider credentials"));
        }
        if regions.is_empty() {
            return Err(StratusError::validation("at least one region is required"));
        }

        tokio::fs::create_dir_all(&self.data_dir).await?;
        let pool = match self.pools.get(target) {
            Some(pool) => pool.clone(),
            None => open_pool(&self.db_path(target), true).await?,
        };

        let mut tx = pool.begin().await?;
        apply_statements(&mut *tx, CORE_SCHEMA).await?;
        catalog::upsert_account(&mut *tx, credentials).await?;
        catalog::replace_regions(&mut *tx, regions).await?;
        tx.commit().await?;

        self.pools.insert(target.to_string(), pool.clone());
        info!(target, regions = ?regions, "Target connected");
        Ok(pool)
    }

    /// Pool for an existing target; never creates one.
    pub async fn pool(&mut self, target: &str) -> Result<SqlitePool, StratusError> {
        Self::validate_name(target)?;
        if let Some(pool) = self.pools.get(target) {
            return Ok(pool.clone());
        }
        let path = self.db_path(target);
        if !path.is_file() {
            return Err(StratusError::UnknownTarget(target.to_string()));
        }
        let pool = open_pool(&path, false).await?;
        self.pools.insert(target.to_string(), pool.clone());
        debug!(target, "Target pool reopened");
        Ok(pool)
    }

    /// Closes the pool and removes the database file with its WAL companions.
    pub async fn disconnect(&mut self, target: &str) -> Result<(), StratusError> {
        Self::validate_name(target)?;
        if !self.exists(target) {
            return Err(StratusError::UnknownTarget(target.to_string()));
        }
        if let Some(pool) = self.pools.remove(target) {
            pool.close().await;
        }

        let path = self.db_path(target);
        for suffix in ["", "-wal", "-shm"] {
            let mut file = path.clone().into_os_string();
            file.push(suffix);
            match tokio::fs::remove_file(&file).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!(target, "Target disconnected");
        Ok(())
    }

    pub async fn close_all(&mut self) {
        for (_, pool) in self.pools.drain() {
            pool.close().await;
        }
    }
}

async fn open_pool(path: &Path, create: bool) -> Result<SqlitePool, StratusError> {
    let connect_opts = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5))
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(connect_opts)
        .await?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_names_are_validated() {
        assert!(TargetStore::validate_name("prod-eu_1").is_ok());
        assert!(matches!(
            TargetStore::validate_name(""),
            Err(StratusError::Validation(_))
        ));
        assert!(TargetStore::validate_name("../etc").is_err());
        assert!(TargetStore::validate_name("a b").is_err());
    }
}
