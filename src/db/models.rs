use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Catalog row: durable install state of one module.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, FromRow)]
pub struct DbModule {
    pub name: String,
    pub installed: bool,
    pub enabled: bool,
}

#[derive(Clone, PartialEq, Eq, FromRow)]
pub struct DbAccount {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for DbAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbAccount")
            .field("access_key_id", &self.access_key_id)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, FromRow)]
pub struct DbRegion {
    pub region: String,
    pub enabled: bool,
    pub is_default: bool,
}
