//! SQL DDL for the tables every target carries regardless of installed modules.

use sqlx::SqliteConnection;

/// Core schema:
/// - `stratus_module`: install catalog, one row per installed module
/// - `stratus_account`: provider credentials, single row
/// - `stratus_region`: regions known for the account and whether reconciliation covers them
pub const CORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS stratus_module (
    name TEXT PRIMARY KEY NOT NULL,
    installed INTEGER NOT NULL DEFAULT 1,
    enabled INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS stratus_account (
    id INTEGER PRIMARY KEY NOT NULL CHECK (id = 1),
    access_key_id TEXT NOT NULL,
    secret_access_key TEXT NOT NULL,
    created_at TEXT NOT NULL, -- RFC3339
    updated_at TEXT NOT NULL -- RFC3339
);

CREATE TABLE IF NOT EXISTS stratus_region (
    region TEXT PRIMARY KEY NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    is_default INTEGER NOT NULL DEFAULT 0
);
"#;

/// Runs each `;`-separated statement of `sql` in order.
pub async fn apply_statements(conn: &mut SqliteConnection, sql: &str) -> Result<(), sqlx::Error> {
    for stmt in sql.split(';') {
        let s = stmt.trim();
        if s.is_empty() {
            continue;
        }
        sqlx::query(s).execute(&mut *conn).await?;
    }
    Ok(())
}
