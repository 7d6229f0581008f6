use chrono::Utc;
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool};
use stratus_cloud::Credentials;

use crate::db::models::{DbAccount, DbModule, DbRegion};
use crate::error::StratusError;

pub async fn installed_modules<'e, E>(executor: E) -> Result<Vec<DbModule>, StratusError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query_as::<_, DbModule>(
        r#"
        SELECT name, installed, enabled
        FROM stratus_module
        WHERE installed = 1
        ORDER BY name
        "#,
    )
    .fetch_all(executor)
    .await?;

    Ok(rows)
}

pub async fn insert_module(conn: &mut SqliteConnection, name: &str) -> Result<(), StratusError> {
    sqlx::query(
        r#"
        INSERT INTO stratus_module (name, installed, enabled)
        VALUES (?, 1, 1)
        ON CONFLICT(name) DO UPDATE SET
            installed = 1,
            enabled = 1
        "#,
    )
    .bind(name)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn delete_module(conn: &mut SqliteConnection, name: &str) -> Result<(), StratusError> {
    sqlx::query("DELETE FROM stratus_module WHERE name = ?")
        .bind(name)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Names of user tables currently present in the target.
pub async fn list_tables<'e, E>(executor: E) -> Result<Vec<String>, StratusError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT name
        FROM sqlite_master
        WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
        ORDER BY name
        "#,
    )
    .fetch_all(executor)
    .await?;

    Ok(rows)
}

pub async fn count_rows(pool: &SqlitePool, table: &str) -> Result<i64, StratusError> {
    let tables = list_tables(pool).await?;
    if !tables.iter().any(|t| t == table) {
        return Err(StratusError::validation(format!("unknown table '{table}'")));
    }
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM \"{table}\""))
        .fetch_one(pool)
        .await?;

    Ok(count)
}

pub async fn upsert_account(
    conn: &mut SqliteConnection,
    credentials: &Credentials,
) -> Result<(), StratusError> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO stratus_account (id, access_key_id, secret_access_key, created_at, updated_at)
        VALUES (1, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            access_key_id = excluded.access_key_id,
            secret_access_key = excluded.secret_access_key,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&credentials.access_key_id)
    .bind(&credentials.secret_access_key)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn load_account(pool: &SqlitePool) -> Result<Option<Credentials>, StratusError> {
    let row = sqlx::query_as::<_, DbAccount>(
        r#"
        SELECT access_key_id, secret_access_key, created_at, updated_at
        FROM stratus_account
        WHERE id = 1
        "#,
    )
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|a| Credentials::new(a.access_key_id, a.secret_access_key)))
}

/// Replaces the region list; the first region becomes the default.
pub async fn replace_regions(
    conn: &mut SqliteConnection,
    regions: &[String],
) -> Result<(), StratusError> {
    sqlx::query("DELETE FROM stratus_region")
        .execute(&mut *conn)
        .await?;

    for (idx, region) in regions.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO stratus_region (region, enabled, is_default)
            VALUES (?, 1, ?)
            "#,
        )
        .bind(region)
        .bind(idx == 0)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

pub async fn list_regions(pool: &SqlitePool) -> Result<Vec<DbRegion>, StratusError> {
    let rows = sqlx::query_as::<_, DbRegion>(
        r#"
        SELECT region, enabled, is_default
        FROM stratus_region
        ORDER BY is_default DESC, region
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

pub async fn enabled_regions(pool: &SqlitePool) -> Result<Vec<String>, StratusError> {
    Ok(list_regions(pool)
        .await?
        .into_iter()
        .filter(|r| r.enabled)
        .map(|r| r.region)
        .collect())
}
