//! Database plumbing shared by the built-in mappers.

use sqlx::SqlitePool;

use crate::error::StratusError;
use crate::record::RecordId;

/// How a db read locates one row.
pub(crate) enum RowKey {
    Surrogate(i64),
    Natural(Vec<String>),
}

impl RowKey {
    pub(crate) fn of(id: &RecordId) -> Option<Self> {
        if id.is_pending() {
            id.pending_surrogate().map(RowKey::Surrogate)
        } else {
            Some(RowKey::Natural(id.fields()))
        }
    }
}

/// Surrogate id of the row in `table` whose `column` is `natural` within `region`.
pub(crate) async fn lookup_row(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    natural: &str,
    region: &str,
) -> Result<Option<i64>, StratusError> {
    let id: Option<i64> = sqlx::query_scalar(&format!(
        "SELECT id FROM {table} WHERE {column} = ? AND region = ?"
    ))
    .bind(natural)
    .bind(region)
    .fetch_optional(pool)
    .await?;

    Ok(id)
}

/// Surrogate id for a reference to another kind; unresolvable references are reported as such.
pub(crate) async fn resolve_ref(
    pool: &SqlitePool,
    kind: &str,
    table: &str,
    column: &str,
    natural: Option<&str>,
    region: &str,
) -> Result<i64, StratusError> {
    let Some(natural) = natural else {
        return Err(StratusError::unresolved(format!(
            "referenced {kind} has no provider id yet"
        )));
    };
    lookup_row(pool, table, column, natural, region)
        .await?
        .ok_or_else(|| {
            StratusError::unresolved(format!("{kind} {natural} in {region} is not in the database"))
        })
}

/// Row a db write should touch: the surrogate when known, otherwise the natural key.
pub(crate) async fn target_row(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    surrogate: Option<i64>,
    natural: Option<&str>,
    region: &str,
) -> Result<Option<i64>, StratusError> {
    if let Some(id) = surrogate {
        return Ok(Some(id));
    }
    match natural {
        Some(natural) => lookup_row(pool, table, column, natural, region).await,
        None => Ok(None),
    }
}

/// Provider not-found as an absent record.
pub(crate) fn found<T>(result: Result<T, StratusError>) -> Result<Option<T>, StratusError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(StratusError::Cloud(err)) if err.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

pub(crate) fn missing_row(kind: &str, id: &RecordId) -> StratusError {
    StratusError::validation(format!("{kind} {id} has no database row"))
}
