//! The per-kind mapper contract.
//!
//! Every resource kind has two CRUD surfaces over the same [`Record`] type: one that talks to the
//! provider and one that talks to the target database, bound together by a [`Mapper`].
//!
//! Single-record operations return a `Result`; the batch operations turn each result into a
//! [`RecordOutcome`] so one broken record never fails its siblings.

use async_trait::async_trait;
use serde::Serialize;
use stratus_memo_core::Side;
use tracing::warn;

use crate::context::Context;
use crate::error::StratusError;
use crate::record::{Record, RecordId};

/// What a single-record write did.
#[derive(Debug, Clone)]
pub enum Applied<R> {
    /// Written as requested; carries the realized record with target-assigned fields.
    Created(R),
    Updated(R),
    /// Deleted and recreated because an identity-defining field changed.
    Replaced(R),
    /// Nothing mutable changed on the provider; the db row was overwritten with the cloud record.
    Restored(R),
    /// The kind cannot perform the operation, so the mapper routed it to the opposite db write.
    Reverted,
    Deleted,
}

impl<R> Applied<R> {
    /// The realized record when the provider side changed and the db row needs refreshing.
    pub fn realized(&self) -> Option<&R> {
        match self {
            Applied::Created(r) | Applied::Updated(r) | Applied::Replaced(r) => Some(r),
            Applied::Restored(_) | Applied::Reverted | Applied::Deleted => None,
        }
    }
}

/// Result of one record inside a batch.
#[derive(Debug)]
pub enum RecordOutcome<R> {
    Done { id: RecordId, applied: Applied<R> },
    /// A reference could not be resolved yet; expected to converge in a later pass.
    Skipped { id: RecordId, reason: String },
    Failed { id: RecordId, error: StratusError },
}

impl<R> RecordOutcome<R> {
    pub fn from_result(id: RecordId, result: Result<Applied<R>, StratusError>) -> Self {
        match result {
            Ok(applied) => RecordOutcome::Done { id, applied },
            Err(StratusError::Unresolved(reason)) => RecordOutcome::Skipped { id, reason },
            Err(error) => RecordOutcome::Failed { id, error },
        }
    }

    pub fn id(&self) -> &RecordId {
        match self {
            RecordOutcome::Done { id, .. }
            | RecordOutcome::Skipped { id, .. }
            | RecordOutcome::Failed { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateOrReplace {
    Update,
    Replace,
}

/// CRUD against one side (provider or database) for one record kind.
#[async_trait]
pub trait Crud<R: Record>: Send + Sync {
    /// Which memo namespace reads on this side land in.
    const SIDE: Side;

    async fn create_one(&self, ctx: &Context, record: &R) -> Result<Applied<R>, StratusError>;

    /// Point lookup by record id; `None` when absent.
    async fn read(&self, ctx: &Context, id: &RecordId) -> Result<Option<R>, StratusError>;

    /// Full listing. Provider listings fan out across every enabled region.
    async fn read_all(&self, ctx: &Context) -> Result<Vec<R>, StratusError>;

    async fn update_one(&self, ctx: &Context, record: &R) -> Result<Applied<R>, StratusError>;

    /// Removes the record. Already gone is success.
    async fn delete_one(&self, ctx: &Context, record: &R) -> Result<Applied<R>, StratusError>;

    /// Read-through memo lookup.
    async fn read_cached(&self, ctx: &Context, id: &RecordId) -> Result<Option<R>, StratusError> {
        if let Some(hit) = ctx.recall::<R>(Self::SIDE, id) {
            return Ok(Some(hit));
        }
        let found = self.read(ctx, id).await?;
        if let Some(record) = &found {
            ctx.remember(Self::SIDE, record);
        }
        Ok(found)
    }

    async fn create(&self, ctx: &Context, records: &[R]) -> Vec<RecordOutcome<R>> {
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            let result = self.create_one(ctx, record).await;
            out.push(RecordOutcome::from_result(record.record_id(), result));
        }
        out
    }

    async fn update(&self, ctx: &Context, records: &[R]) -> Vec<RecordOutcome<R>> {
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            let result = self.update_one(ctx, record).await;
            out.push(RecordOutcome::from_result(record.record_id(), result));
        }
        out
    }

    async fn delete(&self, ctx: &Context, records: &[R]) -> Vec<RecordOutcome<R>> {
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            let result = self.delete_one(ctx, record).await;
            out.push(RecordOutcome::from_result(record.record_id(), result));
        }
        out
    }
}

/// Binds a record kind to its two CRUD surfaces and its comparison rules.
pub trait Mapper: Clone + Send + Sync + 'static {
    type Record: Record;
    type Cloud: Crud<Self::Record>;
    type Db: Crud<Self::Record>;

    fn cloud(&self) -> &Self::Cloud;
    fn db(&self) -> &Self::Db;

    /// Equality over provider-meaningful fields. Surrogate ids never take part.
    fn equals(&self, a: &Self::Record, b: &Self::Record) -> bool;

    /// `old` is the cloud record, `new` the desired one.
    fn update_or_replace(&self, old: &Self::Record, new: &Self::Record) -> UpdateOrReplace;
}

/// Overwrites the db row of `desired` with its cloud counterpart.
///
/// Used by kinds whose provider record has no mutable fields for the change at hand.
pub async fn restore_from_cloud<R, C, D>(
    ctx: &Context,
    cloud: &C,
    db: &D,
    desired: &R,
) -> Result<Applied<R>, StratusError>
where
    R: Record,
    C: Crud<R>,
    D: Crud<R>,
{
    let id = desired.record_id();
    let Some(mut current) = cloud.read_cached(ctx, &id).await? else {
        return Err(StratusError::unresolved(format!(
            "{} {id} is not present in the cloud",
            R::KIND
        )));
    };
    current.set_surrogate_id(desired.surrogate_id());
    db.update_one(ctx, &current).await?;
    warn!(kind = R::KIND, record_id = %id, "Provider record cannot change in place; db row restored");
    Ok(Applied::Restored(current))
}

/// Treats a provider not-found as a successful delete.
pub fn tolerate_gone(result: Result<(), StratusError>) -> Result<(), StratusError> {
    match result {
        Err(StratusError::Cloud(err)) if err.is_not_found() => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_cloud::CloudError;

    #[test]
    fn unresolved_references_become_skips() {
        let id = RecordId::generate(["subnet-1", "us-east-1"]);
        let outcome: RecordOutcome<()> = RecordOutcome::from_result(
            id.clone(),
            Err(StratusError::unresolved("vpc vpc-9 is unknown")),
        );
        assert!(matches!(outcome, RecordOutcome::Skipped { ref reason, .. } if reason == "vpc vpc-9 is unknown"));
        assert_eq!(outcome.id(), &id);

        let failed: RecordOutcome<()> =
            RecordOutcome::from_result(id, Err(StratusError::validation("bad cidr")));
        assert!(matches!(failed, RecordOutcome::Failed { .. }));
    }

    #[test]
    fn not_found_deletes_are_success() {
        let gone = Err(StratusError::Cloud(CloudError::not_found("vpc", "vpc-1")));
        assert!(tolerate_gone(gone).is_ok());
        let other = Err(StratusError::Cloud(CloudError::DependencyViolation("x".into())));
        assert!(tolerate_gone(other).is_err());
    }

    #[test]
    fn only_provider_writes_need_refresh() {
        assert_eq!(Applied::Created(1).realized(), Some(&1));
        assert_eq!(Applied::Replaced(2).realized(), Some(&2));
        assert_eq!(Applied::Restored(3).realized(), None);
        assert_eq!(Applied::<i32>::Reverted.realized(), None);
    }
}
