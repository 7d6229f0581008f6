//! Typed reconciliation steps for one mapper.

use futures::try_join;
use stratus_memo_core::Side;
use tracing::debug;

use super::{
    Direction,
    diff::{Diff, diff},
    report::{KindPlan, KindReport},
};
use crate::context::Context;
use crate::error::StratusError;
use crate::mapper::{Applied, Crud, Mapper, RecordOutcome, UpdateOrReplace};
use crate::record::Record;

/// Reads both sides in full, memoizes everything read and diffs in the pass direction.
pub(crate) async fn compute<M: Mapper>(
    mapper: &M,
    ctx: &Context,
    direction: Direction,
) -> Result<Diff<M::Record>, StratusError> {
    let (db_records, cloud_records) =
        try_join!(mapper.db().read_all(ctx), mapper.cloud().read_all(ctx))?;
    debug!(
        kind = M::Record::KIND,
        db = db_records.len(),
        cloud = cloud_records.len(),
        "Both sides read"
    );

    for record in &db_records {
        ctx.remember(Side::Db, record);
    }
    for record in &cloud_records {
        ctx.remember(Side::Cloud, record);
    }

    let equals = |a: &M::Record, b: &M::Record| mapper.equals(a, b);
    Ok(match direction {
        Direction::Apply => diff(db_records, cloud_records, equals),
        Direction::Sync => diff(cloud_records, db_records, equals),
    })
}

pub(crate) fn plan_of<R: Record>(diff: &Diff<R>) -> KindPlan {
    KindPlan {
        kind: R::KIND,
        create: diff.to_create.iter().map(Record::record_id).collect(),
        update: diff.to_update.iter().map(|(d, _)| d.record_id()).collect(),
        delete: diff.to_delete.iter().map(Record::record_id).collect(),
    }
}

/// Creates and updates, root to leaf. Returns the deletes, which run later leaf to root.
pub(crate) async fn upsert<M: Mapper>(
    mapper: &M,
    ctx: &Context,
    direction: Direction,
    report: &mut KindReport,
) -> Result<Vec<M::Record>, StratusError> {
    let Diff {
        to_create,
        to_update,
        to_delete,
    } = compute(mapper, ctx, direction).await?;

    match direction {
        Direction::Apply => {
            for record in to_create {
                let result = mapper.cloud().create_one(ctx, &record).await;
                settle_cloud_write(mapper, ctx, report, "create", &record, result).await;
            }
            for (desired, current) in to_update {
                let result = match mapper.update_or_replace(&current, &desired) {
                    UpdateOrReplace::Update => mapper.cloud().update_one(ctx, &desired).await,
                    UpdateOrReplace::Replace => replace(mapper, ctx, &current, &desired).await,
                };
                settle_cloud_write(mapper, ctx, report, "update", &desired, result).await;
            }
        }
        Direction::Sync => {
            for record in to_create {
                let result = mapper.db().create_one(ctx, &record).await;
                if let Some(Applied::Created(row)) =
                    report.absorb("create", RecordOutcome::from_result(record.record_id(), result))
                {
                    ctx.remember(Side::Db, &row);
                }
            }
            for (mut desired, current) in to_update {
                desired.set_surrogate_id(current.surrogate_id());
                let result = mapper.db().update_one(ctx, &desired).await;
                if report
                    .absorb("update", RecordOutcome::from_result(desired.record_id(), result))
                    .is_some()
                {
                    ctx.remember(Side::Db, &desired);
                }
            }
        }
    }

    Ok(to_delete)
}

/// Deletes on the following side of the pass.
pub(crate) async fn delete<M: Mapper>(
    mapper: &M,
    ctx: &Context,
    direction: Direction,
    report: &mut KindReport,
    records: Vec<M::Record>,
) {
    let outcomes = match direction {
        Direction::Apply => mapper.cloud().delete(ctx, &records).await,
        Direction::Sync => mapper.db().delete(ctx, &records).await,
    };
    let side = match direction {
        Direction::Apply => Side::Cloud,
        Direction::Sync => Side::Db,
    };
    for outcome in outcomes {
        let id = outcome.id().clone();
        if let Some(Applied::Deleted) = report.absorb("delete", outcome) {
            ctx.memo().forget(side, M::Record::KIND, id.as_str());
        }
    }
}

/// Identity-defining fields changed: delete the provider record, then create the desired one.
async fn replace<M: Mapper>(
    mapper: &M,
    ctx: &Context,
    current: &M::Record,
    desired: &M::Record,
) -> Result<Applied<M::Record>, StratusError> {
    mapper.cloud().delete_one(ctx, current).await?;
    ctx.forget::<M::Record>(Side::Cloud, &current.record_id());
    match mapper.cloud().create_one(ctx, desired).await? {
        Applied::Created(realized) => Ok(Applied::Replaced(realized)),
        other => Ok(other),
    }
}

/// Counts a provider write and copies provider-assigned fields back into the db row.
async fn settle_cloud_write<M: Mapper>(
    mapper: &M,
    ctx: &Context,
    report: &mut KindReport,
    verb: &str,
    original: &M::Record,
    result: Result<Applied<M::Record>, StratusError>,
) {
    let id = original.record_id();
    let Some(applied) = report.absorb(verb, RecordOutcome::from_result(id.clone(), result)) else {
        return;
    };
    let Some(realized) = applied.realized() else {
        return;
    };

    let mut row = realized.clone();
    row.set_surrogate_id(original.surrogate_id());
    ctx.remember(Side::Cloud, &row);
    if let Err(e) = mapper.db().update_one(ctx, &row).await {
        report.fail("refresh", &id, e);
        return;
    }
    ctx.remember(Side::Db, &row);
}
