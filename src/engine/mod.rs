//! Apply and sync passes.
//!
//! A pass walks the installed mappers in dependency order twice. The first walk (root to leaf)
//! reads both sides of each kind, diffs them and performs creates and updates; the deletes it
//! finds are held back. The second walk (leaf to root) performs those deletes, so a referenced
//! resource exists before anything that references it is created and outlives it on delete.
//!
//! Per-record failures are collected into the [`PassReport`]. A fatal provider error during a
//! read (bad credentials, region not enabled) stops the pass: later kinds and every held-back
//! delete are left alone, and the report still lists what earlier kinds already changed.

mod diff;
mod erased;
mod pass;
mod report;

pub use diff::{Diff, diff};
pub use erased::{DeferredDeletes, DynMapper, MapperEntry};
pub use report::{KindPlan, KindReport, PassPlan, PassReport};

use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tracing::{error, info};

use crate::context::Context;
use crate::error::StratusError;
use crate::utils::logging::with_pretty_json_debug;

/// Which side is authoritative for a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// The database is authoritative; the cloud follows.
    Apply,
    /// The cloud is authoritative; the database follows.
    Sync,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Apply => "apply",
            Direction::Sync => "sync",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs one pass over `mappers`, which must be in root-to-leaf order.
pub async fn run_pass(
    ctx: &Context,
    mappers: &[Arc<dyn DynMapper>],
    direction: Direction,
) -> Result<PassReport, StratusError> {
    info!(target = ctx.target(), %direction, kinds = mappers.len(), "Pass started");
    let mut report = PassReport::new(ctx.target(), direction);
    let mut deferred: Vec<Box<dyn DeferredDeletes>> = Vec::with_capacity(mappers.len());

    for mapper in mappers {
        let kind = mapper.kind();
        match mapper.upsert(ctx, direction, report.kind_mut(kind)).await {
            Ok(deletes) => deferred.push(deletes),
            Err(e) if e.is_fatal() => {
                error!(target = ctx.target(), kind, "Pass aborted: {e}");
                report.kind_mut(kind).fail_kind("read", e);
                report.aborted_at = Some(kind);
                break;
            }
            Err(e) => report.kind_mut(kind).fail_kind("read", e),
        }
    }

    if report.aborted_at.is_some() {
        deferred.clear();
    }
    for deletes in deferred.into_iter().rev() {
        if deletes.is_empty() {
            continue;
        }
        let kind = deletes.kind();
        deletes.run(ctx, report.kind_mut(kind)).await;
    }

    let report = report.finish();
    info!(
        target = ctx.target(),
        %direction,
        touched = report.touched(),
        failures = report.failures.failures(),
        "Pass finished"
    );
    Ok(report)
}

pub async fn apply(ctx: &Context, mappers: &[Arc<dyn DynMapper>]) -> Result<PassReport, StratusError> {
    run_pass(ctx, mappers, Direction::Apply).await
}

pub async fn sync(ctx: &Context, mappers: &[Arc<dyn DynMapper>]) -> Result<PassReport, StratusError> {
    run_pass(ctx, mappers, Direction::Sync).await
}

/// Diffs every kind without writing anything.
pub async fn plan(
    ctx: &Context,
    mappers: &[Arc<dyn DynMapper>],
    direction: Direction,
) -> Result<PassPlan, StratusError> {
    let mut kinds = Vec::with_capacity(mappers.len());
    for mapper in mappers {
        kinds.push(mapper.plan(ctx, direction).await?);
    }
    let plan = PassPlan {
        target: ctx.target().to_string(),
        direction,
        kinds,
    };
    with_pretty_json_debug(&plan, |json| {
        tracing::debug!(target = ctx.target(), "Planned pass:\n{json}");
    });
    Ok(plan)
}
