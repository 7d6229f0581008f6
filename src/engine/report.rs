use serde::Serialize;
use tracing::{info, warn};

use super::Direction;
use crate::error::{FailureSummary, StratusError};
use crate::mapper::{Applied, RecordOutcome};
use crate::record::{Record, RecordId};

/// Counters for one record kind within a pass.
#[derive(Debug, Default, Serialize)]
pub struct KindReport {
    pub kind: &'static str,
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub restored: usize,
    pub deleted: usize,
    pub reverted: usize,
    pub skipped: usize,
    pub failed: usize,
    #[serde(skip)]
    failures: FailureSummary,
}

impl KindReport {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn touched(&self) -> usize {
        self.created + self.updated + self.replaced + self.restored + self.deleted + self.reverted
    }

    /// Counts one outcome and hands back what was applied, if anything.
    pub fn absorb<R: Record>(&mut self, verb: &str, outcome: RecordOutcome<R>) -> Option<Applied<R>> {
        match outcome {
            RecordOutcome::Done { applied, .. } => {
                match &applied {
                    Applied::Created(_) => self.created += 1,
                    Applied::Updated(_) => self.updated += 1,
                    Applied::Replaced(_) => self.replaced += 1,
                    Applied::Restored(_) => self.restored += 1,
                    Applied::Reverted => self.reverted += 1,
                    Applied::Deleted => self.deleted += 1,
                }
                Some(applied)
            }
            RecordOutcome::Skipped { id, reason } => {
                self.skipped += 1;
                info!(kind = self.kind, record_id = %id, "Skipped {verb}: {reason}");
                None
            }
            RecordOutcome::Failed { id, error } => {
                self.fail(verb, &id, error);
                None
            }
        }
    }

    pub fn fail(&mut self, verb: &str, id: &RecordId, error: StratusError) {
        self.failed += 1;
        warn!(kind = self.kind, record_id = %id, "Failed to {verb}: {error}");
        self.failures
            .push(&format!("{verb} {} {id}", self.kind), error);
    }

    /// A whole-kind failure, such as a listing that could not be read.
    pub fn fail_kind(&mut self, verb: &str, error: StratusError) {
        self.failed += 1;
        warn!(kind = self.kind, "Failed to {verb}: {error}");
        self.failures.push(&format!("{verb} {}", self.kind), error);
    }

    pub fn log_summary(&self, direction: Direction) {
        info!(
            kind = self.kind,
            direction = direction.as_str(),
            created = self.created,
            updated = self.updated,
            replaced = self.replaced,
            restored = self.restored,
            deleted = self.deleted,
            reverted = self.reverted,
            skipped = self.skipped,
            failed = self.failed,
            "Kind reconciled"
        );
    }
}

/// Outcome of a whole apply or sync pass.
#[derive(Debug, Serialize)]
pub struct PassReport {
    pub target: String,
    pub direction: Direction,
    pub kinds: Vec<KindReport>,
    pub failures: FailureSummary,
    /// Kind whose read failed fatally; later kinds and all deletes were not attempted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted_at: Option<&'static str>,
}

impl PassReport {
    pub fn new(target: &str, direction: Direction) -> Self {
        Self {
            target: target.to_string(),
            direction,
            kinds: Vec::new(),
            failures: FailureSummary::default(),
            aborted_at: None,
        }
    }

    /// Kind counters are accumulated across both phases of a pass.
    pub fn kind_mut(&mut self, kind: &'static str) -> &mut KindReport {
        let idx = match self.kinds.iter().position(|k| k.kind == kind) {
            Some(idx) => idx,
            None => {
                self.kinds.push(KindReport::new(kind));
                self.kinds.len() - 1
            }
        };
        &mut self.kinds[idx]
    }

    pub fn kind(&self, kind: &str) -> Option<&KindReport> {
        self.kinds.iter().find(|k| k.kind == kind)
    }

    /// Folds every kind's failures into the pass summary and logs the per-kind lines.
    pub fn finish(mut self) -> Self {
        for kind in &mut self.kinds {
            kind.log_summary(self.direction);
            self.failures.merge(std::mem::take(&mut kind.failures));
        }
        self
    }

    pub fn touched(&self) -> usize {
        self.kinds.iter().map(KindReport::touched).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_result(self) -> Result<Self, StratusError> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(StratusError::Reconcile(self.failures))
        }
    }
}

/// Desired work for one kind, without performing it.
#[derive(Debug, Clone, Serialize)]
pub struct KindPlan {
    pub kind: &'static str,
    pub create: Vec<RecordId>,
    pub update: Vec<RecordId>,
    pub delete: Vec<RecordId>,
}

impl KindPlan {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

#[derive(Debug, Serialize)]
pub struct PassPlan {
    pub target: String,
    pub direction: Direction,
    pub kinds: Vec<KindPlan>,
}

impl PassPlan {
    pub fn is_empty(&self) -> bool {
        self.kinds.iter().all(KindPlan::is_empty)
    }

    pub fn kind(&self, kind: &str) -> Option<&KindPlan> {
        self.kinds.iter().find(|k| k.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_surface_through_into_result() {
        let mut report = PassReport::new("t", Direction::Apply);
        let id = RecordId::generate(["vpc-1", "us-east-1"]);
        report.kind_mut("vpc").created += 1;
        report
            .kind_mut("topic")
            .fail("create", &id, StratusError::validation("bad name"));
        report.kind_mut("topic").skipped += 1;

        let report = report.finish();
        assert_eq!(report.kinds.len(), 2);
        assert_eq!(report.kind("topic").map(|k| k.failed), Some(1));
        assert_eq!(report.touched(), 1);

        match report.into_result() {
            Err(StratusError::Reconcile(summary)) => {
                assert_eq!(summary.failures(), 1);
                assert_eq!(
                    summary.to_string(),
                    "create topic vpc-1|us-east-1: Validation error: bad name"
                );
            }
            other => panic!("expected reconcile failure, got {other:?}"),
        }
    }

    #[test]
    fn clean_report_is_ok() {
        let report = PassReport::new("t", Direction::Sync).finish();
        assert!(report.is_clean());
        assert!(report.into_result().is_ok());
    }
}
