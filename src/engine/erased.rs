use async_trait::async_trait;

use super::{
    Direction, pass,
    report::{KindPlan, KindReport},
};
use crate::context::Context;
use crate::error::StratusError;
use crate::mapper::Mapper;
use crate::record::Record;

/// A mapper with its record type erased, so modules can list mixed kinds.
#[async_trait]
pub trait DynMapper: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn plan(&self, ctx: &Context, direction: Direction) -> Result<KindPlan, StratusError>;

    /// Creates and updates for this kind; the returned deletes run in the second phase.
    async fn upsert(
        &self,
        ctx: &Context,
        direction: Direction,
        report: &mut KindReport,
    ) -> Result<Box<dyn DeferredDeletes>, StratusError>;
}

/// Deletes computed by the first phase of a pass, held until dependents are gone.
#[async_trait]
pub trait DeferredDeletes: Send {
    fn kind(&self) -> &'static str;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn run(self: Box<Self>, ctx: &Context, report: &mut KindReport);
}

pub struct MapperEntry<M>(pub M);

#[async_trait]
impl<M: Mapper> DynMapper for MapperEntry<M> {
    fn kind(&self) -> &'static str {
        M::Record::KIND
    }

    async fn plan(&self, ctx: &Context, direction: Direction) -> Result<KindPlan, StratusError> {
        let diff = pass::compute(&self.0, ctx, direction).await?;
        Ok(pass::plan_of(&diff))
    }

    async fn upsert(
        &self,
        ctx: &Context,
        direction: Direction,
        report: &mut KindReport,
    ) -> Result<Box<dyn DeferredDeletes>, StratusError> {
        let records = pass::upsert(&self.0, ctx, direction, report).await?;
        Ok(Box::new(Pending {
            mapper: self.0.clone(),
            direction,
            records,
        }))
    }
}

struct Pending<M: Mapper> {
    mapper: M,
    direction: Direction,
    records: Vec<M::Record>,
}

#[async_trait]
impl<M: Mapper> DeferredDeletes for Pending<M> {
    fn kind(&self) -> &'static str {
        M::Record::KIND
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    async fn run(self: Box<Self>, ctx: &Context, report: &mut KindReport) {
        let Pending {
            mapper,
            direction,
            records,
        } = *self;
        if records.is_empty() {
            return;
        }
        pass::delete(&mapper, ctx, direction, report, records).await;
    }
}
