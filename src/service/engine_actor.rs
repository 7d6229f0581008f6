use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use serde::Serialize;
use std::{path::PathBuf, sync::Arc};
use stratus_cloud::{CloudConnector, Credentials};
use tracing::{debug, info, warn};

use crate::context::{Context, EngineSettings};
use crate::db::{TargetStore, catalog};
use crate::engine::{self, Direction, PassPlan, PassReport};
use crate::error::StratusError;
use crate::registry::{ModuleManager, ModuleRegistry};

type Reply<T> = RpcReplyPort<Result<T, StratusError>>;

/// Messages handled by the engine actor. Each carries its own reply port.
pub enum EngineMessage {
    ListModules(Option<String>, Reply<ModuleListing>),
    Install(String, Vec<String>, bool, Reply<InstallOutcome>),
    Remove(String, Vec<String>, Reply<RemoveOutcome>),
    Connect(String, Credentials, Vec<String>, Reply<TargetInfo>),
    Disconnect(String, Reply<()>),
    Reconcile(String, Direction, Reply<PassReport>),
    Plan(String, Direction, Reply<PassPlan>),
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleListing {
    pub available: Vec<&'static str>,
    /// Present when the listing was scoped to a target.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct InstallOutcome {
    pub target: String,
    pub installed: Vec<&'static str>,
    /// Pass that pulled existing cloud resources of the new modules into the database.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<PassReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveOutcome {
    pub target: String,
    pub removed: Vec<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetInfo {
    pub target: String,
    pub regions: Vec<String>,
}

/// Cloneable front door to the engine actor.
#[derive(Clone)]
pub struct EngineHandle {
    actor: ActorRef<EngineMessage>,
}

fn rpc_failed(operation: &str, e: impl std::fmt::Display) -> StratusError {
    StratusError::RactorError(format!("{operation} RPC failed: {e}"))
}

impl EngineHandle {
    /// Every registered module, plus the installed subset when `target` is given.
    pub async fn list(&self, target: Option<String>) -> Result<ModuleListing, StratusError> {
        ractor::call!(self.actor, EngineMessage::ListModules, target)
            .map_err(|e| rpc_failed("ListModules", e))?
    }

    /// Installs modules; with `sync` the new modules' resources are then pulled from the cloud.
    pub async fn install(
        &self,
        target: impl Into<String>,
        modules: Vec<String>,
        sync: bool,
    ) -> Result<InstallOutcome, StratusError> {
        ractor::call!(self.actor, EngineMessage::Install, target.into(), modules, sync)
            .map_err(|e| rpc_failed("Install", e))?
    }

    pub async fn remove(
        &self,
        target: impl Into<String>,
        modules: Vec<String>,
    ) -> Result<RemoveOutcome, StratusError> {
        ractor::call!(self.actor, EngineMessage::Remove, target.into(), modules)
            .map_err(|e| rpc_failed("Remove", e))?
    }

    /// Creates the target if needed and stores its account. Empty `regions` uses the defaults.
    pub async fn connect(
        &self,
        target: impl Into<String>,
        credentials: Credentials,
        regions: Vec<String>,
    ) -> Result<TargetInfo, StratusError> {
        ractor::call!(
            self.actor,
            EngineMessage::Connect,
            target.into(),
            credentials,
            regions
        )
        .map_err(|e| rpc_failed("Connect", e))?
    }

    pub async fn disconnect(&self, target: impl Into<String>) -> Result<(), StratusError> {
        ractor::call!(self.actor, EngineMessage::Disconnect, target.into())
            .map_err(|e| rpc_failed("Disconnect", e))?
    }

    /// Pushes the database to the cloud. Per-record failures are in the report.
    pub async fn apply(&self, target: impl Into<String>) -> Result<PassReport, StratusError> {
        ractor::call!(
            self.actor,
            EngineMessage::Reconcile,
            target.into(),
            Direction::Apply
        )
        .map_err(|e| rpc_failed("Apply", e))?
    }

    /// Pulls the cloud into the database. Per-record failures are in the report.
    pub async fn sync(&self, target: impl Into<String>) -> Result<PassReport, StratusError> {
        ractor::call!(
            self.actor,
            EngineMessage::Reconcile,
            target.into(),
            Direction::Sync
        )
        .map_err(|e| rpc_failed("Sync", e))?
    }

    pub async fn plan(
        &self,
        target: impl Into<String>,
        direction: Direction,
    ) -> Result<PassPlan, StratusError> {
        ractor::call!(self.actor, EngineMessage::Plan, target.into(), direction)
            .map_err(|e| rpc_failed("Plan", e))?
    }

    pub fn stop(&self) {
        self.actor.stop(None);
    }
}

/// Everything the engine actor owns.
pub struct EngineArgs {
    pub registry: ModuleRegistry,
    pub data_dir: PathBuf,
    pub connector: Arc<dyn CloudConnector>,
    pub settings: EngineSettings,
    pub default_regions: Vec<String>,
}

struct EngineState {
    registry: ModuleRegistry,
    store: TargetStore,
    connector: Arc<dyn CloudConnector>,
    settings: EngineSettings,
    default_regions: Vec<String>,
}

/// Serializes every lifecycle and reconciliation request.
struct EngineActor;

#[ractor::async_trait]
impl Actor for EngineActor {
    type Msg = EngineMessage;
    type State = EngineState;
    type Arguments = EngineArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        info!(
            data_dir = %args.data_dir.display(),
            modules = ?args.registry.names(),
            "EngineActor started"
        );
        Ok(EngineState {
            registry: args.registry,
            store: TargetStore::new(args.data_dir),
            connector: args.connector,
            settings: args.settings,
            default_regions: args.default_regions,
        })
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.store.close_all().await;
        Ok(())
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            EngineMessage::ListModules(target, rp) => {
                reply("list", rp, state.list(target).await);
            }
            EngineMessage::Install(target, modules, sync, rp) => {
                reply("install", rp, state.install(&target, &modules, sync).await);
            }
            EngineMessage::Remove(target, modules, rp) => {
                reply("remove", rp, state.remove(&target, &modules).await);
            }
            EngineMessage::Connect(target, credentials, regions, rp) => {
                reply("connect", rp, state.connect(&target, &credentials, regions).await);
            }
            EngineMessage::Disconnect(target, rp) => {
                reply("disconnect", rp, state.store.disconnect(&target).await);
            }
            EngineMessage::Reconcile(target, direction, rp) => {
                reply("reconcile", rp, state.reconcile(&target, direction).await);
            }
            EngineMessage::Plan(target, direction, rp) => {
                reply("plan", rp, state.plan(&target, direction).await);
            }
        }
        Ok(())
    }
}

/// Hands a result back to the caller; a caller that stopped waiting only gets a debug line.
fn reply<T: Send + 'static>(
    request: &'static str,
    rp: Reply<T>,
    result: Result<T, StratusError>,
) {
    if rp.send(result).is_err() {
        debug!(request, "Caller went away before the reply was sent");
    }
}

impl EngineState {
    async fn installed(&mut self, target: &str) -> Result<Vec<String>, StratusError> {
        let pool = self.store.pool(target).await?;
        Ok(catalog::installed_modules(&pool)
            .await?
            .into_iter()
            .map(|m| m.name)
            .collect())
    }

    async fn context(&mut self, target: &str) -> Result<Context, StratusError> {
        let pool = self.store.pool(target).await?;
        Context::open(target, pool, self.connector.clone(), self.settings.clone()).await
    }

    async fn list(&mut self, target: Option<String>) -> Result<ModuleListing, StratusError> {
        let installed = match &target {
            Some(target) => Some(self.installed(target).await?),
            None => None,
        };
        Ok(ModuleListing {
            available: self.registry.names(),
            target,
            installed,
        })
    }

    async fn install(
        &mut self,
        target: &str,
        modules: &[String],
        sync: bool,
    ) -> Result<InstallOutcome, StratusError> {
        let pool = self.store.pool(target).await?;
        let installed = ModuleManager::new(&self.registry)
            .install(target, &pool, modules)
            .await?;

        let mut outcome = InstallOutcome {
            target: target.to_string(),
            installed,
            sync: None,
            sync_error: None,
        };
        if !sync || outcome.installed.is_empty() {
            return Ok(outcome);
        }

        let mappers = self.registry.ordered_mappers(&outcome.installed)?;
        let pass = async {
            let ctx = self.context(target).await?;
            engine::sync(&ctx, &mappers).await
        };
        match pass.await {
            Ok(report) => outcome.sync = Some(report),
            Err(e) => {
                warn!(target, "Modules installed but the initial sync failed: {e}");
                outcome.sync_error = Some(e.to_string());
            }
        }
        Ok(outcome)
    }

    async fn remove(
        &mut self,
        target: &str,
        modules: &[String],
    ) -> Result<RemoveOutcome, StratusError> {
        let pool = self.store.pool(target).await?;
        let removed = ModuleManager::new(&self.registry)
            .remove(target, &pool, modules)
            .await?;
        Ok(RemoveOutcome {
            target: target.to_string(),
            removed,
        })
    }

    async fn connect(
        &mut self,
        target: &str,
        credentials: &Credentials,
        regions: Vec<String>,
    ) -> Result<TargetInfo, StratusError> {
        let regions = if regions.is_empty() {
            self.default_regions.clone()
        } else {
            regions
        };
        let available = self.connector.available_regions();
        let unknown: Vec<&str> = regions
            .iter()
            .filter(|r| !available.contains(r))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(StratusError::validation(format!(
                "unknown regions: {}",
                unknown.join(", ")
            )));
        }

        self.store.connect(target, credentials, &regions).await?;
        Ok(TargetInfo {
            target: target.to_string(),
            regions,
        })
    }

    async fn reconcile(
        &mut self,
        target: &str,
        direction: Direction,
    ) -> Result<PassReport, StratusError> {
        let installed = self.installed(target).await?;
        let mappers = self.registry.ordered_mappers(&installed)?;
        let ctx = self.context(target).await?;
        engine::run_pass(&ctx, &mappers, direction).await
    }

    async fn plan(&mut self, target: &str, direction: Direction) -> Result<PassPlan, StratusError> {
        let installed = self.installed(target).await?;
        let mappers = self.registry.ordered_mappers(&installed)?;
        let ctx = self.context(target).await?;
        engine::plan(&ctx, &mappers, direction).await
    }
}

/// Starts the engine actor and returns its handle.
pub async fn spawn(args: EngineArgs) -> Result<EngineHandle, StratusError> {
    let (actor, _jh) = Actor::spawn(None, EngineActor, args)
        .await
        .map_err(|e| StratusError::RactorError(format!("failed to spawn EngineActor: {e}")))?;
    Ok(EngineHandle { actor })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ractor::concurrency::oneshot;

    #[tokio::test]
    async fn replies_survive_a_caller_that_left() {
        let (tx, rx) = oneshot::<Result<(), StratusError>>();
        drop(rx);
        reply("disconnect", RpcReplyPort::from(tx), Ok(()));

        let (tx, rx) = oneshot::<Result<(), StratusError>>();
        reply("disconnect", RpcReplyPort::from(tx), Ok(()));
        assert!(matches!(rx.await, Ok(Ok(()))));
    }
}
