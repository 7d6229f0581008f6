use sqlx::{SqliteConnection, SqlitePool};
use std::collections::BTreeSet;
use tracing::{info, warn};

use super::{ModuleDescriptor, ModuleRegistry, order};
use crate::db::catalog;
use crate::error::{RegistryError, StratusError, TableCollision};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hook {
    Preinstall,
    Postinstall,
    Preremove,
    Postremove,
}

impl Hook {
    fn as_str(self) -> &'static str {
        match self {
            Hook::Preinstall => "preinstall",
            Hook::Postinstall => "postinstall",
            Hook::Preremove => "preremove",
            Hook::Postremove => "postremove",
        }
    }
}

async fn run_hook(
    module: &ModuleDescriptor,
    hook: Hook,
    conn: &mut SqliteConnection,
) -> Result<(), StratusError> {
    let result = match hook {
        Hook::Preinstall => module.migrations.preinstall(conn).await,
        Hook::Postinstall => module.migrations.postinstall(conn).await,
        Hook::Preremove => module.migrations.preremove(conn).await,
        Hook::Postremove => module.migrations.postremove(conn).await,
    };
    result.map_err(|e| {
        warn!(module = module.name, hook = hook.as_str(), "Hook failed: {e}");
        RegistryError::Hook(e.to_string()).into()
    })
}

/// Installs and removes modules in a target, one transaction per request.
pub struct ModuleManager<'a> {
    registry: &'a ModuleRegistry,
}

impl<'a> ModuleManager<'a> {
    pub fn new(registry: &'a ModuleRegistry) -> Self {
        Self { registry }
    }

    fn validate<S: AsRef<str>>(
        &self,
        target: &str,
        names: &[S],
    ) -> Result<Vec<&'a ModuleDescriptor>, RegistryError> {
        if target.trim().is_empty() {
            return Err(RegistryError::MissingTarget);
        }
        if names.is_empty() {
            return Err(RegistryError::EmptyRequest);
        }
        self.registry.resolve(names)
    }

    /// Installs `names` into the target. Returns the modules actually installed, root to leaf;
    /// empty when everything requested was already installed.
    pub async fn install<S: AsRef<str>>(
        &self,
        target: &str,
        pool: &SqlitePool,
        names: &[S],
    ) -> Result<Vec<&'static str>, StratusError> {
        let requested = self.validate(target, names)?;
        let installed: BTreeSet<String> = catalog::installed_modules(pool)
            .await?
            .into_iter()
            .map(|m| m.name)
            .collect();

        let pending: Vec<&ModuleDescriptor> = requested
            .into_iter()
            .filter(|m| !installed.contains(m.name))
            .collect();
        if pending.is_empty() {
            info!(target, "Nothing to install");
            return Ok(Vec::new());
        }

        let existing: BTreeSet<String> = catalog::list_tables(pool).await?.into_iter().collect();
        let collisions: Vec<TableCollision> = pending
            .iter()
            .filter_map(|m| {
                let tables: Vec<String> = m
                    .tables
                    .iter()
                    .filter(|t| existing.contains(**t))
                    .map(|t| (*t).to_string())
                    .collect();
                (!tables.is_empty()).then(|| TableCollision {
                    module: m.name.to_string(),
                    tables,
                })
            })
            .collect();
        if !collisions.is_empty() {
            return Err(RegistryError::Collision(collisions).into());
        }

        for module in &pending {
            for dep in &module.dependencies {
                let requested_too = pending.iter().any(|m| m.name == *dep);
                if !requested_too && !installed.contains(*dep) {
                    return Err(RegistryError::MissingDependency {
                        module: module.name.to_string(),
                        dependency: (*dep).to_string(),
                    }
                    .into());
                }
            }
        }

        let ordered = order::root_to_leaf(&pending)?;

        let mut tx = pool.begin().await?;
        let result: Result<(), StratusError> = async {
            for module in ordered.iter().rev() {
                run_hook(module, Hook::Preinstall, &mut tx).await?;
            }
            for module in &ordered {
                run_hook(module, Hook::Preinstall, &mut tx).await?;
                run_hook(module, Hook::Postinstall, &mut tx).await?;
                catalog::insert_module(&mut tx, module.name).await?;
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            tx.rollback().await?;
            return Err(e);
        }
        tx.commit().await?;

        let names: Vec<&'static str> = ordered.iter().map(|m| m.name).collect();
        info!(target, modules = ?names, "Modules installed");
        Ok(names)
    }

    /// Removes `names` from the target. Returns the modules actually removed, root to leaf;
    /// empty when none of them was installed.
    pub async fn remove<S: AsRef<str>>(
        &self,
        target: &str,
        pool: &SqlitePool,
        names: &[S],
    ) -> Result<Vec<&'static str>, StratusError> {
        let requested = self.validate(target, names)?;
        let installed: BTreeSet<String> = catalog::installed_modules(pool)
            .await?
            .into_iter()
            .map(|m| m.name)
            .collect();

        let pending: Vec<&ModuleDescriptor> = requested
            .into_iter()
            .filter(|m| installed.contains(m.name))
            .collect();
        if pending.is_empty() {
            info!(target, "Nothing to remove");
            return Ok(Vec::new());
        }

        for module in &pending {
            for dependent in self.registry.dependents_of(module.name) {
                let removed_too = pending.iter().any(|m| m.name == dependent.name);
                if !removed_too && installed.contains(dependent.name) {
                    return Err(RegistryError::DependentInstalled {
                        module: module.name.to_string(),
                        dependent: dependent.name.to_string(),
                    }
                    .into());
                }
            }
        }

        let ordered = order::root_to_leaf(&pending)?;

        let mut tx = pool.begin().await?;
        let result: Result<(), StratusError> = async {
            for module in ordered.iter().rev() {
                run_hook(module, Hook::Preremove, &mut tx).await?;
            }
            for module in &ordered {
                run_hook(module, Hook::Preremove, &mut tx).await?;
                run_hook(module, Hook::Postremove, &mut tx).await?;
                catalog::delete_module(&mut tx, module.name).await?;
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            tx.rollback().await?;
            return Err(e);
        }
        tx.commit().await?;

        let names: Vec<&'static str> = ordered.iter().map(|m| m.name).collect();
        info!(target, modules = ?names, "Modules removed");
        Ok(names)
    }
}
