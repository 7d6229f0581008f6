//! Static catalog of installable modules.
//!
//! Each module names the tables it provides, the modules it depends on, the mappers it
//! contributes (root to leaf within the module) and its lifecycle hooks. The registry is built
//! once at startup and validated: duplicate names, dangling dependencies and cycles are rejected
//! before anything is installed.

mod lifecycle;
pub mod order;

pub use lifecycle::ModuleManager;

use async_trait::async_trait;
use sqlx::SqliteConnection;
use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::db::apply_statements;
use crate::engine::DynMapper;
use crate::error::{RegistryError, StratusError};

/// Lifecycle hooks, all run inside the install/remove transaction.
///
/// Hooks must be idempotent: the pre-pass runs the pre hook a second time.
#[async_trait]
pub trait Migrations: Send + Sync {
    async fn preinstall(&self, _conn: &mut SqliteConnection) -> Result<(), StratusError> {
        Ok(())
    }

    async fn postinstall(&self, _conn: &mut SqliteConnection) -> Result<(), StratusError> {
        Ok(())
    }

    async fn preremove(&self, _conn: &mut SqliteConnection) -> Result<(), StratusError> {
        Ok(())
    }

    async fn postremove(&self, _conn: &mut SqliteConnection) -> Result<(), StratusError> {
        Ok(())
    }
}

/// Hooks that are plain DDL: `up` creates the module's tables, `down` drops them.
pub struct SqlMigrations {
    pub up: &'static str,
    pub down: &'static str,
}

#[async_trait]
impl Migrations for SqlMigrations {
    async fn preinstall(&self, conn: &mut SqliteConnection) -> Result<(), StratusError> {
        apply_statements(conn, self.up).await?;
        Ok(())
    }

    async fn preremove(&self, conn: &mut SqliteConnection) -> Result<(), StratusError> {
        apply_statements(conn, self.down).await?;
        Ok(())
    }
}

struct NoMigrations;

impl Migrations for NoMigrations {}

#[derive(Clone)]
pub struct ModuleDescriptor {
    pub name: &'static str,
    pub dependencies: Vec<&'static str>,
    pub tables: Vec<&'static str>,
    pub mappers: Vec<Arc<dyn DynMapper>>,
    pub migrations: Arc<dyn Migrations>,
}

impl ModuleDescriptor {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            dependencies: Vec::new(),
            tables: Vec::new(),
            mappers: Vec::new(),
            migrations: Arc::new(NoMigrations),
        }
    }

    pub fn depends_on<I: IntoIterator<Item = &'static str>>(mut self, deps: I) -> Self {
        self.dependencies.extend(deps);
        self
    }

    pub fn provides<I: IntoIterator<Item = &'static str>>(mut self, tables: I) -> Self {
        self.tables.extend(tables);
        self
    }

    pub fn mapper(mut self, mapper: Arc<dyn DynMapper>) -> Self {
        self.mappers.push(mapper);
        self
    }

    pub fn migrations(mut self, migrations: impl Migrations + 'static) -> Self {
        self.migrations = Arc::new(migrations);
        self
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("tables", &self.tables)
            .field(
                "mappers",
                &self.mappers.iter().map(|m| m.kind()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct ModuleRegistry {
    modules: BTreeMap<&'static str, ModuleDescriptor>,
}

impl ModuleRegistry {
    pub fn new(modules: Vec<ModuleDescriptor>) -> Result<Self, RegistryError> {
        let mut by_name = BTreeMap::new();
        for module in modules {
            let name = module.name;
            if by_name.insert(name, module).is_some() {
                return Err(RegistryError::DuplicateModule(name.to_string()));
            }
        }

        for module in by_name.values() {
            for dep in &module.dependencies {
                if !by_name.contains_key(dep) {
                    return Err(RegistryError::UnknownDependency {
                        module: module.name.to_string(),
                        dependency: (*dep).to_string(),
                    });
                }
            }
        }

        let registry = Self { modules: by_name };
        let all: Vec<&ModuleDescriptor> = registry.modules.values().collect();
        order::root_to_leaf(&all)?;
        Ok(registry)
    }

    /// Every module shipped with the server.
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::new(crate::modules::builtin())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.modules.keys().copied().collect()
    }

    pub fn get(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.modules.get(name)
    }

    /// Resolves names, reporting every unknown one at once.
    pub fn resolve<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> Result<Vec<&ModuleDescriptor>, RegistryError> {
        let mut found = Vec::with_capacity(names.len());
        let mut unknown = Vec::new();
        for name in names {
            match self.get(name.as_ref()) {
                Some(module) => {
                    if !found.iter().any(|m: &&ModuleDescriptor| m.name == module.name) {
                        found.push(module);
                    }
                }
                None => unknown.push(name.as_ref().to_string()),
            }
        }
        if unknown.is_empty() {
            Ok(found)
        } else {
            Err(RegistryError::UnknownModules(unknown))
        }
    }

    /// Installed modules in the registry that list `name` as a dependency.
    pub fn dependents_of<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a ModuleDescriptor> {
        let name = name.to_string();
        self.modules
            .values()
            .filter(move |m| m.dependencies.iter().any(|d| *d == name))
    }

    /// Mappers of `names`, modules root to leaf and each module's mappers in declared order.
    ///
    /// Names the registry does not know are ignored; the catalog may outlive a module.
    pub fn ordered_mappers<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> Result<Vec<Arc<dyn DynMapper>>, RegistryError> {
        let modules: Vec<&ModuleDescriptor> = names
            .iter()
            .filter_map(|n| self.get(n.as_ref()))
            .collect();
        Ok(order::root_to_leaf(&modules)?
            .into_iter()
            .flat_map(|m| m.mappers.iter().cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_is_valid() {
        let registry = ModuleRegistry::builtin().unwrap();
        assert_eq!(
            registry.names(),
            vec!["aws_ec2", "aws_security_group", "aws_sns", "aws_vpc"]
        );

        let kinds: Vec<&str> = registry
            .ordered_mappers(&["aws_ec2", "aws_vpc", "aws_security_group"])
            .unwrap()
            .iter()
            .map(|m| m.kind())
            .collect();
        assert_eq!(
            kinds,
            vec!["vpc", "subnet", "endpoint_interface", "security_group", "instance"]
        );
    }

    #[test]
    fn invalid_registries_are_rejected() {
        let dup = ModuleRegistry::new(vec![ModuleDescriptor::new("a"), ModuleDescriptor::new("a")]);
        assert_eq!(dup.unwrap_err(), RegistryError::DuplicateModule("a".into()));

        let dangling = ModuleRegistry::new(vec![ModuleDescriptor::new("a").depends_on(["ghost"])]);
        assert!(matches!(
            dangling.unwrap_err(),
            RegistryError::UnknownDependency { .. }
        ));

        let cyclic = ModuleRegistry::new(vec![
            ModuleDescriptor::new("a").depends_on(["b"]),
            ModuleDescriptor::new("b").depends_on(["a"]),
        ]);
        assert!(matches!(
            cyclic.unwrap_err(),
            RegistryError::DependencyCycle(_)
        ));
    }

    #[test]
    fn resolve_reports_all_unknown_names() {
        let registry = ModuleRegistry::builtin().unwrap();
        let err = registry
            .resolve(&["aws_vpc", "aws_nope", "aws_zzz"])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "The following modules do not exist: aws_nope , aws_zzz"
        );
    }
}
