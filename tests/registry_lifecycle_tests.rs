use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::{Arc, Mutex};
use stratus::db::{TargetStore, catalog};
use stratus::error::{RegistryError, StratusError};
use stratus::registry::{Migrations, ModuleDescriptor, ModuleManager, ModuleRegistry};
use stratus_cloud::Credentials;

type Log = Arc<Mutex<Vec<String>>>;

/// Hooks that create one table and record every call.
struct Recorder {
    name: &'static str,
    table: &'static str,
    log: Log,
    fail_postinstall: bool,
}

impl Recorder {
    fn record(&self, hook: &str) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{hook}", self.name));
    }
}

#[async_trait]
impl Migrations for Recorder {
    async fn preinstall(&self, conn: &mut SqliteConnection) -> Result<(), StratusError> {
        self.record("preinstall");
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY)",
            self.table
        ))
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn postinstall(&self, _conn: &mut SqliteConnection) -> Result<(), StratusError> {
        self.record("postinstall");
        if self.fail_postinstall {
            return Err(StratusError::validation("seed data rejected"));
        }
        Ok(())
    }

    async fn preremove(&self, conn: &mut SqliteConnection) -> Result<(), StratusError> {
        self.record("preremove");
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", self.table))
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn postremove(&self, _conn: &mut SqliteConnection) -> Result<(), StratusError> {
        self.record("postremove");
        Ok(())
    }
}

fn module(name: &'static str, table: &'static str, log: &Log) -> ModuleDescriptor {
    ModuleDescriptor::new(name)
        .provides([table])
        .migrations(Recorder {
            name,
            table,
            log: log.clone(),
            fail_postinstall: false,
        })
}

async fn target_pool(dir: &tempfile::TempDir) -> SqlitePool {
    TargetStore::new(dir.path())
        .connect(
            "lifecycle",
            &Credentials::new("AKID", "secret"),
            &["us-east-1".to_string()],
        )
        .await
        .expect("failed to connect target")
}

async fn installed(pool: &SqlitePool) -> Vec<String> {
    catalog::installed_modules(pool)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.name)
        .collect()
}

#[tokio::test]
async fn dependencies_run_their_hooks_first() {
    let log: Log = Arc::default();
    let registry = ModuleRegistry::new(vec![
        module("alpha", "alpha_items", &log),
        module("beta", "beta_items", &log).depends_on(["alpha"]),
    ])
    .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let pool = target_pool(&dir).await;

    let names = ModuleManager::new(&registry)
        .install("lifecycle", &pool, &["beta", "alpha"])
        .await
        .unwrap();
    assert_eq!(names, vec!["alpha", "beta"]);

    let calls = log.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![
            // pre-pass, leaf to root
            "beta:preinstall",
            "alpha:preinstall",
            // main pass, root to leaf
            "alpha:preinstall",
            "alpha:postinstall",
            "beta:preinstall",
            "beta:postinstall",
        ]
    );
    assert_eq!(installed(&pool).await, vec!["alpha", "beta"]);
}

#[tokio::test]
async fn install_then_remove_leaves_nothing_behind() {
    let log: Log = Arc::default();
    let registry = ModuleRegistry::new(vec![
        module("alpha", "alpha_items", &log),
        module("beta", "beta_items", &log).depends_on(["alpha"]),
    ])
    .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let pool = target_pool(&dir).await;
    let manager = ModuleManager::new(&registry);

    manager
        .install("lifecycle", &pool, &["alpha", "beta"])
        .await
        .unwrap();
    sqlx::query("INSERT INTO alpha_items (id) VALUES (1), (2)")
        .execute(&pool)
        .await
        .unwrap();
    log.lock().unwrap().clear();

    let removed = manager
        .remove("lifecycle", &pool, &["beta", "alpha"])
        .await
        .unwrap();
    assert_eq!(removed, vec!["alpha", "beta"]);

    // The pre-pass runs the remove hooks, never the install ones.
    let calls = log.lock().unwrap().clone();
    assert!(calls.iter().all(|c| !c.ends_with("install")), "{calls:?}");
    assert_eq!(calls.first().map(String::as_str), Some("beta:preremove"));

    let tables = catalog::list_tables(&pool).await.unwrap();
    assert!(!tables.contains(&"alpha_items".to_string()));
    assert!(!tables.contains(&"beta_items".to_string()));
    assert!(installed(&pool).await.is_empty());
}

#[tokio::test]
async fn a_failing_hook_rolls_back_everything() {
    let log: Log = Arc::default();
    let registry = ModuleRegistry::new(vec![
        module("alpha", "alpha_items", &log),
        ModuleDescriptor::new("broken")
            .provides(["broken_items"])
            .migrations(Recorder {
                name: "broken",
                table: "broken_items",
                log: log.clone(),
                fail_postinstall: true,
            }),
    ])
    .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let pool = target_pool(&dir).await;

    let err = ModuleManager::new(&registry)
        .install("lifecycle", &pool, &["alpha", "broken"])
        .await
        .unwrap_err();
    match err {
        StratusError::Registry(RegistryError::Hook(message)) => {
            assert_eq!(message, "Validation error: seed data rejected");
        }
        other => panic!("expected hook failure, got {other:?}"),
    }

    let tables = catalog::list_tables(&pool).await.unwrap();
    assert!(!tables.contains(&"alpha_items".to_string()));
    assert!(!tables.contains(&"broken_items".to_string()));
    assert!(installed(&pool).await.is_empty());
}

#[tokio::test]
async fn validation_errors_mutate_nothing() {
    let registry = ModuleRegistry::builtin().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let pool = target_pool(&dir).await;
    let manager = ModuleManager::new(&registry);

    let err = manager
        .install("lifecycle", &pool, &["aws_vpc", "aws_lambda", "aws_rds"])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StratusError::Registry(RegistryError::UnknownModules(ref names))
            if names == &vec!["aws_lambda".to_string(), "aws_rds".to_string()]
    ));

    let err = manager
        .install("", &pool, &["aws_vpc"])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StratusError::Registry(RegistryError::MissingTarget)
    ));

    let err = manager
        .install("lifecycle", &pool, &["aws_ec2"])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StratusError::Registry(RegistryError::MissingDependency { .. })
    ));

    assert!(installed(&pool).await.is_empty());
    assert!(!catalog::list_tables(&pool).await.unwrap().contains(&"vpc".to_string()));
}

#[tokio::test]
async fn existing_tables_block_installation() {
    let registry = ModuleRegistry::builtin().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let pool = target_pool(&dir).await;
    sqlx::query("CREATE TABLE topic (id INTEGER PRIMARY KEY, note TEXT)")
        .execute(&pool)
        .await
        .unwrap();

    let err = ModuleManager::new(&registry)
        .install("lifecycle", &pool, &["aws_sns"])
        .await
        .unwrap_err();
    match err {
        StratusError::Registry(RegistryError::Collision(collisions)) => {
            assert_eq!(collisions.len(), 1);
            assert_eq!(collisions[0].module, "aws_sns");
            assert_eq!(collisions[0].tables, vec!["topic".to_string()]);
        }
        other => panic!("expected collision, got {other:?}"),
    }

    let tables = catalog::list_tables(&pool).await.unwrap();
    assert!(!tables.contains(&"subscription".to_string()));
    assert!(installed(&pool).await.is_empty());
}

#[tokio::test]
async fn installed_modules_are_pruned_and_dependents_protected() {
    let registry = ModuleRegistry::builtin().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let pool = target_pool(&dir).await;
    let manager = ModuleManager::new(&registry);

    let first = manager
        .install("lifecycle", &pool, &["aws_security_group", "aws_vpc"])
        .await
        .unwrap();
    assert_eq!(first, vec!["aws_vpc", "aws_security_group"]);

    let again = manager
        .install("lifecycle", &pool, &["aws_vpc"])
        .await
        .unwrap();
    assert!(again.is_empty());

    let err = manager
        .remove("lifecycle", &pool, &["aws_vpc"])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StratusError::Registry(RegistryError::DependentInstalled { ref dependent, .. })
            if dependent == "aws_security_group"
    ));

    let nothing = manager
        .remove("lifecycle", &pool, &["aws_sns"])
        .await
        .unwrap();
    assert!(nothing.is_empty());

    manager
        .remove("lifecycle", &pool, &["aws_vpc", "aws_security_group"])
        .await
        .unwrap();
    for table in ["vpc", "subnet", "endpoint_interface", "security_group"] {
        assert!(
            !catalog::list_tables(&pool)
                .await
                .unwrap()
                .contains(&table.to_string()),
            "{table} survived removal"
        );
    }
    assert!(installed(&pool).await.is_empty());
}
