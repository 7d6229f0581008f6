//! SNS topics and their subscriptions.

pub mod subscription;
pub mod topic;

use std::sync::Arc;

pub use subscription::{Subscription, SubscriptionMapper};
pub use topic::{Topic, TopicMapper};

use crate::engine::MapperEntry;
use crate::registry::{ModuleDescriptor, SqlMigrations};

pub const NAME: &str = "aws_sns";

const UP: &str = r#"
CREATE TABLE IF NOT EXISTS topic (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    arn TEXT,
    display_name TEXT,
    policy TEXT,
    delivery_policy TEXT,
    region TEXT NOT NULL,
    UNIQUE (name, region)
);

CREATE TABLE IF NOT EXISTS subscription (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    arn TEXT,
    topic INTEGER NOT NULL REFERENCES topic (id) ON DELETE CASCADE,
    endpoint TEXT NOT NULL,
    protocol TEXT NOT NULL,
    region TEXT NOT NULL
);
"#;

const DOWN: &str = r#"
DROP TABLE IF EXISTS subscription;
DROP TABLE IF EXISTS topic;
"#;

pub fn module() -> ModuleDescriptor {
    ModuleDescriptor::new(NAME)
        .provides(["topic", "subscription"])
        .mapper(Arc::new(MapperEntry(TopicMapper)))
        .mapper(Arc::new(MapperEntry(SubscriptionMapper)))
        .migrations(SqlMigrations { up: UP, down: DOWN })
}
