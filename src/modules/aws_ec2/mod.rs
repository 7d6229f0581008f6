//! EC2 instances.

pub mod instance;

use std::sync::Arc;

pub use instance::{Instance, InstanceMapper};

use crate::engine::MapperEntry;
use crate::modules::{aws_security_group, aws_vpc};
use crate::registry::{ModuleDescriptor, SqlMigrations};

pub const NAME: &str = "aws_ec2";

const UP: &str = r#"
CREATE TABLE IF NOT EXISTS instance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    instance_id TEXT,
    name TEXT,
    ami TEXT NOT NULL,
    instance_type TEXT NOT NULL,
    state TEXT,
    region TEXT NOT NULL,
    tags TEXT,
    UNIQUE (instance_id, region)
);

CREATE TABLE IF NOT EXISTS instance_security_groups (
    instance INTEGER NOT NULL REFERENCES instance (id) ON DELETE CASCADE,
    security_group INTEGER NOT NULL REFERENCES security_group (id) ON DELETE CASCADE,
    PRIMARY KEY (instance, security_group)
);
"#;

const DOWN: &str = r#"
DROP TABLE IF EXISTS instance_security_groups;
DROP TABLE IF EXISTS instance;
"#;

pub fn module() -> ModuleDescriptor {
    ModuleDescriptor::new(NAME)
        .depends_on([aws_security_group::NAME, aws_vpc::NAME])
        .provides(["instance", "instance_security_groups"])
        .mapper(Arc::new(MapperEntry(InstanceMapper)))
        .migrations(SqlMigrations { up: UP, down: DOWN })
}
