//! Security groups, including the provider-owned `default` group of every VPC.

pub mod group;

use std::sync::Arc;

pub use group::{SecurityGroup, SecurityGroupMapper};

use crate::engine::MapperEntry;
use crate::registry::{ModuleDescriptor, SqlMigrations};

pub const NAME: &str = "aws_security_group";

const UP: &str = r#"
CREATE TABLE IF NOT EXISTS security_group (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id TEXT,
    group_name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    vpc INTEGER NOT NULL REFERENCES vpc (id) ON DELETE CASCADE,
    owner_id TEXT,
    region TEXT NOT NULL,
    tags TEXT,
    UNIQUE (group_id, region)
);
"#;

const DOWN: &str = "DROP TABLE IF EXISTS security_group;";

pub fn module() -> ModuleDescriptor {
    ModuleDescriptor::new(NAME)
        .depends_on([crate::modules::aws_vpc::NAME])
        .provides(["security_group"])
        .mapper(Arc::new(MapperEntry(SecurityGroupMapper)))
        .migrations(SqlMigrations { up: UP, down: DOWN })
}
