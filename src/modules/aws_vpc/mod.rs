//! Network module: VPCs, subnets and interface endpoints.

pub mod endpoint;
pub mod subnet;
pub mod vpc;

use std::sync::Arc;

pub use endpoint::{EndpointInterface, EndpointInterfaceMapper};
pub use subnet::{Subnet, SubnetMapper};
pub use vpc::{Vpc, VpcMapper};

use crate::engine::MapperEntry;
use crate::registry::{ModuleDescriptor, SqlMigrations};

pub const NAME: &str = "aws_vpc";

const UP: &str = r#"
CREATE TABLE IF NOT EXISTS vpc (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    vpc_id TEXT,
    cidr_block TEXT NOT NULL,
    state TEXT,
    is_default INTEGER NOT NULL DEFAULT 0,
    region TEXT NOT NULL,
    tags TEXT,
    UNIQUE (vpc_id, region)
);

CREATE TABLE IF NOT EXISTS subnet (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    subnet_id TEXT,
    vpc INTEGER NOT NULL REFERENCES vpc (id) ON DELETE CASCADE,
    availability_zone TEXT,
    cidr_block TEXT NOT NULL,
    state TEXT,
    available_ip_address_count INTEGER,
    region TEXT NOT NULL,
    tags TEXT,
    UNIQUE (subnet_id, region)
);

CREATE TABLE IF NOT EXISTS endpoint_interface (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    vpc_endpoint_id TEXT,
    service TEXT NOT NULL,
    vpc INTEGER NOT NULL REFERENCES vpc (id) ON DELETE CASCADE,
    policy TEXT,
    state TEXT,
    private_dns_enabled INTEGER NOT NULL DEFAULT 0,
    dns_name_record_type TEXT NOT NULL DEFAULT 'ipv4',
    region TEXT NOT NULL,
    tags TEXT,
    UNIQUE (vpc_endpoint_id, region)
);

CREATE TABLE IF NOT EXISTS endpoint_interface_subnets (
    endpoint_interface INTEGER NOT NULL REFERENCES endpoint_interface (id) ON DELETE CASCADE,
    subnet INTEGER NOT NULL REFERENCES subnet (id) ON DELETE CASCADE,
    PRIMARY KEY (endpoint_interface, subnet)
);
"#;

const DOWN: &str = r#"
DROP TABLE IF EXISTS endpoint_interface_subnets;
DROP TABLE IF EXISTS endpoint_interface;
DROP TABLE IF EXISTS subnet;
DROP TABLE IF EXISTS vpc;
"#;

pub fn module() -> ModuleDescriptor {
    ModuleDescriptor::new(NAME)
        .provides(["vpc", "subnet", "endpoint_interface", "endpoint_interface_subnets"])
        .mapper(Arc::new(MapperEntry(VpcMapper)))
        .mapper(Arc::new(MapperEntry(SubnetMapper)))
        .mapper(Arc::new(MapperEntry(EndpointInterfaceMapper)))
        .migrations(SqlMigrations { up: UP, down: DOWN })
}
