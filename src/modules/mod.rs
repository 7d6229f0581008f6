//! Built-in modules and their mappers.

pub mod aws_ec2;
pub mod aws_security_group;
pub mod aws_sns;
pub mod aws_vpc;
mod support;
pub mod tags;

use crate::registry::ModuleDescriptor;

/// Every module the server ships with.
pub fn builtin() -> Vec<ModuleDescriptor> {
    vec![
        aws_vpc::module(),
        aws_security_group::module(),
        aws_ec2::module(),
        aws_sns::module(),
    ]
}
