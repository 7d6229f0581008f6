pub mod module;
pub mod target;
