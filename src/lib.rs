pub mod config;
pub mod context;
pub mod db;
pub mod engine;
pub mod error;
pub mod mapper;
pub mod modules;
pub mod record;
pub mod registry;
pub mod server;
pub mod service;
pub mod utils;

pub use error::StratusError;
