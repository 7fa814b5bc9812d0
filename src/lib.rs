#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod rpc;
pub mod server;
pub mod service;

pub use config::BridgeConfig;
pub use errors::{BridgeError, Result};
