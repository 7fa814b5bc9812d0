//! Instance lifecycle management.
//!
//! Submodules:
//! - `backoff`: exponential delay schedule for restart attempts.
//! - `registry`: the per-workspace instance table with spawn deduplication,
//!   restarts, and health sweeps.

pub mod backoff;
pub mod registry;

pub use backoff::Backoff;
pub use registry::{normalize_workspace_key, InstanceRegistry, RegistryConfig};
