//! MCP tool handlers.
//!
//! Each tool validates its arguments, resolves the workspace instance, and
//! proxies the call to the RepoQL child process.

pub mod explore;
pub mod import;
pub mod query;
pub mod read;
pub mod util;
