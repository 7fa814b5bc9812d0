//! Bridge service lifecycle.
//!
//! Ties the instance registry to the host process: `start` brings up
//! health checks and warms the default workspace, `stop` tears every
//! child down.  The MCP server surface holds a [`BridgeService`] and
//! calls these around its own serve loop.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::lifecycle::InstanceRegistry;

/// Process-lifetime wrapper around the registry.
#[derive(Clone)]
pub struct BridgeService {
    registry: InstanceRegistry,
    workspace_root: PathBuf,
}

impl BridgeService {
    /// Create a service managing `workspace_root` through `registry`.
    #[must_use]
    pub fn new(registry: InstanceRegistry, workspace_root: PathBuf) -> Self {
        Self {
            registry,
            workspace_root,
        }
    }

    /// Registry this service manages.
    #[must_use]
    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    /// Resume the registry, start health checks, and warm up the default
    /// workspace.
    ///
    /// A failed warm-up spawn is logged and tolerated; the first tool call
    /// retries it.
    pub async fn start(&self) {
        self.registry.reset();
        self.registry.start_health_checks().await;

        info!(workspace = %self.workspace_root.display(), "bridge service starting");
        if let Err(err) = self.registry.get_instance(&self.workspace_root).await {
            warn!(%err, "warm-up spawn failed; will retry on first tool call");
        }
    }

    /// Stop every instance and suspend supervision.
    pub async fn stop(&self) {
        info!("bridge service stopping");
        self.registry.stop_all().await;
    }
}
