//! Configuration loading and RepoQL executable discovery.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::lifecycle::backoff;
use crate::lifecycle::registry::RegistryConfig;
use crate::rpc::RpcClientOptions;
use crate::{BridgeError, Result};

const EXPLORE_TIMEOUT_MS: u64 = 60_000;
const QUERY_TIMEOUT_MS: u64 = 120_000;
const READ_TIMEOUT_MS: u64 = 60_000;
const IMPORT_TIMEOUT_MS: u64 = 300_000;

/// Bridge configuration, loaded from TOML.
///
/// Every field has a default, so the bridge also runs with no config file
/// at all.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// Explicit path to the RepoQL executable.  When unset, the executable
    /// is discovered on `PATH` and in common install locations.
    #[serde(default)]
    pub exe_path: Option<PathBuf>,

    /// Workspace root served by this bridge.  Defaults to the process
    /// working directory.
    #[serde(default)]
    pub workspace: Option<PathBuf>,

    /// Interval between health sweeps, in milliseconds.
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,

    /// Restart attempts before an instance is given up on.
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,

    /// Timeout for tools without a dedicated entry in the timeout table,
    /// in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Timeout for the MCP `initialize` handshake, in milliseconds.
    #[serde(default = "default_initialize_timeout_ms")]
    pub initialize_timeout_ms: u64,

    /// First restart delay, in milliseconds.
    #[serde(default = "default_restart_initial_delay_ms")]
    pub restart_initial_delay_ms: u64,

    /// Restart delay ceiling, in milliseconds.
    #[serde(default = "default_restart_max_delay_ms")]
    pub restart_max_delay_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            exe_path: None,
            workspace: None,
            health_check_interval_ms: default_health_check_interval_ms(),
            max_restart_attempts: default_max_restart_attempts(),
            default_timeout_ms: default_timeout_ms(),
            initialize_timeout_ms: default_initialize_timeout_ms(),
            restart_initial_delay_ms: default_restart_initial_delay_ms(),
            restart_max_delay_ms: default_restart_max_delay_ms(),
        }
    }
}

impl BridgeConfig {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Io`] when the file cannot be read and
    /// [`BridgeError::Config`] when it fails to parse or validate.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Io(format!("failed to read config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] on parse or validation failure.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and canonicalize configured paths.
    fn validate(&mut self) -> Result<()> {
        if self.default_timeout_ms == 0 {
            return Err(BridgeError::Config(
                "default_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.initialize_timeout_ms == 0 {
            return Err(BridgeError::Config(
                "initialize_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.restart_initial_delay_ms == 0 {
            return Err(BridgeError::Config(
                "restart_initial_delay_ms must be greater than zero".into(),
            ));
        }
        if let Some(workspace) = &self.workspace {
            let canonical = workspace.canonicalize().map_err(|e| {
                BridgeError::Config(format!(
                    "workspace {} is not accessible: {e}",
                    workspace.display()
                ))
            })?;
            self.workspace = Some(canonical);
        }
        Ok(())
    }

    /// Locate the RepoQL executable.
    ///
    /// An explicit `exe_path` must exist; otherwise every `PATH` entry and
    /// a set of common install locations are checked in order.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ExecutableNotFound`] carrying every path that
    /// was checked when no executable turns up.
    pub fn find_executable(&self) -> Result<PathBuf> {
        let mut searched = Vec::new();

        if let Some(explicit) = &self.exe_path {
            if explicit.is_file() {
                return Ok(explicit.clone());
            }
            searched.push(explicit.display().to_string());
            return Err(BridgeError::ExecutableNotFound { searched });
        }

        if let Some(paths) = std::env::var_os("PATH") {
            for dir in std::env::split_paths(&paths) {
                for name in executable_names() {
                    let candidate = dir.join(name);
                    if candidate.is_file() {
                        return Ok(candidate);
                    }
                    searched.push(candidate.display().to_string());
                }
            }
        }

        for candidate in fallback_locations() {
            if candidate.is_file() {
                return Ok(candidate);
            }
            searched.push(candidate.display().to_string());
        }

        Err(BridgeError::ExecutableNotFound { searched })
    }

    /// Timeout applied to one invocation of `tool`.
    #[must_use]
    pub fn tool_timeout(&self, tool: &str) -> Duration {
        let ms = match tool {
            "explore" => EXPLORE_TIMEOUT_MS,
            "query" => QUERY_TIMEOUT_MS,
            "read" => READ_TIMEOUT_MS,
            "import" => IMPORT_TIMEOUT_MS,
            _ => self.default_timeout_ms,
        };
        Duration::from_millis(ms)
    }

    /// Assemble the supervision settings for `exe_path`.
    #[must_use]
    pub fn registry_config(&self, exe_path: PathBuf) -> RegistryConfig {
        RegistryConfig {
            exe_path,
            health_check_interval: Duration::from_millis(self.health_check_interval_ms),
            max_restart_attempts: self.max_restart_attempts,
            backoff_initial: Duration::from_millis(self.restart_initial_delay_ms),
            backoff_multiplier: backoff::DEFAULT_MULTIPLIER,
            backoff_max: Duration::from_millis(self.restart_max_delay_ms),
            client: RpcClientOptions {
                initialize_timeout: Duration::from_millis(self.initialize_timeout_ms),
                ..RpcClientOptions::default()
            },
        }
    }
}

// ── Defaults ──────────────────────────────────────────────────────────────────

fn default_health_check_interval_ms() -> u64 {
    60_000
}

fn default_max_restart_attempts() -> u32 {
    3
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_initialize_timeout_ms() -> u64 {
    30_000
}

fn default_restart_initial_delay_ms() -> u64 {
    1_000
}

fn default_restart_max_delay_ms() -> u64 {
    30_000
}

// ── Discovery locations ───────────────────────────────────────────────────────

#[cfg(not(windows))]
fn executable_names() -> &'static [&'static str] {
    &["repoql"]
}

#[cfg(windows)]
fn executable_names() -> &'static [&'static str] {
    &["repoql.exe", "repoql.cmd"]
}

#[cfg(not(windows))]
fn fallback_locations() -> Vec<PathBuf> {
    let mut locations = vec![
        PathBuf::from("/usr/local/bin/repoql"),
        PathBuf::from("/usr/bin/repoql"),
    ];
    if let Some(home) = std::env::var_os("HOME") {
        locations.push(PathBuf::from(home).join(".local").join("bin").join("repoql"));
    }
    locations
}

#[cfg(windows)]
fn fallback_locations() -> Vec<PathBuf> {
    let mut locations = Vec::new();
    if let Some(program_files) = std::env::var_os("ProgramFiles") {
        locations.push(PathBuf::from(program_files).join("RepoQL").join("repoql.exe"));
    }
    if let Some(local) = std::env::var_os("LOCALAPPDATA") {
        locations.push(
            PathBuf::from(local)
                .join("Programs")
                .join("RepoQL")
                .join("repoql.exe"),
        );
    }
    locations
}
