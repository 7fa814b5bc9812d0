//! Per-workspace instance supervision.
//!
//! The [`InstanceRegistry`] keeps at most one live [`RpcClient`] per
//! normalized workspace key.  Concurrent requests for the same workspace
//! share one in-flight spawn, exited children are restarted with
//! exponential backoff, and instances whose restarts keep failing are
//! evicted after a bounded number of attempts.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::lifecycle::backoff::{self, Backoff};
use crate::rpc::{RpcClient, RpcClientOptions};
use crate::{BridgeError, Result};

/// Settings the registry applies to every instance it manages.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// RepoQL executable every child is spawned from.
    pub exe_path: PathBuf,
    /// How often the health sweep looks for disconnected instances.
    pub health_check_interval: Duration,
    /// Restart attempts before an instance is evicted.
    pub max_restart_attempts: u32,
    /// First restart delay.
    pub backoff_initial: Duration,
    /// Restart delay growth factor.
    pub backoff_multiplier: u32,
    /// Restart delay ceiling.
    pub backoff_max: Duration,
    /// Timing knobs passed to each spawned client.
    pub client: RpcClientOptions,
}

impl RegistryConfig {
    /// Config with default supervision settings for `exe_path`.
    #[must_use]
    pub fn new(exe_path: PathBuf) -> Self {
        Self {
            exe_path,
            health_check_interval: Duration::from_millis(60_000),
            max_restart_attempts: 3,
            backoff_initial: backoff::DEFAULT_INITIAL_DELAY,
            backoff_multiplier: backoff::DEFAULT_MULTIPLIER,
            backoff_max: backoff::DEFAULT_MAX_DELAY,
            client: RpcClientOptions::default(),
        }
    }
}

/// One supervised workspace entry.
///
/// The client slot is replaced in place on restart so the entry keeps its
/// attempt counter and backoff schedule across client generations.
#[derive(Debug)]
struct Instance {
    client: Arc<RpcClient>,
    workdir: PathBuf,
    backoff: Backoff,
    restart_attempts: u32,
    is_restarting: bool,
}

/// In-flight spawn shared by every caller asking for the same workspace.
type SharedSpawn = Shared<BoxFuture<'static, Result<Arc<RpcClient>>>>;

struct HealthTask {
    cancel: CancellationToken,
    _handle: JoinHandle<()>,
}

struct RegistryInner {
    config: RegistryConfig,
    instances: Mutex<HashMap<String, Instance>>,
    pending_spawns: Mutex<HashMap<String, SharedSpawn>>,
    stopped: AtomicBool,
    health_task: Mutex<Option<HealthTask>>,
}

/// Registry of supervised RepoQL instances, one per workspace.
///
/// Cloning is cheap; every clone operates on the same instance table.
#[derive(Clone)]
pub struct InstanceRegistry {
    inner: Arc<RegistryInner>,
}

impl InstanceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                instances: Mutex::new(HashMap::new()),
                pending_spawns: Mutex::new(HashMap::new()),
                stopped: AtomicBool::new(false),
                health_task: Mutex::new(None),
            }),
        }
    }

    /// Get the connected client for `workdir`, spawning one if needed.
    ///
    /// Callers racing on the same workspace share a single spawn and all
    /// receive its outcome.  Calling this on a stopped registry resumes it.
    ///
    /// # Errors
    ///
    /// Returns the spawn's [`BridgeError`] when no instance could be
    /// brought up.
    pub async fn get_instance(&self, workdir: &Path) -> Result<Arc<RpcClient>> {
        if self.inner.stopped.swap(false, Ordering::SeqCst) {
            info!("registry was stopped; resuming instance management");
        }

        let key = normalize_workspace_key(workdir);
        {
            let instances = self.inner.instances.lock().await;
            if let Some(instance) = instances.get(&key) {
                if instance.client.is_connected() {
                    return Ok(Arc::clone(&instance.client));
                }
            }
        }
        self.spawn_shared(key, workdir.to_path_buf()).await
    }

    /// Stop and remove the instance for `workdir`, if any.
    ///
    /// Removing the entry first means the exit report from the killed child
    /// finds nothing to restart.
    pub async fn stop_instance(&self, workdir: &Path) {
        let key = normalize_workspace_key(workdir);
        let removed = self.inner.instances.lock().await.remove(&key);
        if let Some(instance) = removed {
            info!(workspace = %key, "stopping instance");
            instance.client.kill().await;
        }
    }

    /// Stop every instance and suspend restarts until the registry is
    /// resumed by [`InstanceRegistry::reset`] or a new `get_instance` call.
    pub async fn stop_all(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.stop_health_checks().await;

        let clients: Vec<Arc<RpcClient>> = {
            let instances = self.inner.instances.lock().await;
            instances
                .values()
                .map(|instance| Arc::clone(&instance.client))
                .collect()
        };
        if clients.is_empty() {
            return;
        }

        info!(count = clients.len(), "stopping all instances");
        let kills = clients.into_iter().map(|client| async move {
            client.kill().await;
        });
        futures_util::future::join_all(kills).await;
    }

    /// Resume instance management after [`InstanceRegistry::stop_all`].
    pub fn reset(&self) {
        self.inner.stopped.store(false, Ordering::SeqCst);
    }

    /// Number of instances currently tracked.
    pub async fn instance_count(&self) -> usize {
        self.inner.instances.lock().await.len()
    }

    // ── Health checks ─────────────────────────────────────────────────────────

    /// Start the periodic sweep for disconnected instances.  Idempotent.
    pub async fn start_health_checks(&self) {
        let mut slot = self.inner.health_task.lock().await;
        if slot.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let registry = self.clone();
        let handle = tokio::spawn(
            async move {
                let mut ticker =
                    tokio::time::interval(registry.inner.config.health_check_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The first tick completes immediately; the sweep starts
                // one full interval in.
                ticker.tick().await;
                loop {
                    tokio::select! {
                        () = token.cancelled() => break,
                        _ = ticker.tick() => registry.sweep_disconnected().await,
                    }
                }
            }
            .instrument(info_span!("health_checks")),
        );
        *slot = Some(HealthTask {
            cancel,
            _handle: handle,
        });
    }

    /// Stop the periodic sweep.  Idempotent.
    pub async fn stop_health_checks(&self) {
        if let Some(task) = self.inner.health_task.lock().await.take() {
            task.cancel.cancel();
        }
    }

    /// Route every disconnected, non-restarting instance into the exit
    /// handling path.
    async fn sweep_disconnected(&self) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return;
        }
        let stale: Vec<String> = {
            let instances = self.inner.instances.lock().await;
            instances
                .iter()
                .filter(|(_, instance)| {
                    !instance.client.is_connected() && !instance.is_restarting
                })
                .map(|(key, _)| key.clone())
                .collect()
        };
        for key in stale {
            debug!(workspace = %key, "health check found disconnected instance");
            let registry = self.clone();
            tokio::spawn(async move {
                registry
                    .handle_instance_exit(&key, "health check found instance disconnected")
                    .await;
            });
        }
    }

    // ── Spawning ──────────────────────────────────────────────────────────────

    /// Join the in-flight spawn for `key`, creating it when absent.
    ///
    /// Returns a boxed future because this function is awaited from
    /// `handle_instance_exit`, which is itself reachable from the spawn
    /// path; the type erasure breaks that `async fn` cycle.
    fn spawn_shared(&self, key: String, workdir: PathBuf) -> BoxFuture<'_, Result<Arc<RpcClient>>> {
        Box::pin(async move {
            let spawn = {
                let mut pending = self.inner.pending_spawns.lock().await;
                if let Some(existing) = pending.get(&key) {
                    existing.clone()
                } else {
                    let registry = self.clone();
                    let task_key = key.clone();
                    // Run the spawn on its own task so it finishes its
                    // bookkeeping even if every waiter is dropped.
                    let task = tokio::spawn(async move {
                        registry.perform_spawn(task_key, workdir).await
                    });
                    let shared = async move {
                        match task.await {
                            Ok(outcome) => outcome,
                            Err(err) => {
                                Err(BridgeError::connection_with("spawn task failed", &err))
                            }
                        }
                    }
                    .boxed()
                    .shared();
                    pending.insert(key, shared.clone());
                    shared
                }
            };
            spawn.await
        })
    }

    /// Execute one spawn and clear its in-flight marker before the outcome
    /// becomes observable to waiters.
    async fn perform_spawn(self, key: String, workdir: PathBuf) -> Result<Arc<RpcClient>> {
        let outcome = self.spawn_and_register(&key, workdir).await;
        self.inner.pending_spawns.lock().await.remove(&key);
        if let Err(err) = &outcome {
            warn!(workspace = %key, %err, "spawn failed");
        }
        outcome
    }

    /// Spawn a fresh client for `key` and store it in the instance table.
    async fn spawn_and_register(&self, key: &str, workdir: PathBuf) -> Result<Arc<RpcClient>> {
        // A connected client may have appeared while this spawn was queued.
        {
            let instances = self.inner.instances.lock().await;
            if let Some(instance) = instances.get(key) {
                if instance.client.is_connected() {
                    return Ok(Arc::clone(&instance.client));
                }
            }
        }

        let client = Arc::new(RpcClient::new(
            self.inner.config.exe_path.clone(),
            workdir.clone(),
            self.inner.config.client.clone(),
        ));

        if let Some(exit_rx) = client.take_exit_signal().await {
            let registry = self.clone();
            let exit_key = key.to_owned();
            tokio::spawn(async move {
                if let Ok(event) = exit_rx.await {
                    registry.handle_instance_exit(&exit_key, &event.reason).await;
                }
            });
        }

        client.spawn().await?;

        let mut instances = self.inner.instances.lock().await;
        if let Some(instance) = instances.get_mut(key) {
            let replaced = std::mem::replace(&mut instance.client, Arc::clone(&client));
            instance.workdir = workdir;
            instance.restart_attempts = 0;
            instance.is_restarting = false;
            instance.backoff.reset();
            // The previous child may still be half-alive with its stdout
            // closed; make sure it is gone.
            tokio::spawn(async move {
                replaced.kill().await;
            });
        } else {
            instances.insert(
                key.to_owned(),
                Instance {
                    client: Arc::clone(&client),
                    workdir,
                    backoff: self.new_backoff(),
                    restart_attempts: 0,
                    is_restarting: false,
                },
            );
        }
        Ok(client)
    }

    fn new_backoff(&self) -> Backoff {
        Backoff::new(
            self.inner.config.backoff_initial,
            self.inner.config.backoff_multiplier,
            self.inner.config.backoff_max,
        )
    }

    // ── Restart machine ───────────────────────────────────────────────────────

    /// React to an instance losing its child process.
    ///
    /// At most one restart is active per instance: the first report claims
    /// the `is_restarting` flag and later reports coalesce into it.  An
    /// instance whose attempt budget is spent is evicted instead.
    async fn handle_instance_exit(&self, key: &str, reason: &str) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return;
        }

        let (delay, attempt, workdir) = {
            let mut instances = self.inner.instances.lock().await;
            let Some(instance) = instances.get_mut(key) else {
                return;
            };
            if instance.client.is_connected() {
                // Stale report about an already-replaced child.
                return;
            }
            if instance.is_restarting {
                return;
            }
            let max = self.inner.config.max_restart_attempts;
            if instance.restart_attempts >= max {
                instances.remove(key);
                warn!(
                    workspace = %key,
                    attempts = max,
                    "giving up on instance after repeated restart failures"
                );
                return;
            }
            instance.is_restarting = true;
            instance.restart_attempts += 1;
            let delay = instance.backoff.next_delay();
            (delay, instance.restart_attempts, instance.workdir.clone())
        };

        info!(
            workspace = %key,
            attempt,
            max = self.inner.config.max_restart_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            reason,
            "scheduling instance restart"
        );
        tokio::time::sleep(delay).await;

        if self.inner.stopped.load(Ordering::SeqCst) {
            return;
        }
        {
            let instances = self.inner.instances.lock().await;
            let Some(instance) = instances.get(key) else {
                return;
            };
            if !instance.is_restarting {
                // Somebody respawned or stopped the instance while this
                // restart was sleeping.
                return;
            }
        }

        match self.spawn_shared(key.to_owned(), workdir).await {
            Ok(_) => info!(workspace = %key, attempt, "instance restarted"),
            Err(err) => {
                warn!(workspace = %key, attempt, %err, "restart attempt failed");
                let mut instances = self.inner.instances.lock().await;
                if let Some(instance) = instances.get_mut(key) {
                    instance.is_restarting = false;
                }
            }
        }
    }
}

// ── Workspace keys ────────────────────────────────────────────────────────────

/// Normalize a workspace path into its registry key.
///
/// Relative paths are resolved against the current directory, `.` and `..`
/// segments are folded lexically, and the result is lower-cased so paths
/// differing only in case or separators share one instance.
#[must_use]
pub fn normalize_workspace_key(workdir: &Path) -> String {
    let absolute = if workdir.is_absolute() {
        workdir.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(workdir))
            .unwrap_or_else(|_| workdir.to_path_buf())
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let _ = normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized.to_string_lossy().to_lowercase()
}
