//! Shared helpers for the integration suite.
//!
//! Each test installs a fake RepoQL executable (a small shell script) into
//! its own temp directory and points the bridge at it.  The scripts speak
//! just enough NDJSON JSON-RPC to cover the behavior under test and append
//! one line to `spawn_count` per start, so tests can observe how many times
//! the bridge launched them.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;

use repoql_bridge::lifecycle::RegistryConfig;
use repoql_bridge::rpc::RpcClientOptions;

/// Answers the handshake and every `tools/call` with a small text result.
pub const RESPONSIVE_SERVER: &str = r##"#!/bin/sh
dir=$(dirname "$0")
echo x >> "$dir/spawn_count"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake-repoql","version":"0.0.0"}}}\n' "$id"
      ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"ok"}],"isError":false}}\n' "$id"
      ;;
  esac
done
"##;

/// Answers the handshake, then every `tools/call` with a JSON-RPC error.
pub const ERROR_SERVER: &str = r##"#!/bin/sh
dir=$(dirname "$0")
echo x >> "$dir/spawn_count"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake-repoql","version":"0.0.0"}}}\n' "$id"
      ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32000,"message":"boom","data":{"hint":"check the sql"}}}\n' "$id"
      ;;
  esac
done
"##;

/// Answers the handshake and then never responds to anything.
pub const SILENT_SERVER: &str = r##"#!/bin/sh
dir=$(dirname "$0")
echo x >> "$dir/spawn_count"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake-repoql","version":"0.0.0"}}}\n' "$id"
      ;;
  esac
done
"##;

/// Exits before reading anything; every spawn fails.
pub const IMMEDIATE_EXIT_SERVER: &str = r##"#!/bin/sh
dir=$(dirname "$0")
echo x >> "$dir/spawn_count"
exit 7
"##;

/// First run completes the handshake and then exits; later runs serve
/// normally.  Exercises the restart-on-exit path.
pub const DIES_ONCE_SERVER: &str = r##"#!/bin/sh
dir=$(dirname "$0")
echo x >> "$dir/spawn_count"
n=$(wc -l < "$dir/spawn_count")
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake-repoql","version":"0.0.0"}}}\n' "$id"
      ;;
    *'"method":"notifications/initialized"'*)
      if [ "$n" -eq 1 ]; then
        sleep 0.2
        exit 5
      fi
      ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"ok"}],"isError":false}}\n' "$id"
      ;;
  esac
done
"##;

/// First run completes the handshake and then exits; later runs exit
/// immediately, so every restart attempt fails.  Exercises eviction.
pub const SERVES_ONCE_THEN_FAILS_SERVER: &str = r##"#!/bin/sh
dir=$(dirname "$0")
echo x >> "$dir/spawn_count"
n=$(wc -l < "$dir/spawn_count")
if [ "$n" -gt 1 ]; then
  exit 7
fi
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake-repoql","version":"0.0.0"}}}\n' "$id"
      ;;
    *'"method":"notifications/initialized"'*)
      sleep 0.2
      exit 5
      ;;
  esac
done
"##;

/// First run closes its stdout after the handshake but stays alive; later
/// runs serve normally.  Exercises the health sweep, which has to notice a
/// child that is running but unusable.
pub const STDOUT_CLOSING_SERVER: &str = r##"#!/bin/sh
dir=$(dirname "$0")
echo x >> "$dir/spawn_count"
n=$(wc -l < "$dir/spawn_count")
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake-repoql","version":"0.0.0"}}}\n' "$id"
      ;;
    *'"method":"notifications/initialized"'*)
      if [ "$n" -eq 1 ]; then
        exec 1>&-
        sleep 60
      fi
      ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"ok"}],"isError":false}}\n' "$id"
      ;;
  esac
done
"##;

/// Sleeps before serving, so concurrent callers pile up on one spawn.
pub const SLOW_START_SERVER: &str = r##"#!/bin/sh
dir=$(dirname "$0")
echo x >> "$dir/spawn_count"
sleep 0.3
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake-repoql","version":"0.0.0"}}}\n' "$id"
      ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"ok"}],"isError":false}}\n' "$id"
      ;;
  esac
done
"##;

/// Delays its first `tools/call` response past any short timeout, then
/// serves promptly.  Exercises late-response handling.
pub const LATE_ONCE_SERVER: &str = r##"#!/bin/sh
dir=$(dirname "$0")
echo x >> "$dir/spawn_count"
calls=0
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake-repoql","version":"0.0.0"}}}\n' "$id"
      ;;
    *'"method":"tools/call"'*)
      calls=$((calls+1))
      if [ "$calls" -eq 1 ]; then
        sleep 0.5
      fi
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"ok"}],"isError":false}}\n' "$id"
      ;;
  esac
done
"##;

/// Exits as soon as a `tools/call` arrives, leaving the request unanswered.
pub const EXITS_ON_CALL_SERVER: &str = r##"#!/bin/sh
dir=$(dirname "$0")
echo x >> "$dir/spawn_count"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake-repoql","version":"0.0.0"}}}\n' "$id"
      ;;
    *'"method":"tools/call"'*)
      exit 3
      ;;
  esac
done
"##;

/// Prints a non-JSON line before each `tools/call` response.
pub const GARBAGE_THEN_OK_SERVER: &str = r##"#!/bin/sh
dir=$(dirname "$0")
echo x >> "$dir/spawn_count"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake-repoql","version":"0.0.0"}}}\n' "$id"
      ;;
    *'"method":"tools/call"'*)
      printf 'this is not json\n'
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"ok"}],"isError":false}}\n' "$id"
      ;;
  esac
done
"##;

/// A fake RepoQL installation: the script, a workspace directory, and the
/// spawn counter, all inside one temp directory.
pub struct FakeRepoql {
    dir: TempDir,
}

impl FakeRepoql {
    /// Write `script` as an executable named `repoql` and create an empty
    /// workspace directory next to it.
    pub fn install(script: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let exe = dir.path().join("repoql");
        fs::write(&exe, script).expect("write fake executable");
        let mut perms = fs::metadata(&exe).expect("stat fake executable").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&exe, perms).expect("chmod fake executable");
        fs::create_dir(dir.path().join("ws")).expect("create workspace dir");
        Self { dir }
    }

    pub fn exe(&self) -> PathBuf {
        self.dir.path().join("repoql")
    }

    pub fn workspace(&self) -> PathBuf {
        self.dir.path().join("ws")
    }

    /// How many times the script has been started.
    pub fn spawn_count(&self) -> usize {
        fs::read_to_string(self.dir.path().join("spawn_count"))
            .map(|contents| contents.lines().count())
            .unwrap_or(0)
    }
}

/// Client options with test-friendly timeouts.
pub fn client_options() -> RpcClientOptions {
    RpcClientOptions {
        initialize_timeout: Duration::from_secs(5),
        kill_grace: Duration::from_millis(500),
    }
}

/// Registry settings tightened so supervision is observable within a test.
pub fn fast_registry_config(exe: PathBuf) -> RegistryConfig {
    let mut config = RegistryConfig::new(exe);
    config.health_check_interval = Duration::from_millis(100);
    config.max_restart_attempts = 2;
    config.backoff_initial = Duration::from_millis(50);
    config.backoff_max = Duration::from_millis(200);
    config.client = client_options();
    config
}

/// Poll until the script has been started at least `expected` times.
pub async fn wait_for_spawn_count(fake: &FakeRepoql, expected: usize) {
    for _ in 0..200 {
        if fake.spawn_count() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!(
        "spawn count never reached {expected}, still at {}",
        fake.spawn_count()
    );
}
