//! Integration tests for the bridge service lifecycle.

use std::time::Duration;

use repoql_bridge::lifecycle::InstanceRegistry;
use repoql_bridge::service::BridgeService;

use super::support::{self, FakeRepoql, IMMEDIATE_EXIT_SERVER, RESPONSIVE_SERVER};

fn service_for(fake: &FakeRepoql) -> BridgeService {
    let registry = InstanceRegistry::new(support::fast_registry_config(fake.exe()));
    BridgeService::new(registry, fake.workspace())
}

/// Starting the service brings the default workspace up before the first
/// tool call arrives.
#[tokio::test]
async fn start_warms_the_default_workspace() {
    let fake = FakeRepoql::install(RESPONSIVE_SERVER);
    let service = service_for(&fake);

    service.start().await;

    assert_eq!(fake.spawn_count(), 1);
    assert_eq!(service.registry().instance_count().await, 1);

    let client = service
        .registry()
        .get_instance(&fake.workspace())
        .await
        .expect("the warmed instance must be served from the table");
    assert!(client.is_connected());
    assert_eq!(fake.spawn_count(), 1, "the warm instance must be reused");

    service.stop().await;
}

/// A workspace that cannot be warmed does not prevent startup; the spawn
/// is retried on the first tool call.
#[tokio::test]
async fn start_tolerates_a_failed_warm_up() {
    let fake = FakeRepoql::install(IMMEDIATE_EXIT_SERVER);
    let service = service_for(&fake);

    service.start().await;

    assert_eq!(fake.spawn_count(), 1);
    assert_eq!(service.registry().instance_count().await, 0);

    service.stop().await;
}

#[tokio::test]
async fn stop_kills_children_and_a_later_request_resumes() {
    let fake = FakeRepoql::install(RESPONSIVE_SERVER);
    let service = service_for(&fake);

    service.start().await;
    let client = service
        .registry()
        .get_instance(&fake.workspace())
        .await
        .expect("warmed instance");

    service.stop().await;
    assert!(!client.is_connected(), "stop must kill the warm child");

    // Stopped means stopped: no supervision brings the child back.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(fake.spawn_count(), 1);

    // The registry resumes on demand after a stop.
    let resumed = service
        .registry()
        .get_instance(&fake.workspace())
        .await
        .expect("a request after stop must resume the registry");
    assert!(resumed.is_connected());
    assert_eq!(fake.spawn_count(), 2);

    service.stop().await;
}

/// Start after stop is a full restart cycle.
#[tokio::test]
async fn restart_cycle_brings_the_workspace_back() {
    let fake = FakeRepoql::install(RESPONSIVE_SERVER);
    let service = service_for(&fake);

    service.start().await;
    service.stop().await;
    service.start().await;

    assert_eq!(fake.spawn_count(), 2);
    let client = service
        .registry()
        .get_instance(&fake.workspace())
        .await
        .expect("the restarted workspace must serve");
    assert!(client.is_connected());

    service.stop().await;
}
