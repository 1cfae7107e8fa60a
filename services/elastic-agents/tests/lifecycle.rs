//! Integration tests for the worker lifecycle engine.
//!
//! Drives `AgentInstances` against `MockCluster` with a `ManualClock`:
//! 1. create / terminate keep cache and cluster in step
//! 2. refresh seeds the cache from the cluster exactly once
//! 3. the timeout scans flag and reclaim workers that never registered

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use kea_elastic_agents::pod::{
    CREATED_AT_LABEL_KEY, ENVIRONMENT_LABEL_KEY, KIND_LABEL_KEY, KIND_LABEL_VALUE,
};
use kea_elastic_agents::{
    Agent, AgentDirectory, AgentInstances, Agents, ClusterError, CreateAgentRequest,
    InstanceError, KnownAgents, MockCluster, Settings, Unit,
};
use kea_id::WorkerName;
use kea_reconcile::ManualClock;
use rstest::rstest;

const PERIOD_MINUTES: u32 = 10;

fn period() -> TimeDelta {
    TimeDelta::minutes(i64::from(PERIOD_MINUTES))
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

struct Harness {
    clock: Arc<ManualClock>,
    cluster: Arc<MockCluster>,
    instances: Arc<AgentInstances>,
    settings: Settings,
}

fn harness() -> Harness {
    init_tracing();
    let clock = Arc::new(ManualClock::new(t0()));
    let cluster = Arc::new(MockCluster::with_clock(clock.clone()));
    let instances = Arc::new(AgentInstances::with_clock(cluster.factory(), clock.clone()));
    let settings = Settings::new(
        "https://ci.example.com/go",
        "https://k8s.example.com",
        PERIOD_MINUTES,
    );

    Harness {
        clock,
        cluster,
        instances,
        settings,
    }
}

fn request(properties: &[(&str, &str)], environment: Option<&str>) -> CreateAgentRequest {
    CreateAgentRequest::new(
        "register-key",
        properties
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        environment.map(str::to_string),
    )
}

fn image_request() -> CreateAgentRequest {
    request(&[("Image", "app:1.0")], None)
}

fn owned_unit(name: &str, created_at: DateTime<Utc>) -> Unit {
    Unit {
        name: name.to_string(),
        created_at: Some(created_at),
        labels: BTreeMap::from([(KIND_LABEL_KEY.to_string(), KIND_LABEL_VALUE.to_string())]),
        annotations: BTreeMap::new(),
    }
}

fn known(names: &[&str]) -> Agents {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| Agent::new(format!("uuid-{i}"), *name))
        .collect()
}

// =============================================================================
// create
// =============================================================================

#[tokio::test]
async fn test_create_registers_worker() {
    let h = harness();

    let record = h
        .instances
        .create(&image_request(), &h.settings)
        .await
        .unwrap();

    assert!(record.name().starts_with("k8s-elastic-agent-"));
    assert!(WorkerName::parse(record.name()).is_ok());
    assert_eq!(record.environment(), None);
    assert_eq!(record.properties().get("Image").unwrap(), "app:1.0");
    assert_eq!(record.created_at(), t0());

    assert!(h.instances.has(record.name()).await);
    assert_eq!(h.instances.find(record.name()).await, Some(record.clone()));
    let unit = h.cluster.unit(record.name()).unwrap();
    assert_eq!(
        unit.labels.get(CREATED_AT_LABEL_KEY).unwrap(),
        &t0().timestamp_millis().to_string()
    );
}

#[tokio::test]
async fn test_create_with_environment() {
    let h = harness();

    let record = h
        .instances
        .create(&request(&[("Image", "app")], Some("prod")), &h.settings)
        .await
        .unwrap();

    assert_eq!(record.environment(), Some("prod"));
    let unit = h.cluster.unit(record.name()).unwrap();
    assert_eq!(unit.labels.get(ENVIRONMENT_LABEL_KEY).unwrap(), "prod");
}

#[tokio::test]
async fn test_create_names_are_unique() {
    let h = harness();

    let a = h.instances.create(&image_request(), &h.settings).await.unwrap();
    let b = h.instances.create(&image_request(), &h.settings).await.unwrap();

    assert_ne!(a, b);
    assert_eq!(h.instances.instances().await.len(), 2);
}

#[tokio::test]
async fn test_create_without_image_is_rejected() {
    let h = harness();

    let err = h
        .instances
        .create(&request(&[("MaxMemory", "1G")], None), &h.settings)
        .await
        .unwrap_err();

    assert_eq!(err.as_validation().unwrap().key, "Image");
    assert!(h.instances.instances().await.is_empty());
    assert_eq!(h.cluster.connect_calls(), 0);
    assert_eq!(h.cluster.create_calls(), 0);
}

#[tokio::test]
async fn test_create_cluster_failure_leaves_no_state() {
    let h = harness();
    h.cluster.set_fail_create(true);

    let err = h
        .instances
        .create(&image_request(), &h.settings)
        .await
        .unwrap_err();

    assert!(matches!(err, InstanceError::Cluster(ClusterError::Api { .. })));
    assert!(h.instances.instances().await.is_empty());
    assert!(h.cluster.unit_names().is_empty());
}

// =============================================================================
// terminate
// =============================================================================

#[tokio::test]
async fn test_terminate_unknown_is_noop() {
    let h = harness();

    h.instances.terminate("w-unknown", &h.settings).await.unwrap();

    assert_eq!(h.cluster.connect_calls(), 0);
    assert_eq!(h.cluster.delete_calls(), 0);
}

#[tokio::test]
async fn test_terminate_removes_worker() {
    let h = harness();
    let record = h.instances.create(&image_request(), &h.settings).await.unwrap();

    h.instances.terminate(record.name(), &h.settings).await.unwrap();

    assert!(!h.instances.has(record.name()).await);
    assert!(h.instances.find(record.name()).await.is_none());
    assert!(!h.cluster.has_unit(record.name()));

    // Terminated is absorbing.
    h.instances.terminate(record.name(), &h.settings).await.unwrap();
    assert_eq!(h.cluster.delete_calls(), 1);
}

#[tokio::test]
async fn test_terminate_when_pod_already_gone() {
    let h = harness();
    let record = h.instances.create(&image_request(), &h.settings).await.unwrap();
    h.cluster.remove_unit(record.name());

    h.instances.terminate(record.name(), &h.settings).await.unwrap();

    assert!(!h.instances.has(record.name()).await);
}

#[tokio::test]
async fn test_terminate_delete_failure_keeps_worker() {
    let h = harness();
    let record = h.instances.create(&image_request(), &h.settings).await.unwrap();
    h.cluster.fail_delete_for(record.name());

    let result = h.instances.terminate(record.name(), &h.settings).await;

    assert!(matches!(result, Err(InstanceError::Cluster(_))));
    assert!(h.instances.has(record.name()).await);

    h.cluster.clear_failures();
    h.instances.terminate(record.name(), &h.settings).await.unwrap();
    assert!(!h.instances.has(record.name()).await);
}

// =============================================================================
// refresh_all
// =============================================================================

#[tokio::test]
async fn test_refresh_seeds_owned_workers() {
    let h = harness();
    let created = t0() - TimeDelta::hours(1);

    let mut with_env = owned_unit("w1", created);
    with_env
        .labels
        .insert(ENVIRONMENT_LABEL_KEY.to_string(), "prod".to_string());
    with_env
        .annotations
        .insert("Image".to_string(), "app:2".to_string());
    h.cluster.insert_unit(with_env);
    h.cluster.insert_unit(owned_unit("w2", created));
    h.cluster.insert_unit(Unit {
        name: "unrelated".to_string(),
        created_at: Some(created),
        labels: BTreeMap::from([("app".to_string(), "web".to_string())]),
        annotations: BTreeMap::new(),
    });

    h.instances.refresh_all(&h.settings).await.unwrap();

    assert!(h.instances.is_refreshed().await);
    assert!(h.instances.has("w1").await);
    assert!(h.instances.has("w2").await);
    assert!(!h.instances.has("unrelated").await);

    let w1 = h.instances.find("w1").await.unwrap();
    assert_eq!(w1.created_at(), created);
    assert_eq!(w1.environment(), Some("prod"));
    assert_eq!(w1.properties().get("Image").unwrap(), "app:2");
}

#[tokio::test]
async fn test_refresh_runs_once() {
    let h = harness();
    h.cluster.insert_unit(owned_unit("w1", t0()));

    h.instances.refresh_all(&h.settings).await.unwrap();

    // Changes in the cluster after the first refresh are ignored.
    h.cluster.insert_unit(owned_unit("w2", t0()));
    h.cluster.remove_unit("w1");
    h.instances.refresh_all(&h.settings).await.unwrap();

    assert_eq!(h.cluster.list_calls(), 1);
    assert!(h.instances.has("w1").await);
    assert!(!h.instances.has("w2").await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_refresh_lists_once() {
    let h = harness();
    h.cluster.insert_unit(owned_unit("w1", t0()));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let instances = Arc::clone(&h.instances);
        let settings = h.settings.clone();
        handles.push(tokio::spawn(async move {
            instances.refresh_all(&settings).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(h.cluster.list_calls(), 1);
    assert!(h.instances.has("w1").await);
}

#[tokio::test]
async fn test_refresh_of_empty_cluster_still_counts() {
    let h = harness();

    h.instances.refresh_all(&h.settings).await.unwrap();
    h.cluster.insert_unit(owned_unit("w1", t0()));
    h.instances.refresh_all(&h.settings).await.unwrap();

    assert!(h.instances.is_refreshed().await);
    assert_eq!(h.cluster.list_calls(), 1);
    assert!(!h.instances.has("w1").await);
}

#[tokio::test]
async fn test_refresh_failure_allows_retry() {
    let h = harness();
    h.cluster.insert_unit(owned_unit("w1", t0()));
    h.cluster.set_fail_list(true);

    assert!(h.instances.refresh_all(&h.settings).await.is_err());
    assert!(!h.instances.is_refreshed().await);
    assert!(!h.instances.has("w1").await);

    h.cluster.clear_failures();
    h.instances.refresh_all(&h.settings).await.unwrap();

    assert!(h.instances.is_refreshed().await);
    assert!(h.instances.has("w1").await);
    assert_eq!(h.cluster.list_calls(), 2);
}

// =============================================================================
// instances_created_after_timeout
// =============================================================================

#[rstest]
#[case::before_grace_period(period() - TimeDelta::seconds(1), false)]
#[case::after_grace_period(period() + TimeDelta::seconds(1), true)]
#[tokio::test]
async fn test_created_after_timeout_boundary(#[case] age: TimeDelta, #[case] expected: bool) {
    let h = harness();
    let record = h.instances.create(&image_request(), &h.settings).await.unwrap();
    let agents = known(&[record.name()]);

    h.clock.advance(age);
    let stale = h
        .instances
        .instances_created_after_timeout(&h.settings, &agents)
        .await;

    assert_eq!(stale.contains_agent_with_id(record.name()), expected);
    assert_eq!(stale.len(), usize::from(expected));
}

#[tokio::test]
async fn test_created_after_timeout_skips_untracked_agents() {
    let h = harness();
    let agents = known(&["static-agent"]);

    h.clock.advance(period() * 10);
    let stale = h
        .instances
        .instances_created_after_timeout(&h.settings, &agents)
        .await;

    assert!(stale.is_empty());
}

// =============================================================================
// terminate_unregistered_instances
// =============================================================================

#[rstest]
#[case::before_grace_period(period() - TimeDelta::seconds(1), false)]
#[case::after_grace_period(period() + TimeDelta::seconds(1), true)]
#[tokio::test]
async fn test_unregistered_boundary(#[case] age: TimeDelta, #[case] terminated: bool) {
    let h = harness();
    let record = h.instances.create(&image_request(), &h.settings).await.unwrap();

    h.clock.advance(age);
    let report = h
        .instances
        .terminate_unregistered_instances(&h.settings, &Agents::default())
        .await
        .unwrap();

    assert_eq!(report.terminated.len(), usize::from(terminated));
    assert_eq!(h.instances.has(record.name()).await, !terminated);
    assert_eq!(h.cluster.has_unit(record.name()), !terminated);
}

#[tokio::test]
async fn test_only_old_unregistered_workers_are_terminated() {
    let h = harness();
    let w1 = h.instances.create(&image_request(), &h.settings).await.unwrap();
    h.clock.advance(period() * 2);
    let w2 = h.instances.create(&image_request(), &h.settings).await.unwrap();

    let report = h
        .instances
        .terminate_unregistered_instances(&h.settings, &Agents::default())
        .await
        .unwrap();

    assert_eq!(report.terminated, vec![w1.name().to_string()]);
    assert!(!h.instances.has(w1.name()).await);
    assert!(h.instances.has(w2.name()).await);
    assert!(h.cluster.has_unit(w2.name()));
}

#[tokio::test]
async fn test_registered_workers_are_exempt() {
    let h = harness();
    let record = h.instances.create(&image_request(), &h.settings).await.unwrap();
    let agents = known(&[record.name()]);

    h.clock.advance(TimeDelta::days(30));
    let report = h
        .instances
        .terminate_unregistered_instances(&h.settings, &agents)
        .await
        .unwrap();

    assert!(report.is_empty());
    assert!(h.instances.has(record.name()).await);
    assert_eq!(h.cluster.get_calls(), 0);
}

#[tokio::test]
async fn test_age_comes_from_live_pod() {
    let h = harness();
    let record = h.instances.create(&image_request(), &h.settings).await.unwrap();

    // The pod was recreated under the same name well after the cached record.
    h.clock.advance(period() * 3);
    h.cluster
        .insert_unit(owned_unit(record.name(), t0() + period() * 3));
    h.clock.advance(TimeDelta::minutes(1));

    let report = h
        .instances
        .terminate_unregistered_instances(&h.settings, &Agents::default())
        .await
        .unwrap();

    assert!(report.terminated.is_empty());
    assert!(h.instances.has(record.name()).await);
}

#[tokio::test]
async fn test_candidate_failures_do_not_stop_the_sweep() {
    let h = harness();
    let w1 = h.instances.create(&image_request(), &h.settings).await.unwrap();
    let w2 = h.instances.create(&image_request(), &h.settings).await.unwrap();
    let w3 = h.instances.create(&image_request(), &h.settings).await.unwrap();
    h.cluster.fail_get_for(w1.name());
    h.cluster.fail_delete_for(w2.name());

    h.clock.advance(period() * 2);
    let report = h
        .instances
        .terminate_unregistered_instances(&h.settings, &Agents::default())
        .await
        .unwrap();

    let mut failed = report.failed.clone();
    failed.sort();
    let mut expected = vec![w1.name().to_string(), w2.name().to_string()];
    expected.sort();
    assert_eq!(failed, expected);
    assert_eq!(report.terminated, vec![w3.name().to_string()]);

    assert!(h.instances.has(w1.name()).await);
    assert!(h.instances.has(w2.name()).await);
    assert!(!h.instances.has(w3.name()).await);
}

#[tokio::test]
async fn test_externally_removed_pods_are_forgotten() {
    let h = harness();
    let record = h.instances.create(&image_request(), &h.settings).await.unwrap();
    h.cluster.remove_unit(record.name());

    let report = h
        .instances
        .terminate_unregistered_instances(&h.settings, &Agents::default())
        .await
        .unwrap();

    assert_eq!(report.evicted, vec![record.name().to_string()]);
    assert!(!h.instances.has(record.name()).await);
    assert_eq!(h.cluster.delete_calls(), 0);
}

/// Reports an agent as unknown on the first lookup and known afterwards,
/// as if it registered while the sweep was reading pods.
struct RegistersDuringSweep {
    name: String,
    lookups: AtomicUsize,
}

impl KnownAgents for RegistersDuringSweep {
    fn contains_agent_with_id(&self, elastic_agent_id: &str) -> bool {
        if elastic_agent_id != self.name {
            return false;
        }
        self.lookups.fetch_add(1, Ordering::SeqCst) > 0
    }
}

#[tokio::test]
async fn test_worker_registering_mid_sweep_is_spared() {
    let h = harness();
    let record = h.instances.create(&image_request(), &h.settings).await.unwrap();
    let agents = RegistersDuringSweep {
        name: record.name().to_string(),
        lookups: AtomicUsize::new(0),
    };

    h.clock.advance(period() * 2);
    let report = h
        .instances
        .terminate_unregistered_instances(&h.settings, &agents)
        .await
        .unwrap();

    assert_eq!(report.spared, vec![record.name().to_string()]);
    assert!(report.terminated.is_empty());
    assert!(h.instances.has(record.name()).await);
    assert!(h.cluster.has_unit(record.name()));
}

#[tokio::test]
async fn test_unregistered_scan_surfaces_connect_failure() {
    let h = harness();
    h.instances.create(&image_request(), &h.settings).await.unwrap();
    h.cluster.set_fail_connect(true);

    let result = h
        .instances
        .terminate_unregistered_instances(&h.settings, &Agents::default())
        .await;

    assert!(matches!(result, Err(InstanceError::Cluster(ClusterError::Config(_)))));
}

struct Offline;

#[async_trait::async_trait]
impl AgentDirectory for Offline {
    async fn known_agents(&self) -> anyhow::Result<Agents> {
        anyhow::bail!("server offline")
    }
}

#[tokio::test]
async fn test_reclaim_from_directory() {
    let h = harness();
    let old = h.instances.create(&image_request(), &h.settings).await.unwrap();
    let kept = h.instances.create(&image_request(), &h.settings).await.unwrap();
    let directory = known(&[kept.name()]);

    h.clock.advance(period() * 2);
    let report = h
        .instances
        .reclaim_unregistered(&h.settings, &directory)
        .await
        .unwrap();

    assert_eq!(report.terminated, vec![old.name().to_string()]);
    assert!(h.instances.has(kept.name()).await);
}

#[tokio::test]
async fn test_reclaim_without_directory_touches_nothing() {
    let h = harness();
    let record = h.instances.create(&image_request(), &h.settings).await.unwrap();

    h.clock.advance(period() * 2);
    let result = h.instances.reclaim_unregistered(&h.settings, &Offline).await;

    assert!(matches!(result, Err(InstanceError::Directory(_))));
    assert!(h.instances.has(record.name()).await);
    assert_eq!(h.cluster.get_calls(), 0);
    assert_eq!(h.cluster.delete_calls(), 0);
}
