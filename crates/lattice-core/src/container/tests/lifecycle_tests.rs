use std::sync::Arc;

use super::support::*;
use crate::container::batch::{ServiceBatch, ServiceSpec};
use crate::container::error::Error;
use crate::container::{ContainerConfig, ServiceContainer};
use crate::controller::error::StartError;
use crate::controller::state::{Mode, ServiceState};

#[tokio::test]
async fn test_active_service_starts_and_exposes_value() {
    let container = ServiceContainer::new();
    let (counters, behavior) = probe(7);
    container
        .register_service(ServiceSpec::new("db", behavior))
        .unwrap();

    await_up(&container, &name("db")).await;
    assert_eq!(counters.starts(), 1);
    assert_eq!(counters.stops(), 0);

    let value = container.get_value_as::<u32>(&name("db")).unwrap();
    assert_eq!(*value, 7);
}

#[tokio::test]
async fn test_dependency_chain_starts_in_order() {
    let container = ServiceContainer::new();
    let (events, listener) = recording_listener();
    container.subscribe_all(listener).await;

    let (_, db) = probe(1);
    let (_, cache) = probe(2);
    container
        .install_batch(
            ServiceBatch::new()
                .add(ServiceSpec::new("db", db))
                .add(ServiceSpec::new("cache", cache).requires("db")),
        )
        .unwrap();

    await_up(&container, &name("cache")).await;
    settle().await;

    // The dependent may pass through WAITING while the dependency starts;
    // only the relative order of the start transitions is guaranteed.
    let order = filtered(
        &events,
        &["db:STARTING", "db:UP", "cache:STARTING", "cache:UP"],
    );
    assert_eq!(order, vec!["db:STARTING", "db:UP", "cache:STARTING", "cache:UP"]);
}

#[tokio::test]
async fn test_required_dependency_failure_propagates() {
    let container = ServiceContainer::new();
    let (db_counters, db) = probe_failing_first(1, usize::MAX);
    let (cache_counters, cache) = probe(2);
    container
        .install_batch(
            ServiceBatch::new()
                .add(ServiceSpec::new("db", db))
                .add(ServiceSpec::new("cache", cache).requires("db")),
        )
        .unwrap();

    await_state(&container, &name("db"), ServiceState::StartFailed).await;
    await_state(&container, &name("cache"), ServiceState::StartFailed).await;

    // The dependent is rolled back without its behavior ever running.
    assert_eq!(db_counters.starts(), 1);
    assert_eq!(cache_counters.starts(), 0);

    match container.start_failure(&name("cache")).unwrap() {
        Some(StartError::DependencyFailed(dep)) => assert_eq!(dep.as_str(), "db"),
        other => panic!("unexpected failure cause: {:?}", other),
    }
}

#[tokio::test]
async fn test_failure_leaves_sibling_subtree_untouched() {
    let container = ServiceContainer::new();
    let (_, broken) = probe_failing_first(0, usize::MAX);
    let (_, healthy) = probe(1);
    let (_, leaf) = probe(2);
    container
        .install_batch(
            ServiceBatch::new()
                .add(ServiceSpec::new("broken", broken))
                .add(ServiceSpec::new("healthy", healthy))
                .add(ServiceSpec::new("leaf", leaf).requires("healthy")),
        )
        .unwrap();

    await_state(&container, &name("broken"), ServiceState::StartFailed).await;
    await_up(&container, &name("leaf")).await;
    assert_eq!(
        container.state(&name("healthy")).unwrap(),
        ServiceState::Up
    );
}

#[tokio::test]
async fn test_on_demand_node_started_by_dependent() {
    let container = ServiceContainer::new();
    let (svc_counters, svc) = probe(1);
    container
        .register_service(ServiceSpec::new("svc", svc).mode(Mode::OnDemand))
        .unwrap();

    // Nobody demands it yet.
    settle().await;
    assert_eq!(container.state(&name("svc")).unwrap(), ServiceState::Down);
    assert_eq!(svc_counters.starts(), 0);

    let (_, app) = probe(2);
    container
        .register_service(ServiceSpec::new("app", app).requires("svc"))
        .unwrap();

    await_up(&container, &name("app")).await;
    assert_eq!(container.state(&name("svc")).unwrap(), ServiceState::Up);

    // Removing the only dependent releases the demand and stops the node.
    container.remove_service(&name("app")).await.unwrap();
    await_state(&container, &name("svc"), ServiceState::Down).await;
    assert_eq!(svc_counters.stops(), 1);
}

#[tokio::test]
async fn test_external_demand_round_trip() {
    let container = ServiceContainer::new();
    let (_, svc) = probe(1);
    container
        .register_service(ServiceSpec::new("svc", svc).mode(Mode::OnDemand))
        .unwrap();

    container.demand(&name("svc")).unwrap();
    await_up(&container, &name("svc")).await;

    container.demand(&name("svc")).unwrap();
    container.undemand(&name("svc")).unwrap();
    settle().await;
    // One unit is still held.
    assert_eq!(container.state(&name("svc")).unwrap(), ServiceState::Up);

    container.undemand(&name("svc")).unwrap();
    await_state(&container, &name("svc"), ServiceState::Down).await;
}

#[tokio::test]
async fn test_never_mode_stays_down() {
    let container = ServiceContainer::new();
    let (counters, svc) = probe(1);
    container
        .register_service(ServiceSpec::new("svc", svc).mode(Mode::Never))
        .unwrap();

    container.demand(&name("svc")).unwrap();
    settle().await;
    assert_eq!(container.state(&name("svc")).unwrap(), ServiceState::Down);
    assert_eq!(counters.starts(), 0);
}

#[tokio::test]
async fn test_set_mode_never_stops_running_service() {
    let container = ServiceContainer::new();
    let (counters, svc) = probe(1);
    container
        .register_service(ServiceSpec::new("svc", svc))
        .unwrap();
    await_up(&container, &name("svc")).await;

    container.set_mode(&name("svc"), Mode::Never).unwrap();
    await_state(&container, &name("svc"), ServiceState::Down).await;
    assert_eq!(counters.stops(), 1);
}

#[tokio::test]
async fn test_set_mode_to_current_mode_is_a_noop() {
    let container = ServiceContainer::new();
    let (counters, svc) = probe(1);
    container
        .register_service(ServiceSpec::new("svc", svc))
        .unwrap();
    await_up(&container, &name("svc")).await;
    // Let the startup transitions drain before the recorder subscribes.
    settle().await;

    let (events, listener) = recording_listener();
    container.subscribe_all(listener).await;
    container.set_mode(&name("svc"), Mode::Active).unwrap();
    settle().await;

    assert!(snapshot(&events).is_empty());
    assert_eq!(counters.starts(), 1);
    assert_eq!(counters.stops(), 0);
}

#[tokio::test]
async fn test_failed_start_is_not_retried_automatically() {
    let container = ServiceContainer::new();
    let (counters, svc) = probe_failing_first(1, usize::MAX);
    container
        .register_service(ServiceSpec::new("svc", svc))
        .unwrap();
    await_state(&container, &name("svc"), ServiceState::StartFailed).await;

    // Demand churn must not restart a parked node.
    container.demand(&name("svc")).unwrap();
    container.undemand(&name("svc")).unwrap();
    settle().await;
    assert_eq!(
        container.state(&name("svc")).unwrap(),
        ServiceState::StartFailed
    );
    assert_eq!(counters.starts(), 1);
}

#[tokio::test]
async fn test_reset_recovers_a_failed_start() {
    let container = ServiceContainer::new();
    let (counters, svc) = probe_failing_first(9, 1);
    container
        .register_service(ServiceSpec::new("svc", svc))
        .unwrap();
    await_state(&container, &name("svc"), ServiceState::StartFailed).await;
    assert!(container.start_failure(&name("svc")).unwrap().is_some());

    container.reset(&name("svc")).unwrap();
    await_up(&container, &name("svc")).await;
    assert_eq!(counters.starts(), 2);
    assert!(container.start_failure(&name("svc")).unwrap().is_none());
    assert_eq!(*container.get_value_as::<u32>(&name("svc")).unwrap(), 9);
}

#[tokio::test]
async fn test_stop_order_is_reverse_of_start_order() {
    let container = ServiceContainer::new();
    let calls = trace();
    container
        .install_batch(
            ServiceBatch::new()
                .add(ServiceSpec::new("db", traced("db", &calls)))
                .add(ServiceSpec::new("app", traced("app", &calls)).requires("db")),
        )
        .unwrap();
    await_up(&container, &name("app")).await;

    // Forcing the dependency down must wind the dependent down first.
    container.set_mode(&name("db"), Mode::Never).unwrap();
    await_state(&container, &name("db"), ServiceState::Down).await;
    await_state(&container, &name("app"), ServiceState::Waiting).await;

    assert_eq!(
        snapshot(&calls),
        vec!["db:start", "app:start", "app:stop", "db:stop"]
    );
}

#[tokio::test]
async fn test_remove_service_round_trip() {
    let container = ServiceContainer::new();
    let (counters, svc) = probe(1);
    container
        .register_service(ServiceSpec::new("svc", svc))
        .unwrap();
    await_up(&container, &name("svc")).await;

    container.remove_service(&name("svc")).await.unwrap();
    assert_eq!(counters.stops(), 1);
    assert!(container.is_empty());
    assert!(matches!(
        container.state(&name("svc")),
        Err(Error::Graph(_))
    ));

    // The name is free again.
    let (again, svc) = probe(2);
    container
        .register_service(ServiceSpec::new("svc", svc))
        .unwrap();
    await_up(&container, &name("svc")).await;
    assert_eq!(again.starts(), 1);
    assert_eq!(*container.get_value_as::<u32>(&name("svc")).unwrap(), 2);
}

#[tokio::test]
async fn test_remove_down_service_skips_stop_behavior() {
    let container = ServiceContainer::new();
    let (counters, svc) = probe(1);
    container
        .register_service(ServiceSpec::new("svc", svc).mode(Mode::Never))
        .unwrap();
    settle().await;

    container.remove_service(&name("svc")).await.unwrap();
    assert_eq!(counters.starts(), 0);
    assert_eq!(counters.stops(), 0);
    assert!(container.is_empty());
}

#[tokio::test]
async fn test_removed_dependency_parks_dependent_in_waiting() {
    let container = ServiceContainer::new();
    let (_, db) = probe(1);
    let (_, app) = probe(2);
    container
        .install_batch(
            ServiceBatch::new()
                .add(ServiceSpec::new("db", db))
                .add(ServiceSpec::new("app", app).requires("db")),
        )
        .unwrap();
    await_up(&container, &name("app")).await;

    container.remove_service(&name("db")).await.unwrap();
    await_state(&container, &name("app"), ServiceState::Waiting).await;

    // Re-registering the dependency satisfies the dangling edge again.
    let (_, db) = probe(3);
    container
        .register_service(ServiceSpec::new("db", db))
        .unwrap();
    await_up(&container, &name("app")).await;
}

#[tokio::test]
async fn test_parallel_starts_of_independent_subtrees() {
    // Each behavior blocks until both have entered start; this can only
    // resolve if two workers run the starts concurrently.
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::controller::error::StartError;
    use crate::controller::service::{Service, StartContext, StartOutcome};

    struct Rendezvous(Arc<AtomicUsize>);

    #[async_trait]
    impl Service for Rendezvous {
        async fn start(&self, _ctx: StartContext) -> Result<StartOutcome, StartError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            for _ in 0..200 {
                if self.0.load(Ordering::SeqCst) >= 2 {
                    return Ok(StartOutcome::Ready(Arc::new(())));
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Err(StartError::failed("peer never started"))
        }

        async fn stop(&self) {}
    }

    let container = ServiceContainer::with_config(ContainerConfig::default().worker_count(2));
    let entered = Arc::new(AtomicUsize::new(0));
    container
        .install_batch(
            ServiceBatch::new()
                .add(ServiceSpec::new("left", Rendezvous(Arc::clone(&entered))))
                .add(ServiceSpec::new("right", Rendezvous(Arc::clone(&entered)))),
        )
        .unwrap();

    await_up(&container, &name("left")).await;
    await_up(&container, &name("right")).await;
}

#[tokio::test]
async fn test_start_task_reverts_when_dependency_no_longer_up() {
    use crate::scheduler::{TransitionKind, TransitionTask};

    let container = ServiceContainer::new();
    let (app_counters, app) = probe(1);
    let (_, db) = probe(2);
    container
        .install_batch(
            ServiceBatch::new()
                .add(ServiceSpec::new("db", db))
                .add(ServiceSpec::new("app", app).requires("db")),
        )
        .unwrap();
    await_up(&container, &name("app")).await;

    container.set_mode(&name("db"), Mode::Never).unwrap();
    await_state(&container, &name("app"), ServiceState::Waiting).await;
    await_state(&container, &name("db"), ServiceState::Down).await;
    settle().await;

    let (events, listener) = recording_listener();
    container.subscribe_all(listener).await;

    // Run a start task whose queue-time view claimed the dependency was
    // up. The dependency check happens only after STARTING is committed,
    // so the behavior must not run and the node falls back to WAITING.
    let ctrl = container
        .inner
        .require_controller(&name("app"))
        .expect("app is registered");
    {
        let mut st = ctrl.lock();
        st.pending = Some(TransitionKind::Start);
    }
    container
        .inner
        .run_task(TransitionTask {
            name: name("app"),
            kind: TransitionKind::Start,
            expected: ServiceState::Waiting,
        })
        .await;

    assert_eq!(
        container.state(&name("app")).unwrap(),
        ServiceState::Waiting
    );
    assert_eq!(app_counters.starts(), 1);
    settle().await;
    assert_eq!(
        filtered(&events, &["app:STARTING", "app:WAITING"]),
        vec!["app:STARTING", "app:WAITING"]
    );
}

#[tokio::test]
async fn test_shutdown_stops_everything_and_rejects_registration() {
    let container = ServiceContainer::new();
    let calls = trace();
    container
        .install_batch(
            ServiceBatch::new()
                .add(ServiceSpec::new("db", traced("db", &calls)))
                .add(ServiceSpec::new("app", traced("app", &calls)).requires("db")),
        )
        .unwrap();
    await_up(&container, &name("app")).await;

    container.shutdown().await;
    assert_eq!(container.state(&name("db")).unwrap(), ServiceState::Down);
    assert_eq!(container.state(&name("app")).unwrap(), ServiceState::Down);
    assert_eq!(
        snapshot(&calls),
        vec!["db:start", "app:start", "app:stop", "db:stop"]
    );

    let (_, late) = probe(1);
    assert!(matches!(
        container.register_service(ServiceSpec::new("late", late)),
        Err(Error::ShuttingDown)
    ));
}
