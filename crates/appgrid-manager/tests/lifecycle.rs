mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use appgrid_container::ContainerActuator;
use appgrid_core::{Version, epoch_secs};
use appgrid_manager::{DeleteRequest, DrainPhase, ErrorKind, ManagerError, RequestContext};
use appgrid_qps::QpsTracker;
use appgrid_state::AppStatus;
use appgrid_workspace::VersionMetadata;
use common::{Harness, eventually, timeouts};

fn v(n: u32) -> Version {
    Version::new(n).unwrap()
}

#[tokio::test]
async fn cold_create_and_first_deploy() {
    let h = Harness::new().await;
    h.deploy_first().await;

    let app = h.manager.store().get_app(&h.app_key()).unwrap().unwrap();
    assert_eq!(app.current_version, Some(v(1)));
    assert_eq!(app.status, AppStatus::Active);

    let ws = h.manager.workspace().app(&h.app_key());
    assert_eq!(ws.release_names().unwrap(), vec!["alice_todo_v1".to_string()]);
    assert_eq!(ws.symlink_target().unwrap().as_deref(), Some("alice_todo_v1"));
    assert!(h.mock.is_running("alice-todo").await.unwrap());
    assert!(h.discovery.is_running(&h.vkey(1)).await);
    assert_eq!(h.discovery.current_version(&h.app_key()).await, Some(v(1)));

    let row = h.manager.store().get_version(&h.vkey(1)).unwrap().unwrap();
    assert!(!row.is_stopped());
    assert!(!h.manager.is_busy(&h.app_key()));
}

#[tokio::test]
async fn upgrade_hands_off_and_retires_old_version() {
    let h = Harness::new().await;
    h.deploy_first().await;

    h.write_source("package main // v2");
    let handle = h.manager.update(h.update_req()).await.unwrap();
    assert_eq!(handle.version, v(2));
    assert_eq!(handle.previous, Some(v(1)));
    assert_eq!(handle.retiring, vec![v(1)]);
    // Promotion is visible before the drain finishes.
    assert_eq!(h.discovery.current_version(&h.app_key()).await, Some(v(2)));

    let reports = handle.drained().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].version, v(1));
    assert_eq!(reports[0].phase, DrainPhase::Retired);
    assert!(!reports[0].forced);

    // The running container got the new binary by exec.
    let execs = h.mock.exec_log().await;
    assert_eq!(
        execs,
        vec![(
            "alice-todo".to_string(),
            vec!["/workspace/workplace/bin/releases/alice_todo_v2".to_string()]
        )]
    );
    assert_eq!(h.discovery.running_versions(&h.app_key()).await, vec![v(2)]);

    let app = h.manager.store().get_app(&h.app_key()).unwrap().unwrap();
    assert_eq!(app.current_version, Some(v(2)));
    assert_eq!(app.status, AppStatus::Active);
    let old = h.manager.store().get_version(&h.vkey(1)).unwrap().unwrap();
    assert!(old.is_stopped());
    assert!(old.stop_time.unwrap() >= old.start_time);
    assert!(!h.manager.store().get_version(&h.vkey(2)).unwrap().unwrap().is_stopped());
}

#[tokio::test]
async fn busy_version_is_forced_only_at_the_cap() {
    let mut t = timeouts();
    t.drain_max_duration = Duration::from_millis(300);
    let h = Harness::with(t, QpsTracker::new(Duration::from_secs(60), 0.1, 10_000)).await;
    h.deploy_first().await;
    for _ in 0..50 {
        h.qps.record(&h.vkey(1)).await;
    }

    h.write_source("package main // v2");
    let started = std::time::Instant::now();
    let handle = h.manager.update(h.update_req()).await.unwrap();
    let reports = handle.drained().await;

    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(reports.len(), 1);
    assert!(reports[0].forced);
    assert!(!h.discovery.is_running(&h.vkey(1)).await);
}

#[tokio::test]
async fn drain_waits_for_traffic_to_stop() {
    let h = Harness::with(timeouts(), QpsTracker::new(Duration::from_millis(200), 0.1, 10_000)).await;
    h.deploy_first().await;
    for _ in 0..20 {
        h.qps.record(&h.vkey(1)).await;
    }

    h.write_source("package main // v2");
    let started = std::time::Instant::now();
    let handle = h.manager.update(h.update_req()).await.unwrap();
    let reports = handle.drained().await;

    // The recorded hits keep v1 busy for one window.
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(!reports[0].forced);
    assert_eq!(reports[0].phase, DrainPhase::Retired);
}

#[tokio::test]
async fn concurrent_update_is_rejected_without_building() {
    let h = Harness::new().await;
    h.deploy_first().await;
    let builds_before = h.toolchain.builds();

    h.write_source("package main // v2");
    let (a, b) = tokio::join!(
        h.manager.update(h.update_req()),
        h.manager.update(h.update_req())
    );
    let (ok, rejected) = match (a, b) {
        (Ok(handle), Err(e)) | (Err(e), Ok(handle)) => (handle, e),
        _ => panic!("expected exactly one update to proceed"),
    };
    assert!(matches!(rejected, ManagerError::InProgress(_)));
    assert_eq!(h.toolchain.builds(), builds_before + 1);

    // The lease is held until the old version is retired.
    assert!(h.manager.is_busy(&h.app_key()));
    ok.drained().await;
    assert!(!h.manager.is_busy(&h.app_key()));
}

#[tokio::test]
async fn startup_timeout_keeps_old_version_current() {
    let h = Harness::new().await;
    h.deploy_first().await;
    h.behaviour.mute_startup.store(true, Ordering::SeqCst);

    h.write_source("package main // v2");
    let err = h.manager.update(h.update_req()).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(err.to_string().starts_with("update: await startup: timeout"));

    let ws = h.manager.workspace().app(&h.app_key());
    let meta = VersionMetadata::read(&ws).unwrap().unwrap();
    assert_eq!(meta.current_version, v(1));
    assert_eq!(meta.latest_version, v(2));
    assert!(ws.release_names().unwrap().contains(&"alice_todo_v2".to_string()));
    assert_eq!(ws.symlink_target().unwrap().as_deref(), Some("alice_todo_v1"));

    let app = h.manager.store().get_app(&h.app_key()).unwrap().unwrap();
    assert_eq!(app.current_version, Some(v(1)));
    assert!(h.discovery.is_running(&h.vkey(1)).await);
    assert!(!h.manager.is_busy(&h.app_key()));
}

#[tokio::test]
async fn build_failure_changes_nothing() {
    let h = Harness::new().await;
    h.deploy_first().await;
    h.toolchain.set_failing(true);

    h.write_source("package main // broken");
    let err = h.manager.update(h.update_req()).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Build);

    let app = h.manager.store().get_app(&h.app_key()).unwrap().unwrap();
    assert_eq!(app.current_version, Some(v(1)));
    assert_eq!(h.discovery.running_versions(&h.app_key()).await, vec![v(1)]);
}

#[tokio::test]
async fn repeating_an_applied_update_converges() {
    let h = Harness::new().await;
    h.deploy_first().await;
    let builds = h.toolchain.builds();

    let handle = h.manager.update(h.update_req()).await.unwrap();
    assert_eq!(handle.version, v(1));
    assert!(handle.retiring.is_empty());
    handle.drained().await;

    assert_eq!(h.toolchain.builds(), builds);
    assert_eq!(h.manager.store().list_versions(&h.app_key()).unwrap().len(), 1);
    assert_eq!(h.discovery.running_versions(&h.app_key()).await, vec![v(1)]);
}

#[tokio::test]
async fn killed_container_marks_app_inactive() {
    let h = Harness::new().await;
    h.deploy_first().await;

    h.mock.kill("alice-todo").await;
    h.discovery
        .sweep_at(epoch_secs() + h.discovery.liveness_window().as_secs() + 1)
        .await;

    assert!(!h.discovery.is_running(&h.vkey(1)).await);
    let store = h.manager.store().clone();
    let key = h.app_key();
    assert!(
        eventually(|| {
            let store = store.clone();
            let key = key.clone();
            async move { store.get_app(&key).unwrap().unwrap().status == AppStatus::Inactive }
        })
        .await
    );
    assert!(h.manager.store().get_version(&h.vkey(1)).unwrap().unwrap().is_stopped());
}

#[tokio::test]
async fn shutdown_without_close_report_is_forced() {
    let h = Harness::new().await;
    h.deploy_first().await;
    h.behaviour.ignore_shutdown.store(true, Ordering::SeqCst);

    h.write_source("package main // v2");
    let handle = h.manager.update(h.update_req()).await.unwrap();
    let reports = handle.drained().await;
    assert!(reports[0].forced);
    assert!(matches!(reports[0].phase, DrainPhase::Forced { .. }));
    assert!(h.manager.store().get_version(&h.vkey(1)).unwrap().unwrap().is_stopped());
}

#[tokio::test]
async fn delete_twice_is_a_successful_no_op() {
    let h = Harness::new().await;
    h.deploy_first().await;
    let req = DeleteRequest {
        user: "alice".to_string(),
        app: "todo".to_string(),
        context: RequestContext::new(),
    };

    assert!(h.manager.delete(req.clone()).await.unwrap());
    assert!(!h.mock.exists("alice-todo").await.unwrap());
    assert!(!h.base().join("alice/todo").exists());
    assert!(h.manager.store().get_app(&h.app_key()).unwrap().is_none());
    assert!(h.manager.store().list_versions(&h.app_key()).unwrap().is_empty());
    assert!(h.discovery.app_snapshot(&h.app_key()).await.is_none());

    assert!(!h.manager.delete(req).await.unwrap());
}

#[tokio::test]
async fn drain_messages_carry_trace_and_user() {
    let h = Harness::new().await;
    h.deploy_first().await;
    h.write_source("package main // v2");

    let mut req = h.update_req();
    req.context = RequestContext {
        trace_id: "trace-42".to_string(),
        user: Some("operator".to_string()),
    };
    h.manager.update(req).await.unwrap().drained().await;

    let control = h.wait_for_control(2).await;
    let kinds: Vec<&str> = control.iter().map(|m| m.kind.as_str()).collect();
    assert_eq!(kinds, vec!["onAppUpdate", "shutdown"]);
    assert_eq!(control[0].subject, appgrid_core::subjects::runtime_status(&h.vkey(1)));
    assert_eq!(control[1].subject, appgrid_core::subjects::app_status(&h.vkey(1)));
    for msg in &control {
        assert_eq!(msg.headers.trace_id(), Some("trace-42"));
        assert_eq!(msg.headers.request_user(), Some("operator"));
    }
}

#[tokio::test]
async fn delete_drain_starts_a_trace_when_none_is_given() {
    let h = Harness::new().await;
    h.deploy_first().await;
    let req = DeleteRequest {
        user: "alice".to_string(),
        app: "todo".to_string(),
        context: RequestContext::new(),
    };
    let trace_id = req.context.trace_id.clone();
    assert!(h.manager.delete(req).await.unwrap());

    let control = h.wait_for_control(2).await;
    assert!(control.iter().any(|m| m.kind == "shutdown"));
    for msg in control {
        assert_eq!(msg.headers.trace_id(), Some(trace_id.as_str()));
        assert_eq!(msg.headers.request_user(), None);
    }
}

#[tokio::test]
async fn retired_version_leaves_qps_after_two_quiet_windows() {
    let window = Duration::from_secs(1);
    let h = Harness::with(timeouts(), QpsTracker::new(window, 0.1, 10_000)).await;
    let (_stop, rx) = tokio::sync::watch::channel(false);
    let qps = h.qps.clone();
    tokio::spawn(async move { qps.run(rx).await });

    h.deploy_first().await;
    let last_hit = std::time::Instant::now();
    for _ in 0..5 {
        h.qps.record(&h.vkey(1)).await;
    }
    h.write_source("package main // v2");
    let reports = h.manager.update(h.update_req()).await.unwrap().drained().await;
    assert!(!reports[0].forced);

    // Quiet for one window: drained, but the record is still held.
    assert!(last_hit.elapsed() < window * 2);
    assert_eq!(h.qps.tracked().await, 1);

    let mut evicted = false;
    for _ in 0..80 {
        if h.qps.tracked().await == 0 {
            evicted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(evicted);
    assert!(last_hit.elapsed() >= window * 2);
}

#[tokio::test]
async fn delete_during_an_update_drain_is_in_progress() {
    let mut t = timeouts();
    t.drain_max_duration = Duration::from_millis(500);
    let h = Harness::with(t, QpsTracker::new(Duration::from_secs(60), 0.1, 10_000)).await;
    h.deploy_first().await;
    for _ in 0..50 {
        h.qps.record(&h.vkey(1)).await;
    }

    h.write_source("package main // v2");
    let handle = h.manager.update(h.update_req()).await.unwrap();
    let delete = DeleteRequest {
        user: "alice".to_string(),
        app: "todo".to_string(),
        context: RequestContext::new(),
    };
    let err = h.manager.delete(delete.clone()).await.unwrap_err();
    assert!(matches!(err, ManagerError::InProgress(_)));
    assert_eq!(err.kind(), ErrorKind::InProgress);
    assert!(h.base().join("alice/todo").exists());
    assert!(h.manager.store().get_app(&h.app_key()).unwrap().is_some());

    handle.drained().await;
    assert!(h.manager.delete(delete).await.unwrap());
}
