//! End-to-end tests for tether sessions over the in-memory camera

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tethercam::testing::{DeviceCall, FakeCamera, FakeCameraHandle};
use tethercam::{
    CaptureResult, ConnectionState, DatedWorkspace, ParameterControl, SemanticParam,
    SessionEvent, SessionSnapshot, TetherError, TetherSession, TransportEvent,
};

const WAIT: Duration = Duration::from_secs(5);

/// Block until the session snapshot satisfies `pred`.
async fn wait_for<F>(session: &TetherSession, what: &str, mut pred: F) -> SessionSnapshot
where
    F: FnMut(&SessionSnapshot) -> bool,
{
    let mut rx = session.watch();
    let waited = tokio::time::timeout(WAIT, async {
        loop {
            {
                let snapshot = rx.borrow_and_update();
                if pred(&snapshot) {
                    return snapshot.clone();
                }
            }
            if rx.changed().await.is_err() {
                panic!("session closed while waiting for {what}");
            }
        }
    })
    .await;
    waited.unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

fn iso_of(snapshot: &SessionSnapshot) -> Option<&str> {
    snapshot.parameters.as_ref().map(|p| p.iso.as_str())
}

/// Body that only answers to "isospeed", so the first ISO candidate fails.
fn isospeed_camera() -> FakeCamera {
    FakeCamera::builder()
        .with_value("isospeed", &["100", "200", "400", "800"], "200")
        .with_value("shutterspeed", &["1/60", "1/125"], "1/125")
        .with_value("aperture", &["4", "5.6"], "5.6")
        .build()
}

async fn connected(
    camera: FakeCamera,
    poll: Duration,
    settle: Duration,
) -> (TetherSession, FakeCameraHandle) {
    let handle = camera.handle();
    let session = TetherSession::builder()
        .poll_interval(poll)
        .settle_delay(settle)
        .spawn(camera);
    session
        .connection_changed(ConnectionState::Connected)
        .await
        .unwrap();
    wait_for(&session, "first read", |s| {
        s.parameters.is_some() && !s.aliases.is_empty()
    })
    .await;
    (session, handle)
}

#[tokio::test]
async fn test_resolve_write_and_settle_read() {
    let (session, handle) = connected(
        isospeed_camera(),
        Duration::from_millis(50),
        Duration::from_millis(100),
    )
    .await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.aliases.get(SemanticParam::Iso).unwrap().key, "isospeed");
    assert_eq!(iso_of(&snapshot), Some("200"));
    assert_eq!(handle.choice_queries()[..2], ["iso", "isospeed"]);

    session.write(SemanticParam::Iso, "800").await.unwrap();
    assert_eq!(handle.writes(), vec![("isospeed".to_string(), "800".to_string())]);
    assert_eq!(iso_of(&session.snapshot()), Some("200"));

    let settled = wait_for(&session, "iso 800", |s| iso_of(s) == Some("800")).await;
    assert_eq!(settled.state, ConnectionState::Connected);
}

#[tokio::test]
async fn test_write_invisible_until_settle_read() {
    let (session, _handle) = connected(
        isospeed_camera(),
        Duration::from_millis(10),
        Duration::from_millis(300),
    )
    .await;

    session.write(SemanticParam::Iso, "400").await.unwrap();

    // Polls keep ticking but are held back while the write settles.
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(iso_of(&session.snapshot()), Some("200"));

    wait_for(&session, "iso 400", |s| iso_of(s) == Some("400")).await;
}

#[tokio::test]
async fn test_write_right_after_connect_waits_for_resolution() {
    let camera = isospeed_camera();
    let handle = camera.handle();
    let session = TetherSession::builder()
        .settle_delay(Duration::from_millis(20))
        .spawn(camera);

    session
        .connection_changed(ConnectionState::Connected)
        .await
        .unwrap();
    session.write(SemanticParam::Iso, "100").await.unwrap();

    assert_eq!(handle.writes()[0].0, "isospeed");
    wait_for(&session, "iso 100", |s| iso_of(s) == Some("100")).await;
}

#[tokio::test]
async fn test_capture_without_workspace() {
    let (session, handle) = connected(
        FakeCamera::typical(),
        Duration::from_secs(10),
        Duration::from_millis(50),
    )
    .await;
    let before = session.parameters().unwrap().images_remaining.unwrap();

    let result = session.capture(None).await.unwrap();
    assert!(result.file_path.to_string_lossy().ends_with(".jpg"));
    assert_eq!(handle.captures(), vec![None]);
    assert_eq!(handle.download_folder(), None);

    let after = wait_for(&session, "remaining count refresh", |s| {
        s.parameters.as_ref().and_then(|p| p.images_remaining) == Some(before - 1)
    })
    .await;
    assert!(after.is_connected());
}

#[tokio::test]
async fn test_capture_into_fresh_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let camera = FakeCamera::typical();
    let handle = camera.handle();
    let session = TetherSession::builder()
        .workspace(Arc::new(DatedWorkspace::new(dir.path())))
        .spawn(camera);
    session
        .connection_changed(ConnectionState::Connected)
        .await
        .unwrap();

    let result = session.capture(None).await.unwrap();
    let folder = result.file_path.parent().unwrap().to_path_buf();
    assert!(folder.is_dir());
    assert_eq!(folder.parent().unwrap(), dir.path());
    assert_eq!(handle.download_folder(), Some(folder.clone()));
    assert_eq!(handle.captures(), vec![Some(folder)]);
}

#[tokio::test]
async fn test_preferred_folder_beats_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let camera = FakeCamera::typical();
    let handle = camera.handle();
    let session = TetherSession::builder()
        .workspace(Arc::new(DatedWorkspace::new(dir.path())))
        .spawn(camera);
    session
        .connection_changed(ConnectionState::Connected)
        .await
        .unwrap();

    let mine = PathBuf::from("/shoot/client-a");
    let result = session.capture(Some(mine.clone())).await.unwrap();
    assert!(result.file_path.starts_with(&mine));
    assert_eq!(handle.captures(), vec![Some(mine)]);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_capture_failure_keeps_session() {
    let (session, handle) = connected(
        FakeCamera::typical(),
        Duration::from_secs(10),
        Duration::from_millis(50),
    )
    .await;
    handle.fail_next_capture("card full");

    let err = session.capture(None).await.unwrap_err();
    assert!(matches!(err, TetherError::CaptureFailed(_)));
    assert_eq!(session.state(), ConnectionState::Connected);
    assert!(session.parameters().is_some());
}

#[tokio::test]
async fn test_unplug_detected_by_read() {
    let (session, handle) = connected(
        FakeCamera::typical(),
        Duration::from_millis(20),
        Duration::from_millis(50),
    )
    .await;

    handle.unplug();
    let snapshot = wait_for(&session, "disconnect", |s| !s.is_connected()).await;
    assert!(snapshot.parameters.is_none());
    assert!(snapshot.aliases.is_empty());
    assert!(snapshot.session_id.is_none());

    let reads = handle.param_reads();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(handle.param_reads(), reads, "polling continued after disconnect");

    assert!(session
        .write(SemanticParam::Iso, "800")
        .await
        .unwrap_err()
        .is_device_unavailable());
}

#[tokio::test]
async fn test_unplugged_write_ends_session() {
    let (session, handle) = connected(
        FakeCamera::typical(),
        Duration::from_secs(30),
        Duration::from_millis(50),
    )
    .await;
    session.read().await.unwrap();
    let mut events = session.subscribe();

    handle.unplug();
    let err = session.write(SemanticParam::Iso, "800").await.unwrap_err();
    assert!(err.is_device_unavailable());

    // No poll is due for 30s, so the write alone must end the session.
    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert!(snapshot.parameters.is_none());
    assert!(snapshot.aliases.is_empty());
    assert!(snapshot.last_error.is_none());

    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, SessionEvent::Error { .. }),
            "detach surfaced as an error: {event:?}"
        );
    }
}

#[tokio::test]
async fn test_unplugged_capture_ends_session() {
    let (session, handle) = connected(
        FakeCamera::typical(),
        Duration::from_secs(30),
        Duration::from_millis(50),
    )
    .await;

    handle.unplug();
    let err = session.capture(None).await.unwrap_err();
    assert!(err.is_device_unavailable());

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert!(snapshot.parameters.is_none());
    assert!(snapshot.last_error.is_none());
    assert!(session.capture(None).await.unwrap_err().is_device_unavailable());
    assert_eq!(handle.captures().len(), 1);
}

#[tokio::test]
async fn test_disconnect_event_clears_state() {
    let (session, handle) = connected(
        FakeCamera::typical(),
        Duration::from_millis(20),
        Duration::from_millis(50),
    )
    .await;

    session
        .connection_changed(ConnectionState::Disconnected)
        .await
        .unwrap();
    let snapshot = wait_for(&session, "disconnect", |s| !s.is_connected()).await;
    assert!(snapshot.parameters.is_none());

    let reads = handle.param_reads();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.param_reads(), reads);
}

#[tokio::test]
async fn test_reconnect_resolves_again() {
    let (session, handle) = connected(
        FakeCamera::typical(),
        Duration::from_millis(50),
        Duration::from_millis(50),
    )
    .await;
    let first = session.snapshot();
    assert_eq!(first.aliases.get(SemanticParam::Iso).unwrap().key, "iso");

    session.disconnect().await.unwrap();
    wait_for(&session, "disconnect", |s| !s.is_connected()).await;

    // A different body on the same port.
    handle.replace_keys(&[
        ("isospeed", &["100", "200"][..]),
        ("shutter", &["1/100"][..]),
        ("fnumber", &["8"][..]),
    ]);
    session
        .connection_changed(ConnectionState::Connected)
        .await
        .unwrap();

    let second = wait_for(&session, "new aliases", |s| {
        s.aliases
            .get(SemanticParam::Iso)
            .is_some_and(|e| e.key == "isospeed")
    })
    .await;
    assert_ne!(first.session_id, second.session_id);
    assert!(!second.aliases.contains(SemanticParam::WhiteBalance));
}

#[tokio::test]
async fn test_unsupported_parameter() {
    let (session, _handle) = connected(
        FakeCamera::typical(),
        Duration::from_millis(50),
        Duration::from_millis(50),
    )
    .await;

    let err = session
        .write(SemanticParam::ShootingMode, "M")
        .await
        .unwrap_err();
    assert_eq!(err, TetherError::UnsupportedParameter(SemanticParam::ShootingMode));
    assert_eq!(session.state(), ConnectionState::Connected);

    assert_eq!(
        session.control(SemanticParam::ShootingMode),
        ParameterControl::Fixed { current: None }
    );
    assert!(session.control(SemanticParam::Iso).is_writable());
    assert_eq!(session.choices(SemanticParam::Aperture).unwrap().len(), 4);
}

#[tokio::test]
async fn test_rejected_write_reports_without_disconnect() {
    let (session, handle) = connected(
        FakeCamera::typical(),
        Duration::from_secs(10),
        Duration::from_millis(50),
    )
    .await;
    let mut events = session.subscribe();
    handle.set_read_only("iso");

    let err = session.write(SemanticParam::Iso, "800").await.unwrap_err();
    assert!(matches!(err, TetherError::WriteRejected(_)));
    assert_eq!(session.state(), ConnectionState::Connected);
    assert!(session.snapshot().last_error.is_some());

    let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert!(matches!(event, SessionEvent::Error { .. }));
}

#[tokio::test]
async fn test_device_calls_never_overlap() {
    let camera = FakeCamera::builder()
        .with_value("iso", &["100", "200", "400"], "100")
        .with_value("shutterspeed", &["1/125"], "1/125")
        .with_value("aperture", &["4"], "4")
        .with_latency(Duration::from_millis(5))
        .build();
    let (session, handle) = connected(
        camera,
        Duration::from_millis(5),
        Duration::from_millis(10),
    )
    .await;

    let mut tasks = Vec::new();
    for i in 0..10 {
        let session = session.clone();
        tasks.push(tokio::spawn(async move {
            let value = ["100", "200", "400"][i % 3];
            let _ = session.write(SemanticParam::Iso, value).await;
            let _ = session.read().await;
            if i % 4 == 0 {
                let _ = session.capture(None).await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(handle.param_reads() > 1);
    assert_eq!(handle.max_concurrent_calls(), 1);
}

#[tokio::test]
async fn test_polls_wait_out_the_settle_delay() {
    let settle = Duration::from_millis(80);
    let (session, handle) =
        connected(FakeCamera::typical(), Duration::from_millis(5), settle).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    session.write(SemanticParam::Iso, "400").await.unwrap();
    wait_for(&session, "settle read", |s| iso_of(s) == Some("400")).await;

    let timeline = handle.timeline();
    let written_at = timeline
        .iter()
        .find_map(|(at, call)| matches!(call, DeviceCall::SetValue { .. }).then_some(*at))
        .unwrap();
    let next_read = timeline
        .iter()
        .filter(|(at, call)| *at > written_at && *call == DeviceCall::GetParams)
        .map(|(at, _)| *at)
        .next()
        .unwrap();
    assert!(
        next_read >= written_at + settle,
        "read {:?} after the write, inside the settle delay",
        next_read - written_at
    );
}

#[tokio::test]
async fn test_settle_read_starts_after_the_delay() {
    let camera = FakeCamera::typical();
    let (session, handle) =
        connected(camera, Duration::from_secs(10), Duration::from_millis(40)).await;
    handle.set_latency(Duration::from_millis(100));

    session.write(SemanticParam::Iso, "800").await.unwrap();
    // Goes out before the settle delay runs out and is still running when it does.
    session.read().await.unwrap();
    wait_for(&session, "settle read", |s| iso_of(s) == Some("800")).await;
    tokio::time::sleep(Duration::from_millis(250)).await;

    let after_write: Vec<DeviceCall> = handle
        .calls()
        .into_iter()
        .skip_while(|call| !matches!(call, DeviceCall::SetValue { .. }))
        .skip(1)
        .collect();
    assert_eq!(after_write, vec![DeviceCall::GetParams, DeviceCall::GetParams]);
}

#[tokio::test]
async fn test_concurrent_reads_share_one_device_read() {
    let camera = FakeCamera::typical();
    let handle = camera.handle();
    let (session, _) = connected(camera, Duration::from_secs(10), Duration::from_millis(50)).await;

    handle.set_latency(Duration::from_millis(100));
    handle.clear_calls();

    let (a, b, c) = tokio::join!(session.read(), session.read(), session.read());
    assert_eq!(a.unwrap().iso, "200");
    assert!(b.is_ok() && c.is_ok());
    assert_eq!(handle.param_reads(), 1);
}

#[tokio::test]
async fn test_camera_button_capture_refreshes() {
    let (session, handle) = connected(
        FakeCamera::typical(),
        Duration::from_secs(10),
        Duration::from_millis(50),
    )
    .await;
    let mut events = session.subscribe();
    let reads = handle.param_reads();
    handle.turn_dial("iso", "1600");

    let shot = CaptureResult {
        file_path: PathBuf::from("/downloads/capture_0000000001.cr3"),
        preview_path: None,
        width: 6000,
        height: 4000,
    };
    session
        .notify(TransportEvent::Captured(shot.clone()))
        .await
        .unwrap();

    let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event, SessionEvent::Captured { result: shot });

    wait_for(&session, "refresh after button capture", |s| {
        iso_of(s) == Some("1600")
    })
    .await;
    assert!(handle.param_reads() > reads);
}

#[tokio::test]
async fn test_workspace_folder_applied_on_connect() {
    let camera = FakeCamera::typical();
    let handle = camera.handle();
    let session = TetherSession::builder().spawn(camera);

    session.set_workspace_folder("/shoots/today").await.unwrap();
    assert_eq!(handle.download_folder(), None);

    session
        .connection_changed(ConnectionState::Connected)
        .await
        .unwrap();
    wait_for(&session, "first read", |s| s.parameters.is_some()).await;
    assert_eq!(handle.download_folder(), Some(PathBuf::from("/shoots/today")));

    session.set_workspace_folder("/shoots/tomorrow").await.unwrap();
    assert_eq!(handle.download_folder(), Some(PathBuf::from("/shoots/tomorrow")));
}

#[tokio::test]
async fn test_events_follow_session_lifecycle() {
    let camera = FakeCamera::typical();
    let session = TetherSession::builder().spawn(camera);
    let mut events = session.subscribe();

    session
        .connection_changed(ConnectionState::Connected)
        .await
        .unwrap();

    let mut seen = Vec::new();
    while seen.len() < 3 {
        let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
        seen.push(event);
    }

    assert!(matches!(
        seen[0],
        SessionEvent::StatusChanged {
            state: ConnectionState::Connected,
            session_id: Some(_)
        }
    ));
    match &seen[1] {
        SessionEvent::AliasesResolved {
            resolved,
            unavailable,
        } => {
            assert!(resolved.contains(&SemanticParam::Iso));
            assert_eq!(unavailable, &vec![SemanticParam::ShootingMode]);
        }
        other => panic!("expected aliases, got {other:?}"),
    }
    assert!(matches!(seen[2], SessionEvent::ParametersUpdated { .. }));
}

#[tokio::test]
async fn test_shutdown_stops_polling() {
    let (session, handle) = connected(
        FakeCamera::typical(),
        Duration::from_millis(10),
        Duration::from_millis(10),
    )
    .await;

    session.shutdown().await;
    let reads = handle.param_reads();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(handle.param_reads(), reads);
    assert_eq!(session.read().await, Err(TetherError::SessionClosed));
    assert_eq!(session.state(), ConnectionState::Disconnected);
}
