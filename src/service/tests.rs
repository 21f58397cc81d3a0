use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use super::*;
use crate::session::stub::StubSession;

fn service() -> Arc<DebugService> {
    DebugService::new(Arc::new(DebuggerModel::new()), 1)
}

fn install(service: &Arc<DebugService>, stub: StubSession) -> Arc<StubSession> {
    let stub = Arc::new(stub);
    service.set_session(stub.clone());
    stub
}

/// Let spawned tasks drain their queues
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn frame(id: i64) -> StackFrame {
    StackFrame {
        id,
        name: format!("f{}", id),
        source: None,
        line: 1,
        column: 1,
    }
}

fn snapshot_ids(service: &DebugService) -> Vec<i64> {
    service.frame_snapshots().iter().map(|s| s.id).collect()
}

#[tokio::test]
async fn test_stop_then_continue_clears_lines_once() {
    let service = service();
    let stub = install(&service, StubSession::new().with_stack(1));
    let mut cleared = service.model().lines_cleared().subscribe();

    stub.emit("stopped", json!({ "reason": "breakpoint", "threadId": 3 }));
    settle().await;
    assert_eq!(service.current_thread(), 3);
    assert!(service.is_thread_stopped());

    stub.emit("continued", json!({ "threadId": 3 }));
    settle().await;
    assert!(!service.is_thread_stopped());
    assert!(service.stopped_threads().is_empty());

    assert!(cleared.try_recv().is_ok());
    assert!(matches!(cleared.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_stopped_event_refreshes_frames() {
    let service = service();
    let mut lines = service.model().current_line_changed().subscribe();
    let stub = install(&service, StubSession::new().with_stack(2));

    stub.emit("stopped", json!({ "reason": "breakpoint", "threadId": 1 }));
    let line = tokio::time::timeout(Duration::from_secs(1), lines.recv())
        .await
        .expect("no line published")
        .unwrap();
    assert_eq!(line, 10);

    settle().await;
    assert_eq!(snapshot_ids(&service), [1, 2]);
    assert_eq!(stub.count("stackTrace"), 1);
}

#[tokio::test]
async fn test_stopped_without_thread_uses_current_thread() {
    let service = service();
    let stub = install(&service, StubSession::new().with_stack(1));

    stub.emit("thread", json!({ "reason": "started", "threadId": 4 }));
    settle().await;
    assert_eq!(service.current_thread(), 4);

    stub.emit("stopped", json!({ "reason": "pause" }));
    settle().await;
    assert_eq!(service.stopped_threads(), [4]);
}

#[tokio::test]
async fn test_events_are_forwarded() {
    let service = service();
    let mut events = service.event_message();
    let stub = install(&service, StubSession::new());

    stub.emit("output", json!({ "category": "stdout", "output": "hi\n" }));
    let message = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("event not forwarded")
        .unwrap();
    assert_eq!(message.event, "output");
    assert_eq!(message.body.unwrap()["output"], "hi\n");
}

#[tokio::test]
async fn test_failed_continue_keeps_thread_stopped() {
    let service = service();
    let stub = install(&service, StubSession::new().with_stack(1).fail("continue", "busy"));
    stub.emit("stopped", json!({ "reason": "step", "threadId": 1 }));
    settle().await;

    let outcome = service.continue_thread(None).await;
    assert!(matches!(
        outcome,
        ControlOutcome::Failed(Error::DapRequestFailed { .. })
    ));
    assert!(service.is_thread_stopped());
}

#[tokio::test]
async fn test_successful_continue_releases_thread() {
    let service = service();
    let stub = install(&service, StubSession::new().with_stack(1));
    stub.emit("stopped", json!({ "reason": "step", "threadId": 1 }));
    settle().await;

    assert!(service.continue_thread(None).await.is_sent());
    assert!(!service.is_thread_stopped());

    let (command, args) = stub.calls().into_iter().last().unwrap();
    assert_eq!(command, "continue");
    assert_eq!(args, json!({ "threadId": 1 }));
}

#[tokio::test]
async fn test_step_requests_target_current_thread() {
    let service = service();
    let stub = install(&service, StubSession::new());
    service.select_thread(Some(9));

    assert!(service.next(None).await.is_sent());
    assert!(service.step_in(Some(2)).await.is_sent());

    let calls = stub.calls();
    assert_eq!(calls[0], ("next".to_string(), json!({ "threadId": 9 })));
    assert_eq!(calls[1], ("stepIn".to_string(), json!({ "threadId": 2 })));
}

#[tokio::test]
async fn test_control_without_session_fails() {
    let service = service();
    let outcome = service.next(None).await;
    assert!(matches!(
        outcome,
        ControlOutcome::Failed(Error::SessionNotActive)
    ));
}

#[tokio::test]
async fn test_same_session_set_twice_is_noop() {
    let service = service();
    let mut changed = service.session_changed();
    let stub = Arc::new(StubSession::new());

    service.set_session(stub.clone());
    service.set_session(stub.clone());

    assert_eq!(stub.dispose_count(), 0);
    assert!(changed.try_recv().is_ok());
    assert!(matches!(changed.try_recv(), Err(TryRecvError::Empty)));
}

#[test]
fn test_set_session_outside_runtime_is_ignored() {
    let service = service();
    let stub = Arc::new(StubSession::new());

    service.set_session(stub.clone());
    assert!(service.session().is_none());
    assert_eq!(stub.dispose_count(), 0);
}

#[tokio::test]
async fn test_new_session_disposes_previous_once() {
    let service = service();
    let first = install(&service, StubSession::new().with_stack(1));
    first.emit("stopped", json!({ "reason": "step", "threadId": 5 }));
    settle().await;
    assert_eq!(service.stopped_threads(), [5]);

    let second = install(&service, StubSession::new());
    assert_eq!(first.dispose_count(), 1);
    assert_eq!(second.dispose_count(), 0);
    assert!(service.stopped_threads().is_empty());
    assert_eq!(service.current_thread(), 1);

    // The old session's events no longer reach the service
    first.emit("stopped", json!({ "reason": "step", "threadId": 6 }));
    settle().await;
    assert!(service.stopped_threads().is_empty());
}

#[tokio::test]
async fn test_can_start_and_is_started() {
    let service = service();
    assert!(!service.can_start());
    assert!(!service.is_started());

    install(&service, StubSession::new().not_started());
    assert!(service.can_start());
    assert!(!service.is_started());

    service.start().await.unwrap();
    assert!(!service.can_start());
    assert!(service.is_started());
}

#[tokio::test]
async fn test_refresh_snapshots_every_frame() {
    let service = service();
    let mut lines = service.model().current_line_changed().subscribe();
    install(&service, StubSession::new().with_stack(3));

    service.get_all_frames().await.unwrap();

    let snapshots = service.frame_snapshots();
    assert_eq!(snapshot_ids(&service), [1, 2, 3]);
    for snapshot in &snapshots {
        assert_eq!(snapshot.scopes.len(), 2);
        assert_eq!(snapshot.scopes[0].name, "Locals");
        assert_eq!(snapshot.scopes[0].variables.len(), 1);
        assert_eq!(
            snapshot.scopes[0].variables[0].name,
            format!("v{}", snapshot.id * 100)
        );
        assert!(snapshot.scopes[1].variables.is_empty());
    }

    let model = service.model();
    assert_eq!(model.callstack.frames().len(), 3);
    assert_eq!(model.variables.scopes(), snapshots[0].scopes);
    assert_eq!(lines.try_recv().unwrap(), 10);
}

#[tokio::test]
async fn test_refresh_with_empty_stack() {
    let service = service();
    install(
        &service,
        StubSession::new().respond("stackTrace", json!({ "stackFrames": [] })),
    );

    service.get_all_frames().await.unwrap();
    assert!(service.frame_snapshots().is_empty());
    assert!(service.model().callstack.frames().is_empty());
}

#[tokio::test]
async fn test_refresh_keeps_frames_that_loaded() {
    let service = service();
    let stub = StubSession::new().with_stack(3).on("scopes", |args| {
        match args["frameId"].as_i64() {
            Some(2) => Err("frame gone".to_string()),
            frame => Ok(json!({ "scopes": [
                { "name": "Locals", "variablesReference": frame.unwrap_or(0) * 100 }
            ]})),
        }
    });
    install(&service, stub);

    let err = service.get_all_frames().await.unwrap_err();
    assert!(matches!(err, Error::DapRequestFailed { .. }));
    assert_eq!(snapshot_ids(&service), [1, 3]);
}

#[tokio::test]
async fn test_failed_refresh_drops_previous_snapshots() {
    let service = service();
    let failing = Arc::new(AtomicBool::new(false));
    let stub = StubSession::new().with_stack(2).on("scopes", {
        let failing = failing.clone();
        move |args| {
            if failing.load(Ordering::SeqCst) {
                return Err("frame gone".to_string());
            }
            let frame = args["frameId"].as_i64().unwrap_or(0);
            Ok(json!({ "scopes": [{ "name": "Locals", "variablesReference": frame * 100 }] }))
        }
    });
    install(&service, stub);

    service.get_all_frames().await.unwrap();
    assert_eq!(snapshot_ids(&service), [1, 2]);
    let shown = service.model().variables.scopes();

    failing.store(true, Ordering::SeqCst);
    assert!(service.get_all_frames().await.is_err());
    assert!(service.frame_snapshots().is_empty());

    // Frame 2 is back on the new stack, but its old variables are gone
    service.on_change_frame(&frame(2));
    assert_eq!(service.model().variables.scopes(), shown);
}

#[tokio::test]
async fn test_change_to_frame_without_scopes_keeps_variables() {
    let service = service();
    let stub = StubSession::new().with_stack(2).on("scopes", |args| {
        match args["frameId"].as_i64() {
            Some(1) => Ok(json!({ "scopes": [{ "name": "Locals", "variablesReference": 100 }] })),
            _ => Ok(json!({ "scopes": [] })),
        }
    });
    install(&service, stub);
    service.get_all_frames().await.unwrap();

    let snapshots = service.frame_snapshots();
    assert_eq!(snapshots.len(), 2);
    assert!(snapshots[1].scopes.is_empty());
    assert_eq!(service.model().variables.scopes().len(), 1);

    service.on_change_frame(&frame(2));
    assert_eq!(service.model().variables.scopes(), snapshots[0].scopes);
}

#[tokio::test]
async fn test_top_frame_published_before_the_rest() {
    let service = service();
    let stub = StubSession::new().with_stack(3).delay("scopes", |args| {
        match args["frameId"].as_i64() {
            Some(1) => Duration::from_millis(100),
            Some(2) => Duration::from_millis(40),
            _ => Duration::ZERO,
        }
    });
    install(&service, stub);

    let refresh = tokio::spawn({
        let service = service.clone();
        async move { service.get_all_frames().await }
    });

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(service.frame_snapshots().is_empty());
    assert!(service.model().variables.scopes().is_empty());

    refresh.await.unwrap().unwrap();
    // Stack order even though frame 3 loaded before frame 2
    assert_eq!(snapshot_ids(&service), [1, 2, 3]);
}

#[tokio::test]
async fn test_stale_refresh_does_not_overwrite() {
    let service = service();
    let stub = StubSession::new()
        .with_stack(1)
        .on("stackTrace", |args| {
            let stack = match args["threadId"].as_i64() {
                Some(1) => json!([{ "id": 1, "name": "old", "line": 3 }]),
                _ => json!([
                    { "id": 7, "name": "new", "line": 4 },
                    { "id": 8, "name": "caller", "line": 9 }
                ]),
            };
            Ok(json!({ "stackFrames": stack }))
        })
        .delay("stackTrace", |args| match args["threadId"].as_i64() {
            Some(1) => Duration::from_millis(100),
            _ => Duration::ZERO,
        });
    install(&service, stub);

    let stale = tokio::spawn({
        let service = service.clone();
        async move { service.get_all_frames().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    service.select_thread(Some(2));
    service.get_all_frames().await.unwrap();
    stale.await.unwrap().unwrap();

    assert_eq!(snapshot_ids(&service), [7, 8]);
    let frames: Vec<i64> = service
        .model()
        .callstack
        .frames()
        .iter()
        .map(|f| f.id)
        .collect();
    assert_eq!(frames, [7, 8]);
}

#[tokio::test]
async fn test_change_frame_shows_its_snapshot() {
    let service = service();
    install(&service, StubSession::new().with_stack(3));
    service.get_all_frames().await.unwrap();
    let snapshots = service.frame_snapshots();

    service.on_change_frame(&frame(2));
    assert_eq!(service.model().variables.scopes(), snapshots[1].scopes);

    service.on_change_frame(&frame(99));
    assert_eq!(service.model().variables.scopes(), snapshots[1].scopes);
}

#[tokio::test]
async fn test_callstack_selection_routes_to_variables() {
    let service = service();
    install(&service, StubSession::new().with_stack(3));
    service.get_all_frames().await.unwrap();
    let snapshots = service.frame_snapshots();

    service.model().callstack.select_frame(3).unwrap();
    settle().await;
    assert_eq!(service.model().variables.scopes(), snapshots[2].scopes);
}

#[tokio::test]
async fn test_launch_request_order() {
    let service = service();
    service.model().breakpoints.add(5);
    service.model().breakpoints.add(2);
    let stub = install(
        &service,
        StubSession::new()
            .with_stack(1)
            .respond("dumpCell", json!({ "sourcePath": "/tmp/a.py" })),
    );

    service.launch("x = 1\ny = 2").await.unwrap();

    assert_eq!(
        stub.commands(),
        [
            "dumpCell",
            "setBreakpoints",
            "configurationDone",
            "execute",
            "stackTrace",
            "scopes",
            "variables"
        ]
    );
    let calls = stub.calls();
    assert_eq!(calls[0].1, json!({ "code": "x = 1\ny = 2" }));
    assert_eq!(calls[1].1["source"]["path"], "/tmp/a.py");
    assert_eq!(calls[1].1["breakpoints"], json!([{ "line": 2 }, { "line": 5 }]));
    assert_eq!(calls[1].1["sourceModified"], false);
    assert_eq!(calls[3].1, json!({ "code": "x = 1\ny = 2" }));
}

#[tokio::test]
async fn test_launch_stops_when_dump_fails() {
    let service = service();
    let stub = install(&service, StubSession::new().fail("dumpCell", "no kernel"));

    assert!(service.launch("pass").await.is_err());
    assert_eq!(stub.commands(), ["dumpCell"]);
}

#[tokio::test]
async fn test_update_breakpoints_waits_for_start() {
    let service = service();
    service.update_breakpoints().await.unwrap();

    let stub = install(&service, StubSession::new().not_started());
    service.model().breakpoints.add(3);
    service.update_breakpoints().await.unwrap();
    assert!(stub.calls().is_empty());
}

#[tokio::test]
async fn test_update_breakpoints_resends_for_current_code() {
    let service = service();
    service.model().set_code("a = 1\nb = 2\n");
    service.model().breakpoints.add(2);
    let stub = install(
        &service,
        StubSession::new().respond("dumpCell", json!({ "sourcePath": "/tmp/b.py" })),
    );

    service.update_breakpoints().await.unwrap();
    assert_eq!(
        stub.commands(),
        ["dumpCell", "setBreakpoints", "configurationDone"]
    );
    assert_eq!(stub.calls()[0].1["code"], "a = 1\nb = 2\n");
    assert_eq!(stub.calls()[1].1["breakpoints"], json!([{ "line": 2 }]));
}

#[tokio::test]
async fn test_dispose_is_idempotent() {
    let service = service();
    let mut events = service.event_message();
    let stub = install(&service, StubSession::new());

    service.dispose();
    service.dispose();
    assert!(service.is_disposed());
    assert_eq!(stub.dispose_count(), 1);
    assert!(matches!(events.recv().await, Err(RecvError::Closed)));

    assert!(matches!(
        service.get_all_frames().await,
        Err(Error::SessionDisposed)
    ));

    let late = Arc::new(StubSession::new());
    service.set_session(late.clone());
    assert!(service.session().is_none());
    assert_eq!(late.dispose_count(), 0);
}
