use super::*;
use crate::test_support::{init_tracing, spawn_device, MemoryLink};
use dau_gateway_protocol::message::{
    ErrorResponse, HealthResponse, HeartbeatRequest, HeartbeatResponse, StatusCode,
};

fn heartbeat_ok(uptime_s: u64) -> ResponseKind {
    ResponseKind::Heartbeat(HeartbeatResponse {
        status: StatusCode::Ok as i32,
        uptime_s,
    })
}

#[tokio::test]
async fn heartbeat_round_trip() {
    init_tracing();
    let (link, outbox) = MemoryLink::new();
    link.connect("dau-7");
    let orchestrator = Orchestrator::new("server", link.clone(), Timeouts::default());
    spawn_device(link, outbox, |_, _| vec![heartbeat_ok(42)]);

    let resp = orchestrator
        .heartbeat("dau-7", HeartbeatRequest {})
        .await
        .unwrap();
    assert_eq!(resp.uptime_s, 42);
    assert_eq!(orchestrator.pending_count(), 0);
}

#[tokio::test]
async fn first_request_uses_sequence_one() {
    let (link, mut outbox) = MemoryLink::new();
    link.connect("dau-7");
    let orchestrator = Orchestrator::new("server", link.clone(), Timeouts::default());

    let call = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.heartbeat("dau-7", HeartbeatRequest {}).await })
    };
    let (device_id, sent) = outbox.recv().await.unwrap();
    assert_eq!(device_id, "dau-7");
    assert_eq!(sent.sequence(), 1);
    assert_eq!(sent.sender_id(), "server");
    link.respond("dau-7", 1, heartbeat_ok(1));
    assert!(call.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn silent_device_hits_deadline_and_waiter_is_removed() {
    let (link, _outbox) = MemoryLink::new();
    link.connect("dau-7");
    let orchestrator = Orchestrator::new("server", link.clone(), Timeouts::default());

    let started = Instant::now();
    let err = orchestrator
        .heartbeat("dau-7", HeartbeatRequest {})
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(
        err,
        CommandError::DeadlineExceeded {
            device: "dau-7".into(),
            sequence: 1,
            timeout: Duration::from_secs(10),
        }
    );
    assert!(elapsed >= Duration::from_secs(10));
    assert!(elapsed < Duration::from_millis(10_050));
    assert_eq!(orchestrator.pending_count(), 0);
}

#[tokio::test]
async fn disconnected_device_is_unavailable() {
    let (link, _outbox) = MemoryLink::new();
    let orchestrator = Orchestrator::new("server", link, Timeouts::default());

    let err = orchestrator
        .heartbeat("dau-9", HeartbeatRequest {})
        .await
        .unwrap_err();
    assert_eq!(err, CommandError::Unavailable("dau-9".into()));
    assert_eq!(orchestrator.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn connection_loss_fails_new_commands_and_times_out_inflight_ones() {
    let (link, mut outbox) = MemoryLink::new();
    link.connect("dau-7");
    let orchestrator = Orchestrator::new("server", link.clone(), Timeouts::default());

    let inflight = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.heartbeat("dau-7", HeartbeatRequest {}).await })
    };
    let (_, sent) = outbox.recv().await.unwrap();
    link.disconnect("dau-7");

    let err = orchestrator
        .heartbeat("dau-7", HeartbeatRequest {})
        .await
        .unwrap_err();
    assert_eq!(err, CommandError::Unavailable("dau-7".into()));

    let err = inflight.await.unwrap().unwrap_err();
    assert!(
        matches!(err, CommandError::DeadlineExceeded { sequence, .. } if sequence == sent.sequence())
    );
    assert_eq!(orchestrator.pending_count(), 0);
}

#[tokio::test]
async fn wrong_response_shape_is_internal() {
    let (link, outbox) = MemoryLink::new();
    link.connect("dau-7");
    let orchestrator = Orchestrator::new("server", link.clone(), Timeouts::default());
    spawn_device(link, outbox, |_, _| {
        vec![ResponseKind::Health(HealthResponse::default())]
    });

    let err = orchestrator
        .heartbeat("dau-7", HeartbeatRequest {})
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::Internal(msg) if msg.contains("health")));
}

#[tokio::test]
async fn device_error_response_is_rejected() {
    let (link, outbox) = MemoryLink::new();
    link.connect("dau-7");
    let orchestrator = Orchestrator::new("server", link.clone(), Timeouts::default());
    spawn_device(link, outbox, |_, _| {
        vec![ResponseKind::Error(ErrorResponse {
            code: StatusCode::NotSupported as i32,
            message: "unknown command".into(),
        })]
    });

    let err = orchestrator
        .heartbeat("dau-7", HeartbeatRequest {})
        .await
        .unwrap_err();
    assert_eq!(
        err,
        CommandError::Rejected {
            device: "dau-7".into(),
            status: "NOT_SUPPORTED".into(),
            message: "unknown command".into(),
        }
    );
}

#[tokio::test]
async fn foreign_and_request_envelopes_do_not_resolve_waiters() {
    let (link, mut outbox) = MemoryLink::new();
    link.connect("dau-1");
    let orchestrator = Orchestrator::new("server", link.clone(), Timeouts::default());

    let call = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.heartbeat("dau-1", HeartbeatRequest {}).await })
    };
    let (_, sent) = outbox.recv().await.unwrap();
    let sequence = sent.sequence();

    // same sequence from another device, and a device-issued request
    link.respond("dau-2", sequence, heartbeat_ok(2));
    link.deliver(
        "dau-1",
        Envelope::request("dau-1", sequence, RequestKind::Heartbeat(HeartbeatRequest {})),
    );
    tokio::task::yield_now().await;
    assert_eq!(orchestrator.pending_count(), 1);

    link.respond("dau-1", sequence, heartbeat_ok(1));
    assert_eq!(call.await.unwrap().unwrap().uptime_s, 1);
}

#[tokio::test]
async fn concurrent_calls_resolve_independently() {
    let (link, mut outbox) = MemoryLink::new();
    link.connect("dau-1");
    let orchestrator = Orchestrator::new("server", link.clone(), Timeouts::default());

    let first = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.heartbeat("dau-1", HeartbeatRequest {}).await })
    };
    let second = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.heartbeat("dau-1", HeartbeatRequest {}).await })
    };
    let (_, a) = outbox.recv().await.unwrap();
    let (_, b) = outbox.recv().await.unwrap();
    assert_ne!(a.sequence(), b.sequence());

    // answer out of order, uptime tags the sequence
    link.respond("dau-1", b.sequence(), heartbeat_ok(u64::from(b.sequence())));
    link.respond("dau-1", a.sequence(), heartbeat_ok(u64::from(a.sequence())));

    let mut uptimes = vec![
        first.await.unwrap().unwrap().uptime_s,
        second.await.unwrap().unwrap().uptime_s,
    ];
    uptimes.sort_unstable();
    let mut expected = vec![u64::from(a.sequence()), u64::from(b.sequence())];
    expected.sort_unstable();
    assert_eq!(uptimes, expected);
}

#[tokio::test(start_paused = true)]
async fn late_response_is_ignored() {
    let (link, mut outbox) = MemoryLink::new();
    link.connect("dau-1");
    let orchestrator = Orchestrator::new("server", link.clone(), Timeouts::default());

    let err = orchestrator
        .heartbeat("dau-1", HeartbeatRequest {})
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    let (_, sent) = outbox.recv().await.unwrap();

    link.respond("dau-1", sent.sequence(), heartbeat_ok(1));
    tokio::task::yield_now().await;
    assert_eq!(orchestrator.pending_count(), 0);
}
