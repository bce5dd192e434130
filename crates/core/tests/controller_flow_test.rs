//! Call controller end-to-end flows against recording mocks

mod harness;

use harness::{
    eventually, init_tracing, wait_for_event, wait_for_state, MockMedia, MockSignaling,
    MockTransportFactory, TransportOp,
};
use peercall_core::{
    CallConfig, CallController, CallEvent, CallState, ConnectionState, EndReason, Error,
    IceCandidate, MediaKind, SdpType, SignalEvent, TransportEvent,
};
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    controller: CallController,
    factory: Arc<MockTransportFactory>,
    signaling: Arc<MockSignaling>,
    media: Arc<MockMedia>,
}

fn fixture_with(config: CallConfig) -> Fixture {
    init_tracing();
    let factory = MockTransportFactory::new();
    let signaling = MockSignaling::new();
    let media = MockMedia::new();

    let controller = CallController::new(config, factory.clone(), media.clone())
        .expect("valid config");
    controller.start(signaling.clone()).expect("start");

    Fixture {
        controller,
        factory,
        signaling,
        media,
    }
}

fn fixture() -> Fixture {
    fixture_with(CallConfig::default())
}

#[tokio::test]
async fn test_caller_flow_reaches_connected() {
    let f = fixture();
    let mut events = f.controller.subscribe();
    let mut state = f.controller.watch_state();

    f.controller.call_user("bob").await.unwrap();
    assert_eq!(f.controller.state(), CallState::Requesting);

    let offers = f.signaling.sent_of(SignalEvent::Offer);
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].to_user_id, "bob");
    assert_eq!(offers[0].payload["toUserId"], "bob");
    assert_eq!(offers[0].payload["offer"]["type"], "offer");

    let transport = f.factory.last().unwrap();
    assert_eq!(
        transport.ops(),
        vec![
            TransportOp::AddTrack("audio-0".into()),
            TransportOp::AddTrack("video-0".into()),
            TransportOp::CreateOffer,
            TransportOp::SetLocal(SdpType::Offer),
        ]
    );

    f.signaling.inject_answer("bob");
    eventually("answer applied", || {
        transport
            .position(&TransportOp::SetRemote(SdpType::Answer))
            .is_some()
    })
    .await;
    assert_eq!(f.controller.state(), CallState::Requesting);

    transport.fire_state(ConnectionState::Connected);
    wait_for_state(&mut state, CallState::Connected).await;

    let event = wait_for_event(&mut events, |e| matches!(e, CallEvent::Connected { .. })).await;
    match event {
        CallEvent::Connected { remote_user_id } => assert_eq!(remote_user_id, "bob"),
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_callee_flow_sends_exactly_one_answer() {
    let f = fixture();
    let mut events = f.controller.subscribe();
    let mut state = f.controller.watch_state();

    f.signaling.inject_offer("alice");

    let event = wait_for_event(&mut events, |e| matches!(e, CallEvent::Incoming { .. })).await;
    assert!(matches!(event, CallEvent::Incoming { remote_user_id } if remote_user_id == "alice"));
    wait_for_state(&mut state, CallState::Ringing).await;

    eventually("answer sent", || f.signaling.count(SignalEvent::Answer) == 1).await;
    let answers = f.signaling.sent_of(SignalEvent::Answer);
    assert_eq!(answers[0].to_user_id, "alice");
    assert_eq!(answers[0].payload["answer"]["type"], "answer");
    assert_eq!(f.controller.state(), CallState::Ringing);

    let transport = f.factory.last().unwrap();
    let remote = transport
        .position(&TransportOp::SetRemote(SdpType::Offer))
        .unwrap();
    let create = transport.position(&TransportOp::CreateAnswer).unwrap();
    let local = transport
        .position(&TransportOp::SetLocal(SdpType::Answer))
        .unwrap();
    assert!(remote < create && create < local);

    transport.fire_state(ConnectionState::Connected);
    wait_for_state(&mut state, CallState::Connected).await;
    assert_eq!(f.signaling.count(SignalEvent::Answer), 1);
    assert_eq!(f.signaling.count(SignalEvent::Offer), 0);
}

#[tokio::test]
async fn test_call_then_immediate_hangup() {
    let f = fixture();
    let gate = f.media.hold();
    let mut state = f.controller.watch_state();

    let (call_result, hangup_result) = tokio::join!(f.controller.call_user("bob"), async {
        wait_for_state(&mut state, CallState::Requesting).await;
        f.controller.hangup().await
    });

    assert!(matches!(call_result, Err(Error::CallEnded(_))));
    hangup_result.unwrap();
    assert_eq!(f.controller.state(), CallState::Idle);
    assert_eq!(f.signaling.count(SignalEvent::Hangup), 1);
    assert_eq!(f.signaling.count(SignalEvent::Offer), 0);

    // Media that arrives after the call ended is released at once
    gate.notify_one();
    eventually("late media released", || f.media.all_released()).await;
    assert_eq!(f.factory.created_count(), 0);
    assert_eq!(f.signaling.count(SignalEvent::Hangup), 1);
}

#[tokio::test]
async fn test_inbound_hangup_while_idle_is_noop() {
    let f = fixture();
    let mut events = f.controller.subscribe();

    f.signaling.inject_hangup("bob");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(f.controller.state(), CallState::Idle);
    assert!(f.signaling.sent().is_empty());
    assert!(events.try_recv().is_err());

    // Local hangup while idle is a no-op as well
    f.controller.hangup().await.unwrap();
    assert!(f.signaling.sent().is_empty());

    f.controller.call_user("bob").await.unwrap();
    assert_eq!(f.controller.state(), CallState::Requesting);
}

#[tokio::test]
async fn test_transport_failure_tears_down_without_hangup() {
    let f = fixture();
    let mut events = f.controller.subscribe();
    let mut state = f.controller.watch_state();

    f.controller.call_user("bob").await.unwrap();
    f.signaling.inject_answer("bob");
    let transport = f.factory.last().unwrap();
    transport.fire_state(ConnectionState::Connected);
    wait_for_state(&mut state, CallState::Connected).await;

    transport.fire_state(ConnectionState::Failed);
    wait_for_state(&mut state, CallState::Idle).await;

    let event = wait_for_event(&mut events, |e| matches!(e, CallEvent::Ended { .. })).await;
    assert!(matches!(
        event,
        CallEvent::Ended {
            reason: EndReason::TransportFailed,
            ..
        }
    ));
    assert_eq!(f.signaling.count(SignalEvent::Hangup), 0);
    assert_eq!(transport.close_count(), 1);
    assert!(f.media.all_released());
}

#[tokio::test]
async fn test_transport_closed_tears_down_without_hangup() {
    let f = fixture();
    let mut events = f.controller.subscribe();
    let mut state = f.controller.watch_state();

    f.signaling.inject_offer("alice");
    eventually("answer sent", || f.signaling.count(SignalEvent::Answer) == 1).await;
    let transport = f.factory.last().unwrap();
    transport.fire_state(ConnectionState::Connected);
    wait_for_state(&mut state, CallState::Connected).await;

    transport.fire_state(ConnectionState::Closed);
    wait_for_state(&mut state, CallState::Idle).await;

    let event = wait_for_event(&mut events, |e| matches!(e, CallEvent::Ended { .. })).await;
    assert!(matches!(
        event,
        CallEvent::Ended {
            reason: EndReason::TransportClosed,
            ..
        }
    ));
    assert_eq!(f.signaling.count(SignalEvent::Hangup), 0);
    assert_eq!(transport.close_count(), 1);
    assert!(f.media.all_released());
}

#[tokio::test]
async fn test_transport_failure_racing_local_hangup_ends_once() {
    let f = fixture();
    let mut events = f.controller.subscribe();
    let mut state = f.controller.watch_state();

    f.controller.call_user("bob").await.unwrap();
    f.signaling.inject_answer("bob");
    let transport = f.factory.last().unwrap();
    transport.fire_state(ConnectionState::Connected);
    wait_for_state(&mut state, CallState::Connected).await;

    let (_, hangup_result) = tokio::join!(
        async { transport.fire_state(ConnectionState::Failed) },
        f.controller.hangup()
    );
    hangup_result.unwrap();
    wait_for_state(&mut state, CallState::Idle).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut ended = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, CallEvent::Ended { .. }) {
            ended += 1;
        }
    }
    assert_eq!(ended, 1);
    assert_eq!(transport.close_count(), 1);
    assert!(f.signaling.count(SignalEvent::Hangup) <= 1);
    assert!(f.media.all_released());
}

#[tokio::test]
async fn test_rejected_answer_hangs_up_with_negotiation_failure() {
    let f = fixture();
    let mut events = f.controller.subscribe();
    let mut state = f.controller.watch_state();

    f.controller.call_user("bob").await.unwrap();
    let transport = f.factory.last().unwrap();
    transport.fail_remote_description();

    f.signaling.inject_answer("bob");
    wait_for_state(&mut state, CallState::Idle).await;

    let event = wait_for_event(&mut events, |e| matches!(e, CallEvent::Ended { .. })).await;
    assert!(matches!(
        event,
        CallEvent::Ended {
            reason: EndReason::NegotiationFailed(_),
            ..
        }
    ));
    let hangups = f.signaling.sent_of(SignalEvent::Hangup);
    assert_eq!(hangups.len(), 1);
    assert_eq!(hangups[0].to_user_id, "bob");
    assert!(transport
        .position(&TransportOp::SetRemote(SdpType::Answer))
        .is_none());
    assert_eq!(transport.close_count(), 1);
    assert!(f.media.all_released());
}

#[tokio::test]
async fn test_disconnected_transport_keeps_call() {
    let f = fixture();
    let mut state = f.controller.watch_state();

    f.controller.call_user("bob").await.unwrap();
    let transport = f.factory.last().unwrap();
    transport.fire_state(ConnectionState::Connected);
    wait_for_state(&mut state, CallState::Connected).await;

    // ICE may recover from a disconnect
    transport.fire_state(ConnectionState::Negotiating);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(f.controller.state(), CallState::Connected);
    assert_eq!(transport.close_count(), 0);
}

#[tokio::test]
async fn test_remote_hangup_ends_call_without_echo() {
    let f = fixture();
    let mut events = f.controller.subscribe();
    let mut state = f.controller.watch_state();

    f.controller.call_user("bob").await.unwrap();
    f.signaling.inject_hangup("bob");
    wait_for_state(&mut state, CallState::Idle).await;

    let event = wait_for_event(&mut events, |e| matches!(e, CallEvent::Ended { .. })).await;
    assert!(matches!(
        event,
        CallEvent::Ended {
            reason: EndReason::RemoteHangup,
            ..
        }
    ));
    assert_eq!(f.signaling.count(SignalEvent::Hangup), 0);
    assert_eq!(f.factory.last().unwrap().close_count(), 1);
}

#[tokio::test]
async fn test_second_call_user_is_busy() {
    let f = fixture();
    f.controller.call_user("bob").await.unwrap();

    let result = f.controller.call_user("carol").await;
    assert!(matches!(result, Err(Error::Busy(_))));
    assert_eq!(f.signaling.count(SignalEvent::Offer), 1);
    assert_eq!(f.factory.created_count(), 1);
}

#[tokio::test]
async fn test_call_user_requires_connected_signaling() {
    let f = fixture();
    f.signaling.set_connected(false);

    let result = f.controller.call_user("bob").await;
    assert!(matches!(result, Err(Error::SignalingUnavailable(_))));
    assert_eq!(f.controller.state(), CallState::Idle);
    assert_eq!(f.media.acquisitions(), 0);
}

#[tokio::test]
async fn test_caller_media_failure_sends_nothing() {
    let f = fixture();
    let mut events = f.controller.subscribe();
    f.media.fail();

    let result = f.controller.call_user("bob").await;
    assert!(matches!(result, Err(Error::MediaUnavailable(_))));
    assert_eq!(f.controller.state(), CallState::Idle);
    assert!(f.signaling.sent().is_empty());
    assert_eq!(f.factory.created_count(), 0);

    let event = wait_for_event(&mut events, |e| matches!(e, CallEvent::Ended { .. })).await;
    assert!(matches!(
        event,
        CallEvent::Ended {
            reason: EndReason::MediaUnavailable(_),
            ..
        }
    ));
}

#[tokio::test]
async fn test_callee_media_failure_hangs_up_caller() {
    let f = fixture();
    let mut state = f.controller.watch_state();
    f.media.fail();

    f.signaling.inject_offer("alice");
    eventually("hangup sent", || f.signaling.count(SignalEvent::Hangup) == 1).await;
    wait_for_state(&mut state, CallState::Idle).await;

    assert_eq!(f.signaling.sent_of(SignalEvent::Hangup)[0].to_user_id, "alice");
    assert_eq!(f.signaling.count(SignalEvent::Answer), 0);
}

#[tokio::test]
async fn test_remote_hangup_during_media_acquisition_releases_late_media() {
    let f = fixture();
    let gate = f.media.hold();
    let mut state = f.controller.watch_state();

    f.signaling.inject_offer("alice");
    wait_for_state(&mut state, CallState::Ringing).await;
    f.signaling.inject_hangup("alice");
    wait_for_state(&mut state, CallState::Idle).await;

    gate.notify_one();
    eventually("late media released", || f.media.all_released()).await;
    assert_eq!(f.factory.created_count(), 0);
    assert_eq!(f.signaling.count(SignalEvent::Answer), 0);
    assert_eq!(f.signaling.count(SignalEvent::Hangup), 0);
}

#[tokio::test]
async fn test_offer_while_busy_is_declined() {
    let f = fixture();
    f.controller.call_user("bob").await.unwrap();

    f.signaling.inject_offer("carol");
    eventually("busy sent", || f.signaling.count(SignalEvent::Busy) == 1).await;

    assert_eq!(f.signaling.sent_of(SignalEvent::Busy)[0].to_user_id, "carol");
    assert_eq!(f.controller.state(), CallState::Requesting);
    assert_eq!(f.factory.created_count(), 1);
}

#[tokio::test]
async fn test_offer_while_busy_is_ignored_when_decline_disabled() {
    let f = fixture_with(CallConfig {
        decline_when_busy: false,
        ..CallConfig::default()
    });
    f.controller.call_user("bob").await.unwrap();

    f.signaling.inject_offer("carol");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(f.signaling.count(SignalEvent::Busy), 0);
    assert_eq!(f.controller.state(), CallState::Requesting);
}

#[tokio::test]
async fn test_remote_busy_ends_request() {
    let f = fixture();
    let mut events = f.controller.subscribe();
    let mut state = f.controller.watch_state();

    f.controller.call_user("bob").await.unwrap();
    f.signaling
        .inject(SignalEvent::Busy, serde_json::json!({"fromUserId": "bob"}));
    wait_for_state(&mut state, CallState::Idle).await;

    let event = wait_for_event(&mut events, |e| matches!(e, CallEvent::Ended { .. })).await;
    assert!(matches!(
        event,
        CallEvent::Ended {
            reason: EndReason::RemoteBusy,
            ..
        }
    ));
    assert_eq!(f.signaling.count(SignalEvent::Hangup), 0);
}

#[tokio::test]
async fn test_stray_signals_are_dropped() {
    let f = fixture();
    f.controller.call_user("bob").await.unwrap();

    f.signaling.inject_hangup("mallory");
    f.signaling.inject(SignalEvent::Busy, serde_json::json!({"fromUserId": "mallory"}));
    f.signaling.inject_answer("mallory");
    f.signaling.inject_candidate("mallory", "stray");
    f.signaling.inject_candidate("bob", "c1");
    f.signaling.inject_answer("bob");

    let transport = f.factory.last().unwrap();
    eventually("answer applied", || {
        transport
            .position(&TransportOp::SetRemote(SdpType::Answer))
            .is_some()
    })
    .await;

    assert_eq!(f.controller.state(), CallState::Requesting);
    assert_eq!(transport.applied_candidates(), vec!["c1"]);
    let answers = transport
        .ops()
        .into_iter()
        .filter(|op| *op == TransportOp::SetRemote(SdpType::Answer))
        .count();
    assert_eq!(answers, 1);
}

#[tokio::test]
async fn test_malformed_signal_is_ignored() {
    let f = fixture();
    f.signaling
        .inject(SignalEvent::Offer, serde_json::json!({"fromUserId": "alice"}));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(f.controller.state(), CallState::Idle);
    assert_eq!(f.factory.created_count(), 0);
}

#[tokio::test]
async fn test_local_candidates_are_relayed() {
    let f = fixture();
    f.controller.call_user("bob").await.unwrap();

    let transport = f.factory.last().unwrap();
    let mut candidate = IceCandidate::new("candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host");
    candidate.sdp_mid = Some("0".into());
    candidate.sdp_mline_index = Some(0);
    transport.fire(TransportEvent::LocalCandidate(candidate));

    eventually("candidate sent", || f.signaling.count(SignalEvent::Ice) == 1).await;
    let sent = &f.signaling.sent_of(SignalEvent::Ice)[0];
    assert_eq!(sent.to_user_id, "bob");
    assert_eq!(sent.payload["candidate"]["sdpMid"], "0");
    assert_eq!(sent.payload["candidate"]["sdpMLineIndex"], 0);
}

#[tokio::test]
async fn test_remote_tracks_are_published() {
    let f = fixture();
    let mut events = f.controller.subscribe();
    f.controller.call_user("bob").await.unwrap();

    let transport = f.factory.last().unwrap();
    transport.fire(TransportEvent::RemoteTrack {
        stream_id: "remote".into(),
        track: harness::MockTrack::new("remote-audio", MediaKind::Audio),
    });
    transport.fire(TransportEvent::RemoteTrack {
        stream_id: "remote".into(),
        track: harness::MockTrack::new("remote-video", MediaKind::Video),
    });

    let mut seen = 0;
    while seen < 2 {
        let event =
            wait_for_event(&mut events, |e| matches!(e, CallEvent::RemoteMedia { .. })).await;
        seen += 1;
        if let CallEvent::RemoteMedia { media, .. } = event {
            assert_eq!(media.stream_id, "remote");
            assert_eq!(media.tracks.len(), seen);
        }
    }
}

#[tokio::test]
async fn test_stop_hangs_up_and_allows_restart() {
    let f = fixture();
    f.controller.call_user("bob").await.unwrap();
    assert_eq!(f.signaling.handler_count(), SignalEvent::ALL.len());

    f.controller.stop().await.unwrap();

    assert!(!f.controller.is_running());
    assert_eq!(f.controller.state(), CallState::Idle);
    assert_eq!(f.signaling.count(SignalEvent::Hangup), 1);
    assert_eq!(f.signaling.handler_count(), 0);
    assert!(f.media.all_released());
    assert!(matches!(
        f.controller.hangup().await,
        Err(Error::ControllerStopped)
    ));

    // Stopping twice is harmless
    f.controller.stop().await.unwrap();

    f.controller.start(f.signaling.clone()).unwrap();
    f.controller.call_user("carol").await.unwrap();
    assert_eq!(f.signaling.sent_of(SignalEvent::Offer)[1].to_user_id, "carol");
}

#[tokio::test]
async fn test_start_twice_fails() {
    let f = fixture();
    let result = f.controller.start(f.signaling.clone());
    assert!(matches!(result, Err(Error::InvalidState(_))));
}

#[tokio::test(start_paused = true)]
async fn test_ring_timeout_hangs_up() {
    let f = fixture_with(CallConfig {
        ring_timeout_secs: Some(5),
        ..CallConfig::default()
    });
    let mut events = f.controller.subscribe();

    f.controller.call_user("bob").await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            if let Ok(event @ CallEvent::Ended { .. }) = events.recv().await {
                return event;
            }
        }
    })
    .await
    .expect("ring timeout never fired");

    assert!(matches!(
        event,
        CallEvent::Ended {
            reason: EndReason::Timeout,
            ..
        }
    ));
    assert_eq!(f.controller.state(), CallState::Idle);
    assert_eq!(f.signaling.count(SignalEvent::Hangup), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connected_call_is_not_timed_out() {
    let f = fixture_with(CallConfig {
        ring_timeout_secs: Some(5),
        ..CallConfig::default()
    });
    let mut state = f.controller.watch_state();

    f.controller.call_user("bob").await.unwrap();
    f.factory
        .last()
        .unwrap()
        .fire_state(ConnectionState::Connected);
    tokio::time::timeout(
        Duration::from_secs(1),
        state.wait_for(|s| *s == CallState::Connected),
    )
    .await
    .unwrap()
    .unwrap();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(f.controller.state(), CallState::Connected);
    assert_eq!(f.signaling.count(SignalEvent::Hangup), 0);
}
