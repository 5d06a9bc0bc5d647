//! Scenario tests: whole rooms driven through signaling and transport
//! events, backed by the in-memory capabilities.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use huddle_core::capability::PeerConnectionState;
use huddle_core::quality::QualitySignal;
use huddle_core::remote::{HostInstallPrompt, ImageFormat, RemoteFrame};
use huddle_core::sim::{
    RecordingSignal, SimCall, SimNetwork, SimPeerConnection, SimTransportFactory, SimVideoTrack,
};
use huddle_core::{
    CallHandle, CallSessionManager, EffectiveType, LocalStream, NetworkHint, OutboundSignal,
    QualityMode, RoomConfig, RoomSession, TransportEvent, VideoConstraints,
};
use serde_json::json;

// ── Helpers ──────────────────────────────────────────────────────

struct Peer {
    room: RoomSession,
    signal: Arc<RecordingSignal>,
    factory: Arc<SimTransportFactory>,
    network: Arc<SimNetwork>,
}

fn peer(identity: &str) -> Peer {
    let signal = RecordingSignal::new();
    let factory = SimTransportFactory::new();
    let network = SimNetwork::new(NetworkHint::default());
    let room = RoomSession::new(
        identity,
        signal.clone(),
        factory.clone(),
        network.clone(),
        RoomConfig::default(),
    )
    .unwrap();
    Peer {
        room,
        signal,
        factory,
        network,
    }
}

fn signal(room: &mut RoomSession, event: &str, payload: serde_json::Value) {
    assert!(room.handle_raw_signal(event, payload), "{event} rejected");
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn frame(session_id: &str) -> serde_json::Value {
    json!({ "sessionId": session_id, "image": "aGk=", "format": "png" })
}

// ── Calls ────────────────────────────────────────────────────────

#[test]
fn test_alice_and_bob_end_up_with_one_call_each() {
    let mut alice = peer("alice");
    let mut bob = peer("bob");

    for p in [&mut alice, &mut bob] {
        signal(&mut p.room, "connect", json!(null));
        p.room.set_local_stream(Some(LocalStream::new("cam")));
        signal(&mut p.room, "get-users", json!({ "users": ["alice", "bob"] }));
    }

    let alice_transport = alice.factory.created()[0].clone();
    let bob_transport = bob.factory.created()[0].clone();
    assert_eq!(alice_transport.dialed(), ids(&["bob"]));
    assert!(bob_transport.dialed().is_empty());

    // The transport delivers alice's offer to bob.
    let outbound = alice_transport.last_call("bob").unwrap();
    let inbound = SimCall::inbound(outbound.call_id(), "alice");
    bob.room
        .handle_transport(TransportEvent::IncomingCall(inbound.clone()));
    assert!(inbound.was_answered());

    outbound.deliver_stream("bob-cam");
    inbound.deliver_stream("alice-cam");
    alice.room.pump_call_events();
    bob.room.pump_call_events();

    let a = alice.room.snapshot().calls;
    let b = bob.room.snapshot().calls;
    assert_eq!(a.healthy_peers(), ids(&["bob"]));
    assert_eq!(b.healthy_peers(), ids(&["alice"]));
    assert!(a.calls[0].has_stream);
    assert!(b.calls[0].has_stream);
    assert!(a.pending.is_empty() && b.pending.is_empty());
}

#[test]
fn test_tie_break_holds_regardless_of_call_order() {
    let names = ["peer-b", "peer-a", "peer-c"];
    for local in names {
        for remote in names {
            if local == remote {
                continue;
            }
            let mut p = peer(local);
            p.room.set_local_stream(Some(LocalStream::new("cam")));
            // Ask twice, in both roster and join form.
            p.room.call_or_queue(remote);
            signal(&mut p.room, "get-users", json!([local, remote]));

            let dialed = p.factory.created()[0].dialed();
            if local < remote {
                assert_eq!(dialed, ids(&[remote]), "{local} -> {remote}");
            } else {
                assert!(dialed.is_empty(), "{local} must wait for {remote}");
            }
        }
    }
}

#[test]
fn test_reconciliation_tracks_latest_roster() {
    let mut p = peer("m");
    p.room.set_local_stream(Some(LocalStream::new("cam")));

    let rosters: [&[&str]; 6] = [
        &["m", "n", "o", "p"],
        &["m", "o"],
        &["n", "o", "q", "m"],
        &[],
        &["z", "m"],
        &["m", "n", "z"],
    ];
    for roster in rosters {
        signal(&mut p.room, "get-users", json!(roster));
        p.room.pump_call_events();

        let mut expected: Vec<String> =
            roster.iter().filter(|id| **id != "m").map(|s| s.to_string()).collect();
        expected.sort();
        assert_eq!(p.room.snapshot().calls.healthy_peers(), expected, "{roster:?}");
    }
}

#[test]
fn test_failed_peer_link_is_replaced_on_next_roster() {
    let mut p = peer("a");
    p.room.set_local_stream(Some(LocalStream::new("cam")));
    signal(&mut p.room, "get-users", json!(["a", "b", "c"]));

    let transport = p.factory.created()[0].clone();
    let broken = transport.last_call("b").unwrap();
    let pc = SimPeerConnection::connected();
    pc.set_connection_state(PeerConnectionState::Failed);
    broken.attach_connection(pc);

    signal(&mut p.room, "get-users", json!(["a", "b", "c"]));
    assert!(broken.was_closed());
    assert_eq!(transport.dialed(), ids(&["b", "c", "b"]));
    assert_eq!(p.room.snapshot().calls.healthy_peers(), ids(&["b", "c"]));
}

#[test]
fn test_drain_is_idempotent() {
    let transport = huddle_core::sim::SimTransport::new("solo");
    let (mut manager, _events) = CallSessionManager::new(transport.clone());
    for _ in 0..3 {
        assert!(manager.drain_pending_participants(None, None));
    }
    assert!(transport.dialed().is_empty());
}

#[test]
fn test_queue_survives_transport_outage() {
    let mut p = peer("a");
    p.room.set_local_stream(Some(LocalStream::new("cam")));
    let transport = p.factory.created()[0].clone();
    transport.set_disconnected(true);

    signal(&mut p.room, "user-joined", json!("b"));
    signal(&mut p.room, "user-joined", json!({ "userId": "c" }));
    assert_eq!(p.room.calls().pending_participants(), ids(&["b", "c"]));

    p.room.handle_transport(TransportEvent::Disconnected);
    let delay = p.room.take_reconnect_delay().unwrap();
    assert_eq!(delay, Duration::from_millis(500));
    p.room.reconnect_transport();
    p.room.handle_transport(TransportEvent::Open);

    assert!(p.room.calls().pending_participants().is_empty());
    assert_eq!(transport.dialed(), ids(&["b", "c"]));
}

// ── Remote desktop ───────────────────────────────────────────────

#[test]
fn test_host_offline_prompts_install() {
    let mut p = peer("alice");
    signal(&mut p.room, "connect", json!(null));
    p.signal.take();

    assert!(p.room.remote_mut().request_remote_desktop_session("host-1"));
    assert_eq!(
        p.signal.take(),
        vec![OutboundSignal::SessionRequest {
            host_id: "host-1".into()
        }]
    );

    signal(
        &mut p.room,
        "remote-session-pending",
        json!({ "requestId": "r1", "hostId": "host-1" }),
    );
    signal(&mut p.room, "remote-session-error", json!({ "code": "host-offline" }));

    let remote = p.room.snapshot().remote;
    assert!(remote.pending.is_none());
    assert!(remote.session.is_none());
    assert_eq!(
        remote.install_prompt,
        Some(HostInstallPrompt {
            host_id: Some("host-1".into()),
            download_url: huddle_core::remote::DEFAULT_HOST_APP_DOWNLOAD_URL.into(),
        })
    );
}

#[test]
fn test_disconnect_resumes_session_on_same_host() {
    let mut p = peer("alice");
    signal(&mut p.room, "connect", json!(null));
    signal(&mut p.room, "remote-hosts-list", json!({ "hosts": [{ "id": "host-1" }] }));
    p.room.remote_mut().claim_remote_host("host-1");
    signal(&mut p.room, "remote-host-claimed", json!({ "hostId": "host-1" }));
    p.room.remote_mut().request_remote_desktop_session("host-1");
    signal(
        &mut p.room,
        "remote-session-started",
        json!({ "sessionId": "s1", "hostId": "host-1" }),
    );

    signal(&mut p.room, "disconnect", json!("transport close"));
    let remote = p.room.snapshot().remote;
    assert!(remote.session.is_none());
    assert!(remote.hosts.is_empty());
    assert_eq!(remote.auto_claim_target.as_deref(), Some("host-1"));

    p.signal.take();
    signal(&mut p.room, "connect", json!(null));
    signal(&mut p.room, "remote-hosts-list", json!([{ "hostId": "host-1", "busy": false }]));
    assert_eq!(
        p.signal.take(),
        vec![
            OutboundSignal::HostsRequest,
            OutboundSignal::HostClaim {
                host_id: "host-1".into()
            },
            OutboundSignal::SessionRequest {
                host_id: "host-1".into()
            },
        ]
    );

    signal(&mut p.room, "remote-host-claimed", json!({ "hostId": "host-1" }));
    signal(
        &mut p.room,
        "remote-session-pending",
        json!({ "requestId": "r2", "hostId": "host-1" }),
    );
    signal(
        &mut p.room,
        "remote-session-started",
        json!({ "sessionId": "s2", "hostId": "host-1" }),
    );

    let remote = p.room.snapshot().remote;
    assert_eq!(remote.session.unwrap().session_id, "s2");
    assert!(remote.auto_claim_target.is_none());
    assert!(remote.auto_request_target.is_none());

    // Hosts list repeats: nothing more is requested.
    p.signal.take();
    signal(&mut p.room, "remote-hosts-list", json!([{ "hostId": "host-1" }]));
    assert!(p.signal.take().is_empty());
}

#[test]
fn test_disconnect_reclaims_host_without_session() {
    let mut p = peer("alice");
    signal(&mut p.room, "connect", json!(null));
    signal(&mut p.room, "remote-hosts-list", json!({ "hosts": [{ "id": "host-1" }] }));
    p.room.remote_mut().claim_remote_host("host-1");
    signal(&mut p.room, "remote-host-claimed", json!({ "hostId": "host-1" }));

    signal(&mut p.room, "disconnect", json!("ping timeout"));
    let remote = p.room.snapshot().remote;
    assert!(remote.claimed_host_id.is_none());
    assert_eq!(remote.auto_claim_target.as_deref(), Some("host-1"));
    assert!(remote.auto_request_target.is_none());

    p.signal.take();
    signal(&mut p.room, "connect", json!(null));
    signal(&mut p.room, "remote-hosts-list", json!([{ "hostId": "host-1" }]));
    assert_eq!(
        p.signal.take(),
        vec![
            OutboundSignal::HostsRequest,
            OutboundSignal::HostClaim {
                host_id: "host-1".into()
            },
        ]
    );

    signal(&mut p.room, "remote-host-claimed", json!({ "hostId": "host-1" }));
    let remote = p.room.snapshot().remote;
    assert_eq!(remote.claimed_host_id.as_deref(), Some("host-1"));
    assert!(remote.auto_claim_target.is_none());
    assert!(remote.session.is_none());
}

#[test]
fn test_cancelled_request_never_becomes_active() {
    let mut p = peer("alice");
    signal(&mut p.room, "connect", json!(null));
    p.room.remote_mut().request_remote_desktop_session("host-1");
    signal(
        &mut p.room,
        "remote-session-pending",
        json!({ "requestId": "r1", "hostId": "host-1" }),
    );
    assert!(p.room.remote_mut().stop_remote_desktop_session());

    p.signal.take();
    signal(
        &mut p.room,
        "remote-session-started",
        json!({ "sessionId": "s1", "hostId": "host-1", "requestId": "r1" }),
    );
    assert!(p.room.snapshot().remote.session.is_none());
    assert_eq!(
        p.signal.take(),
        vec![OutboundSignal::SessionStop {
            session_id: Some("s1".into()),
            request_id: None
        }]
    );
}

#[test]
fn test_stale_frames_never_reach_subscribers() {
    let mut p = peer("alice");
    let received: Arc<Mutex<Vec<RemoteFrame>>> = Arc::default();
    let sink = received.clone();
    let _sub = p
        .room
        .remote()
        .subscribe_frames(move |f| sink.lock().unwrap().push(f.clone()));

    signal(
        &mut p.room,
        "remote-session-started",
        json!({ "sessionId": "s1", "hostId": "host-1" }),
    );
    signal(&mut p.room, "remote-frame", frame("s1"));
    signal(
        &mut p.room,
        "remote-session-started",
        json!({ "sessionId": "s2", "hostId": "host-1" }),
    );
    assert!(!p.room.remote().first_frame_received());

    // Late frame from the previous session, then a current one.
    signal(&mut p.room, "remote-frame", frame("s1"));
    signal(&mut p.room, "remote-frame", frame("s2"));

    let frames = received.lock().unwrap();
    let sessions: Vec<&str> = frames.iter().map(|f| f.session_id.as_str()).collect();
    assert_eq!(sessions, vec!["s1", "s2"]);
    assert_eq!(frames[1].format, ImageFormat::Png);
    assert!(p.room.remote().first_frame_received());
}

#[test]
fn test_input_relay_needs_active_session() {
    let mut p = peer("alice");
    let remote = p.room.remote_mut();
    assert!(!remote.send_input_value(json!({ "type": "pointer-move", "x": 0.2, "y": 0.3 })));

    signal(
        &mut p.room,
        "remote-session-started",
        json!({ "sessionId": "s1", "hostId": "host-1" }),
    );
    let remote = p.room.remote_mut();
    assert!(remote.send_input_value(json!({ "type": "key-down", "key": "a", "modifiers": 2 })));
    assert!(!remote.send_input_value(json!({ "type": "pointer-warp", "x": 0.2 })));

    let names: Vec<&str> = p.signal.names();
    assert_eq!(names, vec!["remote-input"]);
}

#[test]
fn test_host_setup_round_trip_between_two_participants() {
    let mut viewer = peer("alice");
    let mut owner = peer("bob");

    assert!(viewer.room.remote_mut().request_remote_host_setup("bob"));
    signal(
        &mut viewer.room,
        "remote-host-setup-pending",
        json!({ "requestId": "setup-1", "targetId": "bob", "suggestedHostId": "bob-pc" }),
    );
    signal(
        &mut owner.room,
        "remote-host-setup-requested",
        json!({ "requestId": "setup-1", "requesterId": "alice", "suggestedHostId": "bob-pc" }),
    );

    owner.signal.take();
    assert!(owner.room.remote_mut().respond_to_host_setup_request(true));
    assert_eq!(
        owner.signal.take(),
        vec![OutboundSignal::HostSetupDecision {
            request_id: "setup-1".into(),
            accepted: true,
            host_id: Some("bob-pc".into()),
        }]
    );

    signal(
        &mut viewer.room,
        "remote-host-setup-result",
        json!({ "requestId": "setup-1", "accepted": true, "hostId": "bob-pc" }),
    );
    assert_eq!(viewer.room.remote().auto_claim_target(), Some("bob-pc"));

    // The agent comes online on bob's machine.
    viewer.signal.take();
    owner.signal.take();
    let hosts = json!([{ "hostId": "bob-pc", "claimedBy": "bob" }]);
    signal(&mut viewer.room, "remote-hosts-list", hosts.clone());
    signal(&mut owner.room, "remote-hosts-list", hosts);

    assert_eq!(viewer.signal.names(), vec!["remote-host-claim"]);
    assert_eq!(owner.signal.names(), vec!["remote-session-request"]);
    assert_eq!(
        owner.room.remote().hosts().get("bob-pc").unwrap().ownership,
        huddle_core::HostOwnership::You
    );
    assert_eq!(
        viewer.room.remote().hosts().get("bob-pc").unwrap().ownership,
        huddle_core::HostOwnership::Other
    );
}

// ── Quality ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_room_adapts_outgoing_video() {
    let mut p = peer("alice");
    let track = SimVideoTrack::new("cam", VideoConstraints::new(1280, 720, 30.0));
    p.network.set(NetworkHint {
        effective_type: Some(EffectiveType::ThreeG),
        ..NetworkHint::default()
    });
    p.room
        .set_local_stream(Some(LocalStream::new("cam").with_video(track.clone())));

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(p.room.quality_mode(), Some(QualityMode::Weak));

    // A lossy call drags quality further down.
    signal(&mut p.room, "get-users", json!(["alice", "bob"]));
    let call = p.factory.created()[0].last_call("bob").unwrap();
    call.deliver_stream("bob-cam");
    p.room.pump_call_events();
    let pc = call.connection().unwrap();
    pc.set_stats(huddle_core::ConnectionStats {
        rtt_ms: Some(1500.0),
        packets_lost: 0,
        packets_received: 500,
    });

    p.room.notify_network(QualitySignal::ConnectionChanged);
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(p.room.quality_mode(), Some(QualityMode::VeryPoor));
    assert_eq!(
        track.applied(),
        vec![
            VideoConstraints::new(640, 360, 15.0),
            VideoConstraints::new(320, 180, 8.0),
        ]
    );

    // Replacing the stream stops the old loop.
    p.room.set_local_stream(Some(LocalStream::new("mic")));
    assert_eq!(p.room.quality_mode(), None);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(track.applied().len(), 2);
}
