//! Script replay.
//!
//! A script is JSON lines. Lines carrying an `event` key are raw
//! signaling events, fed through the same ingress the live channel
//! uses. Lines carrying a `step` key drive the local side: media
//! transport lifecycle, the local stream, the network hint and the
//! remote desktop user operations.
//!
//! ```text
//! {"event": "connect"}
//! {"step": "local-stream", "id": "cam", "video": {"width": 1280, "height": 720, "frame_rate": 30.0}}
//! {"event": "get-users", "payload": {"users": ["replay", "bob"]}}
//! {"step": "deliver-stream", "peer_id": "bob", "stream_id": "bob-cam"}
//! {"step": "request-session", "host_id": "bob"}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use huddle_core::quality::{ConstraintProfile, QualitySignal};
use huddle_core::remote::FrameSubscription;
use huddle_core::sim::{RecordingSignal, SimCall, SimNetwork, SimTransportFactory, SimVideoTrack};
use huddle_core::{
    CallHandle, HuddleError, LocalStream, NetworkHint, RoomConfig, RoomSession, RoomSnapshot,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

// ── Script format ────────────────────────────────────────────────

/// One local-side action.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "step", rename_all = "kebab-case")]
pub enum Step {
    // Media transport
    TransportOpen,
    TransportDisconnected,
    /// Fire the scheduled transport reconnect now.
    TransportReconnect,
    TransportClosed,
    IdTaken,

    // Calls
    IncomingCall {
        call_id: String,
        peer_id: String,
    },
    DeliverStream {
        peer_id: String,
        stream_id: String,
    },
    CloseCall {
        peer_id: String,
    },

    // Local media
    LocalStream {
        id: String,
        #[serde(default)]
        video: Option<ConstraintProfile>,
    },
    ClearStream,
    EndTrack,
    Network {
        #[serde(default)]
        hint: NetworkHint,
    },

    // Remote desktop
    RequestSession {
        host_id: String,
    },
    StopSession,
    RespondApproval {
        accepted: bool,
    },
    ClaimHost {
        host_id: String,
    },
    RequestHostSetup {
        target_id: String,
    },
    RespondHostSetup {
        accepted: bool,
    },
    RequestHosts,
    DismissError,
    SendInput {
        input: Value,
    },

    /// Let spawned tasks (the quality loop) run for a while.
    Sleep {
        ms: u64,
    },
}

/// One parsed script line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ScriptLine {
    Step(Step),
    Signal {
        event: String,
        #[serde(default)]
        payload: Value,
    },
}

/// Parse a whole script, reporting the first bad line.
pub fn parse_script(text: &str) -> Result<Vec<ScriptLine>, HuddleError> {
    let mut lines = Vec::new();
    for (n, raw) in text.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = serde_json::from_str(trimmed)
            .map_err(|e| HuddleError::Other(format!("script line {}: {e}", n + 1)))?;
        lines.push(line);
    }
    Ok(lines)
}

// ── Report ───────────────────────────────────────────────────────

/// An event the room emitted on the signaling channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmittedSignal {
    pub event: String,
    pub payload: Value,
}

/// What a replay produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    /// Script lines applied.
    pub applied: usize,
    /// Script lines the room rejected or could not act on.
    pub rejected: usize,
    pub emitted: Vec<EmittedSignal>,
    /// Peers dialed by every media transport built, in order.
    pub dialed: Vec<String>,
    pub frames: usize,
    pub room: RoomSnapshot,
}

// ── Replayer ─────────────────────────────────────────────────────

/// A room backed by the in-memory capabilities.
pub struct Replayer {
    room: RoomSession,
    signal: Arc<RecordingSignal>,
    factory: Arc<SimTransportFactory>,
    network: Arc<SimNetwork>,
    track: Option<Arc<SimVideoTrack>>,
    inbound: HashMap<String, Arc<SimCall>>,
    frames: Arc<AtomicUsize>,
    _frame_listener: FrameSubscription,
    applied: usize,
    rejected: usize,
}

impl Replayer {
    pub fn new(identity: &str, config: RoomConfig) -> Result<Self, HuddleError> {
        let signal = RecordingSignal::new();
        let factory = SimTransportFactory::new();
        let network = SimNetwork::new(NetworkHint::default());
        let room = RoomSession::new(
            identity,
            signal.clone(),
            factory.clone(),
            network.clone(),
            config,
        )?;

        let frames = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&frames);
        let frame_listener = room.remote().subscribe_frames(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        Ok(Self {
            room,
            signal,
            factory,
            network,
            track: None,
            inbound: HashMap::new(),
            frames,
            _frame_listener: frame_listener,
            applied: 0,
            rejected: 0,
        })
    }

    pub fn room(&self) -> &RoomSession {
        &self.room
    }

    /// Apply every line, then stop the room and report.
    pub async fn run(mut self, script: Vec<ScriptLine>) -> ReplayReport {
        for line in script {
            self.apply(line).await;
        }
        self.finish()
    }

    /// Apply one line. Returns whether the room accepted it.
    pub async fn apply(&mut self, line: ScriptLine) -> bool {
        let accepted = match line {
            ScriptLine::Signal { event, payload } => {
                debug!(%event, "replaying signal");
                self.room.handle_raw_signal(&event, payload)
            }
            ScriptLine::Step(step) => {
                debug!(?step, "replaying step");
                self.step(step).await
            }
        };
        self.room.pump_call_events();

        if accepted {
            self.applied += 1;
        } else {
            self.rejected += 1;
        }
        accepted
    }

    async fn step(&mut self, step: Step) -> bool {
        use huddle_core::TransportEvent;

        match step {
            Step::TransportOpen => {
                self.room.handle_transport(TransportEvent::Open);
                true
            }
            Step::TransportDisconnected => {
                if let Some(t) = self.factory.created().last() {
                    t.set_disconnected(true);
                }
                self.room.handle_transport(TransportEvent::Disconnected);
                true
            }
            Step::TransportReconnect => match self.room.take_reconnect_delay() {
                Some(delay) => {
                    debug!(?delay, "skipping reconnect delay");
                    self.room.reconnect_transport();
                    true
                }
                None => false,
            },
            Step::TransportClosed => {
                if let Some(t) = self.factory.created().last() {
                    t.destroy_now();
                }
                self.room.handle_transport(TransportEvent::Closed);
                true
            }
            Step::IdTaken => {
                self.room.handle_transport(TransportEvent::IdTaken);
                true
            }

            Step::IncomingCall { call_id, peer_id } => {
                let call = SimCall::inbound(call_id, peer_id.clone());
                self.room
                    .handle_transport(TransportEvent::IncomingCall(call.clone()));
                let accepted = call.was_answered();
                self.inbound.insert(peer_id, call);
                accepted
            }
            Step::DeliverStream { peer_id, stream_id } => match self.find_call(&peer_id) {
                Some(call) => call.deliver_stream(stream_id),
                None => {
                    warn!(peer = %peer_id, "no call to deliver a stream on");
                    false
                }
            },
            Step::CloseCall { peer_id } => match self.find_call(&peer_id) {
                Some(call) => call.raise(huddle_core::CallEventKind::Close),
                None => false,
            },

            Step::LocalStream { id, video } => {
                let mut stream = LocalStream::new(id.clone());
                self.track = None;
                if let Some(profile) = video {
                    let track = SimVideoTrack::new(id, profile.to_constraints());
                    stream = stream.with_video(track.clone());
                    self.track = Some(track);
                }
                self.room.set_local_stream(Some(stream));
                true
            }
            Step::ClearStream => {
                self.track = None;
                self.room.set_local_stream(None);
                true
            }
            Step::EndTrack => match &self.track {
                Some(track) => {
                    track.end();
                    self.room.notify_network(QualitySignal::TrackEnded);
                    true
                }
                None => false,
            },
            Step::Network { hint } => {
                self.network.set(hint);
                self.room.notify_network(if hint.online {
                    QualitySignal::Online
                } else {
                    QualitySignal::Offline
                });
                true
            }

            Step::RequestSession { host_id } => {
                self.room.remote_mut().request_remote_desktop_session(&host_id)
            }
            Step::StopSession => self.room.remote_mut().stop_remote_desktop_session(),
            Step::RespondApproval { accepted } => self
                .room
                .remote_mut()
                .respond_to_remote_desktop_request(accepted),
            Step::ClaimHost { host_id } => self.room.remote_mut().claim_remote_host(&host_id),
            Step::RequestHostSetup { target_id } => {
                self.room.remote_mut().request_remote_host_setup(&target_id)
            }
            Step::RespondHostSetup { accepted } => {
                self.room.remote_mut().respond_to_host_setup_request(accepted)
            }
            Step::RequestHosts => self.room.remote().request_hosts(),
            Step::DismissError => {
                self.room.remote_mut().dismiss_error();
                true
            }
            Step::SendInput { input } => self.room.remote().send_input_value(input),

            Step::Sleep { ms } => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                true
            }
        }
    }

    /// The live call with `peer_id`: one offered to us, else the
    /// latest one the current transport placed.
    fn find_call(&self, peer_id: &str) -> Option<Arc<SimCall>> {
        let placed = self
            .factory
            .created()
            .last()
            .and_then(|t| t.last_call(peer_id));
        let offered = self.inbound.get(peer_id).cloned();

        let live = self.room.calls().snapshot();
        let call_id = live
            .calls
            .iter()
            .find(|c| c.peer_id == peer_id)
            .map(|c| c.call_id.clone())?;
        [offered, placed]
            .into_iter()
            .flatten()
            .find(|c| c.call_id() == call_id)
    }

    /// Stop the room and collect the report.
    pub fn finish(mut self) -> ReplayReport {
        self.room.pump_call_events();
        let room = self.room.snapshot();
        self.room.shutdown();

        let emitted = self
            .signal
            .sent()
            .into_iter()
            .map(|signal| EmittedSignal {
                event: signal.name().to_string(),
                payload: signal.payload().unwrap_or_else(|e| {
                    warn!("cannot encode {}: {e}", signal.name());
                    Value::Null
                }),
            })
            .collect();
        let dialed = self
            .factory
            .created()
            .iter()
            .flat_map(|t| t.dialed())
            .collect();

        info!(
            applied = self.applied,
            rejected = self.rejected,
            "replay finished"
        );

        ReplayReport {
            applied: self.applied,
            rejected: self.rejected,
            emitted,
            dialed,
            frames: self.frames.load(Ordering::SeqCst),
            room,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::QualityMode;
    use serde_json::json;

    fn replayer() -> Replayer {
        Replayer::new("alice", RoomConfig::default()).unwrap()
    }

    #[test]
    fn parses_signals_and_steps() {
        let script = r#"
            # a comment
            {"event": "connect"}
            {"step": "transport-open"}
            {"event": "get-users", "payload": {"users": ["alice", "bob"]}}
            {"step": "request-session", "host_id": "bob"}
        "#;
        let lines = parse_script(script).unwrap();
        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[0],
            ScriptLine::Signal {
                event: "connect".into(),
                payload: Value::Null
            }
        );
        assert_eq!(lines[1], ScriptLine::Step(Step::TransportOpen));
        assert_eq!(
            lines[3],
            ScriptLine::Step(Step::RequestSession {
                host_id: "bob".into()
            })
        );
    }

    #[test]
    fn bad_line_names_its_number() {
        let err = parse_script("{\"event\": \"connect\"}\nnot json\n").unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");
    }

    #[tokio::test]
    async fn roster_then_stream_dials_and_connects() {
        let mut r = replayer();
        assert!(r.apply(ScriptLine::Signal { event: "connect".into(), payload: Value::Null }).await);
        assert!(
            r.apply(ScriptLine::Step(Step::LocalStream { id: "cam".into(), video: None }))
                .await
        );
        assert!(
            r.apply(ScriptLine::Signal {
                event: "get-users".into(),
                payload: json!(["alice", "bob"]),
            })
            .await
        );
        assert!(
            r.apply(ScriptLine::Step(Step::DeliverStream {
                peer_id: "bob".into(),
                stream_id: "bob-cam".into(),
            }))
            .await
        );

        let report = r.finish();
        assert_eq!(report.dialed, vec!["bob".to_string()]);
        assert_eq!(report.room.calls.calls.len(), 1);
        assert!(report.room.calls.calls[0].has_stream);
        assert_eq!(report.rejected, 0);
    }

    #[tokio::test]
    async fn unknown_events_count_as_rejected() {
        let mut r = replayer();
        assert!(
            !r.apply(ScriptLine::Signal {
                event: "no-such-event".into(),
                payload: Value::Null,
            })
            .await
        );
        assert!(!r.apply(ScriptLine::Step(Step::StopSession)).await);

        let report = r.finish();
        assert_eq!(report.applied, 0);
        assert_eq!(report.rejected, 2);
    }

    #[tokio::test]
    async fn remote_operations_reach_the_signal_channel() {
        let mut r = replayer();
        r.apply(ScriptLine::Step(Step::RequestSession { host_id: "bob".into() }))
            .await;
        r.apply(ScriptLine::Signal {
            event: "remote-session-started".into(),
            payload: json!({ "sessionId": "s1", "hostId": "bob" }),
        })
        .await;
        r.apply(ScriptLine::Signal {
            event: "remote-frame".into(),
            payload: json!({ "sessionId": "s1", "image": "aGk=", "format": "png" }),
        })
        .await;

        let report = r.finish();
        let names: Vec<&str> = report.emitted.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(names, vec!["remote-session-request"]);
        assert_eq!(report.emitted[0].payload, json!({ "hostId": "bob" }));
        assert_eq!(report.frames, 1);
        assert!(report.room.remote.first_frame_received);
    }

    #[tokio::test(start_paused = true)]
    async fn network_step_degrades_quality() {
        let mut r = replayer();
        r.apply(ScriptLine::Step(Step::LocalStream {
            id: "cam".into(),
            video: Some(ConstraintProfile::new(1280, 720, 30.0)),
        }))
        .await;
        r.apply(ScriptLine::Step(Step::Network {
            hint: NetworkHint::offline(),
        }))
        .await;
        r.apply(ScriptLine::Step(Step::Sleep { ms: 50 })).await;

        assert_eq!(r.room().quality_mode(), Some(QualityMode::VeryPoor));
        let report = r.finish();
        assert_eq!(report.room.quality, Some(QualityMode::VeryPoor));
    }
}
