//! Remote desktop data model.
//!
//! These are both the ingress schemas of the `remote-*` signaling
//! events and the records the controller keeps. Defaults for optional
//! wire fields are defined here and nowhere else.

use serde::{Deserialize, Serialize};

// ── Session / request records ────────────────────────────────────

/// A confirmed remote desktop session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDesktopSession {
    pub session_id: String,
    pub host_id: String,
}

/// A local outbound session request the host side has acknowledged but
/// not yet approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequest {
    pub request_id: String,
    pub host_id: String,
}

/// Another participant's session request awaiting a local decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingApprovalRequest {
    pub request_id: String,
    pub requester_id: String,
    pub host_id: String,
    #[serde(default)]
    pub requester_name: Option<String>,
}

/// Another participant asks the local side to start a host agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSetupRequest {
    pub request_id: String,
    pub requester_id: String,
    #[serde(default)]
    pub suggested_host_id: Option<String>,
}

/// The local side asked another participant to start a host agent and
/// is waiting for their decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSetupPendingRequest {
    pub request_id: String,
    pub target_id: String,
    #[serde(default)]
    pub suggested_host_id: Option<String>,
}

// ── Inbound event payloads ───────────────────────────────────────

/// `remote-session-started`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStarted {
    pub session_id: String,
    pub host_id: String,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// `remote-session-ended`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEnded {
    pub session_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// `remote-session-error`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionErrorEvent {
    #[serde(default = "unknown_code")]
    pub code: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub host_id: Option<String>,
}

fn unknown_code() -> String {
    "unknown".to_string()
}

/// `remote-host-claimed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostClaimed {
    pub host_id: String,
}

/// `remote-host-setup-result`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSetupResult {
    pub request_id: String,
    pub accepted: bool,
    #[serde(default)]
    pub host_id: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
}

// ── Frames ───────────────────────────────────────────────────────

/// Image encodings a host agent may send.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Jpeg,
    Png,
    Webp,
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageFormat::Jpeg => write!(f, "jpeg"),
            ImageFormat::Png => write!(f, "png"),
            ImageFormat::Webp => write!(f, "webp"),
        }
    }
}

/// `remote-frame`: one encoded desktop image for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFrame {
    pub session_id: String,
    /// Encoded image, base64 as delivered by the host agent.
    pub image: String,
    #[serde(default)]
    pub format: ImageFormat,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub seq: Option<u64>,
}

// ── User-visible outcomes ────────────────────────────────────────

/// A session-level error shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionErrorInfo {
    pub code: String,
    pub message: String,
}

/// Prompt to install the host agent after a host-unreachable error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInstallPrompt {
    pub host_id: Option<String>,
    pub download_url: String,
}
