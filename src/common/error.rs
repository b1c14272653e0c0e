//! Error types for the story bridge
//!
//! Every story-level failure names the story it was about and the underlying
//! cause, so a failing test case reports something actionable instead of
//! hanging until the test framework gives up.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the story bridge
#[derive(Error, Debug)]
pub enum Error {
    // === Setup Errors ===
    #[error("Failed to listen on {addr}: {source}")]
    ListenerBind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Channel was torn down while the listener was starting")]
    SetupCancelled,

    #[error("Failed to route device port {port} to the host: {reason}")]
    RouteFailed { port: u16, reason: String },

    /// A lifecycle guard failed; every caller sharing the attempt sees the same cause
    #[error(transparent)]
    Lifecycle(Arc<Error>),

    // === Story Change Errors ===
    #[error("Device never connected while changing to story '{story_id}' (waited {timeout_ms} ms). Is the app running and routed to the host?")]
    NeverConnected { story_id: String, timeout_ms: u64 },

    #[error("App timed out changing to story '{story_id}' after {timeout_ms} ms")]
    ChangeTimeout { story_id: String, timeout_ms: u64 },

    #[error("Story '{story_id}' threw while rendering: {reason}")]
    RenderFailed { story_id: String, reason: String },

    #[error("Change to story '{story_id}' was superseded by a request for '{superseded_by}'")]
    Superseded {
        story_id: String,
        superseded_by: String,
    },

    #[error("Device connection lost while changing to story '{story_id}': {reason}")]
    ConnectionLost { story_id: String, reason: String },

    #[error("Failed to send story '{story_id}' to the device: {reason}")]
    SendFailed { story_id: String, reason: String },

    #[error("Channel closed while changing to story '{story_id}'")]
    ChannelClosed { story_id: String },

    #[error("Story plan '{name}' failed: {failed} of {total} stories did not become ready")]
    PlanFailed {
        name: String,
        failed: usize,
        total: usize,
    },

    // === Device Errors ===
    #[error("Device command failed: {0}")]
    Device(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a listener bind error for an address
    pub fn listener_bind(addr: impl ToString, source: io::Error) -> Self {
        Self::ListenerBind {
            addr: addr.to_string(),
            source,
        }
    }

    /// Create a route failure error
    pub fn route_failed(port: u16, reason: impl ToString) -> Self {
        Self::RouteFailed {
            port,
            reason: reason.to_string(),
        }
    }

    /// Create a connection lost error
    pub fn connection_lost(story_id: &str, reason: &str) -> Self {
        Self::ConnectionLost {
            story_id: story_id.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Unwrap lifecycle sharing to the underlying failure
    pub fn root(&self) -> &Error {
        match self {
            Self::Lifecycle(inner) => inner.root(),
            other => other,
        }
    }

    /// The story this error is about, if it is a story-level failure
    pub fn story_id(&self) -> Option<&str> {
        match self {
            Self::NeverConnected { story_id, .. }
            | Self::ChangeTimeout { story_id, .. }
            | Self::RenderFailed { story_id, .. }
            | Self::Superseded { story_id, .. }
            | Self::ConnectionLost { story_id, .. }
            | Self::SendFailed { story_id, .. }
            | Self::ChannelClosed { story_id } => Some(story_id),
            _ => None,
        }
    }

    /// Stable machine-readable code, used in JSON output
    ///
    /// Shared lifecycle failures report the code of the underlying error.
    pub fn code(&self) -> &'static str {
        match self.root() {
            Self::ListenerBind { .. } => "LISTENER_BIND",
            Self::SetupCancelled => "SETUP_CANCELLED",
            Self::RouteFailed { .. } => "ROUTE_FAILED",
            Self::NeverConnected { .. } => "NEVER_CONNECTED",
            Self::ChangeTimeout { .. } => "CHANGE_TIMEOUT",
            Self::RenderFailed { .. } => "RENDER_FAILED",
            Self::Superseded { .. } => "SUPERSEDED",
            Self::ConnectionLost { .. } => "CONNECTION_LOST",
            Self::SendFailed { .. } => "SEND_FAILED",
            Self::ChannelClosed { .. } => "CHANNEL_CLOSED",
            Self::PlanFailed { .. } => "PLAN_FAILED",
            Self::Device(_) => "DEVICE",
            Self::Config(_) | Self::ConfigParse(_) => "CONFIG",
            _ => "INTERNAL_ERROR",
        }
    }
}

/// Listener address formatting shared by bind errors and log lines
pub(crate) fn display_addr(host: &str, port: u16) -> String {
    match host.parse::<std::net::IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port).to_string(),
        Err(_) => format!("{}:{}", host, port),
    }
}
