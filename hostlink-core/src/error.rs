//! Domain-specific error types for the host agent.
//!
//! Transport, protocol and subsystem failures return `HostError`.
//! The session launcher has its own `LaunchError` so callers can tell
//! which step of the token sequence failed.

use std::fmt;
use std::io;

use thiserror::Error;

/// The canonical error type for the IPC transport and the session agent.
#[derive(Debug, Error)]
pub enum HostError {
    // ── Framing Errors ───────────────────────────────────────────
    /// A frame declared a zero-length payload.
    #[error("empty frame")]
    EmptyFrame,

    /// A frame exceeded the transport limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    // ── Connection Errors ────────────────────────────────────────
    /// The underlying stream reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] io::Error),

    /// The peer closed the stream.
    #[error("peer closed the connection")]
    PeerClosed,

    /// The channel is no longer connected.
    #[error("channel closed")]
    ChannelClosed,

    /// The endpoint id contains characters that cannot appear in a pipe
    /// or socket name.
    #[error("invalid endpoint id: {0:?}")]
    InvalidEndpoint(String),

    /// The server is already listening.
    #[error("server already started")]
    AlreadyStarted,

    // ── Serialization Errors ─────────────────────────────────────
    /// Encoding or decoding of a message failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    // ── Subsystem Errors ─────────────────────────────────────────
    /// A platform facility is missing on this OS.
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),

    /// The capture source stopped delivering frames, e.g. after a desktop
    /// switch. It is reacquired on the next capture.
    #[error("capture source lost")]
    SourceLost,

    /// A platform call failed.
    #[error("{call} failed: {message}")]
    Platform { call: &'static str, message: String },

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl HostError {
    /// Shorthand for wrapping a failed OS call.
    pub fn platform(call: &'static str, err: impl fmt::Display) -> Self {
        HostError::Platform {
            call,
            message: err.to_string(),
        }
    }

    /// Returns `true` for errors that mean the transport itself is broken.
    pub fn is_transport_fatal(&self) -> bool {
        matches!(
            self,
            HostError::EmptyFrame
                | HostError::FrameTooLarge { .. }
                | HostError::Connection(_)
                | HostError::PeerClosed
        )
    }
}

// ── LaunchError ───────────────────────────────────────────────────

/// One step of the privileged launch sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchStep {
    OpenProcessToken,
    DuplicateToken,
    LookupPrivilege,
    AdjustPrivileges,
    Impersonate,
    SetSessionId,
    SetUiAccess,
    QueryUserToken,
    CreateEnvironment,
    CreateProcess,
}

impl fmt::Display for LaunchStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LaunchStep::OpenProcessToken => "OpenProcessToken",
            LaunchStep::DuplicateToken => "DuplicateTokenEx",
            LaunchStep::LookupPrivilege => "LookupPrivilegeValueW",
            LaunchStep::AdjustPrivileges => "AdjustTokenPrivileges",
            LaunchStep::Impersonate => "ImpersonateLoggedOnUser",
            LaunchStep::SetSessionId => "SetTokenInformation(TokenSessionId)",
            LaunchStep::SetUiAccess => "SetTokenInformation(TokenUIAccess)",
            LaunchStep::QueryUserToken => "WTSQueryUserToken",
            LaunchStep::CreateEnvironment => "CreateEnvironmentBlock",
            LaunchStep::CreateProcess => "CreateProcessAsUserW",
        };
        f.write_str(name)
    }
}

/// Typed error for the session launch sequence.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// An OS call in the token sequence failed.
    #[error("{step} failed: {source}")]
    Step {
        step: LaunchStep,
        #[source]
        source: io::Error,
    },

    /// The agent executable could not be located.
    #[error("cannot locate agent executable: {0}")]
    AgentPath(#[source] io::Error),

    /// Token manipulation is only implemented for Windows.
    #[error("session launching is not supported on this platform")]
    Unsupported,
}

impl LaunchError {
    /// Wrap an OS error for `step`.
    pub fn step(step: LaunchStep, source: impl Into<io::Error>) -> Self {
        LaunchError::Step {
            step,
            source: source.into(),
        }
    }

    /// The failing step, if the error came from the token sequence.
    pub fn failed_step(&self) -> Option<LaunchStep> {
        match self {
            LaunchError::Step { step, .. } => Some(*step),
            _ => None,
        }
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for HostError {
    fn from(s: String) -> Self {
        HostError::Other(s)
    }
}

impl From<&str> for HostError {
    fn from(s: &str) -> Self {
        HostError::Other(s.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for HostError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        HostError::Encoding(e.to_string())
    }
}
