//! Spawning the session agent inside a target interactive session.
//!
//! Desktop sessions run the agent as SYSTEM with a token retargeted to the
//! user's session; file transfer runs it as the logged-on user. See
//! [`SessionLauncher`] for the exact token sequence.

pub mod backend;
pub mod command_line;
pub mod impersonation;
pub mod session;
#[cfg(target_os = "windows")]
pub mod win;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LaunchError;

pub use backend::{LaunchBackend, TokenAccess};
pub use command_line::CommandLine;
pub use impersonation::ImpersonationGuard;
pub use session::SessionLauncher;

pub const SESSION_TYPE_SWITCH: &str = "session-type";
pub const CHANNEL_ID_SWITCH: &str = "channel-id";

/// File name of the agent executable, expected next to the broker.
pub const AGENT_EXECUTABLE: &str = if cfg!(target_os = "windows") {
    "hostlink-agent.exe"
} else {
    "hostlink-agent"
};

/// Kind of session a client asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionType {
    DesktopManage,
    DesktopView,
    FileTransfer,
}

impl SessionType {
    pub fn agent_role(self) -> AgentRole {
        match self {
            SessionType::DesktopManage | SessionType::DesktopView => AgentRole::Desktop,
            SessionType::FileTransfer => AgentRole::FileTransfer,
        }
    }
}

/// What the launched agent process does; passed as `--session-type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRole {
    Desktop,
    FileTransfer,
}

impl AgentRole {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::Desktop => "desktop",
            AgentRole::FileTransfer => "file-transfer",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "desktop" => Ok(AgentRole::Desktop),
            "file-transfer" => Ok(AgentRole::FileTransfer),
            other => Err(format!("unknown session type: {other}")),
        }
    }
}

/// Agent executable in the directory of the running executable.
pub fn agent_executable_path() -> Result<PathBuf, LaunchError> {
    let current = std::env::current_exe().map_err(LaunchError::AgentPath)?;
    let dir = current.parent().ok_or_else(|| {
        LaunchError::AgentPath(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "executable has no parent directory",
        ))
    })?;
    Ok(dir.join(AGENT_EXECUTABLE))
}

/// `<program> --session-type=<role> --channel-id=<id>`
pub fn agent_command_line(program: impl Into<PathBuf>, role: AgentRole, channel_id: &str) -> CommandLine {
    let mut command_line = CommandLine::new(program);
    command_line
        .append_switch(SESSION_TYPE_SWITCH, role.as_str())
        .append_switch(CHANNEL_ID_SWITCH, channel_id);
    command_line
}

/// Start the agent for `session_type` in `session_id`, connecting back to
/// `channel_id`. Returns once the process is created.
#[cfg(target_os = "windows")]
pub fn launch_session_process(
    session_type: SessionType,
    session_id: u32,
    channel_id: &str,
    program: Option<PathBuf>,
) -> Result<(), LaunchError> {
    let program = match program {
        Some(program) => program,
        None => agent_executable_path()?,
    };
    let command_line = agent_command_line(program, session_type.agent_role(), channel_id);
    SessionLauncher::new(win::Win32Backend::new()).launch(session_type, session_id, &command_line)
}

#[cfg(not(target_os = "windows"))]
pub fn launch_session_process(
    _session_type: SessionType,
    _session_id: u32,
    _channel_id: &str,
    _program: Option<PathBuf>,
) -> Result<(), LaunchError> {
    Err(LaunchError::Unsupported)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_types_map_to_roles() {
        assert_eq!(SessionType::DesktopManage.agent_role(), AgentRole::Desktop);
        assert_eq!(SessionType::DesktopView.agent_role(), AgentRole::Desktop);
        assert_eq!(SessionType::FileTransfer.agent_role(), AgentRole::FileTransfer);
    }

    #[test]
    fn role_switch_values() {
        for role in [AgentRole::Desktop, AgentRole::FileTransfer] {
            assert_eq!(role.as_str().parse::<AgentRole>().unwrap(), role);
        }
        assert!("desktop-manage".parse::<AgentRole>().is_err());
    }

    #[test]
    fn agent_command_line_carries_both_switches() {
        let cmd = agent_command_line("hostlink-agent", AgentRole::FileTransfer, "7.1.ff");
        assert_eq!(cmd.switch_value(SESSION_TYPE_SWITCH), Some("file-transfer"));
        assert_eq!(cmd.switch_value(CHANNEL_ID_SWITCH), Some("7.1.ff"));
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn launching_is_unsupported_off_windows() {
        assert!(matches!(
            launch_session_process(SessionType::DesktopManage, 1, "x", None),
            Err(LaunchError::Unsupported)
        ));
    }
}
