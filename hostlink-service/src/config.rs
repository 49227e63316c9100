//! Configuration for the broker.

use std::path::{Path, PathBuf};
use std::time::Duration;

use hostlink_core::SessionType;
use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Agent process settings.
    pub agent: AgentProcessConfig,
    /// Which session to drive.
    pub session: SessionConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentProcessConfig {
    /// Agent executable. If empty, `hostlink-agent` next to this binary.
    pub executable: String,
    /// How long to wait for the agent to connect back, in seconds.
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// OS session to launch the agent into.
    pub session_id: u32,
    pub session_type: SessionType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Optional log file path. If empty, logs to stderr.
    pub file: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for AgentProcessConfig {
    fn default() -> Self {
        Self {
            executable: String::new(),
            connect_timeout_secs: 30,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: 1,
            session_type: SessionType::DesktopManage,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: String::new(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ServiceConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }
}

impl AgentProcessConfig {
    pub fn executable(&self) -> Option<PathBuf> {
        (!self.executable.is_empty()).then(|| PathBuf::from(&self.executable))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&ServiceConfig::default()).unwrap();
        assert!(text.contains("[agent]"));
        assert!(text.contains("session_type = \"desktop-manage\""));
    }

    #[test]
    fn session_type_parses_from_kebab_case() {
        let cfg: ServiceConfig =
            toml::from_str("[session]\nsession_id = 3\nsession_type = \"file-transfer\"\n").unwrap();
        assert_eq!(cfg.session.session_id, 3);
        assert_eq!(cfg.session.session_type, SessionType::FileTransfer);
    }

    #[test]
    fn empty_executable_means_default_location() {
        let mut agent = AgentProcessConfig::default();
        assert!(agent.executable().is_none());
        agent.executable = "C:\\hostlink\\agent.exe".into();
        assert_eq!(agent.executable(), Some(PathBuf::from("C:\\hostlink\\agent.exe")));
    }
}
