//! Configuration for the session agent.

use std::path::Path;
use std::time::Duration;

use hostlink_core::desktop::CaptureOptions;
use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Screen capture settings.
    pub capture: CaptureConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Target time between captures in milliseconds.
    pub interval_ms: u64,
    /// How long one capture waits for the desktop to change.
    pub timeout_ms: u64,
    /// Block size for dirty-rectangle detection (pixels).
    pub block_size: usize,
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

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval_ms: 33,
            timeout_ms: 50,
            block_size: 64,
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

impl AgentConfig {
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

    /// Capture tuning for the screen capturer.
    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            interval: Duration::from_millis(self.capture.interval_ms.max(1)),
            timeout: Duration::from_millis(self.capture.timeout_ms),
            block_size: self.capture.block_size.max(8),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&AgentConfig::default()).unwrap();
        assert!(text.contains("[capture]"));
        assert!(text.contains("interval_ms"));
        assert!(text.contains("[logging]"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let cfg: AgentConfig = toml::from_str("[capture]\nblock_size = 32\n").unwrap();
        assert_eq!(cfg.capture.block_size, 32);
        assert_eq!(cfg.capture.interval_ms, 33);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn capture_options_are_clamped() {
        let mut cfg = AgentConfig::default();
        cfg.capture.interval_ms = 0;
        cfg.capture.block_size = 2;

        let options = cfg.capture_options();
        assert_eq!(options.interval, Duration::from_millis(1));
        assert_eq!(options.block_size, 8);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let cfg = AgentConfig::load(Path::new("/nonexistent/hostlink-agent.toml"));
        assert_eq!(cfg.capture.timeout_ms, 50);
    }
}
