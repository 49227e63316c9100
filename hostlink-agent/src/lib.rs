//! # hostlink-agent: per-session agent process
//!
//! Started by the broker inside the target user session with
//! `--session-type=<desktop|file-transfer> --channel-id=<endpoint>`. It
//! connects back to the broker's endpoint and runs the desktop session
//! agent until the broker disconnects.

pub mod config;
pub mod logging;
