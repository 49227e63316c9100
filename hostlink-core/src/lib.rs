//! # hostlink-core
//!
//! Host side of a remote-administration product: a privileged broker
//! talks to a per-session agent over a local framed channel.
//!
//! This crate contains:
//! - **Codec**: `FrameCodec`, `u32` little-endian length-prefixed frames
//! - **Message**: `Message`, the bincode-encoded broker/agent vocabulary
//! - **IPC**: `Channel` and `Server` over named pipes or Unix sockets
//! - **Shared memory**: named regions carrying captured frames to the broker
//! - **Desktop**: capture, input, clipboard and power collaborators
//! - **Agent**: `DesktopSessionAgent`, the per-session state machine
//! - **Launcher**: spawning the agent inside a user session
//! - **Error**: `HostError` and `LaunchError`

pub mod agent;
pub mod codec;
pub mod desktop;
pub mod error;
pub mod ipc;
pub mod launcher;
pub mod message;
pub mod shared_memory;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use agent::{DesktopSessionAgent, PlatformSubsystems, SessionState, SubsystemFactory};
pub use codec::{FrameCodec, MAX_MESSAGE_SIZE};
pub use error::{HostError, LaunchError, LaunchStep};
pub use ipc::{Channel, ChannelEvent, ChannelProxy, Listener, PeerIdentity, Server, ServerDelegate, ServerEvent};
pub use launcher::{AgentRole, SessionType, launch_session_process};
pub use message::Message;
pub use shared_memory::{SharedMemory, SharedMemoryFactory, SharedMemoryId};
