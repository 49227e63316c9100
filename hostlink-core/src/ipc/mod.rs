//! Inter-process transport between the broker and session agents.

pub mod channel;
pub mod endpoint;
pub mod server;
pub mod write_queue;

pub use channel::{Channel, ChannelEvent, ChannelProxy, Listener, PeerIdentity};
pub use server::{Server, ServerDelegate, ServerEvent};
