//! Broker side of one agent connection.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use hostlink_core::message::SerializedFrame;
use hostlink_core::{AgentRole, Channel, ChannelEvent, HostError, Message, SharedMemory, SharedMemoryId};

/// Reject an agent that connected from a different OS session than the one
/// it was launched into. An unknown peer session is accepted with a warning.
pub fn verify_peer_session(channel: &Channel, expected: u32) -> Result<(), HostError> {
    match channel.peer_session_id() {
        Some(actual) if actual != expected => Err(HostError::Other(format!(
            "agent connected from session {actual}, expected {expected}"
        ))),
        Some(_) => Ok(()),
        None => {
            warn!(expected, "peer session unknown; accepting connection");
            Ok(())
        }
    }
}

/// Drives a desktop session on one connected agent.
pub struct BrokerSession {
    channel: Channel,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    role: AgentRole,
    // `None` when the region could not be mapped.
    buffers: HashMap<SharedMemoryId, Option<SharedMemory>>,
    frames: u64,
}

impl BrokerSession {
    /// Attach to `channel` and start delivery.
    pub fn new(mut channel: Channel, role: AgentRole) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        channel.set_listener(tx);
        channel.resume();
        Self {
            channel,
            events,
            role,
            buffers: HashMap::new(),
            frames: 0,
        }
    }

    pub fn frames_received(&self) -> u64 {
        self.frames
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn send(&self, message: &Message) -> Result<(), HostError> {
        self.channel.send(message.to_bytes()?)
    }

    /// Start the session and handle messages until the agent disconnects
    /// or `shutdown` completes.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<u64, HostError> {
        self.send(&Message::StartSession)?;
        info!(role = %self.role, peer = ?self.channel.peer(), "session requested");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(ChannelEvent::Message(bytes)) => self.handle_message(bytes),
                    Some(ChannelEvent::Disconnected) | None => {
                        info!(frames = self.frames, "agent disconnected");
                        break;
                    }
                },
                _ = &mut shutdown => {
                    info!(frames = self.frames, "shutting down session");
                    self.channel.disconnect();
                    break;
                }
            }
        }
        Ok(self.frames)
    }

    pub fn handle_message(&mut self, bytes: Bytes) {
        let message = match Message::from_bytes(&bytes) {
            Ok(message) => message,
            Err(err) => {
                warn!(len = bytes.len(), error = %err, "unparsable message discarded");
                return;
            }
        };
        if !message.is_permitted_from(self.role) {
            warn!(kind = message.kind(), role = %self.role, "message not permitted from agent");
            return;
        }

        match message {
            Message::CreateSharedBuffer { id } => self.on_create_shared_buffer(id),
            Message::ReleaseSharedBuffer { id } => {
                if self.buffers.remove(&id).is_none() {
                    warn!(id, "release of unknown shared buffer");
                }
                debug!(id, "shared buffer released");
            }
            Message::EncodeFrame(frame) => self.on_encode_frame(frame),
            Message::ScreenListChanged(list) => {
                info!(screens = list.screens.len(), current = list.current_screen, "screen list changed");
            }
            Message::ClipboardEvent(event) => {
                debug!(mime_type = %event.mime_type, len = event.data.len(), "agent clipboard changed");
            }
            other => warn!(kind = other.kind(), "unexpected message discarded"),
        }
    }

    fn on_create_shared_buffer(&mut self, id: SharedMemoryId) {
        let mapping = match self.channel.peer_process_id() {
            Some(pid) => match SharedMemory::open(pid, id) {
                Ok(memory) => Some(memory),
                Err(err) => {
                    warn!(id, error = %err, "cannot map shared buffer");
                    None
                }
            },
            None => None,
        };
        debug!(id, mapped = mapping.is_some(), "shared buffer created");
        self.buffers.insert(id, mapping);
    }

    fn on_encode_frame(&mut self, frame: SerializedFrame) {
        match self.buffers.get(&frame.shared_buffer_id) {
            None => warn!(id = frame.shared_buffer_id, "frame references unknown buffer"),
            Some(Some(memory)) => {
                let needed = frame.stride as usize * frame.desktop_rect.height.max(0) as usize;
                if memory.len() < needed {
                    warn!(id = frame.shared_buffer_id, needed, len = memory.len(), "frame exceeds its buffer");
                }
            }
            Some(None) => {}
        }

        self.frames += 1;
        debug!(
            frame = self.frames,
            width = frame.desktop_rect.width,
            height = frame.desktop_rect.height,
            rects = frame.dirty_rects.len(),
            "frame received"
        );

        if let Err(err) = self.send(&Message::EncodeFrameResult) {
            warn!(error = %err, "cannot acknowledge frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hostlink_core::PeerIdentity;
    use hostlink_core::desktop::types::{PixelFormat, Rect};

    use super::*;

    fn pair(broker_peer: PeerIdentity) -> (Channel, Channel) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (
            Channel::from_stream(a, broker_peer),
            Channel::from_stream(b, PeerIdentity::default()),
        )
    }

    fn agent_listener(mut agent: Channel) -> (Channel, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        agent.set_listener(tx);
        agent.resume();
        (agent, rx)
    }

    async fn recv_message(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> Message {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(ChannelEvent::Message(bytes))) => Message::from_bytes(&bytes).unwrap(),
            other => panic!("unexpected {other:?}"),
        }
    }

    fn frame(id: SharedMemoryId) -> Message {
        Message::EncodeFrame(SerializedFrame {
            shared_buffer_id: id,
            desktop_rect: Rect::make_xywh(0, 0, 4, 4),
            pixel_format: PixelFormat::Bgra8,
            stride: 16,
            dirty_rects: vec![Rect::make_xywh(0, 0, 4, 4)],
        })
    }

    #[tokio::test]
    async fn frames_are_acknowledged() {
        let (broker, agent) = pair(PeerIdentity::default());
        let mut session = BrokerSession::new(broker, AgentRole::Desktop);
        let (_agent, mut agent_rx) = agent_listener(agent);

        session.handle_message(Message::CreateSharedBuffer { id: 5 }.to_bytes().unwrap());
        session.handle_message(frame(5).to_bytes().unwrap());

        assert_eq!(recv_message(&mut agent_rx).await, Message::EncodeFrameResult);
        assert_eq!(session.frames_received(), 1);
        assert_eq!(session.live_buffers(), 1);

        session.handle_message(Message::ReleaseSharedBuffer { id: 5 }.to_bytes().unwrap());
        assert_eq!(session.live_buffers(), 0);
    }

    #[tokio::test]
    async fn agent_bound_kinds_sent_by_agent_are_rejected() {
        let (broker, agent) = pair(PeerIdentity::default());
        let mut session = BrokerSession::new(broker, AgentRole::Desktop);
        let (_agent, mut agent_rx) = agent_listener(agent);

        session.handle_message(Message::StartSession.to_bytes().unwrap());
        session.handle_message(Message::LogoffUserSession.to_bytes().unwrap());

        let reply = tokio::time::timeout(Duration::from_millis(200), agent_rx.recv()).await;
        assert!(reply.is_err());
        assert_eq!(session.frames_received(), 0);
    }

    #[tokio::test]
    async fn file_transfer_agent_cannot_send_frames() {
        let (broker, agent) = pair(PeerIdentity::default());
        let mut session = BrokerSession::new(broker, AgentRole::FileTransfer);
        let (_agent, _agent_rx) = agent_listener(agent);

        session.handle_message(frame(1).to_bytes().unwrap());
        assert_eq!(session.frames_received(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn announced_buffers_are_mapped_from_the_peer() {
        use std::sync::Arc;

        use hostlink_core::SharedMemoryFactory;
        use hostlink_core::shared_memory::SharedMemoryDelegate;

        struct Quiet;

        impl SharedMemoryDelegate for Quiet {
            fn on_shared_memory_create(&self, _id: SharedMemoryId) {}
            fn on_shared_memory_destroy(&self, _id: SharedMemoryId) {}
        }

        let region = SharedMemoryFactory::new(Arc::new(Quiet)).create(64).unwrap();

        let peer = PeerIdentity {
            process_id: Some(std::process::id()),
            session_id: None,
        };
        let (broker, agent) = pair(peer);
        let mut session = BrokerSession::new(broker, AgentRole::Desktop);
        let (_agent, mut agent_rx) = agent_listener(agent);

        session.handle_message(Message::CreateSharedBuffer { id: region.id() }.to_bytes().unwrap());
        assert!(matches!(session.buffers.get(&region.id()), Some(Some(_))));

        session.handle_message(frame(region.id()).to_bytes().unwrap());
        assert_eq!(recv_message(&mut agent_rx).await, Message::EncodeFrameResult);
    }

    #[test]
    fn peer_from_other_session_is_rejected() {
        let (a, _b) = tokio::io::duplex(64);
        let peer = PeerIdentity {
            process_id: Some(100),
            session_id: Some(2),
        };
        let channel = Channel::from_stream(a, peer);

        assert!(verify_peer_session(&channel, 2).is_ok());
        assert!(verify_peer_session(&channel, 3).is_err());
    }

    #[test]
    fn unknown_peer_session_is_accepted() {
        let (a, _b) = tokio::io::duplex(64);
        let channel = Channel::from_stream(a, PeerIdentity::default());
        assert!(verify_peer_session(&channel, 1).is_ok());
    }

    #[tokio::test]
    async fn run_ends_when_agent_disconnects() {
        let (broker, agent) = pair(PeerIdentity::default());
        let session = BrokerSession::new(broker, AgentRole::Desktop);
        let (agent, mut agent_rx) = agent_listener(agent);

        let run = tokio::spawn(session.run(std::future::pending()));
        assert_eq!(recv_message(&mut agent_rx).await, Message::StartSession);

        agent.send(frame(9).to_bytes().unwrap()).unwrap();
        assert_eq!(recv_message(&mut agent_rx).await, Message::EncodeFrameResult);

        drop(agent);
        let frames = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(frames, 1);
    }
}
