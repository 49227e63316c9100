//! Funnel from channel and subsystem callbacks into the agent loop.
//!
//! Every callback, whatever thread it runs on, becomes an [`AgentEvent`]
//! tagged with the session generation it was created for and is posted to
//! one unbounded queue.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::desktop::{ClipboardDelegate, ScreenCapturerDelegate, ScreenList, SharedFrame};
use crate::ipc::{ChannelEvent, Listener};
use crate::message::ClipboardEvent;
use crate::shared_memory::{SharedMemoryDelegate, SharedMemoryId};

/// Session period an event belongs to. `0` is used for channel events.
pub type Generation = u64;

#[derive(Debug)]
pub enum AgentEvent {
    Channel(ChannelEvent),
    ScreenCaptured(Option<SharedFrame>),
    ScreenListChanged(ScreenList),
    Clipboard(ClipboardEvent),
    SharedMemoryCreated(SharedMemoryId),
    SharedMemoryDestroyed(SharedMemoryId),
}

impl AgentEvent {
    /// Events that only make sense within the session that produced them.
    pub fn is_session_scoped(&self) -> bool {
        matches!(
            self,
            AgentEvent::ScreenCaptured(_)
                | AgentEvent::ScreenListChanged(_)
                | AgentEvent::Clipboard(_)
        )
    }
}

pub type EventReceiver = mpsc::UnboundedReceiver<(Generation, AgentEvent)>;

/// Posting handle given to the channel and to subsystems.
#[derive(Debug, Clone)]
pub struct AgentEvents {
    tx: mpsc::UnboundedSender<(Generation, AgentEvent)>,
    generation: Generation,
}

impl AgentEvents {
    pub fn channel() -> (AgentEvents, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (AgentEvents { tx, generation: 0 }, rx)
    }

    /// Handle whose events are tagged with `generation`.
    pub fn with_generation(&self, generation: Generation) -> AgentEvents {
        AgentEvents {
            tx: self.tx.clone(),
            generation,
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn post(&self, event: AgentEvent) {
        // The loop has exited; nothing is listening any more.
        let _ = self.tx.send((self.generation, event));
    }
}

impl Listener for AgentEvents {
    fn on_message_received(&mut self, message: Bytes) {
        self.post(AgentEvent::Channel(ChannelEvent::Message(message)));
    }

    fn on_disconnected(&mut self) {
        self.post(AgentEvent::Channel(ChannelEvent::Disconnected));
    }
}

impl ScreenCapturerDelegate for AgentEvents {
    fn on_screen_captured(&self, frame: Option<SharedFrame>) {
        self.post(AgentEvent::ScreenCaptured(frame));
    }

    fn on_screen_list_changed(&self, list: ScreenList) {
        self.post(AgentEvent::ScreenListChanged(list));
    }
}

impl ClipboardDelegate for AgentEvents {
    fn on_clipboard_event(&self, event: ClipboardEvent) {
        self.post(AgentEvent::Clipboard(event));
    }
}

impl SharedMemoryDelegate for AgentEvents {
    fn on_shared_memory_create(&self, id: SharedMemoryId) {
        self.post(AgentEvent::SharedMemoryCreated(id));
    }

    fn on_shared_memory_destroy(&self, id: SharedMemoryId) {
        self.post(AgentEvent::SharedMemoryDestroyed(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_carry_the_handle_generation() {
        let (events, mut rx) = AgentEvents::channel();
        let session = events.with_generation(3);

        let mut listener = events.clone();
        listener.on_message_received(Bytes::from_static(b"x"));
        session.on_clipboard_event(ClipboardEvent::text("hi"));
        session.on_shared_memory_destroy(9);

        let (generation, event) = rx.try_recv().unwrap();
        assert_eq!(generation, 0);
        assert!(!event.is_session_scoped());

        let (generation, event) = rx.try_recv().unwrap();
        assert_eq!(generation, 3);
        assert!(event.is_session_scoped());

        let (generation, event) = rx.try_recv().unwrap();
        assert_eq!(generation, 3);
        assert!(matches!(event, AgentEvent::SharedMemoryDestroyed(9)));
        assert!(!event.is_session_scoped());
    }

    #[test]
    fn posting_after_receiver_drop_is_silent() {
        let (events, rx) = AgentEvents::channel();
        drop(rx);
        events.on_shared_memory_create(1);
    }
}
