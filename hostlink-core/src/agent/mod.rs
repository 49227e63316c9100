//! The desktop session agent.
//!
//! One [`DesktopSessionAgent`] drives one [`Channel`] to the broker. It is
//! a two-state machine:
//!
//! ```text
//!   Idle ──start-session──► Active ──stop-session / disconnect──► Idle
//! ```
//!
//! While Active it owns the session [`Subsystems`] and runs the capture
//! loop: capture, send the frame if anything changed, wait for the
//! broker's acknowledgement, wait the scheduler's delay, capture again.
//! At most one frame is unacknowledged at any time.
//!
//! Channel callbacks and subsystem callbacks all arrive as events on one
//! queue and are handled sequentially by [`DesktopSessionAgent::run`]
//! together with the capture timer, so the agent itself holds no locks.

pub mod events;
pub mod subsystems;
pub mod timer;

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::desktop::{PowerController, SharedFrame};
use crate::error::HostError;
use crate::ipc::{Channel, ChannelEvent};
use crate::message::Message;

pub use events::{AgentEvent, AgentEvents, Generation};
pub use subsystems::{PlatformSubsystems, SubsystemFactory, Subsystems};
pub use timer::OneShotTimer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
}

/// State of one Active period.
struct ActiveSession {
    generation: Generation,
    // Declared before the subsystems so it is released first.
    last_frame: Option<SharedFrame>,
    capture_timer: OneShotTimer,
    capture_pending: bool,
    subsystems: Subsystems,
}

impl ActiveSession {
    /// Close the capture cycle and arm the timer for the next one. A sent
    /// frame's cycle ends only when the peer acknowledges it.
    fn finish_capture(&mut self) {
        self.subsystems.capture_scheduler.end_capture();
        let delay = self.subsystems.capture_scheduler.next_capture_delay();
        self.capture_timer.start(delay);
    }
}

enum Flow {
    Continue,
    Exit,
}

pub struct DesktopSessionAgent<F: SubsystemFactory> {
    channel: Channel,
    events: AgentEvents,
    receiver: events::EventReceiver,
    factory: F,
    power: Box<dyn PowerController>,
    session: Option<ActiveSession>,
    generation: Generation,
}

impl<F: SubsystemFactory> DesktopSessionAgent<F> {
    /// Agent over a connected, still paused channel.
    pub fn new(channel: Channel, factory: F, power: Box<dyn PowerController>) -> Self {
        let (events, receiver) = AgentEvents::channel();
        Self {
            channel,
            events,
            receiver,
            factory,
            power,
            session: None,
            generation: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        match self.session {
            Some(_) => SessionState::Active,
            None => SessionState::Idle,
        }
    }

    /// Attach to the channel and handle events until the channel
    /// disconnects. The session is stopped before returning.
    pub async fn run(mut self) -> Result<(), HostError> {
        self.channel.set_listener(self.events.clone());
        self.channel.resume();
        info!(peer = ?self.channel.peer(), "desktop session agent running");

        loop {
            tokio::select! {
                event = self.receiver.recv() => {
                    let Some((generation, event)) = event else { break };
                    if let Flow::Exit = self.handle_event(generation, event) {
                        break;
                    }
                }
                _ = capture_due(&mut self.session) => self.capture_frame(),
            }
        }

        self.stop_session();
        info!("desktop session agent finished");
        Ok(())
    }

    fn handle_event(&mut self, generation: Generation, event: AgentEvent) -> Flow {
        if event.is_session_scoped() && !self.is_current(generation) {
            debug!(generation, "stale session event dropped");
            return Flow::Continue;
        }

        match event {
            AgentEvent::Channel(ChannelEvent::Message(bytes)) => self.on_message_received(bytes),
            AgentEvent::Channel(ChannelEvent::Disconnected) => {
                info!("broker disconnected");
                self.stop_session();
                return Flow::Exit;
            }
            AgentEvent::ScreenCaptured(frame) => self.on_screen_captured(frame),
            AgentEvent::ScreenListChanged(list) => self.send(Message::ScreenListChanged(list)),
            AgentEvent::Clipboard(event) => self.send(Message::ClipboardEvent(event)),
            AgentEvent::SharedMemoryCreated(id) => self.send(Message::CreateSharedBuffer { id }),
            AgentEvent::SharedMemoryDestroyed(id) => self.send(Message::ReleaseSharedBuffer { id }),
        }
        Flow::Continue
    }

    fn is_current(&self, generation: Generation) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.generation == generation)
    }

    // ── Inbound messages ─────────────────────────────────────────

    fn on_message_received(&mut self, bytes: Bytes) {
        let message = match Message::from_bytes(&bytes) {
            Ok(message) => message,
            Err(err) => {
                warn!(len = bytes.len(), error = %err, "unparsable message discarded");
                return;
            }
        };
        debug!(kind = message.kind(), "message received");

        match message {
            Message::EncodeFrameResult => self.on_encode_frame_result(),
            Message::StartSession => self.start_session(),
            Message::StopSession => self.stop_session(),
            Message::LogoffUserSession => self.power.logoff(),
            Message::LockUserSession => self.power.lock(),

            Message::PointerEvent(event) => {
                if let Some(session) = self.session.as_mut() {
                    session.subsystems.input_injector.inject_pointer_event(&event);
                }
            }
            Message::KeyEvent(event) => {
                if let Some(session) = self.session.as_mut() {
                    session.subsystems.input_injector.inject_key_event(&event);
                }
            }
            Message::ClipboardEvent(event) => {
                if let Some(session) = self.session.as_mut() {
                    session.subsystems.clipboard_monitor.inject_clipboard_event(&event);
                }
            }
            Message::SelectSource { screen_id } => {
                if let Some(session) = self.session.as_mut() {
                    session.subsystems.screen_capturer.select_screen(screen_id);
                }
            }
            Message::SetFeatures(features) => {
                if let Some(session) = self.session.as_mut() {
                    let capturer = &mut session.subsystems.screen_capturer;
                    capturer.enable_wallpaper(features.wallpaper);
                    capturer.enable_effects(features.effects);
                }
            }
            Message::SetBlockInput { state } => {
                if let Some(session) = self.session.as_mut() {
                    session.subsystems.input_injector.set_block_input(state);
                }
            }

            other => warn!(kind = other.kind(), "unexpected message discarded"),
        }
    }

    fn start_session(&mut self) {
        if self.session.is_some() {
            debug!("session already active");
            return;
        }

        let generation = self.generation + 1;
        let events = self.events.with_generation(generation);
        let subsystems = match Subsystems::create(&mut self.factory, events) {
            Ok(subsystems) => subsystems,
            Err(err) => {
                error!(error = %err, "cannot start session");
                return;
            }
        };

        self.generation = generation;
        self.session = Some(ActiveSession {
            generation,
            last_frame: None,
            capture_timer: OneShotTimer::new(),
            capture_pending: false,
            subsystems,
        });
        info!(generation, "session started");

        self.capture_frame();
    }

    fn stop_session(&mut self) {
        if let Some(session) = self.session.take() {
            info!(generation = session.generation, "session stopped");
        }
    }

    // ── Capture loop ─────────────────────────────────────────────

    fn capture_frame(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.capture_pending || session.last_frame.is_some() {
            return;
        }

        session.capture_pending = true;
        session.subsystems.capture_scheduler.begin_capture();
        session.subsystems.screen_capturer.capture_frame();
    }

    fn on_screen_captured(&mut self, frame: Option<SharedFrame>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.capture_pending = false;

        let Some(frame) = frame.filter(SharedFrame::has_updates) else {
            session.finish_capture();
            return;
        };

        let message = Message::EncodeFrame(frame.to_serialized());
        match message.to_bytes().and_then(|bytes| self.channel.send(bytes)) {
            Ok(()) => {
                debug!(
                    buffer = frame.shared_memory_id(),
                    rects = frame.updated_region.rects().len(),
                    "frame sent"
                );
                session.last_frame = Some(frame);
            }
            Err(err) => {
                warn!(error = %err, "cannot send frame");
                session.finish_capture();
            }
        }
    }

    fn on_encode_frame_result(&mut self) {
        let Some(session) = self.session.as_mut() else {
            debug!("frame acknowledgement while idle ignored");
            return;
        };
        if session.last_frame.take().is_none() {
            debug!("frame acknowledgement without a frame in flight ignored");
            return;
        }
        session.finish_capture();
    }

    fn send(&self, message: Message) {
        let kind = message.kind();
        if let Err(err) = message.to_bytes().and_then(|bytes| self.channel.send(bytes)) {
            warn!(kind, error = %err, "cannot send message");
        }
    }
}

async fn capture_due(session: &mut Option<ActiveSession>) {
    match session {
        Some(session) => session.capture_timer.fired().await,
        None => std::future::pending().await,
    }
}
