//! Framed, flow-controlled duplex channel over one OS byte stream.
//!
//! A channel starts **paused**: the read and write loops are only spawned
//! by the first [`Channel::resume`], so a listener can be attached before
//! any traffic is delivered. Payloads sent before that accumulate in the
//! incoming write queue and are flushed, in order, once the writer runs.
//!
//! # Tasks
//! ```text
//!   send() ──► IncomingQueue ──swap──► writer task ──► FramedWrite ──► stream
//!   stream ──► FramedRead ──► reader task ──(held while paused)──► Listener
//! ```
//!
//! Any read/write failure, framing violation or explicit `disconnect()`
//! notifies the listener exactly once and discards queued output.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{FrameCodec, MAX_MESSAGE_SIZE, validate_length};
use crate::error::HostError;
use crate::ipc::endpoint;
use crate::ipc::write_queue::IncomingQueue;

// ── Listener ─────────────────────────────────────────────────────

/// Receives inbound messages and the disconnect notification.
///
/// Callbacks run on the channel's reader task and must not block or call
/// back into [`Channel::set_listener`].
pub trait Listener: Send {
    fn on_message_received(&mut self, message: Bytes);
    fn on_disconnected(&mut self);
}

/// Listener callbacks as values, for consumers running their own loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Message(Bytes),
    Disconnected,
}

impl ChannelEvent {
    pub fn dispatch(self, listener: &mut dyn Listener) {
        match self {
            ChannelEvent::Message(message) => listener.on_message_received(message),
            ChannelEvent::Disconnected => listener.on_disconnected(),
        }
    }
}

impl Listener for mpsc::UnboundedSender<ChannelEvent> {
    fn on_message_received(&mut self, message: Bytes) {
        let _ = self.send(ChannelEvent::Message(message));
    }

    fn on_disconnected(&mut self) {
        let _ = self.send(ChannelEvent::Disconnected);
    }
}

// ── Peer identity ────────────────────────────────────────────────

/// OS identity of the process on the other end, resolved at connect time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerIdentity {
    pub process_id: Option<u32>,
    pub session_id: Option<u32>,
}

// ── Shared state ─────────────────────────────────────────────────

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct Shared {
    queue: IncomingQueue,
    listener: Mutex<Option<Box<dyn Listener>>>,
    connected: AtomicBool,
    paused: watch::Sender<bool>,
    shutdown: CancellationToken,
    max_frame_size: usize,
}

impl Shared {
    fn listener(&self) -> MutexGuard<'_, Option<Box<dyn Listener>>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, payload: Bytes) -> Result<(), HostError> {
        validate_length(payload.len(), self.max_frame_size)?;
        if !self.connected.load(Ordering::Acquire) {
            return Err(HostError::ChannelClosed);
        }
        self.queue.push(payload);
        Ok(())
    }

    fn deliver(&self, message: Bytes) {
        match self.listener().as_mut() {
            Some(listener) => listener.on_message_received(message),
            None => warn!(len = message.len(), "message dropped: no listener"),
        }
    }

    /// Single transition to not-connected.
    fn on_error_occurred(&self, error: Option<HostError>) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }

        match &error {
            Some(err) => info!(error = %err, "channel disconnected"),
            None => info!("channel disconnected locally"),
        }

        self.shutdown.cancel();
        self.queue.clear();

        if let Some(listener) = self.listener().as_mut() {
            listener.on_disconnected();
        }
    }

    /// Wait until not paused. Returns `false` on shutdown.
    async fn wait_resumed(&self, paused: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            result = paused.wait_for(|paused| !*paused) => result.is_ok(),
        }
    }
}

// ── Channel ──────────────────────────────────────────────────────

pub struct Channel {
    shared: Arc<Shared>,
    io: Option<(BoxedReader, BoxedWriter)>,
    peer: PeerIdentity,
}

impl Channel {
    /// Connect to the endpoint published under `channel_id`.
    pub async fn connect(channel_id: &str) -> Result<Channel, HostError> {
        endpoint::connect(channel_id).await
    }

    /// Wrap an already connected stream.
    pub fn from_stream<S>(stream: S, peer: PeerIdentity) -> Channel
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::from_stream_with_limit(stream, peer, MAX_MESSAGE_SIZE)
    }

    /// Like [`from_stream`](Self::from_stream) with a custom frame limit.
    pub fn from_stream_with_limit<S>(stream: S, peer: PeerIdentity, max_frame_size: usize) -> Channel
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (paused, _) = watch::channel(true);

        Channel {
            shared: Arc::new(Shared {
                queue: IncomingQueue::new(),
                listener: Mutex::new(None),
                connected: AtomicBool::new(true),
                paused,
                shutdown: CancellationToken::new(),
                max_frame_size,
            }),
            io: Some((Box::new(reader), Box::new(writer))),
            peer,
        }
    }

    /// Replace the listener. Takes effect for the next delivery.
    pub fn set_listener(&self, listener: impl Listener + 'static) {
        *self.shared.listener() = Some(Box::new(listener));
    }

    /// Withhold delivery of inbound messages. A read already in progress
    /// completes; its message is held until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.shared.paused.send_replace(true);
    }

    /// Resume delivery. The first call starts the I/O tasks and must be
    /// made inside a Tokio runtime.
    pub fn resume(&mut self) {
        self.shared.paused.send_replace(false);

        if let Some((reader, writer)) = self.io.take() {
            if !self.is_connected() {
                return;
            }
            debug!("channel I/O started");
            tokio::spawn(read_loop(Arc::clone(&self.shared), reader));
            tokio::spawn(write_loop(Arc::clone(&self.shared), writer));
        }
    }

    /// Queue `payload` for sending. Never blocks.
    ///
    /// Empty and oversized payloads are rejected without affecting the
    /// connection.
    pub fn send(&self, payload: Bytes) -> Result<(), HostError> {
        self.shared.send(payload)
    }

    /// Thread-safe sending handle.
    pub fn proxy(&self) -> ChannelProxy {
        ChannelProxy {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Close the channel and notify the listener.
    pub fn disconnect(&self) {
        self.shared.on_error_occurred(None);
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        *self.shared.paused.borrow()
    }

    pub fn peer_process_id(&self) -> Option<u32> {
        self.peer.process_id
    }

    pub fn peer_session_id(&self) -> Option<u32> {
        self.peer.session_id
    }

    pub fn peer(&self) -> PeerIdentity {
        self.peer
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        // Owner is gone; stop the tasks without a notification.
        self.shared.connected.store(false, Ordering::Release);
        self.shared.shutdown.cancel();
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("connected", &self.is_connected())
            .field("paused", &self.is_paused())
            .field("peer", &self.peer)
            .finish()
    }
}

/// Cloneable sender for a [`Channel`], usable from any thread.
#[derive(Clone)]
pub struct ChannelProxy {
    shared: Arc<Shared>,
}

impl ChannelProxy {
    pub fn send(&self, payload: Bytes) -> Result<(), HostError> {
        self.shared.send(payload)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }
}

// ── I/O tasks ────────────────────────────────────────────────────

async fn read_loop(shared: Arc<Shared>, reader: BoxedReader) {
    let mut frames = FramedRead::new(reader, FrameCodec::with_max_frame_size(shared.max_frame_size));
    let mut paused = shared.paused.subscribe();

    loop {
        if !shared.wait_resumed(&mut paused).await {
            return;
        }

        let next = tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            next = frames.next() => next,
        };

        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(err)) => {
                shared.on_error_occurred(Some(err));
                return;
            }
            None => {
                shared.on_error_occurred(Some(HostError::PeerClosed));
                return;
            }
        };

        // Paused while the read was in flight.
        if !shared.wait_resumed(&mut paused).await {
            return;
        }

        shared.deliver(message);
    }
}

async fn write_loop(shared: Arc<Shared>, writer: BoxedWriter) {
    let mut sink = FramedWrite::new(writer, FrameCodec::with_max_frame_size(shared.max_frame_size));
    let mut work: VecDeque<Bytes> = VecDeque::new();

    loop {
        if work.is_empty() {
            shared.queue.swap_into(&mut work);
        }

        let Some(payload) = work.pop_front() else {
            tokio::select! {
                _ = shared.shutdown.cancelled() => return,
                _ = shared.queue.notified() => continue,
            }
        };

        let result = tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            result = sink.send(payload) => result,
        };

        if let Err(err) = result {
            shared.on_error_occurred(Some(err));
            return;
        }
    }
}
