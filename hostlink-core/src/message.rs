//! Messages exchanged between the broker and a session agent.
//!
//! Every message travels as one transport frame whose payload is the
//! bincode encoding of [`Message`] (variant index followed by fields).
//!
//! ```text
//! Broker ──[StartSession]──────────────────► Agent
//! Agent  ──[CreateSharedBuffer { id }]─────► Broker
//! Agent  ──[EncodeFrame(SerializedFrame)]──► Broker
//! Broker ──[EncodeFrameResult]─────────────► Agent     (ack, next capture)
//! Agent  ──[ReleaseSharedBuffer { id }]────► Broker
//! Broker ──[StopSession]───────────────────► Agent
//! ```

use std::fmt;

use bitflags::bitflags;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::desktop::types::{PixelFormat, Rect, ScreenId, ScreenList};
use crate::error::HostError;
use crate::launcher::AgentRole;
use crate::shared_memory::SharedMemoryId;

// ── Input ────────────────────────────────────────────────────────

bitflags! {
    /// Pointer buttons held during a pointer event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct PointerButtons: u32 {
        const LEFT        = 0x01;
        const MIDDLE      = 0x02;
        const RIGHT       = 0x04;
        const WHEEL_UP    = 0x08;
        const WHEEL_DOWN  = 0x10;
    }
}

bitflags! {
    /// Key state and lock-key modifiers carried by a key event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct KeyFlags: u32 {
        const PRESSED  = 0x01;
        const CAPSLOCK = 0x02;
        const NUMLOCK  = 0x04;
    }
}

/// Absolute pointer position plus the full button mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerEvent {
    pub x: i32,
    pub y: i32,
    pub mask: PointerButtons,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    /// Windows virtual-key code.
    pub virtual_key: u16,
    /// Hardware scan code; 0 when unknown.
    pub scan_code: u16,
    pub flags: KeyFlags,
}

impl KeyEvent {
    pub fn is_pressed(&self) -> bool {
        self.flags.contains(KeyFlags::PRESSED)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipboardEvent {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl ClipboardEvent {
    pub const TEXT_UTF8: &'static str = "text/plain; charset=UTF-8";

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            mime_type: Self::TEXT_UTF8.to_string(),
            data: text.into().into_bytes(),
        }
    }
}

// ── Capture ──────────────────────────────────────────────────────

/// Desktop features that slow down capture when enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Features {
    pub wallpaper: bool,
    pub effects: bool,
}

/// Frame metadata; pixels stay in shared buffer `shared_buffer_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedFrame {
    pub shared_buffer_id: SharedMemoryId,
    pub desktop_rect: Rect,
    pub pixel_format: PixelFormat,
    pub stride: u32,
    pub dirty_rects: Vec<Rect>,
}

// ── Message ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    // Broker → agent
    EncodeFrameResult,
    PointerEvent(PointerEvent),
    KeyEvent(KeyEvent),
    ClipboardEvent(ClipboardEvent),
    StartSession,
    StopSession,
    SelectSource { screen_id: ScreenId },
    SetFeatures(Features),
    SetBlockInput { state: bool },
    LogoffUserSession,
    LockUserSession,

    // Agent → broker
    EncodeFrame(SerializedFrame),
    CreateSharedBuffer { id: SharedMemoryId },
    ReleaseSharedBuffer { id: SharedMemoryId },
    ScreenListChanged(ScreenList),
}

/// Which side of the channel originates a message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToAgent,
    ToBroker,
    Both,
}

impl Message {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::EncodeFrameResult => "encode-frame-result",
            Message::PointerEvent(_) => "pointer-event",
            Message::KeyEvent(_) => "key-event",
            Message::ClipboardEvent(_) => "clipboard-event",
            Message::StartSession => "start-session",
            Message::StopSession => "stop-session",
            Message::SelectSource { .. } => "select-source",
            Message::SetFeatures(_) => "set-features",
            Message::SetBlockInput { .. } => "set-block-input",
            Message::LogoffUserSession => "logoff",
            Message::LockUserSession => "lock",
            Message::EncodeFrame(_) => "encode-frame",
            Message::CreateSharedBuffer { .. } => "create-shared-buffer",
            Message::ReleaseSharedBuffer { .. } => "release-shared-buffer",
            Message::ScreenListChanged(_) => "screen-list-changed",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Message::ClipboardEvent(_) => Direction::Both,
            Message::EncodeFrame(_)
            | Message::CreateSharedBuffer { .. }
            | Message::ReleaseSharedBuffer { .. }
            | Message::ScreenListChanged(_) => Direction::ToBroker,
            _ => Direction::ToAgent,
        }
    }

    /// Whether the broker accepts this message from an agent running as
    /// `role`. Only desktop agents may report desktop state.
    pub fn is_permitted_from(&self, role: AgentRole) -> bool {
        match role {
            AgentRole::Desktop => self.direction() != Direction::ToAgent,
            AgentRole::FileTransfer => false,
        }
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Bytes, HostError> {
        bincode::serialize(self)
            .map(Bytes::from)
            .map_err(|e| HostError::Encoding(e.to_string()))
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HostError> {
        bincode::deserialize(bytes).map_err(|e| HostError::Encoding(e.to_string()))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_message_survives_encoding() {
        let msg = Message::EncodeFrame(SerializedFrame {
            shared_buffer_id: 7,
            desktop_rect: Rect::make_xywh(-1920, 0, 1920, 1080),
            pixel_format: PixelFormat::Bgra8,
            stride: 1920 * 4,
            dirty_rects: vec![Rect::make_xywh(0, 0, 64, 64)],
        });
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(Message::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn unit_variant_is_never_empty_on_the_wire() {
        // Zero-length frames are invalid, so every message must encode to
        // at least the variant tag.
        assert!(!Message::StartSession.to_bytes().unwrap().is_empty());
    }

    #[test]
    fn garbage_is_an_encoding_error() {
        let err = Message::from_bytes(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF]).unwrap_err();
        assert!(matches!(err, HostError::Encoding(_)));
        assert!(!err.is_transport_fatal());
    }

    #[test]
    fn file_transfer_peer_cannot_send_desktop_messages() {
        let frame = Message::CreateSharedBuffer { id: 1 };
        assert!(frame.is_permitted_from(AgentRole::Desktop));
        assert!(!frame.is_permitted_from(AgentRole::FileTransfer));

        let input = Message::PointerEvent(PointerEvent {
            x: 1,
            y: 1,
            mask: PointerButtons::LEFT,
        });
        assert!(!input.is_permitted_from(AgentRole::Desktop));
        assert!(!input.is_permitted_from(AgentRole::FileTransfer));
    }

    #[test]
    fn key_flags() {
        let key = KeyEvent {
            virtual_key: 0x41,
            scan_code: 0x1E,
            flags: KeyFlags::PRESSED | KeyFlags::NUMLOCK,
        };
        assert!(key.is_pressed());
        assert_eq!(Message::KeyEvent(key).kind(), "key-event");
    }
}
