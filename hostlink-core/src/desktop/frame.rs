//! A captured frame living in a shared-memory buffer.

use std::sync::Arc;

use crate::desktop::types::{PixelFormat, Point, Rect, Region, Size};
use crate::message::SerializedFrame;
use crate::shared_memory::{SharedMemory, SharedMemoryId};

/// Frame produced by a [`ScreenCapturer`](super::ScreenCapturer).
///
/// Pixels are stored in `shared_memory` as `size.height` rows of `stride`
/// bytes. `updated_region` is in frame-local coordinates; an empty region
/// means nothing changed since the previous capture.
#[derive(Debug, Clone)]
pub struct SharedFrame {
    pub top_left: Point,
    pub size: Size,
    pub format: PixelFormat,
    pub stride: usize,
    pub updated_region: Region,
    pub shared_memory: Arc<SharedMemory>,
}

impl SharedFrame {
    pub fn shared_memory_id(&self) -> SharedMemoryId {
        self.shared_memory.id()
    }

    pub fn desktop_rect(&self) -> Rect {
        Rect::from_origin(self.top_left, self.size)
    }

    pub fn has_updates(&self) -> bool {
        !self.updated_region.is_empty()
    }

    /// Wire description of this frame for the broker.
    pub fn to_serialized(&self) -> SerializedFrame {
        SerializedFrame {
            shared_buffer_id: self.shared_memory_id(),
            desktop_rect: self.desktop_rect(),
            pixel_format: self.format,
            stride: self.stride as u32,
            dirty_rects: self.updated_region.rects().to_vec(),
        }
    }
}
