//! Geometry and screen types shared by the capture pipeline and the
//! message layer.
//!
//! `RawScreenFrame` is the in-process pixel buffer handed from a
//! [`FrameSource`](crate::desktop::capture::FrameSource) to the capturer;
//! everything else is serialisable and travels inside messages.

use std::time::Instant;

use serde::{Deserialize, Serialize};

// ── Geometry ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

/// An axis-aligned rectangle in desktop coordinates.
///
/// Coordinates are signed: secondary monitors may sit left of or above
/// the primary one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn make_xywh(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_origin(top_left: Point, size: Size) -> Self {
        Self::make_xywh(top_left.x, top_left.y, size.width, size.height)
    }

    pub fn left(&self) -> i32 {
        self.x
    }

    pub fn top(&self) -> i32 {
        self.y
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.left() >= self.left()
            && other.top() >= self.top()
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Smallest rectangle covering both. Empty rectangles are ignored.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let left = self.left().min(other.left());
        let top = self.top().min(other.top());
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Rect::make_xywh(left, top, right - left, bottom - top)
    }
}

// ── Region ───────────────────────────────────────────────────────

/// A set of dirty rectangles.
///
/// Rectangles are kept as reported by the delta detector; they do not
/// overlap because the detector works on a fixed tile grid.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Region {
    rects: Vec<Rect>,
}

impl Region {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rect(rect: Rect) -> Self {
        let mut region = Self::new();
        region.add_rect(rect);
        region
    }

    /// Add a rectangle; empty rectangles are dropped.
    pub fn add_rect(&mut self, rect: Rect) {
        if !rect.is_empty() {
            self.rects.push(rect);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn clear(&mut self) {
        self.rects.clear();
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    pub fn bounding_rect(&self) -> Rect {
        self.rects
            .iter()
            .fold(Rect::default(), |acc, rect| acc.union(rect))
    }
}

impl FromIterator<Rect> for Region {
    fn from_iter<I: IntoIterator<Item = Rect>>(iter: I) -> Self {
        let mut region = Region::new();
        for rect in iter {
            region.add_rect(rect);
        }
        region
    }
}

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout of captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, Alpha (DXGI default).
    #[default]
    Bgra8,
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba8,
    /// 3 bytes per pixel: Red, Green, Blue.
    Rgb8,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }
}

// ── RawScreenFrame ───────────────────────────────────────────────

/// A raw, uncompressed screen capture obtained from the OS.
///
/// The `data` buffer holds `height` rows of `stride` bytes each.
/// `stride` may be larger than `width * bytes_per_pixel` due to
/// GPU row-alignment requirements.
#[derive(Debug, Clone)]
pub struct RawScreenFrame {
    /// Position of the captured output on the virtual desktop.
    pub top_left: Point,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Row pitch in **bytes** (may exceed `width * bpp`).
    pub stride: u32,
    /// Pixel layout.
    pub format: PixelFormat,
    /// Raw pixel data, `stride * height` bytes.
    pub data: Vec<u8>,
    /// Monotonic capture timestamp.
    pub timestamp: Instant,
}

impl RawScreenFrame {
    /// Total byte size the raw bitmap occupies.
    pub fn byte_len(&self) -> usize {
        self.stride as usize * self.height as usize
    }

    /// Bytes of one tightly packed row.
    pub fn packed_row_len(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Returns a row slice (including possible padding bytes).
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride as usize;
        let end = start + self.stride as usize;
        &self.data[start..end]
    }

    pub fn size(&self) -> Size {
        Size::new(self.width as i32, self.height as i32)
    }
}

// ── Screens ──────────────────────────────────────────────────────

pub type ScreenId = i64;

/// Pseudo screen covering every monitor.
pub const FULL_DESKTOP_SCREEN_ID: ScreenId = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screen {
    pub id: ScreenId,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScreenList {
    pub screens: Vec<Screen>,
    pub current_screen: ScreenId,
}

impl ScreenList {
    pub fn contains(&self, id: ScreenId) -> bool {
        self.screens.iter().any(|screen| screen.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_union_skips_empty() {
        let a = Rect::make_xywh(10, 10, 10, 10);
        let empty = Rect::default();
        assert_eq!(a.union(&empty), a);
        assert_eq!(empty.union(&a), a);

        let b = Rect::make_xywh(-5, 15, 5, 20);
        assert_eq!(a.union(&b), Rect::make_xywh(-5, 10, 25, 25));
    }

    #[test]
    fn region_drops_empty_rects() {
        let mut region = Region::new();
        region.add_rect(Rect::make_xywh(0, 0, 0, 10));
        assert!(region.is_empty());

        region.add_rect(Rect::make_xywh(0, 0, 64, 64));
        region.add_rect(Rect::make_xywh(64, 64, 64, 64));
        assert_eq!(region.rects().len(), 2);
        assert_eq!(region.bounding_rect(), Rect::make_xywh(0, 0, 128, 128));
    }

    #[test]
    fn contains_rect_edges() {
        let outer = Rect::make_xywh(0, 0, 100, 100);
        assert!(outer.contains_rect(&Rect::make_xywh(0, 0, 100, 100)));
        assert!(!outer.contains_rect(&Rect::make_xywh(1, 0, 100, 100)));
    }
}
