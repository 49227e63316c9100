//! Block-level change detection between consecutive frames.
//!
//! Divides the screen into `block_size × block_size` tiles and compares
//! each tile byte-for-byte against the previous frame. Changed tiles
//! become the frame's updated region; an unchanged screen yields an
//! empty region, which the agent treats as "nothing to send".

use std::cmp;

use crate::desktop::types::{RawScreenFrame, Rect, Region};

/// Stateful detector that remembers the previous frame.
///
/// A block size of **64** skips unchanged areas of a typical desktop
/// without producing thousands of tiny rectangles.
pub struct DeltaDetector {
    previous_frame: Option<RawScreenFrame>,
    block_size: usize,
}

impl DeltaDetector {
    pub fn new(block_size: usize) -> Self {
        Self {
            previous_frame: None,
            block_size: block_size.max(8),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Forget the previous frame; the next frame is reported as fully
    /// changed.
    pub fn reset(&mut self) {
        self.previous_frame = None;
    }

    /// Compare `current` against the stored previous frame and return the
    /// changed tiles in frame-local coordinates.
    pub fn detect(&mut self, current: &RawScreenFrame) -> Region {
        let region = match &self.previous_frame {
            Some(prev)
                if prev.width == current.width
                    && prev.height == current.height
                    && prev.stride == current.stride
                    && prev.format == current.format =>
            {
                self.detect_blocks(current, prev)
            }
            // First frame or mode change.
            _ => Region::from_rect(Rect::make_xywh(
                0,
                0,
                current.width as i32,
                current.height as i32,
            )),
        };

        self.previous_frame = Some(current.clone());
        region
    }

    fn detect_blocks(&self, current: &RawScreenFrame, previous: &RawScreenFrame) -> Region {
        let w = current.width as usize;
        let h = current.height as usize;
        let bs = self.block_size;

        let blocks_x = w.div_ceil(bs);
        let blocks_y = h.div_ceil(bs);

        let mut region = Region::new();

        for by in 0..blocks_y {
            for bx in 0..blocks_x {
                let start_x = bx * bs;
                let start_y = by * bs;
                let end_x = cmp::min(start_x + bs, w);
                let end_y = cmp::min(start_y + bs, h);

                if Self::block_differs(current, previous, start_x, start_y, end_x, end_y) {
                    region.add_rect(Rect::make_xywh(
                        start_x as i32,
                        start_y as i32,
                        (end_x - start_x) as i32,
                        (end_y - start_y) as i32,
                    ));
                }
            }
        }

        region
    }

    /// Row-by-row byte comparison for a rectangular tile.
    fn block_differs(
        current: &RawScreenFrame,
        previous: &RawScreenFrame,
        start_x: usize,
        start_y: usize,
        end_x: usize,
        end_y: usize,
    ) -> bool {
        let bpp = current.format.bytes_per_pixel();
        let stride = current.stride as usize;

        for y in start_y..end_y {
            let row_offset = y * stride;
            let left = start_x * bpp;
            let right = end_x * bpp;

            let cur_slice = &current.data[row_offset + left..row_offset + right];
            let prev_slice = &previous.data[row_offset + left..row_offset + right];

            if cur_slice != prev_slice {
                return true;
            }
        }
        false
    }
}
