//! Synthetic video source. Serves a static test pattern at a fixed
//! geometry, useful when no capture hardware is attached and as the
//! source the protocol tests run against.

use std::time::Instant;

use anyhow::Result;
use shared::protocol::{Frame, Rect, SliceCount};

use super::VideoSource;
use super::diff::diff;

const DEFAULT_WIDTH: u32 = 1920;
const DEFAULT_HEIGHT: u32 = 1080;
const DEFAULT_FRAME_RATE: f64 = 30.0;

pub struct DummySource {
    width: u32,
    height: u32,
    frame_rate: f64,
    current: Option<Frame>,
    previous: Option<Frame>,
    captured_at: Option<Instant>,
}

impl DummySource {
    pub fn new(width: u32, height: u32, frame_rate: f64) -> Self {
        Self {
            width: if width == 0 { DEFAULT_WIDTH } else { width },
            height: if height == 0 { DEFAULT_HEIGHT } else { height },
            frame_rate: if frame_rate == 0.0 {
                DEFAULT_FRAME_RATE
            } else {
                frame_rate
            },
            current: None,
            previous: None,
            captured_at: None,
        }
    }

    /// Return the pattern frame, re-capturing at most once per frame
    /// interval. Between intervals the cached frame is handed out again.
    fn capture(&mut self) -> Frame {
        let interval = 1.0 / self.frame_rate;
        if let (Some(at), Some(frame)) = (self.captured_at, &self.current) {
            if at.elapsed().as_secs_f64() <= interval {
                return frame.clone();
            }
        }

        self.captured_at = Some(Instant::now());
        let frame = self
            .current
            .take()
            .unwrap_or_else(|| render_pattern(self.width, self.height));
        self.current = Some(frame.clone());
        frame
    }
}

impl VideoSource for DummySource {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn size(&mut self) -> Result<(u32, u32)> {
        Ok((self.width, self.height))
    }

    fn next_image_rects(&mut self, slice_count: SliceCount, full: bool) -> Result<Vec<Rect>> {
        let previous = self.previous.clone();
        let current = self.capture();

        // Unchanged buffer, nothing to scan.
        if !full
            && let Some(previous) = &previous
            && previous.same_buffer(&current)
        {
            return Ok(Vec::new());
        }

        let rects = diff(previous.as_ref(), Some(&current), slice_count, full)?;
        self.previous = Some(current);
        Ok(rects)
    }
}

/// A horizontal/vertical gradient; every tile of any grid has distinct
/// content, which keeps JPEG output non-degenerate.
fn render_pattern(width: u32, height: u32) -> Frame {
    let mut data = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            let r = (x * 255 / width.max(1)) as u8;
            let g = (y * 255 / height.max(1)) as u8;
            data.extend_from_slice(&[r, g, 0x40, 0xff]);
        }
    }
    Frame::from_rgba(width, height, data)
}
