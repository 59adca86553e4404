use std::sync::Arc;

/// How many cuts to make per axis when tiling a frame for change
/// detection. A slice count of 4 divides a 1920x1080 frame into 16 tiles
/// of 480x270. Frame width and height must both be divisible by it.
pub type SliceCount = u32;

/// A captured frame: RGBA8888 pixels, row-major, fixed geometry.
///
/// Cloning is cheap and shares the pixel buffer. The alpha channel is
/// carried but ignored by change detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Arc<[u8]>,
}

impl Frame {
    /// Wrap an RGBA8888 buffer. `data` must hold exactly
    /// `width * height * 4` bytes.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Self {
        assert_eq!(
            data.len(),
            width as usize * height as usize * 4,
            "pixel buffer does not match {width}x{height}",
        );
        Self {
            width,
            height,
            data: data.into(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The RGB channels of one pixel.
    pub fn rgb(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    /// Copy out a sub-region as an owned frame.
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Frame {
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for row in y..y + height {
            let start = (row as usize * self.width as usize + x as usize) * 4;
            data.extend_from_slice(&self.data[start..start + width as usize * 4]);
        }
        Frame::from_rgba(width, height, data)
    }

    /// True when both frames share one pixel buffer, which lets callers
    /// skip a pixel compare entirely.
    pub fn same_buffer(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

/// One changed tile: its pixel offset from the frame origin plus a
/// frame-shaped view over exactly that tile's pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rect {
    pub x: u64,
    pub y: u64,
    pub frame: Frame,
}
