use anyhow::Result;
use shared::protocol::{Rect, SliceCount};

pub mod diff;
pub mod dummy;
pub mod shell;

pub use diff::DiffError;
pub use dummy::DummySource;
pub use shell::ShellSource;

/// A video capture driver.
///
/// `open` and `close` are idempotent; the server calls them when the first
/// client connects and the last one disconnects. Frame state is not safe
/// for concurrent advance, so the server serializes all calls behind one
/// lock.
pub trait VideoSource: Send {
    fn open(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn frame_rate(&self) -> f64;

    /// Capture geometry in pixels.
    fn size(&mut self) -> Result<(u32, u32)>;

    /// Advance to the latest frame and report the tiles that changed since
    /// the previous call. `full` forces every tile regardless of content.
    fn next_image_rects(&mut self, slice_count: SliceCount, full: bool) -> Result<Vec<Rect>>;
}
