use anyhow::Result;
use shared::protocol::Rect;

pub mod tight;

pub use tight::TightJpeg;

/// Serializes changed rectangles into a complete FramebufferUpdate
/// message, ready to write to the client.
pub trait Codec: Send {
    fn framebuffer_update(&self, rects: &[Rect]) -> Result<Vec<u8>>;
}
