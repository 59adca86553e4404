//! Clipboard bridging. Optional; when no sink is configured, inbound cut
//! text from clients is logged and dropped.

use anyhow::Result;

pub trait ClipboardSink: Send {
    fn open(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    /// Latest clipboard content of the target machine.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Push client clipboard content to the target machine.
    fn write(&mut self, text: &[u8]) -> Result<()>;
}
