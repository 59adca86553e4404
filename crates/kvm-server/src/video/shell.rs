//! Shell-spawned capture pipeline.
//!
//! Runs a user-supplied command (typically ffmpeg) whose stdout is an
//! MJPEG byte stream. A reader thread splits the stream on JPEG SOI/EOI
//! markers and keeps only the newest complete frame; frames are decoded
//! lazily when a client asks for rects.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use image::ImageFormat;
use shared::protocol::{Frame, Rect, SliceCount};
use tracing::{debug, warn};

use super::VideoSource;
use super::diff::diff;

const SOI: [u8; 2] = [0xff, 0xd8];
const EOI: [u8; 2] = [0xff, 0xd9];

/// How long `open` waits for the pipeline to produce its first frame.
const READY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct LatestJpeg {
    bytes: Option<Vec<u8>>,
    seq: u64,
}

pub struct ShellSource {
    command: String,
    width: u32,
    height: u32,
    frame_rate: f64,
    child: Option<Child>,
    latest: Arc<Mutex<LatestJpeg>>,
    decoded_seq: u64,
    current: Option<Frame>,
    previous: Option<Frame>,
    last_rects: Vec<Rect>,
}

impl ShellSource {
    pub fn new(command: impl Into<String>, width: u32, height: u32, frame_rate: f64) -> Self {
        Self {
            command: command.into(),
            width,
            height,
            frame_rate,
            child: None,
            latest: Arc::new(Mutex::new(LatestJpeg::default())),
            decoded_seq: 0,
            current: None,
            previous: None,
            last_rects: Vec::new(),
        }
    }

    /// Decode the newest captured frame. Returns whether the frame
    /// advanced since the last call, plus the frame itself (None until
    /// the pipeline has produced one).
    fn get_frame(&mut self) -> Result<(bool, Option<Frame>)> {
        let (seq, jpeg) = {
            let latest = self
                .latest
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            (latest.seq, latest.bytes.clone())
        };

        let Some(jpeg) = jpeg else {
            return Ok((false, None));
        };

        if seq == self.decoded_seq && self.current.is_some() {
            return Ok((false, self.current.clone()));
        }

        let image = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg)
            .context("decode captured frame")?
            .to_rgba8();
        let frame = Frame::from_rgba(image.width(), image.height(), image.into_raw());

        self.previous = self.current.take();
        self.current = Some(frame.clone());
        self.decoded_seq = seq;

        Ok((true, Some(frame)))
    }
}

impl VideoSource for ShellSource {
    fn open(&mut self) -> Result<()> {
        if self.child.is_some() {
            return Ok(());
        }

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn capture pipeline: {}", self.command))?;

        let stdout = child.stdout.take().context("capture pipeline has no stdout")?;
        let stderr = child.stderr.take().context("capture pipeline has no stderr")?;

        let (ready_tx, ready_rx) = mpsc::channel();
        let latest = Arc::clone(&self.latest);
        std::thread::spawn(move || scan_stream(stdout, latest, ready_tx));
        std::thread::spawn(move || drain_stderr(stderr));

        self.child = Some(child);

        if ready_rx.recv_timeout(READY_TIMEOUT).is_err() {
            let _ = self.close();
            bail!("capture pipeline produced no frame within {READY_TIMEOUT:?}");
        }

        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        child.kill().context("kill capture pipeline")?;
        let _ = child.wait();
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
        let (changed, current) = self.get_frame()?;

        // Same frame as last time: replay the rects already computed for
        // it so a lagging client still converges.
        if !changed && !full && !self.last_rects.is_empty() {
            return Ok(self.last_rects.clone());
        }

        let rects = diff(previous.as_ref(), current.as_ref(), slice_count, full)?;
        if !full {
            self.last_rects = rects.clone();
        }
        Ok(rects)
    }
}

/// Split an MJPEG byte stream on SOI/EOI markers, publishing each complete
/// frame. Signals `ready` once the first SOI is seen.
fn scan_stream(mut stdout: impl Read, latest: Arc<Mutex<LatestJpeg>>, ready: mpsc::Sender<()>) {
    let mut pending: Vec<u8> = Vec::new();
    let mut started = false;
    let mut ready_sent = false;
    let mut buf = [0u8; 8192];

    loop {
        let n = match stdout.read(&mut buf) {
            Ok(0) => {
                debug!("capture pipeline stdout closed");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("capture pipeline read: {e}");
                return;
            }
        };
        pending.extend_from_slice(&buf[..n]);

        loop {
            if !started {
                match find_marker(&pending, &SOI) {
                    Some(at) => {
                        pending.drain(..at);
                        started = true;
                        if !ready_sent {
                            ready_sent = true;
                            let _ = ready.send(());
                        }
                    }
                    None => {
                        // Keep one byte in case a marker straddles reads.
                        let keep = pending.len().saturating_sub(1);
                        pending.drain(..keep);
                        break;
                    }
                }
            }

            match find_marker(&pending[SOI.len()..], &EOI) {
                Some(at) => {
                    let end = SOI.len() + at + EOI.len();
                    let frame: Vec<u8> = pending.drain(..end).collect();
                    let mut latest = latest.lock().unwrap_or_else(PoisonError::into_inner);
                    latest.bytes = Some(frame);
                    latest.seq += 1;
                    started = false;
                }
                None => break,
            }
        }
    }
}

fn drain_stderr(stderr: impl Read) {
    let reader = std::io::BufReader::new(stderr);
    for line in std::io::BufRead::lines(reader) {
        match line {
            Ok(line) => debug!("capture pipeline: {line}"),
            Err(_) => return,
        }
    }
}

fn find_marker(haystack: &[u8], marker: &[u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == marker)
}
