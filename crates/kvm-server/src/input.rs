//! Keyboard and mouse sinks.
//!
//! Sinks receive complete tag-prefixed RFB event messages (KeyEvent
//! 8 bytes, PointerEvent 6 bytes) and relay them to the hardware that
//! drives the target machine.

use std::io::Write;
use std::process::{Child, ChildStdin, Command, Stdio};

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};

pub trait InputSink: Send {
    fn open(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn send_key_event(&mut self, event: &[u8]) -> Result<()>;

    fn send_pointer_event(&mut self, event: &[u8]) -> Result<()>;
}

/// Bridges events to a long-lived child process (for example a script
/// that owns the serial port of a keyboard/mouse microcontroller). Raw
/// event bytes go to the child's stdin; anything the child prints is
/// logged.
pub struct ShellBridge {
    command: String,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl ShellBridge {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            child: None,
            stdin: None,
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        // Re-open a bridge that died; the write below surfaces the
        // failure if it could not come back.
        if self.child.is_none()
            && let Err(e) = self.open()
        {
            warn!("reopen input bridge: {e}");
        }

        let Some(stdin) = &mut self.stdin else {
            bail!("input bridge is not open");
        };

        if let Err(e) = stdin.write_all(bytes).and_then(|()| stdin.flush()) {
            let _ = self.close();
            return Err(e).context("write to input bridge");
        }

        Ok(())
    }
}

impl InputSink for ShellBridge {
    fn open(&mut self) -> Result<()> {
        if self.child.is_some() {
            return Ok(());
        }

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("spawn input bridge: {}", self.command))?;

        self.stdin = child.stdin.take();
        if let Some(stdout) = child.stdout.take() {
            std::thread::spawn(move || echo_stdout(stdout));
        }
        self.child = Some(child);

        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.stdin = None;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        child.kill().context("kill input bridge")?;
        let _ = child.wait();
        Ok(())
    }

    fn send_key_event(&mut self, event: &[u8]) -> Result<()> {
        self.write(event)
    }

    fn send_pointer_event(&mut self, event: &[u8]) -> Result<()> {
        self.write(event)
    }
}

fn echo_stdout(stdout: impl std::io::Read) {
    let reader = std::io::BufReader::new(stdout);
    for line in std::io::BufRead::lines(reader) {
        match line {
            Ok(line) => debug!("input bridge: {line}"),
            Err(_) => return,
        }
    }
}
