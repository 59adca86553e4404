use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, OnceCell};
use tracing::{info, warn};

use shared::protocol::{ServerInit, SliceCount};

use crate::clipboard::ClipboardSink;
use crate::codec::Codec;
use crate::error::Result;
use crate::input::InputSink;
use crate::session::Session;
use crate::transport::Connection;
use crate::video::VideoSource;

/// An input sink shared between server roles (a combined keyboard/mouse
/// microcontroller serves as both).
pub type SharedSink = Arc<Mutex<Box<dyn InputSink>>>;

pub fn shared_sink(sink: Box<dyn InputSink>) -> SharedSink {
    Arc::new(Mutex::new(sink))
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Empty disables authentication entirely.
    pub password: String,
    pub slice_count: SliceCount,
    pub cursor_x_scale: f64,
    pub cursor_y_scale: f64,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            password: String::new(),
            slice_count: 4,
            cursor_x_scale: 1.0,
            cursor_y_scale: 1.0,
        }
    }
}

/// The video source and codec form one critical section: the capture
/// device holds a single-frame state machine, so frame advance, diff and
/// encode must not interleave across clients.
pub struct Pipeline {
    pub video: Box<dyn VideoSource>,
    pub codec: Box<dyn Codec>,
}

/// One long-lived instance per process. Sessions are independent except
/// for the shared pipeline lock.
pub struct Server {
    pub(crate) keyboard: Option<SharedSink>,
    pub(crate) mouse: Option<SharedSink>,
    pub(crate) clipboard: Option<SharedClipboard>,
    pub(crate) pipeline: Mutex<Pipeline>,
    pub(crate) options: ServerOptions,
    server_init: OnceCell<Vec<u8>>,
    active_sessions: AtomicI64,
}

pub type SharedClipboard = Arc<Mutex<Box<dyn ClipboardSink>>>;

impl Server {
    pub fn new(
        keyboard: Option<SharedSink>,
        video: Box<dyn VideoSource>,
        mouse: Option<SharedSink>,
        codec: Box<dyn Codec>,
        options: ServerOptions,
    ) -> Self {
        Self {
            keyboard,
            mouse,
            clipboard: None,
            pipeline: Mutex::new(Pipeline { video, codec }),
            options,
            server_init: OnceCell::new(),
            active_sessions: AtomicI64::new(0),
        }
    }

    pub fn with_clipboard(mut self, clipboard: SharedClipboard) -> Self {
        self.clipboard = Some(clipboard);
        self
    }

    /// Run the RFB protocol over one accepted connection until the client
    /// disconnects or the session errors out. The video source is opened
    /// with the first active session and closed with the last.
    pub async fn handle_client<S>(&self, conn: Connection<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if let Err(e) = self.client_connected().await {
            self.client_disconnected().await;
            return Err(e);
        }
        let result = Session::new(conn, self).run().await;
        self.client_disconnected().await;
        result
    }

    /// The serialized ServerInit message. Computed from the video geometry
    /// on first use and cached for the server lifetime: if the capture
    /// geometry changes later, subsequent clients still receive the stale
    /// bytes. Known limitation.
    pub(crate) async fn server_init_bytes(&self) -> Result<Vec<u8>> {
        let bytes = self
            .server_init
            .get_or_try_init(|| async {
                let mut pipeline = self.pipeline.lock().await;
                let (width, height) = pipeline.video.size()?;
                Ok::<_, crate::error::KvmError>(
                    ServerInit::new(width as u16, height as u16).to_bytes(),
                )
            })
            .await?;
        Ok(bytes.clone())
    }

    async fn client_connected(&self) -> Result<()> {
        if self.active_sessions.fetch_add(1, Ordering::SeqCst) == 0 {
            info!("first client, opening video");
            self.pipeline.lock().await.video.open()?;
        }
        Ok(())
    }

    async fn client_disconnected(&self) {
        if self.active_sessions.fetch_sub(1, Ordering::SeqCst) == 1 {
            info!("no client left, closing video");
            if let Err(e) = self.pipeline.lock().await.video.close() {
                warn!("close video: {e}");
            }
        }
    }
}
