//! Per-connection RFB state machine: handshake, security negotiation,
//! authentication, client init, then the message dispatch loop.

use rand::RngCore;
use rand::rngs::OsRng;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, warn};

use shared::protocol::{
    CHALLENGE_SIZE, ClientMessage, FRAMEBUFFER_UPDATE_REQUEST_BODY, KEY_EVENT_BODY,
    NUMBER_OF_SECURITY_TYPES, POINTER_EVENT_BODY, PROTOCOL_VERSION, SECURITY_RESULT_FAIL,
    SECURITY_RESULT_OK, SET_PIXEL_FORMAT_BODY, SecurityType, rescale_pointer,
};

use crate::auth::encrypt_challenge;
use crate::error::{KvmError, Result};
use crate::server::Server;
use crate::transport::Connection;

pub struct Session<'srv, S> {
    conn: Connection<S>,
    server: &'srv Server,
    security_type: Option<SecurityType>,
    challenge: Option<[u8; CHALLENGE_SIZE]>,
    /// Every tile is sent until the first non-empty update goes out, so a
    /// newly connected client starts from a complete frame.
    full_frame_pending: bool,
}

impl<'srv, S: AsyncRead + AsyncWrite + Unpin> Session<'srv, S> {
    pub fn new(conn: Connection<S>, server: &'srv Server) -> Self {
        Self {
            conn,
            server,
            security_type: None,
            challenge: None,
            full_frame_pending: true,
        }
    }

    /// Drive the connection through every protocol phase, in order. Only
    /// the message loop is re-entered; the earlier phases run once.
    pub async fn run(mut self) -> Result<()> {
        if !self.handshake().await? {
            return Err(KvmError::HandshakeFailed);
        }
        self.negotiate_security().await?;
        if !self.authenticate().await? {
            return Err(KvmError::AuthFailed);
        }
        self.client_init().await?;
        self.message_loop().await
    }

    /// Exchange protocol versions, then advertise the single security
    /// type this server is configured for.
    async fn handshake(&mut self) -> Result<bool> {
        self.conn.write_all(PROTOCOL_VERSION).await?;

        let reply = self.conn.read_exact(PROTOCOL_VERSION.len()).await?;
        if reply != PROTOCOL_VERSION {
            self.conn.close("Unsupported protocol version").await;
            return Ok(false);
        }

        let advertised = if self.server.options.password.is_empty() {
            SecurityType::None
        } else {
            SecurityType::VncAuth
        };
        self.conn
            .write_all(&[NUMBER_OF_SECURITY_TYPES, advertised as u8])
            .await?;

        Ok(true)
    }

    /// Read the client's security-type selection and, for VNC auth, send
    /// the random challenge.
    async fn negotiate_security(&mut self) -> Result<()> {
        let selection = self.conn.read_exact(1).await?[0];

        match SecurityType::from_u8(selection) {
            Some(SecurityType::None) => {
                self.security_type = Some(SecurityType::None);
                Ok(())
            }
            Some(SecurityType::VncAuth) => {
                if self.server.options.password.is_empty() {
                    // the client picked an auth type we cannot service
                    self.conn.close("Internal Server Error").await;
                    return Err(KvmError::UnsupportedAuthType);
                }
                self.security_type = Some(SecurityType::VncAuth);

                let mut challenge = [0u8; CHALLENGE_SIZE];
                OsRng.fill_bytes(&mut challenge);
                self.conn.write_all(&challenge).await?;
                self.challenge = Some(challenge);
                Ok(())
            }
            None => {
                self.conn.close("Unsupported auth type").await;
                Err(KvmError::UnsupportedAuthType)
            }
        }
    }

    /// Verify the challenge response, or pass straight through when the
    /// negotiated type needs none.
    async fn authenticate(&mut self) -> Result<bool> {
        if self.security_type != Some(SecurityType::VncAuth) {
            self.conn.write_all(&SECURITY_RESULT_OK).await?;
            return Ok(true);
        }

        let Some(challenge) = self.challenge else {
            // VncAuth negotiated but no challenge issued, a server bug
            return Err(KvmError::InternalServerError);
        };

        let expected = encrypt_challenge(&self.server.options.password, &challenge);
        let response = self.conn.read_exact(CHALLENGE_SIZE).await?;

        if response != expected {
            self.conn.write_all(&SECURITY_RESULT_FAIL).await?;
            self.conn.close("Password is incorrect").await;
            return Ok(false);
        }

        self.conn.write_all(&SECURITY_RESULT_OK).await?;
        Ok(true)
    }

    async fn client_init(&mut self) -> Result<()> {
        // shared flag, currently ignored
        let _shared = self.conn.read_exact(1).await?;

        let server_init = self.server.server_init_bytes().await?;
        self.conn.write_all(&server_init).await
    }

    async fn message_loop(&mut self) -> Result<()> {
        loop {
            let tag = self.conn.read_exact(1).await?[0];

            match ClientMessage::from_u8(tag) {
                Some(ClientMessage::SetPixelFormat) => {
                    // requested formats are not honored
                    self.conn.read_exact(SET_PIXEL_FORMAT_BODY).await?;
                }
                Some(ClientMessage::SetEncodings) => {
                    let head = self.conn.read_exact(3).await?;
                    let count = u16::from_be_bytes([head[1], head[2]]) as usize;
                    // requested encodings are not honored either
                    self.conn.read_exact(count * 4).await?;
                }
                Some(ClientMessage::FramebufferUpdateRequest) => {
                    self.conn.read_exact(FRAMEBUFFER_UPDATE_REQUEST_BODY).await?;
                    self.framebuffer_update().await?;
                }
                Some(ClientMessage::KeyEvent) => {
                    let event = self.read_event(tag, KEY_EVENT_BODY).await?;
                    if let Err(e) = self.forward_key_event(&event).await {
                        warn!("key event: {e}");
                    }
                }
                Some(ClientMessage::PointerEvent) => {
                    let mut event = self.read_event(tag, POINTER_EVENT_BODY).await?;
                    rescale_pointer(
                        &mut event,
                        self.server.options.cursor_x_scale,
                        self.server.options.cursor_y_scale,
                    );
                    if let Err(e) = self.forward_pointer_event(&event).await {
                        warn!("pointer event: {e}");
                    }
                }
                Some(ClientMessage::ClientCutText) => {
                    let head = self.conn.read_exact(7).await?;
                    let length =
                        u32::from_be_bytes([head[3], head[4], head[5], head[6]]) as usize;
                    let text = self.conn.read_exact(length).await?;
                    self.forward_cut_text(&text).await;
                }
                None => {
                    // no known body length, the stream cannot stay aligned
                    warn!("unsupported message type {tag:#04x}");
                    self.conn.close("Unsupported message type").await;
                    return Err(KvmError::UnsupportedMessageType(tag));
                }
            }
        }
    }

    /// Serve one framebuffer update under the server-wide pipeline lock.
    /// Capture and encode failures degrade to an empty update; only a
    /// failed write tears the session down.
    async fn framebuffer_update(&mut self) -> Result<()> {
        let slice_count = self.server.options.slice_count;

        let mut pipeline = self.server.pipeline.lock().await;

        let rects = match pipeline
            .video
            .next_image_rects(slice_count, self.full_frame_pending)
        {
            Ok(rects) => rects,
            Err(e) => {
                error!("next image rects: {e}");
                Vec::new()
            }
        };

        let payload = match pipeline.codec.framebuffer_update(&rects) {
            Ok(payload) => payload,
            Err(e) => {
                error!("framebuffer update: {e}");
                vec![0, 0, 0, 0]
            }
        };

        if !rects.is_empty() {
            self.full_frame_pending = false;
        }

        self.conn.write_all(&payload).await
    }

    /// Reassemble the tag-prefixed event message the sinks expect.
    async fn read_event(&mut self, tag: u8, body_len: usize) -> Result<Vec<u8>> {
        let body = self.conn.read_exact(body_len).await?;
        let mut event = Vec::with_capacity(1 + body_len);
        event.push(tag);
        event.extend_from_slice(&body);
        Ok(event)
    }

    async fn forward_key_event(&self, event: &[u8]) -> Result<()> {
        let Some(keyboard) = &self.server.keyboard else {
            return Err(KvmError::KeyboardNotAvailable);
        };
        keyboard.lock().await.send_key_event(event)?;
        Ok(())
    }

    async fn forward_pointer_event(&self, event: &[u8]) -> Result<()> {
        let Some(mouse) = &self.server.mouse else {
            return Err(KvmError::MouseNotAvailable);
        };
        mouse.lock().await.send_pointer_event(event)?;
        Ok(())
    }

    /// Client clipboard content: handed to the clipboard sink when one is
    /// configured, otherwise logged and dropped.
    async fn forward_cut_text(&self, text: &[u8]) {
        match &self.server.clipboard {
            Some(clipboard) => {
                if let Err(e) = clipboard.lock().await.write(text) {
                    warn!("clipboard write: {e}");
                }
            }
            None => debug!("client cut text ({} bytes) dropped", text.len()),
        }
    }
}
