//! Protocol scenarios driven from the client side of an in-memory duplex
//! stream.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

use kvm_server::auth::encrypt_challenge;
use kvm_server::clipboard::ClipboardSink;
use kvm_server::codec::TightJpeg;
use kvm_server::error::KvmError;
use kvm_server::input::InputSink;
use kvm_server::server::{Server, ServerOptions, shared_sink};
use kvm_server::transport::Connection;
use kvm_server::video::DummySource;
use shared::protocol::PROTOCOL_VERSION;

#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Recorder {
    fn take(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    fn push(&self, bytes: &[u8]) {
        self.events.lock().unwrap().push(bytes.to_vec());
    }
}

impl InputSink for Recorder {
    fn open(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn send_key_event(&mut self, event: &[u8]) -> anyhow::Result<()> {
        self.push(event);
        Ok(())
    }

    fn send_pointer_event(&mut self, event: &[u8]) -> anyhow::Result<()> {
        self.push(event);
        Ok(())
    }
}

impl ClipboardSink for Recorder {
    fn open(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn read(&mut self, _buffer: &mut [u8]) -> anyhow::Result<usize> {
        Ok(0)
    }

    fn write(&mut self, text: &[u8]) -> anyhow::Result<()> {
        self.push(text);
        Ok(())
    }
}

struct Harness {
    client: DuplexStream,
    session: JoinHandle<Result<(), KvmError>>,
}

/// 64x64 dummy video, 4x4 grid of 16x16 tiles.
fn start(
    options: ServerOptions,
    keyboard: Option<Recorder>,
    mouse: Option<Recorder>,
    clipboard: Option<Recorder>,
) -> Harness {
    let (client, server_side) = tokio::io::duplex(1 << 20);

    let mut server = Server::new(
        keyboard.map(|sink| shared_sink(Box::new(sink) as Box<dyn InputSink>)),
        Box::new(DummySource::new(64, 64, 30.0)),
        mouse.map(|sink| shared_sink(Box::new(sink) as Box<dyn InputSink>)),
        Box::new(TightJpeg::new(75)),
        options,
    );
    if let Some(sink) = clipboard {
        server = server.with_clipboard(Arc::new(tokio::sync::Mutex::new(
            Box::new(sink) as Box<dyn ClipboardSink>
        )));
    }

    let session = tokio::spawn(async move {
        server.handle_client(Connection::new(server_side)).await
    });

    Harness { client, session }
}

async fn read_n(client: &mut DuplexStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    client.read_exact(&mut buf).await.unwrap();
    buf
}

/// The close-with-reason frame: 4-byte big-endian length + text.
async fn read_reason(client: &mut DuplexStream) -> String {
    let head = read_n(client, 4).await;
    let len = u32::from_be_bytes(head.try_into().unwrap()) as usize;
    String::from_utf8(read_n(client, len).await).unwrap()
}

/// Version exchange through the no-auth security result.
async fn handshake_no_auth(client: &mut DuplexStream) {
    assert_eq!(read_n(client, 12).await, PROTOCOL_VERSION);
    client.write_all(PROTOCOL_VERSION).await.unwrap();
    assert_eq!(read_n(client, 2).await, [1, 1]);
    client.write_all(&[1]).await.unwrap();
    assert_eq!(read_n(client, 4).await, [0, 0, 0, 0]);
}

/// Share flag out, ServerInit back. Returns (width, height, name).
async fn client_init(client: &mut DuplexStream) -> (u16, u16, String) {
    client.write_all(&[1]).await.unwrap();
    let head = read_n(client, 24).await;
    let width = u16::from_be_bytes([head[0], head[1]]);
    let height = u16::from_be_bytes([head[2], head[3]]);
    let name_len = u32::from_be_bytes([head[20], head[21], head[22], head[23]]) as usize;
    let name = String::from_utf8(read_n(client, name_len).await).unwrap();
    (width, height, name)
}

async fn request_update(client: &mut DuplexStream) {
    let mut msg = vec![3u8, 1];
    msg.extend_from_slice(&0u16.to_be_bytes());
    msg.extend_from_slice(&0u16.to_be_bytes());
    msg.extend_from_slice(&64u16.to_be_bytes());
    msg.extend_from_slice(&64u16.to_be_bytes());
    client.write_all(&msg).await.unwrap();
}

async fn read_compact_length(client: &mut DuplexStream) -> usize {
    let b0 = read_n(client, 1).await[0];
    let mut len = (b0 & 0x7f) as usize;
    if b0 & 0x80 != 0 {
        let b1 = read_n(client, 1).await[0];
        len |= ((b1 & 0x7f) as usize) << 7;
        if b1 & 0x80 != 0 {
            let b2 = read_n(client, 1).await[0];
            len |= (b2 as usize) << 14;
        }
    }
    len
}

/// Consume one FramebufferUpdate and return the rect origins.
async fn read_update(client: &mut DuplexStream) -> Vec<(u16, u16)> {
    let head = read_n(client, 4).await;
    assert_eq!(&head[..2], &[0, 0]);
    let count = u16::from_be_bytes([head[2], head[3]]);

    let mut origins = Vec::new();
    for _ in 0..count {
        let rect_head = read_n(client, 12).await;
        let x = u16::from_be_bytes([rect_head[0], rect_head[1]]);
        let y = u16::from_be_bytes([rect_head[2], rect_head[3]]);
        assert_eq!(u16::from_be_bytes([rect_head[4], rect_head[5]]), 16);
        assert_eq!(u16::from_be_bytes([rect_head[6], rect_head[7]]), 16);
        let encoding = i32::from_be_bytes(rect_head[8..12].try_into().unwrap());
        assert_eq!(encoding, 7);

        assert_eq!(read_n(client, 1).await[0], 0x90);
        let jpeg_len = read_compact_length(client).await;
        let jpeg = read_n(client, jpeg_len).await;
        assert_eq!(&jpeg[..2], &[0xff, 0xd8]);

        origins.push((x, y));
    }
    origins
}

#[tokio::test]
async fn handshake_rejects_wrong_version() {
    let mut h = start(ServerOptions::default(), None, None, None);

    assert_eq!(read_n(&mut h.client, 12).await, PROTOCOL_VERSION);
    h.client.write_all(b"RFB 003.003\n").await.unwrap();

    assert_eq!(read_reason(&mut h.client).await, "Unsupported protocol version");
    let err = h.session.await.unwrap().unwrap_err();
    assert!(matches!(err, KvmError::HandshakeFailed));
}

#[tokio::test]
async fn unknown_security_type_closes_before_server_init() {
    let options = ServerOptions {
        password: "secret12".to_string(),
        ..ServerOptions::default()
    };
    let mut h = start(options, None, None, None);

    read_n(&mut h.client, 12).await;
    h.client.write_all(PROTOCOL_VERSION).await.unwrap();
    assert_eq!(read_n(&mut h.client, 2).await, [1, 2]);

    h.client.write_all(&[99]).await.unwrap();

    assert_eq!(read_reason(&mut h.client).await, "Unsupported auth type");

    // nothing else arrives, in particular no ServerInit
    let mut rest = Vec::new();
    h.client.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());

    let err = h.session.await.unwrap().unwrap_err();
    assert!(matches!(err, KvmError::UnsupportedAuthType));
}

#[tokio::test]
async fn vnc_auth_accepts_correct_response() {
    let options = ServerOptions {
        password: "secret12".to_string(),
        ..ServerOptions::default()
    };
    let mut h = start(options, None, None, None);

    read_n(&mut h.client, 12).await;
    h.client.write_all(PROTOCOL_VERSION).await.unwrap();
    assert_eq!(read_n(&mut h.client, 2).await, [1, 2]);
    h.client.write_all(&[2]).await.unwrap();

    let challenge: [u8; 16] = read_n(&mut h.client, 16).await.try_into().unwrap();
    let response = encrypt_challenge("secret12", &challenge);
    h.client.write_all(&response).await.unwrap();

    assert_eq!(read_n(&mut h.client, 4).await, [0, 0, 0, 0]);
    let (width, height, name) = client_init(&mut h.client).await;
    assert_eq!((width, height), (64, 64));
    assert_eq!(name, "OpenKVM");
}

#[tokio::test]
async fn vnc_auth_rejects_wrong_response() {
    let options = ServerOptions {
        password: "secret12".to_string(),
        ..ServerOptions::default()
    };
    let mut h = start(options, None, None, None);

    read_n(&mut h.client, 12).await;
    h.client.write_all(PROTOCOL_VERSION).await.unwrap();
    read_n(&mut h.client, 2).await;
    h.client.write_all(&[2]).await.unwrap();

    let challenge: [u8; 16] = read_n(&mut h.client, 16).await.try_into().unwrap();
    let mut response = encrypt_challenge("secret12", &challenge);
    response[0] ^= 0xff;
    h.client.write_all(&response).await.unwrap();

    assert_eq!(read_n(&mut h.client, 4).await, [0, 0, 0, 1]);
    assert_eq!(read_reason(&mut h.client).await, "Password is incorrect");

    let err = h.session.await.unwrap().unwrap_err();
    assert!(matches!(err, KvmError::AuthFailed));
}

#[tokio::test]
async fn first_update_is_full_then_unchanged_frame_is_empty() {
    let mut h = start(ServerOptions::default(), None, None, None);
    handshake_no_auth(&mut h.client).await;
    client_init(&mut h.client).await;

    request_update(&mut h.client).await;
    let origins = read_update(&mut h.client).await;
    assert_eq!(origins.len(), 16);

    // full 4x4 grid, no gaps, no overlaps
    let expected: Vec<(u16, u16)> = (0..4)
        .flat_map(|col| (0..4).map(move |row| (col * 16, row * 16)))
        .collect();
    let mut sorted = origins.clone();
    sorted.sort_unstable();
    let mut expected_sorted = expected;
    expected_sorted.sort_unstable();
    assert_eq!(sorted, expected_sorted);

    // the frame has not changed: header-only update
    request_update(&mut h.client).await;
    assert_eq!(read_n(&mut h.client, 4).await, [0, 0, 0, 0]);
}

#[tokio::test]
async fn pointer_events_are_rescaled_and_forwarded() {
    let mouse = Recorder::default();
    let options = ServerOptions {
        cursor_x_scale: 0.5,
        cursor_y_scale: 0.5,
        ..ServerOptions::default()
    };
    let mut h = start(options, None, Some(mouse.clone()), None);
    handshake_no_auth(&mut h.client).await;
    client_init(&mut h.client).await;

    // button 1 held at (200, 100)
    h.client.write_all(&[5, 1, 0, 200, 0, 100]).await.unwrap();

    // a served update proves the pointer event was consumed first
    request_update(&mut h.client).await;
    read_update(&mut h.client).await;

    assert_eq!(mouse.take(), vec![vec![5, 1, 0, 100, 0, 50]]);
}

#[tokio::test]
async fn key_events_are_forwarded_verbatim() {
    let keyboard = Recorder::default();
    let mut h = start(ServerOptions::default(), Some(keyboard.clone()), None, None);
    handshake_no_auth(&mut h.client).await;
    client_init(&mut h.client).await;

    // left ctrl down
    let event = [4u8, 1, 0, 0, 0, 0, 0xff, 0xe3];
    h.client.write_all(&event).await.unwrap();

    request_update(&mut h.client).await;
    read_update(&mut h.client).await;

    assert_eq!(keyboard.take(), vec![event.to_vec()]);
}

#[tokio::test]
async fn missing_input_drivers_do_not_kill_the_session() {
    let mut h = start(ServerOptions::default(), None, None, None);
    handshake_no_auth(&mut h.client).await;
    client_init(&mut h.client).await;

    h.client
        .write_all(&[4, 1, 0, 0, 0, 0, 0, 0x61])
        .await
        .unwrap();
    h.client.write_all(&[5, 0, 0, 10, 0, 10]).await.unwrap();

    // the loop is still alive and serving updates
    request_update(&mut h.client).await;
    assert_eq!(read_update(&mut h.client).await.len(), 16);
}

#[tokio::test]
async fn format_and_encoding_requests_are_drained() {
    let mut h = start(ServerOptions::default(), None, None, None);
    handshake_no_auth(&mut h.client).await;
    client_init(&mut h.client).await;

    // SetPixelFormat: 3 padding + 16-byte format
    let mut set_pixel_format = vec![0u8];
    set_pixel_format.extend_from_slice(&[0; 19]);
    h.client.write_all(&set_pixel_format).await.unwrap();

    // SetEncodings with two entries
    let mut set_encodings = vec![2u8, 0];
    set_encodings.extend_from_slice(&2u16.to_be_bytes());
    set_encodings.extend_from_slice(&7i32.to_be_bytes());
    set_encodings.extend_from_slice(&0i32.to_be_bytes());
    h.client.write_all(&set_encodings).await.unwrap();

    // framing is intact: the next message parses normally
    request_update(&mut h.client).await;
    assert_eq!(read_update(&mut h.client).await.len(), 16);
}

#[tokio::test]
async fn cut_text_reaches_the_clipboard_sink() {
    let clipboard = Recorder::default();
    let mut h = start(ServerOptions::default(), None, None, Some(clipboard.clone()));
    handshake_no_auth(&mut h.client).await;
    client_init(&mut h.client).await;

    let text = b"pasted from the viewer";
    let mut msg = vec![6u8, 0, 0, 0];
    msg.extend_from_slice(&(text.len() as u32).to_be_bytes());
    msg.extend_from_slice(text);
    h.client.write_all(&msg).await.unwrap();

    request_update(&mut h.client).await;
    read_update(&mut h.client).await;

    assert_eq!(clipboard.take(), vec![text.to_vec()]);
}

#[tokio::test]
async fn unknown_message_type_is_a_protocol_error() {
    let mut h = start(ServerOptions::default(), None, None, None);
    handshake_no_auth(&mut h.client).await;
    client_init(&mut h.client).await;

    h.client.write_all(&[42]).await.unwrap();

    assert_eq!(read_reason(&mut h.client).await, "Unsupported message type");
    let err = h.session.await.unwrap().unwrap_err();
    assert!(matches!(err, KvmError::UnsupportedMessageType(42)));
}
