/// Protocol version string, exchanged verbatim in both directions.
pub const PROTOCOL_VERSION: &[u8; 12] = b"RFB 003.008\n";

/// The server always advertises exactly one security type.
pub const NUMBER_OF_SECURITY_TYPES: u8 = 1;

/// SecurityResult as a 4-byte big-endian value, not a single byte.
pub const SECURITY_RESULT_OK: [u8; 4] = [0, 0, 0, 0];
pub const SECURITY_RESULT_FAIL: [u8; 4] = [0, 0, 0, 1];

/// Challenge length for VNC authentication, two DES blocks.
pub const CHALLENGE_SIZE: usize = 16;

/// Security types the server can service (RFC 6143 §7.1.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SecurityType {
    None = 1,
    VncAuth = 2,
}

impl SecurityType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::None),
            2 => Some(Self::VncAuth),
            _ => None,
        }
    }
}

/// Client to server message tags (RFC 6143 §7.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientMessage {
    SetPixelFormat = 0,
    SetEncodings = 2,
    FramebufferUpdateRequest = 3,
    KeyEvent = 4,
    PointerEvent = 5,
    ClientCutText = 6,
}

impl ClientMessage {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::SetPixelFormat),
            2 => Some(Self::SetEncodings),
            3 => Some(Self::FramebufferUpdateRequest),
            4 => Some(Self::KeyEvent),
            5 => Some(Self::PointerEvent),
            6 => Some(Self::ClientCutText),
            _ => None,
        }
    }
}

// Fixed body sizes, counted after the one-byte message tag.

/// 3 bytes padding + 16-byte pixel format.
pub const SET_PIXEL_FORMAT_BODY: usize = 19;
/// Incremental flag + x + y + width + height.
pub const FRAMEBUFFER_UPDATE_REQUEST_BODY: usize = 9;
/// Down-flag + 2 bytes padding + 4-byte keysym.
pub const KEY_EVENT_BODY: usize = 7;
/// Button mask + x + y.
pub const POINTER_EVENT_BODY: usize = 5;
