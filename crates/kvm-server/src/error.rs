use thiserror::Error;

/// Session-level error taxonomy.
///
/// Handshake, auth and transport errors are session-fatal; the driver
/// availability variants are reported per message and the loop continues.
#[derive(Debug, Error)]
pub enum KvmError {
    #[error("handshake failed")]
    HandshakeFailed,

    #[error("auth failed")]
    AuthFailed,

    #[error("unsupported auth type")]
    UnsupportedAuthType,

    #[error("keyboard driver is not available")]
    KeyboardNotAvailable,

    #[error("mouse driver is not available")]
    MouseNotAvailable,

    #[error("internal server error")]
    InternalServerError,

    /// The 30 second read deadline passed without enough bytes arriving.
    #[error("read timed out")]
    NoProgress,

    /// Unknown tags carry bodies of unknowable length, so the session
    /// cannot stay byte-aligned past one.
    #[error("unsupported client message type {0:#04x}")]
    UnsupportedMessageType(u8),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Driver(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, KvmError>;
