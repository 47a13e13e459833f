//! Error taxonomy shared by the codec, the dispatcher, and the embedded facade.
//!
//! `ErrorKind` enumerates malformed wire input, unknown commands,
//! registration collisions, type mismatches, memory ceiling rejections,
//! clustering/leadership errors, concurrent-rewrite rejection, auth
//! failures, and clean disconnect.

use std::fmt;

/// Classification of an [`Error`]. Mirrors the error kinds a client or a
/// background task needs to branch on, without stringly matching messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed wire framing or an empty command.
    ProtocolError,
    /// Unknown command or subcommand.
    NotSupported,
    /// Dynamic command registration collision.
    AlreadyExists,
    /// Handler operated on a key whose value is not of the expected type.
    WrongType,
    /// Write refused under `noeviction` at the memory ceiling.
    OutOfMemory,
    /// Clustered, write command, not leader, forwarding disabled.
    NotLeader,
    /// Snapshot or AOF rewrite already in progress.
    Busy,
    /// Authorizer rejection; message passes through verbatim.
    AuthFailed,
    /// Clean disconnect (QUIT or closed socket). Never surfaced to clients.
    Eof,
}

impl ErrorKind {
    /// Returns `true` for the one kind that must never become a `-Error` frame.
    #[must_use]
    pub fn is_eof(self) -> bool {
        matches!(self, ErrorKind::Eof)
    }
}

/// A core error: a [`ErrorKind`] plus the message to surface.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolError, message)
    }

    #[must_use]
    pub fn eof() -> Self {
        Self::new(ErrorKind::Eof, "connection closed")
    }

    #[must_use]
    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotSupported, message)
    }

    #[must_use]
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    #[must_use]
    pub fn wrong_type() -> Self {
        Self::new(
            ErrorKind::WrongType,
            "WRONGTYPE Operation against a key holding the wrong kind of value",
        )
    }

    #[must_use]
    pub fn out_of_memory() -> Self {
        Self::new(
            ErrorKind::OutOfMemory,
            "OOM command not allowed when used memory > 'max_memory'",
        )
    }

    #[must_use]
    pub fn not_leader() -> Self {
        Self::new(ErrorKind::NotLeader, "NOTLEADER this node is not the cluster leader")
    }

    #[must_use]
    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Busy, message)
    }

    #[must_use]
    pub fn auth_failed(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthFailed, format!("NOAUTH {}", reason.into()))
    }

    /// `true` if this error represents a clean disconnect, not a client-facing error.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.kind.is_eof()
    }

    /// Reconstructs an [`Error`] from a `-Error ...` frame's message, the
    /// inverse of [`Error::to_resp_frame`] for the constructors that tag
    /// their message with a fixed prefix. Falls back to `NotSupported` for
    /// any message that doesn't match a known prefix, matching the
    /// dispatcher's own `not_supported` framing for unknown commands.
    #[must_use]
    pub fn from_resp(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = if message.starts_with("WRONGTYPE ") {
            ErrorKind::WrongType
        } else if message.starts_with("OOM ") {
            ErrorKind::OutOfMemory
        } else if message.starts_with("NOTLEADER") {
            ErrorKind::NotLeader
        } else if message.starts_with("BUSY ") {
            ErrorKind::Busy
        } else if message.starts_with("NOAUTH ") {
            ErrorKind::AuthFailed
        } else {
            ErrorKind::NotSupported
        };
        Self::new(kind, message)
    }

    /// Renders the exact `-Error <msg>\r\n` frame specified for error responses.
    ///
    /// Must never be called on an `Eof` error -- callers are expected to
    /// branch on `is_eof()` first (an `Eof` "frame" has no wire representation).
    #[must_use]
    pub fn to_resp_frame(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.message.len() + 3);
        out.push(b'-');
        out.extend_from_slice(self.message.as_bytes());
        out.extend_from_slice(b"\r\n");
        out
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::protocol(format!("io error: {err}"))
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ProtocolError => "ProtocolError",
            ErrorKind::NotSupported => "NotSupported",
            ErrorKind::AlreadyExists => "AlreadyExists",
            ErrorKind::WrongType => "WrongType",
            ErrorKind::OutOfMemory => "OutOfMemory",
            ErrorKind::NotLeader => "NotLeader",
            ErrorKind::Busy => "Busy",
            ErrorKind::AuthFailed => "AuthFailed",
            ErrorKind::Eof => "Eof",
        };
        f.write_str(s)
    }
}
