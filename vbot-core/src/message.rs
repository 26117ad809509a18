//! Stream kinds.
//!
//! Uses a proper enum with `TryFrom`, no panics on unknown values.

use std::fmt;

use crate::error::CodecError;

/// The message kind stored in the stream header.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Client → server: `{session_token}`.
    ConnectRequest = 1,
    /// Server → client: `{session_token, channels, transfer_limit, heartbeat, heartbeat_timeout}`.
    ConnectResponse = 2,
    Ping = 3,
    Pong = 4,
    /// Client → server: `{target, source_tag, args...}`.
    RpcRequest = 5,
    /// Server → client: `{result}`.
    RpcResponseOk = 6,
    /// Server → client: `{error_code, message}`.
    RpcResponseError = 7,
    /// Server → client: `{topic_key, payload}`.
    RpcBoardCast = 8,
    /// Protocol error with no request to attach it to: `{error_code, message}`.
    SystemErrorReport = 9,
}

impl TryFrom<u8> for StreamKind {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(StreamKind::ConnectRequest),
            2 => Ok(StreamKind::ConnectResponse),
            3 => Ok(StreamKind::Ping),
            4 => Ok(StreamKind::Pong),
            5 => Ok(StreamKind::RpcRequest),
            6 => Ok(StreamKind::RpcResponseOk),
            7 => Ok(StreamKind::RpcResponseError),
            8 => Ok(StreamKind::RpcBoardCast),
            9 => Ok(StreamKind::SystemErrorReport),
            // offset of the kind byte in the header
            _ => Err(CodecError::Malformed(2)),
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl StreamKind {
    /// Returns `true` for kinds whose body is `{error_code, message}`.
    pub fn is_error_report(&self) -> bool {
        matches!(self, StreamKind::RpcResponseError | StreamKind::SystemErrorReport)
    }
}
