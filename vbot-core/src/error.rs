//! Error types for the vbot RPC transport.
//!
//! Protocol-level failures are [`RpcError`] values: a packed
//! `(domain, level, index)` code plus a message, mirroring the codes the
//! server puts on the wire. Codec failures are [`CodecError`]s and are
//! mapped to [`RpcError`]s at the client boundary.

use std::fmt;

use thiserror::Error;

// ── Domain / Level ───────────────────────────────────────────────

/// The subsystem an error originates from (bits 20..24 of the code).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorDomain {
    Config = 1,
    Net = 2,
    Action = 3,
    Develop = 4,
    Kernel = 5,
    Security = 6,
}

impl TryFrom<u32> for ErrorDomain {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, u32> {
        match value {
            1 => Ok(Self::Config),
            2 => Ok(Self::Net),
            3 => Ok(Self::Action),
            4 => Ok(Self::Develop),
            5 => Ok(Self::Kernel),
            6 => Ok(Self::Security),
            other => Err(other),
        }
    }
}

impl fmt::Display for ErrorDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How severe an error is (bits 16..20 of the code).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorLevel {
    Warn = 1,
    Error = 2,
    Fatal = 3,
}

impl TryFrom<u32> for ErrorLevel {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, u32> {
        match value {
            1 => Ok(Self::Warn),
            2 => Ok(Self::Error),
            3 => Ok(Self::Fatal),
            other => Err(other),
        }
    }
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── RpcError ─────────────────────────────────────────────────────

/// A protocol error: packed code plus human readable message.
///
/// Renders as `"{Domain}{Level}[{index}]: {message}"`. Codes received from
/// the server may carry a domain or level this client does not know; those
/// parts render as empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}{}[{}]: {}", domain_label(.code), level_label(.code), index_of(.code), .message)]
pub struct RpcError {
    code: u32,
    message: String,
}

fn domain_label(code: &u32) -> String {
    ErrorDomain::try_from((code >> 20) & 0x0F)
        .map(|d| d.to_string())
        .unwrap_or_default()
}

fn level_label(code: &u32) -> String {
    ErrorLevel::try_from((code >> 16) & 0x0F)
        .map(|l| l.to_string())
        .unwrap_or_default()
}

fn index_of(code: &u32) -> u32 {
    code & 0xFFFF
}

impl RpcError {
    /// Build an error from a raw code, as received on the wire.
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Build an error from its parts.
    pub fn define(
        domain: ErrorDomain,
        index: u16,
        level: ErrorLevel,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            ((domain as u32) << 20) | ((level as u32) << 16) | index as u32,
            message,
        )
    }

    /// The 24-bit code (domain, level and index).
    pub fn code(&self) -> u32 {
        self.code & 0x00FF_FFFF
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn domain(&self) -> Option<ErrorDomain> {
        ErrorDomain::try_from((self.code >> 20) & 0x0F).ok()
    }

    pub fn level(&self) -> Option<ErrorLevel> {
        ErrorLevel::try_from((self.code >> 16) & 0x0F).ok()
    }

    pub fn index(&self) -> u16 {
        (self.code & 0xFFFF) as u16
    }

    /// Returns `true` when both errors carry the same code, ignoring the
    /// message and any debug text.
    pub fn is(&self, other: &RpcError) -> bool {
        self.code() == other.code()
    }

    /// Append debug text on a new line. Empty text leaves the error as is.
    pub fn add_debug(&self, debug: impl AsRef<str>) -> Self {
        let debug = debug.as_ref();
        if debug.is_empty() {
            return self.clone();
        }
        let message = if self.message.is_empty() {
            debug.to_string()
        } else {
            format!("{}\n{}", self.message, debug)
        };
        Self::new(self.code, message)
    }
}

// ── Predefined errors ────────────────────────────────────────────

const GENERAL_SEG: u16 = 0;
const CLIENT_SEG: u16 = 4 << 8;
const ADAPTER_SEG: u16 = 102 << 8;

/// A frame failed to parse or failed its integrity check.
pub fn stream() -> RpcError {
    RpcError::define(ErrorDomain::Security, GENERAL_SEG | 1, ErrorLevel::Warn, "stream error")
}

/// A request argument could not be encoded.
pub fn unsupported_value() -> RpcError {
    RpcError::define(ErrorDomain::Develop, GENERAL_SEG | 2, ErrorLevel::Error, "")
}

/// A request did not complete within its timeout.
pub fn client_timeout() -> RpcError {
    RpcError::define(ErrorDomain::Net, CLIENT_SEG | 1, ErrorLevel::Warn, "")
}

pub fn client_config() -> RpcError {
    RpcError::define(ErrorDomain::Config, CLIENT_SEG | 2, ErrorLevel::Warn, "client config error")
}

/// The client was dropped before the request settled.
pub fn client_closed() -> RpcError {
    RpcError::define(ErrorDomain::Net, CLIENT_SEG | 3, ErrorLevel::Warn, "client closed")
}

/// The server started a fresh session while the request was in flight.
pub fn session_reset() -> RpcError {
    RpcError::define(ErrorDomain::Net, CLIENT_SEG | 4, ErrorLevel::Warn, "session reset")
}

pub fn unsupported_protocol() -> RpcError {
    RpcError::define(ErrorDomain::Net, ADAPTER_SEG | 1, ErrorLevel::Warn, "")
}

pub fn write_stream() -> RpcError {
    RpcError::define(ErrorDomain::Net, ADAPTER_SEG | 2, ErrorLevel::Warn, "")
}

pub fn transport() -> RpcError {
    RpcError::define(ErrorDomain::Net, ADAPTER_SEG | 3, ErrorLevel::Warn, "")
}

pub fn dial() -> RpcError {
    RpcError::define(ErrorDomain::Net, ADAPTER_SEG | 4, ErrorLevel::Warn, "")
}

impl From<std::io::Error> for RpcError {
    fn from(e: std::io::Error) -> Self {
        transport().add_debug(e.to_string())
    }
}

// ── CodecError ───────────────────────────────────────────────────

/// Failure while writing a value to, or reading a value from, a stream.
///
/// Write errors carry the path of the offending element relative to the
/// value being written, e.g. `[2]["name"]`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The value cannot be represented on the wire (NaN, oversized length).
    #[error("value{0} is not supported")]
    Unsupported(String),

    /// The value nests deeper than the codec allows.
    #[error("value{0} overflows")]
    Overflow(String),

    /// The bytes at the given offset do not form a valid value.
    #[error("malformed value at offset {0}")]
    Malformed(usize),
}

impl CodecError {
    /// Prefix the error path with one more path segment.
    pub(crate) fn nest(self, segment: &str) -> Self {
        match self {
            Self::Unsupported(path) => Self::Unsupported(format!("{segment}{path}")),
            Self::Overflow(path) => Self::Overflow(format!("{segment}{path}")),
            other => other,
        }
    }
}

impl From<CodecError> for RpcError {
    fn from(_: CodecError) -> Self {
        stream()
    }
}
