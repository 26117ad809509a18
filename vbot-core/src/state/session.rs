//! Session negotiation messages.

use crate::error::{self, RpcError};
use crate::message::StreamKind;
use crate::stream::Stream;

/// Upper bound on the channel pool a server may ask for.
pub const MAX_CHANNELS: u64 = 1 << 16;

/// Parameters the server hands out with a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub channels: usize,
    /// Largest request frame the server accepts, in bytes.
    pub trans_limit: u64,
    pub heartbeat_ms: u64,
    pub heartbeat_timeout_ms: u64,
}

/// Build the `ConnectRequest` for `session` (empty for a fresh session).
pub fn connect_request(session: &str) -> Result<Stream, RpcError> {
    let mut stream = Stream::with_kind(StreamKind::ConnectRequest);
    stream.set_callback_id(0);
    stream.write_string(session)?;
    Ok(stream)
}

/// A decoded `ConnectResponse`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectResponse {
    pub session: String,
    pub config: SessionConfig,
}

impl ConnectResponse {
    /// Decode and validate. Every number must be positive and nothing may
    /// follow the last field.
    pub fn parse(stream: &mut Stream) -> Result<Self, RpcError> {
        if stream.callback_id() != 0 {
            return Err(error::stream().add_debug("connect response with a callback id"));
        }
        if stream.kind().ok() != Some(StreamKind::ConnectResponse) {
            return Err(error::stream().add_debug(format!(
                "expected connect response, got kind {}",
                stream.raw_kind()
            )));
        }
        stream.rewind();
        let session = stream.read_string()?;
        let channels = positive(stream)?;
        let trans_limit = positive(stream)?;
        let heartbeat_ms = positive(stream)?;
        let heartbeat_timeout_ms = positive(stream)?;
        if !stream.is_read_finish() {
            return Err(error::stream().add_debug("trailing bytes after connect response"));
        }
        if channels > MAX_CHANNELS {
            return Err(error::client_config().add_debug(format!("{channels} channels requested")));
        }
        Ok(Self {
            session,
            config: SessionConfig {
                channels: channels as usize,
                trans_limit,
                heartbeat_ms,
                heartbeat_timeout_ms,
            },
        })
    }
}

fn positive(stream: &mut Stream) -> Result<u64, RpcError> {
    let v = stream.read_int64()?;
    u64::try_from(v)
        .ok()
        .filter(|&v| v > 0)
        .ok_or_else(|| error::stream().add_debug(format!("non-positive connect parameter {v}")))
}
