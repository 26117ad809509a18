//! Error reporting and response parsing.

use tracing::warn;

use crate::deferred::RpcResult;
use crate::error::{self, RpcError};
use crate::message::StreamKind;
use crate::stream::Stream;

/// Receives error report streams the client could not hand to a caller.
///
/// Reports are `RpcResponseError` streams (timeouts and server errors,
/// tagged with the request's callback id) and `SystemErrorReport` streams
/// (connection level failures).
pub trait ErrorHub: Send + Sync {
    fn on_receive_stream(&self, stream: Stream);
}

/// Logs every error report with `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorHub;

impl ErrorHub for LogErrorHub {
    fn on_receive_stream(&self, mut stream: Stream) {
        let is_report = stream.kind().is_ok_and(|k| k.is_error_report());
        if !is_report {
            return;
        }
        if let Err(err) = parse_response_stream(&mut stream) {
            warn!(callback_id = stream.callback_id(), "{err}");
        }
    }
}

/// Drops every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentHub;

impl ErrorHub for SilentHub {
    fn on_receive_stream(&self, _stream: Stream) {}
}

/// Decode the outcome carried by a response or error report.
///
/// `RpcResponseOk` must hold exactly one value. `RpcResponseError` and
/// `SystemErrorReport` must hold a code below 2^32 and a message. Anything
/// else, including trailing bytes, is a [`stream`](error::stream) error.
pub fn parse_response_stream(stream: &mut Stream) -> RpcResult {
    stream.rewind();
    match stream.kind() {
        Ok(StreamKind::RpcResponseOk) => {
            let value = stream.read()?;
            if !stream.is_read_finish() {
                return Err(error::stream());
            }
            Ok(value)
        }
        Ok(StreamKind::RpcResponseError | StreamKind::SystemErrorReport) => {
            let code = stream.read_uint64()?;
            let message = stream.read_string()?;
            if !stream.is_read_finish() {
                return Err(error::stream());
            }
            let code = u32::try_from(code).map_err(|_| error::stream())?;
            Err(RpcError::new(code, message))
        }
        _ => Err(error::stream()),
    }
}

/// An `RpcResponseError` stream carrying `err` for request `callback_id`.
pub fn error_response_stream(err: &RpcError, callback_id: u64) -> Stream {
    let mut stream = Stream::with_kind(StreamKind::RpcResponseError);
    stream.set_callback_id(callback_id);
    write_error(&mut stream, err);
    stream
}

/// A `SystemErrorReport` stream carrying `err`.
pub fn system_error_stream(err: &RpcError) -> Stream {
    let mut stream = Stream::with_kind(StreamKind::SystemErrorReport);
    write_error(&mut stream, err);
    stream
}

fn write_error(stream: &mut Stream, err: &RpcError) {
    stream.write_uint64(u64::from(err.code()));
    if stream.write_string(err.message()).is_err() {
        // only reachable for messages too long to frame
        let _ = stream.write_string("");
    }
}
