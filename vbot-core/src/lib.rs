//! # vbot-core
//!
//! Client-side RPC transport for vbot.
//!
//! This crate contains:
//! - **Value model**: `Value`, the closed set of types that travel on the wire
//! - **Stream**: `Stream`, one framed message with its tagged value codec and checksum
//! - **Codec**: `StreamCodec` for framed TCP I/O via `tokio_util`
//! - **Deferred**: `Deferred` / `Response`, single-shot request settlement
//! - **Network**: `ClientAdapter`, a reconnecting link over WebSocket or TCP
//! - **State**: `ClientState`, the session / channel / timeout state machine
//! - **Client**: `Client`, the public async request and subscription API
//! - **Error**: `RpcError` and `CodecError`, typed, `thiserror`-based errors

pub mod client;
pub mod clock;
pub mod codec;
pub mod config;
pub mod deferred;
pub mod error;
pub mod hub;
pub mod message;
pub mod network;
pub mod state;
pub mod stream;
pub mod value;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use client::{Client, Subscription};
pub use clock::Clock;
pub use codec::{MAX_FRAME_SIZE, StreamCodec};
pub use config::ClientOptions;
pub use deferred::{Deferred, Response, RpcResult};
pub use error::{CodecError, ErrorDomain, ErrorLevel, RpcError};
pub use hub::{ErrorHub, LogErrorHub, SilentHub, parse_response_stream};
pub use message::StreamKind;
pub use network::{
    AdapterOptions, ClientAdapter, ConnStatus, Connection, Dialer, FramePair, NetDialer,
    StreamConn, StreamReceiver,
};
pub use state::{ClientPhase, ClientState, SessionConfig};
pub use stream::{BODY_POS, MAX_DEPTH, Stream};
pub use value::{Value, ValueMap};
