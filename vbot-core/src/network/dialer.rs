//! Turning a connect string into a framed byte link.

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Sink, SinkExt, StreamExt, future};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::codec::Framed;
use tracing::debug;

use crate::codec::StreamCodec;
use crate::error::{self, RpcError};

pub type FrameSink = Pin<Box<dyn Sink<Vec<u8>, Error = RpcError> + Send>>;
pub type FrameStream = BoxStream<'static, Result<Vec<u8>, RpcError>>;

/// Both halves of a dialed link. Each item is one whole stream frame.
pub struct FramePair {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl FramePair {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }

    /// Frame a byte pipe with [`StreamCodec`].
    pub fn framed<T>(io: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (sink, stream) = Framed::new(io, StreamCodec).split();
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

/// Opens links for an adapter.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, connect_string: &str) -> Result<FramePair, RpcError>;
}

/// The scheme part of a connect string, `""` if there is none.
pub fn protocol_of(connect_string: &str) -> &str {
    connect_string
        .split_once("://")
        .map(|(scheme, _)| scheme)
        .unwrap_or("")
}

/// Dials `ws://`, `wss://` and `tcp://host:port`.
///
/// WebSocket links carry one stream per binary message. TCP links are cut
/// into frames by [`StreamCodec`].
#[derive(Debug, Default, Clone, Copy)]
pub struct NetDialer;

impl NetDialer {
    async fn dial_ws(url: &str) -> Result<FramePair, RpcError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| error::dial().add_debug(format!("{url}: {e}")))?;
        let (sink, stream) = ws.split();

        let sink = sink
            .with(|bytes: Vec<u8>| future::ready(Ok::<_, tungstenite::Error>(Message::binary(bytes))))
            .sink_map_err(|e| error::write_stream().add_debug(e.to_string()));

        let stream = stream.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Binary(bytes)) => Some(Ok(bytes.to_vec())),
                Ok(Message::Text(_)) => {
                    Some(Err(error::stream().add_debug("unexpected text message")))
                }
                // control frames are answered by tungstenite; close ends the stream
                Ok(_) => None,
                Err(e) => Some(Err(error::transport().add_debug(e.to_string()))),
            })
        });

        Ok(FramePair::new(Box::pin(sink), Box::pin(stream)))
    }

    async fn dial_tcp(addr: &str) -> Result<FramePair, RpcError> {
        let socket = TcpStream::connect(addr)
            .await
            .map_err(|e| error::dial().add_debug(format!("{addr}: {e}")))?;
        socket
            .set_nodelay(true)
            .map_err(|e| error::dial().add_debug(e.to_string()))?;
        Ok(FramePair::framed(socket))
    }
}

#[async_trait]
impl Dialer for NetDialer {
    async fn dial(&self, connect_string: &str) -> Result<FramePair, RpcError> {
        debug!(url = connect_string, "dialing");
        match protocol_of(connect_string) {
            "ws" | "wss" => Self::dial_ws(connect_string).await,
            "tcp" => Self::dial_tcp(&connect_string["tcp://".len()..]).await,
            other => Err(error::unsupported_protocol()
                .add_debug(format!("unsupported protocol {other}"))),
        }
    }
}
