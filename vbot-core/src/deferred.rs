//! Single-shot settlement of a request.
//!
//! A [`Deferred`] is the settling half, kept by the client next to the
//! request; the [`Response`] is the future handed to the caller.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{self, RpcError};
use crate::value::Value;

pub type RpcResult = Result<Value, RpcError>;

/// Settling half. Resolves or rejects at most once.
#[derive(Debug)]
pub struct Deferred {
    tx: Option<oneshot::Sender<RpcResult>>,
}

impl Deferred {
    pub fn new() -> (Self, Response) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, Response { rx })
    }

    /// Settle with a value. Returns `false` if already settled.
    pub fn resolve(&mut self, value: Value) -> bool {
        self.settle(Ok(value))
    }

    /// Settle with an error. Returns `false` if already settled.
    pub fn reject(&mut self, err: RpcError) -> bool {
        self.settle(Err(err))
    }

    pub fn is_settled(&self) -> bool {
        self.tx.is_none()
    }

    fn settle(&mut self, ret: RpcResult) -> bool {
        match self.tx.take() {
            Some(tx) => {
                // the caller may have dropped the response; that still counts
                let _ = tx.send(ret);
                true
            }
            None => false,
        }
    }
}

/// The caller's view of a request.
///
/// Completes with the response value or the error that rejected it. If the
/// owning client is dropped first, completes with
/// [`client_closed`](crate::error::client_closed).
#[derive(Debug)]
pub struct Response {
    rx: oneshot::Receiver<RpcResult>,
}

impl Future for Response {
    type Output = RpcResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|ret| ret.unwrap_or_else(|_| Err(error::client_closed())))
    }
}
