//! Single-assignment results for operations completed on another thread.
//!
//! [`pending`] returns a producer ([`Promise`]) and a consumer
//! ([`PendingResult`]). Completing the promise consumes it, so a result can
//! be set at most once; dropping an unfinished promise rejects the result
//! with [`ClientError::Abandoned`], so it is also set at least once.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::error::{ClientError, Result};

/// Create a linked promise / pending-result pair.
pub fn pending<T>() -> (Promise<T>, PendingResult<T>) {
    let (tx, rx) = oneshot::channel();
    (Promise { tx: Some(tx) }, PendingResult { rx })
}

/// Producer half. Safe to move into a callback running on any thread.
#[derive(Debug)]
pub struct Promise<T> {
    tx: Option<oneshot::Sender<Result<T>>>,
}

impl<T> Promise<T> {
    pub fn resolve(mut self, value: T) {
        self.send(Ok(value));
    }

    pub fn reject(mut self, error: ClientError) {
        self.send(Err(error));
    }

    pub fn complete(mut self, result: Result<T>) {
        self.send(result);
    }

    /// True once the consumer half has been dropped; completing is then a no-op.
    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().is_none_or(oneshot::Sender::is_closed)
    }

    fn send(&mut self, result: Result<T>) {
        if let Some(tx) = self.tx.take() {
            // Receiver may be gone; the caller stopped caring.
            let _ = tx.send(result);
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        self.send(Err(ClientError::Abandoned));
    }
}

/// Consumer half. Await it, block on it, or poll it with [`Self::try_take`].
#[derive(Debug)]
pub struct PendingResult<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> PendingResult<T> {
    /// An already-resolved result.
    pub fn ready(value: T) -> Self {
        let (promise, pending) = pending();
        promise.resolve(value);
        pending
    }

    /// An already-failed result.
    pub fn failed(error: ClientError) -> Self {
        let (promise, pending) = pending();
        promise.reject(error);
        pending
    }

    /// Block the current thread until the result is available.
    ///
    /// Must not be called from within an async runtime; await the result
    /// there instead.
    pub fn wait(self) -> Result<T> {
        self.rx.blocking_recv().unwrap_or(Err(ClientError::Abandoned))
    }

    /// Take the result if it is already available.
    ///
    /// Returns `None` while the operation is in flight. Once this returns
    /// `Some`, the result has been handed out and later calls report
    /// [`ClientError::Abandoned`].
    pub fn try_take(&mut self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(ClientError::Abandoned)),
        }
    }
}

impl<T> Future for PendingResult<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(ClientError::Abandoned)))
    }
}
