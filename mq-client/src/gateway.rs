//! Boundary to the RPC transport.
//!
//! The consumer never touches sockets. It hands each request to an
//! [`RpcGateway`] together with a [`Completion`] and returns immediately; the
//! gateway runs the completion exactly once, on whichever thread observes
//! the outcome. Timeout expiry is reported as a [`TransportError`] like any
//! other failure to obtain a response.

use std::time::Duration;

use mq_proto::{
    HeartbeatRequest, HeartbeatResponse, PullMessageRequest, PullMessageResponse,
    QueryOffsetRequest, QueryOffsetResponse, QueryRouteRequest, QueryRouteResponse,
};
use thiserror::Error;

use crate::signer::Metadata;

/// Why the gateway could not produce a response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("deadline of {0:?} exceeded")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Unreachable(String),

    #[error("call cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// Outcome of a single call: a typed response, or no response at all.
pub type Invocation<R> = std::result::Result<R, TransportError>;

/// Callback run once with the outcome of a call.
pub type Completion<R> = Box<dyn FnOnce(Invocation<R>) + Send + 'static>;

/// Asynchronous unary calls against a named address.
///
/// Implementations must invoke `completion` exactly once per call, including
/// when the call cannot even be started.
pub trait RpcGateway: Send + Sync {
    fn query_route(
        &self,
        addr: &str,
        metadata: Metadata,
        request: QueryRouteRequest,
        timeout: Duration,
        completion: Completion<QueryRouteResponse>,
    );

    fn query_offset(
        &self,
        addr: &str,
        metadata: Metadata,
        request: QueryOffsetRequest,
        timeout: Duration,
        completion: Completion<QueryOffsetResponse>,
    );

    fn pull_message(
        &self,
        addr: &str,
        metadata: Metadata,
        request: PullMessageRequest,
        timeout: Duration,
        completion: Completion<PullMessageResponse>,
    );

    fn heartbeat(
        &self,
        addr: &str,
        metadata: Metadata,
        request: HeartbeatRequest,
        timeout: Duration,
        completion: Completion<HeartbeatResponse>,
    );
}
