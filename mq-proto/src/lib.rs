#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![allow(clippy::module_name_repetitions)]

//! Wire-level types exchanged between the pull consumer and a broker.
//!
//! These mirror the broker's RPC messages field for field. Encoding them onto
//! bytes is the transport's job; this crate only defines the shapes and the
//! small amount of logic that belongs to them (status classification,
//! second/nanosecond splitting, body digests).

mod error;
mod message;
mod request;
mod status;
mod time;

pub use error::{ProtoError, Result};
pub use message::{WireMessage, body_digest};
pub use request::{
    HeartbeatEntry, HeartbeatRequest, HeartbeatResponse, Partition, PartitionEntry,
    PullMessageRequest, PullMessageResponse, QueryOffsetPolicy, QueryOffsetRequest,
    QueryOffsetResponse, QueryRouteRequest, QueryRouteResponse, Resource,
};
pub use status::{Code, ResponseCommon, Status};
pub use time::{ProtoDuration, Timestamp};

/// Nanoseconds per second, used when splitting times into `{seconds, nanos}`.
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;
