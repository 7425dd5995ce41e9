//! Request and response messages for the pull consumer's RPCs.

use crate::message::WireMessage;
use crate::status::ResponseCommon;
use crate::time::{ProtoDuration, Timestamp};

/// A named resource (topic or group) qualified by its namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Resource {
    pub name: String,
    pub namespace: String,
}

impl Resource {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

/// Reference to a single queue of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Partition {
    pub topic: Resource,
    pub id: i32,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueryOffsetPolicy {
    #[default]
    Beginning = 0,
    End = 1,
    TimePoint = 2,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryOffsetRequest {
    pub partition: Partition,
    pub policy: QueryOffsetPolicy,
    /// Only populated for [`QueryOffsetPolicy::TimePoint`].
    pub time_point: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryOffsetResponse {
    pub common: ResponseCommon,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PullMessageRequest {
    pub group: Resource,
    pub partition: Partition,
    pub offset: i64,
    pub batch_size: i32,
    /// How long the broker may hold the request open waiting for data.
    pub await_time: ProtoDuration,
    pub client_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PullMessageResponse {
    pub common: ResponseCommon,
    pub min_offset: i64,
    pub next_offset: i64,
    pub max_offset: i64,
    pub messages: Vec<WireMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryRouteRequest {
    pub topic: Resource,
}

/// One partition of a route together with the broker currently owning it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PartitionEntry {
    pub id: i32,
    pub broker_name: String,
    pub broker_addr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryRouteResponse {
    pub common: ResponseCommon,
    pub partitions: Vec<PartitionEntry>,
}

/// Group membership declared by one client role in a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct HeartbeatEntry {
    pub group: Resource,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeartbeatRequest {
    pub client_id: String,
    pub heartbeats: Vec<HeartbeatEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeartbeatResponse {
    pub common: ResponseCommon,
}
