//! Conversion from wire messages to the messages handed to callers.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use mq_proto::WireMessage;
use tracing::trace;

/// A decoded message delivered in a [`crate::PullResult`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub queue_id: i32,
    pub queue_offset: i64,
    pub message_id: String,
    pub tag: Option<String>,
    pub keys: Vec<String>,
    pub properties: HashMap<String, String>,
    pub store_time: SystemTime,
    pub delivery_attempt: i32,
    pub body: Bytes,
}

/// Turns a wire message into a [`Message`]. `None` means the message is
/// dropped from the result; it never fails the surrounding pull.
pub trait MessageDecoder: Send + Sync {
    fn decode(&self, wire: &WireMessage) -> Option<Message>;
}

/// Decoder that rejects messages whose body digest does not match.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChecksumDecoder;

impl MessageDecoder for ChecksumDecoder {
    fn decode(&self, wire: &WireMessage) -> Option<Message> {
        if !wire.digest_matches() {
            trace!(
                topic = %wire.topic,
                queue_id = wire.queue_id,
                offset = wire.queue_offset,
                "Dropping message with mismatched body digest"
            );
            return None;
        }
        if wire.store_timestamp < 0 {
            trace!(
                topic = %wire.topic,
                offset = wire.queue_offset,
                store_timestamp = wire.store_timestamp,
                "Dropping message with negative store timestamp"
            );
            return None;
        }

        Some(Message {
            topic: wire.topic.clone(),
            queue_id: wire.queue_id,
            queue_offset: wire.queue_offset,
            message_id: wire.message_id.clone(),
            tag: wire.tag.clone(),
            keys: wire.keys.clone(),
            properties: wire.properties.clone(),
            store_time: UNIX_EPOCH + Duration::from_millis(wire.store_timestamp as u64),
            delivery_attempt: wire.delivery_attempt,
            body: wire.body.clone(),
        })
    }
}
