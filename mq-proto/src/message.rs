use std::collections::HashMap;

use bytes::Bytes;

/// A message as it travels on the wire, before the client decodes it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WireMessage {
    pub topic: String,
    pub queue_id: i32,
    pub queue_offset: i64,
    pub message_id: String,
    pub tag: Option<String>,
    pub keys: Vec<String>,
    pub properties: HashMap<String, String>,
    /// Milliseconds since the Unix epoch at which the broker stored the message.
    pub store_timestamp: i64,
    pub delivery_attempt: i32,
    pub body: Bytes,
    /// CRC32 of `body` as computed by the producer.
    pub body_digest: u32,
}

impl WireMessage {
    /// Build a message whose digest matches its body.
    pub fn new(topic: impl Into<String>, queue_id: i32, queue_offset: i64, body: Bytes) -> Self {
        let body_digest = body_digest(&body);
        Self {
            topic: topic.into(),
            queue_id,
            queue_offset,
            body,
            body_digest,
            ..Default::default()
        }
    }

    #[inline]
    pub fn digest_matches(&self) -> bool {
        body_digest(&self.body) == self.body_digest
    }
}

/// CRC32 digest of a message body.
#[inline]
pub fn body_digest(body: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(body);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_message_digest_matches() {
        let msg = WireMessage::new("orders", 3, 17, Bytes::from_static(b"hello"));
        assert!(msg.digest_matches());
        assert_eq!(msg.queue_id, 3);
        assert_eq!(msg.queue_offset, 17);
    }

    #[test]
    fn test_tampered_body_detected() {
        let mut msg = WireMessage::new("orders", 0, 0, Bytes::from_static(b"hello"));
        msg.body = Bytes::from_static(b"hellO");
        assert!(!msg.digest_matches());
    }

    #[test]
    fn test_empty_body_digest() {
        assert_eq!(body_digest(&[]), 0);
    }
}
