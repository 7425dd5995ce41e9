//! Topic routes and the per-consumer route cache.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use mq_proto::{PartitionEntry, QueryRouteResponse};

/// One queue of a topic together with the broker that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageQueue {
    pub topic: String,
    pub queue_id: i32,
    pub broker_name: String,
    pub broker_addr: String,
}

impl MessageQueue {
    pub fn new(
        topic: impl Into<String>,
        queue_id: i32,
        broker_name: impl Into<String>,
        broker_addr: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            queue_id,
            broker_name: broker_name.into(),
            broker_addr: broker_addr.into(),
        }
    }

    /// Address RPCs for this queue are dispatched to.
    #[inline]
    pub fn service_address(&self) -> &str {
        &self.broker_addr
    }
}

impl fmt::Display for MessageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}#{}", self.topic, self.broker_name, self.queue_id)
    }
}

/// Immutable snapshot of a topic's partitions. Shared as `Arc<TopicRoute>`
/// and replaced wholesale on refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRoute {
    topic: String,
    partitions: Vec<PartitionEntry>,
}

impl TopicRoute {
    pub fn new(topic: impl Into<String>, partitions: Vec<PartitionEntry>) -> Self {
        Self {
            topic: topic.into(),
            partitions,
        }
    }

    pub fn from_response(topic: impl Into<String>, response: QueryRouteResponse) -> Self {
        Self::new(topic, response.partitions)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partitions(&self) -> &[PartitionEntry] {
        &self.partitions
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn message_queues(&self) -> Vec<MessageQueue> {
        self.partitions
            .iter()
            .map(|p| MessageQueue::new(&self.topic, p.id, &p.broker_name, &p.broker_addr))
            .collect()
    }

    /// Distinct broker addresses serving this topic.
    pub fn broker_addrs(&self) -> Vec<String> {
        let mut addrs: Vec<String> = self
            .partitions
            .iter()
            .map(|p| p.broker_addr.clone())
            .collect();
        addrs.sort();
        addrs.dedup();
        addrs
    }
}

/// Last known route per topic.
///
/// The lock is only held to read, copy or swap an entry. Entries never
/// expire here; refreshing is driven from outside.
#[derive(Debug, Default)]
pub struct RouteCache {
    routes: Mutex<HashMap<String, Arc<TopicRoute>>>,
}

impl RouteCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<TopicRoute>>> {
        // The map holds only Arcs, so a panic mid-insert cannot leave a torn entry.
        self.routes.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, topic: &str) -> Option<Arc<TopicRoute>> {
        self.lock().get(topic).cloned()
    }

    /// Copy out the queues of a cached topic.
    pub fn queues(&self, topic: &str) -> Option<Vec<MessageQueue>> {
        self.lock().get(topic).map(|route| route.message_queues())
    }

    /// Publish a route, returning the one it replaced.
    pub fn insert(&self, route: Arc<TopicRoute>) -> Option<Arc<TopicRoute>> {
        self.lock().insert(route.topic().to_string(), route)
    }

    pub fn remove(&self, topic: &str) -> Option<Arc<TopicRoute>> {
        self.lock().remove(topic)
    }

    pub fn topics(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Distinct broker addresses across every cached route.
    pub fn broker_addrs(&self) -> Vec<String> {
        let routes: Vec<Arc<TopicRoute>> = self.lock().values().cloned().collect();
        let mut addrs: Vec<String> = routes.iter().flat_map(|r| r.broker_addrs()).collect();
        addrs.sort();
        addrs.dedup();
        addrs
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn entry(id: i32, addr: &str) -> PartitionEntry {
        PartitionEntry {
            id,
            broker_name: format!("broker-{}", addr),
            broker_addr: addr.to_string(),
        }
    }

    #[test]
    fn test_route_to_message_queues() {
        let route = TopicRoute::new("orders", vec![entry(0, "a:1"), entry(1, "b:1")]);
        let queues = route.message_queues();

        assert_eq!(queues.len(), 2);
        assert_eq!(queues[0].topic, "orders");
        assert_eq!(queues[1].queue_id, 1);
        assert_eq!(queues[1].service_address(), "b:1");
        assert_eq!(queues[0].to_string(), "orders@broker-a:1#0");
    }

    #[test]
    fn test_cache_miss_then_hit() {
        let cache = RouteCache::new();
        assert!(cache.queues("orders").is_none());
        assert!(cache.is_empty());

        cache.insert(Arc::new(TopicRoute::new("orders", vec![entry(0, "a:1")])));
        let queues = cache.queues("orders").unwrap();
        assert_eq!(queues.len(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.topics(), vec!["orders".to_string()]);
    }

    #[test]
    fn test_insert_replaces_whole_route() {
        let cache = RouteCache::new();
        let old = Arc::new(TopicRoute::new("orders", vec![entry(0, "a:1")]));
        cache.insert(old.clone());

        let replaced = cache
            .insert(Arc::new(TopicRoute::new(
                "orders",
                vec![entry(0, "b:1"), entry(1, "b:1")],
            )))
            .unwrap();

        assert!(Arc::ptr_eq(&replaced, &old));
        assert_eq!(old.partitions().len(), 1);
        assert_eq!(cache.get("orders").unwrap().partitions().len(), 2);
    }

    #[test]
    fn test_broker_addrs_deduplicated() {
        let cache = RouteCache::new();
        cache.insert(Arc::new(TopicRoute::new(
            "orders",
            vec![entry(0, "b:1"), entry(1, "a:1"), entry(2, "b:1")],
        )));
        cache.insert(Arc::new(TopicRoute::new("audit", vec![entry(0, "a:1")])));

        assert_eq!(cache.broker_addrs(), vec!["a:1".to_string(), "b:1".to_string()]);
    }

    #[test]
    fn test_remove() {
        let cache = RouteCache::new();
        cache.insert(Arc::new(TopicRoute::new("orders", vec![entry(0, "a:1")])));
        assert!(cache.remove("orders").is_some());
        assert!(cache.get("orders").is_none());
    }

    #[test]
    fn test_concurrent_readers_see_complete_routes() {
        let cache = Arc::new(RouteCache::new());
        let writer = {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for n in 1..=50 {
                    let partitions = (0..n).map(|i| entry(i, "a:1")).collect();
                    cache.insert(Arc::new(TopicRoute::new("orders", partitions)));
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        if let Some(route) = cache.get("orders") {
                            let ids: Vec<i32> = route.partitions().iter().map(|p| p.id).collect();
                            let expected: Vec<i32> = (0..ids.len() as i32).collect();
                            assert_eq!(ids, expected);
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(cache.get("orders").unwrap().partitions().len(), 50);
    }
}
