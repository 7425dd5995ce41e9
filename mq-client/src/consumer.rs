//! The pull consumer.
//!
//! Every entry point returns without waiting for the broker. Results come
//! back either as a [`PendingResult`] or through a [`PullCallback`], and are
//! completed on the gateway's completion thread. Completions only capture
//! what they need (target address, decoder, the caller's promise or
//! callback), never the consumer itself.

use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use mq_proto::{
    Code, HeartbeatEntry, HeartbeatRequest, Partition, ProtoDuration, PullMessageRequest,
    PullMessageResponse, QueryOffsetPolicy, QueryOffsetRequest, QueryRouteRequest, Resource,
    Timestamp,
};
use tracing::{debug, info, trace, warn};

use crate::config::{ConsumerConfig, generate_client_id};
use crate::decoder::{ChecksumDecoder, Message, MessageDecoder};
use crate::error::{ClientError, Result};
use crate::gateway::{Invocation, RpcGateway};
use crate::lifecycle::ClientState;
use crate::manager::{ClientBase, ClientManager, ClientObserver};
use crate::pending::{PendingResult, Promise, pending};
use crate::route::{MessageQueue, RouteCache, TopicRoute};
use crate::signer::{HeaderSigner, Metadata, Signer, SigningContext};

/// Which offset an [`OffsetQuery`] asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetPolicy {
    Beginning,
    End,
    TimePoint,
}

impl From<OffsetPolicy> for QueryOffsetPolicy {
    fn from(policy: OffsetPolicy) -> Self {
        match policy {
            OffsetPolicy::Beginning => Self::Beginning,
            OffsetPolicy::End => Self::End,
            OffsetPolicy::TimePoint => Self::TimePoint,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetQuery {
    pub queue: MessageQueue,
    pub policy: OffsetPolicy,
    /// Required for [`OffsetPolicy::TimePoint`], ignored otherwise.
    pub time_point: Option<SystemTime>,
}

impl OffsetQuery {
    pub fn beginning(queue: MessageQueue) -> Self {
        Self {
            queue,
            policy: OffsetPolicy::Beginning,
            time_point: None,
        }
    }

    pub fn end(queue: MessageQueue) -> Self {
        Self {
            queue,
            policy: OffsetPolicy::End,
            time_point: None,
        }
    }

    pub fn time_point(queue: MessageQueue, time_point: SystemTime) -> Self {
        Self {
            queue,
            policy: OffsetPolicy::TimePoint,
            time_point: Some(time_point),
        }
    }
}

pub const DEFAULT_PULL_BATCH_SIZE: i32 = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullQuery {
    pub queue: MessageQueue,
    pub offset: i64,
    /// How long the broker may hold the request waiting for messages
    pub await_time: Duration,
    pub batch_size: i32,
}

impl PullQuery {
    pub fn new(queue: MessageQueue, offset: i64, await_time: Duration) -> Self {
        Self {
            queue,
            offset,
            await_time,
            batch_size: DEFAULT_PULL_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: i32) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Messages returned by one successful pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullResult {
    pub min_offset: i64,
    pub max_offset: i64,
    /// Offset to pull from next
    pub next_offset: i64,
    pub messages: Vec<Message>,
}

impl PullResult {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

/// Receives the outcome of a [`PullConsumer::pull`].
///
/// Both methods consume the callback, so at most one of them can ever run.
pub trait PullCallback: Send {
    fn on_success(self: Box<Self>, result: PullResult);

    fn on_exception(self: Box<Self>, error: ClientError);
}

impl<F> PullCallback for F
where
    F: FnOnce(Result<PullResult>) + Send,
{
    fn on_success(self: Box<Self>, result: PullResult) {
        (*self)(Ok(result))
    }

    fn on_exception(self: Box<Self>, error: ClientError) {
        (*self)(Err(error))
    }
}

/// Classify a pull outcome: transport failure, business failure, or a
/// result built from every message the decoder accepts.
pub(crate) fn classify_pull_outcome(
    target: &str,
    decoder: &dyn MessageDecoder,
    outcome: Invocation<PullMessageResponse>,
) -> Result<PullResult> {
    let response = outcome.map_err(|e| ClientError::ServerUnreachable {
        addr: target.to_string(),
        reason: e.to_string(),
    })?;

    let status = &response.common.status;
    if !status.is_ok() {
        return Err(ClientError::from_status(status));
    }

    let received = response.messages.len();
    let messages: Vec<Message> = response
        .messages
        .iter()
        .filter_map(|wire| decoder.decode(wire))
        .collect();
    if messages.len() < received {
        trace!(
            addr = target,
            received,
            dropped = received - messages.len(),
            "Dropped undecodable messages"
        );
    }

    Ok(PullResult {
        min_offset: response.min_offset,
        max_offset: response.max_offset,
        next_offset: response.next_offset,
        messages,
    })
}

/// Builder for [`PullConsumer`]. The signer defaults to [`HeaderSigner`]
/// and the decoder to [`ChecksumDecoder`].
pub struct PullConsumerBuilder {
    config: ConsumerConfig,
    gateway: Arc<dyn RpcGateway>,
    manager: Arc<dyn ClientManager>,
    signer: Arc<dyn Signer>,
    decoder: Arc<dyn MessageDecoder>,
}

impl PullConsumerBuilder {
    pub fn signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = signer;
        self
    }

    pub fn decoder(mut self, decoder: Arc<dyn MessageDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn build(self) -> Result<Arc<PullConsumer>> {
        self.config.validate()?;

        let client_id = self
            .config
            .client_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(generate_client_id);

        Ok(Arc::new(PullConsumer {
            base: ClientBase::new(client_id.clone(), self.manager),
            client_id,
            config: self.config,
            route_cache: Arc::new(RouteCache::new()),
            gateway: self.gateway,
            signer: self.signer,
            decoder: self.decoder,
        }))
    }
}

/// Consumer that pulls from explicitly chosen queues.
pub struct PullConsumer {
    config: ConsumerConfig,
    client_id: String,
    base: ClientBase,
    route_cache: Arc<RouteCache>,
    gateway: Arc<dyn RpcGateway>,
    signer: Arc<dyn Signer>,
    decoder: Arc<dyn MessageDecoder>,
}

impl PullConsumer {
    pub fn builder(
        config: ConsumerConfig,
        gateway: Arc<dyn RpcGateway>,
        manager: Arc<dyn ClientManager>,
    ) -> PullConsumerBuilder {
        PullConsumerBuilder {
            config,
            gateway,
            manager,
            signer: Arc::new(HeaderSigner),
            decoder: Arc::new(ChecksumDecoder),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn group(&self) -> &str {
        &self.config.group
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn state(&self) -> ClientState {
        self.base.state()
    }

    pub fn route_cache(&self) -> &RouteCache {
        &self.route_cache
    }

    /// Run the base start sequence and, once started, register with the
    /// client manager so this consumer contributes to heartbeats.
    pub fn start(self: &Arc<Self>) {
        if !self.base.start() {
            return;
        }

        let state = self.base.state();
        if state != ClientState::Started {
            warn!(
                target: "mq_client::consumer",
                client_id = %self.client_id,
                state = %state,
                "Unexpected state after start"
            );
            return;
        }

        let observer: Weak<PullConsumer> = Arc::downgrade(self);
        self.base.manager().add_observer(observer);
        // A shutdown between the state check and registration has already
        // run its deregistration.
        if !self.base.lifecycle().is_started() {
            self.base.manager().remove_observer(&self.client_id);
            return;
        }
        info!(
            target: "mq_client::consumer",
            client_id = %self.client_id,
            group = %self.config.group,
            "Pull consumer started"
        );
    }

    /// Run the base shutdown sequence, then move to `Stopped`. Returns true
    /// only for the call that performed the final transition.
    pub fn shutdown(&self) -> bool {
        self.base.shutdown();

        if self
            .base
            .lifecycle()
            .compare_and_set(ClientState::Stopping, ClientState::Stopped)
        {
            info!(
                target: "mq_client::consumer",
                client_id = %self.client_id,
                "Pull consumer stopped"
            );
            return true;
        }
        false
    }

    fn sign(&self) -> Result<Metadata> {
        self.signer.sign(&SigningContext {
            client_id: &self.client_id,
            namespace: &self.config.namespace,
            credentials: self.config.credentials.as_ref(),
        })
    }

    fn partition(&self, queue: &MessageQueue) -> Partition {
        Partition {
            topic: Resource::new(&queue.topic, &self.config.namespace),
            id: queue.queue_id,
        }
    }

    /// Queues of `topic`. Served from the route cache when possible;
    /// otherwise one route query is issued and its result cached.
    pub fn queues_for(&self, topic: &str) -> PendingResult<Vec<MessageQueue>> {
        if let Some(queues) = self.route_cache.queues(topic) {
            return PendingResult::ready(queues);
        }

        let (promise, pending) = pending();
        let metadata = match self.sign() {
            Ok(metadata) => metadata,
            Err(e) => {
                promise.reject(e);
                return pending;
            },
        };

        let request = QueryRouteRequest {
            topic: Resource::new(topic, &self.config.namespace),
        };
        let topic = topic.to_string();
        let cache = self.route_cache.clone();
        debug!(
            target: "mq_client::route",
            topic = %topic,
            name_server = %self.config.name_server_addr,
            "Route cache miss, querying route"
        );

        self.gateway.query_route(
            &self.config.name_server_addr,
            metadata,
            request,
            self.config.io_timeout(),
            Box::new(move |outcome| {
                let response = match outcome {
                    Ok(response) => response,
                    Err(e) => {
                        promise.reject(ClientError::RouteUnavailable {
                            topic,
                            reason: e.to_string(),
                        });
                        return;
                    },
                };

                let status = &response.common.status;
                if status.code() == Code::NotFound {
                    promise.reject(ClientError::TopicNotFound(topic));
                    return;
                }
                if !status.is_ok() {
                    promise.reject(ClientError::from_status(status));
                    return;
                }

                let route = Arc::new(TopicRoute::from_response(topic.clone(), response));
                if route.is_empty() {
                    promise.reject(ClientError::TopicNotFound(topic));
                    return;
                }

                cache.insert(route.clone());
                debug!(
                    target: "mq_client::route",
                    topic = %topic,
                    partitions = route.partitions().len(),
                    "Route cached"
                );
                promise.resolve(route.message_queues());
            }),
        );

        pending
    }

    /// Look up an offset of `query.queue` on the broker owning it.
    pub fn query_offset(&self, query: OffsetQuery) -> PendingResult<i64> {
        let (promise, pending) = pending();

        let time_point = match query.policy {
            OffsetPolicy::TimePoint => {
                let Some(time_point) = query.time_point else {
                    promise.reject(ClientError::InvalidQuery(
                        "time point policy requires a time point".to_string(),
                    ));
                    return pending;
                };
                match Timestamp::from_system_time(time_point) {
                    Ok(ts) => Some(ts),
                    Err(e) => {
                        promise.reject(e.into());
                        return pending;
                    },
                }
            },
            OffsetPolicy::Beginning | OffsetPolicy::End => None,
        };

        let target = query.queue.broker_addr.clone();
        if target.is_empty() {
            promise.reject(ClientError::InvariantViolation(format!(
                "no broker address for {}",
                query.queue
            )));
            return pending;
        }

        let request = QueryOffsetRequest {
            partition: self.partition(&query.queue),
            policy: query.policy.into(),
            time_point,
        };

        let metadata = match self.sign() {
            Ok(metadata) => metadata,
            Err(e) => {
                promise.reject(e);
                return pending;
            },
        };

        let addr = target.clone();
        self.gateway.query_offset(
            &target,
            metadata,
            request,
            self.config.io_timeout(),
            Box::new(move |outcome| complete_query_offset(&addr, outcome, promise)),
        );

        pending
    }

    /// Long-poll `query.queue` starting at `query.offset`. Exactly one of
    /// the callback's methods runs, on the gateway's completion thread.
    ///
    /// # Panics
    ///
    /// In debug builds, when the queue carries no broker address; that
    /// means route resolution upstream handed out a broken queue. Release
    /// builds report [`ClientError::InvariantViolation`] instead.
    pub fn pull<C>(&self, query: PullQuery, callback: C)
    where
        C: PullCallback + 'static,
    {
        let callback: Box<dyn PullCallback> = Box::new(callback);

        let target = query.queue.broker_addr.clone();
        debug_assert!(
            !target.is_empty(),
            "pull dispatched without a broker address for {}",
            query.queue
        );
        if target.is_empty() {
            callback.on_exception(ClientError::InvariantViolation(format!(
                "no broker address for {}",
                query.queue
            )));
            return;
        }

        let await_time = match ProtoDuration::from_duration(query.await_time) {
            Ok(await_time) => await_time,
            Err(e) => {
                callback.on_exception(e.into());
                return;
            },
        };

        let request = PullMessageRequest {
            group: Resource::new(&self.config.group, &self.config.namespace),
            partition: self.partition(&query.queue),
            offset: query.offset,
            batch_size: query.batch_size,
            await_time,
            client_id: self.client_id.clone(),
        };

        let metadata = match self.sign() {
            Ok(metadata) => metadata,
            Err(e) => {
                callback.on_exception(e);
                return;
            },
        };

        debug!(
            target: "mq_client::consumer",
            queue = %query.queue,
            offset = query.offset,
            addr = %target,
            "Pulling messages"
        );

        let decoder = self.decoder.clone();
        let addr = target.clone();
        self.gateway.pull_message(
            &target,
            metadata,
            request,
            self.config.long_polling_timeout(),
            Box::new(move |outcome| {
                match classify_pull_outcome(&addr, decoder.as_ref(), outcome) {
                    Ok(result) => callback.on_success(result),
                    Err(e) => callback.on_exception(e),
                }
            }),
        );
    }

    /// [`Self::pull`] with the outcome delivered as a [`PendingResult`].
    pub fn pull_async(&self, query: PullQuery) -> PendingResult<PullResult> {
        let (promise, pending) = pending();
        self.pull(query, move |result: Result<PullResult>| promise.complete(result));
        pending
    }

    /// Append this consumer's group to a heartbeat.
    pub fn prepare_heartbeat_data(&self, request: &mut HeartbeatRequest) {
        request.heartbeats.push(HeartbeatEntry {
            group: Resource::new(&self.config.group, &self.config.namespace),
        });
    }
}

fn complete_query_offset(
    target: &str,
    outcome: Invocation<mq_proto::QueryOffsetResponse>,
    promise: Promise<i64>,
) {
    match outcome {
        Ok(response) if response.common.status.is_ok() => promise.resolve(response.offset),
        Ok(response) => promise.reject(ClientError::from_status(&response.common.status)),
        Err(e) => promise.reject(ClientError::QueryOffset {
            addr: target.to_string(),
            reason: e.to_string(),
        }),
    }
}

impl ClientObserver for PullConsumer {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn prepare_heartbeat_data(&self, request: &mut HeartbeatRequest) {
        PullConsumer::prepare_heartbeat_data(self, request);
    }

    fn endpoints(&self) -> Vec<String> {
        self.route_cache.broker_addrs()
    }

    fn metadata(&self) -> Result<Metadata> {
        self.sign()
    }
}

impl std::fmt::Debug for PullConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullConsumer")
            .field("client_id", &self.client_id)
            .field("group", &self.config.group)
            .field("namespace", &self.config.namespace)
            .field("state", &self.state())
            .field("cached_routes", &self.route_cache.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::gateway::TransportError;
    use bytes::Bytes;
    use mq_proto::{ResponseCommon, Status, WireMessage};

    fn response(messages: Vec<WireMessage>) -> PullMessageResponse {
        PullMessageResponse {
            common: ResponseCommon::default(),
            min_offset: 0,
            next_offset: 13,
            max_offset: 20,
            messages,
        }
    }

    #[test]
    fn test_classify_transport_failure() {
        let err = classify_pull_outcome(
            "10.1.1.1:8081",
            &ChecksumDecoder,
            Err(TransportError::Timeout(Duration::from_secs(15))),
        )
        .unwrap_err();

        match err {
            ClientError::ServerUnreachable { addr, .. } => assert_eq!(addr, "10.1.1.1:8081"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_classify_business_failure() {
        let mut resp = response(vec![WireMessage::new("t", 0, 1, Bytes::from_static(b"x"))]);
        resp.common.status = Status::new(Code::OutOfRange, "offset beyond max");

        let err = classify_pull_outcome("a:1", &ChecksumDecoder, Ok(resp)).unwrap_err();
        assert_eq!(err.code(), Code::OutOfRange as i32);
        assert!(err.to_string().contains("offset beyond max"));
    }

    #[test]
    fn test_classify_drops_undecodable() {
        let good_a = WireMessage::new("t", 0, 10, Bytes::from_static(b"a"));
        let mut bad = WireMessage::new("t", 0, 11, Bytes::from_static(b"b"));
        bad.body_digest = bad.body_digest.wrapping_add(1);
        let good_c = WireMessage::new("t", 0, 12, Bytes::from_static(b"c"));

        let result =
            classify_pull_outcome("a:1", &ChecksumDecoder, Ok(response(vec![good_a, bad, good_c])))
                .unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result.messages[0].queue_offset, 10);
        assert_eq!(result.messages[1].queue_offset, 12);
        assert_eq!(result.min_offset, 0);
        assert_eq!(result.max_offset, 20);
        assert_eq!(result.next_offset, 13);
    }

    #[test]
    fn test_classify_empty_success() {
        let result = classify_pull_outcome("a:1", &ChecksumDecoder, Ok(response(vec![]))).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.next_offset, 13);
    }

    #[test]
    fn test_offset_query_constructors() {
        let queue = MessageQueue::new("t", 1, "b", "a:1");
        assert_eq!(OffsetQuery::beginning(queue.clone()).policy, OffsetPolicy::Beginning);
        assert!(OffsetQuery::end(queue.clone()).time_point.is_none());
        let tp = OffsetQuery::time_point(queue, SystemTime::UNIX_EPOCH);
        assert_eq!(tp.policy, OffsetPolicy::TimePoint);
        assert_eq!(tp.time_point, Some(SystemTime::UNIX_EPOCH));
        assert_eq!(QueryOffsetPolicy::from(OffsetPolicy::End), QueryOffsetPolicy::End);
    }

    #[test]
    fn test_closure_callback_receives_result() {
        let (promise, mut pending) = pending::<PullResult>();
        let callback: Box<dyn PullCallback> =
            Box::new(move |result: Result<PullResult>| promise.complete(result));
        callback.on_exception(ClientError::Abandoned);
        assert!(matches!(pending.try_take(), Some(Err(ClientError::Abandoned))));
    }
}
