//! Per-queue pull loop built on [`PullConsumer`].
//!
//! A task resolves its starting offset (explicitly, or through an offset
//! query derived from [`ConsumeFrom`]), then long-polls the queue and
//! forwards messages in order into a bounded channel. Failed or throttled
//! pulls are retried from the same offset after `pull_later_delay`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant, UNIX_EPOCH};

use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ConsumeFrom, PullTaskConfig};
use crate::consumer::{OffsetQuery, PullConsumer, PullQuery};
use crate::decoder::Message;
use crate::error::{ClientError, Result};
use crate::route::MessageQueue;

/// Offset value reported before the starting offset is known.
pub const UNKNOWN_OFFSET: i64 = -1;

struct TaskState {
    queue: MessageQueue,
    dropped: AtomicBool,
    wake: Notify,
    offset: AtomicI64,
    pull_count: AtomicU64,
    created: Instant,
    max_idle: Duration,
    /// Milliseconds after `created` at which the latest pull was issued.
    last_activity_ms: AtomicU64,
}

impl TaskState {
    fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    fn mark_dropped(&self) {
        self.dropped.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    fn touch(&self) {
        self.last_activity_ms
            .store(self.created.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        self.created.elapsed().saturating_sub(last)
    }

    /// Sleep for `delay` unless the task is dropped first.
    async fn pause(&self, delay: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.wake.notified() => {}
        }
    }
}

/// Handle to a running pull loop for one queue.
pub struct PullTask {
    state: Arc<TaskState>,
    handle: JoinHandle<()>,
}

impl PullTask {
    /// Spawn a loop pulling `queue` into `output`. With `start_offset` of
    /// `None` the starting offset is queried according to
    /// `config.consume_from`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        consumer: Arc<PullConsumer>,
        queue: MessageQueue,
        start_offset: Option<i64>,
        config: PullTaskConfig,
        output: mpsc::Sender<Message>,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            ClientError::Config(format!("pull task requires a tokio runtime: {}", e))
        })?;
        if config.batch_size <= 0 {
            return Err(ClientError::Config("pull batch size must be positive".into()));
        }

        let state = Arc::new(TaskState {
            queue,
            dropped: AtomicBool::new(false),
            wake: Notify::new(),
            offset: AtomicI64::new(start_offset.unwrap_or(UNKNOWN_OFFSET)),
            pull_count: AtomicU64::new(0),
            created: Instant::now(),
            max_idle: config.max_idle(),
            last_activity_ms: AtomicU64::new(0),
        });

        let handle = runtime.spawn(run(consumer, state.clone(), start_offset, config, output));
        Ok(Self { state, handle })
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.state.queue
    }

    /// Stop pulling. An in-flight pull still completes, but its messages
    /// are discarded.
    pub fn drop_queue(&self) {
        self.state.mark_dropped();
    }

    pub fn is_dropped(&self) -> bool {
        self.state.is_dropped()
    }

    /// Offset the next pull will start from.
    pub fn current_offset(&self) -> i64 {
        self.state.offset.load(Ordering::Acquire)
    }

    /// Number of pulls issued so far.
    pub fn pull_count(&self) -> u64 {
        self.state.pull_count.load(Ordering::Relaxed)
    }

    /// True when no pull has been issued for longer than the configured
    /// `max_idle`.
    pub fn expired(&self) -> bool {
        let idle = self.state.idle_for();
        if idle < self.state.max_idle {
            return false;
        }
        warn!(
            queue = %self.state.queue,
            idle_ms = idle.as_millis() as u64,
            "Pull task is idle"
        );
        true
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the loop to exit. Call [`Self::drop_queue`] first, or the
    /// loop runs until its output channel closes.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            error!(queue = %self.state.queue, error = %e, "Pull task panicked");
        }
    }
}

impl std::fmt::Debug for PullTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullTask")
            .field("queue", &self.state.queue)
            .field("offset", &self.current_offset())
            .field("dropped", &self.is_dropped())
            .field("pull_count", &self.pull_count())
            .finish()
    }
}

fn offset_query(queue: MessageQueue, consume_from: ConsumeFrom) -> OffsetQuery {
    match consume_from {
        ConsumeFrom::Beginning => OffsetQuery::beginning(queue),
        ConsumeFrom::End => OffsetQuery::end(queue),
        ConsumeFrom::Timestamp(millis) => {
            OffsetQuery::time_point(queue, UNIX_EPOCH + Duration::from_millis(millis))
        },
    }
}

async fn run(
    consumer: Arc<PullConsumer>,
    state: Arc<TaskState>,
    start_offset: Option<i64>,
    config: PullTaskConfig,
    output: mpsc::Sender<Message>,
) {
    let mut offset = match start_offset {
        Some(offset) => offset,
        None => {
            let query = offset_query(state.queue.clone(), config.consume_from);
            match consumer.query_offset(query).await {
                Ok(offset) => {
                    info!(queue = %state.queue, offset, "Resolved starting offset");
                    offset
                },
                Err(e) => {
                    error!(
                        queue = %state.queue,
                        error = %e,
                        "Failed to resolve starting offset, dropping queue"
                    );
                    state.mark_dropped();
                    return;
                },
            }
        },
    };
    state.offset.store(offset, Ordering::Release);

    let delay = config.pull_later_delay();
    loop {
        if state.is_dropped() {
            debug!(queue = %state.queue, "Pull task dropped");
            return;
        }

        let cached = output.max_capacity() - output.capacity();
        if cached >= config.max_cached_messages {
            warn!(
                queue = %state.queue,
                cached,
                threshold = config.max_cached_messages,
                "Pull task throttled"
            );
            state.pause(delay).await;
            continue;
        }

        state.touch();
        state.pull_count.fetch_add(1, Ordering::Relaxed);
        let query = PullQuery::new(state.queue.clone(), offset, config.await_time())
            .with_batch_size(config.batch_size);

        match consumer.pull_async(query).await {
            Ok(result) => {
                if state.is_dropped() {
                    continue;
                }
                debug!(
                    queue = %state.queue,
                    found = result.len(),
                    next_offset = result.next_offset,
                    "Pulled messages"
                );
                for message in result.messages {
                    let delivered = tokio::select! {
                        biased;
                        _ = state.wake.notified() => {
                            debug!(queue = %state.queue, "Pull task dropped while delivering");
                            return;
                        }
                        sent = output.send(message) => sent.is_ok(),
                    };
                    if !delivered {
                        info!(queue = %state.queue, "Output channel closed, dropping queue");
                        state.mark_dropped();
                        return;
                    }
                }
                offset = result.next_offset;
                state.offset.store(offset, Ordering::Release);
            },
            Err(e) => {
                warn!(
                    queue = %state.queue,
                    offset,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Pull failed, retrying later"
                );
                state.pause(delay).await;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_query_from_consume_from() {
        let queue = MessageQueue::new("t", 0, "b", "a:1");
        assert_eq!(
            offset_query(queue.clone(), ConsumeFrom::Beginning),
            OffsetQuery::beginning(queue.clone())
        );
        assert_eq!(
            offset_query(queue.clone(), ConsumeFrom::End),
            OffsetQuery::end(queue.clone())
        );
        assert_eq!(
            offset_query(queue.clone(), ConsumeFrom::Timestamp(2_500)),
            OffsetQuery::time_point(queue, UNIX_EPOCH + Duration::from_millis(2_500))
        );
    }
}
