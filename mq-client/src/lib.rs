#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Pull consumer client.
//!
//! [`PullConsumer`] resolves topic routes, queries offsets and long-polls
//! individual queues through an injected [`RpcGateway`]. Results are
//! delivered as [`PendingResult`]s or through a [`PullCallback`], completed
//! on whatever thread the gateway uses. [`PullTask`] drives a continuous
//! pull loop for one queue on top of it.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use mq_client::{
//!     ConsumerConfig, LocalClientManager, OffsetQuery, PullConsumer, PullQuery, RpcGateway,
//! };
//!
//! # async fn example(gateway: Arc<dyn RpcGateway>) -> mq_client::Result<()> {
//! let config = ConsumerConfig::new("billing").with_namespace("prod");
//! let manager = Arc::new(LocalClientManager::new(
//!     gateway.clone(),
//!     config.heartbeat_interval(),
//!     config.io_timeout(),
//! ));
//! let consumer = PullConsumer::builder(config, gateway, manager).build()?;
//! consumer.start();
//!
//! for queue in consumer.queues_for("orders").await? {
//!     let offset = consumer.query_offset(OffsetQuery::beginning(queue.clone())).await?;
//!     let result = consumer
//!         .pull_async(PullQuery::new(queue, offset, Duration::from_secs(5)))
//!         .await?;
//!     println!("{} messages, next offset {}", result.len(), result.next_offset);
//! }
//!
//! consumer.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod config;
mod consumer;
mod decoder;
mod error;
pub mod gateway;
mod lifecycle;
mod manager;
pub mod pending;
mod pull_task;
mod route;
pub mod signer;

pub use config::{ConsumeFrom, ConsumerConfig, Credentials, PullTaskConfig, generate_client_id};
pub use consumer::{
    DEFAULT_PULL_BATCH_SIZE, OffsetPolicy, OffsetQuery, PullCallback, PullConsumer,
    PullConsumerBuilder, PullQuery, PullResult,
};
pub use decoder::{ChecksumDecoder, Message, MessageDecoder};
pub use error::{CLIENT_ERROR_CODE, ClientError, Result};
pub use gateway::{Completion, Invocation, RpcGateway, TransportError};
pub use lifecycle::{ClientState, Lifecycle};
pub use manager::{ClientBase, ClientManager, ClientObserver, LocalClientManager};
pub use pending::{PendingResult, Promise, pending};
pub use pull_task::{PullTask, UNKNOWN_OFFSET};
pub use route::{MessageQueue, RouteCache, TopicRoute};
pub use signer::{HeaderSigner, Metadata, Signer, SigningContext};
