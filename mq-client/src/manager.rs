//! Lifecycle plumbing shared by every client role.
//!
//! A [`ClientManager`] is process-wide: several consumers (and other client
//! roles) register with one manager, which owns the background heartbeat.
//! Each client embeds a [`ClientBase`] that drives its own [`Lifecycle`]
//! through the base start and shutdown sequences.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use mq_proto::HeartbeatRequest;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

use crate::error::{ClientError, Result};
use crate::gateway::RpcGateway;
use crate::lifecycle::{ClientState, Lifecycle};
use crate::signer::Metadata;

/// A client registered with a [`ClientManager`].
pub trait ClientObserver: Send + Sync {
    fn client_id(&self) -> &str;

    /// Append this client's entries to an outgoing heartbeat.
    fn prepare_heartbeat_data(&self, request: &mut HeartbeatRequest);

    /// Broker addresses this client's heartbeat should reach.
    fn endpoints(&self) -> Vec<String>;

    /// Authentication headers for requests sent on this client's behalf.
    fn metadata(&self) -> Result<Metadata>;
}

/// Process-wide services the client roles share.
pub trait ClientManager: Send + Sync {
    /// Called once per client start; must be balanced by [`Self::shutdown`].
    fn start(&self) -> Result<()>;

    fn shutdown(&self);

    fn add_observer(&self, observer: Weak<dyn ClientObserver>);

    fn remove_observer(&self, client_id: &str);
}

/// Lifecycle controller embedded by a client role.
pub struct ClientBase {
    client_id: String,
    lifecycle: Lifecycle,
    manager: Arc<dyn ClientManager>,
}

impl ClientBase {
    pub fn new(client_id: impl Into<String>, manager: Arc<dyn ClientManager>) -> Self {
        Self {
            client_id: client_id.into(),
            lifecycle: Lifecycle::new(),
            manager,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn state(&self) -> ClientState {
        self.lifecycle.state()
    }

    pub fn manager(&self) -> &Arc<dyn ClientManager> {
        &self.manager
    }

    /// `Initial -> Starting -> Started`. A manager that fails to start
    /// leaves the client in `Starting`. Returns false when another call
    /// already began the start sequence.
    pub fn start(&self) -> bool {
        if !self
            .lifecycle
            .compare_and_set(ClientState::Initial, ClientState::Starting)
        {
            debug!(
                target: "mq_client::lifecycle",
                client_id = %self.client_id,
                state = %self.state(),
                "Start ignored"
            );
            return false;
        }

        if let Err(e) = self.manager.start() {
            error!(
                target: "mq_client::lifecycle",
                client_id = %self.client_id,
                error = %e,
                "Client manager failed to start"
            );
            return true;
        }

        if !self
            .lifecycle
            .compare_and_set(ClientState::Starting, ClientState::Started)
        {
            // Shut down while starting; release the manager reference taken above.
            self.manager.shutdown();
        }
        true
    }

    /// `Started | Starting -> Stopping`, then detach from the manager. The
    /// final move to `Stopped` is left to the owning role.
    pub fn shutdown(&self) {
        let was_started = self
            .lifecycle
            .compare_and_set(ClientState::Started, ClientState::Stopping);
        if !was_started
            && !self
                .lifecycle
                .compare_and_set(ClientState::Starting, ClientState::Stopping)
        {
            return;
        }

        self.manager.remove_observer(&self.client_id);
        // A client still in `Starting` holds no manager reference.
        if was_started {
            self.manager.shutdown();
        }
    }
}

impl std::fmt::Debug for ClientBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBase")
            .field("client_id", &self.client_id)
            .field("state", &self.state())
            .finish()
    }
}

struct ManagerState {
    observers: Vec<Weak<dyn ClientObserver>>,
    active_clients: usize,
    shutdown_tx: Option<broadcast::Sender<()>>,
}

struct Inner {
    gateway: Arc<dyn RpcGateway>,
    heartbeat_interval: Duration,
    io_timeout: Duration,
    state: Mutex<ManagerState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn live_observers(&self) -> Vec<Arc<dyn ClientObserver>> {
        let mut state = self.lock();
        state.observers.retain(|o| o.strong_count() > 0);
        state.observers.iter().filter_map(Weak::upgrade).collect()
    }

    /// Merge every live observer's entries into one request per broker.
    /// The first observer reporting a broker supplies the request's client
    /// id and signature.
    fn collect_heartbeats(&self) -> BTreeMap<String, (HeartbeatRequest, Metadata)> {
        let mut by_endpoint: BTreeMap<String, (HeartbeatRequest, Metadata)> = BTreeMap::new();
        for observer in self.live_observers() {
            let endpoints = observer.endpoints();
            if endpoints.is_empty() {
                trace!(client_id = observer.client_id(), "No endpoints to heartbeat");
                continue;
            }

            let metadata = match observer.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!(client_id = observer.client_id(), error = %e, "Heartbeat signing failed");
                    continue;
                },
            };

            let mut entries = HeartbeatRequest::default();
            observer.prepare_heartbeat_data(&mut entries);

            for addr in endpoints {
                let (request, _) = by_endpoint.entry(addr).or_insert_with(|| {
                    (
                        HeartbeatRequest {
                            client_id: observer.client_id().to_string(),
                            heartbeats: Vec::new(),
                        },
                        metadata.clone(),
                    )
                });
                request.heartbeats.extend(entries.heartbeats.iter().cloned());
            }
        }
        by_endpoint
    }

    fn send_heartbeats(&self) -> usize {
        let mut dispatched = 0;
        for (addr, (request, metadata)) in self.collect_heartbeats() {
            let target = addr.clone();
            self.gateway.heartbeat(
                &addr,
                metadata,
                request,
                self.io_timeout,
                Box::new(move |outcome| match outcome {
                    Ok(response) if response.common.status.is_ok() => {
                        trace!(addr = %target, "Heartbeat acknowledged");
                    },
                    Ok(response) => {
                        warn!(
                            addr = %target,
                            code = response.common.status.code,
                            message = %response.common.status.message,
                            "Heartbeat rejected"
                        );
                    },
                    Err(e) => {
                        warn!(addr = %target, error = %e, "Heartbeat failed");
                    },
                }),
            );
            dispatched += 1;
        }
        dispatched
    }
}

/// In-process [`ClientManager`] that heartbeats every registered client's
/// brokers on a fixed interval while at least one client is started.
#[derive(Clone)]
pub struct LocalClientManager {
    inner: Arc<Inner>,
}

impl LocalClientManager {
    pub fn new(
        gateway: Arc<dyn RpcGateway>,
        heartbeat_interval: Duration,
        io_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                gateway,
                heartbeat_interval,
                io_timeout,
                state: Mutex::new(ManagerState {
                    observers: Vec::new(),
                    active_clients: 0,
                    shutdown_tx: None,
                }),
            }),
        }
    }

    /// Number of registered observers that are still alive.
    pub fn observer_count(&self) -> usize {
        self.inner.live_observers().len()
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().shutdown_tx.is_some()
    }

    /// Send one heartbeat round immediately. Returns the number of
    /// heartbeat calls dispatched, one per distinct broker.
    pub fn heartbeat_now(&self) -> usize {
        self.inner.send_heartbeats()
    }

    fn spawn_heartbeat_loop(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current().map_err(|e| {
            ClientError::Config(format!("client manager requires a tokio runtime: {}", e))
        })?;

        let inner = self.inner.clone();
        handle.spawn(async move {
            let mut interval = tokio::time::interval(inner.heartbeat_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let dispatched = inner.send_heartbeats();
                        trace!(dispatched, "Heartbeat round complete");
                    }
                    _ = shutdown_rx.recv() => {
                        debug!(target: "mq_client::manager", "Heartbeat loop stopped");
                        break;
                    }
                }
            }
        });
        Ok(())
    }
}

impl ClientManager for LocalClientManager {
    fn start(&self) -> Result<()> {
        let mut state = self.inner.lock();
        if state.shutdown_tx.is_none() {
            let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
            self.spawn_heartbeat_loop(shutdown_rx)?;
            state.shutdown_tx = Some(shutdown_tx);
            info!(
                target: "mq_client::manager",
                interval_ms = self.inner.heartbeat_interval.as_millis() as u64,
                "Client manager started"
            );
        }
        state.active_clients += 1;
        Ok(())
    }

    fn shutdown(&self) {
        let mut state = self.inner.lock();
        state.active_clients = state.active_clients.saturating_sub(1);
        if state.active_clients > 0 {
            return;
        }
        if let Some(shutdown_tx) = state.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
            info!(target: "mq_client::manager", "Client manager stopped");
        }
    }

    fn add_observer(&self, observer: Weak<dyn ClientObserver>) {
        let mut state = self.inner.lock();
        state.observers.retain(|o| o.strong_count() > 0);
        state.observers.push(observer);
    }

    fn remove_observer(&self, client_id: &str) {
        let mut state = self.inner.lock();
        state.observers.retain(|o| match o.upgrade() {
            Some(observer) => observer.client_id() != client_id,
            None => false,
        });
    }
}

impl std::fmt::Debug for LocalClientManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("LocalClientManager")
            .field("heartbeat_interval", &self.inner.heartbeat_interval)
            .field("active_clients", &state.active_clients)
            .field("observers", &state.observers.len())
            .finish()
    }
}
