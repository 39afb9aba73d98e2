//! Endpoints: the embeddable peering node.
//!
//! An endpoint hosts publishers, subscribers, masters, and clones, and
//! connects to remote endpoints over TCP (optionally TLS). A single core
//! task routes everything: published values go to matching local
//! subscribers and to peers; store-fabric messages go to the addressed
//! store actors and to peers; peering lifecycle turns into statuses for
//! status subscribers.

pub mod publisher;
pub mod queue;
pub mod status;
pub mod subscriber;

pub use publisher::Publisher;
pub use status::{Status, StatusCode, StatusMessage};
pub use subscriber::{StatusSubscriber, Subscriber, DEFAULT_QUEUE_SIZE};

use crate::core::config::{BrokerOptions, Config};
use crate::core::error::{make_error, make_error_msg, BrokerError, BrokerResult, ErrorCode};
use crate::core::id::{EndpointInfo, NetworkInfo, NodeId};
use crate::core::time::{Clock, RealClock, Timespan};
use crate::data::{Data, DataMessage, Topic};
use crate::net::listeners::{accept_loop, connect, handshake, spawn_connection, ListenerContext};
use crate::net::transport::{Hello, NodeMessage, PeerFlags};
use crate::ops::MetricsRegistry;
use crate::store::backend::Backend;
use crate::store::clone::{CloneMsg, StoreClone};
use crate::store::frontend::StoreTaskSender;
use crate::store::master::{Master, MasterMsg};
use crate::store::memory::MemoryBackend;
use crate::store::{PublisherId, Store, StoreMessage};
use parking_lot::Mutex;
use queue::SubscriberQueue;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use subscriber::Unsubscriber;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Storage backends selectable at `attach_master` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// Volatile in-memory backend.
    Memory,
}

/// Backend-specific options, keyed by option name.
pub type BackendOptions = crate::data::Table;

fn make_backend(backend_type: BackendType, _options: &BackendOptions) -> Box<dyn Backend> {
    match backend_type {
        BackendType::Memory => Box::new(MemoryBackend::new()),
    }
}

/// Route from the core to a local store actor.
#[derive(Debug, Clone)]
pub(crate) enum StoreRoute {
    Master(mpsc::UnboundedSender<MasterMsg>),
    Clone(mpsc::UnboundedSender<CloneMsg>),
}

impl StoreRoute {
    fn deliver(&self, message: StoreMessage) {
        match self {
            Self::Master(tx) => {
                let _ = tx.send(MasterMsg::Network(message));
            }
            Self::Clone(tx) => {
                let _ = tx.send(CloneMsg::Network(message));
            }
        }
    }

    fn node_down(&self, node: NodeId) {
        match self {
            Self::Master(tx) => {
                let _ = tx.send(MasterMsg::NodeDown(node));
            }
            Self::Clone(tx) => {
                let _ = tx.send(CloneMsg::NodeDown(node));
            }
        }
    }

    fn shutdown(&self) {
        match self {
            Self::Master(tx) => {
                let _ = tx.send(MasterMsg::Shutdown);
            }
            Self::Clone(tx) => {
                let _ = tx.send(CloneMsg::Shutdown);
            }
        }
    }
}

/// Mailbox messages of the core routing task.
pub(crate) enum CoreMsg {
    /// A locally published value.
    Publish(DataMessage),
    /// A locally published value addressed to one endpoint.
    PublishTo { node: NodeId, message: DataMessage },
    /// A value received from a peer.
    PublishFromPeer {
        message: DataMessage,
        ttl: u32,
        dst: Option<NodeId>,
        from: u64,
    },
    /// A store-fabric message from a local store actor.
    Store(StoreMessage),
    /// A store-fabric message received from a peer.
    StoreFromPeer {
        message: StoreMessage,
        ttl: u32,
        from: u64,
    },
    Subscribe {
        id: u64,
        topics: Vec<Topic>,
        queue: Arc<SubscriberQueue<DataMessage>>,
    },
    SubscribeStatus {
        id: u64,
        queue: Arc<SubscriberQueue<StatusMessage>>,
        receive_statuses: bool,
    },
    Unsubscribe {
        id: u64,
    },
    RegisterStore {
        id: PublisherId,
        topic: Topic,
        route: StoreRoute,
    },
    PeerUp {
        conn_id: u64,
        node: NodeId,
        info: NetworkInfo,
        tx: mpsc::UnboundedSender<NodeMessage>,
    },
    PeerDown {
        conn_id: u64,
        lost: bool,
    },
    Unpeer {
        info: NetworkInfo,
        reply: oneshot::Sender<bool>,
    },
    EmitError(BrokerError),
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

struct SubscriberEntry {
    id: u64,
    topics: Vec<Topic>,
    queue: Arc<SubscriberQueue<DataMessage>>,
}

struct StatusEntry {
    id: u64,
    queue: Arc<SubscriberQueue<StatusMessage>>,
    receive_statuses: bool,
}

struct StoreEntry {
    id: PublisherId,
    topic: Topic,
    route: StoreRoute,
}

struct PeerEntry {
    conn_id: u64,
    node: NodeId,
    info: NetworkInfo,
    tx: mpsc::UnboundedSender<NodeMessage>,
}

/// State of the core routing task.
struct CoreState {
    node: NodeId,
    ttl: u32,
    forward: bool,
    subscribers: Vec<SubscriberEntry>,
    status_subscribers: Vec<StatusEntry>,
    stores: Vec<StoreEntry>,
    peers: Vec<PeerEntry>,
    metrics: Arc<MetricsRegistry>,
}

impl CoreState {
    fn new(node: NodeId, ttl: u32, forward: bool, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            node,
            ttl,
            forward,
            subscribers: Vec::new(),
            status_subscribers: Vec::new(),
            stores: Vec::new(),
            peers: Vec::new(),
            metrics,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<CoreMsg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                CoreMsg::Publish(message) => {
                    self.metrics
                        .counter("broker.core.messages_published")
                        .increment();
                    // Subscribers never see values published via their own
                    // endpoint; publishes travel to peers only.
                    self.send_to_peers(
                        NodeMessage::Data {
                            message,
                            ttl: self.ttl,
                            dst: None,
                        },
                        None,
                    );
                }
                CoreMsg::PublishTo { node, message } => {
                    if node == self.node {
                        self.deliver_data(&message);
                    } else {
                        self.send_to_peers(
                            NodeMessage::Data {
                                message,
                                ttl: self.ttl,
                                dst: Some(node),
                            },
                            None,
                        );
                    }
                }
                CoreMsg::PublishFromPeer {
                    message,
                    ttl,
                    dst,
                    from,
                } => match dst {
                    Some(node) if node == self.node => self.deliver_data(&message),
                    Some(_) => self.forward_data(message, ttl, dst, from),
                    None => {
                        self.deliver_data(&message);
                        self.forward_data(message, ttl, None, from);
                    }
                },
                CoreMsg::Store(message) => {
                    self.metrics
                        .counter("broker.core.store_messages")
                        .increment();
                    self.deliver_store(&message);
                    self.send_to_peers(
                        NodeMessage::Store {
                            message,
                            ttl: self.ttl,
                        },
                        None,
                    );
                }
                CoreMsg::StoreFromPeer { message, ttl, from } => {
                    self.deliver_store(&message);
                    if self.forward && ttl > 1 {
                        self.send_to_peers(
                            NodeMessage::Store {
                                message,
                                ttl: ttl - 1,
                            },
                            Some(from),
                        );
                    }
                }
                CoreMsg::Subscribe { id, topics, queue } => {
                    self.subscribers.push(SubscriberEntry { id, topics, queue });
                }
                CoreMsg::SubscribeStatus {
                    id,
                    queue,
                    receive_statuses,
                } => {
                    self.status_subscribers.push(StatusEntry {
                        id,
                        queue,
                        receive_statuses,
                    });
                }
                CoreMsg::Unsubscribe { id } => {
                    self.subscribers.retain(|s| s.id != id);
                    self.status_subscribers.retain(|s| s.id != id);
                }
                CoreMsg::RegisterStore { id, topic, route } => {
                    self.stores.push(StoreEntry { id, topic, route });
                }
                CoreMsg::PeerUp {
                    conn_id,
                    node,
                    info,
                    tx,
                } => {
                    info!(%node, peer = %info, "peer added");
                    self.peers.push(PeerEntry {
                        conn_id,
                        node,
                        info: info.clone(),
                        tx,
                    });
                    self.metrics
                        .gauge("broker.core.peers")
                        .set(self.peers.len() as i64);
                    self.emit_status(Status::new(
                        StatusCode::PeerAdded,
                        EndpointInfo::new(node, info),
                    ));
                }
                CoreMsg::PeerDown { conn_id, lost } => {
                    if let Some(idx) = self.peers.iter().position(|p| p.conn_id == conn_id) {
                        let peer = self.peers.remove(idx);
                        self.metrics
                            .gauge("broker.core.peers")
                            .set(self.peers.len() as i64);
                        let code = if lost {
                            StatusCode::PeerLost
                        } else {
                            StatusCode::PeerRemoved
                        };
                        info!(node = %peer.node, peer = %peer.info, status = %code, "peer down");
                        self.emit_status(Status::new(
                            code,
                            EndpointInfo::new(peer.node, peer.info),
                        ));
                        // Only notify stores if no other connection reaches
                        // the same node.
                        if self.peers.iter().all(|p| p.node != peer.node) {
                            for store in &self.stores {
                                store.route.node_down(peer.node);
                            }
                        }
                    }
                }
                CoreMsg::Unpeer { info, reply } => {
                    let found = self.unpeer(&info);
                    let _ = reply.send(found);
                }
                CoreMsg::EmitError(error) => self.emit_error(error),
                CoreMsg::Shutdown { done } => {
                    for peer in &self.peers {
                        let _ = peer.tx.send(NodeMessage::Bye);
                    }
                    for store in &self.stores {
                        store.route.shutdown();
                    }
                    let _ = done.send(());
                    break;
                }
            }
        }
        debug!("core task down");
    }

    /// Push a value to every local subscriber with a matching prefix.
    fn deliver_data(&self, message: &DataMessage) {
        for sub in &self.subscribers {
            if sub
                .topics
                .iter()
                .any(|prefix| prefix.matches_prefix(&message.topic))
            {
                sub.queue.push(message.clone());
            }
        }
    }

    fn forward_data(&self, message: DataMessage, ttl: u32, dst: Option<NodeId>, from: u64) {
        if self.forward && ttl > 1 {
            self.metrics
                .counter("broker.core.messages_forwarded")
                .increment();
            self.send_to_peers(
                NodeMessage::Data {
                    message,
                    ttl: ttl - 1,
                    dst,
                },
                Some(from),
            );
        }
    }

    /// Deliver a store message to every addressed local store actor.
    fn deliver_store(&self, message: &StoreMessage) {
        for store in &self.stores {
            if store.topic == message.topic
                && store.id != message.sender
                && message.accepts(store.id)
            {
                store.route.deliver(message.clone());
            }
        }
    }

    fn send_to_peers(&self, message: NodeMessage, except: Option<u64>) {
        for peer in &self.peers {
            if Some(peer.conn_id) == except {
                continue;
            }
            let _ = peer.tx.send(message.clone());
        }
    }

    fn unpeer(&mut self, info: &NetworkInfo) -> bool {
        let Some(idx) = self.peers.iter().position(|p| p.info == *info) else {
            return false;
        };
        let peer = self.peers.remove(idx);
        let _ = peer.tx.send(NodeMessage::Bye);
        self.metrics
            .gauge("broker.core.peers")
            .set(self.peers.len() as i64);
        self.emit_status(Status::new(
            StatusCode::PeerRemoved,
            EndpointInfo::new(peer.node, peer.info),
        ));
        true
    }

    fn emit_status(&self, status: Status) {
        for sub in &self.status_subscribers {
            if sub.receive_statuses {
                sub.queue.push(StatusMessage::Status(status.clone()));
            }
        }
    }

    fn emit_error(&self, error: BrokerError) {
        warn!(%error, "endpoint error");
        for sub in &self.status_subscribers {
            sub.queue.push(StatusMessage::Error(error.clone()));
        }
    }
}

/// Forwards unsubscribe calls from dropped subscriber frontends.
struct CoreUnsubscriber {
    tx: mpsc::UnboundedSender<CoreMsg>,
}

impl Unsubscriber for CoreUnsubscriber {
    fn unsubscribe(&self, id: u64) {
        let _ = self.tx.send(CoreMsg::Unsubscribe { id });
    }
}

/// A peering node hosting publishers, subscribers, masters, and clones.
pub struct Endpoint {
    node: NodeId,
    config: Config,
    clock: Arc<dyn Clock>,
    core_tx: mpsc::UnboundedSender<CoreMsg>,
    next_id: Arc<AtomicU64>,
    masters: Mutex<HashSet<String>>,
    listeners: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    metrics: Arc<MetricsRegistry>,
    metrics_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    #[cfg(feature = "tls")]
    tls: Option<crate::net::tls::TlsContext>,
}

impl Endpoint {
    /// Create an endpoint from programmatic options, loading `broker.conf`
    /// and environment overrides.
    pub fn new(options: BrokerOptions) -> anyhow::Result<Self> {
        let config = Config::load(options)?;
        Self::with_config(config)
    }

    /// Create an endpoint from a fully resolved configuration.
    pub fn with_config(config: Config) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
        Self::with_config_and_clock(config, clock)
    }

    /// Create an endpoint with an injected clock. Pass a simulated clock
    /// to control data store time-keeping from the application.
    pub fn with_config_and_clock(config: Config, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        #[cfg(feature = "tls")]
        let tls = {
            use crate::net::tls::{TlsContext, TlsSettings};
            if config.options.disable_ssl {
                None
            } else {
                let settings = TlsSettings::from_config(&config.openssl)?;
                if settings.configured() {
                    Some(TlsContext::from_settings(&settings)?)
                } else {
                    None
                }
            }
        };
        #[cfg(not(feature = "tls"))]
        if !config.options.disable_ssl && config.openssl.configured() {
            anyhow::bail!("TLS material configured, but broker was built without the tls feature");
        }

        let node = NodeId::generate();
        let metrics = Arc::new(MetricsRegistry::new());
        let (core_tx, core_rx) = mpsc::unbounded_channel();
        let state = CoreState::new(
            node,
            config.options.ttl,
            config.options.forward,
            Arc::clone(&metrics),
        );
        tokio::spawn(state.run(core_rx));

        let metrics_task = config.metrics.port.map(|port| {
            let registry = Arc::clone(&metrics);
            tokio::spawn(crate::ops::metrics::serve(registry, port))
        });

        info!(%node, "endpoint up");
        Ok(Self {
            node,
            config,
            clock,
            core_tx,
            next_id: Arc::new(AtomicU64::new(1)),
            masters: Mutex::new(HashSet::new()),
            listeners: Mutex::new(Vec::new()),
            metrics,
            metrics_task: Mutex::new(metrics_task),
            #[cfg(feature = "tls")]
            tls,
        })
    }

    /// This endpoint's node id.
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// The configuration in effect.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The metric registry of this endpoint.
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// The clock driving store time-keeping.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn hello(&self) -> Hello {
        let mut flags = PeerFlags::STORE_SYNC;
        if self.config.options.forward {
            flags |= PeerFlags::FORWARDING;
        }
        Hello::new(self.node, flags)
    }

    /// Listen for peerings on `host:port`. A port of 0 picks a free port;
    /// the bound port is returned.
    pub async fn listen(&self, host: &str, port: u16) -> BrokerResult<u16> {
        let listener = tokio::net::TcpListener::bind((host, port))
            .await
            .map_err(|e| make_error_msg(ErrorCode::Unspecified, e.to_string()))?;
        let bound = listener
            .local_addr()
            .map_err(|e| make_error_msg(ErrorCode::Unspecified, e.to_string()))?
            .port();
        let ctx = ListenerContext {
            hello: self.hello(),
            core: self.core_tx.clone(),
            #[cfg(feature = "tls")]
            tls: self.tls.clone(),
        };
        let handle = tokio::spawn(accept_loop(listener, ctx, Arc::clone(&self.next_id)));
        self.listeners.lock().push(handle);
        info!(host, port = bound, "listening for peerings");
        Ok(bound)
    }

    /// Establish a peering. A zero `retry` makes a single attempt.
    pub async fn peer(&self, host: &str, port: u16, retry: Duration) -> BrokerResult<()> {
        match self.establish_peering(host, port, retry).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = self.core_tx.send(CoreMsg::EmitError(e.clone()));
                Err(e)
            }
        }
    }

    /// Establish a peering without waiting for the outcome; failures go to
    /// status subscribers only.
    pub fn peer_nosync(&self, host: &str, port: u16, retry: Duration) {
        let endpoint = self.peering_parts();
        let host = host.to_string();
        tokio::spawn(async move {
            if let Err(e) = endpoint.establish(&host, port, retry).await {
                let _ = endpoint.core.send(CoreMsg::EmitError(e));
            }
        });
    }

    async fn establish_peering(&self, host: &str, port: u16, retry: Duration) -> BrokerResult<()> {
        self.peering_parts().establish(host, port, retry).await
    }

    fn peering_parts(&self) -> PeeringParts {
        PeeringParts {
            hello: self.hello(),
            core: self.core_tx.clone(),
            next_id: Arc::clone(&self.next_id),
            #[cfg(feature = "tls")]
            tls: self.tls.clone(),
        }
    }

    /// Close the peering with `host:port`.
    pub async fn unpeer(&self, host: &str, port: u16) -> BrokerResult<()> {
        let (reply, rx) = oneshot::channel();
        let _ = self.core_tx.send(CoreMsg::Unpeer {
            info: NetworkInfo::new(host, port),
            reply,
        });
        match rx.await {
            Ok(true) => Ok(()),
            Ok(false) => Err(make_error(ErrorCode::PeerInvalid)),
            Err(_) => Err(make_error(ErrorCode::Unspecified)),
        }
    }

    /// Close the peering with `host:port` without waiting for the outcome.
    pub fn unpeer_nosync(&self, host: &str, port: u16) {
        let (reply, _rx) = oneshot::channel();
        let _ = self.core_tx.send(CoreMsg::Unpeer {
            info: NetworkInfo::new(host, port),
            reply,
        });
    }

    /// Publish one value.
    pub fn publish(&self, topic: impl Into<Topic>, data: impl Into<Data>) {
        let _ = self
            .core_tx
            .send(CoreMsg::Publish(DataMessage::new(topic.into(), data.into())));
    }

    /// Publish a batch of messages.
    pub fn publish_batch(&self, messages: Vec<DataMessage>) {
        for message in messages {
            let _ = self.core_tx.send(CoreMsg::Publish(message));
        }
    }

    /// Publish one value to a single endpoint only.
    pub fn publish_to(&self, node: NodeId, topic: impl Into<Topic>, data: impl Into<Data>) {
        let _ = self.core_tx.send(CoreMsg::PublishTo {
            node,
            message: DataMessage::new(topic.into(), data.into()),
        });
    }

    /// Create a publisher emitting on a fixed topic.
    pub fn make_publisher(&self, topic: impl Into<Topic>) -> BrokerResult<Publisher> {
        let (tx, mut rx) = mpsc::unbounded_channel::<DataMessage>();
        let core = self.core_tx.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if core.send(CoreMsg::Publish(message)).is_err() {
                    break;
                }
            }
        });
        Publisher::new(topic.into(), tx)
            .map_err(|e| make_error_msg(ErrorCode::Unspecified, e.to_string()))
    }

    /// Create a subscriber for messages matching any of `topics`.
    pub fn make_subscriber(
        &self,
        topics: Vec<Topic>,
        max_qsize: usize,
    ) -> BrokerResult<Subscriber> {
        let queue = Arc::new(
            SubscriberQueue::new(max_qsize)
                .map_err(|e| make_error_msg(ErrorCode::Unspecified, e.to_string()))?,
        );
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.core_tx.send(CoreMsg::Subscribe {
            id,
            topics,
            queue: Arc::clone(&queue),
        });
        Ok(Subscriber::new(
            id,
            queue,
            Arc::new(CoreUnsubscriber {
                tx: self.core_tx.clone(),
            }),
        ))
    }

    /// Create a status subscriber. Errors are always delivered; statuses
    /// only when `receive_statuses` is set.
    pub fn make_status_subscriber(&self, receive_statuses: bool) -> BrokerResult<StatusSubscriber> {
        let queue = Arc::new(
            SubscriberQueue::new(DEFAULT_QUEUE_SIZE)
                .map_err(|e| make_error_msg(ErrorCode::Unspecified, e.to_string()))?,
        );
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.core_tx.send(CoreMsg::SubscribeStatus {
            id,
            queue: Arc::clone(&queue),
            receive_statuses,
        });
        Ok(StatusSubscriber::new(
            id,
            queue,
            Arc::new(CoreUnsubscriber {
                tx: self.core_tx.clone(),
            }),
        ))
    }

    /// Host the authoritative store named `name`.
    pub fn attach_master(
        &self,
        name: &str,
        backend_type: BackendType,
        options: BackendOptions,
    ) -> BrokerResult<Store> {
        self.attach_master_with(name, make_backend(backend_type, &options))
    }

    /// Host the authoritative store named `name` on a caller-provided
    /// backend.
    pub fn attach_master_with(
        &self,
        name: &str,
        backend: Box<dyn Backend>,
    ) -> BrokerResult<Store> {
        {
            let mut masters = self.masters.lock();
            if !masters.insert(name.to_string()) {
                return Err(make_error(ErrorCode::MasterExists));
            }
        }
        let id = self.next_publisher_id();
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let store_tx = self.store_fabric_sender();
        let master = match Master::new(
            name,
            id,
            backend,
            Arc::clone(&self.clock),
            store_tx,
            task_tx.clone(),
        ) {
            Ok(master) => master,
            Err(e) => {
                self.masters.lock().remove(name);
                return Err(e);
            }
        };
        let _ = self.core_tx.send(CoreMsg::RegisterStore {
            id,
            topic: Topic::master_topic(name),
            route: StoreRoute::Master(task_tx.clone()),
        });
        tokio::spawn(master.run(task_rx));
        Ok(Store::new(
            name,
            self.next_publisher_id(),
            StoreTaskSender::Master(task_tx),
            self.request_timeout(),
        ))
    }

    /// Attach an eventually-consistent replica of the store named `name`.
    pub fn attach_clone(&self, name: &str) -> BrokerResult<Store> {
        let id = self.next_publisher_id();
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let store_tx = self.store_fabric_sender();
        let clone = StoreClone::new(
            name,
            id,
            Box::new(MemoryBackend::new()),
            Arc::clone(&self.clock),
            store_tx,
            Timespan::from_millis(self.config.store.stale_threshold_ms as i64),
            self.config.channel.ack_interval,
            self.config.channel.nack_timeout,
        );
        let _ = self.core_tx.send(CoreMsg::RegisterStore {
            id,
            topic: Topic::clone_topic(name),
            route: StoreRoute::Clone(task_tx.clone()),
        });
        tokio::spawn(clone.run(task_rx));
        // Drive the channel cadence until the clone goes away.
        let tick_tx = task_tx.clone();
        let tick_interval = Duration::from_millis(self.config.channel.tick_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tick_tx.send(CloneMsg::Tick).is_err() {
                    break;
                }
            }
        });
        Ok(Store::new(
            name,
            self.next_publisher_id(),
            StoreTaskSender::Clone(task_tx),
            self.request_timeout(),
        ))
    }

    /// Shut the endpoint down: say goodbye to peers, stop stores and
    /// listeners, and drain the core.
    pub async fn shutdown(&self) {
        for handle in self.listeners.lock().drain(..) {
            handle.abort();
        }
        if let Some(handle) = self.metrics_task.lock().take() {
            handle.abort();
        }
        let (done, rx) = oneshot::channel();
        if self.core_tx.send(CoreMsg::Shutdown { done }).is_ok() {
            let _ = rx.await;
        }
        info!(node = %self.node, "endpoint down");
    }

    fn next_publisher_id(&self) -> PublisherId {
        PublisherId::new(self.node, self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.config.store.request_timeout_ms)
    }

    /// A sender that feeds store-fabric messages into the core.
    fn store_fabric_sender(&self) -> mpsc::UnboundedSender<StoreMessage> {
        let (tx, mut rx) = mpsc::unbounded_channel::<StoreMessage>();
        let core = self.core_tx.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if core.send(CoreMsg::Store(message)).is_err() {
                    break;
                }
            }
        });
        tx
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        for handle in self.listeners.lock().drain(..) {
            handle.abort();
        }
        if let Some(handle) = self.metrics_task.lock().take() {
            handle.abort();
        }
        let (done, _rx) = oneshot::channel();
        let _ = self.core_tx.send(CoreMsg::Shutdown { done });
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint").field("node", &self.node).finish()
    }
}

/// The pieces needed to establish one outbound peering, detached from the
/// endpoint so background peerings can outlive the call site.
struct PeeringParts {
    hello: Hello,
    core: mpsc::UnboundedSender<CoreMsg>,
    next_id: Arc<AtomicU64>,
    #[cfg(feature = "tls")]
    tls: Option<crate::net::tls::TlsContext>,
}

impl PeeringParts {
    async fn establish(&self, host: &str, port: u16, retry: Duration) -> BrokerResult<()> {
        let stream = connect(host, port, retry).await?;
        let conn_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let info = NetworkInfo::new(host, port);

        #[cfg(feature = "tls")]
        if let Some(tls) = &self.tls {
            use tokio_rustls::rustls::pki_types::ServerName;
            let name = ServerName::try_from(host.to_string())
                .map_err(|_| make_error_msg(ErrorCode::PeerInvalid, "invalid server name"))?;
            let mut stream = tls
                .connector
                .connect(name, stream)
                .await
                .map_err(|e| make_error_msg(ErrorCode::PeerIncompatible, e.to_string()))?;
            let theirs = handshake(&mut stream, self.hello).await?;
            spawn_connection(stream, theirs, conn_id, info, self.core.clone());
            return Ok(());
        }

        let mut stream = stream;
        let theirs = handshake(&mut stream, self.hello).await?;
        spawn_connection(stream, theirs, conn_id, info, self.core.clone());
        Ok(())
    }
}
