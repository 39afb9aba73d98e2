//! Clone state machine.
//!
//! A clone mirrors its master: it drives the consumer half of the reliable
//! channel, applies the replicated command stream to a local backend, and
//! answers queries locally once it is live. Until then it forwards queries
//! to the master, or answers `stale_data` when the master has been gone for
//! too long.
//!
//! Bootstrap and resync follow the snapshot protocol: the clone asks the
//! master for a snapshot, discards channel commands until it sees its own
//! sync-point marker, buffers commands after the marker, and replays the
//! buffer once the snapshot is installed.

use super::backend::Backend;
use super::command::{Command, CommandMessage, PublisherId, RequestId, StoreSnapshot};
use super::events::{EventSink, StoreEvent};
use super::{StoreMessage, StorePayload, StoreQuery, StoreRequest};
use crate::channel::{Consumer, ConsumerLink, ConsumerMessage, ProducerMessage};
use crate::core::error::{make_error, BrokerResult, ErrorCode};
use crate::core::time::{Clock, Timespan, Timestamp};
use crate::data::{Data, Topic};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Ticks between snapshot request retries while not live.
const RESYNC_RETRY_TICKS: u64 = 20;

/// Mailbox messages of a clone task.
#[derive(Debug)]
pub enum CloneMsg {
    /// A request from the local frontend.
    Request(StoreRequest),
    /// A message from the store fabric (the master, mostly).
    Network(StoreMessage),
    /// Periodic channel tick.
    Tick,
    /// The master's endpoint went away.
    MasterDown,
    /// An endpoint became unreachable.
    NodeDown(crate::core::id::NodeId),
    /// Drain and exit.
    Shutdown,
}

/// Synchronization phase of a clone.
enum Phase {
    /// Waiting for the sync point and the snapshot.
    Syncing {
        /// Whether our sync-point marker was already delivered in order.
        marker_seen: bool,
        /// A snapshot that arrived before the marker.
        pending_snapshot: Option<StoreSnapshot>,
        /// Commands delivered after the marker, replayed once the snapshot
        /// is installed.
        buffered: Vec<Command>,
    },
    /// In sync; commands apply directly.
    Live,
}

/// Collects channel outputs during a consumer call, so the clone can apply
/// deliveries with full access to its own state afterwards.
#[derive(Default)]
struct CollectLink {
    delivered: Vec<CommandMessage>,
    replies: Vec<ConsumerMessage>,
}

impl ConsumerLink<CommandMessage> for CollectLink {
    fn deliver(&mut self, payload: CommandMessage) {
        self.delivered.push(payload);
    }

    fn reply(&mut self, msg: ConsumerMessage) {
        self.replies.push(msg);
    }
}

/// Pending reply slot for a forwarded query.
enum PendingQuery {
    Value(oneshot::Sender<BrokerResult<Data>>),
    Bool(oneshot::Sender<BrokerResult<bool>>),
}

/// The clone side of a replicated store.
pub struct StoreClone {
    name: String,
    id: PublisherId,
    master_topic: Topic,
    backend: Box<dyn Backend>,
    clock: Arc<dyn Clock>,
    consumer: Consumer<CommandMessage>,
    events: EventSink,
    core: mpsc::UnboundedSender<StoreMessage>,
    phase: Phase,
    /// The node currently acting as our master, learned from channel
    /// traffic.
    master_node: Option<crate::core::id::NodeId>,
    /// When the clone lost sync with its master.
    stale_since: Option<Timestamp>,
    /// How long to forward queries before answering `stale_data`.
    stale_threshold: Timespan,
    ack_interval: u64,
    nack_timeout: u64,
    ticks_since_request: u64,
    pending_queries: HashMap<RequestId, PendingQuery>,
    pending_unique: HashMap<RequestId, oneshot::Sender<BrokerResult<bool>>>,
    next_req_id: RequestId,
}

impl StoreClone {
    /// Create a clone and kick off the initial snapshot request.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        id: PublisherId,
        backend: Box<dyn Backend>,
        clock: Arc<dyn Clock>,
        core: mpsc::UnboundedSender<StoreMessage>,
        stale_threshold: Timespan,
        ack_interval: u64,
        nack_timeout: u64,
    ) -> Self {
        let name = name.into();
        let mut clone = Self {
            master_topic: Topic::master_topic(&name),
            name,
            id,
            backend,
            clock,
            consumer: Consumer::new(ack_interval, nack_timeout),
            events: EventSink::new(),
            core,
            phase: Phase::Syncing {
                marker_seen: false,
                pending_snapshot: None,
                buffered: Vec::new(),
            },
            master_node: None,
            stale_since: None,
            stale_threshold,
            ack_interval,
            nack_timeout,
            ticks_since_request: 0,
            pending_queries: HashMap::new(),
            pending_unique: HashMap::new(),
            next_req_id: 1,
        };
        clone.request_snapshot();
        clone
    }

    /// The store name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// This clone's publisher id.
    pub fn id(&self) -> PublisherId {
        self.id
    }

    /// The observer stream.
    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// Whether the clone has not reached (or lost) sync with its master.
    pub fn is_stale(&self) -> bool {
        !matches!(self.phase, Phase::Live)
    }

    /// Run the mailbox loop until shutdown.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<CloneMsg>) {
        info!(store = %self.name, id = %self.id, "clone up");
        while let Some(msg) = rx.recv().await {
            match msg {
                CloneMsg::Request(request) => self.handle_request(request),
                CloneMsg::Network(message) => self.handle_network(message),
                CloneMsg::Tick => self.tick(),
                CloneMsg::MasterDown => self.master_down(),
                CloneMsg::NodeDown(node) => {
                    if self.master_node == Some(node) {
                        self.master_node = None;
                        self.master_down();
                    }
                }
                CloneMsg::Shutdown => break,
            }
        }
        info!(store = %self.name, "clone down");
    }

    /// Dispatch one frontend request.
    pub fn handle_request(&mut self, request: StoreRequest) {
        match request {
            StoreRequest::Get { key, reply } => {
                if !self.is_stale() {
                    let _ = reply.send(self.backend.get(&key));
                } else {
                    self.forward_query(StoreQuery::Get { key }, PendingQuery::Value(reply));
                }
            }
            StoreRequest::GetAspect { key, aspect, reply } => {
                if !self.is_stale() {
                    let _ = reply.send(self.backend.get_aspect(&key, &aspect));
                } else {
                    self.forward_query(
                        StoreQuery::GetAspect { key, aspect },
                        PendingQuery::Value(reply),
                    );
                }
            }
            StoreRequest::Exists { key, reply } => {
                if !self.is_stale() {
                    let _ = reply.send(self.backend.exists(&key));
                } else {
                    self.forward_query(StoreQuery::Exists { key }, PendingQuery::Bool(reply));
                }
            }
            StoreRequest::Keys { reply } => {
                if !self.is_stale() {
                    let _ = reply.send(self.backend.keys());
                } else {
                    self.forward_query(StoreQuery::Keys, PendingQuery::Value(reply));
                }
            }
            StoreRequest::PutUnique {
                key,
                value,
                expiry,
                publisher,
                reply,
            } => {
                let req_id = self.next_req_id;
                self.next_req_id += 1;
                self.pending_unique.insert(req_id, reply);
                self.send_to_master(StorePayload::Command(Command::PutUnique {
                    key,
                    value,
                    expiry,
                    publisher,
                    who: self.id,
                    req_id,
                }));
            }
            StoreRequest::Mutate(command) => {
                // Writes through a clone take effect on the master first and
                // come back over the channel.
                self.send_to_master(StorePayload::Command(command));
            }
            StoreRequest::Idle { reply } => {
                let _ = reply.send(!self.is_stale() && self.consumer.buffer_len() == 0);
            }
            StoreRequest::Events { reply } => {
                let _ = reply.send(self.events.subscribe());
            }
        }
    }

    /// Dispatch one message from the store fabric.
    pub fn handle_network(&mut self, message: StoreMessage) {
        if matches!(message.payload, StorePayload::Producer(_)) {
            self.master_node = Some(message.sender.node);
        }
        match message.payload {
            StorePayload::Producer(ProducerMessage::Handshake { first_seq }) => {
                let mut link = CollectLink::default();
                self.consumer.handle_handshake(first_seq, &mut link);
                self.process_channel_output(link);
            }
            StorePayload::Producer(ProducerMessage::Event { seq, payload }) => {
                let mut link = CollectLink::default();
                self.consumer.handle_event(seq, payload, &mut link);
                self.process_channel_output(link);
            }
            StorePayload::Producer(ProducerMessage::RetransmitFailed { seq }) => {
                if self.consumer.handle_retransmit_failed(seq) {
                    // Fatal gap; all local data is suspect until resync.
                    warn!(store = %self.name, seq, "lost an event for good, resynchronizing");
                    self.enter_resync();
                }
            }
            StorePayload::Command(Command::Set { snapshot }) => self.handle_set(snapshot),
            StorePayload::Command(command) => {
                error!(store = %self.name, verb = command.verb(),
                       "protocol violation: direct command not accepted by clones");
            }
            StorePayload::UniqueReply { req_id, accepted } => {
                if let Some(reply) = self.pending_unique.remove(&req_id) {
                    let _ = reply.send(Ok(accepted));
                }
            }
            StorePayload::QueryReply { req_id, result } => {
                match self.pending_queries.remove(&req_id) {
                    Some(PendingQuery::Value(reply)) => {
                        let _ = reply.send(result);
                    }
                    Some(PendingQuery::Bool(reply)) => {
                        let _ = reply.send(result.map(|data| data.as_bool().unwrap_or(false)));
                    }
                    None => debug!(store = %self.name, req_id, "reply for unknown query"),
                }
            }
            StorePayload::Consumer(_) | StorePayload::Query { .. } => {
                error!(store = %self.name, "protocol violation: unexpected payload");
            }
        }
    }

    /// Periodic tick: drive the channel cadence and retry pending resyncs.
    fn tick(&mut self) {
        let mut link = CollectLink::default();
        self.consumer.tick(&mut link);
        self.process_channel_output(link);
        if self.is_stale() {
            self.ticks_since_request += 1;
            if self.ticks_since_request >= RESYNC_RETRY_TICKS {
                self.request_snapshot();
            }
        }
    }

    fn master_down(&mut self) {
        info!(store = %self.name, "master is down");
        self.enter_resync();
    }

    /// Apply channel deliveries and push replies to the master.
    fn process_channel_output(&mut self, link: CollectLink) {
        for message in link.delivered {
            self.deliver(message.command);
        }
        for reply in link.replies {
            self.send_to_master(StorePayload::Consumer(reply));
        }
    }

    /// Route one in-order command through the synchronization phase.
    fn deliver(&mut self, command: Command) {
        let own_marker = matches!(
            &command,
            Command::SnapshotSync { remote_clone } if *remote_clone == self.id
        );
        match &mut self.phase {
            Phase::Live => self.apply(command),
            Phase::Syncing {
                marker_seen,
                pending_snapshot,
                ..
            } if !*marker_seen => {
                if own_marker {
                    *marker_seen = true;
                    if let Some(snapshot) = pending_snapshot.take() {
                        self.go_live(snapshot, Vec::new());
                    }
                    return;
                }
                // Everything before our marker is covered by the snapshot.
                debug!(store = %self.name, verb = command.verb(), "discarding pre-sync command");
            }
            Phase::Syncing { buffered, .. } => buffered.push(command),
        }
    }

    /// The master shipped a snapshot.
    fn handle_set(&mut self, snapshot: StoreSnapshot) {
        match &mut self.phase {
            Phase::Syncing {
                marker_seen: true,
                buffered,
                ..
            } => {
                let replay = std::mem::take(buffered);
                self.go_live(snapshot, replay);
            }
            Phase::Syncing {
                pending_snapshot, ..
            } => {
                // The marker is still in flight on the ordered channel.
                *pending_snapshot = Some(snapshot);
            }
            Phase::Live => {
                info!(store = %self.name, "reinstalling snapshot on live clone");
                self.install(snapshot);
            }
        }
    }

    /// Install the snapshot, replay post-marker commands, and go live.
    fn go_live(&mut self, snapshot: StoreSnapshot, replay: Vec<Command>) {
        self.install(snapshot);
        self.phase = Phase::Live;
        self.stale_since = None;
        for command in replay {
            self.apply(command);
        }
        info!(store = %self.name, "clone is live");
    }

    fn install(&mut self, snapshot: StoreSnapshot) {
        if let Err(e) = self.backend.clear() {
            error!(store = %self.name, error = %e, "failed to clear backend for snapshot");
            return;
        }
        for (key, value) in snapshot {
            if let Err(e) = self.backend.put(key, value, None) {
                error!(store = %self.name, error = %e, "failed to install snapshot entry");
            }
        }
    }

    /// Apply one replicated command to the local backend.
    fn apply(&mut self, command: Command) {
        debug!(store = %self.name, verb = command.verb(), "applying replicated command");
        match command {
            Command::Put {
                key,
                value,
                expiry,
                publisher,
            } => {
                let expire_time = expiry.map(|span| self.clock.now() + span);
                let old_value = self.backend.get(&key).ok();
                if let Err(e) = self.backend.put(key.clone(), value.clone(), expire_time) {
                    warn!(store = %self.name, key = %key, error = %e, "failed to put");
                    return;
                }
                match old_value {
                    Some(old) => self.events.emit(StoreEvent::Update {
                        key,
                        old_value: old,
                        new_value: value,
                        expiry: expire_time,
                        publisher,
                    }),
                    None => self.events.emit(StoreEvent::Insert {
                        key,
                        value,
                        expiry: expire_time,
                        publisher,
                    }),
                }
            }
            Command::Erase { key, publisher } => {
                if let Err(e) = self.backend.erase(&key) {
                    warn!(store = %self.name, key = %key, error = %e, "failed to erase");
                    return;
                }
                self.events.emit(StoreEvent::Erase { key, publisher });
            }
            Command::Expire { key, publisher } => {
                // The master made the authoritative call; apply it like an
                // erase but report the expiration.
                if let Err(e) = self.backend.erase(&key) {
                    warn!(store = %self.name, key = %key, error = %e, "failed to expire");
                    return;
                }
                self.events.emit(StoreEvent::Expire { key, publisher });
            }
            Command::Clear { publisher } => {
                match self.backend.keys() {
                    Ok(Data::Vector(keys)) => {
                        for key in keys {
                            self.events.emit(StoreEvent::Erase { key, publisher });
                        }
                    }
                    Ok(Data::Set(keys)) => {
                        for key in keys {
                            self.events.emit(StoreEvent::Erase { key, publisher });
                        }
                    }
                    Ok(_) => {}
                    Err(e) => error!(store = %self.name, error = %e, "unable to obtain keys"),
                }
                if let Err(e) = self.backend.clear() {
                    error!(store = %self.name, error = %e, "failed to clear");
                }
            }
            Command::SnapshotSync { .. } => {
                // Sync point of another clone; nothing to do here.
            }
            Command::PutUnique { .. }
            | Command::Add { .. }
            | Command::Subtract { .. }
            | Command::Snapshot { .. }
            | Command::Set { .. } => {
                error!(store = %self.name, verb = command.verb(),
                       "protocol violation: command not accepted by clones");
            }
        }
    }

    /// Drop back into the syncing phase and ask for a fresh snapshot.
    fn enter_resync(&mut self) {
        if self.stale_since.is_none() {
            self.stale_since = Some(self.clock.now());
        }
        self.phase = Phase::Syncing {
            marker_seen: false,
            pending_snapshot: None,
            buffered: Vec::new(),
        };
        self.consumer = Consumer::new(self.ack_interval, self.nack_timeout);
        self.request_snapshot();
    }

    fn request_snapshot(&mut self) {
        self.ticks_since_request = 0;
        self.send_to_master(StorePayload::Command(Command::Snapshot {
            remote_clone: self.id,
        }));
    }

    /// Forward a query to the master, or fail it as stale when the master
    /// has been unreachable for too long.
    fn forward_query(&mut self, query: StoreQuery, pending: PendingQuery) {
        let too_stale = self
            .stale_since
            .map(|since| self.clock.now().since(since) > self.stale_threshold)
            .unwrap_or(false);
        if too_stale {
            let err = make_error(ErrorCode::StaleData);
            match pending {
                PendingQuery::Value(reply) => {
                    let _ = reply.send(Err(err));
                }
                PendingQuery::Bool(reply) => {
                    let _ = reply.send(Err(err));
                }
            }
            return;
        }
        let req_id = self.next_req_id;
        self.next_req_id += 1;
        self.pending_queries.insert(req_id, pending);
        self.send_to_master(StorePayload::Query { req_id, query });
    }

    fn send_to_master(&self, payload: StorePayload) {
        let _ = self.core.send(StoreMessage {
            topic: self.master_topic.clone(),
            sender: self.id,
            receiver: None,
            payload,
        });
    }
}

impl std::fmt::Debug for StoreClone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreClone")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("stale", &self.is_stale())
            .finish()
    }
}
