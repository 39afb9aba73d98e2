//! Master state machine.
//!
//! The master owns one backend, consumes a totally-ordered command stream,
//! and fans every applied command out to its clones over the reliable
//! channel. Commands arriving from clones and commands injected locally
//! interleave in mailbox arrival order; whatever order the master applies
//! is the order every clone sees.

use super::backend::Backend;
use super::command::{Command, CommandMessage, PublisherId, RequestId};
use super::events::{EventSink, StoreEvent};
use super::{StoreMessage, StorePayload, StoreQuery, StoreRequest};
use crate::channel::{ConsumerMessage, Producer, ProducerLink, ProducerMessage};
use crate::core::error::BrokerResult;
use crate::core::time::{Clock, Timespan, Timestamp};
use crate::data::{Data, Topic};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Mailbox messages of a master task.
#[derive(Debug)]
pub enum MasterMsg {
    /// A request from the local frontend.
    Request(StoreRequest),
    /// A message from the store fabric (clones, remote frontends).
    Network(StoreMessage),
    /// A scheduled expiration reminder came due.
    Expire { key: Data },
    /// A clone's path is gone; drop it without state change.
    CloneDown(PublisherId),
    /// An endpoint became unreachable; drop every path leading there.
    NodeDown(crate::core::id::NodeId),
    /// Drain and exit.
    Shutdown,
}

/// Transmits channel messages to clones through the store fabric.
struct CloneLink<'a> {
    core: &'a mpsc::UnboundedSender<StoreMessage>,
    topic: &'a Topic,
    sender: PublisherId,
}

impl ProducerLink<PublisherId, CommandMessage> for CloneLink<'_> {
    fn transmit(&mut self, to: &PublisherId, msg: ProducerMessage<CommandMessage>) {
        let _ = self.core.send(StoreMessage {
            topic: self.topic.clone(),
            sender: self.sender,
            receiver: Some(*to),
            payload: StorePayload::Producer(msg),
        });
    }
}

/// The master side of a replicated store.
pub struct Master {
    name: String,
    id: PublisherId,
    clones_topic: Topic,
    backend: Box<dyn Backend>,
    clock: Arc<dyn Clock>,
    producer: Producer<PublisherId, CommandMessage>,
    events: EventSink,
    /// Outgoing route into the store fabric.
    core: mpsc::UnboundedSender<StoreMessage>,
    /// Loops timer reminders back into the own mailbox.
    self_tx: mpsc::UnboundedSender<MasterMsg>,
    /// Pending local `put_unique` requests by request id.
    pending_unique: HashMap<RequestId, oneshot::Sender<BrokerResult<bool>>>,
    next_req_id: RequestId,
}

impl Master {
    /// Create a master and arm reminders for expiries persisted in the
    /// backend.
    ///
    /// Failing to read the pending expiries during initialization is fatal.
    pub fn new(
        name: impl Into<String>,
        id: PublisherId,
        backend: Box<dyn Backend>,
        clock: Arc<dyn Clock>,
        core: mpsc::UnboundedSender<StoreMessage>,
        self_tx: mpsc::UnboundedSender<MasterMsg>,
    ) -> BrokerResult<Self> {
        let name = name.into();
        let master = Self {
            clones_topic: Topic::clone_topic(&name),
            name,
            id,
            backend,
            clock,
            producer: Producer::new(),
            events: EventSink::new(),
            core,
            self_tx,
            pending_unique: HashMap::new(),
            next_req_id: 1,
        };
        let expiries = master.backend.expiries().map_err(|e| {
            e.with_message("failed to read expiries while initializing master")
        })?;
        let now = master.clock.now();
        for (key, expire_time) in expiries {
            master.remind(expire_time.since(now), key);
        }
        Ok(master)
    }

    /// The store name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// This master's publisher id.
    pub fn id(&self) -> PublisherId {
        self.id
    }

    /// The observer stream.
    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// Number of attached clones.
    pub fn clone_count(&self) -> usize {
        self.producer.paths().len()
    }

    /// Whether all clones acknowledged all broadcast commands.
    pub fn idle(&self) -> bool {
        self.producer.idle()
    }

    /// Run the mailbox loop until shutdown or a fatal error.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<MasterMsg>) {
        info!(store = %self.name, id = %self.id, "master up");
        while let Some(msg) = rx.recv().await {
            let result = match msg {
                MasterMsg::Request(request) => self.handle_request(request),
                MasterMsg::Network(message) => self.handle_network(message),
                MasterMsg::Expire { key } => self.expire(key),
                MasterMsg::CloneDown(clone) => {
                    info!(store = %self.name, %clone, "lost a clone");
                    self.producer.remove(&clone);
                    Ok(())
                }
                MasterMsg::NodeDown(node) => {
                    let gone: Vec<PublisherId> = self
                        .producer
                        .paths()
                        .iter()
                        .filter(|p| p.handle.node == node)
                        .map(|p| p.handle)
                        .collect();
                    for clone in gone {
                        info!(store = %self.name, %clone, "lost a clone");
                        self.producer.remove(&clone);
                    }
                    Ok(())
                }
                MasterMsg::Shutdown => break,
            };
            if let Err(e) = result {
                error!(store = %self.name, error = %e, "fatal master error");
                break;
            }
        }
        info!(store = %self.name, "master down");
    }

    /// Dispatch one frontend request.
    pub fn handle_request(&mut self, request: StoreRequest) -> BrokerResult<()> {
        match request {
            StoreRequest::Get { key, reply } => {
                let _ = reply.send(self.backend.get(&key));
            }
            StoreRequest::GetAspect { key, aspect, reply } => {
                let _ = reply.send(self.backend.get_aspect(&key, &aspect));
            }
            StoreRequest::Exists { key, reply } => {
                let _ = reply.send(self.backend.exists(&key));
            }
            StoreRequest::Keys { reply } => {
                let _ = reply.send(self.backend.keys());
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
                return self.apply(Command::PutUnique {
                    key,
                    value,
                    expiry,
                    publisher,
                    who: self.id,
                    req_id,
                });
            }
            StoreRequest::Mutate(command) => return self.apply(command),
            StoreRequest::Idle { reply } => {
                let _ = reply.send(self.producer.idle());
            }
            StoreRequest::Events { reply } => {
                let _ = reply.send(self.events.subscribe());
            }
        }
        Ok(())
    }

    /// Dispatch one message from the store fabric.
    pub fn handle_network(&mut self, message: StoreMessage) -> BrokerResult<()> {
        let sender = message.sender;
        match message.payload {
            StorePayload::Command(command) => self.apply(command)?,
            StorePayload::Consumer(ConsumerMessage::CumulativeAck { seq }) => {
                self.producer.handle_ack(&sender, seq);
            }
            StorePayload::Consumer(ConsumerMessage::Nack { seqs }) => {
                let mut link = CloneLink {
                    core: &self.core,
                    topic: &self.clones_topic,
                    sender: self.id,
                };
                self.producer.handle_nack(&sender, &seqs, &mut link);
            }
            StorePayload::Query { req_id, query } => {
                let result = self.answer_query(query);
                let _ = self.core.send(StoreMessage {
                    topic: self.clones_topic.clone(),
                    sender: self.id,
                    receiver: Some(sender),
                    payload: StorePayload::QueryReply { req_id, result },
                });
            }
            StorePayload::Producer(_)
            | StorePayload::UniqueReply { .. }
            | StorePayload::QueryReply { .. } => {
                error!(store = %self.name, %sender, "protocol violation: unexpected payload");
            }
        }
        Ok(())
    }

    fn answer_query(&self, query: StoreQuery) -> BrokerResult<Data> {
        match query {
            StoreQuery::Get { key } => self.backend.get(&key),
            StoreQuery::GetAspect { key, aspect } => self.backend.get_aspect(&key, &aspect),
            StoreQuery::Exists { key } => self.backend.exists(&key).map(Data::Bool),
            StoreQuery::Keys => self.backend.keys(),
        }
    }

    /// Apply one command. Errors returned from here terminate the master.
    pub fn apply(&mut self, command: Command) -> BrokerResult<()> {
        debug!(store = %self.name, verb = command.verb(), "applying command");
        match command {
            Command::Put {
                key,
                value,
                expiry,
                publisher,
            } => self.put(key, value, expiry, publisher),
            Command::PutUnique {
                key,
                value,
                expiry,
                publisher,
                who,
                req_id,
            } => self.put_unique(key, value, expiry, publisher, who, req_id),
            Command::Erase { key, publisher } => self.erase(key, publisher),
            Command::Add {
                key,
                value,
                init_type,
                expiry,
                publisher,
            } => self.add(key, value, init_type, expiry, publisher),
            Command::Subtract {
                key,
                value,
                expiry,
                publisher,
            } => self.subtract(key, value, expiry, publisher),
            Command::Clear { publisher } => self.clear(publisher),
            Command::Snapshot { remote_clone } => self.snapshot(remote_clone),
            Command::Expire { .. } | Command::SnapshotSync { .. } | Command::Set { .. } => {
                error!(store = %self.name, verb = command.verb(),
                       "protocol violation: command not accepted by masters");
                Ok(())
            }
        }
    }

    fn put(
        &mut self,
        key: Data,
        value: Data,
        expiry: Option<Timespan>,
        publisher: PublisherId,
    ) -> BrokerResult<()> {
        let expire_time = self.to_expire_time(expiry);
        let old_value = self.backend.get(&key).ok();
        if let Err(e) = self.backend.put(key.clone(), value.clone(), expire_time) {
            warn!(store = %self.name, key = %key, error = %e, "failed to put");
            return Ok(());
        }
        if let Some(span) = expiry {
            self.remind(span, key.clone());
        }
        match old_value {
            Some(old) => self.events.emit(StoreEvent::Update {
                key: key.clone(),
                old_value: old,
                new_value: value.clone(),
                expiry: expire_time,
                publisher,
            }),
            None => self.events.emit(StoreEvent::Insert {
                key: key.clone(),
                value: value.clone(),
                expiry: expire_time,
                publisher,
            }),
        }
        self.broadcast(Command::Put {
            key,
            value,
            expiry,
            publisher,
        });
        Ok(())
    }

    fn put_unique(
        &mut self,
        key: Data,
        value: Data,
        expiry: Option<Timespan>,
        publisher: PublisherId,
        who: PublisherId,
        req_id: RequestId,
    ) -> BrokerResult<()> {
        if self.exists(&key) {
            // No change took place, so clones don't hear about this one.
            self.reply_unique(who, req_id, false);
            return Ok(());
        }
        let expire_time = self.to_expire_time(expiry);
        if let Err(e) = self.backend.put(key.clone(), value.clone(), expire_time) {
            warn!(store = %self.name, key = %key, error = %e, "failed to put_unique");
            self.reply_unique(who, req_id, false);
            return Ok(());
        }
        self.reply_unique(who, req_id, true);
        if let Some(span) = expiry {
            self.remind(span, key.clone());
        }
        self.events.emit(StoreEvent::Insert {
            key: key.clone(),
            value: value.clone(),
            expiry: expire_time,
            publisher,
        });
        // Clones receive a plain put; they don't repeat the existence check.
        self.broadcast(Command::Put {
            key,
            value,
            expiry,
            publisher,
        });
        Ok(())
    }

    fn erase(&mut self, key: Data, publisher: PublisherId) -> BrokerResult<()> {
        if let Err(e) = self.backend.erase(&key) {
            warn!(store = %self.name, key = %key, error = %e, "failed to erase");
            return Ok(());
        }
        self.events.emit(StoreEvent::Erase {
            key: key.clone(),
            publisher,
        });
        self.broadcast(Command::Erase { key, publisher });
        Ok(())
    }

    fn add(
        &mut self,
        key: Data,
        value: Data,
        init_type: crate::data::DataType,
        expiry: Option<Timespan>,
        publisher: PublisherId,
    ) -> BrokerResult<()> {
        let old_value = self.backend.get(&key).ok();
        let expire_time = self.to_expire_time(expiry);
        if let Err(e) = self.backend.add(&key, &value, init_type, expire_time) {
            warn!(store = %self.name, key = %key, error = %e, "failed to add");
            return Ok(());
        }
        let new_value = match self.backend.get(&key) {
            Ok(value) => value,
            Err(e) => {
                error!(store = %self.name, key = %key, error = %e,
                       "failed to get value after successful add");
                return Ok(());
            }
        };
        if let Some(span) = expiry {
            self.remind(span, key.clone());
        }
        match old_value {
            Some(old) => self.events.emit(StoreEvent::Update {
                key: key.clone(),
                old_value: old,
                new_value: new_value.clone(),
                expiry: expire_time,
                publisher,
            }),
            None => self.events.emit(StoreEvent::Insert {
                key: key.clone(),
                value: new_value.clone(),
                expiry: expire_time,
                publisher,
            }),
        }
        // Clones receive the result as a plain put without expiry; they
        // don't repeat the arithmetic.
        self.broadcast(Command::Put {
            key,
            value: new_value,
            expiry: None,
            publisher,
        });
        Ok(())
    }

    fn subtract(
        &mut self,
        key: Data,
        value: Data,
        expiry: Option<Timespan>,
        publisher: PublisherId,
    ) -> BrokerResult<()> {
        let Some(old_value) = self.backend.get(&key).ok() else {
            // Unlike add, subtract requires the key to exist.
            warn!(store = %self.name, key = %key, "cannot subtract from non-existing value");
            return Ok(());
        };
        let expire_time = self.to_expire_time(expiry);
        if let Err(e) = self.backend.subtract(&key, &value, expire_time) {
            warn!(store = %self.name, key = %key, error = %e, "failed to subtract");
            return Ok(());
        }
        let new_value = match self.backend.get(&key) {
            Ok(value) => value,
            Err(e) => {
                error!(store = %self.name, key = %key, error = %e,
                       "failed to get value after successful subtract");
                return Ok(());
            }
        };
        if let Some(span) = expiry {
            self.remind(span, key.clone());
        }
        self.events.emit(StoreEvent::Update {
            key: key.clone(),
            old_value,
            new_value: new_value.clone(),
            expiry: expire_time,
            publisher,
        });
        self.broadcast(Command::Put {
            key,
            value: new_value,
            expiry: None,
            publisher,
        });
        Ok(())
    }

    fn clear(&mut self, publisher: PublisherId) -> BrokerResult<()> {
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
            Ok(Data::None) => {}
            Ok(_) => {
                error!(store = %self.name, "backend keys() returned an unexpected type");
            }
            Err(e) => {
                error!(store = %self.name, error = %e, "unable to obtain keys");
                return Ok(());
            }
        }
        self.backend
            .clear()
            .map_err(|e| e.with_message("failed to clear master"))?;
        self.broadcast(Command::Clear { publisher });
        Ok(())
    }

    /// A scheduled expiration reminder fired.
    fn expire(&mut self, key: Data) -> BrokerResult<()> {
        info!(store = %self.name, key = %key, "EXPIRE");
        match self.backend.expire(&key, self.clock.now()) {
            Err(e) => {
                error!(store = %self.name, key = %key, error = %e, "expire failed");
            }
            Ok(false) => {
                // The key is gone or was re-armed with a later expiry.
                debug!(store = %self.name, key = %key, "stale expiration reminder");
            }
            Ok(true) => {
                let publisher = self.id;
                self.events.emit(StoreEvent::Expire {
                    key: key.clone(),
                    publisher,
                });
                self.broadcast(Command::Expire { key, publisher });
            }
        }
        Ok(())
    }

    /// A clone requests attachment: register its path, mark the sync point
    /// on the ordered channel, then ship the snapshot directly.
    fn snapshot(&mut self, remote_clone: PublisherId) -> BrokerResult<()> {
        info!(store = %self.name, clone = %remote_clone, "SNAPSHOT");
        let snapshot = self
            .backend
            .snapshot()
            .map_err(|e| e.with_message("failed to snapshot master"))?;
        let mut link = CloneLink {
            core: &self.core,
            topic: &self.clones_topic,
            sender: self.id,
        };
        // A reconnecting clone starts over with a fresh path.
        self.producer.remove(&remote_clone);
        let _ = self.producer.add(remote_clone, &mut link);
        // The snapshot travels outside the ordered channel, so clones need
        // the sync point to discard updates the snapshot already covers.
        self.broadcast(Command::SnapshotSync { remote_clone });
        let _ = self.core.send(StoreMessage {
            topic: self.clones_topic.clone(),
            sender: self.id,
            receiver: Some(remote_clone),
            payload: StorePayload::Command(Command::Set { snapshot }),
        });
        Ok(())
    }

    fn exists(&self, key: &Data) -> bool {
        self.backend.exists(key).unwrap_or(false)
    }

    /// Fan one command out to all clones over the ordered channel.
    fn broadcast(&mut self, command: Command) {
        let message = CommandMessage::new(self.clones_topic.clone(), command);
        let mut link = CloneLink {
            core: &self.core,
            topic: &self.clones_topic,
            sender: self.id,
        };
        self.producer.produce(message, &mut link);
    }

    fn reply_unique(&mut self, who: PublisherId, req_id: RequestId, accepted: bool) {
        if who == self.id {
            if let Some(reply) = self.pending_unique.remove(&req_id) {
                let _ = reply.send(Ok(accepted));
            }
            return;
        }
        let _ = self.core.send(StoreMessage {
            topic: self.clones_topic.clone(),
            sender: self.id,
            receiver: Some(who),
            payload: StorePayload::UniqueReply { req_id, accepted },
        });
    }

    /// Schedule an expiration reminder for `key` after `span`.
    fn remind(&self, span: Timespan, key: Data) {
        let tx = self.self_tx.clone();
        self.clock.send_later(
            span,
            Box::new(move || {
                let _ = tx.send(MasterMsg::Expire { key });
            }),
        );
    }

    fn to_expire_time(&self, expiry: Option<Timespan>) -> Option<Timestamp> {
        expiry.map(|span| self.clock.now() + span)
    }
}

impl std::fmt::Debug for Master {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Master")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("clones", &self.producer.paths().len())
            .finish()
    }
}
