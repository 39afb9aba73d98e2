//! Frontend handle for masters and clones.
//!
//! A [`Store`] is a cheap handle the endpoint hands out from
//! `attach_master` and `attach_clone`. Queries run as request/reply against
//! the store task with a timeout; mutations are fire-and-forget commands
//! stamped with the frontend's publisher id.

use super::clone::CloneMsg;
use super::command::{Command, PublisherId};
use super::events::StoreEvent;
use super::master::MasterMsg;
use super::StoreRequest;
use crate::core::error::{make_error, BrokerResult, ErrorCode};
use crate::core::time::Timespan;
use crate::data::{Data, DataType};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Route from a frontend to its store task.
#[derive(Debug, Clone)]
pub(crate) enum StoreTaskSender {
    Master(mpsc::UnboundedSender<MasterMsg>),
    Clone(mpsc::UnboundedSender<CloneMsg>),
}

impl StoreTaskSender {
    fn send(&self, request: StoreRequest) -> bool {
        match self {
            Self::Master(tx) => tx.send(MasterMsg::Request(request)).is_ok(),
            Self::Clone(tx) => tx.send(CloneMsg::Request(request)).is_ok(),
        }
    }
}

/// Handle to a master or clone data store.
#[derive(Debug, Clone)]
pub struct Store {
    name: String,
    publisher: PublisherId,
    task: StoreTaskSender,
    request_timeout: Duration,
}

impl Store {
    pub(crate) fn new(
        name: impl Into<String>,
        publisher: PublisherId,
        task: StoreTaskSender,
        request_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            publisher,
            task,
            request_timeout,
        }
    }

    /// The store name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read the value under `key`.
    pub async fn get(&self, key: impl Into<Data>) -> BrokerResult<Data> {
        let (reply, rx) = oneshot::channel();
        self.request(StoreRequest::Get {
            key: key.into(),
            reply,
        })?;
        self.await_reply(rx).await
    }

    /// Read an aspect of the value under `key` (set membership, table
    /// lookup, vector index).
    pub async fn get_aspect(
        &self,
        key: impl Into<Data>,
        aspect: impl Into<Data>,
    ) -> BrokerResult<Data> {
        let (reply, rx) = oneshot::channel();
        self.request(StoreRequest::GetAspect {
            key: key.into(),
            aspect: aspect.into(),
            reply,
        })?;
        self.await_reply(rx).await
    }

    /// Whether `key` exists.
    pub async fn exists(&self, key: impl Into<Data>) -> BrokerResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.request(StoreRequest::Exists {
            key: key.into(),
            reply,
        })?;
        self.await_reply(rx).await
    }

    /// All keys of the store.
    pub async fn keys(&self) -> BrokerResult<Data> {
        let (reply, rx) = oneshot::channel();
        self.request(StoreRequest::Keys { reply })?;
        self.await_reply(rx).await
    }

    /// Write a value, optionally expiring after `expiry`.
    pub fn put(
        &self,
        key: impl Into<Data>,
        value: impl Into<Data>,
        expiry: Option<Timespan>,
    ) -> BrokerResult<()> {
        self.request(StoreRequest::Mutate(Command::Put {
            key: key.into(),
            value: value.into(),
            expiry,
            publisher: self.publisher,
        }))
    }

    /// Write a value only if the key does not exist yet. Resolves to true
    /// when this request won.
    pub async fn put_unique(
        &self,
        key: impl Into<Data>,
        value: impl Into<Data>,
        expiry: Option<Timespan>,
    ) -> BrokerResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.request(StoreRequest::PutUnique {
            key: key.into(),
            value: value.into(),
            expiry,
            publisher: self.publisher,
            reply,
        })?;
        self.await_reply(rx).await
    }

    /// Remove a key.
    pub fn erase(&self, key: impl Into<Data>) -> BrokerResult<()> {
        self.request(StoreRequest::Mutate(Command::Erase {
            key: key.into(),
            publisher: self.publisher,
        }))
    }

    /// Add to the value under `key`, initializing an absent key with the
    /// additive identity of `init_type`.
    pub fn add(
        &self,
        key: impl Into<Data>,
        value: impl Into<Data>,
        init_type: DataType,
        expiry: Option<Timespan>,
    ) -> BrokerResult<()> {
        self.request(StoreRequest::Mutate(Command::Add {
            key: key.into(),
            value: value.into(),
            init_type,
            expiry,
            publisher: self.publisher,
        }))
    }

    /// Subtract from the value under `key`.
    pub fn subtract(
        &self,
        key: impl Into<Data>,
        value: impl Into<Data>,
        expiry: Option<Timespan>,
    ) -> BrokerResult<()> {
        self.request(StoreRequest::Mutate(Command::Subtract {
            key: key.into(),
            value: value.into(),
            expiry,
            publisher: self.publisher,
        }))
    }

    /// Remove all keys.
    pub fn clear(&self) -> BrokerResult<()> {
        self.request(StoreRequest::Mutate(Command::Clear {
            publisher: self.publisher,
        }))
    }

    /// Whether the store settled: every broadcast command acknowledged (on
    /// a master), or everything delivered in order (on a clone).
    pub async fn idle(&self) -> BrokerResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.request(StoreRequest::Idle { reply })?;
        rx.await
            .map_err(|_| make_error(ErrorCode::Unspecified))
    }

    /// Wait until the store settles or `timeout` elapses.
    pub async fn await_idle(&self, timeout: Duration) -> BrokerResult<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.idle().await? {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Attach an observer to the store-event stream.
    pub async fn events(&self) -> BrokerResult<broadcast::Receiver<StoreEvent>> {
        let (reply, rx) = oneshot::channel();
        self.request(StoreRequest::Events { reply })?;
        rx.await
            .map_err(|_| make_error(ErrorCode::Unspecified))
    }

    fn request(&self, request: StoreRequest) -> BrokerResult<()> {
        if self.task.send(request) {
            Ok(())
        } else {
            Err(make_error(ErrorCode::NoSuchMaster)
                .with_message("store task is gone"))
        }
    }

    async fn await_reply<T>(&self, rx: oneshot::Receiver<BrokerResult<T>>) -> BrokerResult<T> {
        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(make_error(ErrorCode::Unspecified)
                .with_message("store task dropped the request")),
            Err(_) => Err(make_error(ErrorCode::RequestTimeout)),
        }
    }
}
