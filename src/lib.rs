//! Broker - embeddable publish/subscribe communication layer with
//! replicated key/value stores.
//!
//! Endpoints form a peer-to-peer overlay; publishers emit topic-tagged
//! values and subscribers receive every value whose topic is a
//! segment-boundary prefix match of one of their subscriptions. On top of
//! that substrate, *masters* host authoritative key/value stores and
//! *clones* maintain eventually-consistent replicas, synchronized over a
//! per-sender reliable ordered channel.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Application                               │
//! │   publishers │ subscribers │ store frontends │ store events     │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Endpoint Core                             │
//! │        topic routing │ store fabric │ status reporting          │
//! └─────────────────────────────────────────────────────────────────┘
//!                │                               │
//! ┌──────────────────────────────┐ ┌──────────────────────────────┐
//! │       Data Stores            │ │         Peering              │
//! │  master │ clones │ backends  │ │  TCP/TLS │ framed messages   │
//! │  reliable ordered channel    │ │  hello │ forwarding │ TTL    │
//! └──────────────────────────────┘ └──────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! - [`core`] - configuration, errors, identity, clocks
//! - [`data`] - the generic value type, addresses, topics, envelopes
//! - [`channel`] - reliable ordered transport over unordered substrates
//! - [`store`] - master/clone state machines and storage backends
//! - [`endpoint`] - the peering node and its frontends
//! - [`net`] - wire frames, TLS material, connection tasks
//! - [`ops`] - logging and metrics
//!
//! # Example
//!
//! ```no_run
//! use broker::core::config::BrokerOptions;
//! use broker::endpoint::{BackendType, Endpoint};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let options = BrokerOptions {
//!     disable_ssl: true,
//!     ..Default::default()
//! };
//! let endpoint = Endpoint::new(options)?;
//! let port = endpoint.listen("127.0.0.1", 0).await?;
//! println!("listening on {port}");
//!
//! let store = endpoint.attach_master("journal", BackendType::Memory, Default::default())?;
//! store.put("answer", 42u64, None)?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod cli;
pub mod core;
pub mod data;
pub mod endpoint;
pub mod net;
pub mod ops;
pub mod store;

pub use crate::core::config::BrokerOptions;
pub use crate::core::error::{BrokerError, BrokerResult, ErrorCode};
pub use crate::core::id::NodeId;
pub use crate::core::time::{Timespan, Timestamp};
pub use crate::data::{Data, DataMessage, Topic};
pub use crate::endpoint::{BackendType, Endpoint, Publisher, StatusSubscriber, Subscriber};
pub use crate::store::{Store, StoreEvent};
