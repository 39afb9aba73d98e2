//! Core building blocks: configuration, errors, identity, and time.

pub mod config;
pub mod error;
pub mod id;
pub mod time;

pub use config::{BrokerOptions, Config};
pub use error::{BrokerError, BrokerResult, ErrorCode};
pub use id::{EndpointInfo, NetworkInfo, NodeId};
pub use time::{Clock, RealClock, SimClock, Timespan, Timestamp};
