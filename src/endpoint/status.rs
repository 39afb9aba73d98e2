//! Peering statuses reported to status subscribers.

use crate::core::error::BrokerError;
use crate::core::id::EndpointInfo;
use serde::{Deserialize, Serialize};

/// Lifecycle notifications about peerings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    /// The endpoint is up and reachable.
    EndpointDiscovered,
    /// A peering was established.
    PeerAdded,
    /// A peering was closed deliberately.
    PeerRemoved,
    /// A peering broke down.
    PeerLost,
}

impl StatusCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EndpointDiscovered => "endpoint_discovered",
            Self::PeerAdded => "peer_added",
            Self::PeerRemoved => "peer_removed",
            Self::PeerLost => "peer_lost",
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status notification with endpoint context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// What happened.
    pub code: StatusCode,
    /// Which peer it happened to.
    pub endpoint: EndpointInfo,
    /// Free-form detail.
    pub message: Option<String>,
}

impl Status {
    pub fn new(code: StatusCode, endpoint: EndpointInfo) -> Self {
        Self {
            code,
            endpoint,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.endpoint)
    }
}

/// What a status subscriber receives: errors always, statuses on request.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusMessage {
    Status(Status),
    Error(BrokerError),
}
