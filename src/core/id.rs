//! Node and endpoint identity.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one endpoint process in the overlay.
///
/// Node ids are drawn once per endpoint at startup and stamped onto every
/// mutating store command (as half of the publisher id), so observers can
/// attribute changes to their origin.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct NodeId(u64);

impl NodeId {
    /// The invalid/unknown node.
    pub const NIL: NodeId = NodeId(0);

    /// Create a node id from a raw value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value of this id.
    pub const fn as_raw(self) -> u64 {
        self.0
    }

    /// Generate a fresh id.
    ///
    /// Mixes the wall clock, the process id, and a process-local counter, so
    /// concurrently started endpoints on one host get distinct ids.
    pub fn generate() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let pid = std::process::id() as u64;
        let count = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut state = nanos ^ (pid << 32) ^ count;
        // splitmix64 finalizer
        state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        state = (state ^ (state >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        state = (state ^ (state >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        state ^= state >> 31;
        if state == 0 {
            state = 1;
        }
        Self(state)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node-{:016x}", self.0)
    }
}

/// Network-level coordinates of a peer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NetworkInfo {
    /// Hostname or IP presentation.
    pub address: String,
    /// TCP port.
    pub port: u16,
}

impl NetworkInfo {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl std::fmt::Display for NetworkInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Identifies an endpoint, optionally with its network coordinates.
///
/// Attached to errors and statuses so receivers can tell which peer an event
/// refers to. The network half is absent for endpoints we only know
/// in-process.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct EndpointInfo {
    /// The peer's node id, if known.
    pub node: NodeId,
    /// The peer's network address, if known.
    pub network: Option<NetworkInfo>,
}

impl EndpointInfo {
    /// Endpoint known only by node id.
    pub fn from_node(node: NodeId) -> Self {
        Self {
            node,
            network: None,
        }
    }

    /// Endpoint known by node id and address.
    pub fn new(node: NodeId, network: NetworkInfo) -> Self {
        Self {
            node,
            network: Some(network),
        }
    }
}

impl std::fmt::Display for EndpointInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.network {
            Some(net) => write!(f, "{} ({})", self.node, net),
            None => write!(f, "{}", self.node),
        }
    }
}
