//! Peering transport: wire frames, TLS material, and connection tasks.

pub mod listeners;
pub mod tls;
pub mod transport;

pub use tls::TlsSettings;
pub use transport::{Hello, NodeMessage, PeerFlags, MAGIC, WIRE_VERSION};
