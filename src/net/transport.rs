//! Wire frames between peered endpoints.
//!
//! Every frame is a 4-byte little-endian length followed by the
//! bincode-encoded [`NodeMessage`]. The first frame in each direction must
//! be the hello; everything after carries routed traffic.

use crate::core::id::NodeId;
use crate::data::DataMessage;
use crate::store::StoreMessage;
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Marker at the start of every hello.
pub const MAGIC: u32 = 0x4252_4f4b;

/// Version of the wire protocol.
pub const WIRE_VERSION: u32 = 1;

/// Frames above this size are treated as protocol errors.
const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

bitflags::bitflags! {
    /// Capabilities announced in the hello.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct PeerFlags: u32 {
        /// The endpoint forwards messages between its peers.
        const FORWARDING = 0b0000_0001;
        /// The endpoint routes store traffic.
        const STORE_SYNC = 0b0000_0010;
    }
}

/// First frame exchanged on a fresh connection, in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub magic: u32,
    pub version: u32,
    pub node: NodeId,
    pub flags: PeerFlags,
}

impl Hello {
    pub fn new(node: NodeId, flags: PeerFlags) -> Self {
        Self {
            magic: MAGIC,
            version: WIRE_VERSION,
            node,
            flags,
        }
    }

    /// Whether the remote speaks a protocol we understand.
    pub fn compatible(&self) -> bool {
        self.magic == MAGIC && self.version == WIRE_VERSION
    }
}

/// A routed message between endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeMessage {
    /// Connection setup.
    Hello(Hello),
    /// A published value. `ttl` counts remaining hops; `dst` restricts
    /// delivery to one endpoint.
    Data {
        message: DataMessage,
        ttl: u32,
        dst: Option<NodeId>,
    },
    /// Store-fabric traffic.
    Store { message: StoreMessage, ttl: u32 },
    /// Orderly goodbye before closing the connection.
    Bye,
}

/// Write one frame.
pub async fn write_frame<W>(writer: &mut W, message: &NodeMessage) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = bincode::serialize(message)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await
}

/// Read one frame.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<NodeMessage>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit", len),
        ));
    }
    let mut payload = BytesMut::zeroed(len);
    reader.read_exact(&mut payload).await?;
    bincode::deserialize(&payload)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
