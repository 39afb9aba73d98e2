//! The data model: values, addresses, topics, and the message envelope.

pub mod address;
pub mod envelope;
pub mod topic;
pub mod value;

pub use address::{Address, AddressFamily, ByteOrder, Port, Protocol, Subnet};
pub use topic::Topic;
pub use value::{Data, DataType, EnumValue, Set, Table, Vector};

/// A routed value: the payload of `publish` and the unit a subscriber
/// receives.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize, Default,
)]
pub struct DataMessage {
    /// Routing topic.
    pub topic: Topic,
    /// Carried value.
    pub data: Data,
}

impl DataMessage {
    pub fn new(topic: impl Into<Topic>, data: impl Into<Data>) -> Self {
        Self {
            topic: topic.into(),
            data: data.into(),
        }
    }
}

impl std::fmt::Display for DataMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.topic, self.data)
    }
}
