//! Application-level message envelope.
//!
//! The layer above the pub/sub substrate wraps its messages into a generic
//! value of the form `[ProtocolVersion, kind, content]`, where `kind` picks
//! one of the message classes below. Decoding validates both the version
//! and the kind tag.

use crate::core::error::{make_error_msg, BrokerError, BrokerResult, ErrorCode};
use crate::data::{Data, Vector};

/// Version of the envelope layout.
pub const PROTOCOL_VERSION: u64 = 1;

/// Message classes of the application layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Event = 1,
    LogCreate = 2,
    LogWrite = 3,
    IdentifierUpdate = 4,
    Batch = 5,
    RelayEvent = 6,
}

impl MessageKind {
    /// Decode a kind from its wire tag.
    pub fn from_tag(tag: u64) -> Option<Self> {
        match tag {
            1 => Some(Self::Event),
            2 => Some(Self::LogCreate),
            3 => Some(Self::LogWrite),
            4 => Some(Self::IdentifierUpdate),
            5 => Some(Self::Batch),
            6 => Some(Self::RelayEvent),
            _ => None,
        }
    }

    /// The wire tag of this kind.
    pub const fn tag(self) -> u64 {
        self as u64
    }
}

/// A decoded envelope: kind plus untyped content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Message class.
    pub kind: MessageKind,
    /// Class-specific content.
    pub content: Data,
}

impl Envelope {
    /// Wrap content into the `[version, kind, content]` form.
    pub fn encode(kind: MessageKind, content: Data) -> Data {
        Data::Vector(vec![
            Data::Count(PROTOCOL_VERSION),
            Data::Count(kind.tag()),
            content,
        ])
    }

    /// Decode an envelope, validating version and kind.
    pub fn decode(data: &Data) -> BrokerResult<Self> {
        let fields = data
            .as_vector()
            .ok_or_else(|| invalid("envelope is not a vector"))?;
        if fields.len() != 3 {
            return Err(invalid("envelope must have three fields"));
        }
        match fields[0].as_count() {
            Some(PROTOCOL_VERSION) => {}
            _ => return Err(invalid("unsupported protocol version")),
        }
        let tag = fields[1]
            .as_count()
            .ok_or_else(|| invalid("envelope kind is not a count"))?;
        let kind = MessageKind::from_tag(tag)
            .ok_or_else(|| make_error_msg(ErrorCode::InvalidTag, format!("unknown kind {}", tag)))?;
        Ok(Self {
            kind,
            content: fields[2].clone(),
        })
    }
}

/// A named event with positional arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Event name.
    pub name: String,
    /// Event arguments.
    pub args: Vector,
}

impl Event {
    pub fn new(name: impl Into<String>, args: Vector) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Encode this event into envelope form.
    pub fn to_data(&self) -> Data {
        Envelope::encode(
            MessageKind::Event,
            Data::Vector(vec![
                Data::Str(self.name.clone()),
                Data::Vector(self.args.clone()),
            ]),
        )
    }

    /// Decode an event from envelope form.
    pub fn from_data(data: &Data) -> BrokerResult<Self> {
        let envelope = Envelope::decode(data)?;
        if envelope.kind != MessageKind::Event {
            return Err(invalid("not an event message"));
        }
        let fields = envelope
            .content
            .as_vector()
            .ok_or_else(|| invalid("event content is not a vector"))?;
        if fields.len() != 2 {
            return Err(invalid("event content must be [name, args]"));
        }
        let name = fields[0]
            .as_str()
            .ok_or_else(|| invalid("event name is not a string"))?;
        let args = fields[1]
            .as_vector()
            .ok_or_else(|| invalid("event args are not a vector"))?;
        Ok(Self::new(name, args.clone()))
    }
}

/// A batch of envelope-encoded messages delivered as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Batch {
    /// The contained messages, each in envelope form.
    pub messages: Vector,
}

impl Batch {
    pub fn new(messages: Vector) -> Self {
        Self { messages }
    }

    /// Encode this batch into envelope form.
    pub fn to_data(&self) -> Data {
        Envelope::encode(MessageKind::Batch, Data::Vector(self.messages.clone()))
    }

    /// Decode a batch from envelope form.
    pub fn from_data(data: &Data) -> BrokerResult<Self> {
        let envelope = Envelope::decode(data)?;
        if envelope.kind != MessageKind::Batch {
            return Err(invalid("not a batch message"));
        }
        let messages = envelope
            .content
            .as_vector()
            .ok_or_else(|| invalid("batch content is not a vector"))?;
        Ok(Self::new(messages.clone()))
    }
}

fn invalid(what: &str) -> BrokerError {
    make_error_msg(ErrorCode::InvalidData, what)
}
