//! Error taxonomy and context.
//!
//! Broker keeps a closed set of error codes that travel unchanged across the
//! wire and the language bindings. An [`BrokerError`] pairs a code with
//! optional endpoint context and an optional human-readable message, and can
//! be round-tripped through the generic value type as
//! `["error", code, context]`.

use crate::core::id::EndpointInfo;
use crate::data::Data;
use serde::{Deserialize, Serialize};

/// Broker's error codes.
///
/// The set is closed; new codes are additions to the protocol, not an
/// implementation detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The unspecified default error code.
    Unspecified,
    /// Version incompatibility.
    PeerIncompatible,
    /// Referenced peer does not exist.
    PeerInvalid,
    /// Remote peer not listening.
    PeerUnavailable,
    /// Remote peer closed the connection during the handshake.
    PeerDisconnectDuringHandshake,
    /// A peering request timed out.
    PeerTimeout,
    /// Master with the given name already exists.
    MasterExists,
    /// Master with the given name does not exist.
    NoSuchMaster,
    /// The given data store key does not exist.
    NoSuchKey,
    /// The store operation timed out.
    RequestTimeout,
    /// The operation expected a different type than provided.
    TypeClash,
    /// The value cannot be used to carry out the desired operation.
    InvalidData,
    /// The storage backend failed to execute the operation.
    BackendFailure,
    /// The clone has not yet synchronized with its master, or it has been
    /// disconnected for too long.
    StaleData,
    /// Opening a file failed.
    CannotOpenFile,
    /// Writing to an open file failed.
    CannotWriteFile,
    /// Received an unknown key for a topic.
    InvalidTopicKey,
    /// Reached the end of an input file.
    EndOfFile,
    /// Received an unknown type tag value.
    InvalidTag,
    /// Deserialized an invalid status.
    InvalidStatus,
}

impl ErrorCode {
    /// Stable string name, used in the data encoding.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified",
            Self::PeerIncompatible => "peer_incompatible",
            Self::PeerInvalid => "peer_invalid",
            Self::PeerUnavailable => "peer_unavailable",
            Self::PeerDisconnectDuringHandshake => "peer_disconnect_during_handshake",
            Self::PeerTimeout => "peer_timeout",
            Self::MasterExists => "master_exists",
            Self::NoSuchMaster => "no_such_master",
            Self::NoSuchKey => "no_such_key",
            Self::RequestTimeout => "request_timeout",
            Self::TypeClash => "type_clash",
            Self::InvalidData => "invalid_data",
            Self::BackendFailure => "backend_failure",
            Self::StaleData => "stale_data",
            Self::CannotOpenFile => "cannot_open_file",
            Self::CannotWriteFile => "cannot_write_file",
            Self::InvalidTopicKey => "invalid_topic_key",
            Self::EndOfFile => "end_of_file",
            Self::InvalidTag => "invalid_tag",
            Self::InvalidStatus => "invalid_status",
        }
    }

    /// Parse a stable string name back into a code.
    pub fn parse(name: &str) -> Option<Self> {
        let code = match name {
            "unspecified" => Self::Unspecified,
            "peer_incompatible" => Self::PeerIncompatible,
            "peer_invalid" => Self::PeerInvalid,
            "peer_unavailable" => Self::PeerUnavailable,
            "peer_disconnect_during_handshake" => Self::PeerDisconnectDuringHandshake,
            "peer_timeout" => Self::PeerTimeout,
            "master_exists" => Self::MasterExists,
            "no_such_master" => Self::NoSuchMaster,
            "no_such_key" => Self::NoSuchKey,
            "request_timeout" => Self::RequestTimeout,
            "type_clash" => Self::TypeClash,
            "invalid_data" => Self::InvalidData,
            "backend_failure" => Self::BackendFailure,
            "stale_data" => Self::StaleData,
            "cannot_open_file" => Self::CannotOpenFile,
            "cannot_write_file" => Self::CannotWriteFile,
            "invalid_topic_key" => Self::InvalidTopicKey,
            "end_of_file" => Self::EndOfFile,
            "invalid_tag" => Self::InvalidTag,
            "invalid_status" => Self::InvalidStatus,
            _ => return None,
        };
        Some(code)
    }

    /// Whether errors with this code may carry network context.
    pub const fn carries_network_info(self) -> bool {
        matches!(
            self,
            Self::PeerInvalid | Self::PeerUnavailable | Self::PeerDisconnectDuringHandshake
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error code with optional endpoint context and message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerError {
    code: ErrorCode,
    endpoint: Option<EndpointInfo>,
    message: Option<String>,
}

impl BrokerError {
    /// Create an error from a bare code.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            endpoint: None,
            message: None,
        }
    }

    /// Attach a human-readable message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach endpoint context.
    pub fn with_endpoint(mut self, endpoint: EndpointInfo) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// The error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The endpoint context, if any.
    pub fn endpoint(&self) -> Option<&EndpointInfo> {
        self.endpoint.as_ref()
    }

    /// The message, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Encode as `["error", code, context]`.
    ///
    /// The context is `nil`, `[message]`, or `[endpoint_info, message]`.
    pub fn to_data(&self) -> Data {
        let context = match (&self.endpoint, &self.message) {
            (None, None) => Data::None,
            (None, Some(msg)) => Data::Vector(vec![Data::Str(msg.clone())]),
            (Some(ep), msg) => Data::Vector(vec![
                endpoint_info_to_data(ep),
                Data::Str(msg.clone().unwrap_or_default()),
            ]),
        };
        Data::Vector(vec![
            Data::Str("error".to_string()),
            Data::Str(self.code.as_str().to_string()),
            context,
        ])
    }

    /// Decode from the `["error", code, context]` form.
    pub fn from_data(data: &Data) -> Option<Self> {
        let fields = match data {
            Data::Vector(fields) if fields.len() == 3 => fields,
            _ => return None,
        };
        match &fields[0] {
            Data::Str(tag) if tag == "error" => {}
            _ => return None,
        }
        let code = match &fields[1] {
            Data::Str(name) => ErrorCode::parse(name)?,
            _ => return None,
        };
        let mut err = BrokerError::new(code);
        match &fields[2] {
            Data::None => {}
            Data::Vector(ctx) if ctx.len() == 1 => match &ctx[0] {
                Data::Str(msg) => err.message = Some(msg.clone()),
                _ => return None,
            },
            Data::Vector(ctx) if ctx.len() == 2 => {
                err.endpoint = Some(endpoint_info_from_data(&ctx[0])?);
                match &ctx[1] {
                    Data::Str(msg) => err.message = Some(msg.clone()),
                    _ => return None,
                }
            }
            _ => return None,
        }
        Some(err)
    }
}

impl From<ErrorCode> for BrokerError {
    fn from(code: ErrorCode) -> Self {
        Self::new(code)
    }
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code)?;
        if let Some(ep) = &self.endpoint {
            write!(f, " [{}]", ep)?;
        }
        if let Some(msg) = &self.message {
            write!(f, ": {}", msg)?;
        }
        Ok(())
    }
}

impl std::error::Error for BrokerError {}

/// Result type carrying a [`BrokerError`].
pub type BrokerResult<T> = Result<T, BrokerError>;

fn endpoint_info_to_data(info: &EndpointInfo) -> Data {
    let network = match &info.network {
        Some(net) => Data::Vector(vec![
            Data::Str(net.address.clone()),
            Data::Count(u64::from(net.port)),
        ]),
        None => Data::None,
    };
    Data::Vector(vec![Data::Count(info.node.as_raw()), network])
}

fn endpoint_info_from_data(data: &Data) -> Option<EndpointInfo> {
    use crate::core::id::{NetworkInfo, NodeId};
    let fields = match data {
        Data::Vector(fields) if fields.len() == 2 => fields,
        _ => return None,
    };
    let node = match &fields[0] {
        Data::Count(raw) => NodeId::from_raw(*raw),
        _ => return None,
    };
    let network = match &fields[1] {
        Data::None => None,
        Data::Vector(net) if net.len() == 2 => match (&net[0], &net[1]) {
            (Data::Str(address), Data::Count(port)) if *port <= u64::from(u16::MAX) => {
                Some(NetworkInfo::new(address.clone(), *port as u16))
            }
            _ => return None,
        },
        _ => return None,
    };
    Some(EndpointInfo { node, network })
}

/// Shorthand constructors mirroring the common call sites.
pub fn make_error(code: ErrorCode) -> BrokerError {
    BrokerError::new(code)
}

/// Construct an error with a message.
pub fn make_error_msg(code: ErrorCode, message: impl Into<String>) -> BrokerError {
    BrokerError::new(code).with_message(message)
}
