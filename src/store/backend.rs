//! Storage backend interface.
//!
//! Masters and clones address their storage exclusively through this
//! capability trait; backends never see the replication protocol. All
//! operations are expected to be in-process and non-blocking — a truly
//! blocking backend has to schedule its own workers behind this interface.

use super::command::StoreSnapshot;
use crate::core::error::BrokerResult;
use crate::core::time::Timestamp;
use crate::data::{Data, DataType};

/// The operations a store runs against its backend.
///
/// Errors are restricted to `backend_failure`, `no_such_key`, `type_clash`,
/// and `invalid_data`.
pub trait Backend: Send {
    /// Read the value under `key`.
    fn get(&self, key: &Data) -> BrokerResult<Data>;

    /// Read an aspect of the value under `key`: membership for sets, the
    /// mapped value for tables, the indexed element for vectors.
    fn get_aspect(&self, key: &Data, aspect: &Data) -> BrokerResult<Data>;

    /// Write `value` under `key`, replacing any previous value and expiry.
    fn put(&mut self, key: Data, value: Data, expiry: Option<Timestamp>) -> BrokerResult<()>;

    /// Add `value` to the value under `key`. An absent key is first
    /// initialized with the additive identity of `init_type`.
    fn add(
        &mut self,
        key: &Data,
        value: &Data,
        init_type: DataType,
        expiry: Option<Timestamp>,
    ) -> BrokerResult<()>;

    /// Subtract `value` from the value under `key`. Fails with
    /// `no_such_key` when the key is absent.
    fn subtract(&mut self, key: &Data, value: &Data, expiry: Option<Timestamp>)
        -> BrokerResult<()>;

    /// Remove `key`.
    fn erase(&mut self, key: &Data) -> BrokerResult<()>;

    /// Whether `key` exists.
    fn exists(&self, key: &Data) -> BrokerResult<bool>;

    /// All keys, as a vector, set, or none when empty.
    fn keys(&self) -> BrokerResult<Data>;

    /// Remove all keys.
    fn clear(&mut self) -> BrokerResult<()>;

    /// A copy of the full key/value map.
    fn snapshot(&self) -> BrokerResult<StoreSnapshot>;

    /// Remove `key` if it carries an expiry that is due at `now`.
    ///
    /// Returns true only when the key was present and its expiry was at or
    /// before `now`; a stale or re-armed timer yields false.
    fn expire(&mut self, key: &Data, now: Timestamp) -> BrokerResult<bool>;

    /// The pending expirations as `(key, expiry)` pairs.
    fn expiries(&self) -> BrokerResult<Vec<(Data, Timestamp)>>;
}

/// The additive identity used when `add` initializes an absent key.
pub fn init_value(init_type: DataType) -> Option<Data> {
    use crate::data::{Set, Table, Vector};
    match init_type {
        DataType::Count => Some(Data::Count(0)),
        DataType::Integer => Some(Data::Integer(0)),
        DataType::Real => Some(Data::Real(0.0)),
        DataType::Str => Some(Data::Str(String::new())),
        DataType::Timespan => Some(Data::Timespan(crate::core::time::Timespan::ZERO)),
        DataType::Set => Some(Data::Set(Set::new())),
        DataType::Table => Some(Data::Table(Table::new())),
        DataType::Vector => Some(Data::Vector(Vector::new())),
        _ => None,
    }
}
