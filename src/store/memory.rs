//! In-memory storage backend.

use super::backend::{init_value, Backend};
use super::command::StoreSnapshot;
use crate::core::error::{make_error, make_error_msg, BrokerResult, ErrorCode};
use crate::core::time::{Timespan, Timestamp};
use crate::data::{Data, DataType, Table};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    value: Data,
    expiry: Option<Timestamp>,
}

/// Backend keeping all entries in an ordered in-memory map.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: BTreeMap<Data, Entry>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a backend from a snapshot, dropping all expiries.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let entries = snapshot
            .into_iter()
            .map(|(key, value)| {
                (
                    key,
                    Entry {
                        value,
                        expiry: None,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the backend holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Backend for MemoryBackend {
    fn get(&self, key: &Data) -> BrokerResult<Data> {
        match self.entries.get(key) {
            Some(entry) => Ok(entry.value.clone()),
            None => Err(make_error(ErrorCode::NoSuchKey)),
        }
    }

    fn get_aspect(&self, key: &Data, aspect: &Data) -> BrokerResult<Data> {
        let entry = self
            .entries
            .get(key)
            .ok_or_else(|| make_error(ErrorCode::NoSuchKey))?;
        match &entry.value {
            Data::Set(xs) => Ok(Data::Bool(xs.contains(aspect))),
            Data::Table(xs) => match xs.get(aspect) {
                Some(value) => Ok(value.clone()),
                None => Err(make_error(ErrorCode::NoSuchKey)),
            },
            Data::Vector(xs) => {
                let idx = aspect
                    .as_count()
                    .ok_or_else(|| make_error_msg(ErrorCode::InvalidData, "index must be a count"))?;
                match xs.get(idx as usize) {
                    Some(value) => Ok(value.clone()),
                    None => Err(make_error(ErrorCode::NoSuchKey)),
                }
            }
            _ => Err(make_error_msg(
                ErrorCode::TypeClash,
                "aspect queries require a container value",
            )),
        }
    }

    fn put(&mut self, key: Data, value: Data, expiry: Option<Timestamp>) -> BrokerResult<()> {
        self.entries.insert(key, Entry { value, expiry });
        Ok(())
    }

    fn add(
        &mut self,
        key: &Data,
        value: &Data,
        init_type: DataType,
        expiry: Option<Timestamp>,
    ) -> BrokerResult<()> {
        if !self.entries.contains_key(key) {
            let init = init_value(init_type).ok_or_else(|| {
                make_error_msg(
                    ErrorCode::InvalidData,
                    format!("type {:?} has no additive identity", init_type),
                )
            })?;
            self.entries.insert(
                key.clone(),
                Entry {
                    value: init,
                    expiry: None,
                },
            );
        }
        let entry = self.entries.get_mut(key).expect("present after insert");
        add_data(&mut entry.value, value)?;
        if expiry.is_some() {
            entry.expiry = expiry;
        }
        Ok(())
    }

    fn subtract(
        &mut self,
        key: &Data,
        value: &Data,
        expiry: Option<Timestamp>,
    ) -> BrokerResult<()> {
        let entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| make_error(ErrorCode::NoSuchKey))?;
        subtract_data(&mut entry.value, value)?;
        if expiry.is_some() {
            entry.expiry = expiry;
        }
        Ok(())
    }

    fn erase(&mut self, key: &Data) -> BrokerResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn exists(&self, key: &Data) -> BrokerResult<bool> {
        Ok(self.entries.contains_key(key))
    }

    fn keys(&self) -> BrokerResult<Data> {
        if self.entries.is_empty() {
            return Ok(Data::None);
        }
        Ok(Data::Vector(self.entries.keys().cloned().collect()))
    }

    fn clear(&mut self) -> BrokerResult<()> {
        self.entries.clear();
        Ok(())
    }

    fn snapshot(&self) -> BrokerResult<StoreSnapshot> {
        let mut snapshot = Table::new();
        for (key, entry) in &self.entries {
            snapshot.insert(key.clone(), entry.value.clone());
        }
        Ok(snapshot)
    }

    fn expire(&mut self, key: &Data, now: Timestamp) -> BrokerResult<bool> {
        match self.entries.get(key) {
            Some(entry) => match entry.expiry {
                Some(expiry) if expiry <= now => {
                    self.entries.remove(key);
                    Ok(true)
                }
                _ => Ok(false),
            },
            None => Ok(false),
        }
    }

    fn expiries(&self) -> BrokerResult<Vec<(Data, Timestamp)>> {
        Ok(self
            .entries
            .iter()
            .filter_map(|(key, entry)| entry.expiry.map(|e| (key.clone(), e)))
            .collect())
    }
}

/// Add `value` onto `current`, by type.
fn add_data(current: &mut Data, value: &Data) -> BrokerResult<()> {
    match (current, value) {
        (Data::Count(a), Data::Count(b)) => {
            *a = a.saturating_add(*b);
            Ok(())
        }
        (Data::Integer(a), Data::Integer(b)) => {
            *a = a.saturating_add(*b);
            Ok(())
        }
        (Data::Real(a), Data::Real(b)) => {
            *a += b;
            Ok(())
        }
        (Data::Str(a), Data::Str(b)) => {
            a.push_str(b);
            Ok(())
        }
        (Data::Timespan(a), Data::Timespan(b)) => {
            *a = *a + *b;
            Ok(())
        }
        (Data::Set(xs), b) => {
            xs.insert(b.clone());
            Ok(())
        }
        (Data::Table(xs), Data::Table(b)) => {
            for (k, v) in b {
                xs.insert(k.clone(), v.clone());
            }
            Ok(())
        }
        (Data::Vector(xs), b) => {
            xs.push(b.clone());
            Ok(())
        }
        _ => Err(make_error_msg(
            ErrorCode::TypeClash,
            "cannot add operand to stored value",
        )),
    }
}

/// Subtract `value` from `current`, by type.
fn subtract_data(current: &mut Data, value: &Data) -> BrokerResult<()> {
    match (current, value) {
        (Data::Count(a), Data::Count(b)) => {
            *a = a.saturating_sub(*b);
            Ok(())
        }
        (Data::Integer(a), Data::Integer(b)) => {
            *a = a.saturating_sub(*b);
            Ok(())
        }
        (Data::Real(a), Data::Real(b)) => {
            *a -= b;
            Ok(())
        }
        (Data::Timespan(a), Data::Timespan(b)) => {
            *a = Timespan::from_nanos(a.as_nanos().saturating_sub(b.as_nanos()));
            Ok(())
        }
        (Data::Set(xs), b) => {
            xs.remove(b);
            Ok(())
        }
        (Data::Table(xs), Data::Table(b)) => {
            for k in b.keys() {
                xs.remove(k);
            }
            Ok(())
        }
        _ => Err(make_error_msg(
            ErrorCode::TypeClash,
            "cannot subtract operand from stored value",
        )),
    }
}
