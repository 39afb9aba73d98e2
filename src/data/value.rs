//! The generic value type carried by messages and stores.
//!
//! `Data` is a tagged sum over the scalar and container types Broker can
//! transport. Containers are ordered by value comparison so that equality
//! and serialization are deterministic; reals order by their total bit
//! pattern ordering for the same reason.
//!
//! The documented textual form (see [`std::fmt::Display`] and
//! [`std::str::FromStr`]) round-trips for all non-floating scalar types and
//! containers thereof.

use crate::core::error::{make_error_msg, BrokerError, BrokerResult, ErrorCode};
use crate::core::time::{Timespan, Timestamp};
use crate::data::address::{Address, Port, Subnet};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// An ordered set of values.
pub type Set = BTreeSet<Data>;

/// An ordered table of key/value pairs.
pub type Table = BTreeMap<Data, Data>;

/// A sequence of values.
pub type Vector = Vec<Data>;

/// A named enumeration constant, e.g. `Log::REDIS`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EnumValue {
    /// The fully qualified name of the constant.
    pub name: String,
}

impl EnumValue {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl std::fmt::Display for EnumValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Type tag of a [`Data`] value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DataType {
    None,
    Bool,
    Count,
    Integer,
    Real,
    Str,
    Address,
    Subnet,
    Port,
    Timestamp,
    Timespan,
    EnumValue,
    Set,
    Table,
    Vector,
}

/// A polymorphic value.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub enum Data {
    /// The absent value.
    #[default]
    None,
    /// A boolean.
    Bool(bool),
    /// An unsigned 64-bit integer.
    Count(u64),
    /// A signed 64-bit integer.
    Integer(i64),
    /// A 64-bit float.
    Real(f64),
    /// A string.
    Str(String),
    /// An IP address.
    Address(Address),
    /// A subnet.
    Subnet(Subnet),
    /// A transport-layer port.
    Port(Port),
    /// A point in time.
    Timestamp(Timestamp),
    /// A span of time.
    Timespan(Timespan),
    /// An enumeration constant.
    EnumValue(EnumValue),
    /// An ordered set.
    Set(Set),
    /// An ordered table.
    Table(Table),
    /// A sequence.
    Vector(Vector),
}

impl Data {
    /// The type tag of this value.
    pub fn data_type(&self) -> DataType {
        match self {
            Self::None => DataType::None,
            Self::Bool(_) => DataType::Bool,
            Self::Count(_) => DataType::Count,
            Self::Integer(_) => DataType::Integer,
            Self::Real(_) => DataType::Real,
            Self::Str(_) => DataType::Str,
            Self::Address(_) => DataType::Address,
            Self::Subnet(_) => DataType::Subnet,
            Self::Port(_) => DataType::Port,
            Self::Timestamp(_) => DataType::Timestamp,
            Self::Timespan(_) => DataType::Timespan,
            Self::EnumValue(_) => DataType::EnumValue,
            Self::Set(_) => DataType::Set,
            Self::Table(_) => DataType::Table,
            Self::Vector(_) => DataType::Vector,
        }
    }

    /// Whether this is the absent value.
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// View as a vector, if it is one.
    pub fn as_vector(&self) -> Option<&Vector> {
        match self {
            Self::Vector(xs) => Some(xs),
            _ => None,
        }
    }

    /// View as a set, if it is one.
    pub fn as_set(&self) -> Option<&Set> {
        match self {
            Self::Set(xs) => Some(xs),
            _ => None,
        }
    }

    /// View as a table, if it is one.
    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Self::Table(xs) => Some(xs),
            _ => None,
        }
    }

    /// View as a string slice, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// View as a count, if it is one.
    pub fn as_count(&self) -> Option<u64> {
        match self {
            Self::Count(n) => Some(*n),
            _ => None,
        }
    }

    /// View as a bool, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl Ord for Data {
    fn cmp(&self, other: &Self) -> Ordering {
        use Data::*;
        match (self, other) {
            (None, None) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Count(a), Count(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Real(a), Real(b)) => a.total_cmp(b),
            (Str(a), Str(b)) => a.cmp(b),
            (Address(a), Address(b)) => a.cmp(b),
            (Subnet(a), Subnet(b)) => a.cmp(b),
            (Port(a), Port(b)) => a.cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            (Timespan(a), Timespan(b)) => a.cmp(b),
            (EnumValue(a), EnumValue(b)) => a.cmp(b),
            (Set(a), Set(b)) => a.cmp(b),
            (Table(a), Table(b)) => a.cmp(b),
            (Vector(a), Vector(b)) => a.cmp(b),
            (a, b) => a.data_type().cmp(&b.data_type()),
        }
    }
}

impl PartialOrd for Data {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Data {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Data {}

impl From<bool> for Data {
    fn from(x: bool) -> Self {
        Self::Bool(x)
    }
}

impl From<u64> for Data {
    fn from(x: u64) -> Self {
        Self::Count(x)
    }
}

impl From<i64> for Data {
    fn from(x: i64) -> Self {
        Self::Integer(x)
    }
}

impl From<f64> for Data {
    fn from(x: f64) -> Self {
        Self::Real(x)
    }
}

impl From<&str> for Data {
    fn from(x: &str) -> Self {
        Self::Str(x.to_string())
    }
}

impl From<String> for Data {
    fn from(x: String) -> Self {
        Self::Str(x)
    }
}

impl From<Address> for Data {
    fn from(x: Address) -> Self {
        Self::Address(x)
    }
}

impl From<Timestamp> for Data {
    fn from(x: Timestamp) -> Self {
        Self::Timestamp(x)
    }
}

impl From<Timespan> for Data {
    fn from(x: Timespan) -> Self {
        Self::Timespan(x)
    }
}

impl From<Vector> for Data {
    fn from(x: Vector) -> Self {
        Self::Vector(x)
    }
}

impl std::fmt::Display for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("nil"),
            Self::Bool(true) => f.write_str("T"),
            Self::Bool(false) => f.write_str("F"),
            Self::Count(n) => write!(f, "{}", n),
            Self::Integer(n) => write!(f, "{:+}", n),
            // Debug formatting keeps the decimal point, which the parser
            // relies on to tell reals from counts.
            Self::Real(x) => write!(f, "{:?}", x),
            Self::Str(s) => {
                f.write_str("\"")?;
                for c in s.chars() {
                    match c {
                        '"' => f.write_str("\\\"")?,
                        '\\' => f.write_str("\\\\")?,
                        c => write!(f, "{}", c)?,
                    }
                }
                f.write_str("\"")
            }
            Self::Address(a) => write!(f, "{}", a),
            Self::Subnet(s) => write!(f, "{}", s),
            Self::Port(p) => write!(f, "{}", p),
            Self::Timestamp(t) => write!(f, "{}", t),
            Self::Timespan(t) => write!(f, "{}", t),
            Self::EnumValue(e) => write!(f, "{}", e),
            Self::Set(xs) => {
                f.write_str("{")?;
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", x)?;
                }
                f.write_str("}")
            }
            Self::Table(xs) => {
                f.write_str("{")?;
                for (i, (k, v)) in xs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} -> {}", k, v)?;
                }
                f.write_str("}")
            }
            Self::Vector(xs) => {
                f.write_str("[")?;
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", x)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl std::str::FromStr for Data {
    type Err = BrokerError;

    fn from_str(s: &str) -> BrokerResult<Self> {
        let mut parser = Parser::new(s);
        let value = parser.parse_value()?;
        parser.skip_ws();
        if !parser.at_end() {
            return Err(make_error_msg(
                ErrorCode::InvalidData,
                format!("trailing input at offset {}", parser.pos),
            ));
        }
        Ok(value)
    }
}

/// Recursive-descent parser for the textual form.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.rest().chars().next() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn error(&self, what: &str) -> BrokerError {
        make_error_msg(
            ErrorCode::InvalidData,
            format!("{} at offset {}", what, self.pos),
        )
    }

    fn expect(&mut self, c: char) -> BrokerResult<()> {
        if self.rest().starts_with(c) {
            self.pos += c.len_utf8();
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", c)))
        }
    }

    fn parse_value(&mut self) -> BrokerResult<Data> {
        self.skip_ws();
        match self.rest().chars().next() {
            Some('"') => self.parse_string(),
            Some('{') => self.parse_braced(),
            Some('[') => self.parse_vector(),
            Some(_) => self.parse_scalar(),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn parse_string(&mut self) -> BrokerResult<Data> {
        self.expect('"')?;
        let mut out = String::new();
        let mut chars = self.rest().char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some((_, escaped)) => out.push(escaped),
                    None => return Err(self.error("dangling escape")),
                },
                '"' => {
                    self.pos += i + 1;
                    return Ok(Data::Str(out));
                }
                c => out.push(c),
            }
        }
        Err(self.error("unterminated string"))
    }

    fn parse_vector(&mut self) -> BrokerResult<Data> {
        self.expect('[')?;
        let mut items = Vector::new();
        loop {
            self.skip_ws();
            if self.rest().starts_with(']') {
                self.pos += 1;
                return Ok(Data::Vector(items));
            }
            if !items.is_empty() {
                self.expect(',')?;
            }
            self.skip_ws();
            if self.rest().starts_with(']') {
                self.pos += 1;
                return Ok(Data::Vector(items));
            }
            items.push(self.parse_value()?);
        }
    }

    /// Parse `{...}` as either a set or a table, depending on whether the
    /// entries use the `key -> value` form.
    fn parse_braced(&mut self) -> BrokerResult<Data> {
        self.expect('{')?;
        let mut set = Set::new();
        let mut table = Table::new();
        let mut is_table: Option<bool> = None;
        loop {
            self.skip_ws();
            if self.rest().starts_with('}') {
                self.pos += 1;
                return Ok(match is_table {
                    Some(true) => Data::Table(table),
                    _ => Data::Set(set),
                });
            }
            if is_table.is_some() {
                self.expect(',')?;
                self.skip_ws();
            }
            let first = self.parse_value()?;
            self.skip_ws();
            if self.rest().starts_with("->") {
                if is_table == Some(false) {
                    return Err(self.error("mixed set and table entries"));
                }
                is_table = Some(true);
                self.pos += 2;
                let value = self.parse_value()?;
                table.insert(first, value);
            } else {
                if is_table == Some(true) {
                    return Err(self.error("mixed set and table entries"));
                }
                is_table = Some(false);
                set.insert(first);
            }
        }
    }

    fn parse_scalar(&mut self) -> BrokerResult<Data> {
        // A scalar token runs until a container delimiter or a table arrow.
        let rest = self.rest();
        let mut end = rest.len();
        for (i, c) in rest.char_indices() {
            if matches!(c, ',' | ']' | '}') {
                end = i;
                break;
            }
            if c == '-' && rest[i..].starts_with("->") {
                end = i;
                break;
            }
        }
        let token = rest[..end].trim();
        if token.is_empty() {
            return Err(self.error("empty value"));
        }
        let value = classify_scalar(token).ok_or_else(|| self.error("unrecognized value"))?;
        self.pos += end;
        Ok(value)
    }
}

fn classify_scalar(token: &str) -> Option<Data> {
    if token == "nil" {
        return Some(Data::None);
    }
    if token == "T" {
        return Some(Data::Bool(true));
    }
    if token == "F" {
        return Some(Data::Bool(false));
    }
    if token.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(n) = token.parse::<u64>() {
            return Some(Data::Count(n));
        }
    }
    if (token.starts_with('+') || token.starts_with('-'))
        && token.len() > 1
        && token[1..].bytes().all(|b| b.is_ascii_digit())
    {
        if let Ok(n) = token.parse::<i64>() {
            return Some(Data::Integer(n));
        }
    }
    if let Some(nanos) = token.strip_prefix('@') {
        if let Ok(n) = nanos.parse::<i64>() {
            return Some(Data::Timestamp(Timestamp::from_nanos(n)));
        }
    }
    if let Some(nanos) = token.strip_suffix("ns") {
        if let Ok(n) = nanos.parse::<i64>() {
            return Some(Data::Timespan(Timespan::from_nanos(n)));
        }
    }
    if let Ok(port) = token.parse::<Port>() {
        return Some(Data::Port(port));
    }
    if let Ok(subnet) = token.parse::<Subnet>() {
        return Some(Data::Subnet(subnet));
    }
    if let Ok(address) = token.parse::<Address>() {
        return Some(Data::Address(address));
    }
    if token.contains('.') || token.contains('e') || token.contains('E') {
        if let Ok(x) = token.parse::<f64>() {
            return Some(Data::Real(x));
        }
    }
    if token
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | ':'))
    {
        return Some(Data::EnumValue(EnumValue::new(token)));
    }
    None
}
