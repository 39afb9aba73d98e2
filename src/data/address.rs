//! Network addresses, subnets, and ports.
//!
//! Addresses are stored as 16 bytes in network byte order. IPv4 addresses
//! use the IPv4-mapped IPv6 representation, i.e. the bytes are prefixed with
//! `00 00 00 00 00 00 00 00 00 00 FF FF`.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Prefix marking an IPv4-mapped address.
const V4_MAPPED_PREFIX: [u8; 12] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff];

/// Distinguishes between address families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

/// Distinguishes the byte ordering of raw address words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteOrder {
    Host,
    Network,
}

/// An IPv4 or IPv6 address.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Address {
    bytes: [u8; 16],
}

impl Address {
    /// Number of bytes in the stored representation.
    pub const NUM_BYTES: usize = 16;

    /// Construct an address from raw 32-bit words.
    ///
    /// `words` must hold one entry for IPv4 and four entries for IPv6. The
    /// byte order discriminator describes how the words are stored; network
    /// order words are copied verbatim while host order words are converted.
    pub fn from_raw(words: &[u32], family: AddressFamily, order: ByteOrder) -> Option<Self> {
        let word_bytes = |w: u32| -> [u8; 4] {
            match order {
                ByteOrder::Host => w.to_be_bytes(),
                ByteOrder::Network => w.to_ne_bytes(),
            }
        };
        let mut bytes = [0u8; 16];
        match family {
            AddressFamily::Ipv4 => {
                if words.len() != 1 {
                    return None;
                }
                bytes[..12].copy_from_slice(&V4_MAPPED_PREFIX);
                bytes[12..].copy_from_slice(&word_bytes(words[0]));
            }
            AddressFamily::Ipv6 => {
                if words.len() != 4 {
                    return None;
                }
                for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
                    chunk.copy_from_slice(&word_bytes(*word));
                }
            }
        }
        Some(Self { bytes })
    }

    /// Construct from 16 raw bytes in network order.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self { bytes }
    }

    /// The raw bytes in network order. IPv4 addresses use the v4-mapped
    /// representation.
    pub const fn bytes(&self) -> &[u8; 16] {
        &self.bytes
    }

    /// Whether this is an IPv4-mapped address.
    pub fn is_v4(&self) -> bool {
        self.bytes[..12] == V4_MAPPED_PREFIX
    }

    /// Whether this is an IPv6 address.
    pub fn is_v6(&self) -> bool {
        !self.is_v4()
    }

    /// Mask out lower bits of the address, keeping `top_bits_to_keep` bits.
    ///
    /// The count is always interpreted relative to the IPv6 bit width, even
    /// for IPv4 addresses: to compute `192.168.1.2/16`, pass `96 + 16`.
    /// Returns false (leaving the address unchanged) for counts above 128.
    pub fn mask(&mut self, top_bits_to_keep: u8) -> bool {
        if top_bits_to_keep > 128 {
            return false;
        }
        let full = usize::from(top_bits_to_keep / 8);
        let rem = top_bits_to_keep % 8;
        if full < 16 {
            if rem > 0 {
                self.bytes[full] &= 0xffu8 << (8 - rem);
                for byte in &mut self.bytes[full + 1..] {
                    *byte = 0;
                }
            } else {
                for byte in &mut self.bytes[full..] {
                    *byte = 0;
                }
            }
        }
        true
    }

    /// A copy of this address with the mask applied.
    pub fn masked(mut self, top_bits_to_keep: u8) -> Option<Self> {
        if self.mask(top_bits_to_keep) {
            Some(self)
        } else {
            None
        }
    }
}

impl From<Ipv4Addr> for Address {
    fn from(addr: Ipv4Addr) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..12].copy_from_slice(&V4_MAPPED_PREFIX);
        bytes[12..].copy_from_slice(&addr.octets());
        Self { bytes }
    }
}

impl From<Ipv6Addr> for Address {
    fn from(addr: Ipv6Addr) -> Self {
        Self {
            bytes: addr.octets(),
        }
    }
}

impl From<IpAddr> for Address {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => v4.into(),
            IpAddr::V6(v6) => v6.into(),
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_v4() {
            let v4 = Ipv4Addr::new(
                self.bytes[12],
                self.bytes[13],
                self.bytes[14],
                self.bytes[15],
            );
            write!(f, "{}", v4)
        } else {
            write!(f, "{}", Ipv6Addr::from(self.bytes))
        }
    }
}

impl FromStr for Address {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match IpAddr::from_str(s) {
            Ok(addr) => Ok(addr.into()),
            Err(e) => Err(e),
        }
    }
}

/// A subnet, stored as a masked address plus prefix length.
///
/// The prefix length is the user-facing one: relative to 32 bits for IPv4
/// networks and 128 bits for IPv6 networks.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Subnet {
    network: Address,
    length: u8,
}

impl Subnet {
    /// Create a subnet, masking `address` down to the network address.
    ///
    /// Returns `None` when the length exceeds the family's bit width.
    pub fn new(address: Address, length: u8) -> Option<Self> {
        let effective = if address.is_v4() {
            if length > 32 {
                return None;
            }
            96 + length
        } else {
            if length > 128 {
                return None;
            }
            length
        };
        let network = address.masked(effective)?;
        Some(Self { network, length })
    }

    /// The masked network address.
    pub const fn network(&self) -> Address {
        self.network
    }

    /// The user-facing prefix length.
    pub const fn length(&self) -> u8 {
        self.length
    }

    /// Prefix length relative to the 128-bit width.
    pub fn raw_length(&self) -> u8 {
        if self.network.is_v4() {
            96 + self.length
        } else {
            self.length
        }
    }

    /// Whether `address` lies inside this subnet.
    pub fn contains(&self, address: Address) -> bool {
        match address.masked(self.raw_length()) {
            Some(masked) => masked == self.network,
            None => false,
        }
    }
}

impl std::fmt::Display for Subnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.length)
    }
}

impl FromStr for Subnet {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s.rsplit_once('/').ok_or(())?;
        let address = Address::from_str(addr).map_err(|_| ())?;
        let length = len.parse::<u8>().map_err(|_| ())?;
        Subnet::new(address, length).ok_or(())
    }
}

/// Transport protocol of a port.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Unknown,
    Tcp,
    Udp,
    Icmp,
}

impl Protocol {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "?",
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Icmp => "icmp",
        }
    }
}

/// A transport-layer port.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Port {
    number: u16,
    protocol: Protocol,
}

impl Port {
    /// Create a port from number and protocol.
    pub const fn new(number: u16, protocol: Protocol) -> Self {
        Self { number, protocol }
    }

    /// The port number.
    pub const fn number(&self) -> u16 {
        self.number
    }

    /// The transport protocol.
    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }
}

impl std::fmt::Display for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.number, self.protocol.as_str())
    }
}

impl FromStr for Port {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (num, proto) = s.split_once('/').ok_or(())?;
        let number = num.parse::<u16>().map_err(|_| ())?;
        let protocol = match proto {
            "tcp" => Protocol::Tcp,
            "udp" => Protocol::Udp,
            "icmp" => Protocol::Icmp,
            "?" => Protocol::Unknown,
            _ => return Err(()),
        };
        Ok(Port::new(number, protocol))
    }
}
