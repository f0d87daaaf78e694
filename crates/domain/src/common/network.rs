use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

// ── Errors ──────────────────────────────────────────────────────────

/// A CIDR string that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid CIDR '{value}': {reason}")]
pub struct CidrParseError {
    pub value: String,
    pub reason: String,
}

impl CidrParseError {
    fn new(value: &str, reason: impl Into<String>) -> Self {
        Self {
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

// ── IP Network ──────────────────────────────────────────────────────

/// IP network with CIDR prefix (IPv4 or IPv6).
///
/// Host bits are cleared on construction so that two spellings of the
/// same network (`10.1.2.3/8`, `10.0.0.0/8`) compare equal and render
/// identically. The rendered form is what the packet filter stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IpNetwork {
    /// IPv4 address as host-byte-order u32, prefix 0-32.
    V4 { addr: u32, prefix_len: u8 },
    /// IPv6 address as 16 bytes in network order, prefix 0-128.
    V6 { addr: [u8; 16], prefix_len: u8 },
}

impl IpNetwork {
    pub fn v4(addr: u32, prefix_len: u8) -> Self {
        let prefix_len = prefix_len.min(32);
        Self::V4 {
            addr: addr & mask_v4(prefix_len),
            prefix_len,
        }
    }

    pub fn v6(addr: [u8; 16], prefix_len: u8) -> Self {
        let prefix_len = prefix_len.min(128);
        Self::V6 {
            addr: mask_v6(addr, prefix_len),
            prefix_len,
        }
    }

    /// Check whether `ip` falls within this network. Address families
    /// never match across each other.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (*self, ip) {
            (Self::V4 { addr, prefix_len }, IpAddr::V4(v4)) => {
                cidr_match_v4(addr, prefix_len, u32::from(v4))
            }
            (Self::V6 { addr, prefix_len }, IpAddr::V6(v6)) => {
                cidr_match_v6(&addr, prefix_len, &v6.octets())
            }
            (Self::V6 { .. }, IpAddr::V4(_)) => false,
            // dual-stack sockets report v4 peers as ::ffff:a.b.c.d
            (Self::V4 { .. }, IpAddr::V6(v6)) => v6
                .to_ipv4_mapped()
                .is_some_and(|v4| self.contains(IpAddr::V4(v4))),
        }
    }

    pub fn prefix_len(&self) -> u8 {
        match *self {
            Self::V4 { prefix_len, .. } | Self::V6 { prefix_len, .. } => prefix_len,
        }
    }

    pub fn is_v6(&self) -> bool {
        matches!(self, Self::V6 { .. })
    }

    /// Whether every address of `other` is also in `self`.
    pub fn covers(&self, other: &IpNetwork) -> bool {
        match (*self, *other) {
            (Self::V4 { addr, prefix_len }, Self::V4 { addr: inner, prefix_len: inner_len }) => {
                prefix_len <= inner_len && cidr_match_v4(addr, prefix_len, inner)
            }
            (Self::V6 { addr, prefix_len }, Self::V6 { addr: inner, prefix_len: inner_len }) => {
                prefix_len <= inner_len && cidr_match_v6(&addr, prefix_len, &inner)
            }
            _ => false,
        }
    }

    /// The enclosing network one bit shorter. `None` at prefix 0.
    pub fn parent(&self) -> Option<IpNetwork> {
        match *self {
            Self::V4 { prefix_len: 0, .. } | Self::V6 { prefix_len: 0, .. } => None,
            Self::V4 { addr, prefix_len } => Some(Self::v4(addr, prefix_len - 1)),
            Self::V6 { addr, prefix_len } => Some(Self::v6(addr, prefix_len - 1)),
        }
    }

    /// The other half of [`parent`](Self::parent). `None` at prefix 0.
    pub fn sibling(&self) -> Option<IpNetwork> {
        match *self {
            Self::V4 { prefix_len: 0, .. } | Self::V6 { prefix_len: 0, .. } => None,
            Self::V4 { addr, prefix_len } => Some(Self::V4 {
                addr: addr ^ (1u32 << (32 - u32::from(prefix_len))),
                prefix_len,
            }),
            Self::V6 { mut addr, prefix_len } => {
                let bit = usize::from(prefix_len - 1);
                addr[bit / 8] ^= 0x80 >> (bit % 8);
                Some(Self::V6 { addr, prefix_len })
            }
        }
    }
}

impl FromStr for IpNetwork {
    type Err = CidrParseError;

    /// Parse `"192.168.1.0/24"`, `"10.0.0.1"`, `"2001:db8::/32"` or `"::1"`.
    /// A bare address is a host route.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CidrParseError::new(s, "empty value"));
        }
        let (ip_str, prefix) = match s.split_once('/') {
            Some((ip, prefix)) => {
                let len = prefix
                    .parse::<u8>()
                    .map_err(|_| CidrParseError::new(s, format!("invalid prefix length: '{prefix}'")))?;
                (ip, Some(len))
            }
            None => (s, None),
        };

        let ip: IpAddr = ip_str
            .parse()
            .map_err(|e| CidrParseError::new(s, format!("invalid address: {e}")))?;

        match ip {
            IpAddr::V4(v4) => {
                let len = prefix.unwrap_or(32);
                if len > 32 {
                    return Err(CidrParseError::new(s, format!("prefix length {len} must be 0-32")));
                }
                Ok(Self::v4(u32::from(v4), len))
            }
            IpAddr::V6(v6) => {
                let len = prefix.unwrap_or(128);
                if len > 128 {
                    return Err(CidrParseError::new(s, format!("prefix length {len} must be 0-128")));
                }
                Ok(Self::v6(v6.octets(), len))
            }
        }
    }
}

impl fmt::Display for IpNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::V4 { addr, prefix_len } => write!(f, "{}/{prefix_len}", Ipv4Addr::from(addr)),
            Self::V6 { addr, prefix_len } => write!(f, "{}/{prefix_len}", Ipv6Addr::from(addr)),
        }
    }
}

impl Serialize for IpNetwork {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IpNetwork {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Parse a CIDR string.
pub fn parse_cidr(s: &str) -> Result<IpNetwork, CidrParseError> {
    s.parse()
}

fn mask_v4(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        !0u32 << (32 - u32::from(prefix_len))
    }
}

fn mask_v6(mut addr: [u8; 16], prefix_len: u8) -> [u8; 16] {
    for (i, byte) in addr.iter_mut().enumerate() {
        let bit_start = i * 8;
        let keep = usize::from(prefix_len).saturating_sub(bit_start).min(8);
        *byte &= if keep == 0 { 0 } else { !0u8 << (8 - keep) };
    }
    addr
}

fn cidr_match_v4(net_addr: u32, prefix_len: u8, ip: u32) -> bool {
    let mask = mask_v4(prefix_len);
    (net_addr & mask) == (ip & mask)
}

fn cidr_match_v6(net_addr: &[u8; 16], prefix_len: u8, ip: &[u8; 16]) -> bool {
    if prefix_len >= 128 {
        return net_addr == ip;
    }
    let full_bytes = usize::from(prefix_len / 8);
    if net_addr[..full_bytes] != ip[..full_bytes] {
        return false;
    }
    let remaining_bits = prefix_len % 8;
    if remaining_bits > 0 {
        let mask = !0u8 << (8 - remaining_bits);
        if (net_addr[full_bytes] & mask) != (ip[full_bytes] & mask) {
            return false;
        }
    }
    true
}
