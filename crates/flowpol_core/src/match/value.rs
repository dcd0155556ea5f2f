//! Typed header-field literals.
use std::{
    fmt::{Display, Formatter},
    net::Ipv4Addr,
    str::FromStr,
};

use ipnet::Ipv4Net;

use crate::{
    error::ConfigError,
    r#match::family::{Field, FieldKind},
};

/// 48-bit Ethernet address.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub fn to_u64(self) -> u64 {
        self.0.iter().fold(0u64, |acc, b| acc << 8 | *b as u64)
    }

    pub fn from_u64(value: u64) -> Self {
        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            *octet = (value >> (8 * (5 - i))) as u8;
        }
        MacAddr(octets)
    }
}

impl Display for MacAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddr {
    type Err = ConfigError;

    /// Accepts `aa:bb:cc:dd:ee:ff` and `aa-bb-cc-dd-ee-ff`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ConfigError::MalformedLiteral {
            field: "mac".to_owned(),
            literal: s.to_owned(),
        };
        let mut octets = [0u8; 6];
        let mut parts = s.split(|c| c == ':' || c == '-');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(malformed)?;
            if part.is_empty() || part.len() > 2 {
                return Err(malformed());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| malformed())?;
        }
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(MacAddr(octets))
    }
}

/// A header-field value. Exact IPv4 addresses are `/32` networks.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    AddressV4(Ipv4Net),
    MacAddress(MacAddr),
    Integer(u64),
}

impl From<Ipv4Addr> for Value {
    fn from(value: Ipv4Addr) -> Self {
        Value::AddressV4(Ipv4Net::from(value))
    }
}

impl From<Ipv4Net> for Value {
    fn from(value: Ipv4Net) -> Self {
        Value::AddressV4(value.trunc())
    }
}

impl From<MacAddr> for Value {
    fn from(value: MacAddr) -> Self {
        Value::MacAddress(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Integer(value)
    }
}

impl Value {
    /// Parse a literal according to the kind of `field`.
    pub fn parse(field: Field, literal: &str) -> Result<Value, ConfigError> {
        let literal = literal.trim();
        let malformed = || ConfigError::MalformedLiteral {
            field: field.name().to_owned(),
            literal: literal.to_owned(),
        };
        let value = match field.kind() {
            FieldKind::AddressV4 => {
                if literal.contains('/') {
                    Value::from(literal.parse::<Ipv4Net>().map_err(|_| malformed())?)
                } else {
                    Value::from(literal.parse::<Ipv4Addr>().map_err(|_| malformed())?)
                }
            }
            FieldKind::MacAddress => Value::MacAddress(literal.parse().map_err(|_| malformed())?),
            FieldKind::Integer => {
                let parsed = match literal.strip_prefix("0x") {
                    Some(hex) => u64::from_str_radix(hex, 16),
                    None => literal.parse::<u64>(),
                };
                Value::Integer(parsed.map_err(|_| malformed())?)
            }
        };
        value.check(field)?;
        Ok(value)
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Value::AddressV4(_) => FieldKind::AddressV4,
            Value::MacAddress(_) => FieldKind::MacAddress,
            Value::Integer(_) => FieldKind::Integer,
        }
    }

    /// Validate that the value can be stored in `field`.
    pub fn check(&self, field: Field) -> Result<(), ConfigError> {
        if self.kind() != field.kind() {
            return Err(ConfigError::ValueKind {
                field: field.name(),
                expected: field.kind(),
                value: self.to_string(),
            });
        }
        if let Value::Integer(v) = self {
            if *v >> field.width() != 0 {
                return Err(ConfigError::ValueOutOfRange {
                    field: field.name(),
                    width: field.width(),
                    value: v.to_string(),
                });
            }
        }
        Ok(())
    }

    /// A value is exact if it denotes a single field value.
    pub fn is_exact(&self) -> bool {
        match self {
            Value::AddressV4(net) => net.prefix_len() == 32,
            _ => true,
        }
    }

    /// Ternary encoding `(value, mask)` of this value within the bits of `field`.
    pub fn ternary(&self, field: Field) -> (u128, u128) {
        let full = (1u128 << field.width()) - 1;
        match self {
            Value::AddressV4(net) => {
                let mask = u32::from(net.netmask()) as u128;
                (u32::from(net.network()) as u128 & mask, mask)
            }
            Value::MacAddress(mac) => (mac.to_u64() as u128, full),
            Value::Integer(v) => (*v as u128 & full, full),
        }
    }

    /// Whether every field value denoted by `other` is also denoted by `self`.
    pub fn contains(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::AddressV4(a), Value::AddressV4(b)) => a.contains(b),
            _ => self == other,
        }
    }

    /// Rebuild a value of `field` from the exact bits stored in a header.
    pub fn from_bits(field: Field, bits: u128) -> Value {
        match field.kind() {
            FieldKind::AddressV4 => Value::from(Ipv4Addr::from(bits as u32)),
            FieldKind::MacAddress => Value::MacAddress(MacAddr::from_u64(bits as u64)),
            FieldKind::Integer => Value::Integer(bits as u64),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::AddressV4(net) if net.prefix_len() == 32 => write!(f, "{}", net.addr()),
            Value::AddressV4(net) => write!(f, "{}", net),
            Value::MacAddress(mac) => write!(f, "{}", mac),
            Value::Integer(v) => write!(f, "{}", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_values() {
        let ip = Value::parse(Field::DstIp, "10.0.0.1").unwrap();
        assert_eq!(ip.to_string(), "10.0.0.1");
        assert!(ip.is_exact());

        let net = Value::parse(Field::SrcIp, "192.168.1.77/24").unwrap();
        assert_eq!(net.to_string(), "192.168.1.0/24");
        assert!(!net.is_exact());
        assert!(!net.contains(&ip));
        assert!(net.contains(&Value::parse(Field::SrcIp, "192.168.1.9").unwrap()));

        let mac = Value::parse(Field::DstMac, "00:00:00:00:00:0A").unwrap();
        assert_eq!(mac.to_string(), "00:00:00:00:00:0a");
        assert_eq!(Value::parse(Field::DstPort, "0x50").unwrap(), Value::Integer(80));
    }

    #[test]
    fn test_reject_values() {
        assert!(matches!(
            Value::parse(Field::DstIp, "10.0.0.300"),
            Err(ConfigError::MalformedLiteral { .. })
        ));
        assert!(matches!(
            Value::parse(Field::DstMac, "00:00:00:00:00"),
            Err(ConfigError::MalformedLiteral { .. })
        ));
        assert!(matches!(
            Value::parse(Field::Protocol, "256"),
            Err(ConfigError::ValueOutOfRange { .. })
        ));
        assert!(matches!(
            Value::Integer(4).check(Field::SrcIp),
            Err(ConfigError::ValueKind { .. })
        ));
    }

    #[test]
    fn test_ternary_encoding() {
        let net = Value::parse(Field::DstIp, "10.1.0.0/16").unwrap();
        assert_eq!(net.ternary(Field::DstIp), (0x0a01_0000, 0xffff_0000));
        let mac = Value::parse(Field::SrcMac, "ff:00:00:00:00:01").unwrap();
        assert_eq!(mac.ternary(Field::SrcMac), (0xff00_0000_0001, 0xffff_ffff_ffff));
        assert_eq!(MacAddr::from_u64(0xff00_0000_0001).to_string(), "ff:00:00:00:00:01");
    }
}
