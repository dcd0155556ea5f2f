//! # Match family module
//!
//! ## What is a match family?
//! A match family is the set of header fields a packet can be matched against, together with
//! the bit range each field occupies in the flat header vector. The layout is generated at build
//! time from the enabled cargo features, one feature per field.
//!
//! ## What is it used for?
//! [MaskedValue](crate::r#match::MaskedValue) and [Packet](crate::r#match::Packet) store field
//! values at the offsets declared here, and the predicate engine rejects predicates over fields
//! whose feature is disabled.
//!
//! ## Example
//! ```no_run
//! use flowpol_core::r#match::family::{Field, FamilyDecl, constant::GLOBAL_FAMILY};
//!
//! let decl = GLOBAL_FAMILY.get_field_declaration("dstip").unwrap();
//! assert_eq!(decl.to - decl.from, 32);
//! assert_eq!(Field::DstIp.declaration().unwrap().name, "dstip");
//! ```
use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use crate::error::ConfigError;

/// Describes a field in a match family.
#[derive(Copy, Clone, Debug)]
pub struct FieldDeclaration {
    pub name: &'static str,
    pub from: usize,
    pub to: usize,
}

pub trait FamilyDecl {
    fn get_field_declaration(&self, name: &str) -> Option<FieldDeclaration>;
}

pub struct MatchFamily;

/// The closed set of header fields known to the system. Whether a field is *supported* depends
/// on the match family compiled in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    InPort,
    Vlan,
    EthType,
    Protocol,
    SrcPort,
    DstPort,
    SrcIp,
    DstIp,
    SrcMac,
    DstMac,
}

/// Kind of literal a field accepts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FieldKind {
    AddressV4,
    MacAddress,
    Integer,
}

impl Field {
    pub const ALL: [Field; 10] = [
        Field::InPort,
        Field::Vlan,
        Field::EthType,
        Field::Protocol,
        Field::SrcPort,
        Field::DstPort,
        Field::SrcIp,
        Field::DstIp,
        Field::SrcMac,
        Field::DstMac,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Field::InPort => "inport",
            Field::Vlan => "vlan",
            Field::EthType => "ethtype",
            Field::Protocol => "protocol",
            Field::SrcPort => "srcport",
            Field::DstPort => "dstport",
            Field::SrcIp => "srcip",
            Field::DstIp => "dstip",
            Field::SrcMac => "srcmac",
            Field::DstMac => "dstmac",
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Field::SrcIp | Field::DstIp => FieldKind::AddressV4,
            Field::SrcMac | Field::DstMac => FieldKind::MacAddress,
            _ => FieldKind::Integer,
        }
    }

    /// Number of meaningful bits. `vlan` occupies 16 bits in the header vector but only the
    /// 12-bit VLAN id is a valid value.
    pub fn width(&self) -> u32 {
        match self {
            Field::Protocol => 8,
            Field::Vlan => 12,
            Field::SrcIp | Field::DstIp => 32,
            Field::SrcMac | Field::DstMac => 48,
            _ => 16,
        }
    }

    /// Look the field up in the compiled-in family.
    pub fn declaration(&self) -> Result<FieldDeclaration, ConfigError> {
        constant::GLOBAL_FAMILY
            .get_field_declaration(self.name())
            .ok_or_else(|| ConfigError::UnsupportedField(self.name().to_owned()))
    }

    pub fn is_supported(&self) -> bool {
        self.declaration().is_ok()
    }

    /// All fields supported by the compiled-in family, in bit order.
    pub fn supported() -> impl Iterator<Item = Field> {
        Field::ALL.into_iter().filter(Field::is_supported)
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Field {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .into_iter()
            .find(|f| f.name() == s)
            .ok_or_else(|| ConfigError::UnsupportedField(s.to_owned()))
    }
}

pub mod constant {
    use super::{FamilyDecl, FieldDeclaration, MatchFamily};
    use bitvec::order::Lsb0;

    include!(concat!(env!("OUT_DIR"), "/codegen.rs"));

    pub const GLOBAL_FAMILY: MatchFamily = MatchFamily;

    pub type HeaderBitOrder = Lsb0;
    pub type HeaderBitStore = u8;

    pub const HEADERSTORENUM: usize = MAX_POS / HeaderBitStore::BITS as usize;

    impl FamilyDecl for MatchFamily {
        fn get_field_declaration(&self, name: &str) -> Option<FieldDeclaration> {
            if let Some((field_name, (from, to))) = FIELD_MAP.get_entry(name) {
                Some(FieldDeclaration {
                    name: *field_name,
                    from: *from,
                    to: *to,
                })
            } else {
                None
            }
        }
    }
}
