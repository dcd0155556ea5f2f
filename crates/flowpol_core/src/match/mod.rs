//! # Match
//!
//! ## Relations of important structs
//! ```text
//!    Field + Value
//!          |
//!          v
//!      Predicate ----> PredicateEngine ----> HeaderSpace (union of MaskedValue)
//!                            |
//!                            v
//!                  disjoint partition (Atom)
//! ```
//!
//! ## Example
//! ```no_run
//! use flowpol_core::r#match::{
//!     engine::{HeaderSpaceEngine, PredicateEngine},
//!     Predicate,
//! };
//!
//! let engine = HeaderSpaceEngine::default();
//!
//! let p1 = Predicate::matches("dstip", "10.0.0.0/24").unwrap();
//! let p2 = Predicate::matches("dstip", "10.0.0.7").unwrap();
//!
//! // Operate
//! assert!(engine.is_subset_of(&p2, &p1).unwrap());
//! let atoms = engine.disjoint_partition(&[p1, p2]).unwrap();
//! assert_eq!(atoms.len(), 2);
//! ```

pub mod engine;
pub mod family;
pub mod space;
pub mod value;

use std::{
    cmp::Ordering,
    collections::BTreeSet,
    fmt::{Binary, Debug, Display, Formatter},
    hash::Hash,
    ops::{BitAnd, BitOr, Not},
    sync::Arc,
};

use bitvec::{field::BitField, prelude::*};
use funty::Unsigned;

use crate::error::ConfigError;
use family::{constant, Field, FieldKind};
use value::Value;

pub use space::HeaderSpace;

/// Flat bit vector holding every header field of the match family.
pub type HeaderBits =
    BitArray<[constant::HeaderBitStore; constant::HEADERSTORENUM], constant::HeaderBitOrder>;

/// The constraint a ternary match puts on one field.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FieldMatch {
    pub field: Field,
    pub value: u128,
    pub mask: u128,
}

impl FieldMatch {
    fn full_mask(&self) -> u128 {
        (1u128 << self.field.width()) - 1
    }

    /// The exact value matched, if every bit of the field is constrained.
    pub fn exact(&self) -> Option<Value> {
        (self.mask == self.full_mask()).then(|| Value::from_bits(self.field, self.value))
    }

    /// The prefix length, if the mask is a contiguous run of leading ones.
    pub fn prefix_len(&self) -> Option<u32> {
        let width = self.field.width();
        let ones = self.mask.count_ones();
        let expected = if ones == 0 {
            0
        } else {
            ((1u128 << ones) - 1) << (width - ones)
        };
        (self.mask == expected).then_some(ones)
    }
}

impl Display for FieldMatch {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(value) = self.exact() {
            return write!(f, "{}={}", self.field, value);
        }
        match (self.field.kind(), self.prefix_len()) {
            (FieldKind::AddressV4, Some(len)) => {
                let addr = std::net::Ipv4Addr::from(self.value as u32);
                write!(f, "{}={}/{}", self.field, addr, len)
            }
            _ => write!(f, "{}=0x{:x}&0x{:x}", self.field, self.value, self.mask),
        }
    }
}

/// MaskedValue is a ternary string representing an entire header match. Value bits outside the
/// mask are always zero.
#[derive(Eq, PartialEq, Hash, Default, Clone, Copy, Debug)]
pub struct MaskedValue {
    pub value: HeaderBits,
    pub mask: HeaderBits,
}

impl MaskedValue {
    /// Matches every packet.
    pub const ANY: MaskedValue = MaskedValue {
        value: BitArray::ZERO,
        mask: BitArray::ZERO,
    };

    pub fn store<U: Unsigned>(value: U, mask: U, from: usize, to: usize) -> Self {
        let mut v = BitArray::ZERO;
        let mut m = BitArray::ZERO;
        v[from..to].store_le(value & mask);
        m[from..to].store_le(mask);
        Self { value: v, mask: m }
    }

    /// Encode `field == value` as a ternary match.
    pub fn of(field: Field, value: &Value) -> Result<Self, ConfigError> {
        let decl = field.declaration()?;
        value.check(field)?;
        let (v, m) = value.ternary(field);
        Ok(Self::store(v, m, decl.from, decl.to))
    }

    #[inline]
    pub fn is_any(&self) -> bool {
        self.mask.not_any()
    }

    /// Number of constrained bits. More specific matches have more.
    #[inline]
    pub fn specificity(&self) -> usize {
        self.mask.count_ones()
    }

    #[inline]
    pub fn overlaps(&self, rhs: &Self) -> bool {
        raw_zip(self, rhs).all(|(av, am, bv, bm)| (av ^ bv) & am & bm == 0)
    }

    #[inline]
    pub fn intersect(&self, rhs: &Self) -> Option<Self> {
        if self.overlaps(rhs) {
            Some(*self & *rhs)
        } else {
            None
        }
    }

    /// `self` is a superset of `rhs`.
    #[inline]
    pub fn contains(&self, rhs: &Self) -> bool {
        raw_zip(self, rhs).all(|(av, am, bv, bm)| am & !bm == 0 && (av ^ bv) & am == 0)
    }

    /// Split `self - rhs` into disjoint cubes. Bits are fixed from the most significant end of
    /// each field, so the pieces of a field difference are prefixes.
    pub fn subtract(&self, rhs: &Self) -> Vec<Self> {
        if !self.overlaps(rhs) {
            return vec![*self];
        }
        let free: Vec<usize> = rhs
            .mask
            .iter_ones()
            .filter(|i| !self.mask[*i])
            .collect();
        let mut pieces = Vec::with_capacity(free.len());
        let mut rest = *self;
        for i in free.into_iter().rev() {
            let mut piece = rest;
            piece.mask.set(i, true);
            piece.value.set(i, !rhs.value[i]);
            pieces.push(piece);
            rest.mask.set(i, true);
            rest.value.set(i, rhs.value[i]);
        }
        pieces
    }

    /// Whether the concrete packet falls into this match.
    #[inline]
    pub fn matches(&self, packet: &Packet) -> bool {
        self.value
            .as_raw_slice()
            .iter()
            .zip(self.mask.as_raw_slice())
            .zip(packet.bits.as_raw_slice())
            .all(|((v, m), p)| (v ^ p) & m == 0)
    }

    /// The constraint on `field`, `None` if the field is unconstrained or unsupported.
    pub fn field(&self, field: Field) -> Option<FieldMatch> {
        let decl = field.declaration().ok()?;
        let mask: u128 = self.mask[decl.from..decl.to].load_le();
        if mask == 0 {
            return None;
        }
        let value: u128 = self.value[decl.from..decl.to].load_le();
        Some(FieldMatch { field, value, mask })
    }

    /// Every constrained field, in bit order.
    pub fn field_matches(&self) -> impl Iterator<Item = FieldMatch> + '_ {
        Field::supported().filter_map(|f| self.field(f))
    }

    /// Drop any constraint on `field`.
    pub fn erase(&self, field: Field) -> Self {
        let mut erased = *self;
        if let Ok(decl) = field.declaration() {
            erased.value[decl.from..decl.to].fill(false);
            erased.mask[decl.from..decl.to].fill(false);
        }
        erased
    }
}

#[inline]
fn raw_zip<'a>(
    a: &'a MaskedValue,
    b: &'a MaskedValue,
) -> impl Iterator<Item = (u8, u8, u8, u8)> + 'a {
    a.value
        .as_raw_slice()
        .iter()
        .zip(a.mask.as_raw_slice())
        .zip(b.value.as_raw_slice().iter().zip(b.mask.as_raw_slice()))
        .map(|((av, am), (bv, bm))| (*av, *am, *bv, *bm))
}

impl Ord for MaskedValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.mask
            .as_raw_slice()
            .cmp(other.mask.as_raw_slice())
            .then_with(|| self.value.as_raw_slice().cmp(other.value.as_raw_slice()))
    }
}

impl PartialOrd for MaskedValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Binary for MaskedValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut ternary_bits_disp = [b'*'; constant::MAX_POS];
        for (i, bit) in ternary_bits_disp.iter_mut().rev().enumerate() {
            *bit = if !self.mask[i] {
                b'*'
            } else if self.value[i] {
                b'1'
            } else {
                b'0'
            };
        }
        f.write_str(&String::from_utf8_lossy(&ternary_bits_disp))
    }
}

impl Display for MaskedValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_any() {
            return f.write_str("*");
        }
        let mut first = true;
        for fm in self.field_matches() {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{}", fm)?;
        }
        Ok(())
    }
}

/// Merge two matches. Callers must make sure they agree on every commonly masked bit.
impl BitAnd for MaskedValue {
    type Output = MaskedValue;
    #[inline]
    fn bitand(self, rhs: Self) -> Self::Output {
        debug_assert!(self.overlaps(&rhs), "{:b}, {:b} do not intersect", self, rhs);
        MaskedValue {
            value: self.value | rhs.value,
            mask: self.mask | rhs.mask,
        }
    }
}

/// A concrete packet header. Unset fields are zero.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug)]
pub struct Packet {
    bits: HeaderBits,
}

impl Packet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`Packet::set`].
    pub fn with(mut self, field: Field, value: impl Into<Value>) -> Result<Self, ConfigError> {
        self.set(field, &value.into())?;
        Ok(self)
    }

    /// Set `field` to an exact value.
    pub fn set(&mut self, field: Field, value: &Value) -> Result<(), ConfigError> {
        let decl = field.declaration()?;
        value.check(field)?;
        if !value.is_exact() {
            return Err(ConfigError::NotExact {
                field: field.name(),
                value: value.to_string(),
            });
        }
        let (v, _) = value.ternary(field);
        self.bits[decl.from..decl.to].store_le(v);
        Ok(())
    }

    /// Write an already validated exact value, ignoring fields the family does not carry.
    pub(crate) fn store(&mut self, field: Field, value: &Value) {
        if let Ok(decl) = field.declaration() {
            let (v, _) = value.ternary(field);
            self.bits[decl.from..decl.to].store_le(v);
        }
    }

    pub fn get(&self, field: Field) -> Option<Value> {
        let decl = field.declaration().ok()?;
        let bits: u128 = self.bits[decl.from..decl.to].load_le();
        Some(Value::from_bits(field, bits))
    }

    pub fn header(&self) -> &HeaderBits {
        &self.bits
    }
}

impl Ord for Packet {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bits.as_raw_slice().cmp(other.bits.as_raw_slice())
    }
}

impl PartialOrd for Packet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for Packet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for field in Field::supported() {
            let decl = match field.declaration() {
                Ok(decl) => decl,
                Err(_) => continue,
            };
            if self.bits[decl.from..decl.to].not_any() {
                continue;
            }
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            if let Some(value) = self.get(field) {
                write!(f, "{}={}", field, value)?;
            }
        }
        if first {
            f.write_str("{}")?;
        }
        Ok(())
    }
}

/// Predicate is a symbolic condition over packet headers, kept as an immutable tree whose
/// subtrees may be shared between policies.
/// # Predicate
/// ## Methods
/// - [!] : logical NOT
/// - [&] : logical AND
/// - [|] : logical OR
///
/// Constant operands are folded away (`True & p == p`, `!!p == p`), everything else is kept
/// structurally. Two predicates may be semantically equal while differing as trees; ask a
/// [PredicateEngine](engine::PredicateEngine) to compare meanings.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Predicate {
    True,
    False,
    FieldEquals(Field, Value),
    And(Arc<Predicate>, Arc<Predicate>),
    Or(Arc<Predicate>, Arc<Predicate>),
    Not(Arc<Predicate>),
}

impl Predicate {
    /// `field == value`, rejecting unsupported fields and ill-typed values.
    pub fn field(field: Field, value: impl Into<Value>) -> Result<Self, ConfigError> {
        let value = value.into();
        field.declaration()?;
        value.check(field)?;
        Ok(Predicate::FieldEquals(field, value))
    }

    /// Parse both the field name and the literal, e.g. `matches("dstip", "10.0.0.0/8")`.
    pub fn matches(field: &str, literal: &str) -> Result<Self, ConfigError> {
        let field: Field = field.parse()?;
        let value = Value::parse(field, literal)?;
        Self::field(field, value)
    }

    /// Conjunction of several field constraints, `True` when empty.
    pub fn all_of(
        fields: impl IntoIterator<Item = (Field, Value)>,
    ) -> Result<Self, ConfigError> {
        fields
            .into_iter()
            .try_fold(Predicate::True, |acc, (f, v)| Ok(acc & Predicate::field(f, v)?))
    }

    /// Evaluate on a concrete packet.
    pub fn eval(&self, packet: &Packet) -> bool {
        match self {
            Predicate::True => true,
            Predicate::False => false,
            Predicate::FieldEquals(f, v) => match packet.get(*f) {
                Some(actual) => v.contains(&actual),
                None => false,
            },
            Predicate::And(a, b) => a.eval(packet) && b.eval(packet),
            Predicate::Or(a, b) => a.eval(packet) || b.eval(packet),
            Predicate::Not(a) => !a.eval(packet),
        }
    }

    /// The predicate as seen *before* `field` is rewritten to the exact `value`: every test
    /// of `field` becomes a constant.
    pub fn substitute(&self, field: Field, value: &Value) -> Predicate {
        match self {
            Predicate::FieldEquals(f, v) if *f == field => {
                if v.contains(value) {
                    Predicate::True
                } else {
                    Predicate::False
                }
            }
            Predicate::True | Predicate::False | Predicate::FieldEquals(..) => self.clone(),
            Predicate::And(a, b) => a.substitute(field, value) & b.substitute(field, value),
            Predicate::Or(a, b) => a.substitute(field, value) | b.substitute(field, value),
            Predicate::Not(a) => !a.substitute(field, value),
        }
    }

    /// Fields referenced anywhere in the tree.
    pub fn fields(&self) -> BTreeSet<Field> {
        let mut fields = BTreeSet::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields(&self, acc: &mut BTreeSet<Field>) {
        match self {
            Predicate::True | Predicate::False => {}
            Predicate::FieldEquals(f, _) => {
                acc.insert(*f);
            }
            Predicate::And(a, b) | Predicate::Or(a, b) => {
                a.collect_fields(acc);
                b.collect_fields(acc);
            }
            Predicate::Not(a) => a.collect_fields(acc),
        }
    }

    #[inline]
    pub fn is_false(&self) -> bool {
        matches!(self, Predicate::False)
    }

    #[inline]
    pub fn is_true(&self) -> bool {
        matches!(self, Predicate::True)
    }
}

impl BitAnd for Predicate {
    type Output = Predicate;

    fn bitand(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Predicate::False, _) | (_, Predicate::False) => Predicate::False,
            (Predicate::True, p) | (p, Predicate::True) => p,
            (a, b) if a == b => a,
            (a, b) => Predicate::And(Arc::new(a), Arc::new(b)),
        }
    }
}

impl BitOr for Predicate {
    type Output = Predicate;

    fn bitor(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Predicate::True, _) | (_, Predicate::True) => Predicate::True,
            (Predicate::False, p) | (p, Predicate::False) => p,
            (a, b) if a == b => a,
            (a, b) => Predicate::Or(Arc::new(a), Arc::new(b)),
        }
    }
}

impl Not for Predicate {
    type Output = Predicate;

    fn not(self) -> Self::Output {
        match self {
            Predicate::True => Predicate::False,
            Predicate::False => Predicate::True,
            Predicate::Not(inner) => Arc::try_unwrap(inner).unwrap_or_else(|arc| (*arc).clone()),
            p => Predicate::Not(Arc::new(p)),
        }
    }
}

impl Display for Predicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Predicate::True => f.write_str("true"),
            Predicate::False => f.write_str("false"),
            Predicate::FieldEquals(field, value) => write!(f, "match({}={})", field, value),
            Predicate::And(a, b) => write!(f, "({} & {})", a, b),
            Predicate::Or(a, b) => write!(f, "({} | {})", a, b),
            Predicate::Not(a) => write!(f, "~{}", a),
        }
    }
}
