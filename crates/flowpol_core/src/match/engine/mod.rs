//! Predicate engines decide questions about [Predicate]s by encoding them into an exact set
//! representation.
mod space_engine;

pub use space_engine::HeaderSpaceEngine;

use bitvec::vec::BitVec;

use crate::{
    error::ConfigError,
    r#match::{family::Field, value::Value, Predicate},
};

/// MatchEncoder encodes single field constraints into the engine's set representation.
pub trait MatchEncoder {
    type Space: Clone + PartialEq;

    /// The set of every header.
    fn one(&self) -> Self::Space;

    /// The empty set.
    fn zero(&self) -> Self::Space;

    /// Encode `field == value`.
    fn encode_match(&self, field: Field, value: &Value) -> Result<Self::Space, ConfigError>;
}

/// One cell of a disjoint partition. `members` holds the indices of the input predicates the
/// cell lies in, `cover` is the intersection of those predicates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Atom<S> {
    pub region: S,
    pub cover: S,
    pub members: BitVec,
}

impl<S> Atom<S> {
    pub fn member_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.members.iter_ones()
    }

    pub fn member_count(&self) -> usize {
        self.members.count_ones()
    }
}

/// PredicateEngine is an extended trait of MatchEncoder which answers semantic questions about
/// whole predicate trees.
pub trait PredicateEngine: MatchEncoder {
    /// Encode a predicate tree into its exact set of headers.
    fn encode(&self, pred: &Predicate) -> Result<Self::Space, ConfigError>;

    fn is_empty(&self, pred: &Predicate) -> Result<bool, ConfigError>;

    /// Whether every packet matching `a` also matches `b`.
    fn is_subset_of(&self, a: &Predicate, b: &Predicate) -> Result<bool, ConfigError>;

    /// Split the union of `preds` into pairwise disjoint non-empty atoms, such that every
    /// predicate is exactly the union of the atoms listing it as a member. Atoms are returned in
    /// a deterministic order for a given input sequence.
    fn disjoint_partition(
        &self,
        preds: &[Predicate],
    ) -> Result<Vec<Atom<Self::Space>>, ConfigError>;

    fn equivalent(&self, a: &Predicate, b: &Predicate) -> Result<bool, ConfigError> {
        Ok(self.is_subset_of(a, b)? && self.is_subset_of(b, a)?)
    }

    fn and(&self, a: &Predicate, b: &Predicate) -> Predicate {
        a.clone() & b.clone()
    }

    fn or(&self, a: &Predicate, b: &Predicate) -> Predicate {
        a.clone() | b.clone()
    }

    fn not(&self, a: &Predicate) -> Predicate {
        !a.clone()
    }
}
