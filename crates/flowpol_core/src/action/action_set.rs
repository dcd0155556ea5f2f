use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter},
};

use crate::{
    action::{Action, Delivery, Emit, PortId},
    error::{CompositionError, ConfigError},
    r#match::{family::Field, value::Value, Packet},
};

/// Emits applied in parallel to copies of one packet. The empty set drops the packet.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionSet(BTreeSet<Emit>);

impl ActionSet {
    pub fn drop() -> Self {
        ActionSet(BTreeSet::new())
    }

    pub fn identity() -> Self {
        Emit::identity().into()
    }

    pub fn forward(port: PortId) -> Self {
        Emit::forward(port).into()
    }

    pub fn modify(field: Field, value: impl Into<Value>) -> Result<Self, ConfigError> {
        Ok(Emit::modify(field, value)?.into())
    }

    #[inline]
    pub fn is_drop(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of packets produced.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Emit> {
        self.0.iter()
    }

    /// The packet is duplicated and processed by both sides.
    pub fn union(&self, rhs: &Self) -> Self {
        ActionSet(self.0.union(&rhs.0).cloned().collect())
    }

    /// Apply `self` then `rhs` to the same packet. `self` must produce exactly one packet.
    pub fn sequence(&self, rhs: &Self) -> Result<Self, CompositionError> {
        let mut emits = self.0.iter();
        match (emits.next(), emits.next()) {
            (None, _) => Err(CompositionError::AfterDrop),
            (Some(first), None) => Ok(rhs.0.iter().map(|e| first.then(e)).collect()),
            (Some(_), Some(_)) => Err(CompositionError::MultiplePackets(self.len())),
        }
    }

    /// Pairwise sequencing of every emit on the left with every emit on the right. Unlike
    /// [ActionSet::sequence] this never fails: dropping on either side drops the pair.
    pub fn then(&self, rhs: &Self) -> Self {
        self.0
            .iter()
            .flat_map(|a| rhs.0.iter().map(move |b| a.then(b)))
            .collect()
    }

    /// Sequence single actions left to right.
    pub fn from_actions(
        actions: impl IntoIterator<Item = Action>,
    ) -> Result<Self, CompositionError> {
        actions
            .into_iter()
            .try_fold(ActionSet::identity(), |acc, action| {
                acc.sequence(&ActionSet::from(action))
            })
    }

    pub fn apply(&self, packet: &Packet) -> BTreeSet<Delivery> {
        self.0.iter().map(|e| e.apply(packet)).collect()
    }
}

impl From<Emit> for ActionSet {
    fn from(emit: Emit) -> Self {
        ActionSet(BTreeSet::from([emit]))
    }
}

impl From<Action> for ActionSet {
    fn from(action: Action) -> Self {
        Emit::try_from(action)
            .map(ActionSet::from)
            .unwrap_or_default()
    }
}

impl FromIterator<Emit> for ActionSet {
    fn from_iter<T: IntoIterator<Item = Emit>>(iter: T) -> Self {
        ActionSet(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ActionSet {
    type Item = &'a Emit;
    type IntoIter = std::collections::btree_set::Iter<'a, Emit>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Display for ActionSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return f.write_str("drop");
        }
        for (i, emit) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" + ")?;
            }
            write!(f, "{}", emit)?;
        }
        Ok(())
    }
}
