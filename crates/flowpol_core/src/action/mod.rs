//! # Action
//! An [Action] is one step applied to a packet. Consecutive steps applied to one packet make an
//! [Emit], and an [ActionSet] is a set of emits applied to copies of the same packet.
pub mod action_set;

pub use action_set::ActionSet;

use std::fmt::{Display, Formatter};

use crate::{
    error::ConfigError,
    r#match::{family::Field, value::Value, Packet, Predicate},
};

pub type PortId = u32;

/// A packet leaving the device, `port` is `None` when no output port was chosen.
pub type Delivery = (Option<PortId>, Packet);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Action {
    Drop,
    Forward(PortId),
    Modify(Field, Value),
}

impl Action {
    /// Rewrite `field` to `value`. Only exact values are accepted.
    pub fn modify(field: Field, value: impl Into<Value>) -> Result<Self, ConfigError> {
        let value = value.into();
        field.declaration()?;
        value.check(field)?;
        if !value.is_exact() {
            return Err(ConfigError::NotExact {
                field: field.name(),
                value: value.to_string(),
            });
        }
        Ok(Action::Modify(field, value))
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Drop => f.write_str("drop"),
            Action::Forward(port) => write!(f, "forward({})", port),
            Action::Modify(field, value) => write!(f, "modify({}={})", field, value),
        }
    }
}

/// One output packet: field rewrites plus an optional egress port. A field is rewritten at most
/// once and the last write wins. Rewrites of distinct fields commute, so they are kept in field
/// order and emits with the same effect compare equal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Emit {
    mods: Vec<(Field, Value)>,
    port: Option<PortId>,
}

impl Emit {
    /// Leaves the packet untouched.
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn forward(port: PortId) -> Self {
        Emit {
            mods: vec![],
            port: Some(port),
        }
    }

    pub fn modify(field: Field, value: impl Into<Value>) -> Result<Self, ConfigError> {
        let mut emit = Emit::identity();
        emit.push(Action::modify(field, value)?);
        Ok(emit)
    }

    pub fn mods(&self) -> &[(Field, Value)] {
        &self.mods
    }

    pub fn port(&self) -> Option<PortId> {
        self.port
    }

    pub fn is_identity(&self) -> bool {
        self.mods.is_empty() && self.port.is_none()
    }

    /// Append a step. Returns `false` for [Action::Drop], which an emit cannot express.
    fn push(&mut self, action: Action) -> bool {
        match action {
            Action::Drop => return false,
            Action::Forward(port) => self.port = Some(port),
            Action::Modify(field, value) => {
                match self.mods.binary_search_by_key(&field, |(f, _)| *f) {
                    Ok(i) => self.mods[i].1 = value,
                    Err(i) => self.mods.insert(i, (field, value)),
                }
            }
        }
        true
    }

    /// Apply `self`, then `next`, to the same packet.
    pub fn then(&self, next: &Emit) -> Emit {
        let mut emit = self.clone();
        for (field, value) in next.mods.iter() {
            emit.push(Action::Modify(*field, *value));
        }
        if next.port.is_some() {
            emit.port = next.port;
        }
        emit
    }

    /// The condition a packet must satisfy *before* this emit so that it satisfies `pred`
    /// afterwards.
    pub fn pullback(&self, pred: &Predicate) -> Predicate {
        self.mods
            .iter()
            .fold(pred.clone(), |p, (field, value)| p.substitute(*field, value))
    }

    pub fn apply(&self, packet: &Packet) -> Delivery {
        let mut out = *packet;
        for (field, value) in self.mods.iter() {
            out.store(*field, value);
        }
        (self.port, out)
    }

    /// The steps of this emit, rewrites first in field order.
    pub fn actions(&self) -> impl Iterator<Item = Action> + '_ {
        self.mods
            .iter()
            .map(|(f, v)| Action::Modify(*f, *v))
            .chain(self.port.map(Action::Forward))
    }
}

impl TryFrom<Action> for Emit {
    type Error = Action;

    fn try_from(action: Action) -> Result<Self, Self::Error> {
        let mut emit = Emit::identity();
        if emit.push(action) {
            Ok(emit)
        } else {
            Err(action)
        }
    }
}

impl Display for Emit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("[")?;
        for (i, action) in self.actions().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", action)?;
        }
        f.write_str("]")
    }
}
