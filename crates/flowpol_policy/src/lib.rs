//! # Policy
//! A [Policy] is an immutable description of what a device does with a packet, built from
//! predicates and actions with the combinators in this crate.
//!
//! ## Example
//! ```no_run
//! use flowpol_core::prelude::*;
//! use flowpol_policy::*;
//!
//! let web = Predicate::matches("dstport", "80").unwrap();
//! let policy = if_then_else(web, fwd(1), drop_all());
//! let pkt = Packet::new().with(Field::DstPort, 80u64).unwrap();
//! assert_eq!(policy.eval(&pkt).len(), 1);
//! ```
use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter},
    sync::Arc,
};

use flowpol_core::{
    action::{Action, ActionSet, Delivery, Emit, PortId},
    error::{CompositionError, ConfigError},
    r#match::{family::Field, value::Value, Packet, Predicate},
};

/// Policy nodes hold their children behind [Arc], so cloning a policy is cheap and subtrees are
/// shared between the policies built from them.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Policy {
    /// Passes packets matching the predicate unchanged, drops the rest.
    Filter(Predicate),
    Act(ActionSet),
    /// Both policies see a copy of the packet, outputs are merged.
    Parallel(Arc<Policy>, Arc<Policy>),
    /// Every output of the first policy is fed into the second.
    Sequential(Arc<Policy>, Arc<Policy>),
    IfThenElse(Predicate, Arc<Policy>, Arc<Policy>),
}

pub fn filter(pred: Predicate) -> Policy {
    Policy::Filter(pred)
}

pub fn act(actions: ActionSet) -> Policy {
    Policy::Act(actions)
}

pub fn identity() -> Policy {
    Policy::Filter(Predicate::True)
}

/// Drops every packet.
pub fn drop_all() -> Policy {
    Policy::Filter(Predicate::False)
}

pub fn fwd(port: PortId) -> Policy {
    Policy::Act(ActionSet::forward(port))
}

pub fn modify(field: Field, value: impl Into<Value>) -> Result<Policy, ConfigError> {
    Ok(Policy::Act(ActionSet::modify(field, value)?))
}

/// `filter(pred) >> actions`, with the actions sequenced left to right.
pub fn leaf(
    pred: Predicate,
    actions: impl IntoIterator<Item = Action>,
) -> Result<Policy, CompositionError> {
    Ok(sequential(
        filter(pred),
        act(ActionSet::from_actions(actions)?),
    ))
}

pub fn parallel(p1: Policy, p2: Policy) -> Policy {
    Policy::Parallel(Arc::new(p1), Arc::new(p2))
}

pub fn sequential(p1: Policy, p2: Policy) -> Policy {
    Policy::Sequential(Arc::new(p1), Arc::new(p2))
}

pub fn if_then_else(pred: Predicate, p1: Policy, p2: Policy) -> Policy {
    Policy::IfThenElse(pred, Arc::new(p1), Arc::new(p2))
}

/// Apply `p` to packets matching `pred`, drop the rest.
pub fn restrict(p: Policy, pred: Predicate) -> Policy {
    if_then_else(pred, p, drop_all())
}

/// Left fold of [parallel] over a non-empty sequence.
pub fn parallel_all(policies: impl IntoIterator<Item = Policy>) -> Result<Policy, ConfigError> {
    policies
        .into_iter()
        .reduce(parallel)
        .ok_or(ConfigError::EmptyPolicy)
}

/// Left fold of [sequential] over a non-empty sequence.
pub fn sequential_all(policies: impl IntoIterator<Item = Policy>) -> Result<Policy, ConfigError> {
    policies
        .into_iter()
        .reduce(sequential)
        .ok_or(ConfigError::EmptyPolicy)
}

impl Policy {
    /// Reference interpreter: every packet the policy sends out for `packet`, with the port it
    /// was forwarded to.
    pub fn eval(&self, packet: &Packet) -> BTreeSet<Delivery> {
        self.eval_from((None, *packet))
    }

    fn eval_from(&self, input: Delivery) -> BTreeSet<Delivery> {
        let (port, packet) = input;
        match self {
            Policy::Filter(pred) => {
                if pred.eval(&packet) {
                    BTreeSet::from([input])
                } else {
                    BTreeSet::new()
                }
            }
            Policy::Act(actions) => actions
                .iter()
                .map(|emit| {
                    let (out_port, out) = emit.apply(&packet);
                    (out_port.or(port), out)
                })
                .collect(),
            Policy::Parallel(a, b) => {
                let mut out = a.eval_from(input);
                out.extend(b.eval_from(input));
                out
            }
            Policy::Sequential(a, b) => a
                .eval_from(input)
                .into_iter()
                .flat_map(|mid| b.eval_from(mid))
                .collect(),
            Policy::IfThenElse(pred, a, b) => {
                if pred.eval(&packet) {
                    a.eval_from(input)
                } else {
                    b.eval_from(input)
                }
            }
        }
    }

    pub fn is_drop(&self) -> bool {
        match self {
            Policy::Filter(pred) => pred.is_false(),
            Policy::Act(actions) => actions.is_drop(),
            _ => false,
        }
    }
}

fn fmt_emit(emit: &Emit, f: &mut Formatter<'_>) -> std::fmt::Result {
    if emit.is_identity() {
        return f.write_str("identity");
    }
    for (i, action) in emit.actions().enumerate() {
        if i > 0 {
            f.write_str(" >> ")?;
        }
        match action {
            Action::Forward(port) => write!(f, "fwd({})", port)?,
            Action::Modify(field, value) => write!(f, "modify({}={})", field, value)?,
            Action::Drop => f.write_str("drop")?,
        }
    }
    Ok(())
}

/// Renders with parentheses when `+` would otherwise escape.
struct Grouped<'a>(&'a Policy);

impl Display for Grouped<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({})", self.0)
    }
}

impl Policy {
    fn is_sum(&self) -> bool {
        match self {
            Policy::Parallel(..) => true,
            Policy::Act(actions) => actions.len() > 1,
            _ => false,
        }
    }
}

/// Renders the textual policy syntax: `+` is parallel, `>>` is sequential and binds tighter.
impl Display for Policy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Policy::Filter(Predicate::True) => f.write_str("identity"),
            Policy::Filter(Predicate::False) => f.write_str("drop"),
            Policy::Filter(pred) => write!(f, "{}", pred),
            Policy::Act(actions) if actions.is_drop() => f.write_str("drop"),
            Policy::Act(actions) => {
                for (i, emit) in actions.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" + ")?;
                    }
                    fmt_emit(emit, f)?;
                }
                Ok(())
            }
            Policy::Parallel(a, b) if b.is_sum() => write!(f, "{} + {}", a, Grouped(b)),
            Policy::Parallel(a, b) => write!(f, "{} + {}", a, b),
            Policy::Sequential(a, b) => {
                if a.is_sum() {
                    write!(f, "{}", Grouped(a))?;
                } else {
                    write!(f, "{}", a)?;
                }
                f.write_str(" >> ")?;
                if b.is_sum() || matches!(b.as_ref(), Policy::Sequential(..)) {
                    write!(f, "{}", Grouped(b))
                } else {
                    write!(f, "{}", b)
                }
            }
            Policy::IfThenElse(pred, a, b) => write!(f, "if_({}, {}, {})", pred, a, b),
        }
    }
}
