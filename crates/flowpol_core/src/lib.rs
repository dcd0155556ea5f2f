//! This crate provides header predicates, their set semantics, and packet actions.
pub mod action;
pub mod error;
pub mod r#match;

#[allow(missing_docs)]
pub mod prelude {
    #[doc(hidden)]
    pub use crate::{
        action::{Action, ActionSet, Delivery, Emit, PortId},
        error::{CompositionError, ConfigError},
        r#match::{
            engine::{Atom, HeaderSpaceEngine, MatchEncoder, PredicateEngine},
            family::{constant, FamilyDecl, Field, FieldKind, MatchFamily},
            value::{MacAddr, Value},
            FieldMatch, HeaderBits, HeaderSpace, MaskedValue, Packet, Predicate,
        },
    };
}
