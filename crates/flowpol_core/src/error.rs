//! Errors raised while building predicates, actions and policies.
use thiserror::Error;

use crate::r#match::family::FieldKind;

/// A predicate or action is malformed. Raised at composition time, before anything reaches the
/// compiler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The field is unknown, or not part of the compiled-in match family.
    #[error("unsupported field `{0}`")]
    UnsupportedField(String),
    /// The value has a different kind than the field accepts.
    #[error("field `{field}` expects {expected:?}, got `{value}`")]
    ValueKind {
        field: &'static str,
        expected: FieldKind,
        value: String,
    },
    /// The value does not fit into the field.
    #[error("value `{value}` does not fit into the {width} bits of field `{field}`")]
    ValueOutOfRange {
        field: &'static str,
        width: u32,
        value: String,
    },
    /// The literal could not be parsed.
    #[error("malformed literal `{literal}` for field `{field}`")]
    MalformedLiteral { field: String, literal: String },
    /// A rewrite needs an exact value, not a prefix.
    #[error("field `{field}` can only be rewritten to an exact value, got `{value}`")]
    NotExact { field: &'static str, value: String },
    /// A fold over policies was given nothing to fold.
    #[error("cannot build a policy from an empty sequence")]
    EmptyPolicy,
}

/// Actions were sequenced in a way that has no single-packet meaning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompositionError {
    /// Nothing can follow a drop.
    #[error("cannot sequence actions after a drop")]
    AfterDrop,
    /// The left-hand side emits more than one packet.
    #[error("cannot sequence after an action set producing {0} packets")]
    MultiplePackets(usize),
}
