use flowpol_core::{error::ConfigError, r#match::family::Field};
use thiserror::Error;

/// The policy cannot be turned into a table for the device. Nothing is truncated: either the
/// whole table fits or compilation fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("{rules} rules do not fit into a table of {max_rules}")]
    TableOverflow { rules: usize, max_rules: usize },
    #[error("{levels} priority levels needed, the device has {max_levels}")]
    PriorityOverflow { levels: usize, max_levels: u32 },
    #[error("device cannot match on field `{0}`")]
    UnsupportedField(Field),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A rule table breaks one of its structural invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("rules {0} and {1} share priority {2} and overlap")]
    SharedPriority(usize, usize, u32),
    #[error("no rule matches {0}")]
    Uncovered(String),
}
