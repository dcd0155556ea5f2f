//! This crate compiles policies into prioritized flow tables for a given device.
mod capability;
mod compiler;
mod error;
mod table;

pub use capability::DeviceCapability;
pub use compiler::{compile, flatten, Compiler};
pub use error::{CompileError, TableError};
pub use table::{CompiledRule, RuleTable};
