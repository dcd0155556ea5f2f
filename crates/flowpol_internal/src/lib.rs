//! Re-exports every flowpol crate under one roof.
pub use flowpol_compile as compile;
pub use flowpol_core as core;
pub use flowpol_io as io;
pub use flowpol_policy as policy;
pub use flowpol_store as store;

#[allow(missing_docs)]
pub mod prelude {
    #[doc(hidden)]
    pub use flowpol_compile::{
        compile, CompileError, CompiledRule, Compiler, DeviceCapability, RuleTable,
    };
    #[doc(hidden)]
    pub use flowpol_core::prelude::*;
    #[doc(hidden)]
    pub use flowpol_io::prelude::*;
    #[doc(hidden)]
    pub use flowpol_policy::*;
    #[doc(hidden)]
    pub use flowpol_store::prelude::*;
}
