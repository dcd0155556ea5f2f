//! # flowpol
//! Compose forwarding policies from predicates and actions, compile them into prioritized flow
//! tables for each device, and install the tables consistently.
//!
//! ```no_run
//! use flowpol::prelude::*;
//!
//! let servers = ["10.0.0.11", "10.0.0.12", "10.0.0.13"];
//! let policy = parallel_all(servers.iter().enumerate().map(|(i, ip)| {
//!     leaf(Predicate::matches("dstip", ip).unwrap(), [Action::Forward(i as u32 + 1)]).unwrap()
//! }))
//! .unwrap();
//! let table = compile(&policy, &DeviceCapability::default()).unwrap();
//! assert_eq!(table.len(), 4);
//! ```
pub use flowpol_internal::*;
