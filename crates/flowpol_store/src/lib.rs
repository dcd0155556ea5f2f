//! This crate keeps track of the tables installed on each device and replaces them
//! consistently.
//!
//! [UpdateCoordinator] drives the southbound [Transport]: every call is bounded by a timeout,
//! can be cancelled, and a failed device keeps its previous table. Updates of one device are
//! queued, updates of different devices run in parallel.
mod config;
mod coordinator;
mod error;
mod store;
mod transport;

pub use config::CoordinatorConfig;
pub use coordinator::{TransactionReport, UpdateCoordinator, UpdateTransaction};
pub use error::{ConfigLoadError, InstallError, TransportError};
pub use store::{DeviceState, Installed, RuleStore};
pub use transport::{DeviceEvent, DeviceId, EventSender, LoggingTransport, SwapMode, Transport};

#[allow(missing_docs)]
pub mod prelude {
    #[doc(hidden)]
    pub use crate::{
        CoordinatorConfig, DeviceEvent, DeviceState, EventSender, InstallError, SwapMode,
        Transport, TransportError, UpdateCoordinator,
    };
}
