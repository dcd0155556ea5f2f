use async_trait::async_trait;
use log::info;
use tokio::sync::broadcast;

use flowpol_compile::RuleTable;
use flowpol_core::{action::PortId, r#match::Packet};

use crate::error::TransportError;

pub type DeviceId = String;

/// How a device replaces its flow table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SwapMode {
    /// The whole table is replaced in one step.
    Atomic,
    /// Rules are added and removed individually. The coordinator stages the new table above the
    /// old one before removing anything.
    MakeBeforeBreak,
}

/// Southbound connection to the devices.
///
/// Every call is bounded by the coordinator's timeout and may be dropped midway when an update
/// is cancelled.
#[async_trait]
pub trait Transport: Send + Sync {
    // Required methods
    async fn install_table(&self, device: &str, table: &RuleTable) -> Result<(), TransportError>;

    // Provided methods
    fn swap_mode(&self, _device: &str) -> SwapMode {
        SwapMode::Atomic
    }

    async fn add_rules(&self, _device: &str, _rules: &RuleTable) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("add_rules"))
    }

    async fn remove_rules(&self, _device: &str, _rules: &RuleTable) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("remove_rules"))
    }
}

/// Something a device told the controller on its own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceEvent {
    PacketIn {
        device: DeviceId,
        in_port: Option<PortId>,
        packet: Packet,
    },
    Disconnected { device: DeviceId },
}

impl DeviceEvent {
    pub fn device(&self) -> &str {
        match self {
            DeviceEvent::PacketIn { device, .. } | DeviceEvent::Disconnected { device } => device,
        }
    }
}

/// Handle transports use to publish [DeviceEvent]s.
#[derive(Clone, Debug)]
pub struct EventSender {
    tx: broadcast::Sender<DeviceEvent>,
}

impl EventSender {
    pub fn new(cap: usize) -> Self {
        let (tx, _) = broadcast::channel(cap.max(1));
        Self { tx }
    }

    /// Returns the number of subscribers that will see the event. Events nobody listens to are
    /// dropped.
    pub fn publish(&self, event: DeviceEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.tx.subscribe()
    }
}

/// Transport that only logs what it would send. Useful to dry-run a deployment.
#[derive(Clone, Debug)]
pub struct LoggingTransport {
    mode: SwapMode,
}

impl LoggingTransport {
    pub fn new(mode: SwapMode) -> Self {
        LoggingTransport { mode }
    }
}

impl Default for LoggingTransport {
    fn default() -> Self {
        Self::new(SwapMode::Atomic)
    }
}

#[async_trait]
impl Transport for LoggingTransport {
    async fn install_table(&self, device: &str, table: &RuleTable) -> Result<(), TransportError> {
        info!("{}: install {} rules", device, table.len());
        for rule in table {
            info!("{}:   {}", device, rule);
        }
        Ok(())
    }

    fn swap_mode(&self, _device: &str) -> SwapMode {
        self.mode
    }

    async fn add_rules(&self, device: &str, rules: &RuleTable) -> Result<(), TransportError> {
        info!("{}: add {} rules", device, rules.len());
        Ok(())
    }

    async fn remove_rules(&self, device: &str, rules: &RuleTable) -> Result<(), TransportError> {
        info!("{}: remove {} rules", device, rules.len());
        Ok(())
    }
}
