use std::{fmt::Display, sync::Arc};

use indexmap::IndexMap;
use log::debug;
use tokio::sync::{watch, Mutex, MutexGuard, RwLock};

use flowpol_compile::{DeviceCapability, RuleTable};
use flowpol_policy::Policy;

use crate::{error::InstallError, transport::DeviceId};

/// Lifecycle of a device's table. Transport calls are outstanding only while `Installing` or
/// `Updating`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceState {
    /// Registered, nothing confirmed yet.
    Empty,
    Installing,
    Active,
    Updating,
    /// The last update did not go through. A previously active table stays in place.
    Failed,
}

impl Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeviceState::Empty => "empty",
            DeviceState::Installing => "installing",
            DeviceState::Active => "active",
            DeviceState::Updating => "updating",
            DeviceState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A table the device confirmed, with the policy it was compiled from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Installed {
    pub generation: u64,
    pub table: Arc<RuleTable>,
    pub policy: Option<Policy>,
}

pub(crate) struct DeviceSlot {
    pub(crate) capability: DeviceCapability,
    queue: Mutex<()>,
    state: watch::Sender<DeviceState>,
    active: watch::Sender<Option<Arc<Installed>>>,
}

impl DeviceSlot {
    fn new(capability: DeviceCapability) -> Self {
        DeviceSlot {
            capability,
            queue: Mutex::new(()),
            state: watch::channel(DeviceState::Empty).0,
            active: watch::channel(None).0,
        }
    }

    /// Updates of one device run one at a time, in arrival order.
    pub(crate) async fn enqueue(&self) -> MutexGuard<'_, ()> {
        self.queue.lock().await
    }

    pub(crate) fn state(&self) -> DeviceState {
        *self.state.borrow()
    }

    pub(crate) fn set_state(&self, device: &str, state: DeviceState) {
        let old = self.state.send_replace(state);
        debug!("{}: {} -> {}", device, old, state);
    }

    pub(crate) fn active(&self) -> Option<Arc<Installed>> {
        self.active.borrow().clone()
    }

    pub(crate) fn confirmed_generation(&self) -> u64 {
        self.active.borrow().as_ref().map_or(0, |a| a.generation)
    }

    pub(crate) fn confirm(&self, device: &str, installed: Installed) {
        self.active.send_replace(Some(Arc::new(installed)));
        self.set_state(device, DeviceState::Active);
    }
}

/// In-memory record of every device's capability, state and confirmed table.
///
/// The registry lock is only held to look a device up. Each device has its own update queue, so
/// updates of different devices never wait on each other.
#[derive(Default)]
pub struct RuleStore {
    devices: RwLock<IndexMap<DeviceId, Arc<DeviceSlot>>>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device. Returns `false`, leaving the device untouched, if it is already registered.
    pub async fn register(&self, device: impl Into<DeviceId>, capability: DeviceCapability) -> bool {
        let device = device.into();
        let mut devices = self.devices.write().await;
        if devices.contains_key(&device) {
            return false;
        }
        debug!("{}: registered", device);
        devices.insert(device, Arc::new(DeviceSlot::new(capability)));
        true
    }

    pub(crate) async fn slot(&self, device: &str) -> Result<Arc<DeviceSlot>, InstallError> {
        self.devices
            .read()
            .await
            .get(device)
            .cloned()
            .ok_or_else(|| InstallError::UnknownDevice(device.to_string()))
    }

    pub async fn devices(&self) -> Vec<DeviceId> {
        self.devices.read().await.keys().cloned().collect()
    }

    pub async fn capability(&self, device: &str) -> Option<DeviceCapability> {
        let slot = self.slot(device).await.ok()?;
        Some(slot.capability.clone())
    }

    pub async fn state(&self, device: &str) -> Option<DeviceState> {
        Some(self.slot(device).await.ok()?.state())
    }

    /// Follow the state changes of a device.
    pub async fn watch_state(&self, device: &str) -> Option<watch::Receiver<DeviceState>> {
        Some(self.slot(device).await.ok()?.state.subscribe())
    }

    pub async fn active(&self, device: &str) -> Option<Arc<Installed>> {
        self.slot(device).await.ok()?.active()
    }

    pub async fn active_table(&self, device: &str) -> Option<Arc<RuleTable>> {
        Some(self.active(device).await?.table.clone())
    }

    pub async fn active_policy(&self, device: &str) -> Option<Policy> {
        self.active(device).await?.policy.clone()
    }
}

#[cfg(test)]
mod tests {
    use flowpol_compile::compile;
    use flowpol_policy::fwd;

    use super::*;

    #[tokio::test]
    async fn test_register() {
        let store = RuleStore::new();
        assert!(store.register("s1", DeviceCapability::default()).await);
        assert!(!store.register("s1", DeviceCapability::default().with_max_rules(1)).await);
        assert_eq!(store.state("s1").await, Some(DeviceState::Empty));
        assert_eq!(
            store.capability("s1").await.map(|c| c.max_rules),
            Some(DeviceCapability::DEFAULT_MAX_RULES)
        );
        assert_eq!(store.state("s2").await, None);
        assert!(matches!(
            store.slot("s2").await,
            Err(InstallError::UnknownDevice(d)) if d == "s2"
        ));
        assert_eq!(store.devices().await, vec!["s1".to_string()]);
    }

    #[tokio::test]
    async fn test_confirm() {
        let store = RuleStore::new();
        store.register("s1", DeviceCapability::default()).await;
        let mut states = store.watch_state("s1").await.unwrap();
        let slot = store.slot("s1").await.unwrap();
        let table = compile(&fwd(1), &DeviceCapability::default()).unwrap();
        slot.set_state("s1", DeviceState::Installing);
        assert_eq!(slot.confirmed_generation(), 0);
        slot.confirm(
            "s1",
            Installed {
                generation: 3,
                table: Arc::new(table.clone()),
                policy: Some(fwd(1)),
            },
        );
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), DeviceState::Active);
        assert_eq!(slot.confirmed_generation(), 3);
        assert_eq!(store.active_table("s1").await.as_deref(), Some(&table));
        assert_eq!(store.active_policy("s1").await, Some(fwd(1)));
    }
}
