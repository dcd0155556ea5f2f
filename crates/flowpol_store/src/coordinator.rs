use std::{
    fmt::Display,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use indexmap::IndexMap;
use itertools::Itertools;
use log::{debug, info, warn};
use tokio::{
    select, spawn,
    sync::broadcast::{self, error::RecvError},
    time::timeout,
};

use flowpol_compile::{CompileError, Compiler, DeviceCapability, RuleTable};
use flowpol_policy::Policy;

use crate::{
    config::CoordinatorConfig,
    error::{InstallError, TransportError},
    store::{DeviceSlot, DeviceState, Installed, RuleStore},
    transport::{DeviceEvent, DeviceId, EventSender, SwapMode, Transport},
};

/// Broadcast used to cancel every outstanding transport call.
struct KillChannel {
    /// Sender of the kill command.
    tx: broadcast::Sender<()>,
    /// Receiver of the kill command
    rx: broadcast::Receiver<()>,
}

impl Clone for KillChannel {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.resubscribe(),
        }
    }
}

impl KillChannel {
    fn new(cap: usize) -> Self {
        let (tx, rx) = broadcast::channel::<()>(cap.max(1));
        Self { tx, rx }
    }

    fn send(&self) {
        // the channel keeps its own receiver, so this cannot fail
        let _ = self.tx.send(());
    }

    /// Wait for the kill command. A lagging receiver counts as killed.
    async fn recv(&mut self) -> Result<(), RecvError> {
        self.rx.recv().await
    }
}

/// Tables that take effect together under one generation.
#[derive(Clone, Debug)]
pub struct UpdateTransaction {
    generation: u64,
    entries: IndexMap<DeviceId, (Arc<RuleTable>, Option<Policy>)>,
}

impl UpdateTransaction {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Add or replace the table for `device`.
    pub fn insert(&mut self, device: impl Into<DeviceId>, table: RuleTable, policy: Option<Policy>) {
        self.entries
            .insert(device.into(), (Arc::new(table), policy));
    }

    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|d| d.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of a transaction, per device in the order the devices were given.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionReport {
    pub generation: u64,
    pub results: IndexMap<DeviceId, Result<(), InstallError>>,
}

impl TransactionReport {
    pub fn is_success(&self) -> bool {
        self.results.values().all(|r| r.is_ok())
    }

    pub fn get(&self, device: &str) -> Option<&Result<(), InstallError>> {
        self.results.get(device)
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &InstallError)> {
        self.results
            .iter()
            .filter_map(|(d, r)| r.as_ref().err().map(|e| (d.as_str(), e)))
    }
}

impl Display for TransactionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "generation {}", self.generation)?;
        for (device, result) in self.results.iter() {
            match result {
                Ok(()) => write!(f, "\n  {}: ok", device)?,
                Err(e) => write!(f, "\n  {}: {}", device, e)?,
            }
        }
        Ok(())
    }
}

/// One transport call of a table swap.
#[derive(Clone, Copy, Debug)]
enum Step<'a> {
    Install(&'a RuleTable),
    Add(&'a RuleTable),
    Remove(&'a RuleTable),
}

impl<'a> Step<'a> {
    /// The call that reverts an add or a remove. Both are idempotent, so undoing a step the
    /// device never applied is harmless.
    fn undo(self) -> Option<Step<'a>> {
        match self {
            Step::Install(_) => None,
            Step::Add(t) => Some(Step::Remove(t)),
            Step::Remove(t) => Some(Step::Add(t)),
        }
    }
}

struct Inner<T> {
    transport: T,
    store: RuleStore,
    config: CoordinatorConfig,
    compiler: Compiler,
    kill: KillChannel,
    events: EventSender,
    generation: AtomicU64,
}

/// Installs compiled tables on devices through a [Transport].
///
/// A device is always on a complete table: either the one it had or the new one. A failed update
/// leaves the last confirmed table and policy in place. Cloning the coordinator is cheap and
/// clones share all state.
pub struct UpdateCoordinator<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for UpdateCoordinator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport + 'static> UpdateCoordinator<T> {
    pub fn new(transport: T, config: CoordinatorConfig) -> Self {
        let events = EventSender::new(config.event_capacity);
        Self::with_events(transport, config, events)
    }

    /// Use `events` as the device event channel, typically a clone of the sender the transport
    /// publishes on.
    pub fn with_events(transport: T, config: CoordinatorConfig, events: EventSender) -> Self {
        let kill = KillChannel::new(config.kill_capacity);
        UpdateCoordinator {
            inner: Arc::new(Inner {
                transport,
                store: RuleStore::new(),
                config,
                compiler: Compiler::new(),
                kill,
                events,
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn store(&self) -> &RuleStore {
        &self.inner.store
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    pub async fn register(&self, device: impl Into<DeviceId>, capability: DeviceCapability) -> bool {
        self.inner.store.register(device, capability).await
    }

    pub async fn state(&self, device: &str) -> Option<DeviceState> {
        self.inner.store.state(device).await
    }

    pub async fn active_table(&self, device: &str) -> Option<Arc<RuleTable>> {
        self.inner.store.active_table(device).await
    }

    pub async fn active_policy(&self, device: &str) -> Option<Policy> {
        self.inner.store.active_policy(device).await
    }

    /// Device events published by the transport.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.inner.events.subscribe()
    }

    pub fn events(&self) -> EventSender {
        self.inner.events.clone()
    }

    /// Abort every outstanding transport call. Devices that were being updated are rolled back
    /// and end up `Failed` with their prior table. Updates still queued behind another one
    /// return without touching the device.
    pub fn cancel(&self) {
        info!("cancelling outstanding updates");
        self.inner.kill.send();
    }

    /// Start a transaction with a fresh generation.
    pub fn transaction(&self) -> UpdateTransaction {
        UpdateTransaction {
            generation: self.inner.next_generation(),
            entries: IndexMap::new(),
        }
    }

    /// Install a single table.
    pub async fn apply(&self, table: RuleTable, device: &str) -> Result<(), InstallError> {
        let generation = self.inner.next_generation();
        let mut kill = self.inner.kill.clone();
        self.inner
            .install(device, Arc::new(table), None, generation, &mut kill)
            .await
    }

    /// Compile `policy` for every device, then install all tables as one transaction. If any
    /// device cannot take the policy, nothing is installed anywhere.
    pub async fn deploy(&self, policy: &Policy, devices: &[&str]) -> TransactionReport {
        let mut txn = self.transaction();
        let mut errors: IndexMap<DeviceId, InstallError> = IndexMap::new();
        for device in devices.iter() {
            let compiled = match self.inner.store.capability(device).await {
                Some(caps) => self
                    .inner
                    .compiler
                    .compile(policy, &caps)
                    .map_err(InstallError::from),
                None => Err(InstallError::UnknownDevice(device.to_string())),
            };
            match compiled {
                Ok(table) => txn.insert(*device, table, Some(policy.clone())),
                Err(e) => {
                    warn!("{}: {}", device, e);
                    errors.insert(device.to_string(), e);
                }
            }
        }
        if errors.is_empty() {
            return self.apply_transaction(txn).await;
        }
        warn!(
            "generation {}: aborted, {} of {} devices cannot take the policy",
            txn.generation,
            errors.len(),
            devices.len()
        );
        let results = devices
            .iter()
            .map(|d| {
                let result = match errors.swap_remove(*d) {
                    Some(e) => Err(e),
                    None => Err(InstallError::Aborted),
                };
                (d.to_string(), result)
            })
            .collect();
        TransactionReport {
            generation: txn.generation,
            results,
        }
    }

    /// Install every table of the transaction, devices in parallel.
    pub async fn apply_transaction(&self, txn: UpdateTransaction) -> TransactionReport {
        let generation = txn.generation;
        info!("generation {}: updating {} devices", generation, txn.len());
        let handles = txn
            .entries
            .into_iter()
            .map(|(device, (table, policy))| {
                let inner = self.inner.clone();
                let mut kill = self.inner.kill.clone();
                let name = device.clone();
                let handle = spawn(async move {
                    inner
                        .install(&name, table, policy, generation, &mut kill)
                        .await
                });
                (device, handle)
            })
            .collect_vec();

        let mut results = IndexMap::with_capacity(handles.len());
        for (device, handle) in handles {
            let result = match handle.await {
                Ok(r) => r,
                Err(e) => {
                    warn!("{}: update task failed: {}", device, e);
                    Err(InstallError::Aborted)
                }
            };
            results.insert(device, result);
        }
        let report = TransactionReport {
            generation,
            results,
        };
        if report.is_success() {
            info!("generation {}: done", generation);
        } else {
            warn!("{}", report);
        }
        report
    }
}

impl<T: Transport> Inner<T> {
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn install(
        &self,
        device: &str,
        table: Arc<RuleTable>,
        policy: Option<Policy>,
        generation: u64,
        kill: &mut KillChannel,
    ) -> Result<(), InstallError> {
        let slot = self.store.slot(device).await?;
        check_fits(&table, &slot.capability)?;
        let queued = select! {
            biased;
            _ = kill.recv() => None,
            guard = slot.enqueue() => Some(guard),
        };
        let Some(_queue) = queued else {
            warn!("{}: generation {} cancelled while queued", device, generation);
            return Err(InstallError::Cancelled);
        };

        let confirmed = slot.confirmed_generation();
        if generation <= confirmed {
            warn!("{}: generation {} is stale", device, generation);
            return Err(InstallError::Stale {
                generation,
                confirmed,
            });
        }
        let prior = slot.active();
        let state = match prior {
            Some(_) => DeviceState::Updating,
            None => DeviceState::Installing,
        };
        slot.set_state(device, state);

        let result = match (self.transport.swap_mode(device), prior.as_ref()) {
            (SwapMode::Atomic, None) => {
                self.run_plan(device, &[(Step::Install(table.as_ref()), None)], kill)
                    .await
            }
            (SwapMode::Atomic, Some(old)) => {
                let plan = [(
                    Step::Install(table.as_ref()),
                    Some(Step::Install(old.table.as_ref())),
                )];
                self.run_plan(device, &plan, kill).await
            }
            (SwapMode::MakeBeforeBreak, None) => {
                let add = Step::Add(table.as_ref());
                self.run_plan(device, &[(add, add.undo())], kill).await
            }
            (SwapMode::MakeBeforeBreak, Some(old)) => {
                self.make_before_break(device, &slot, &old.table, &table, kill)
                    .await
            }
        };

        match result {
            Ok(()) => {
                info!(
                    "{}: generation {} active, {} rules",
                    device,
                    generation,
                    table.len()
                );
                slot.confirm(
                    device,
                    Installed {
                        generation,
                        table,
                        policy,
                    },
                );
                Ok(())
            }
            Err(e) => {
                warn!("{}: generation {} failed: {}", device, generation, e);
                slot.set_state(device, DeviceState::Failed);
                Err(e)
            }
        }
    }

    /// Stage `new` above `old`, remove `old`, add `new` at its own priorities, then remove the
    /// staged copy. Each intermediate table is complete.
    async fn make_before_break(
        &self,
        device: &str,
        slot: &DeviceSlot,
        old: &RuleTable,
        new: &RuleTable,
        kill: &mut KillChannel,
    ) -> Result<(), InstallError> {
        let levels = slot.capability.max_priority_levels;
        let needed = old.max_priority() as u64 + new.max_priority() as u64 + 2;
        let staged = match old.max_priority().checked_add(1).and_then(|o| new.rebased(o)) {
            Some(staged) if needed <= levels as u64 => staged,
            _ => return Err(InstallError::PriorityExhausted { needed, levels }),
        };

        let plan = [
            Step::Add(&staged),
            Step::Remove(old),
            Step::Add(new),
            Step::Remove(&staged),
        ]
        .map(|step| (step, step.undo()));
        self.run_plan(device, &plan, kill).await
    }

    /// Run the steps in order. When a step fails, its own undo runs first, since the device may
    /// have applied it without acknowledging, then the completed steps are undone in reverse.
    /// Undo calls are not cancellable.
    async fn run_plan(
        &self,
        device: &str,
        plan: &[(Step<'_>, Option<Step<'_>>)],
        kill: &mut KillChannel,
    ) -> Result<(), InstallError> {
        for (i, (step, _)) in plan.iter().enumerate() {
            let Err(e) = self.guarded(device, kill, self.run(device, *step)).await else {
                continue;
            };
            for undo in plan[..=i].iter().rev().filter_map(|(_, undo)| *undo) {
                if let Err(re) = self.bounded(device, self.run(device, undo)).await {
                    warn!("{}: rollback failed: {}", device, re);
                    break;
                }
            }
            return Err(e);
        }
        Ok(())
    }

    async fn run(&self, device: &str, step: Step<'_>) -> Result<(), TransportError> {
        match step {
            Step::Install(table) => {
                debug!("{}: install {} rules", device, table.len());
                self.transport.install_table(device, table).await
            }
            Step::Add(rules) => {
                debug!("{}: add {} rules", device, rules.len());
                self.transport.add_rules(device, rules).await
            }
            Step::Remove(rules) => {
                debug!("{}: remove {} rules", device, rules.len());
                self.transport.remove_rules(device, rules).await
            }
        }
    }

    /// A transport call under the timeout.
    async fn bounded<F>(&self, device: &str, call: F) -> Result<(), InstallError>
    where
        F: Future<Output = Result<(), TransportError>>,
    {
        let limit = self.config.install_timeout;
        match timeout(limit, call).await {
            Ok(r) => r.map_err(InstallError::from),
            Err(_) => {
                warn!("{}: transport call timed out after {:?}", device, limit);
                Err(InstallError::Timeout(limit))
            }
        }
    }

    /// A transport call under the timeout, raced against the kill switch.
    async fn guarded<F>(
        &self,
        device: &str,
        kill: &mut KillChannel,
        call: F,
    ) -> Result<(), InstallError>
    where
        F: Future<Output = Result<(), TransportError>>,
    {
        select! {
            biased;
            _ = kill.recv() => {
                warn!("{}: cancelled", device);
                Err(InstallError::Cancelled)
            }
            r = self.bounded(device, call) => r,
        }
    }
}

fn check_fits(table: &RuleTable, caps: &DeviceCapability) -> Result<(), CompileError> {
    if table.len() > caps.max_rules {
        return Err(CompileError::TableOverflow {
            rules: table.len(),
            max_rules: caps.max_rules,
        });
    }
    if table.max_priority() >= caps.max_priority_levels {
        return Err(CompileError::PriorityOverflow {
            levels: table.max_priority() as usize + 1,
            max_levels: caps.max_priority_levels,
        });
    }
    if let Some(fm) = table
        .iter()
        .flat_map(|r| r.matches.field_matches())
        .find(|fm| !caps.supports(fm.field))
    {
        return Err(CompileError::UnsupportedField(fm.field));
    }
    Ok(())
}
