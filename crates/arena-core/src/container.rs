// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! The execution container: one store, one module set, one tick loop, one
//! command queue, one snapshot cache, and a set of matches.
//!
//! Tick phases, in order: drain commands → run systems → notify listeners
//! → record metrics. Command and system failures are logged (and routed to
//! the submitting player's error stream where one exists); they never
//! abort the tick. Tick numbers are strictly monotonic.
//!
//! Lifecycle: `Created → Starting → Running → (Paused ↔ Running) →
//! Stopping → Stopped`. Stop cancels the tick scheduler and fails queued
//! commands as cancelled.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::{Duration, Instant};

use arena_proto::dto::{CommandInfo, ContainerStatsResponse, ParamInfo, ParamKind};
use arena_proto::wire::SnapshotWire;
use arena_proto::{ErrorBody, ErrorKind};
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::QueryCache;
use crate::command::{
    validate_params, CommandQueue, LogErrorSink, PlayerErrorSink, QueuedCommand,
};
use crate::entity::player_slot;
use crate::error::CoreError;
use crate::module::{CommandInvocation, ModuleDecl, ModuleIdentifier, ModuleSlot};
use crate::registry::{ModuleLibrary, ModuleSet};
use crate::snapshot::{build_player_snapshot, SnapshotCaches, SnapshotPolicy};
use crate::store::Store;
use crate::view::ModuleStore;

/// Qualified name of the privileged module-install command.
pub const INSTALL_MODULE_COMMAND: &str = "core.install_module";

/// Resource limits and tunables for one container.
#[derive(Debug, Clone, Copy)]
pub struct ContainerConfig {
    /// Entity slot capacity.
    pub max_entities: usize,
    /// Resident-memory budget for component columns.
    pub max_memory_bytes: usize,
    /// Commands drained per tick.
    pub max_commands_per_tick: usize,
    /// Command queue depth limit.
    pub max_command_queue: usize,
    /// Snapshot cache tunables.
    pub snapshot_policy: SnapshotPolicy,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            max_entities: 4096,
            max_memory_bytes: 64 * 1024 * 1024,
            max_commands_per_tick: 64,
            max_command_queue: 1024,
            snapshot_policy: SnapshotPolicy::default(),
        }
    }
}

/// Container lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// Built, not yet started.
    Created,
    /// Transitioning into `Running`.
    Starting,
    /// Ticking (manually or on the scheduler).
    Running,
    /// Tick gate closed; state retained.
    Paused,
    /// Shutting down; rejects new work.
    Stopping,
    /// Fully stopped.
    Stopped,
}

impl ContainerState {
    /// Lowercase state name for the stats surface.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

/// Consumer notified after each tick (snapshot broadcaster, recorders).
///
/// Notification is fire-and-forget: implementations must hand off quickly
/// (e.g. a channel send) and never block the tick worker.
pub trait TickListener: Send + Sync {
    /// Called after systems ran for `tick`.
    fn on_tick(&self, tick: u64);
}

/// One match hosted by a container.
#[derive(Debug, Clone)]
struct MatchState {
    /// Enabled modules, core first, in install order.
    enabled: Vec<ModuleSlot>,
    player_limit: u32,
}

/// Simulation state guarded by the container's reader-writer lock.
#[derive(Debug)]
pub struct Simulation {
    store: Store,
    modules: ModuleSet,
    queries: Mutex<QueryCache>,
    matches: FxHashMap<u64, MatchState>,
    next_match_id: u64,
}

/// Rolling tick metrics for the stats surface.
#[derive(Debug, Default, Clone)]
pub struct TickMetrics {
    /// Ticks executed since creation.
    pub ticks_total: u64,
    /// Commands consumed since creation.
    pub commands_total: u64,
    /// Duration of the most recent tick, microseconds.
    pub last_tick_duration_us: u64,
    /// Commands consumed by the most recent tick.
    pub last_commands: usize,
    /// Per-system durations of the most recent tick.
    pub per_system_last_us: Vec<(String, u64)>,
}

/// An isolated runtime hosting an ECS store, a tick loop, and matches.
pub struct Container {
    id: String,
    config: ContainerConfig,
    library: Arc<ModuleLibrary>,
    sim: RwLock<Simulation>,
    queue: Mutex<CommandQueue>,
    snapshots: Mutex<SnapshotCaches>,
    state: Mutex<ContainerState>,
    tick: AtomicU64,
    auto: Mutex<Option<JoinHandle<()>>>,
    listeners: RwLock<Vec<Arc<dyn TickListener>>>,
    error_sink: Arc<dyn PlayerErrorSink>,
    metrics: Mutex<TickMetrics>,
}

impl Container {
    /// Builds a container and installs `modules` from the library.
    pub fn new(
        id: impl Into<String>,
        config: ContainerConfig,
        library: Arc<ModuleLibrary>,
        modules: &[ModuleIdentifier],
        error_sink: Option<Arc<dyn PlayerErrorSink>>,
    ) -> Result<Arc<Self>, CoreError> {
        let mut store = Store::new(config.max_entities);
        let mut module_set = ModuleSet::new(&store);
        for identifier in modules {
            let factory = library
                .resolve(identifier)
                .ok_or_else(|| CoreError::ModuleUnknown(identifier.to_string()))?;
            let decl = module_set.build_decl(factory.as_ref())?;
            check_memory_budget(&store, &decl, config.max_memory_bytes)?;
            module_set.install_decl(&mut store, decl)?;
        }
        let id = id.into();
        info!(container_id = %id, modules = modules.len(), "container created");
        Ok(Arc::new(Self {
            id,
            config,
            library,
            sim: RwLock::new(Simulation {
                store,
                modules: module_set,
                queries: Mutex::new(QueryCache::default()),
                matches: FxHashMap::default(),
                next_match_id: 1,
            }),
            queue: Mutex::new(CommandQueue::new(config.max_command_queue)),
            snapshots: Mutex::new(SnapshotCaches::new(config.snapshot_policy)),
            state: Mutex::new(ContainerState::Created),
            tick: AtomicU64::new(0),
            auto: Mutex::new(None),
            listeners: RwLock::new(Vec::new()),
            error_sink: error_sink.unwrap_or_else(|| Arc::new(LogErrorSink)),
            metrics: Mutex::new(TickMetrics::default()),
        }))
    }

    /// Container id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ContainerState {
        *self.lock_state()
    }

    /// Last completed tick number.
    #[must_use]
    pub fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    fn lock_state(&self) -> MutexGuard<'_, ContainerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_queue(&self) -> MutexGuard<'_, CommandQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_metrics(&self) -> MutexGuard<'_, TickMetrics> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_snapshots(&self) -> MutexGuard<'_, SnapshotCaches> {
        self.snapshots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_sim(&self) -> RwLockReadGuard<'_, Simulation> {
        self.sim.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_sim(&self) -> RwLockWriteGuard<'_, Simulation> {
        self.sim.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// `Created → Running`.
    pub fn start(&self) -> Result<(), CoreError> {
        let mut state = self.lock_state();
        match *state {
            ContainerState::Created => {
                *state = ContainerState::Starting;
                *state = ContainerState::Running;
                info!(container_id = %self.id, "container started");
                Ok(())
            }
            other => Err(CoreError::InvalidState(other.name())),
        }
    }

    /// `Running → Paused`.
    pub fn pause(&self) -> Result<(), CoreError> {
        let mut state = self.lock_state();
        match *state {
            ContainerState::Running => {
                *state = ContainerState::Paused;
                Ok(())
            }
            other => Err(CoreError::InvalidState(other.name())),
        }
    }

    /// `Paused → Running`.
    pub fn resume(&self) -> Result<(), CoreError> {
        let mut state = self.lock_state();
        match *state {
            ContainerState::Paused => {
                *state = ContainerState::Running;
                Ok(())
            }
            other => Err(CoreError::InvalidState(other.name())),
        }
    }

    /// Stops the container: cancels the scheduler and fails queued
    /// commands as cancelled. Idempotent once stopped.
    pub fn stop(&self) -> Result<(), CoreError> {
        {
            let mut state = self.lock_state();
            match *state {
                ContainerState::Stopped | ContainerState::Stopping => return Ok(()),
                _ => *state = ContainerState::Stopping,
            }
        }
        self.stop_auto();
        let abandoned = self.lock_queue().fail_all();
        for command in &abandoned {
            if let Some(player) = &command.player {
                self.error_sink.report(
                    player.match_id,
                    &player.player_id,
                    ErrorBody::new(
                        ErrorKind::Cancelled,
                        format!("command `{}` dropped: container is stopping", command.name),
                    ),
                );
            }
        }
        *self.lock_state() = ContainerState::Stopped;
        info!(container_id = %self.id, dropped_commands = abandoned.len(), "container stopped");
        Ok(())
    }

    // ── Tick loop ───────────────────────────────────────────────────

    /// Runs one tick. Fails `Conflict` unless the container is running.
    pub fn advance(&self) -> Result<u64, CoreError> {
        match self.state() {
            ContainerState::Running => {}
            ContainerState::Stopping => return Err(CoreError::ContainerStopping),
            other => return Err(CoreError::InvalidState(other.name())),
        }
        let tick = self.tick.fetch_add(1, Ordering::AcqRel) + 1;
        let started = Instant::now();

        let commands = self
            .lock_queue()
            .drain(self.config.max_commands_per_tick);
        let commands_consumed = commands.len();

        let mut per_system = Vec::new();
        {
            let mut sim = self.write_sim();
            // Phase 1: commands run before systems.
            for command in commands {
                self.execute_command(&mut sim, command);
            }
            // Phase 2: systems of every module enabled in at least one
            // match, module order then declaration order.
            let enabled: FxHashSet<ModuleSlot> = sim
                .matches
                .values()
                .flat_map(|m| m.enabled.iter().copied())
                .collect();
            let Simulation { store, modules, queries, .. } = &mut *sim;
            for module in modules.modules_mut() {
                if !enabled.contains(&module.slot) {
                    continue;
                }
                let slot = module.slot;
                let module_name = module.identifier.name.clone();
                for system in &mut module.systems {
                    let system_started = Instant::now();
                    let outcome = catch_unwind(AssertUnwindSafe(|| {
                        let mut view =
                            ModuleStore::new(&mut *store, &*queries, slot, &module_name);
                        system.run(tick, &mut view)
                    }));
                    match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            // Attributed and contained: the tick goes on.
                            warn!(
                                container_id = %self.id,
                                module = %module_name,
                                system = system.name(),
                                %err,
                                "system failed"
                            );
                        }
                        Err(_) => {
                            error!(
                                container_id = %self.id,
                                module = %module_name,
                                system = system.name(),
                                "system panicked"
                            );
                        }
                    }
                    per_system.push((
                        format!("{module_name}/{}", system.name()),
                        system_started.elapsed().as_micros() as u64,
                    ));
                }
            }
        }

        // Phase 3: fire-and-forget listener notification.
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener.on_tick(tick);
        }

        // Phase 4: metrics.
        {
            let mut metrics = self.lock_metrics();
            metrics.ticks_total += 1;
            metrics.commands_total += commands_consumed as u64;
            metrics.last_commands = commands_consumed;
            metrics.last_tick_duration_us = started.elapsed().as_micros() as u64;
            metrics.per_system_last_us = per_system;
        }
        Ok(tick)
    }

    fn execute_command(&self, sim: &mut Simulation, command: QueuedCommand) {
        let result = self.try_execute_command(sim, &command);
        if let Err(err) = result {
            warn!(
                container_id = %self.id,
                command = %command.name,
                %err,
                "command rejected"
            );
            if let Some(player) = &command.player {
                self.error_sink
                    .report(player.match_id, &player.player_id, err.to_body());
            }
        }
    }

    fn try_execute_command(
        &self,
        sim: &mut Simulation,
        command: &QueuedCommand,
    ) -> Result<(), CoreError> {
        if let Some(match_id) = command.match_id {
            if !sim.matches.contains_key(&match_id) {
                return Err(CoreError::MatchNotFound(match_id));
            }
        }
        if command.name == INSTALL_MODULE_COMMAND {
            let spec = command
                .parameters
                .get("module")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    CoreError::InvalidArgument("missing string parameter `module`".into())
                })?;
            let identifier: ModuleIdentifier = spec.parse()?;
            return self.install_into(sim, &identifier);
        }

        let (slot, index) = sim
            .modules
            .command(&command.name)
            .ok_or_else(|| CoreError::UnknownCommand(command.name.clone()))?;
        let Simulation { store, modules, queries, .. } = sim;
        let module = &mut modules.modules_mut()[slot.0 as usize];
        let module_name = module.identifier.name.clone();
        let installed = &mut module.commands[index];
        validate_params(&installed.spec.parameters, &command.parameters)?;
        let invocation = CommandInvocation {
            match_id: command.match_id,
            parameters: &command.parameters,
            player_id: command.player.as_ref().map(|p| p.player_id.as_str()),
        };
        let mut view = ModuleStore::new(store, queries, slot, &module_name);
        installed.spec.handler.execute(&invocation, &mut view)?;
        Ok(())
    }

    /// Schedules periodic `advance()` calls every `interval_ms`.
    ///
    /// Replaces any previous schedule. Ticks are skipped while paused and
    /// the task exits when the container stops or is dropped.
    pub fn play(self: &Arc<Self>, interval_ms: u64) -> Result<(), CoreError> {
        match self.state() {
            ContainerState::Running | ContainerState::Paused => {}
            ContainerState::Stopping | ContainerState::Stopped => {
                return Err(CoreError::ContainerStopping)
            }
            other => return Err(CoreError::InvalidState(other.name())),
        }
        self.stop_auto();
        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = Duration::from_millis(interval_ms.max(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(container) = weak.upgrade() else {
                    break;
                };
                match container.state() {
                    ContainerState::Running => {
                        if let Err(err) = container.advance() {
                            debug!(container_id = %container.id, %err, "scheduled tick skipped");
                        }
                    }
                    ContainerState::Paused => {}
                    _ => break,
                }
            }
        });
        *self.auto.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Cancels the periodic tick scheduler, if any.
    pub fn stop_auto(&self) {
        if let Some(handle) = self
            .auto
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }

    /// Registers a post-tick listener.
    pub fn add_listener(&self, listener: Arc<dyn TickListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    // ── Commands ────────────────────────────────────────────────────

    /// Queues a command for the next drain.
    pub fn submit_command(&self, command: QueuedCommand) -> Result<(), CoreError> {
        match self.state() {
            ContainerState::Stopping | ContainerState::Stopped => {
                Err(CoreError::ContainerStopping)
            }
            _ => self.lock_queue().push(command),
        }
    }

    /// Metadata for every installed command plus the built-in install
    /// command.
    #[must_use]
    pub fn command_infos(&self) -> Vec<CommandInfo> {
        let sim = self.read_sim();
        let mut out = vec![CommandInfo {
            name: INSTALL_MODULE_COMMAND.to_owned(),
            description: "Install a module from the static library".to_owned(),
            module: "core".to_owned(),
            parameters: vec![ParamInfo {
                name: "module".to_owned(),
                kind: ParamKind::String,
                required: true,
            }],
        }];
        for module in sim.modules.modules() {
            for command in &module.commands {
                out.push(CommandInfo {
                    name: command.qualified_name.clone(),
                    description: command.spec.description.clone(),
                    module: module.identifier.name.clone(),
                    parameters: command.spec.parameters.clone(),
                });
            }
        }
        out
    }

    // ── Modules ─────────────────────────────────────────────────────

    /// Installs a module from the library (the `core.install_module`
    /// command path).
    fn install_into(
        &self,
        sim: &mut Simulation,
        identifier: &ModuleIdentifier,
    ) -> Result<(), CoreError> {
        let factory = self
            .library
            .resolve(identifier)
            .ok_or_else(|| CoreError::ModuleUnknown(identifier.to_string()))?;
        let Simulation { store, modules, queries, .. } = sim;
        let decl = modules.build_decl(factory.as_ref())?;
        check_memory_budget(store, &decl, self.config.max_memory_bytes)?;
        modules.install_decl(store, decl)?;
        queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }

    // ── Matches ─────────────────────────────────────────────────────

    /// Creates a match enabling `modules` (identifiers must name
    /// installed modules at their installed versions).
    pub fn create_match(
        &self,
        modules: &[String],
        player_limit: Option<u32>,
    ) -> Result<u64, CoreError> {
        let mut sim = self.write_sim();
        let mut enabled = vec![ModuleSlot::CORE];
        for spec in modules {
            let identifier: ModuleIdentifier = spec.parse()?;
            let slot = sim
                .modules
                .slot_of(&identifier.name)
                .ok_or_else(|| CoreError::ModuleNotInstalled(identifier.to_string()))?;
            let installed = sim
                .modules
                .get(slot)
                .ok_or_else(|| CoreError::ModuleNotInstalled(identifier.to_string()))?;
            if installed.identifier.version != identifier.version {
                return Err(CoreError::ModuleNotInstalled(identifier.to_string()));
            }
            if !enabled.contains(&slot) {
                enabled.push(slot);
            }
        }
        let match_id = sim.next_match_id;
        sim.next_match_id += 1;
        sim.matches.insert(
            match_id,
            MatchState {
                enabled,
                player_limit: player_limit.unwrap_or(0),
            },
        );
        debug!(container_id = %self.id, match_id, "match created");
        Ok(match_id)
    }

    /// Deletes a match and destroys its entities.
    pub fn delete_match(&self, match_id: u64) -> Result<(), CoreError> {
        let destroyed = {
            let mut sim = self.write_sim();
            if sim.matches.remove(&match_id).is_none() {
                return Err(CoreError::MatchNotFound(match_id));
            }
            let destroyed = sim.store.destroy_match_entities(match_id);
            sim.queries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            destroyed
        };
        self.lock_snapshots().invalidate(match_id);
        debug!(container_id = %self.id, match_id, destroyed, "match deleted");
        Ok(())
    }

    /// True when the match exists.
    #[must_use]
    pub fn match_exists(&self, match_id: u64) -> bool {
        self.read_sim().matches.contains_key(&match_id)
    }

    /// Ids of all hosted matches.
    #[must_use]
    pub fn match_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.read_sim().matches.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    // ── Snapshots ───────────────────────────────────────────────────

    /// Cached per-match snapshot at the current tick (cache rule set).
    pub fn match_snapshot(&self, match_id: u64) -> Result<Arc<SnapshotWire>, CoreError> {
        // Cache lock first; dirty info is consumed under it.
        let mut caches = self.lock_snapshots();
        let sim = self.read_sim();
        let state = sim
            .matches
            .get(&match_id)
            .ok_or(CoreError::MatchNotFound(match_id))?;
        let enabled = state.enabled.clone();
        let tick = self.current_tick();
        Ok(caches.snapshot(&sim.store, &sim.modules, &enabled, match_id, tick))
    }

    /// Player-scoped snapshot, derived on demand and never cached.
    pub fn player_snapshot(
        &self,
        match_id: u64,
        player_id: &str,
    ) -> Result<SnapshotWire, CoreError> {
        let sim = self.read_sim();
        let state = sim
            .matches
            .get(&match_id)
            .ok_or(CoreError::MatchNotFound(match_id))?;
        Ok(build_player_snapshot(
            &sim.store,
            &sim.modules,
            &state.enabled,
            match_id,
            self.current_tick(),
            player_slot(player_id),
        ))
    }

    // ── Introspection ───────────────────────────────────────────────

    /// Stats for the node's HTTP surface and heartbeats.
    #[must_use]
    pub fn stats(&self) -> ContainerStatsResponse {
        let (entity_count, max_entities, used_memory_bytes, match_count) = {
            let sim = self.read_sim();
            (
                sim.store.live_count(),
                sim.store.capacity(),
                sim.store.estimated_bytes(),
                sim.matches.len(),
            )
        };
        let metrics = self.lock_metrics().clone();
        ContainerStatsResponse {
            entity_count,
            max_entities,
            used_memory_bytes,
            tick: self.current_tick(),
            state: self.state().name().to_owned(),
            match_count,
            command_queue_len: self.lock_queue().len(),
            last_tick_duration_us: metrics.last_tick_duration_us,
            ticks_total: metrics.ticks_total,
            commands_total: metrics.commands_total,
        }
    }

}

/// Rejects an install whose columns would push the store past the
/// container's memory budget.
fn check_memory_budget(
    store: &Store,
    decl: &ModuleDecl,
    max_memory_bytes: usize,
) -> Result<(), CoreError> {
    let projected =
        store.estimated_bytes() + decl.components.len() * store.column_resident_bytes();
    if projected > max_memory_bytes {
        return Err(CoreError::CapacityExceeded(max_memory_bytes));
    }
    Ok(())
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("tick", &self.current_tick())
            .finish_non_exhaustive()
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        self.stop_auto();
    }
}
