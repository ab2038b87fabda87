//! Simulation driver tying the components together in tick order

use crate::config::{ConfigError, SimulationConfig};
use crate::core::entity::{
    Body, BodyDesc, BodyId, Registration, RegistryError, World,
};
use crate::events::SimEvent;
use crate::io::{
    AutosaveOutcome, Completion, PersistenceCoordinator, PersistenceError, PersistenceEvent,
    SaveRecord, SaveStore, SaveTrigger,
};
use crate::observer::BubbleController;
use crate::orbit::{update_orbits_system, OrbitReport, OrbitalElements};
use crate::spatial::{update_spatial_index_system, Octree};
use glam::DVec3;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Errors surfaced by the simulation driver
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("persistence is disabled for this simulation")]
    PersistenceDisabled,
}

enum StoreChoice {
    Files,
    Custom(Box<dyn SaveStore>),
    Disabled,
}

/// Builder for [`Simulation`]
pub struct SimulationBuilder {
    config: SimulationConfig,
    store: StoreChoice,
}

impl SimulationBuilder {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            store: StoreChoice::Files,
        }
    }

    /// Persist through a custom store instead of files under `save_dir`
    pub fn with_store(mut self, store: Box<dyn SaveStore>) -> Self {
        self.store = StoreChoice::Custom(store);
        self
    }

    /// Run without a persistence worker
    pub fn without_persistence(mut self) -> Self {
        self.store = StoreChoice::Disabled;
        self
    }

    pub fn build(self) -> Result<Simulation, SimulationError> {
        self.config.validate()?;

        let persistence = match self.store {
            StoreChoice::Files => Some(PersistenceCoordinator::with_file_store(
                self.config.persistence.clone(),
            )?),
            StoreChoice::Custom(store) => Some(PersistenceCoordinator::new(
                self.config.persistence.clone(),
                store,
            )?),
            StoreChoice::Disabled => None,
        };

        info!(
            time_warp = self.config.time_warp,
            persistence = persistence.is_some(),
            "Creating simulation"
        );

        Ok(Simulation {
            world: World::with_solver(self.config.solver),
            index: Octree::new(self.config.spatial),
            bubble: BubbleController::new(self.config.bubble)?,
            persistence,
            pending_events: Vec::new(),
            last_orbits: OrbitReport::default(),
            config: self.config,
        })
    }
}

/// Owns the world, spatial index, bubble and persistence and runs them in
/// a fixed order every tick.
pub struct Simulation {
    config: SimulationConfig,
    world: World,
    index: Octree,
    bubble: BubbleController,
    persistence: Option<PersistenceCoordinator>,
    /// Events raised between ticks, reported with the next tick
    pending_events: Vec<SimEvent>,
    last_orbits: OrbitReport,
}

impl Simulation {
    /// Create a simulation persisting to files under the configured directory
    pub fn new(config: SimulationConfig) -> Result<Self, SimulationError> {
        SimulationBuilder::new(config).build()
    }

    pub fn builder(config: SimulationConfig) -> SimulationBuilder {
        SimulationBuilder::new(config)
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn index(&self) -> &Octree {
        &self.index
    }

    pub fn bubble(&self) -> &BubbleController {
        &self.bubble
    }

    pub fn persistence(&self) -> Option<&PersistenceCoordinator> {
        self.persistence.as_ref()
    }

    /// Simulation time (s)
    pub fn time(&self) -> f64 {
        self.world.time()
    }

    /// Counts from the last orbit pass
    pub fn last_orbit_report(&self) -> OrbitReport {
        self.last_orbits
    }

    pub fn set_time_warp(&mut self, time_warp: f64) -> Result<(), SimulationError> {
        if !(time_warp.is_finite() && time_warp > 0.0) {
            return Err(ConfigError::Invalid(format!("time warp must be positive, got {time_warp}")).into());
        }
        self.config.time_warp = time_warp;
        Ok(())
    }

    pub fn register(&mut self, desc: BodyDesc) -> Result<Registration, SimulationError> {
        Ok(self.world.register(desc)?)
    }

    /// Remove a body. Domain events it causes are reported with the next tick.
    pub fn unregister(&mut self, id: BodyId) -> Result<Body, SimulationError> {
        let (body, events) = self.world.unregister(id)?;
        self.index.remove(id);
        self.pending_events
            .extend(events.into_iter().map(SimEvent::from));
        Ok(body)
    }

    pub fn update_true_state(
        &mut self,
        id: BodyId,
        position: DVec3,
        velocity: DVec3,
    ) -> Result<(), SimulationError> {
        Ok(self.world.update_true_state(id, position, velocity)?)
    }

    pub fn set_orbit(
        &mut self,
        id: BodyId,
        around: BodyId,
        elements: OrbitalElements,
    ) -> Result<(), SimulationError> {
        Ok(self.world.set_orbit(id, around, elements)?)
    }

    /// Bind the bubble to `id` from the next projection pass on
    pub fn bind_observer(&mut self, id: BodyId) -> Result<(), SimulationError> {
        if !self.world.bodies().contains(id) {
            return Err(RegistryError::UnknownBody(id).into());
        }
        self.bubble.bind(id);
        Ok(())
    }

    /// Advance by `dt` real seconds
    pub fn tick(&mut self, dt: f64) -> Vec<SimEvent> {
        self.tick_at(dt, Instant::now())
    }

    /// Advance by `dt` real seconds with `now` as the auto-save clock
    pub fn tick_at(&mut self, dt: f64, now: Instant) -> Vec<SimEvent> {
        let mut events = std::mem::take(&mut self.pending_events);

        self.apply_completions(&mut events);

        update_spatial_index_system(self.world.bodies(), &mut self.index);
        events.extend(
            self.world
                .resolve_domains(&self.index)
                .into_iter()
                .map(SimEvent::from),
        );

        let dt = if dt.is_finite() && dt >= 0.0 {
            dt * self.config.time_warp
        } else {
            warn!(dt, "Invalid tick length, treating as zero");
            0.0
        };
        self.world.advance_time(dt);
        self.last_orbits = update_orbits_system(&mut self.world, dt);

        events.extend(
            self.bubble
                .update(self.world.bodies())
                .into_iter()
                .map(SimEvent::from),
        );

        if let Some(persistence) = self.persistence.as_mut() {
            let world = &self.world;
            let bubble = &self.bubble;
            let outcome = persistence.poll_autosave(now, || {
                SaveRecord::capture(world, bubble.config(), bubble.requested_center())
            });
            if outcome == AutosaveOutcome::SkippedInFlight {
                events.push(PersistenceEvent::AutosaveSkipped.into());
            }
        }

        debug!(
            time = self.world.time(),
            events = events.len(),
            "Tick complete"
        );
        events
    }

    /// Snapshot of the current state
    pub fn capture(&self) -> SaveRecord {
        SaveRecord::capture(
            &self.world,
            self.bubble.config(),
            self.bubble.requested_center(),
        )
    }

    /// Queue a manual save into `slot`
    pub fn save(&mut self, slot: &str) -> Result<(), SimulationError> {
        let record = self.capture();
        self.persistence_mut()?
            .save(slot, record, SaveTrigger::Manual)?;
        Ok(())
    }

    /// Queue a checkpoint save before a major transition
    pub fn checkpoint(&mut self) -> Result<(), SimulationError> {
        let record = self.capture();
        let persistence = self.persistence_mut()?;
        let slot = persistence.config().checkpoint_slot.clone();
        persistence.save(&slot, record, SaveTrigger::Checkpoint)?;
        Ok(())
    }

    /// Queue a load; the world is replaced at the start of a later tick
    pub fn request_load(&mut self, slot: &str) -> Result<(), SimulationError> {
        self.persistence_mut()?.request_load(slot)?;
        Ok(())
    }

    /// Load `slot` now, after any queued saves. On error nothing changes.
    pub fn load_blocking(&mut self, slot: &str) -> Result<(), SimulationError> {
        let record = self.persistence_mut()?.load_now(slot)?;
        self.apply_record(record)?;
        Ok(())
    }

    /// Wait for all queued persistence jobs and apply their results
    pub fn flush_persistence(&mut self) -> Vec<SimEvent> {
        let completions = match self.persistence.as_mut() {
            Some(persistence) => persistence.flush(),
            None => return Vec::new(),
        };
        let mut events = Vec::new();
        self.handle_completions(completions, &mut events);
        events
    }

    fn persistence_mut(&mut self) -> Result<&mut PersistenceCoordinator, SimulationError> {
        self.persistence
            .as_mut()
            .ok_or(SimulationError::PersistenceDisabled)
    }

    fn apply_completions(&mut self, events: &mut Vec<SimEvent>) {
        let completions = match self.persistence.as_mut() {
            Some(persistence) => persistence.poll(),
            None => return,
        };
        self.handle_completions(completions, events);
    }

    fn handle_completions(&mut self, completions: Vec<Completion>, events: &mut Vec<SimEvent>) {
        for completion in completions {
            let mut event = PersistenceEvent::from(&completion);
            if let Completion::Loaded { slot, record } = completion {
                if let Err(error) = self.apply_record(*record) {
                    warn!(slot = %slot, %error, "Loaded record could not be applied");
                    event = PersistenceEvent::LoadFailed {
                        slot,
                        error: error.to_string(),
                    };
                }
            }
            events.push(event.into());
        }
    }

    /// Replace world contents with a loaded record
    fn apply_record(&mut self, record: SaveRecord) -> Result<(), SimulationError> {
        record.validate()?;
        let mut bubble = BubbleController::new(record.bubble)?;
        if let Some(observer) = record.observer {
            bubble.bind(observer);
        }

        let bodies = record.bodies.len();
        self.world = record.into_world(self.config.solver);
        self.config.bubble = *bubble.config();
        self.bubble = bubble;
        self.index.clear();
        self.pending_events.clear();

        info!(bodies, time = self.world.time(), "World replaced from save");
        Ok(())
    }
}
