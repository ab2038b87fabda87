//! Background persistence
//!
//! A single worker thread owns the [`SaveStore`] and consumes jobs in FIFO
//! order. The update thread hands it immutable [`SaveRecord`] snapshots and
//! picks up completions at tick boundaries, so the worker never touches live
//! state. Loads go through the same queue and therefore always run after the
//! saves queued before them.

use super::record::SaveRecord;
use super::store::{validate_slot, FileStore, SaveStore};
use super::PersistenceError;
use crate::config::PersistenceConfig;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// What started a save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveTrigger {
    Manual,
    Autosave,
    /// Taken before a major state transition
    Checkpoint,
}

enum Job {
    Save {
        slot: String,
        record: Box<SaveRecord>,
        trigger: SaveTrigger,
    },
    Load {
        slot: String,
    },
}

/// Result of a finished job
#[derive(Debug)]
pub enum Completion {
    Saved {
        slot: String,
        trigger: SaveTrigger,
        bytes: usize,
    },
    SaveFailed {
        slot: String,
        trigger: SaveTrigger,
        error: PersistenceError,
    },
    Loaded {
        slot: String,
        record: Box<SaveRecord>,
    },
    LoadFailed {
        slot: String,
        error: PersistenceError,
    },
    /// A load that finished while a later blocking load was waiting. Its
    /// record is dropped so it cannot overwrite the newer one.
    LoadSuperseded {
        slot: String,
    },
}

/// Persistence notifications surfaced to the simulation's consumers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceEvent {
    Saved { slot: String, trigger: SaveTrigger },
    SaveFailed { slot: String, trigger: SaveTrigger, error: String },
    Loaded { slot: String },
    LoadFailed { slot: String, error: String },
    LoadSuperseded { slot: String },
    AutosaveSkipped,
}

impl From<&Completion> for PersistenceEvent {
    fn from(completion: &Completion) -> Self {
        match completion {
            Completion::Saved { slot, trigger, .. } => PersistenceEvent::Saved {
                slot: slot.clone(),
                trigger: *trigger,
            },
            Completion::SaveFailed {
                slot,
                trigger,
                error,
            } => PersistenceEvent::SaveFailed {
                slot: slot.clone(),
                trigger: *trigger,
                error: error.to_string(),
            },
            Completion::Loaded { slot, .. } => PersistenceEvent::Loaded { slot: slot.clone() },
            Completion::LoadFailed { slot, error } => PersistenceEvent::LoadFailed {
                slot: slot.clone(),
                error: error.to_string(),
            },
            Completion::LoadSuperseded { slot } => {
                PersistenceEvent::LoadSuperseded { slot: slot.clone() }
            }
        }
    }
}

/// What the auto-save scheduler did on a poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutosaveOutcome {
    Disabled,
    NotDue,
    Started,
    /// A save was still in flight; this interval is skipped
    SkippedInFlight,
    /// The save could not be queued; the next interval retries
    Failed(String),
}

/// Schedules saves and loads on the persistence worker
pub struct PersistenceCoordinator {
    config: PersistenceConfig,
    jobs: Option<Sender<Job>>,
    completions: Receiver<Completion>,
    worker: Option<JoinHandle<()>>,
    /// Completions received while waiting for a specific job
    buffered: Vec<Completion>,
    saves_in_flight: usize,
    loads_in_flight: usize,
    last_autosave: Instant,
}

impl PersistenceCoordinator {
    /// Start a worker writing JSON files under `config.save_dir`
    pub fn with_file_store(config: PersistenceConfig) -> Result<Self, PersistenceError> {
        let store = FileStore::new(config.save_dir.clone());
        Self::new(config, Box::new(store))
    }

    /// Start a worker over an arbitrary store
    pub fn new(config: PersistenceConfig, store: Box<dyn SaveStore>) -> Result<Self, PersistenceError> {
        validate_slot(&config.autosave_slot)?;
        validate_slot(&config.checkpoint_slot)?;

        let (job_tx, job_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let backups = config.backup_count;

        let worker = thread::Builder::new()
            .name("persistence".to_string())
            .spawn(move || run_worker(store, backups, job_rx, done_tx))?;

        info!(
            save_dir = ?config.save_dir,
            autosave = config.autosave_enabled,
            interval_secs = config.autosave_interval_secs,
            backups,
            "Persistence worker started"
        );

        Ok(Self {
            config,
            jobs: Some(job_tx),
            completions: done_rx,
            worker: Some(worker),
            buffered: Vec::new(),
            saves_in_flight: 0,
            loads_in_flight: 0,
            last_autosave: Instant::now(),
        })
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    pub fn save_in_flight(&self) -> bool {
        self.saves_in_flight > 0
    }

    pub fn load_in_flight(&self) -> bool {
        self.loads_in_flight > 0
    }

    /// Queue a save of `record` into `slot`
    pub fn save(
        &mut self,
        slot: &str,
        record: SaveRecord,
        trigger: SaveTrigger,
    ) -> Result<(), PersistenceError> {
        validate_slot(slot)?;
        self.send(Job::Save {
            slot: slot.to_string(),
            record: Box::new(record),
            trigger,
        })?;
        self.saves_in_flight += 1;
        debug!(slot, ?trigger, "Save queued");
        Ok(())
    }

    /// Start an auto-save if the interval has elapsed.
    ///
    /// The interval restarts on every due poll, whether the save starts,
    /// is skipped or fails, so failures retry on the next interval rather
    /// than every tick. `capture` only runs when a save actually starts.
    pub fn poll_autosave(
        &mut self,
        now: Instant,
        capture: impl FnOnce() -> SaveRecord,
    ) -> AutosaveOutcome {
        if !self.config.autosave_enabled {
            return AutosaveOutcome::Disabled;
        }
        if now.saturating_duration_since(self.last_autosave) < self.config.autosave_interval() {
            return AutosaveOutcome::NotDue;
        }
        self.last_autosave = now;

        if self.save_in_flight() {
            info!("Save still in flight, skipping auto-save");
            return AutosaveOutcome::SkippedInFlight;
        }

        let slot = self.config.autosave_slot.clone();
        match self.save(&slot, capture(), SaveTrigger::Autosave) {
            Ok(()) => AutosaveOutcome::Started,
            Err(e) => {
                error!(error = %e, "Auto-save could not be queued");
                AutosaveOutcome::Failed(e.to_string())
            }
        }
    }

    /// Queue a load of `slot`. It runs after every save already queued.
    pub fn request_load(&mut self, slot: &str) -> Result<(), PersistenceError> {
        validate_slot(slot)?;
        if self.save_in_flight() {
            info!(slot, "Load queued behind in-flight save");
        }
        self.send(Job::Load {
            slot: slot.to_string(),
        })?;
        self.loads_in_flight += 1;
        Ok(())
    }

    /// Collect finished jobs without blocking
    pub fn poll(&mut self) -> Vec<Completion> {
        let mut done = std::mem::take(&mut self.buffered);
        while let Ok(completion) = self.completions.try_recv() {
            self.settle(&completion);
            done.push(completion);
        }
        done
    }

    /// Block until every queued job has finished
    pub fn flush(&mut self) -> Vec<Completion> {
        let mut done = std::mem::take(&mut self.buffered);
        while self.saves_in_flight + self.loads_in_flight > 0 {
            match self.completions.recv() {
                Ok(completion) => {
                    self.settle(&completion);
                    done.push(completion);
                }
                Err(_) => {
                    error!("Persistence worker exited with jobs outstanding");
                    self.saves_in_flight = 0;
                    self.loads_in_flight = 0;
                    break;
                }
            }
        }
        done
    }

    /// Load `slot` and wait for the result.
    ///
    /// Saves queued earlier finish first; their completions are kept for
    /// the next [`PersistenceCoordinator::poll`]. Records from loads queued
    /// earlier are dropped and reported as superseded.
    pub fn load_now(&mut self, slot: &str) -> Result<SaveRecord, PersistenceError> {
        self.request_load(slot)?;
        let mut pending_loads = self.loads_in_flight;

        loop {
            let completion = self
                .completions
                .recv()
                .map_err(|_| PersistenceError::WorkerUnavailable)?;
            self.settle(&completion);

            if let Completion::Loaded { .. } | Completion::LoadFailed { .. } = completion {
                pending_loads -= 1;
                // Ours is the last load queued
                if pending_loads == 0 {
                    return match completion {
                        Completion::Loaded { record, .. } => Ok(*record),
                        Completion::LoadFailed { error, .. } => Err(error),
                        _ => Err(PersistenceError::WorkerUnavailable),
                    };
                }
            }
            let completion = match completion {
                Completion::Loaded { slot, .. } => {
                    info!(slot = %slot, "Earlier load superseded by blocking load");
                    Completion::LoadSuperseded { slot }
                }
                other => other,
            };
            self.buffered.push(completion);
        }
    }

    fn send(&self, job: Job) -> Result<(), PersistenceError> {
        self.jobs
            .as_ref()
            .ok_or(PersistenceError::WorkerUnavailable)?
            .send(job)
            .map_err(|_| PersistenceError::WorkerUnavailable)
    }

    fn settle(&mut self, completion: &Completion) {
        match completion {
            Completion::Saved { .. } | Completion::SaveFailed { .. } => {
                self.saves_in_flight = self.saves_in_flight.saturating_sub(1);
            }
            Completion::Loaded { .. }
            | Completion::LoadFailed { .. }
            | Completion::LoadSuperseded { .. } => {
                self.loads_in_flight = self.loads_in_flight.saturating_sub(1);
            }
        }
    }
}

impl Drop for PersistenceCoordinator {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain its queue and exit
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Persistence worker panicked");
            }
        }
    }
}

fn run_worker(
    mut store: Box<dyn SaveStore>,
    backups: usize,
    jobs: Receiver<Job>,
    done: Sender<Completion>,
) {
    for job in jobs {
        let completion = match job {
            Job::Save {
                slot,
                record,
                trigger,
            } => match write_record(store.as_mut(), &slot, &record, backups) {
                Ok(bytes) => {
                    info!(slot = %slot, ?trigger, bytes, "Saved");
                    Completion::Saved {
                        slot,
                        trigger,
                        bytes,
                    }
                }
                Err(error) => {
                    error!(slot = %slot, ?trigger, %error, "Save failed");
                    Completion::SaveFailed {
                        slot,
                        trigger,
                        error,
                    }
                }
            },
            Job::Load { slot } => match read_record(store.as_ref(), &slot) {
                Ok(record) => {
                    info!(slot = %slot, bodies = record.bodies.len(), "Loaded");
                    Completion::Loaded {
                        slot,
                        record: Box::new(record),
                    }
                }
                Err(error) => {
                    warn!(slot = %slot, %error, "Load failed");
                    Completion::LoadFailed { slot, error }
                }
            },
        };

        if done.send(completion).is_err() {
            break;
        }
    }
    debug!("Persistence worker stopped");
}

fn write_record(
    store: &mut dyn SaveStore,
    slot: &str,
    record: &SaveRecord,
    backups: usize,
) -> Result<usize, PersistenceError> {
    let data = record.to_json()?;
    store.rotate(slot, backups)?;
    store.write(slot, &data)?;
    Ok(data.len())
}

fn read_record(store: &dyn SaveStore, slot: &str) -> Result<SaveRecord, PersistenceError> {
    let data = store.read(slot)?;
    SaveRecord::from_json_bytes(&data)
}
