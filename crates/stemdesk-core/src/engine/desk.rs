//! The desk: shared epoch, channel allocation and the instrument registry
//!
//! The desk fixes the epoch once at construction, then for every stem it
//! loads the buffer, claims the next channel and starts an [`Instrument`]
//! bound to that epoch. Named commands are routed to the matching
//! instrument. [`Desk::stop_all`] is the only path that releases the backend.
//!
//! The registry sits behind a mutex so commands may arrive from several
//! threads (e.g. the command loop and a Ctrl-C handler).

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::command::{CommandOutcome, DeskCommand};
use super::error::DeskError;
use super::instrument::{Instrument, InstrumentState};
use super::phase::Epoch;
use crate::audio::AudioBackend;
use crate::types::{ChannelId, DEFAULT_RETRIGGER_DIVISIONS};

/// How long `stop_all` waits for each loop thread before moving on
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Tuning for the instruments a desk starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeskOptions {
    /// Re-alignment ticks per loop
    pub retrigger_divisions: u32,
    /// Bounded wait per instrument during teardown
    pub join_timeout: Duration,
}

impl Default for DeskOptions {
    fn default() -> Self {
        Self {
            retrigger_divisions: DEFAULT_RETRIGGER_DIVISIONS,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }
}

/// Coarse state shown to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLabel {
    Playing,
    Paused,
}

impl fmt::Display for StatusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusLabel::Playing => write!(f, "Playing"),
            StatusLabel::Paused => write!(f, "Paused"),
        }
    }
}

/// One line of `status` output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentStatus {
    pub name: String,
    pub channel_id: ChannelId,
    pub state: InstrumentState,
    /// Derived from `is_playing()`
    pub label: StatusLabel,
}

impl fmt::Display for InstrumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.label)
    }
}

impl InstrumentStatus {
    fn of(instrument: &Instrument) -> Self {
        Self {
            name: instrument.name().to_string(),
            channel_id: instrument.channel_id(),
            state: instrument.state(),
            label: if instrument.is_playing() {
                StatusLabel::Playing
            } else {
                StatusLabel::Paused
            },
        }
    }
}

#[derive(Default)]
struct Registry {
    /// Insertion order is kept for display
    instruments: Vec<Instrument>,
    released: bool,
}

impl Registry {
    fn get(&self, name: &str) -> Option<&Instrument> {
        self.instruments.iter().find(|i| i.name() == name)
    }

    /// Checks shared by both phases of `add_instrument`
    fn admit(&self, name: &str, max_channels: usize) -> Result<(), DeskError> {
        if self.released {
            return Err(DeskError::Released);
        }
        if self.get(name).is_some() {
            return Err(DeskError::DuplicateName(name.to_string()));
        }
        if self.instruments.len() >= max_channels {
            return Err(DeskError::ChannelCapacityExceeded {
                capacity: max_channels,
            });
        }
        Ok(())
    }
}

/// Orchestrates looping stems against one shared epoch
pub struct Desk {
    backend: Arc<dyn AudioBackend>,
    epoch: Epoch,
    max_channels: usize,
    options: DeskOptions,
    registry: Mutex<Registry>,
}

impl Desk {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self::with_options(backend, DeskOptions::default())
    }

    pub fn with_options(backend: Arc<dyn AudioBackend>, options: DeskOptions) -> Self {
        let max_channels = backend.channel_capacity();
        log::info!(
            "Desk ready: {} channels @ {}Hz, {} re-alignments per loop",
            max_channels,
            backend.sample_rate(),
            options.retrigger_divisions
        );
        Self {
            backend,
            epoch: Epoch::now(),
            max_channels,
            options,
            registry: Mutex::new(Registry::default()),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn max_channels(&self) -> usize {
        self.max_channels
    }

    pub fn options(&self) -> DeskOptions {
        self.options
    }

    pub fn len(&self) -> usize {
        self.registry().instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names in insertion order
    pub fn instrument_names(&self) -> Vec<String> {
        self.registry()
            .instruments
            .iter()
            .map(|i| i.name().to_string())
            .collect()
    }

    /// Load `source` and start it looping on the next free channel
    ///
    /// On any error the registry is left as it was. The buffer is decoded
    /// without holding the registry lock, so admission is checked again
    /// before the channel is claimed.
    pub fn add_instrument(&self, name: &str, source: &Path) -> Result<ChannelId, DeskError> {
        self.registry().admit(name, self.max_channels)?;

        let buffer = self
            .backend
            .load(source)
            .map_err(|source| DeskError::InstrumentLoad {
                name: name.to_string(),
                source,
            })?;

        let mut registry = self.registry();
        registry.admit(name, self.max_channels)?;

        let channel_id = ChannelId(registry.instruments.len());
        let channel = self.backend.channel(channel_id)?;
        let instrument = Instrument::spawn(
            name,
            buffer,
            channel,
            channel_id,
            self.epoch,
            self.options.retrigger_divisions,
        )
        .map_err(DeskError::Spawn)?;

        registry.instruments.push(instrument);
        log::info!("Instrument '{}' added on channel {}", name, channel_id);
        Ok(channel_id)
    }

    pub fn pause_instrument(&self, name: &str) -> Result<(), DeskError> {
        let registry = self.registry();
        let instrument = registry
            .get(name)
            .ok_or_else(|| DeskError::InstrumentNotFound(name.to_string()))?;
        instrument.pause();
        Ok(())
    }

    pub fn resume_instrument(&self, name: &str) -> Result<(), DeskError> {
        let registry = self.registry();
        let instrument = registry
            .get(name)
            .ok_or_else(|| DeskError::InstrumentNotFound(name.to_string()))?;
        instrument.resume();
        Ok(())
    }

    /// Status of a single instrument
    pub fn instrument_status(&self, name: &str) -> Option<InstrumentStatus> {
        self.registry().get(name).map(InstrumentStatus::of)
    }

    /// Status of every instrument, in insertion order
    pub fn show_status(&self) -> Vec<InstrumentStatus> {
        self.registry()
            .instruments
            .iter()
            .map(InstrumentStatus::of)
            .collect()
    }

    /// Stop every instrument, wait for each (bounded), clear the registry
    /// and release the backend. Safe to call repeatedly.
    ///
    /// Returns the number of instruments that were stopped.
    pub fn stop_all(&self) -> usize {
        let mut instruments = {
            let mut registry = self.registry();
            registry.released = true;
            std::mem::take(&mut registry.instruments)
        };

        for instrument in &instruments {
            instrument.stop();
        }
        for instrument in &mut instruments {
            if !instrument.join(self.options.join_timeout) {
                log::warn!(
                    "Instrument '{}' still running after {:?}, detaching",
                    instrument.name(),
                    self.options.join_timeout
                );
            }
        }

        let stopped = instruments.len();
        drop(instruments);

        if !self.backend.is_released() {
            self.backend.release();
            log::info!("All instruments stopped ({})", stopped);
        }
        stopped
    }

    /// Run a parsed command. `Quit` is reported back, not acted on: the
    /// caller decides when to call [`stop_all`](Self::stop_all).
    pub fn dispatch(&self, command: DeskCommand) -> CommandOutcome {
        match command {
            DeskCommand::Pause(name) => match self.pause_instrument(&name) {
                Ok(()) => CommandOutcome::Paused(name),
                Err(e) => CommandOutcome::Failed(e),
            },
            DeskCommand::Resume(name) => match self.resume_instrument(&name) {
                Ok(()) => CommandOutcome::Resumed(name),
                Err(e) => CommandOutcome::Failed(e),
            },
            DeskCommand::Status => CommandOutcome::Status(self.show_status()),
            DeskCommand::Quit => CommandOutcome::Quit,
        }
    }
}

impl Drop for Desk {
    fn drop(&mut self) {
        self.stop_all();
    }
}
