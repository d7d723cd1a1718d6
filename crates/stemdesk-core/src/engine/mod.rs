//! Loop engine
//!
//! A [`Desk`] owns a set of [`Instrument`]s, each looping one stem on its
//! own thread. All of them measure their position from one shared
//! [`Epoch`], which keeps stems of equal length phase-locked.

mod command;
mod desk;
mod error;
pub mod gc;
mod instrument;
mod phase;

pub use command::{CommandOutcome, CommandParseError, DeskCommand, COMMAND_HELP};
pub use desk::{Desk, DeskOptions, InstrumentStatus, StatusLabel, DEFAULT_JOIN_TIMEOUT};
pub use error::DeskError;
pub use instrument::{Instrument, InstrumentState};
pub use phase::{loop_offset, Epoch};
