//! Stemdesk Core - phase-locked loop playback for multi-stem audio

pub mod audio;
pub mod audio_file;
pub mod config;
pub mod engine;
pub mod types;

pub use types::*;
