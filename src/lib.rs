//! Heartbeat detection for an analog pulse sensor.
//!
//! The core is [`Detector`], a fixed-cadence state machine that turns raw ADC
//! readings into beat onsets, inter-beat intervals and a smoothed BPM. The
//! rest of the crate is what a monitor needs around it: a critical-section
//! wrapper so an interrupt-level sampler can share it with the main loop, the
//! serial event stream, LM35 temperature conversion, LCD frames and an ESP8266
//! uplink.
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod config;
pub mod detector;
pub mod display;
pub mod ibi;
pub mod indicator;
pub mod sampler;
pub mod shared;
pub mod telemetry;
pub mod temperature;
pub mod uplink;

pub use config::{ConfigError, DetectorConfig};
pub use detector::{BeatPhase, Detector, DetectorOutput, DetectorState, Sample};
pub use ibi::IbiHistory;
pub use sampler::{SampleSource, Sampler};
pub use shared::{BeatReport, SharedMonitor, Snapshot};
