//! Sharing the detector between the sampling context and the outer loop.
//!
//! The sampler mutates the detector inside a critical section; everyone else
//! only ever sees whole copies taken inside the same lock.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::detector::{BeatPhase, Detector, DetectorOutput, Sample};

/// Consistent read-only view of the published values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Snapshot {
    pub signal: Sample,
    pub pulse_active: bool,
    pub bpm: u32,
    pub ibi: u32,
    pub beat_phase: BeatPhase,
}

/// Rate and interval captured together with the consumed beat flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BeatReport {
    pub bpm: u32,
    pub ibi: u32,
}

/// A [`Detector`] shared between the sampling context and its consumers under a blocking mutex.
pub struct SharedMonitor<M: RawMutex> {
    inner: Mutex<M, RefCell<Detector>>,
}

impl<M: RawMutex> SharedMonitor<M> {
    pub const fn new(detector: Detector) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(detector)),
        }
    }

    /// Runs one detector tick with exclusive access.
    pub fn tick(&self, raw_sample: Sample) -> DetectorOutput {
        self.inner.lock(|det| det.borrow_mut().tick(raw_sample))
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.lock(|det| {
            let det = det.borrow();
            let s = det.state();
            Snapshot {
                signal: s.signal,
                pulse_active: s.pulse_active,
                bpm: s.bpm,
                ibi: s.ibi,
                beat_phase: s.beat_phase,
            }
        })
    }

    /// Consumes the new-beat flag. When it was set, returns the values of that beat.
    pub fn take_beat(&self) -> Option<BeatReport> {
        self.inner.lock(|det| {
            let mut det = det.borrow_mut();
            if !det.take_new_beat() {
                return None;
            }
            let s = det.state();
            Some(BeatReport { bpm: s.bpm, ibi: s.ibi })
        })
    }
}
