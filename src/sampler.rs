//! Glue between an ADC and the shared detector.

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::detector::{DetectorOutput, Sample};
use crate::shared::SharedMonitor;

/// A converter that can be read without suspending.
pub trait SampleSource {
    type Error;

    fn read(&mut self) -> Result<u16, Self::Error>;
}

impl<F, E> SampleSource for F
where
    F: FnMut() -> Result<u16, E>,
{
    type Error = E;

    fn read(&mut self) -> Result<u16, E> {
        self()
    }
}

/// Reads one sample per call and ticks the detector with it.
///
/// A failed read still produces a tick, repeating the last good sample, so
/// `sample_clock` never falls behind wall time.
pub struct Sampler<S> {
    source: S,
    last_good: Sample,
    faults: u32,
}

impl<S: SampleSource> Sampler<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            last_good: 0,
            faults: 0,
        }
    }

    pub fn sample<M: RawMutex>(&mut self, monitor: &SharedMonitor<M>) -> DetectorOutput {
        match self.source.read() {
            Ok(raw) => self.last_good = Sample::from(raw),
            Err(_) => {
                self.faults = self.faults.wrapping_add(1);
                warn!("sample read failed ({} so far), repeating {}", self.faults, self.last_good);
            }
        }
        monitor.tick(self.last_good)
    }

    /// The source, for auxiliary reads between ticks.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Number of reads that failed since construction.
    pub fn faults(&self) -> u32 {
        self.faults
    }
}
