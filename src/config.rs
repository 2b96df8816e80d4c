//! Detector tuning.

use crate::detector::Sample;

/// Timing and level constants the detector runs with.
///
/// All times are milliseconds of `sample_clock`, which advances by `tick_ms`
/// per tick. Levels are raw ADC counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DetectorConfig {
    /// Sampling period. The caller must tick at exactly this cadence.
    pub tick_ms: u32,
    /// ADC midpoint. Peak, trough and threshold fall back here after a silence.
    pub baseline: Sample,
    /// Threshold at power-on, slightly above `baseline`.
    pub initial_threshold: Sample,
    /// IBI assumed before the first measurement (600 ms is 100 BPM).
    pub initial_ibi_ms: u32,
    /// No onset is accepted sooner than this after the previous one.
    pub refractory_ms: u32,
    /// With no onset for this long the detector recalibrates.
    pub silence_window_ms: u32,
    /// Largest code the converter produces.
    pub adc_max: Sample,
}

impl DetectorConfig {
    /// 10-bit converter sampled at 500 Hz.
    pub const DEFAULT: Self = Self {
        tick_ms: 2,
        baseline: 512,
        initial_threshold: 525,
        initial_ibi_ms: 600,
        refractory_ms: 250,
        silence_window_ms: 2500,
        adc_max: 1023,
    };

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_ms == 0 {
            return Err(ConfigError::ZeroTickPeriod);
        }
        if self.refractory_ms >= self.silence_window_ms {
            return Err(ConfigError::RefractoryExceedsSilence);
        }
        if self.adc_max <= 0 {
            return Err(ConfigError::EmptyAdcRange);
        }
        let range = 0..=self.adc_max;
        if !range.contains(&self.baseline) || !range.contains(&self.initial_threshold) {
            return Err(ConfigError::LevelOutOfRange);
        }
        Ok(())
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// `tick_ms` must advance the clock.
    ZeroTickPeriod,
    /// The refractory guard would swallow every onset before silence recovery fires.
    RefractoryExceedsSilence,
    /// `adc_max` must be positive.
    EmptyAdcRange,
    /// `baseline` or `initial_threshold` lies outside `0..=adc_max`.
    LevelOutOfRange,
}
