//! Adaptive-threshold heartbeat detector.
//!
//! [`Detector::tick`] is called once per sampling period with the latest ADC
//! reading. It follows the waveform's local peak and trough, places the
//! decision threshold halfway between them after every beat, and turns
//! threshold crossings into onsets, offsets and a ten-interval BPM average.

use crate::config::{ConfigError, DetectorConfig};
use crate::ibi::IbiHistory;

/// One raw reading in ADC counts. Wider than the converter so out-of-range
/// values pass through untouched.
pub type Sample = i32;

/// Warm-up progress of the rolling average.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BeatPhase {
    /// No reference onset yet. The next interval starts from an arbitrary point and is discarded.
    AwaitingFirst,
    /// One onset seen. The next interval seeds the whole history.
    AwaitingSecond,
    /// The history holds measured intervals.
    Steady,
}

/// Everything the detector carries from one tick to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DetectorState {
    /// Milliseconds of sampling, advanced by `tick_ms` per tick.
    pub sample_clock: u32,
    /// `sample_clock` at the most recent onset.
    pub last_beat_time: u32,
    /// Most recent reading.
    pub signal: Sample,
    pub peak: Sample,
    pub trough: Sample,
    pub threshold: Sample,
    /// Between an onset and its offset.
    pub pulse_active: bool,
    /// Milliseconds between the last two onsets.
    pub ibi: u32,
    pub ibi_history: IbiHistory,
    pub bpm: u32,
    pub beat_phase: BeatPhase,
    /// Latched on a reported onset until the consumer takes it.
    pub new_beat_flag: bool,
}

impl DetectorState {
    pub const fn new(config: &DetectorConfig) -> Self {
        Self {
            sample_clock: 0,
            last_beat_time: 0,
            signal: 0,
            peak: config.baseline,
            trough: config.baseline,
            threshold: config.initial_threshold,
            pulse_active: false,
            ibi: config.initial_ibi_ms,
            ibi_history: IbiHistory::new(),
            bpm: 0,
            beat_phase: BeatPhase::AwaitingFirst,
            new_beat_flag: false,
        }
    }
}

/// What a single tick publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DetectorOutput {
    pub signal: Sample,
    pub pulse_active: bool,
    pub bpm: u32,
    pub ibi: u32,
    /// True only on the tick that reported a new onset.
    pub new_beat: bool,
}

/// The beat detector: a [`DetectorConfig`] plus the state it evolves one tick at a time.
pub struct Detector {
    config: DetectorConfig,
    state: DetectorState,
}

impl Detector {
    /// A detector with [`DetectorConfig::DEFAULT`], usable in a `static`.
    pub const fn new() -> Self {
        let config = DetectorConfig::DEFAULT;
        Self {
            state: DetectorState::new(&config),
            config,
        }
    }

    pub fn with_config(config: DetectorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            state: DetectorState::new(&config),
            config,
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    /// Clears the latched beat flag, returning whether it was set.
    pub fn take_new_beat(&mut self) -> bool {
        core::mem::replace(&mut self.state.new_beat_flag, false)
    }

    /// Feeds one reading taken exactly `tick_ms` after the previous one.
    ///
    /// Never blocks and never fails. Any `raw_sample` is accepted as-is.
    pub fn tick(&mut self, raw_sample: Sample) -> DetectorOutput {
        let new_beat = self.step(raw_sample);
        let s = &self.state;
        DetectorOutput {
            signal: s.signal,
            pulse_active: s.pulse_active,
            bpm: s.bpm,
            ibi: s.ibi,
            new_beat,
        }
    }

    fn step(&mut self, raw_sample: Sample) -> bool {
        let cfg = self.config;
        let s = &mut self.state;

        s.signal = raw_sample;
        s.sample_clock = s.sample_clock.wrapping_add(cfg.tick_ms);
        let n = s.sample_clock.wrapping_sub(s.last_beat_time);

        // Dicrotic notch and ringing live in the first 3/5 of a beat.
        let settle = (s.ibi / 5) * 3;

        if s.signal < s.threshold && n > settle && s.signal < s.trough {
            s.trough = s.signal;
        }
        if s.signal > s.threshold && s.signal > s.peak {
            s.peak = s.signal;
        }

        let mut reported = false;
        if n > cfg.refractory_ms && s.signal > s.threshold && !s.pulse_active && n > settle {
            s.pulse_active = true;
            s.ibi = n;
            s.last_beat_time = s.sample_clock;

            match s.beat_phase {
                BeatPhase::AwaitingFirst => {
                    s.beat_phase = BeatPhase::AwaitingSecond;
                    debug!("first onset, discarding {} ms interval", n);
                    return false;
                }
                BeatPhase::AwaitingSecond => {
                    s.ibi_history.seed(n);
                    s.beat_phase = BeatPhase::Steady;
                }
                BeatPhase::Steady => {}
            }

            s.ibi_history.push(n);
            match s.ibi_history.bpm() {
                Some(bpm) => {
                    s.bpm = bpm;
                    s.new_beat_flag = true;
                    reported = true;
                    debug!("beat: ibi {} ms, {} bpm", n, bpm);
                }
                None => {
                    warn!("zero interval average, holding {} bpm", s.bpm);
                }
            }
        }

        if s.signal < s.threshold && s.pulse_active {
            s.pulse_active = false;
            let amp = s.peak.saturating_sub(s.trough);
            s.threshold = s.trough.saturating_add(amp / 2);
            s.peak = s.threshold;
            s.trough = s.threshold;
        }

        if n > cfg.silence_window_ms {
            s.threshold = cfg.baseline;
            s.peak = cfg.baseline;
            s.trough = cfg.baseline;
            s.last_beat_time = s.sample_clock;
            s.beat_phase = BeatPhase::AwaitingFirst;
            info!("no beat for {} ms, recalibrating", n);
        }

        reported
    }
}

impl Default for Detector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOW: Sample = 400;
    const HIGH: Sample = 700;

    /// Ticks until `sample_clock` reaches `until_ms`, feeding `level`.
    /// Returns the outputs of those ticks.
    fn hold(det: &mut Detector, level: Sample, until_ms: u32) -> Vec<DetectorOutput> {
        let mut out = Vec::new();
        while det.state().sample_clock < until_ms {
            out.push(det.tick(level));
        }
        out
    }

    fn onsets(outputs: &[DetectorOutput], was_active: bool) -> usize {
        let mut prev = was_active;
        let mut count = 0;
        for o in outputs {
            if o.pulse_active && !prev {
                count += 1;
            }
            prev = o.pulse_active;
        }
        count
    }

    #[test]
    fn starts_from_documented_defaults() {
        let det = Detector::new();
        let s = det.state();
        assert_eq!(s.signal, 0);
        assert_eq!((s.peak, s.trough, s.threshold), (512, 512, 525));
        assert_eq!(s.ibi, 600);
        assert_eq!(s.beat_phase, BeatPhase::AwaitingFirst);
        assert!(!s.pulse_active);
        assert!(!s.new_beat_flag);
    }

    #[test]
    fn with_config_rejects_invalid_tuning() {
        let cfg = DetectorConfig { tick_ms: 0, ..DetectorConfig::DEFAULT };
        assert!(matches!(Detector::with_config(cfg), Err(ConfigError::ZeroTickPeriod)));
    }

    #[test]
    fn two_pulses_600ms_apart_report_100_bpm() {
        let mut det = Detector::new();
        let mut outputs = hold(&mut det, LOW, 498);
        outputs.extend(hold(&mut det, HIGH, 540));

        // The first onset only opens the warm-up.
        assert_eq!(det.state().beat_phase, BeatPhase::AwaitingSecond);
        assert_eq!(det.state().ibi, 500);
        assert!(outputs.iter().all(|o| !o.new_beat));

        outputs.extend(hold(&mut det, LOW, 1098));
        // Offset placed the threshold halfway between 400 and 700.
        assert_eq!(det.state().threshold, 550);

        outputs.extend(hold(&mut det, HIGH, 1140));
        outputs.extend(hold(&mut det, LOW, 1200));

        assert_eq!(onsets(&outputs, false), 2);
        assert_eq!(outputs.iter().filter(|o| o.new_beat).count(), 1);
        let reported = outputs.iter().find(|o| o.new_beat).unwrap();
        assert_eq!(reported.ibi, 600);
        assert_eq!(reported.bpm, 100);

        let s = det.state();
        assert_eq!(s.beat_phase, BeatPhase::Steady);
        assert_eq!(s.ibi_history.as_slice(), &[600; crate::ibi::IBI_HISTORY_LEN]);
        assert!(s.new_beat_flag);
    }

    #[test]
    fn new_beat_output_lasts_one_tick_and_latch_is_consumed_once() {
        let mut det = Detector::new();
        hold(&mut det, LOW, 498);
        hold(&mut det, HIGH, 540);
        hold(&mut det, LOW, 1098);

        let first = det.tick(HIGH);
        assert!(first.new_beat);
        let second = det.tick(HIGH);
        assert!(!second.new_beat);

        assert!(det.take_new_beat());
        assert!(!det.take_new_beat());
    }

    #[test]
    fn holding_the_signal_high_does_not_retrigger() {
        let mut det = Detector::new();
        hold(&mut det, LOW, 498);
        let first = det.tick(HIGH);
        assert!(first.pulse_active);
        let before = *det.state();

        // Same input, well past the settle window, still one beat.
        let outputs = hold(&mut det, HIGH, 1400);
        assert_eq!(onsets(&outputs, true), 0);
        assert!(outputs.iter().all(|o| o.pulse_active && !o.new_beat));
        assert_eq!(det.state().last_beat_time, before.last_beat_time);
        assert_eq!(det.state().beat_phase, BeatPhase::AwaitingSecond);
    }

    #[test]
    fn trough_is_frozen_while_the_beat_settles() {
        let mut det = Detector::new();
        // settle is (600 / 5) * 3 = 360 ms before any trough update.
        hold(&mut det, 300, 360);
        assert_eq!(det.state().trough, 512);
        det.tick(300);
        assert_eq!(det.state().trough, 300);
    }

    #[test]
    fn flat_signal_for_the_silence_window_recalibrates() {
        let mut det = Detector::new();
        hold(&mut det, LOW, 498);
        hold(&mut det, HIGH, 540);
        assert_eq!(det.state().beat_phase, BeatPhase::AwaitingSecond);

        // Flat below threshold since the onset at 500 ms; the offset moved the threshold.
        hold(&mut det, LOW, 500 + 2500);
        assert_ne!(det.state().threshold, 512);
        det.tick(LOW);

        let s = det.state();
        assert_eq!((s.threshold, s.peak, s.trough), (512, 512, 512));
        assert_eq!(s.beat_phase, BeatPhase::AwaitingFirst);
        assert_eq!(s.last_beat_time, s.sample_clock);
    }

    #[test]
    fn zero_interval_average_holds_previous_bpm() {
        let cfg = DetectorConfig { refractory_ms: 0, ..DetectorConfig::DEFAULT };
        let mut det = Detector::with_config(cfg).unwrap();
        det.state.beat_phase = BeatPhase::Steady;
        det.state.ibi = 0;
        det.state.bpm = 77;
        assert_eq!(det.state.ibi_history.average(), 0);

        // n = 2 ms: pushing it into an all-zero history still averages to 0.
        let out = det.tick(HIGH);
        assert!(out.pulse_active);
        assert!(!out.new_beat);
        assert_eq!(out.bpm, 77);
        assert_eq!(out.ibi, 2);
        assert!(!det.take_new_beat());
    }

    #[test]
    fn out_of_range_samples_do_not_panic() {
        let mut det = Detector::new();
        for i in 0..5000u32 {
            let raw = if (i / 100) % 2 == 0 { Sample::MAX } else { Sample::MIN };
            det.tick(raw);
        }
        let s = det.state();
        assert!(s.trough <= s.threshold);
    }
}
