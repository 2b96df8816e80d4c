//! Fading beat LED.

const FULL: u8 = 255;
const FADE_STEP: u8 = 15;

/// Brightness that jumps to full on each beat and decays every loop pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BeatFade {
    level: u8,
}

impl BeatFade {
    pub const fn new() -> Self {
        Self { level: 0 }
    }

    pub fn trigger(&mut self) {
        self.level = FULL;
    }

    pub fn step(&mut self) -> u8 {
        self.level = self.level.saturating_sub(FADE_STEP);
        self.level
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn is_lit(&self) -> bool {
        self.level > 0
    }

    /// On-time within one software PWM period of `period_ms` for the current level.
    pub fn on_time_ms(&self, period_ms: u32) -> u32 {
        (u64::from(period_ms) * u64::from(self.level) / u64::from(FULL)) as u32
    }
}
