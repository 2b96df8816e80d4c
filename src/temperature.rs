//! LM35 temperature conversion in fixed point.

use core::fmt;

/// A temperature in tenths of a degree Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Temperature {
    deci_celsius: i32,
}

impl Temperature {
    pub const fn from_deci_celsius(deci_celsius: i32) -> Self {
        Self { deci_celsius }
    }

    pub fn deci_celsius(&self) -> i32 {
        self.deci_celsius
    }

    /// Saturates at the `i32` range.
    pub fn deci_fahrenheit(&self) -> i32 {
        (self.deci_celsius.saturating_mul(9) / 5).saturating_add(320)
    }
}

/// Fahrenheit with one decimal, e.g. `98.6`.
impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.deci_fahrenheit();
        let sign = if t < 0 { "-" } else { "" };
        let abs = t.unsigned_abs();
        write!(f, "{}{}.{}", sign, abs / 10, abs % 10)
    }
}

/// Largest reading `convert` reports, so the Fahrenheit math stays exact.
const MAX_DECI_CELSIUS: i32 = i32::MAX / 9;

/// An LM35 (10 mV/°C) wired to an ADC input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TemperatureSensor {
    /// ADC reference voltage.
    pub vref_mv: u32,
    /// Number of ADC codes, 1024 for a 10-bit part.
    pub full_scale: u32,
}

impl TemperatureSensor {
    pub const DEFAULT: Self = Self { vref_mv: 5000, full_scale: 1024 };

    pub fn convert(&self, raw: u16) -> Temperature {
        if self.full_scale == 0 {
            return Temperature::default();
        }
        // At 10 mV per degree, millivolts are tenths of a degree.
        let mv = u64::from(raw) * u64::from(self.vref_mv) / u64::from(self.full_scale);
        let mv = mv.min(MAX_DECI_CELSIUS as u64);
        Temperature::from_deci_celsius(mv as i32)
    }
}

impl Default for TemperatureSensor {
    fn default() -> Self {
        Self::DEFAULT
    }
}
