//! ADC front end for the pulse and temperature sensors.

use core::convert::Infallible;

use embassy_mspm0::adc::{Adc, AnyAdcChannel};
use embassy_mspm0::mode::Blocking;
use embassy_mspm0::peripherals::ADC0;
use pulse_monitor::SampleSource;

/// The detector works in 10-bit counts; the MSPM0 converts at 12 bits.
const DOWNSHIFT: u32 = 2;

/// Owns ADC0 and both sensor channels, so the sampler is its only user.
pub struct SensorAdc<'d> {
    adc: Adc<'d, ADC0, Blocking>,
    pulse: AnyAdcChannel<ADC0>,
    temperature: AnyAdcChannel<ADC0>,
}

impl<'d> SensorAdc<'d> {
    pub fn new(adc: Adc<'d, ADC0, Blocking>, pulse: AnyAdcChannel<ADC0>, temperature: AnyAdcChannel<ADC0>) -> Self {
        Self { adc, pulse, temperature }
    }

    /// One temperature conversion, in the same 10-bit scale as the pulse channel.
    pub fn read_temperature(&mut self) -> u16 {
        self.adc.blocking_read(&mut self.temperature) >> DOWNSHIFT
    }
}

impl SampleSource for SensorAdc<'_> {
    type Error = Infallible;

    fn read(&mut self) -> Result<u16, Infallible> {
        Ok(self.adc.blocking_read(&mut self.pulse) >> DOWNSHIFT)
    }
}
