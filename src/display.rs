//! Text frames for a 16x2 character LCD.

use core::fmt::Write;

use heapless::String;

use crate::temperature::Temperature;

pub const LCD_COLUMNS: usize = 16;

pub type LcdLine = String<LCD_COLUMNS>;

/// Room to format a row before it is cut to the panel width.
type Scratch = String<32>;

/// Both rows of the panel. Longer text is cut at the last column.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame {
    pub top: LcdLine,
    pub bottom: LcdLine,
}

impl Frame {
    fn from_text(top: &str, bottom: &str) -> Self {
        Frame {
            top: fit(top),
            bottom: fit(bottom),
        }
    }
}

fn fit(text: &str) -> LcdLine {
    let mut line = LcdLine::new();
    for c in text.chars() {
        if line.push(c).is_err() {
            break;
        }
    }
    line
}

pub fn splash() -> Frame {
    Frame::from_text("Patient Health", "Monitoring...")
}

pub fn initializing() -> Frame {
    Frame::from_text("Initializing...", "")
}

pub fn vitals(bpm: u32, temperature: Temperature) -> Frame {
    let mut top = Scratch::new();
    let mut bottom = Scratch::new();
    // Both fit the scratch for any u32 rate and i32 temperature.
    let _ = write!(top, "BPM: {}", bpm);
    let _ = write!(bottom, "Temp: {} F", temperature);
    Frame::from_text(&top, &bottom)
}
