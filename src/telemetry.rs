//! Serial event stream.
//!
//! One record per line: a kind marker, the decimal value, CRLF. The raw signal
//! goes out on every loop pass; rate and interval only when a beat was taken.

use core::fmt::Write as _;

use embedded_io_async::Write;

use heapless::String;

use crate::shared::{BeatReport, Snapshot};

/// Marker byte plus an `i32` plus CRLF.
const RECORD_CAP: usize = 1 + 11 + 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecordKind {
    Signal,
    Bpm,
    Ibi,
}

impl RecordKind {
    pub fn marker(&self) -> char {
        match self {
            RecordKind::Signal => 'S',
            RecordKind::Bpm => 'B',
            RecordKind::Ibi => 'Q',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Record {
    pub kind: RecordKind,
    pub value: i32,
}

impl Record {
    pub fn new(kind: RecordKind, value: i32) -> Self {
        Self { kind, value }
    }

    pub fn encode(&self) -> String<RECORD_CAP> {
        let mut line = String::new();
        // Cannot overflow: the capacity covers i32::MIN.
        let _ = write!(line, "{}{}\r\n", self.kind.marker(), self.value);
        line
    }
}

pub async fn write_record<W: Write>(writer: &mut W, record: Record) -> Result<(), W::Error> {
    writer.write_all(record.encode().as_bytes()).await
}

/// Writes the signal record, then `B` and `Q` when a beat was consumed.
pub async fn publish<W: Write>(
    writer: &mut W,
    snapshot: &Snapshot,
    beat: Option<BeatReport>,
) -> Result<(), W::Error> {
    write_record(writer, Record::new(RecordKind::Signal, snapshot.signal)).await?;
    if let Some(beat) = beat {
        write_record(writer, Record::new(RecordKind::Bpm, saturate(beat.bpm))).await?;
        write_record(writer, Record::new(RecordKind::Ibi, saturate(beat.ibi))).await?;
    }
    Ok(())
}

fn saturate(v: u32) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}
