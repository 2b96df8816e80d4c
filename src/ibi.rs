//! Rolling window of recent inter-beat intervals.

/// Number of intervals averaged into the BPM estimate.
pub const IBI_HISTORY_LEN: usize = 10;

const MS_PER_MINUTE: u64 = 60_000;

/// The last [`IBI_HISTORY_LEN`] intervals in milliseconds, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IbiHistory {
    slots: [u32; IBI_HISTORY_LEN],
}

impl IbiHistory {
    pub const fn new() -> Self {
        Self { slots: [0; IBI_HISTORY_LEN] }
    }

    /// Fill every slot with `ibi` so the first average isn't dragged toward zero.
    pub fn seed(&mut self, ibi: u32) {
        self.slots = [ibi; IBI_HISTORY_LEN];
    }

    /// Drop the oldest interval and append `ibi`.
    pub fn push(&mut self, ibi: u32) {
        self.slots.copy_within(1.., 0);
        self.slots[IBI_HISTORY_LEN - 1] = ibi;
    }

    /// Truncating mean of the window.
    pub fn average(&self) -> u32 {
        let total: u64 = self.slots.iter().map(|&v| u64::from(v)).sum();
        (total / IBI_HISTORY_LEN as u64) as u32
    }

    /// `60000 / average`, or `None` when the average is zero and there is no rate to report.
    pub fn bpm(&self) -> Option<u32> {
        match self.average() {
            0 => None,
            avg => Some((MS_PER_MINUTE / u64::from(avg)) as u32),
        }
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.slots
    }
}

impl Default for IbiHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_history_reports_the_seed_rate() {
        let mut history = IbiHistory::new();
        history.seed(600);
        assert_eq!(history.as_slice(), &[600; IBI_HISTORY_LEN]);
        assert_eq!(history.average(), 600);
        assert_eq!(history.bpm(), Some(100));
    }

    #[test]
    fn push_evicts_the_oldest_interval() {
        let mut history = IbiHistory::new();
        history.seed(800);
        history.push(700);
        assert_eq!(history.as_slice()[0], 800);
        assert_eq!(history.as_slice()[IBI_HISTORY_LEN - 1], 700);
        // (9 * 800 + 700) / 10
        assert_eq!(history.average(), 790);
        assert_eq!(history.bpm(), Some(75));

        for _ in 0..IBI_HISTORY_LEN {
            history.push(500);
        }
        assert_eq!(history.as_slice(), &[500; IBI_HISTORY_LEN]);
        assert_eq!(history.bpm(), Some(120));
    }

    #[test]
    fn average_truncates() {
        let mut history = IbiHistory::new();
        history.seed(601);
        history.push(600);
        // 6009 / 10
        assert_eq!(history.average(), 600);
    }

    #[test]
    fn zero_average_has_no_rate() {
        let mut history = IbiHistory::new();
        assert_eq!(history.average(), 0);
        assert_eq!(history.bpm(), None);

        // A lone short interval still truncates to a zero average.
        history.push(9);
        assert_eq!(history.average(), 0);
        assert_eq!(history.bpm(), None);
    }
}
