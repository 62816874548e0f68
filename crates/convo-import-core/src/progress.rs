//! Upload progress model.
//!
//! While a single request is in flight there is no real signal, so the bar
//! creeps forward on a timer, slowing past 50%, 70% and 90%, and never
//! reaches 100%. Once chunk metadata exists the value is derived from the
//! chunk counters instead. Only a confirmed completion reports 100%.

use std::time::Duration;

/// Interval between cosmetic progress steps.
pub const SIMULATED_TICK: Duration = Duration::from_millis(200);
/// Interval between status label changes.
pub const LABEL_ROTATION: Duration = Duration::from_secs(3);

/// Highest value the simulated bar may show.
const SIMULATED_CEILING: f64 = 99.0;
/// Share of an in-flight chunk credited before it finishes.
const IN_FLIGHT_CREDIT: f64 = 0.9;

/// Status label shown next to the bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressLabel {
    Reading,
    Parsing,
    Saving,
}

impl ProgressLabel {
    const CYCLE: [ProgressLabel; 3] = [
        ProgressLabel::Reading,
        ProgressLabel::Parsing,
        ProgressLabel::Saving,
    ];

    pub fn text(&self) -> &'static str {
        match self {
            ProgressLabel::Reading => "reading file",
            ProgressLabel::Parsing => "parsing conversations",
            ProgressLabel::Saving => "saving conversations",
        }
    }
}

/// One cosmetic step from `current`.
pub fn simulated_step(current: f64) -> f64 {
    let step = if current >= 90.0 {
        0.1
    } else if current >= 70.0 {
        0.5
    } else if current >= 50.0 {
        1.0
    } else {
        2.0
    };
    (current + step).min(SIMULATED_CEILING)
}

/// Progress while chunk `current` (1-based) of `total` is in flight.
pub fn chunk_progress(current: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let weight = 100.0 / total as f64;
    let completed = current.saturating_sub(1).min(total) as f64 * weight;
    completed + weight * IN_FLIGHT_CREDIT
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Simulated,
    Chunked { current: usize, total: usize },
    Done,
}

/// Progress bar state for one upload.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressModel {
    percent: f64,
    elapsed: Duration,
    mode: Mode,
}

impl Default for ProgressModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressModel {
    pub fn new() -> Self {
        Self {
            percent: 0.0,
            elapsed: Duration::ZERO,
            mode: Mode::Simulated,
        }
    }

    /// Advance one [`SIMULATED_TICK`]. Only moves the bar in simulated mode.
    pub fn tick(&mut self) {
        self.elapsed += SIMULATED_TICK;
        if self.mode == Mode::Simulated {
            self.percent = simulated_step(self.percent);
        }
    }

    /// Switch to chunk-driven progress.
    pub fn set_chunk(&mut self, current: usize, total: usize) {
        if self.mode == Mode::Done {
            return;
        }
        self.mode = Mode::Chunked { current, total };
        self.percent = chunk_progress(current, total);
    }

    pub fn complete(&mut self) {
        self.mode = Mode::Done;
        self.percent = 100.0;
    }

    pub fn percent(&self) -> f64 {
        self.percent
    }

    /// Rounded value for display, clamped to 0..=100.
    pub fn display_percent(&self) -> u8 {
        self.percent.round().clamp(0.0, 100.0) as u8
    }

    pub fn label(&self) -> ProgressLabel {
        let idx = (self.elapsed.as_millis() / LABEL_ROTATION.as_millis()) as usize;
        ProgressLabel::CYCLE[idx % ProgressLabel::CYCLE.len()]
    }

    /// `(current, total)` once chunk metadata exists.
    pub fn chunk(&self) -> Option<(usize, usize)> {
        match self.mode {
            Mode::Chunked { current, total } => Some((current, total)),
            _ => None,
        }
    }
}
