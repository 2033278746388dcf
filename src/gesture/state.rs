//! Copy-cadence state machine.
//!
//! `DetectorState` is a plain value with no timers or I/O. The monitor task
//! feeds it one [`ClipboardSample`] per poll tick and calls
//! [`DetectorState::expire`] when the reset deadline passes; every transition
//! happens on that one task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Clipboard text read on one poll tick.
#[derive(Debug, Clone)]
pub struct ClipboardSample {
    pub text: String,
    pub observed_at: Instant,
}

impl ClipboardSample {
    pub fn new(text: impl Into<String>, observed_at: Instant) -> Self {
        Self {
            text: text.into(),
            observed_at,
        }
    }
}

/// Which gesture a [`GestureEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GestureKind {
    DoubleCopy,
    TripleCopy,
}

impl GestureKind {
    /// Copy count carried by events of this kind.
    pub fn count(self) -> u8 {
        match self {
            GestureKind::DoubleCopy => 2,
            GestureKind::TripleCopy => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GestureKind::DoubleCopy => "double_copy",
            GestureKind::TripleCopy => "triple_copy",
        }
    }
}

impl std::fmt::Display for GestureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Count at which the detector fires and resets.
///
/// With `DoubleCopy` the count is zeroed on reaching 2, so a count-3 event
/// cannot occur. `TripleCopy` arms only the third copy, for users who get
/// accidental double copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GestureTrigger {
    #[default]
    DoubleCopy,
    TripleCopy,
}

/// A detected gesture. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GestureEvent {
    /// Clipboard text of the copy that completed the gesture.
    pub text: String,
    pub kind: GestureKind,
    /// Monotonic time of the completing copy.
    pub observed_at: Instant,
    /// Wall-clock time at emission.
    pub timestamp: DateTime<Utc>,
}

impl GestureEvent {
    pub fn count(&self) -> u8 {
        self.kind.count()
    }
}

/// Counter and timer state owned by a single gesture monitor.
#[derive(Debug, Clone)]
pub struct DetectorState {
    last_text: String,
    last_copy_at: Option<Instant>,
    copy_count: u32,
    reset_deadline: Option<Instant>,
    copy_window: Duration,
    trigger: GestureTrigger,
}

impl DetectorState {
    pub fn new(copy_window: Duration, trigger: GestureTrigger) -> Self {
        Self {
            last_text: String::new(),
            last_copy_at: None,
            copy_count: 0,
            reset_deadline: None,
            copy_window,
            trigger,
        }
    }

    pub fn copy_count(&self) -> u32 {
        self.copy_count
    }

    pub fn copy_window(&self) -> Duration {
        self.copy_window
    }

    pub fn last_text(&self) -> &str {
        &self.last_text
    }

    /// Pending count-reset deadline, if any.
    pub fn reset_deadline(&self) -> Option<Instant> {
        self.reset_deadline
    }

    /// Change the continuation threshold. The current count is kept.
    pub fn set_window(&mut self, window: Duration) {
        self.copy_window = window;
    }

    /// Record `text` as already seen without counting it as a copy.
    ///
    /// Used for clipboard writes made by this process and for the first
    /// sample after a resume.
    pub fn adopt(&mut self, text: String) {
        self.last_text = text;
    }

    /// Drop the pending reset deadline.
    pub fn cancel_reset(&mut self) {
        self.reset_deadline = None;
    }

    /// Fire the reset timer if its deadline has passed. Returns true if the
    /// count was reset.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.reset_deadline {
            Some(deadline) if now >= deadline => {
                self.copy_count = 0;
                self.reset_deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Apply one poll sample.
    pub fn observe(&mut self, sample: ClipboardSample) -> Option<GestureEvent> {
        let ClipboardSample { text, observed_at } = sample;

        if text.trim().is_empty() || text == self.last_text {
            return None;
        }

        let now = observed_at;
        let continues = self
            .last_copy_at
            .is_some_and(|last| now.saturating_duration_since(last) <= self.copy_window);

        self.copy_count = if continues { self.copy_count + 1 } else { 1 };
        self.last_copy_at = Some(now);
        self.reset_deadline = Some(now + self.copy_window * 2);

        let kind = match (self.trigger, self.copy_count) {
            (GestureTrigger::DoubleCopy, 2) => GestureKind::DoubleCopy,
            (_, 3) => GestureKind::TripleCopy,
            _ => {
                self.last_text = text;
                return None;
            }
        };

        self.copy_count = 0;
        self.last_text = text.clone();

        Some(GestureEvent {
            text,
            kind,
            observed_at: now,
            timestamp: Utc::now(),
        })
    }
}
