//! Fuzz target for the copy-gesture state machine.
//!
//! Feeds arbitrary copy/timing sequences and checks the count never reaches
//! the trigger threshold without an event being emitted.

#![no_main]

use arbitrary::Arbitrary;
use ccai::gesture::{ClipboardSample, DetectorState, GestureKind, GestureTrigger};
use libfuzzer_sys::fuzz_target;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Arbitrary, Debug)]
enum Operation {
    /// Clipboard sample after `gap_ms`.
    Copy { text: String, gap_ms: u16 },
    /// Let `ms` pass and fire the reset timer if due.
    Idle { ms: u16 },
    SetWindow { ms: u16 },
    Adopt { text: String },
}

#[derive(Arbitrary, Debug)]
struct Input {
    triple: bool,
    window_ms: u16,
    ops: Vec<Operation>,
}

fuzz_target!(|input: Input| {
    let trigger = if input.triple {
        GestureTrigger::TripleCopy
    } else {
        GestureTrigger::DoubleCopy
    };
    let max_count = if input.triple { 2 } else { 1 };

    let mut now = Instant::now();
    let mut state = DetectorState::new(Duration::from_millis(input.window_ms.into()), trigger);

    for op in input.ops {
        match op {
            Operation::Copy { text, gap_ms } => {
                now += Duration::from_millis(gap_ms.into());
                state.expire(now);
                if let Some(event) = state.observe(ClipboardSample::new(text.clone(), now)) {
                    assert_eq!(event.text, text);
                    assert_eq!(state.copy_count(), 0);
                    if !input.triple {
                        assert_eq!(event.kind, GestureKind::DoubleCopy);
                    } else {
                        assert_eq!(event.kind, GestureKind::TripleCopy);
                    }
                }
            }
            Operation::Idle { ms } => {
                now += Duration::from_millis(ms.into());
                state.expire(now);
            }
            Operation::SetWindow { ms } => state.set_window(Duration::from_millis(ms.into())),
            Operation::Adopt { text } => state.adopt(text),
        }
        assert!(state.copy_count() <= max_count);
    }
});
