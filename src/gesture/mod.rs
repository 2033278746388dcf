//! Double-copy gesture detection.
//!
//! The clipboard is polled on a fixed interval rather than hooked, because
//! clipboard-change notifications are not dependable across platforms. A
//! gesture is a run of distinct clipboard texts each arriving within the copy
//! window of the previous one; see [`state::DetectorState`] for the rules.

pub mod monitor;
pub mod state;

pub use monitor::{
    DetectorSnapshot, GestureConfig, GestureError, GestureMonitor, SELF_WRITE_SUPPRESSION,
};
pub use state::{ClipboardSample, DetectorState, GestureEvent, GestureKind, GestureTrigger};
