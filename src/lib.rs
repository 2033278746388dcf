//! ccai library exports for testing and fuzzing.
//!
//! The binary in `main.rs` is a thin CLI over these modules; integration
//! tests and fuzz targets use them directly.

pub mod clipboard;
pub mod config;
pub mod context;
#[cfg(unix)]
pub mod daemon;
pub mod events;
pub mod gesture;
#[cfg(unix)]
pub mod ipc;
pub mod notify;
pub mod panic_handler;
pub mod secrets;
pub mod transform;

// Re-export commonly used types for convenience
pub use config::{Settings, SettingsStore};
pub use gesture::{DetectorState, GestureEvent, GestureKind, GestureMonitor};
pub use transform::{TransformMode, TransformRequest, TransformResult, Transformer};
