//! Desktop notifications for transform outcomes.

use notify_rust::Notification;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

const APP_NAME: &str = "ccai";

/// Toast severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyLevel {
    Info,
    Success,
    Error,
}

/// Sink for user-facing toasts.
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NotifyLevel, title: &str, body: &str);
}

/// Native notifications via notify-rust.
#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopNotifier;

impl Notifier for DesktopNotifier {
    fn notify(&self, level: NotifyLevel, title: &str, body: &str) {
        let mut notification = Notification::new();
        notification.summary(title).body(body).appname(APP_NAME);
        if level == NotifyLevel::Error {
            notification.icon("dialog-error");
        }

        match notification.show() {
            Ok(_) => debug!("Notification shown: {}", title),
            Err(e) => warn!("Failed to show notification: {}", e),
        }
    }
}

/// Keeps notifications in memory; used by tests and headless runs.
#[derive(Default, Clone)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<(NotifyLevel, String, String)>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(NotifyLevel, String, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, level: NotifyLevel, title: &str, body: &str) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((level, title.to_string(), body.to_string()));
        }
    }
}

/// First `max` characters of `text`, with an ellipsis when cut.
pub fn preview(text: &str, max: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}
