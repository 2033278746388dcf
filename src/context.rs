//! Focused-application detection.
//!
//! Used to skip gestures made inside applications on the privacy exclusion
//! list (password managers, terminals holding secrets). Supports X11 via
//! `xdotool` and macOS via `osascript`; elsewhere detection reports
//! `Unsupported` and callers carry on.

use serde::{Deserialize, Serialize};
use std::process::Command;
use thiserror::Error;
use tracing::debug;

/// Errors from context detection.
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Active application detection is not supported on this display server")]
    Unsupported,

    #[error("Command failed: {0}")]
    Command(String),
}

/// The currently focused application.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveApp {
    /// Application name/class (e.g., "firefox", "KeePassXC")
    pub app_name: String,
    pub window_title: String,
}

impl ActiveApp {
    pub fn new(app_name: impl Into<String>, window_title: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            window_title: window_title.into(),
        }
    }

    /// Case-insensitive partial match of the app name against `pattern`.
    pub fn matches(&self, pattern: &str) -> bool {
        let pattern = pattern.trim().to_lowercase();
        if pattern.is_empty() || self.app_name.is_empty() {
            return false;
        }
        self.app_name.to_lowercase().contains(&pattern)
    }

    /// First entry of `patterns` that matches.
    pub fn matches_any<'a>(&self, patterns: &'a [String]) -> Option<&'a str> {
        patterns
            .iter()
            .find(|p| self.matches(p))
            .map(String::as_str)
    }
}

/// Source of the focused application.
pub trait AppDetector: Send + Sync {
    /// Blocking; run it off the async runtime.
    fn active_app(&self) -> Result<ActiveApp, ContextError>;
}

/// Supported display servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayServer {
    X11,
    Wayland,
    MacOS,
    Windows,
    Unknown,
}

/// Detector that shells out to the platform's window tools.
pub struct SystemAppDetector {
    display_server: DisplayServer,
}

impl SystemAppDetector {
    pub fn new() -> Self {
        Self {
            display_server: detect_display_server(),
        }
    }

    pub fn display_server(&self) -> DisplayServer {
        self.display_server
    }
}

impl Default for SystemAppDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl AppDetector for SystemAppDetector {
    fn active_app(&self) -> Result<ActiveApp, ContextError> {
        match self.display_server {
            DisplayServer::X11 => x11_active_app(),
            DisplayServer::MacOS => macos_active_app(),
            DisplayServer::Wayland | DisplayServer::Windows | DisplayServer::Unknown => {
                Err(ContextError::Unsupported)
            }
        }
    }
}

fn detect_display_server() -> DisplayServer {
    #[cfg(target_os = "macos")]
    return DisplayServer::MacOS;

    #[cfg(target_os = "windows")]
    return DisplayServer::Windows;

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        if std::env::var("WAYLAND_DISPLAY").is_ok() {
            return DisplayServer::Wayland;
        }
        if std::env::var("DISPLAY").is_ok() {
            return DisplayServer::X11;
        }
        DisplayServer::Unknown
    }
}

fn run(program: &str, args: &[&str]) -> Result<String, ContextError> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| ContextError::Command(format!("{} {}: {}", program, args.join(" "), e)))?;

    if !output.status.success() {
        return Err(ContextError::Command(format!(
            "{} {} exited with {}",
            program,
            args.join(" "),
            output.status
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn x11_active_app() -> Result<ActiveApp, ContextError> {
    let window_id = run("xdotool", &["getactivewindow"])?;
    let app_name = run("xdotool", &["getwindowclassname", &window_id])?;
    let window_title = run("xdotool", &["getwindowname", &window_id]).unwrap_or_default();

    debug!("X11 active window: {}", app_name);
    Ok(ActiveApp::new(app_name, window_title))
}

fn macos_active_app() -> Result<ActiveApp, ContextError> {
    let app_name = run(
        "osascript",
        &[
            "-e",
            "tell application \"System Events\" to get name of first application process whose frontmost is true",
        ],
    )?;

    debug!("macOS active app: {}", app_name);
    Ok(ActiveApp::new(app_name, String::new()))
}
