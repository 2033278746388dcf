//! Panic hook that appends panic reports to `<data_dir>/crash.log`.
//!
//! The hook runs for every panic, including ones later caught by the event
//! dispatcher or confined to a spawned task, so a report does not mean the
//! process exited.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::panic::{self, PanicHookInfo};
use std::path::PathBuf;

use crate::config::Settings;

const CRASH_LOG: &str = "crash.log";

/// Install the panic hook. Call first thing in `main`.
pub fn install() {
    // Enable backtraces
    if std::env::var("RUST_BACKTRACE").is_err() {
        std::env::set_var("RUST_BACKTRACE", "1");
    }

    panic::set_hook(Box::new(|info| {
        handle_panic(info);
    }));
}

/// Get the path for the crash report file.
fn crash_report_path() -> Option<PathBuf> {
    Settings::data_dir().ok().map(|dir| dir.join(CRASH_LOG))
}

/// Handle a panic by logging it to file and stderr.
fn handle_panic(info: &PanicHookInfo) {
    let crash_report = format_crash_report(info);

    eprintln!("{}", crash_report);

    // Append so earlier reports survive
    if let Some(path) = crash_report_path() {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&path) {
            let _ = file.write_all(b"\n\n========================================\n\n");
            let _ = file.write_all(crash_report.as_bytes());
            let _ = file.flush();
            eprintln!("\nCrash report appended to: {}", path.display());
        }
    }
}

fn format_crash_report(info: &PanicHookInfo) -> String {
    let location = info
        .location()
        .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
        .unwrap_or_else(|| "unknown".to_string());

    render_report(
        &panic_message(info.payload()),
        &location,
        &std::backtrace::Backtrace::force_capture().to_string(),
    )
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

fn render_report(message: &str, location: &str, backtrace: &str) -> String {
    let thread = std::thread::current();

    format!(
        r"
================================================================================
CCAI PANIC REPORT
================================================================================
Version:  {}
Time:     {}
Thread:   {} ({:?})
Location: {}
Message:  {}

Backtrace:
{}
================================================================================

ccai hit a panic. Panics in event listeners and background tasks are
contained; if `ccai status` shows the daemon stopped, restart it with
`ccai start`. Include this report when filing an issue.
",
        env!("CARGO_PKG_VERSION"),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
        thread.name().unwrap_or("<unnamed>"),
        thread.id(),
        location,
        message,
        backtrace,
    )
}
