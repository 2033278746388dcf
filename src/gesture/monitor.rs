//! Clipboard polling task.
//!
//! One tokio task per running monitor owns the [`DetectorState`]. Poll ticks,
//! the reset deadline, and control commands are multiplexed in a single
//! `select!` loop, so state transitions never interleave. Stopping the
//! monitor ends the task and with it both timers.

use super::state::{ClipboardSample, DetectorState, GestureTrigger};
use crate::clipboard::{ClipboardAccess, ClipboardError};
use crate::config::GestureSettings;
use crate::events::GestureDispatcher;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Poll ticks absorbed around a clipboard write made by this process.
pub const SELF_WRITE_SUPPRESSION: u32 = 3;

#[derive(Error, Debug)]
pub enum GestureError {
    #[error("Gesture monitor is not running")]
    NotRunning,

    #[error("Gesture monitor task stopped unexpectedly")]
    TaskGone,

    #[error("Clipboard error: {0}")]
    Clipboard(#[from] ClipboardError),
}

/// Timing parameters for a monitor run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GestureConfig {
    pub poll_interval: Duration,
    pub copy_window: Duration,
    /// Upper bound on a single clipboard read.
    pub read_timeout: Duration,
    pub trigger: GestureTrigger,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            copy_window: Duration::from_millis(500),
            read_timeout: Duration::from_millis(250),
            trigger: GestureTrigger::DoubleCopy,
        }
    }
}

impl From<&GestureSettings> for GestureConfig {
    fn from(settings: &GestureSettings) -> Self {
        Self {
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            copy_window: Duration::from_millis(settings.copy_window_ms),
            read_timeout: Duration::from_millis(settings.read_timeout_ms),
            trigger: settings.trigger,
        }
    }
}

/// Point-in-time view of a running detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorSnapshot {
    pub copy_count: u32,
    pub copy_window: Duration,
    pub reset_pending: bool,
    pub paused: bool,
    pub suppressed_samples: u32,
}

enum Control {
    SetWindow(Duration),
    Pause,
    Resume,
    Suppress {
        samples: u32,
        ack: oneshot::Sender<()>,
    },
    Snapshot(oneshot::Sender<DetectorSnapshot>),
}

struct Running {
    control_tx: mpsc::Sender<Control>,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Starts, stops, and steers the clipboard polling task.
pub struct GestureMonitor {
    clipboard: Arc<dyn ClipboardAccess>,
    dispatcher: Arc<GestureDispatcher>,
    running: Mutex<Option<Running>>,
}

impl GestureMonitor {
    pub fn new(clipboard: Arc<dyn ClipboardAccess>, dispatcher: Arc<GestureDispatcher>) -> Self {
        Self {
            clipboard,
            dispatcher,
            running: Mutex::new(None),
        }
    }

    /// Begin polling. A second call while running only applies the new
    /// copy window.
    pub async fn start(&self, config: GestureConfig) {
        let mut running = self.running.lock().await;

        if let Some(run) = running.as_ref() {
            if !run.task.is_finished() {
                debug!("Gesture monitor already running; updating window");
                let _ = run
                    .control_tx
                    .send(Control::SetWindow(config.copy_window))
                    .await;
                return;
            }
        }

        let (control_tx, control_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let worker = Worker {
            clipboard: Arc::clone(&self.clipboard),
            dispatcher: Arc::clone(&self.dispatcher),
            state: DetectorState::new(config.copy_window, config.trigger),
            config,
            paused: false,
            suppress_remaining: 0,
            read_failures: 0,
        };
        let task = tokio::spawn(worker.run(control_rx, shutdown_rx));

        info!(
            "Gesture monitor started (poll: {}ms, window: {}ms, trigger: {:?})",
            config.poll_interval.as_millis(),
            config.copy_window.as_millis(),
            config.trigger
        );

        *running = Some(Running {
            control_tx,
            shutdown_tx,
            task,
        });
    }

    /// Stop polling and cancel the pending reset. When this returns the task
    /// has exited; calling it on a stopped monitor does nothing.
    pub async fn stop(&self) {
        let Some(run) = self.running.lock().await.take() else {
            debug!("Gesture monitor already stopped");
            return;
        };

        let _ = run.shutdown_tx.send(());
        if let Err(e) = run.task.await {
            if e.is_panic() {
                error!("Gesture monitor task panicked: {}", e);
            }
        }
        info!("Gesture monitor stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|run| !run.task.is_finished())
    }

    /// Change the copy window for subsequent samples without touching the
    /// current count.
    pub async fn set_window(&self, window: Duration) -> Result<(), GestureError> {
        self.send(Control::SetWindow(window)).await
    }

    /// Stop sampling without tearing the task down.
    pub async fn pause(&self) -> Result<(), GestureError> {
        self.send(Control::Pause).await
    }

    /// Resume sampling. The first sample after resuming becomes the baseline
    /// and is not counted.
    pub async fn resume(&self) -> Result<(), GestureError> {
        self.send(Control::Resume).await
    }

    /// Absorb the next `samples` poll ticks: their clipboard text becomes the
    /// baseline and is never counted as a copy. Returns once the task has
    /// applied the request.
    pub async fn suppress(&self, samples: u32) -> Result<(), GestureError> {
        let (ack, done) = oneshot::channel();
        self.send(Control::Suppress { samples, ack }).await?;
        done.await.map_err(|_| GestureError::TaskGone)
    }

    /// Write `text` to the clipboard without it registering as a user copy.
    pub async fn write_own(&self, text: &str) -> Result<(), GestureError> {
        match self.suppress(SELF_WRITE_SUPPRESSION).await {
            Ok(()) | Err(GestureError::NotRunning) => {}
            Err(e) => return Err(e),
        }
        self.clipboard.write_text(text).await?;
        Ok(())
    }

    pub async fn snapshot(&self) -> Result<DetectorSnapshot, GestureError> {
        let (reply, answer) = oneshot::channel();
        self.send(Control::Snapshot(reply)).await?;
        answer.await.map_err(|_| GestureError::TaskGone)
    }

    async fn send(&self, control: Control) -> Result<(), GestureError> {
        // Clone the sender so the lock is not held while the task is busy
        let control_tx = match self.running.lock().await.as_ref() {
            Some(run) => run.control_tx.clone(),
            None => return Err(GestureError::NotRunning),
        };
        control_tx
            .send(control)
            .await
            .map_err(|_| GestureError::TaskGone)
    }
}

struct Worker {
    clipboard: Arc<dyn ClipboardAccess>,
    dispatcher: Arc<GestureDispatcher>,
    state: DetectorState,
    config: GestureConfig,
    paused: bool,
    suppress_remaining: u32,
    read_failures: u32,
}

impl Worker {
    async fn run(
        mut self,
        mut control_rx: mpsc::Receiver<Control>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let mut ticker = time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.state.reset_deadline();

            tokio::select! {
                biased;

                _ = &mut shutdown_rx => break,

                Some(control) = control_rx.recv() => self.apply(control),

                _ = wait_until(deadline) => {
                    if self.state.expire(Instant::now()) {
                        debug!("Copy count reset after idle window");
                    }
                }

                _ = ticker.tick() => self.poll_once().await,
            }
        }

        self.state.cancel_reset();
        debug!("Gesture monitor task exited");
    }

    fn apply(&mut self, control: Control) {
        match control {
            Control::SetWindow(window) => {
                self.state.set_window(window);
                self.config.copy_window = window;
                info!("Copy window set to {}ms", window.as_millis());
            }
            Control::Pause => {
                self.paused = true;
                info!("Gesture monitor paused");
            }
            Control::Resume => {
                if self.paused {
                    self.paused = false;
                    self.suppress_remaining = self.suppress_remaining.max(1);
                    info!("Gesture monitor resumed");
                }
            }
            Control::Suppress { samples, ack } => {
                self.suppress_remaining = self.suppress_remaining.max(samples);
                debug!("Suppressing next {} clipboard samples", samples);
                let _ = ack.send(());
            }
            Control::Snapshot(reply) => {
                let _ = reply.send(DetectorSnapshot {
                    copy_count: self.state.copy_count(),
                    copy_window: self.state.copy_window(),
                    reset_pending: self.state.reset_deadline().is_some(),
                    paused: self.paused,
                    suppressed_samples: self.suppress_remaining,
                });
            }
        }
    }

    async fn poll_once(&mut self) {
        if self.paused {
            return;
        }

        let text = match time::timeout(self.config.read_timeout, self.clipboard.read_text()).await
        {
            Ok(Ok(text)) => {
                if self.read_failures > 0 {
                    info!(
                        "Clipboard readable again after {} failed reads",
                        self.read_failures
                    );
                    self.read_failures = 0;
                }
                text
            }
            Ok(Err(e)) => {
                self.note_read_failure(&e.to_string());
                return;
            }
            Err(_) => {
                let msg = format!("read timed out after {:?}", self.config.read_timeout);
                self.note_read_failure(&msg);
                return;
            }
        };

        if self.suppress_remaining > 0 {
            self.suppress_remaining -= 1;
            self.state.adopt(text);
            return;
        }

        let sample = ClipboardSample::new(text, Instant::now());
        if let Some(event) = self.state.observe(sample) {
            info!(
                "{} detected ({} chars)",
                event.kind,
                event.text.chars().count()
            );
            let delivered = self.dispatcher.emit(event.kind, &event);
            debug!("{} delivered to {} listeners", event.kind, delivered);
        }
    }

    fn note_read_failure(&mut self, reason: &str) {
        self.read_failures += 1;
        // Only the first failure of a streak is worth a warning at 10 Hz
        if self.read_failures == 1 {
            warn!("Clipboard read failed: {}", reason);
        } else {
            debug!("Clipboard read failed ({}x): {}", self.read_failures, reason);
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
