//! Background daemon that turns copy gestures into transforms.
//!
//! The daemon:
//! 1. Loads settings and the API key, and builds the transform provider
//! 2. Polls the clipboard for double/triple-copy gestures
//! 3. Runs the mode configured for each gesture and writes the result back
//! 4. Serves the IPC socket for front-ends and `ccai ctl`
//!
//! All shared state lives in one [`AppContext`] built at startup and handed
//! to every consumer explicitly.

use crate::clipboard::{ClipboardAccess, ClipboardError, SystemClipboard};
use crate::config::{ConfigError, Settings, SettingsStore};
use crate::context::{AppDetector, SystemAppDetector};
use crate::events::GestureDispatcher;
use crate::gesture::{GestureConfig, GestureEvent, GestureKind, GestureMonitor};
use crate::ipc::{
    ipc_path, CommandHandler, DaemonStatus, IpcClient, IpcCommand, IpcError, IpcEvent,
    IpcResponse, IpcServer,
};
use crate::notify::{preview, DesktopNotifier, Notifier, NotifyLevel};
use crate::secrets::CredentialStore;
use crate::transform::{
    Language, OpenAiConfig, OpenAiProvider, TransformMode, TransformRequest, TransformResult,
    Transformer,
};
use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

/// Capacity of the event channel feeding subscribed IPC clients.
const EVENT_CAPACITY: usize = 64;

/// Characters of transformed text shown in a notification.
const NOTIFY_PREVIEW_CHARS: usize = 120;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Clipboard error: {0}")]
    Clipboard(#[from] ClipboardError),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("Daemon already running (PID: {0})")]
    AlreadyRunning(i32),

    #[error("Daemon not running")]
    NotRunning,

    #[error("Failed to signal daemon: {0}")]
    Signal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// External collaborators the daemon is assembled from.
pub struct Collaborators {
    pub settings: SettingsStore,
    pub credentials: CredentialStore,
    pub clipboard: Arc<dyn ClipboardAccess>,
    pub notifier: Arc<dyn Notifier>,
    pub app_detector: Arc<dyn AppDetector>,
}

/// What a gesture led to.
#[derive(Debug, Clone, PartialEq)]
pub enum GestureOutcome {
    /// No mode is bound to the gesture; the window was shown instead.
    WindowShown,
    /// The focused application is on the exclusion list.
    AppExcluded(String),
    Transformed(TransformResult),
    Failed(String),
}

/// Shared daemon state.
pub struct AppContext {
    settings: SettingsStore,
    credentials: CredentialStore,
    clipboard: Arc<dyn ClipboardAccess>,
    dispatcher: Arc<GestureDispatcher>,
    monitor: GestureMonitor,
    transformer: Transformer,
    notifier: Arc<dyn Notifier>,
    app_detector: Arc<dyn AppDetector>,
    events: broadcast::Sender<IpcEvent>,
    window_visible: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl AppContext {
    pub fn new(parts: Collaborators) -> Arc<Self> {
        let settings = parts.settings.get();
        let dispatcher = Arc::new(GestureDispatcher::new());
        let monitor = GestureMonitor::new(Arc::clone(&parts.clipboard), Arc::clone(&dispatcher));
        let transformer = Transformer::new(settings.privacy.exclude_patterns.iter())
            .with_timeout(Duration::from_secs(settings.provider.timeout_secs));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        Arc::new(Self {
            settings: parts.settings,
            credentials: parts.credentials,
            clipboard: parts.clipboard,
            dispatcher,
            monitor,
            transformer,
            notifier: parts.notifier,
            app_detector: parts.app_detector,
            events,
            window_visible: AtomicBool::new(false),
            shutdown,
        })
    }

    pub fn settings(&self) -> Settings {
        self.settings.get()
    }

    pub fn transformer(&self) -> &Transformer {
        &self.transformer
    }

    pub fn monitor(&self) -> &GestureMonitor {
        &self.monitor
    }

    pub fn event_sender(&self) -> broadcast::Sender<IpcEvent> {
        self.events.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IpcEvent> {
        self.events.subscribe()
    }

    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn window_visible(&self) -> bool {
        self.window_visible.load(Ordering::SeqCst)
    }

    fn broadcast(&self, event: IpcEvent) {
        if self.events.send(event).is_err() {
            debug!("No IPC subscribers for event");
        }
    }

    /// Rebuild the provider from the current settings and API key.
    /// Returns whether a provider is now configured.
    pub fn reload_provider(&self) -> bool {
        let Some(api_key) = self.credentials.resolve_api_key() else {
            self.transformer.set_provider(None);
            return false;
        };

        let settings = self.settings.get();
        match OpenAiProvider::new(OpenAiConfig::from_settings(&settings.provider, api_key)) {
            Ok(provider) => {
                self.transformer.set_provider(Some(Arc::new(provider)));
                true
            }
            Err(e) => {
                warn!("Failed to initialize provider: {}", e);
                self.transformer.set_provider(None);
                false
            }
        }
    }

    /// Log a warning when the configured provider is unreachable.
    pub async fn check_provider(&self) {
        if self.transformer.health_check().await {
            info!("Transform provider is reachable");
        } else {
            warn!("Transform provider health check failed; transforms may not work");
        }
    }

    /// Route both gesture kinds into [`AppContext::on_gesture`].
    ///
    /// Listeners hold a weak reference and spawn the work, so the monitor
    /// task returns to polling immediately.
    pub fn wire_listeners(self: &Arc<Self>) {
        for kind in [GestureKind::DoubleCopy, GestureKind::TripleCopy] {
            let ctx: Weak<Self> = Arc::downgrade(self);
            self.dispatcher.on(kind, move |event: &GestureEvent| {
                let Some(ctx) = ctx.upgrade() else {
                    return Ok(());
                };
                let runtime = tokio::runtime::Handle::try_current()?;
                let event = event.clone();
                runtime.spawn(async move {
                    ctx.on_gesture(event).await;
                });
                Ok(())
            });
        }
    }

    /// Handle one detected gesture end to end.
    pub async fn on_gesture(&self, event: GestureEvent) -> GestureOutcome {
        self.broadcast(IpcEvent::Gesture {
            kind: event.kind,
            text: event.text.clone(),
            timestamp: event.timestamp.to_rfc3339(),
        });

        let settings = self.settings.get();
        let mode = match event.kind {
            GestureKind::DoubleCopy => settings.gesture.double_copy_mode,
            GestureKind::TripleCopy => settings.gesture.triple_copy_mode,
        };

        let Some(mode) = mode else {
            debug!("No mode bound to {}; showing window", event.kind);
            self.set_window_visible(true);
            return GestureOutcome::WindowShown;
        };

        if let Some(pattern) = self.excluded_app(&settings.privacy.excluded_apps).await {
            info!("{} ignored: focused app matches '{}'", event.kind, pattern);
            return GestureOutcome::AppExcluded(pattern);
        }

        let request = TransformRequest::new(event.text, mode).with_languages(
            settings.language.default_input,
            settings.language.default_output,
        );
        let limit = Duration::from_secs(settings.provider.timeout_secs);

        match self.transformer.handle_with_timeout(request, limit).await {
            Ok(result) => {
                if settings.output.auto_clipboard {
                    if let Err(e) = self.monitor.write_own(&result.output_text).await {
                        error!("Failed to write transform result to clipboard: {}", e);
                    }
                }
                if settings.ui.notifications {
                    self.notify(
                        NotifyLevel::Success,
                        format!("ccai: {}", mode),
                        preview(&result.output_text, NOTIFY_PREVIEW_CHARS),
                    )
                    .await;
                }
                self.broadcast(IpcEvent::TransformCompleted {
                    result: result.clone(),
                });
                GestureOutcome::Transformed(result)
            }
            Err(e) => {
                let message = e.user_message();
                warn!("Transform failed: {}", e);
                if settings.ui.notifications {
                    self.notify(
                        NotifyLevel::Error,
                        "ccai: transform failed".to_string(),
                        message.clone(),
                    )
                    .await;
                }
                self.broadcast(IpcEvent::TransformFailed {
                    message: message.clone(),
                });
                GestureOutcome::Failed(message)
            }
        }
    }

    /// Desktop notifiers block on D-Bus, so the toast is shown off the
    /// runtime workers.
    async fn notify(&self, level: NotifyLevel, title: String, body: String) {
        let notifier = Arc::clone(&self.notifier);
        if let Err(e) =
            tokio::task::spawn_blocking(move || notifier.notify(level, &title, &body)).await
        {
            warn!("Notification task failed: {}", e);
        }
    }

    /// First `excluded_apps` entry matching the focused app. Detection
    /// failures never block a transform.
    async fn excluded_app(&self, excluded_apps: &[String]) -> Option<String> {
        if excluded_apps.is_empty() {
            return None;
        }

        let detector = Arc::clone(&self.app_detector);
        match tokio::task::spawn_blocking(move || detector.active_app()).await {
            Ok(Ok(app)) => app.matches_any(excluded_apps).map(str::to_string),
            Ok(Err(e)) => {
                debug!("Active app unknown: {}", e);
                None
            }
            Err(e) => {
                warn!("Active app detection task failed: {}", e);
                None
            }
        }
    }

    pub async fn start_monitor(&self) {
        let settings = self.settings.get();
        self.monitor
            .start(GestureConfig::from(&settings.gesture))
            .await;
        self.broadcast(IpcEvent::MonitorState { running: true });
    }

    pub async fn stop_monitor(&self) {
        self.monitor.stop().await;
        self.broadcast(IpcEvent::MonitorState { running: false });
    }

    /// Push changed settings into the live components.
    pub async fn apply_settings(&self, previous: &Settings, current: &Settings) {
        self.transformer
            .set_exclusions(current.privacy.exclude_patterns.iter());

        if previous.provider != current.provider {
            let configured = self.reload_provider();
            info!("Provider settings changed (configured: {})", configured);
        }

        if previous.gesture == current.gesture {
            return;
        }

        let running = self.monitor.is_running().await;
        if !current.gesture.enabled {
            if running {
                self.stop_monitor().await;
            }
            return;
        }

        let restart = previous.gesture.trigger != current.gesture.trigger
            || previous.gesture.poll_interval_ms != current.gesture.poll_interval_ms
            || previous.gesture.read_timeout_ms != current.gesture.read_timeout_ms;

        if running && restart {
            self.monitor.stop().await;
            self.start_monitor().await;
        } else if running {
            let window = Duration::from_millis(current.gesture.copy_window_ms);
            if let Err(e) = self.monitor.set_window(window).await {
                warn!("Failed to update copy window: {}", e);
            }
        } else if !previous.gesture.enabled {
            self.start_monitor().await;
        }
    }

    /// Set the presentation window flag, broadcasting changes.
    pub fn set_window_visible(&self, visible: bool) {
        let was = self.window_visible.swap(visible, Ordering::SeqCst);
        if was != visible {
            debug!("Window visibility -> {}", visible);
            self.broadcast(IpcEvent::WindowVisibility { visible });
        }
    }

    pub async fn status(&self) -> DaemonStatus {
        let settings = self.settings.get();
        DaemonStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            pid: std::process::id(),
            monitor_running: self.monitor.is_running().await,
            provider_configured: self.transformer.is_configured(),
            window_visible: self.window_visible(),
            copy_window_ms: settings.gesture.copy_window_ms,
            auto_clipboard: settings.output.auto_clipboard,
        }
    }

    /// Ask the daemon loop to exit.
    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    async fn generate(
        &self,
        text: String,
        mode: Option<TransformMode>,
        input_language: Option<Language>,
        output_language: Option<Language>,
    ) -> IpcResponse {
        let settings = self.settings.get();
        let mode = mode
            .or(settings.gesture.double_copy_mode)
            .unwrap_or_default();
        let request = TransformRequest::new(text, mode).with_languages(
            input_language.unwrap_or(settings.language.default_input),
            output_language.unwrap_or(settings.language.default_output),
        );
        let limit = Duration::from_secs(settings.provider.timeout_secs);

        match self.transformer.handle_with_timeout(request, limit).await {
            Ok(result) => IpcResponse::with_data(&result),
            Err(e) => {
                warn!("Transform failed: {}", e);
                IpcResponse::error(&e.user_message())
            }
        }
    }

    async fn save_settings(&self, patch: serde_json::Value) -> IpcResponse {
        let previous = self.settings.get();
        match self.settings.save_partial(&patch) {
            Ok(current) => {
                self.apply_settings(&previous, &current).await;
                IpcResponse::with_data(&current)
            }
            Err(e) => IpcResponse::error(&e.to_string()),
        }
    }
}

#[async_trait]
impl CommandHandler for AppContext {
    async fn handle(&self, cmd: IpcCommand) -> IpcResponse {
        match cmd {
            IpcCommand::Status => IpcResponse::with_data(&self.status().await),
            IpcCommand::Stop => {
                info!("Stop requested over IPC");
                self.request_shutdown();
                IpcResponse::ok()
            }
            IpcCommand::Generate {
                text,
                mode,
                input_language,
                output_language,
            } => {
                self.generate(text, mode, input_language, output_language)
                    .await
            }
            IpcCommand::Estimate { text } => {
                IpcResponse::with_data(&self.transformer.estimate(&text))
            }
            IpcCommand::GetSettings => IpcResponse::with_data(&self.settings.get()),
            IpcCommand::SaveSettings { settings } => self.save_settings(settings).await,
            IpcCommand::SetCredential { api_key } => match self.credentials.set_api_key(&api_key) {
                Ok(()) => {
                    let configured = self.reload_provider();
                    IpcResponse::with_data(&serde_json::json!({ "configured": configured }))
                }
                Err(e) => IpcResponse::error(&e.to_string()),
            },
            IpcCommand::DeleteCredential => match self.credentials.delete_api_key() {
                Ok(()) => {
                    self.transformer.set_provider(None);
                    IpcResponse::ok()
                }
                Err(e) => IpcResponse::error(&e.to_string()),
            },
            IpcCommand::StartMonitor => {
                self.start_monitor().await;
                IpcResponse::ok()
            }
            IpcCommand::StopMonitor => {
                self.stop_monitor().await;
                IpcResponse::ok()
            }
            IpcCommand::ReadClipboard => match self.clipboard.read_text().await {
                Ok(text) => IpcResponse::with_data(&serde_json::json!({ "text": text })),
                Err(e) => IpcResponse::error(&e.to_string()),
            },
            IpcCommand::WriteClipboard { text } => match self.monitor.write_own(&text).await {
                Ok(()) => IpcResponse::ok(),
                Err(e) => IpcResponse::error(&e.to_string()),
            },
            IpcCommand::ShowWindow => {
                self.set_window_visible(true);
                IpcResponse::with_data(&serde_json::json!({ "visible": true }))
            }
            IpcCommand::ToggleWindow => {
                let visible = !self.window_visible();
                self.set_window_visible(visible);
                IpcResponse::with_data(&serde_json::json!({ "visible": visible }))
            }
            IpcCommand::CloseWindow => {
                self.set_window_visible(false);
                IpcResponse::with_data(&serde_json::json!({ "visible": false }))
            }
            // The server turns the connection into an event stream before
            // commands reach the handler.
            IpcCommand::Subscribe => IpcResponse::ok(),
            IpcCommand::Ping => IpcResponse::pong(),
        }
    }
}

/// Get the PID file path
fn pid_file() -> Result<PathBuf, DaemonError> {
    Ok(Settings::data_dir()?.join("ccai.pid"))
}

fn process_alive(pid: i32) -> bool {
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        // Exists but owned by someone else
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// PID of a live daemon, if the PID file names one.
fn running_pid() -> Option<i32> {
    let path = pid_file().ok()?;
    let pid = std::fs::read_to_string(path).ok()?.trim().parse::<i32>().ok()?;
    process_alive(pid).then_some(pid)
}

/// Write PID file
fn write_pid() -> Result<(), DaemonError> {
    let path = pid_file()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, std::process::id().to_string())?;
    Ok(())
}

/// Remove PID file
fn remove_pid() -> Result<(), DaemonError> {
    let path = pid_file()?;
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    Ok(())
}

/// Start the daemon
pub async fn run(foreground: bool) -> Result<(), DaemonError> {
    if let Some(pid) = running_pid() {
        return Err(DaemonError::AlreadyRunning(pid));
    }

    if !foreground {
        return spawn_background();
    }

    let store = SettingsStore::open_default()?;
    let clipboard: Arc<dyn ClipboardAccess> = Arc::new(SystemClipboard::new()?);
    let ctx = AppContext::new(Collaborators {
        settings: store,
        credentials: CredentialStore::system(),
        clipboard,
        notifier: Arc::new(DesktopNotifier),
        app_detector: Arc::new(SystemAppDetector::new()),
    });

    write_pid()?;
    let result = serve(ctx).await;
    remove_pid()?;

    result
}

/// Re-launch this binary detached, in foreground mode.
fn spawn_background() -> Result<(), DaemonError> {
    use std::process::{Command, Stdio};

    let exe = std::env::current_exe()?;
    let child = Command::new(exe)
        .args(["start", "--foreground"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    info!("Daemon started in background (PID: {})", child.id());
    println!("ccai daemon started (PID: {})", child.id());
    Ok(())
}

/// Main daemon loop: runs until a signal or an IPC `stop`.
pub async fn serve(ctx: Arc<AppContext>) -> Result<(), DaemonError> {
    use tokio::signal::unix::{signal, SignalKind};

    let settings = ctx.settings();
    ctx.wire_listeners();

    if ctx.reload_provider() {
        ctx.check_provider().await;
    } else {
        warn!("No API key configured. Run 'ccai secret set' or set CCAI_API_KEY");
    }

    if settings.gesture.enabled {
        ctx.start_monitor().await;
    } else {
        info!("Gesture detection disabled in settings");
    }

    if settings.ui.window_visible_on_start {
        ctx.set_window_visible(true);
    }

    let server = IpcServer::bind(&ipc_path(), ctx.event_sender())?;
    let server_task = {
        let handler = Arc::clone(&ctx);
        let shutdown = ctx.shutdown_receiver();
        tokio::spawn(async move { server.serve(handler, shutdown).await })
    };

    info!(
        "ccai daemon running. Copy twice within {}ms to transform.",
        settings.gesture.copy_window_ms
    );

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut shutdown = ctx.shutdown_receiver();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
        _ = sigterm.recv() => info!("SIGTERM received"),
        _ = shutdown.wait_for(|stop| *stop) => {}
    }

    ctx.broadcast(IpcEvent::Shutdown);
    ctx.monitor.stop().await;
    ctx.request_shutdown();
    if let Err(e) = server_task.await {
        error!("IPC server task failed: {}", e);
    }

    info!("Daemon stopped");
    Ok(())
}

/// Stop the daemon
pub fn stop() -> Result<(), DaemonError> {
    let pid = running_pid().ok_or(DaemonError::NotRunning)?;
    kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(|e| DaemonError::Signal(e.to_string()))?;
    info!("Sent SIGTERM to daemon (PID: {})", pid);
    println!("Stop signal sent to ccai daemon (PID: {})", pid);
    Ok(())
}

/// Check daemon status
pub fn status() -> Result<(), DaemonError> {
    let Some(pid) = running_pid() else {
        println!("ccai daemon is not running");
        return Ok(());
    };

    println!("ccai daemon is running (PID: {})", pid);

    let response = IpcClient::connect().and_then(|mut client| client.send(&IpcCommand::Status));
    match response {
        Ok(IpcResponse {
            ok: true,
            data: Some(data),
            ..
        }) => {
            if let Ok(status) = serde_json::from_value::<DaemonStatus>(data) {
                println!("  Version:         {}", status.version);
                println!("  Monitor:         {}", on_off(status.monitor_running));
                println!("  Provider:        {}", on_off(status.provider_configured));
                println!("  Copy window:     {}ms", status.copy_window_ms);
                println!("  Auto clipboard:  {}", on_off(status.auto_clipboard));
                println!("  Window visible:  {}", status.window_visible);
            }
        }
        Ok(response) => debug!("Unexpected status response: {:?}", response),
        Err(e) => debug!("Status query over IPC failed: {}", e),
    }

    Ok(())
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::MemoryClipboard;
    use crate::context::{ActiveApp, ContextError};
    use crate::notify::RecordingNotifier;
    use crate::secrets::MemoryBackend;
    use crate::transform::{Message, ProviderError, ProviderResponse, TransformProvider};
    use chrono::Utc;
    use std::sync::Mutex;
    use tokio::time::{sleep, Instant};

    struct UppercaseProvider {
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl TransformProvider for UppercaseProvider {
        fn name(&self) -> &'static str {
            "uppercase"
        }

        fn model(&self) -> &str {
            "test"
        }

        async fn health_check(&self) -> bool {
            true
        }

        async fn generate(&self, messages: &[Message]) -> Result<ProviderResponse, ProviderError> {
            *self.calls.lock().unwrap() += 1;
            let user = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            let text = user.lines().last().unwrap_or_default().to_uppercase();
            Ok(ProviderResponse {
                content: text,
                model: "test".to_string(),
                tokens_used: Some(7),
            })
        }
    }

    struct FixedApp(Option<&'static str>);

    impl AppDetector for FixedApp {
        fn active_app(&self) -> Result<ActiveApp, ContextError> {
            self.0
                .map(|name| ActiveApp::new(name, ""))
                .ok_or(ContextError::Unsupported)
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        ctx: Arc<AppContext>,
        clipboard: MemoryClipboard,
        notifier: RecordingNotifier,
        provider: Arc<UppercaseProvider>,
    }

    fn fixture_with(app: Option<&'static str>, configure: impl FnOnce(&mut Settings)) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path().join("config.toml")).unwrap();
        let mut settings = store.get();
        settings.privacy.excluded_apps = vec!["keepass".to_string()];
        configure(&mut settings);
        store.save(settings).unwrap();

        let clipboard = MemoryClipboard::new("");
        let notifier = RecordingNotifier::new();
        let ctx = AppContext::new(Collaborators {
            settings: store,
            credentials: CredentialStore::new(Arc::new(MemoryBackend::new())),
            clipboard: Arc::new(clipboard.clone()),
            notifier: Arc::new(notifier.clone()),
            app_detector: Arc::new(FixedApp(app)),
        });

        let provider = Arc::new(UppercaseProvider {
            calls: Mutex::new(0),
        });
        ctx.transformer()
            .set_provider(Some(provider.clone() as Arc<dyn TransformProvider>));

        Fixture {
            _dir: dir,
            ctx,
            clipboard,
            notifier,
            provider,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(None, |_| {})
    }

    /// Records the thread each toast was shown on.
    #[derive(Default)]
    struct ThreadNotifier {
        threads: Mutex<Vec<std::thread::ThreadId>>,
    }

    impl Notifier for ThreadNotifier {
        fn notify(&self, _level: NotifyLevel, _title: &str, _body: &str) {
            self.threads
                .lock()
                .unwrap()
                .push(std::thread::current().id());
        }
    }

    #[tokio::test]
    async fn test_notifications_shown_off_the_runtime_thread() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(ThreadNotifier::default());
        let ctx = AppContext::new(Collaborators {
            settings: SettingsStore::open(dir.path().join("config.toml")).unwrap(),
            credentials: CredentialStore::new(Arc::new(MemoryBackend::new())),
            clipboard: Arc::new(MemoryClipboard::new("")),
            notifier: notifier.clone(),
            app_detector: Arc::new(FixedApp(None)),
        });
        ctx.transformer()
            .set_provider(Some(Arc::new(UppercaseProvider {
                calls: Mutex::new(0),
            }) as Arc<dyn TransformProvider>));

        ctx.on_gesture(gesture(GestureKind::DoubleCopy, "hello"))
            .await;
        ctx.transformer().set_provider(None);
        ctx.on_gesture(gesture(GestureKind::DoubleCopy, "hello"))
            .await;

        let threads = notifier.threads.lock().unwrap().clone();
        assert_eq!(threads.len(), 2);
        let runtime_thread = std::thread::current().id();
        assert!(threads.iter().all(|id| *id != runtime_thread));
    }

    fn gesture(kind: GestureKind, text: &str) -> GestureEvent {
        GestureEvent {
            text: text.to_string(),
            kind,
            observed_at: Instant::now(),
            timestamp: Utc::now(),
        }
    }

    fn calls(f: &Fixture) -> u32 {
        *f.provider.calls.lock().unwrap()
    }

    #[tokio::test]
    async fn test_double_copy_transforms_and_writes_back() {
        let f = fixture();
        let mut events = f.ctx.subscribe();

        let outcome = f
            .ctx
            .on_gesture(gesture(GestureKind::DoubleCopy, "hello"))
            .await;

        match outcome {
            GestureOutcome::Transformed(result) => {
                assert_eq!(result.output_text, "HELLO");
                assert_eq!(result.mode, TransformMode::Translate);
                assert_eq!(result.tokens_used, Some(7));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(f.clipboard.get(), "HELLO");

        let sent = f.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, NotifyLevel::Success);

        assert!(matches!(
            events.recv().await.unwrap(),
            IpcEvent::Gesture {
                kind: GestureKind::DoubleCopy,
                ..
            }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            IpcEvent::TransformCompleted { .. }
        ));
    }

    #[tokio::test]
    async fn test_auto_clipboard_off_leaves_clipboard() {
        let f = fixture_with(None, |s| s.output.auto_clipboard = false);
        f.clipboard.set("hello");

        let outcome = f
            .ctx
            .on_gesture(gesture(GestureKind::DoubleCopy, "hello"))
            .await;

        assert!(matches!(outcome, GestureOutcome::Transformed(_)));
        assert_eq!(f.clipboard.get(), "hello");
    }

    #[tokio::test]
    async fn test_unbound_gesture_shows_window() {
        let f = fixture();
        let mut events = f.ctx.subscribe();

        let outcome = f
            .ctx
            .on_gesture(gesture(GestureKind::TripleCopy, "text"))
            .await;

        assert_eq!(outcome, GestureOutcome::WindowShown);
        assert!(f.ctx.window_visible());
        assert_eq!(calls(&f), 0);

        let _gesture = events.recv().await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            IpcEvent::WindowVisibility { visible: true }
        );
    }

    #[tokio::test]
    async fn test_excluded_app_skips_transform() {
        let f = fixture_with(Some("KeePassXC"), |_| {});

        let outcome = f
            .ctx
            .on_gesture(gesture(GestureKind::DoubleCopy, "hunter2"))
            .await;

        assert_eq!(outcome, GestureOutcome::AppExcluded("keepass".to_string()));
        assert_eq!(calls(&f), 0);
        assert_eq!(f.clipboard.get(), "");
    }

    #[tokio::test]
    async fn test_unconfigured_reports_failure() {
        let f = fixture();
        f.ctx.transformer().set_provider(None);

        let outcome = f
            .ctx
            .on_gesture(gesture(GestureKind::DoubleCopy, "hello"))
            .await;

        match outcome {
            GestureOutcome::Failed(message) => assert!(message.starts_with("No API key configured")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        let sent = f.notifier.sent();
        assert_eq!(sent[0].0, NotifyLevel::Error);
    }

    #[tokio::test]
    async fn test_notifications_disabled() {
        let f = fixture_with(None, |s| s.ui.notifications = false);
        f.ctx
            .on_gesture(gesture(GestureKind::DoubleCopy, "hello"))
            .await;
        assert!(f.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_generate_command_does_not_touch_clipboard() {
        let f = fixture();
        f.clipboard.set("original");

        let response = f
            .ctx
            .handle(IpcCommand::Generate {
                text: "abc".to_string(),
                mode: Some(TransformMode::Polite),
                input_language: None,
                output_language: None,
            })
            .await;

        assert!(response.ok);
        let data = response.data.unwrap();
        assert_eq!(data["output_text"], "ABC");
        assert_eq!(data["mode"], "polite");
        assert_eq!(f.clipboard.get(), "original");
    }

    #[tokio::test]
    async fn test_generate_excluded_text_is_error_response() {
        let f = fixture();
        let response = f
            .ctx
            .handle(IpcCommand::Generate {
                text: "my password=123".to_string(),
                mode: None,
                input_language: None,
                output_language: None,
            })
            .await;

        assert!(!response.ok);
        assert!(response.error.unwrap().contains("exclusion pattern"));
        assert_eq!(calls(&f), 0);
    }

    #[tokio::test]
    async fn test_window_commands() {
        let f = fixture();
        let toggle = f.ctx.handle(IpcCommand::ToggleWindow).await;
        assert_eq!(toggle.data.unwrap()["visible"], true);
        let toggle = f.ctx.handle(IpcCommand::ToggleWindow).await;
        assert_eq!(toggle.data.unwrap()["visible"], false);

        f.ctx.handle(IpcCommand::ShowWindow).await;
        assert!(f.ctx.window_visible());
        f.ctx.handle(IpcCommand::CloseWindow).await;
        assert!(!f.ctx.window_visible());
    }

    #[tokio::test]
    async fn test_clipboard_commands() {
        let f = fixture();
        f.clipboard.set("from user");

        let read = f.ctx.handle(IpcCommand::ReadClipboard).await;
        assert_eq!(read.data.unwrap()["text"], "from user");

        let write = f
            .ctx
            .handle(IpcCommand::WriteClipboard {
                text: "from app".to_string(),
            })
            .await;
        assert!(write.ok);
        assert_eq!(f.clipboard.get(), "from app");
    }

    #[tokio::test]
    async fn test_save_settings_merges_and_rejects_unknown_group() {
        let f = fixture();

        let response = f
            .ctx
            .handle(IpcCommand::SaveSettings {
                settings: serde_json::json!({ "output": { "auto_clipboard": false } }),
            })
            .await;
        assert!(response.ok);
        assert!(!f.ctx.settings().output.auto_clipboard);
        assert_eq!(f.ctx.settings().gesture.copy_window_ms, 500);

        let response = f
            .ctx
            .handle(IpcCommand::SaveSettings {
                settings: serde_json::json!({ "history": {} }),
            })
            .await;
        assert!(!response.ok);
        assert!(response.error.unwrap().contains("history"));
    }

    #[tokio::test]
    async fn test_save_settings_updates_exclusions() {
        let f = fixture();
        f.ctx
            .handle(IpcCommand::SaveSettings {
                settings: serde_json::json!({
                    "privacy": { "exclude_patterns": ["secret"], "excluded_apps": [] }
                }),
            })
            .await;

        let response = f
            .ctx
            .handle(IpcCommand::Generate {
                text: "top secret".to_string(),
                mode: None,
                input_language: None,
                output_language: None,
            })
            .await;
        assert!(!response.ok);

        // the old default pattern no longer applies
        let response = f
            .ctx
            .handle(IpcCommand::Generate {
                text: "password=1".to_string(),
                mode: None,
                input_language: None,
                output_language: None,
            })
            .await;
        assert!(response.ok);
    }

    #[tokio::test]
    async fn test_credential_commands() {
        let f = fixture();

        let response = f.ctx.handle(IpcCommand::DeleteCredential).await;
        assert!(response.ok);
        assert!(!f.ctx.transformer().is_configured());

        let response = f
            .ctx
            .handle(IpcCommand::SetCredential {
                api_key: "   ".to_string(),
            })
            .await;
        assert!(!response.ok);
    }

    #[tokio::test]
    async fn test_estimate_and_status() {
        let f = fixture();
        let estimate = f
            .ctx
            .handle(IpcCommand::Estimate {
                text: "こんにちは".to_string(),
            })
            .await;
        assert_eq!(estimate.data.unwrap()["language"], "ja");

        let status = f.ctx.handle(IpcCommand::Status).await;
        let status: DaemonStatus = serde_json::from_value(status.data.unwrap()).unwrap();
        assert!(status.provider_configured);
        assert!(!status.monitor_running);
        assert_eq!(status.copy_window_ms, 500);
    }

    #[tokio::test]
    async fn test_stop_command_signals_shutdown() {
        let f = fixture();
        let mut shutdown = f.ctx.shutdown_receiver();
        f.ctx.handle(IpcCommand::Stop).await;
        shutdown.wait_for(|stop| *stop).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_copy_gesture_end_to_end() {
        let f = fixture();
        f.ctx.wire_listeners();
        f.ctx.start_monitor().await;

        f.clipboard.set("foo");
        sleep(Duration::from_millis(150)).await;
        f.clipboard.set("bar");
        sleep(Duration::from_millis(150)).await;

        // let the spawned transform finish
        for _ in 0..20 {
            if f.clipboard.get() == "BAR" {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(f.clipboard.get(), "BAR");
        assert_eq!(calls(&f), 1);

        // the result written back is not counted as a user copy
        sleep(Duration::from_millis(2000)).await;
        assert_eq!(calls(&f), 1);
        assert_eq!(f.ctx.monitor().snapshot().await.unwrap().copy_count, 0);

        f.ctx.stop_monitor().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_change_updates_window_and_disables() {
        let f = fixture();
        f.ctx.start_monitor().await;

        f.ctx
            .handle(IpcCommand::SaveSettings {
                settings: serde_json::json!({ "gesture": { "copy_window_ms": 800 } }),
            })
            .await;
        let snap = f.ctx.monitor().snapshot().await.unwrap();
        assert_eq!(snap.copy_window, Duration::from_millis(800));

        f.ctx
            .handle(IpcCommand::SaveSettings {
                settings: serde_json::json!({ "gesture": { "enabled": false } }),
            })
            .await;
        assert!(!f.ctx.monitor().is_running().await);
    }
}
