use ccai::config::{self, LoggingSettings, Settings, SettingsStore};
use ccai::secrets::{self, CredentialStore};
use ccai::transform::{
    Language, OpenAiConfig, OpenAiProvider, TransformMode, TransformRequest, Transformer,
};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser)]
#[command(name = "ccai")]
#[command(author, version, about = "Copy twice, get it translated", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon
    Start {
        /// Run in foreground instead of detaching
        #[arg(short, long)]
        foreground: bool,
    },

    /// Stop the running daemon
    Stop,

    /// Check daemon status
    Status,

    /// Configure settings
    Config {
        /// Copy window in milliseconds
        #[arg(long)]
        window: Option<u64>,

        /// Provider model (e.g., gpt-4o-mini)
        #[arg(long)]
        model: Option<String>,

        /// Provider base URL
        #[arg(long)]
        endpoint: Option<String>,

        /// Mode run on a double copy (translate, polite, ..., or none)
        #[arg(long)]
        mode: Option<String>,

        /// Write transform results back to the clipboard
        #[arg(long)]
        auto_clipboard: Option<bool>,

        /// Show current configuration
        #[arg(long)]
        show: bool,
    },

    /// Manage the provider API key
    Secret {
        #[command(subcommand)]
        action: SecretAction,
    },

    /// One-shot transform of TEXT
    Transform {
        text: String,

        /// Transform mode
        #[arg(short, long, default_value = "translate")]
        mode: TransformMode,

        /// Input language (auto, ja, en)
        #[arg(long)]
        from: Option<Language>,

        /// Output language (auto, ja, en)
        #[arg(long)]
        to: Option<Language>,
    },

    /// Detect the language of TEXT
    Estimate { text: String },

    /// Send a raw JSON command to the running daemon
    Ctl {
        /// e.g. '{"cmd":"toggle_window"}'
        json: String,
    },
}

#[derive(Subcommand)]
enum SecretAction {
    /// Store the API key in the system keyring
    Set,

    /// Remove the stored API key
    Delete,

    /// Check keyring availability
    Check,
}

/// Logging settings from the config file, without creating it.
fn logging_settings() -> LoggingSettings {
    Settings::config_path()
        .ok()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|contents| toml::from_str::<Settings>(&contents).ok())
        .map(|settings| settings.logging)
        .unwrap_or_default()
}

fn init_logging(verbose: bool, json: bool) -> Option<WorkerGuard> {
    let logging = logging_settings();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("ccai=debug")
        } else {
            EnvFilter::new(format!("ccai={}", logging.level.to_lowercase()))
        }
    });

    let stderr_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };

    let mut guard = None;
    let file_layer = if logging.file {
        Settings::data_dir().ok().map(|dir| {
            let appender = tracing_appender::rolling::daily(dir.join("logs"), "ccai.log");
            let (writer, worker_guard) = tracing_appender::non_blocking(appender);
            guard = Some(worker_guard);
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
        })
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

async fn transform_once(
    text: String,
    mode: TransformMode,
    from: Option<Language>,
    to: Option<Language>,
) -> anyhow::Result<()> {
    let settings = SettingsStore::open_default()?.get();
    let transformer = Transformer::new(settings.privacy.exclude_patterns.iter())
        .with_timeout(Duration::from_secs(settings.provider.timeout_secs));

    if let Some(api_key) = CredentialStore::system().resolve_api_key() {
        let provider = OpenAiProvider::new(OpenAiConfig::from_settings(&settings.provider, api_key))?;
        transformer.set_provider(Some(Arc::new(provider)));
    }

    let request = TransformRequest::new(text, mode).with_languages(
        from.unwrap_or(settings.language.default_input),
        to.unwrap_or(settings.language.default_output),
    );
    let result = transformer.handle(request).await?;
    info!(
        "Transformed with {} ({} -> {})",
        result.mode, result.resolved_input_language, result.resolved_output_language
    );
    println!("{}", result.output_text);
    Ok(())
}

fn estimate(text: &str) {
    let estimate = Transformer::new(std::iter::empty::<&str>()).estimate(text);
    println!(
        "Language: {} ({})",
        estimate.language.code(),
        estimate.language.display_name()
    );
    println!("Suggested mode: {}", estimate.suggested_mode);
}

/// Daemon lifecycle and IPC commands.
#[cfg(unix)]
mod daemon_cli {
    use ccai::daemon;
    use ccai::ipc::{IpcClient, IpcCommand};
    use tracing::info;

    pub async fn start(foreground: bool) -> anyhow::Result<()> {
        info!("Starting ccai daemon...");
        daemon::run(foreground).await?;
        Ok(())
    }

    pub fn stop() -> anyhow::Result<()> {
        info!("Stopping ccai daemon...");
        daemon::stop()?;
        Ok(())
    }

    pub fn status() -> anyhow::Result<()> {
        daemon::status()?;
        Ok(())
    }

    pub fn ctl(json: &str) -> anyhow::Result<()> {
        let cmd: IpcCommand = serde_json::from_str(json)?;
        let mut client = IpcClient::connect()?;

        if cmd == IpcCommand::Subscribe {
            for event in client.subscribe()? {
                println!("{}", serde_json::to_string(&event?)?);
            }
            return Ok(());
        }

        print!("{}", client.send_raw(json)?);
        Ok(())
    }
}

#[cfg(not(unix))]
mod daemon_cli {
    const UNSUPPORTED: &str = "The ccai daemon requires a Unix platform";

    pub async fn start(_foreground: bool) -> anyhow::Result<()> {
        anyhow::bail!(UNSUPPORTED)
    }

    pub fn stop() -> anyhow::Result<()> {
        anyhow::bail!(UNSUPPORTED)
    }

    pub fn status() -> anyhow::Result<()> {
        anyhow::bail!(UNSUPPORTED)
    }

    pub fn ctl(_json: &str) -> anyhow::Result<()> {
        anyhow::bail!(UNSUPPORTED)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ccai::panic_handler::install();

    let cli = Cli::parse();
    let _log_guard = init_logging(cli.verbose, cli.json_logs);

    match cli.command {
        Commands::Start { foreground } => daemon_cli::start(foreground).await?,

        Commands::Stop => daemon_cli::stop()?,

        Commands::Status => daemon_cli::status()?,

        Commands::Ctl { json } => daemon_cli::ctl(&json)?,

        Commands::Config {
            window,
            model,
            endpoint,
            mode,
            auto_clipboard,
            show,
        } => {
            if show {
                config::show()?;
            } else {
                config::update(window, model, endpoint, mode, auto_clipboard)?;
            }
        }

        Commands::Secret { action } => match action {
            SecretAction::Set => secrets::cli::handle_set()?,
            SecretAction::Delete => secrets::cli::handle_delete()?,
            SecretAction::Check => secrets::cli::handle_check(),
        },

        Commands::Transform {
            text,
            mode,
            from,
            to,
        } => transform_once(text, mode, from, to).await?,

        Commands::Estimate { text } => estimate(&text),
    }

    Ok(())
}
