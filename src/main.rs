use face_unlock::{
    camera,
    common::{Config, Paths},
    core::{OnnxFaceEncoder, Orchestrator, TriggerSource},
    service::UnlockClient,
    storage::Gallery,
    triggers::{button, http, ButtonTrigger, TimerTrigger},
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "faceunlock")]
#[command(about = "Face recognition unlock for a remote workstation")]
#[command(version)]
struct Cli {
    /// Enable development mode (config, gallery and logs under ./dev_data)
    #[arg(long, global = true)]
    dev: bool,

    /// Use system-wide paths (/etc/faceunlock, /var/lib/faceunlock)
    #[arg(long, global = true)]
    system: bool,

    /// Config file to load instead of the run-mode default
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run trigger sources until interrupted. With none selected, runs the
    /// monitor, the web endpoint, and the stdin button when stdin is a terminal
    Run {
        /// Attempt on a fixed interval with cooldown after success
        #[arg(long)]
        monitor: bool,
        /// Manual button on stdin (Enter = recognize, s = stats, c = check, q = quit)
        #[arg(long)]
        button: bool,
        /// HTTP trigger endpoint
        #[arg(long)]
        web: bool,
    },
    /// Run a single recognition attempt
    Once,
    /// Take one still with the configured camera, without loading models
    Capture {
        /// Where to write the image (default: still.jpg or still.png in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check that the unlock service responds
    Check,
    /// Show what the face gallery contains
    Inspect,
    /// Print the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on mode
    setup_logging(cli.dev, cli.json);

    let paths = Paths::new(cli.dev, cli.system)?;
    let config = load_config(cli.config.as_ref(), &paths)?;

    match cli.command {
        Commands::Run { monitor, button, web } => {
            let all = !(monitor || button || web);
            let stdin_button = all && std::io::stdin().is_terminal();
            if all && !stdin_button {
                tracing::info!("stdin is not a terminal; manual button disabled");
            }
            let orchestrator = build_orchestrator(&config)?;
            run(orchestrator, &config, monitor || all, button || stdin_button, web || all).await?;
        }
        Commands::Once => {
            let orchestrator = build_orchestrator(&config)?;
            match orchestrator.attempt(TriggerSource::Cli).await.record() {
                Some(record) => println!("{}", record.summary()),
                None => println!("Another attempt is already running"),
            }
        }
        Commands::Capture { output } => {
            let capture = camera::from_config(&config.camera);
            let (path, size) = camera::save_still(capture.as_ref(), output)
                .await
                .context("Capture failed")?;
            println!("✅ Saved {} ({} bytes)", path.display(), size);
        }
        Commands::Check => {
            let client = UnlockClient::from_config(&config.unlock)?;
            if client.probe().await {
                println!("✅ Unlock service at {} is reachable", client.endpoint());
            } else {
                println!("❌ Unlock service at {} is not responding", client.endpoint());
                if !config.unlock.enabled {
                    println!("   (unlock is disabled in the configuration)");
                }
            }
        }
        Commands::Inspect => {
            let gallery = Gallery::load(&config.storage.gallery_path)?;
            println!("Gallery: {}", config.storage.gallery_path.display());
            println!("  Entries:    {}", gallery.len());
            println!("  Identities: {}", gallery.identities().join(", "));
            println!("  Tolerance:  {:.3}", gallery.tolerance());
            if !gallery.users().is_empty() {
                println!("  Users:      {}", gallery.users().join(", "));
            }
            if let Some(trained_at) = gallery.trained_at() {
                println!("  Trained at: {}", trained_at);
            }
            let authorized = gallery.authorize(&config.recognition.authorized_users)?;
            println!("  Authorized: {}", authorized.identities().join(", "));
        }
        Commands::ShowConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn setup_logging(dev_mode: bool, json: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .init();
        return;
    }

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn load_config(explicit: Option<&PathBuf>, paths: &Paths) -> Result<Config> {
    let mut config = match explicit {
        Some(path) => Config::load_from_path(path)?,
        None => {
            let path = paths.config_file();
            if path.exists() {
                Config::load_from_path(&path)?
            } else {
                tracing::warn!("No config at {}, using defaults", path.display());
                let config = Config::default();
                config.validate()?;
                config
            }
        }
    };
    config.resolve_paths(&paths.data_dir());
    Ok(config)
}

fn build_orchestrator(config: &Config) -> Result<Arc<Orchestrator>> {
    let gallery = Gallery::load(&config.storage.gallery_path)
        .with_context(|| format!("Failed to load gallery from {}", config.storage.gallery_path.display()))?
        .authorize(&config.recognition.authorized_users)?;
    tracing::info!(
        "Loaded {} gallery entries for {}",
        gallery.len(),
        gallery.identities().join(", ")
    );

    let encoder = OnnxFaceEncoder::new(&config.encoder).context("Failed to load face models")?;
    let capture = camera::from_config(&config.camera);

    let orchestrator = Orchestrator::from_config(config, capture, Arc::new(encoder), Arc::new(gallery))?;
    Ok(Arc::new(orchestrator))
}

async fn run(
    orchestrator: Arc<Orchestrator>,
    config: &Config,
    monitor: bool,
    button: bool,
    web: bool,
) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: JoinSet<face_unlock::Result<()>> = JoinSet::new();

    if monitor {
        let timer = TimerTrigger::from_config(Arc::clone(&orchestrator), &config.recognition);
        let shutdown = shutdown_rx.clone();
        tasks.spawn(async move {
            timer.run(shutdown).await;
            Ok(())
        });
    }

    if web {
        let state = http::AppState::new(Arc::clone(&orchestrator), &config.web);
        tasks.spawn(http::serve(config.web.listen_addr, state, shutdown_rx.clone()));
    }

    if button {
        let (events_tx, events_rx) = mpsc::channel(8);
        button::spawn_stdin_reader(events_tx)?;
        let trigger = Arc::new(ButtonTrigger::new(Arc::clone(&orchestrator), config.button.debounce()));
        let shutdown = shutdown_rx.clone();
        tasks.spawn(async move {
            trigger.run(events_rx, shutdown).await;
            Ok(())
        });
    }

    // Any source ending on its own (button quit, server failure) stops the rest
    tokio::select! {
        _ = shutdown_signal() => {}
        Some(finished) = tasks.join_next() => report_task(finished),
    }

    let _ = shutdown_tx.send(true);
    while let Some(finished) = tasks.join_next().await {
        report_task(finished);
    }

    let in_flight = orchestrator.attempts_in_flight();
    if in_flight > 0 {
        tracing::info!("Waiting for {} attempt(s) to finish", in_flight);
    }
    orchestrator.wait_for_attempts().await;

    println!("\n{}", orchestrator.stats().report());
    Ok(())
}

fn report_task(finished: std::result::Result<face_unlock::Result<()>, tokio::task::JoinError>) {
    match finished {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Trigger source failed: {}", e),
        Err(e) => tracing::error!("Trigger task panicked: {}", e),
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, shutting down");
        }
    }
}
