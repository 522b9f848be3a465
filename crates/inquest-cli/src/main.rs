//! Inquest CLI
//!
//! Command-line front end for the uploader:
//! - Watching the arcdps log folder and uploading/analyzing new logs
//! - Consuming pending analysis output on demand
//! - Inspecting stored state, identities and encounter metadata

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use colored::Colorize;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use inquest_core::{encounter_name, IdentityResolver, LogIdentity, LogState, Session};
use inquest_pipeline::{
    AnalysisError, CommandParser, LogAnalyzer, LogListener, LogLoader, LogParser, LogUploader,
};
use inquest_storage::Persistence;
use inquest_watch::{DirectoryWatcher, SaturationPolicy, WatchConfig, WorkerPool};

mod config;

use config::{AppConfig, DEFAULT_CONFIG_FILE};

#[derive(Parser)]
#[command(name = "inquest")]
#[command(author, version, about = "Inquest: combat log uploader and analyzer")]
struct Cli {
    /// Config file (defaults to ./inquest.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Debug logging for every crate
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the log folder and the analysis output folder until Ctrl-C.
    Watch {
        /// Also dispatch logs that already exist when watching starts
        #[arg(long)]
        existing: bool,
        /// Reject new files instead of waiting when the handler queue is full
        #[arg(long)]
        reject_when_busy: bool,
    },
    /// Consume every pending analysis output document once.
    Analyze,
    /// Show the stored state of one log, or of all logs.
    Status {
        path: Option<PathBuf>,
    },
    /// Print the identity a log file is stored under.
    Identity {
        path: PathBuf,
    },
    /// List known encounter folders and names.
    Meta,
}

// ============================================================================
// Entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = AppConfig::load(&config_path)?;
    if config.first_start {
        config.store(&config_path)?;
        tracing::info!(path = %config_path.display(), "wrote default config");
    }

    match cli.command {
        Commands::Watch {
            existing,
            reject_when_busy,
        } => cmd_watch(config, config_path, existing, reject_when_busy).await,
        Commands::Analyze => cmd_analyze(&config).await,
        Commands::Status { path } => cmd_status(&config, path.as_deref()),
        Commands::Identity { path } => cmd_identity(&config, &path),
        Commands::Meta => cmd_meta(&config),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info,inquest=debug" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn open_persistence(config: &AppConfig) -> Result<Arc<Persistence>> {
    let storage = config.storage();
    let persistence = Persistence::open(
        &storage,
        IdentityResolver::new(&config.arcdps_path),
        Arc::new(Session::new()),
    )
    .with_context(|| format!("failed to open storage under {}", storage.root.display()))?;
    Ok(Arc::new(persistence))
}

// ============================================================================
// Collaborators
// ============================================================================

#[cfg(feature = "dps-report")]
fn uploader() -> Arc<dyn LogUploader> {
    Arc::new(inquest_pipeline::DpsReportUploader::default())
}

#[cfg(not(feature = "dps-report"))]
fn uploader() -> Arc<dyn LogUploader> {
    struct Unavailable;

    #[async_trait]
    impl LogUploader for Unavailable {
        async fn upload(
            &self,
            _path: &Path,
            _options: &inquest_pipeline::UploadOptions,
        ) -> Result<inquest_core::DpsLog, inquest_pipeline::UploadError> {
            Err(inquest_pipeline::UploadError::Transport(
                "built without dps-report support".into(),
            ))
        }
    }

    Arc::new(Unavailable)
}

/// Stand-in used when no analyzer executable is configured.
struct NoAnalyzer;

#[async_trait]
impl LogParser for NoAnalyzer {
    async fn parse(&self, path: &Path) -> Result<(), AnalysisError> {
        Err(AnalysisError::Spawn {
            program: PathBuf::new(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no analyzer configured for {}", path.display()),
            ),
        })
    }
}

fn parser(config: &AppConfig) -> Result<Arc<dyn LogParser>> {
    let Some(executable) = &config.analyzer_executable else {
        return Ok(Arc::new(NoAnalyzer));
    };
    let storage = config.storage();
    let parser = CommandParser::new(
        executable,
        storage.analyzer_settings_dir(),
        storage.analyzer_output_dir(),
        IdentityResolver::new(&config.arcdps_path),
    )?
    .anonymous(config.anonymous);
    let updated = parser.sync_settings()?;
    if updated > 0 {
        tracing::info!(updated, "refreshed analyzer settings");
    }
    Ok(Arc::new(parser))
}

/// Persists tokens issued by the upload service and reports progress.
struct ConsoleListener {
    config: Mutex<AppConfig>,
    config_path: PathBuf,
}

impl LogListener for ConsoleListener {
    fn on_new_meta(&self) {
        tracing::debug!("encounter metadata updated");
    }

    fn on_new_log(&self, identity: &LogIdentity) {
        println!("{} {}", "log".green().bold(), identity);
    }

    fn on_user_token(&self, token: &str) {
        let mut config = self.config.lock();
        config.user_token = token.to_string();
        if let Err(err) = config.store(&self.config_path) {
            tracing::warn!(error = %err, "could not persist user token");
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_watch(
    config: AppConfig,
    config_path: PathBuf,
    existing: bool,
    reject_when_busy: bool,
) -> Result<()> {
    let persistence = open_persistence(&config)?;
    persistence.session().clear();
    if config.analyze_automatically && config.analyzer_executable.is_none() {
        tracing::warn!("analyze_automatically is set but no analyzer_executable is configured");
    }

    let policy = if reject_when_busy {
        SaturationPolicy::Reject
    } else {
        SaturationPolicy::Wait
    };
    let pool = Arc::new(WorkerPool::new(
        &tokio::runtime::Handle::current(),
        config.worker_threads,
        config.queue_capacity,
        policy,
    ));

    let output_dir = config.storage().analyzer_output_dir();
    std::fs::create_dir_all(&output_dir)?;

    let listener = Arc::new(ConsoleListener {
        config: Mutex::new(config.clone()),
        config_path,
    });
    let loader = LogLoader::new(
        Arc::clone(&persistence),
        uploader(),
        parser(&config)?,
        config.loader_settings(),
    )
    .with_user_token(config.user_token())
    .with_listener(listener.clone());
    let analyzer = LogAnalyzer::new(Arc::clone(&persistence), &output_dir)
        .with_settle_delay(config.settle_delay())
        .with_listener(listener);

    let logs = DirectoryWatcher::start(
        &config.arcdps_path,
        WatchConfig {
            emit_existing: existing,
        },
        Arc::clone(&pool),
        Arc::new(loader),
    )
    .with_context(|| format!("failed to watch {}", config.arcdps_path.display()))?;
    let outputs = DirectoryWatcher::start(
        &output_dir,
        WatchConfig::default(),
        Arc::clone(&pool),
        Arc::new(analyzer),
    )
    .with_context(|| format!("failed to watch {}", output_dir.display()))?;

    println!(
        "{} {} (Ctrl-C to stop)",
        "watching".green().bold(),
        config.arcdps_path.display().to_string().bold()
    );
    tokio::signal::ctrl_c().await?;

    tokio::task::spawn_blocking(move || -> Result<()> {
        logs.shutdown()?;
        outputs.shutdown()?;
        Ok(())
    })
    .await??;
    pool.shutdown().await;
    persistence.flush()?;
    println!("{}", "stopped".yellow().bold());
    Ok(())
}

async fn cmd_analyze(config: &AppConfig) -> Result<()> {
    let persistence = open_persistence(config)?;
    let analyzer = LogAnalyzer::new(
        Arc::clone(&persistence),
        config.storage().analyzer_output_dir(),
    )
    .with_settle_delay(config.settle_delay());
    let analyzed = analyzer.trigger_analysis().await;
    persistence.flush()?;
    println!("{} {} document(s)", "analyzed".green().bold(), analyzed);
    Ok(())
}

fn cmd_status(config: &AppConfig, path: Option<&Path>) -> Result<()> {
    let persistence = open_persistence(config)?;
    if let Some(path) = path {
        let identity = persistence.identity(path)?;
        let state = persistence.log_state(path)?;
        println!("{} {}", identity.to_string().bold(), colored_state(state));
        return Ok(());
    }

    let logs = persistence.stored_logs()?;
    if logs.is_empty() {
        println!("{}", "no logs stored yet".yellow());
        return Ok(());
    }
    let folders = persistence.folder_to_boss()?;
    let names = persistence.boss_to_name()?;
    for (identity, state) in logs.iter() {
        let encounter = encounter_name(
            identity.encounter(),
            &folders,
            &names,
            config.show_folder_names,
        );
        println!(
            "{:<28} {:<24} {}",
            encounter,
            identity.attempt(),
            colored_state(state)
        );
    }
    Ok(())
}

fn cmd_identity(config: &AppConfig, path: &Path) -> Result<()> {
    let identity = IdentityResolver::new(&config.arcdps_path).resolve(path)?;
    println!("{}", identity);
    Ok(())
}

fn cmd_meta(config: &AppConfig) -> Result<()> {
    let persistence = open_persistence(config)?;
    let folders = persistence.folder_to_boss()?;
    let names = persistence.boss_to_name()?;
    for (folder, trigger) in folders.iter() {
        println!(
            "{:<28} {:>8} {}",
            folder.bold(),
            trigger,
            names.get(trigger).unwrap_or("-")
        );
    }
    Ok(())
}

fn colored_state(state: LogState) -> colored::ColoredString {
    let label = state.to_string();
    match state {
        LogState::Idle => label.dimmed(),
        LogState::Uploaded | LogState::Analyzed => label.yellow(),
        LogState::UploadedAndAnalyzed => label.green(),
    }
}
