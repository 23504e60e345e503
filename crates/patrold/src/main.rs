//! patrold — the Patrol daemon.
//!
//! Assembles the check engine from its parts:
//! - Result store (redb)
//! - Docker sandbox runtime
//! - In-process delayed-job queue
//! - Log and webhook notifiers
//!
//! # Usage
//!
//! ```text
//! patrold run --config /etc/patrol/patrol.toml --data-dir /var/lib/patrol
//! patrold validate --config patrol.toml
//! patrold history --data-dir /var/lib/patrol --service api --check ping
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use patrol_check::{CheckEngine, FanoutNotifier, LocalQueue, SystemClock};
use patrol_core::PatrolConfig;
use patrol_sandbox::{DockerRuntime, SandboxController};
use patrol_state::{ResultStore, StateStore};

const DB_FILE: &str = "patrol.redb";

/// How long to wait for running checks after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "patrold", about = "Patrol check daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every configured check until interrupted.
    Run {
        /// Path to patrol.toml.
        #[arg(long)]
        config: PathBuf,

        /// Data directory for stored results.
        #[arg(long, default_value = "/var/lib/patrol")]
        data_dir: PathBuf,
    },
    /// Parse and validate a config file, then list its checks.
    Validate {
        #[arg(long)]
        config: PathBuf,
    },
    /// Print stored results for one check, newest first, as JSON lines.
    History {
        #[arg(long, default_value = "/var/lib/patrol")]
        data_dir: PathBuf,

        #[arg(long)]
        service: String,

        #[arg(long)]
        check: String,

        /// Maximum number of results to print.
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run { config, data_dir } => run(&config, &data_dir).await,
        Command::Validate { config } => validate(&config),
        Command::History {
            data_dir,
            service,
            check,
            limit,
        } => history(&data_dir, &service, &check, limit),
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,patrold=debug,patrol=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: &Path) -> anyhow::Result<PatrolConfig> {
    let config = PatrolConfig::from_file(path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(config)
}

async fn run(config_path: &Path, data_dir: &Path) -> anyhow::Result<()> {
    info!("patrol daemon starting");

    let config = load_config(config_path)?;

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;
    let db_path = data_dir.join(DB_FILE);

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path).context("failed to open result store")?;
    info!(path = ?db_path, "result store opened");

    let runtime = DockerRuntime::connect_local().context("failed to connect to docker")?;
    info!("docker runtime connected");

    let clock = Arc::new(SystemClock);
    let queue = Arc::new(LocalQueue::new(clock.clone()));

    let engine = CheckEngine::new(
        Arc::new(store),
        SandboxController::new(Arc::new(runtime)),
        queue.clone(),
        Arc::new(FanoutNotifier::default()),
        clock,
    );

    let count = engine.start_with_config(&config)?;
    info!(checks = count, "checks scheduled");

    // ── Shutdown ───────────────────────────────────────────────

    tokio::signal::ctrl_c()
        .await
        .context("failed to install Ctrl-C handler")?;
    info!("shutdown signal received");
    queue.shutdown();

    let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
    while queue.in_flight() > 0 {
        if tokio::time::Instant::now() >= deadline {
            warn!(running = queue.in_flight(), "checks still running at shutdown");
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    info!("patrol daemon stopped");
    Ok(())
}

fn validate(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let definitions = config.check_definitions()?;
    for def in &definitions {
        println!(
            "{}\t{}\t{}\tevery {:?}",
            def.label(),
            def.kind,
            def.sandbox_identity(),
            def.interval
        );
    }
    println!("{} checks OK", definitions.len());
    Ok(())
}

fn history(
    data_dir: &Path,
    service: &str,
    check: &str,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    let db_path = data_dir.join(DB_FILE);
    let store = StateStore::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    let results = store.list_results(service, check)?;
    for result in results.iter().take(limit.unwrap_or(usize::MAX)) {
        println!("{}", serde_json::to_string(result)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_requires_config() {
        assert!(Cli::try_parse_from(["patrold", "run"]).is_err());
        let cli = Cli::try_parse_from(["patrold", "run", "--config", "patrol.toml"]).unwrap();
        match cli.command {
            Command::Run { config, data_dir } => {
                assert_eq!(config, PathBuf::from("patrol.toml"));
                assert_eq!(data_dir, PathBuf::from("/var/lib/patrol"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn log_json_is_global() {
        let cli = Cli::try_parse_from([
            "patrold", "history", "--service", "api", "--check", "ping", "--limit", "5",
            "--log-json",
        ])
        .unwrap();
        assert!(cli.log_json);
        assert!(matches!(cli.command, Command::History { limit: Some(5), .. }));
    }

    #[test]
    fn load_config_rejects_invalid_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patrol.toml");
        std::fs::write(
            &path,
            r#"
[[services]]
name = "api"

[[services.checks]]
name = "ping"
kind = "status"
image = "alpine"
command = "true"
interval = "soon"
"#,
        )
        .unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("invalid interval"), "{err:#}");
    }

    #[test]
    fn history_on_empty_store_prints_nothing() {
        let dir = tempfile::tempdir().unwrap();
        history(dir.path(), "api", "ping", None).unwrap();
        assert!(dir.path().join(DB_FILE).exists());
    }
}
