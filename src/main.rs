//! Shango Provision 命令行入口
//!
//! Usage:
//! - `shango-provision provision --config shango.yml`
//! - `shango-provision provision --config shango.yml -e staging --parallel 4`
//! - `shango-provision provision --config shango.yml --json > progress.log`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use shango_provision::config::env::constants::VERSION;
use shango_provision::infra::{SshTransportFactory, TransportFactory};
use shango_provision::services::{
    ConsoleReporter, HookManager, HookRegistry, JsonReporter, ProgressReporter, Provisioner, Schedule,
};
use shango_provision::{ConnectionDefaults, ProvisionConfig};

#[derive(Parser)]
#[command(name = "shango-provision")]
#[command(about = "Provision remote hosts for application deployment", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and provision every host in the configuration
    Provision(ProvisionArgs),
}

#[derive(clap::Args)]
struct ProvisionArgs {
    /// Configuration file (YAML or JSON)
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Only provision this environment
    #[arg(short, long, value_name = "NAME")]
    environment: Option<String>,

    /// SSH username
    #[arg(short, long, env = "PROVISION_SSH_USER")]
    user: Option<String>,

    /// SSH port
    #[arg(short, long, env = "PROVISION_SSH_PORT")]
    port: Option<u16>,

    /// Private key file, tried before ~/.ssh/id_rsa and ~/.ssh/id_ed25519
    #[arg(short, long, value_name = "FILE", env = "PROVISION_SSH_KEY")]
    identity: Option<PathBuf>,

    /// Provision up to N hosts of an environment concurrently
    #[arg(long, value_name = "N")]
    parallel: Option<usize>,

    /// Emit progress as JSON lines instead of spinners
    #[arg(long)]
    json: bool,

    /// Hook scripts directory (default .kamal/hooks)
    #[arg(long, value_name = "DIR")]
    hooks_dir: Option<PathBuf>,

    /// Per-command timeout in seconds
    #[arg(long, value_name = "SECS")]
    command_timeout: Option<u64>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_provision(args: ProvisionArgs) -> Result<()> {
    let mut config = ProvisionConfig::from_path(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    if let Some(ref name) = args.environment {
        config = config.for_environment(name)?;
    }

    let mut defaults = ConnectionDefaults::from_env();
    if let Some(user) = args.user {
        defaults.username = user;
    }
    if let Some(port) = args.port {
        defaults.port = port;
    }
    if let Some(identity) = args.identity {
        defaults.identity_file = Some(identity);
    }
    if let Some(secs) = args.command_timeout {
        defaults.command_timeout = Duration::from_secs(secs);
    }

    let registry = HookRegistry::load(&config.hooks, args.hooks_dir.as_deref())?;
    let factory: Arc<dyn TransportFactory> =
        Arc::new(SshTransportFactory::new(defaults.connect_timeout));
    let hooks = HookManager::new(registry, factory.clone());

    let reporter: Arc<dyn ProgressReporter> = if args.json {
        Arc::new(JsonReporter::stdout())
    } else if config.targeted_hosts(&defaults).len() == 1 {
        Arc::new(ConsoleReporter::new().hide_host())
    } else {
        Arc::new(ConsoleReporter::new())
    };
    let schedule = match args.parallel {
        Some(n) if n > 1 => Schedule::Parallel { max_hosts: n },
        _ => Schedule::Sequential,
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current step");
            on_signal.cancel();
        }
    });

    Provisioner::new(config, defaults, factory, hooks)
        .with_reporter(reporter)
        .with_schedule(schedule)
        .with_cancellation(cancel)
        .provision()
        .await?;

    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    tracing::debug!(version = VERSION, "shango-provision starting");

    let result = match cli.command {
        Commands::Provision(args) => run_provision(args).await,
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", console::style("Provisioning failed:").red().bold(), e);
        std::process::exit(1);
    }
}
