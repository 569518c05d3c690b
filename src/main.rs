use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use config::Config;
use skyfollow::bsky::{Session, XrpcClient};
use skyfollow::clock::{Clock, SystemClock};
use skyfollow::producer::{Discovery, EnqueueFilter, enqueue_from_store};
use skyfollow::scheduler::{DispatchStatus, Dispatcher};
use skyfollow::store::{AccountStore, SqliteAccountStore, import_json};

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("skyfollow")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("skyfollow.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        None | Some(Commands::Status) => handle_status_command(config),
        Some(Commands::Run {
            real,
            min_followers,
            retry_exhausted,
        }) => handle_run_command(*real, *min_followers, *retry_exhausted, config).await,
        Some(Commands::Discover) => handle_discover_command(config).await,
        Some(Commands::Import { file }) => handle_import_command(file, config),
        Some(Commands::List {
            pending,
            followed,
            limit,
        }) => handle_list_command(*pending, *followed, *limit, config),
    }
}

fn open_store(config: &Config) -> Result<Arc<SqliteAccountStore>> {
    let store = SqliteAccountStore::open(&config.storage.db_path)
        .context(format!("Failed to open store at {}", config.storage.db_path.display()))?;
    Ok(Arc::new(store))
}

async fn login(client: &XrpcClient, config: &Config) -> Result<Session> {
    if !config.bluesky.has_credentials() {
        return Err(eyre!("Missing credentials: set BSKY_IDENTIFIER and BSKY_PASSWORD"));
    }
    let session = client
        .login(&config.bluesky.identifier, &config.bluesky.password)
        .await
        .context("Login failed")?;
    Ok(session)
}

async fn handle_run_command(real: bool, min_followers: u64, retry_exhausted: bool, config: &Config) -> Result<()> {
    let durable = open_store(config)?;
    let client = Arc::new(XrpcClient::new(config.bluesky.xrpc())?);
    let session = login(&client, config).await?;

    let mut dispatch_config = config.dispatch.dispatcher();
    dispatch_config.simulate = dispatch_config.simulate && !real;
    let store = if dispatch_config.simulate {
        println!("{}", "Simulation mode: no follows will be made (use --real)".yellow());
        // Simulated follows commit to a throwaway copy, never to the durable store
        let copy = durable.copy_to_memory().context("Failed to copy store for simulation")?;
        Arc::new(copy)
    } else {
        println!("{}", "Real mode: follows will be created".red().bold());
        durable
    };

    let dispatcher = Dispatcher::new(dispatch_config, client, store.clone(), Arc::new(SystemClock));
    let filter = EnqueueFilter {
        min_followers,
        retry_exhausted,
    };
    let report = enqueue_from_store(&*store, &dispatcher, filter).context("Failed to enqueue accounts")?;
    println!(
        "{} {} queued ({} followed, {} below minimum, {} exhausted)",
        "Queue:".green(),
        report.queued,
        report.already_followed,
        report.below_min,
        report.exhausted
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping after the current follow");
            let _ = shutdown_tx.send(true);
        }
    });

    println!("{}", "Dispatching, press Ctrl-C to stop".cyan());
    let status = dispatcher.run(&session, shutdown_rx).await;
    print_summary(&status);
    Ok(())
}

fn print_summary(status: &DispatchStatus) {
    println!();
    println!("{}", "Summary".bold());
    println!("  {:<18} {}", "followed", status.counters.followed.to_string().green());
    println!("  {:<18} {}", "already following", status.counters.already_following);
    println!("  {:<18} {}", "skipped", status.counters.skipped);
    println!("  {:<18} {}", "failures", status.counters.failures.to_string().yellow());
    println!("  {:<18} {}", "dropped", status.counters.dropped.to_string().red());
    println!("  {:<18} {}", "still queued", status.queued);
    for (handle, reason) in &status.drop_reasons {
        println!("  {} {}: {}", "dropped".red(), handle, reason);
    }
}

async fn handle_discover_command(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let client = Arc::new(XrpcClient::new(config.bluesky.xrpc())?);
    let session = login(&client, config).await?;

    println!("{}", "Discovering candidate accounts...".cyan());
    let discovery = Discovery::new(client, store, Arc::new(SystemClock), config.bluesky.discovery());
    let report = discovery.run(&session).await.context("Discovery failed")?;
    println!(
        "{} saved {} of {} candidates ({} failed)",
        "Discovery:".green(),
        report.saved,
        report.candidates,
        report.failed
    );
    Ok(())
}

fn handle_import_command(file: &Path, config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let report = import_json(&*store, file, SystemClock.now())
        .context(format!("Failed to import {}", file.display()))?;
    println!(
        "{} {} read, {} new, {} updated, {} skipped",
        "Import:".green(),
        report.read,
        report.created,
        report.updated,
        report.skipped
    );
    Ok(())
}

fn handle_status_command(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let counts = store
        .counts(config.dispatch.max_retries)
        .context("Failed to count accounts")?;

    println!("{} {}", "Store:".green(), store.path().display());
    println!("  {:<10} {}", "total", counts.total);
    println!("  {:<10} {}", "followed", counts.followed.to_string().green());
    println!("  {:<10} {}", "pending", counts.pending.to_string().cyan());
    println!("  {:<10} {}", "exhausted", counts.exhausted.to_string().red());

    let dispatch = &config.dispatch;
    println!("{}", "Limits:".green());
    println!(
        "  {} follows per {}s, {}s cooldown",
        dispatch.max_follows_per_hour, dispatch.rate_window_secs, dispatch.follow_cooldown_secs
    );
    println!(
        "  {} attempts, {}s base retry delay, simulate={}",
        dispatch.max_retries, dispatch.retry_delay_secs, dispatch.simulate
    );
    Ok(())
}

fn handle_list_command(pending: bool, followed: bool, limit: usize, config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let accounts = store.load_all().context("Failed to load accounts")?;

    println!(
        "{:<32} {:>10} {:>4} {:>8} {:<10}",
        "HANDLE".bold(),
        "FOLLOWERS".bold(),
        "PRI".bold(),
        "ATTEMPTS".bold(),
        "STATE".bold()
    );
    let rows = accounts
        .iter()
        .filter(|a| (!pending || !a.followed) && (!followed || a.followed))
        .take(limit);
    for account in rows {
        let state = if account.followed {
            "followed".green()
        } else if account.is_exhausted(config.dispatch.max_retries) {
            "exhausted".red()
        } else {
            "pending".cyan()
        };
        println!(
            "{:<32} {:>10} {:>4} {:>8} {:<10}",
            account.handle,
            account.follower_count,
            account.effective_priority(),
            account.attempts,
            state
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
