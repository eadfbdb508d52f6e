//! ufwsync - keeps ufw in line with a remote port list and blocklist
//!
//! # Usage
//!
//! ```bash
//! ufwsync config set --ports-url https://cfg.example/ports.txt \
//!                    --blocklist-url https://cfg.example/blocklist.txt
//! ufwsync sync                       # Apply if either document changed
//! ufwsync sync --force               # Rebuild the rule table regardless
//! ufwsync whitelist add 203.0.113.9  # Always allow inbound from an address
//! ufwsync rules                      # ufw status numbered
//! ufwsync delete 3                   # Remove rule number 3
//! ufwsync schedule install           # Run sync from cron every 3 hours
//! ```
//!
//! Rule changes need root. Cron runs as root; interactive runs elevate ufw
//! calls through run0, sudo or pkexec.

use clap::{Parser, Subcommand};
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::Level;
use ufwsync::audit::{self, EventType};
use ufwsync::config::{self, FailurePolicy, SyncConfig};
use ufwsync::core::error::UfwErrorPattern;
use ufwsync::core::fetch::HttpFetcher;
use ufwsync::core::fingerprint::FingerprintStore;
use ufwsync::core::schedule::{Crontab, cron_line};
use ufwsync::core::ufw::{Firewall, Ufw};
use ufwsync::core::whitelist::WhitelistStore;
use ufwsync::utils::truncate_string;
use ufwsync::validators::{check_reserved_ip, validate_ipv4_or_cidr};
use ufwsync::{Error, Finding, ReconcileResult, RuleReconciler};

#[derive(Parser)]
#[command(name = "ufwsync")]
#[command(version, about = "Sync ufw rules from remote port and blocklist documents", long_about = None)]
struct Cli {
    /// Config file (default: <data dir>/config.json)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch both documents and rebuild ufw rules if either changed
    Sync {
        /// Rebuild even if nothing changed
        #[arg(short, long)]
        force: bool,
        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// List active ufw rules with their numbers
    Rules,
    /// Delete a ufw rule by number
    Delete {
        /// Rule number as shown by `ufwsync rules`
        number: u32,
    },
    /// Remove every ufw rule and re-enable the firewall
    Reset,
    /// Manage always-allowed addresses
    Whitelist {
        #[command(subcommand)]
        action: WhitelistAction,
    },
    /// Manage the cron entry for periodic sync
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
    /// Show configuration, last applied fingerprints and recent activity
    Status,
    /// Show or change configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum WhitelistAction {
    /// Add an IPv4 address or CIDR block
    Add { address: String },
    /// Remove every matching entry
    Remove { address: String },
    /// Print the whitelist
    List,
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Install (or replace) the cron entry
    Install {
        /// Hours between runs (1-24)
        #[arg(long, value_name = "HOURS")]
        interval_hours: Option<u8>,
    },
    /// Remove the cron entry
    Remove,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as JSON
    Show,
    /// Update configuration values
    Set {
        #[arg(long, value_name = "URL")]
        ports_url: Option<String>,
        #[arg(long, value_name = "URL")]
        blocklist_url: Option<String>,
        #[arg(long, value_name = "PATH")]
        whitelist_path: Option<PathBuf>,
        #[arg(long, value_name = "SECS")]
        fetch_timeout_secs: Option<u64>,
        /// best_effort or abort_on_first_error
        #[arg(long)]
        failure_policy: Option<FailurePolicy>,
        #[arg(long)]
        persist_on_partial: Option<bool>,
        #[arg(long)]
        validate_whitelist: Option<bool>,
        #[arg(long, value_name = "PATH")]
        ufw_command: Option<String>,
    },
}

fn main() -> ExitCode {
    let _ = ufwsync::utils::ensure_dirs();
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    match runtime.block_on(handle_cli(cli.command, &config_path)) {
        Ok(code) => code,
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}

/// Logs to stderr when interactive, otherwise appends to the state-dir log
/// so cron runs leave a record.
fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let interactive = nix::unistd::isatty(std::io::stdin().as_fd()).unwrap_or(false)
        || nix::unistd::isatty(std::io::stdout().as_fd()).unwrap_or(false);

    if !interactive
        && let Some(mut log_path) = ufwsync::utils::get_state_dir()
    {
        log_path.push("ufwsync.log");
        if let Ok(file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
        {
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(file)
                .init();
            return;
        }
    }

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn report_error(e: &Error) {
    eprintln!("Error: {e}");
    let hint_source = match e {
        Error::Firewall {
            message, stderr, ..
        } => Some(stderr.as_deref().unwrap_or(message.as_str())),
        Error::Fetch { message, .. } => Some(message.as_str()),
        _ => None,
    };
    if let Some(text) = hint_source {
        let translation = UfwErrorPattern::match_error(text);
        eprintln!("{}", translation.user_message);
        for suggestion in translation.suggestions {
            eprintln!("  - {suggestion}");
        }
    }
}

async fn handle_cli(command: Commands, config_path: &Path) -> ufwsync::Result<ExitCode> {
    let cfg = config::load_config(config_path).await?;

    match command {
        Commands::Sync { force, json } => return run_sync(&cfg, force, json).await,
        Commands::Rules => {
            let listing = Ufw::from_config(&cfg).status().await?;
            print!("{listing}");
        }
        Commands::Delete { number } => {
            let result = Ufw::from_config(&cfg).delete_rule(number).await;
            audit::record(audit::operation_event(
                EventType::DeleteRule,
                serde_json::json!({ "number": number }),
                &result,
            ))
            .await;
            result?;
            println!("✓ Deleted rule {number}");
        }
        Commands::Reset => {
            let ufw = Ufw::from_config(&cfg);
            let result = async {
                ufw.reset().await?;
                ufw.enable().await
            }
            .await;
            audit::record(audit::operation_event(
                EventType::ResetRules,
                serde_json::json!({}),
                &result,
            ))
            .await;
            result?;
            println!("✓ All rules removed, firewall enabled");
            println!("Run `ufwsync sync --force` to restore the managed rules.");
        }
        Commands::Whitelist { action } => {
            handle_whitelist(action, &cfg).await?;
        }
        Commands::Schedule { action } => {
            handle_schedule(action, &cfg, config_path).await?;
        }
        Commands::Status => show_status(&cfg, config_path).await?,
        Commands::Config { action } => handle_config(action, cfg, config_path).await?,
    }

    Ok(ExitCode::SUCCESS)
}

async fn run_sync(cfg: &SyncConfig, force: bool, json: bool) -> ufwsync::Result<ExitCode> {
    cfg.require_sources()?;

    let fetcher = HttpFetcher::new(cfg.fetch_timeout())?;
    let reconciler = RuleReconciler::from_config(cfg, fetcher, Ufw::from_config(cfg));
    let result = reconciler.reconcile(force).await;

    audit::record(audit::sync_event(&result, force)).await;
    let outcome = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }

    match outcome {
        ReconcileResult::Applied(summary) if summary.is_partial() => Ok(ExitCode::from(2)),
        _ => Ok(ExitCode::SUCCESS),
    }
}

fn print_outcome(outcome: &ReconcileResult) {
    match outcome {
        ReconcileResult::NoChange { .. } => {
            println!("No changes detected; firewall left as is.");
        }
        ReconcileResult::Applied(summary) => {
            println!(
                "✓ Applied {} rules ({} ports, {} blocked ranges, {} whitelisted)",
                summary.rules_applied(),
                summary.ports_applied,
                summary.blocks_applied,
                summary.whitelist_applied
            );
            for finding in &summary.findings {
                match finding {
                    Finding::InvalidAddressFormat {
                        document,
                        line_number,
                        line,
                    } => println!(
                        "  ! {document} line {line_number}: skipped '{}' (not IPv4/CIDR)",
                        truncate_string(line, 48)
                    ),
                    Finding::BlankLine {
                        document,
                        line_number,
                    } => println!("  ! {document} line {line_number}: skipped blank line"),
                    Finding::FirewallCommand {
                        step,
                        argument,
                        message,
                    } => println!(
                        "  ✗ {step} '{}': {}",
                        truncate_string(argument, 48),
                        truncate_string(message, 80)
                    ),
                }
            }
            if !summary.fingerprint_persisted {
                println!("Fingerprints not recorded; the next sync will retry.");
            }
        }
    }
}

async fn handle_whitelist(action: WhitelistAction, cfg: &SyncConfig) -> ufwsync::Result<()> {
    let store = WhitelistStore::new(&cfg.whitelist_path, cfg.validate_whitelist);

    match action {
        WhitelistAction::Add { address } => {
            let address = address.trim().to_string();
            if let Ok(net) = validate_ipv4_or_cidr(&address)
                && let Some(warning) = check_reserved_ip(net)
            {
                println!("Note: {warning}");
            }
            let result = store.append(&address).await;
            audit::record(audit::operation_event(
                EventType::WhitelistAdd,
                serde_json::json!({ "address": address }),
                &result,
            ))
            .await;
            result?;
            println!("✓ Added {address}; it takes effect on the next applied sync");
        }
        WhitelistAction::Remove { address } => {
            let result = store.remove(address.trim()).await;
            audit::record(audit::operation_event(
                EventType::WhitelistRemove,
                serde_json::json!({ "address": address.trim() }),
                &result,
            ))
            .await;
            match result? {
                0 => println!("{} is not in the whitelist", address.trim()),
                n => println!("✓ Removed {n} entr{}", if n == 1 { "y" } else { "ies" }),
            }
        }
        WhitelistAction::List => {
            let entries = store.read_all().await?;
            if entries.is_empty() {
                println!("Whitelist is empty ({})", store.path().display());
            }
            for entry in entries {
                println!("{entry}");
            }
        }
    }
    Ok(())
}

async fn handle_schedule(
    action: ScheduleAction,
    cfg: &SyncConfig,
    config_path: &Path,
) -> ufwsync::Result<()> {
    let crontab = Crontab::default();

    match action {
        ScheduleAction::Install { interval_hours } => {
            let binary = std::env::current_exe()?;
            let hours = interval_hours.unwrap_or(cfg.schedule_interval_hours);
            let explicit_config = (config_path != config::default_config_path()).then_some(config_path);
            let entry = cron_line(&binary, hours, explicit_config);

            let result = crontab.install(&entry).await;
            audit::record(audit::operation_event(
                EventType::ScheduleInstall,
                serde_json::json!({ "entry": entry }),
                &result,
            ))
            .await;
            result?;
            println!("✓ Installed: {entry}");
        }
        ScheduleAction::Remove => {
            let result = crontab.remove().await;
            audit::record(audit::operation_event(
                EventType::ScheduleRemove,
                serde_json::json!({}),
                &result,
            ))
            .await;
            if result? {
                println!("✓ Cron entry removed");
            } else {
                println!("No ufwsync cron entry found");
            }
        }
    }
    Ok(())
}

async fn show_status(cfg: &SyncConfig, config_path: &Path) -> ufwsync::Result<()> {
    println!("Config:        {}", config_path.display());
    println!("Ports:         {}", display_or_unset(&cfg.ports_url));
    println!("Blocklist:     {}", display_or_unset(&cfg.blocklist_url));
    println!("Whitelist:     {}", cfg.whitelist_path.display());
    println!("Policy:        {}", cfg.failure_policy);

    match FingerprintStore::new(&cfg.fingerprint_path).load().await? {
        Some(pair) => println!(
            "Last applied:  ports {}  blocklist {}",
            pair.ports.short(),
            pair.blocklist.short()
        ),
        None => println!("Last applied:  never"),
    }

    if let Ok(log) = audit::AuditLog::new() {
        let events = log.read_recent(5).await?;
        if !events.is_empty() {
            println!();
            println!("Recent activity:");
        }
        for event in events {
            let mark = if event.success { "✓" } else { "✗" };
            let detail = event
                .error
                .as_deref()
                .map(|e| format!(" - {}", truncate_string(e, 60)))
                .unwrap_or_default();
            println!(
                "  {mark} {} {:?}{detail}",
                event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                event.event_type
            );
        }
    }
    Ok(())
}

fn display_or_unset(value: &str) -> &str {
    if value.trim().is_empty() {
        "(not set)"
    } else {
        value
    }
}

async fn handle_config(
    action: ConfigAction,
    mut cfg: SyncConfig,
    config_path: &Path,
) -> ufwsync::Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(&cfg)?);
        }
        ConfigAction::Set {
            ports_url,
            blocklist_url,
            whitelist_path,
            fetch_timeout_secs,
            failure_policy,
            persist_on_partial,
            validate_whitelist,
            ufw_command,
        } => {
            if let Some(v) = ports_url {
                cfg.ports_url = v;
            }
            if let Some(v) = blocklist_url {
                cfg.blocklist_url = v;
            }
            if let Some(v) = whitelist_path {
                cfg.whitelist_path = v;
            }
            if let Some(v) = fetch_timeout_secs {
                cfg.fetch_timeout_secs = v;
            }
            if let Some(v) = failure_policy {
                cfg.failure_policy = v;
            }
            if let Some(v) = persist_on_partial {
                cfg.persist_on_partial = v;
            }
            if let Some(v) = validate_whitelist {
                cfg.validate_whitelist = v;
            }
            if let Some(v) = ufw_command {
                cfg.ufw_command = v;
            }
            config::save_config(&cfg, config_path).await?;
            println!("✓ Saved {}", config_path.display());
        }
    }
    Ok(())
}
