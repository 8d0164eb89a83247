//! CLI entry point for the surface-monitor attack surface scanner.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tabled::{Table, Tabled};
use tracing_subscriber::{fmt, EnvFilter};

use surface_core::HistoryStore;
use surface_report::render;
use surface_store::{SqliteHistoryStore, StoreConfig};

use surface_monitor::config::{MonitorConfig, ScanProfile};
use surface_monitor::pipeline::ScanPipeline;
use surface_monitor::risk::RiskScorer;
use surface_monitor::scanner::NmapScanner;
use surface_monitor::scheduler::{run_single_scan, ScanScheduler};
use surface_monitor::target::TargetSpec;

/// Exit code used when interrupted with Ctrl-C.
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "surface-monitor")]
#[command(about = "Track how a network's exposed services change between scans")]
struct Cli {
    /// Target to scan: IP address, CIDR network or hostname.
    #[arg(short, long)]
    target: Option<String>,

    /// Scan profile: fast, full, comprehensive, stealth.
    #[arg(short, long)]
    profile: Option<String>,

    /// Run a single one-shot scan and exit (the default).
    #[arg(long, conflicts_with = "daemon")]
    once: bool,

    /// Run as daemon with the scheduled targets from the config file.
    #[arg(long)]
    daemon: bool,

    /// Print the nmap command line without running it.
    #[arg(long)]
    dry_run: bool,

    /// Do not write a JSON report for the scan.
    #[arg(long)]
    no_report: bool,

    /// List the available scan profiles.
    #[arg(long)]
    list_profiles: bool,

    /// List recent scans (restricted to --target when given).
    #[arg(long)]
    list_scans: bool,

    /// Number of scans shown by --list-scans.
    #[arg(long, default_value_t = 20)]
    limit: usize,

    /// Show the port history of a host.
    #[arg(long, value_name = "HOST")]
    history: Option<String>,

    /// Print the scan report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Config file prefix (default: surface).
    #[arg(short, long, default_value = "surface")]
    config: String,

    /// Debug logging.
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors.
    #[arg(short, long)]
    quiet: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

#[derive(Tabled)]
struct ProfileRow {
    #[tabled(rename = "Profile")]
    name: &'static str,
    #[tabled(rename = "Nmap flags")]
    flags: String,
    #[tabled(rename = "Description")]
    description: &'static str,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = MonitorConfig::load(&cli.config)?;
    init_logging(&cli, &config);

    if cli.list_profiles {
        print_profiles();
        return Ok(());
    }

    let profile = match cli.profile.as_deref() {
        Some(raw) => raw.parse::<ScanProfile>()?,
        None => config.default_profile,
    };
    let scanner = NmapScanner::new(
        &config.nmap_path,
        Duration::from_secs(config.scan_timeout_secs),
    );

    if cli.dry_run {
        let target = resolve_target(&cli, &config)?;
        println!("{}", scanner.command_line(&target, profile));
        return Ok(());
    }

    let store = SqliteHistoryStore::connect(&StoreConfig {
        path: config.database_path.clone().into(),
        ..StoreConfig::default()
    })?;

    if cli.list_scans {
        let scans = store.list_scans(cli.target.as_deref(), cli.limit)?;
        print!("{}", render::render_scans(&scans));
        return Ok(());
    }

    if let Some(host) = cli.history.as_deref() {
        let records = store.host_history(host)?;
        print!("{}", render::render_history(host, &records));
        return Ok(());
    }

    let scorer = RiskScorer::from_config(&config.risk)?;
    let pipeline = Arc::new(ScanPipeline::new(Arc::new(store), scorer));

    let version = scanner.verify_installation().await?;
    tracing::info!(nmap_version = %version.lines().next().unwrap_or_default(), "Nmap verified");

    if cli.daemon {
        if config.targets.is_empty() {
            anyhow::bail!("--daemon needs at least one [[targets]] entry in the config file");
        }
        let scheduler = ScanScheduler::new(config, scanner, pipeline);
        tokio::select! {
            result = scheduler.run() => result?,
            _ = tokio::signal::ctrl_c() => interrupted(),
        }
        return Ok(());
    }

    let target = resolve_target(&cli, &config)?;
    let write_report = !cli.no_report;
    tracing::debug!(once = cli.once, target = %target, profile = %profile, "Running single scan");
    let run = tokio::select! {
        result = run_single_scan(&scanner, &pipeline, &config, &target, profile, write_report) => result?,
        _ = tokio::signal::ctrl_c() => interrupted(),
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&run.report)?);
    } else {
        print!("{}", render::render_report(&run.report));
    }

    match run.report_path {
        Some(path) => eprintln!("Report saved to {}", path.display()),
        None if write_report => eprintln!("Warning: the scan report could not be written"),
        None => {}
    }

    Ok(())
}

fn init_logging(cli: &Cli, config: &MonitorConfig) {
    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if cli.json_logs || config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn resolve_target(cli: &Cli, config: &MonitorConfig) -> anyhow::Result<TargetSpec> {
    let raw = cli.target.as_deref().unwrap_or(&config.default_target);
    Ok(raw.parse()?)
}

fn print_profiles() {
    let rows: Vec<ProfileRow> = ScanProfile::ALL
        .iter()
        .map(|p| ProfileRow {
            name: p.as_str(),
            flags: p.nmap_flags().join(" "),
            description: p.description(),
        })
        .collect();
    println!("{}", Table::new(rows));
}

fn interrupted() -> ! {
    tracing::warn!("Interrupted");
    std::process::exit(EXIT_INTERRUPTED);
}
