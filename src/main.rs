//! Boxwatch - Neufbox watchdog and command line client
//!
//! One action per run; meant to be called from cron or a systemd timer.

use anyhow::{Context, Result};
use boxwatch::config::Config;
use boxwatch::device::diagnostics::{DEFAULT_PING_COUNT, DEFAULT_PING_TIMEOUT};
use boxwatch::device::ReportValue;
use boxwatch::lock::InstanceLock;
use boxwatch::models::{Credentials, HeaderedTable, HotspotMode};
use boxwatch::output::{Formatter, OutputStyle};
use boxwatch::watcher::{self, CheckOutcome, Watcher};
use boxwatch::Device;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "boxwatch", version)]
#[command(about = "Neufbox watchdog: status reports, diagnostics and reboot on WAN loss", long_about = None)]
struct Args {
    /// Action to perform
    #[arg(short, long, value_enum)]
    action: Action,

    /// Host for ping/traceroute, output file for export-user-config
    target: Option<String>,

    /// Config file path (default: boxwatch.toml, /etc/boxwatch/config.toml,
    /// ~/.config/boxwatch/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output style
    #[arg(short, long, value_enum, default_value_t = OutputStyle::Human)]
    output: OutputStyle,

    /// Only log warnings and errors
    #[arg(short, long)]
    silent_success: bool,

    /// Refuse to run while another instance holds the lock
    #[arg(short, long)]
    mutex: bool,

    /// Debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Action {
    FullReport,
    CheckAndReboot,
    Reboot,
    ExportUserConfig,
    WifiStatus,
    EnableWifi,
    DisableWifi,
    HotspotStatus,
    EnableHotspot,
    DisableHotspot,
    AdslInfo,
    NatRules,
    Ping,
    Traceroute,
    SampleConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.action == Action::SampleConfig {
        print!("{}", Config::sample_toml()?);
        return Ok(());
    }

    // Load configuration; a failure is reported once logging is up
    let loaded = Config::load(args.config.as_deref());

    // Initialize logging
    let level = if args.debug {
        "debug"
    } else if args.silent_success {
        "warn"
    } else {
        loaded
            .as_ref()
            .map(|cfg| cfg.logging.level.as_str())
            .unwrap_or("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run_once(&args, loaded).await {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::error!("{:#}", e);
            Err(e)
        }
    }
}

async fn run_once(args: &Args, loaded: Result<Config>) -> Result<()> {
    let cfg = loaded?;
    match &cfg.source {
        Some(path) => tracing::debug!("Loaded config from: {}", path.display()),
        None => tracing::debug!("No config file found, using defaults"),
    }
    cfg.validate()?;

    let _lock = if args.mutex {
        let path = cfg.watcher.state_dir.join("boxwatch.pid");
        match InstanceLock::acquire(&path)
            .with_context(|| format!("Failed to acquire lock {}", path.display()))?
        {
            Some(guard) => Some(guard),
            None => anyhow::bail!(
                "It seems like another instance is already running (lock {}). Exiting.",
                path.display()
            ),
        }
    } else {
        None
    };

    let device = Device::connect(
        &cfg.device.host,
        Credentials::new(cfg.device.login.clone(), cfg.device.password.clone()),
        cfg.http_timeout(),
    )?;

    run(args, &cfg, device).await
}

async fn run(args: &Args, cfg: &Config, mut device: Device) -> Result<()> {
    let formatter = Formatter::new(args.output);
    let print = |value: ReportValue, label: Option<&str>| {
        println!("{}", formatter.format(&value, label));
    };

    match args.action {
        Action::FullReport => {
            let report = device.full_report().await?;
            println!("{}", formatter.format_report(&report));
        }
        Action::CheckAndReboot => {
            let threshold = cfg.watcher.fail_threshold;
            let counter = watcher::counter_path(&cfg.watcher.state_dir, device.host());
            let mut dog = Watcher::new(device, cfg.reboot_wait_delay());
            let outcome = if threshold > 1 {
                dog.check_and_reboot_on_failures(threshold, &counter).await?
            } else {
                dog.check_and_reboot().await?
            };
            if let CheckOutcome::Recovered(report) = outcome {
                if !args.silent_success {
                    println!("{}", formatter.format_report(&report));
                }
            }
        }
        Action::Reboot => device.reboot().await?,
        Action::ExportUserConfig => {
            let path = args
                .target
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or_else(|| {
                    PathBuf::from(format!(
                        "nb4_userconfig_{}.conf",
                        boxwatch::utils::unix_timestamp()
                    ))
                });
            device.export_user_config(&path).await?;
        }
        Action::WifiStatus => print(device.wifi_status().await?.into(), None),
        Action::EnableWifi => device.set_wifi_enabled(true).await?,
        Action::DisableWifi => device.set_wifi_enabled(false).await?,
        Action::HotspotStatus => print(device.hotspot_status().await?.into(), None),
        Action::EnableHotspot => {
            device
                .set_hotspot_enabled(true, HotspotMode::default())
                .await?
        }
        Action::DisableHotspot => {
            device
                .set_hotspot_enabled(false, HotspotMode::default())
                .await?
        }
        Action::AdslInfo => print(device.adsl_info().await?.into(), None),
        Action::NatRules => print(device.nat_config().await?.into(), None),
        Action::Ping => {
            let host = target(args)?;
            let stats = device
                .ping(host, DEFAULT_PING_COUNT, DEFAULT_PING_TIMEOUT)
                .await?;
            print(ReportValue::Table(stats.to_record()), None);
        }
        Action::Traceroute => {
            let host = target(args)?;
            let hops = device.traceroute(host).await?;
            print(HeaderedTable { rows: hops }.into(), None);
        }
        Action::SampleConfig => unreachable!("handled before loading the config"),
    }
    Ok(())
}

fn target(args: &Args) -> Result<&str> {
    args.target
        .as_deref()
        .with_context(|| format!("Action {:?} needs a target host", args.action))
}
