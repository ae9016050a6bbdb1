// CLASSIFICATION: COMMUNITY
// Filename: aboxctl.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-15

//! Drive the ABOX core against the simulated platform.

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info, LevelFilter};

use abox::ipc::{DeviceId, IpcId, IpcMessage};
use abox::qos::QosClass;
use abox::sim::{boot_done_message, SimEnv};
use abox::{AboxConfig, AboxData};

#[derive(Parser)]
#[command(name = "aboxctl", about = "Exercise the ABOX control core", version = "0.1")]
struct Cli {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Debug logging.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Power on, wait for boot, power off.
    Boot {
        /// Firmware version reported on boot, as four characters.
        #[arg(long, default_value = "SC20")]
        version: String,
        /// Never acknowledge boot.
        #[arg(long, default_value_t = false)]
        silent: bool,
    },
    /// Apply QoS votes given as CLASS:ID:VALUE and print the result.
    Qos { votes: Vec<String> },
    /// Queue messages without a running core to show overflow handling.
    Flood {
        #[arg(long, default_value_t = 80)]
        count: usize,
    },
    /// Fire the watchdog on a running core.
    Watchdog,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let mut builder =
        env_logger::Builder::from_env(Env::default().default_filter_or(default_level.as_str()));
    builder.format_timestamp_millis();
    let _ = builder.try_init();
}

fn load_config(path: Option<&PathBuf>) -> Result<AboxConfig> {
    let cfg = match path {
        Some(p) => AboxConfig::load(p).with_context(|| format!("loading {}", p.display()))?,
        None => AboxConfig::default(),
    };
    cfg.with_env_overrides().context("applying environment overrides")
}

fn parse_class(name: &str) -> Result<QosClass> {
    QosClass::ALL
        .iter()
        .copied()
        .find(|c| c.name().eq_ignore_ascii_case(name))
        .with_context(|| format!("unknown qos class {name}"))
}

fn parse_vote(vote: &str) -> Result<(QosClass, u32, u32)> {
    let parts: Vec<&str> = vote.split(':').collect();
    if parts.len() != 3 {
        bail!("vote '{vote}' is not CLASS:ID:VALUE");
    }
    let id = if let Some(hex) = parts[1].strip_prefix("0x") {
        u32::from_str_radix(hex, 16)
    } else {
        parts[1].parse()
    }
    .with_context(|| format!("bad id in '{vote}'"))?;
    let value = parts[2]
        .parse()
        .with_context(|| format!("bad value in '{vote}'"))?;
    Ok((parse_class(parts[0])?, id, value))
}

/// Probe a device whose simulated firmware answers boot through `handle_ipc`.
fn probe(cfg: AboxConfig, sim: &SimEnv, version: Option<u32>) -> Result<Arc<AboxData>> {
    let abox = AboxData::probe(cfg, sim.env()).context("probing abox")?;
    if let Some(version) = version {
        let weak: Weak<AboxData> = Arc::downgrade(&abox);
        sim.platform.on_boot(Duration::from_millis(20), move || {
            if let Some(abox) = weak.upgrade() {
                if let Err(e) = abox.handle_ipc(&boot_done_message(version).encode()) {
                    error!("boot ack failed: {e}");
                }
            }
        });
    }
    Ok(abox)
}

fn boot(cfg: AboxConfig, version: &str, silent: bool) -> Result<()> {
    let raw: [u8; 4] = version
        .as_bytes()
        .try_into()
        .with_context(|| format!("version '{version}' must be four characters"))?;
    let sim = SimEnv::new();
    let timeout = cfg.boot_done_timeout();
    let abox = probe(cfg, &sim, (!silent).then(|| u32::from_be_bytes(raw)))?;

    abox.runtime_resume().context("enable")?;
    match abox.calliope().wait_ready(timeout) {
        Ok(()) => println!("calliope {} ({})", abox.state(), abox.calliope().version_string()),
        Err(e) => println!("boot failed: {e}; failsafe count {}", abox.failsafe().reset_count()),
    }
    abox.calliope().wait_restored(timeout);
    match abox.runtime_suspend() {
        Ok(()) => println!("calliope {}", abox.state()),
        Err(e) => println!("suspend refused: {e}"),
    }
    println!("sent: {:?}", sim.transport.system_types());
    Ok(())
}

fn qos(cfg: AboxConfig, votes: &[String]) -> Result<()> {
    let sim = SimEnv::new();
    let abox = probe(cfg, &sim, None)?;
    for vote in votes {
        let (class, id, value) = parse_vote(vote)?;
        abox.qos().request(class, id, value, "aboxctl")?;
    }
    abox.qos().complete();
    print!("{}", abox.qos().snapshot());
    Ok(())
}

fn flood(cfg: AboxConfig, count: usize) -> Result<()> {
    let sim = SimEnv::new();
    let abox = probe(cfg, &sim, None)?;
    let mut rejected = 0;
    for i in 0..count {
        let msg = IpcMessage::new(IpcId::Erap, &(i as u32).to_le_bytes());
        if abox.request_ipc(DeviceId(1), &msg, true, false).is_err() {
            rejected += 1;
        }
    }
    println!(
        "queued {} of {count}, rejected {rejected}, failsafe reported: {}",
        abox.ipc().pending(),
        abox.failsafe().is_reported()
    );
    Ok(())
}

fn watchdog(cfg: AboxConfig) -> Result<()> {
    let sim = SimEnv::new();
    let timeout = cfg.boot_done_timeout();
    let recovery = cfg.wdt_recovery_delay();
    let abox = probe(cfg, &sim, Some(u32::from_be_bytes(*b"WDT0")))?;
    abox.runtime_resume()?;
    abox.calliope().wait_ready(timeout)?;
    let cycled = abox.calliope().watchdog();
    std::thread::sleep(recovery * 2);
    abox.failsafe().flush();
    info!("watchdog handled");
    println!(
        "power cycled: {cycled}, failsafe reported: {}, uevents: {:?}",
        abox.failsafe().is_reported(),
        sim.events.events()
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let cfg = load_config(cli.config.as_ref())?;
    match cli.command {
        Commands::Boot { version, silent } => boot(cfg, &version, silent),
        Commands::Qos { votes } => qos(cfg, &votes),
        Commands::Flood { count } => flood(cfg, count),
        Commands::Watchdog => watchdog(cfg),
    }
}
