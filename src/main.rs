use anyhow::{Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use lifeblue_lib::{hexdump, protocol};
use log::*;
use std::{ops::Deref, panic, time::Duration};

mod commandline;
mod daemon;
mod mqtt;

use commandline::{CliArgs, CliCommands};

fn logging_init(loglevel: LevelFilter) -> Result<LoggerHandle> {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .with_context(|| "Cannot init logging")?
        .start()
        .with_context(|| "Cannot start logging")?;

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref)
            .or_else(|| panic_info.payload().downcast_ref::<&str>().copied())
            .unwrap_or("<cause unknown>");

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    Ok(log_handle)
}

fn decode(frame: &str, dump: bool, cell_count: usize) -> Result<()> {
    let bytes: Vec<u8> = frame
        .bytes()
        .filter(|byte| !byte.is_ascii_whitespace())
        .collect();
    if dump {
        print!("{}", hexdump::dump("Frame", &bytes));
    }
    let telemetry = protocol::decode_frame_bytes(&bytes, cell_count)
        .with_context(|| "Cannot decode frame")?;
    println!("{telemetry}");
    Ok(())
}

fn scan(duration: Duration) -> Result<()> {
    let (tx, _rx) = std::sync::mpsc::channel();
    let transport = lifeblue_lib::btle::BleTransport::new(tx, duration)
        .with_context(|| "Cannot open Bluetooth adapter")?;
    let batteries = transport.scan(duration).with_context(|| "Scan failed")?;
    if batteries.is_empty() {
        println!("No LiFeBlue batteries found");
    }
    for battery in batteries {
        println!(
            "{}  name={}  rssi={}",
            battery.address,
            battery.name.as_deref().unwrap_or("-"),
            battery
                .rssi
                .map_or_else(|| "-".to_string(), |rssi| rssi.to_string())
        );
    }
    Ok(())
}

fn run_daemon(
    config: lifeblue_lib::PollerConfig,
    output: commandline::DaemonOutput,
    interval: Duration,
    batteries: Vec<String>,
    scan_timeout: Duration,
) -> Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();
    let transport = lifeblue_lib::btle::BleTransport::new(tx, scan_timeout)
        .with_context(|| "Cannot open Bluetooth adapter")?;

    let identities: Vec<String> = if batteries.is_empty() {
        info!("No batteries given, scanning for {scan_timeout:?}");
        transport
            .scan(scan_timeout)
            .with_context(|| "Scan failed")?
            .into_iter()
            .map(|battery| battery.address)
            .collect()
    } else {
        batteries
    };
    if identities.is_empty() {
        anyhow::bail!("No batteries to poll");
    }

    let mut coordinator = lifeblue_lib::BatteryCoordinator::new(transport, config)
        .with_context(|| "Invalid poller configuration")?;
    for identity in &identities {
        coordinator
            .register_device(identity)
            .with_context(|| format!("Cannot register battery '{identity}'"))?;
    }
    daemon::run(coordinator, rx, output, interval)
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter())?;
    let config = args.poller_config();

    match args.command {
        CliCommands::Decode { frame, dump } => decode(&frame, dump, config.cell_count)?,
        CliCommands::Scan { duration } => scan(duration)?,
        CliCommands::Daemon {
            output,
            interval,
            batteries,
            scan_timeout,
        } => run_daemon(config, output, interval, batteries, scan_timeout)?,
    }

    Ok(())
}
