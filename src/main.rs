// Without `ble` there is no transport to run on; the modules still build for their tests.
#![cfg_attr(not(feature = "ble"), allow(dead_code, unused_imports))]

use anyhow::{Context, Result};
#[cfg(feature = "ble")]
use blebms_lib::driver::{with_retries, JbdDriver, PowerQueenDriver};
#[cfg(feature = "ble")]
use blebms_lib::transport::BluestTransport;
#[cfg(feature = "ble")]
use blebms_lib::{BmsDriver, DriverConfig};
use clap::Parser;
use commandline::CliArgs;
#[cfg(feature = "ble")]
use commandline::{CliCommands, Vendor};
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::{ops::Deref, panic};

mod commandline;
mod daemon;
mod mqtt;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

/// Concrete driver, kept for the vendor specific `info` command.
#[cfg(feature = "ble")]
enum Bms {
    Jbd(JbdDriver<BluestTransport>),
    PowerQueen(PowerQueenDriver<BluestTransport>),
}

#[cfg(feature = "ble")]
impl Bms {
    fn new(args: &CliArgs) -> Self {
        let mut transport = BluestTransport::new(&args.device);
        transport.set_scan_timeout(args.scan_timeout);
        let config = DriverConfig {
            timeout: args.timeout,
            ..DriverConfig::default()
        };
        match args.vendor {
            Vendor::Jbd => Bms::Jbd(JbdDriver::with_config(transport, config)),
            Vendor::PowerQueen => {
                Bms::PowerQueen(PowerQueenDriver::with_config(transport, config))
            }
        }
    }

    fn driver(&mut self) -> &mut dyn BmsDriver {
        match self {
            Bms::Jbd(bms) => bms,
            Bms::PowerQueen(bms) => bms,
        }
    }

    async fn print_info(&mut self) -> Result<()> {
        match self {
            Bms::Jbd(bms) => {
                let info = bms
                    .fetch_basic_info()
                    .await
                    .with_context(|| "Cannot get basic info")?;
                println!("Basic info: {info:?}");
                let (year, month, day) = info.manufacture_ymd();
                println!("Manufactured: {year:04}-{month:02}-{day:02}");
                println!(
                    "Charge FET: {}, discharge FET: {}",
                    info.charge_enabled(),
                    info.discharge_enabled()
                );
                println!(
                    "Hardware version: {}",
                    bms.fetch_hardware_version()
                        .await
                        .with_context(|| "Cannot get hardware version")?
                );
            }
            Bms::PowerQueen(bms) => println!(
                "Battery info: {:?}",
                bms.fetch_info()
                    .await
                    .with_context(|| "Cannot get battery info")?
            ),
        }
        Ok(())
    }
}

#[cfg(feature = "ble")]
async fn execute(bms: &mut Bms, args: &CliArgs) -> Result<()> {
    match args.command.clone() {
        CliCommands::Sample => println!(
            "Sample: {:?}",
            with_retries(bms.driver(), args.retries, "sample", |bms| bms.fetch())
                .await
                .with_context(|| "Cannot get sample")?
        ),
        CliCommands::Voltages => {
            let cells = with_retries(bms.driver(), args.retries, "cell voltages", |bms| {
                bms.fetch_voltages()
            })
            .await
            .with_context(|| "Cannot get cell voltages")?;
            for (index, volts) in cells.indexed() {
                println!("Cell {index}: {volts:.3} V");
            }
        }
        CliCommands::Info => bms.print_info().await?,
        CliCommands::Daemon { output, interval } => {
            daemon::run(bms.driver(), output, interval, args.retries).await?
        }
    }
    Ok(())
}

#[cfg(not(feature = "ble"))]
fn main() -> Result<()> {
    let args = CliArgs::parse();
    let _log_handle = logging_init(args.verbose.log_level_filter());
    anyhow::bail!("blebms was built without the `ble` feature, no Bluetooth transport available")
}

#[cfg(feature = "ble")]
#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    let mut bms = Bms::new(&args);
    let driver = bms.driver();
    info!("Connecting to {} BMS '{}'", driver.name(), args.device);
    driver
        .connect()
        .await
        .with_context(|| format!("Cannot connect to '{}'", args.device))?;

    let result = execute(&mut bms, &args).await;

    if let Err(e) = bms.driver().disconnect().await {
        warn!("Disconnect failed: {e}");
    }
    result
}
