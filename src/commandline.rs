use crate::mqtt;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::time::Duration;

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum Vendor {
    /// JBD / Xiaoxiang smart BMS
    Jbd,
    /// Power Queen LiFePO4 battery
    PowerQueen,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Show pack voltage, current, charge, cycles, SOC and temperatures
    Sample,
    /// Show individual cell voltages
    Voltages,
    /// Show vendor specific details (JBD: hardware version, Power Queen: full battery info)
    Info,
    /// Run in daemon mode, periodically fetching and outputting samples
    Daemon {
        /// Output destination for samples
        #[command(subcommand)]
        output: DaemonOutput,
        /// Interval for fetching samples (e.g., "10s", "1m")
        #[clap(long, short, value_parser = humantime::parse_duration, default_value = "10s")]
        interval: Duration,
    },
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum MqttFormat {
    Simple,
    Json,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum DaemonOutput {
    /// Continuously read samples and print them to the standard output (console).
    Console,
    /// Continuously read samples and publish them to an MQTT broker.
    Mqtt {
        /// The configuration file for the MQTT broker
        #[arg(long, default_value_t = mqtt::MqttConfig::DEFAULT_CONFIG_FILE.to_string())]
        config_file: String,
        /// Output format for MQTT messages
        #[arg(long, value_enum, default_value_t = MqttFormat::Simple)]
        format: MqttFormat,
        /// Do not publish Home Assistant discovery documents
        #[arg(long)]
        no_discovery: bool,
    },
}

const fn about_text() -> &'static str {
    "BLE battery management system command line tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Advertised Bluetooth name of the BMS (e.g., "xiaoxiang BMS")
    #[arg(short, long)]
    pub device: String,

    /// Protocol spoken by the BMS
    #[arg(long, value_enum, default_value_t = Vendor::Jbd)]
    pub vendor: Vendor,

    #[command(subcommand)]
    pub command: CliCommands,

    /// How long to wait for a reply (e.g., "500ms", "8s", "1m")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "8s")]
    pub timeout: Duration,

    /// How long to scan for the device before giving up
    #[arg(value_parser = humantime::parse_duration, long, default_value = "30s")]
    pub scan_timeout: Duration,

    /// Number of retries for failed requests
    #[arg(long, default_value = "3")]
    pub retries: u8,
}
