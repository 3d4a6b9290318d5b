use crate::mqtt;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use lifeblue_lib::coordinator::DEFAULT_MAX_BATTERIES;
use lifeblue_lib::protocol::DEFAULT_CELL_COUNT;
use lifeblue_lib::ring::DEFAULT_CAPACITY;
use lifeblue_lib::PollerConfig;
use std::time::Duration;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Decode a captured telemetry frame given as ASCII hex text
    Decode {
        /// The frame text, e.g. as copied from a trace log (terminator optional)
        frame: String,
        /// Print a hex dump of the frame before decoding it
        #[clap(long, action)]
        dump: bool,
    },
    /// Scan for batteries advertising the LiFeBlue service
    Scan {
        /// How long to scan (e.g., "5s", "1m")
        #[clap(long, value_parser = humantime::parse_duration, default_value = "10s")]
        duration: Duration,
    },
    /// Run in daemon mode, polling every battery in turn and outputting its telemetry
    Daemon {
        /// Output destination for telemetry
        #[command(subcommand)]
        output: DaemonOutput,
        /// Pause between poll attempts (e.g., "2s", "500ms")
        #[clap(long, short, value_parser = humantime::parse_duration, default_value = "2s")]
        interval: Duration,
        /// Comma-separated list of battery addresses or names. Scans when empty.
        #[clap(long, short, use_value_delimiter = true)]
        batteries: Vec<String>,
        /// How long to scan for batteries that were not seen yet
        #[clap(long, value_parser = humantime::parse_duration, default_value = "10s")]
        scan_timeout: Duration,
    },
}

#[derive(clap::ValueEnum, Debug, Clone, PartialEq)]
pub enum MqttFormat {
    Simple,
    Json,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum DaemonOutput {
    /// Print every decoded frame to the standard output (console).
    Console,
    /// Publish every decoded frame to an MQTT broker.
    Mqtt {
        /// The configuration file for the MQTT broker
        #[arg(long, default_value_t = mqtt::MqttConfig::DEFAULT_CONFIG_FILE.to_string())]
        config_file: String,
        /// Output format for MQTT messages
        #[arg(long, value_enum, default_value_t = MqttFormat::Json)]
        format: MqttFormat,
    },
}

const fn about_text() -> &'static str {
    "LiFeBlue battery monitor"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    #[command(subcommand)]
    pub command: CliCommands,

    /// Number of cells in every battery
    #[arg(long, global = true, default_value_t = DEFAULT_CELL_COUNT)]
    pub cells: usize,

    /// Maximum number of batteries to poll
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_BATTERIES)]
    pub max_batteries: usize,

    /// Size of the per battery receive buffer in bytes
    #[arg(long, global = true, default_value_t = DEFAULT_CAPACITY)]
    pub ring_capacity: usize,
}

impl CliArgs {
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            max_batteries: self.max_batteries,
            cell_count: self.cells,
            ring_capacity: self.ring_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_with_defaults() {
        let args = CliArgs::parse_from(["lifeblue", "decode", "58920100"]);
        assert_eq!(
            args.command,
            CliCommands::Decode {
                frame: "58920100".to_string(),
                dump: false
            }
        );
        assert_eq!(args.poller_config(), PollerConfig::default());
    }

    #[test]
    fn global_sizing_flags() {
        let args = CliArgs::parse_from(["lifeblue", "decode", "--dump", "--cells", "8", "AB"]);
        assert_eq!(args.poller_config().cell_count, 8);
        assert!(matches!(args.command, CliCommands::Decode { dump: true, .. }));
    }

    #[test]
    fn daemon_arguments() {
        let args = CliArgs::parse_from([
            "lifeblue",
            "daemon",
            "--batteries",
            "AA:BB:CC:DD:EE:01,AA:BB:CC:DD:EE:02",
            "--interval",
            "3s",
            "console",
        ]);
        match args.command {
            CliCommands::Daemon {
                output,
                interval,
                batteries,
                ..
            } => {
                assert_eq!(output, DaemonOutput::Console);
                assert_eq!(interval, Duration::from_secs(3));
                assert_eq!(batteries.len(), 2);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
