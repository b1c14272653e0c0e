//! Story bridge CLI
//!
//! Drives a Storybook app on a device or simulator from the command line:
//! single story changes, whole story plans, or a passive listener.

use clap::Parser;
use story_bridge::commands::Commands;
use story_bridge::common::config::{Config, DeviceKind};
use story_bridge::common::{logging, Result};
use story_bridge::cli;

#[derive(Parser)]
#[command(name = "story-bridge", about = "Storybook story-change bridge for device tests")]
#[command(version, long_about = None)]
struct Cli {
    /// Port the device connects to
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Address to listen on
    #[arg(long, global = true)]
    host: Option<String>,

    /// Debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Also append logs to the log file in the data directory
    #[arg(long, global = true)]
    log_file: bool,

    /// Device kind: adb or host
    #[arg(long, global = true)]
    device: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn config(&self) -> Result<Config> {
        let mut config = Config::load()?;
        if let Some(port) = self.port {
            config.channel.port = port;
        }
        if let Some(host) = &self.host {
            config.channel.host = host.clone();
        }
        if let Some(device) = &self.device {
            config.device.kind = device.parse::<DeviceKind>()?;
        }
        if self.debug {
            config.logging.debug = true;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.config() {
        Ok(config) => {
            if cli.log_file {
                if let Some(path) = logging::init_with_file(config.logging.debug) {
                    tracing::debug!(path = %path.display(), "Logging to file");
                }
            } else {
                logging::init(config.logging.debug);
            }
            cli::dispatch(cli.command, &config).await
        }
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
