//! Command-line configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::crow::{ReconnectPolicy, SerialSettings, DEFAULT_BAUD_RATE};
use crate::script::DEFAULT_SCRIPT;

/// druid - terminal client for monome crow
#[derive(Parser, Debug, Clone)]
#[command(name = "druid", version)]
#[command(about = "Terminal REPL for monome crow", long_about = None)]
pub struct Cli {
    /// Serial device path. Skips USB discovery when given.
    #[arg(long)]
    pub port: Option<String>,

    /// Serial baud rate
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    pub baud: u32,

    /// File that receives the debug log
    #[arg(long, default_value = "druid.log")]
    pub log_file: PathBuf,

    /// Script used by `r` and `u` without a filename
    #[arg(long, default_value = DEFAULT_SCRIPT)]
    pub script: PathBuf,

    /// Delay between connection attempts (milliseconds)
    #[arg(long, default_value_t = 1000)]
    pub retry_delay_ms: u64,
}

impl Cli {
    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings {
            baud_rate: self.baud,
            port: self.port.clone(),
            ..SerialSettings::default()
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}
