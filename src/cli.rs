//! Command-line interface definitions.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

/// Run Edge Impulse models against live audio and camera input.
#[derive(Parser, Debug)]
#[command(name = "eimrun", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Store request/response traces in this directory
    #[arg(long, global = true, value_name = "DIR")]
    pub trace_dir: Option<PathBuf>,

    /// Verbose output (-v: info, -vv: debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify feature files with a model
    Classify {
        /// Path to the model executable
        model: PathBuf,

        /// Files of comma-separated features, one classification each
        #[arg(required = true)]
        features: Vec<PathBuf>,
    },

    /// Continuously classify microphone audio
    Audio {
        /// Path to the model executable
        model: PathBuf,

        /// Classify audio every interval (e.g. 250ms, 1s)
        #[arg(long, value_name = "DURATION", value_parser = parse_interval)]
        interval: Option<Duration>,

        /// Smooth scores with a moving average filter of this size
        #[arg(long, value_name = "N")]
        maf: Option<usize>,

        /// Microphone device, as printed by `eimrun devices`
        #[arg(long, value_name = "DEVICE")]
        device: Option<String>,

        /// Classify this WAV file instead of recording from a microphone
        #[arg(long, value_name = "FILE")]
        wav: Option<PathBuf>,
    },

    /// Continuously classify camera images
    Image {
        /// Path to the model executable
        model: PathBuf,

        /// Capture an image every interval (e.g. 1s)
        #[arg(long, value_name = "DURATION", value_parser = parse_interval)]
        interval: Option<Duration>,

        /// Camera device, as printed by `eimrun devices`
        #[arg(long, value_name = "DEVICE")]
        device: Option<String>,
    },

    /// List audio and camera capture devices
    Devices,

    /// Upload a measurement payload for ingestion
    #[cfg(feature = "ingest")]
    Collect {
        /// JSON payload file
        payload: PathBuf,

        /// Type of data: split, training or testing
        #[arg(long, default_value = "training")]
        category: String,

        /// Label for the data
        #[arg(long)]
        label: Option<String>,

        /// Reject the upload when an identical sample exists
        #[arg(long)]
        disallow_duplicates: bool,

        /// Base URL payloads are sent to
        #[arg(long, value_name = "URL")]
        base_url: Option<String>,

        /// API key (overrides configuration)
        #[arg(long, value_name = "KEY")]
        api_key: Option<String>,

        /// Hex-encoded HMAC key (overrides configuration)
        #[arg(long, value_name = "KEY")]
        hmac_key: Option<String>,
    },
}

/// Parses a duration such as `250ms` or `1s`; bare numbers are seconds.
fn parse_interval(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}
