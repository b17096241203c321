use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;
use url::Url;

#[derive(Debug, Parser)]
#[command(
    name = "vigil",
    about = "Resilient live-stream playback with tiered failover and background recovery",
    version
)]
pub struct Args {
    /// Path to a TOML configuration file (defaults to the platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable journal lines
    Pretty,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the failover engine against the configured endpoints
    Run {
        /// Preferred live endpoint (overrides the config file)
        #[arg(long, env = "VIGIL_PRIMARY")]
        primary: Option<Url>,

        /// Backup live endpoint
        #[arg(long, env = "VIGIL_SECONDARY")]
        secondary: Option<Url>,

        /// Interactive embed used when no live source is viable
        #[arg(long, env = "VIGIL_FALLBACK")]
        fallback: Option<Url>,

        /// Maximum same-tier retries before advancing
        #[arg(long)]
        max_retries: Option<u32>,

        /// Delay between same-tier retries, in seconds
        #[arg(long)]
        retry_delay: Option<u64>,

        /// Fragment silence tolerated before escalation, in seconds
        #[arg(long)]
        stall_timeout: Option<u64>,

        /// Buffer stalls tolerated before escalation
        #[arg(long)]
        stall_threshold: Option<u32>,

        /// Delay between background probe attempts, in seconds
        #[arg(long)]
        probe_retry_delay: Option<u64>,

        /// Stability window for grace period and probe verification, in seconds
        #[arg(long)]
        stability_window: Option<u64>,

        /// Fragments a probe must deliver to declare recovery
        #[arg(long)]
        min_probe_fragments: Option<u32>,

        /// Stop automatically after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
        output: OutputFormat,
    },

    /// One-shot stability check of an endpoint (exit code 0 when verified)
    Check {
        /// Endpoint to probe
        url: Url,

        /// Stability window, in seconds
        #[arg(long)]
        stability_window: Option<u64>,

        /// Fragments required within the window
        #[arg(long)]
        min_fragments: Option<u32>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
        output: OutputFormat,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}
