use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (created with defaults if missing)
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Override the gallery directory from the config
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Where scan frames come from.
#[derive(ClapArgs, Debug, Clone)]
pub struct SourceArgs {
    /// Recorded landmark frames, one JSON array of hands per line
    #[arg(long, conflicts_with = "simulate")]
    pub replay: Option<PathBuf>,

    /// Use a synthetic hand with the given curl (radians per joint)
    #[arg(long, value_name = "CURL")]
    pub simulate: Option<f64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Capture every enrollment round and store the identity
    Enroll {
        identity: String,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Scan once and check against a claimed identity
    Verify {
        identity: String,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Scan once and search the whole gallery
    Identify {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity
    Remove { identity: String },
    /// Print the embedding of the first hand in each recorded frame
    Embed {
        /// Recorded landmark frames
        input: PathBuf,
    },
    /// FAR/FRR of the stored gallery against labeled probes
    Evaluate {
        /// JSON lines of {"identity": "name" | null, "embedding": [...]}
        probes: PathBuf,
        /// Threshold to evaluate at (defaults to the configured one)
        #[arg(long)]
        threshold: Option<f64>,
    },
}
