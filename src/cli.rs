use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run background workers that process queued units
    Worker {
        /// Number of concurrent workers (defaults to the configured count)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Process queued units until the queue is empty, then exit
        #[arg(long)]
        once: bool,
    },

    /// Upload a video and queue it for transcription
    Submit {
        /// Input video file
        #[arg(short, long)]
        input: PathBuf,

        /// Owner identity
        #[arg(short, long)]
        owner: String,

        /// Output resolution: "original" or WIDTHxHEIGHT
        #[arg(short, long, default_value = "original")]
        resolution: String,

        /// Spoken language; omit to auto-detect
        #[arg(short, long)]
        language: Option<String>,

        /// Wait until transcription has finished
        #[arg(long)]
        wait: bool,
    },

    /// Show the status of a job
    Status {
        /// Job id
        #[arg(short, long)]
        job: String,

        /// Owner identity
        #[arg(short, long)]
        owner: String,
    },

    /// Open the subtitle editor and write the current subtitles to a file
    Edit {
        /// Job id
        #[arg(short, long)]
        job: String,

        /// Owner identity
        #[arg(short, long)]
        owner: String,

        /// File receiving the SRT text
        #[arg(short = 'O', long)]
        output: PathBuf,
    },

    /// Save edited subtitles and queue the burn stage
    Burn {
        /// Job id
        #[arg(short, long)]
        job: String,

        /// Owner identity
        #[arg(short, long)]
        owner: String,

        /// Edited SRT file
        #[arg(short, long)]
        subtitles: PathBuf,

        /// Output resolution; defaults to the one chosen at submission
        #[arg(short, long)]
        resolution: Option<String>,
    },

    /// Show queue statistics
    Stats,

    /// Show an owner's usage history
    Usage {
        /// Owner identity
        #[arg(short, long)]
        owner: String,
    },

    /// Probe the duration of a media file
    Probe {
        /// Input media file
        #[arg(short, long)]
        input: PathBuf,
    },
}
