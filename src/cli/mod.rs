use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "clipper",
    about = "Highlight Clipper - cut the best moments of a video into short clips",
    version,
    long_about = "Uploads the audio track of an MP4 or QuickTime video to Gemini, asks for the most interesting moments and re-encodes each one into a standalone MP4 clip with ffmpeg."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Find highlights in a video and cut them into clips
    Process {
        /// Video file to process, or `-` to read from stdin
        #[arg(value_name = "INPUT")]
        input: String,

        /// Directory the clips are written to as short-<n>.mp4 (default: ./shorts)
        #[arg(short, long, value_name = "DIR")]
        output_dir: Option<PathBuf>,

        /// Write the {"shorts": [...]} document to FILE, or `-` for stdout
        #[arg(short, long, value_name = "FILE")]
        json: Option<String>,

        /// Declared content type (guessed from the file extension if omitted)
        #[arg(long, value_name = "MIME")]
        content_type: Option<String>,

        /// Keep the clips that succeeded when some cuts fail
        #[arg(long)]
        best_effort: bool,

        /// Number of clips cut at the same time
        #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
        concurrency: Option<u16>,
    },

    /// Show or initialize the configuration file
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },

    /// Check that ffmpeg and ffprobe are available
    Check,
}
