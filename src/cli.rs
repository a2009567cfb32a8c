use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "orpheus")]
#[command(version)]
#[command(about = "Recover optical media into sector images, tolerating damaged discs", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read a medium into a sector image, resuming an existing image when possible
    Read {
        /// Device or image file to read from (prompts when omitted)
        #[arg(short, long)]
        device: Option<PathBuf>,

        /// Destination image file
        #[arg(short, long)]
        image: PathBuf,

        /// First sector to read
        #[arg(long)]
        first_sector: Option<u64>,

        /// Last sector to read (inclusive)
        #[arg(long)]
        last_sector: Option<u64>,

        /// Maximum number of reading passes over unreadable sectors
        #[arg(short, long, default_value_t = 1)]
        passes: u32,

        /// Sectors to write off after a read error; 0 retries sector by sector
        #[arg(long, default_value_t = 0)]
        sector_skip: u64,

        /// Keep going after fatal device errors
        #[arg(long)]
        ignore_fatal: bool,

        /// Truncate a trailing TAO gap without asking
        #[arg(long)]
        truncate: bool,

        /// Eject the medium when reading finishes without errors
        #[arg(long)]
        eject: bool,

        /// Seconds to spin the drive up before reading
        #[arg(long, default_value_t = 0)]
        spinup: u64,

        /// Verify sectors against a reference checksum file
        #[arg(long)]
        sums: Option<PathBuf>,

        /// Write a reference checksum file after a clean read
        #[arg(long)]
        write_sums: Option<PathBuf>,

        /// Write a JSON report of the session
        #[arg(long)]
        report: Option<PathBuf>,

        /// Answer every prompt with its default
        #[arg(short, long)]
        yes: bool,
    },

    /// Check how much of a medium is readable without writing an image
    Scan {
        /// Device or image file to read from (prompts when omitted)
        #[arg(short, long)]
        device: Option<PathBuf>,

        /// First sector to scan
        #[arg(long)]
        first_sector: Option<u64>,

        /// Last sector to scan (inclusive)
        #[arg(long)]
        last_sector: Option<u64>,

        /// Verify sectors against a reference checksum file
        #[arg(long)]
        sums: Option<PathBuf>,

        /// Seconds to spin the drive up before scanning
        #[arg(long, default_value_t = 0)]
        spinup: u64,

        /// Write a JSON report of the session
        #[arg(long)]
        report: Option<PathBuf>,

        /// Answer every prompt with its default
        #[arg(short, long)]
        yes: bool,
    },

    /// List optical drives, or describe a single medium
    Info {
        /// Device or image file to describe instead of listing drives
        #[arg(short, long)]
        device: Option<PathBuf>,
    },
}
