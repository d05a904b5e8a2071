//! CLI for heliorand — randomness served from solar imagery.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "heliorand")]
#[command(about = "heliorand — randomness as a service from full-disk solar imagery")]
#[command(version = heliorand_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the entropy service: fetch loop, refill loop, and HTTP dispenser
    Serve {
        /// Bind host (overrides HELIORAND_API_HOST)
        #[arg(long)]
        host: Option<String>,

        /// Bind port (overrides HELIORAND_API_PORT)
        #[arg(long)]
        port: Option<u16>,

        /// Mirror fetched frames into this directory
        #[arg(long)]
        archive_dir: Option<PathBuf>,

        /// Drain every cached frame per refill pass instead of stopping after
        /// the first productive frame
        #[arg(long)]
        exhaust_frames: bool,
    },

    /// Fetch the latest frames once and report what arrived
    Fetch {
        /// Mirror fetched frames into this directory
        #[arg(long)]
        archive_dir: Option<PathBuf>,
    },

    /// Run the full pipeline once against one frame and print a report
    Pipeline {
        /// Process a local image file instead of fetching from the network
        #[arg(long)]
        image: Option<PathBuf>,
    },

    /// Validate a byte file (or an OS-random baseline) against the quality gate
    Validate {
        /// File of bytes to validate
        file: Option<PathBuf>,

        /// Validate this many OS-random bytes instead of a file
        #[arg(long, conflicts_with = "file", default_value = "4096")]
        os_random: usize,

        /// Print the verdict as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Serve {
            host,
            port,
            archive_dir,
            exhaust_frames,
        } => commands::serve::run(host, port, archive_dir, exhaust_frames).await,
        Commands::Fetch { archive_dir } => commands::fetch::run(archive_dir).await,
        Commands::Pipeline { image } => commands::pipeline::run(image).await,
        Commands::Validate {
            file,
            os_random,
            json,
        } => commands::validate::run(file, os_random, json),
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
