//! Extract a single channel plane from a FITS cube.

use anyhow::Result;
use clap::Parser;
use speccube::core::extract_channel;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "extractcube")]
#[command(about = "Extract a plane from a FITS cube")]
struct Args {
    /// The cube to extract a plane from
    fitscube: PathBuf,

    /// The channel to extract
    #[arg(long, default_value_t = 0)]
    channel: usize,

    /// Output path (defaults to <cube>.channel-N.fits)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Overwrite the output file if it exists
    #[arg(short, long)]
    overwrite: bool,

    /// Increase output verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbosity: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbosity);

    let output = extract_channel(
        &args.fitscube,
        args.channel,
        args.output.as_deref(),
        args.overwrite,
    )?;
    log::info!("Written channel {} to {}", args.channel, output.display());
    Ok(())
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::new().filter_level(level).init();
}
