//! Combine single-Stokes FITS images into a Stokes cube.

use anyhow::Result;
use clap::Parser;
use speccube::core::combine_stokes;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "stokescube")]
#[command(about = "Combine single-Stokes FITS images into a Stokes cube")]
struct Args {
    /// Stokes I file
    stokes_i_file: PathBuf,

    /// Stokes Q file
    stokes_q_file: PathBuf,

    /// Stokes U file
    stokes_u_file: PathBuf,

    /// Output file
    output_file: PathBuf,

    /// Stokes V file
    #[arg(short = 'V', long)]
    stokes_v_file: Option<PathBuf>,

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

    combine_stokes(
        &args.stokes_i_file,
        &args.stokes_q_file,
        &args.stokes_u_file,
        args.stokes_v_file.as_deref(),
        &args.output_file,
        args.overwrite,
    )?;
    log::info!("Written cube to {}", args.output_file.display());
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
