//! Combine single-frequency FITS images into a spectral cube.

use anyhow::Result;
use clap::Parser;
use speccube::core::{combine_fits, frequency_listing_path, write_frequency_listing, CombineOptions};
use speccube::types::{CubeError, FrequencySource};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "speccube")]
#[command(about = "Combine single-frequency FITS images into a spectral cube")]
struct Args {
    /// Input FITS images (in any order) followed by the output cube path
    #[arg(required = true, num_args = 2.., value_name = "FILES... OUTPUT")]
    paths: Vec<PathBuf>,

    /// Overwrite the output files if they exist
    #[arg(short, long)]
    overwrite: bool,

    /// Try to create a blank-padded cube with evenly spaced frequencies
    #[arg(long)]
    create_blanks: bool,

    /// File containing frequencies in Hz, one per line
    #[arg(long, group = "freqsource")]
    freq_file: Option<PathBuf>,

    /// List of frequencies in Hz
    #[arg(long, num_args = 1.., group = "freqsource")]
    freqs: Option<Vec<f64>>,

    /// Ignore frequency information and just stack planes in the given
    /// order (probably not what you want)
    #[arg(long, group = "freqsource")]
    ignore_freq: bool,

    /// Increase output verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbosity: u8,
}

fn main() -> Result<()> {
    let mut args = Args::parse();
    init_logging(args.verbosity);

    let out_cube = match args.paths.pop() {
        Some(path) => path,
        None => anyhow::bail!("missing output cube path"),
    };
    let files = args.paths;

    let source = FrequencySource::from_options(args.freq_file, args.freqs, args.ignore_freq)?;

    // Refuse to clobber either output before any work happens.
    let freqs_file = frequency_listing_path(&out_cube);
    if args.overwrite {
        log::info!("Overwriting output files");
    } else {
        for path in [&out_cube, &freqs_file] {
            if path.exists() {
                return Err(CubeError::OutputAlreadyExists(path.clone()).into());
            }
        }
    }

    let options = CombineOptions {
        frequencies: source,
        create_blanks: args.create_blanks,
        overwrite: args.overwrite,
    };
    let grid = combine_fits(&files, &out_cube, &options)?;
    log::info!("Written cube to {}", out_cube.display());

    write_frequency_listing(&freqs_file, &grid)?;
    log::info!("Written frequencies to {}", freqs_file.display());
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
