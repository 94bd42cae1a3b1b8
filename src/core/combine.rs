use crate::core::beams;
use crate::core::grid::{self, FileFrequencies, FrequencyGrid};
use crate::io::cube::{preallocate, CubeUpdater};
use crate::io::header::{Header, Value};
use crate::io::image::{Bitpix, FitsImage};
use crate::types::{CubeError, CubeResult, FrequencySource, SpectralAxis};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Options for a combine run.
#[derive(Debug, Clone, Default)]
pub struct CombineOptions {
    pub frequencies: FrequencySource,
    /// Re-grid to even spacing, padding unobserved channels with NaN planes.
    pub create_blanks: bool,
    pub overwrite: bool,
}

/// Finished output geometry: the rewritten header, the full cube shape, and
/// where the spectral axis sits in the in-memory ordering.
#[derive(Debug, Clone)]
pub struct OutputCubeDescriptor {
    pub header: Header,
    pub shape: Vec<usize>,
    pub chan_axis: usize,
    pub is_2d: bool,
}

/// Build the output header and shape from the first (lowest-frequency)
/// input. The spectral axis keywords are rewritten for the grid; an uneven
/// or synthetic grid degrades to a bare channel-index axis.
pub fn build_output_descriptor(
    first: &FitsImage,
    axis: &SpectralAxis,
    grid: &FrequencyGrid,
    ignore_freq: bool,
) -> CubeResult<OutputCubeDescriptor> {
    let n_chan = grid.n_channels();
    let fits_idx = axis.output_fits_axis();
    let is_2d = matches!(axis, SpectralAxis::Synthesized);
    let mut header = first.header().clone();

    let (shape, chan_axis) = match axis {
        SpectralAxis::Synthesized => {
            let mut shape = vec![n_chan];
            shape.extend_from_slice(first.shape());
            header.set_i64("NAXIS", 3);
            header.insert_after("NAXIS2", "NAXIS3", Value::Integer(n_chan as i64));
            (shape, 0)
        }
        SpectralAxis::Located { mem_index, .. } => {
            let mut shape = first.shape().to_vec();
            shape[*mem_index] = n_chan;
            header.set_i64(&format!("NAXIS{fits_idx}"), n_chan as i64);
            (shape, *mem_index)
        }
    };

    header.set_i64(&format!("CRPIX{fits_idx}"), 1);
    header.set_f64(&format!("CRVAL{fits_idx}"), grid.freqs[0]);
    header.set_f64(&format!("CDELT{fits_idx}"), grid.mean_step());
    header.set_str(&format!("CUNIT{fits_idx}"), "Hz");
    header.set_str(&format!("CTYPE{fits_idx}"), "FREQ");

    if ignore_freq || !grid.is_even() {
        // Irregular spacing cannot be described by a linear FREQ axis; fall
        // back to a channel index and let the sidecar listing carry the
        // real frequencies.
        header.set_i64(&format!("CDELT{fits_idx}"), 1);
        header.remove(&format!("CUNIT{fits_idx}"));
        header.set_str(&format!("CTYPE{fits_idx}"), "CHAN");
        header.set_i64(&format!("CRVAL{fits_idx}"), 1);
    }

    // Planes are deposited unscaled, and the NaN sentinel needs a floating
    // element type.
    header.remove("BSCALE");
    header.remove("BZERO");
    header.remove("BLANK");
    let bitpix = if first.bitpix().is_float() {
        first.bitpix()
    } else {
        log::warn!(
            "Promoting integer BITPIX {} to -32 so blank channels can hold NaN",
            first.bitpix().code()
        );
        Bitpix::Float32
    };
    header.set_i64("BITPIX", bitpix.code());

    Ok(OutputCubeDescriptor {
        header,
        shape,
        chan_axis,
        is_2d,
    })
}

/// Combine single-frequency FITS images into a spectral cube.
///
/// Runs the full pipeline: resolve per-file frequencies and the target
/// grid, preallocate the output container on disk, blank every channel
/// with NaN, deposit each plane into its channel slot, and append the beam
/// table when the inputs carry PSF information. Returns the resolved grid.
pub fn combine_fits(
    file_list: &[PathBuf],
    out_cube: &Path,
    options: &CombineOptions,
) -> CubeResult<FrequencyGrid> {
    if file_list.is_empty() {
        return Err(CubeError::InvalidFormat("no input images supplied".to_string()));
    }

    let FileFrequencies { file_freqs, grid } =
        grid::resolve_frequencies(file_list, &options.frequencies, options.create_blanks)?;

    // Process inputs in ascending frequency order regardless of how the
    // list was given. Ignore-frequency mode assigns frequencies by plane
    // order, so there this is a no-op and the given order wins.
    let mut order: Vec<usize> = (0..file_list.len()).collect();
    order.sort_by(|&a, &b| file_freqs[a].total_cmp(&file_freqs[b]));
    let sorted: Vec<(&PathBuf, f64)> = order
        .iter()
        .map(|&i| (&file_list[i], file_freqs[i]))
        .collect();

    let first = FitsImage::open(sorted[0].0)?;
    let axis = grid::locate_spectral_axis(first.header())?;
    match axis {
        SpectralAxis::Synthesized => {
            log::info!("Input images are 2D; synthesizing a frequency axis")
        }
        SpectralAxis::Located {
            mem_index,
            fits_axis,
        } => log::info!("FREQ axis found at index {mem_index} (NAXIS{fits_axis})"),
    }

    let ignore_freq = matches!(options.frequencies, FrequencySource::Ignore);
    let descriptor = build_output_descriptor(&first, &axis, &grid, ignore_freq)?;
    let first_has_beam = first.header().contains("BMAJ");
    drop(first);

    preallocate(out_cube, &descriptor.header, &descriptor.shape, options.overwrite)?;
    let mut updater = CubeUpdater::open(out_cube)?;

    // Pass 1: every channel starts as a NaN plane so unobserved channels
    // read back as missing.
    for chan in 0..grid.n_channels() {
        updater.fill_channel(descriptor.chan_axis, chan)?;
    }

    // Pass 2: deposit each input plane into its channel slot.
    for (path, freq) in &sorted {
        let chan = grid.match_channel(*freq)?;
        log::debug!("Writing {} to channel {chan}", path.display());
        let plane = FitsImage::open(path)?.read_data()?;
        updater.write_channel(descriptor.chan_axis, chan, &plane)?;
    }

    // Per-plane PSF information rides along as a binary-table extension.
    if first_has_beam {
        log::info!("Extracting beam information");
        let paths: Vec<PathBuf> = sorted.iter().map(|(p, _)| (*p).clone()).collect();
        let file_beams = beams::parse_beams(&paths)?;
        let sorted_freqs: Vec<f64> = sorted.iter().map(|(_, f)| *f).collect();
        let channel_beams = beams::beams_per_channel(&file_beams, &sorted_freqs, &grid)?;
        let (primary, table_header, rows) =
            beams::make_beam_table(&channel_beams, updater.header())?;
        log::info!("Adding beam table to the output container");
        updater.rewrite_header(&primary)?;
        updater.append_hdu(&table_header, &rows)?;
    }

    Ok(grid)
}

/// Companion listing path: `cube.fits` -> `cube.freqs_Hz.txt`.
pub fn frequency_listing_path(out_cube: &Path) -> PathBuf {
    out_cube.with_extension("freqs_Hz.txt")
}

/// Write the per-channel frequencies, one Hz value per line. Used when the
/// grid is irregular and the header can only carry a channel index.
pub fn write_frequency_listing(path: &Path, grid: &FrequencyGrid) -> CubeResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for freq in &grid.freqs {
        writeln!(writer, "{freq}")?;
    }
    writer.flush()?;
    Ok(())
}
