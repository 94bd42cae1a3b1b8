use crate::io::header::Header;
use crate::io::image::{write_image, Bitpix, FitsImage};
use crate::types::{CubeError, CubeResult};
use std::path::{Path, PathBuf};

/// Spectral WCS of a cube, as read straight from its header.
#[derive(Debug, Clone, PartialEq)]
pub struct FreqWcs {
    /// 1-based FITS axis number carrying the frequency.
    pub fits_axis: usize,
    pub ctype: String,
    pub crpix: f64,
    pub crval: f64,
    pub cdelt: f64,
    pub cunit: Option<String>,
}

/// Find the frequency axis of a cube header.
pub fn find_freq_axis(header: &Header) -> CubeResult<FreqWcs> {
    let naxis = header.require_i64("NAXIS")? as usize;
    for fits_axis in 1..=naxis {
        let ctype = header.get_str(&format!("CTYPE{fits_axis}")).unwrap_or("");
        if ctype.contains("FREQ") {
            log::debug!("Found FREQ at axis {fits_axis}");
            return Ok(FreqWcs {
                fits_axis,
                ctype: ctype.to_string(),
                crpix: header.get_f64(&format!("CRPIX{fits_axis}")).unwrap_or(1.0),
                crval: header
                    .get_f64(&format!("CRVAL{fits_axis}"))
                    .ok_or_else(|| {
                        CubeError::SpectralConversion(format!("CRVAL{fits_axis} missing"))
                    })?,
                cdelt: header.get_f64(&format!("CDELT{fits_axis}")).unwrap_or(1.0),
                cunit: header
                    .get_str(&format!("CUNIT{fits_axis}"))
                    .map(str::to_string),
            });
        }
    }
    Err(CubeError::AxisNotFound)
}

/// Whether a cube carries the per-plane beam table marker.
pub fn has_beam_table(header: &Header) -> bool {
    header.get_logical("CASAMBM").unwrap_or(false)
}

/// Default output path: `cube.fits` -> `cube.channel-3.fits`.
pub fn default_output_path(input: &Path, channel: usize) -> PathBuf {
    let ext = input
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("fits");
    input.with_extension(format!("channel-{channel}.{ext}"))
}

/// Extract one channel plane from a cube into its own file.
///
/// Only the requested channel slot is read from disk; the rest of the cube
/// never enters memory. The degenerate spectral axis is kept so the output
/// has the same dimensionality as the cube, and the spectral WCS is
/// rewritten to reference the extracted channel.
pub fn extract_channel(
    cube: &Path,
    channel: usize,
    output: Option<&Path>,
    overwrite: bool,
) -> CubeResult<PathBuf> {
    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_output_path(cube, channel));
    if output.exists() && !overwrite {
        return Err(CubeError::OutputAlreadyExists(output));
    }

    log::info!("Opening {}", cube.display());
    let image = FitsImage::open(cube)?;
    let freq = find_freq_axis(image.header())?;
    let mem_index = image.n_dim() - freq.fits_axis;
    let n_channels = image.shape()[mem_index];
    if channel >= n_channels {
        return Err(CubeError::ChannelOutOfRange {
            channel,
            channels: n_channels,
        });
    }

    let plane = image.read_channel(mem_index, channel)?;

    let mut header = image.header().clone();
    header.set_i64(&format!("NAXIS{}", freq.fits_axis), 1);
    header.set_i64(&format!("CRPIX{}", freq.fits_axis), 1);
    header.set_f64(
        &format!("CRVAL{}", freq.fits_axis),
        freq.crval + channel as f64 * freq.cdelt,
    );
    if !image.bitpix().is_float() {
        header.remove("BSCALE");
        header.remove("BZERO");
        header.remove("BLANK");
        header.set_i64("BITPIX", Bitpix::Float32.code());
    }

    write_image(&output, &header, &plane)?;
    log::info!("Written channel {channel} to {}", output.display());
    Ok(output)
}
