use crate::io::header::Header;
use crate::io::image::FitsImage;
use crate::types::{CubeError, CubeResult, FrequencySource, SpectralAxis};
use std::fs;
use std::path::{Path, PathBuf};

/// Absolute closeness floor in Hz; covers the synthetic integer grids of
/// ignore-frequency mode.
pub const FREQ_ATOL: f64 = 1e-8;
/// Relative closeness term; scales with the grid so 1 GHz channels match to
/// about a kilohertz, far below any real channel width.
pub const FREQ_RTOL: f64 = 1e-6;
/// Gap standard deviation (Hz) below which the grid counts as evenly spaced.
const EVEN_SPACING_TOL_HZ: f64 = 1e-6;

/// Whether two frequencies are close enough to land in the same channel.
pub fn freqs_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= FREQ_ATOL + FREQ_RTOL * b.abs()
}

/// Target spectral axis of the output cube.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyGrid {
    /// Channel centre frequencies in Hz, strictly increasing.
    pub freqs: Vec<f64>,
    /// Channels with no observed input plane.
    pub missing: Vec<bool>,
}

impl FrequencyGrid {
    pub fn n_channels(&self) -> usize {
        self.freqs.len()
    }

    /// Mean gap between adjacent channels (the CDELT of the output axis).
    pub fn mean_step(&self) -> f64 {
        if self.freqs.len() < 2 {
            return f64::NAN;
        }
        let span: f64 = self.freqs.windows(2).map(|w| w[1] - w[0]).sum();
        span / (self.freqs.len() - 1) as f64
    }

    /// Whether the spacing is uniform enough to advertise a linear FREQ axis.
    pub fn is_even(&self) -> bool {
        if self.freqs.len() < 2 {
            return false;
        }
        let diffs: Vec<f64> = self.freqs.windows(2).map(|w| w[1] - w[0]).collect();
        let mean = diffs.iter().sum::<f64>() / diffs.len() as f64;
        let variance = diffs.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / diffs.len() as f64;
        variance.sqrt() < EVEN_SPACING_TOL_HZ
    }

    /// Channel index of an observed frequency. Exactly one grid entry may
    /// lie within tolerance; anything else means the grid construction or
    /// the tolerance is broken.
    pub fn match_channel(&self, freq: f64) -> CubeResult<usize> {
        let mut found = None;
        let mut matches = 0;
        for (chan, &f) in self.freqs.iter().enumerate() {
            if freqs_close(freq, f) {
                matches += 1;
                found = Some(chan);
            }
        }
        match (found, matches) {
            (Some(chan), 1) => Ok(chan),
            _ => Err(CubeError::AmbiguousChannelMatch { freq, matches }),
        }
    }
}

/// Per-file frequencies (in input order) plus the resolved output grid.
#[derive(Debug, Clone)]
pub struct FileFrequencies {
    pub file_freqs: Vec<f64>,
    pub grid: FrequencyGrid,
}

/// Find which axis of an input carries the spectral coordinate. A 2-D plane
/// has none; the caller synthesizes one as the output's outermost axis.
pub fn locate_spectral_axis(header: &Header) -> CubeResult<SpectralAxis> {
    let naxis = header.require_i64("NAXIS")? as usize;
    if naxis == 2 {
        return Ok(SpectralAxis::Synthesized);
    }
    for fits_axis in 1..=naxis {
        let ctype = header.get_str(&format!("CTYPE{fits_axis}")).unwrap_or("");
        if axis_type(ctype) == "FREQ" {
            return Ok(SpectralAxis::Located {
                mem_index: naxis - fits_axis,
                fits_axis,
            });
        }
    }
    Err(CubeError::AxisNotFound)
}

/// WCS axis type: the CTYPE label up to the algorithm part
/// ("FREQ-LSR" -> "FREQ").
fn axis_type(ctype: &str) -> &str {
    ctype.split('-').next().unwrap_or("").trim()
}

/// Spectral world coordinate at pixel index 0 of the frequency axis,
/// converted to Hz.
pub fn spectral_frequency_at_origin(header: &Header, axis: &SpectralAxis) -> CubeResult<f64> {
    let fits_axis = match axis {
        SpectralAxis::Located { fits_axis, .. } => *fits_axis,
        SpectralAxis::Synthesized => return Err(CubeError::AxisNotFound),
    };
    let crval = header
        .get_f64(&format!("CRVAL{fits_axis}"))
        .ok_or_else(|| CubeError::SpectralConversion(format!("CRVAL{fits_axis} missing")))?;
    let crpix = header.get_f64(&format!("CRPIX{fits_axis}")).unwrap_or(1.0);
    let cdelt = header.get_f64(&format!("CDELT{fits_axis}")).unwrap_or(1.0);
    let cunit = header
        .get_str(&format!("CUNIT{fits_axis}"))
        .unwrap_or("Hz")
        .trim();
    let scale = match cunit {
        "" | "Hz" => 1.0,
        "kHz" => 1e3,
        "MHz" => 1e6,
        "GHz" => 1e9,
        other => {
            return Err(CubeError::SpectralConversion(format!(
                "unsupported CUNIT '{other}'"
            )))
        }
    };
    // FITS pixel 1 is array index 0
    Ok((crval + (1.0 - crpix) * cdelt) * scale)
}

/// Resolve one frequency per input file plus the target grid.
pub fn resolve_frequencies(
    file_list: &[PathBuf],
    source: &FrequencySource,
    create_blanks: bool,
) -> CubeResult<FileFrequencies> {
    let file_freqs: Vec<f64> = match source {
        FrequencySource::Ignore => {
            log::info!("Ignoring frequency information");
            (0..file_list.len()).map(|i| i as f64).collect()
        }
        FrequencySource::List(freqs) => {
            check_count(freqs.len(), file_list.len())?;
            freqs.clone()
        }
        FrequencySource::File(path) => {
            log::info!("Reading frequencies from {}", path.display());
            let freqs = read_frequency_file(path)?;
            check_count(freqs.len(), file_list.len())?;
            freqs
        }
        FrequencySource::FromHeaders => {
            log::info!("Reading frequencies from FITS files");
            let mut freqs = Vec::with_capacity(file_list.len());
            for path in file_list {
                freqs.push(frequency_from_file(path)?);
            }
            freqs
        }
    };

    let grid = if create_blanks && !matches!(source, FrequencySource::Ignore) {
        log::info!("Re-gridding to even frequency spacing with blank channels");
        even_spacing(&file_freqs)
    } else {
        deduplicated_grid(&file_freqs)
    };
    Ok(FileFrequencies { file_freqs, grid })
}

/// Sorted, de-duplicated grid straight from the observed values.
fn deduplicated_grid(file_freqs: &[f64]) -> FrequencyGrid {
    let mut sorted = file_freqs.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mut freqs: Vec<f64> = Vec::with_capacity(sorted.len());
    for f in sorted {
        if !freqs.last().is_some_and(|&last| freqs_close(f, last)) {
            freqs.push(f);
        }
    }
    let missing = vec![false; freqs.len()];
    FrequencyGrid { freqs, missing }
}

/// Evenly spaced grid over the observed range, stepping by the minimum
/// positive gap. Grid points with no observation within tolerance are
/// flagged missing.
pub fn even_spacing(file_freqs: &[f64]) -> FrequencyGrid {
    let mut sorted = file_freqs.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mut step = f64::INFINITY;
    for pair in sorted.windows(2) {
        let gap = pair[1] - pair[0];
        if gap > 0.0 && gap < step {
            step = gap;
        }
    }
    if !step.is_finite() {
        log::warn!("Cannot re-grid without at least two distinct frequencies");
        return deduplicated_grid(file_freqs);
    }

    let freqs = arange_fix(sorted[0], sorted[sorted.len() - 1], step);
    let missing = freqs
        .iter()
        .map(|&f| !sorted.iter().any(|&observed| freqs_close(f, observed)))
        .collect();
    FrequencyGrid { freqs, missing }
}

/// arange with an endpoint nudge: when the span is within half a step of a
/// whole number of steps, push the stop value out so the last channel is
/// kept rather than lost to float fuzz.
fn arange_fix(start: f64, stop: f64, step: f64) -> Vec<f64> {
    let n = (stop - start) / step + 1.0;
    let x = n - n.floor();
    let stop = if x < 0.5 { stop + step * x.max(0.1) } else { stop };
    let count = ((stop - start) / step).ceil() as usize;
    (0..count).map(|i| start + i as f64 * step).collect()
}

fn check_count(frequencies: usize, images: usize) -> CubeResult<()> {
    if frequencies != images {
        return Err(CubeError::FrequencyCountMismatch {
            frequencies,
            images,
        });
    }
    Ok(())
}

/// Plain-text frequency listing: one Hz value per line, # comments allowed.
fn read_frequency_file(path: &Path) -> CubeResult<Vec<f64>> {
    let text = fs::read_to_string(path)?;
    let mut freqs = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let value = line.parse::<f64>().map_err(|_| {
            CubeError::InvalidFormat(format!(
                "cannot parse frequency '{line}' in {}",
                path.display()
            ))
        })?;
        freqs.push(value);
    }
    Ok(freqs)
}

fn frequency_from_file(path: &Path) -> CubeResult<f64> {
    let image = FitsImage::open(path)?;
    if image.is_2d() {
        image
            .reference_frequency()
            .ok_or_else(|| CubeError::MissingReferenceFrequency {
                path: path.to_path_buf(),
            })
    } else {
        let axis = locate_spectral_axis(image.header())?;
        spectral_frequency_at_origin(image.header(), &axis)
    }
}
