//! SpecCube: Assemble single-plane astronomical FITS images into spectral cubes
//!
//! This library combines single-frequency radio images into one multi-channel
//! cube addressed along a frequency axis, preallocating the output container
//! on disk so cubes far larger than memory can be built in a single
//! one-plane-at-a-time write pass.

#[cfg(feature = "python")]
use pyo3::prelude::*;

pub mod core;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use crate::core::{
    combine_fits, combine_stokes, extract_channel, frequency_listing_path,
    write_frequency_listing, Beam, CombineOptions, FrequencyGrid,
};
pub use crate::io::{FitsImage, Header};
pub use crate::types::{CubeError, CubeResult, FrequencySource, Plane, SpectralAxis};

#[cfg(feature = "python")]
use std::path::PathBuf;

/// Python module definition
#[cfg(feature = "python")]
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(py_combine_fits, m)?)?;
    m.add_function(wrap_pyfunction!(py_combine_stokes, m)?)?;
    m.add_function(wrap_pyfunction!(py_extract_channel, m)?)?;
    Ok(())
}

#[cfg(feature = "python")]
fn to_py_err(e: CubeError) -> PyErr {
    match e {
        CubeError::InvalidFrequencyConfiguration | CubeError::FrequencyCountMismatch { .. } => {
            PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{}", e))
        }
        CubeError::OutputAlreadyExists(_) => {
            PyErr::new::<pyo3::exceptions::PyFileExistsError, _>(format!("{}", e))
        }
        _ => PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e)),
    }
}

/// Combine FITS images into a spectral cube; returns the channel
/// frequencies in Hz as a numpy array.
#[cfg(feature = "python")]
#[pyfunction]
#[pyo3(name = "combine_fits")]
#[pyo3(signature = (file_list, out_cube, freq_file=None, freqs=None, ignore_freq=false, create_blanks=false, overwrite=false))]
#[allow(clippy::too_many_arguments)]
fn py_combine_fits(
    py: Python<'_>,
    file_list: Vec<PathBuf>,
    out_cube: PathBuf,
    freq_file: Option<PathBuf>,
    freqs: Option<Vec<f64>>,
    ignore_freq: bool,
    create_blanks: bool,
    overwrite: bool,
) -> PyResult<PyObject> {
    use numpy::IntoPyArray;

    let source =
        FrequencySource::from_options(freq_file, freqs, ignore_freq).map_err(to_py_err)?;
    let options = CombineOptions {
        frequencies: source,
        create_blanks,
        overwrite,
    };
    let grid = combine_fits(&file_list, &out_cube, &options).map_err(to_py_err)?;
    let listing = frequency_listing_path(&out_cube);
    write_frequency_listing(&listing, &grid).map_err(to_py_err)?;
    Ok(grid.freqs.into_pyarray(py).into_py(py))
}

/// Combine single-Stokes images into one Stokes cube.
#[cfg(feature = "python")]
#[pyfunction]
#[pyo3(name = "combine_stokes")]
#[pyo3(signature = (stokes_i_file, stokes_q_file, stokes_u_file, output_file, stokes_v_file=None, overwrite=false))]
fn py_combine_stokes(
    stokes_i_file: PathBuf,
    stokes_q_file: PathBuf,
    stokes_u_file: PathBuf,
    output_file: PathBuf,
    stokes_v_file: Option<PathBuf>,
    overwrite: bool,
) -> PyResult<()> {
    combine_stokes(
        &stokes_i_file,
        &stokes_q_file,
        &stokes_u_file,
        stokes_v_file.as_deref(),
        &output_file,
        overwrite,
    )
    .map_err(to_py_err)
}

/// Extract one channel plane from a cube; returns the output path.
#[cfg(feature = "python")]
#[pyfunction]
#[pyo3(name = "extract_channel")]
#[pyo3(signature = (fits_cube, channel=0, output=None, overwrite=false))]
fn py_extract_channel(
    fits_cube: PathBuf,
    channel: usize,
    output: Option<PathBuf>,
    overwrite: bool,
) -> PyResult<PathBuf> {
    extract_channel(&fits_cube, channel, output.as_deref(), overwrite).map_err(to_py_err)
}
