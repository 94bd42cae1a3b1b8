use ndarray::ArrayD;
use std::path::PathBuf;

/// Pixel data for one image plane or cube, in memory order (outermost axis
/// first). All supported BITPIX variants are widened to f64 on read.
pub type Plane = ArrayD<f64>;

/// Location of the spectral axis within an input image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectralAxis {
    /// Input is a bare 2-D plane; the output cube gains a new outermost
    /// frequency axis.
    Synthesized,
    /// Frequency axis present in the input WCS.
    Located {
        /// 0-based index into the in-memory array shape (outermost first).
        mem_index: usize,
        /// 1-based FITS axis number (innermost first), as used by the
        /// NAXISn/CTYPEn keywords. Note the two numbering schemes run in
        /// opposite directions.
        fits_axis: usize,
    },
}

impl SpectralAxis {
    /// FITS axis number the output spectral keywords are written under.
    /// A synthesized axis always becomes NAXIS3.
    pub fn output_fits_axis(&self) -> usize {
        match self {
            SpectralAxis::Synthesized => 3,
            SpectralAxis::Located { fits_axis, .. } => *fits_axis,
        }
    }
}

/// Where per-file frequencies come from.
#[derive(Debug, Clone, Default)]
pub enum FrequencySource {
    /// Extract a frequency from each input header (REFFREQ for 2-D planes,
    /// the spectral WCS axis otherwise).
    #[default]
    FromHeaders,
    /// Frequencies supplied directly, one per input file, in Hz.
    List(Vec<f64>),
    /// Plain-text file with one frequency in Hz per line.
    File(PathBuf),
    /// Ignore frequency information and stack planes in the given order.
    Ignore,
}

impl FrequencySource {
    /// Build a source from the optional CLI/API inputs, rejecting
    /// combinations that specify more than one of them.
    pub fn from_options(
        freq_file: Option<PathBuf>,
        freq_list: Option<Vec<f64>>,
        ignore_freq: bool,
    ) -> CubeResult<Self> {
        let given =
            freq_file.is_some() as usize + freq_list.is_some() as usize + ignore_freq as usize;
        if given > 1 {
            return Err(CubeError::InvalidFrequencyConfiguration);
        }
        if let Some(path) = freq_file {
            Ok(FrequencySource::File(path))
        } else if let Some(list) = freq_list {
            Ok(FrequencySource::List(list))
        } else if ignore_freq {
            Ok(FrequencySource::Ignore)
        } else {
            Ok(FrequencySource::FromHeaders)
        }
    }
}

/// Error types for cube assembly
#[derive(Debug, thiserror::Error)]
pub enum CubeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid FITS data: {0}")]
    InvalidFormat(String),

    #[error("no FREQ axis found in WCS")]
    AxisNotFound,

    #[error("REFFREQ not in header of {path}; cannot combine 2D images without frequency information")]
    MissingReferenceFrequency { path: PathBuf },

    #[error("spectral axis cannot be converted to a frequency: {0}")]
    SpectralConversion(String),

    #[error("number of frequencies ({frequencies}) does not match number of images ({images})")]
    FrequencyCountMismatch { frequencies: usize, images: usize },

    #[error("specify at most one of a frequency file, a frequency list, or ignore-freq")]
    InvalidFrequencyConfiguration,

    #[error("output file {0} already exists")]
    OutputAlreadyExists(PathBuf),

    #[error("on-disk shape {on_disk:?} does not match requested shape {requested:?}")]
    ShapeMismatch {
        requested: Vec<usize>,
        on_disk: Vec<usize>,
    },

    #[error("frequency {freq} Hz matches {matches} output channels; expected exactly one")]
    AmbiguousChannelMatch { freq: f64, matches: usize },

    #[error("BITPIX value {0} not recognized")]
    UnsupportedPixelPrecision(i64),

    #[error("rewritten header needs {needed} blocks but only {reserved} are reserved on disk")]
    HeaderOverflow { needed: usize, reserved: usize },

    #[error("only one polarisation is supported - found a STOKES axis of length {0}")]
    MultiplePolarisations(usize),

    #[error("Stokes {plane} {what} does not match Stokes I")]
    StokesMismatch { plane: char, what: &'static str },

    #[error("channel {channel} out of range for a cube with {channels} channels")]
    ChannelOutOfRange { channel: usize, channels: usize },
}

/// Result type for cube operations
pub type CubeResult<T> = Result<T, CubeError>;
