//! Core cube-assembly modules

pub mod beams;
pub mod combine;
pub mod extract;
pub mod grid;
pub mod stokes;

// Re-export main types
pub use beams::{Beam, BEAM_NAN_SENTINEL};
pub use combine::{
    combine_fits, frequency_listing_path, write_frequency_listing, CombineOptions,
    OutputCubeDescriptor,
};
pub use extract::{extract_channel, has_beam_table, FreqWcs};
pub use grid::{locate_spectral_axis, resolve_frequencies, FileFrequencies, FrequencyGrid};
pub use stokes::combine_stokes;
