//! FITS container input/output

pub mod cube;
pub mod header;
pub mod image;

// Re-export main types
pub use cube::{preallocate, CubeUpdater};
pub use header::{Card, Header, Value};
pub use image::{write_image, Bitpix, FitsImage};
