use crate::core::grid::FrequencyGrid;
use crate::io::header::{Header, Value};
use crate::io::image::FitsImage;
use crate::types::{CubeError, CubeResult};
use byteorder::{BigEndian, ByteOrder};
use std::path::PathBuf;

/// Restoring-beam shape for one plane, axes in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Beam {
    pub major_deg: f64,
    pub minor_deg: f64,
    pub pa_deg: f64,
}

impl Beam {
    /// Placeholder for a plane with no PSF information. A legitimate,
    /// representable channel, not an error.
    pub fn blank() -> Self {
        Self {
            major_deg: f64::NAN,
            minor_deg: f64::NAN,
            pa_deg: f64::NAN,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.major_deg.is_nan() && self.minor_deg.is_nan() && self.pa_deg.is_nan()
    }

    /// Read the legacy single-beam keywords; None when no beam is declared.
    pub fn from_header(header: &Header) -> Option<Self> {
        let major_deg = header.get_f64("BMAJ")?;
        Some(Self {
            major_deg,
            minor_deg: header.get_f64("BMIN").unwrap_or(f64::NAN),
            pa_deg: header.get_f64("BPA").unwrap_or(f64::NAN),
        })
    }
}

/// Stored in place of NaN so table consumers that reject NaN still parse
/// every row: the smallest positive normal f32.
pub const BEAM_NAN_SENTINEL: f32 = f32::MIN_POSITIVE;

/// Bytes per beam-table row: three f32 columns plus two i32 columns.
const ROW_BYTES: usize = 20;

/// Read each file's beam descriptor, blanking files without one.
pub fn parse_beams(file_list: &[PathBuf]) -> CubeResult<Vec<Beam>> {
    let mut beams = Vec::with_capacity(file_list.len());
    for path in file_list {
        let image = FitsImage::open(path)?;
        beams.push(Beam::from_header(image.header()).unwrap_or_else(Beam::blank));
    }
    Ok(beams)
}

/// Re-key per-file beams by output channel. Grid channels without an input
/// plane keep the blank beam, so the table always has one row per channel.
pub fn beams_per_channel(
    beams: &[Beam],
    file_freqs: &[f64],
    grid: &FrequencyGrid,
) -> CubeResult<Vec<Beam>> {
    let mut out = vec![Beam::blank(); grid.n_channels()];
    for (beam, &freq) in beams.iter().zip(file_freqs) {
        out[grid.match_channel(freq)?] = *beam;
    }
    Ok(out)
}

/// Polarisation index from a STOKES axis; 0 when the header has none.
fn polarisation_index(header: &Header) -> CubeResult<i32> {
    let naxis = header.require_i64("NAXIS")? as usize;
    for fits_axis in 1..=naxis {
        let ctype = header.get_str(&format!("CTYPE{fits_axis}")).unwrap_or("");
        if ctype.trim() == "STOKES" {
            let len = header.get_i64(&format!("NAXIS{fits_axis}")).unwrap_or(1);
            if len > 1 {
                return Err(CubeError::MultiplePolarisations(len as usize));
            }
            let crpix = header.get_f64(&format!("CRPIX{fits_axis}")).unwrap_or(1.0);
            return Ok((crpix - 1.0) as i32);
        }
    }
    Ok(0)
}

fn f32_or_sentinel(value: f64) -> f32 {
    if value.is_nan() {
        BEAM_NAN_SENTINEL
    } else {
        value as f32
    }
}

/// Build the BEAMS extension: the mutated primary header, the table header,
/// and the big-endian row data, one row per output channel.
pub fn make_beam_table(
    channel_beams: &[Beam],
    primary: &Header,
) -> CubeResult<(Header, Header, Vec<u8>)> {
    let n_chan = channel_beams.len();
    let pol = polarisation_index(primary)?;

    let mut primary = primary.clone();
    primary.set_logical("CASAMBM", true);
    primary.push_comment("The PSF in each image plane varies.");
    primary.push_comment("Full beam information is stored in the second FITS extension.");
    primary.remove("BMAJ");
    primary.remove("BMIN");
    primary.remove("BPA");
    primary.push_comment(&format!(
        "The value '{:e}' represents a NaN PSF in the beam table.",
        BEAM_NAN_SENTINEL
    ));

    let mut rows = vec![0u8; n_chan * ROW_BYTES];
    for (chan, beam) in channel_beams.iter().enumerate() {
        let row = &mut rows[chan * ROW_BYTES..(chan + 1) * ROW_BYTES];
        BigEndian::write_f32(&mut row[0..4], f32_or_sentinel(beam.major_deg * 3600.0));
        BigEndian::write_f32(&mut row[4..8], f32_or_sentinel(beam.minor_deg * 3600.0));
        BigEndian::write_f32(&mut row[8..12], f32_or_sentinel(beam.pa_deg));
        BigEndian::write_i32(&mut row[12..16], chan as i32);
        BigEndian::write_i32(&mut row[16..20], pol);
    }

    let mut table = Header::new();
    table.set(
        "XTENSION",
        Value::Text("BINTABLE".to_string()),
        Some("binary table extension"),
    );
    table.set_i64("BITPIX", 8);
    table.set_i64("NAXIS", 2);
    table.set_i64("NAXIS1", ROW_BYTES as i64);
    table.set_i64("NAXIS2", n_chan as i64);
    table.set_i64("PCOUNT", 0);
    table.set_i64("GCOUNT", 1);
    table.set_i64("TFIELDS", 5);
    table.set_str("TTYPE1", "BMAJ");
    table.set_str("TFORM1", "E");
    table.set_str("TUNIT1", "arcsec");
    table.set_str("TTYPE2", "BMIN");
    table.set_str("TFORM2", "E");
    table.set_str("TUNIT2", "arcsec");
    table.set_str("TTYPE3", "BPA");
    table.set_str("TFORM3", "E");
    table.set_str("TUNIT3", "deg");
    table.set_str("TTYPE4", "CHAN");
    table.set_str("TFORM4", "J");
    table.set_str("TTYPE5", "POL");
    table.set_str("TFORM5", "J");
    table.set_str("EXTNAME", "BEAMS");
    table.set_i64("NCHAN", n_chan as i64);
    table.set_i64("NPOL", 1);

    Ok((primary, table, rows))
}
