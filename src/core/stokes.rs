use crate::io::header::{Card, Header, Value};
use crate::io::image::{write_image, Bitpix, FitsImage};
use crate::types::{CubeError, CubeResult, Plane};
use ndarray::{concatenate, stack, Axis};
use std::path::Path;

/// Combine single-Stokes images into one Stokes cube.
///
/// All inputs must share a header (up to commentary) and a pixel grid. The
/// planes are stacked along an existing STOKES axis, or along a new
/// outermost axis when none exists. Everything is held in memory; equal
/// input shapes make this the easy sibling of the spectral combine.
pub fn combine_stokes(
    stokes_i: &Path,
    stokes_q: &Path,
    stokes_u: &Path,
    stokes_v: Option<&Path>,
    output: &Path,
    overwrite: bool,
) -> CubeResult<()> {
    if output.exists() && !overwrite {
        return Err(CubeError::OutputAlreadyExists(output.to_path_buf()));
    }

    let mut planes: Vec<(char, FitsImage, Plane)> = Vec::with_capacity(4);
    let mut paths: Vec<(char, &Path)> = vec![('I', stokes_i), ('Q', stokes_q), ('U', stokes_u)];
    if let Some(v) = stokes_v {
        paths.push(('V', v));
    }
    for (label, path) in paths {
        let image = FitsImage::open(path)?;
        let data = image.read_data()?;
        planes.push((label, image, data));
    }

    let (_, reference, _) = &planes[0];
    for (label, image, data) in &planes[1..] {
        if !headers_equivalent(reference.header(), image.header()) {
            return Err(CubeError::StokesMismatch {
                plane: *label,
                what: "header",
            });
        }
        if data.shape() != planes[0].2.shape() {
            return Err(CubeError::StokesMismatch {
                plane: *label,
                what: "shape",
            });
        }
    }

    let naxis = reference.n_dim();
    let mut header = reference.header().clone();
    let stokes_axis = find_stokes_axis(reference.header(), naxis);
    let views: Vec<_> = planes.iter().map(|(_, _, data)| data.view()).collect();

    let (cube, fits_idx) = match stokes_axis {
        Some((mem_index, fits_axis)) => {
            log::info!("Stacking along the existing STOKES axis (NAXIS{fits_axis})");
            let cube = concatenate(Axis(mem_index), &views)
                .map_err(|e| CubeError::InvalidFormat(format!("cannot stack Stokes planes: {e}")))?;
            header.set_i64(&format!("NAXIS{fits_axis}"), cube.shape()[mem_index] as i64);
            (cube, fits_axis)
        }
        None => {
            log::info!("No STOKES axis present; adding one as the outermost axis");
            let cube = stack(Axis(0), &views)
                .map_err(|e| CubeError::InvalidFormat(format!("cannot stack Stokes planes: {e}")))?;
            let fits_axis = naxis + 1;
            header.set_i64("NAXIS", fits_axis as i64);
            header.insert_after(
                &format!("NAXIS{naxis}"),
                &format!("NAXIS{fits_axis}"),
                Value::Integer(cube.shape()[0] as i64),
            );
            (cube, fits_axis)
        }
    };

    header.set_str(&format!("CTYPE{fits_idx}"), "STOKES");
    header.set_i64(&format!("CRVAL{fits_idx}"), 1);
    header.set_i64(&format!("CDELT{fits_idx}"), 1);
    header.set_i64(&format!("CRPIX{fits_idx}"), 1);

    // Written unscaled, as floats
    header.remove("BSCALE");
    header.remove("BZERO");
    header.remove("BLANK");
    let bitpix = if reference.bitpix().is_float() {
        reference.bitpix()
    } else {
        Bitpix::Float32
    };
    header.set_i64("BITPIX", bitpix.code());

    write_image(output, &header, &cube)?;
    log::info!("Written Stokes cube to {}", output.display());
    Ok(())
}

fn find_stokes_axis(header: &Header, naxis: usize) -> Option<(usize, usize)> {
    for fits_axis in 1..=naxis {
        let ctype = header.get_str(&format!("CTYPE{fits_axis}")).unwrap_or("");
        if ctype.trim() == "STOKES" {
            return Some((naxis - fits_axis, fits_axis));
        }
    }
    None
}

/// Value cards must agree; commentary and the DATE stamp legitimately
/// differ between planes imaged in separate runs.
fn headers_equivalent(a: &Header, b: &Header) -> bool {
    let values = |header: &Header| {
        header
            .cards()
            .iter()
            .filter_map(|card| match card {
                Card::Value { keyword, value, .. } if keyword != "DATE" => {
                    Some((keyword.clone(), value.clone()))
                }
                _ => None,
            })
            .collect::<Vec<_>>()
    };
    values(a) == values(b)
}
