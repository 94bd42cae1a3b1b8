use ndarray::{Axis, IxDyn};
use speccube::core::{
    combine_fits, extract_channel, frequency_listing_path, write_frequency_listing, CombineOptions,
};
use speccube::io::{write_image, FitsImage, Header};
use speccube::types::{CubeError, FrequencySource, Plane};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const BLOCK_SIZE: usize = 2880;

/// Write a 2-D input plane: 8x8 pixels filled with `fill`, REFFREQ in Hz,
/// optional beam keywords.
fn write_plane_2d(path: &Path, fill: f64, reffreq: Option<f64>, beam: Option<(f64, f64, f64)>) {
    let mut header = Header::new();
    header.set_logical("SIMPLE", true);
    header.set_i64("BITPIX", -64);
    header.set_i64("NAXIS", 2);
    header.set_i64("NAXIS1", 8);
    header.set_i64("NAXIS2", 8);
    header.set_str("CTYPE1", "RA---SIN");
    header.set_str("CTYPE2", "DEC--SIN");
    if let Some(freq) = reffreq {
        header.set_f64("REFFREQ", freq);
    }
    if let Some((major, minor, pa)) = beam {
        header.set_f64("BMAJ", major);
        header.set_f64("BMIN", minor);
        header.set_f64("BPA", pa);
    }
    let data = Plane::from_elem(IxDyn(&[8, 8]), fill);
    write_image(path, &header, &data).unwrap();
}

/// Write a 3-D single-channel input with a proper spectral WCS axis.
fn write_plane_3d(path: &Path, fill: f64, freq: f64) {
    let mut header = Header::new();
    header.set_logical("SIMPLE", true);
    header.set_i64("BITPIX", -64);
    header.set_i64("NAXIS", 3);
    header.set_i64("NAXIS1", 8);
    header.set_i64("NAXIS2", 8);
    header.set_i64("NAXIS3", 1);
    header.set_str("CTYPE1", "RA---SIN");
    header.set_str("CTYPE2", "DEC--SIN");
    header.set_str("CTYPE3", "FREQ");
    header.set_f64("CRPIX3", 1.0);
    header.set_f64("CRVAL3", freq);
    header.set_f64("CDELT3", 1.0e6);
    header.set_str("CUNIT3", "Hz");
    let data = Plane::from_elem(IxDyn(&[1, 8, 8]), fill);
    write_image(path, &header, &data).unwrap();
}

fn combine(files: &[PathBuf], out: &Path, options: &CombineOptions) -> speccube::FrequencyGrid {
    combine_fits(files, out, options).unwrap()
}

#[test]
fn test_channel_count_matches_inputs() {
    let dir = TempDir::new().unwrap();
    let files: Vec<PathBuf> = (0..3)
        .map(|i| {
            let path = dir.path().join(format!("plane{i}.fits"));
            write_plane_2d(&path, i as f64, Some(1.0e9 + i as f64 * 1.0e8), None);
            path
        })
        .collect();

    let out = dir.path().join("cube.fits");
    let grid = combine(&files, &out, &CombineOptions::default());
    assert_eq!(grid.n_channels(), 3);

    let cube = FitsImage::open(&out).unwrap();
    assert_eq!(cube.shape(), &[3, 8, 8]);
    // Uniform spacing: a real FREQ axis
    assert_eq!(cube.header().get_str("CTYPE3"), Some("FREQ"));
    assert_eq!(cube.header().get_f64("CRVAL3"), Some(1.0e9));
    assert_eq!(cube.header().get_i64("CRPIX3"), Some(1));

    let data = cube.read_data().unwrap();
    for chan in 0..3 {
        assert!(data
            .index_axis(Axis(0), chan)
            .iter()
            .all(|&v| v == chan as f64));
    }
}

#[test]
fn test_inputs_are_sorted_by_frequency() {
    let dir = TempDir::new().unwrap();
    // Given in descending frequency order on purpose
    let high = dir.path().join("high.fits");
    let low = dir.path().join("low.fits");
    write_plane_2d(&high, 2.0, Some(1.2e9), None);
    write_plane_2d(&low, 1.0, Some(1.0e9), None);

    let out = dir.path().join("cube.fits");
    combine(
        &[high, low],
        &out,
        &CombineOptions::default(),
    );

    let data = FitsImage::open(&out).unwrap().read_data().unwrap();
    assert!(data.index_axis(Axis(0), 0).iter().all(|&v| v == 1.0));
    assert!(data.index_axis(Axis(0), 1).iter().all(|&v| v == 2.0));
}

#[test]
fn test_create_blanks_fills_gap_with_nan() {
    let dir = TempDir::new().unwrap();
    let files: Vec<PathBuf> = [100.0, 101.0, 103.0]
        .iter()
        .enumerate()
        .map(|(i, &freq)| {
            let path = dir.path().join(format!("plane{i}.fits"));
            write_plane_2d(&path, (i + 1) as f64, Some(freq), None);
            path
        })
        .collect();

    let out = dir.path().join("cube.fits");
    let options = CombineOptions {
        create_blanks: true,
        ..CombineOptions::default()
    };
    let grid = combine(&files, &out, &options);
    assert_eq!(grid.freqs, vec![100.0, 101.0, 102.0, 103.0]);
    assert_eq!(grid.missing, vec![false, false, true, false]);

    let cube = FitsImage::open(&out).unwrap();
    assert_eq!(cube.shape(), &[4, 8, 8]);
    // The re-gridded axis is uniform, so the FREQ description survives
    assert_eq!(cube.header().get_str("CTYPE3"), Some("FREQ"));
    assert_eq!(cube.header().get_f64("CDELT3"), Some(1.0));

    let data = cube.read_data().unwrap();
    assert!(data.index_axis(Axis(0), 0).iter().all(|&v| v == 1.0));
    assert!(data.index_axis(Axis(0), 1).iter().all(|&v| v == 2.0));
    assert!(data.index_axis(Axis(0), 2).iter().all(|v| v.is_nan()));
    assert!(data.index_axis(Axis(0), 3).iter().all(|&v| v == 3.0));
}

#[test]
fn test_uniform_regrid_is_identity() {
    let dir = TempDir::new().unwrap();
    let freqs = [1.0e9, 1.1e9, 1.2e9, 1.3e9];
    let files: Vec<PathBuf> = freqs
        .iter()
        .enumerate()
        .map(|(i, &freq)| {
            let path = dir.path().join(format!("plane{i}.fits"));
            write_plane_2d(&path, i as f64, Some(freq), None);
            path
        })
        .collect();

    let out = dir.path().join("cube.fits");
    let options = CombineOptions {
        create_blanks: true,
        ..CombineOptions::default()
    };
    let grid = combine(&files, &out, &options);
    assert_eq!(grid.freqs, freqs.to_vec());
    assert!(grid.missing.iter().all(|&m| !m));
    assert_eq!(FitsImage::open(&out).unwrap().shape(), &[4, 8, 8]);
}

#[test]
fn test_nd_inputs_use_existing_axis() {
    let dir = TempDir::new().unwrap();
    let files: Vec<PathBuf> = (0..3)
        .map(|i| {
            let path = dir.path().join(format!("chan{i}.fits"));
            write_plane_3d(&path, i as f64 + 10.0, 1.0e9 + i as f64 * 1.0e7);
            path
        })
        .collect();

    let out = dir.path().join("cube.fits");
    let grid = combine(&files, &out, &CombineOptions::default());
    assert_eq!(grid.n_channels(), 3);

    let cube = FitsImage::open(&out).unwrap();
    assert_eq!(cube.shape(), &[3, 8, 8]);
    let data = cube.read_data().unwrap();
    for chan in 0..3 {
        assert!(data
            .index_axis(Axis(0), chan)
            .iter()
            .all(|&v| v == chan as f64 + 10.0));
    }
}

#[test]
fn test_large_cube_goes_through_sparse_path() {
    let dir = TempDir::new().unwrap();
    // 3 * 32 * 32 elements is past the in-memory preallocation threshold
    let files: Vec<PathBuf> = (0..3)
        .map(|i| {
            let path = dir.path().join(format!("plane{i}.fits"));
            let mut header = Header::new();
            header.set_logical("SIMPLE", true);
            header.set_i64("BITPIX", -32);
            header.set_i64("NAXIS", 2);
            header.set_i64("NAXIS1", 32);
            header.set_i64("NAXIS2", 32);
            header.set_f64("REFFREQ", 1.0e9 + i as f64 * 1.0e8);
            let data = Plane::from_elem(IxDyn(&[32, 32]), i as f64 - 0.5);
            write_image(&path, &header, &data).unwrap();
            path
        })
        .collect();

    let out = dir.path().join("cube.fits");
    combine_fits(&files, &out, &CombineOptions::default()).unwrap();

    let cube = FitsImage::open(&out).unwrap();
    assert_eq!(cube.shape(), &[3, 32, 32]);
    assert_eq!(std::fs::metadata(&out).unwrap().len() as usize % BLOCK_SIZE, 0);
    let data = cube.read_data().unwrap();
    for chan in 0..3 {
        assert!(data
            .index_axis(Axis(0), chan)
            .iter()
            .all(|&v| v == chan as f64 - 0.5));
    }
}

#[test]
fn test_ignore_freq_stacks_in_given_order() {
    let dir = TempDir::new().unwrap();
    // REFFREQ values would sort these the other way around
    let first = dir.path().join("first.fits");
    let second = dir.path().join("second.fits");
    write_plane_2d(&first, 1.0, Some(9.9e9), None);
    write_plane_2d(&second, 2.0, Some(1.0e9), None);

    let out = dir.path().join("cube.fits");
    let options = CombineOptions {
        frequencies: FrequencySource::Ignore,
        ..CombineOptions::default()
    };
    combine(&[first, second], &out, &options);

    let cube = FitsImage::open(&out).unwrap();
    assert_eq!(cube.header().get_str("CTYPE3"), Some("CHAN"));
    let data = cube.read_data().unwrap();
    assert!(data.index_axis(Axis(0), 0).iter().all(|&v| v == 1.0));
    assert!(data.index_axis(Axis(0), 1).iter().all(|&v| v == 2.0));
}

#[test]
fn test_freq_file_source() {
    let dir = TempDir::new().unwrap();
    let files: Vec<PathBuf> = (0..2)
        .map(|i| {
            let path = dir.path().join(format!("plane{i}.fits"));
            write_plane_2d(&path, i as f64, None, None);
            path
        })
        .collect();
    let freq_file = dir.path().join("freqs.txt");
    std::fs::write(&freq_file, "# channel frequencies\n1.0e9\n1.1e9\n").unwrap();

    let out = dir.path().join("cube.fits");
    let options = CombineOptions {
        frequencies: FrequencySource::File(freq_file.clone()),
        ..CombineOptions::default()
    };
    let grid = combine(&files, &out, &options);
    assert_eq!(grid.freqs, vec![1.0e9, 1.1e9]);

    // One frequency too few must fail before any output appears
    let out2 = dir.path().join("cube2.fits");
    std::fs::write(&freq_file, "1.0e9\n").unwrap();
    let result = combine_fits(&files, &out2, &options);
    assert!(matches!(
        result,
        Err(CubeError::FrequencyCountMismatch {
            frequencies: 1,
            images: 2
        })
    ));
    assert!(!out2.exists());
}

#[test]
fn test_missing_reffreq_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plane.fits");
    write_plane_2d(&path, 0.0, None, None);
    let out = dir.path().join("cube.fits");
    let result = combine_fits(&[path], &out, &CombineOptions::default());
    assert!(matches!(
        result,
        Err(CubeError::MissingReferenceFrequency { .. })
    ));
    assert!(!out.exists());
}

#[test]
fn test_existing_output_left_untouched() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plane.fits");
    write_plane_2d(&path, 0.0, Some(1.0e9), None);

    let out = dir.path().join("cube.fits");
    std::fs::write(&out, b"precious bytes").unwrap();
    let result = combine_fits(&[path.clone()], &out, &CombineOptions::default());
    assert!(matches!(result, Err(CubeError::OutputAlreadyExists(_))));
    assert_eq!(std::fs::read(&out).unwrap(), b"precious bytes");

    // With overwrite the combine goes through
    let options = CombineOptions {
        overwrite: true,
        ..CombineOptions::default()
    };
    combine_fits(&[path], &out, &options).unwrap();
    assert_eq!(FitsImage::open(&out).unwrap().shape(), &[1, 8, 8]);
}

#[test]
fn test_overwrite_runs_are_byte_identical() {
    let dir = TempDir::new().unwrap();
    let files: Vec<PathBuf> = (0..3)
        .map(|i| {
            let path = dir.path().join(format!("plane{i}.fits"));
            write_plane_2d(
                &path,
                i as f64,
                Some(1.0e9 + i as f64 * 1.0e8),
                Some((0.003, 0.002, 10.0 * i as f64)),
            );
            path
        })
        .collect();

    let out = dir.path().join("cube.fits");
    let options = CombineOptions {
        overwrite: true,
        ..CombineOptions::default()
    };
    combine_fits(&files, &out, &options).unwrap();
    let first_run = std::fs::read(&out).unwrap();
    combine_fits(&files, &out, &options).unwrap();
    let second_run = std::fs::read(&out).unwrap();
    assert_eq!(first_run, second_run);
}

/// Locate the extension HDU after the primary data segment. Returns the
/// parsed table header and the raw row bytes.
fn read_beam_table(path: &Path) -> (Header, Vec<u8>) {
    let bytes = std::fs::read(path).unwrap();
    let mut cursor = &bytes[..];
    let (primary, header_len) = Header::from_reader(&mut cursor).unwrap();

    let naxis = primary.get_i64("NAXIS").unwrap() as usize;
    let mut n_elem = 1usize;
    for axis in 1..=naxis {
        n_elem *= primary.get_i64(&format!("NAXIS{axis}")).unwrap() as usize;
    }
    let bytes_per_value = (primary.get_i64("BITPIX").unwrap().unsigned_abs() / 8) as usize;
    let data_len = (n_elem * bytes_per_value).div_ceil(BLOCK_SIZE) * BLOCK_SIZE;

    let table_start = header_len as usize + data_len;
    let mut cursor = &bytes[table_start..];
    let (table, table_len) = Header::from_reader(&mut cursor).unwrap();
    let rows_start = table_start + table_len as usize;
    let row_bytes = table.get_i64("NAXIS1").unwrap() as usize;
    let n_rows = table.get_i64("NAXIS2").unwrap() as usize;
    let rows = bytes[rows_start..rows_start + row_bytes * n_rows].to_vec();
    (table, rows)
}

#[test]
fn test_beam_table_appended_with_sentinel() {
    let dir = TempDir::new().unwrap();
    // Three planes with a gap; the middle input carries no beam keywords.
    let files: Vec<PathBuf> = [(100.0, true), (101.0, false), (103.0, true)]
        .iter()
        .enumerate()
        .map(|(i, &(freq, with_beam))| {
            let path = dir.path().join(format!("plane{i}.fits"));
            let beam = with_beam.then_some((0.01, 0.005, 45.0));
            write_plane_2d(&path, i as f64, Some(freq), beam);
            path
        })
        .collect();

    let out = dir.path().join("cube.fits");
    let options = CombineOptions {
        create_blanks: true,
        ..CombineOptions::default()
    };
    combine_fits(&files, &out, &options).unwrap();

    let cube = FitsImage::open(&out).unwrap();
    assert_eq!(cube.header().get_logical("CASAMBM"), Some(true));
    assert!(!cube.header().contains("BMAJ"));

    let (table, rows) = read_beam_table(&out);
    assert_eq!(table.get_str("XTENSION"), Some("BINTABLE"));
    assert_eq!(table.get_str("EXTNAME"), Some("BEAMS"));
    // One row per channel, including the blank one
    assert_eq!(table.get_i64("NCHAN"), Some(4));
    assert_eq!(table.get_i64("NAXIS2"), Some(4));

    let row_bytes = table.get_i64("NAXIS1").unwrap() as usize;
    let bmaj_of = |chan: usize| {
        f32::from_be_bytes(rows[chan * row_bytes..chan * row_bytes + 4].try_into().unwrap())
    };
    // Channel 0: real beam in arcsec
    assert!((bmaj_of(0) - 36.0).abs() < 1e-4);
    // Channels 1 (no beam keywords) and 2 (no input plane): the documented
    // sentinel, never a raw NaN
    for chan in [1, 2] {
        assert_eq!(bmaj_of(chan), f32::MIN_POSITIVE);
        assert!(!bmaj_of(chan).is_nan());
    }
    assert!((bmaj_of(3) - 36.0).abs() < 1e-4);
}

#[test]
fn test_no_beam_keywords_no_table() {
    let dir = TempDir::new().unwrap();
    let files: Vec<PathBuf> = (0..2)
        .map(|i| {
            let path = dir.path().join(format!("plane{i}.fits"));
            write_plane_2d(&path, i as f64, Some(1.0e9 + i as f64 * 1.0e8), None);
            path
        })
        .collect();

    let out = dir.path().join("cube.fits");
    combine_fits(&files, &out, &CombineOptions::default()).unwrap();

    let cube = FitsImage::open(&out).unwrap();
    assert!(!cube.header().contains("CASAMBM"));

    // Nothing after the primary HDU
    let bytes = std::fs::read(&out).unwrap();
    let mut cursor = &bytes[..];
    let (_, header_len) = Header::from_reader(&mut cursor).unwrap();
    let data_len = (2 * 8 * 8 * 8usize).div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
    assert_eq!(bytes.len(), header_len as usize + data_len);
}

#[test]
fn test_frequency_listing_roundtrip() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("cube.fits");
    let listing = frequency_listing_path(&out);
    assert_eq!(listing, dir.path().join("cube.freqs_Hz.txt"));

    let grid = speccube::FrequencyGrid {
        freqs: vec![100.0, 101.0, 103.5],
        missing: vec![false; 3],
    };
    write_frequency_listing(&listing, &grid).unwrap();
    let text = std::fs::read_to_string(&listing).unwrap();
    let parsed: Vec<f64> = text.lines().map(|l| l.parse().unwrap()).collect();
    assert_eq!(parsed, grid.freqs);
}

#[test]
fn test_extract_channel_roundtrip() {
    let dir = TempDir::new().unwrap();
    let files: Vec<PathBuf> = (0..3)
        .map(|i| {
            let path = dir.path().join(format!("plane{i}.fits"));
            write_plane_2d(&path, i as f64 + 1.0, Some(1.0e9 + i as f64 * 1.0e8), None);
            path
        })
        .collect();

    let out = dir.path().join("cube.fits");
    combine_fits(&files, &out, &CombineOptions::default()).unwrap();

    let plane_path = extract_channel(&out, 1, None, false).unwrap();
    assert_eq!(plane_path, dir.path().join("cube.channel-1.fits"));

    let plane = FitsImage::open(&plane_path).unwrap();
    assert_eq!(plane.shape(), &[1, 8, 8]);
    assert_eq!(plane.header().get_f64("CRVAL3"), Some(1.1e9));
    assert!(plane.read_data().unwrap().iter().all(|&v| v == 2.0));

    // Out-of-range channels are rejected
    assert!(matches!(
        extract_channel(&out, 9, None, false),
        Err(CubeError::ChannelOutOfRange {
            channel: 9,
            channels: 3
        })
    ));
}
