use crate::io::header::{Header, BLOCK_SIZE, RESERVED_CARDS};
use crate::types::{CubeError, CubeResult, Plane};
use byteorder::{BigEndian, ByteOrder};
use ndarray::IxDyn;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Pixel element type, as encoded by the BITPIX keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bitpix {
    UInt8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl Bitpix {
    pub fn from_code(code: i64) -> CubeResult<Self> {
        match code {
            8 => Ok(Bitpix::UInt8),
            16 => Ok(Bitpix::Int16),
            32 => Ok(Bitpix::Int32),
            64 => Ok(Bitpix::Int64),
            -32 => Ok(Bitpix::Float32),
            -64 => Ok(Bitpix::Float64),
            other => Err(CubeError::UnsupportedPixelPrecision(other)),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Bitpix::UInt8 => 8,
            Bitpix::Int16 => 16,
            Bitpix::Int32 => 32,
            Bitpix::Int64 => 64,
            Bitpix::Float32 => -32,
            Bitpix::Float64 => -64,
        }
    }

    pub fn bytes_per_value(self) -> usize {
        (self.code().unsigned_abs() / 8) as usize
    }

    pub fn is_float(self) -> bool {
        matches!(self, Bitpix::Float32 | Bitpix::Float64)
    }
}

/// One FITS image file: parsed primary header plus the location and layout
/// of its data segment. Pixel data is only read on demand.
pub struct FitsImage {
    path: PathBuf,
    header: Header,
    data_start: u64,
    shape: Vec<usize>,
    bitpix: Bitpix,
    bscale: f64,
    bzero: f64,
    blank: Option<i64>,
}

impl FitsImage {
    /// Open an image and parse its primary header.
    pub fn open<P: AsRef<Path>>(path: P) -> CubeResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(CubeError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("File not found: {}", path.display()),
            )));
        }

        let mut reader = BufReader::new(File::open(&path)?);
        let (header, data_start) = Header::from_reader(&mut reader)?;
        if header.get_logical("SIMPLE") != Some(true) {
            return Err(CubeError::InvalidFormat(format!(
                "{} is not a standard FITS primary HDU",
                path.display()
            )));
        }

        let bitpix = Bitpix::from_code(header.require_i64("BITPIX")?)?;
        let naxis = header.require_i64("NAXIS")? as usize;
        // NAXIS1 varies fastest on disk; memory order puts it last.
        let mut shape = Vec::with_capacity(naxis);
        for axis in (1..=naxis).rev() {
            shape.push(header.require_i64(&format!("NAXIS{axis}"))? as usize);
        }

        let bscale = header.get_f64("BSCALE").unwrap_or(1.0);
        let bzero = header.get_f64("BZERO").unwrap_or(0.0);
        let blank = header.get_i64("BLANK");

        Ok(Self {
            path,
            header,
            data_start,
            shape,
            bitpix,
            bscale,
            bzero,
            blank,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Array shape in memory order (outermost axis first).
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn n_dim(&self) -> usize {
        self.shape.len()
    }

    pub fn is_2d(&self) -> bool {
        self.shape.len() == 2
    }

    pub fn bitpix(&self) -> Bitpix {
        self.bitpix
    }

    /// Byte offset of the data segment.
    pub(crate) fn data_start(&self) -> u64 {
        self.data_start
    }

    /// Scalar reference frequency (Hz) carried by 2-D planes.
    pub fn reference_frequency(&self) -> Option<f64> {
        self.header.get_f64("REFFREQ")
    }

    /// Read the full data segment, widened to f64 with scaling applied.
    pub fn read_data(&self) -> CubeResult<Plane> {
        let n_elem: usize = self.shape.iter().product();
        let mut buf = vec![0u8; n_elem * self.bitpix.bytes_per_value()];
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.data_start))?;
        file.read_exact(&mut buf)?;
        let values = self.decode(&buf);
        Plane::from_shape_vec(IxDyn(&self.shape), values)
            .map_err(|e| CubeError::InvalidFormat(format!("bad array shape: {e}")))
    }

    /// Read one slot along `axis` without loading the rest of the file.
    /// The returned array keeps the degenerate axis (length 1).
    pub fn read_channel(&self, axis: usize, index: usize) -> CubeResult<Plane> {
        if index >= self.shape[axis] {
            return Err(CubeError::ChannelOutOfRange {
                channel: index,
                channels: self.shape[axis],
            });
        }
        let (run_len, offsets) = channel_runs(&self.shape, axis, index);
        let bytes_per_value = self.bitpix.bytes_per_value();
        let mut buf = vec![0u8; run_len * bytes_per_value];
        let mut values = Vec::with_capacity(run_len * offsets.len());
        let mut file = File::open(&self.path)?;
        for offset in offsets {
            file.seek(SeekFrom::Start(
                self.data_start + (offset * bytes_per_value) as u64,
            ))?;
            file.read_exact(&mut buf)?;
            values.extend(self.decode(&buf));
        }
        let mut out_shape = self.shape.clone();
        out_shape[axis] = 1;
        Plane::from_shape_vec(IxDyn(&out_shape), values)
            .map_err(|e| CubeError::InvalidFormat(format!("bad array shape: {e}")))
    }

    fn decode(&self, buf: &[u8]) -> Vec<f64> {
        decode_samples(buf, self.bitpix, self.bscale, self.bzero, self.blank)
    }
}

/// Byte-run geometry of one slot along `axis` of `shape`: the number of
/// contiguous elements per run and the element offset of every run. One run
/// per combination of the axes outside `axis`.
pub(crate) fn channel_runs(shape: &[usize], axis: usize, index: usize) -> (usize, Vec<usize>) {
    let run_len: usize = shape[axis + 1..].iter().product();
    let n_outer: usize = shape[..axis].iter().product();
    let offsets = (0..n_outer)
        .map(|outer| (outer * shape[axis] + index) * run_len)
        .collect();
    (run_len, offsets)
}

fn decode_samples(
    buf: &[u8],
    bitpix: Bitpix,
    bscale: f64,
    bzero: f64,
    blank: Option<i64>,
) -> Vec<f64> {
    let scale_int = |v: i64| -> f64 {
        if blank == Some(v) {
            f64::NAN
        } else {
            v as f64 * bscale + bzero
        }
    };
    match bitpix {
        Bitpix::UInt8 => buf.iter().map(|&v| scale_int(v as i64)).collect(),
        Bitpix::Int16 => buf
            .chunks_exact(2)
            .map(|c| scale_int(BigEndian::read_i16(c) as i64))
            .collect(),
        Bitpix::Int32 => buf
            .chunks_exact(4)
            .map(|c| scale_int(BigEndian::read_i32(c) as i64))
            .collect(),
        Bitpix::Int64 => buf
            .chunks_exact(8)
            .map(|c| scale_int(BigEndian::read_i64(c)))
            .collect(),
        Bitpix::Float32 => buf
            .chunks_exact(4)
            .map(|c| BigEndian::read_f32(c) as f64 * bscale + bzero)
            .collect(),
        Bitpix::Float64 => buf
            .chunks_exact(8)
            .map(|c| BigEndian::read_f64(c) * bscale + bzero)
            .collect(),
    }
}

/// Encode samples for the data segment. Writing is only supported for
/// floating output types; integer inputs are promoted before this point.
pub(crate) fn encode_samples(values: &[f64], bitpix: Bitpix) -> CubeResult<Vec<u8>> {
    match bitpix {
        Bitpix::Float32 => {
            let mut out = vec![0u8; values.len() * 4];
            for (chunk, &v) in out.chunks_exact_mut(4).zip(values) {
                BigEndian::write_f32(chunk, v as f32);
            }
            Ok(out)
        }
        Bitpix::Float64 => {
            let mut out = vec![0u8; values.len() * 8];
            for (chunk, &v) in out.chunks_exact_mut(8).zip(values) {
                BigEndian::write_f64(chunk, v);
            }
            Ok(out)
        }
        other => Err(CubeError::InvalidFormat(format!(
            "cannot encode pixel data with integer BITPIX {}",
            other.code()
        ))),
    }
}

/// Write a complete image HDU: header (with the standard card reservation),
/// data segment, and zero padding to the block boundary. The header must
/// already describe the array's BITPIX and shape.
pub fn write_image(path: &Path, header: &Header, data: &Plane) -> CubeResult<()> {
    let bitpix = Bitpix::from_code(header.require_i64("BITPIX")?)?;
    let flat = data.as_standard_layout();
    let flat = flat
        .as_slice()
        .ok_or_else(|| CubeError::InvalidFormat("plane buffer is not contiguous".to_string()))?;
    let encoded = encode_samples(flat, bitpix)?;

    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&header.to_bytes(RESERVED_CARDS))?;
    writer.write_all(&encoded)?;
    let remainder = encoded.len() % BLOCK_SIZE;
    if remainder != 0 {
        writer.write_all(&vec![0u8; BLOCK_SIZE - remainder])?;
    }
    writer.flush()?;
    Ok(())
}
