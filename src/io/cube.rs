use crate::io::header::{Header, BLOCK_SIZE, CARD_SIZE, RESERVED_CARDS};
use crate::io::image::{channel_runs, encode_samples, write_image, Bitpix, FitsImage};
use crate::types::{CubeError, CubeResult, Plane};
use ndarray::IxDyn;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

/// Below this element count the cube is materialized in memory and written
/// in one go; larger cubes get the header-plus-seek extension treatment.
pub const SMALL_CUBE_ELEMENTS: usize = 1801;

/// Create the output container with its header written and the data segment
/// sized exactly, without holding the cube in memory.
///
/// Large cubes are extended by seeking one byte short of the block-aligned
/// end and writing a single zero; the intervening region reads back as
/// zeros whether or not the filesystem stores it sparsely.
pub fn preallocate(
    path: &Path,
    header: &Header,
    shape: &[usize],
    overwrite: bool,
) -> CubeResult<()> {
    if path.exists() {
        if !overwrite {
            return Err(CubeError::OutputAlreadyExists(path.to_path_buf()));
        }
        fs::remove_file(path)?;
    }

    let bitpix = Bitpix::from_code(header.require_i64("BITPIX")?)?;
    let n_elem: usize = shape.iter().product();
    log::info!(
        "Creating a new FITS file {} with shape {:?}",
        path.display(),
        shape
    );

    if n_elem < SMALL_CUBE_ELEMENTS {
        let data = Plane::zeros(IxDyn(shape));
        write_image(path, header, &data)?;
    } else {
        let header_bytes = header.to_bytes(RESERVED_CARDS);
        let data_bytes = n_elem * bitpix.bytes_per_value();
        // The final -1 accounts for the zero byte written below; the file
        // ends up an exact multiple of the block size.
        let file_length = (header_bytes.len() + data_bytes).div_ceil(BLOCK_SIZE) * BLOCK_SIZE - 1;
        let mut file = File::create(path)?;
        file.write_all(&header_bytes)?;
        file.seek(SeekFrom::Start(file_length as u64))?;
        file.write_all(&[0])?;
        file.sync_all()?;
    }

    // Re-read and confirm the realized geometry. A mismatch here means the
    // byte arithmetic above is wrong; nothing downstream can be trusted.
    let realized = FitsImage::open(path)?;
    if realized.shape() != shape {
        return Err(CubeError::ShapeMismatch {
            requested: shape.to_vec(),
            on_disk: realized.shape().to_vec(),
        });
    }
    let expected_len = (realized.data_start() as usize + n_elem * bitpix.bytes_per_value())
        .div_ceil(BLOCK_SIZE)
        * BLOCK_SIZE;
    let actual_len = fs::metadata(path)?.len();
    if actual_len != expected_len as u64 {
        return Err(CubeError::InvalidFormat(format!(
            "preallocated file is {actual_len} bytes, expected {expected_len}"
        )));
    }
    Ok(())
}

/// Random-access channel updates on a preallocated cube. Holds at most one
/// plane's worth of encoded bytes at a time.
pub struct CubeUpdater {
    file: File,
    header: Header,
    header_span: usize,
    shape: Vec<usize>,
    bitpix: Bitpix,
}

impl CubeUpdater {
    pub fn open(path: &Path) -> CubeResult<Self> {
        let image = FitsImage::open(path)?;
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self {
            file,
            header: image.header().clone(),
            header_span: image.data_start() as usize,
            shape: image.shape().to_vec(),
            bitpix: image.bitpix(),
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Blank one channel slot with the NaN sentinel and flush, so partial
    /// progress is durable and visible to monitoring tools.
    pub fn fill_channel(&mut self, axis: usize, chan: usize) -> CubeResult<()> {
        let (run_len, offsets) = channel_runs(&self.shape, axis, chan);
        let nan_run = encode_samples(&vec![f64::NAN; run_len], self.bitpix)?;
        for offset in offsets {
            self.write_run(offset, &nan_run)?;
        }
        self.file.sync_data()?;
        Ok(())
    }

    /// Deposit one input plane into its channel slot and flush.
    pub fn write_channel(&mut self, axis: usize, chan: usize, plane: &Plane) -> CubeResult<()> {
        let (run_len, offsets) = channel_runs(&self.shape, axis, chan);
        let flat = plane.as_standard_layout();
        let flat = flat
            .as_slice()
            .ok_or_else(|| CubeError::InvalidFormat("plane buffer is not contiguous".to_string()))?;
        if flat.len() != run_len * offsets.len() {
            return Err(CubeError::InvalidFormat(format!(
                "plane has {} elements but the channel slot holds {}",
                flat.len(),
                run_len * offsets.len()
            )));
        }
        for (run, offset) in flat.chunks_exact(run_len).zip(offsets) {
            let bytes = encode_samples(run, self.bitpix)?;
            self.write_run(offset, &bytes)?;
        }
        self.file.sync_data()?;
        Ok(())
    }

    /// Re-serialize a mutated header into its existing on-disk span. The
    /// reservation made at creation time absorbs the growth; overflowing it
    /// would shift the data segment and is a fatal internal error.
    pub fn rewrite_header(&mut self, header: &Header) -> CubeResult<()> {
        let bytes = header.to_bytes(self.header_span / CARD_SIZE);
        if bytes.len() != self.header_span {
            return Err(CubeError::HeaderOverflow {
                needed: bytes.len() / BLOCK_SIZE,
                reserved: self.header_span / BLOCK_SIZE,
            });
        }
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&bytes)?;
        self.file.sync_data()?;
        self.header = header.clone();
        Ok(())
    }

    /// Append an extension HDU (header plus raw data, both block padded) at
    /// the end of the container.
    pub fn append_hdu(&mut self, header: &Header, data: &[u8]) -> CubeResult<()> {
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&header.to_bytes(0))?;
        self.file.write_all(data)?;
        let remainder = data.len() % BLOCK_SIZE;
        if remainder != 0 {
            self.file.write_all(&vec![0u8; BLOCK_SIZE - remainder])?;
        }
        self.file.sync_data()?;
        Ok(())
    }

    fn write_run(&mut self, elem_offset: usize, bytes: &[u8]) -> CubeResult<()> {
        let pos = self.header_span as u64 + (elem_offset * self.bitpix.bytes_per_value()) as u64;
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.write_all(bytes)?;
        Ok(())
    }
}
