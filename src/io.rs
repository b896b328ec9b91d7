//! Little-endian binary encoding for feature matrices and PCA models.
//!
//! No version header: counts are 32-bit signed integers, values are 64-bit
//! floats, matrices are row-major.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use ndarray::Array2;

use crate::error::{Error, Result};

pub struct LeReader<R: Read> {
    inner: R,
}

impl<R: Read> LeReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn read_i32(&mut self) -> std::io::Result<i32> {
        let mut buf = [0u8; 4];
        self.inner.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    pub fn read_f64(&mut self) -> std::io::Result<f64> {
        let mut buf = [0u8; 8];
        self.inner.read_exact(&mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }

    pub fn read_f64_vec(&mut self, len: usize) -> std::io::Result<Vec<f64>> {
        let mut values = Vec::with_capacity(len.min(1 << 16));
        for _ in 0..len {
            values.push(self.read_f64()?);
        }
        Ok(values)
    }
}

pub struct LeWriter<W: Write> {
    inner: W,
}

impl<W: Write> LeWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_i32(&mut self, value: i32) -> std::io::Result<()> {
        self.inner.write_all(&value.to_le_bytes())
    }

    pub fn write_f64(&mut self, value: f64) -> std::io::Result<()> {
        self.inner.write_all(&value.to_le_bytes())
    }

    pub fn write_f64_all<'a>(
        &mut self,
        values: impl IntoIterator<Item = &'a f64>,
    ) -> std::io::Result<()> {
        for &v in values {
            self.write_f64(v)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Count as the on-disk i32
pub(crate) fn encode_len(len: usize, what: &str) -> Result<i32> {
    i32::try_from(len).map_err(|_| {
        Error::InvalidParameter(format!("{} {} does not fit a 32-bit count", what, len))
    })
}

/// On-disk i32 count back to usize; negative counts are a format error
pub(crate) fn decode_len(value: i32, path: &Path, what: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::InvalidFormat {
        path: path.to_path_buf(),
        reason: format!("negative {} {}", what, value),
    })
}

pub(crate) fn open_reader(path: &Path) -> Result<(LeReader<BufReader<File>>, u64)> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let len = file.metadata().map_err(|e| Error::io(path, e))?.len();
    Ok((LeReader::new(BufReader::new(file)), len))
}

pub(crate) fn create_writer(path: &Path) -> Result<LeWriter<BufWriter<File>>> {
    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    Ok(LeWriter::new(BufWriter::new(file)))
}

/// Write an [N, D] matrix: i32 rows, i32 cols, row-major f64 values
pub fn save_feature_matrix(path: impl AsRef<Path>, features: &Array2<f64>) -> Result<()> {
    let path = path.as_ref();
    let rows = encode_len(features.nrows(), "row count")?;
    let cols = encode_len(features.ncols(), "column count")?;

    let mut writer = create_writer(path)?;
    let write = |w: &mut LeWriter<BufWriter<File>>| -> std::io::Result<()> {
        w.write_i32(rows)?;
        w.write_i32(cols)?;
        // Logical iteration order is row-major whatever the memory layout
        w.write_f64_all(features.iter())?;
        w.flush()
    };
    write(&mut writer).map_err(|e| Error::io(path, e))?;

    log::debug!(
        "saved {}x{} feature matrix to {}",
        features.nrows(),
        features.ncols(),
        path.display()
    );
    Ok(())
}

/// Read a matrix written by [`save_feature_matrix`]
///
/// A file shorter than its header implies is [`Error::TruncatedFile`].
pub fn load_feature_matrix(path: impl AsRef<Path>) -> Result<Array2<f64>> {
    let path = path.as_ref();
    let (mut reader, file_len) = open_reader(path)?;

    let io_err = |e| Error::io(path, e);
    let rows = decode_len(reader.read_i32().map_err(io_err)?, path, "row count")?;
    let cols = decode_len(reader.read_i32().map_err(io_err)?, path, "column count")?;

    let expected = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(8))
        .and_then(|n| n.checked_add(8))
        .ok_or_else(|| Error::InvalidFormat {
            path: path.to_path_buf(),
            reason: format!("header {}x{} overflows", rows, cols),
        })?;
    if file_len < expected as u64 {
        return Err(Error::TruncatedFile {
            path: path.to_path_buf(),
        });
    }

    let values = reader
        .read_f64_vec(rows * cols)
        .map_err(|e| Error::io(path, e))?;
    let matrix = Array2::from_shape_vec((rows, cols), values)
        .map_err(|e| Error::ShapeMismatch(e.to_string()))?;

    log::debug!("loaded {}x{} feature matrix from {}", rows, cols, path.display());
    Ok(matrix)
}
