//! Error types shared by every stage of the pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by structure construction, neighbor search, feature
/// extraction and PCA.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown element tag {0}")]
    UnknownElement(usize),

    #[error("atom index {index} out of range for structure with {len} atoms")]
    AtomIndexOutOfRange { index: usize, len: usize },

    #[error("expected {expected} feature columns, found {found}")]
    FeatureDimensionMismatch { expected: usize, found: usize },

    #[error("{0} called before fit() or load()")]
    NotFitted(&'static str),

    #[error("degenerate lattice: {0}")]
    DegenerateLattice(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("spatial index error: {0}")]
    SpatialIndex(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file {} is shorter than its header implies", .path.display())]
    TruncatedFile { path: PathBuf },

    #[error("invalid file format in {}: {reason}", .path.display())]
    InvalidFormat { path: PathBuf, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Wrap an I/O error with the path that failed, folding unexpected EOF
    /// into [`Error::TruncatedFile`].
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::TruncatedFile { path }
        } else {
            Error::Io { path, source }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
