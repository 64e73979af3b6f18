use crate::checksum::Digest;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PartxError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("schema mismatch: expected {expected} columns, header has {actual}")]
    SchemaMismatch { expected: usize, actual: usize },

    #[error("data row {row}: expected {expected} columns, found {actual}")]
    RowShape {
        row: u64,
        expected: usize,
        actual: usize,
    },

    #[error("row {row}: unterminated quoted field at end of input")]
    UnterminatedQuote { row: u64 },

    #[error("schema drift: manifest fingerprint {expected}, chunk header fingerprint {actual}")]
    SchemaDrift { expected: Digest, actual: Digest },

    #[error("{} has no {missing}", .path.display())]
    EmptySource {
        path: PathBuf,
        missing: &'static str,
    },

    #[error("write to {} failed: {source}", .path.display())]
    InsufficientSpace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("refusing to overwrite existing {}", .path.display())]
    OutputExists { path: PathBuf },

    #[error("manifest malformed: {0}")]
    ManifestMalformed(String),

    #[error("unsupported manifest format_version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// Raised by the builder; indicates a splitter bug, not bad input.
    #[error("manifest invariant violated: {0}")]
    ManifestInvariant(String),

    #[error("chunk {index} missing: {}", .path.display())]
    ChunkMissing { index: u32, path: PathBuf },

    #[error("chunk {index} ({filename}) checksum mismatch: expected {expected}, actual {actual}")]
    ChunkIntegrity {
        index: u32,
        filename: String,
        expected: Digest,
        actual: Digest,
    },

    #[error("chunk {index} ({filename}) size mismatch: manifest records {expected} bytes, file has {actual}")]
    ChunkSize {
        index: u32,
        filename: String,
        expected: u64,
        actual: u64,
    },

    #[error("chunk {index}: manifest records {expected} rows, chunk holds {actual}")]
    ChunkRowCount {
        index: u32,
        expected: u64,
        actual: u64,
    },

    #[error("chunk {index}: header bytes differ from chunk 1")]
    HeaderDrift { index: u32 },

    #[error(
        "reconstruction integrity failure: expected {expected} ({expected_size} bytes), \
         got {actual} ({actual_size} bytes)"
    )]
    ReconstructionIntegrity {
        expected: Digest,
        actual: Digest,
        expected_size: u64,
        actual_size: u64,
    },

    #[error("cancelled during {stage}")]
    Cancelled { stage: &'static str },
}

/// Failure taxonomy callers dispatch on; every variant maps to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SchemaMismatch,
    EmptySource,
    InsufficientSpace,
    ManifestMalformed,
    ChunkMissing,
    ChunkIntegrity,
    ReconstructionIntegrity,
    Cancelled,
    InvalidInput,
    Io,
    Internal,
}

impl PartxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PartxError::Io { .. } => ErrorKind::Io,
            PartxError::InvalidOptions(_) | PartxError::OutputExists { .. } => {
                ErrorKind::InvalidInput
            }
            PartxError::SchemaMismatch { .. }
            | PartxError::RowShape { .. }
            | PartxError::UnterminatedQuote { .. }
            | PartxError::SchemaDrift { .. } => ErrorKind::SchemaMismatch,
            PartxError::EmptySource { .. } => ErrorKind::EmptySource,
            PartxError::InsufficientSpace { .. } => ErrorKind::InsufficientSpace,
            PartxError::ManifestMalformed(_) | PartxError::UnsupportedVersion { .. } => {
                ErrorKind::ManifestMalformed
            }
            PartxError::ManifestInvariant(_) => ErrorKind::Internal,
            PartxError::ChunkMissing { .. } => ErrorKind::ChunkMissing,
            PartxError::ChunkIntegrity { .. }
            | PartxError::ChunkSize { .. }
            | PartxError::ChunkRowCount { .. }
            | PartxError::HeaderDrift { .. } => ErrorKind::ChunkIntegrity,
            PartxError::ReconstructionIntegrity { .. } => ErrorKind::ReconstructionIntegrity,
            PartxError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PartxError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type SplitError = PartxError;
pub type MergeError = PartxError;
pub type VerificationError = PartxError;

// Convenient crate-wide result type
pub type Result<T> = std::result::Result<T, PartxError>;
