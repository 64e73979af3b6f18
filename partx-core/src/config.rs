use crate::error::{PartxError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_TARGET_CHUNK_BYTES: u64 = 64 * 1024 * 1024;
/// Column count of the scenario dataset the tool was first built for.
pub const DEFAULT_EXPECTED_COLUMNS: usize = 22;
pub const DEFAULT_SAMPLE_ROWS: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SplitOptions {
    /// Soft ceiling on each part's byte size, header included.
    pub target_chunk_bytes: u64,
    pub expected_columns: usize,
    /// Single ASCII field separator.
    pub delimiter: char,
    /// Data rows checked before any output is written.
    pub sample_rows: usize,
    /// Record a creation timestamp in the manifest. Re-splits are then no
    /// longer byte-identical.
    pub stamp_created: bool,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            target_chunk_bytes: DEFAULT_TARGET_CHUNK_BYTES,
            expected_columns: DEFAULT_EXPECTED_COLUMNS,
            delimiter: ',',
            sample_rows: DEFAULT_SAMPLE_ROWS,
            stamp_created: false,
        }
    }
}

impl SplitOptions {
    pub fn new(target_chunk_bytes: u64, expected_columns: usize) -> Self {
        Self {
            target_chunk_bytes,
            expected_columns,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_chunk_bytes == 0 {
            return Err(PartxError::InvalidOptions(
                "target_chunk_bytes must be > 0".into(),
            ));
        }
        if self.expected_columns == 0 {
            return Err(PartxError::InvalidOptions(
                "expected_columns must be > 0".into(),
            ));
        }
        delimiter_byte(self.delimiter)?;
        Ok(())
    }

    pub fn delimiter_byte(&self) -> Result<u8> {
        delimiter_byte(self.delimiter)
    }
}

pub(crate) fn delimiter_byte(c: char) -> Result<u8> {
    if !c.is_ascii() || matches!(c, '"' | '\r' | '\n') {
        return Err(PartxError::InvalidOptions(format!(
            "delimiter {c:?} must be a single ASCII byte other than quote or newline"
        )));
    }
    Ok(c as u8)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MergeOptions {
    /// Run every check but discard the reconstructed bytes.
    pub verify_only: bool,
    /// Verify chunk checksums on a rayon pool.
    pub parallel_verify: bool,
    /// Fixed pool size; `None` uses rayon's global pool.
    pub verify_threads: Option<usize>,
    /// Re-frame rows during assembly and check row and column counts.
    pub revalidate_rows: bool,
    /// Merge-time schema expectation, checked against chunk 1's header.
    pub expected_columns: Option<usize>,
    /// Delete the parts and the manifest once the output is verified and in place.
    pub remove_parts_on_success: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            verify_only: false,
            parallel_verify: true,
            verify_threads: None,
            revalidate_rows: true,
            expected_columns: None,
            remove_parts_on_success: false,
        }
    }
}

impl MergeOptions {
    pub fn verify_only() -> Self {
        Self {
            verify_only: true,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.verify_threads == Some(0) {
            return Err(PartxError::InvalidOptions(
                "verify_threads must be > 0".into(),
            ));
        }
        if self.expected_columns == Some(0) {
            return Err(PartxError::InvalidOptions(
                "expected_columns must be > 0".into(),
            ));
        }
        if self.verify_only && self.remove_parts_on_success {
            return Err(PartxError::InvalidOptions(
                "remove_parts_on_success requires a real merge".into(),
            ));
        }
        Ok(())
    }
}

/// File-level defaults, e.g. `{"split": {"target_chunk_bytes": 1048576}}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartxConfig {
    pub split: SplitOptions,
    pub merge: MergeOptions,
}

impl PartxConfig {
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let cfg: PartxConfig = serde_json::from_slice(bytes)
            .map_err(|e| PartxError::InvalidOptions(format!("config: {e}")))?;
        cfg.split.validate()?;
        cfg.merge.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| PartxError::io(path, e))?;
        Self::from_json_slice(&bytes)
    }
}
