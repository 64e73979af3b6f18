//! Reconstruction metadata, stored as `<basename>.manifest.json` next to the parts.
//!
//! The per-chunk list is the ground truth; `total_rows`, `total_chunks` and
//! `original_size` are redundant aggregates that are recomputed and compared
//! on every parse. Unknown fields are ignored so later versions can add
//! fields without a `format_version` bump.

use crate::checksum::Digest;
use crate::config::delimiter_byte;
use crate::error::{PartxError, Result};
use crate::schema::{SchemaDescriptor, fingerprint};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

pub const FORMAT_VERSION: u32 = 1;
pub const TOOL: &str = concat!("partx-core/", env!("CARGO_PKG_VERSION"));

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChunkMeta {
    /// 1-based, gapless.
    pub index: u32,
    /// Bare file name, resolved against the manifest's directory.
    pub filename: String,
    /// On-disk size, header included.
    pub size: u64,
    pub row_count: u64,
    pub checksum: Digest,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub format_version: u32,
    #[serde(default)]
    pub tool: String,
    pub source_name: String,
    pub schema_fingerprint: Digest,
    pub columns: Vec<String>,
    pub column_count: usize,
    /// Byte length of the header row repeated at the top of every part.
    pub header_size: u64,
    pub delimiter: char,
    pub target_chunk_bytes: u64,
    pub original_size: u64,
    pub original_checksum: Digest,
    pub total_rows: u64,
    pub total_chunks: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    pub chunks: Vec<ChunkMeta>,
}

/// Facts about the source file gathered while streaming it.
#[derive(Debug, Clone)]
pub struct SourceSummary {
    pub name: String,
    pub size: u64,
    pub checksum: Digest,
    pub header_size: u64,
    pub delimiter: char,
}

impl Manifest {
    /// Assemble a manifest from split results. Any invariant failure here is
    /// a splitter bug and surfaces as [`PartxError::ManifestInvariant`].
    pub fn build(
        chunks: Vec<ChunkMeta>,
        schema: &SchemaDescriptor,
        source: SourceSummary,
        target_chunk_bytes: u64,
        created: Option<i64>,
    ) -> Result<Manifest> {
        let total_rows = chunks.iter().map(|c| c.row_count).sum();
        let total_chunks = u32::try_from(chunks.len())
            .map_err(|_| PartxError::ManifestInvariant("too many chunks".into()))?;
        let m = Manifest {
            format_version: FORMAT_VERSION,
            tool: TOOL.to_string(),
            source_name: source.name,
            schema_fingerprint: schema.fingerprint,
            columns: schema.columns.clone(),
            column_count: schema.column_count(),
            header_size: source.header_size,
            delimiter: source.delimiter,
            target_chunk_bytes,
            original_size: source.size,
            original_checksum: source.checksum,
            total_rows,
            total_chunks,
            created,
            chunks,
        };
        m.check().map_err(PartxError::ManifestInvariant)?;
        Ok(m)
    }

    pub fn parse(bytes: &[u8]) -> Result<Manifest> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| PartxError::ManifestMalformed(format!("not valid JSON: {e}")))?;
        let version = value
            .get("format_version")
            .ok_or_else(|| PartxError::ManifestMalformed("missing field `format_version`".into()))?
            .as_u64()
            .ok_or_else(|| {
                PartxError::ManifestMalformed("`format_version` must be an integer".into())
            })?;
        if version != u64::from(FORMAT_VERSION) {
            return Err(PartxError::UnsupportedVersion {
                found: u32::try_from(version).unwrap_or(u32::MAX),
                supported: FORMAT_VERSION,
            });
        }

        let mut m: Manifest = serde_json::from_value(value)
            .map_err(|e| PartxError::ManifestMalformed(e.to_string()))?;
        // document order is not trusted; the index field is
        m.chunks.sort_by_key(|c| c.index);
        m.check().map_err(PartxError::ManifestMalformed)?;
        Ok(m)
    }

    pub fn read_from(path: &Path) -> Result<Manifest> {
        let bytes = std::fs::read(path).map_err(|e| PartxError::io(path, e))?;
        Self::parse(&bytes)
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        let mut out = serde_json::to_vec_pretty(self)
            .map_err(|e| PartxError::ManifestInvariant(format!("serialize: {e}")))?;
        out.push(b'\n');
        Ok(out)
    }

    /// Sum of part sizes implied by the aggregates: each part repeats the header.
    pub fn expected_parts_size(&self) -> Option<u64> {
        let extra_headers = u64::from(self.total_chunks.checked_sub(1)?);
        self.original_size
            .checked_add(extra_headers.checked_mul(self.header_size)?)
    }

    fn check(&self) -> std::result::Result<(), String> {
        if self.format_version != FORMAT_VERSION {
            return Err(format!("format_version {}", self.format_version));
        }
        if self.chunks.is_empty() {
            return Err("no chunks".into());
        }
        if self.total_chunks as usize != self.chunks.len() {
            return Err(format!(
                "total_chunks {} but {} chunk records",
                self.total_chunks,
                self.chunks.len()
            ));
        }
        if self.header_size == 0 {
            return Err("header_size is 0".into());
        }
        if self.column_count != self.columns.len() {
            return Err(format!(
                "column_count {} but {} column names",
                self.column_count,
                self.columns.len()
            ));
        }
        if fingerprint(&self.columns) != self.schema_fingerprint {
            return Err("schema_fingerprint does not match columns".into());
        }
        delimiter_byte(self.delimiter).map_err(|e| e.to_string())?;

        let mut names = HashSet::new();
        let mut rows = 0u64;
        let mut size = 0u64;
        for (pos, c) in self.chunks.iter().enumerate() {
            let want = pos as u64 + 1;
            if u64::from(c.index) != want {
                return Err(format!(
                    "chunk indices must be 1..{} without gaps or duplicates (found {} at position {want})",
                    self.chunks.len(),
                    c.index
                ));
            }
            if !is_plain_filename(&c.filename) {
                return Err(format!("chunk {}: unsafe filename {:?}", c.index, c.filename));
            }
            if !names.insert(c.filename.as_str()) {
                return Err(format!("chunk {}: duplicate filename {:?}", c.index, c.filename));
            }
            if c.row_count == 0 {
                return Err(format!("chunk {}: row_count is 0", c.index));
            }
            if c.size <= self.header_size {
                return Err(format!(
                    "chunk {}: size {} leaves no room for rows after a {}-byte header",
                    c.index, c.size, self.header_size
                ));
            }
            rows = rows
                .checked_add(c.row_count)
                .ok_or("row count overflow")?;
            size = size.checked_add(c.size).ok_or("size overflow")?;
        }
        if rows != self.total_rows {
            return Err(format!(
                "chunk row counts sum to {rows}, total_rows is {}",
                self.total_rows
            ));
        }
        let expected = self.expected_parts_size().ok_or("size overflow")?;
        if size != expected {
            return Err(format!(
                "chunk sizes sum to {size}, expected {expected} \
                 (original_size {} + {} repeated headers of {} bytes)",
                self.original_size,
                self.total_chunks - 1,
                self.header_size
            ));
        }
        Ok(())
    }
}

fn is_plain_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
        && !Path::new(name).is_absolute()
}

/// Split a source file name into the stem and optional extension used for
/// derived names: `data.csv` → (`data`, `Some("csv")`).
pub fn name_parts(source_name: &str) -> (&str, Option<&str>) {
    match source_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, Some(ext)),
        _ => (source_name, None),
    }
}

pub fn part_filename(source_name: &str, index: u32) -> String {
    match name_parts(source_name) {
        (stem, Some(ext)) => format!("{stem}.part{index:02}.{ext}"),
        (stem, None) => format!("{stem}.part{index:02}"),
    }
}

pub fn manifest_filename(source_name: &str) -> String {
    format!("{}.manifest.json", name_parts(source_name).0)
}
