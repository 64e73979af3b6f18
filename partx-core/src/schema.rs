use crate::checksum::{Digest, Hasher};
use crate::error::{PartxError, Result};
use crate::rows::{RowInfo, RowReader, split_fields};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::debug;

/// Column layout derived from a header row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescriptor {
    pub columns: Vec<String>,
    /// SHA-256 over the column count and each length-prefixed name.
    pub fingerprint: Digest,
}

impl SchemaDescriptor {
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

pub fn fingerprint(columns: &[String]) -> Digest {
    let mut h = Hasher::new();
    h.update(&(columns.len() as u64).to_le_bytes());
    for c in columns {
        h.update(&(c.len() as u64).to_le_bytes());
        h.update(c.as_bytes());
    }
    h.finalize()
}

/// Check a header's field list against the expected column count.
pub fn validate(header: &[String], expected_columns: usize) -> Result<SchemaDescriptor> {
    if header.len() != expected_columns {
        return Err(PartxError::SchemaMismatch {
            expected: expected_columns,
            actual: header.len(),
        });
    }
    Ok(SchemaDescriptor {
        columns: header.to_vec(),
        fingerprint: fingerprint(header),
    })
}

/// Same as [`validate`], starting from the raw header bytes.
pub fn validate_raw(
    header_row: &[u8],
    expected_columns: usize,
    delimiter: u8,
) -> Result<SchemaDescriptor> {
    validate(&split_fields(header_row, delimiter), expected_columns)
}

/// `row` is the 1-based data row number (header excluded).
pub fn check_row(row: u64, info: &RowInfo, expected_columns: usize) -> Result<()> {
    if info.fields != expected_columns {
        return Err(PartxError::RowShape {
            row,
            expected: expected_columns,
            actual: info.fields,
        });
    }
    Ok(())
}

/// Validate the header and the first `sample_rows` data rows of a file
/// without producing any output.
pub fn inspect_file(
    path: &Path,
    expected_columns: usize,
    sample_rows: usize,
    delimiter: u8,
) -> Result<SchemaDescriptor> {
    let f = File::open(path).map_err(|e| PartxError::io(path, e))?;
    let mut rows = RowReader::new(BufReader::new(f), delimiter).with_origin(path);
    let mut buf = Vec::new();

    if rows.next_row(&mut buf)?.is_none() {
        return Err(PartxError::EmptySource {
            path: path.to_path_buf(),
            missing: "header row",
        });
    }
    let schema = validate_raw(&buf, expected_columns, delimiter)?;

    let mut seen = 0u64;
    while (seen as usize) < sample_rows {
        match rows.next_row(&mut buf)? {
            Some(info) => {
                seen += 1;
                check_row(seen, &info, expected_columns)?;
            }
            None => break,
        }
    }
    if seen == 0 && sample_rows > 0 {
        return Err(PartxError::EmptySource {
            path: path.to_path_buf(),
            missing: "data rows",
        });
    }
    debug!(
        path = %path.display(),
        columns = schema.column_count(),
        sampled = seen,
        "schema inspected"
    );
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Write;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn accepts_expected_width_and_fingerprints_names() {
        let s = validate(&cols(&["id", "val"]), 2).unwrap();
        assert_eq!(s.column_count(), 2);
        assert_eq!(s.fingerprint, fingerprint(&cols(&["id", "val"])));
        assert_ne!(s.fingerprint, fingerprint(&cols(&["id", "value"])));
        // length prefixes keep ["ab","c"] and ["a","bc"] apart
        assert_ne!(fingerprint(&cols(&["ab", "c"])), fingerprint(&cols(&["a", "bc"])));
    }

    #[test]
    fn rejects_wrong_width() {
        let err = validate(&cols(&["id", "val", "extra"]), 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
        match err {
            PartxError::SchemaMismatch { expected, actual } => {
                assert_eq!((expected, actual), (2, 3));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn width_is_a_parameter_not_a_constant() {
        let names: Vec<String> = (0..22).map(|i| format!("c{i}")).collect();
        assert!(validate(&names, 22).is_ok());
        assert!(validate(&names, 21).is_err());
    }

    #[test]
    fn inspect_reports_empty_and_bad_sample_rows() {
        let dir = tempfile::tempdir().unwrap();

        let empty = dir.path().join("empty.csv");
        File::create(&empty).unwrap();
        let err = inspect_file(&empty, 2, 8, b',').unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptySource);

        let header_only = dir.path().join("header.csv");
        File::create(&header_only).unwrap().write_all(b"id,val\n").unwrap();
        let err = inspect_file(&header_only, 2, 8, b',').unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptySource);

        let ragged = dir.path().join("ragged.csv");
        File::create(&ragged)
            .unwrap()
            .write_all(b"id,val\n1,a\n2,b,c\n")
            .unwrap();
        match inspect_file(&ragged, 2, 8, b',').unwrap_err() {
            PartxError::RowShape { row, actual, .. } => assert_eq!((row, actual), (2, 3)),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
