mod common;

use common::{COLUMNS, list_dir, min_lossless_target, scenario_csv, write_file};
use partx_core::progress::{Flow, ProgressUpdate};
use partx_core::store::{FsStore, PartFile, PartStore};
use partx_core::{ErrorKind, PartxError, SplitOptions, split, split_with};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::tempdir;

/// Filesystem store that runs out of space after `budget` bytes, or refuses
/// to create files whose name ends with `refuse_suffix`.
struct FullDisk {
    budget: Arc<AtomicU64>,
    refuse_suffix: Option<&'static str>,
}

impl FullDisk {
    fn after(bytes: u64) -> Self {
        Self {
            budget: Arc::new(AtomicU64::new(bytes)),
            refuse_suffix: None,
        }
    }

    fn refusing(suffix: &'static str) -> Self {
        Self {
            budget: Arc::new(AtomicU64::new(u64::MAX)),
            refuse_suffix: Some(suffix),
        }
    }
}

fn storage_full() -> io::Error {
    io::Error::new(io::ErrorKind::StorageFull, "no space left on device")
}

struct Budgeted {
    inner: Box<dyn PartFile>,
    budget: Arc<AtomicU64>,
}

impl Write for Budgeted {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let left = self.budget.load(Ordering::SeqCst);
        if left == 0 {
            return Err(storage_full());
        }
        let n = buf.len().min(usize::try_from(left).unwrap_or(usize::MAX));
        let written = self.inner.write(&buf[..n])?;
        self.budget.fetch_sub(written as u64, Ordering::SeqCst);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl PartFile for Budgeted {
    fn sync(&mut self) -> io::Result<()> {
        self.inner.sync()
    }
}

impl PartStore for FullDisk {
    fn create_dir_all(&self, dir: &Path) -> io::Result<()> {
        FsStore.create_dir_all(dir)
    }

    fn create_new(&self, path: &Path) -> io::Result<Box<dyn PartFile>> {
        if let Some(suffix) = self.refuse_suffix {
            if path.to_string_lossy().ends_with(suffix) {
                return Err(storage_full());
            }
        }
        let inner = FsStore.create_new(path)?;
        Ok(Box::new(Budgeted {
            inner,
            budget: Arc::clone(&self.budget),
        }))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        FsStore.rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        FsStore.remove_file(path)
    }

    fn exists(&self, path: &Path) -> bool {
        FsStore.exists(path)
    }
}

#[test]
fn wrong_column_count_writes_nothing() {
    let dir = tempdir().unwrap();
    let src = write_file(dir.path(), "three.csv", b"a,b,c\n1,2,3\n");
    let out = dir.path().join("parts");

    let err = split(&src, 1024, &out, 2, None).unwrap_err();
    assert!(matches!(
        err,
        PartxError::SchemaMismatch {
            expected: 2,
            actual: 3
        }
    ));
    assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
    assert!(list_dir(&out).is_empty());
}

#[test]
fn ragged_row_past_the_sample_window_cleans_up() {
    let dir = tempdir().unwrap();
    let mut data = scenario_csv(200, COLUMNS);
    data.extend_from_slice(b"only,three,fields\n");
    let src = write_file(dir.path(), "ragged.csv", &data);
    let out = dir.path().join("parts");

    let err = split(&src, min_lossless_target(&data), &out, COLUMNS, None).unwrap_err();
    assert!(matches!(
        err,
        PartxError::RowShape {
            row: 201,
            actual: 3,
            ..
        }
    ));
    assert!(list_dir(&out).is_empty());
}

#[test]
fn empty_and_header_only_sources_are_rejected() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("parts");

    let empty = write_file(dir.path(), "empty.csv", b"");
    let err = split(&empty, 1024, &out, 2, None).unwrap_err();
    assert!(matches!(err, PartxError::EmptySource { missing: "header row", .. }));

    let header_only = write_file(dir.path(), "header.csv", b"id,val\n");
    let err = split(&header_only, 1024, &out, 2, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmptySource);
    assert!(list_dir(&out).is_empty());
}

#[test]
fn unterminated_quote_is_a_schema_failure() {
    let dir = tempdir().unwrap();
    let src = write_file(dir.path(), "open.csv", b"id,val\n1,\"never closed\n2,b\n");
    let err = split(&src, 1024, &dir.path().join("parts"), 2, None).unwrap_err();
    // physical row numbering counts the header as row 1
    assert!(matches!(err, PartxError::UnterminatedQuote { row: 2 }));
    assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
}

#[test]
fn zero_target_is_invalid() {
    let dir = tempdir().unwrap();
    let src = write_file(dir.path(), "tiny.csv", b"id,val\n1,a\n");
    let err = split(&src, 0, &dir.path().join("parts"), 2, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(!dir.path().join("parts").exists());
}

#[test]
fn running_out_of_space_removes_every_part() {
    let dir = tempdir().unwrap();
    let data = scenario_csv(100, COLUMNS);
    let src = write_file(dir.path(), "scenarios.csv", &data);
    let out = dir.path().join("parts");
    let opts = SplitOptions::new(min_lossless_target(&data), COLUMNS);

    let store = FullDisk::after(data.len() as u64 / 2);
    let err = split_with(&store, &src, &out, &opts, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientSpace, "{err}");
    assert!(list_dir(&out).is_empty(), "left: {:?}", list_dir(&out));
}

#[test]
fn failed_manifest_write_removes_parts() {
    let dir = tempdir().unwrap();
    let src = write_file(dir.path(), "tiny.csv", b"id,val\n1,a\n2,b\n3,c\n");
    let out = dir.path().join("parts");

    let store = FullDisk::refusing(".tmp");
    let err = split_with(&store, &src, &out, &SplitOptions::new(11, 2), None).unwrap_err();
    assert!(matches!(err, PartxError::InsufficientSpace { .. }));
    assert!(list_dir(&out).is_empty());
}

#[test]
fn cancelling_at_the_first_boundary_cleans_up() {
    let dir = tempdir().unwrap();
    let data = scenario_csv(100, COLUMNS);
    let src = write_file(dir.path(), "scenarios.csv", &data);
    let out = dir.path().join("parts");

    let mut calls = 0;
    let mut stop = |_: &ProgressUpdate| {
        calls += 1;
        Flow::Stop
    };
    let err = split(&src, min_lossless_target(&data), &out, COLUMNS, Some(&mut stop)).unwrap_err();
    assert!(matches!(err, PartxError::Cancelled { stage: "split" }));
    assert_eq!(calls, 1);
    assert!(list_dir(&out).is_empty());
}

#[test]
fn existing_manifest_is_left_alone() {
    let dir = tempdir().unwrap();
    let src = write_file(dir.path(), "tiny.csv", b"id,val\n1,a\n");
    let out = dir.path().join("parts");
    fs::create_dir_all(&out).unwrap();
    write_file(&out, "tiny.manifest.json", b"{}");

    let err = split(&src, 1024, &out, 2, None).unwrap_err();
    assert!(matches!(err, PartxError::OutputExists { .. }));
    assert_eq!(list_dir(&out), vec!["tiny.manifest.json"]);
    assert_eq!(fs::read(out.join("tiny.manifest.json")).unwrap(), b"{}");
}

#[test]
fn colliding_part_is_not_overwritten() {
    let dir = tempdir().unwrap();
    let src = write_file(dir.path(), "tiny.csv", b"id,val\n1,a\n2,b\n3,c\n");
    let out = dir.path().join("parts");
    fs::create_dir_all(&out).unwrap();
    write_file(&out, "tiny.part02.csv", b"keep me\n");

    let err = split(&src, 11, &out, 2, None).unwrap_err();
    assert!(matches!(err, PartxError::OutputExists { .. }));
    assert_eq!(list_dir(&out), vec!["tiny.part02.csv"]);
    assert_eq!(fs::read(out.join("tiny.part02.csv")).unwrap(), b"keep me\n");
}
