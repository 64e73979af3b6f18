use crate::checksum::HashingReader;
use crate::checksum::HashingWriter;
use crate::config::SplitOptions;
use crate::error::{PartxError, Result};
use crate::manifest::{
    ChunkMeta, Manifest, SourceSummary, manifest_filename, part_filename,
};
use crate::plan::{ChunkPlanner, Placement};
use crate::progress::{Flow, ProgressSink, Reporter, Stage};
use crate::rows::RowReader;
use crate::schema::{check_row, inspect_file, validate_raw};
use crate::store::{FsStore, PartFile, PartStore};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

const IO_BLOCK: usize = 1 << 16;

/// Result of a successful split: where the manifest landed and what it says.
#[derive(Debug, Clone)]
pub struct ManifestHandle {
    pub path: PathBuf,
    pub manifest: Manifest,
}

impl ManifestHandle {
    pub fn part_paths(&self) -> Vec<PathBuf> {
        let dir = self.path.parent().unwrap_or(Path::new(""));
        self.manifest
            .chunks
            .iter()
            .map(|c| dir.join(&c.filename))
            .collect()
    }
}

pub fn split(
    source: &Path,
    target_chunk_bytes: u64,
    output_dir: &Path,
    expected_columns: usize,
    progress: Option<&mut dyn ProgressSink>,
) -> Result<ManifestHandle> {
    let opts = SplitOptions::new(target_chunk_bytes, expected_columns);
    split_with(&FsStore, source, output_dir, &opts, progress)
}

/// Split `source` into self-contained parts plus a manifest under `output_dir`.
///
/// On any failure (including cancellation) every artifact this call created
/// is removed again; pre-existing files are never overwritten.
pub fn split_with(
    store: &dyn PartStore,
    source: &Path,
    output_dir: &Path,
    opts: &SplitOptions,
    progress: Option<&mut dyn ProgressSink>,
) -> Result<ManifestHandle> {
    opts.validate()?;
    let delimiter = opts.delimiter_byte()?;
    let source_name = source
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            PartxError::InvalidOptions(format!(
                "source {} has no UTF-8 file name",
                source.display()
            ))
        })?
        .to_string();

    // header + sample rows are checked before anything is written
    let inspected = inspect_file(source, opts.expected_columns, opts.sample_rows, delimiter)?;

    store
        .create_dir_all(output_dir)
        .map_err(|e| write_err(output_dir, e))?;
    let manifest_path = output_dir.join(manifest_filename(&source_name));
    if store.exists(&manifest_path) {
        return Err(PartxError::OutputExists {
            path: manifest_path,
        });
    }

    let source_size = fs::metadata(source)
        .map_err(|e| PartxError::io(source, e))?
        .len();
    let file = File::open(source).map_err(|e| PartxError::io(source, e))?;
    let mut rows = RowReader::new(
        BufReader::with_capacity(IO_BLOCK, HashingReader::new(file)),
        delimiter,
    )
    .with_origin(source);

    info!(
        source = %source.display(),
        out = %output_dir.display(),
        target = opts.target_chunk_bytes,
        size = source_size,
        "split started"
    );

    let mut cleanup = Cleanup::new(store);
    let mut reporter = Reporter::new(progress, Stage::Split);
    let mut buf = Vec::new();

    if rows.next_row(&mut buf)?.is_none() {
        return Err(PartxError::EmptySource {
            path: source.to_path_buf(),
            missing: "header row",
        });
    }
    let header = buf.clone();
    let schema = validate_raw(&header, opts.expected_columns, delimiter)?;
    if schema.fingerprint != inspected.fingerprint {
        return Err(PartxError::SchemaDrift {
            expected: inspected.fingerprint,
            actual: schema.fingerprint,
        });
    }
    let header_size = header.len() as u64;

    let mut planner = ChunkPlanner::new(opts.target_chunk_bytes, header_size);
    let mut chunks: Vec<ChunkMeta> = Vec::new();
    let mut current: Option<PartWriter> = None;
    let mut data_rows = 0u64;
    let mut processed = header_size;

    while let Some(row) = rows.next_row(&mut buf)? {
        data_rows += 1;
        check_row(data_rows, &row, opts.expected_columns)?;

        if planner.place(row.len as u64) == Placement::NewChunk {
            if let Some(part) = current.take() {
                let meta = part.finish()?;
                let estimate = estimate_rows(data_rows - 1, processed, header_size, source_size);
                let msg = format!("wrote {} ({} rows)", meta.filename, meta.row_count);
                chunks.push(meta);
                if reporter.report(data_rows - 1, estimate, msg) == Flow::Stop {
                    info!(source = %source.display(), "split cancelled");
                    return Err(PartxError::Cancelled { stage: "split" });
                }
            }
        }

        if current.is_none() {
            let index = u32::try_from(chunks.len() + 1)
                .map_err(|_| PartxError::InvalidOptions("more than u32::MAX parts".into()))?;
            let filename = part_filename(&source_name, index);
            let path = output_dir.join(&filename);
            let mut part = PartWriter::create(store, index, filename, path, &mut cleanup)?;
            part.write(&header)?;
            current = Some(part);
        }
        if let Some(part) = current.as_mut() {
            part.write(&buf)?;
            part.rows += 1;
        }
        if planner.over_target() {
            warn!(
                row = data_rows,
                row_bytes = row.len,
                target = opts.target_chunk_bytes,
                "row exceeds target chunk size; placed in its own part"
            );
        }
        processed += row.len as u64;
    }

    let Some(last) = current.take() else {
        return Err(PartxError::EmptySource {
            path: source.to_path_buf(),
            missing: "data rows",
        });
    };
    chunks.push(last.finish()?);

    let (original_checksum, original_size) = rows.into_inner().into_inner().finalize();
    if original_size != source_size {
        return Err(PartxError::io(
            source,
            io::Error::other(format!(
                "source changed during split: {source_size} bytes at start, {original_size} read"
            )),
        ));
    }

    if reporter.report(
        data_rows,
        data_rows,
        format!("{} parts written", chunks.len()),
    ) == Flow::Stop
    {
        return Err(PartxError::Cancelled { stage: "split" });
    }

    let created = opts
        .stamp_created
        .then(|| OffsetDateTime::now_utc().unix_timestamp());
    let manifest = Manifest::build(
        chunks,
        &schema,
        SourceSummary {
            name: source_name,
            size: original_size,
            checksum: original_checksum,
            header_size,
            delimiter: opts.delimiter,
        },
        opts.target_chunk_bytes,
        created,
    )?;
    write_manifest(store, &manifest, &manifest_path, &mut cleanup)?;
    cleanup.disarm();

    info!(
        manifest = %manifest_path.display(),
        parts = manifest.total_chunks,
        rows = manifest.total_rows,
        checksum = %manifest.original_checksum,
        "split finished"
    );
    Ok(ManifestHandle {
        path: manifest_path,
        manifest,
    })
}

/// Rows-so-far extrapolated over the bytes still to come.
fn estimate_rows(rows: u64, processed: u64, header_size: u64, source_size: u64) -> u64 {
    let done = processed.saturating_sub(header_size);
    let total = source_size.saturating_sub(header_size);
    if done == 0 || total <= done {
        return rows;
    }
    let est = (rows as u128 * total as u128).div_ceil(done as u128);
    u64::try_from(est).unwrap_or(u64::MAX)
}

fn write_err(path: &Path, e: io::Error) -> PartxError {
    PartxError::InsufficientSpace {
        path: path.to_path_buf(),
        source: e,
    }
}

fn create_err(path: &Path, e: io::Error) -> PartxError {
    if e.kind() == io::ErrorKind::AlreadyExists {
        PartxError::OutputExists {
            path: path.to_path_buf(),
        }
    } else {
        write_err(path, e)
    }
}

fn write_manifest(
    store: &dyn PartStore,
    manifest: &Manifest,
    final_path: &Path,
    cleanup: &mut Cleanup<'_>,
) -> Result<()> {
    let bytes = manifest.to_json_bytes()?;
    let mut tmp = final_path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    if store.exists(&tmp) {
        // leftover from an interrupted run
        store.remove_file(&tmp).map_err(|e| write_err(&tmp, e))?;
    }

    let mut f = store.create_new(&tmp).map_err(|e| create_err(&tmp, e))?;
    cleanup.track(tmp.clone());
    f.write_all(&bytes).map_err(|e| write_err(&tmp, e))?;
    f.flush().map_err(|e| write_err(&tmp, e))?;
    f.sync().map_err(|e| write_err(&tmp, e))?;
    drop(f);

    if store.exists(final_path) {
        return Err(PartxError::OutputExists {
            path: final_path.to_path_buf(),
        });
    }
    store
        .rename(&tmp, final_path)
        .map_err(|e| write_err(final_path, e))?;
    cleanup.retarget(&tmp, final_path.to_path_buf());
    Ok(())
}

struct PartWriter {
    index: u32,
    filename: String,
    path: PathBuf,
    out: HashingWriter<BufWriter<Box<dyn PartFile>>>,
    rows: u64,
}

impl PartWriter {
    fn create(
        store: &dyn PartStore,
        index: u32,
        filename: String,
        path: PathBuf,
        cleanup: &mut Cleanup<'_>,
    ) -> Result<Self> {
        let f = store.create_new(&path).map_err(|e| create_err(&path, e))?;
        cleanup.track(path.clone());
        Ok(Self {
            index,
            filename,
            path,
            out: HashingWriter::new(BufWriter::with_capacity(IO_BLOCK, f)),
            rows: 0,
        })
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.out
            .write_all(bytes)
            .map_err(|e| write_err(&self.path, e))
    }

    fn finish(mut self) -> Result<ChunkMeta> {
        self.out.flush().map_err(|e| write_err(&self.path, e))?;
        let (w, checksum, size) = self.out.into_parts();
        let mut f = w
            .into_inner()
            .map_err(|e| write_err(&self.path, e.into_error()))?;
        f.sync().map_err(|e| write_err(&self.path, e))?;
        debug!(part = %self.filename, size, rows = self.rows, %checksum, "part closed");
        Ok(ChunkMeta {
            index: self.index,
            filename: self.filename,
            size,
            row_count: self.rows,
            checksum,
        })
    }
}

/// Removes every tracked artifact on drop unless disarmed.
struct Cleanup<'a> {
    store: &'a dyn PartStore,
    paths: Vec<PathBuf>,
    armed: bool,
}

impl<'a> Cleanup<'a> {
    fn new(store: &'a dyn PartStore) -> Self {
        Self {
            store,
            paths: Vec::new(),
            armed: true,
        }
    }

    fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    fn retarget(&mut self, from: &Path, to: PathBuf) {
        if let Some(p) = self.paths.iter_mut().find(|p| p.as_path() == from) {
            *p = to;
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for Cleanup<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for p in self.paths.iter().rev() {
            match self.store.remove_file(p) {
                Ok(()) => debug!(path = %p.display(), "removed partial output"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %p.display(), error = %e, "could not remove partial output"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_extrapolates_and_never_undercounts_done_rows() {
        assert_eq!(estimate_rows(10, 7 + 40, 7, 7 + 400), 100);
        assert_eq!(estimate_rows(10, 7 + 40, 7, 7 + 40), 10);
        assert_eq!(estimate_rows(0, 7, 7, 1000), 0);
        assert_eq!(estimate_rows(3, 7 + 10, 7, 7 + 11), 4);
    }
}
