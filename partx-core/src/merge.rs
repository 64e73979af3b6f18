//! Verified reconstruction of a source file from its parts.
//!
//! A merge attempt walks `Parsed → ChunksVerified → Concatenated →
//! ReconstructionVerified`; any failure ends it. Chunk checksums are verified
//! (optionally in parallel) before a single byte is assembled, assembly runs
//! strictly in index order, and the output only appears under its final name
//! once its whole-file digest matches the manifest.

use crate::checksum::{Digest, HashingReader, HashingWriter, checksum};
use crate::config::MergeOptions;
use crate::error::{PartxError, Result};
use crate::manifest::{ChunkMeta, Manifest};
use crate::progress::{Flow, ProgressSink, Reporter, Stage};
use crate::rows::RowReader;
use crate::schema::{check_row, validate_raw};
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

const IO_BLOCK: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    Parsed,
    ChunksVerified,
    Concatenated,
    ReconstructionVerified,
}

#[derive(Debug, Clone)]
pub struct MergeReport {
    pub state: MergeState,
    pub manifest_path: PathBuf,
    /// `None` in verify-only mode.
    pub output_path: Option<PathBuf>,
    pub verify_only: bool,
    pub chunks_verified: u32,
    pub rows_written: u64,
    pub bytes_written: u64,
    pub checksum: Digest,
    pub parts_removed: bool,
}

pub type VerificationReport = MergeReport;

pub fn merge(
    manifest_path: &Path,
    output_path: &Path,
    verify_only: bool,
    progress: Option<&mut dyn ProgressSink>,
) -> Result<MergeReport> {
    let opts = MergeOptions {
        verify_only,
        ..Default::default()
    };
    merge_with(manifest_path, Some(output_path), &opts, progress)
}

/// Check every part and the reconstructed digest without writing output.
pub fn verify(manifest_path: &Path) -> Result<VerificationReport> {
    merge_with(manifest_path, None, &MergeOptions::verify_only(), None)
}

pub fn merge_with(
    manifest_path: &Path,
    output_path: Option<&Path>,
    opts: &MergeOptions,
    progress: Option<&mut dyn ProgressSink>,
) -> Result<MergeReport> {
    opts.validate()?;
    let output_path = match (opts.verify_only, output_path) {
        (true, _) => None,
        (false, Some(p)) => Some(p),
        (false, None) => {
            return Err(PartxError::InvalidOptions(
                "an output path is required unless verify_only is set".into(),
            ));
        }
    };

    let manifest = Manifest::read_from(manifest_path)?;
    let dir = manifest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    info!(
        manifest = %manifest_path.display(),
        parts = manifest.total_chunks,
        rows = manifest.total_rows,
        verify_only = opts.verify_only,
        "merge started"
    );

    let mut attempt = MergeAttempt {
        manifest_path,
        dir,
        manifest,
        opts,
        state: MergeState::Parsed,
        reporter: Reporter::new(progress, Stage::Verify),
    };
    let result = attempt.run(output_path);
    if let Err(e) = &result {
        warn!(state = ?attempt.state, error = %e, "merge failed");
    }
    result
}

struct MergeAttempt<'a, 'p> {
    manifest_path: &'a Path,
    dir: PathBuf,
    manifest: Manifest,
    opts: &'a MergeOptions,
    state: MergeState,
    reporter: Reporter<'p>,
}

struct Assembled {
    checksum: Digest,
    bytes: u64,
    rows: u64,
}

impl MergeAttempt<'_, '_> {
    fn advance(&mut self, next: MergeState) {
        debug!(from = ?self.state, to = ?next, "merge state");
        self.state = next;
    }

    fn part_path(&self, c: &ChunkMeta) -> PathBuf {
        self.dir.join(&c.filename)
    }

    fn run(&mut self, output_path: Option<&Path>) -> Result<MergeReport> {
        if let Some(out) = output_path {
            self.check_output_target(out)?;
        }

        self.verify_chunks()?;
        self.check_schema()?;
        self.advance(MergeState::ChunksVerified);

        self.reporter.set_stage(Stage::Assemble);
        let (assembled, staged) = match output_path {
            None => (self.assemble(io::sink(), Path::new("<sink>"))?, None),
            Some(out) => {
                let parent = match out.parent() {
                    Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                    _ => PathBuf::from("."),
                };
                fs::create_dir_all(&parent).map_err(|e| PartxError::io(&parent, e))?;
                // dropped (and deleted) on every early return below
                let mut tmp =
                    NamedTempFile::new_in(&parent).map_err(|e| PartxError::io(&parent, e))?;
                let assembled = self.assemble(tmp.as_file_mut(), out)?;
                (assembled, Some(tmp))
            }
        };
        self.advance(MergeState::Concatenated);

        if assembled.checksum != self.manifest.original_checksum
            || assembled.bytes != self.manifest.original_size
        {
            return Err(PartxError::ReconstructionIntegrity {
                expected: self.manifest.original_checksum,
                actual: assembled.checksum,
                expected_size: self.manifest.original_size,
                actual_size: assembled.bytes,
            });
        }

        let mut parts_removed = false;
        if let (Some(tmp), Some(out)) = (staged, output_path) {
            tmp.as_file()
                .sync_all()
                .map_err(|e| PartxError::io(tmp.path(), e))?;
            tmp.persist(out)
                .map_err(|e| PartxError::io(out, e.error))?;
            // the output is in place; cleanup failures are only logged
            if self.opts.remove_parts_on_success {
                parts_removed = self.remove_parts();
            }
        }
        self.advance(MergeState::ReconstructionVerified);

        info!(
            manifest = %self.manifest_path.display(),
            output = ?output_path.map(Path::display).map(|d| d.to_string()),
            rows = assembled.rows,
            bytes = assembled.bytes,
            checksum = %assembled.checksum,
            "merge verified"
        );
        Ok(MergeReport {
            state: self.state,
            manifest_path: self.manifest_path.to_path_buf(),
            output_path: output_path.map(Path::to_path_buf),
            verify_only: self.opts.verify_only,
            chunks_verified: self.manifest.total_chunks,
            rows_written: assembled.rows,
            bytes_written: assembled.bytes,
            checksum: assembled.checksum,
            parts_removed,
        })
    }

    /// The output must not be one of the artifacts it is rebuilt from.
    fn check_output_target(&self, out: &Path) -> Result<()> {
        let inputs = std::iter::once(self.manifest_path.to_path_buf())
            .chain(self.manifest.chunks.iter().map(|c| self.part_path(c)));
        let out_canon = fs::canonicalize(out).ok();
        for p in inputs {
            let same = p == out
                || matches!((&out_canon, fs::canonicalize(&p)), (Some(a), Ok(b)) if *a == b);
            if same {
                return Err(PartxError::InvalidOptions(format!(
                    "output {} would overwrite merge input {}",
                    out.display(),
                    p.display()
                )));
            }
        }
        Ok(())
    }

    fn verify_chunks(&mut self) -> Result<()> {
        let parallel = self.opts.parallel_verify;
        let pool = match self.opts.verify_threads {
            Some(n) if parallel => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| PartxError::InvalidOptions(format!("verify pool: {e}")))?,
            ),
            _ => None,
        };
        let batch = if parallel {
            pool.as_ref()
                .map(|p| p.current_num_threads())
                .unwrap_or_else(rayon::current_num_threads)
                .max(1)
        } else {
            1
        };

        let total = self.manifest.chunks.len() as u64;
        let mut done = 0u64;
        for group in self.manifest.chunks.chunks(batch) {
            let dir = self.dir.as_path();
            let results: Vec<Result<()>> = if parallel {
                let run = || {
                    group
                        .par_iter()
                        .map(|c| verify_chunk(dir, c))
                        .collect::<Vec<_>>()
                };
                match &pool {
                    Some(p) => p.install(run),
                    None => run(),
                }
            } else {
                group.iter().map(|c| verify_chunk(dir, c)).collect()
            };
            // results are in index order, so the lowest failing index wins
            for r in results {
                r?;
            }
            done += group.len() as u64;
            let msg = format!("verified {done}/{total} parts");
            if self.reporter.report(done, total, msg) == Flow::Stop {
                return Err(PartxError::Cancelled { stage: "verify" });
            }
        }
        Ok(())
    }

    /// Chunk 1's header must still describe the schema the manifest recorded.
    fn check_schema(&self) -> Result<()> {
        let first = &self.manifest.chunks[0];
        let path = self.part_path(first);
        let mut f = open_part(first, &path)?;
        let head = read_header(first, &path, &mut f, self.header_len()?)?;
        let delimiter = self.delimiter()?;
        let schema = validate_raw(&head, self.manifest.column_count, delimiter)?;
        if schema.fingerprint != self.manifest.schema_fingerprint {
            return Err(PartxError::SchemaDrift {
                expected: self.manifest.schema_fingerprint,
                actual: schema.fingerprint,
            });
        }
        if let Some(expected) = self.opts.expected_columns {
            if expected != schema.column_count() {
                return Err(PartxError::SchemaMismatch {
                    expected,
                    actual: schema.column_count(),
                });
            }
        }
        Ok(())
    }

    fn assemble<W: Write>(&mut self, sink: W, out_path: &Path) -> Result<Assembled> {
        let header_len = self.header_len()?;
        let delimiter = self.delimiter()?;
        let columns = self.manifest.column_count;
        let total_rows = self.manifest.total_rows;
        let out_err = |e: io::Error| PartxError::io(out_path, e);

        let mut out = HashingWriter::new(BufWriter::with_capacity(IO_BLOCK, sink));
        let mut header: Vec<u8> = Vec::new();
        let mut row_buf = Vec::new();
        let mut rows_written = 0u64;

        for c in &self.manifest.chunks {
            let path = self.dir.join(&c.filename);
            let f = open_part(c, &path)?;
            let mut reader = BufReader::with_capacity(IO_BLOCK, HashingReader::new(f));

            let head = read_header(c, &path, &mut reader, header_len)?;
            if c.index == 1 {
                out.write_all(&head).map_err(out_err)?;
                header = head;
            } else if head != header {
                return Err(PartxError::HeaderDrift { index: c.index });
            }

            let rows = if self.opts.revalidate_rows {
                let mut rr = RowReader::new(&mut reader, delimiter).with_origin(&path);
                let mut n = 0u64;
                while let Some(info) = rr.next_row(&mut row_buf)? {
                    n += 1;
                    check_row(rows_written + n, &info, columns)?;
                    out.write_all(&row_buf).map_err(out_err)?;
                }
                n
            } else {
                io::copy(&mut reader, &mut out).map_err(|e| PartxError::io(&path, e))?;
                c.row_count
            };

            // the part may have changed since it was verified
            let (actual, len) = reader.into_inner().finalize();
            check_chunk(c, actual, len)?;
            if rows != c.row_count {
                return Err(PartxError::ChunkRowCount {
                    index: c.index,
                    expected: c.row_count,
                    actual: rows,
                });
            }
            rows_written += rows;
            debug!(part = %c.filename, rows, "part assembled");

            let msg = format!("assembled {}", c.filename);
            if self.reporter.report(rows_written, total_rows, msg) == Flow::Stop {
                return Err(PartxError::Cancelled { stage: "assemble" });
            }
        }

        out.flush().map_err(out_err)?;
        let (_, checksum, bytes) = out.into_parts();
        Ok(Assembled {
            checksum,
            bytes,
            rows: rows_written,
        })
    }

    /// Best effort. The manifest goes only when every part went, so leftovers
    /// stay describable. Returns true when everything was removed.
    fn remove_parts(&self) -> bool {
        let mut all = true;
        for c in &self.manifest.chunks {
            let path = self.part_path(c);
            if let Err(e) = fs::remove_file(&path) {
                warn!(part = %path.display(), error = %e, "could not remove part");
                all = false;
            }
        }
        if !all {
            warn!(manifest = %self.manifest_path.display(), "keeping manifest, some parts remain");
            return false;
        }
        if let Err(e) = fs::remove_file(self.manifest_path) {
            warn!(manifest = %self.manifest_path.display(), error = %e, "could not remove manifest");
            return false;
        }
        debug!(manifest = %self.manifest_path.display(), "parts removed");
        true
    }

    fn header_len(&self) -> Result<usize> {
        usize::try_from(self.manifest.header_size)
            .map_err(|_| PartxError::ManifestMalformed("header_size too large".into()))
    }

    fn delimiter(&self) -> Result<u8> {
        crate::config::delimiter_byte(self.manifest.delimiter)
            .map_err(|e| PartxError::ManifestMalformed(e.to_string()))
    }
}

fn open_part(c: &ChunkMeta, path: &Path) -> Result<File> {
    File::open(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            PartxError::ChunkMissing {
                index: c.index,
                path: path.to_path_buf(),
            }
        } else {
            PartxError::io(path, e)
        }
    })
}

fn size_mismatch(c: &ChunkMeta, actual: u64) -> PartxError {
    PartxError::ChunkSize {
        index: c.index,
        filename: c.filename.clone(),
        expected: c.size,
        actual,
    }
}

/// Digest first, then length.
fn check_chunk(c: &ChunkMeta, actual: Digest, len: u64) -> Result<()> {
    if actual != c.checksum {
        return Err(PartxError::ChunkIntegrity {
            index: c.index,
            filename: c.filename.clone(),
            expected: c.checksum,
            actual,
        });
    }
    if len != c.size {
        return Err(size_mismatch(c, len));
    }
    Ok(())
}

/// Read the `header_len` leading bytes of a part. The length comes from the
/// manifest, so it is bounded by the part's real size before allocating.
fn read_header<R: Read>(
    c: &ChunkMeta,
    path: &Path,
    reader: &mut R,
    header_len: usize,
) -> Result<Vec<u8>> {
    let on_disk = fs::metadata(path)
        .map_err(|e| PartxError::io(path, e))?
        .len();
    if on_disk < header_len as u64 {
        return Err(size_mismatch(c, on_disk));
    }
    let mut head = vec![0u8; header_len];
    reader
        .read_exact(&mut head)
        .map_err(|e| PartxError::io(path, e))?;
    Ok(head)
}

fn verify_chunk(dir: &Path, c: &ChunkMeta) -> Result<()> {
    let path = dir.join(&c.filename);
    let f = open_part(c, &path)?;
    // size before hashing
    let on_disk = f.metadata().map_err(|e| PartxError::io(&path, e))?.len();
    if on_disk != c.size {
        return Err(size_mismatch(c, on_disk));
    }
    let (actual, len) = checksum(f).map_err(|e| PartxError::io(&path, e))?;
    check_chunk(c, actual, len)?;
    debug!(part = %c.filename, "part verified");
    Ok(())
}
