use std::path::{Path, PathBuf};

use partx_core::error::Result;
use partx_core::progress::{Flow, ProgressUpdate};
use partx_core::store::{Backend, open_store};
use partx_core::{Manifest, MergeOptions, MergeReport, PartxConfig, merge_with, split_with};
use tracing::info;

fn load_config(path: Option<&Path>) -> Result<PartxConfig> {
    match path {
        Some(p) => PartxConfig::from_json_file(p),
        None => Ok(PartxConfig::default()),
    }
}

fn log_progress(u: &ProgressUpdate) -> Flow {
    info!(stage = %u.stage, done = u.done, total = u.total, "{}", u.message);
    Flow::Continue
}

#[allow(clippy::too_many_arguments)]
pub fn handle_split(
    source: PathBuf,
    out: PathBuf,
    chunk_size: Option<u64>,
    columns: Option<usize>,
    delimiter: Option<char>,
    sample_rows: Option<usize>,
    stamp_created: bool,
    config: Option<PathBuf>,
) -> Result<()> {
    let mut opts = load_config(config.as_deref())?.split;
    if let Some(n) = chunk_size {
        opts.target_chunk_bytes = n;
    }
    if let Some(n) = columns {
        opts.expected_columns = n;
    }
    if let Some(d) = delimiter {
        opts.delimiter = d;
    }
    if let Some(n) = sample_rows {
        opts.sample_rows = n;
    }
    opts.stamp_created |= stamp_created;

    let store = open_store(Backend::Fs);
    let mut progress = log_progress;
    let handle = split_with(store.as_ref(), &source, &out, &opts, Some(&mut progress))?;

    let m = &handle.manifest;
    println!("{}", handle.path.display());
    println!(
        "{} parts, {} rows, {} bytes, sha256 {}",
        m.total_chunks, m.total_rows, m.original_size, m.original_checksum
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn handle_merge(
    manifest: PathBuf,
    output: PathBuf,
    verify_only: bool,
    no_parallel: bool,
    threads: Option<usize>,
    no_revalidate: bool,
    columns: Option<usize>,
    remove_parts: bool,
    config: Option<PathBuf>,
) -> Result<()> {
    let mut opts = load_config(config.as_deref())?.merge;
    opts.verify_only |= verify_only;
    if no_parallel {
        opts.parallel_verify = false;
    }
    if threads.is_some() {
        opts.verify_threads = threads;
    }
    if no_revalidate {
        opts.revalidate_rows = false;
    }
    if columns.is_some() {
        opts.expected_columns = columns;
    }
    opts.remove_parts_on_success |= remove_parts;

    let mut progress = log_progress;
    let report = merge_with(&manifest, Some(output.as_path()), &opts, Some(&mut progress))?;
    if report.verify_only {
        print_verified(&report);
    } else {
        println!("{}", output.display());
        println!(
            "{} rows, {} bytes, sha256 {}",
            report.rows_written, report.bytes_written, report.checksum
        );
        if report.parts_removed {
            println!("removed {} parts and the manifest", report.chunks_verified);
        } else if opts.remove_parts_on_success {
            println!("some parts could not be removed; the manifest was kept");
        }
    }
    Ok(())
}

pub fn handle_verify(manifest: PathBuf) -> Result<()> {
    let mut progress = log_progress;
    let opts = MergeOptions::verify_only();
    let report = merge_with(&manifest, None, &opts, Some(&mut progress))?;
    print_verified(&report);
    Ok(())
}

fn print_verified(report: &MergeReport) {
    println!("verify: OK");
    println!(
        "{} parts, {} rows, {} bytes, sha256 {}",
        report.chunks_verified, report.rows_written, report.bytes_written, report.checksum
    );
}

pub fn handle_inspect(manifest: PathBuf) -> Result<()> {
    let m = Manifest::read_from(&manifest)?;
    println!(
        "source   {} ({} bytes, {} rows)",
        m.source_name, m.original_size, m.total_rows
    );
    println!("sha256   {}", m.original_checksum);
    println!(
        "schema   {} columns, header {} bytes, fingerprint {}",
        m.column_count, m.header_size, m.schema_fingerprint
    );
    println!("target   {} bytes per part, {} parts", m.target_chunk_bytes, m.total_chunks);
    if let Some(t) = m.created {
        println!("created  {t}");
    }
    for c in &m.chunks {
        println!(
            "#{:<5} file={:<32} size={:<12} rows={:<10} sha256={}",
            c.index, c.filename, c.size, c.row_count, c.checksum
        );
    }
    Ok(())
}
