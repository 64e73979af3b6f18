use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Split large CSV files into verified, row-aligned parts and merge them back",
    long_about = None
)]
pub struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Split a CSV file into self-contained parts plus a manifest
    Split {
        source: PathBuf,

        /// Directory receiving the parts and the manifest
        #[arg(long)]
        out: PathBuf,

        /// Soft cap per part, header included (accepts K/M/G suffixes)
        #[arg(long = "chunk-size", value_parser = parse_size)]
        chunk_size: Option<u64>,

        /// Required column count of the header and every row
        #[arg(long)]
        columns: Option<usize>,

        #[arg(long)]
        delimiter: Option<char>,

        /// Data rows checked before anything is written
        #[arg(long = "sample-rows")]
        sample_rows: Option<usize>,

        /// Record the creation time in the manifest
        #[arg(long = "stamp-created")]
        stamp_created: bool,

        /// JSON file with `split`/`merge` defaults; flags override it
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Verify every part and rebuild the original file
    Merge {
        manifest: PathBuf,
        output: PathBuf,

        /// Run every check without writing the output
        #[arg(long = "verify-only")]
        verify_only: bool,

        /// Verify part checksums one at a time
        #[arg(long = "no-parallel")]
        no_parallel: bool,

        /// Fixed size of the verification thread pool
        #[arg(long)]
        threads: Option<usize>,

        /// Copy part bodies without re-framing rows
        #[arg(long = "no-revalidate")]
        no_revalidate: bool,

        /// Expected column count of the reconstructed file
        #[arg(long)]
        columns: Option<usize>,

        /// Delete the parts and the manifest after a verified merge
        #[arg(long = "remove-parts")]
        remove_parts: bool,

        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Check every part and the reconstructed checksum; writes nothing
    Verify { manifest: PathBuf },

    /// Print a manifest's chunk table
    Inspect { manifest: PathBuf },
}

/// Byte count with an optional binary suffix: `4096`, `512K`, `64M`, `1G`.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let t = s.trim();
    let (digits, shift) = match t.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => {
            let shift = match c.to_ascii_uppercase() {
                'K' => 10,
                'M' => 20,
                'G' => 30,
                _ => return Err(format!("unknown size suffix {c:?} in {s:?}")),
            };
            (&t[..i], shift)
        }
        _ => (t, 0),
    };
    let n: u64 = digits
        .trim()
        .parse()
        .map_err(|e| format!("invalid size {s:?}: {e}"))?;
    n.checked_mul(1u64 << shift)
        .ok_or_else(|| format!("size {s:?} overflows u64"))
}
