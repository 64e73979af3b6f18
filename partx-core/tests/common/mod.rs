#![allow(dead_code)]

use partx_core::rows::RowReader;
use std::fs;
use std::path::{Path, PathBuf};

pub const COLUMNS: usize = 22;

/// Header plus `rows` scenario rows over `cols` columns. Rows vary in length
/// and some carry quoted delimiters, escaped quotes and embedded newlines.
pub fn scenario_csv(rows: usize, cols: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let header: Vec<String> = (0..cols).map(|c| format!("col_{c}")).collect();
    out.extend_from_slice(header.join(",").as_bytes());
    out.push(b'\n');
    for r in 0..rows {
        let fields: Vec<String> = (0..cols)
            .map(|c| match (r + c) % 7 {
                0 => format!("\"step {r}, then {c}\""),
                1 => format!("\"multi\nline {r}\""),
                2 => format!("\"say \"\"{r}\"\"\""),
                3 => "x".repeat((r * 13 + c) % 40),
                _ => format!("{r}-{c}"),
            })
            .collect();
        out.extend_from_slice(fields.join(",").as_bytes());
        out.push(b'\n');
    }
    out
}

pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let p = dir.join(name);
    fs::write(&p, bytes).unwrap();
    p
}

/// Sorted file names in `dir`; empty when the directory does not exist.
pub fn list_dir(dir: &Path) -> Vec<String> {
    let Ok(rd) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = rd
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Raw rows of a CSV byte buffer (header included).
pub fn raw_rows(bytes: &[u8]) -> Vec<Vec<u8>> {
    let mut rr = RowReader::new(bytes, b',');
    let mut buf = Vec::new();
    let mut out = Vec::new();
    while rr.next_row(&mut buf).unwrap().is_some() {
        out.push(buf.clone());
    }
    out
}

/// Size of the header row plus the largest data row.
pub fn min_lossless_target(bytes: &[u8]) -> u64 {
    let rows = raw_rows(bytes);
    let header = rows[0].len() as u64;
    header + rows[1..].iter().map(|r| r.len() as u64).max().unwrap_or(0)
}
