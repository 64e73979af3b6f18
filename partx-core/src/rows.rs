//! Byte-exact row framing over a CSV-like stream.
//!
//! A row ends at a `\n` that is not inside a quoted field. The terminator (and
//! a preceding `\r`, if any) stays part of the row's bytes so that writing the
//! rows back out reproduces the input exactly.
//!
//! A field is quoted only when its first byte is `"`. Inside it `""` is an
//! escaped quote and a lone `"` closes it. A `"` anywhere else is literal data,
//! so `5" pipe` or `b"c` never opens a quoted run.

use crate::error::{PartxError, Result};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

const QUOTE: u8 = b'"';

/// Position within the current field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Start,
    Unquoted,
    Quoted,
    /// Saw `"` inside a quoted field: either the close or half of `""`.
    QuoteInQuoted,
}

enum Emit {
    Byte,
    Nothing,
    FieldEnd,
}

impl Field {
    fn step(self, b: u8, delimiter: u8) -> (Field, Emit) {
        match self {
            Field::Start if b == QUOTE => (Field::Quoted, Emit::Nothing),
            Field::Start | Field::Unquoted | Field::QuoteInQuoted if b == delimiter => {
                (Field::Start, Emit::FieldEnd)
            }
            Field::Start | Field::Unquoted => (Field::Unquoted, Emit::Byte),
            Field::Quoted if b == QUOTE => (Field::QuoteInQuoted, Emit::Nothing),
            Field::Quoted => (Field::Quoted, Emit::Byte),
            Field::QuoteInQuoted if b == QUOTE => (Field::Quoted, Emit::Byte),
            Field::QuoteInQuoted => (Field::Unquoted, Emit::Byte),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowInfo {
    /// Number of fields (delimiters outside quoted fields + 1).
    pub fields: usize,
    /// Row length in bytes, terminator included.
    pub len: usize,
}

pub struct RowReader<R: BufRead> {
    inner: R,
    delimiter: u8,
    rows: u64,
    origin: PathBuf,
}

impl<R: BufRead> RowReader<R> {
    pub fn new(inner: R, delimiter: u8) -> Self {
        Self {
            inner,
            delimiter,
            rows: 0,
            origin: PathBuf::from("<stream>"),
        }
    }

    /// Path reported in I/O errors.
    pub fn with_origin(mut self, path: &Path) -> Self {
        self.origin = path.to_path_buf();
        self
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Read the next row into `buf` (cleared first). `Ok(None)` at EOF.
    pub fn next_row(&mut self, buf: &mut Vec<u8>) -> Result<Option<RowInfo>> {
        buf.clear();
        let mut fields = 1usize;
        let mut state = Field::Start;
        loop {
            let start = buf.len();
            let n = read_line(&mut self.inner, buf)
                .map_err(|e| PartxError::io(&self.origin, e))?;
            if n == 0 {
                break;
            }
            for &b in &buf[start..] {
                let (next, emit) = state.step(b, self.delimiter);
                if let Emit::FieldEnd = emit {
                    fields += 1;
                }
                state = next;
            }
            if state != Field::Quoted || buf.last() != Some(&b'\n') {
                break;
            }
            // newline inside a quoted field: the row continues
        }
        if buf.is_empty() {
            return Ok(None);
        }
        self.rows += 1;
        if state == Field::Quoted {
            return Err(PartxError::UnterminatedQuote { row: self.rows });
        }
        Ok(Some(RowInfo {
            fields,
            len: buf.len(),
        }))
    }
}

fn read_line<R: BufRead>(r: &mut R, buf: &mut Vec<u8>) -> io::Result<usize> {
    loop {
        match r.read_until(b'\n', buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Strip a trailing `\n` / `\r\n` from a raw row.
pub fn trim_terminator(row: &[u8]) -> &[u8] {
    let row = row.strip_suffix(b"\n").unwrap_or(row);
    row.strip_suffix(b"\r").unwrap_or(row)
}

/// Split a raw row into unquoted field values.
pub fn split_fields(row: &[u8], delimiter: u8) -> Vec<String> {
    let row = trim_terminator(row);
    let mut out = Vec::new();
    let mut field = Vec::new();
    let mut state = Field::Start;
    for &b in row {
        let (next, emit) = state.step(b, delimiter);
        match emit {
            Emit::Byte => field.push(b),
            Emit::Nothing => {}
            Emit::FieldEnd => {
                out.push(String::from_utf8_lossy(&field).into_owned());
                field.clear();
            }
        }
        state = next;
    }
    out.push(String::from_utf8_lossy(&field).into_owned());
    out
}
