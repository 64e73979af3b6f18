//! Streaming SHA-256 digests for part files and whole source/reconstructed files.
//!
//! Memory use is one I/O block regardless of input size. The adapters let a
//! digest ride along with a write or read that has to happen anyway, so parts
//! are hashed as they are written and the source as it is streamed.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

const IO_BLOCK: usize = 1 << 16;

/// A 256-bit SHA-256 digest. Serialized as 64 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.len() != 64 {
            return Err(format!("expected 64 hex chars, got {}", s.len()));
        }
        if s.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err("digest hex must be lowercase".to_string());
        }
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out).map_err(|e| format!("invalid hex: {e}"))?;
        Ok(Digest(out))
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Incremental hasher that also counts the bytes fed to it.
#[derive(Clone, Default)]
pub struct Hasher {
    inner: Sha256,
    len: u64,
}

impl Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, buf: &[u8]) {
        self.inner.update(buf);
        self.len += buf.len() as u64;
    }

    pub fn byte_count(&self) -> u64 {
        self.len
    }

    pub fn finalize(self) -> Digest {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.inner.finalize());
        Digest(out)
    }
}

/// Digest of everything readable from `r`.
pub fn checksum<R: Read>(mut r: R) -> io::Result<(Digest, u64)> {
    let mut hasher = Hasher::new();
    let mut buf = vec![0u8; IO_BLOCK];
    loop {
        let n = match r.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    let len = hasher.byte_count();
    Ok((hasher.finalize(), len))
}

pub fn checksum_bytes(buf: &[u8]) -> Digest {
    let mut h = Hasher::new();
    h.update(buf);
    h.finalize()
}

/// Write adapter that hashes every byte the inner writer accepts.
pub struct HashingWriter<W: Write> {
    inner: W,
    hasher: Hasher,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Hasher::new(),
        }
    }

    pub fn into_parts(self) -> (W, Digest, u64) {
        let len = self.hasher.byte_count();
        (self.inner, self.hasher.finalize(), len)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let k = self.inner.write(buf)?;
        // only the accepted prefix reaches the digest
        self.hasher.update(&buf[..k]);
        Ok(k)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Read adapter that hashes every byte handed out to the caller.
pub struct HashingReader<R: Read> {
    inner: R,
    hasher: Hasher,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Hasher::new(),
        }
    }

    pub fn finalize(self) -> (Digest, u64) {
        let len = self.hasher.byte_count();
        (self.hasher.finalize(), len)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABC: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn known_vector() {
        assert_eq!(checksum_bytes(b"abc").to_hex(), ABC);
        let (d, n) = checksum(&b"abc"[..]).unwrap();
        assert_eq!(d.to_hex(), ABC);
        assert_eq!(n, 3);
    }

    #[test]
    fn streaming_matches_one_shot_across_block_boundaries() {
        let data: Vec<u8> = (0..(IO_BLOCK * 3 + 17)).map(|i| (i % 251) as u8).collect();
        let (d, n) = checksum(&data[..]).unwrap();
        assert_eq!(d, checksum_bytes(&data));
        assert_eq!(n, data.len() as u64);
    }

    #[test]
    fn adapters_hash_what_passes_through() {
        let mut w = HashingWriter::new(Vec::new());
        w.write_all(b"id,val\n").unwrap();
        w.write_all(b"1,a\n").unwrap();
        let (buf, d, n) = w.into_parts();
        assert_eq!(buf, b"id,val\n1,a\n");
        assert_eq!(d, checksum_bytes(b"id,val\n1,a\n"));
        assert_eq!(n, 11);

        let mut r = HashingReader::new(&b"id,val\n1,a\n"[..]);
        let mut sink = Vec::new();
        r.read_to_end(&mut sink).unwrap();
        assert_eq!(r.finalize().0, d);
    }

    #[test]
    fn digest_hex_round_trip_and_rejects_bad_input() {
        let d: Digest = ABC.parse().unwrap();
        assert_eq!(d.to_string(), ABC);
        assert!("abc".parse::<Digest>().is_err());
        assert!(ABC.to_uppercase().parse::<Digest>().is_err());
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, format!("\"{ABC}\""));
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
