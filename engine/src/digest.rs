//! Content digest primitive.
//!
//! A single fixed algorithm (BLAKE2b, 512-bit output) streamed in 32 KiB
//! chunks, matching the chunk size the original tooling this design traces
//! to used for the same purpose.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use blake2::{Blake2b512, Digest};

use crate::error::{Error, Result};

const CHUNK_SIZE: usize = 32 * 1024;

/// Compute the hex-encoded BLAKE2b-512 digest of a file's content.
pub fn digest_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut hasher = Blake2b512::new();
    let mut buf = [0u8; CHUNK_SIZE];

    loop {
        let n = file.read(&mut buf).map_err(|e| Error::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}
