//! Content fingerprinting for cache keys.

use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::core::CoreResult;

const CHUNK_SIZE: usize = 64 * 1024;

/// SHA-256 of the file contents, hex encoded.
///
/// Two files with the same bytes get the same fingerprint regardless of
/// their path or modification time.
pub fn content_fingerprint(path: &Path) -> CoreResult<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}
