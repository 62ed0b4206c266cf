//! SHA-256 integrity check for downloaded artifacts.

use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use tracing::{info, warn};

/// Hex SHA-256 of a file, streamed in 8 KiB chunks
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// True iff the file's digest equals `expected_hex` (case-insensitive).
///
/// An empty or non-hex expectation never verifies.
pub fn verify(path: &Path, expected_hex: &str) -> bool {
    let expected = expected_hex.trim().to_ascii_lowercase();
    if expected.len() != 64 || hex::decode(&expected).is_err() {
        warn!("expected digest {:?} is not a SHA-256 hex string", expected_hex);
        return false;
    }

    match sha256_file(path) {
        Ok(actual) if actual == expected => true,
        Ok(actual) => {
            warn!(
                "checksum mismatch for {}: expected {}, got {}",
                path.display(),
                expected,
                actual
            );
            false
        }
        Err(e) => {
            warn!("cannot hash {}: {}", path.display(), e);
            false
        }
    }
}

/// Verify, deleting the artifact on failure so it can never be extracted
pub fn verify_or_discard(path: &Path, expected_hex: &str) -> bool {
    if verify(path, expected_hex) {
        return true;
    }
    match fs::remove_file(path) {
        Ok(()) => info!("discarded unverified artifact {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("failed to discard {}: {}", path.display(), e),
    }
    false
}
