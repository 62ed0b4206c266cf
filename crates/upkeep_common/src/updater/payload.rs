//! Locate the payload root inside an extracted package.
//!
//! Accepted shapes:
//! - `<staging>/app`
//! - `<staging>/<wrapper>/app` (one wrapper directory, as tarballs often have)

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the payload directory inside a package
pub const PAYLOAD_DIR: &str = "app";

pub fn locate(staging: &Path) -> Option<PathBuf> {
    let direct = staging.join(PAYLOAD_DIR);
    if direct.is_dir() {
        return Some(direct);
    }

    let mut wrappers: Vec<PathBuf> = fs::read_dir(staging)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    // read_dir order is unspecified; "first match" must be stable
    wrappers.sort();

    let found = wrappers
        .into_iter()
        .map(|w| w.join(PAYLOAD_DIR))
        .find(|candidate| candidate.is_dir());

    match &found {
        Some(p) => debug!("payload root at {}", p.display()),
        None => debug!("no payload root under {}", staging.display()),
    }
    found
}
