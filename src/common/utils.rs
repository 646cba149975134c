//! Utility functions for monsync

use sha1::{Digest, Sha1};
use std::time::{SystemTime, UNIX_EPOCH};

/// Length of a SHA-1 digest
pub const SHA1_LEN: usize = 20;

/// Get current Unix timestamp (seconds)
pub fn timestamp_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Compute SHA-1 of data
pub fn sha1_bytes(data: &[u8]) -> [u8; SHA1_LEN] {
    let digest = Sha1::digest(data);
    let mut out = [0u8; SHA1_LEN];
    out.copy_from_slice(&digest);
    out
}
