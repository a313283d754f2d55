use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::error::{DeployError, Result};

pub const SUPPORTED_ALGORITHM: &str = "sha256";

/// Verify `path` against an `<algorithm>:<hex-digest>` descriptor.
///
/// An absent or blank descriptor is a no-op. Hex digits compare
/// case-insensitively.
pub fn verify_file(path: &Path, expected: Option<&str>) -> Result<()> {
    let Some(expected) = expected.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(());
    };

    let (algorithm, digest) = expected.split_once(':').ok_or_else(|| {
        DeployError::UnsupportedAlgorithm(format!("{expected} (expected '<algorithm>:<hex>')"))
    })?;
    if !algorithm.trim().eq_ignore_ascii_case(SUPPORTED_ALGORITHM) {
        return Err(DeployError::UnsupportedAlgorithm(algorithm.trim().to_string()));
    }

    let actual = sha256_file(path)?;
    let digest = digest.trim();
    if !actual.eq_ignore_ascii_case(digest) {
        return Err(DeployError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: digest.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Lowercase hex SHA-256 of the file's bytes.
pub fn sha256_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => DeployError::FileNotFound(path.to_path_buf()),
        _ => DeployError::Io(err),
    })?;
    Ok(sha256_hex(&bytes))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
