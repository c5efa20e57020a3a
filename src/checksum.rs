//! Content checksums
//!
//! Every tracked file is addressed by the SHA256 of its bytes. The socket's
//! aggregate checksum hashes the per-file checksums in path order so that it
//! changes whenever any file does.

use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Hex SHA256 of a byte slice.
pub fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Hash over already computed checksums, in the order given.
pub fn aggregate<S: AsRef<str>>(checksums: &[S]) -> String {
    let mut hasher = Sha256::new();
    for checksum in checksums {
        hasher.update(checksum.as_ref().as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Hex SHA256 of a file, streamed in 8KB chunks.
pub fn file_digest<P: AsRef<Path>>(path: P) -> Result<String> {
    let mut file = File::open(path.as_ref())?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Compare a file against an expected checksum (case-insensitive).
pub fn verify_file<P: AsRef<Path>>(path: P, expected: &str) -> Result<()> {
    if expected.is_empty() {
        return Err(Error::Other("Empty checksum".to_string()));
    }

    let computed = file_digest(path)?;
    if computed.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(Error::Other(format!(
            "Checksum mismatch!\nExpected: {}\nComputed: {}",
            expected, computed
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_digest_known_value() {
        assert_eq!(
            digest(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_aggregate_depends_on_order() {
        assert_ne!(aggregate(&["a", "b"]), aggregate(&["b", "a"]));
        assert_eq!(aggregate(&["a", "b"]), aggregate(&["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_verify_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        file.flush().unwrap();

        let expected = digest(b"hello world");
        assert!(verify_file(file.path(), &expected).is_ok());
        assert!(verify_file(file.path(), &expected.to_uppercase()).is_ok());

        let result = verify_file(file.path(), "deadbeef");
        assert!(result.is_err(), "Mismatched checksum should fail");
        assert!(result.unwrap_err().to_string().contains("Checksum mismatch"));
    }

    #[test]
    fn test_verify_file_empty_checksum() {
        let file = NamedTempFile::new().unwrap();
        assert!(verify_file(file.path(), "").is_err());
    }
}
