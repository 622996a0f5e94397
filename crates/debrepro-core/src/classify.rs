//! Outcome classification.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::domain::{Checksum, Classification};

/// Computed hash and the resulting verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub computed_hash: Option<Checksum>,
    pub classification: Classification,
}

/// Compare a computed hash against the reference.
pub fn verdict(computed: Option<&Checksum>, expected: Option<&Checksum>) -> Classification {
    match (computed, expected) {
        (Some(computed), Some(expected)) if computed == expected => Classification::Match,
        (Some(_), Some(_)) => Classification::Differ,
        _ => Classification::Fail,
    }
}

/// Hash the artifact at `artifact` and classify it against `expected`.
///
/// A missing or unreadable artifact is `Fail` with no hash.
pub fn classify(artifact: Option<&Path>, expected: Option<&Checksum>) -> Verdict {
    let computed_hash = artifact.and_then(|path| match sha256_file(path) {
        Ok(hash) => Some(hash),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to hash artifact");
            None
        }
    });
    let classification = verdict(computed_hash.as_ref(), expected);
    Verdict {
        computed_hash,
        classification,
    }
}

/// Streamed SHA-256 of a file.
pub fn sha256_file(path: &Path) -> io::Result<Checksum> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Checksum::from_digest(&hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    // sha256("hello\n")
    const HELLO: &str = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";

    fn sum(s: &str) -> Checksum {
        Checksum::parse(s).unwrap()
    }

    #[test]
    fn test_verdict_table() {
        let abc = sum("abc123");
        let def = sum("def456");
        assert_eq!(verdict(Some(&abc), Some(&abc)), Classification::Match);
        assert_eq!(verdict(Some(&def), Some(&abc)), Classification::Differ);
        assert_eq!(verdict(None, Some(&abc)), Classification::Fail);
        assert_eq!(verdict(Some(&abc), None), Classification::Fail);
        assert_eq!(verdict(None, None), Classification::Fail);
    }

    #[test]
    fn test_verdict_ignores_case() {
        assert_eq!(
            verdict(Some(&sum("ABC123")), Some(&sum("abc123"))),
            Classification::Match
        );
    }

    #[test]
    fn test_classify_match() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hello.deb");
        std::fs::write(&path, b"hello\n").unwrap();

        let v = classify(Some(&path), Some(&sum(HELLO)));
        assert_eq!(v.classification, Classification::Match);
        assert_eq!(v.computed_hash.unwrap().as_str(), HELLO);
    }

    #[test]
    fn test_classify_differ() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hello.deb");
        std::fs::write(&path, b"hello\n").unwrap();

        let v = classify(Some(&path), Some(&sum("abc123")));
        assert_eq!(v.classification, Classification::Differ);
        assert_eq!(v.computed_hash.unwrap().as_str(), HELLO);
    }

    #[test]
    fn test_classify_is_repeatable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.deb");
        std::fs::write(&path, vec![7u8; 200_000]).unwrap();
        let expected = sum("abc123");
        let first = classify(Some(&path), Some(&expected));
        let second = classify(Some(&path), Some(&expected));
        assert_eq!(first, second);
    }

    #[test]
    fn test_classify_missing_artifact() {
        let dir = tempdir().unwrap();
        let v = classify(Some(&dir.path().join("missing.deb")), Some(&sum(HELLO)));
        assert_eq!(v.classification, Classification::Fail);
        assert!(v.computed_hash.is_none());

        let v = classify(None, Some(&sum(HELLO)));
        assert_eq!(v.classification, Classification::Fail);
    }

    #[test]
    fn test_classify_without_reference_keeps_hash() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hello.deb");
        std::fs::write(&path, b"hello\n").unwrap();
        let v = classify(Some(&path), None);
        assert_eq!(v.classification, Classification::Fail);
        assert!(v.computed_hash.is_some());
    }
}
