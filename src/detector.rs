//! Content fingerprints and per-path change tracking.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Buffer size for streaming file reads (8 KB).
const BUFFER_SIZE: usize = 8192;

/// SHA-256 digest of a file's bytes.
///
/// Only content contributes: the same bytes under a different name or with
/// different timestamps give the same fingerprint.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self::from_hasher(hasher)
    }

    pub fn of_reader<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; BUFFER_SIZE];

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(Self::from_hasher(hasher))
    }

    fn from_hasher(hasher: Sha256) -> Self {
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&hasher.finalize());
        Self(digest)
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Twelve hex digits are plenty to tell fingerprints apart in logs
        write!(f, "Fingerprint({}…)", &self.to_hex()[..12])
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Remembers the last recorded fingerprint of each watched path.
///
/// Keys are paths as given, so renaming a watched file starts its history over.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    fingerprints: HashMap<PathBuf, Fingerprint>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream the file through SHA-256.
    pub fn fingerprint(&self, path: &Path) -> io::Result<Fingerprint> {
        let file = File::open(path)?;
        Fingerprint::of_reader(BufReader::with_capacity(BUFFER_SIZE, file))
    }

    /// True when `path` was never recorded or was recorded with another fingerprint.
    pub fn has_changed(&self, path: &Path, fingerprint: &Fingerprint) -> bool {
        self.fingerprints.get(path) != Some(fingerprint)
    }

    pub fn record(&mut self, path: &Path, fingerprint: Fingerprint) {
        self.fingerprints.insert(path.to_path_buf(), fingerprint);
    }

    pub fn last_recorded(&self, path: &Path) -> Option<&Fingerprint> {
        self.fingerprints.get(path)
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_identical_bytes_give_equal_fingerprints() {
        let temp_dir = TempDir::new().unwrap();
        let first = temp_dir.path().join("first.xlsx");
        let second = temp_dir.path().join("second-name.xlsx");
        fs::write(&first, b"same content").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(&second, b"same content").unwrap();

        let detector = ChangeDetector::new();
        assert_eq!(
            detector.fingerprint(&first).unwrap(),
            detector.fingerprint(&second).unwrap()
        );
    }

    #[test]
    fn test_single_byte_difference_changes_fingerprint() {
        assert_ne!(
            Fingerprint::of_bytes(b"quarterly-report-v1"),
            Fingerprint::of_bytes(b"quarterly-report-v2")
        );
    }

    #[test]
    fn test_streaming_matches_in_memory_digest() {
        let data = vec![7u8; BUFFER_SIZE * 3 + 17];
        let streamed = Fingerprint::of_reader(&data[..]).unwrap();
        assert_eq!(streamed, Fingerprint::of_bytes(&data));
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            Fingerprint::of_bytes(b"").to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_first_observation_counts_as_change() {
        let mut detector = ChangeDetector::new();
        let path = Path::new("/reports/A.xlsx");
        let fp = Fingerprint::of_bytes(b"v1");

        assert!(detector.has_changed(path, &fp));
        detector.record(path, fp);
        assert!(!detector.has_changed(path, &fp));
        assert!(detector.has_changed(path, &Fingerprint::of_bytes(b"v2")));
    }

    #[test]
    fn test_record_overwrites_previous_entry() {
        let mut detector = ChangeDetector::new();
        let path = Path::new("/reports/A.xlsx");
        detector.record(path, Fingerprint::of_bytes(b"v1"));
        detector.record(path, Fingerprint::of_bytes(b"v2"));

        assert_eq!(detector.len(), 1);
        assert_eq!(detector.last_recorded(path), Some(&Fingerprint::of_bytes(b"v2")));
    }

    #[test]
    fn test_rename_resets_history() {
        let temp_dir = TempDir::new().unwrap();
        let original = temp_dir.path().join("A.xlsx");
        let renamed = temp_dir.path().join("A-renamed.xlsx");
        fs::write(&original, b"content").unwrap();

        let mut detector = ChangeDetector::new();
        let fp = detector.fingerprint(&original).unwrap();
        detector.record(&original, fp);

        fs::rename(&original, &renamed).unwrap();
        let fp_after = detector.fingerprint(&renamed).unwrap();

        assert_eq!(fp, fp_after);
        assert!(detector.has_changed(&renamed, &fp_after));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let detector = ChangeDetector::new();
        assert!(detector.fingerprint(Path::new("/definitely/not/here.xlsx")).is_err());
    }
}
