//! Atomic (write-temp-then-rename) persistence for shared local state files.
//!
//! The daemon state file and `settings.json` are read concurrently by any
//! number of CLI invocations while a single daemon may be rewriting them
//! (heartbeat, shutdown). Writers always go through [`write_json_atomic`] so
//! readers never observe a torn write; readers that hit a parse failure
//! should treat the file as stale rather than propagating the error (see
//! [`read_json_tolerant`]).

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{CoreError, CoreResult};

/// Serialize `value` to JSON and write it to `path` atomically.
///
/// Writes to a sibling temp file in the same directory (so the final
/// rename is same-filesystem and therefore atomic on POSIX) then renames
/// it over `path`.
///
/// # Errors
///
/// Returns [`CoreError::Io`] if the temp file cannot be created/written or
/// the rename fails.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> CoreResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|source| CoreError::Io {
        path: parent.display().to_string(),
        source,
    })?;

    let tmp_name = format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("state"),
        std::process::id()
    );
    let tmp_path = parent.join(tmp_name);

    let body = serde_json::to_vec_pretty(value).map_err(|source| CoreError::Corrupt {
        path: path.display().to_string(),
        source,
    })?;

    std::fs::write(&tmp_path, &body).map_err(|source| CoreError::Io {
        path: tmp_path.display().to_string(),
        source,
    })?;

    std::fs::rename(&tmp_path, path).map_err(|source| CoreError::Io {
        path: path.display().to_string(),
        source,
    })?;

    Ok(())
}

/// Read and parse a JSON state file, returning `Ok(None)` if it does not
/// exist or fails to parse (torn write, predates this schema version).
///
/// Callers treat a `None` the same as "no state yet" — this is the
/// tolerant-reader half of the write-temp-then-rename contract.
pub fn read_json_tolerant<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        n: u32,
        s: String,
    }

    #[test]
    fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let value = Sample {
            n: 7,
            s: "hi".into(),
        };
        write_json_atomic(&path, &value).unwrap();
        let read: Sample = read_json_tolerant(&path).unwrap();
        assert_eq!(read, value);
    }

    #[test]
    fn tolerant_reader_treats_corrupt_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{not json").unwrap();
        let read: Option<Sample> = read_json_tolerant(&path);
        assert!(read.is_none());
    }

    #[test]
    fn tolerant_reader_treats_missing_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let read: Option<Sample> = read_json_tolerant(&path);
        assert!(read.is_none());
    }

    #[test]
    fn write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("state.json");
        write_json_atomic(&path, &Sample { n: 1, s: "x".into() }).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn overwrite_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_json_atomic(&path, &Sample { n: 1, s: "a".into() }).unwrap();
        write_json_atomic(&path, &Sample { n: 2, s: "b".into() }).unwrap();
        let read: Sample = read_json_tolerant(&path).unwrap();
        assert_eq!(read, Sample { n: 2, s: "b".into() });
    }
}
