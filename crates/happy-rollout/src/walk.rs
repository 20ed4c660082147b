//! Recursive `.jsonl` enumeration under a rollout root (§4.9 step 1).

use std::path::{Path, PathBuf};

use crate::error::{RolloutError, RolloutResult};

/// Recursively list every `.jsonl` file under `root`, depth-first.
///
/// # Errors
///
/// Returns [`RolloutError::RootUnreadable`] if `root` itself cannot be
/// enumerated. Unreadable subdirectories encountered along the way are
/// skipped with a warning rather than aborting the whole walk.
pub fn enumerate_jsonl(root: &Path) -> RolloutResult<Vec<PathBuf>> {
    let mut out = Vec::new();
    visit(root, &mut out)?;
    Ok(out)
}

fn visit(dir: &Path, out: &mut Vec<PathBuf>) -> RolloutResult<()> {
    let entries = std::fs::read_dir(dir).map_err(|source| RolloutError::RootUnreadable {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else { continue };
        if file_type.is_dir() {
            if let Err(e) = visit(&path, out) {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable rollout subdirectory");
            }
        } else if file_type.is_file() && path.extension().is_some_and(|ext| ext == "jsonl") {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_nested_jsonl_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("2024/05")).unwrap();
        std::fs::write(dir.path().join("2024/05/a.jsonl"), "").unwrap();
        std::fs::write(dir.path().join("2024/05/notes.txt"), "").unwrap();
        std::fs::write(dir.path().join("b.jsonl"), "").unwrap();

        let mut found = enumerate_jsonl(dir.path()).unwrap();
        found.sort();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|p| p.extension().is_some_and(|e| e == "jsonl")));
    }

    #[test]
    fn missing_root_is_an_error() {
        let result = enumerate_jsonl(Path::new("/nonexistent/rollout/root"));
        assert!(result.is_err());
    }
}
