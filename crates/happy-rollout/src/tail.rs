//! Byte-offset tailing of a single rollout file (§4.9 step 2-3).

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Tracks a remembered read offset into one rollout file and the
/// trailing partial line carried across ticks.
pub struct FileTail {
    path: PathBuf,
    offset: u64,
    partial: String,
}

impl FileTail {
    /// Open `path`, seek to its current EOF, and remember that offset.
    /// Content written before this call is never read (§4.9 step 2).
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened or its length queried.
    pub fn at_eof(path: PathBuf) -> std::io::Result<Self> {
        let len = std::fs::metadata(&path)?.len();
        Ok(Self { path, offset: len, partial: String::new() })
    }

    /// Path this tail is watching.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read everything written since the last call, split on newlines.
    /// A trailing line with no terminating `\n` is buffered and
    /// prepended to the next call's output instead of being returned
    /// (§4.9 step 3).
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be reopened or read.
    pub fn poll(&mut self) -> std::io::Result<Vec<String>> {
        let mut file = std::fs::File::open(&self.path)?;
        let len = file.metadata()?.len();
        if len < self.offset {
            // File was truncated or replaced; restart from its new EOF.
            self.offset = len;
            self.partial.clear();
            return Ok(Vec::new());
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        self.offset = len;

        self.partial.push_str(&buf);
        let mut lines: Vec<String> = self.partial.split('\n').map(str::to_string).collect();
        self.partial = lines.pop().unwrap_or_default();
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn tail_starts_at_eof_and_ignores_prior_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.jsonl");
        std::fs::write(&path, "before\n").unwrap();

        let mut tail = FileTail::at_eof(path.clone()).unwrap();
        assert_eq!(tail.poll().unwrap(), Vec::<String>::new());

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "after").unwrap();
        assert_eq!(tail.poll().unwrap(), vec!["after".to_string()]);
    }

    #[test]
    fn partial_trailing_line_carries_into_next_poll() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.jsonl");
        std::fs::write(&path, "").unwrap();
        let mut tail = FileTail::at_eof(path.clone()).unwrap();

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "{{\"a\":1}}\n{{\"b\":2").unwrap();
        assert_eq!(tail.poll().unwrap(), vec![r#"{"a":1}"#.to_string()]);

        write!(file, "}}\n").unwrap();
        assert_eq!(tail.poll().unwrap(), vec![r#"{"b":2}"#.to_string()]);
    }

    #[test]
    fn truncated_file_resets_offset_without_erroring() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.jsonl");
        std::fs::write(&path, "one\ntwo\nthree\n").unwrap();
        let mut tail = FileTail::at_eof(path.clone()).unwrap();

        std::fs::write(&path, "x").unwrap();
        assert_eq!(tail.poll().unwrap(), Vec::<String>::new());
    }
}
