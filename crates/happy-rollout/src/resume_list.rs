//! Resume-list view: which rollouts under a working directory can be
//! resumed, with a sanitized preview (§4.9 "Resume-list view", §8
//! properties 11-12).

use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use crate::error::RolloutResult;
use crate::record::{RolloutRecord, parse_line};
use crate::walk::enumerate_jsonl;

const HEAD_LIMIT_BYTES: usize = 1024 * 1024;
const HEAD_LIMIT_RECORDS: usize = 10;

/// One rollout the resume list considers viable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeEntry {
    /// Path of the rollout file.
    pub path: PathBuf,
    /// The rollout's own session id (from `session_meta`).
    pub session_id: String,
    /// Working directory recorded in `session_meta`.
    pub cwd: String,
    /// Sanitized preview text (first qualifying user message).
    pub preview: String,
    /// Inferred timestamp, used for sort order.
    pub timestamp: DateTime<Utc>,
}

/// Scan every rollout under `root`, keeping those resumable from `cwd`
/// (or all of them, if `allow_all`), sorted oldest-first by inferred
/// timestamp.
///
/// # Errors
///
/// Returns an error only if `root` itself cannot be enumerated;
/// individual unreadable or malformed rollout files are skipped.
pub fn list_resumable(root: &Path, cwd: &str, allow_all: bool) -> RolloutResult<Vec<ResumeEntry>> {
    let files = enumerate_jsonl(root)?;
    let mut entries: Vec<ResumeEntry> = files
        .into_iter()
        .filter_map(|file| scan_head(&file, cwd, allow_all))
        .collect();
    entries.sort_by_key(|e| e.timestamp);
    Ok(entries)
}

fn scan_head(path: &Path, cwd: &str, allow_all: bool) -> Option<ResumeEntry> {
    let head = read_head(path, HEAD_LIMIT_BYTES)?;

    let mut session_meta: Option<crate::record::SessionMeta> = None;
    let mut saw_user_message = false;
    let mut preview: Option<String> = None;
    let mut records_seen = 0usize;

    for line in head.split('\n') {
        if records_seen >= HEAD_LIMIT_RECORDS {
            break;
        }
        let Some(record) = parse_line(line) else { continue };
        records_seen += 1;
        match record {
            RolloutRecord::SessionMeta(meta) => session_meta = Some(meta),
            RolloutRecord::EventMsg { kind, body } if kind == "user_message" => {
                saw_user_message = true;
                if preview.is_none() {
                    preview = extract_preview(&body);
                }
            }
            _ => {}
        }
    }

    let meta = session_meta?;
    if !saw_user_message {
        return None;
    }
    if !allow_all && meta.cwd != cwd {
        return None;
    }

    Some(ResumeEntry {
        session_id: meta.id.clone(),
        cwd: meta.cwd.clone(),
        preview: preview.unwrap_or_default(),
        timestamp: infer_timestamp(path, meta.timestamp.as_deref()),
        path: path.to_path_buf(),
    })
}

/// Read up to `limit` bytes from the start of `path`. Returns `None` if
/// the file cannot be opened.
fn read_head(path: &Path, limit: usize) -> Option<String> {
    let mut file = std::fs::File::open(path).ok()?;
    let mut buf = vec![0u8; limit];
    let mut total = 0;
    loop {
        let n = file.read(&mut buf[total..]).ok()?;
        if n == 0 {
            break;
        }
        total += n;
        if total >= buf.len() {
            break;
        }
    }
    buf.truncate(total);
    Some(String::from_utf8_lossy(&buf).into_owned())
}

/// Extract the user-message body's text and sanitize it for display,
/// skipping messages that look like environment/AGENTS.md bootstrap
/// rather than something a human actually typed.
fn extract_preview(body: &Value) -> Option<String> {
    let text = body
        .get("message")
        .or_else(|| body.get("text"))
        .and_then(Value::as_str)?;
    if looks_like_bootstrap(text) {
        return None;
    }
    Some(sanitize(text))
}

/// Heuristic recognizing the agent's own environment/instructions
/// preamble rather than something the operator typed.
fn looks_like_bootstrap(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with("<environment_context")
        || trimmed.starts_with("<user_instructions")
        || trimmed.contains("AGENTS.md")
}

/// Strip ANSI escapes (including OSC title sequences) and any remaining
/// C0/C1 control bytes, per testable property 11.
fn sanitize(text: &str) -> String {
    let stripped = strip_ansi_escapes::strip(text.as_bytes());
    let visible = String::from_utf8_lossy(&stripped).into_owned();
    visible
        .chars()
        .filter(|c| !matches!(*c, '\u{0000}'..='\u{001F}' | '\u{007F}'..='\u{009F}'))
        .collect()
}

/// Parse a Codex-style `rollout-YYYY-MM-DDTHH-MM-SS-<uuid>.jsonl`
/// filename timestamp; fall back to the record's own timestamp field,
/// then to the file's mtime.
fn infer_timestamp(path: &Path, record_timestamp: Option<&str>) -> DateTime<Utc> {
    if let Some(ts) = filename_timestamp(path) {
        return ts;
    }
    if let Some(raw) = record_timestamp {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return parsed.with_timezone(&Utc);
        }
    }
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

fn filename_timestamp(path: &Path) -> Option<DateTime<Utc>> {
    let name = path.file_stem()?.to_str()?;
    // Codex rollout filenames embed a `YYYY-MM-DDTHH-MM-SS` stamp.
    let bytes = name.as_bytes();
    for start in 0..bytes.len().saturating_sub(18) {
        let candidate = name.get(start..start + 19)?;
        if let Ok(parsed) = NaiveDateTime::parse_from_str(candidate, "%Y-%m-%dT%H-%M-%S") {
            return Some(parsed.and_utc());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn preview_strips_ansi_osc_and_control_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let body = serde_json::json!({"type": "user_message", "message": "\u{1b}[31mRED\u{1b}[0m done\u{0}"});
        let line = serde_json::json!({"type": "event_msg", "payload": body}).to_string();
        let meta = serde_json::json!({"type": "session_meta", "payload": {"id": "s1", "cwd": "/w"}}).to_string();
        write(dir.path(), "r.jsonl", &format!("{meta}\n{line}\n"));

        let entries = list_resumable(dir.path(), "/w", false).unwrap();
        assert_eq!(entries.len(), 1);
        let preview = &entries[0].preview;
        assert!(preview.contains("RED"));
        assert!(preview.contains("done"));
        for c in preview.chars() {
            assert!(!matches!(c, '\u{0000}'..='\u{001F}' | '\u{007F}'..='\u{009F}'));
        }
    }

    #[test]
    fn no_user_message_in_head_excludes_even_if_present_later() {
        let dir = tempfile::tempdir().unwrap();
        let meta = serde_json::json!({"type": "session_meta", "payload": {"id": "s1", "cwd": "/w"}}).to_string();
        let mut content = format!("{meta}\n");
        for i in 0..9 {
            content.push_str(&serde_json::json!({"type": "event_msg", "payload": {"type": "token_count", "n": i}}).to_string());
            content.push('\n');
        }
        // This user_message is the 11th record, past the 10-record head window.
        content.push_str(&serde_json::json!({"type": "event_msg", "payload": {"type": "user_message", "message": "hi"}}).to_string());
        content.push('\n');
        write(dir.path(), "r.jsonl", &content);

        let entries = list_resumable(dir.path(), "/w", false).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn cwd_mismatch_excluded_unless_allow_all() {
        let dir = tempfile::tempdir().unwrap();
        let meta = serde_json::json!({"type": "session_meta", "payload": {"id": "s1", "cwd": "/elsewhere"}}).to_string();
        let msg = serde_json::json!({"type": "event_msg", "payload": {"type": "user_message", "message": "hi"}}).to_string();
        write(dir.path(), "r.jsonl", &format!("{meta}\n{msg}\n"));

        assert!(list_resumable(dir.path(), "/w", false).unwrap().is_empty());
        assert_eq!(list_resumable(dir.path(), "/w", true).unwrap().len(), 1);
    }

    #[test]
    fn bootstrap_looking_message_is_not_used_as_preview() {
        let dir = tempfile::tempdir().unwrap();
        let meta = serde_json::json!({"type": "session_meta", "payload": {"id": "s1", "cwd": "/w"}}).to_string();
        let bootstrap = serde_json::json!({"type": "event_msg", "payload": {"type": "user_message", "message": "<environment_context>cwd=/w</environment_context>"}}).to_string();
        write(dir.path(), "r.jsonl", &format!("{meta}\n{bootstrap}\n"));

        let entries = list_resumable(dir.path(), "/w", false).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].preview, "");
    }

    #[test]
    fn filename_timestamp_is_preferred_for_sort_order() {
        let dir = tempfile::tempdir().unwrap();
        let meta = serde_json::json!({"type": "session_meta", "payload": {"id": "s1", "cwd": "/w"}}).to_string();
        let msg = serde_json::json!({"type": "event_msg", "payload": {"type": "user_message", "message": "hi"}}).to_string();
        write(dir.path(), "rollout-2024-01-01T00-00-00-abc.jsonl", &format!("{meta}\n{msg}\n"));
        write(dir.path(), "rollout-2024-06-01T00-00-00-def.jsonl", &format!("{meta}\n{msg}\n"));

        let entries = list_resumable(dir.path(), "/w", false).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].timestamp < entries[1].timestamp);
    }
}
