use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only JSONL log of invocation lifecycle events.
///
/// Every line carries `type`, `invocation_id` and `ts`; those three keys are
/// written last so a payload cannot shadow them. Clones share one file lock,
/// so concurrent invocations may log to the same file.
/// Writes block the calling thread; async callers hand them to the
/// blocking pool.
#[derive(Debug, Clone)]
pub struct EventLog {
    inner: Arc<EventLogInner>,
}

#[derive(Debug)]
struct EventLogInner {
    path: PathBuf,
    lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(EventLogInner {
                path: path.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn emit(
        &self,
        invocation_id: &str,
        event_type: &str,
        payload: EventPayload,
    ) -> anyhow::Result<Value> {
        let mut event = payload;
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "invocation_id".to_string(),
            Value::String(invocation_id.to_string()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("logs").join("events.jsonl");
        let log = EventLog::new(&path);

        let mut payload = EventPayload::new();
        payload.insert("job_id".to_string(), Value::String("abc".to_string()));
        let emitted = log.emit("inv-1", "job_submitted", payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::String("job_submitted".to_string()));
        assert_eq!(parsed["invocation_id"], Value::String("inv-1".to_string()));
        assert_eq!(parsed["job_id"], Value::String("abc".to_string()));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn payload_cannot_shadow_envelope_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let log = EventLog::new(temp.path().join("events.jsonl"));

        let mut payload = EventPayload::new();
        payload.insert("type".to_string(), Value::String("override".to_string()));
        payload.insert(
            "invocation_id".to_string(),
            Value::String("someone-else".to_string()),
        );
        let emitted = log.emit("inv-1", "job_polled", payload)?;

        assert_eq!(emitted["type"], Value::String("job_polled".to_string()));
        assert_eq!(emitted["invocation_id"], Value::String("inv-1".to_string()));
        Ok(())
    }

    #[test]
    fn clones_append_to_the_same_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let log = EventLog::new(&path);
        let shared = log.clone();

        log.emit("inv-1", "invocation_started", EventPayload::new())?;
        shared.emit("inv-2", "invocation_started", EventPayload::new())?;

        let content = fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0])?;
        let second: Value = serde_json::from_str(lines[1])?;
        assert_eq!(first["invocation_id"], Value::String("inv-1".to_string()));
        assert_eq!(second["invocation_id"], Value::String("inv-2".to_string()));
        Ok(())
    }
}
