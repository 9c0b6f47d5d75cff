//! Append-only JSON-lines event sink.
//!
//! Every line is one object `{ts, event, ...details}`. The file is written
//! for observability only and is never read back by the service.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use serde_json::{Map, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex};
use tracing::{error, info};

#[derive(Clone)]
pub struct EventLog {
    inner: Arc<Inner>,
}

struct Inner {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                path: path.into(),
                write_lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.inner.path
    }

    /// Records an event. Failures are logged and swallowed.
    pub async fn write(&self, event: &str, details: Value) {
        info!(target: "vrdash::events", event, details = %details, "event");
        let line = match render_line(event, details, OffsetDateTime::now_utc()) {
            Ok(line) => line,
            Err(e) => {
                error!(error = ?e, event, "render event line failed");
                return;
            }
        };
        if let Err(e) = self.append(&line).await {
            error!(error = ?e, event, path = %self.inner.path.display(), "event log write failed");
        }
    }

    async fn append(&self, line: &str) -> anyhow::Result<()> {
        let _guard = self.inner.write_lock.lock().await;
        if let Some(parent) = self.inner.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)
            .await
            .context("open event log")?;
        file.write_all(line.as_bytes()).await.context("append event")?;
        file.flush().await.context("flush event log")?;
        Ok(())
    }
}

fn render_line(event: &str, details: Value, ts: OffsetDateTime) -> anyhow::Result<String> {
    let mut obj = Map::new();
    obj.insert("ts".into(), Value::String(ts.format(&Rfc3339)?));
    obj.insert("event".into(), Value::String(event.to_string()));
    match details {
        Value::Object(map) => {
            for (k, v) in map {
                if k != "ts" && k != "event" {
                    obj.insert(k, v);
                }
            }
        }
        Value::Null => {}
        other => {
            obj.insert("details".into(), other);
        }
    }
    let mut line = serde_json::to_string(&Value::Object(obj))?;
    line.push('\n');
    Ok(line)
}
