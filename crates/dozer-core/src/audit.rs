use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::Utc;
use serde::Serialize;

use crate::{
    domain::{Author, Origin},
    errors::Error,
    reporting::ErrorReport,
    Result,
};

const AUDIT_MAX_TEXT: usize = 500;

/// RFC3339 timestamp in UTC.
pub fn iso_timestamp_utc() -> String {
    Utc::now().to_rfc3339()
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorized: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEvent {
    fn new(event: &str) -> Self {
        Self {
            timestamp: iso_timestamp_utc(),
            event: event.to_string(),
            ..Self::default()
        }
    }

    /// A developer running a command as someone else.
    pub fn impersonation(real: &Author, target: &Author, origin: &Origin, text: &str) -> Self {
        Self {
            user_id: Some(real.id.0),
            username: Some(real.name.clone()),
            target_user_id: Some(target.id.0),
            target_username: Some(target.name.clone()),
            origin: Some(origin.to_string()),
            content: Some(text.to_string()),
            authorized: Some(true),
            ..Self::new("impersonation")
        }
    }

    pub fn impersonation_denied(real: &Author, origin: &Origin, text: &str) -> Self {
        Self {
            user_id: Some(real.id.0),
            username: Some(real.name.clone()),
            origin: Some(origin.to_string()),
            content: Some(text.to_string()),
            authorized: Some(false),
            ..Self::new("impersonation")
        }
    }

    /// Audit record of an internal command failure, keeping the report's own timestamp.
    pub fn command_error(report: &ErrorReport) -> Self {
        Self {
            timestamp: report.timestamp.clone(),
            user_id: Some(report.author_id),
            username: Some(report.author.clone()),
            origin: Some(report.origin.clone()),
            command: report.command.clone(),
            content: Some(report.content.clone()),
            error: Some(report.detail.clone()),
            ..Self::new("error")
        }
    }

    pub fn lifecycle(actor: &Author, origin: &Origin, restart: bool) -> Self {
        Self {
            user_id: Some(actor.id.0),
            username: Some(actor.name.clone()),
            origin: Some(origin.to_string()),
            ..Self::new(if restart { "restart" } else { "shutdown" })
        }
    }
}

/// Append-only audit log (JSON lines or a readable block format).
#[derive(Debug)]
pub struct AuditLogger {
    path: PathBuf,
    json: bool,
    // Serializes appends from concurrent tasks so records never interleave.
    write_lock: Mutex<()>,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, mut event: AuditEvent) -> Result<()> {
        if let Some(s) = &event.content {
            event.content = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }
        if let Some(s) = &event.error {
            event.error = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }

        let out = if self.json {
            let mut line = serde_json::to_string(&event)?;
            line.push('\n');
            line
        } else {
            render_block(&event)?
        };

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| Error::External("audit log lock poisoned".to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(out.as_bytes())?;
        Ok(())
    }
}

fn render_block(event: &AuditEvent) -> Result<String> {
    let value = serde_json::to_value(event)?;
    let Some(obj) = value.as_object() else {
        return Err(Error::External(
            "audit event is not a JSON object".to_string(),
        ));
    };

    let mut out = String::new();
    out.push('\n');
    out.push_str(&"=".repeat(60));
    for (k, v) in obj {
        out.push('\n');
        out.push_str(k);
        out.push_str(": ");
        match v {
            serde_json::Value::String(s) => out.push_str(s),
            other => out.push_str(&other.to_string()),
        }
    }
    out.push('\n');
    Ok(out)
}

pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}
