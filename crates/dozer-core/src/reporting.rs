//! Error-tracking collaborators for internal command failures.

use std::{sync::Arc, time::Duration};

use serde::Serialize;

use crate::audit::{AuditEvent, AuditLogger};

/// Everything an operator needs to chase an internal failure.
#[derive(Clone, Debug, Serialize)]
pub struct ErrorReport {
    pub timestamp: String,
    pub command: Option<String>,
    pub author_id: i64,
    pub author: String,
    pub origin: String,
    pub content: String,
    /// Compact one-line rendering (what the user saw).
    pub summary: String,
    /// Full error chain. Panics always add their backtrace; other errors only
    /// carry one when `RUST_BACKTRACE` enables capture.
    pub detail: String,
}

/// Fire-and-forget sink for [`ErrorReport`]s. Must never block or fail the caller.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, report: &ErrorReport);
}

/// Writes reports into the audit log.
pub struct AuditReporter {
    audit: Arc<AuditLogger>,
}

impl AuditReporter {
    pub fn new(audit: Arc<AuditLogger>) -> Self {
        Self { audit }
    }
}

impl ErrorReporter for AuditReporter {
    fn report(&self, report: &ErrorReport) {
        let event = AuditEvent::command_error(report);
        if let Err(e) = self.audit.write(event) {
            tracing::warn!(error = %e, "failed to write error report to audit log");
        }
    }
}

/// POSTs reports as JSON to an error-tracking endpoint.
pub struct WebhookReporter {
    client: reqwest::Client,
    url: String,
}

impl WebhookReporter {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            url: url.into(),
        }
    }
}

impl ErrorReporter for WebhookReporter {
    fn report(&self, report: &ErrorReport) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no runtime available; dropping error report");
            return;
        };
        let client = self.client.clone();
        let url = self.url.clone();
        let report = report.clone();
        handle.spawn(async move {
            match client.post(&url).json(&report).send().await {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => {
                    tracing::warn!(status = %resp.status(), "error tracker rejected report")
                }
                Err(e) => tracing::warn!(error = %e, "failed to deliver error report"),
            }
        });
    }
}

/// Sends every report to each inner reporter.
#[derive(Default)]
pub struct FanoutReporter {
    inner: Vec<Arc<dyn ErrorReporter>>,
}

impl FanoutReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.inner.push(reporter);
        self
    }
}

impl ErrorReporter for FanoutReporter {
    fn report(&self, report: &ErrorReport) {
        for r in &self.inner {
            r.report(report);
        }
    }
}
