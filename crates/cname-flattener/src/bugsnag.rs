// Bugsnag error reporter.
//
// Posts failures to the Bugsnag notify API (payload version 5). Sending
// is bounded by a short timeout; delivery problems are logged and
// swallowed so they never change the outcome of a pass.

use async_trait::async_trait;
use flatten_core::traits::{ErrorReporter, FailureNotice};
use serde_json::{Value, json};
use std::time::Duration;

/// Bugsnag notify endpoint
const BUGSNAG_NOTIFY_URL: &str = "https://notify.bugsnag.com";

/// Upper bound for one notification
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct BugsnagReporter {
    /// ⚠️ NEVER log this value
    api_key: String,
    release_stage: String,
    endpoint: String,
    client: reqwest::Client,
}

// Custom Debug implementation that hides the API key
impl std::fmt::Debug for BugsnagReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BugsnagReporter")
            .field("api_key", &"<REDACTED>")
            .field("release_stage", &self.release_stage)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl BugsnagReporter {
    pub fn new(api_key: impl Into<String>, release_stage: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(NOTIFY_TIMEOUT).build()?;
        Ok(Self {
            api_key: api_key.into(),
            release_stage: release_stage.into(),
            endpoint: BUGSNAG_NOTIFY_URL.to_string(),
            client,
        })
    }

    /// Send notifications to another endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Build the notify payload for `notice`
    fn payload(&self, notice: &FailureNotice) -> Value {
        let reason = if notice.unhandled {
            "unhandledException"
        } else {
            "handledException"
        };

        json!({
            "apiKey": self.api_key,
            "payloadVersion": "5",
            "notifier": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
                "url": env!("CARGO_PKG_REPOSITORY"),
            },
            "events": [{
                "exceptions": [{
                    "errorClass": notice.kind.as_str(),
                    "message": notice.message,
                    "stacktrace": [],
                }],
                "severity": "error",
                "unhandled": notice.unhandled,
                "severityReason": {
                    "type": reason,
                },
                "app": {
                    "version": env!("CARGO_PKG_VERSION"),
                    "releaseStage": self.release_stage,
                },
                "metaData": {
                    "flattener": notice.context,
                },
            }],
        })
    }
}

#[async_trait]
impl ErrorReporter for BugsnagReporter {
    async fn notify(&self, notice: &FailureNotice) {
        let result = self
            .client
            .post(&self.endpoint)
            .header("Bugsnag-Api-Key", &self.api_key)
            .header("Bugsnag-Payload-Version", "5")
            .json(&self.payload(notice))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!("Reported {} failure to Bugsnag", notice.kind);
            }
            Ok(response) => {
                tracing::warn!(
                    "Bugsnag rejected {} notification: HTTP {}",
                    notice.kind,
                    response.status()
                );
            }
            Err(e) => {
                tracing::warn!("Failed to report {} failure to Bugsnag: {}", notice.kind, e);
            }
        }
    }

    fn reporter_name(&self) -> &'static str {
        "bugsnag"
    }
}
