//! Health and status reporting for the healthcheck endpoint.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use crate::relay::{MessageStore, RelayMessage};

/// How long the content probe waits before calling the site unreachable.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    /// "ok" when the content site answered the probe, "degraded" otherwise.
    pub status: String,
    pub content_address: String,
    pub healthcheck_address: String,
    pub version: String,
    /// Unix seconds when this process started.
    pub started: i64,
    pub uptime_seconds: i64,
    pub content_reachable: bool,
    /// When the content site last published, if it reports it. Always
    /// present in the JSON body, `null` when unknown.
    pub last_published: Option<String>,
    /// Published unit count from the content site, `null` when unknown.
    pub units: Option<u64>,
    pub messages: Vec<RelayMessage>,
}

/// Probes the content site on behalf of the status endpoint.
pub struct StatusReporter {
    client: reqwest::Client,
    content_address: String,
    healthcheck_address: String,
    content_url: Option<String>,
    content_status_url: Option<String>,
    messages: Arc<MessageStore>,
    started: i64,
}

impl StatusReporter {
    pub fn new(
        content_address: String,
        healthcheck_address: String,
        content_url: Option<String>,
        content_status_url: Option<String>,
        messages: Arc<MessageStore>,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(PROBE_TIMEOUT)
                .build()
                .unwrap_or_default(),
            content_address,
            healthcheck_address,
            content_url,
            content_status_url,
            messages,
            started: Utc::now().timestamp(),
        }
    }

    pub async fn report(&self) -> StatusResponse {
        let content_reachable = self.probe_content().await;
        let (last_published, units) = self.probe_publish_status().await;

        let now = Utc::now().timestamp();
        StatusResponse {
            status: if content_reachable { "ok" } else { "degraded" }.to_string(),
            content_address: self.content_address.clone(),
            healthcheck_address: self.healthcheck_address.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started: self.started,
            uptime_seconds: now - self.started,
            content_reachable,
            last_published,
            units,
            messages: self.messages.snapshot(),
        }
    }

    /// GET the content site and treat any HTTP answer as reachable. A site
    /// serving a 500 is still a site that tor can route to.
    async fn probe_content(&self) -> bool {
        let Some(url) = &self.content_url else {
            return false;
        };
        match self.client.get(url).send().await {
            Ok(resp) => {
                debug!(url = %url, status = %resp.status(), "content probe");
                true
            }
            Err(e) => {
                warn!(url = %url, error = %e, "content probe failed");
                false
            }
        }
    }

    /// Best-effort read of the content site's own status document.
    async fn probe_publish_status(&self) -> (Option<String>, Option<u64>) {
        let Some(url) = &self.content_status_url else {
            return (None, None);
        };
        let doc: serde_json::Value = match self.client.get(url).send().await {
            Ok(resp) => match resp.json().await {
                Ok(v) => v,
                Err(e) => {
                    debug!(url = %url, error = %e, "publish status not parseable");
                    return (None, None);
                }
            },
            Err(e) => {
                debug!(url = %url, error = %e, "publish status unavailable");
                return (None, None);
            }
        };
        let last_published = doc
            .get("last_published")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let units = doc.get("units").and_then(|v| v.as_u64());
        (last_published, units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reporter(content_url: Option<String>) -> StatusReporter {
        StatusReporter::new(
            "content.onion".into(),
            "health.onion".into(),
            content_url,
            None,
            Arc::new(MessageStore::new()),
        )
    }

    #[tokio::test]
    async fn no_content_url_means_degraded() {
        let r = reporter(None);
        let status = r.report().await;
        assert_eq!(status.status, "degraded");
        assert!(!status.content_reachable);
        assert_eq!(status.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn unknown_publish_fields_serialize_as_null() {
        let r = reporter(None);
        let status = r.report().await;

        // Pollers key on a stable schema: the fields are always there,
        // null when the content site does not report them.
        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("last_published").unwrap().is_null());
        assert!(json.get("units").unwrap().is_null());
        assert!(json.get("content_reachable").unwrap().is_boolean());
    }

    #[tokio::test]
    async fn unreachable_content_is_reported_not_fatal() {
        // Reserved TEST-NET-1 address, nothing answers here.
        let r = reporter(Some("http://192.0.2.1:9/".into()));
        let status = r.report().await;
        assert_eq!(status.status, "degraded");
        assert!(status.last_published.is_none());
    }

    #[tokio::test]
    async fn messages_ride_along_in_the_status_body() {
        let messages = Arc::new(MessageStore::new());
        messages.push("peer checking in".into());
        let r = StatusReporter::new(
            "content.onion".into(),
            "health.onion".into(),
            None,
            None,
            messages,
        );
        let status = r.report().await;
        assert_eq!(status.messages.len(), 1);
        assert_eq!(status.messages[0].text, "peer checking in");
    }
}
