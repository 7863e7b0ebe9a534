//! Digest delivery.
//!
//! [`ServerChanSink`] pushes the digest to every configured ServerChan key, one
//! form POST each, without retries. A failed destination never stops the others;
//! the caller gets a [`DeliveryReport`] with one outcome per key.

use crate::utils::{mask_secret, truncate_for_log};
use std::time::Duration;
use tracing::{error, info, instrument};

pub const SERVER_CHAN_BASE: &str = "https://sctapi.ftqq.com";

/// Delivers a titled message to its destinations.
pub trait NotificationSink {
    async fn send(&self, title: &str, body: &str) -> DeliveryReport;
}

/// Result for one destination. `destination` is masked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationOutcome {
    pub destination: String,
    /// `Err` carries the transport error or the rejection body.
    pub result: Result<(), String>,
}

/// Per-destination results of one send, in configured order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub outcomes: Vec<DestinationOutcome>,
}

impl DeliveryReport {
    /// Number of destinations that accepted the message.
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    /// Number of destinations that rejected it or could not be reached.
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }

    /// True when there was at least one destination and none accepted the message.
    pub fn all_failed(&self) -> bool {
        !self.outcomes.is_empty() && self.delivered() == 0
    }
}

/// ServerChan (`<base>/<key>.send`, fields `title` and `desp`).
pub struct ServerChanSink {
    http: reqwest::Client,
    base_url: String,
    keys: Vec<String>,
}

impl ServerChanSink {
    /// Sink for the public ServerChan endpoint.
    ///
    /// # Arguments
    ///
    /// * `keys` - One send key per destination
    /// * `timeout` - Per-request timeout
    ///
    /// # Returns
    ///
    /// An error only when the HTTP client cannot be built.
    pub fn new(keys: Vec<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Self::with_base_url(SERVER_CHAN_BASE, keys, timeout)
    }

    pub fn with_base_url(
        base_url: &str,
        keys: Vec<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            keys,
        })
    }

    fn endpoint(&self, key: &str) -> String {
        format!("{}/{}.send", self.base_url, urlencoding::encode(key))
    }

    async fn push(&self, key: &str, title: &str, body: &str) -> Result<(), String> {
        let response = self
            .http
            .post(self.endpoint(key))
            .form(&[("title", title), ("desp", body)])
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(format!("status {status}: {}", truncate_for_log(&text, 200)))
        }
    }
}

impl NotificationSink for ServerChanSink {
    #[instrument(level = "info", skip_all, fields(destinations = self.keys.len(), body_chars = body.chars().count()))]
    async fn send(&self, title: &str, body: &str) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for key in &self.keys {
            let destination = mask_secret(key);
            let result = self.push(key, title, body).await;
            match &result {
                Ok(()) => info!(%destination, "Push delivered"),
                Err(e) => error!(%destination, error = %e, "Push failed"),
            }
            report.outcomes.push(DestinationOutcome {
                destination,
                result,
            });
        }
        report
    }
}
