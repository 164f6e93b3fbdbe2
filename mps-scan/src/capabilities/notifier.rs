//! Outbound notifications
//!
//! Delivery failures are reported through the returned flag and never
//! affect a scan.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::models::ScanStatus;

/// Notification payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// First match found in a source
    MatchAlert {
        task_id: i64,
        case_id: String,
        source_id: String,
        source_name: String,
        location: Option<String>,
        frame_index: u64,
        track_id: i64,
        fused_score: Option<f64>,
        snapshot: Option<String>,
        match_count: usize,
    },
    /// Task finished
    ScanSummary {
        task_id: i64,
        case_id: String,
        status: ScanStatus,
        scanned_count: u32,
        total_count: u32,
        total_detections: u32,
        aggregate_report: Option<String>,
    },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Returns whether the notification was delivered
    async fn notify(&self, notification: &Notification) -> bool;
}

/// POSTs notifications as JSON to a webhook
pub struct WebhookNotifier {
    http_client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("mps-scan/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http_client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> bool {
        match self.http_client.post(&self.url).json(notification).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(url = %self.url, status = %response.status(), "Webhook rejected notification");
                false
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "Webhook delivery failed");
                false
            }
        }
    }
}

/// Logs notifications when no webhook is configured
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> bool {
        match notification {
            Notification::MatchAlert {
                task_id,
                source_name,
                location,
                frame_index,
                fused_score,
                ..
            } => info!(
                task_id,
                source = %source_name,
                location = location.as_deref().unwrap_or("-"),
                frame_index,
                fused_score = ?fused_score,
                "Match alert"
            ),
            Notification::ScanSummary {
                task_id,
                status,
                total_detections,
                ..
            } => info!(task_id, status = %status, total_detections, "Scan summary"),
        }
        true
    }
}
