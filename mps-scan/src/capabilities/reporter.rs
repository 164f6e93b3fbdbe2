//! Per-source and aggregate scan reports

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::path::PathBuf;

use crate::models::{MatchEvent, ScanTask, SourceResult};

/// Produces report artifacts and returns a reference to each
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(
        &self,
        task: &ScanTask,
        result: &SourceResult,
        matches: &[MatchEvent],
    ) -> anyhow::Result<String>;

    async fn aggregate_report(
        &self,
        task: &ScanTask,
        results: &[SourceResult],
        total_detections: u32,
    ) -> anyhow::Result<String>;
}

/// Writes JSON reports into a directory
#[derive(Debug, Clone)]
pub struct JsonReporter {
    dir: PathBuf,
}

impl JsonReporter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    async fn write(&self, file_name: String, body: serde_json::Value) -> anyhow::Result<String> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(file_name);
        tokio::fs::write(&path, serde_json::to_vec_pretty(&body)?).await?;
        Ok(path.display().to_string())
    }
}

#[async_trait]
impl Reporter for JsonReporter {
    async fn report(
        &self,
        task: &ScanTask,
        result: &SourceResult,
        matches: &[MatchEvent],
    ) -> anyhow::Result<String> {
        let best = matches
            .iter()
            .filter_map(|m| m.fused_score)
            .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))));

        let body = json!({
            "task_id": task.id,
            "case_id": task.case_id,
            "source": result,
            "match_count": matches.len(),
            "best_fused_score": best,
            "matches": matches,
            "generated_at": Utc::now(),
        });
        self.write(
            format!("task_{}_source_{}.json", task.id, sanitize(&result.source_id)),
            body,
        )
        .await
    }

    async fn aggregate_report(
        &self,
        task: &ScanTask,
        results: &[SourceResult],
        total_detections: u32,
    ) -> anyhow::Result<String> {
        let sources_with_matches = results.iter().filter(|r| r.detections_found > 0).count();
        let body = json!({
            "task_id": task.id,
            "case_id": task.case_id,
            "status": task.status,
            "total_sources": task.total_count,
            "scanned_sources": task.scanned_count,
            "sources_with_matches": sources_with_matches,
            "total_detections": total_detections,
            "started_at": task.started_at,
            "sources": results,
            "generated_at": Utc::now(),
        });
        self.write(format!("task_{}_aggregate.json", task.id), body).await
    }
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
