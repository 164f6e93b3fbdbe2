//! Append-only audit log of every evaluated track/frame pair

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::models::AuditRecord;

pub trait AuditSink: Send + Sync {
    fn record(&self, task_id: i64, record: &AuditRecord) -> anyhow::Result<()>;

    /// Flush and release whatever is held for `task_id`
    fn close(&self, _task_id: i64) -> anyhow::Result<()> {
        Ok(())
    }
}

/// JSON-lines log, one file and one writer per task (`task_<id>.jsonl`)
pub struct JsonlAuditSink {
    dir: PathBuf,
    writers: Mutex<HashMap<i64, BufWriter<File>>>,
}

impl JsonlAuditSink {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            writers: Mutex::new(HashMap::new()),
        }
    }

    pub fn path_for(&self, task_id: i64) -> PathBuf {
        self.dir.join(format!("task_{}.jsonl", task_id))
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, task_id: i64, record: &AuditRecord) -> anyhow::Result<()> {
        let line = serde_json::to_string(record)?;
        let mut writers = self
            .writers
            .lock()
            .map_err(|_| anyhow::anyhow!("audit writer lock poisoned"))?;

        let writer = match writers.entry(task_id) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                std::fs::create_dir_all(&self.dir)?;
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(self.path_for(task_id))?;
                entry.insert(BufWriter::new(file))
            }
        };
        writeln!(writer, "{}", line)?;
        Ok(())
    }

    fn close(&self, task_id: i64) -> anyhow::Result<()> {
        let mut writers = self
            .writers
            .lock()
            .map_err(|_| anyhow::anyhow!("audit writer lock poisoned"))?;
        if let Some(mut writer) = writers.remove(&task_id) {
            writer.flush()?;
        }
        Ok(())
    }
}

/// In-memory sink, mostly for tests and dry runs
#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<(i64, AuditRecord)>>,
    closed: Mutex<Vec<i64>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(i64, AuditRecord)> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Task ids closed so far, in order
    pub fn closed(&self) -> Vec<i64> {
        self.closed
            .lock()
            .map(|closed| closed.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, task_id: i64, record: &AuditRecord) -> anyhow::Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow::anyhow!("audit lock poisoned"))?
            .push((task_id, record.clone()));
        Ok(())
    }

    fn close(&self, task_id: i64) -> anyhow::Result<()> {
        self.closed
            .lock()
            .map_err(|_| anyhow::anyhow!("audit lock poisoned"))?
            .push(task_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn record(frame_index: u64, matched: bool) -> AuditRecord {
        AuditRecord {
            timestamp: Utc::now(),
            source_id: "cam-1".to_string(),
            frame_index,
            track_id: 4,
            bbox: [1.0, 2.0, 30.0, 60.0],
            face_similarity: Some(0.31),
            gait_similarity: None,
            fused_score: None,
            matched,
            saved_crop_reference: String::new(),
        }
    }

    #[test]
    fn test_jsonl_one_file_per_task() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlAuditSink::new(dir.path().join("audit"));

        sink.record(1, &record(1, false)).unwrap();
        sink.record(1, &record(2, true)).unwrap();
        sink.record(2, &record(1, false)).unwrap();
        sink.close(1).unwrap();
        sink.close(2).unwrap();

        let task1 = std::fs::read_to_string(sink.path_for(1)).unwrap();
        let lines: Vec<AuditRecord> = task1
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].frame_index, 2);
        assert!(lines[1].matched);

        let task2 = std::fs::read_to_string(sink.path_for(2)).unwrap();
        assert_eq!(task2.lines().count(), 1);
    }

    #[test]
    fn test_memory_sink() {
        let sink = MemoryAuditSink::new();
        sink.record(9, &record(5, false)).unwrap();
        assert_eq!(sink.records()[0].0, 9);
        assert!(sink.closed().is_empty());
        sink.close(9).unwrap();
        assert_eq!(sink.closed(), vec![9]);
    }
}
