use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::data_dir;
use crate::export::{PushOutcome, PushReport};
use crate::model::story::WorkItemId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRecord {
    pub timestamp: String,
    pub identity: String,
    pub parent_id: WorkItemId,
    pub items: Vec<PushedItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushedItem {
    pub title: String,
    #[serde(flatten)]
    pub outcome: PushOutcome,
}

impl PushRecord {
    pub fn from_report(identity: &str, report: &PushReport) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            identity: identity.to_string(),
            parent_id: report.parent_id,
            items: report
                .items
                .iter()
                .map(|i| PushedItem {
                    title: i.title.clone(),
                    outcome: i.outcome.clone(),
                })
                .collect(),
        }
    }

    pub fn created(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.outcome, PushOutcome::Created { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.created()
    }
}

pub fn history_path() -> PathBuf {
    data_dir().join("push-history.jsonl")
}

pub fn append_record(path: &Path, record: &PushRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let line = serde_json::to_string(record)?;
    writeln!(file, "{line}")?;
    Ok(())
}

/// Most recent last. Unreadable lines are skipped.
pub fn read_records(path: &Path, identity: Option<&str>, limit: Option<usize>) -> Vec<PushRecord> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };

    let mut records: Vec<PushRecord> = contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .filter(|r: &PushRecord| identity.map_or(true, |id| r.identity == id))
        .collect();

    if let Some(limit) = limit {
        let len = records.len();
        if len > limit {
            records = records.split_off(len - limit);
        }
    }

    records
}
