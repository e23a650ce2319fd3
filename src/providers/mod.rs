pub mod azure_devops;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::config::{Credentials, TrackerConfig};
use crate::error::{FetchError, TrackerError};
use crate::model::story::{StoryInput, WorkItemId};

/// One entry of a JSON Patch document sent to the tracker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatchOperation {
    pub op: &'static str,
    pub path: String,
    pub value: Value,
}

impl PatchOperation {
    pub fn add_field(field: &str, value: impl Into<String>) -> Self {
        Self {
            op: "add",
            path: format!("/fields/{field}"),
            value: Value::String(value.into()),
        }
    }

    pub fn add_relation(relation: Value) -> Self {
        Self {
            op: "add",
            path: "/relations/-".into(),
            value: relation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedItem {
    pub id: WorkItemId,
    pub url: Option<String>,
}

#[async_trait]
pub trait Tracker: Send + Sync {
    fn name(&self) -> &str;
    /// API url of a work item, as used in relation links.
    fn work_item_url(&self, id: WorkItemId) -> String;
    /// Read a work item as a story. Fails when it has no acceptance criteria.
    async fn fetch_story(&self, id: WorkItemId) -> Result<StoryInput, FetchError>;
    async fn create_work_item(
        &self,
        item_type: &str,
        operations: &[PatchOperation],
    ) -> Result<CreatedItem, TrackerError>;
}

pub fn create_tracker(config: &TrackerConfig, credentials: Credentials) -> Box<dyn Tracker> {
    Box::new(azure_devops::AzureDevOpsTracker::new(
        config.base_url.clone(),
        credentials,
    ))
}

#[cfg(test)]
pub mod tests;
