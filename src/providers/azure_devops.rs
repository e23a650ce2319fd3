use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use tracing::debug;

use super::{CreatedItem, PatchOperation, Tracker};
use crate::config::Credentials;
use crate::error::{FetchError, TrackerError};
use crate::model::story::{StoryInput, WorkItemId};
use crate::util::rich_text::html_to_text;

const API_VERSION: &str = "7.1";
const STORY_FIELDS: &str =
    "System.Title,System.Description,Microsoft.VSTS.Common.AcceptanceCriteria";

pub struct AzureDevOpsTracker {
    project_url: String,
    auth_header: String,
    client: reqwest::Client,
}

impl AzureDevOpsTracker {
    pub fn new(base_url: String, credentials: Credentials) -> Self {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(format!(":{}", credentials.pat));
        let project_url = format!(
            "{}/{}/{}",
            base_url.trim_end_matches('/'),
            urlencoding::encode(&credentials.organization),
            urlencoding::encode(&credentials.project),
        );
        Self {
            project_url,
            auth_header: format!("Basic {encoded}"),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct WorkItemResponse {
    id: u64,
    url: Option<String>,
    #[serde(default)]
    fields: StoryFields,
}

#[derive(Deserialize, Default)]
struct StoryFields {
    #[serde(rename = "System.Title")]
    title: Option<String>,
    #[serde(rename = "System.Description")]
    description: Option<String>,
    #[serde(rename = "Microsoft.VSTS.Common.AcceptanceCriteria")]
    acceptance_criteria: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Status code plus the tracker's own message when the body carries one.
async fn error_detail(resp: reqwest::Response) -> (u16, String) {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(|b| b.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            if text.trim().is_empty() {
                status.canonical_reason().unwrap_or("unknown error").to_string()
            } else {
                text
            }
        });
    (status.as_u16(), message)
}

#[async_trait]
impl Tracker for AzureDevOpsTracker {
    fn name(&self) -> &str {
        "Azure DevOps"
    }

    fn work_item_url(&self, id: WorkItemId) -> String {
        format!("{}/_apis/wit/workitems/{id}", self.project_url)
    }

    async fn fetch_story(&self, id: WorkItemId) -> Result<StoryInput, FetchError> {
        let url = format!(
            "{}?fields={STORY_FIELDS}&api-version={API_VERSION}",
            self.work_item_url(id)
        );
        debug!(%url, "fetching work item");

        let resp = self
            .client
            .get(&url)
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let (status, message) = error_detail(resp).await;
            return Err(FetchError::Api { status, message });
        }

        let item: WorkItemResponse = resp
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;
        let fields = item.fields;

        let acceptance_criteria = fields
            .acceptance_criteria
            .as_deref()
            .map(html_to_text)
            .unwrap_or_default();
        if acceptance_criteria.is_empty() {
            return Err(FetchError::MissingAcceptanceCriteria(id));
        }

        Ok(StoryInput {
            title: fields.title.unwrap_or_default(),
            description: fields
                .description
                .as_deref()
                .map(html_to_text)
                .unwrap_or_default(),
            acceptance_criteria,
        })
    }

    async fn create_work_item(
        &self,
        item_type: &str,
        operations: &[PatchOperation],
    ) -> Result<CreatedItem, TrackerError> {
        let url = format!(
            "{}/_apis/wit/workitems/${}?api-version={API_VERSION}",
            self.project_url,
            urlencoding::encode(item_type)
        );
        let body =
            serde_json::to_string(operations).map_err(|e| TrackerError::Request(e.to_string()))?;
        debug!(%url, %body, "creating work item");

        let resp = self
            .client
            .post(&url)
            .header("Authorization", &self.auth_header)
            .header("Content-Type", "application/json-patch+json")
            .header("Accept", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| TrackerError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let (status, message) = error_detail(resp).await;
            return Err(TrackerError::Api { status, message });
        }

        let item: WorkItemResponse = resp
            .json()
            .await
            .map_err(|e| TrackerError::Decode(e.to_string()))?;

        Ok(CreatedItem {
            id: WorkItemId(item.id),
            url: item.url,
        })
    }
}
