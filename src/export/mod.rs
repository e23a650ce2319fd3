pub mod encoder;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::model::story::WorkItemId;
use crate::model::test_case::TestCase;
use crate::providers::{PatchOperation, Tracker};
use encoder::{encode_description, StepsEncoder};

pub const TEST_CASE_TYPE: &str = "Test Case";
pub const PARENT_LINK: &str = "System.LinkTypes.Hierarchy-Reverse";

/// The operations that create one test case and link it under its parent.
pub fn build_patch(case: &TestCase, parent_url: &str, encoder: StepsEncoder) -> Vec<PatchOperation> {
    vec![
        PatchOperation::add_field("System.Title", &case.title),
        PatchOperation::add_field("System.Description", encode_description(&case.description)),
        PatchOperation::add_field(encoder.field(), encoder.encode(&case.steps)),
        PatchOperation::add_relation(serde_json::json!({
            "rel": PARENT_LINK,
            "url": parent_url,
            "attributes": { "name": "Parent" },
        })),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PushOutcome {
    Created { id: WorkItemId },
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct ItemReport {
    pub title: String,
    pub outcome: PushOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    FullSuccess,
    PartialSuccess,
    FullFailure,
    /// The batch had no test cases.
    Nothing,
}

#[derive(Debug, Clone)]
pub struct PushReport {
    pub parent_id: WorkItemId,
    pub items: Vec<ItemReport>,
}

impl PushReport {
    pub fn success_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.outcome, PushOutcome::Created { .. }))
            .count()
    }

    pub fn error_count(&self) -> usize {
        self.items.len() - self.success_count()
    }

    pub fn outcome(&self) -> BatchOutcome {
        match (self.success_count(), self.error_count()) {
            (0, 0) => BatchOutcome::Nothing,
            (_, 0) => BatchOutcome::FullSuccess,
            (0, _) => BatchOutcome::FullFailure,
            _ => BatchOutcome::PartialSuccess,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().filter_map(|i| match &i.outcome {
            PushOutcome::Failed { reason } => Some((i.title.as_str(), reason.as_str())),
            PushOutcome::Created { .. } => None,
        })
    }

    pub fn message(&self) -> String {
        let ok = self.success_count();
        let failed = self.error_count();
        match self.outcome() {
            BatchOutcome::FullSuccess => format!(
                "Pushed {ok} test case(s) and linked them to work item {}.",
                self.parent_id
            ),
            BatchOutcome::PartialSuccess => {
                format!("Partial success: {ok} test case(s) pushed, {failed} failed.")
            }
            BatchOutcome::FullFailure => format!("Push failed: all {failed} test case(s) failed."),
            BatchOutcome::Nothing => "Nothing to push.".to_string(),
        }
    }
}

/// Pushes test cases into a tracker, one create request per case.
pub struct Exporter<'a> {
    tracker: &'a dyn Tracker,
    encoder: StepsEncoder,
    concurrency: usize,
}

impl<'a> Exporter<'a> {
    pub fn new(tracker: &'a dyn Tracker, encoder: StepsEncoder) -> Self {
        Self {
            tracker,
            encoder,
            concurrency: 1,
        }
    }

    /// 1 awaits each request before sending the next.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Every case is attempted; a failure is recorded and the batch moves on.
    /// Reports come back in input order whatever the concurrency.
    pub async fn push(&self, cases: &[TestCase], parent_id: WorkItemId) -> PushReport {
        let parent_url = self.tracker.work_item_url(parent_id);
        info!(
            tracker = self.tracker.name(),
            count = cases.len(),
            parent = %parent_id,
            field = self.encoder.field(),
            "pushing test cases"
        );

        let items = stream::iter(cases)
            .map(|case| {
                let ops = build_patch(case, &parent_url, self.encoder);
                async move {
                    let outcome = match self.tracker.create_work_item(TEST_CASE_TYPE, &ops).await {
                        Ok(created) => {
                            info!(
                                id = %created.id,
                                url = created.url.as_deref().unwrap_or_default(),
                                title = %case.title,
                                "created test case"
                            );
                            PushOutcome::Created { id: created.id }
                        }
                        Err(e) => {
                            warn!(title = %case.title, error = %e, "failed to create test case");
                            PushOutcome::Failed {
                                reason: e.to_string(),
                            }
                        }
                    };
                    ItemReport {
                        title: case.title.clone(),
                        outcome,
                    }
                }
            })
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        PushReport { parent_id, items }
    }
}
