use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::azure_devops::AzureDevOpsTracker;
use super::{CreatedItem, PatchOperation, Tracker};
use crate::config::Credentials;
use crate::error::{FetchError, TrackerError};
use crate::model::story::{StoryInput, WorkItemId};

/// A tracker that records create calls and fails for chosen titles.
pub struct MockTracker {
    pub created: Arc<Mutex<Vec<(String, Vec<PatchOperation>)>>>,
    failing_titles: Vec<String>,
    delays: HashMap<String, Duration>,
    next_id: Mutex<u64>,
}

impl MockTracker {
    pub fn new() -> Self {
        Self {
            created: Arc::new(Mutex::new(Vec::new())),
            failing_titles: Vec::new(),
            delays: HashMap::new(),
            next_id: Mutex::new(500),
        }
    }

    pub fn failing_on(mut self, title: &str) -> Self {
        self.failing_titles.push(title.to_string());
        self
    }

    pub fn delaying(mut self, title: &str, millis: u64) -> Self {
        self.delays
            .insert(title.to_string(), Duration::from_millis(millis));
        self
    }

    fn title_of(operations: &[PatchOperation]) -> String {
        operations
            .iter()
            .find(|op| op.path == "/fields/System.Title")
            .and_then(|op| op.value.as_str())
            .unwrap_or_default()
            .to_string()
    }
}

#[async_trait]
impl Tracker for MockTracker {
    fn name(&self) -> &str {
        "mock"
    }

    fn work_item_url(&self, id: WorkItemId) -> String {
        format!("https://tracker.test/_apis/wit/workitems/{id}")
    }

    async fn fetch_story(&self, id: WorkItemId) -> Result<StoryInput, FetchError> {
        Err(FetchError::MissingAcceptanceCriteria(id))
    }

    async fn create_work_item(
        &self,
        item_type: &str,
        operations: &[PatchOperation],
    ) -> Result<CreatedItem, TrackerError> {
        let title = Self::title_of(operations);
        if let Some(delay) = self.delays.get(&title) {
            tokio::time::sleep(*delay).await;
        }
        self.created
            .lock()
            .unwrap()
            .push((item_type.to_string(), operations.to_vec()));
        if self.failing_titles.contains(&title) {
            return Err(TrackerError::Api {
                status: 400,
                message: format!("rejected {title}"),
            });
        }
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        Ok(CreatedItem {
            id: WorkItemId(*next),
            url: None,
        })
    }
}

struct Recorded {
    method: String,
    url: String,
    authorization: Option<String>,
    content_type: Option<String>,
    body: String,
}

/// Answers a single request with `status` and `body`, handing back what it saw.
fn serve_once(status: u16, body: &'static str) -> (String, std::thread::JoinHandle<Recorded>) {
    let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_ip().unwrap();
    let handle = std::thread::spawn(move || {
        let mut request = server.recv().unwrap();
        let mut received = String::new();
        request.as_reader().read_to_string(&mut received).unwrap();
        let header = |name: &'static str| {
            request
                .headers()
                .iter()
                .find(|h| h.field.equiv(name))
                .map(|h| h.value.as_str().to_string())
        };
        let recorded = Recorded {
            method: request.method().as_str().to_string(),
            url: request.url().to_string(),
            authorization: header("Authorization"),
            content_type: header("Content-Type"),
            body: received,
        };
        request
            .respond(tiny_http::Response::from_string(body).with_status_code(status))
            .unwrap();
        recorded
    });
    (format!("http://{addr}"), handle)
}

fn tracker(base_url: String) -> AzureDevOpsTracker {
    AzureDevOpsTracker::new(
        base_url,
        Credentials {
            pat: "secret".into(),
            organization: "acme".into(),
            project: "Web Shop".into(),
        },
    )
}

#[test]
fn work_item_url_encodes_project() {
    let t = tracker("https://dev.azure.com/".into());
    assert_eq!(
        t.work_item_url(WorkItemId(42)),
        "https://dev.azure.com/acme/Web%20Shop/_apis/wit/workitems/42"
    );
}

#[tokio::test]
async fn fetch_story_strips_markup() {
    let (base, server) = serve_once(
        200,
        r#"{
            "id": 42,
            "fields": {
                "System.Title": "Login",
                "System.Description": "<div>User&nbsp;logs in</div>",
                "Microsoft.VSTS.Common.AcceptanceCriteria": "<ul><li>Valid credentials</li><li>Dashboard shown</li></ul>"
            }
        }"#,
    );
    let story = tracker(base).fetch_story(WorkItemId(42)).await.unwrap();
    let seen = server.join().unwrap();

    assert_eq!(story.title, "Login");
    assert_eq!(story.description, "User logs in");
    assert!(story.acceptance_criteria.contains("Valid credentials"));
    assert!(story.acceptance_criteria.contains("Dashboard shown"));
    assert!(!story.acceptance_criteria.contains('<'));

    assert_eq!(seen.method, "GET");
    assert!(seen.url.starts_with("/acme/Web%20Shop/_apis/wit/workitems/42?"));
    assert!(seen.url.contains("api-version=7.1"));
    // base64(":secret")
    assert_eq!(seen.authorization.as_deref(), Some("Basic OnNlY3JldA=="));
}

#[tokio::test]
async fn fetch_story_without_criteria_fails() {
    let (base, server) = serve_once(
        200,
        r#"{ "id": 7, "fields": { "System.Title": "No AC", "Microsoft.VSTS.Common.AcceptanceCriteria": "<div> </div>" } }"#,
    );
    let err = tracker(base).fetch_story(WorkItemId(7)).await.unwrap_err();
    server.join().unwrap();
    assert!(matches!(err, FetchError::MissingAcceptanceCriteria(WorkItemId(7))));
}

#[tokio::test]
async fn fetch_story_reports_tracker_message() {
    let (base, server) = serve_once(
        404,
        r#"{ "message": "TF401232: Work item 9 does not exist." }"#,
    );
    let err = tracker(base).fetch_story(WorkItemId(9)).await.unwrap_err();
    server.join().unwrap();
    match err {
        FetchError::Api { status, message } => {
            assert_eq!(status, 404);
            assert!(message.contains("TF401232"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn create_sends_json_patch() {
    let (base, server) = serve_once(
        200,
        r#"{ "id": 501, "url": "https://dev.azure.com/acme/_apis/wit/workItems/501" }"#,
    );
    let ops = vec![PatchOperation::add_field("System.Title", "Verify login")];
    let created = tracker(base)
        .create_work_item("Test Case", &ops)
        .await
        .unwrap();
    let seen = server.join().unwrap();

    assert_eq!(created.id, WorkItemId(501));
    assert_eq!(seen.method, "POST");
    assert!(seen
        .url
        .starts_with("/acme/Web%20Shop/_apis/wit/workitems/$Test%20Case?"));
    assert_eq!(seen.content_type.as_deref(), Some("application/json-patch+json"));

    let body: Value = serde_json::from_str(&seen.body).unwrap();
    assert_eq!(body[0]["op"], "add");
    assert_eq!(body[0]["path"], "/fields/System.Title");
    assert_eq!(body[0]["value"], "Verify login");
}

#[tokio::test]
async fn create_failure_carries_status_and_reason() {
    let (base, server) = serve_once(401, "");
    let err = tracker(base)
        .create_work_item("Test Case", &[])
        .await
        .unwrap_err();
    server.join().unwrap();
    match err {
        TrackerError::Api { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "Unauthorized");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
