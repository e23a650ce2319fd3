pub mod gemini;
pub mod prompt;
pub mod schema;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::GenerateError;
use crate::model::story::StoryInput;
use crate::model::test_case::GenerationResult;
use prompt::{build_summary_prompt, build_test_case_prompt};
use schema::SchemaContract;

/// A prompt plus the schema the answer has to follow, in the backend's dialect.
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    pub prompt: String,
    pub response_schema: Value,
}

#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn name(&self) -> &str;
    /// Raw JSON text of the answer. `Ok(None)` when the model answered
    /// without content; errors are reserved for the call itself failing.
    async fn generate_json(&self, request: &StructuredRequest)
        -> Result<Option<String>, GenerateError>;
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CriteriaSummary {
    /// A summary of the acceptance criteria.
    #[schemars(length(min = 1))]
    pub summary: String,
}

pub struct Generator {
    backend: Box<dyn ModelBackend>,
    language: String,
    cases: SchemaContract<GenerationResult>,
    summary: SchemaContract<CriteriaSummary>,
}

impl Generator {
    pub fn new(backend: Box<dyn ModelBackend>, language: impl Into<String>) -> Result<Self, GenerateError> {
        Ok(Self {
            backend,
            language: language.into(),
            cases: SchemaContract::new()?,
            summary: SchemaContract::new()?,
        })
    }

    /// Unusable model output comes back as an empty result, not an error.
    pub async fn generate(&self, story: &StoryInput) -> Result<GenerationResult, GenerateError> {
        let request = StructuredRequest {
            prompt: build_test_case_prompt(story, &self.language),
            response_schema: self.cases.response_schema(),
        };
        info!(backend = self.backend.name(), title = %story.title, "generating test cases");

        let Some(raw) = self.backend.generate_json(&request).await? else {
            warn!("model returned no output");
            return Ok(GenerationResult::empty());
        };

        match self.cases.parse(&raw) {
            Ok(result) => {
                let duplicates = result.duplicate_titles();
                if !duplicates.is_empty() {
                    warn!(titles = ?duplicates, "generated test cases share titles");
                }
                info!(count = result.test_cases.len(), "generated test cases");
                Ok(result)
            }
            Err(rejection) => {
                warn!(%rejection, "discarding model output");
                Ok(GenerationResult::empty())
            }
        }
    }

    pub async fn summarize_criteria(
        &self,
        acceptance_criteria: &str,
    ) -> Result<Option<String>, GenerateError> {
        let request = StructuredRequest {
            prompt: build_summary_prompt(acceptance_criteria),
            response_schema: self.summary.response_schema(),
        };
        let Some(raw) = self.backend.generate_json(&request).await? else {
            return Ok(None);
        };
        match self.summary.parse(&raw) {
            Ok(s) => Ok(Some(s.summary)),
            Err(rejection) => {
                warn!(%rejection, "discarding summary output");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use serde_json::json;

    /// Replays canned answers and records the requests it was sent.
    struct ScriptedBackend {
        answer: Result<Option<String>, u16>,
        requests: Arc<Mutex<Vec<StructuredRequest>>>,
    }

    impl ScriptedBackend {
        fn answering(answer: Option<&str>) -> Self {
            Self {
                answer: Ok(answer.map(String::from)),
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn failing(status: u16) -> Self {
            Self {
                answer: Err(status),
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate_json(
            &self,
            request: &StructuredRequest,
        ) -> Result<Option<String>, GenerateError> {
            self.requests.lock().unwrap().push(request.clone());
            match &self.answer {
                Ok(a) => Ok(a.clone()),
                Err(status) => Err(GenerateError::Api {
                    status: *status,
                    message: "API key not valid".into(),
                }),
            }
        }
    }

    fn story() -> StoryInput {
        StoryInput::new(
            "Login",
            "User logs in",
            "Given valid credentials, when submitted, then user reaches dashboard",
        )
    }

    fn login_answer() -> String {
        json!({
            "testCases": [{
                "title": "Verify login with valid credentials",
                "description": "Checks the happy path",
                "steps": [{
                    "action": "Enter valid username and password",
                    "expectedResult": "Dashboard is displayed"
                }]
            }]
        })
        .to_string()
    }

    fn generator(backend: ScriptedBackend) -> Generator {
        Generator::new(Box::new(backend), "English").unwrap()
    }

    #[tokio::test]
    async fn valid_output_is_returned() {
        let answer = login_answer();
        let result = generator(ScriptedBackend::answering(Some(&answer)))
            .generate(&story())
            .await
            .unwrap();
        assert_eq!(result.test_cases.len(), 1);
        let case = &result.test_cases[0];
        assert_eq!(case.title, "Verify login with valid credentials");
        assert_eq!(case.steps[0].action, "Enter valid username and password");
    }

    #[tokio::test]
    async fn every_accepted_case_satisfies_field_rules() {
        let answer = json!({
            "testCases": [
                { "title": "A", "description": "a", "steps": [{ "action": "x", "expectedResult": "y" }] },
                { "title": "B", "description": "b", "steps": [
                    { "action": "x1", "expectedResult": "y1" },
                    { "action": "x2", "expectedResult": "y2" }
                ] }
            ]
        })
        .to_string();
        let result = generator(ScriptedBackend::answering(Some(&answer)))
            .generate(&story())
            .await
            .unwrap();
        for case in &result.test_cases {
            assert!(!case.title.is_empty());
            assert!(!case.description.is_empty());
            assert!(!case.steps.is_empty());
            for step in &case.steps {
                assert!(!step.action.is_empty());
                assert!(!step.expected_result.is_empty());
            }
        }
    }

    #[tokio::test]
    async fn schema_violation_gives_empty_result() {
        let answer = json!({
            "testCases": [{ "title": "A", "description": "a", "steps": [] }]
        })
        .to_string();
        let result = generator(ScriptedBackend::answering(Some(&answer)))
            .generate(&story())
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn one_bad_case_discards_the_whole_answer() {
        let answer = json!({
            "testCases": [
                { "title": "A", "description": "a", "steps": [{ "action": "x", "expectedResult": "y" }] },
                { "title": "", "description": "b", "steps": [{ "action": "x", "expectedResult": "y" }] }
            ]
        })
        .to_string();
        let result = generator(ScriptedBackend::answering(Some(&answer)))
            .generate(&story())
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn absent_output_gives_empty_result() {
        let result = generator(ScriptedBackend::answering(None))
            .generate(&story())
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn prose_output_gives_empty_result() {
        let result = generator(ScriptedBackend::answering(Some("I cannot help with that.")))
            .generate(&story())
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn duplicate_titles_are_kept() {
        let answer = json!({
            "testCases": [
                { "title": "Same", "description": "a", "steps": [{ "action": "x", "expectedResult": "y" }] },
                { "title": "Same", "description": "b", "steps": [{ "action": "x", "expectedResult": "y" }] }
            ]
        })
        .to_string();
        let result = generator(ScriptedBackend::answering(Some(&answer)))
            .generate(&story())
            .await
            .unwrap();
        assert_eq!(result.test_cases.len(), 2);
    }

    #[tokio::test]
    async fn transport_failure_is_an_error() {
        let err = generator(ScriptedBackend::failing(403))
            .generate(&story())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerateError::Api { status: 403, .. }));
    }

    #[tokio::test]
    async fn request_carries_prompt_and_schema() {
        let backend = ScriptedBackend::answering(None);
        let requests = backend.requests.clone();
        generator(backend).generate(&story()).await.unwrap();

        let sent = requests.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].prompt.contains("Title: Login"));
        assert!(sent[0].prompt.contains("in English"));
        assert_eq!(sent[0].response_schema["type"], "OBJECT");
        assert!(sent[0].response_schema["properties"]["testCases"].is_object());
    }

    #[tokio::test]
    async fn summary_is_extracted() {
        let backend = ScriptedBackend::answering(Some(r#"{"summary": "Login with valid credentials"}"#));
        let summary = generator(backend)
            .summarize_criteria("Given valid credentials...")
            .await
            .unwrap();
        assert_eq!(summary.as_deref(), Some("Login with valid credentials"));
    }

    #[tokio::test]
    async fn empty_summary_is_none() {
        let backend = ScriptedBackend::answering(Some(r#"{"summary": ""}"#));
        let summary = generator(backend).summarize_criteria("AC").await.unwrap();
        assert_eq!(summary, None);
    }
}
