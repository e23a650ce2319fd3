use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One action to perform and what should be observed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TestStep {
    /// The specific action to perform in this step. Must not be empty.
    #[schemars(length(min = 1))]
    pub action: String,
    /// The observable result expected after the action. Must not be empty.
    #[schemars(length(min = 1))]
    pub expected_result: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    /// A short descriptive title, unique among the cases generated for the same story.
    #[schemars(length(min = 1))]
    pub title: String,
    /// A brief summary of what this test case verifies.
    #[schemars(length(min = 1))]
    pub description: String,
    /// Ordered steps, at least one.
    #[schemars(length(min = 1))]
    pub steps: Vec<TestStep>,
}

/// Output of a generation run. An empty list is a normal outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    /// Test cases derived from the user story.
    pub test_cases: Vec<TestCase>,
}

impl GenerationResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.test_cases.is_empty()
    }

    /// Titles used by more than one case, compared case-insensitively.
    /// Returned in first-seen order.
    pub fn duplicate_titles(&self) -> Vec<String> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut order = Vec::new();
        for case in &self.test_cases {
            let key = case.title.trim().to_lowercase();
            let count = counts.entry(key.clone()).or_insert(0);
            *count += 1;
            if *count == 2 {
                order.push(case.title.trim().to_string());
            }
        }
        order
    }
}

impl TestStep {
    pub fn new(action: impl Into<String>, expected_result: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            expected_result: expected_result.into(),
        }
    }
}
