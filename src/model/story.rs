use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// The user story a batch of test cases is generated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryInput {
    pub title: String,
    pub description: String,
    pub acceptance_criteria: String,
}

const TITLE_LEN: (usize, usize) = (5, 100);
const DESCRIPTION_LEN: (usize, usize) = (10, 1000);
const CRITERIA_LEN: (usize, usize) = (10, 5000);

impl StoryInput {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        acceptance_criteria: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            acceptance_criteria: acceptance_criteria.into(),
        }
    }

    /// Length rules for stories typed in by hand. Every violated rule is
    /// reported, not just the first.
    pub fn validate_manual(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();
        check_len(&mut problems, "title", &self.title, TITLE_LEN);
        check_len(&mut problems, "description", &self.description, DESCRIPTION_LEN);
        check_len(
            &mut problems,
            "acceptance criteria",
            &self.acceptance_criteria,
            CRITERIA_LEN,
        );
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

fn check_len(problems: &mut Vec<String>, field: &str, value: &str, (min, max): (usize, usize)) {
    let len = value.trim().chars().count();
    if len < min {
        problems.push(format!("{field} must be at least {min} characters (got {len})"));
    } else if len > max {
        problems.push(format!("{field} must be at most {max} characters (got {len})"));
    }
}

/// Numeric id of a tracker work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItemId(pub u64);

impl FromStr for WorkItemId {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
            return Err(FetchError::InvalidId(s.to_string()));
        }
        trimmed
            .parse::<u64>()
            .map(WorkItemId)
            .map_err(|_| FetchError::InvalidId(s.to_string()))
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
