use thiserror::Error;

use crate::model::story::WorkItemId;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "tracker configuration incomplete: missing {}. Run `storycase config set` to fill it in",
        .missing.join(", ")
    )]
    Incomplete { missing: Vec<&'static str> },
    #[error("configuration source `{0}` is read-only")]
    ReadOnly(String),
    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Failures of the model call itself. An empty or malformed answer is not one
/// of these.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("no API key configured for model backend `{0}`")]
    MissingApiKey(String),
    #[error("model request failed: {0}")]
    Request(String),
    #[error("model API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("failed to decode model response: {0}")]
    Decode(String),
    #[error("invalid output schema: {0}")]
    Schema(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("work item id must be a number, got `{0}`")]
    InvalidId(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("tracker request failed: {0}")]
    Request(String),
    #[error("tracker API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("failed to decode tracker response: {0}")]
    Decode(String),
    #[error("work item {0} has no acceptance criteria")]
    MissingAcceptanceCriteria(WorkItemId),
}

/// Failure creating a single work item. Counted per item, never fatal to a batch.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GuardError {
    #[error("a push is already in progress")]
    InFlight,
    #[error("these test cases were already pushed to {parent_id}; confirm to push them again")]
    ConfirmationRequired { parent_id: WorkItemId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_config_names_missing_fields() {
        let err = ConfigError::Incomplete {
            missing: vec!["pat", "project"],
        };
        let msg = err.to_string();
        assert!(msg.contains("pat, project"));
        assert!(msg.contains("config set"));
    }

    #[test]
    fn confirmation_error_names_parent() {
        let err = GuardError::ConfirmationRequired {
            parent_id: WorkItemId(77),
        };
        assert!(err.to_string().contains("77"));
    }
}
