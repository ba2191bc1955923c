use thiserror::Error;

/// Everything that can go wrong between reading the settings and producing a PSU verdict.
/// None of these ever reach the host; the boundary operations log them and degrade to "off".
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("setting `{key}` has an unexpected type: {source}")]
    ConfigTypeMismatch {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid HTTP method {0:?}")]
    InvalidMethod(String),

    #[error("request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("evaluation rule must be a string, got {0}")]
    InvalidRule(String),

    #[error("failed to run evaluation rule: {0}")]
    EvaluationRule(String),
}
