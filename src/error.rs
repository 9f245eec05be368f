use reqwest::StatusCode;
use thiserror::Error;

/// A raw command that cannot be mapped onto a browser action.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    #[error("{action} failed: missing parameter '{param}'")]
    MissingParam { action: String, param: &'static str },
}

/// Failure to turn free-form model text into a typed value.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no JSON {expected} found in model output")]
    NoJson { expected: &'static str },
    #[error("model output is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("model output has an invalid shape: {0}")]
    InvalidShape(#[source] serde_json::Error),
}

/// Why a model-backed decision could not be made.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("language model call failed")]
    Unavailable,
    #[error("language model returned an empty response")]
    Declined,
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// A single failed HTTP exchange with the model endpoint.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("provider throttled the request ({0})")]
    Throttled(StatusCode),
    #[error("provider returned {status}: {body}")]
    Http { status: StatusCode, body: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("response body is not valid JSON: {0}")]
    Body(#[source] serde_json::Error),
}

impl GatewayError {
    /// Rate limits and payment-required responses clear up on their own; everything else does not.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Throttled(_))
    }
}
