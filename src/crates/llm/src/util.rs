//! Shared helpers for provider clients.

use flowgraph_core::llm::LlmError;
use reqwest::StatusCode;

/// Map an HTTP error status to the uniform taxonomy.
pub(crate) fn status_to_error(provider: &str, status: StatusCode, body: String) -> LlmError {
    match status.as_u16() {
        401 | 403 => LlmError::Auth(format!("{provider}: {body}")),
        429 => LlmError::RateLimit(format!("{provider}: {body}")),
        408 | 504 => LlmError::Timeout(format!("{provider}: {body}")),
        _ => LlmError::Api(format!("{provider} API error {status}: {body}")),
    }
}

/// Map a reqwest transport error.
pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout(format!("{provider}: {err}"))
    } else {
        LlmError::Api(format!("{provider}: {err}"))
    }
}
