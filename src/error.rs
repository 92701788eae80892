//! Error taxonomy shared by the API client, the query cache and mutations.

/// Failure of a fetch or a mutation.
///
/// Errors are `Clone` because one failure is handed to every caller that was
/// coalesced onto the same in-flight fetch, and a copy is kept in the cache
/// entry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
  /// No credential available. Drives a "please sign in" state.
  #[error("not authenticated")]
  Unauthenticated,
  /// Transport-level failure, including timeouts.
  #[error("network failure: {0}")]
  Network(String),
  /// Non-2xx response from the backend.
  #[error("server error {status}: {message}")]
  Server { status: u16, message: String },
  /// Client-side precondition failure. No request was sent.
  #[error("validation failed: {0}")]
  Validation(String),
  /// The response could not be decoded or broke a model invariant.
  #[error("invalid response: {0}")]
  InvalidResponse(String),
}

impl ApiError {
  pub fn validation(msg: impl Into<String>) -> Self {
    Self::Validation(msg.into())
  }

  /// Only transport failures are worth retrying.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::Network(_))
  }

  pub fn is_unauthenticated(&self) -> bool {
    matches!(self, Self::Unauthenticated)
  }

  /// HTTP status for server errors.
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Server { status, .. } => Some(*status),
      _ => None,
    }
  }
}

impl From<reqwest::Error> for ApiError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_decode() {
      Self::InvalidResponse(err.to_string())
    } else {
      Self::Network(err.to_string())
    }
  }
}

impl From<serde_json::Error> for ApiError {
  fn from(err: serde_json::Error) -> Self {
    Self::InvalidResponse(err.to_string())
  }
}
