//! Error taxonomy for the Quo backend boundary.

use thiserror::Error;

/// Failures crossing the HTTP boundary.
///
/// Three observable classes: authentication problems (callers drop the
/// stored session), transport problems (retryable by the user, never
/// automatically), and responses that do not match the expected shape.
#[derive(Debug, Error)]
pub enum ApiError {
  /// Missing, invalid, or expired credentials.
  #[error("Authentication failed: {0}")]
  Auth(String),

  /// Transport-level failure reaching the backend.
  #[error("Network error: {0}")]
  Network(String),

  /// Non-2xx response, with the backend's optional `detail` message.
  #[error("HTTP {status}: {detail}")]
  Status { status: u16, detail: String },

  /// Response decoded, but the expected fields were missing.
  #[error("Invalid data format received from server: {0}")]
  InvalidResponse(String),
}

impl ApiError {
  /// True for errors that should clear the stored session.
  pub fn is_auth(&self) -> bool {
    matches!(self, ApiError::Auth(_)) || matches!(self, ApiError::Status { status: 401 | 403, .. })
  }
}

impl From<reqwest::Error> for ApiError {
  fn from(err: reqwest::Error) -> Self {
    ApiError::Network(err.to_string())
  }
}
