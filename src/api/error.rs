//! Error taxonomy surfaced by the API client.

use serde_json::Value;
use thiserror::Error;

use crate::net::TransportError;

/// Errors returned (never raised) by [`ApiClient`](super::ApiClient) calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
  /// No connectivity. For reads, no cached response was available; for
  /// writes, `queued` holds the id of the mutation recorded for later sync.
  #[error("You are working in offline mode")]
  Offline { queued: Option<String> },

  /// The session could not be recovered; credentials have been cleared.
  #[error("Authorization required. Please sign in again.")]
  AuthRequired,

  /// HTTP 400 with per-field messages, flattened into one string.
  #[error("{0}")]
  Validation(String),

  /// Any other non-2xx status.
  #[error("HTTP error {status}: {body}")]
  Http { status: u16, body: String },

  /// Timeout, DNS failure, connection reset and the like.
  #[error("Network error: {0}")]
  Network(String),

  /// The response body was not the expected JSON.
  #[error("Failed to parse server response: {0}")]
  Parse(String),

  /// Local persistence failed while recording state.
  #[error("Local storage error: {0}")]
  Storage(String),
}

impl ApiError {
  /// Stable machine-readable code.
  pub fn code(&self) -> &'static str {
    match self {
      Self::Offline { .. } => "OFFLINE_MODE",
      Self::AuthRequired => "AUTH_REQUIRED",
      Self::Validation(_) => "VALIDATION_ERROR",
      Self::Http { .. } => "HTTP_ERROR",
      Self::Network(_) => "NETWORK_ERROR",
      Self::Parse(_) => "PARSE_ERROR",
      Self::Storage(_) => "STORAGE_ERROR",
    }
  }

  /// Build the error for a non-2xx response.
  pub(crate) fn from_status(status: u16, body: &str) -> Self {
    if status == 400 {
      if let Some(message) = validation_message(body) {
        return Self::Validation(message);
      }
    }
    Self::Http {
      status,
      body: body.to_string(),
    }
  }
}

impl From<TransportError> for ApiError {
  fn from(err: TransportError) -> Self {
    Self::Network(err.0)
  }
}

/// Flatten a validation body, a map of field to message list, such as
/// `{"name": ["required"], "phone": ["too short", "digits only"]}` into
/// `"name: required; phone: too short, digits only; "`.
///
/// Returns `None` when the body is not a field-to-messages object.
pub(crate) fn validation_message(body: &str) -> Option<String> {
  let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(body) else {
    return None;
  };
  if fields.is_empty() {
    return None;
  }

  let mut message = String::new();
  for (field, messages) in &fields {
    let joined = match messages {
      Value::Array(items) => items
        .iter()
        .map(|item| match item {
          Value::String(s) => Some(s.clone()),
          _ => None,
        })
        .collect::<Option<Vec<_>>>()?
        .join(", "),
      _ => return None,
    };
    message.push_str(&format!("{}: {}; ", field, joined));
  }

  Some(message)
}
