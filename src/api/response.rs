use super::error::ApiError;

/// Outcome of an [`ApiClient`](super::ApiClient) call.
///
/// Data and error are mutually exclusive; `offline` distinguishes results
/// produced without reaching the backend from live failures.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse<T> {
  /// Live response from the backend
  Fresh(T),
  /// Served from the response cache while offline
  Cached(T),
  /// The call failed
  Failed { error: ApiError, offline: bool },
}

impl<T> ApiResponse<T> {
  pub(crate) fn failed(error: ApiError) -> Self {
    Self::Failed {
      error,
      offline: false,
    }
  }

  pub(crate) fn offline(error: ApiError) -> Self {
    Self::Failed {
      error,
      offline: true,
    }
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      Self::Fresh(data) | Self::Cached(data) => Some(data),
      Self::Failed { .. } => None,
    }
  }

  pub fn error(&self) -> Option<&ApiError> {
    match self {
      Self::Failed { error, .. } => Some(error),
      _ => None,
    }
  }

  /// Whether the result was produced without reaching the backend.
  pub fn is_offline(&self) -> bool {
    match self {
      Self::Fresh(_) => false,
      Self::Cached(_) => true,
      Self::Failed { offline, .. } => *offline,
    }
  }

  pub fn into_result(self) -> Result<T, ApiError> {
    match self {
      Self::Fresh(data) | Self::Cached(data) => Ok(data),
      Self::Failed { error, .. } => Err(error),
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiResponse<U> {
    match self {
      Self::Fresh(data) => ApiResponse::Fresh(f(data)),
      Self::Cached(data) => ApiResponse::Cached(f(data)),
      Self::Failed { error, offline } => ApiResponse::Failed { error, offline },
    }
  }
}
