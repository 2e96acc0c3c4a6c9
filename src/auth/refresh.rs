//! Credential refresh with single-flight deduplication.

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use super::credentials::CredentialStore;
use crate::net::{HttpMethod, HttpRequest, HttpTransport};

type PendingRefresh = Shared<BoxFuture<'static, bool>>;

#[derive(Debug, Deserialize)]
struct RefreshResponse {
  access: String,
  #[serde(default)]
  refresh: Option<String>,
}

/// Exchanges the refresh token for a new access token.
///
/// At most one refresh is in flight at any time: callers arriving while one
/// runs await the same pending result instead of starting another.
#[derive(Clone)]
pub struct TokenRefreshCoordinator {
  inner: Arc<Inner>,
}

struct Inner {
  transport: Arc<dyn HttpTransport>,
  credentials: CredentialStore,
  refresh_url: String,
  /// Generation tag plus the shared pending refresh, if one is running.
  in_flight: Mutex<Option<(u64, PendingRefresh)>>,
  generation: AtomicU64,
}

impl TokenRefreshCoordinator {
  pub fn new(
    transport: Arc<dyn HttpTransport>,
    credentials: CredentialStore,
    refresh_url: impl Into<String>,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        transport,
        credentials,
        refresh_url: refresh_url.into(),
        in_flight: Mutex::new(None),
        generation: AtomicU64::new(0),
      }),
    }
  }

  /// Refresh the access token, returning whether it succeeded.
  ///
  /// Failure never clears stored credentials; deciding the session is lost is
  /// up to the caller.
  pub async fn refresh(&self) -> bool {
    let (generation, pending) = {
      let mut slot = self
        .inner
        .in_flight
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

      match slot.as_ref() {
        Some((generation, pending)) => {
          debug!("joining in-flight credential refresh");
          (*generation, pending.clone())
        }
        None => {
          let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
          let pending = perform_refresh(Arc::clone(&self.inner)).boxed().shared();
          *slot = Some((generation, pending.clone()));
          (generation, pending)
        }
      }
    };

    let refreshed = pending.await;

    // Only the refresh we awaited may be cleared; a newer one may already run.
    let mut slot = self
      .inner
      .in_flight
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    if matches!(slot.as_ref(), Some((current, _)) if *current == generation) {
      *slot = None;
    }

    refreshed
  }
}

async fn perform_refresh(inner: Arc<Inner>) -> bool {
  let Some(refresh_token) = inner.credentials.refresh_token() else {
    warn!("no refresh token stored, cannot refresh credentials");
    return false;
  };

  info!("refreshing access token");

  let request = HttpRequest::new(HttpMethod::Post, inner.refresh_url.clone())
    .header("Content-Type", "application/json")
    .json(&serde_json::json!({ "refresh": refresh_token }));

  let response = match inner.transport.send(request).await {
    Ok(response) => response,
    Err(e) => {
      warn!(error = %e, "token refresh request failed");
      return false;
    }
  };

  if !response.is_success() {
    warn!(status = response.status, "token refresh rejected");
    return false;
  }

  let tokens: RefreshResponse = match serde_json::from_slice(&response.body) {
    Ok(tokens) => tokens,
    Err(e) => {
      warn!(error = %e, "malformed token refresh response");
      return false;
    }
  };

  match inner.credentials.replace_if_current(
    &refresh_token,
    &tokens.access,
    tokens.refresh.as_deref(),
  ) {
    Ok(true) => {
      info!("access token refreshed");
      true
    }
    Ok(false) => {
      warn!("session changed during refresh, discarding new tokens");
      false
    }
    Err(e) => {
      warn!(error = %e, "failed to persist refreshed credentials");
      false
    }
  }
}
