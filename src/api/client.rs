//! Offline-aware API client with transparent credential refresh.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::endpoints;
use super::error::ApiError;
use super::response::ApiResponse;
use crate::auth::{redact, CredentialStore, TokenRefreshCoordinator};
use crate::cache::ResponseCache;
use crate::net::{ConnectivityProbe, HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use crate::storage::SharedStore;
use crate::sync::{MutationQueue, QueuedMutation};

/// Transparent retries allowed per call after a successful refresh.
const MAX_AUTH_RETRIES: u32 = 1;

/// Client for the courier backend.
///
/// Every call checks connectivity first. Online calls carry the stored access
/// token and recover from one expired token by refreshing it; successful GET
/// bodies are cached. Offline, GETs are served from that cache and writes are
/// queued for the [`SyncEngine`](crate::sync::SyncEngine).
///
/// Cloning is cheap; clones share storage and the in-flight refresh.
#[derive(Clone)]
pub struct ApiClient {
  base_url: Arc<str>,
  transport: Arc<dyn HttpTransport>,
  probe: ConnectivityProbe,
  credentials: CredentialStore,
  refresher: TokenRefreshCoordinator,
  cache: ResponseCache,
  queue: MutationQueue,
  store: SharedStore,
}

impl ApiClient {
  /// Create a client for the API rooted at `base_url` (e.g. `http://host/api`).
  pub fn new(
    base_url: impl Into<String>,
    transport: Arc<dyn HttpTransport>,
    probe: ConnectivityProbe,
    store: SharedStore,
  ) -> Self {
    let base_url: String = base_url.into();
    let base_url: Arc<str> = Arc::from(base_url.trim_end_matches('/'));

    let credentials = CredentialStore::new(Arc::clone(&store));
    let refresher = TokenRefreshCoordinator::new(
      Arc::clone(&transport),
      credentials.clone(),
      format!("{}{}", base_url, endpoints::TOKEN_REFRESH),
    );

    Self {
      base_url,
      transport,
      probe,
      credentials,
      refresher,
      cache: ResponseCache::new(Arc::clone(&store)),
      queue: MutationQueue::new(Arc::clone(&store)),
      store,
    }
  }

  /// Limit how old a cached response may be when served offline.
  pub fn with_cache_ttl(mut self, ttl: Option<chrono::Duration>) -> Self {
    self.cache = self.cache.with_ttl(ttl);
    self
  }

  pub fn credentials(&self) -> &CredentialStore {
    &self.credentials
  }

  pub fn queue(&self) -> &MutationQueue {
    &self.queue
  }

  pub fn probe(&self) -> &ConnectivityProbe {
    &self.probe
  }

  pub fn cache(&self) -> &ResponseCache {
    &self.cache
  }

  pub(crate) fn store(&self) -> &SharedStore {
    &self.store
  }

  pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> ApiResponse<T> {
    self.request(HttpMethod::Get, endpoint, None).await
  }

  pub async fn post<T, B>(&self, endpoint: &str, body: &B) -> ApiResponse<T>
  where
    T: DeserializeOwned,
    B: Serialize + ?Sized,
  {
    self.request_with_body(HttpMethod::Post, endpoint, body).await
  }

  pub async fn put<T, B>(&self, endpoint: &str, body: &B) -> ApiResponse<T>
  where
    T: DeserializeOwned,
    B: Serialize + ?Sized,
  {
    self.request_with_body(HttpMethod::Put, endpoint, body).await
  }

  pub async fn patch<T, B>(&self, endpoint: &str, body: &B) -> ApiResponse<T>
  where
    T: DeserializeOwned,
    B: Serialize + ?Sized,
  {
    self.request_with_body(HttpMethod::Patch, endpoint, body).await
  }

  pub async fn delete<T: DeserializeOwned>(&self, endpoint: &str) -> ApiResponse<T> {
    self.request(HttpMethod::Delete, endpoint, None).await
  }

  async fn request_with_body<T, B>(&self, method: HttpMethod, endpoint: &str, body: &B) -> ApiResponse<T>
  where
    T: DeserializeOwned,
    B: Serialize + ?Sized,
  {
    match serde_json::to_value(body) {
      Ok(body) => self.request(method, endpoint, Some(body)).await,
      Err(e) => ApiResponse::failed(ApiError::Parse(format!(
        "Failed to encode request body: {}",
        e
      ))),
    }
  }

  /// Perform one call with the full online/offline protocol.
  pub async fn request<T: DeserializeOwned>(
    &self,
    method: HttpMethod,
    endpoint: &str,
    body: Option<Value>,
  ) -> ApiResponse<T> {
    if !self.probe.is_online().await {
      return self.offline_response(method, endpoint, body);
    }

    match self.send_online(method, endpoint, body.as_ref()).await {
      Ok(value) => {
        if method == HttpMethod::Get {
          if let Err(e) = self.cache.store(endpoint, &value) {
            warn!(endpoint, error = %e, "failed to cache response");
          }
        }
        match serde_json::from_value(value) {
          Ok(data) => ApiResponse::Fresh(data),
          Err(e) => ApiResponse::failed(ApiError::Parse(e.to_string())),
        }
      }
      Err(error) => ApiResponse::failed(error),
    }
  }

  fn offline_response<T: DeserializeOwned>(
    &self,
    method: HttpMethod,
    endpoint: &str,
    body: Option<Value>,
  ) -> ApiResponse<T> {
    if !method.is_mutating() {
      return match self.cache.load(endpoint) {
        Ok(Some(cached)) => {
          debug!(endpoint, cached_at = %cached.cached_at, "serving cached response offline");
          match serde_json::from_value(cached.value) {
            Ok(data) => ApiResponse::Cached(data),
            Err(e) => ApiResponse::offline(ApiError::Parse(e.to_string())),
          }
        }
        Ok(None) => ApiResponse::offline(ApiError::Offline { queued: None }),
        Err(e) => {
          warn!(endpoint, error = %e, "failed to read response cache");
          ApiResponse::offline(ApiError::Offline { queued: None })
        }
      };
    }

    // Token requests carry passwords and are meaningless later
    if endpoints::is_auth_endpoint(endpoint) {
      return ApiResponse::offline(ApiError::Offline { queued: None });
    }

    let mutation = QueuedMutation::new(endpoint, method, body);
    let id = mutation.id.clone();
    match self.queue.enqueue(mutation) {
      Ok(()) => {
        info!(%method, endpoint, id = %id, "offline, mutation queued for sync");
        ApiResponse::offline(ApiError::Offline { queued: Some(id) })
      }
      Err(e) => {
        warn!(%method, endpoint, error = %e, "failed to queue offline mutation");
        ApiResponse::offline(ApiError::Storage(e.to_string()))
      }
    }
  }

  /// Send a request to the backend, bypassing the connectivity gate.
  ///
  /// On 401 from a non-auth endpoint the session is recovered at most
  /// [`MAX_AUTH_RETRIES`] times; after that the credentials are cleared and
  /// [`ApiError::AuthRequired`] is returned.
  pub(crate) async fn send_online(
    &self,
    method: HttpMethod,
    endpoint: &str,
    body: Option<&Value>,
  ) -> Result<Value, ApiError> {
    let mut auth_retries = 0;

    loop {
      let token = self.credentials.access_token();
      let request = self.build_request(method, endpoint, body, token.as_deref());

      debug!(%method, endpoint, "sending request");
      let response = self.transport.send(request).await.map_err(|e| {
        warn!(%method, endpoint, error = %e, "request failed");
        ApiError::from(e)
      })?;
      debug!(%method, endpoint, status = response.status, "received response");

      if response.status == 401 && !endpoints::is_auth_endpoint(endpoint) {
        if auth_retries < MAX_AUTH_RETRIES && self.recover_session(token.as_deref()).await {
          auth_retries += 1;
          continue;
        }

        warn!(endpoint, "session could not be recovered, clearing credentials");
        if let Err(e) = self.credentials.clear() {
          warn!(error = %e, "failed to clear credentials");
        }
        return Err(ApiError::AuthRequired);
      }

      return decode(response);
    }
  }

  /// Make a fresh access token available after a 401.
  async fn recover_session(&self, rejected_token: Option<&str>) -> bool {
    if let Some(current) = self.credentials.access_token() {
      if rejected_token != Some(current.as_str()) {
        debug!(token = %redact(&current), "access token already replaced, retrying");
        return true;
      }
    }
    self.refresher.refresh().await
  }

  fn build_request(
    &self,
    method: HttpMethod,
    endpoint: &str,
    body: Option<&Value>,
    token: Option<&str>,
  ) -> HttpRequest {
    let mut request = HttpRequest::new(method, format!("{}{}", self.base_url, endpoint))
      .header("Content-Type", "application/json");

    if let Some(token) = token {
      if !endpoints::is_auth_endpoint(endpoint) {
        request = request.header("Authorization", format!("Bearer {}", token));
      }
    }
    if let Some(body) = body {
      request = request.json(body);
    }

    request
  }
}

fn decode(response: HttpResponse) -> Result<Value, ApiError> {
  if !response.is_success() {
    let body = response.text();
    warn!(status = response.status, body = %body, "backend returned an error");
    return Err(ApiError::from_status(response.status, &body));
  }

  if response.body.iter().all(u8::is_ascii_whitespace) {
    return Ok(Value::Null);
  }

  serde_json::from_slice(&response.body).map_err(|e| ApiError::Parse(e.to_string()))
}
