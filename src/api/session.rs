//! Sign-in, sign-out and the cached user profile.

use tracing::{info, warn};

use super::client::ApiClient;
use super::endpoints;
use super::error::ApiError;
use super::response::ApiResponse;
use crate::auth::{LoginCredentials, TokenResponse, User};
use crate::net::HttpMethod;
use crate::storage::keys;

impl ApiClient {
  /// Exchange username and password for a token pair.
  ///
  /// Stores both tokens and the user profile; the profile comes from the
  /// token response when present, otherwise from the current-user endpoint.
  /// Never queued: logging in requires connectivity.
  pub async fn login(&self, login: &LoginCredentials) -> Result<Option<User>, ApiError> {
    if !self.probe().is_online().await {
      return Err(ApiError::Offline { queued: None });
    }

    let body = serde_json::to_value(login)
      .map_err(|e| ApiError::Parse(format!("Failed to encode credentials: {}", e)))?;
    let response = self
      .send_online(HttpMethod::Post, endpoints::TOKEN, Some(&body))
      .await?;
    let tokens: TokenResponse =
      serde_json::from_value(response).map_err(|e| ApiError::Parse(e.to_string()))?;

    self
      .credentials()
      .set_credential(&tokens.access, Some(&tokens.refresh))
      .map_err(|e| ApiError::Storage(e.to_string()))?;
    info!(username = %login.username, "signed in");

    let user = match tokens.user {
      Some(user) => Some(user),
      None => match self.get::<User>(endpoints::CURRENT_USER).await.into_result() {
        Ok(user) => Some(user),
        Err(e) => {
          warn!(error = %e, "signed in but could not load the user profile");
          None
        }
      },
    };

    if let Some(user) = &user {
      self.store_user(user)?;
    }
    Ok(user)
  }

  /// Forget the session: both tokens and the cached profile.
  ///
  /// Queued mutations and cached responses are kept.
  pub fn logout(&self) -> Result<(), ApiError> {
    self
      .store()
      .remove_many(&[keys::USER_TOKEN, keys::REFRESH_TOKEN, keys::USER_DATA])
      .map_err(|e| ApiError::Storage(e.to_string()))?;
    info!("signed out");
    Ok(())
  }

  /// Profile stored at the last sign-in or profile refresh.
  pub fn current_user(&self) -> Option<User> {
    let stored = match self.store().get(keys::USER_DATA) {
      Ok(stored) => stored?,
      Err(e) => {
        warn!(error = %e, "failed to read stored user");
        return None;
      }
    };
    match serde_json::from_str(&stored.value) {
      Ok(user) => Some(user),
      Err(e) => {
        warn!(error = %e, "stored user profile is unreadable");
        None
      }
    }
  }

  pub fn is_authenticated(&self) -> bool {
    self.credentials().credential().is_some()
  }

  /// Reload the profile from the backend and store it.
  pub async fn refresh_user(&self) -> ApiResponse<User> {
    let response = self.get::<User>(endpoints::CURRENT_USER).await;
    if let ApiResponse::Fresh(user) = &response {
      if let Err(e) = self.store_user(user) {
        warn!(error = %e, "failed to store user profile");
      }
    }
    response
  }

  fn store_user(&self, user: &User) -> Result<(), ApiError> {
    let encoded = serde_json::to_string(user).map_err(|e| ApiError::Parse(e.to_string()))?;
    self
      .store()
      .set(keys::USER_DATA, &encoded)
      .map_err(|e| ApiError::Storage(e.to_string()))
  }
}
