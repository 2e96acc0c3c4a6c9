use serde::{Deserialize, Serialize};

/// Username/password pair posted to the token endpoint.
#[derive(Clone, Serialize)]
pub struct LoginCredentials {
  pub username: String,
  pub password: String,
}

impl std::fmt::Debug for LoginCredentials {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LoginCredentials")
      .field("username", &self.username)
      .finish_non_exhaustive()
  }
}

/// Profile of the signed-in courier, as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  pub id: u64,
  pub username: String,
  #[serde(default)]
  pub email: String,
  #[serde(default, alias = "firstName")]
  pub first_name: String,
  #[serde(default, alias = "lastName")]
  pub last_name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub phone: Option<String>,
}

/// Token endpoint response.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
  pub access: String,
  pub refresh: String,
  #[serde(default)]
  pub user: Option<User>,
}
