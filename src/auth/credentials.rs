//! Access/refresh token persistence.

use color_eyre::{eyre::eyre, Result};
use tracing::warn;

use crate::storage::{keys, SharedStore};

/// The access/refresh token pair of an authenticated session.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
  pub access_token: String,
  pub refresh_token: String,
}

impl std::fmt::Debug for Credential {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Credential")
      .field("access_token", &redact(&self.access_token))
      .field("refresh_token", &redact(&self.refresh_token))
      .finish()
  }
}

/// Shorten a token for logging.
pub(crate) fn redact(token: &str) -> String {
  let prefix: String = token.chars().take(6).collect();
  format!("{}...", prefix)
}

/// Reads and writes the credential pair in durable storage.
///
/// Read failures are logged and reported as "no credential", which the rest
/// of the client treats exactly like being signed out.
#[derive(Clone)]
pub struct CredentialStore {
  store: SharedStore,
}

impl CredentialStore {
  pub fn new(store: SharedStore) -> Self {
    Self { store }
  }

  pub fn access_token(&self) -> Option<String> {
    self.read(keys::USER_TOKEN)
  }

  pub fn refresh_token(&self) -> Option<String> {
    self.read(keys::REFRESH_TOKEN)
  }

  /// The full credential, if both tokens are present.
  pub fn credential(&self) -> Option<Credential> {
    Some(Credential {
      access_token: self.access_token()?,
      refresh_token: self.refresh_token()?,
    })
  }

  /// Store a new access token and, if given, a new refresh token.
  ///
  /// Both keys are written in one atomic storage operation. Without a new
  /// refresh token the existing one is kept; if there is none, the write is
  /// rejected so the store never holds half a credential.
  pub fn set_credential(&self, access: &str, refresh: Option<&str>) -> Result<()> {
    match refresh {
      Some(refresh) => self
        .store
        .set_many(&[(keys::USER_TOKEN, access), (keys::REFRESH_TOKEN, refresh)]),
      None => {
        if self.refresh_token().is_none() {
          return Err(eyre!(
            "Refusing to store an access token without a refresh token"
          ));
        }
        self.store.set(keys::USER_TOKEN, access)
      }
    }
  }

  /// Store tokens obtained by refreshing `issued_for`.
  ///
  /// The write only happens while `issued_for` is still the stored refresh
  /// token, so a session cleared or replaced during the refresh stays that
  /// way. Returns whether the tokens were stored.
  pub fn replace_if_current(
    &self,
    issued_for: &str,
    access: &str,
    refresh: Option<&str>,
  ) -> Result<bool> {
    let refresh = refresh.unwrap_or(issued_for);
    self.store.set_many_if(
      (keys::REFRESH_TOKEN, issued_for),
      &[(keys::USER_TOKEN, access), (keys::REFRESH_TOKEN, refresh)],
    )
  }

  /// Remove both tokens.
  pub fn clear(&self) -> Result<()> {
    self
      .store
      .remove_many(&[keys::USER_TOKEN, keys::REFRESH_TOKEN])
  }

  fn read(&self, key: &str) -> Option<String> {
    match self.store.get(key) {
      Ok(stored) => stored.map(|s| s.value),
      Err(e) => {
        warn!(key, error = %e, "credential storage unavailable");
        None
      }
    }
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::storage::{KeyValueStore, MemoryStorage, StoredValue, UpdateFn};
  use std::sync::Arc;

  /// Storage that fails every operation.
  pub(crate) struct DeniedStorage;

  impl KeyValueStore for DeniedStorage {
    fn get(&self, _key: &str) -> Result<Option<StoredValue>> {
      Err(eyre!("storage access denied"))
    }

    fn set_many(&self, _entries: &[(&str, &str)]) -> Result<()> {
      Err(eyre!("storage full"))
    }

    fn set_many_if(&self, _guard: (&str, &str), _entries: &[(&str, &str)]) -> Result<bool> {
      Err(eyre!("storage full"))
    }

    fn remove_many(&self, _keys: &[&str]) -> Result<()> {
      Err(eyre!("storage access denied"))
    }

    fn update(&self, _key: &str, _apply: &mut UpdateFn<'_>) -> Result<()> {
      Err(eyre!("storage full"))
    }
  }

  #[test]
  fn test_set_and_read_credential() {
    let creds = CredentialStore::new(Arc::new(MemoryStorage::new()));
    assert!(creds.credential().is_none());

    creds.set_credential("access-1", Some("refresh-1")).unwrap();
    assert_eq!(
      creds.credential(),
      Some(Credential {
        access_token: "access-1".to_string(),
        refresh_token: "refresh-1".to_string(),
      })
    );
  }

  #[test]
  fn test_access_only_update_keeps_refresh() {
    let creds = CredentialStore::new(Arc::new(MemoryStorage::new()));
    creds.set_credential("access-1", Some("refresh-1")).unwrap();

    creds.set_credential("access-2", None).unwrap();
    assert_eq!(creds.access_token().as_deref(), Some("access-2"));
    assert_eq!(creds.refresh_token().as_deref(), Some("refresh-1"));
  }

  #[test]
  fn test_rejects_partial_credential() {
    let creds = CredentialStore::new(Arc::new(MemoryStorage::new()));

    assert!(creds.set_credential("access-1", None).is_err());
    assert!(creds.access_token().is_none());
  }

  #[test]
  fn test_replace_if_current() {
    let creds = CredentialStore::new(Arc::new(MemoryStorage::new()));
    creds.set_credential("access-1", Some("refresh-1")).unwrap();

    assert!(creds.replace_if_current("refresh-1", "access-2", None).unwrap());
    assert_eq!(creds.access_token().as_deref(), Some("access-2"));
    assert_eq!(creds.refresh_token().as_deref(), Some("refresh-1"));

    // Signed in again with a different session meanwhile
    creds.set_credential("access-9", Some("refresh-9")).unwrap();
    assert!(!creds.replace_if_current("refresh-1", "access-3", Some("refresh-3")).unwrap());
    assert_eq!(creds.access_token().as_deref(), Some("access-9"));

    creds.clear().unwrap();
    assert!(!creds.replace_if_current("refresh-9", "access-3", None).unwrap());
    assert!(creds.access_token().is_none());
    assert!(creds.refresh_token().is_none());
  }

  #[test]
  fn test_clear_removes_both_tokens() {
    let creds = CredentialStore::new(Arc::new(MemoryStorage::new()));
    creds.set_credential("a", Some("r")).unwrap();

    creds.clear().unwrap();
    assert!(creds.access_token().is_none());
    assert!(creds.refresh_token().is_none());
  }

  #[test]
  fn test_storage_failure_reads_as_signed_out() {
    let creds = CredentialStore::new(Arc::new(DeniedStorage));

    assert!(creds.access_token().is_none());
    assert!(creds.credential().is_none());
    assert!(creds.set_credential("a", Some("r")).is_err());
  }

  #[test]
  fn test_debug_redacts_tokens() {
    let credential = Credential {
      access_token: "eyJhbGciOiJIUzI1NiJ9.secret".to_string(),
      refresh_token: "eyJyZWZyZXNoIjp0cnVlfQ.secret".to_string(),
    };
    let printed = format!("{:?}", credential);
    assert!(!printed.contains("secret"));
  }
}
