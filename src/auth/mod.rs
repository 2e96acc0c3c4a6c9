//! Session credentials: storage, refresh, login and logout.

mod credentials;
mod refresh;
mod session;

pub use credentials::{Credential, CredentialStore};
pub use refresh::TokenRefreshCoordinator;
pub use session::{LoginCredentials, User};

pub(crate) use credentials::redact;
pub(crate) use session::TokenResponse;

#[cfg(test)]
pub(crate) use credentials::tests::DeniedStorage;
