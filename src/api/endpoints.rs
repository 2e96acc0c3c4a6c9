//! Typed builders for backend endpoint paths.
//!
//! Paths are relative to the configured API base URL.

/// Obtain a token pair with username and password.
pub const TOKEN: &str = "/token/";
/// Exchange a refresh token for a new access token.
pub const TOKEN_REFRESH: &str = "/token/refresh/";
pub const CURRENT_USER: &str = "/users/me/";
pub const PROFILE: &str = "/profile/";

pub const DELIVERIES: &str = "/deliveries/";
pub const AVAILABLE_DELIVERIES: &str = "/deliveries/available/";
pub const MY_ACTIVE_DELIVERIES: &str = "/deliveries/my/active/";
pub const MY_DELIVERY_HISTORY: &str = "/deliveries/my/history/";
/// Bulk reconciliation of offline delivery changes.
pub const DELIVERIES_SYNC: &str = "/deliveries/sync/";

pub fn delivery(id: u64) -> String {
  format!("{}{}/", DELIVERIES, id)
}

pub fn assign_delivery(id: u64) -> String {
  format!("{}{}/assign/", DELIVERIES, id)
}

pub fn unassign_delivery(id: u64) -> String {
  format!("{}{}/unassign/", DELIVERIES, id)
}

pub fn update_delivery_status(id: u64) -> String {
  format!("{}{}/update-status/", DELIVERIES, id)
}

pub fn update_delivery(id: u64) -> String {
  format!("{}{}/update-all/", DELIVERIES, id)
}

/// Whether `endpoint` is one of the token endpoints, which never get a
/// refresh-and-retry on 401.
pub fn is_auth_endpoint(endpoint: &str) -> bool {
  let path = strip_query(endpoint);
  path == TOKEN || path == TOKEN_REFRESH
}

/// Whether `endpoint` belongs to the delivery resource (and not to the bulk
/// sync endpoint itself).
pub fn is_delivery_endpoint(endpoint: &str) -> bool {
  let path = strip_query(endpoint);
  path.starts_with(DELIVERIES) && path != DELIVERIES_SYNC
}

/// Numeric delivery id in a path such as `/deliveries/42/update-status/`.
pub fn delivery_id(endpoint: &str) -> Option<u64> {
  strip_query(endpoint)
    .strip_prefix(DELIVERIES)?
    .split('/')
    .next()?
    .parse()
    .ok()
}

fn strip_query(endpoint: &str) -> &str {
  endpoint.split('?').next().unwrap_or(endpoint)
}
