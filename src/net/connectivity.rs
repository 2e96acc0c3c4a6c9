//! Reachability reporting.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Source of network state, e.g. the platform's connectivity service.
#[async_trait]
pub trait NetworkStateProvider: Send + Sync {
  /// Whether the backend is currently reachable.
  ///
  /// An `Err` means the provider itself is broken, not that the network is down.
  async fn is_reachable(&self) -> Result<bool>;
}

/// Reports whether the client should attempt network traffic.
///
/// With [`with_max_age`](Self::with_max_age) the last answer is reused for
/// that long, so back-to-back calls do not each pay for a provider round trip.
/// Clones share the remembered answer.
#[derive(Clone)]
pub struct ConnectivityProbe {
  provider: Arc<dyn NetworkStateProvider>,
  max_age: Option<Duration>,
  last: Arc<Mutex<Option<(Instant, bool)>>>,
}

impl ConnectivityProbe {
  pub fn new(provider: Arc<dyn NetworkStateProvider>) -> Self {
    Self {
      provider,
      max_age: None,
      last: Arc::new(Mutex::new(None)),
    }
  }

  /// Reuse a provider answer for up to `max_age`.
  pub fn with_max_age(mut self, max_age: Duration) -> Self {
    self.max_age = Some(max_age);
    self
  }

  /// Best-effort online check.
  ///
  /// A failing provider reports online, so a broken status subsystem cannot
  /// block all traffic.
  pub async fn is_online(&self) -> bool {
    match self.recent() {
      Some(online) => online,
      None => self.check_now().await,
    }
  }

  /// Ask the provider, ignoring and then replacing any remembered answer.
  pub async fn check_now(&self) -> bool {
    let online = match self.provider.is_reachable().await {
      Ok(online) => online,
      Err(e) => {
        warn!(error = %e, "network state provider failed, assuming online");
        true
      }
    };

    if self.max_age.is_some() {
      *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some((Instant::now(), online));
    }
    online
  }

  fn recent(&self) -> Option<bool> {
    let max_age = self.max_age?;
    let last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
    match *last {
      Some((at, online)) if at.elapsed() < max_age => Some(online),
      _ => None,
    }
  }
}

/// Provider driven explicitly by the host (or by tests).
#[derive(Clone, Debug)]
pub struct ManualSwitch {
  online: Arc<AtomicBool>,
}

impl ManualSwitch {
  pub fn new(online: bool) -> Self {
    Self {
      online: Arc::new(AtomicBool::new(online)),
    }
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }
}

#[async_trait]
impl NetworkStateProvider for ManualSwitch {
  async fn is_reachable(&self) -> Result<bool> {
    Ok(self.online.load(Ordering::SeqCst))
  }
}

/// Provider that treats a successful TCP connect to the backend as online.
#[derive(Clone, Debug)]
pub struct TcpReachability {
  address: String,
  timeout: Duration,
}

impl TcpReachability {
  pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
    Self {
      address: address.into(),
      timeout,
    }
  }

  /// Derive the `host:port` to probe from the API base URL.
  pub fn for_base_url(base_url: &str, timeout: Duration) -> Result<Self> {
    let url =
      url::Url::parse(base_url).map_err(|e| eyre!("Invalid API URL '{}': {}", base_url, e))?;
    let host = url
      .host_str()
      .ok_or_else(|| eyre!("API URL '{}' has no host", base_url))?;
    let port = url
      .port_or_known_default()
      .ok_or_else(|| eyre!("API URL '{}' has no port", base_url))?;

    Ok(Self::new(format!("{}:{}", host, port), timeout))
  }

  pub fn address(&self) -> &str {
    &self.address
  }
}

#[async_trait]
impl NetworkStateProvider for TcpReachability {
  async fn is_reachable(&self) -> Result<bool> {
    match tokio::time::timeout(self.timeout, TcpStream::connect(&self.address)).await {
      Ok(Ok(_)) => Ok(true),
      Ok(Err(e)) => {
        debug!(address = %self.address, error = %e, "backend unreachable");
        Ok(false)
      }
      Err(_) => {
        debug!(address = %self.address, "reachability probe timed out");
        Ok(false)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;

  struct BrokenProvider;

  #[async_trait]
  impl NetworkStateProvider for BrokenProvider {
    async fn is_reachable(&self) -> Result<bool> {
      Err(eyre!("netinfo module crashed"))
    }
  }

  #[tokio::test]
  async fn test_manual_switch() {
    let switch = ManualSwitch::new(true);
    let probe = ConnectivityProbe::new(Arc::new(switch.clone()));
    assert!(probe.is_online().await);

    switch.set_online(false);
    assert!(!probe.is_online().await);
  }

  /// Counts how often it is asked.
  struct CountingProvider {
    calls: AtomicUsize,
  }

  #[async_trait]
  impl NetworkStateProvider for CountingProvider {
    async fn is_reachable(&self) -> Result<bool> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      Ok(true)
    }
  }

  #[tokio::test]
  async fn test_max_age_reuses_last_answer() {
    let provider = Arc::new(CountingProvider {
      calls: AtomicUsize::new(0),
    });
    let probe = ConnectivityProbe::new(provider.clone()).with_max_age(Duration::from_millis(200));
    let calls = || provider.calls.load(Ordering::SeqCst);

    assert!(probe.is_online().await);
    assert!(probe.clone().is_online().await);
    assert_eq!(calls(), 1);

    // A monitor tick refreshes the shared answer
    assert!(probe.check_now().await);
    assert_eq!(calls(), 2);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(probe.is_online().await);
    assert_eq!(calls(), 3);
  }

  #[tokio::test]
  async fn test_without_max_age_always_asks() {
    let provider = Arc::new(CountingProvider {
      calls: AtomicUsize::new(0),
    });
    let probe = ConnectivityProbe::new(provider.clone());

    for _ in 0..3 {
      assert!(probe.is_online().await);
    }
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_broken_provider_defaults_online() {
    let probe = ConnectivityProbe::new(Arc::new(BrokenProvider));
    assert!(probe.is_online().await);
  }

  #[tokio::test]
  async fn test_tcp_reachability() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let provider = TcpReachability::new(addr.to_string(), Duration::from_secs(1));
    assert!(provider.is_reachable().await.unwrap());

    drop(listener);
    assert!(!provider.is_reachable().await.unwrap());
  }

  #[test]
  fn test_address_from_base_url() {
    let provider =
      TcpReachability::for_base_url("http://10.0.2.2:8000/api", Duration::from_secs(1)).unwrap();
    assert_eq!(provider.address(), "10.0.2.2:8000");

    let provider =
      TcpReachability::for_base_url("https://example.com/api", Duration::from_secs(1)).unwrap();
    assert_eq!(provider.address(), "example.com:443");

    assert!(TcpReachability::for_base_url("not a url", Duration::from_secs(1)).is_err());
  }
}
