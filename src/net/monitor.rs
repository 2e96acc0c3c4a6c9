use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

use super::connectivity::ConnectivityProbe;

/// Connectivity transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
  /// Went from offline to online
  Restored,
  /// Went from online to offline
  Lost,
}

/// Polls a probe on a fixed interval and reports transitions
pub struct ConnectivityMonitor {
  rx: mpsc::UnboundedReceiver<ConnectivityEvent>,
}

impl ConnectivityMonitor {
  /// Start polling `probe` every `interval`.
  ///
  /// The first probe only records the initial state; no event is sent for it.
  pub fn spawn(probe: ConnectivityProbe, interval: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      let mut online: Option<bool> = None;

      loop {
        ticker.tick().await;
        let now_online = probe.check_now().await;

        let event = match (online, now_online) {
          (Some(false), true) => Some(ConnectivityEvent::Restored),
          (Some(true), false) => Some(ConnectivityEvent::Lost),
          _ => None,
        };
        online = Some(now_online);

        if let Some(event) = event {
          info!(?event, "connectivity changed");
          if tx.send(event).is_err() {
            break;
          }
        } else if tx.is_closed() {
          break;
        }
      }
    });

    Self { rx }
  }

  /// Receive the next transition
  pub async fn next(&mut self) -> Option<ConnectivityEvent> {
    self.rx.recv().await
  }
}
