//! Replays queued offline writes against the backend.

use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::queue::QueuedMutation;
use crate::api::{endpoints, ApiClient};
use crate::net::HttpMethod;

/// Outcome of one [`SyncEngine::sync`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
  pub synced_count: usize,
  pub failed_count: usize,
  /// Failed mutations removed after exhausting the retry budget
  pub dropped_count: usize,
}

/// Drains the [`MutationQueue`](super::MutationQueue).
///
/// Delivery creates and updates are reconciled in one request to the bulk
/// sync endpoint, all or nothing. Everything else is replayed one by one in
/// queue order. Failed mutations stay queued for the next run.
#[derive(Clone)]
pub struct SyncEngine {
  client: ApiClient,
  max_attempts: Option<u32>,
  running: Arc<Mutex<()>>,
}

impl SyncEngine {
  pub fn new(client: ApiClient) -> Self {
    Self {
      client,
      max_attempts: None,
      running: Arc::new(Mutex::new(())),
    }
  }

  /// Drop mutations after this many failed replays. `None` retries forever.
  pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
    self.max_attempts = max_attempts;
    self
  }

  /// Replay everything in the queue.
  ///
  /// Returns an empty report without touching the queue when offline or
  /// when another sync is already running.
  pub async fn sync(&self) -> SyncReport {
    let Ok(_running) = self.running.try_lock() else {
      debug!("sync already in progress");
      return SyncReport::default();
    };

    if !self.client.probe().is_online().await {
      debug!("offline, skipping sync");
      return SyncReport::default();
    }

    let pending = match self.client.queue().list() {
      Ok(pending) => pending,
      Err(e) => {
        warn!(error = %e, "failed to read mutation queue");
        return SyncReport::default();
      }
    };
    if pending.is_empty() {
      return SyncReport::default();
    }

    info!(pending = pending.len(), "syncing offline changes");
    let (batch, individual): (Vec<_>, Vec<_>) = pending.into_iter().partition(is_batchable);

    let mut report = SyncReport::default();
    if !batch.is_empty() {
      self.sync_batch(&batch, &mut report).await;
    }
    for mutation in &individual {
      self.replay(mutation, &mut report).await;
    }

    info!(
      synced = report.synced_count,
      failed = report.failed_count,
      dropped = report.dropped_count,
      "sync finished"
    );
    report
  }

  async fn sync_batch(&self, batch: &[QueuedMutation], report: &mut SyncReport) {
    let ids: Vec<String> = batch.iter().map(|m| m.id.clone()).collect();
    let changes: Vec<Value> = batch.iter().map(change_entry).collect();
    let body = json!({ "changes": changes });

    match self
      .client
      .send_online(HttpMethod::Post, endpoints::DELIVERIES_SYNC, Some(&body))
      .await
    {
      Ok(_) => {
        if let Err(e) = self.client.queue().remove_many(&ids) {
          warn!(error = %e, "bulk sync accepted but queue could not be trimmed");
        }
        report.synced_count += batch.len();
      }
      Err(e) => {
        warn!(error = %e, count = batch.len(), "bulk delivery sync failed");
        report.failed_count += batch.len();
        self.record_failures(&ids, report);
      }
    }
  }

  async fn replay(&self, mutation: &QueuedMutation, report: &mut SyncReport) {
    let result = self
      .client
      .send_online(mutation.method, &mutation.endpoint, mutation.body.as_ref())
      .await;
    let ids = [mutation.id.clone()];

    match result {
      Ok(_) => {
        if let Err(e) = self.client.queue().remove_many(&ids) {
          warn!(id = %mutation.id, error = %e, "replayed mutation could not be dequeued");
        }
        report.synced_count += 1;
      }
      Err(e) => {
        warn!(
          id = %mutation.id,
          method = %mutation.method,
          endpoint = %mutation.endpoint,
          error = %e,
          "replay failed"
        );
        report.failed_count += 1;
        self.record_failures(&ids, report);
      }
    }
  }

  fn record_failures(&self, ids: &[String], report: &mut SyncReport) {
    match self.client.queue().record_failures(ids, self.max_attempts) {
      Ok(dropped) => report.dropped_count += dropped.len(),
      Err(e) => warn!(error = %e, "failed to record replay failures"),
    }
  }
}

/// Delivery creates and updates go through the bulk endpoint.
fn is_batchable(mutation: &QueuedMutation) -> bool {
  endpoints::is_delivery_endpoint(&mutation.endpoint)
    && matches!(
      mutation.method,
      HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch
    )
}

/// One entry of the bulk sync `changes` array.
///
/// The id is the delivery id from the path when there is one, otherwise the
/// queue id (new deliveries have no server id yet).
fn change_entry(mutation: &QueuedMutation) -> Value {
  let id = match endpoints::delivery_id(&mutation.endpoint) {
    Some(id) => Value::from(id),
    None => Value::from(mutation.id.clone()),
  };
  let action = if mutation.method == HttpMethod::Post {
    "create"
  } else {
    "update"
  };

  json!({
    "id": id,
    "action": action,
    "data": mutation.body.clone().unwrap_or(Value::Null),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::ApiResponse;
  use crate::net::{ConnectivityProbe, ManualSwitch, ReqwestTransport};
  use crate::storage::{MemoryStorage, SharedStore, SqliteStorage};
  use std::time::Duration;
  use wiremock::matchers::{body_json, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  struct Harness {
    client: ApiClient,
    switch: ManualSwitch,
  }

  fn harness(server: &MockServer, store: SharedStore) -> Harness {
    let switch = ManualSwitch::new(true);
    let client = ApiClient::new(
      format!("{}/api", server.uri()),
      Arc::new(ReqwestTransport::new(Duration::from_secs(5)).unwrap()),
      ConnectivityProbe::new(Arc::new(switch.clone())),
      store,
    );
    Harness { client, switch }
  }

  fn memory_harness(server: &MockServer) -> Harness {
    harness(server, Arc::new(MemoryStorage::new()))
  }

  async fn queue_offline(h: &Harness, method: HttpMethod, endpoint: &str, body: Option<Value>) {
    h.switch.set_online(false);
    let response: ApiResponse<Value> = h.client.request(method, endpoint, body).await;
    assert!(matches!(
      response.error(),
      Some(crate::api::ApiError::Offline { queued: Some(_) })
    ));
    h.switch.set_online(true);
  }

  #[test]
  fn test_change_entries() {
    let create = QueuedMutation::new("/deliveries/", HttpMethod::Post, Some(json!({ "x": 1 })));
    assert_eq!(
      change_entry(&create),
      json!({ "id": create.id.clone(), "action": "create", "data": { "x": 1 } })
    );

    let update = QueuedMutation::new("/deliveries/12/update-status/", HttpMethod::Patch, None);
    assert_eq!(
      change_entry(&update),
      json!({ "id": 12, "action": "update", "data": null })
    );

    assert!(is_batchable(&update));
    assert!(!is_batchable(&QueuedMutation::new("/deliveries/12/", HttpMethod::Delete, None)));
    assert!(!is_batchable(&QueuedMutation::new("/profile/", HttpMethod::Put, None)));
  }

  #[tokio::test]
  async fn test_bulk_sync_success() {
    let server = MockServer::start().await;
    let h = memory_harness(&server);
    queue_offline(&h, HttpMethod::Post, "/deliveries/", Some(json!({ "x": 1 }))).await;
    let id = h.client.queue().list().unwrap()[0].id.clone();

    Mock::given(method("POST"))
      .and(path("/api/deliveries/sync/"))
      .and(body_json(json!({
        "changes": [{ "id": id, "action": "create", "data": { "x": 1 } }]
      })))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
      .expect(1)
      .mount(&server)
      .await;

    let report = SyncEngine::new(h.client.clone()).sync().await;

    assert_eq!(
      report,
      SyncReport {
        synced_count: 1,
        failed_count: 0,
        dropped_count: 0
      }
    );
    assert!(h.client.queue().is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_bulk_sync_failure_keeps_everything() {
    let server = MockServer::start().await;
    let h = memory_harness(&server);
    queue_offline(&h, HttpMethod::Post, "/deliveries/", Some(json!({ "x": 1 }))).await;
    queue_offline(&h, HttpMethod::Patch, "/deliveries/3/update-status/", Some(json!({ "status_id": 2 }))).await;

    Mock::given(method("POST"))
      .and(path("/api/deliveries/sync/"))
      .respond_with(ResponseTemplate::new(500))
      .expect(1)
      .mount(&server)
      .await;

    let report = SyncEngine::new(h.client.clone()).sync().await;

    assert_eq!(report.synced_count, 0);
    assert_eq!(report.failed_count, 2);
    let queued = h.client.queue().list().unwrap();
    assert_eq!(queued.len(), 2);
    assert!(queued.iter().all(|m| m.attempts == 1));
  }

  #[tokio::test]
  async fn test_individual_replay_in_order() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("store.db");

    {
      let h = harness(&server, Arc::new(SqliteStorage::open_at(&db).unwrap()));
      queue_offline(&h, HttpMethod::Put, "/profile/", Some(json!({ "phone": "A" }))).await;
      queue_offline(&h, HttpMethod::Delete, "/deliveries/9/", None).await;
      queue_offline(&h, HttpMethod::Post, "/deliveries/9/unassign/", None).await;
    }

    Mock::given(method("PUT"))
      .and(path("/api/profile/"))
      .and(body_json(json!({ "phone": "A" })))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("DELETE"))
      .and(path("/api/deliveries/9/"))
      .respond_with(ResponseTemplate::new(204))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/api/deliveries/sync/"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
      .expect(1)
      .mount(&server)
      .await;

    // Reopened after a restart
    let h = harness(&server, Arc::new(SqliteStorage::open_at(&db).unwrap()));
    let report = SyncEngine::new(h.client.clone()).sync().await;

    assert_eq!(report.synced_count, 3);
    assert_eq!(report.failed_count, 0);
    assert!(h.client.queue().is_empty().unwrap());

    let requests = server.received_requests().await.unwrap();
    let order: Vec<String> = requests
      .iter()
      .map(|r| format!("{} {}", r.method, r.url.path()))
      .collect();
    assert_eq!(
      order,
      vec![
        "POST /api/deliveries/sync/",
        "PUT /api/profile/",
        "DELETE /api/deliveries/9/",
      ]
    );
  }

  #[tokio::test]
  async fn test_batch_keeps_queue_order_after_restart() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("store.db");

    let created_id = {
      let h = harness(&server, Arc::new(SqliteStorage::open_at(&db).unwrap()));
      queue_offline(&h, HttpMethod::Post, "/deliveries/", Some(json!({ "x": 1 }))).await;
      queue_offline(
        &h,
        HttpMethod::Patch,
        "/deliveries/3/update-status/",
        Some(json!({ "status_id": 2 })),
      )
      .await;
      queue_offline(&h, HttpMethod::Put, "/deliveries/5/", Some(json!({ "comment": "c" }))).await;
      h.client.queue().list().unwrap()[0].id.clone()
    };

    Mock::given(method("POST"))
      .and(path("/api/deliveries/sync/"))
      .and(body_json(json!({
        "changes": [
          { "id": created_id, "action": "create", "data": { "x": 1 } },
          { "id": 3, "action": "update", "data": { "status_id": 2 } },
          { "id": 5, "action": "update", "data": { "comment": "c" } }
        ]
      })))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
      .expect(1)
      .mount(&server)
      .await;

    let h = harness(&server, Arc::new(SqliteStorage::open_at(&db).unwrap()));
    let report = SyncEngine::new(h.client.clone()).sync().await;

    assert_eq!(report.synced_count, 3);
    assert_eq!(report.failed_count, 0);
    assert!(h.client.queue().is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_failed_replay_stays_queued() {
    let server = MockServer::start().await;
    let h = memory_harness(&server);
    queue_offline(&h, HttpMethod::Put, "/profile/", Some(json!({ "phone": "A" }))).await;
    queue_offline(&h, HttpMethod::Delete, "/deliveries/9/", None).await;

    Mock::given(method("PUT"))
      .and(path("/api/profile/"))
      .respond_with(ResponseTemplate::new(500))
      .mount(&server)
      .await;
    Mock::given(method("DELETE"))
      .and(path("/api/deliveries/9/"))
      .respond_with(ResponseTemplate::new(204))
      .mount(&server)
      .await;

    let report = SyncEngine::new(h.client.clone()).sync().await;

    assert_eq!(report.synced_count, 1);
    assert_eq!(report.failed_count, 1);
    let queued = h.client.queue().list().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].endpoint, "/profile/");
  }

  #[tokio::test]
  async fn test_retry_budget_drops_mutation() {
    let server = MockServer::start().await;
    let h = memory_harness(&server);
    queue_offline(&h, HttpMethod::Put, "/profile/", None).await;

    Mock::given(method("PUT"))
      .respond_with(ResponseTemplate::new(500))
      .expect(2)
      .mount(&server)
      .await;

    let engine = SyncEngine::new(h.client.clone()).with_max_attempts(Some(2));
    let first = engine.sync().await;
    assert_eq!(first.dropped_count, 0);
    assert_eq!(h.client.queue().len().unwrap(), 1);

    let second = engine.sync().await;
    assert_eq!(second.failed_count, 1);
    assert_eq!(second.dropped_count, 1);
    assert!(h.client.queue().is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_offline_sync_is_noop() {
    let server = MockServer::start().await;
    let h = memory_harness(&server);
    queue_offline(&h, HttpMethod::Post, "/deliveries/", Some(json!({ "x": 1 }))).await;
    h.switch.set_online(false);

    let report = SyncEngine::new(h.client.clone()).sync().await;

    assert_eq!(report, SyncReport::default());
    assert_eq!(h.client.queue().len().unwrap(), 1);
    assert!(server.received_requests().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_concurrent_sync_runs_once() {
    let server = MockServer::start().await;
    let h = memory_harness(&server);
    queue_offline(&h, HttpMethod::Post, "/deliveries/", Some(json!({ "x": 1 }))).await;

    Mock::given(method("POST"))
      .and(path("/api/deliveries/sync/"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_json(json!({}))
          .set_delay(Duration::from_millis(200)),
      )
      .expect(1)
      .mount(&server)
      .await;

    let engine = SyncEngine::new(h.client.clone());
    let (a, b) = tokio::join!(engine.sync(), engine.sync());

    assert_eq!(a.synced_count + b.synced_count, 1);
    assert!(h.client.queue().is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_empty_queue_sends_nothing() {
    let server = MockServer::start().await;
    let h = memory_harness(&server);

    let report = SyncEngine::new(h.client.clone()).sync().await;

    assert_eq!(report, SyncReport::default());
    assert!(server.received_requests().await.unwrap().is_empty());
  }
}
