use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use courier_link::api::{ApiClient, ApiResponse};
use courier_link::auth::LoginCredentials;
use courier_link::config::Config;
use courier_link::net::{
  ConnectivityEvent, ConnectivityMonitor, ConnectivityProbe, HttpMethod, ManualSwitch,
  NetworkStateProvider, ReqwestTransport, TcpReachability,
};
use courier_link::storage::{SharedStore, SqliteStorage};
use courier_link::sync::{SyncEngine, SyncReport};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Sign in and store the session
  Login {
    username: String,
    /// Falls back to COURIER_PASSWORD
    #[arg(long)]
    password: Option<String>,
  },
  /// Forget the stored session
  Logout,
  /// Show the signed-in user
  Whoami,
  /// GET an endpoint, e.g. /deliveries/my/active/
  Get { endpoint: String },
  /// POST a JSON body
  Post { endpoint: String, body: Option<String> },
  /// PUT a JSON body
  Put { endpoint: String, body: Option<String> },
  /// PATCH a JSON body
  Patch { endpoint: String, body: Option<String> },
  /// DELETE an endpoint
  Delete { endpoint: String },
  /// List writes waiting for sync
  Queue,
  /// Replay queued writes now
  Sync,
  /// Sync whenever connectivity returns, until Ctrl-C
  Watch,
}

pub struct App {
  config: Config,
  client: ApiClient,
  engine: SyncEngine,
}

impl App {
  pub fn new(config: Config, force_offline: bool) -> Result<Self> {
    let store: SharedStore = match &config.storage.path {
      Some(path) => Arc::new(SqliteStorage::open_at(path)?),
      None => Arc::new(SqliteStorage::open()?),
    };

    let provider: Arc<dyn NetworkStateProvider> = if force_offline {
      Arc::new(ManualSwitch::new(false))
    } else {
      match &config.connectivity.probe_address {
        Some(address) => Arc::new(TcpReachability::new(address.clone(), config.probe_timeout())),
        None => Arc::new(TcpReachability::for_base_url(
          &config.api.base_url,
          config.probe_timeout(),
        )?),
      }
    };

    let transport = Arc::new(ReqwestTransport::new(config.request_timeout())?);
    let client = ApiClient::new(
      config.api.base_url.clone(),
      transport,
      ConnectivityProbe::new(provider).with_max_age(config.probe_interval()),
      store,
    )
    .with_cache_ttl(config.cache_ttl());
    let engine = SyncEngine::new(client.clone()).with_max_attempts(config.sync.max_attempts);

    Ok(Self {
      config,
      client,
      engine,
    })
  }

  pub async fn run(&self, command: Command) -> Result<()> {
    match command {
      Command::Login { username, password } => {
        let password = match password {
          Some(p) => p,
          None => Config::get_password()?,
        };
        let credentials = LoginCredentials { username, password };
        let user = self
          .client
          .login(&credentials)
          .await
          .map_err(|e| eyre!("Login failed: {}", e))?;
        print_json(&json!({ "success": true, "user": user }))
      }
      Command::Logout => {
        self.client.logout().map_err(|e| eyre!("Logout failed: {}", e))?;
        print_json(&json!({ "success": true }))
      }
      Command::Whoami => {
        if !self.client.is_authenticated() {
          return Err(eyre!("Not signed in"));
        }
        print_json(&json!({ "user": self.client.current_user() }))
      }
      Command::Get { endpoint } => self.finish(self.client.get(&endpoint).await),
      Command::Post { endpoint, body } => self.write(HttpMethod::Post, &endpoint, body).await,
      Command::Put { endpoint, body } => self.write(HttpMethod::Put, &endpoint, body).await,
      Command::Patch { endpoint, body } => self.write(HttpMethod::Patch, &endpoint, body).await,
      Command::Delete { endpoint } => self.finish(self.client.delete(&endpoint).await),
      Command::Queue => print_json(&self.client.queue().list()?),
      Command::Sync => print_report(self.engine.sync().await),
      Command::Watch => self.watch().await,
    }
  }

  async fn write(&self, method: HttpMethod, endpoint: &str, body: Option<String>) -> Result<()> {
    let body = match body {
      Some(raw) => {
        Some(serde_json::from_str::<Value>(&raw).map_err(|e| eyre!("Invalid JSON body: {}", e))?)
      }
      None => None,
    };
    self.finish(self.client.request(method, endpoint, body).await)
  }

  /// Print the outcome of a call; failures also set a non-zero exit status.
  fn finish(&self, response: ApiResponse<Value>) -> Result<()> {
    let offline = response.is_offline();
    match response.into_result() {
      Ok(data) => print_json(&json!({ "data": data, "offline": offline })),
      Err(error) => {
        print_json(&json!({
          "error": { "code": error.code(), "message": error.to_string() },
          "offline": offline,
        }))?;
        Err(eyre!("{}", error))
      }
    }
  }

  async fn watch(&self) -> Result<()> {
    let mut monitor =
      ConnectivityMonitor::spawn(self.client.probe().clone(), self.config.probe_interval());
    info!(base_url = %self.config.api.base_url, "watching connectivity");

    // Drain anything left from an earlier run
    print_report(self.engine.sync().await)?;

    loop {
      tokio::select! {
        event = monitor.next() => match event {
          Some(ConnectivityEvent::Restored) => print_report(self.engine.sync().await)?,
          Some(ConnectivityEvent::Lost) => {
            print_json(&json!({ "event": "offline" }))?;
          }
          None => break,
        },
        _ = tokio::signal::ctrl_c() => break,
      }
    }

    Ok(())
  }
}

fn print_report(report: SyncReport) -> Result<()> {
  print_json(&report)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
  let rendered =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to render output: {}", e))?;
  println!("{}", rendered);
  Ok(())
}
