//! Network collaborators: HTTP transport and connectivity reporting.

mod connectivity;
mod monitor;
mod transport;

pub use connectivity::{ConnectivityProbe, ManualSwitch, NetworkStateProvider, TcpReachability};
pub use monitor::{ConnectivityEvent, ConnectivityMonitor};
pub use transport::{
  HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError,
};
