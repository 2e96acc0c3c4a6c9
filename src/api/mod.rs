//! Client for the courier backend.
//!
//! [`ApiClient`] is the single entry point: it attaches credentials, recovers
//! expired sessions, caches reads and records writes for later sync when the
//! device is offline. Every call returns an [`ApiResponse`] rather than
//! failing.

mod client;
pub mod endpoints;
mod error;
mod response;
mod session;

pub use client::ApiClient;
pub use error::ApiError;
pub use response::ApiResponse;
