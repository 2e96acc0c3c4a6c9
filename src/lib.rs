//! Offline-tolerant client for the courier delivery backend.
//!
//! The [`api::ApiClient`] talks to the REST API when the device is online and
//! degrades to cached reads and queued writes when it is not. The
//! [`sync::SyncEngine`] replays queued writes once connectivity returns.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod net;
pub mod storage;
pub mod sync;
