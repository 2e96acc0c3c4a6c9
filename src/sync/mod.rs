//! Offline write queue and its replay.

mod engine;
mod queue;

pub use engine::{SyncEngine, SyncReport};
pub use queue::{MutationQueue, QueuedMutation};
