//! Response caching for offline reads.
//!
//! Every successful GET stores its JSON body under the endpoint string; when
//! the device is offline the last stored body is served instead.

mod layer;

pub use layer::{CachedResponse, ResponseCache};
