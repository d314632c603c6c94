//! Traffic tap for Content-Length framed JSON-RPC streams.
//!
//! Wrap either half of a transport in a [`Tap`] to copy every complete
//! message to a [`TrafficSink`], such as a [`TrafficStore`] or the
//! [`TracingSink`], while the bytes themselves pass through untouched.

mod extract;
mod store;
mod tap;

pub use extract::FrameExtractor;
pub use store::{MessageKind, MethodStats, TrafficEntry, TrafficStats, TrafficStore};
pub use tap::{Direction, Tap, TracingSink, TrafficSink};
