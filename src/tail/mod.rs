//! Tail fan-out: order-preserving per-worker event queues, drained by polling.

mod queue;
mod subscription;

pub use queue::{TailEvent, TailFanout};
pub use subscription::TailSubscription;
