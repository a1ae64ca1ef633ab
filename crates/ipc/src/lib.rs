//! Typed bounded queues that connect sluice workers.
//!
//! Every channel between two workers implements [`QueueLike`]:
//! a bounded FIFO with blocking and non-blocking ends. Three
//! implementations are provided:
//! - [`BoundedQueue`], a lossless bounded FIFO. Blocking puts wait
//!   for free space.
//! - [`RingQueue`], a drop-oldest ring buffer. Puts always succeed;
//!   when the buffer is full the oldest item is evicted and counted.
//! - [`MonitoredQueue`], a wrapper that measures throughput on any
//!   other queue.

#![warn(missing_docs)]

mod bounded;
mod errors;
mod monitor;
mod ring;

pub use bounded::BoundedQueue;
pub use errors::{GetError, PutError};
pub use monitor::{MonitoredQueue, QueueMonitor};
pub use ring::RingQueue;

use std::time::Duration;

/// The queue contract every worker channel must satisfy.
///
/// Handles are shared: the sender and the receiver of an edge hold
/// the same queue behind an [`std::sync::Arc`]. Items move in FIFO
/// order within one queue.
pub trait QueueLike<T: Send>: Send + Sync {
	/// Put an item, blocking while the queue is full.
	/// `timeout == None` waits forever.
	///
	/// On timeout the rejected item is handed back
	/// inside [`PutError::Full`].
	fn put(&self, item: T, timeout: Option<Duration>) -> Result<(), PutError<T>>;

	/// Put an item without blocking.
	fn try_put(&self, item: T) -> Result<(), PutError<T>>;

	/// Get an item, blocking while the queue is empty.
	/// `timeout == None` waits forever.
	fn get(&self, timeout: Option<Duration>) -> Result<T, GetError>;

	/// Get an item without blocking.
	fn try_get(&self) -> Result<T, GetError>;

	/// How many items are queued right now?
	fn len(&self) -> usize;

	/// Is this queue empty?
	fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Throughput counters, if this queue has them.
	/// Only [`MonitoredQueue`] returns `Some`.
	fn monitor(&self) -> Option<&QueueMonitor> {
		None
	}

	/// How many items has this queue evicted?
	/// Only drop-oldest queues return `Some`.
	fn lost(&self) -> Option<u64> {
		None
	}
}
