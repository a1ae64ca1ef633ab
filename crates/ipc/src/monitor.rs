//! A throughput-measuring queue wrapper

use std::{
	sync::Mutex,
	time::{Duration, Instant},
};
use tracing::trace;

use crate::{GetError, PutError, QueueLike};

#[derive(Debug, Clone, Copy, Default)]
struct MonitorState {
	n_items: u64,
	first: Option<Instant>,
	last: Option<Instant>,
}

/// Throughput counters for one queue.
///
/// Frequency is measured over the window between the first and the
/// last item seen, so idle time before traffic starts does not
/// dilute the average.
#[derive(Debug, Default)]
pub struct QueueMonitor {
	state: Mutex<MonitorState>,
}

impl QueueMonitor {
	fn record(&self) {
		let now = Instant::now();
		let mut state = self.state.lock().unwrap();
		state.n_items += 1;
		state.first.get_or_insert(now);
		state.last = Some(now);
	}

	/// How many items have passed through this queue?
	pub fn n_items(&self) -> u64 {
		self.state.lock().unwrap().n_items
	}

	/// Average throughput in items per second.
	///
	/// Returns zero until at least two items have been seen.
	pub fn get_average_freq(&self) -> f64 {
		let state = self.state.lock().unwrap();
		match (state.first, state.last) {
			(Some(first), Some(last)) if state.n_items >= 2 && last > first => {
				(state.n_items - 1) as f64 / (last - first).as_secs_f64()
			}
			_ => 0.0,
		}
	}
}

/// A wrapper that measures traffic through any other queue.
///
/// Every successful put is counted and timestamped; the shutdown
/// report reads these counters through [`QueueLike::monitor`].
/// Loss counters of a wrapped drop-oldest queue pass through.
pub struct MonitoredQueue<T: Send> {
	inner: Box<dyn QueueLike<T>>,
	monitor: QueueMonitor,
	label: String,
}

impl<T: Send> MonitoredQueue<T> {
	/// Wrap `inner`, labelling queue-level log events with `label`
	pub fn new(inner: impl QueueLike<T> + 'static, label: impl Into<String>) -> Self {
		Self {
			inner: Box::new(inner),
			monitor: QueueMonitor::default(),
			label: label.into(),
		}
	}
}

impl<T: Send> QueueLike<T> for MonitoredQueue<T> {
	fn put(&self, item: T, timeout: Option<Duration>) -> Result<(), PutError<T>> {
		self.inner.put(item, timeout)?;
		self.monitor.record();
		trace!(queue = %self.label, len = self.inner.len(), "put");
		Ok(())
	}

	fn try_put(&self, item: T) -> Result<(), PutError<T>> {
		self.inner.try_put(item)?;
		self.monitor.record();
		trace!(queue = %self.label, len = self.inner.len(), "put");
		Ok(())
	}

	fn get(&self, timeout: Option<Duration>) -> Result<T, GetError> {
		let item = self.inner.get(timeout)?;
		trace!(queue = %self.label, len = self.inner.len(), "get");
		Ok(item)
	}

	fn try_get(&self) -> Result<T, GetError> {
		let item = self.inner.try_get()?;
		trace!(queue = %self.label, len = self.inner.len(), "get");
		Ok(item)
	}

	fn len(&self) -> usize {
		self.inner.len()
	}

	fn monitor(&self) -> Option<&QueueMonitor> {
		Some(&self.monitor)
	}

	fn lost(&self) -> Option<u64> {
		self.inner.lost()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{BoundedQueue, RingQueue};

	#[test]
	fn counts_items() {
		let q = MonitoredQueue::new(BoundedQueue::new(16), "test");
		for i in 0..10 {
			q.try_put(i).unwrap();
		}
		assert_eq!(q.monitor().unwrap().n_items(), 10);
		assert_eq!(q.lost(), None);
	}

	#[test]
	fn measures_frequency() {
		let q = MonitoredQueue::new(BoundedQueue::new(64), "test");
		for i in 0..5 {
			q.try_put(i).unwrap();
			std::thread::sleep(Duration::from_millis(10));
		}

		// 4 intervals of ~10ms => roughly 100 items/sec
		let freq = q.monitor().unwrap().get_average_freq();
		assert!(freq > 20.0 && freq < 200.0, "freq = {freq}");
	}

	#[test]
	fn passes_loss_through() {
		let q = MonitoredQueue::new(RingQueue::new(2), "test");
		for i in 0..5 {
			q.try_put(i).unwrap();
		}
		assert_eq!(q.lost(), Some(3));
	}
}
