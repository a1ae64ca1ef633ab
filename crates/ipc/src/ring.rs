//! A drop-oldest ring buffer queue

use std::{
	collections::VecDeque,
	sync::{
		atomic::{AtomicU64, Ordering},
		Condvar, Mutex,
	},
	time::{Duration, Instant},
};

use crate::{GetError, PutError, QueueLike};

/// A drop-oldest ring buffer queue.
///
/// Puts always succeed: when the buffer is full, the oldest item
/// is evicted to make room and the loss counter increments. This
/// is the queue to use for high-rate streams (e.g. camera frames)
/// where the newest data is worth more than a complete history.
pub struct RingQueue<T> {
	items: Mutex<VecDeque<T>>,
	not_empty: Condvar,
	capacity: usize,
	n_lost: AtomicU64,
}

impl<T> RingQueue<T> {
	/// Make a new ring buffer that holds at most `capacity` items
	pub fn new(capacity: usize) -> Self {
		assert!(capacity != 0, "a ring buffer must have room for at least one item");
		Self {
			items: Mutex::new(VecDeque::with_capacity(capacity)),
			not_empty: Condvar::new(),
			capacity,
			n_lost: AtomicU64::new(0),
		}
	}

	/// The largest number of items this queue can hold
	pub fn capacity(&self) -> usize {
		self.capacity
	}

	fn push(&self, item: T) {
		let mut items = self.items.lock().unwrap();
		if items.len() == self.capacity {
			items.pop_front();
			self.n_lost.fetch_add(1, Ordering::Relaxed);
		}
		items.push_back(item);
		drop(items);
		self.not_empty.notify_one();
	}
}

impl<T: Send> QueueLike<T> for RingQueue<T> {
	fn put(&self, item: T, _timeout: Option<Duration>) -> Result<(), PutError<T>> {
		// Drop-oldest never has to wait.
		self.push(item);
		Ok(())
	}

	fn try_put(&self, item: T) -> Result<(), PutError<T>> {
		self.push(item);
		Ok(())
	}

	fn get(&self, timeout: Option<Duration>) -> Result<T, GetError> {
		let deadline = timeout.map(|t| Instant::now() + t);
		let mut items = self.items.lock().unwrap();

		loop {
			if let Some(x) = items.pop_front() {
				return Ok(x);
			}

			items = match deadline {
				Some(d) => {
					let now = Instant::now();
					if now >= d {
						return Err(GetError::Empty);
					}
					let (guard, _) = self.not_empty.wait_timeout(items, d - now).unwrap();
					guard
				}
				None => self.not_empty.wait(items).unwrap(),
			};
		}
	}

	fn try_get(&self) -> Result<T, GetError> {
		self.items.lock().unwrap().pop_front().ok_or(GetError::Empty)
	}

	fn len(&self) -> usize {
		self.items.lock().unwrap().len()
	}

	fn lost(&self) -> Option<u64> {
		Some(self.n_lost.load(Ordering::Relaxed))
	}
}
