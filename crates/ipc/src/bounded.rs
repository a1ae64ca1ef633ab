//! A lossless bounded FIFO queue

use crossbeam::channel::{
	bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError,
};
use std::time::Duration;

use crate::{GetError, PutError, QueueLike};

/// A lossless bounded FIFO queue.
///
/// Blocking puts wait until space is available or the timeout
/// passes. This is the queue to use when every item matters
/// (commands, low-rate results).
pub struct BoundedQueue<T> {
	send: Sender<T>,
	recv: Receiver<T>,
}

impl<T> BoundedQueue<T> {
	/// Make a new queue that holds at most `capacity` items
	pub fn new(capacity: usize) -> Self {
		let (send, recv) = bounded(capacity);
		Self { send, recv }
	}

	/// The largest number of items this queue can hold
	pub fn capacity(&self) -> usize {
		// Channels made with `bounded()` always have a capacity.
		self.send.capacity().unwrap()
	}
}

impl<T: Send> QueueLike<T> for BoundedQueue<T> {
	fn put(&self, item: T, timeout: Option<Duration>) -> Result<(), PutError<T>> {
		match timeout {
			Some(t) => self
				.send
				.send_timeout(item, t)
				.map_err(|e| PutError::Full(e.into_inner())),

			// We hold both ends of the channel, so `send` can only
			// fail if this queue is dropped mid-call. That cannot
			// happen through a shared handle.
			None => self.send.send(item).map_err(|e| PutError::Full(e.0)),
		}
	}

	fn try_put(&self, item: T) -> Result<(), PutError<T>> {
		self.send.try_send(item).map_err(|e| match e {
			TrySendError::Full(x) => PutError::Full(x),
			TrySendError::Disconnected(x) => PutError::Full(x),
		})
	}

	fn get(&self, timeout: Option<Duration>) -> Result<T, GetError> {
		match timeout {
			Some(t) => match self.recv.recv_timeout(t) {
				Ok(x) => Ok(x),
				Err(RecvTimeoutError::Timeout) => Err(GetError::Empty),
				Err(RecvTimeoutError::Disconnected) => Err(GetError::Empty),
			},
			None => self.recv.recv().map_err(|_| GetError::Empty),
		}
	}

	fn try_get(&self) -> Result<T, GetError> {
		match self.recv.try_recv() {
			Ok(x) => Ok(x),
			Err(TryRecvError::Empty) => Err(GetError::Empty),
			Err(TryRecvError::Disconnected) => Err(GetError::Empty),
		}
	}

	fn len(&self) -> usize {
		self.recv.len()
	}
}
