//! Receive and send policies over a worker's queue set.
//!
//! Each lane of a worker (data, metadata) owns an ordered set of
//! receive queues and an ordered set of send queues. How those sets
//! are read and written is a per-lane policy, chosen once and
//! dispatched once per iteration:
//!
//! - [`ReceiveStrategy::Poll`] / [`SendStrategy::Dispatch`] treat
//!   all queues as equivalent and round-robin over them, one item
//!   per iteration.
//! - [`ReceiveStrategy::Collect`] / [`SendStrategy::Broadcast`]
//!   address queues by name, one item per named queue.

use sluice_ipc::{PutError, QueueLike};
use std::{
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	thread,
	time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::labels::QueueLabel;

/// How long a polling sweep yields before retrying.
/// Bounded well under the shortest reasonable queue latency.
const POLL_SLEEP: Duration = Duration::from_micros(100);

/// How a worker reads its receive queues each iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveStrategy {
	/// All queues convey the same kind of item. Round-robin over
	/// the set from a cursor that persists across iterations and
	/// return the first item that is ready.
	Poll,

	/// Read exactly one item from every queue, labelled by queue
	/// name. Queues may convey different things.
	Collect,
}

/// How a worker writes its send queues each iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStrategy {
	/// All queues convey the same kind of item. Round-robin over
	/// the set and give the value to the first queue that accepts
	/// it: at-most-once, exactly one receiver.
	Dispatch,

	/// Send by name: each entry of a name-keyed mapping goes to
	/// the send queue registered under that name.
	Broadcast,
}

/// Per-lane I/O configuration. Immutable once the worker starts.
#[derive(Debug, Clone)]
pub struct LaneOptions {
	/// Should receives block?  (Only [`ReceiveStrategy::Collect`]
	/// reads blockingly; Poll always sweeps without blocking.)
	pub receive_block: bool,
	/// How long a receive may wait. `None` means forever.
	pub receive_timeout: Option<Duration>,
	/// How this lane reads its queues
	pub receive_strategy: ReceiveStrategy,

	/// Should sends block?
	pub send_block: bool,
	/// How long a send may wait. `None` means forever.
	pub send_timeout: Option<Duration>,
	/// How this lane writes its queues
	pub send_strategy: SendStrategy,
}

impl LaneOptions {
	/// Data-lane defaults: one logical producer per consumer group,
	/// high rate, prefer dropping over stalling.
	pub fn data_defaults() -> Self {
		Self {
			receive_block: true,
			receive_timeout: Some(Duration::from_secs(10)),
			receive_strategy: ReceiveStrategy::Poll,
			send_block: false,
			send_timeout: None,
			send_strategy: SendStrategy::Dispatch,
		}
	}

	/// Metadata-lane defaults: low-rate fan-out commands,
	/// never stall the loop for them.
	pub fn metadata_defaults() -> Self {
		Self {
			receive_block: false,
			receive_timeout: None,
			receive_strategy: ReceiveStrategy::Collect,
			send_block: false,
			send_timeout: None,
			send_strategy: SendStrategy::Broadcast,
		}
	}
}

/// What one lane received this iteration
#[derive(Debug, Clone, PartialEq)]
pub enum LaneInput<T> {
	/// Nothing arrived (or no receive queues are registered)
	Empty,

	/// A single item, from a [`ReceiveStrategy::Poll`] read
	Item(T),

	/// One item per queue in registration order,
	/// from a [`ReceiveStrategy::Collect`] read
	Collected(Vec<(QueueLabel, T)>),
}

impl<T> LaneInput<T> {
	/// Did this lane receive nothing?
	pub fn is_empty(&self) -> bool {
		matches!(self, Self::Empty)
	}

	/// Get a collected item by queue name
	pub fn get(&self, name: &str) -> Option<&T> {
		match self {
			Self::Collected(pairs) => pairs
				.iter()
				.find(|(label, _)| label.as_ref() == name)
				.map(|(_, x)| x),
			_ => None,
		}
	}

	/// Unwrap a polled item, if that is what this is
	pub fn into_item(self) -> Option<T> {
		match self {
			Self::Item(x) => Some(x),
			_ => None,
		}
	}
}

/// What one lane should send this iteration
#[derive(Debug, Clone, PartialEq)]
pub enum LaneOutput<T> {
	/// A single value for exactly one receiver
	/// (requires [`SendStrategy::Dispatch`])
	Item(T),

	/// Values keyed by queue name
	/// (requires [`SendStrategy::Broadcast`])
	Keyed(Vec<(QueueLabel, T)>),
}

/// An error raised by a lane strategy
#[derive(Debug, Clone, Error)]
pub enum StrategyError {
	/// A collect read could not fill its mapping in time.
	/// Partial results are discarded.
	#[error("queue `{queue}` yielded nothing within the receive timeout")]
	ReceiveTimeout {
		/// The queue that failed to deliver
		queue: QueueLabel,
	},

	/// A blocking named send exceeded its timeout
	#[error("blocking send to queue `{queue}` timed out")]
	SendTimeout {
		/// The queue that stayed full
		queue: QueueLabel,
	},

	/// A blocking dispatch found no ready queue before its deadline
	#[error("no dispatch queue was ready before the send timeout")]
	DispatchTimeout,

	/// A hook returned output of the wrong shape for the
	/// configured send strategy
	#[error("send strategy expected {expected}")]
	OutputShape {
		/// What the strategy needed
		expected: &'static str,
	},
}

/// One lane's queue sets and round-robin state.
pub(crate) struct LaneEndpoints<T: Send> {
	recv: Vec<(QueueLabel, Arc<dyn QueueLike<T>>)>,
	send: Vec<(QueueLabel, Arc<dyn QueueLike<T>>)>,

	// Cursors persist across iterations so that poll and dispatch
	// stay fair over the long run.
	recv_cursor: usize,
	send_cursor: usize,
}

impl<T: Send> Default for LaneEndpoints<T> {
	fn default() -> Self {
		Self {
			recv: Vec::new(),
			send: Vec::new(),
			recv_cursor: 0,
			send_cursor: 0,
		}
	}
}

impl<T: Send> LaneEndpoints<T> {
	/// Add a receive queue. Registering the same queue instance
	/// twice is a silent no-op.
	pub fn register_recv(&mut self, queue: Arc<dyn QueueLike<T>>, label: QueueLabel) {
		if self.recv.iter().any(|(_, q)| Arc::ptr_eq(q, &queue)) {
			return;
		}
		if self.recv.iter().any(|(l, _)| *l == label) {
			warn!(queue = %label, "duplicate receive queue name in one endpoint set");
		}
		self.recv.push((label, queue));
	}

	/// Add a send queue. Registering the same queue instance
	/// twice is a silent no-op.
	pub fn register_send(&mut self, queue: Arc<dyn QueueLike<T>>, label: QueueLabel) {
		if self.send.iter().any(|(_, q)| Arc::ptr_eq(q, &queue)) {
			return;
		}
		if self.send.iter().any(|(l, _)| *l == label) {
			warn!(queue = %label, "duplicate send queue name in one endpoint set");
		}
		self.send.push((label, queue));
	}

	pub fn n_recv(&self) -> usize {
		self.recv.len()
	}

	pub fn n_send(&self) -> usize {
		self.send.len()
	}

	/// Read this lane once, per the configured strategy
	pub fn receive(
		&mut self,
		opts: &LaneOptions,
		stop: &AtomicBool,
	) -> Result<LaneInput<T>, StrategyError> {
		if self.recv.is_empty() {
			return Ok(LaneInput::Empty);
		}

		match opts.receive_strategy {
			ReceiveStrategy::Poll => Ok(self.poll(opts, stop)),
			ReceiveStrategy::Collect => self.collect(opts),
		}
	}

	/// Write this lane once, per the configured strategy.
	/// With no send queues registered the output is dropped.
	pub fn send(
		&mut self,
		output: LaneOutput<T>,
		opts: &LaneOptions,
		stop: &AtomicBool,
	) -> Result<(), StrategyError> {
		if self.send.is_empty() {
			return Ok(());
		}

		match (opts.send_strategy, output) {
			(SendStrategy::Dispatch, LaneOutput::Item(x)) => self.dispatch(x, opts, stop),
			(SendStrategy::Broadcast, LaneOutput::Keyed(pairs)) => self.broadcast(pairs, opts),
			(SendStrategy::Dispatch, LaneOutput::Keyed(_)) => Err(StrategyError::OutputShape {
				expected: "a single item",
			}),
			(SendStrategy::Broadcast, LaneOutput::Item(_)) => Err(StrategyError::OutputShape {
				expected: "a name-keyed mapping",
			}),
		}
	}

	/// Round-robin over the receive queues until one yields.
	///
	/// A zero timeout makes exactly one sweep. An infinite timeout
	/// loops until data arrives or the stop flag is raised.
	fn poll(&mut self, opts: &LaneOptions, stop: &AtomicBool) -> LaneInput<T> {
		let n = self.recv.len();
		let deadline = opts.receive_timeout.map(|t| Instant::now() + t);

		loop {
			for k in 0..n {
				let idx = (self.recv_cursor + k) % n;
				if let Ok(item) = self.recv[idx].1.try_get() {
					self.recv_cursor = (idx + 1) % n;
					return LaneInput::Item(item);
				}
			}

			match deadline {
				Some(d) => {
					if Instant::now() >= d {
						return LaneInput::Empty;
					}
				}
				None => {
					if stop.load(Ordering::SeqCst) {
						return LaneInput::Empty;
					}
				}
			}

			thread::sleep(POLL_SLEEP);
		}
	}

	/// Read one item from every receive queue, in registration
	/// order. Any queue that fails within the timeout fails the
	/// whole read; items already taken are discarded.
	fn collect(&self, opts: &LaneOptions) -> Result<LaneInput<T>, StrategyError> {
		let mut pairs = Vec::with_capacity(self.recv.len());

		for (label, queue) in &self.recv {
			let item = if opts.receive_block {
				queue.get(opts.receive_timeout)
			} else {
				queue.try_get()
			};

			match item {
				Ok(x) => pairs.push((label.clone(), x)),
				Err(_) => {
					return Err(StrategyError::ReceiveTimeout {
						queue: label.clone(),
					})
				}
			}
		}

		Ok(LaneInput::Collected(pairs))
	}

	/// Round-robin over the send queues until one accepts the
	/// value. Non-blocking dispatch makes exactly one sweep and
	/// drops the value if nothing is ready; at most one receiver
	/// ever sees it.
	fn dispatch(
		&mut self,
		item: T,
		opts: &LaneOptions,
		stop: &AtomicBool,
	) -> Result<(), StrategyError> {
		let n = self.send.len();
		let deadline = if opts.send_block {
			opts.send_timeout.map(|t| Instant::now() + t)
		} else {
			Some(Instant::now())
		};

		let mut item = item;
		loop {
			for k in 0..n {
				let idx = (self.send_cursor + k) % n;
				match self.send[idx].1.try_put(item) {
					Ok(()) => {
						self.send_cursor = (idx + 1) % n;
						return Ok(());
					}
					Err(PutError::Full(x)) => item = x,
				}
			}

			match deadline {
				Some(d) => {
					if Instant::now() >= d {
						if opts.send_block {
							return Err(StrategyError::DispatchTimeout);
						}
						debug!("dispatch dropped a value, no queue was ready");
						return Ok(());
					}
				}
				None => {
					if stop.load(Ordering::SeqCst) {
						warn!("blocking dispatch interrupted by stop, value dropped");
						return Ok(());
					}
				}
			}

			thread::sleep(POLL_SLEEP);
		}
	}

	/// Send each keyed value to the send queue registered under
	/// that name. Keys with no matching queue are ignored; queues
	/// with no matching key receive nothing.
	///
	/// A non-blocking broadcast drops the value for any queue that
	/// is full. Only a blocking put that runs out its timeout is
	/// an error.
	fn broadcast(
		&self,
		pairs: Vec<(QueueLabel, T)>,
		opts: &LaneOptions,
	) -> Result<(), StrategyError> {
		let mut pairs = pairs;

		for (label, queue) in &self.send {
			let Some(pos) = pairs.iter().position(|(k, _)| k == label) else {
				continue;
			};
			let (_, value) = pairs.swap_remove(pos);

			if opts.send_block {
				if queue.put(value, opts.send_timeout).is_err() {
					return Err(StrategyError::SendTimeout {
						queue: label.clone(),
					});
				}
			} else if queue.try_put(value).is_err() {
				// Same policy as non-blocking dispatch: prefer
				// dropping over stalling.
				debug!(queue = %label, "broadcast dropped a value, queue is full");
			}
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use sluice_ipc::BoundedQueue;

	fn lane_with_recv(queues: &[(&str, Arc<dyn QueueLike<u32>>)]) -> LaneEndpoints<u32> {
		let mut lane = LaneEndpoints::default();
		for (name, q) in queues {
			lane.register_recv(q.clone(), (*name).into());
		}
		lane
	}

	fn lane_with_send(queues: &[(&str, Arc<dyn QueueLike<u32>>)]) -> LaneEndpoints<u32> {
		let mut lane = LaneEndpoints::default();
		for (name, q) in queues {
			lane.register_send(q.clone(), (*name).into());
		}
		lane
	}

	#[test]
	fn registration_is_idempotent() {
		let q: Arc<dyn QueueLike<u32>> = Arc::new(BoundedQueue::new(4));
		let mut lane = LaneEndpoints::default();

		lane.register_recv(q.clone(), "a".into());
		lane.register_recv(q.clone(), "a".into());
		lane.register_send(q.clone(), "a".into());
		lane.register_send(q, "b".into());

		assert_eq!(lane.n_recv(), 1);
		assert_eq!(lane.n_send(), 1);
	}

	#[test]
	fn poll_is_fair_round_robin() {
		let a: Arc<dyn QueueLike<u32>> = Arc::new(BoundedQueue::new(64));
		let b: Arc<dyn QueueLike<u32>> = Arc::new(BoundedQueue::new(64));
		for _ in 0..50 {
			a.try_put(1).unwrap();
			b.try_put(2).unwrap();
		}

		let mut lane = lane_with_recv(&[("a", a), ("b", b)]);
		let opts = LaneOptions::data_defaults();
		let stop = AtomicBool::new(false);

		let mut from_a = 0;
		let mut from_b = 0;
		for _ in 0..100 {
			match lane.receive(&opts, &stop).unwrap() {
				LaneInput::Item(1) => from_a += 1,
				LaneInput::Item(2) => from_b += 1,
				x => panic!("unexpected input {x:?}"),
			}
		}

		assert_eq!(from_a, 50);
		assert_eq!(from_b, 50);
	}

	#[test]
	fn poll_zero_timeout_is_one_sweep() {
		let a: Arc<dyn QueueLike<u32>> = Arc::new(BoundedQueue::new(4));
		let mut lane = lane_with_recv(&[("a", a)]);

		let mut opts = LaneOptions::data_defaults();
		opts.receive_timeout = Some(Duration::ZERO);
		let stop = AtomicBool::new(false);

		let before = Instant::now();
		let got = lane.receive(&opts, &stop).unwrap();
		assert!(got.is_empty());
		assert!(before.elapsed() < Duration::from_millis(5));
	}

	#[test]
	fn poll_respects_timeout() {
		let a: Arc<dyn QueueLike<u32>> = Arc::new(BoundedQueue::new(4));
		let mut lane = lane_with_recv(&[("a", a)]);

		let mut opts = LaneOptions::data_defaults();
		opts.receive_timeout = Some(Duration::from_millis(50));
		let stop = AtomicBool::new(false);

		let before = Instant::now();
		assert!(lane.receive(&opts, &stop).unwrap().is_empty());
		assert!(before.elapsed() >= Duration::from_millis(50));
	}

	#[test]
	fn infinite_poll_exits_on_stop() {
		let a: Arc<dyn QueueLike<u32>> = Arc::new(BoundedQueue::new(4));
		let stop = Arc::new(AtomicBool::new(false));

		let stop2 = stop.clone();
		let h = thread::spawn(move || {
			let mut lane = lane_with_recv(&[("a", a)]);
			let mut opts = LaneOptions::data_defaults();
			opts.receive_timeout = None;
			lane.receive(&opts, &stop2).unwrap()
		});

		thread::sleep(Duration::from_millis(30));
		stop.store(true, Ordering::SeqCst);
		assert!(h.join().unwrap().is_empty());
	}

	#[test]
	fn collect_reads_every_queue_in_order() {
		let a: Arc<dyn QueueLike<u32>> = Arc::new(BoundedQueue::new(4));
		let b: Arc<dyn QueueLike<u32>> = Arc::new(BoundedQueue::new(4));
		a.try_put(10).unwrap();
		b.try_put(20).unwrap();

		let mut lane = lane_with_recv(&[("a", a), ("b", b)]);
		let opts = LaneOptions::metadata_defaults();
		let stop = AtomicBool::new(false);

		match lane.receive(&opts, &stop).unwrap() {
			LaneInput::Collected(pairs) => {
				assert_eq!(pairs[0], ("a".into(), 10));
				assert_eq!(pairs[1], ("b".into(), 20));
			}
			x => panic!("unexpected input {x:?}"),
		}
	}

	#[test]
	fn collect_fails_when_any_queue_is_empty() {
		let a: Arc<dyn QueueLike<u32>> = Arc::new(BoundedQueue::new(4));
		let b: Arc<dyn QueueLike<u32>> = Arc::new(BoundedQueue::new(4));
		a.try_put(10).unwrap();

		let mut lane = lane_with_recv(&[("a", a), ("b", b)]);
		let mut opts = LaneOptions::metadata_defaults();
		opts.receive_block = true;
		opts.receive_timeout = Some(Duration::from_millis(20));
		let stop = AtomicBool::new(false);

		match lane.receive(&opts, &stop) {
			Err(StrategyError::ReceiveTimeout { queue }) => {
				assert_eq!(queue, "b".into());
			}
			x => panic!("unexpected result {x:?}"),
		}
	}

	#[test]
	fn broadcast_hits_only_named_queues() {
		let a: Arc<dyn QueueLike<u32>> = Arc::new(BoundedQueue::new(4));
		let b: Arc<dyn QueueLike<u32>> = Arc::new(BoundedQueue::new(4));
		let c: Arc<dyn QueueLike<u32>> = Arc::new(BoundedQueue::new(4));

		let mut lane = lane_with_send(&[("a", a.clone()), ("b", b.clone()), ("c", c.clone())]);
		let opts = LaneOptions::metadata_defaults();
		let stop = AtomicBool::new(false);

		let out = LaneOutput::Keyed(vec![
			("a".into(), 1),
			("c".into(), 3),
			("nobody".into(), 9),
		]);
		lane.send(out, &opts, &stop).unwrap();

		assert_eq!(a.try_get().unwrap(), 1);
		assert!(b.try_get().is_err());
		assert_eq!(c.try_get().unwrap(), 3);
	}

	#[test]
	fn nonblocking_broadcast_drops_at_a_full_queue() {
		let a: Arc<dyn QueueLike<u32>> = Arc::new(BoundedQueue::new(1));
		let b: Arc<dyn QueueLike<u32>> = Arc::new(BoundedQueue::new(4));
		a.try_put(0).unwrap();

		let mut lane = lane_with_send(&[("a", a.clone()), ("b", b.clone())]);
		let opts = LaneOptions::metadata_defaults();
		let stop = AtomicBool::new(false);

		let out = LaneOutput::Keyed(vec![("a".into(), 7), ("b".into(), 8)]);
		lane.send(out, &opts, &stop).unwrap();

		// The value for the full queue is gone; the other queue
		// still got its item.
		assert_eq!(a.try_get().unwrap(), 0);
		assert!(a.try_get().is_err());
		assert_eq!(b.try_get().unwrap(), 8);
	}

	#[test]
	fn blocking_broadcast_times_out_at_a_full_queue() {
		let a: Arc<dyn QueueLike<u32>> = Arc::new(BoundedQueue::new(1));
		a.try_put(0).unwrap();

		let mut lane = lane_with_send(&[("a", a)]);
		let mut opts = LaneOptions::metadata_defaults();
		opts.send_block = true;
		opts.send_timeout = Some(Duration::from_millis(40));
		let stop = AtomicBool::new(false);

		let before = Instant::now();
		match lane.send(LaneOutput::Keyed(vec![("a".into(), 7)]), &opts, &stop) {
			Err(StrategyError::SendTimeout { queue }) => {
				assert_eq!(queue, "a".into());
			}
			x => panic!("unexpected result {x:?}"),
		}
		assert!(before.elapsed() >= Duration::from_millis(40));
	}

	#[test]
	fn dispatch_delivers_to_exactly_one_queue() {
		let a: Arc<dyn QueueLike<u32>> = Arc::new(BoundedQueue::new(16));
		let b: Arc<dyn QueueLike<u32>> = Arc::new(BoundedQueue::new(16));
		let c: Arc<dyn QueueLike<u32>> = Arc::new(BoundedQueue::new(16));

		let mut lane = lane_with_send(&[("a", a.clone()), ("b", b.clone()), ("c", c.clone())]);
		let opts = LaneOptions::data_defaults();
		let stop = AtomicBool::new(false);

		for i in 0..9 {
			lane.send(LaneOutput::Item(i), &opts, &stop).unwrap();
		}

		for q in [a, b, c] {
			let mut n = 0;
			while q.try_get().is_ok() {
				n += 1;
			}
			assert_eq!(n, 3);
		}
	}

	#[test]
	fn nonblocking_dispatch_drops_when_everything_is_full() {
		let a: Arc<dyn QueueLike<u32>> = Arc::new(BoundedQueue::new(1));
		a.try_put(0).unwrap();

		let mut lane = lane_with_send(&[("a", a.clone())]);
		let opts = LaneOptions::data_defaults();
		let stop = AtomicBool::new(false);

		// At-most-once: the value is gone, nothing blocks.
		lane.send(LaneOutput::Item(7), &opts, &stop).unwrap();
		assert_eq!(a.try_get().unwrap(), 0);
		assert!(a.try_get().is_err());
	}

	#[test]
	fn blocking_dispatch_times_out() {
		let a: Arc<dyn QueueLike<u32>> = Arc::new(BoundedQueue::new(1));
		a.try_put(0).unwrap();

		let mut lane = lane_with_send(&[("a", a)]);
		let mut opts = LaneOptions::data_defaults();
		opts.send_block = true;
		opts.send_timeout = Some(Duration::from_millis(40));
		let stop = AtomicBool::new(false);

		let before = Instant::now();
		match lane.send(LaneOutput::Item(7), &opts, &stop) {
			Err(StrategyError::DispatchTimeout) => {}
			x => panic!("unexpected result {x:?}"),
		}
		assert!(before.elapsed() >= Duration::from_millis(40));
	}

	#[test]
	fn wrong_output_shape_is_an_error() {
		let a: Arc<dyn QueueLike<u32>> = Arc::new(BoundedQueue::new(4));
		let mut lane = lane_with_send(&[("a", a)]);
		let stop = AtomicBool::new(false);

		let opts = LaneOptions::data_defaults();
		assert!(matches!(
			lane.send(LaneOutput::Keyed(vec![]), &opts, &stop),
			Err(StrategyError::OutputShape { .. })
		));

		let opts = LaneOptions::metadata_defaults();
		assert!(matches!(
			lane.send(LaneOutput::Item(1), &opts, &stop),
			Err(StrategyError::OutputShape { .. })
		));
	}
}
