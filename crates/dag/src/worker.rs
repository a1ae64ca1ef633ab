//! Workers: isolated execution units driven by a fixed
//! six-phase iteration.
//!
//! A worker's behavior is supplied by a [`Worker`] implementation;
//! [`WorkerNode`] is the runtime shell around it. Once started, a
//! node runs on its own thread, owns its queues exclusively, and
//! shares nothing with its peers except the startup barrier and
//! its stop flag:
//!
//! ```text
//! Init -> Synchronizing -> Running -> Cleanup -> Exited
//! ```
//!
//! One `Running` iteration is, in order: receive-data,
//! process-data, send-data, receive-metadata, process-metadata,
//! send-metadata, then a timing record. The stop flag is observed
//! at the top of each iteration only.

use sluice_ipc::QueueLike;
use std::{
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, Barrier,
	},
	thread::JoinHandle,
	time::{Duration, Instant},
};
use tracing::{debug, error, info, warn};

use crate::{
	errors::{HookError, LifecycleError, StartError},
	labels::{NodeLabel, QueueLabel},
	profile::PhaseProfile,
	strategy::{LaneEndpoints, LaneInput, LaneOptions, LaneOutput, StrategyError},
	timing::PhaseClock,
};

/// Where a [`WorkerNode`] is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
	/// Built, not yet started. Registration is open.
	Constructed,

	/// The worker thread is running
	Running,

	/// The worker thread has been stopped or killed.
	/// A worker never runs twice.
	Stopped,
}

/// Worker behavior, supplied by the user.
///
/// The runtime calls `initialize` once on the worker thread, then
/// `process_data` and `process_metadata` once per iteration, then
/// `cleanup` once on the way out. An error from any hook is fatal
/// to this worker alone: it is logged, the worker raises its own
/// stop flag and exits through `cleanup`. Peers keep running.
pub trait Worker: Send {
	/// What flows through this worker's data lane
	type Data: Send + 'static;

	/// What flows through this worker's metadata lane
	type Meta: Send + 'static;

	/// Acquire local resources. Runs on the worker thread, before
	/// the startup barrier.
	fn initialize(&mut self) -> Result<(), HookError> {
		Ok(())
	}

	/// Release local resources. Runs on the worker thread, after
	/// the last iteration.
	fn cleanup(&mut self) -> Result<(), HookError> {
		Ok(())
	}

	/// Handle one iteration's data-lane input. Returning `None`
	/// sends nothing this iteration.
	fn process_data(
		&mut self,
		input: LaneInput<Self::Data>,
	) -> Result<Option<LaneOutput<Self::Data>>, HookError>;

	/// Handle one iteration's metadata-lane input. Returning
	/// `None` sends nothing this iteration.
	fn process_metadata(
		&mut self,
		input: LaneInput<Self::Meta>,
	) -> Result<Option<LaneOutput<Self::Meta>>, HookError>;
}

/// The runtime shell around one [`Worker`].
///
/// Queues are registered onto the node while it is
/// [`WorkerState::Constructed`]; `start()` moves the worker and
/// its endpoints onto a dedicated thread. Strategy configuration
/// is immutable from then on.
pub struct WorkerNode<D: Send + 'static, M: Send + 'static> {
	name: NodeLabel,
	state: WorkerState,

	// Taken by the worker thread at start
	worker: Option<Box<dyn Worker<Data = D, Meta = M>>>,
	data: LaneEndpoints<D>,
	meta: LaneEndpoints<M>,

	data_options: LaneOptions,
	meta_options: LaneOptions,
	profile: bool,

	stop: Arc<AtomicBool>,
	barrier: Option<Arc<Barrier>>,
	handle: Option<JoinHandle<()>>,
}

impl<D: Send + 'static, M: Send + 'static> WorkerNode<D, M> {
	/// Make a new node around `worker` with default lane options
	pub fn new(name: impl Into<NodeLabel>, worker: impl Worker<Data = D, Meta = M> + 'static) -> Self {
		Self {
			name: name.into(),
			state: WorkerState::Constructed,
			worker: Some(Box::new(worker)),
			data: LaneEndpoints::default(),
			meta: LaneEndpoints::default(),
			data_options: LaneOptions::data_defaults(),
			meta_options: LaneOptions::metadata_defaults(),
			profile: false,
			stop: Arc::new(AtomicBool::new(false)),
			barrier: None,
			handle: None,
		}
	}

	/// Replace this node's data-lane configuration
	pub fn with_data_options(mut self, options: LaneOptions) -> Self {
		self.data_options = options;
		self
	}

	/// Replace this node's metadata-lane configuration
	pub fn with_metadata_options(mut self, options: LaneOptions) -> Self {
		self.meta_options = options;
		self
	}

	/// Enable or disable per-phase profiling.
	/// An enabled worker dumps `<name>.prof` on clean exit.
	pub fn with_profiling(mut self, profile: bool) -> Self {
		self.profile = profile;
		self
	}

	/// This node's name
	pub fn name(&self) -> &NodeLabel {
		&self.name
	}

	/// Where this node is in its lifecycle
	pub fn state(&self) -> WorkerState {
		self.state
	}

	fn check_open(&self) -> Result<(), LifecycleError> {
		match self.state {
			WorkerState::Constructed => Ok(()),
			_ => Err(LifecycleError::RegisterAfterStart {
				worker: self.name.clone(),
			}),
		}
	}

	/// Add a queue this node receives data from.
	/// Registering the same queue instance twice is a silent no-op.
	pub fn register_recv_data(
		&mut self,
		queue: Arc<dyn QueueLike<D>>,
		name: impl Into<QueueLabel>,
	) -> Result<(), LifecycleError> {
		self.check_open()?;
		self.data.register_recv(queue, name.into());
		Ok(())
	}

	/// Add a queue this node sends data to.
	/// Registering the same queue instance twice is a silent no-op.
	pub fn register_send_data(
		&mut self,
		queue: Arc<dyn QueueLike<D>>,
		name: impl Into<QueueLabel>,
	) -> Result<(), LifecycleError> {
		self.check_open()?;
		self.data.register_send(queue, name.into());
		Ok(())
	}

	/// Add a queue this node receives metadata from.
	/// Registering the same queue instance twice is a silent no-op.
	pub fn register_recv_meta(
		&mut self,
		queue: Arc<dyn QueueLike<M>>,
		name: impl Into<QueueLabel>,
	) -> Result<(), LifecycleError> {
		self.check_open()?;
		self.meta.register_recv(queue, name.into());
		Ok(())
	}

	/// Add a queue this node sends metadata to.
	/// Registering the same queue instance twice is a silent no-op.
	pub fn register_send_meta(
		&mut self,
		queue: Arc<dyn QueueLike<M>>,
		name: impl Into<QueueLabel>,
	) -> Result<(), LifecycleError> {
		self.check_open()?;
		self.meta.register_send(queue, name.into());
		Ok(())
	}

	/// Attach the startup barrier. Must happen before `start()`.
	pub fn set_barrier(&mut self, barrier: Arc<Barrier>) -> Result<(), LifecycleError> {
		match self.state {
			WorkerState::Constructed => {
				self.barrier = Some(barrier);
				Ok(())
			}
			_ => Err(LifecycleError::BarrierAfterStart {
				worker: self.name.clone(),
			}),
		}
	}

	/// Raise this node's stop flag without waiting for the thread
	pub(crate) fn raise_stop(&self) {
		self.stop.store(true, Ordering::SeqCst);
	}

	/// Start the main loop on a dedicated thread.
	/// Returns immediately; fails if this node was already started.
	pub fn start(&mut self) -> Result<(), StartError> {
		if self.state != WorkerState::Constructed {
			return Err(LifecycleError::AlreadyStarted {
				worker: self.name.clone(),
			}
			.into());
		}

		let runtime = WorkerRuntime {
			name: self.name.clone(),
			// The worker is always present before the first start.
			worker: self.worker.take().unwrap(),
			data: std::mem::take(&mut self.data),
			meta: std::mem::take(&mut self.meta),
			data_options: self.data_options.clone(),
			meta_options: self.meta_options.clone(),
			stop: self.stop.clone(),
			barrier: self.barrier.clone(),
			profiler: self.profile.then(PhaseProfile::default),
			iteration: 0,
		};

		let handle = std::thread::Builder::new()
			.name(format!("worker-{}", self.name))
			.spawn(move || runtime.main_loop())?;

		self.handle = Some(handle);
		self.state = WorkerState::Running;
		Ok(())
	}

	/// Raise the stop flag and wait for the worker to exit cleanly.
	///
	/// May block while the worker finishes its current iteration;
	/// with a blocking outbound send that cannot drain, this waits
	/// up to the full send timeout. That is documented behavior,
	/// not a bug; use [`WorkerNode::kill`] for a bounded wait.
	pub fn stop(&mut self) {
		if self.state != WorkerState::Running {
			return;
		}

		self.stop.store(true, Ordering::SeqCst);
		if let Some(handle) = self.handle.take() {
			if handle.join().is_err() {
				error!(worker = %self.name, "worker thread panicked");
			}
		}
		self.state = WorkerState::Stopped;
	}

	/// Raise the stop flag and wait at most `grace` for the worker
	/// to exit, then abandon it. In-flight items may be lost.
	pub fn kill(&mut self, grace: Duration) {
		if self.state != WorkerState::Running {
			return;
		}

		self.stop.store(true, Ordering::SeqCst);
		if let Some(handle) = self.handle.take() {
			let deadline = Instant::now() + grace;
			loop {
				if handle.is_finished() {
					let _ = handle.join();
					break;
				}
				if Instant::now() >= deadline {
					warn!(
						worker = %self.name,
						"did not exit within the grace period, detaching"
					);
					drop(handle);
					break;
				}
				std::thread::sleep(Duration::from_millis(1));
			}
		}
		self.state = WorkerState::Stopped;
	}
}

/// Everything the worker thread owns.
struct WorkerRuntime<D: Send + 'static, M: Send + 'static> {
	name: NodeLabel,
	worker: Box<dyn Worker<Data = D, Meta = M>>,
	data: LaneEndpoints<D>,
	meta: LaneEndpoints<M>,
	data_options: LaneOptions,
	meta_options: LaneOptions,
	stop: Arc<AtomicBool>,
	barrier: Option<Arc<Barrier>>,
	profiler: Option<PhaseProfile>,
	iteration: u64,
}

impl<D: Send + 'static, M: Send + 'static> WorkerRuntime<D, M> {
	fn main_loop(mut self) {
		debug!(worker = %self.name, "initializing");

		match self.worker.initialize() {
			Ok(()) => {
				// All peers (and the coordinator) must be ready
				// before anyone begins work.
				if let Some(barrier) = &self.barrier {
					barrier.wait();
				}
				info!(worker = %self.name, "initialized, starting work");
				self.run();
			}
			Err(error) => {
				error!(worker = %self.name, "initialize failed: {error}");
				self.stop.store(true, Ordering::SeqCst);
			}
		}

		if let Err(error) = self.worker.cleanup() {
			error!(worker = %self.name, "cleanup failed: {error}");
		}

		if let Some(profiler) = &self.profiler {
			if let Err(error) = profiler.dump(&self.name) {
				error!(worker = %self.name, "could not dump profile: {error}");
			}
		}

		info!(worker = %self.name, "closing");
	}

	/// A failed receive aborts the lane read, not the worker:
	/// the hook still runs, with empty input.
	fn receive_or_empty<T: Send>(
		name: &NodeLabel,
		iteration: u64,
		lane: &mut LaneEndpoints<T>,
		options: &LaneOptions,
		stop: &AtomicBool,
	) -> LaneInput<T> {
		match lane.receive(options, stop) {
			Ok(input) => input,
			Err(error) => {
				debug!(worker = %name, iteration, "receive aborted: {error}");
				LaneInput::Empty
			}
		}
	}

	fn run(&mut self) {
		while !self.stop.load(Ordering::SeqCst) {
			self.iteration += 1;
			let mut clock = PhaseClock::start();

			// (a) receive-data
			let data_in = Self::receive_or_empty(
				&self.name,
				self.iteration,
				&mut self.data,
				&self.data_options,
				&self.stop,
			);
			clock.mark();

			// (b) process-data
			let data_out = match self.worker.process_data(data_in) {
				Ok(x) => x,
				Err(error) => {
					self.fatal("process_data", &error.to_string());
					return;
				}
			};
			clock.mark();

			// (c) send-data
			if let Some(output) = data_out {
				if let Err(error) = self.data.send(output, &self.data_options, &self.stop) {
					self.fatal_send("data", &error);
					return;
				}
			}
			clock.mark();

			// (d) receive-metadata
			let meta_in = Self::receive_or_empty(
				&self.name,
				self.iteration,
				&mut self.meta,
				&self.meta_options,
				&self.stop,
			);
			clock.mark();

			// (e) process-metadata
			let meta_out = match self.worker.process_metadata(meta_in) {
				Ok(x) => x,
				Err(error) => {
					self.fatal("process_metadata", &error.to_string());
					return;
				}
			};
			clock.mark();

			// (f) send-metadata
			if let Some(output) = meta_out {
				if let Err(error) = self.meta.send(output, &self.meta_options, &self.stop) {
					self.fatal_send("metadata", &error);
					return;
				}
			}
			clock.mark();

			// (g) timing record
			let timing = clock.finish(self.iteration);
			if let Some(profiler) = &mut self.profiler {
				profiler.record(&timing);
			}
			timing.emit(&self.name);
		}
	}

	fn fatal(&self, hook: &str, error: &str) {
		error!(
			worker = %self.name,
			iteration = self.iteration,
			"{hook} failed: {error}"
		);
		self.stop.store(true, Ordering::SeqCst);
	}

	fn fatal_send(&self, lane: &str, error: &StrategyError) {
		error!(
			worker = %self.name,
			iteration = self.iteration,
			"{lane} send failed: {error}"
		);
		self.stop.store(true, Ordering::SeqCst);
	}
}
