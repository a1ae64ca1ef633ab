//! The DAG orchestrator: edge registration, startup
//! synchronization, ordered shutdown, edge reporting.

use petgraph::{algo::toposort, graph::DiGraph};
use sluice_ipc::QueueLike;
use std::{
	sync::{Arc, Barrier},
	time::Duration,
};
use tracing::info;

use crate::{
	errors::{LifecycleError, StartError},
	labels::QueueLabel,
	worker::WorkerNode,
};

/// A node handle inside one [`Dag`].
///
/// Only meaningful for the DAG that returned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
	/// Convert this into a plain index
	pub fn as_usize(&self) -> usize {
		self.0
	}
}

/// One registered edge: a queue binding a sender to a receiver
/// under a name, on one lane.
struct DagEdge<T: Send> {
	from: NodeId,
	to: NodeId,
	queue: Arc<dyn QueueLike<T>>,
	name: QueueLabel,
}

/// Coordinator-side runtime settings
#[derive(Debug, Clone)]
pub struct RunOptions {
	/// How long `start()` waits for the whole cohort to reach the
	/// startup barrier before giving up
	pub coordinator_timeout: Duration,

	/// How long `kill()` waits for each worker before
	/// abandoning it
	pub kill_grace: Duration,
}

impl Default for RunOptions {
	fn default() -> Self {
		Self {
			coordinator_timeout: Duration::from_secs(10),
			kill_grace: Duration::from_millis(500),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DagState {
	Idle,
	Started,

	/// `start()` failed after workers were already spawned.
	/// They are still alive (typically parked at the barrier)
	/// and must remain reapable.
	Failed,

	Stopped,
}

/// A directed acyclic graph of workers joined by queues.
///
/// Vertices are [`WorkerNode`]s, owned by the DAG; edges attach a
/// queue to the sender's outbound set and the receiver's inbound
/// set under a shared name. The data lane must stay acyclic;
/// metadata edges may loop back (e.g. a reply edge), which the
/// non-blocking metadata defaults keep deadlock-free.
///
/// `D` is the item type of every data edge, `M` of every
/// metadata edge.
pub struct Dag<D: Send + 'static, M: Send + 'static> {
	nodes: Vec<WorkerNode<D, M>>,
	data_edges: Vec<DagEdge<D>>,
	metadata_edges: Vec<DagEdge<M>>,
	options: RunOptions,
	state: DagState,

	// Sinks-first, computed at start
	start_order: Vec<usize>,
}

impl<D: Send + 'static, M: Send + 'static> Default for Dag<D, M> {
	fn default() -> Self {
		Self::new()
	}
}

impl<D: Send + 'static, M: Send + 'static> Dag<D, M> {
	/// Make an empty DAG with default [`RunOptions`]
	pub fn new() -> Self {
		Self::with_options(RunOptions::default())
	}

	/// Make an empty DAG with the given [`RunOptions`]
	pub fn with_options(options: RunOptions) -> Self {
		Self {
			nodes: Vec::new(),
			data_edges: Vec::new(),
			metadata_edges: Vec::new(),
			options,
			state: DagState::Idle,
			start_order: Vec::new(),
		}
	}

	/// Register a vertex with no edges
	pub fn add_node(&mut self, node: WorkerNode<D, M>) -> NodeId {
		self.nodes.push(node);
		NodeId(self.nodes.len() - 1)
	}

	/// Get a node by id
	pub fn get_node(&self, id: NodeId) -> &WorkerNode<D, M> {
		&self.nodes[id.0]
	}

	/// The number of vertices in this DAG
	pub fn len_nodes(&self) -> usize {
		self.nodes.len()
	}

	/// Connect `sender` to `receiver` with a data queue.
	///
	/// The queue is registered on both endpoints under `name`.
	pub fn connect_data(
		&mut self,
		sender: NodeId,
		receiver: NodeId,
		queue: Arc<dyn QueueLike<D>>,
		name: impl Into<QueueLabel>,
	) -> Result<(), LifecycleError> {
		let name = name.into();
		self.nodes[sender.0].register_send_data(queue.clone(), name.clone())?;
		self.nodes[receiver.0].register_recv_data(queue.clone(), name.clone())?;
		self.data_edges.push(DagEdge {
			from: sender,
			to: receiver,
			queue,
			name,
		});
		Ok(())
	}

	/// Connect `sender` to `receiver` with a metadata queue.
	///
	/// The queue is registered on both endpoints under `name`.
	pub fn connect_metadata(
		&mut self,
		sender: NodeId,
		receiver: NodeId,
		queue: Arc<dyn QueueLike<M>>,
		name: impl Into<QueueLabel>,
	) -> Result<(), LifecycleError> {
		let name = name.into();
		self.nodes[sender.0].register_send_meta(queue.clone(), name.clone())?;
		self.nodes[receiver.0].register_recv_meta(queue.clone(), name.clone())?;
		self.metadata_edges.push(DagEdge {
			from: sender,
			to: receiver,
			queue,
			name,
		});
		Ok(())
	}

	/// Start every worker and wait until the whole cohort is
	/// synchronized.
	///
	/// Workers start sinks-first so that consumers are ready
	/// before producers warm up. A barrier sized to all workers
	/// plus this coordinator guarantees that no worker begins its
	/// first iteration before every other worker has finished
	/// initializing; `start()` returns once the barrier releases.
	///
	/// On [`StartError::CoordinatorTimeout`] the DAG is broken
	/// (some worker never reached the barrier). The workers that
	/// did spawn are still alive, parked at the barrier; `kill()`
	/// reaps them within its grace bound and is the only sensible
	/// follow-up.
	pub fn start(&mut self) -> Result<(), StartError> {
		if self.state != DagState::Idle {
			return Err(StartError::AlreadyStarted);
		}

		// The data lane must be acyclic; this also gives us the
		// startup order. No threads exist yet, so failing here
		// leaves the DAG idle.
		let mut graph = DiGraph::<usize, ()>::new();
		let indices: Vec<_> = (0..self.nodes.len()).map(|i| graph.add_node(i)).collect();
		for edge in &self.data_edges {
			graph.add_edge(indices[edge.from.0], indices[edge.to.0], ());
		}

		let order = toposort(&graph, None).map_err(|cycle| StartError::DataCycle {
			worker: self.nodes[cycle.node_id().index()].name().clone(),
		})?;
		self.start_order = order.iter().rev().map(|n| n.index()).collect();

		// From the first spawn on, every failure must leave the
		// DAG reapable by stop()/kill().
		let barrier = Arc::new(Barrier::new(self.nodes.len() + 1));
		let order = self.start_order.clone();
		for &i in &order {
			let node = &mut self.nodes[i];
			info!(worker = %node.name(), "starting node");

			let started = match node.set_barrier(barrier.clone()) {
				Ok(()) => node.start(),
				Err(error) => Err(error.into()),
			};
			if let Err(error) = started {
				self.state = DagState::Failed;
				return Err(error);
			}
		}

		// Wait on the barrier ourselves, with a watchdog so a
		// worker that dies before synchronizing cannot hang us
		// forever.
		let (send, recv) = crossbeam::channel::bounded(1);
		let spawned = std::thread::Builder::new()
			.name("sluice-coordinator".into())
			.spawn(move || {
				barrier.wait();
				let _ = send.send(());
			});
		if let Err(error) = spawned {
			self.state = DagState::Failed;
			return Err(error.into());
		}

		match recv.recv_timeout(self.options.coordinator_timeout) {
			Ok(()) => {
				self.state = DagState::Started;
				Ok(())
			}
			Err(_) => {
				self.state = DagState::Failed;
				Err(StartError::CoordinatorTimeout)
			}
		}
	}

	/// Stop every worker, roots first, and emit the edge report.
	///
	/// Blocks until every worker has exited; a worker stuck in a
	/// blocking send holds this up for its send timeout. After a
	/// failed `start()` the surviving workers are parked at the
	/// barrier and can never exit on their own, so this delegates
	/// to `kill()` instead of joining them. Calling `stop()` on a
	/// DAG that never ran is a no-op.
	pub fn stop(&mut self) {
		if self.state == DagState::Failed {
			return self.kill();
		}
		if self.state != DagState::Started {
			return;
		}

		let order = self.start_order.clone();
		for &i in order.iter().rev() {
			let node = &mut self.nodes[i];
			info!(worker = %node.name(), "stopping node");
			node.stop();
		}

		for edge in &self.data_edges {
			if let Some(monitor) = edge.queue.monitor() {
				match edge.queue.lost() {
					Some(lost) => info!(
						target: "sluice::report",
						"Name: {}, freq: {}, lost: {}",
						edge.name,
						monitor.get_average_freq(),
						lost
					),
					None => info!(
						target: "sluice::report",
						"Name: {}, freq: {}",
						edge.name,
						monitor.get_average_freq()
					),
				}
			}
		}

		self.state = DagState::Stopped;
	}

	/// Stop every worker within a bounded wait, abandoning any
	/// that do not exit in time. In-flight items may be lost and
	/// no profile dumps are written by abandoned workers.
	///
	/// Also tears down a DAG whose `start()` failed: workers that
	/// made it to the barrier can never release it, so each is
	/// abandoned after the grace period.
	pub fn kill(&mut self) {
		if self.state != DagState::Started && self.state != DagState::Failed {
			return;
		}

		// Raise every flag first so workers wind down in
		// parallel, then reap them one by one.
		for node in &self.nodes {
			node.raise_stop();
		}

		let order = self.start_order.clone();
		for &i in order.iter().rev() {
			let node = &mut self.nodes[i];
			info!(worker = %node.name(), "killing node");
			node.kill(self.options.kill_grace);
		}

		self.state = DagState::Stopped;
	}
}

impl<D: Send + 'static, M: Send + 'static> Drop for Dag<D, M> {
	fn drop(&mut self) {
		// Leave no worker spinning. Threads are not joined here;
		// a blocked worker must not hang the drop.
		for node in &self.nodes {
			node.raise_stop();
		}
	}
}
