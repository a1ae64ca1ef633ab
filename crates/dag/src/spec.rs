//! User-provided graph descriptions.
//!
//! A [`GraphSpec`] is a TOML description of a topology: which
//! named node talks to which, over what kind of queue, on which
//! lane. Workers themselves are code; the file wires them:
//!
//! ```toml
//! [[data]]
//! from = "camera"
//! to = "tracker"
//! name = "frames"
//! queue = "ring"
//! capacity = 100
//! monitored = true
//!
//! [[metadata]]
//! from = "tracker"
//! to = "camera"
//! name = "exposure"
//! ```

use itertools::Itertools;
use serde::Deserialize;
use sluice_ipc::{BoundedQueue, MonitoredQueue, QueueLike, RingQueue};
use std::{collections::HashMap, path::Path, sync::Arc, time::Duration};
use thiserror::Error;

use crate::{
	dag::{Dag, RunOptions},
	errors::LifecycleError,
	labels::{NodeLabel, QueueLabel},
	worker::WorkerNode,
};

/// An error in a graph spec
#[derive(Debug, Error)]
pub enum SpecError {
	/// The spec file could not be read
	#[error("could not read graph spec")]
	Io(#[from] std::io::Error),

	/// The spec file could not be parsed
	#[error("could not parse graph spec")]
	Parse(#[from] toml::de::Error),

	/// Two workers were given the same name
	#[error("duplicate node label `{node}`")]
	DuplicateNode {
		/// The repeated label
		node: NodeLabel,
	},

	/// Two edges on one lane were given the same name
	#[error("duplicate edge name `{edge}` on the {lane} lane")]
	DuplicateEdge {
		/// The repeated edge name
		edge: QueueLabel,
		/// Which lane it appeared on
		lane: &'static str,
	},

	/// An edge references a node that was not provided
	#[error("edge `{edge}` references unknown node `{node}`")]
	NoSuchNode {
		/// The edge in question
		edge: QueueLabel,
		/// The missing node
		node: NodeLabel,
	},

	/// A node could not be wired
	#[error("lifecycle error")]
	Lifecycle(#[from] LifecycleError),
}

/// What kind of queue backs an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
	/// Lossless bounded FIFO
	#[default]
	Fifo,

	/// Drop-oldest ring buffer
	Ring,
}

/// One edge of the graph
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EdgeSpec {
	/// The sending node
	pub from: NodeLabel,

	/// The receiving node
	pub to: NodeLabel,

	/// The queue name, shared by both endpoints
	pub name: QueueLabel,

	/// What kind of queue to build
	#[serde(default)]
	pub queue: QueueKind,

	/// How many items the queue holds
	#[serde(default = "EdgeSpec::default_capacity")]
	pub capacity: usize,

	/// Wrap the queue in a throughput monitor?
	/// Monitored data edges appear in the shutdown report.
	#[serde(default)]
	pub monitored: bool,
}

impl EdgeSpec {
	fn default_capacity() -> usize {
		64
	}

	fn make_queue<T: Send + 'static>(&self) -> Arc<dyn QueueLike<T>> {
		match (self.queue, self.monitored) {
			(QueueKind::Fifo, false) => Arc::new(BoundedQueue::new(self.capacity)),
			(QueueKind::Fifo, true) => Arc::new(MonitoredQueue::new(
				BoundedQueue::new(self.capacity),
				self.name.as_ref(),
			)),
			(QueueKind::Ring, false) => Arc::new(RingQueue::new(self.capacity)),
			(QueueKind::Ring, true) => Arc::new(MonitoredQueue::new(
				RingQueue::new(self.capacity),
				self.name.as_ref(),
			)),
		}
	}
}

/// Coordinator settings, in seconds
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpecOptions {
	/// How long `start()` waits for the cohort to synchronize
	#[serde(default = "SpecOptions::default_coordinator_timeout")]
	pub coordinator_timeout: f64,

	/// How long `kill()` waits per worker
	#[serde(default = "SpecOptions::default_kill_grace")]
	pub kill_grace: f64,
}

impl Default for SpecOptions {
	fn default() -> Self {
		Self {
			coordinator_timeout: Self::default_coordinator_timeout(),
			kill_grace: Self::default_kill_grace(),
		}
	}
}

impl SpecOptions {
	fn default_coordinator_timeout() -> f64 {
		10.0
	}

	fn default_kill_grace() -> f64 {
		0.5
	}

	/// Convert to runtime options
	pub fn to_run_options(&self) -> RunOptions {
		RunOptions {
			coordinator_timeout: Duration::from_secs_f64(self.coordinator_timeout),
			kill_grace: Duration::from_secs_f64(self.kill_grace),
		}
	}
}

/// A description of a whole graph topology
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphSpec {
	/// Coordinator settings
	#[serde(default)]
	pub options: SpecOptions,

	/// Data-lane edges
	#[serde(default, rename = "data")]
	pub data_edges: Vec<EdgeSpec>,

	/// Metadata-lane edges
	#[serde(default, rename = "metadata")]
	pub metadata_edges: Vec<EdgeSpec>,
}

impl GraphSpec {
	/// Parse a spec from TOML text
	pub fn from_str(text: &str) -> Result<Self, SpecError> {
		let spec: Self = toml::from_str(text)?;
		spec.validate()?;
		Ok(spec)
	}

	/// Parse a spec from a TOML file
	pub fn from_file(path: &Path) -> Result<Self, SpecError> {
		Self::from_str(&std::fs::read_to_string(path)?)
	}

	fn validate(&self) -> Result<(), SpecError> {
		for (edges, lane) in [(&self.data_edges, "data"), (&self.metadata_edges, "metadata")] {
			if let Some(name) = edges.iter().map(|e| &e.name).duplicates().next() {
				return Err(SpecError::DuplicateEdge {
					edge: name.clone(),
					lane,
				});
			}
		}
		Ok(())
	}

	/// Wire the given workers into a [`Dag`] per this spec.
	///
	/// Every node referenced by an edge must appear in `workers`
	/// (matched by node name); workers referenced by no edge
	/// become isolated vertices.
	pub fn build<D: Send + 'static, M: Send + 'static>(
		&self,
		workers: Vec<WorkerNode<D, M>>,
	) -> Result<Dag<D, M>, SpecError> {
		let mut dag = Dag::with_options(self.options.to_run_options());

		let mut ids: HashMap<NodeLabel, _> = HashMap::new();
		for worker in workers {
			let label = worker.name().clone();
			if ids.contains_key(&label) {
				return Err(SpecError::DuplicateNode { node: label });
			}
			ids.insert(label, dag.add_node(worker));
		}

		let lookup = |edge: &EdgeSpec, node: &NodeLabel| {
			ids.get(node).copied().ok_or_else(|| SpecError::NoSuchNode {
				edge: edge.name.clone(),
				node: node.clone(),
			})
		};

		for edge in &self.data_edges {
			let from = lookup(edge, &edge.from)?;
			let to = lookup(edge, &edge.to)?;
			dag.connect_data(from, to, edge.make_queue::<D>(), edge.name.clone())?;
		}

		for edge in &self.metadata_edges {
			let from = lookup(edge, &edge.from)?;
			let to = lookup(edge, &edge.to)?;
			dag.connect_metadata(from, to, edge.make_queue::<M>(), edge.name.clone())?;
		}

		Ok(dag)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		errors::HookError,
		strategy::{LaneInput, LaneOutput},
		worker::Worker,
	};
	use std::sync::atomic::{AtomicU64, Ordering};
	use std::time::Instant;

	const SAMPLE: &str = r#"
		[options]
		coordinator_timeout = 2.0

		[[data]]
		from = "camera"
		to = "tracker"
		name = "frames"
		queue = "ring"
		capacity = 100
		monitored = true

		[[metadata]]
		from = "tracker"
		to = "camera"
		name = "exposure"
	"#;

	#[test]
	fn parses_a_sample_spec() {
		let spec = GraphSpec::from_str(SAMPLE).unwrap();

		assert_eq!(spec.options.coordinator_timeout, 2.0);
		assert_eq!(spec.options.kill_grace, 0.5);

		assert_eq!(spec.data_edges.len(), 1);
		let edge = &spec.data_edges[0];
		assert_eq!(edge.queue, QueueKind::Ring);
		assert_eq!(edge.capacity, 100);
		assert!(edge.monitored);

		let edge = &spec.metadata_edges[0];
		assert_eq!(edge.queue, QueueKind::Fifo);
		assert_eq!(edge.capacity, 64);
		assert!(!edge.monitored);
	}

	#[test]
	fn rejects_unknown_fields() {
		let res = GraphSpec::from_str(
			r#"
			[[data]]
			from = "a"
			to = "b"
			name = "q"
			color = "red"
			"#,
		);
		assert!(matches!(res, Err(SpecError::Parse(_))));
	}

	#[test]
	fn rejects_duplicate_edge_names_per_lane() {
		let res = GraphSpec::from_str(
			r#"
			[[data]]
			from = "a"
			to = "b"
			name = "q"

			[[data]]
			from = "b"
			to = "c"
			name = "q"
			"#,
		);
		assert!(matches!(res, Err(SpecError::DuplicateEdge { .. })));
	}

	/// Emits its iteration number forever
	struct Ticker {
		n: u64,
	}

	impl Worker for Ticker {
		type Data = u64;
		type Meta = String;

		fn process_data(
			&mut self,
			_input: LaneInput<u64>,
		) -> Result<Option<LaneOutput<u64>>, HookError> {
			self.n += 1;
			Ok(Some(LaneOutput::Item(self.n)))
		}

		fn process_metadata(
			&mut self,
			_input: LaneInput<String>,
		) -> Result<Option<LaneOutput<String>>, HookError> {
			Ok(None)
		}
	}

	/// Counts received data items
	struct Tally {
		n: Arc<AtomicU64>,
	}

	impl Worker for Tally {
		type Data = u64;
		type Meta = String;

		fn process_data(
			&mut self,
			input: LaneInput<u64>,
		) -> Result<Option<LaneOutput<u64>>, HookError> {
			if !input.is_empty() {
				self.n.fetch_add(1, Ordering::SeqCst);
			}
			Ok(None)
		}

		fn process_metadata(
			&mut self,
			_input: LaneInput<String>,
		) -> Result<Option<LaneOutput<String>>, HookError> {
			Ok(None)
		}
	}

	#[test]
	fn build_rejects_unknown_nodes() {
		let spec = GraphSpec::from_str(SAMPLE).unwrap();
		let workers = vec![WorkerNode::<u64, String>::new("camera", Ticker { n: 0 })];

		match spec.build(workers) {
			Err(SpecError::NoSuchNode { node, .. }) => {
				assert_eq!(node, "tracker".into());
			}
			Err(e) => panic!("unexpected error {e:?}"),
			Ok(_) => panic!("expected an error"),
		}
	}

	#[test]
	fn build_rejects_duplicate_workers() {
		let spec = GraphSpec::from_str(SAMPLE).unwrap();
		let workers = vec![
			WorkerNode::<u64, String>::new("camera", Ticker { n: 0 }),
			WorkerNode::<u64, String>::new("camera", Ticker { n: 0 }),
		];
		assert!(matches!(
			spec.build(workers),
			Err(SpecError::DuplicateNode { .. })
		));
	}

	#[test]
	fn a_built_graph_runs() {
		let spec = GraphSpec::from_str(
			r#"
			[[data]]
			from = "source"
			to = "sink"
			name = "numbers"
			capacity = 16
			monitored = true
			"#,
		)
		.unwrap();

		let received = Arc::new(AtomicU64::new(0));
		let mut sink_options = crate::strategy::LaneOptions::data_defaults();
		sink_options.receive_timeout = Some(Duration::from_millis(50));

		let workers = vec![
			WorkerNode::new("source", Ticker { n: 0 }),
			WorkerNode::new(
				"sink",
				Tally {
					n: received.clone(),
				},
			)
			.with_data_options(sink_options),
		];

		let mut dag = spec.build(workers).unwrap();
		dag.start().unwrap();

		let deadline = Instant::now() + Duration::from_secs(5);
		while received.load(Ordering::SeqCst) < 20 && Instant::now() < deadline {
			std::thread::sleep(Duration::from_millis(5));
		}
		dag.stop();

		assert!(received.load(Ordering::SeqCst) >= 20);
	}
}
