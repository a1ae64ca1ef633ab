//! A runtime for directed acyclic graphs of long-running
//! concurrent workers.
//!
//! Workers exchange high-rate data (e.g. image frames) and
//! lower-rate control metadata over typed bounded queues. Each
//! worker is an isolated unit with its own thread, initialized
//! once and driven by a six-phase loop until a shared stop signal
//! is raised. A [`dag::Dag`] wires workers together, synchronizes
//! their startup on a barrier, and reports per-edge throughput on
//! shutdown.
//!
//! ```no_run
//! use sluice_dag::{dag::Dag, worker::WorkerNode};
//! use sluice_ipc::BoundedQueue;
//! use std::sync::Arc;
//! # use sluice_dag::{errors::HookError, strategy::{LaneInput, LaneOutput}, worker::Worker};
//! # struct Camera; struct Tracker;
//! # impl Worker for Camera {
//! #   type Data = u64; type Meta = String;
//! #   fn process_data(&mut self, _: LaneInput<u64>) -> Result<Option<LaneOutput<u64>>, HookError> { Ok(None) }
//! #   fn process_metadata(&mut self, _: LaneInput<String>) -> Result<Option<LaneOutput<String>>, HookError> { Ok(None) }
//! # }
//! # impl Worker for Tracker {
//! #   type Data = u64; type Meta = String;
//! #   fn process_data(&mut self, _: LaneInput<u64>) -> Result<Option<LaneOutput<u64>>, HookError> { Ok(None) }
//! #   fn process_metadata(&mut self, _: LaneInput<String>) -> Result<Option<LaneOutput<String>>, HookError> { Ok(None) }
//! # }
//!
//! let mut dag = Dag::new();
//! let camera = dag.add_node(WorkerNode::new("camera", Camera));
//! let tracker = dag.add_node(WorkerNode::new("tracker", Tracker));
//! dag.connect_data(camera, tracker, Arc::new(BoundedQueue::new(100)), "frames")?;
//!
//! dag.start()?;
//! std::thread::sleep(std::time::Duration::from_secs(10));
//! dag.stop();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]

mod profile;

pub mod dag;
pub mod errors;
pub mod labels;
pub mod spec;
pub mod strategy;
pub mod timing;
pub mod worker;
