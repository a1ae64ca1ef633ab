//! Errors we may encounter while building or running a DAG

use std::error::Error;
use thiserror::Error;

use crate::labels::NodeLabel;

/// An operation was attempted in the wrong lifecycle state
#[derive(Debug, Clone, Error)]
pub enum LifecycleError {
	/// `start()` was called on a worker that is already running
	#[error("worker `{worker}` was already started")]
	AlreadyStarted {
		/// The worker in question
		worker: NodeLabel,
	},

	/// A queue was registered on a worker that is already running
	#[error("worker `{worker}` is running, registration is closed")]
	RegisterAfterStart {
		/// The worker in question
		worker: NodeLabel,
	},

	/// A barrier was attached to a worker that is already running
	#[error("worker `{worker}` is running, cannot attach a barrier")]
	BarrierAfterStart {
		/// The worker in question
		worker: NodeLabel,
	},
}

/// An error raised by worker code inside one of its hooks
/// (`initialize`, `cleanup`, `process_data`, `process_metadata`).
///
/// A hook failure is fatal to the worker it arises in: it is logged
/// with the worker's name and iteration, the worker raises its own
/// stop flag and exits through `cleanup`. Other workers keep running.
#[derive(Debug, Error)]
pub enum HookError {
	/// A generic I/O error
	#[error("i/o error")]
	Io(#[from] std::io::Error),

	/// An arbitrary error raised by worker code
	#[error("{0}")]
	Other(#[from] Box<dyn Error + Send + Sync + 'static>),
}

impl HookError {
	/// Make a [`HookError`] from a plain message
	pub fn msg(message: impl Into<String>) -> Self {
		Self::Other(message.into().into())
	}
}

/// A fatal error while starting a DAG
#[derive(Debug, Error)]
pub enum StartError {
	/// `start()` was called on a DAG that already ran
	#[error("the DAG was already started")]
	AlreadyStarted,

	/// A worker could not be started
	#[error("lifecycle error")]
	Lifecycle(#[from] LifecycleError),

	/// The OS refused to spawn a worker thread
	#[error("could not spawn worker thread")]
	Spawn(#[from] std::io::Error),

	/// The data lane contains a cycle
	#[error("data edges form a cycle through worker `{worker}`")]
	DataCycle {
		/// A worker on the cycle
		worker: NodeLabel,
	},

	/// The startup barrier did not release in time.
	///
	/// Some worker never reached the synchronization point, usually
	/// because its `initialize` hook failed or hung. The DAG is in a
	/// broken state; `kill()` is the only sensible follow-up.
	#[error("workers did not synchronize within the coordinator timeout")]
	CoordinatorTimeout,
}
