//! Names for workers and queues

use serde::Deserialize;
use smartstring::{LazyCompact, SmartString};
use std::fmt::Display;

/// The name of one worker in a DAG.
///
/// Unique within one [`Dag`](crate::dag::Dag).
#[derive(Debug, Hash, PartialEq, Eq, Clone, Deserialize)]
pub struct NodeLabel(SmartString<LazyCompact>);

impl Display for NodeLabel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.0.fmt(f)
	}
}

impl AsRef<str> for NodeLabel {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

impl From<&str> for NodeLabel {
	fn from(s: &str) -> Self {
		NodeLabel(s.into())
	}
}

impl From<String> for NodeLabel {
	fn from(s: String) -> Self {
		NodeLabel(s.into())
	}
}

impl<'a> From<&'a NodeLabel> for &'a str {
	fn from(value: &'a NodeLabel) -> Self {
		&value.0
	}
}

/// The name under which a queue is registered on a worker endpoint.
///
/// Queue names address queues in broadcast sends and label collected
/// input, so they must be unique within one endpoint set. They need
/// not be unique across a whole DAG.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Deserialize)]
pub struct QueueLabel(SmartString<LazyCompact>);

impl Display for QueueLabel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.0.fmt(f)
	}
}

impl AsRef<str> for QueueLabel {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

impl From<&str> for QueueLabel {
	fn from(s: &str) -> Self {
		QueueLabel(s.into())
	}
}

impl From<String> for QueueLabel {
	fn from(s: String) -> Self {
		QueueLabel(s.into())
	}
}

impl<'a> From<&'a QueueLabel> for &'a str {
	fn from(value: &'a QueueLabel) -> Self {
		&value.0
	}
}
