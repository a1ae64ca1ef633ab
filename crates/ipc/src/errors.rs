//! Errors we may encounter when moving items through a queue

use thiserror::Error;

/// An error we encounter when putting an item into a queue
#[derive(Debug, Error)]
pub enum PutError<T> {
	/// The queue was full for the whole timeout window.
	/// Carries the rejected item so the caller may retry or drop it.
	#[error("queue is full")]
	Full(T),
}

impl<T> PutError<T> {
	/// Take the rejected item back out of this error
	pub fn into_item(self) -> T {
		match self {
			Self::Full(item) => item,
		}
	}
}

/// An error we encounter when getting an item from a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GetError {
	/// The queue was empty for the whole timeout window
	#[error("queue is empty")]
	Empty,
}
