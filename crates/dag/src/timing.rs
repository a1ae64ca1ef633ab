//! Per-iteration timing records

use std::time::{Duration, Instant, SystemTime};
use tracing::info;

use crate::labels::NodeLabel;

fn ms(d: Duration) -> f64 {
	d.as_secs_f64() * 1e3
}

fn wall_ms(t: SystemTime) -> f64 {
	// Pre-epoch clocks produce a zero stamp rather than an error;
	// wall stamps only date the record.
	t.duration_since(SystemTime::UNIX_EPOCH)
		.map(ms)
		.unwrap_or(0.0)
}

/// The timing record of one worker iteration.
///
/// Wall-clock stamps (`t_start`, `t_stop`) date the record; phase
/// durations come from a monotonic clock and are never negative.
/// All fields are milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationTiming {
	/// Which iteration this record describes. Starts at 1.
	pub iteration: u64,

	/// Wall clock at the start of the iteration
	pub t_start: f64,

	/// Time spent receiving on the data lane
	pub receive_data_time: f64,
	/// Time spent inside `process_data`
	pub process_data_time: f64,
	/// Time spent sending on the data lane
	pub send_data_time: f64,

	/// Time spent receiving on the metadata lane
	pub receive_metadata_time: f64,
	/// Time spent inside `process_metadata`
	pub process_metadata_time: f64,
	/// Time spent sending on the metadata lane
	pub send_metadata_time: f64,

	/// Monotonic duration of the whole iteration
	pub total_time: f64,

	/// Wall clock at the end of the iteration
	pub t_stop: f64,
}

impl IterationTiming {
	/// Emit this record through the log sink, one line per iteration
	pub fn emit(&self, worker: &NodeLabel) {
		info!(
			target: "sluice::timing",
			worker = %worker,
			t_start = self.t_start,
			receive_data_time = self.receive_data_time,
			process_data_time = self.process_data_time,
			send_data_time = self.send_data_time,
			receive_metadata_time = self.receive_metadata_time,
			process_metadata_time = self.process_metadata_time,
			send_metadata_time = self.send_metadata_time,
			total_time = self.total_time,
			t_stop = self.t_stop,
			"#{}", self.iteration
		);
	}
}

/// Captures the six phase boundaries of one iteration.
///
/// `mark()` is called after each phase, in order:
/// receive-data, process-data, send-data,
/// receive-meta, process-meta, send-meta.
pub(crate) struct PhaseClock {
	wall_start: SystemTime,
	start: Instant,
	marks: Vec<Instant>,
}

impl PhaseClock {
	pub fn start() -> Self {
		Self {
			wall_start: SystemTime::now(),
			start: Instant::now(),
			marks: Vec::with_capacity(6),
		}
	}

	pub fn mark(&mut self) {
		self.marks.push(Instant::now());
	}

	pub fn finish(self, iteration: u64) -> IterationTiming {
		debug_assert!(self.marks.len() == 6, "an iteration has six phases");

		let phase = |i: usize| {
			let prev = if i == 0 { self.start } else { self.marks[i - 1] };
			ms(self.marks[i] - prev)
		};

		IterationTiming {
			iteration,
			t_start: wall_ms(self.wall_start),
			receive_data_time: phase(0),
			process_data_time: phase(1),
			send_data_time: phase(2),
			receive_metadata_time: phase(3),
			process_metadata_time: phase(4),
			send_metadata_time: phase(5),
			total_time: ms(self.marks[5] - self.start),
			t_stop: wall_ms(SystemTime::now()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn phases_sum_to_total() {
		let mut clock = PhaseClock::start();
		for i in 0..6 {
			if i == 1 {
				std::thread::sleep(Duration::from_millis(10));
			}
			clock.mark();
		}
		let timing = clock.finish(1);

		let sum = timing.receive_data_time
			+ timing.process_data_time
			+ timing.send_data_time
			+ timing.receive_metadata_time
			+ timing.process_metadata_time
			+ timing.send_metadata_time;

		// Monotonic measurement slack
		let epsilon = 0.01;
		assert!(timing.total_time >= sum - epsilon);
		assert!(timing.process_data_time >= 10.0 - epsilon);
		assert!(timing.t_stop >= timing.t_start);
	}

	#[test]
	fn durations_are_non_negative() {
		let mut clock = PhaseClock::start();
		for _ in 0..6 {
			clock.mark();
		}
		let timing = clock.finish(3);

		assert_eq!(timing.iteration, 3);
		for d in [
			timing.receive_data_time,
			timing.process_data_time,
			timing.send_data_time,
			timing.receive_metadata_time,
			timing.process_metadata_time,
			timing.send_metadata_time,
			timing.total_time,
		] {
			assert!(d >= 0.0);
		}
	}
}
