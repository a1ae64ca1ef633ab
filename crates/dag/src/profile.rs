//! Aggregate per-phase profiling for workers.
//!
//! When profiling is enabled on a worker, every iteration's timing
//! is folded into a [`PhaseProfile`], which is dumped to
//! `<worker_name>.prof` in the working directory on clean exit.
//! A worker that was killed leaves no dump.

use serde::Serialize;
use std::{fs::File, io, path::Path};

use crate::{labels::NodeLabel, timing::IterationTiming};

/// Accumulated phase timings for one worker. All sums are
/// milliseconds.
#[derive(Debug, Default, Serialize)]
pub(crate) struct PhaseProfile {
	iterations: u64,
	receive_data_ms: f64,
	process_data_ms: f64,
	send_data_ms: f64,
	receive_metadata_ms: f64,
	process_metadata_ms: f64,
	send_metadata_ms: f64,
	total_ms: f64,
}

impl PhaseProfile {
	pub fn record(&mut self, timing: &IterationTiming) {
		self.iterations += 1;
		self.receive_data_ms += timing.receive_data_time;
		self.process_data_ms += timing.process_data_time;
		self.send_data_ms += timing.send_data_time;
		self.receive_metadata_ms += timing.receive_metadata_time;
		self.process_metadata_ms += timing.process_metadata_time;
		self.send_metadata_ms += timing.send_metadata_time;
		self.total_ms += timing.total_time;
	}

	/// Write this profile to `<name>.prof` in the working directory
	pub fn dump(&self, name: &NodeLabel) -> io::Result<()> {
		self.dump_to(Path::new("."), name)
	}

	fn dump_to(&self, dir: &Path, name: &NodeLabel) -> io::Result<()> {
		let file = File::create(dir.join(format!("{name}.prof")))?;
		serde_json::to_writer_pretty(file, self)?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn timing(ms: f64) -> IterationTiming {
		IterationTiming {
			iteration: 1,
			t_start: 0.0,
			receive_data_time: ms,
			process_data_time: ms,
			send_data_time: ms,
			receive_metadata_time: ms,
			process_metadata_time: ms,
			send_metadata_time: ms,
			total_time: 6.0 * ms,
			t_stop: 0.0,
		}
	}

	#[test]
	fn accumulates_iterations() {
		let mut profile = PhaseProfile::default();
		profile.record(&timing(1.0));
		profile.record(&timing(2.0));

		assert_eq!(profile.iterations, 2);
		assert_eq!(profile.receive_data_ms, 3.0);
		assert_eq!(profile.total_ms, 18.0);
	}

	#[test]
	fn dumps_to_a_prof_file() {
		let mut profile = PhaseProfile::default();
		profile.record(&timing(1.0));

		let dir = std::env::temp_dir();
		let name: NodeLabel = "profile-dump-test".into();
		profile.dump_to(&dir, &name).unwrap();

		let path = dir.join("profile-dump-test.prof");
		let contents = std::fs::read_to_string(&path).unwrap();
		assert!(contents.contains("\"iterations\": 1"));
		std::fs::remove_file(path).unwrap();
	}
}
