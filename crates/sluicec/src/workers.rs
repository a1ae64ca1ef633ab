//! The demo workers: a paced synthetic camera and a counting sink.

use rand::Rng;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use sluice_dag::{
	errors::HookError,
	strategy::{LaneInput, LaneOutput},
	worker::Worker,
};

const FRAME_SIZE: usize = 64 * 64;

/// One synthetic grayscale frame
#[derive(Debug, Clone)]
pub struct Frame {
	/// Sequence number, 1-based
	pub index: u64,

	/// Raw pixel data
	pub pixels: Vec<u8>,
}

/// Produces random frames at a fixed rate and annotates each one
/// on the metadata lane.
pub struct Camera {
	fps: f64,
	index: u64,
	last_frame: Option<Instant>,
}

impl Camera {
	pub fn new(fps: f64) -> Self {
		Self {
			fps,
			index: 0,
			last_frame: None,
		}
	}
}

impl Worker for Camera {
	type Data = Frame;
	type Meta = String;

	fn process_data(
		&mut self,
		_input: LaneInput<Frame>,
	) -> Result<Option<LaneOutput<Frame>>, HookError> {
		// Pace the loop to the requested frame rate.
		let interval = Duration::from_secs_f64(1.0 / self.fps);
		if let Some(last) = self.last_frame {
			let elapsed = last.elapsed();
			if elapsed < interval {
				std::thread::sleep(interval - elapsed);
			}
		}
		self.last_frame = Some(Instant::now());

		self.index += 1;
		let mut pixels = vec![0u8; FRAME_SIZE];
		rand::thread_rng().fill(&mut pixels[..]);

		Ok(Some(LaneOutput::Item(Frame {
			index: self.index,
			pixels,
		})))
	}

	fn process_metadata(
		&mut self,
		_input: LaneInput<String>,
	) -> Result<Option<LaneOutput<String>>, HookError> {
		if self.index == 0 {
			return Ok(None);
		}
		Ok(Some(LaneOutput::Keyed(vec![(
			"camera_info".into(),
			format!("frame #{}", self.index),
		)])))
	}
}

/// Counts the frames it receives
#[derive(Default)]
pub struct Sink {
	n_frames: u64,
}

impl Worker for Sink {
	type Data = Frame;
	type Meta = String;

	fn cleanup(&mut self) -> Result<(), HookError> {
		info!(frames = self.n_frames, "sink done");
		Ok(())
	}

	fn process_data(
		&mut self,
		input: LaneInput<Frame>,
	) -> Result<Option<LaneOutput<Frame>>, HookError> {
		if let LaneInput::Item(frame) = input {
			self.n_frames += 1;
			debug!(frame = frame.index, received = self.n_frames, "frame");
		}
		Ok(None)
	}

	fn process_metadata(
		&mut self,
		input: LaneInput<String>,
	) -> Result<Option<LaneOutput<String>>, HookError> {
		if let Some(text) = input.get("camera_info") {
			debug!("{text}");
		}
		Ok(None)
	}
}
