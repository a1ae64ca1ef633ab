use anyhow::Result;
use clap::Parser;
use std::{path::PathBuf, time::Duration};
use tracing::info;

use sluice_dag::{spec::GraphSpec, strategy::LaneOptions, worker::WorkerNode};

mod workers;
use workers::{Camera, Sink};

/// The graph used when no `--spec` is given.
const DEFAULT_GRAPH: &str = include_str!("./default-graph.toml");

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
	/// Graph spec file to run. The spec must wire the nodes
	/// `camera` and `sink`. Runs a built-in demo graph if omitted.
	#[arg(long)]
	spec: Option<PathBuf>,

	/// How long to run, in seconds
	#[arg(long, default_value_t = 10.0)]
	duration: f64,

	/// Frames per second the camera produces
	#[arg(long, default_value_t = 30.0)]
	fps: f64,

	/// Tear down with kill() instead of a clean stop()
	#[arg(long)]
	kill: bool,

	/// Dump per-phase profiles on clean exit
	#[arg(long)]
	profile: bool,
}

fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter("sluice_ipc=warn,info")
		.without_time()
		.with_ansi(true)
		.init();

	let args = Args::parse();

	let spec = match &args.spec {
		Some(path) => GraphSpec::from_file(path)?,
		None => GraphSpec::from_str(DEFAULT_GRAPH)?,
	};

	// A short poll window so teardown is snappy; the data-lane
	// default would hold stop() for its full receive timeout.
	let mut sink_options = LaneOptions::data_defaults();
	sink_options.receive_timeout = Some(Duration::from_millis(100));

	let workers = vec![
		WorkerNode::new("camera", Camera::new(args.fps)).with_profiling(args.profile),
		WorkerNode::new("sink", Sink::default())
			.with_data_options(sink_options)
			.with_profiling(args.profile),
	];

	let mut dag = spec.build(workers)?;
	dag.start()?;
	info!("pipeline running for {}s", args.duration);

	std::thread::sleep(Duration::from_secs_f64(args.duration));

	if args.kill {
		dag.kill();
	} else {
		dag.stop();
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	/// Make sure the graph we ship with is valid
	#[test]
	fn default_graph_is_valid() {
		let spec = GraphSpec::from_str(DEFAULT_GRAPH).unwrap();
		assert_eq!(spec.data_edges.len(), 1);
		assert_eq!(spec.metadata_edges.len(), 1);
	}
}
