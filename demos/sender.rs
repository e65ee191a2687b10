//! # Sender
//!
//! Writes one frame of 100 random `int32` values into a memfd segment and
//! hands the segment to the first receiver that connects.
//!
//! ```text
//! [rand values] → [memfd segment] ──fd──▶ /tmp/memfd_socket
//! ```
//!
//! Run: `cargo run --example sender -- direct` (or `accumulate`), then
//! `cargo run --example receiver` in another terminal.

use arrow::datatypes::Int32Type;
use arrow_memfd::frame::{
    ColumnArray, ColumnBatch, FieldSpec, FrameSchema, PopulationStrategy, PrimitiveType,
};
use arrow_memfd::{HandoffConfig, Result, Sender};
use rand::Rng;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const ROWS: usize = 100;

fn run(strategy: PopulationStrategy) -> Result<()> {
    let mut rng = rand::thread_rng();
    let values: Vec<i32> = (0..ROWS).map(|_| rng.gen_range(0..100)).collect();

    let schema = FrameSchema::new(vec![FieldSpec::new("rand", PrimitiveType::Int32)])?;
    let batch = ColumnBatch::new(vec![ColumnArray::build::<Int32Type>(
        strategy, values, None,
    )?]);

    let config = HandoffConfig::default();
    info!(socket = %config.socket_path.display(), ?strategy, "waiting for receiver");
    let report = Sender::new(config)?.send(&schema, &[batch])?;

    println!(
        "sent {} byte frame in a {} byte segment (sealed: {})",
        report.frame_len, report.capacity, report.sealed
    );
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("arrow_memfd=info")),
        )
        .init();

    let strategy = match std::env::args().nth(1) {
        Some(arg) => match arg.parse::<PopulationStrategy>() {
            Ok(strategy) => strategy,
            Err(e) => {
                error!("{e}");
                eprintln!("usage: sender [accumulate|direct]");
                return ExitCode::from(2);
            }
        },
        None => PopulationStrategy::default(),
    };

    match run(strategy) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "handoff failed");
            ExitCode::FAILURE
        }
    }
}
