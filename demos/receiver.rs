//! # Receiver
//!
//! Connects to the sender's rendezvous socket, adopts the handed-off
//! segment and decodes the frame in place.
//!
//! Run: `cargo run --example receiver` while `sender` is waiting.

use arrow::datatypes::Int32Type;
use arrow_memfd::handoff::Receiver;
use arrow_memfd::{HandoffConfig, Result};
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn run() -> Result<()> {
    let config = HandoffConfig::default();
    let received = Receiver::from_config(&config)?.receive()?;
    let frame = received.read_frame()?;

    println!(
        "segment: {} bytes, sealed: {}, frame: {} bytes",
        received.capacity(),
        received.is_sealed()?,
        frame.len()
    );
    for field in frame.schema().fields() {
        println!("field {:?}: {}", field.name, field.ty);
    }
    println!("rows: {}", frame.row_count());

    let values = frame.values::<Int32Type>("rand")?;
    let head: Vec<_> = values.iter().take(5).collect();
    println!("first values: {head:?}");
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("arrow_memfd=info")),
        )
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "receive failed");
            ExitCode::FAILURE
        }
    }
}
