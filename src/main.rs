//! # geoetl command-line entry point
//!
//! ```text
//! main()
//!   │
//!   ├─> Parse CLI arguments (clap)
//!   ├─> Initialize logging (console + rolling files, console only on failure)
//!   └─> Run the subcommand: run | check | show
//! ```
//!
//! ```bash
//! geoetl run workflow.json
//! geoetl run workflow.json --policy interactive
//! geoetl check workflow.json --policy source-to-sink
//! geoetl show workflow.json
//! ```
//!
//! Set `RUST_LOG=debug` for per-step detail.

#![warn(clippy::all, rust_2018_idioms)]
#![expect(clippy::print_stdout)] // Allow println! in main binary

mod cli;

use anyhow::Result;
use clap::Parser as _;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    if let Err(err) = geoetl::logging::init() {
        geoetl::logging::init_console()?;
        tracing::warn!("File logging unavailable, logging to console only: {err:#}");
    }

    cli::run_command(cli)
}
