//! Command-line interface for tidepool.
//!
//! Provides commands for running pool simulations and inspecting the
//! effective pool settings.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands, SimulationSummary};
