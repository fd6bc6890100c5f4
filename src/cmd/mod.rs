//! CLI command handlers

use clap::Subcommand;

pub mod reap;
pub mod root;

#[derive(Subcommand)]
pub enum Commands {
    /// Remove leftover build/run containers without starting the daemon
    Reap,
}
