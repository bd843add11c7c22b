//! Command-line interface (ambient stack §1.4).
//!
//! Grounded on `pgtrickle-tui`'s `clap::Parser` derive shape: a
//! top-level command with subcommands, each taking a config path plus
//! env-overridable connection settings.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "chameleon_replica", about = "MySQL to PostgreSQL continuous replication")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Take a consistent initial copy of every tracked table and record
    /// the starting binlog coordinate for CDC to resume from.
    Snapshot(RunArgs),
    /// Run one CDC pull cycle: decode, stage, checkpoint, replay.
    Replicate(RunArgs),
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Path to the TOML configuration file (spec §6).
    #[arg(long, value_name = "PATH")]
    pub config: PathBuf,

    /// Override the source MySQL host.
    #[arg(long, env = "CHAMELEON_MYSQL_HOST")]
    pub mysql_host: Option<String>,

    /// Override the source MySQL port.
    #[arg(long, env = "CHAMELEON_MYSQL_PORT")]
    pub mysql_port: Option<u16>,

    /// Override the target PostgreSQL host.
    #[arg(long, env = "CHAMELEON_PG_HOST")]
    pub pg_host: Option<String>,

    /// Override the target PostgreSQL port.
    #[arg(long, env = "CHAMELEON_PG_PORT")]
    pub pg_port: Option<u16>,
}

impl RunArgs {
    /// Apply CLI/env overrides on top of a loaded `Config`.
    pub fn apply_overrides(&self, config: &mut crate::config::Config) {
        if let Some(host) = &self.mysql_host {
            config.mysql_conn.host = host.clone();
        }
        if let Some(port) = self.mysql_port {
            config.mysql_conn.port = port;
        }
        if let Some(host) = &self.pg_host {
            config.target_conn.host = host.clone();
        }
        if let Some(port) = self.pg_port {
            config.target_conn.port = port;
        }
    }
}
