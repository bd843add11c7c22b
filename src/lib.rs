//! Continuous MySQL to PostgreSQL replication: initial snapshot plus
//! binlog change data capture.
//!
//! - [`catalog`] reads the source's information_schema.
//! - [`projection`] builds per-column CSV/INSERT select expressions.
//! - [`snapshot`] takes the consistent initial copy under a read lock.
//! - [`binlog`] decodes the replication stream and normalizes DDL.
//! - [`cdc`] drives one pull cycle against a [`checkpoint::TargetWriter`].
//! - [`target`] carries the concrete PostgreSQL implementation of that
//!   trait.

pub mod binlog;
pub mod catalog;
pub mod cdc;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod model;
pub mod offset;
pub mod projection;
pub mod snapshot;
pub mod target;
pub mod types;

pub use checkpoint::TargetWriter;
pub use error::{CdcError, Result};
pub use model::{Action, BatchDescriptor, BatchId, ChangeRecord, GlobalData, NormalizedDdl};
pub use offset::{BinlogPosition, MasterStatus};
pub use types::{HexifySet, TypeMap, Value};
