//! Checkpoint Protocol (spec §4.7, §9 design note).
//!
//! The contract with the target store, expressed as a narrow trait the
//! CDC engine consumes — the cyclic engine/target callback relationship
//! in the original (`pg_engine` held and called back into from
//! `mysql_engine`) is replaced here by composing two one-way interfaces
//! at the top level, as spec §9 instructs.

use crate::error::Result;
use crate::model::{BatchDescriptor, BatchId, ChangeRecord, InsertRow, NormalizedDdl};
use crate::offset::MasterStatus;
use crate::types::TypeMap;
use async_trait::async_trait;
use std::io::Read;

/// A source of CSV bytes for the bulk-load path, either an in-memory
/// buffer (`copy_mode = direct`) or a reopened temp file (`copy_mode =
/// file`) — spec §6's two copy modes.
pub enum CsvSource {
    InMemory(std::io::Cursor<Vec<u8>>),
    File(std::fs::File),
}

impl Read for CsvSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            CsvSource::InMemory(cursor) => cursor.read(buf),
            CsvSource::File(file) => file.read(buf),
        }
    }
}

/// The target's side of the replication contract. A `CdcEngine` is
/// generic over this trait so snapshot and CDC code never depend on a
/// concrete Postgres client directly.
#[async_trait]
pub trait TargetWriter: Send + Sync {
    /// Oldest-first list of open batches; the engine consumes only the
    /// head (spec §4.7).
    async fn get_batch_data(&self) -> Result<Vec<BatchDescriptor>>;

    /// Atomically append `records` to staging for the batch they carry.
    async fn write_batch(&self, records: &[ChangeRecord]) -> Result<()>;

    /// Durably record the new master status. Returns a new batch id if
    /// a new window was opened, `None` on an empty-batch save.
    async fn save_master_status(&self, status: &[MasterStatus]) -> Result<Option<BatchId>>;

    /// Mark `batch_id` fully applied.
    async fn set_batch_processed(&self, batch_id: BatchId) -> Result<()>;

    /// Replay staged rows into their final tables.
    async fn process_batch(&self) -> Result<()>;

    /// Snapshot bulk-load: stream CSV rows for `table` into the target.
    async fn copy_data(&self, table: &str, csv: CsvSource, schema: &TypeMap) -> Result<()>;

    /// Snapshot bulk-load fallback: insert already-materialized rows.
    async fn insert_data(&self, table: &str, rows: &[InsertRow], schema: &TypeMap) -> Result<()>;

    /// Apply a normalized DDL statement. Only called when `ddl_mode` is
    /// `Synchronous` (applied immediately) or as part of replaying a
    /// queued DDL descriptor during `process_batch`.
    async fn apply_ddl(&self, ddl: &NormalizedDdl) -> Result<()>;
}
