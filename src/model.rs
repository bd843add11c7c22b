//! Data model shared between the CDC engine and the target (spec §3).

use crate::types::Value;
use std::collections::HashMap;

/// `action` in the target-side staging contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Insert,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Insert => "insert",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

/// A target-assigned unit of work identifier. Batches are totally
/// ordered by this id.
pub type BatchId = i64;

/// `(batch_id, start_log_file, start_log_position, log_table)` — the
/// target-owned descriptor the CDC engine consumes but never creates.
#[derive(Debug, Clone)]
pub struct BatchDescriptor {
    pub batch_id: BatchId,
    pub start_log_file: String,
    pub start_log_position: u64,
    pub log_table: String,
}

/// The `global` half of a change record.
#[derive(Debug, Clone)]
pub struct GlobalData {
    pub log_file: String,
    pub log_position: u64,
    pub schema: String,
    pub table: String,
    pub batch_id: BatchId,
    pub log_table: String,
    pub action: Action,
}

/// One change record: a pair of (global, event) sub-records. Empty
/// columns are omitted from `event_data`.
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    pub global: GlobalData,
    pub event_data: HashMap<String, Value>,
}

/// A normalized DDL descriptor forwarded by the DDL Normalizer (spec §4.5,
/// §6 supplement — queued alongside row records rather than only logged).
#[derive(Debug, Clone)]
pub struct NormalizedDdl {
    pub log_file: String,
    pub log_position: u64,
    pub verb: String,
    pub relation_kind: String,
    pub target_sql: String,
}

/// A single decoded row used by the snapshot's insert-mode fallback:
/// ordered values matching a table's insert-projection column order.
#[derive(Debug, Clone)]
pub struct InsertRow {
    pub values: Vec<Value>,
}
