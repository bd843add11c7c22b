//! Binlog position tracking.
//!
//! Trimmed from `myyrakle-mysql-binlog-rs`'s `offset.rs`: `mysql_lib.py`
//! tracks progress purely via `SHOW MASTER STATUS`'s `(File, Position)`
//! pair, so the GTID-set machinery the original carries has no
//! counterpart here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A point in the source's binlog: file name plus byte offset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct BinlogPosition {
    pub log_file: String,
    pub log_position: u64,
}

impl BinlogPosition {
    pub fn new(log_file: impl Into<String>, log_position: u64) -> Self {
        BinlogPosition {
            log_file: log_file.into(),
            log_position,
        }
    }

    /// Numeric suffix of the file name, e.g. `mysql-bin.000123` -> 123.
    /// Used only to compare positions across a rotate boundary, where
    /// the byte offset alone does not order two files.
    pub fn file_sequence(&self) -> Option<u64> {
        self.log_file.rsplit('.').next().and_then(|s| s.parse().ok())
    }

    /// True if `self` is at or after `other` in binlog order: a later
    /// file sequence always wins; within the same file, the higher
    /// position wins. Backs the position-monotonicity invariant (spec §3).
    pub fn is_at_or_after(&self, other: &BinlogPosition) -> bool {
        match (self.file_sequence(), other.file_sequence()) {
            (Some(a), Some(b)) if a != b => a > b,
            _ => self.log_file == other.log_file && self.log_position >= other.log_position,
        }
    }
}

impl fmt::Display for BinlogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.log_file, self.log_position)
    }
}

/// Master status as reported by `SHOW MASTER STATUS` (or `SHOW BINARY
/// LOG STATUS` on newer MySQL releases), the last durably acknowledged
/// source position for the current batch.
pub type MasterStatus = BinlogPosition;
