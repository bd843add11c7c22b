//! Snapshot Engine (spec §4.3).
//!
//! Takes a consistent initial copy of every tracked table under a global
//! read lock, in `window`-row slices, handing each slice's CSV text to
//! the target's bulk-load path with a per-row INSERT fallback.
//!
//! Grounded on `mysql_lib.py`'s `lock_tables`/`get_master_status`/
//! `copy_table_data`/`unlock_tables` — kept in the same order (lock,
//! capture master status, copy every table slice by slice, unlock) and
//! the same `copy_mode` branch (`direct` in-memory buffer vs `file`
//! temp-file materialize/reopen).

use crate::catalog::{Catalog, TableDescriptor};
use crate::checkpoint::{CsvSource, TargetWriter};
use crate::connection;
use crate::error::{CdcError, Result};
use crate::model::InsertRow;
use crate::offset::MasterStatus;
use crate::types::Value;
use mysql_async::prelude::*;
use mysql_async::Conn;
use std::io::{Seek, SeekFrom, Write};
use tracing::{debug, info, warn};

/// How snapshot CSV slices are staged before being handed to the
/// target's bulk-load call (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    Direct,
    File,
}

/// Take a full initial copy of every table in `catalog` and return the
/// master status captured immediately after the read lock is acquired —
/// the CDC engine's very first batch starts from this position.
pub async fn run(
    conn: &mut Conn,
    catalog: &Catalog,
    target: &dyn TargetWriter,
    window: u64,
    copy_mode: CopyMode,
) -> Result<MasterStatus> {
    lock_tables(conn, catalog).await?;
    let master_status = connection::get_master_status(conn).await;

    // The lock must be released even if capturing the master status or
    // copying a table fails, or every later `FLUSH TABLES ... WITH READ
    // LOCK` attempt on this connection would hang.
    let master_status = match master_status {
        Ok(status) => status,
        Err(e) => {
            unlock_tables(conn).await.ok();
            return Err(e);
        }
    };

    for table in catalog.tables.values() {
        if let Err(e) = copy_table(conn, table, target, window, copy_mode).await {
            unlock_tables(conn).await.ok();
            return Err(e);
        }
    }

    unlock_tables(conn).await?;
    info!(position = %master_status, "snapshot complete");
    Ok(master_status)
}

async fn lock_tables(conn: &mut Conn, catalog: &Catalog) -> Result<()> {
    let names: Vec<String> = catalog.tables.values().map(|t| format!("`{}`", t.name)).collect();
    if names.is_empty() {
        return Ok(());
    }
    let sql = format!("FLUSH TABLES {} WITH READ LOCK", names.join(", "));
    conn.query_drop(sql)
        .await
        .map_err(|e| CdcError::Connection(format!("failed to acquire read lock: {e}")))
}

async fn unlock_tables(conn: &mut Conn) -> Result<()> {
    conn.query_drop("UNLOCK TABLES")
        .await
        .map_err(|e| CdcError::Connection(format!("failed to release read lock: {e}")))
}

async fn copy_table(
    conn: &mut Conn,
    table: &TableDescriptor,
    target: &dyn TargetWriter,
    window: u64,
    copy_mode: CopyMode,
) -> Result<()> {
    let count: u64 = conn
        .query_first(format!("SELECT count(*) FROM `{}`", table.name))
        .await
        .map_err(|e| CdcError::Catalog(format!("failed to count rows in {}: {e}", table.name)))?
        .unwrap_or(0);

    let total_slices = count / window + 1;
    debug!(table = %table.name, rows = count, slices = total_slices, "copying table");

    let csv_exprs: Vec<String> = table.columns.iter().map(|c| c.csv_expr.clone()).collect();
    let insert_exprs: Vec<String> = table.columns.iter().map(|c| c.insert_expr.clone()).collect();
    let csv_select = crate::projection::csv_row_select(&csv_exprs);

    let type_map = {
        let mut map = crate::types::TypeMap::new();
        let cols = table
            .columns
            .iter()
            .map(|c| (c.name.clone(), c.data_type.clone()))
            .collect();
        map.insert_table(table.name.clone(), cols);
        map
    };

    for slice in 0..total_slices {
        let offset = slice * window;
        let sql = format!(
            "SELECT {csv_select} AS data FROM `{}` LIMIT {offset}, {window}",
            table.name
        );
        let rows: Vec<Option<String>> = conn
            .query(sql)
            .await
            .map_err(|e| CdcError::Catalog(format!("failed to select slice of {}: {e}", table.name)))?;
        let csv_data = rows
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join("\n");

        let csv_source = match copy_mode {
            CopyMode::Direct => CsvSource::InMemory(std::io::Cursor::new(csv_data.into_bytes())),
            CopyMode::File => materialize_to_tempfile(&csv_data)?,
        };

        if let Err(e) = target.copy_data(&table.name, csv_source, &type_map).await {
            warn!(table = %table.name, error = %e, "bulk copy failed, falling back to per-row inserts");
            insert_fallback(conn, table, &insert_exprs, target, &type_map, offset, window).await?;
        }
    }

    Ok(())
}

fn materialize_to_tempfile(csv_data: &str) -> Result<CsvSource> {
    let mut file = tempfile::tempfile().map_err(CdcError::Io)?;
    file.write_all(csv_data.as_bytes()).map_err(CdcError::Io)?;
    file.seek(SeekFrom::Start(0)).map_err(CdcError::Io)?;
    Ok(CsvSource::File(file))
}

async fn insert_fallback(
    conn: &mut Conn,
    table: &TableDescriptor,
    insert_exprs: &[String],
    target: &dyn TargetWriter,
    type_map: &crate::types::TypeMap,
    offset: u64,
    window: u64,
) -> Result<()> {
    let insert_select = crate::projection::insert_row_select(insert_exprs);
    let sql = format!(
        "SELECT {insert_select} FROM `{}` LIMIT {offset}, {window}",
        table.name
    );
    let rows: Vec<mysql_async::Row> = conn
        .query(sql)
        .await
        .map_err(|e| CdcError::Catalog(format!("fallback insert select failed for {}: {e}", table.name)))?;

    let insert_rows: Vec<InsertRow> = rows
        .into_iter()
        .map(|row| InsertRow {
            values: (0..row.len())
                .map(|i| row.as_ref(i).map(mysql_value_to_value).unwrap_or(Value::Null))
                .collect(),
        })
        .collect();

    target.insert_data(&table.name, &insert_rows, type_map).await
}

/// Convert a decoded `mysql_async::Value` (whatever the driver handed
/// back for a raw `SELECT ... AS` projection) into our own `Value`.
/// Used only by the insert fallback path — the binlog decoder never
/// goes through this, it decodes the wire format directly.
fn mysql_value_to_value(value: &mysql_async::Value) -> Value {
    match value {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Bytes(bytes) => {
            String::from_utf8(bytes.clone()).map(Value::Str).unwrap_or_else(|_| Value::Bytes(bytes.clone()))
        }
        mysql_async::Value::Int(i) => Value::Int(*i),
        mysql_async::Value::UInt(u) => Value::UInt(*u),
        mysql_async::Value::Float(f) => Value::Float(*f as f64),
        mysql_async::Value::Double(d) => Value::Float(*d),
        mysql_async::Value::Date(year, month, day, hour, minute, second, micro) => {
            chrono::NaiveDate::from_ymd_opt(*year as i32, *month as u32, *day as u32)
                .and_then(|d| d.and_hms_micro_opt(*hour as u32, *minute as u32, *second as u32, *micro))
                .map(Value::DateTime)
                .unwrap_or(Value::Null)
        }
        mysql_async::Value::Time(negative, days, hours, minutes, seconds, _micro) => {
            let total_hours = *days as u32 * 24 + *hours as u32;
            let rendered = chrono::NaiveTime::from_hms_opt(total_hours % 24, *minutes as u32, *seconds as u32);
            match rendered {
                Some(t) if !negative => Value::Time(t),
                _ => Value::Null,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mysql_null_converts_to_value_null() {
        assert_eq!(mysql_value_to_value(&mysql_async::Value::NULL), Value::Null);
    }

    #[test]
    fn mysql_bytes_converts_to_str_when_valid_utf8() {
        let v = mysql_async::Value::Bytes(b"hello".to_vec());
        assert_eq!(mysql_value_to_value(&v), Value::Str("hello".to_string()));
    }

    #[test]
    fn mysql_int_converts_to_value_int() {
        assert_eq!(mysql_value_to_value(&mysql_async::Value::Int(42)), Value::Int(42));
    }
}
