//! Catalog Reader (spec §4.1).
//!
//! Queries the source's information_schema to produce, per tracked
//! table, an ordered column list with types/defaults/nullability/key
//! membership/enum values, plus the two projection expressions each
//! column needs at snapshot time. Grounded on `mysql_lib.py`'s
//! `get_table_metadata`/`get_column_metadata`/`get_index_metadata`.

use crate::error::{CdcError, Result};
use crate::projection::{build_insert_expr, build_csv_expr};
use crate::types::{HexifySet, TypeMap};
use mysql_async::prelude::*;
use mysql_async::Conn;
use std::collections::HashMap;
use tracing::{debug, warn};

/// A single column as reported by `information_schema.COLUMNS`, plus
/// the two select expressions the Projection Builder derives for it.
#[derive(Debug, Clone)]
pub struct ColumnDescriptor {
    pub name: String,
    pub ordinal_position: u32,
    pub data_type: String,
    pub character_maximum_length: Option<i64>,
    pub numeric_precision: Option<u32>,
    pub numeric_scale: Option<u32>,
    pub is_nullable: bool,
    pub column_default: Option<String>,
    pub column_key: String,
    pub extra: String,
    pub enum_values: Option<Vec<String>>,
    pub csv_expr: String,
    pub insert_expr: String,
}

impl ColumnDescriptor {
    pub fn is_key(&self) -> bool {
        !self.column_key.is_empty()
    }
}

/// A BTREE index, columns ordered by their position within the index.
#[derive(Debug, Clone)]
pub struct IndexDescriptor {
    pub name: String,
    pub non_unique: bool,
    pub columns: Vec<String>,
}

/// Name, ordered column list, and index list for one tracked table.
#[derive(Debug, Clone)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub indexes: Vec<IndexDescriptor>,
}

/// All tracked tables plus the flat type map derived from them.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub tables: HashMap<String, TableDescriptor>,
}

impl Catalog {
    /// Build the catalog for `database`, restricted to `allow_list` when
    /// non-empty (empty means all base tables). A table that disappears
    /// between the listing query and its column query is logged and
    /// dropped, not fatal (spec §4.1).
    pub async fn load(
        conn: &mut Conn,
        database: &str,
        allow_list: &[String],
        hexify: &HexifySet,
    ) -> Result<Catalog> {
        let table_names = list_base_tables(conn, database, allow_list).await?;
        let mut tables = HashMap::new();

        for table_name in table_names {
            let columns = match load_columns(conn, database, &table_name, hexify).await {
                Ok(cols) if !cols.is_empty() => cols,
                Ok(_) => {
                    warn!(
                        table = %table_name,
                        "table disappeared before its column query returned any rows, dropping"
                    );
                    continue;
                }
                Err(e) => {
                    warn!(table = %table_name, error = %e, "failed to load columns, dropping table");
                    continue;
                }
            };
            let indexes = load_indexes(conn, database, &table_name).await.unwrap_or_default();
            debug!(table = %table_name, columns = columns.len(), indexes = indexes.len(), "loaded table descriptor");
            tables.insert(
                table_name.clone(),
                TableDescriptor {
                    name: table_name,
                    columns,
                    indexes,
                },
            );
        }

        Ok(Catalog { tables })
    }

    /// Derive the flat `table -> column -> declared type` map used at
    /// event-decode time (spec §3).
    pub fn type_map(&self) -> TypeMap {
        let mut map = TypeMap::new();
        for table in self.tables.values() {
            let cols = table
                .columns
                .iter()
                .map(|c| (c.name.clone(), c.data_type.clone()))
                .collect();
            map.insert_table(table.name.clone(), cols);
        }
        map
    }
}

async fn list_base_tables(
    conn: &mut Conn,
    database: &str,
    allow_list: &[String],
) -> Result<Vec<String>> {
    let rows: Vec<String> = if allow_list.is_empty() {
        "SELECT table_name FROM information_schema.tables \
         WHERE table_type = 'BASE TABLE' AND table_schema = :db"
            .with(mysql_async::params! { "db" => database })
            .map(conn, |name: String| name)
            .await
            .map_err(|e| CdcError::Catalog(format!("failed to list base tables: {e}")))?
    } else {
        let placeholders = allow_list.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let query = format!(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_type = 'BASE TABLE' AND table_schema = ? \
             AND table_name IN ({placeholders})"
        );
        let mut params: Vec<mysql_async::Value> = vec![database.into()];
        params.extend(allow_list.iter().map(|t| t.as_str().into()));
        query
            .with(params)
            .map(conn, |name: String| name)
            .await
            .map_err(|e| CdcError::Catalog(format!("failed to list base tables: {e}")))?
    };
    Ok(rows)
}

async fn load_columns(
    conn: &mut Conn,
    database: &str,
    table: &str,
    hexify: &HexifySet,
) -> Result<Vec<ColumnDescriptor>> {
    type Row = (
        String,         // column_name
        Option<String>, // column_default
        u32,            // ordinal_position
        String,         // data_type
        Option<i64>,    // character_maximum_length
        String,         // extra
        String,         // column_key
        String,         // is_nullable
        Option<u32>,    // numeric_precision
        Option<u32>,    // numeric_scale
        Option<String>, // column_type (used to derive enum values)
    );

    let rows: Vec<Row> = "SELECT column_name, column_default, ordinal_position, data_type, \
         character_maximum_length, extra, column_key, is_nullable, \
         numeric_precision, numeric_scale, column_type \
         FROM information_schema.columns \
         WHERE table_schema = :db AND table_name = :tbl \
         ORDER BY ordinal_position"
        .with(mysql_async::params! { "db" => database, "tbl" => table })
        .fetch(conn)
        .await
        .map_err(|e| CdcError::Catalog(format!("failed to load columns for {table}: {e}")))?;

    let mut columns = Vec::with_capacity(rows.len());
    for (
        name,
        column_default,
        ordinal_position,
        data_type,
        character_maximum_length,
        extra,
        column_key,
        is_nullable,
        numeric_precision,
        numeric_scale,
        column_type,
    ) in rows
    {
        let enum_values = if data_type == "enum" {
            column_type.as_deref().map(parse_enum_values)
        } else {
            None
        };
        let csv_expr = build_csv_expr(&name, &data_type, hexify);
        let insert_expr = build_insert_expr(&name, &data_type, hexify);
        columns.push(ColumnDescriptor {
            name,
            ordinal_position,
            data_type,
            character_maximum_length,
            numeric_precision,
            numeric_scale,
            is_nullable: is_nullable == "YES",
            column_default,
            column_key,
            extra,
            enum_values,
            csv_expr,
            insert_expr,
        });
    }
    Ok(columns)
}

/// Parse MySQL's `enum('a','b','c')` COLUMN_TYPE rendering into its
/// value list. Mirrors `mysql_lib.py`'s `SUBSTRING(COLUMN_TYPE,5)` (it
/// strips the leading `enum(` in SQL; here we do the same by string
/// slicing since we already have the full column_type value in hand).
fn parse_enum_values(column_type: &str) -> Vec<String> {
    let inner = column_type
        .strip_prefix("enum(")
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or("");
    inner
        .split(',')
        .map(|part| part.trim().trim_matches('\'').replace("''", "'"))
        .collect()
}

async fn load_indexes(conn: &mut Conn, database: &str, table: &str) -> Result<Vec<IndexDescriptor>> {
    type Row = (String, i64, String);

    let rows: Vec<Row> = "SELECT index_name, non_unique, column_name \
         FROM information_schema.statistics \
         WHERE table_schema = :db AND table_name = :tbl AND index_type = 'BTREE' \
         ORDER BY index_name, seq_in_index"
        .with(mysql_async::params! { "db" => database, "tbl" => table })
        .fetch(conn)
        .await
        .map_err(|e| CdcError::Catalog(format!("failed to load indexes for {table}: {e}")))?;

    let mut by_name: Vec<IndexDescriptor> = Vec::new();
    for (index_name, non_unique, column_name) in rows {
        if let Some(existing) = by_name.iter_mut().find(|idx| idx.name == index_name) {
            existing.columns.push(column_name);
        } else {
            by_name.push(IndexDescriptor {
                name: index_name,
                non_unique: non_unique != 0,
                columns: vec![column_name],
            });
        }
    }
    Ok(by_name)
}
