//! Binlog transport, decoding, and DDL normalization (spec §4.4, §4.5).

pub mod auth;
pub mod ddl;
pub mod decoder;
pub mod protocol;

pub use decoder::{BinlogDecoder, DecodedEvent, QueryEvent, RowEvent, TableMap};
