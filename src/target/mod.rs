//! The concrete PostgreSQL side of the checkpoint protocol (spec §4.7,
//! §9 design note): a [`checkpoint::TargetWriter`](crate::checkpoint::TargetWriter)
//! implementation over `tokio-postgres`/`deadpool-postgres`.

mod postgres;

pub use postgres::{PostgresConfig, PostgresTarget};
