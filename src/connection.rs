//! Source MySQL connection setup and server-status queries.
//!
//! Grounded on `myyrakle-mysql-binlog-rs`'s `src/connection.rs` (`ConnectionConfig`,
//! `MySqlConnection`), trimmed of GTID status (`BinlogStatus` no longer
//! carries `executed_gtid_set`, and `is_gtid_mode_enabled`/
//! `get_executed_gtid_set` are gone) to match [[offset]]'s position model.

use crate::error::{CdcError, Result};
use crate::offset::MasterStatus;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: Option<String>,
    pub server_id: u32,
    pub timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            hostname: "localhost".to_string(),
            port: 3306,
            username: "root".to_string(),
            password: String::new(),
            database: None,
            server_id: 1,
            timeout: Duration::from_secs(30),
        }
    }
}

impl ConnectionConfig {
    pub fn new(hostname: impl Into<String>, username: impl Into<String>) -> Self {
        ConnectionConfig {
            hostname: hostname.into(),
            username: username.into(),
            ..Default::default()
        }
    }

    fn build_opts(&self) -> Result<Opts> {
        let connection_string = match &self.database {
            Some(db) => format!(
                "mysql://{}:{}@{}:{}/{}",
                self.username, self.password, self.hostname, self.port, db
            ),
            None => format!(
                "mysql://{}:{}@{}:{}",
                self.username, self.password, self.hostname, self.port
            ),
        };

        connection_string
            .parse()
            .map_err(|_| CdcError::Connection("failed to parse connection string".to_string()))
    }

    /// Open a single connection to the source (catalog reads, snapshot,
    /// and status queries all run through their own short-lived
    /// connection rather than a shared pool — mirroring `mysql_lib.py`'s
    /// one-`mysql.connector` handle per engine phase).
    pub async fn connect(&self) -> Result<Conn> {
        let opts = self.build_opts()?;
        Conn::new(opts)
            .await
            .map_err(|e| CdcError::Connection(format!("failed to connect to source: {e}")))
    }
}

/// `SHOW BINARY LOG STATUS` (MySQL 8.4+) falling back to the legacy
/// `SHOW MASTER STATUS` name, mirroring `mysql_lib.py`'s
/// `get_master_status`.
pub async fn get_master_status(conn: &mut Conn) -> Result<MasterStatus> {
    let row: Option<(String, u64)> = match conn.query_first("SHOW BINARY LOG STATUS").await {
        Ok(row) => row,
        Err(_) => conn
            .query_first("SHOW MASTER STATUS")
            .await
            .map_err(|e| CdcError::Connection(format!("failed to query master status: {e}")))?,
    };

    row.map(|(file, position)| MasterStatus::new(file, position))
        .ok_or_else(|| CdcError::Connection("no binlog status available, is log_bin enabled?".to_string()))
}

pub async fn get_variable(conn: &mut Conn, name: &str) -> Result<Option<String>> {
    let query = format!("SHOW GLOBAL VARIABLES LIKE '{name}'");
    let row: Option<(String, String)> = conn
        .query_first(query)
        .await
        .map_err(|e| CdcError::Connection(format!("failed to query variable {name}: {e}")))?;
    Ok(row.map(|(_, value)| value))
}

pub async fn get_binlog_format(conn: &mut Conn) -> Result<String> {
    get_variable(conn, "binlog_format")
        .await?
        .ok_or_else(|| CdcError::Connection("binlog_format variable not found".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_config_default_targets_localhost() {
        let config = ConnectionConfig::default();
        assert_eq!(config.hostname, "localhost");
        assert_eq!(config.port, 3306);
    }

    #[test]
    fn connection_config_new_overrides_host_and_user() {
        let config = ConnectionConfig::new("127.0.0.1", "root");
        assert_eq!(config.hostname, "127.0.0.1");
        assert_eq!(config.username, "root");
    }
}
