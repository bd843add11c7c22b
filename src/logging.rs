//! Logging initialization (ambient stack §1.2).
//!
//! Grounded on `myyrakle-mysql-binlog-rs`'s `main.rs` (`tracing_subscriber::fmt::init()`),
//! promoted to a module that reads a configurable filter string instead
//! of hardcoding defaults — a long-running replica needs adjustable
//! verbosity in a way a one-shot example binary never did.

use tracing_subscriber::EnvFilter;

/// `filter` is typically `config.log_filter`, falling back to `info` for
/// this crate and `warn` for its dependencies when unset.
pub fn init(filter: Option<&str>) {
    let env_filter = match filter {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("warn,chameleon_replica=info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .init();
}
