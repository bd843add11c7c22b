//! Entry point: runs exactly one of `snapshot` or `replicate` per
//! invocation (spec §6 "Exit semantics") and maps the error taxonomy
//! in spec §7 to process exit codes.

use chameleon_replica::cdc::{CdcEngineConfig, FlushMode};
use chameleon_replica::config::Config;
use chameleon_replica::connection::ConnectionConfig;
use chameleon_replica::target::{PostgresConfig, PostgresTarget};
use chameleon_replica::types::HexifySet;
use chameleon_replica::cli::{Cli, Command};
use chameleon_replica::{catalog::Catalog, checkpoint::TargetWriter, snapshot, CdcError};
use clap::Parser;
use std::collections::HashMap;
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (config_path, args, is_snapshot) = match &cli.command {
        Command::Snapshot(args) => (&args.config, args, true),
        Command::Replicate(args) => (&args.config, args, false),
    };

    let mut config = match Config::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "configuration error");
            return ExitCode::from(1);
        }
    };
    args.apply_overrides(&mut config);

    chameleon_replica::logging::init(config.log_filter.as_deref());

    let result = if is_snapshot {
        run_snapshot(&config).await
    } else {
        run_replicate(&config).await
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "run failed");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

fn exit_code_for(err: &CdcError) -> u8 {
    match err {
        CdcError::Config(_) => 1,
        CdcError::Catalog(_) => 2,
        _ => 3,
    }
}

async fn run_snapshot(config: &Config) -> chameleon_replica::Result<()> {
    let hexify = HexifySet::new(config.hexify.iter().cloned());
    let conn_config = ConnectionConfig {
        hostname: config.mysql_conn.host.clone(),
        port: config.mysql_conn.port,
        username: config.mysql_conn.user.clone(),
        password: config.mysql_conn.password.clone(),
        database: Some(config.my_database.clone()),
        server_id: config.my_server_id,
        ..Default::default()
    };

    let mut conn = conn_config.connect().await?;
    info!(database = %config.my_database, "source catalog load starting");
    let catalog = Catalog::load(&mut conn, &config.my_database, &config.tables_limit, &hexify).await?;

    let pg_config = PostgresConfig {
        host: config.target_conn.host.clone(),
        port: config.target_conn.port,
        user: config.target_conn.user.clone(),
        password: config.target_conn.password.clone(),
        dbname: config.target_conn.dbname.clone(),
        log_table: config.target_conn.log_table.clone(),
        schema: config.my_database.clone(),
    };
    let target = PostgresTarget::connect(&pg_config).await?;

    let master_status = snapshot::run(
        &mut conn,
        &catalog,
        &target,
        config.snapshot_window,
        config.copy_mode.into(),
    )
    .await?;

    target.save_master_status(std::slice::from_ref(&master_status)).await?;
    info!(position = %master_status, "snapshot cycle finished");
    Ok(())
}

async fn run_replicate(config: &Config) -> chameleon_replica::Result<()> {
    let hexify = HexifySet::new(config.hexify.iter().cloned());
    let conn_config = ConnectionConfig {
        hostname: config.mysql_conn.host.clone(),
        port: config.mysql_conn.port,
        username: config.mysql_conn.user.clone(),
        password: config.mysql_conn.password.clone(),
        database: Some(config.my_database.clone()),
        server_id: config.my_server_id,
        ..Default::default()
    };
    let mut conn = conn_config.connect().await?;

    let catalog = Catalog::load(&mut conn, &config.my_database, &config.tables_limit, &hexify).await?;
    let type_map = catalog.type_map();
    let column_names: HashMap<String, Vec<String>> = catalog
        .tables
        .values()
        .map(|t| (t.name.clone(), t.columns.iter().map(|c| c.name.clone()).collect()))
        .collect();

    let pg_config = PostgresConfig {
        host: config.target_conn.host.clone(),
        port: config.target_conn.port,
        user: config.target_conn.user.clone(),
        password: config.target_conn.password.clone(),
        dbname: config.target_conn.dbname.clone(),
        log_table: config.target_conn.log_table.clone(),
        schema: config.my_database.clone(),
    };
    let target = PostgresTarget::connect(&pg_config).await?;

    let cdc_config = CdcEngineConfig {
        hostname: config.mysql_conn.host.clone(),
        port: config.mysql_conn.port,
        username: config.mysql_conn.user.clone(),
        password: config.mysql_conn.password.clone(),
        database: Some(config.my_database.clone()),
        server_id: config.my_server_id,
        flush_mode: FlushMode::Bounded(config.replica_batch_size),
        ddl_mode: config.ddl_mode.into(),
    };

    let did_work = chameleon_replica::cdc::run_cycle(&cdc_config, &target, &type_map, &hexify, column_names).await?;
    if did_work {
        info!("CDC cycle completed");
    } else {
        info!("no open batch, nothing to replicate this cycle");
    }
    Ok(())
}
