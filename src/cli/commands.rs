//! CLI command implementations

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::HttpServerConfig;
use crate::server::ODataServer;

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::write_response;

/// Load and validate a configuration file
pub fn load_config(path: &Path) -> CliResult<HttpServerConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| CliError::config_error(format!("Failed to read config: {}", e)))?;

    let config: HttpServerConfig = serde_json::from_str(&content)
        .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))?;

    config.model.validate()?;
    for collection in config.data.keys() {
        if !config.model.has_entity_set(collection) {
            return Err(CliError::config_error(format!(
                "Seed data for unknown entity set '{}'",
                collection
            )));
        }
    }

    Ok(config)
}

/// Parse arguments and run the selected command
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Serve { config, port } => serve(&config, port),
        Command::Check { config } => check(&config),
    }
}

/// Serve the configured model until the process is stopped
pub fn serve(config_path: &Path, port: Option<u16>) -> CliResult<()> {
    let mut config = load_config(config_path)?;
    if let Some(port) = port {
        config = config.with_port(port);
    }

    let adapter = Arc::new(config.seeded_adapter());
    let server = ODataServer::new(config.service_config(adapter)?);

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))?;

    rt.block_on(async {
        let listener = TcpListener::bind(config.socket_addr())
            .await
            .map_err(|e| CliError::boot_failed(format!("Failed to bind {}: {}", config.socket_addr(), e)))?;

        info!(
            entity_sets = config.model.entity_sets.len(),
            "Serving OData model"
        );

        server
            .serve(listener)
            .await
            .map_err(|e| CliError::boot_failed(format!("HTTP server failed: {}", e)))
    })
}

/// Validate the configuration and print the catalog
pub fn check(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    write_response(catalog(&config))
}

fn catalog(config: &HttpServerConfig) -> Value {
    let sets: Vec<Value> = config
        .model
        .entity_sets
        .iter()
        .map(|(name, set)| {
            json!({
                "name": name,
                "entityType": set.entity_type,
                "documents": config.data.get(name).map(Vec::len).unwrap_or(0),
            })
        })
        .collect();

    json!({
        "namespace": config.model.namespace,
        "address": config.socket_addr(),
        "entitySets": sets,
    })
}
