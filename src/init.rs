//! Initialization helpers for the application startup.

use crate::config::Config;
use crate::logger::StatusLogger;
use crate::pipeline::Pipeline;
use crate::resolver::create_resolver;
use crate::sources::HttpRuleSource;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Sets up the tracing subscriber with the configured filters.
pub fn setup_logging(config: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = config.logging.level.clone();

        // Suppress resolver logs unless explicitly enabled
        if !filter.contains("hickory_proto") {
            filter.push_str(",hickory_proto=off");
        }
        if !filter.contains("hickory_resolver") {
            filter.push_str(",hickory_resolver=warn");
        }

        tracing_subscriber::EnvFilter::new(filter)
    });

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

/// Loads `path` if it exists, otherwise the built-in defaults.
pub async fn load_config(path: &Path) -> Result<(Config, bool)> {
    if path.exists() {
        Ok((Config::load(path).await?, true))
    } else {
        Ok((Config::default(), false))
    }
}

/// Wires the production resolver, HTTP sources and console status sink into
/// a pipeline.
pub async fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let logger = StatusLogger::new(
        &config.logging,
        config.lifecycle.discard_threshold,
        Vec::new(),
    );
    let resolver = create_resolver(&config.dns).await?;
    let source = Arc::new(HttpRuleSource::from_config(config).await?);
    info!(
        "Pipeline ready: {} parts, {} rule sources",
        config.parts,
        source.origins().len()
    );
    Ok(Pipeline::new(config, source, resolver, logger))
}
