//! 🔧 App Configuration: TOML and env vars in, one typed struct out.
//!
//! Layering, lowest to highest:
//! 1. `SHOVEL_*` environment variables. Nested keys use a double underscore:
//!    `SHOVEL_PIPELINE__MAX_IN_FLIGHT=4` sets `pipeline.max_in_flight`.
//! 2. The TOML file, if one was given. The file wins on conflicts.
//!
//! ```toml
//! [source_config.File]
//! file_name = "products.json"
//! format = "json_array"
//!
//! [sink_config.Elasticsearch]
//! url = "http://localhost:9200"
//! compress = true
//!
//! [pipeline]
//! index_target = "chorus-ecommerce-data"
//! key_field = "id"
//! allowed_fields = ["id", "name", "title", "price"]
//! ```

use std::path::Path;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::{SinkConfig, SourceConfig};
use crate::pipeline::PipelineConfig;

/// 📦 Where documents come from, where they go, and how hard to push.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub source_config: SourceConfig,
    pub sink_config: SinkConfig,
    pub pipeline: PipelineConfig,
}

/// 🚀 Load and validate the config.
///
/// `None` means env vars only. A path that doesn't exist is not an error by itself
/// (figment treats a missing file as empty), but the required fields will be missing
/// and the error will say so.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration from {}",
        config_file_name.map_or_else(|| "environment only".to_string(), |path| format!("'{}' + environment", path.display()))
    );

    let config = Figment::new().merge(Env::prefixed("SHOVEL_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Could not make sense of '{}' plus the SHOVEL_* environment. Check the section names and required fields.",
            path.display()
        ),
        None => "💀 Could not build a config from SHOVEL_* environment variables alone. No file was given, so this one's on the environment."
            .to_string(),
    };

    let app_config: AppConfig = config.extract().context(context_msg)?;
    app_config
        .pipeline
        .validate()
        .context("💀 The config parsed, but the pipeline settings don't add up")?;
    Ok(app_config)
}
