//! Configuration loading

use std::path::Path;

use anyhow::{Context, Result};
use rowgate_common::Config;
use tracing::warn;

/// Load configuration from `path`, falling back to defaults when no file is given
/// or the file does not exist
pub async fn load(path: Option<&str>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };

    if Path::new(path).exists() {
        Config::load(path)
            .await
            .with_context(|| format!("failed to load configuration from {path}"))
    } else {
        warn!(path, "Configuration file not found, using defaults");
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowgate_common::MissingTablePolicy;

    #[tokio::test]
    async fn test_missing_file_uses_defaults() {
        let config = load(Some("/nonexistent/rowgate.toml")).await.unwrap();
        assert_eq!(config.gate.missing_table, MissingTablePolicy::Deny);
        assert!(load(None).await.unwrap().gate.require_full_coverage);
    }

    #[tokio::test]
    async fn test_loads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rowgate.toml");
        std::fs::write(&path, "[gate]\nmissing_table = \"allow\"\n").unwrap();

        let config = load(path.to_str()).await.unwrap();
        assert_eq!(config.gate.missing_table, MissingTablePolicy::Allow);
    }
}
