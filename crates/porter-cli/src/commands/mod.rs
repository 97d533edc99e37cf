//! Command implementations for the porter CLI.

pub mod migrate;
pub mod scan;

use crate::cli::RunSpec;
use anyhow::{Context, Result, bail};
use porter_core::{MigrationConfig, SourceSpec};

/// Builds the migration configuration from either `--config` or the
/// individual flags.
pub fn resolve_config(spec: &RunSpec) -> Result<MigrationConfig> {
    if let Some(path) = &spec.config {
        return MigrationConfig::load(path)
            .with_context(|| format!("loading migration config from {}", path.display()));
    }

    let source = match (&spec.source_dir, &spec.wxr) {
        (Some(root), None) => SourceSpec::MarkdownTree { root: root.clone() },
        (None, Some(path)) => SourceSpec::WxrExport { path: path.clone() },
        (None, None) => bail!("specify a source: --config, --source-dir, or --wxr"),
        (Some(_), Some(_)) => bail!("--source-dir and --wxr are mutually exclusive"),
    };

    let require = |value: &Option<String>, flag: &str| -> Result<String> {
        value
            .clone()
            .ok_or_else(|| anyhow::anyhow!("{flag} is required unless --config is used"))
    };

    let config = MigrationConfig {
        source,
        source_site_url: require(&spec.from_url, "--from-url")?,
        target_site_url: require(&spec.to_url, "--to-url")?,
        assets_base_url: require(&spec.assets_url, "--assets-url")?,
        assets_dir: spec
            .assets_dir
            .clone()
            .ok_or_else(|| anyhow::anyhow!("--assets-dir is required unless --config is used"))?,
        concurrency: spec.concurrency.unwrap_or(5),
        poll_interval_ms: 50,
        continue_on_error: false,
    };
    config.validate()?;
    Ok(config)
}
