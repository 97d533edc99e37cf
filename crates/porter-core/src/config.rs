//! Migration run configuration.
//!
//! A [`MigrationConfig`] names the source, the URL mapping, and the
//! downloader tuning for one migration. It is stored as TOML:
//!
//! ```toml
//! source_site_url = "https://legacy.example"
//! target_site_url = "https://new.example"
//! assets_base_url = "https://new.example/assets"
//! assets_dir = "./assets"
//! concurrency = 5
//!
//! [source]
//! type = "markdown_tree"
//! root = "./docs"
//! ```
//!
//! The assets directory can be overridden with the `PORTER_ASSETS_DIR`
//! environment variable, which is handy in tests and CI.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

/// Where the entities come from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceSpec {
    /// A directory tree of markdown/HTML documents.
    MarkdownTree {
        /// Root of the tree to walk.
        root: PathBuf,
    },
    /// A streaming XML export file.
    WxrExport {
        /// Path of the export file.
        path: PathBuf,
    },
}

/// Configuration for one migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// The source to read entities from.
    pub source: SourceSpec,

    /// Origin the content is migrating away from. Used as the base URL for
    /// relative references and to decide which URLs get re-rooted.
    pub source_site_url: String,

    /// Origin of the destination site. Same-origin references are re-rooted
    /// here during the rewrite pass.
    pub target_site_url: String,

    /// Public URL prefix under which fetched assets will be served.
    pub assets_base_url: String,

    /// Directory fetched assets are written into.
    pub assets_dir: PathBuf,

    /// Maximum simultaneous transfers.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Cooperative sleep between downloader polls while draining, in
    /// milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Keep importing after an entity is rejected, recording the failure in
    /// the summary, instead of aborting the run.
    #[serde(default)]
    pub continue_on_error: bool,
}

const fn default_concurrency() -> usize {
    5
}

const fn default_poll_interval_ms() -> u64 {
    50
}

impl MigrationConfig {
    /// Loads a configuration from a TOML file and applies environment
    /// overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut config: Self = toml::from_str(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration as pretty TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("cannot create config dir: {e}")))?;
        }
        let toml = toml::to_string_pretty(self)?;
        fs::write(path, toml)
            .map_err(|e| Error::Config(format!("cannot write {}: {e}", path.display())))?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("PORTER_ASSETS_DIR") {
            let trimmed = dir.trim();
            if !trimmed.is_empty() {
                self.assets_dir = PathBuf::from(trimmed);
            }
        }
    }

    /// Checks that the URL fields actually parse.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("source_site_url", &self.source_site_url),
            ("target_site_url", &self.target_site_url),
            ("assets_base_url", &self.assets_base_url),
        ] {
            Url::parse(value)
                .map_err(|e| Error::Config(format!("{name} '{value}' is not a URL: {e}")))?;
        }
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".to_string()));
        }
        Ok(())
    }

    /// The migrated-from origin as a parsed URL.
    pub fn source_site(&self) -> Result<Url> {
        Url::parse(&self.source_site_url)
            .map_err(|e| Error::Config(format!("source_site_url: {e}")))
    }

    /// The destination origin as a parsed URL.
    pub fn target_site(&self) -> Result<Url> {
        Url::parse(&self.target_site_url)
            .map_err(|e| Error::Config(format!("target_site_url: {e}")))
    }

    /// The public base URL for fetched assets, with a trailing slash so
    /// joins behave.
    pub fn assets_base(&self) -> Result<Url> {
        let mut base = self.assets_base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        Url::parse(&base).map_err(|e| Error::Config(format!("assets_base_url: {e}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> MigrationConfig {
        MigrationConfig {
            source: SourceSpec::MarkdownTree {
                root: PathBuf::from("./docs"),
            },
            source_site_url: "https://legacy.example".to_string(),
            target_site_url: "https://new.example".to_string(),
            assets_base_url: "https://new.example/assets".to_string(),
            assets_dir: PathBuf::from("./assets"),
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            continue_on_error: false,
        }
    }

    #[test]
    fn test_round_trips_through_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("migration.toml");
        let config = sample();
        config.save(&path).unwrap();

        let loaded = MigrationConfig::load(&path).unwrap();
        assert_eq!(loaded.source, config.source);
        assert_eq!(loaded.source_site_url, config.source_site_url);
        assert_eq!(loaded.concurrency, 5);
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let toml = r#"
            source_site_url = "https://legacy.example"
            target_site_url = "https://new.example"
            assets_base_url = "https://new.example/assets"
            assets_dir = "./assets"

            [source]
            type = "wxr_export"
            path = "./export.xml"
        "#;
        let config: MigrationConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.poll_interval_ms, 50);
        assert!(!config.continue_on_error);
        assert_eq!(
            config.source,
            SourceSpec::WxrExport {
                path: PathBuf::from("./export.xml")
            }
        );
    }

    #[test]
    fn test_validate_rejects_bad_urls_and_zero_concurrency() {
        let mut config = sample();
        config.source_site_url = "not a url".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = sample();
        config.concurrency = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_assets_base_gets_trailing_slash() {
        let config = sample();
        let base = config.assets_base().unwrap();
        assert_eq!(base.as_str(), "https://new.example/assets/");
        assert_eq!(
            base.join("abc.png").unwrap().as_str(),
            "https://new.example/assets/abc.png"
        );
    }
}
