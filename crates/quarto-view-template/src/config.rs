/*
 * config.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Engine configuration.
//!
//! Keys use kebab-case in TOML, e.g.:
//!
//! ```toml
//! template-root = "templates"
//! cache-root = ".cache/templates"
//! cache-lifetime = 600
//! mode = "development"
//! ```

use crate::error::{TemplateError, TemplateResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Whether undefined references abort rendering or degrade to empty output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    /// Undefined references are errors.
    Development,
    /// Undefined references are logged and rendered as empty.
    #[default]
    Production,
}

/// Settings for an [`crate::Engine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct EngineConfig {
    /// Directory templates are resolved against.
    pub template_root: PathBuf,

    /// Directory compiled templates are stored in. Caching is skipped when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_root: Option<PathBuf>,

    pub cache_enabled: bool,

    /// Maximum age of a cache entry, in seconds.
    pub cache_lifetime: u64,

    pub mode: RuntimeMode,

    /// Extension appended to template names that have none.
    pub extension: String,

    /// Limit on `extends`/`include`/`block` nesting.
    pub max_depth: usize,

    /// Limit on iterations of a single `while` loop.
    pub max_loop_iterations: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            template_root: PathBuf::from("templates"),
            cache_root: None,
            cache_enabled: true,
            cache_lifetime: 3600,
            mode: RuntimeMode::Production,
            extension: "html".to_string(),
            max_depth: 50,
            max_loop_iterations: 10_000,
        }
    }
}

impl EngineConfig {
    /// Configuration rooted at `template_root`, everything else defaulted.
    pub fn new(template_root: impl Into<PathBuf>) -> Self {
        Self {
            template_root: template_root.into(),
            ..Self::default()
        }
    }

    pub fn with_cache_root(mut self, cache_root: impl Into<PathBuf>) -> Self {
        self.cache_root = Some(cache_root.into());
        self
    }

    pub fn with_mode(mut self, mode: RuntimeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn from_toml_str(source: &str) -> TemplateResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| TemplateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file. Relative `template-root` and `cache-root` values are
    /// resolved against the file's directory.
    pub fn from_file(path: &Path) -> TemplateResult<Self> {
        let source = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&source)?;
        if let Some(dir) = path.parent() {
            if config.template_root.is_relative() {
                config.template_root = dir.join(&config.template_root);
            }
            if let Some(cache_root) = config.cache_root.as_mut().filter(|p| p.is_relative()) {
                *cache_root = dir.join(&*cache_root);
            }
        }
        Ok(config)
    }

    pub fn cache_lifetime(&self) -> Duration {
        Duration::from_secs(self.cache_lifetime)
    }

    fn validate(&self) -> TemplateResult<()> {
        if self.max_depth == 0 {
            return Err(TemplateError::Config("max-depth must be at least 1".to_string()));
        }
        if self.max_loop_iterations == 0 {
            return Err(TemplateError::Config(
                "max-loop-iterations must be at least 1".to_string(),
            ));
        }
        if self.extension.starts_with('.') {
            return Err(TemplateError::Config(format!(
                "extension should not start with '.': {}",
                self.extension
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_toml_uses_defaults() {
        assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_kebab_case_keys() {
        let config = EngineConfig::from_toml_str(
            r#"
            template-root = "views"
            cache-root = "cache"
            cache-enabled = false
            cache-lifetime = 60
            mode = "development"
            extension = "twig"
            max-depth = 10
            max-loop-iterations = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.template_root, PathBuf::from("views"));
        assert_eq!(config.cache_root, Some(PathBuf::from("cache")));
        assert!(!config.cache_enabled);
        assert_eq!(config.cache_lifetime(), Duration::from_secs(60));
        assert_eq!(config.mode, RuntimeMode::Development);
        assert_eq!(config.extension, "twig");
        assert_eq!(config.max_depth, 10);
        assert_eq!(config.max_loop_iterations, 500);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            EngineConfig::from_toml_str("mode = \"staging\""),
            Err(TemplateError::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("max-depth = 0"),
            Err(TemplateError::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("extension = \".html\""),
            Err(TemplateError::Config(_))
        ));
    }

    #[test]
    fn test_from_file_resolves_relative_roots() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "template-root = \"views\"\ncache-root = \"/var/cache/views\"\n").unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.template_root, dir.path().join("views"));
        assert_eq!(config.cache_root, Some(PathBuf::from("/var/cache/views")));
    }
}
