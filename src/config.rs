//! Operator configuration
//!
//! All tunables are explicit values resolved once at process start and
//! threaded into the components that need them; nothing reads the process
//! environment after startup.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Configuration for the operator
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Whether the platform supports network policy peers combining
    /// namespace and pod selectors. This is injected, not detected: the
    /// fallback it gates is a capability workaround, not a security choice.
    pub peer_namespace_selectors_supported: bool,

    /// Bound on any single API operation, including the delete watch
    pub operation_timeout: Duration,

    /// Size of the worker pool capping in-flight blocking API calls,
    /// independent of how many topology instances exist
    pub worker_pool_size: usize,

    /// Version deployed when the spec does not request one
    pub default_version: String,

    /// Quorum version-to-image mapping
    pub image_map: BTreeMap<String, String>,

    /// Platform default image repository for derived image fallback
    pub default_image_repo: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            peer_namespace_selectors_supported: true,
            operation_timeout: Duration::from_secs(300),
            worker_pool_size: 16,
            default_version: "2.4.0".to_string(),
            image_map: BTreeMap::new(),
            default_image_repo: None,
        }
    }
}

/// On-disk configuration file (YAML), overriding the defaults
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    peer_namespace_selectors_supported: Option<bool>,
    operation_timeout_secs: Option<u64>,
    worker_pool_size: Option<usize>,
    default_version: Option<String>,
    #[serde(default)]
    image_map: BTreeMap<String, String>,
    default_image_repo: Option<String>,
}

impl OperatorConfig {
    /// Load overrides from a YAML file on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let file: ConfigFile = serde_yaml::from_str(&raw)?;
        let defaults = OperatorConfig::default();

        Ok(OperatorConfig {
            peer_namespace_selectors_supported: file
                .peer_namespace_selectors_supported
                .unwrap_or(defaults.peer_namespace_selectors_supported),
            operation_timeout: file
                .operation_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.operation_timeout),
            worker_pool_size: file.worker_pool_size.unwrap_or(defaults.worker_pool_size),
            default_version: file.default_version.unwrap_or(defaults.default_version),
            image_map: file.image_map,
            default_image_repo: file.default_image_repo,
        })
    }

    /// Parse an image map given as "version=image,version=image"
    pub fn parse_image_map(raw: &str) -> Result<BTreeMap<String, String>> {
        let mut map = BTreeMap::new();
        for entry in raw.split(',').filter(|e| !e.trim().is_empty()) {
            let (version, image) = entry.trim().split_once('=').ok_or_else(|| {
                Error::Configuration(format!("image map entry {entry:?} is not version=image"))
            })?;
            map.insert(version.trim().to_string(), image.trim().to_string());
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_image_map() {
        let map =
            OperatorConfig::parse_image_map("2.3.0=repo/q:2.3.0, 2.4.0=repo/q:2.4.0").unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["2.4.0"], "repo/q:2.4.0");

        assert!(OperatorConfig::parse_image_map("garbage").is_err());
        assert!(OperatorConfig::parse_image_map("").unwrap().is_empty());
    }

    #[test]
    fn test_config_file_overrides() {
        let yaml = r#"
            workerPoolSize: 4
            defaultVersion: "3.0.0"
            imageMap:
              "3.0.0": repo/q:3.0.0
        "#;
        let file: ConfigFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(file.worker_pool_size, Some(4));
        assert_eq!(file.image_map["3.0.0"], "repo/q:3.0.0");
    }
}
