//! External collaborators of the model builder
//!
//! The version/image catalog is an explicit configuration value threaded
//! into the builder (process-start lifecycle, read-only thereafter), never
//! read from the process environment at use time. The certificate authority
//! is an injected capability; its internals are out of scope.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

// =============================================================================
// Version Catalog
// =============================================================================

/// Version-to-image lookup table for quorum nodes
#[derive(Debug, Clone)]
pub struct VersionCatalog {
    /// Version deployed when the spec does not request one
    default_version: String,
    /// Explicit version-to-image mapping
    image_map: BTreeMap<String, String>,
    /// Platform default image repository; the final fallback derives
    /// `repo:version` from it
    default_image_repo: Option<String>,
}

impl VersionCatalog {
    pub fn new(
        default_version: impl Into<String>,
        image_map: BTreeMap<String, String>,
        default_image_repo: Option<String>,
    ) -> Self {
        VersionCatalog {
            default_version: default_version.into(),
            image_map,
            default_image_repo,
        }
    }

    /// The version used when the spec does not request one
    pub fn default_version(&self) -> &str {
        &self.default_version
    }

    /// Resolve the image for the given request. Three-tier fallback, first
    /// match wins: explicit image from the spec, then the version-to-image
    /// map, then an image derived from the platform default repository and
    /// the requested version.
    pub fn resolve_image(
        &self,
        explicit: Option<&str>,
        requested_version: Option<&str>,
    ) -> Result<String> {
        if let Some(image) = explicit {
            return Ok(image.to_string());
        }

        let version = requested_version.unwrap_or(&self.default_version);

        if let Some(image) = self.image_map.get(version) {
            return Ok(image.clone());
        }

        if let Some(repo) = &self.default_image_repo {
            return Ok(format!("{repo}:{version}"));
        }

        Err(Error::NoImageForVersion {
            version: version.to_string(),
        })
    }
}

// =============================================================================
// Certificate Authority
// =============================================================================

/// A node certificate with its private key, already encoded for inclusion
/// in a Secret.
#[derive(Debug, Clone)]
pub struct CertAndKey {
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

/// Signing capability for quorum node certificates. Issuance internals are
/// external to this operator; failures are I/O-kind and callers skip the
/// secret update for the pass rather than failing it.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Issue or renew one keypair per node, keyed by pod name.
    async fn issue_or_renew(
        &self,
        namespace: &str,
        node_names: &[String],
    ) -> Result<BTreeMap<String, CertAndKey>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> VersionCatalog {
        let mut map = BTreeMap::new();
        map.insert("2.4.0".to_string(), "registry.io/quorum:2.4.0-r1".to_string());
        VersionCatalog::new("2.4.0", map, Some("registry.io/platform".to_string()))
    }

    #[test]
    fn test_explicit_image_wins() {
        let image = catalog()
            .resolve_image(Some("custom/image:1"), Some("2.4.0"))
            .unwrap();
        assert_eq!(image, "custom/image:1");
    }

    #[test]
    fn test_map_lookup() {
        let image = catalog().resolve_image(None, Some("2.4.0")).unwrap();
        assert_eq!(image, "registry.io/quorum:2.4.0-r1");
    }

    #[test]
    fn test_derived_fallback() {
        let image = catalog().resolve_image(None, Some("9.9.9")).unwrap();
        assert_eq!(image, "registry.io/platform:9.9.9");
    }

    #[test]
    fn test_default_version_used_when_unset() {
        let image = catalog().resolve_image(None, None).unwrap();
        assert_eq!(image, "registry.io/quorum:2.4.0-r1");
    }

    #[test]
    fn test_no_image_available() {
        let catalog = VersionCatalog::new("2.4.0", BTreeMap::new(), None);
        let err = catalog.resolve_image(None, Some("2.4.0")).unwrap_err();
        assert!(matches!(err, Error::NoImageForVersion { .. }));
    }
}
