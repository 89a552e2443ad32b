//! Storage declarations for quorum nodes
//!
//! The storage declaration is polymorphic over three variants: ephemeral
//! (emptyDir), a single persistent volume claim, or a JBOD set of claims.
//! The declaration in effect is recorded as JSON in an annotation on the
//! StatefulSet so that later passes can recover it and guard against
//! destructive edits.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Annotation on the StatefulSet carrying the JSON-encoded storage
/// declaration currently in effect.
pub const STORAGE_ANNOTATION: &str = "streamhouse.io/storage";

// =============================================================================
// Storage Declaration
// =============================================================================

/// Storage configuration for the quorum nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Storage {
    /// emptyDir-backed storage, lost on pod restart
    Ephemeral(EphemeralStorage),
    /// A single persistent volume claim per node
    PersistentClaim(PersistentClaimStorage),
    /// Multiple persistent volume claims per node, addressed by volume id
    Jbod(JbodStorage),
}

impl Default for Storage {
    fn default() -> Self {
        Storage::Ephemeral(EphemeralStorage::default())
    }
}

impl Storage {
    /// Human-readable variant name, used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Storage::Ephemeral(_) => "ephemeral",
            Storage::PersistentClaim(_) => "persistent-claim",
            Storage::Jbod(_) => "jbod",
        }
    }

    /// Encode this declaration for the StatefulSet annotation
    pub fn to_annotation(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a declaration recovered from the StatefulSet annotation
    pub fn from_annotation(value: &str) -> Result<Self> {
        serde_json::from_str(value).map_err(|e| Error::StorageAnnotationParse(e.to_string()))
    }
}

/// Ephemeral (emptyDir) storage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EphemeralStorage {
    /// Maximum local storage usable by the emptyDir, e.g. "10Gi"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_limit: Option<String>,
}

/// Persistent volume claim storage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PersistentClaimStorage {
    /// Volume id, required when used inside a JBOD declaration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,

    /// Requested capacity, e.g. "100Gi"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,

    /// Storage class to provision from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,

    /// Whether the claim is deleted when the cluster is removed
    #[serde(default)]
    pub delete_claim: bool,
}

/// JBOD storage: a set of persistent claims addressed by volume id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JbodStorage {
    /// Volumes in this JBOD set; each must carry a distinct id
    pub volumes: Vec<PersistentClaimStorage>,
}

// =============================================================================
// Capacity Parsing
// =============================================================================

/// Parse a Kubernetes-style quantity ("100Gi", "512Mi", "1T", "1073741824")
/// into bytes. Needed to distinguish size increases from decreases.
pub fn parse_capacity(value: &str) -> Result<u64> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::CapacityParse("empty capacity".into()));
    }

    let split = value
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(value.len());
    let (digits, suffix) = value.split_at(split);

    let base: f64 = digits
        .parse()
        .map_err(|_| Error::CapacityParse(format!("invalid number in {value:?}")))?;

    let multiplier: u64 = match suffix {
        "" => 1,
        "k" | "K" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        "P" => 1_000_000_000_000_000,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        "Pi" => 1 << 50,
        _ => {
            return Err(Error::CapacityParse(format!(
                "unknown capacity suffix {suffix:?} in {value:?}"
            )))
        }
    };

    Ok((base * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_capacity() {
        assert_eq!(parse_capacity("100Gi").unwrap(), 100 * (1 << 30));
        assert_eq!(parse_capacity("512Mi").unwrap(), 512 * (1 << 20));
        assert_eq!(parse_capacity("1T").unwrap(), 1_000_000_000_000);
        assert_eq!(parse_capacity("1024").unwrap(), 1024);
        assert_eq!(parse_capacity("1.5Gi").unwrap(), 3 * (1 << 29));
        assert!(parse_capacity("10Xi").is_err());
        assert!(parse_capacity("").is_err());
    }

    #[test]
    fn test_storage_annotation_round_trip() {
        let storage = Storage::PersistentClaim(PersistentClaimStorage {
            id: None,
            size: Some("100Gi".into()),
            class: Some("fast".into()),
            delete_claim: true,
        });

        let encoded = storage.to_annotation().unwrap();
        let decoded = Storage::from_annotation(&encoded).unwrap();
        assert_eq!(storage, decoded);
    }

    #[test]
    fn test_storage_tagged_encoding() {
        let storage = Storage::Ephemeral(EphemeralStorage::default());
        let json = storage.to_annotation().unwrap();
        assert!(json.contains(r#""type":"ephemeral""#));

        let decoded = Storage::from_annotation(r#"{"type":"jbod","volumes":[]}"#).unwrap();
        assert_eq!(decoded.type_name(), "jbod");

        assert!(Storage::from_annotation("not json").is_err());
    }
}
