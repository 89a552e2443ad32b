//! Storage change detection
//!
//! Protects existing persistent data from destructive spec edits. The diff
//! between the storage declaration in effect and the newly requested one is
//! computed field by field and each difference is classified as allowed or
//! disallowed under the no-data-loss policy:
//!
//! - changing the storage type is always disallowed
//! - for persistent claims, toggling `deleteClaim` and increasing the size
//!   are allowed; decreasing the size or changing the class are not
//! - for JBOD, the same rules apply per volume id; adding or removing
//!   volume ids is disallowed in this comparison
//!
//! A non-empty diff is not an error: the caller keeps the old declaration
//! and warns about the rejected changes.

use std::collections::BTreeMap;

use crate::crd::storage::{parse_capacity, PersistentClaimStorage, Storage};

// =============================================================================
// Diff Entries
// =============================================================================

/// One field-level difference between two storage declarations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageDiffEntry {
    /// Path of the differing field, e.g. "/volumes/1/size"
    pub field: String,
    /// Value in effect
    pub old: String,
    /// Requested value
    pub new: String,
    /// Whether the change is permitted by the no-data-loss policy
    pub allowed: bool,
}

impl std::fmt::Display for StorageDiffEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} -> {}", self.field, self.old, self.new)
    }
}

// =============================================================================
// StorageDiff
// =============================================================================

/// Computed set of differences between two storage declarations
#[derive(Debug, Clone)]
pub struct StorageDiff {
    entries: Vec<StorageDiffEntry>,
}

impl StorageDiff {
    /// Diff the declaration in effect against the newly requested one
    pub fn new(old: &Storage, new: &Storage) -> Self {
        let mut entries = Vec::new();

        match (old, new) {
            (Storage::Ephemeral(_), Storage::Ephemeral(_)) => {
                // No persistent data at stake; every change is allowed
            }
            (Storage::PersistentClaim(o), Storage::PersistentClaim(n)) => {
                diff_claim("", o, n, &mut entries);
            }
            (Storage::Jbod(o), Storage::Jbod(n)) => {
                // Volumes are keyed by id. A side with missing or duplicate
                // ids cannot be compared volume by volume, so the whole diff
                // is disallowed rather than collapsing volumes into one key.
                let old_by_id = claims_by_id(&o.volumes);
                let new_by_id = claims_by_id(&n.volumes);
                if old_by_id.len() != o.volumes.len() || new_by_id.len() != n.volumes.len() {
                    entries.push(StorageDiffEntry {
                        field: "/volumes".into(),
                        old: format!("{} volumes", o.volumes.len()),
                        new: format!("{} volumes", n.volumes.len()),
                        allowed: false,
                    });
                }

                for (id, old_vol) in &old_by_id {
                    match new_by_id.get(id) {
                        Some(new_vol) => {
                            diff_claim(&format!("/volumes/{id}"), old_vol, new_vol, &mut entries);
                        }
                        None => entries.push(StorageDiffEntry {
                            field: format!("/volumes/{id}"),
                            old: "present".into(),
                            new: "absent".into(),
                            allowed: false,
                        }),
                    }
                }
                for id in new_by_id.keys() {
                    if !old_by_id.contains_key(id) {
                        entries.push(StorageDiffEntry {
                            field: format!("/volumes/{id}"),
                            old: "absent".into(),
                            new: "present".into(),
                            allowed: false,
                        });
                    }
                }
            }
            _ => entries.push(StorageDiffEntry {
                field: "/type".into(),
                old: old.type_name().into(),
                new: new.type_name().into(),
                allowed: false,
            }),
        }

        StorageDiff { entries }
    }

    /// True when the diff contains no disallowed differences. Allowed
    /// differences (deleteClaim toggles, size increases) do not count.
    pub fn is_empty(&self) -> bool {
        !self.entries.iter().any(|e| !e.allowed)
    }

    /// All field-level differences, allowed and disallowed
    pub fn entries(&self) -> &[StorageDiffEntry] {
        &self.entries
    }

    /// The disallowed differences, for diagnostics
    pub fn disallowed(&self) -> impl Iterator<Item = &StorageDiffEntry> {
        self.entries.iter().filter(|e| !e.allowed)
    }
}

fn claims_by_id(volumes: &[PersistentClaimStorage]) -> BTreeMap<u32, &PersistentClaimStorage> {
    volumes
        .iter()
        .filter_map(|v| v.id.map(|id| (id, v)))
        .collect()
}

fn diff_claim(
    prefix: &str,
    old: &PersistentClaimStorage,
    new: &PersistentClaimStorage,
    entries: &mut Vec<StorageDiffEntry>,
) {
    if old.class != new.class {
        entries.push(StorageDiffEntry {
            field: format!("{prefix}/class"),
            old: old.class.clone().unwrap_or_default(),
            new: new.class.clone().unwrap_or_default(),
            allowed: false,
        });
    }

    if old.size != new.size {
        entries.push(StorageDiffEntry {
            field: format!("{prefix}/size"),
            old: old.size.clone().unwrap_or_default(),
            new: new.size.clone().unwrap_or_default(),
            allowed: size_increased(old.size.as_deref(), new.size.as_deref()),
        });
    }

    if old.delete_claim != new.delete_claim {
        entries.push(StorageDiffEntry {
            field: format!("{prefix}/deleteClaim"),
            old: old.delete_claim.to_string(),
            new: new.delete_claim.to_string(),
            allowed: true,
        });
    }
}

/// A size change is allowed only when it is a strict increase of two
/// parseable quantities. Unparseable or removed sizes are treated as
/// disallowed rather than guessed at.
fn size_increased(old: Option<&str>, new: Option<&str>) -> bool {
    match (old, new) {
        (Some(old), Some(new)) => match (parse_capacity(old), parse_capacity(new)) {
            (Ok(old_bytes), Ok(new_bytes)) => new_bytes > old_bytes,
            _ => false,
        },
        _ => false,
    }
}
