//! Cross-environment id mapping through a shared natural key
//!
//! Users are matched by email, groups by name, dashboards and data models
//! by title. A key that appears twice on the target resolves to its first
//! entry.

use crate::utils::ValueExt;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// `key -> id` index over one environment's listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameIndex {
    ids: BTreeMap<String, String>,
}

impl NameIndex {
    /// Index entries by `key_field`, keeping the first id seen per key.
    /// Entries missing either field are ignored.
    pub fn build(entries: &[Value], key_field: &str, id_field: &str) -> Self {
        let mut ids = BTreeMap::new();
        for entry in entries {
            let (Some(key), Some(id)) = (entry.str_field(key_field), entry.str_field(id_field)) else {
                continue;
            };
            if let Some(existing) = ids.get(key) {
                if existing != id {
                    warn!(key, kept = %existing, ignored = id, "duplicate key on target, using first match");
                }
                continue;
            }
            ids.insert(key.to_string(), id.to_string());
        }
        Self { ids }
    }

    /// Id for a key
    pub fn id(&self, key: &str) -> Option<&str> {
        self.ids.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// A source entity with no counterpart on the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unmapped {
    pub source_id: String,
    pub key: String,
}

/// `source id -> target id`, composed through the shared key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdMapping {
    mapped: BTreeMap<String, String>,
    keys: BTreeMap<String, String>,
    unmapped: Vec<Unmapped>,
}

impl IdMapping {
    /// Map every source entry onto the target index.
    ///
    /// Source entries keep their own id as the lookup handle; each one ends
    /// up either mapped or in [`IdMapping::unmapped`]. An entry missing its
    /// key or id is unmapped with the missing part left empty.
    pub fn compose(source: &[Value], target: &NameIndex, key_field: &str, id_field: &str) -> Self {
        let mut mapping = Self::default();
        for entry in source {
            let (Some(key), Some(source_id)) = (entry.str_field(key_field), entry.str_field(id_field)) else {
                let unmapped = Unmapped {
                    source_id: entry.string_or(id_field, ""),
                    key: entry.string_or(key_field, ""),
                };
                warn!(
                    source_id = %unmapped.source_id,
                    key = %unmapped.key,
                    "source entry lacks '{}' or '{}', cannot map it",
                    key_field,
                    id_field
                );
                mapping.unmapped.push(unmapped);
                continue;
            };
            if mapping.keys.contains_key(source_id) {
                continue;
            }
            mapping.keys.insert(source_id.to_string(), key.to_string());
            match target.id(key) {
                Some(target_id) => {
                    mapping.mapped.insert(source_id.to_string(), target_id.to_string());
                }
                None => mapping.unmapped.push(Unmapped {
                    source_id: source_id.to_string(),
                    key: key.to_string(),
                }),
            }
        }
        mapping
    }

    /// Build a mapping straight from two listings
    pub fn between(source: &[Value], target: &[Value], key_field: &str, id_field: &str) -> Self {
        Self::compose(source, &NameIndex::build(target, key_field, id_field), key_field, id_field)
    }

    /// Target id of a source id
    pub fn target_id(&self, source_id: &str) -> Option<&str> {
        self.mapped.get(source_id).map(String::as_str)
    }

    /// Natural key of a source id
    pub fn key(&self, source_id: &str) -> Option<&str> {
        self.keys.get(source_id).map(String::as_str)
    }

    /// Source entries without a target match
    pub fn unmapped(&self) -> &[Unmapped] {
        &self.unmapped
    }

    pub fn mapped_len(&self) -> usize {
        self.mapped.len()
    }
}
