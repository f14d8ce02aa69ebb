//! Volumes and the tag-aware volume index.

use std::collections::HashMap;

use indexmap::IndexMap;
use skiff_proto::{VolumeId, WriteMode};

use crate::error::{LocationError, Result};

/// Longest accepted tag.
pub const MAX_TAG_LEN: usize = 64;

/// A persistent volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    /// Volume id.
    pub uuid: VolumeId,
    /// Globally unique tag, if any.
    pub tag: Option<String>,
    /// Write mode.
    pub mode: WriteMode,
}

impl Volume {
    /// Display name: the tag when present, the uuid otherwise.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.tag.clone().unwrap_or_else(|| self.uuid.to_string())
    }
}

/// Check a tag is usable.
pub fn validate_tag(tag: &str) -> Result<()> {
    let reason = if tag.is_empty() {
        "tag is empty"
    } else if tag.len() > MAX_TAG_LEN {
        "tag is longer than 64 characters"
    } else if tag.chars().any(char::is_whitespace) {
        "tag contains whitespace"
    } else if tag.contains(':') || tag.contains('/') {
        "tag contains ':' or '/'"
    } else {
        return Ok(());
    };
    Err(LocationError::InvalidTag {
        tag: tag.to_string(),
        reason,
    })
}

/// Volumes of a location, by uuid and by tag.
#[derive(Debug, Default)]
pub struct VolumeIndex {
    by_id: IndexMap<VolumeId, Volume>,
    by_tag: HashMap<String, VolumeId>,
}

impl VolumeIndex {
    /// Empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a volume. Fails if its tag is already taken.
    pub fn insert(&mut self, volume: Volume) -> Result<()> {
        if let Some(tag) = &volume.tag {
            match self.by_tag.get(tag) {
                Some(owner) if *owner != volume.uuid => {
                    return Err(LocationError::TagInUse(tag.clone()));
                }
                _ => {
                    self.by_tag.insert(tag.clone(), volume.uuid);
                }
            }
        }
        if let Some(old) = self.by_id.insert(volume.uuid, volume.clone()) {
            if let Some(old_tag) = old.tag {
                if volume.tag.as_ref() != Some(&old_tag) {
                    self.by_tag.remove(&old_tag);
                }
            }
        }
        Ok(())
    }

    /// Remove a volume, returning it.
    pub fn remove(&mut self, uuid: &VolumeId) -> Option<Volume> {
        let volume = self.by_id.shift_remove(uuid)?;
        if let Some(tag) = &volume.tag {
            self.by_tag.remove(tag);
        }
        Some(volume)
    }

    /// Look a volume up by uuid, then by tag.
    pub fn get(&self, key: &str) -> Result<&Volume> {
        if let Ok(uuid) = VolumeId::parse(key) {
            if let Some(volume) = self.by_id.get(&uuid) {
                return Ok(volume);
            }
        }
        self.by_tag
            .get(key)
            .and_then(|uuid| self.by_id.get(uuid))
            .ok_or_else(|| LocationError::VolumeNotFound(key.to_string()))
    }

    /// Whether a tag is taken.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.by_tag.contains_key(tag)
    }

    /// Whether a uuid is present.
    #[must_use]
    pub fn contains(&self, uuid: &VolumeId) -> bool {
        self.by_id.contains_key(uuid)
    }

    /// All volumes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Volume> {
        self.by_id.values()
    }

    /// Number of volumes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether there are no volumes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    fn volume(tag: Option<&str>) -> Volume {
        Volume {
            uuid: VolumeId::new(),
            tag: tag.map(String::from),
            mode: WriteMode::Async,
        }
    }

    #[test_case("data" ; "plain")]
    #[test_case("my-volume_2" ; "punctuation")]
    fn test_valid_tags(tag: &str) {
        assert!(validate_tag(tag).is_ok());
    }

    #[test_case("", "empty" ; "empty")]
    #[test_case("has space", "whitespace" ; "space")]
    #[test_case("a:b", "':'" ; "colon")]
    #[test_case("a/b", "'/'" ; "slash")]
    fn test_invalid_tags(tag: &str, fragment: &str) {
        let err = validate_tag(tag).unwrap_err();
        assert!(err.to_string().contains(fragment), "{err}");
    }

    #[test]
    fn test_tag_too_long() {
        assert!(validate_tag(&"x".repeat(MAX_TAG_LEN)).is_ok());
        assert!(validate_tag(&"x".repeat(MAX_TAG_LEN + 1)).is_err());
    }

    #[test]
    fn test_get_by_uuid_and_tag() {
        let mut index = VolumeIndex::new();
        let tagged = volume(Some("db"));
        let bare = volume(None);
        index.insert(tagged.clone()).unwrap();
        index.insert(bare.clone()).unwrap();

        assert_eq!(index.get("db").unwrap(), &tagged);
        assert_eq!(index.get(&tagged.uuid.to_string()).unwrap(), &tagged);
        assert_eq!(index.get(&bare.uuid.to_string()).unwrap(), &bare);
        assert!(matches!(
            index.get("nothing"),
            Err(LocationError::VolumeNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_tag_rejected() {
        let mut index = VolumeIndex::new();
        index.insert(volume(Some("db"))).unwrap();
        let err = index.insert(volume(Some("db"))).unwrap_err();
        assert!(matches!(err, LocationError::TagInUse(ref t) if t == "db"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_remove_frees_tag() {
        let mut index = VolumeIndex::new();
        let v = volume(Some("db"));
        index.insert(v.clone()).unwrap();
        assert_eq!(index.remove(&v.uuid), Some(v.clone()));
        assert!(!index.has_tag("db"));
        assert!(index.is_empty());
        index.insert(volume(Some("db"))).unwrap();
    }

    #[derive(Debug, Clone)]
    enum Op {
        Create(Option<u8>),
        Destroy(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            proptest::option::of(0u8..4).prop_map(Op::Create),
            any::<usize>().prop_map(Op::Destroy),
        ]
    }

    proptest! {
        #[test]
        fn prop_index_never_holds_destroyed_or_duplicate_tags(ops in proptest::collection::vec(op(), 0..40)) {
            let mut index = VolumeIndex::new();
            let mut destroyed = Vec::new();

            for op in ops {
                match op {
                    Op::Create(tag) => {
                        let tag = tag.map(|t| format!("tag{t}"));
                        let _ = index.insert(volume(tag.as_deref()));
                    }
                    Op::Destroy(i) => {
                        if !index.is_empty() {
                            let uuid = index.iter().nth(i % index.len()).map(|v| v.uuid);
                            if let Some(uuid) = uuid {
                                index.remove(&uuid);
                                destroyed.push(uuid);
                            }
                        }
                    }
                }

                for uuid in &destroyed {
                    prop_assert!(!index.contains(uuid));
                }
                let mut tags: Vec<_> = index.iter().filter_map(|v| v.tag.clone()).collect();
                let total = tags.len();
                tags.sort();
                tags.dedup();
                prop_assert_eq!(tags.len(), total);
            }
        }
    }
}
