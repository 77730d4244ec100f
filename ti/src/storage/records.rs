//! Persisted record envelopes

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{Task, ProjectData};

/// Version stamped on every record; a mismatch on load evicts the record
pub const CACHE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Layout version of the record envelope
pub const SCHEMA_VERSION: u32 = 1;

/// Key namespaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Raw,
    Augmented,
    Project,
    Consolidated,
    Meta,
}

impl Namespace {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Raw => "tasks.raw:",
            Self::Augmented => "tasks.augmented:",
            Self::Project => "project.data:",
            Self::Consolidated => "consolidated:",
            Self::Meta => "meta:",
        }
    }

    pub fn key(self, id: &str) -> String {
        format!("{}{}", self.prefix(), id)
    }

    pub fn all() -> [Namespace; 5] {
        [Self::Raw, Self::Augmented, Self::Project, Self::Consolidated, Self::Meta]
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Raw => "raw",
            Self::Augmented => "augmented",
            Self::Project => "project",
            Self::Consolidated => "consolidated",
            Self::Meta => "meta",
        };
        write!(f, "{}", name)
    }
}

/// SHA-256 of text, lowercase hex
pub fn content_hash(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

/// Identity of the inputs an augmented result was derived from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AugmentedFingerprint {
    /// Content hash of the raw parse the tasks came from
    pub raw_hash: String,
    /// Hash of project data, frontmatter and augmentor settings
    pub inputs_hash: String,
}

/// Envelope around every stored value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord<T> {
    pub version: String,
    pub schema: u32,
    /// Unix milliseconds at write time
    pub time: i64,
    /// Content hash (raw) or data hash (project)
    #[serde(default)]
    pub hash: Option<String>,
    /// Source mtime (raw only)
    #[serde(default)]
    pub mtime: Option<i64>,
    /// Derivation fingerprint (augmented only)
    #[serde(default)]
    pub fingerprint: Option<AugmentedFingerprint>,
    pub data: T,
}

impl<T> CacheRecord<T> {
    pub fn new(data: T) -> Self {
        Self {
            version: CACHE_VERSION.to_string(),
            schema: SCHEMA_VERSION,
            time: chrono::Utc::now().timestamp_millis(),
            hash: None,
            mtime: None,
            fingerprint: None,
            data,
        }
    }

    /// Written by this build's record layout
    pub fn is_current(&self) -> bool {
        self.version == CACHE_VERSION && self.schema == SCHEMA_VERSION
    }
}

pub type RawRecord = CacheRecord<Vec<Task>>;
pub type AugmentedRecord = CacheRecord<Vec<Task>>;
pub type ProjectRecord = CacheRecord<ProjectData>;

/// A raw record is valid only for the exact content and mtime it was parsed from
///
/// The mtime is checked first because it is cheap; the content hash guards
/// against coarse mtime granularity and clock skew hiding a real edit.
pub fn is_raw_valid(record: &RawRecord, content: &str, mtime: i64) -> bool {
    if !record.is_current() {
        return false;
    }
    if record.mtime != Some(mtime) {
        return false;
    }
    record.hash.as_deref() == Some(content_hash(content).as_str())
}

/// An augmented record is valid only for the raw hash and inputs it was derived from
pub fn is_augmented_valid(record: &AugmentedRecord, expected: &AugmentedFingerprint) -> bool {
    record.is_current() && record.fingerprint.as_ref() == Some(expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn raw(content: &str, mtime: i64) -> RawRecord {
        let mut record = CacheRecord::new(Vec::new());
        record.hash = Some(content_hash(content));
        record.mtime = Some(mtime);
        record
    }

    #[test]
    fn test_namespace_keys() {
        assert_eq!(Namespace::Raw.key("a.md"), "tasks.raw:a.md");
        assert_eq!(Namespace::Meta.key("filter:suppressedInline"), "meta:filter:suppressedInline");
        assert_eq!(Namespace::Project.to_string(), "project");
    }

    #[test]
    fn test_raw_validity_requires_mtime_and_content() {
        let record = raw("- [ ] a", 100);
        assert!(is_raw_valid(&record, "- [ ] a", 100));
        assert!(!is_raw_valid(&record, "- [ ] a", 101));
        assert!(!is_raw_valid(&record, "- [ ] b", 100));
    }

    #[test]
    fn test_raw_without_mtime_is_invalid() {
        let mut record = raw("- [ ] a", 100);
        record.mtime = None;
        assert!(!is_raw_valid(&record, "- [ ] a", 100));
    }

    #[test]
    fn test_stale_version_is_invalid() {
        let mut record = raw("x", 1);
        record.version = "0.0.0-old".to_string();
        assert!(!is_raw_valid(&record, "x", 1));
    }

    #[test]
    fn test_augmented_validity() {
        let fp = AugmentedFingerprint {
            raw_hash: "r".to_string(),
            inputs_hash: "i".to_string(),
        };
        let mut record: AugmentedRecord = CacheRecord::new(Vec::new());
        assert!(!is_augmented_valid(&record, &fp));
        record.fingerprint = Some(fp.clone());
        assert!(is_augmented_valid(&record, &fp));
        let other = AugmentedFingerprint {
            inputs_hash: "changed".to_string(),
            ..fp
        };
        assert!(!is_augmented_valid(&record, &other));
    }

    proptest! {
        #[test]
        fn prop_any_content_change_invalidates(a in ".{0,64}", b in ".{0,64}", mtime in 0i64..1_000_000) {
            let record = raw(&a, mtime);
            prop_assert!(is_raw_valid(&record, &a, mtime));
            prop_assert_eq!(is_raw_valid(&record, &b, mtime), a == b);
        }
    }
}
