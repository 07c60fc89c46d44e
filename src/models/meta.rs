//! Represents a persisted row of the `meta` table.

use super::{Fingerprint, ObjectDescriptor, StaticAttributes};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A stored metadata row.
///
/// Rows are created once per distinct fingerprint and are never updated
/// or deleted by the pipeline.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct MetaRecord {
    /// Store-assigned row id.
    pub id: i64,

    /// When the row was built, a rough completion order of units.
    pub created: DateTime<Utc>,

    /// Hex digest bytes (32 bytes).
    pub fingerprint: Vec<u8>,

    /// Remote object key.
    pub path: String,

    /// Size in bytes as reported by the listing, saturated at `i64::MAX`.
    pub size: i64,

    /// Lowercase file extension, possibly empty.
    pub extension: String,

    pub architecture: Option<String>,
    pub imports: Option<i64>,
    pub exports: Option<i64>,
}

/// A row waiting for the dedup check. Carries everything except the id.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MetaCandidate {
    pub created: DateTime<Utc>,
    pub fingerprint: Fingerprint,
    pub path: String,
    pub size: i64,
    pub extension: String,
    pub architecture: Option<String>,
    pub imports: Option<i64>,
    pub exports: Option<i64>,
}

impl MetaCandidate {
    pub fn new(
        descriptor: &ObjectDescriptor,
        fingerprint: Fingerprint,
        attributes: &StaticAttributes,
    ) -> Self {
        Self {
            created: Utc::now(),
            fingerprint,
            path: descriptor.key.clone(),
            size: i64::try_from(descriptor.size).unwrap_or(i64::MAX),
            extension: descriptor.extension(),
            architecture: attributes.architecture.clone(),
            imports: attributes.import_count(),
            exports: attributes.export_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Label;

    fn descriptor(size: u64) -> ObjectDescriptor {
        ObjectDescriptor {
            key: "0/Sample.EXE".into(),
            size,
            label: Label::Malicious,
        }
    }

    #[test]
    fn candidate_copies_descriptor_and_counts() {
        let attributes = StaticAttributes {
            architecture: Some("i386".into()),
            imports: Some(vec!["KERNEL32.dll".into()]),
            exports: None,
        };
        let fingerprint = crate::services::hasher::digest_bytes(b"MZ");
        let candidate = MetaCandidate::new(&descriptor(118_784), fingerprint.clone(), &attributes);
        assert_eq!(candidate.size, 118_784);
        assert_eq!(candidate.extension, "exe");
        assert_eq!(candidate.fingerprint, fingerprint);
        assert_eq!(candidate.imports, Some(1));
        assert_eq!(candidate.exports, None);
    }

    #[test]
    fn oversized_listing_sizes_saturate_instead_of_wrapping() {
        let fingerprint = crate::services::hasher::digest_bytes(b"MZ");
        let attributes = StaticAttributes::default();
        let at_limit = MetaCandidate::new(&descriptor(i64::MAX as u64), fingerprint.clone(), &attributes);
        assert_eq!(at_limit.size, i64::MAX);
        let huge = MetaCandidate::new(&descriptor(u64::MAX), fingerprint, &attributes);
        assert_eq!(huge.size, i64::MAX);
    }
}
