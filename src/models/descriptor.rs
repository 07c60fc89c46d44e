//! Represents a remote object discovered by the enumerator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The two fixed sample categories, distinguished by remote key prefix.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Malicious,
    Clean,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Malicious => "malicious",
            Label::Clean => "clean",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A label bound to the remote key prefix that holds its objects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    pub label: Label,
    pub prefix: String,
}

impl Partition {
    pub fn new(label: Label, prefix: impl Into<String>) -> Self {
        Self {
            label,
            prefix: prefix.into(),
        }
    }
}

/// A single listed object (blob) within a partition.
///
/// Produced by the enumerator and consumed right away by one processing
/// unit. Never persisted on its own.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectDescriptor {
    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Size in bytes as reported by the listing.
    pub size: u64,

    /// Partition the object was listed under.
    pub label: Label,
}

impl ObjectDescriptor {
    /// Final path segment of the key.
    pub fn basename(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }

    /// Lowercase extension of the basename, empty when there is none.
    ///
    /// A leading dot (`.profile`) or a trailing dot (`file.`) does not
    /// start an extension.
    pub fn extension(&self) -> String {
        let name = self.basename();
        match name.rfind('.') {
            Some(pos) if pos > 0 && pos + 1 < name.len() => name[pos + 1..].to_lowercase(),
            _ => String::new(),
        }
    }
}
