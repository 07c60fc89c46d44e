use serde::{Deserialize, Serialize};

/// Static binary attributes extracted by the external analyzer.
///
/// `None` means the tool failed; `Some(vec![])` means it ran and found
/// nothing. The two must never be conflated.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct StaticAttributes {
    pub architecture: Option<String>,
    pub imports: Option<Vec<String>>,
    pub exports: Option<Vec<String>>,
}

impl StaticAttributes {
    pub fn import_count(&self) -> Option<i64> {
        self.imports.as_ref().map(|names| names.len() as i64)
    }

    pub fn export_count(&self) -> Option<i64> {
        self.exports.as_ref().map(|names| names.len() as i64)
    }
}
