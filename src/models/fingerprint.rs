use serde::{Deserialize, Serialize};
use std::fmt;

/// 128-bit content digest, kept as 32 lowercase hex characters.
///
/// Used only as a dedup/identity key. It is an MD5 digest and carries no
/// integrity or security guarantee.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub const HEX_LEN: usize = 32;

    pub fn from_digest(digest: md5::Digest) -> Self {
        Self(format!("{:x}", digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Bytes written to the fixed-length binary column.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
