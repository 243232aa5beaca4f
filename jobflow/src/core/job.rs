//! Job identity and submission tickets.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Maximum number of characters kept from a job id when building file names.
const MAX_STEM_LEN: usize = 64;

/// Caller-supplied identifier for one unit of work.
///
/// The id doubles as the dedup key and the record-store key. It is untrusted
/// input: never splice it into a path directly, use [`JobId::file_stem`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Creates a job id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the id is empty or only whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Returns a filesystem-safe stem derived from the id.
    ///
    /// Characters outside `[A-Za-z0-9_-]` become `_`, the readable part is
    /// truncated, and a short digest of the raw id is appended so that ids
    /// which sanitise to the same text still map to distinct stems.
    #[must_use]
    pub fn file_stem(&self) -> String {
        let readable: String = self
            .0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .take(MAX_STEM_LEN)
            .collect();
        let readable = if readable.trim_matches('_').is_empty() {
            "job".to_string()
        } else {
            readable
        };

        let digest = Sha256::digest(self.0.as_bytes());
        format!("{readable}-{}", hex::encode(&digest[..4]))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Token identifying one accepted submission.
///
/// Successive submissions of the same [`JobId`] get distinct tickets, which
/// lets late results from an earlier submission be recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ticket(pub(crate) u64);

impl Ticket {
    /// Returns the raw sequence number.
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
