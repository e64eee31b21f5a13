//! Newtype wrappers for type safety

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session ID newtype for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a fresh random session ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The nil ID used by the null session sentinel
    #[must_use]
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Get the underlying UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form is enough to tell sessions apart in logs
        let s = self.0.simple().to_string();
        f.write_str(&s[..8])
    }
}
