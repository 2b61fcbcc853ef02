//! Class identity within the target process.

use serde::{Deserialize, Serialize};

/// Opaque identity of a class loaded in the target process.
///
/// The raw value is assigned by the target (a reference id, not a name hash),
/// so two classes with the same name loaded by different class loaders get
/// distinct tokens. Everything in the engine keys on the token; names are
/// presentation data carried alongside in [`ClassInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassToken(u64);

impl ClassToken {
    /// Wraps a raw target-assigned identity.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw target-assigned identity.
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ClassToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "class#{:x}", self.0)
    }
}

/// A loaded class as reported by one enumeration pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassInfo {
    /// Identity of the class in the target process.
    pub token: ClassToken,
    /// Fully-qualified name the target reported for this class.
    pub name: String,
}

impl ClassInfo {
    pub fn new(token: ClassToken, name: impl Into<String>) -> Self {
        Self {
            token,
            name: name.into(),
        }
    }
}
