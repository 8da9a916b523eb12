//! Reference Identity Values
//!
//! A `Reference` is the 128-bit identity used for nodes and for actor and
//! provenance links between them. References are plain values: compared by
//! value, cheap to copy, and encoded as either the canonical hyphenated UUID
//! form or the unhyphenated "clean" form.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Errors produced when decoding a reference from text
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ReferenceError {
    /// Input is not a valid hyphenated or clean reference encoding
    #[error("invalid reference format: {input}")]
    InvalidFormat { input: String },
}

/// 128-bit identity value for nodes, actors, and provenance links
///
/// Two canonical text encodings exist:
///
/// - hyphenated: `a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11`
/// - clean: `a0eebc999c0b4ef8bb6d6bb9bd380a11`
///
/// [`Reference::parse`] accepts both; [`fmt::Display`] and serde use the
/// hyphenated form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Reference(Uuid);

impl Reference {
    /// The distinguished empty reference (all zero bits)
    pub const fn empty() -> Self {
        Self(Uuid::nil())
    }

    /// The well-known root reference, reserved for the bootstrap actor
    pub const fn root() -> Self {
        Self(Uuid::from_u128(0x11111111_1111_1111_1111_111111111111))
    }

    /// Generate a fresh random (v4) reference
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Decode a reference from its hyphenated or clean text form
    ///
    /// Any other shape (wrong length, braces, URN prefixes, non-hex input)
    /// is rejected with [`ReferenceError::InvalidFormat`].
    pub fn parse(input: &str) -> Result<Self, ReferenceError> {
        // Uuid::parse_str also accepts braced and URN encodings; only the
        // two canonical lengths are valid here.
        if input.len() != 32 && input.len() != 36 {
            return Err(ReferenceError::InvalidFormat {
                input: input.to_string(),
            });
        }

        Uuid::parse_str(input)
            .map(Self)
            .map_err(|_| ReferenceError::InvalidFormat {
                input: input.to_string(),
            })
    }

    /// Whether this is the distinguished empty reference
    pub fn is_empty(&self) -> bool {
        self.0.is_nil()
    }

    /// Canonical hyphenated encoding
    pub fn to_hyphenated(&self) -> String {
        self.0.hyphenated().to_string()
    }

    /// Canonical unhyphenated ("clean") encoding
    pub fn to_clean(&self) -> String {
        self.0.simple().to_string()
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl Serialize for Reference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hyphenated())
    }
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Reference::parse(&text).map_err(serde::de::Error::custom)
    }
}
