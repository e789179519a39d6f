//! Typed identifiers for conversation entries.
//!
//! `EntryId` wraps a UUIDv7 (time-ordered, globally unique) and is never
//! reused, even after the entry is deleted. It displays as standard UUID text
//! for logging; the `short()` form (first 8 hex chars) is for human-facing
//! output only and never used as a lookup key.
//!
//! `Position` is the store's row ordinal. Positions are only meaningful
//! relative to each other: deleting entries leaves gaps rather than
//! renumbering the survivors.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A conversation entry identifier (UUIDv7, or UUIDv5 for sentinels).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(uuid::Uuid);

impl EntryId {
    /// Create a new time-ordered ID (UUIDv7).
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// Build an ID from a raw 128-bit value.
    ///
    /// Deterministic; handy for fixtures and for stores that mint their own ids.
    pub fn from_u128(v: u128) -> Self {
        Self(uuid::Uuid::from_u128(v))
    }

    /// First 8 hex characters, for human display only (never a lookup key).
    pub fn short(&self) -> String {
        self.0.as_simple().to_string()[..8].to_string()
    }

    /// Full 32-character hex string (no hyphens).
    pub fn to_hex(&self) -> String {
        self.0.as_simple().to_string()
    }

    /// The raw 16 bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Reconstruct from 16 bytes.
    pub fn from_bytes(b: [u8; 16]) -> Self {
        Self(uuid::Uuid::from_bytes(b))
    }

    /// Parse from a hex string (32 chars, no hyphens) or standard UUID format.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        uuid::Uuid::parse_str(s).map(Self)
    }

    /// The entry ID of the synthetic typing-indicator item.
    ///
    /// Deterministic (UUIDv5 derived from `b"typing-indicator"`) so the
    /// indicator keeps the same key across render states and diffs as a
    /// single keyed item.
    pub fn typing_indicator() -> Self {
        Self(uuid::Uuid::new_v5(&TSUZURI_ENTRY_NS, b"typing-indicator"))
    }

    /// Check if this is the typing-indicator sentinel.
    pub fn is_typing_indicator(&self) -> bool {
        *self == Self::typing_indicator()
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<uuid::Uuid> for EntryId {
    fn from(u: uuid::Uuid) -> Self {
        Self(u)
    }
}

impl From<EntryId> for uuid::Uuid {
    fn from(id: EntryId) -> uuid::Uuid {
        id.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", self.short())
    }
}

/// Fixed namespace for deriving deterministic sentinel EntryIds via UUIDv5.
const TSUZURI_ENTRY_NS: uuid::Uuid = uuid::uuid!("5b0e2f7c-93a1-4d6e-8c24-7f1a9e03d5b8");

// ── Position ────────────────────────────────────────────────────────────────

/// Store-local row ordinal of an entry.
///
/// Monotonically assigned on insert. Stable within a read transaction.
#[derive(Clone, Copy, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(pub u64);

impl Position {
    pub const ZERO: Self = Self(0);

    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Position({})", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_unique() {
        let a = EntryId::new();
        let b = EntryId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_short_is_8_chars() {
        assert_eq!(EntryId::new().short().len(), 8);
    }

    #[test]
    fn test_parse_hex_and_uuid_format() {
        let id = EntryId::new();
        assert_eq!(EntryId::parse(&id.to_hex()).unwrap(), id);
        assert_eq!(EntryId::parse(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn test_from_u128_is_deterministic() {
        assert_eq!(EntryId::from_u128(42), EntryId::from_u128(42));
        assert_ne!(EntryId::from_u128(42), EntryId::from_u128(43));
    }

    #[test]
    fn test_typing_indicator_is_stable() {
        let a = EntryId::typing_indicator();
        let b = EntryId::typing_indicator();
        assert_eq!(a, b);
        assert!(a.is_typing_indicator());
        assert!(!EntryId::new().is_typing_indicator());
    }

    #[test]
    fn test_ordering_is_time_ordered() {
        let ids: Vec<EntryId> = (0..10).map(|_| EntryId::new()).collect();
        for i in 1..ids.len() {
            assert!(ids[i] >= ids[i - 1]);
        }
    }

    #[test]
    fn test_position_next_saturates() {
        assert_eq!(Position(3).next(), Position(4));
        assert_eq!(Position(u64::MAX).next(), Position(u64::MAX));
    }

    #[test]
    fn test_position_default_is_zero() {
        assert_eq!(Position::default(), Position::ZERO);
        assert_eq!(Position::default().next(), Position(1));
    }

    #[test]
    fn test_serde_roundtrip_entry_id() {
        let id = EntryId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: EntryId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }
}
