//! Conversation entries as the window engine sees them.
//!
//! An [`Entry`] is the hydrated form of one row in the conversation log.
//! The engine never interprets entry bodies beyond what it needs to lay
//! items out; kind-specific behavior (attachments, calls, receipts) belongs
//! to the rendering layer.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::ids::EntryId;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// What an entry *is*.
///
/// `Unknown` absorbs kinds written by newer schema versions; the renderer
/// drops such items instead of failing the whole load.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum EntryKind {
    /// Message received from another participant.
    #[default]
    #[serde(rename = "incoming")]
    #[strum(serialize = "incoming", serialize = "incoming_message")]
    IncomingMessage,
    /// Message sent from this device or a linked one.
    #[serde(rename = "outgoing")]
    #[strum(serialize = "outgoing", serialize = "outgoing_message")]
    OutgoingMessage,
    /// Call record.
    Call,
    /// Informational notice (group changes, timers, safety numbers).
    Info,
    /// Error notice (failed decryption, failed send).
    Error,
    /// Someone is typing. Never stored; synthesized by the renderer.
    #[serde(rename = "typing")]
    #[strum(serialize = "typing", serialize = "typing_indicator")]
    TypingIndicator,
    /// Unrecognized kind.
    #[serde(other)]
    Unknown,
}

impl EntryKind {
    /// Parse from string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::IncomingMessage => "incoming",
            EntryKind::OutgoingMessage => "outgoing",
            EntryKind::Call => "call",
            EntryKind::Info => "info",
            EntryKind::Error => "error",
            EntryKind::TypingIndicator => "typing",
            EntryKind::Unknown => "unknown",
        }
    }

    /// Check if this is a message (incoming or outgoing).
    pub fn is_message(&self) -> bool {
        matches!(self, EntryKind::IncomingMessage | EntryKind::OutgoingMessage)
    }

    /// Check if an insert of this kind counts as live conversation activity.
    pub fn is_live_activity(&self) -> bool {
        self.is_message() || matches!(self, EntryKind::TypingIndicator)
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Delivery/progress state of an entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum EntryStatus {
    /// Queued locally, not yet sent.
    Pending,
    /// Sent (outgoing) or received (incoming).
    #[default]
    #[strum(serialize = "sent", serialize = "received")]
    Sent,
    /// Delivered to the recipient's device.
    Delivered,
    /// Read by the recipient.
    Read,
    /// Failed to send.
    Failed,
}

impl EntryStatus {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Sent => "sent",
            EntryStatus::Delivered => "delivered",
            EntryStatus::Read => "read",
            EntryStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A hydrated conversation entry.
///
/// `revision` is bumped by the store on every write to the row; two entries
/// with the same id and revision are structurally identical.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub kind: EntryKind,
    pub status: EntryStatus,
    /// Display name or address of whoever authored the entry.
    pub author: String,
    pub body: String,
    pub created_at: u64,
    pub revision: u64,
}

impl Entry {
    /// Start a builder with the two required fields.
    pub fn builder(id: EntryId, kind: EntryKind) -> EntryBuilder {
        EntryBuilder::new(id, kind)
    }

    /// Check whether two entries differ in stored state.
    ///
    /// Compares revision first; a changed revision with identical fields is
    /// still reported as changed because the store said so.
    pub fn state_differs(&self, other: &Entry) -> bool {
        self.revision != other.revision
            || self.status != other.status
            || self.kind != other.kind
            || self.body != other.body
            || self.author != other.author
    }
}

/// Builder for [`Entry`].
///
/// ```
/// use tsuzuri_types::{Entry, EntryId, EntryKind, EntryStatus};
///
/// let entry = Entry::builder(EntryId::new(), EntryKind::OutgoingMessage)
///     .author("amy")
///     .body("on my way")
///     .status(EntryStatus::Delivered)
///     .build();
/// assert_eq!(entry.body, "on my way");
/// ```
pub struct EntryBuilder {
    entry: Entry,
}

impl EntryBuilder {
    /// Start building an entry with the two required fields.
    pub fn new(id: EntryId, kind: EntryKind) -> Self {
        Self {
            entry: Entry {
                id,
                kind,
                status: EntryStatus::Sent,
                author: String::new(),
                body: String::new(),
                created_at: now_millis(),
                revision: 0,
            },
        }
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.entry.author = author.into();
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.entry.body = body.into();
        self
    }

    pub fn status(mut self, status: EntryStatus) -> Self {
        self.entry.status = status;
        self
    }

    pub fn created_at(mut self, created_at: u64) -> Self {
        self.entry.created_at = created_at;
        self
    }

    pub fn revision(mut self, revision: u64) -> Self {
        self.entry.revision = revision;
        self
    }

    pub fn build(self) -> Entry {
        self.entry
    }
}

// ============================================================================
// Tests
// ============================================================================
