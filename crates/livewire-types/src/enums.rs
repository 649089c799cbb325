//! Enumeration types shared by the registry and the transport.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// The kind of change applied to a document.
///
/// Serialized in lowercase (`create`, `update`, `delete`) both on the wire
/// and in the `socket.events` filter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum ChangeKind {
    /// A document was inserted.
    Create,
    /// A document's body was modified.
    Update,
    /// A document was removed.
    Delete,
}

impl ChangeKind {
    /// Every change kind, in lifecycle order.
    pub const ALL: [Self; 3] = [Self::Create, Self::Update, Self::Delete];

    /// The lowercase wire name of this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl core::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which way a relation hop walks from the mutated document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum HopDirection {
    /// From a member to the document whose collection holds it
    /// (`Photo.album` -> `Album`).
    ToOwner,
    /// From an owner to the documents listed in its collection
    /// (`Album.photos` -> `Photo`).
    ToMembers,
}
