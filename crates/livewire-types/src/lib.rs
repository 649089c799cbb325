//! Shared type definitions for the Livewire application core.
//!
//! Types defined here travel over the real-time transport and flow
//! downstream to `TypeScript` via `ts-rs` for browser clients.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for documents, connections, changes
//! - [`enums`] -- Change kinds and relation hop directions
//! - [`structs`] -- Documents, change events and transport envelopes

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{ChangeKind, HopDirection};
pub use ids::{ChangeId, ConnectionId, DocumentId};
pub use structs::{ChangeEvent, Document, Envelope, RelationNotice};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation.

    #[test]
    fn export_bindings() {
        // Files are written to `bindings/` relative to the crate root.
        use ts_rs::TS;

        let _ = crate::ids::DocumentId::export_all();
        let _ = crate::ids::ConnectionId::export_all();
        let _ = crate::ids::ChangeId::export_all();

        let _ = crate::enums::ChangeKind::export_all();
        let _ = crate::enums::HopDirection::export_all();

        let _ = crate::structs::Document::export_all();
        let _ = crate::structs::RelationNotice::export_all();
        let _ = crate::structs::ChangeEvent::export_all();
        let _ = crate::structs::Envelope::export_all();
    }
}
