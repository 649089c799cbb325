//! Core structs: stored documents and the change events pushed to clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::ChangeKind;
use crate::ids::{ChangeId, DocumentId};

/// A stored document belonging to one model.
///
/// `body` is always a JSON object. Reference fields hold a
/// [`DocumentId`] string, collection fields an array of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Document {
    /// Document identifier.
    pub id: DocumentId,
    /// Name of the model the document belongs to.
    pub model: String,
    /// Field values.
    #[ts(type = "Record<string, unknown>")]
    pub body: serde_json::Value,
    /// When the document was inserted.
    pub created_at: DateTime<Utc>,
    /// When the document was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Create a new document with a fresh ID and the current timestamp.
    pub fn new(model: impl Into<String>, body: serde_json::Map<String, serde_json::Value>) -> Self {
        let now = Utc::now();
        Self {
            id: DocumentId::new(),
            model: model.into(),
            body: serde_json::Value::Object(body),
            created_at: now,
            updated_at: now,
        }
    }

    /// Read a single field from the body.
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.body.get(name)
    }

    /// Read a reference field as a [`DocumentId`].
    ///
    /// Returns `None` when the field is absent, `null`, or not a UUID.
    pub fn reference(&self, name: &str) -> Option<DocumentId> {
        self.field(name)
            .and_then(serde_json::Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    /// Read a collection field as a list of [`DocumentId`]s.
    ///
    /// Entries that are not UUID strings are skipped.
    pub fn collection(&self, name: &str) -> Vec<DocumentId> {
        self.field(name)
            .and_then(serde_json::Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(serde_json::Value::as_str)
                    .filter_map(|s| s.parse().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Overwrite one field in the body, stamping `updated_at`.
    pub fn set_field(&mut self, name: &str, value: serde_json::Value) {
        if let Some(body) = self.body.as_object_mut() {
            body.insert(name.to_owned(), value);
            self.updated_at = Utc::now();
        }
    }
}

/// How an event reached a subscriber that did not subscribe to the
/// mutated model directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RelationNotice {
    /// The subscriber-side model (e.g. `Album` when a `Photo` changed).
    pub model: String,
    /// The field on the subscriber-side model that links to the mutated
    /// document (e.g. `photos`).
    pub field: String,
    /// Documents of `model` whose `field` is affected by the change.
    pub owners: Vec<DocumentId>,
}

/// A change notification pushed to a real-time connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ChangeEvent {
    /// Identity of the logical change; shared by every event it produced.
    pub change_id: ChangeId,
    /// Model of the mutated document.
    pub model: String,
    /// What happened to the document.
    pub kind: ChangeKind,
    /// The document after the change (before it, for deletes).
    pub document: Document,
    /// Present when the event was delivered through a relation hop.
    pub relation: Option<RelationNotice>,
    /// When the change was applied.
    pub at: DateTime<Utc>,
}

impl ChangeEvent {
    /// The event name used on the wire.
    ///
    /// Direct events are named `"{Model}:{kind}"`; relation events are
    /// named `"{SubscriberModel}:{field}"`.
    pub fn event_name(&self) -> String {
        match &self.relation {
            Some(notice) => format!("{}:{}", notice.model, notice.field),
            None => format!("{}:{}", self.model, self.kind),
        }
    }
}

/// A frame sent over the real-time transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Envelope {
    /// Event name (see [`ChangeEvent::event_name`]).
    pub event: String,
    /// Event payload.
    #[ts(type = "unknown")]
    pub payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo(body: serde_json::Value) -> Document {
        let body = match body {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Document::new("Photo", body)
    }

    #[test]
    fn reference_and_collection_accessors() {
        let album = DocumentId::new();
        let doc = photo(serde_json::json!({
            "url": "a.png",
            "album": album.to_string(),
            "tags": [album.to_string(), "not-a-uuid", 3],
        }));
        assert_eq!(doc.reference("album"), Some(album));
        assert_eq!(doc.reference("url"), None);
        assert_eq!(doc.collection("tags"), vec![album]);
        assert!(doc.collection("missing").is_empty());
    }

    #[test]
    fn event_names_distinguish_relation_hops() {
        let doc = photo(serde_json::json!({}));
        let mut event = ChangeEvent {
            change_id: ChangeId::new(),
            model: String::from("Photo"),
            kind: ChangeKind::Create,
            document: doc,
            relation: None,
            at: Utc::now(),
        };
        assert_eq!(event.event_name(), "Photo:create");

        event.relation = Some(RelationNotice {
            model: String::from("Album"),
            field: String::from("photos"),
            owners: vec![DocumentId::new()],
        });
        assert_eq!(event.event_name(), "Album:photos");
    }
}
