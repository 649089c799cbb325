//! One-hop change fan-out.
//!
//! A mutation becomes a [`ChangePlan`]: the primary event for the mutated
//! model plus at most one hop per paired relation field. Publishing walks
//! the primary handle first, then every hop, sharing one `notified` set so
//! a connection subscribed to several of the touched models hears about
//! the change exactly once.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use livewire_types::{ChangeEvent, ChangeId, ChangeKind, ConnectionId, Document, DocumentId, HopDirection, RelationNotice};

use crate::handle::ModelHandle;
use crate::relation::{ModelIndex, RelationTable};

/// Counts from publishing one logical change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    /// The logical change these counts belong to.
    pub change_id: ChangeId,
    /// Events handed to a connection.
    pub delivered: usize,
    /// Registrations whose filter rejected the event.
    pub filtered: usize,
    /// Registrations skipped because the connection already got this change.
    pub suppressed: usize,
    /// Emits that failed (closed or lagging connections).
    pub failed: usize,
}

impl DeliveryReport {
    /// An empty report for `change_id`.
    pub const fn new(change_id: ChangeId) -> Self {
        Self {
            change_id,
            delivered: 0,
            filtered: 0,
            suppressed: 0,
            failed: 0,
        }
    }
}

/// A relation hop: subscribers of `target` learn that `field` on the
/// listed owners is affected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    /// Subscriber-side model.
    pub target: ModelIndex,
    /// Field on `target` linking to the mutated document.
    pub field: String,
    /// Affected documents of `target`.
    pub owners: Vec<DocumentId>,
}

/// Everything needed to publish one logical change.
#[derive(Debug, Clone)]
pub struct ChangePlan {
    /// Fresh identity of the change.
    pub change_id: ChangeId,
    /// The mutated model.
    pub model: ModelIndex,
    /// What happened.
    pub kind: ChangeKind,
    /// Document after the change (before it, for deletes).
    pub document: Document,
    /// Relation hops, one per (model, field).
    pub hops: Vec<Hop>,
}

impl ChangePlan {
    /// Plan a change from the document state before and after it.
    ///
    /// `before` is `None` for creates, `after` is `None` for deletes.
    /// Only relation fields with an inverse produce hops.
    pub fn from_states(
        relations: &RelationTable,
        model: ModelIndex,
        before: Option<&Document>,
        after: Option<&Document>,
    ) -> Option<Self> {
        let (kind, document) = match (before, after) {
            (None, Some(doc)) => (ChangeKind::Create, doc.clone()),
            (Some(_), Some(doc)) => (ChangeKind::Update, doc.clone()),
            (Some(doc), None) => (ChangeKind::Delete, doc.clone()),
            (None, None) => return None,
        };

        let mut grouped: BTreeMap<(ModelIndex, String), BTreeSet<DocumentId>> = BTreeMap::new();
        for relation in relations.relations(model) {
            let Some(inverse) = &relation.inverse else {
                continue;
            };
            let owners = match relation.direction {
                HopDirection::ToOwner => {
                    let old = before.and_then(|d| d.reference(&relation.field));
                    let new = after.and_then(|d| d.reference(&relation.field));
                    old.into_iter().chain(new).collect::<BTreeSet<_>>()
                }
                HopDirection::ToMembers => {
                    let old: BTreeSet<DocumentId> = before
                        .map(|d| d.collection(&relation.field).into_iter().collect())
                        .unwrap_or_default();
                    let new: BTreeSet<DocumentId> = after
                        .map(|d| d.collection(&relation.field).into_iter().collect())
                        .unwrap_or_default();
                    old.symmetric_difference(&new).copied().collect()
                }
            };
            if !owners.is_empty() {
                grouped
                    .entry((relation.target, inverse.clone()))
                    .or_default()
                    .extend(owners);
            }
        }

        let hops = grouped
            .into_iter()
            .map(|((target, field), owners)| Hop {
                target,
                field,
                owners: owners.into_iter().collect(),
            })
            .collect();

        Some(Self {
            change_id: ChangeId::new(),
            model,
            kind,
            document,
            hops,
        })
    }
}

/// Publish a planned change to every interested connection.
///
/// Delivery failures are counted, never propagated.
pub async fn publish(handles: &[Arc<ModelHandle>], relations: &RelationTable, plan: &ChangePlan) -> DeliveryReport {
    let mut report = DeliveryReport::new(plan.change_id);
    let mut notified: BTreeSet<ConnectionId> = BTreeSet::new();
    let model = relations.name(plan.model).unwrap_or_default().to_owned();
    let at = Utc::now();

    let primary = ChangeEvent {
        change_id: plan.change_id,
        model: model.clone(),
        kind: plan.kind,
        document: plan.document.clone(),
        relation: None,
        at,
    };
    if let Some(handle) = handles.get(plan.model.0) {
        handle.deliver(&primary, &mut notified, &mut report).await;
    }

    for hop in &plan.hops {
        let Some(handle) = handles.get(hop.target.0) else {
            continue;
        };
        let event = ChangeEvent {
            relation: Some(RelationNotice {
                model: handle.name().to_owned(),
                field: hop.field.clone(),
                owners: hop.owners.clone(),
            }),
            ..primary.clone()
        };
        handle.deliver(&event, &mut notified, &mut report).await;
    }

    tracing::debug!(
        change_id = %plan.change_id,
        model = %model,
        kind = %plan.kind,
        hops = plan.hops.len(),
        delivered = report.delivered,
        filtered = report.filtered,
        suppressed = report.suppressed,
        failed = report.failed,
        "Change published"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldSpec, ScalarType, SchemaDescription};

    fn table() -> RelationTable {
        let schema = SchemaDescription::new()
            .with_model(
                "Album",
                [
                    ("title", FieldSpec::Scalar(ScalarType::String)),
                    ("photos", FieldSpec::collection("Photo", Some("album"))),
                ],
            )
            .with_model("Photo", [("album", FieldSpec::reference("Album", Some("photos")))]);
        RelationTable::build(&schema).unwrap_or_default()
    }

    fn doc(model: &str, body: serde_json::Value) -> Document {
        let body = match body {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Document::new(model, body)
    }

    #[test]
    fn moving_a_photo_hops_to_both_albums() {
        let (a, b) = (DocumentId::new(), DocumentId::new());
        let before = doc("Photo", serde_json::json!({ "album": a.to_string() }));
        let mut after = before.clone();
        after.set_field("album", serde_json::json!(b.to_string()));

        let plan = ChangePlan::from_states(&table(), ModelIndex(1), Some(&before), Some(&after));
        let hops = plan.map(|p| p.hops).unwrap_or_default();
        assert_eq!(hops.len(), 1);
        let hop = hops.first();
        assert_eq!(hop.map(|h| h.target), Some(ModelIndex(0)));
        assert_eq!(hop.map(|h| h.field.as_str()), Some("photos"));
        assert_eq!(hop.map(|h| h.owners.len()), Some(2));
    }

    #[test]
    fn collection_hops_only_cover_changed_members() {
        let (kept, added) = (DocumentId::new(), DocumentId::new());
        let before = doc("Album", serde_json::json!({ "photos": [kept.to_string()] }));
        let mut after = before.clone();
        after.set_field("photos", serde_json::json!([kept.to_string(), added.to_string()]));

        let plan = ChangePlan::from_states(&table(), ModelIndex(0), Some(&before), Some(&after));
        let hops = plan.map(|p| p.hops).unwrap_or_default();
        assert_eq!(hops.first().map(|h| h.owners.clone()), Some(vec![added]));
    }

    #[test]
    fn scalar_only_update_has_no_hops() {
        let before = doc("Album", serde_json::json!({ "title": "a" }));
        let mut after = before.clone();
        after.set_field("title", serde_json::json!("b"));

        let plan = ChangePlan::from_states(&table(), ModelIndex(0), Some(&before), Some(&after));
        assert_eq!(plan.as_ref().map(|p| p.kind), Some(ChangeKind::Update));
        assert_eq!(plan.map(|p| p.hops.len()), Some(0));
    }

    #[test]
    fn no_states_means_no_change() {
        assert!(ChangePlan::from_states(&table(), ModelIndex(0), None, None).is_none());
    }
}
