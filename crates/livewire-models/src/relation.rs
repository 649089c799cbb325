//! Index-based relation table.
//!
//! Models are numbered by position ([`ModelIndex`]) and each model lists its
//! relation edges by index. No document or handle holds a live reference
//! to another, so the Album <-> Photo cycle is just two table rows and the
//! one-hop walk always terminates.

use std::collections::BTreeMap;

use livewire_types::HopDirection;

use crate::error::ModelError;
use crate::schema::{FieldSpec, SchemaDescription};

/// Position of a model in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModelIndex(pub usize);

/// One relation field of a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    /// The relation field on the owning model.
    pub field: String,
    /// The related model.
    pub target: ModelIndex,
    /// Which way a hop through this field walks.
    pub direction: HopDirection,
    /// The paired field on `target`, if the relation is bidirectional.
    ///
    /// Only paired relations are kept in sync and fanned out.
    pub inverse: Option<String>,
}

/// Relation edges for every model, addressed by [`ModelIndex`].
#[derive(Debug, Clone, Default)]
pub struct RelationTable {
    names: Vec<String>,
    edges: Vec<Vec<Relation>>,
}

impl RelationTable {
    /// Build the table from a schema, pairing and validating inverses.
    ///
    /// Models are indexed in name order.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Schema`] if a relation names an unknown model,
    /// or a declared inverse does not point back at its owner.
    pub fn build(schema: &SchemaDescription) -> Result<Self, ModelError> {
        let names: Vec<String> = schema.models().map(|(name, _)| name.to_owned()).collect();
        let index: BTreeMap<&str, ModelIndex> = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), ModelIndex(i)))
            .collect();

        let mut edges = Vec::with_capacity(names.len());
        for (model, fields) in schema.models() {
            let mut relations = Vec::new();
            for (field, spec) in fields {
                let Some(target_name) = spec.target() else {
                    continue;
                };
                let target = *index.get(target_name).ok_or_else(|| {
                    ModelError::Schema(format!(
                        "{model}.{field} refers to unknown model {target_name}"
                    ))
                })?;
                let direction = match spec {
                    FieldSpec::Collection { .. } => HopDirection::ToMembers,
                    _ => HopDirection::ToOwner,
                };
                let inverse = resolve_inverse(schema, model, field, spec, target_name)?;
                relations.push(Relation {
                    field: field.clone(),
                    target,
                    direction,
                    inverse,
                });
            }
            edges.push(relations);
        }

        Ok(Self { names, edges })
    }

    /// Number of models in the table.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the table has no models.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Name of the model at `index`.
    pub fn name(&self, index: ModelIndex) -> Option<&str> {
        self.names.get(index.0).map(String::as_str)
    }

    /// Index of the model called `name`.
    pub fn index_of(&self, name: &str) -> Option<ModelIndex> {
        self.names.iter().position(|n| n == name).map(ModelIndex)
    }

    /// All relation edges leaving `model`.
    pub fn relations(&self, model: ModelIndex) -> &[Relation] {
        self.edges.get(model.0).map_or(&[], Vec::as_slice)
    }

    /// The relation edge for `model.field`, if that field is a relation.
    pub fn relation(&self, model: ModelIndex, field: &str) -> Option<&Relation> {
        self.relations(model).iter().find(|r| r.field == field)
    }
}

/// Work out the paired field on the target model.
///
/// A declared inverse must point back at `model` through the opposite
/// field kind. An undeclared inverse is inferred when the target declares
/// this field as its own inverse.
fn resolve_inverse(
    schema: &SchemaDescription,
    model: &str,
    field: &str,
    spec: &FieldSpec,
    target: &str,
) -> Result<Option<String>, ModelError> {
    let target_fields = schema
        .model(target)
        .ok_or_else(|| ModelError::Schema(format!("unknown model {target}")))?;

    let declared = match spec {
        FieldSpec::Reference { inverse, .. } | FieldSpec::Collection { inverse, .. } => {
            inverse.as_deref()
        }
        FieldSpec::Scalar(_) => None,
    };

    if let Some(inverse) = declared {
        let paired = target_fields.get(inverse);
        let points_back = match (spec, paired) {
            (FieldSpec::Reference { .. }, Some(FieldSpec::Collection { many, inverse: back })) => {
                many == model && back.as_deref().is_none_or(|b| b == field)
            }
            (FieldSpec::Collection { .. }, Some(FieldSpec::Reference { target, inverse: back })) => {
                target == model && back.as_deref().is_none_or(|b| b == field)
            }
            _ => false,
        };
        if !points_back {
            return Err(ModelError::Schema(format!(
                "{model}.{field} declares inverse {target}.{inverse}, which does not point back"
            )));
        }
        return Ok(Some(inverse.to_owned()));
    }

    let inferred = target_fields.iter().find_map(|(name, other)| {
        let pairs = match (spec, other) {
            (FieldSpec::Reference { .. }, FieldSpec::Collection { many, inverse: Some(back) })
            | (FieldSpec::Collection { .. }, FieldSpec::Reference { target: many, inverse: Some(back) }) => {
                many == model && back == field
            }
            _ => false,
        };
        pairs.then(|| name.clone())
    });
    Ok(inferred)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ScalarType;

    fn album_photo() -> SchemaDescription {
        SchemaDescription::new()
            .with_model(
                "Album",
                [
                    ("title", FieldSpec::Scalar(ScalarType::String)),
                    ("photos", FieldSpec::collection("Photo", None)),
                ],
            )
            .with_model(
                "Photo",
                [
                    ("url", FieldSpec::Scalar(ScalarType::String)),
                    ("album", FieldSpec::reference("Album", Some("photos"))),
                ],
            )
    }

    #[test]
    fn pairs_reference_with_collection_in_both_directions() {
        let table = RelationTable::build(&album_photo());
        assert!(table.is_ok());
        let table = table.unwrap_or_default();

        let album = table.index_of("Album");
        let photo = table.index_of("Photo");
        assert_eq!(album, Some(ModelIndex(0)));
        assert_eq!(photo, Some(ModelIndex(1)));

        let photos = table.relation(ModelIndex(0), "photos").cloned();
        assert_eq!(
            photos,
            Some(Relation {
                field: String::from("photos"),
                target: ModelIndex(1),
                direction: HopDirection::ToMembers,
                inverse: Some(String::from("album")),
            })
        );

        let back = table.relation(ModelIndex(1), "album").cloned();
        assert_eq!(back.map(|r| (r.direction, r.inverse)), Some((HopDirection::ToOwner, Some(String::from("photos")))));
        assert!(table.relation(ModelIndex(1), "url").is_none());
    }

    #[test]
    fn unknown_target_is_a_schema_error() {
        let schema = SchemaDescription::new()
            .with_model("Photo", [("album", FieldSpec::reference("Album", None))]);
        assert!(matches!(
            RelationTable::build(&schema),
            Err(ModelError::Schema(_))
        ));
    }

    #[test]
    fn inverse_must_point_back() {
        let schema = SchemaDescription::new()
            .with_model("Album", [("title", FieldSpec::Scalar(ScalarType::String))])
            .with_model("Photo", [("album", FieldSpec::reference("Album", Some("title")))]);
        assert!(matches!(
            RelationTable::build(&schema),
            Err(ModelError::Schema(_))
        ));
    }

    #[test]
    fn unpaired_relations_have_no_inverse() {
        let schema = SchemaDescription::new()
            .with_model("Album", [("cover", FieldSpec::reference("Photo", None))])
            .with_model("Photo", [("url", FieldSpec::Scalar(ScalarType::String))]);
        let table = RelationTable::build(&schema).unwrap_or_default();
        let cover = table.relation(ModelIndex(0), "cover");
        assert_eq!(cover.map(|r| r.inverse.clone()), Some(None));
    }
}
