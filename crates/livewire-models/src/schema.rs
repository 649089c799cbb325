//! Schema descriptions: which models exist and how they relate.
//!
//! A schema maps each model name to its fields. Scalar fields are only
//! recorded; relation fields drive inverse bookkeeping and fan-out:
//!
//! ```yaml
//! Album:
//!   title: string
//!   photos: { many: Photo }
//! Photo:
//!   url: string
//!   album: { ref: Album, inverse: photos }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Type tag for a plain field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    /// UTF-8 text.
    String,
    /// Any JSON number.
    Number,
    /// `true` / `false`.
    Boolean,
    /// RFC 3339 timestamp string.
    Date,
    /// Arbitrary JSON.
    Json,
}

/// Specification of one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldSpec {
    /// A plain value.
    Scalar(ScalarType),
    /// A single reference to a document of `target`.
    Reference {
        /// Referenced model.
        #[serde(rename = "ref")]
        target: String,
        /// Collection field on `target` listing documents that point here.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inverse: Option<String>,
    },
    /// A list of references to documents of `many`.
    Collection {
        /// Member model.
        many: String,
        /// Reference field on `many` pointing back at the owner.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inverse: Option<String>,
    },
}

impl FieldSpec {
    /// Shorthand for a reference field.
    pub fn reference(target: &str, inverse: Option<&str>) -> Self {
        Self::Reference {
            target: target.to_owned(),
            inverse: inverse.map(str::to_owned),
        }
    }

    /// Shorthand for a collection field.
    pub fn collection(many: &str, inverse: Option<&str>) -> Self {
        Self::Collection {
            many: many.to_owned(),
            inverse: inverse.map(str::to_owned),
        }
    }

    /// The related model, for relation fields.
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Scalar(_) => None,
            Self::Reference { target, .. } => Some(target),
            Self::Collection { many, .. } => Some(many),
        }
    }
}

/// Fields of one model, keyed by field name.
pub type ModelSchema = BTreeMap<String, FieldSpec>;

/// A complete schema: model name to fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaDescription {
    models: BTreeMap<String, ModelSchema>,
}

impl SchemaDescription {
    /// An empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a model.
    #[must_use]
    pub fn with_model<I, S>(mut self, name: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = (S, FieldSpec)>,
        S: Into<String>,
    {
        let fields = fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.models.insert(name.to_owned(), fields);
        self
    }

    /// Iterate over models in name order.
    pub fn models(&self) -> impl Iterator<Item = (&str, &ModelSchema)> {
        self.models.iter().map(|(name, fields)| (name.as_str(), fields))
    }

    /// Fields of one model.
    pub fn model(&self, name: &str) -> Option<&ModelSchema> {
        self.models.get(name)
    }

    /// Number of models.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the schema has no models.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
