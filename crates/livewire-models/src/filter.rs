//! Per-connection event filters.
//!
//! An [`EventFilter`] maps model names to a [`ModelFilter`]. A model with
//! no entry receives every event; an entry restricts the change kinds,
//! optionally with separate kinds per relation field:
//!
//! ```yaml
//! Album: [create, delete]
//! Photo:
//!   kinds: [update]
//!   relations:
//!     album: [create, update, delete]
//! ```

use std::collections::{BTreeMap, BTreeSet};

use livewire_types::ChangeKind;
use serde::Deserialize;

/// Which change kinds one registration wants from one model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "ModelFilterRepr")]
pub struct ModelFilter {
    kinds: Option<BTreeSet<ChangeKind>>,
    relations: BTreeMap<String, BTreeSet<ChangeKind>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ModelFilterRepr {
    Kinds(BTreeSet<ChangeKind>),
    Scoped {
        #[serde(default)]
        kinds: Option<BTreeSet<ChangeKind>>,
        #[serde(default)]
        relations: BTreeMap<String, BTreeSet<ChangeKind>>,
    },
}

impl From<ModelFilterRepr> for ModelFilter {
    fn from(repr: ModelFilterRepr) -> Self {
        match repr {
            ModelFilterRepr::Kinds(kinds) => Self {
                kinds: Some(kinds),
                relations: BTreeMap::new(),
            },
            ModelFilterRepr::Scoped { kinds, relations } => Self { kinds, relations },
        }
    }
}

impl ModelFilter {
    /// Accept every event.
    pub fn all() -> Self {
        Self::default()
    }

    /// Accept only the given kinds (for direct and relation events alike).
    pub fn only(kinds: impl IntoIterator<Item = ChangeKind>) -> Self {
        Self {
            kinds: Some(kinds.into_iter().collect()),
            relations: BTreeMap::new(),
        }
    }

    /// Accept nothing.
    pub fn none() -> Self {
        Self::only([])
    }

    /// Override the kinds accepted through one relation field.
    #[must_use]
    pub fn with_relation(mut self, field: &str, kinds: impl IntoIterator<Item = ChangeKind>) -> Self {
        self.relations
            .insert(field.to_owned(), kinds.into_iter().collect());
        self
    }

    /// Whether a direct event of `kind` passes.
    pub fn allows(&self, kind: ChangeKind) -> bool {
        self.kinds.as_ref().is_none_or(|kinds| kinds.contains(&kind))
    }

    /// Whether a relation event of `kind` arriving through `field` passes.
    pub fn allows_relation(&self, field: &str, kind: ChangeKind) -> bool {
        self.relations
            .get(field)
            .map_or_else(|| self.allows(kind), |kinds| kinds.contains(&kind))
    }
}

/// Per-model filters for one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct EventFilter {
    models: BTreeMap<String, ModelFilter>,
}

impl EventFilter {
    /// A filter with no restrictions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict one model.
    #[must_use]
    pub fn with_model(mut self, model: &str, filter: ModelFilter) -> Self {
        self.models.insert(model.to_owned(), filter);
        self
    }

    /// The filter for one model, if restricted.
    pub fn for_model(&self, model: &str) -> Option<&ModelFilter> {
        self.models.get(model)
    }

    /// Names of the restricted models.
    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }
}
