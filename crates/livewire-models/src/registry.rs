//! The model registry: every model handle, the relation table, and the
//! document mutations that feed the fan-out.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use livewire_db::{Database, DatabaseLink, Write};
use livewire_types::{ChangeId, ConnectionId, Document, DocumentId, HopDirection};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::connection::ConnectionHandle;
use crate::error::{ModelError, ModelRegistrationError};
use crate::fanout::{self, ChangePlan, DeliveryReport};
use crate::filter::EventFilter;
use crate::handle::ModelHandle;
use crate::relation::{ModelIndex, RelationTable};
use crate::schema::SchemaDescription;

/// Tunables for a [`ModelRegistry`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryOptions {
    /// Upper bound on connections registered per model; `None` = unbounded.
    pub max_connections_per_model: Option<usize>,
}

/// Result of registering one connection with every model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationReport {
    /// The registered connection.
    pub connection: ConnectionId,
    /// Models that accepted the connection.
    pub registered: Vec<String>,
    /// Models that refused it.
    pub failures: Vec<ModelRegistrationError>,
}

impl RegistrationReport {
    /// Whether every model accepted the connection.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A committed mutation and how its events were delivered.
#[derive(Debug, Clone)]
pub struct ChangeOutcome {
    /// The document after the change (before it, for deletes).
    pub document: Document,
    /// Fan-out counts.
    pub report: DeliveryReport,
}

/// Entity name to model handle, built once from a schema.
///
/// The set of models never changes after construction. Mutations are
/// serialized so inverse bookkeeping and event order stay consistent.
///
/// Each mutation stages its own write and every inverse edit it implies,
/// then commits them as one atomic batch. Events are published only after
/// the batch committed; a mutation that fails changes nothing and
/// publishes nothing.
#[derive(Debug)]
pub struct ModelRegistry {
    schema: SchemaDescription,
    relations: RelationTable,
    handles: Vec<Arc<ModelHandle>>,
    database: DatabaseLink,
    write_lock: Mutex<()>,
    watched: Mutex<BTreeSet<ConnectionId>>,
}

impl ModelRegistry {
    /// Build the registry from a schema description.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Schema`] if the relations are inconsistent.
    pub fn from_schema(
        schema: &SchemaDescription,
        database: DatabaseLink,
        options: &RegistryOptions,
    ) -> Result<Self, ModelError> {
        let relations = RelationTable::build(schema)?;
        let handles = schema
            .models()
            .enumerate()
            .map(|(i, (name, _))| {
                Arc::new(ModelHandle::new(
                    name,
                    ModelIndex(i),
                    options.max_connections_per_model,
                ))
            })
            .collect();

        tracing::info!(
            models = relations.len(),
            max_connections_per_model = ?options.max_connections_per_model,
            "Model registry built"
        );

        Ok(Self {
            schema: schema.clone(),
            relations,
            handles,
            database,
            write_lock: Mutex::new(()),
            watched: Mutex::new(BTreeSet::new()),
        })
    }

    /// The schema the registry was built from.
    pub const fn schema(&self) -> &SchemaDescription {
        &self.schema
    }

    /// The relation table.
    pub const fn relations(&self) -> &RelationTable {
        &self.relations
    }

    /// The shared database link.
    pub const fn database(&self) -> &DatabaseLink {
        &self.database
    }

    /// Every model handle, in index order.
    pub fn handles(&self) -> &[Arc<ModelHandle>] {
        &self.handles
    }

    /// The handle for one model.
    pub fn model(&self, name: &str) -> Option<&Arc<ModelHandle>> {
        self.handles.iter().find(|h| h.name() == name)
    }

    /// Model names, in index order.
    pub fn model_names(&self) -> Vec<String> {
        self.handles.iter().map(|h| h.name().to_owned()).collect()
    }

    // =========================================================================
    // Connections
    // =========================================================================

    /// Register a connection with every model.
    ///
    /// Registrations run concurrently; one model's failure never stops the
    /// others. Once registered, the connection is unregistered from every
    /// model automatically when it closes.
    pub async fn register_all(
        self: &Arc<Self>,
        connection: &ConnectionHandle,
        filter: Option<&EventFilter>,
    ) -> RegistrationReport {
        let attempts = self.handles.iter().map(|handle| async move {
            let model_filter = filter.and_then(|f| f.for_model(handle.name()));
            let result = handle.register_connection(connection, model_filter).await;
            (handle.name().to_owned(), result)
        });

        let mut report = RegistrationReport {
            connection: connection.id(),
            registered: Vec::new(),
            failures: Vec::new(),
        };
        for (model, result) in join_all(attempts).await {
            match result {
                Ok(_) => report.registered.push(model),
                Err(source) => {
                    tracing::warn!(
                        connection_id = %connection.id(),
                        model = %model,
                        error = %source,
                        "Model registration failed"
                    );
                    report.failures.push(ModelRegistrationError { model, source });
                }
            }
        }

        self.watch_close(connection).await;
        report
    }

    /// Remove a connection from every model. Returns how many held it.
    pub async fn unregister_all(&self, id: ConnectionId) -> usize {
        let removals = self.handles.iter().map(|h| h.unregister_connection(id));
        join_all(removals).await.into_iter().filter(|removed| *removed).count()
    }

    async fn watch_close(self: &Arc<Self>, connection: &ConnectionHandle) {
        if !self.watched.lock().await.insert(connection.id()) {
            return;
        }

        let registry = Arc::downgrade(self);
        let connection = connection.clone();
        tokio::spawn(async move {
            connection.closed().await;
            let Some(registry) = registry.upgrade() else {
                return;
            };
            let removed = registry.unregister_all(connection.id()).await;
            registry.watched.lock().await.remove(&connection.id());
            tracing::debug!(
                connection_id = %connection.id(),
                models = removed,
                "Closed connection unregistered"
            );
        });
    }

    // =========================================================================
    // Documents
    // =========================================================================

    /// Insert a document and publish `"{Model}:create"`.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownModel`], [`ModelError::InvalidDocument`] for a
    /// non-object body or malformed relation value,
    /// [`ModelError::InvalidReference`] for a missing target, or a database
    /// error.
    pub async fn create(&self, model: &str, body: Value) -> Result<ChangeOutcome, ModelError> {
        let index = self.resolve(model)?;
        let mut body = into_object(body)?;

        let _guard = self.write_lock.lock().await;
        let db = self.database.database().await?;
        self.check_relations(&db, index, &mut body).await?;

        let mut staged = Staged::new(&db);
        let document = Document::new(model, body);
        staged.insert(document.clone());
        self.sync_inverses(&mut staged, index, None, Some(&document)).await?;
        let document = staged.get(model, document.id).await?.unwrap_or(document);
        staged.commit().await?;

        let report = self.publish_change(index, None, Some(&document)).await;
        Ok(ChangeOutcome { document, report })
    }

    /// Merge `patch` into a document and publish `"{Model}:update"`.
    ///
    /// Top-level keys replace existing values; `null` removes a field.
    ///
    /// # Errors
    ///
    /// As [`create`](Self::create), plus [`ModelError::NotFound`].
    pub async fn update(&self, model: &str, id: DocumentId, patch: Value) -> Result<ChangeOutcome, ModelError> {
        let index = self.resolve(model)?;
        let mut patch = into_object(patch)?;

        let _guard = self.write_lock.lock().await;
        let db = self.database.database().await?;
        let before = load(&db, model, id).await?;
        self.check_relations(&db, index, &mut patch).await?;

        let mut after = before.clone();
        apply_patch(&mut after, patch);
        let mut staged = Staged::new(&db);
        staged.replace(after.clone());
        self.sync_inverses(&mut staged, index, Some(&before), Some(&after)).await?;
        let document = staged.get(model, id).await?.unwrap_or(after);
        staged.commit().await?;

        let report = self.publish_change(index, Some(&before), Some(&document)).await;
        Ok(ChangeOutcome { document, report })
    }

    /// Remove a document and publish `"{Model}:delete"`.
    ///
    /// Paired relation fields pointing at the document are cleared.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownModel`], [`ModelError::NotFound`], or a
    /// database error.
    pub async fn delete(&self, model: &str, id: DocumentId) -> Result<ChangeOutcome, ModelError> {
        let index = self.resolve(model)?;

        let _guard = self.write_lock.lock().await;
        let db = self.database.database().await?;
        let document = load(&db, model, id).await?;
        let mut staged = Staged::new(&db);
        staged.delete(model, id);
        self.sync_inverses(&mut staged, index, Some(&document), None).await?;
        staged.commit().await?;

        let report = self.publish_change(index, Some(&document), None).await;
        Ok(ChangeOutcome { document, report })
    }

    /// Fetch one document.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownModel`] or a database error.
    pub async fn find(&self, model: &str, id: DocumentId) -> Result<Option<Document>, ModelError> {
        self.resolve(model)?;
        let db = self.database.database().await?;
        Ok(db.get(model, id).await?)
    }

    /// Every document of one model.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownModel`] or a database error.
    pub async fn list(&self, model: &str) -> Result<Vec<Document>, ModelError> {
        self.resolve(model)?;
        let db = self.database.database().await?;
        Ok(db.list(model).await?)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn resolve(&self, model: &str) -> Result<ModelIndex, ModelError> {
        self.relations
            .index_of(model)
            .ok_or_else(|| ModelError::UnknownModel(model.to_owned()))
    }

    fn name_of(&self, index: ModelIndex) -> &str {
        self.relations.name(index).unwrap_or_default()
    }

    async fn publish_change(
        &self,
        index: ModelIndex,
        before: Option<&Document>,
        after: Option<&Document>,
    ) -> DeliveryReport {
        match ChangePlan::from_states(&self.relations, index, before, after) {
            Some(plan) => fanout::publish(&self.handles, &self.relations, &plan).await,
            None => DeliveryReport::new(ChangeId::new()),
        }
    }

    /// Validate relation values in `body` and normalize collections to
    /// unique id strings.
    async fn check_relations(
        &self,
        db: &Database,
        index: ModelIndex,
        body: &mut Map<String, Value>,
    ) -> Result<(), ModelError> {
        let model = self.name_of(index);
        for relation in self.relations.relations(index) {
            let Some(value) = body.get_mut(&relation.field) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let target = self.name_of(relation.target);
            let field = relation.field.as_str();

            match relation.direction {
                HopDirection::ToOwner => {
                    let id = parse_id(model, field, value)?;
                    ensure_exists(db, model, field, target, id).await?;
                }
                HopDirection::ToMembers => {
                    let items = value.as_array().ok_or_else(|| {
                        ModelError::InvalidDocument(format!("{model}.{field} must be an array of document ids"))
                    })?;
                    let mut ids: Vec<DocumentId> = Vec::with_capacity(items.len());
                    for item in items {
                        let id = parse_id(model, field, item)?;
                        if !ids.contains(&id) {
                            ids.push(id);
                        }
                    }
                    for id in &ids {
                        ensure_exists(db, model, field, target, *id).await?;
                    }
                    *value = id_array(&ids);
                }
            }
        }
        Ok(())
    }

    /// Bring paired relation fields on other documents in line with the
    /// change from `before` to `after`.
    async fn sync_inverses(
        &self,
        staged: &mut Staged<'_>,
        index: ModelIndex,
        before: Option<&Document>,
        after: Option<&Document>,
    ) -> Result<(), ModelError> {
        let Some(id) = after.or(before).map(|d| d.id) else {
            return Ok(());
        };
        let model = self.name_of(index);

        for relation in self.relations.relations(index) {
            let Some(inverse) = relation.inverse.as_deref() else {
                continue;
            };
            let target = self.name_of(relation.target);

            match relation.direction {
                HopDirection::ToOwner => {
                    let old = before.and_then(|d| d.reference(&relation.field));
                    let new = after.and_then(|d| d.reference(&relation.field));
                    if old == new {
                        continue;
                    }
                    if let Some(owner) = old {
                        staged.edit_collection(target, owner, inverse, id, Membership::Remove).await?;
                    }
                    if let Some(owner) = new {
                        staged.edit_collection(target, owner, inverse, id, Membership::Add).await?;
                    }
                }
                HopDirection::ToMembers => {
                    let old: BTreeSet<DocumentId> = before
                        .map(|d| d.collection(&relation.field).into_iter().collect())
                        .unwrap_or_default();
                    let new: BTreeSet<DocumentId> = after
                        .map(|d| d.collection(&relation.field).into_iter().collect())
                        .unwrap_or_default();

                    for member in old.difference(&new) {
                        let Some(doc) = staged.get(target, *member).await? else {
                            continue;
                        };
                        if doc.reference(inverse) == Some(id) {
                            staged.set_reference(doc, inverse, None);
                        }
                    }
                    for member in new.difference(&old) {
                        let Some(doc) = staged.get(target, *member).await? else {
                            continue;
                        };
                        match doc.reference(inverse) {
                            Some(current) if current == id => continue,
                            Some(previous) => {
                                staged
                                    .edit_collection(model, previous, &relation.field, *member, Membership::Remove)
                                    .await?;
                            }
                            None => {}
                        }
                        staged.set_reference(doc, inverse, Some(id));
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Membership {
    Add,
    Remove,
}

fn into_object(value: Value) -> Result<Map<String, Value>, ModelError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ModelError::InvalidDocument(format!(
            "document body must be a JSON object, got {}",
            json_type(&other)
        ))),
    }
}

const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn parse_id(model: &str, field: &str, value: &Value) -> Result<DocumentId, ModelError> {
    value
        .as_str()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ModelError::InvalidDocument(format!("{model}.{field} must hold document ids")))
}

fn id_array(ids: &[DocumentId]) -> Value {
    Value::Array(ids.iter().map(|id| Value::String(id.to_string())).collect())
}

fn apply_patch(document: &mut Document, patch: Map<String, Value>) {
    if let Some(body) = document.body.as_object_mut() {
        for (key, value) in patch {
            if value.is_null() {
                body.remove(&key);
            } else {
                body.insert(key, value);
            }
        }
    }
    document.updated_at = Utc::now();
}

async fn load(db: &Database, model: &str, id: DocumentId) -> Result<Document, ModelError> {
    db.get(model, id).await?.ok_or_else(|| ModelError::NotFound {
        model: model.to_owned(),
        id,
    })
}

async fn ensure_exists(
    db: &Database,
    model: &str,
    field: &str,
    target: &str,
    id: DocumentId,
) -> Result<(), ModelError> {
    if db.get(target, id).await?.is_some() {
        Ok(())
    } else {
        Err(ModelError::InvalidReference {
            model: model.to_owned(),
            field: field.to_owned(),
            id,
        })
    }
}

/// Writes of one mutation, held back until [`commit`](Self::commit).
///
/// Reads go through the pending writes first, so later steps of the same
/// mutation see earlier ones. Nothing reaches the database until the whole
/// batch commits atomically.
struct Staged<'a> {
    db: &'a Database,
    pending: Vec<Pending>,
}

enum Pending {
    Insert(Document),
    Replace(Document),
    Delete { model: String, id: DocumentId },
}

impl Pending {
    fn targets(&self, model: &str, id: DocumentId) -> bool {
        match self {
            Self::Insert(doc) | Self::Replace(doc) => doc.model == model && doc.id == id,
            Self::Delete { model: m, id: i } => m == model && *i == id,
        }
    }
}

impl<'a> Staged<'a> {
    const fn new(db: &'a Database) -> Self {
        Self {
            db,
            pending: Vec::new(),
        }
    }

    async fn get(&self, model: &str, id: DocumentId) -> Result<Option<Document>, ModelError> {
        match self.pending.iter().find(|p| p.targets(model, id)) {
            Some(Pending::Insert(doc) | Pending::Replace(doc)) => Ok(Some(doc.clone())),
            Some(Pending::Delete { .. }) => Ok(None),
            None => Ok(self.db.get(model, id).await?),
        }
    }

    fn insert(&mut self, doc: Document) {
        self.pending.push(Pending::Insert(doc));
    }

    /// Stage `doc` as the new state, keeping an earlier insert an insert.
    fn replace(&mut self, doc: Document) {
        let slot = self.pending.iter_mut().find(|p| p.targets(&doc.model, doc.id));
        match slot {
            Some(Pending::Insert(staged) | Pending::Replace(staged)) => *staged = doc,
            Some(Pending::Delete { .. }) => {}
            None => self.pending.push(Pending::Replace(doc)),
        }
    }

    fn delete(&mut self, model: &str, id: DocumentId) {
        self.pending.retain(|p| !p.targets(model, id));
        self.pending.push(Pending::Delete {
            model: model.to_owned(),
            id,
        });
    }

    async fn edit_collection(
        &mut self,
        model: &str,
        owner: DocumentId,
        field: &str,
        member: DocumentId,
        membership: Membership,
    ) -> Result<(), ModelError> {
        let Some(mut doc) = self.get(model, owner).await? else {
            return Ok(());
        };
        let mut ids = doc.collection(field);
        let present = ids.contains(&member);
        match membership {
            Membership::Add if !present => ids.push(member),
            Membership::Remove if present => ids.retain(|id| *id != member),
            _ => return Ok(()),
        }
        doc.set_field(field, id_array(&ids));
        self.replace(doc);
        Ok(())
    }

    fn set_reference(&mut self, mut doc: Document, field: &str, value: Option<DocumentId>) {
        let value = value.map_or(Value::Null, |id| Value::String(id.to_string()));
        doc.set_field(field, value);
        self.replace(doc);
    }

    async fn commit(self) -> Result<(), ModelError> {
        let writes: Vec<Write> = self
            .pending
            .into_iter()
            .map(|p| match p {
                Pending::Insert(doc) => Write::Insert(doc),
                Pending::Replace(doc) => Write::Replace(doc),
                Pending::Delete { model, id } => Write::Delete { model, id },
            })
            .collect();
        tracing::debug!(writes = writes.len(), "Committing document batch");
        self.db.commit(&writes).await?;
        Ok(())
    }
}
