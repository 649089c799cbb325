//! One model's live registrations.

use std::collections::{BTreeMap, BTreeSet};

use livewire_types::{ChangeEvent, ConnectionId};
use tokio::sync::RwLock;

use crate::connection::ConnectionHandle;
use crate::error::RegistrationError;
use crate::fanout::DeliveryReport;
use crate::filter::ModelFilter;
use crate::relation::ModelIndex;

/// What [`ModelHandle::register_connection`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The connection was not registered before.
    Added,
    /// The connection was already registered; its filter was replaced.
    Refreshed,
}

#[derive(Debug)]
struct Registration {
    connection: ConnectionHandle,
    filter: ModelFilter,
}

/// Registration table for one model.
#[derive(Debug)]
pub struct ModelHandle {
    name: String,
    index: ModelIndex,
    max_connections: Option<usize>,
    registrations: RwLock<BTreeMap<ConnectionId, Registration>>,
}

impl ModelHandle {
    /// Create an empty handle.
    pub fn new(name: &str, index: ModelIndex, max_connections: Option<usize>) -> Self {
        Self {
            name: name.to_owned(),
            index,
            max_connections,
            registrations: RwLock::new(BTreeMap::new()),
        }
    }

    /// Model name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position in the registry.
    pub const fn index(&self) -> ModelIndex {
        self.index
    }

    /// Register a connection for this model's events.
    ///
    /// Registering an already registered connection replaces its filter and
    /// never duplicates deliveries. `None` accepts every event.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::ConnectionClosed`] if the connection has closed,
    /// [`RegistrationError::Capacity`] if the model is full.
    pub async fn register_connection(
        &self,
        connection: &ConnectionHandle,
        filter: Option<&ModelFilter>,
    ) -> Result<RegisterOutcome, RegistrationError> {
        if connection.is_closed() {
            return Err(RegistrationError::ConnectionClosed(connection.id()));
        }

        let filter = filter.cloned().unwrap_or_default();
        let mut registrations = self.registrations.write().await;

        if let Some(existing) = registrations.get_mut(&connection.id()) {
            existing.filter = filter;
            return Ok(RegisterOutcome::Refreshed);
        }

        if let Some(limit) = self.max_connections.filter(|limit| registrations.len() >= *limit) {
            return Err(RegistrationError::Capacity { limit });
        }

        registrations.insert(
            connection.id(),
            Registration {
                connection: connection.clone(),
                filter,
            },
        );
        tracing::debug!(
            model = %self.name,
            connection_id = %connection.id(),
            connections = registrations.len(),
            "Connection registered"
        );
        Ok(RegisterOutcome::Added)
    }

    /// Remove a connection. Returns whether it was registered.
    pub async fn unregister_connection(&self, id: ConnectionId) -> bool {
        let removed = self.registrations.write().await.remove(&id).is_some();
        if removed {
            tracing::debug!(model = %self.name, connection_id = %id, "Connection unregistered");
        }
        removed
    }

    /// Whether a connection is registered.
    pub async fn is_registered(&self, id: ConnectionId) -> bool {
        self.registrations.read().await.contains_key(&id)
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.registrations.read().await.len()
    }

    /// Push `event` to every registered connection whose filter accepts it.
    ///
    /// Connections already in `notified` are skipped; a connection is added
    /// to `notified` once the event passed its filter, whether or not the
    /// emit itself succeeded.
    pub(crate) async fn deliver(
        &self,
        event: &ChangeEvent,
        notified: &mut BTreeSet<ConnectionId>,
        report: &mut DeliveryReport,
    ) {
        let registrations = self.registrations.read().await;
        for (id, registration) in registrations.iter() {
            if notified.contains(id) {
                report.suppressed = report.suppressed.saturating_add(1);
                continue;
            }

            let accepted = event.relation.as_ref().map_or_else(
                || registration.filter.allows(event.kind),
                |notice| registration.filter.allows_relation(&notice.field, event.kind),
            );
            if !accepted {
                report.filtered = report.filtered.saturating_add(1);
                continue;
            }

            notified.insert(*id);
            match registration.connection.emit_change(event) {
                Ok(()) => report.delivered = report.delivered.saturating_add(1),
                Err(e) => {
                    report.failed = report.failed.saturating_add(1);
                    tracing::warn!(
                        model = %self.name,
                        connection_id = %id,
                        change_id = %event.change_id,
                        error = %e,
                        "Failed to deliver change event"
                    );
                }
            }
        }
    }
}
