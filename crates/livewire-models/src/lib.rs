//! Model registry and change fan-out for the Livewire application core.
//!
//! The registry is built once from a [`SchemaDescription`] and holds one
//! [`ModelHandle`] per entity. Every live real-time connection is
//! registered with every handle; each document mutation is published as
//! one logical change to the mutated model's subscribers and, one hop
//! away, to subscribers of models whose relation fields it touches.
//!
//! # Fan-out
//!
//! ```text
//! registry.update("Photo", id, {"album": B})
//!     |
//!     +-- Photo handle  --> "Photo:update"  (primary)
//!     +-- Album handle  --> "Album:photos"  (hop, owners [A, B])
//!
//! a connection registered with both handles receives one event
//! ```
//!
//! # Modules
//!
//! - [`schema`] -- Model and field descriptions
//! - [`relation`] -- Index-based relation table
//! - [`connection`] -- Connection handles and close signals
//! - [`filter`] -- Per-connection event filters
//! - [`handle`] -- Per-model registration tables
//! - [`fanout`] -- Change plans, publishing, delivery reports
//! - [`registry`] -- The registry and document mutations
//! - [`error`] -- Error types

pub mod connection;
pub mod error;
pub mod fanout;
pub mod filter;
pub mod handle;
pub mod registry;
pub mod relation;
pub mod schema;

pub use connection::{ChannelSink, CloseSignal, ConnectionHandle, ConnectionSink, EmitError};
pub use error::{ModelError, ModelRegistrationError, RegistrationError};
pub use fanout::{ChangePlan, DeliveryReport, Hop};
pub use filter::{EventFilter, ModelFilter};
pub use handle::{ModelHandle, RegisterOutcome};
pub use registry::{ChangeOutcome, ModelRegistry, RegistrationReport, RegistryOptions};
pub use relation::{ModelIndex, Relation, RelationTable};
pub use schema::{FieldSpec, ModelSchema, ScalarType, SchemaDescription};
