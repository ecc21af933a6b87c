//! Connector workflow models

pub mod connection;
pub mod draft;
pub mod mapping;
pub mod resource;
pub mod session;

// Re-export for convenience
pub use connection::{ConnectionHistory, ConnectionProfile};
pub use draft::ConfigurationDraft;
pub use mapping::{FieldMapping, FieldMappings};
pub use resource::{Datasource, Field, LevelKind, QueryMode, ResourceId, ResourceNode, Table};
pub use session::{LoginGrant, Session, UserInfo};
