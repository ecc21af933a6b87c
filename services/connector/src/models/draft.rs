//! Configuration draft handed to the host platform

use serde::Serialize;
use serde_json::Value;

use super::{
    connection::ConnectionProfile,
    mapping::FieldMapping,
    resource::{QueryMode, ResourceId},
};

/// The assembled configuration, shaped by query mode
///
/// Serialized for the host as
/// `{queryMode, datasourceId, tableId?, table?, customSQL?, fieldMappings, host?, port?, ...}`.
///
/// A managed table always carries its `tableId` so the server can resolve
/// the stored query and field mappings; its `fieldMappings` are empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "queryMode", rename_all = "lowercase")]
pub enum ConfigurationDraft {
    #[serde(rename_all = "camelCase")]
    Table {
        datasource_id: ResourceId,
        table_id: ResourceId,
        #[serde(rename = "table")]
        table_name: String,
        field_mappings: Vec<FieldMapping>,
        #[serde(flatten)]
        connection: Option<ConnectionProfile>,
    },
    #[serde(rename_all = "camelCase")]
    Sql {
        datasource_id: ResourceId,
        /// Set when the query is one saved on a managed table
        #[serde(skip_serializing_if = "Option::is_none")]
        table_id: Option<ResourceId>,
        #[serde(rename = "customSQL")]
        custom_query: String,
        field_mappings: Vec<FieldMapping>,
        #[serde(flatten)]
        connection: Option<ConnectionProfile>,
    },
}

impl ConfigurationDraft {
    pub fn query_mode(&self) -> QueryMode {
        match self {
            ConfigurationDraft::Table { .. } => QueryMode::Table,
            ConfigurationDraft::Sql { .. } => QueryMode::Sql,
        }
    }

    pub fn datasource_id(&self) -> &ResourceId {
        match self {
            ConfigurationDraft::Table { datasource_id, .. }
            | ConfigurationDraft::Sql { datasource_id, .. } => datasource_id,
        }
    }

    pub fn table_id(&self) -> Option<&ResourceId> {
        match self {
            ConfigurationDraft::Table { table_id, .. } => Some(table_id),
            ConfigurationDraft::Sql { table_id, .. } => table_id.as_ref(),
        }
    }

    pub fn field_mappings(&self) -> &[FieldMapping] {
        match self {
            ConfigurationDraft::Table { field_mappings, .. }
            | ConfigurationDraft::Sql { field_mappings, .. } => field_mappings,
        }
    }

    /// JSON payload passed to the host's commit call
    pub fn to_payload(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}
