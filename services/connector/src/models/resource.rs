//! Resource nodes of the selection chain
//!
//! Datasources and tables come from the backend with numeric ids, fields
//! with string ids. Each node exposes a stable identity and a display label.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Stable identity of a resource node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceId {
    Numeric(i64),
    Text(String),
}

impl ResourceId {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ResourceId::Numeric(n) => Some(*n),
            ResourceId::Text(_) => None,
        }
    }
}

impl From<i64> for ResourceId {
    fn from(value: i64) -> Self {
        ResourceId::Numeric(value)
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        ResourceId::Text(value.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(value: String) -> Self {
        ResourceId::Text(value)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Numeric(n) => write!(f, "{}", n),
            ResourceId::Text(s) => f.write_str(s),
        }
    }
}

/// How a table's rows are fetched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Read the table directly
    #[default]
    Table,
    /// Run a custom query
    Sql,
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryMode::Table => f.write_str("table"),
            QueryMode::Sql => f.write_str("sql"),
        }
    }
}

/// The backend sends `""` for unset optional text
fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

/// A datasource the user may read from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datasource {
    pub id: ResourceId,
    pub name: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub description: Option<String>,
}

impl Datasource {
    pub fn label(&self) -> String {
        match &self.description {
            Some(description) => format!("{} ({})", self.name, description),
            None => self.name.clone(),
        }
    }
}

/// A table (or saved query) under a datasource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub id: ResourceId,
    #[serde(rename = "tableName")]
    pub name: String,
    #[serde(rename = "tableAlias", default, deserialize_with = "empty_as_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub query_mode: QueryMode,
    #[serde(rename = "customSql", default, deserialize_with = "empty_as_none")]
    pub custom_query: Option<String>,
}

impl Table {
    /// Bare table reference, as returned by direct connections
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: ResourceId::Text(name.clone()),
            name,
            alias: None,
            query_mode: QueryMode::Table,
            custom_query: None,
        }
    }

    pub fn label(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{} ({})", alias, self.name),
            None => self.name.clone(),
        }
    }
}

/// A column of a table or of a previewed query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub id: ResourceId,
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: String,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub description: Option<String>,
}

/// Dependency levels of the selection chain, upstream first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LevelKind {
    Datasource,
    Table,
    Field,
}

impl fmt::Display for LevelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelKind::Datasource => f.write_str("datasource"),
            LevelKind::Table => f.write_str("table"),
            LevelKind::Field => f.write_str("field"),
        }
    }
}

/// A typed item in the dependency chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceNode {
    Datasource(Datasource),
    Table(Table),
    Field(Field),
}

impl ResourceNode {
    pub fn id(&self) -> &ResourceId {
        match self {
            ResourceNode::Datasource(d) => &d.id,
            ResourceNode::Table(t) => &t.id,
            ResourceNode::Field(f) => &f.id,
        }
    }

    pub fn kind(&self) -> LevelKind {
        match self {
            ResourceNode::Datasource(_) => LevelKind::Datasource,
            ResourceNode::Table(_) => LevelKind::Table,
            ResourceNode::Field(_) => LevelKind::Field,
        }
    }

    pub fn label(&self) -> String {
        match self {
            ResourceNode::Datasource(d) => d.label(),
            ResourceNode::Table(t) => t.label(),
            ResourceNode::Field(f) => f.name.clone(),
        }
    }

    pub fn as_datasource(&self) -> Option<&Datasource> {
        match self {
            ResourceNode::Datasource(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            ResourceNode::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_field(&self) -> Option<&Field> {
        match self {
            ResourceNode::Field(f) => Some(f),
            _ => None,
        }
    }
}

impl From<Datasource> for ResourceNode {
    fn from(value: Datasource) -> Self {
        ResourceNode::Datasource(value)
    }
}

impl From<Table> for ResourceNode {
    fn from(value: Table) -> Self {
        ResourceNode::Table(value)
    }
}

impl From<Field> for ResourceNode {
    fn from(value: Field) -> Self {
        ResourceNode::Field(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_keep_their_wire_form() {
        let numeric: ResourceId = serde_json::from_value(json!(12)).unwrap();
        let text: ResourceId = serde_json::from_value(json!("user_id")).unwrap();
        assert_eq!(numeric, ResourceId::Numeric(12));
        assert_eq!(text, ResourceId::from("user_id"));
        assert_eq!(serde_json::to_value(&numeric).unwrap(), json!(12));
    }

    #[test]
    fn test_table_from_backend_json() {
        let table: Table = serde_json::from_value(json!({
            "id": 3,
            "datasourceId": 1,
            "tableName": "orders",
            "tableAlias": "",
            "queryMode": "sql",
            "customSql": "select * from orders",
            "createdAt": "2025-01-01T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(table.alias, None);
        assert_eq!(table.query_mode, QueryMode::Sql);
        assert_eq!(table.custom_query.as_deref(), Some("select * from orders"));
        assert_eq!(table.label(), "orders");
    }

    #[test]
    fn test_labels() {
        let ds = Datasource {
            id: 1.into(),
            name: "crm".to_string(),
            description: Some("sales".to_string()),
        };
        assert_eq!(ResourceNode::from(ds).label(), "crm (sales)");

        let mut table = Table::named("orders");
        table.alias = Some("订单".to_string());
        assert_eq!(table.label(), "订单 (orders)");
    }
}
