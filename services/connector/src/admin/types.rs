//! Wire types of the admin console API

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{FieldMapping, QueryMode, UserInfo};

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub list: Vec<T>,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub page: i64,
    #[serde(default)]
    pub page_size: i64,
}

/// Paging and filter parameters shared by the list endpoints
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub keyword: Option<String>,
    pub role: Option<String>,
    pub status: Option<String>,
}

impl ListQuery {
    pub fn page(page: u32, page_size: u32) -> Self {
        Self {
            page: Some(page),
            page_size: Some(page_size),
            ..Self::default()
        }
    }

    pub fn keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }

    pub(crate) fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(page) = self.page {
            params.push(("page", page.to_string()));
        }
        if let Some(page_size) = self.page_size {
            params.push(("pageSize", page_size.to_string()));
        }
        push_text(&mut params, "keyword", &self.keyword);
        push_text(&mut params, "role", &self.role);
        push_text(&mut params, "status", &self.status);
        params
    }
}

/// Filters for the operation log listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogQuery {
    pub level: Option<String>,
    pub module: Option<String>,
    pub action: Option<String>,
    pub keyword: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl LogQuery {
    pub(crate) fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        push_text(&mut params, "level", &self.level);
        push_text(&mut params, "module", &self.module);
        push_text(&mut params, "action", &self.action);
        push_text(&mut params, "keyword", &self.keyword);
        push_text(&mut params, "startTime", &self.start_time);
        push_text(&mut params, "endTime", &self.end_time);
        if let Some(page) = self.page {
            params.push(("page", page.to_string()));
        }
        if let Some(page_size) = self.page_size {
            params.push(("pageSize", page_size.to_string()));
        }
        params
    }
}

fn push_text(params: &mut Vec<(&'static str, String)>, name: &'static str, value: &Option<String>) {
    if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
        params.push((name, value.to_string()));
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    pub role: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub display_name: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// A datasource as administered; the password is write-only
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedDatasource {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub host: String,
    pub port: u16,
    pub database_name: String,
    pub username: String,
    #[serde(default)]
    pub created_by: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceRequest {
    pub name: String,
    pub description: String,
    pub host: String,
    pub port: u16,
    pub database_name: String,
    pub username: String,
    /// Empty on update keeps the stored password
    pub password: String,
}

/// A table registered under a datasource
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedTable {
    pub id: i64,
    pub datasource_id: i64,
    pub table_name: String,
    #[serde(default)]
    pub table_alias: String,
    #[serde(default)]
    pub query_mode: QueryMode,
    #[serde(default)]
    pub custom_sql: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTableRequest {
    pub table_name: String,
    pub table_alias: String,
    pub query_mode: QueryMode,
    pub custom_sql: String,
    pub field_mappings: Vec<FieldMapping>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCreateTablesRequest {
    pub table_names: Vec<String>,
    pub query_mode: QueryMode,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTableRequest {
    pub table_alias: String,
    pub query_mode: QueryMode,
    pub custom_sql: String,
    pub field_mappings: Vec<FieldMapping>,
}

/// A stored field alias of a registered table
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFieldMapping {
    pub id: i64,
    pub datasource_table_id: i64,
    pub field_name: String,
    #[serde(default)]
    pub field_alias: String,
    #[serde(default)]
    pub enabled: bool,
}

impl StoredFieldMapping {
    pub fn to_mapping(&self) -> FieldMapping {
        let alias = if self.field_alias.is_empty() {
            self.field_name.clone()
        } else {
            self.field_alias.clone()
        };
        FieldMapping {
            source_field: self.field_name.clone(),
            display_alias: alias,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourcePermission {
    #[serde(flatten)]
    pub datasource: ManagedDatasource,
    #[serde(default)]
    pub has_permission: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TablePermission {
    #[serde(flatten)]
    pub table: ManagedTable,
    #[serde(default)]
    pub has_permission: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DatasourceIds<'a> {
    pub datasource_ids: &'a [i64],
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TableIds<'a> {
    pub table_ids: &'a [i64],
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: i64,
    pub level: String,
    pub module: String,
    pub action: String,
    pub message: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub user_agent: String,
    /// Milliseconds
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStats {
    #[serde(default)]
    pub total_count: i64,
    #[serde(default)]
    pub today_count: i64,
    #[serde(default)]
    pub error_count: i64,
    #[serde(default)]
    pub level_counts: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SystemInfo {
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Affected {
    #[serde(default)]
    pub affected: i64,
}

/// Users are reported with the same shape as the login payload
pub type ManagedUser = UserInfo;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_list_query_params_skip_unset() {
        let params = ListQuery::page(2, 20).keyword("ali").to_params();
        assert_eq!(
            params,
            vec![
                ("page", "2".to_string()),
                ("pageSize", "20".to_string()),
                ("keyword", "ali".to_string()),
            ]
        );
        assert!(ListQuery::default().to_params().is_empty());
    }

    #[test]
    fn test_permission_listing_decodes_flattened_rows() {
        let row: TablePermission = serde_json::from_value(json!({
            "id": 9,
            "datasourceId": 1,
            "tableName": "orders",
            "tableAlias": "订单",
            "queryMode": "sql",
            "customSql": "select * from orders",
            "createdAt": "2024-01-01T00:00:00Z",
            "hasPermission": true
        }))
        .unwrap();

        assert!(row.has_permission);
        assert_eq!(row.table.query_mode, QueryMode::Sql);
        assert_eq!(row.table.table_alias, "订单");
    }

    #[test]
    fn test_stored_mapping_falls_back_to_field_name() {
        let stored = StoredFieldMapping {
            id: 1,
            datasource_table_id: 9,
            field_name: "amount".to_string(),
            field_alias: String::new(),
            enabled: true,
        };
        assert_eq!(stored.to_mapping().display_alias, "amount");
    }
}
