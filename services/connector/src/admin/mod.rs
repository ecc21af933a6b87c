//! Admin console API client
//!
//! Typed wrappers for the `/admin/api` endpoints: users, datasources,
//! registered tables and their field aliases, permission grants and the
//! operation log. Every call goes through [`ApiClient`], so the admin
//! session token, cache headers and expiry policy apply unchanged.

pub mod types;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use crate::{
    error::WorkflowResult,
    gateway::ApiClient,
    models::{Field, FieldMapping, LoginGrant},
    session::Authenticator,
};

pub use types::{
    BatchCreateTablesRequest, ChangePasswordRequest, CreateTableRequest, CreateUserRequest,
    DatasourcePermission, DatasourceRequest, ListQuery, LogEntry, LogQuery, LogStats,
    ManagedDatasource, ManagedTable, ManagedUser, Page, StoredFieldMapping, SystemInfo,
    TablePermission, UpdateTableRequest, UpdateUserRequest,
};
use types::{Affected, DatasourceIds, TableIds};

/// Client for the admin console endpoints
#[derive(Clone)]
pub struct AdminApi {
    client: ApiClient,
}

impl AdminApi {
    /// `client` must be rooted at the admin base path
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    // Account

    pub async fn current_user(&self) -> WorkflowResult<ManagedUser> {
        self.client.get("/user/current", &[]).await
    }

    pub async fn change_password(&self, request: &ChangePasswordRequest) -> WorkflowResult<()> {
        let _: Value = self.client.post("/user/password", request).await?;
        info!("Admin password changed");
        Ok(())
    }

    // Users

    pub async fn list_users(&self, query: &ListQuery) -> WorkflowResult<Page<ManagedUser>> {
        self.client.get("/users", &query.to_params()).await
    }

    pub async fn get_user(&self, id: i64) -> WorkflowResult<ManagedUser> {
        self.client.get(&format!("/users/{}", id), &[]).await
    }

    pub async fn create_user(&self, request: &CreateUserRequest) -> WorkflowResult<ManagedUser> {
        let user: ManagedUser = self.client.post("/users", request).await?;
        info!("Created user {} ({})", user.username, user.id);
        Ok(user)
    }

    pub async fn update_user(&self, id: i64, request: &UpdateUserRequest) -> WorkflowResult<()> {
        self.client.put(&format!("/users/{}", id), request).await
    }

    pub async fn delete_user(&self, id: i64) -> WorkflowResult<()> {
        self.client.delete(&format!("/users/{}", id)).await?;
        info!("Deleted user {}", id);
        Ok(())
    }

    /// `status` is `active` or `disabled`
    pub async fn update_user_status(&self, id: i64, status: &str) -> WorkflowResult<()> {
        self.client
            .put(&format!("/users/{}/status", id), &json!({ "status": status }))
            .await
    }

    pub async fn reset_password(&self, id: i64, new_password: &str) -> WorkflowResult<()> {
        self.client
            .put(
                &format!("/users/{}/password", id),
                &json!({ "newPassword": new_password }),
            )
            .await
    }

    // Datasources

    pub async fn list_datasources(
        &self,
        query: &ListQuery,
    ) -> WorkflowResult<Page<ManagedDatasource>> {
        self.client.get("/datasources", &query.to_params()).await
    }

    pub async fn get_datasource(&self, id: i64) -> WorkflowResult<ManagedDatasource> {
        self.client.get(&format!("/datasources/{}", id), &[]).await
    }

    pub async fn create_datasource(
        &self,
        request: &DatasourceRequest,
    ) -> WorkflowResult<ManagedDatasource> {
        let datasource: ManagedDatasource = self.client.post("/datasources", request).await?;
        info!("Created datasource {} ({})", datasource.name, datasource.id);
        Ok(datasource)
    }

    pub async fn update_datasource(
        &self,
        id: i64,
        request: &DatasourceRequest,
    ) -> WorkflowResult<()> {
        self.client.put(&format!("/datasources/{}", id), request).await
    }

    pub async fn delete_datasource(&self, id: i64) -> WorkflowResult<()> {
        self.client.delete(&format!("/datasources/{}", id)).await?;
        info!("Deleted datasource {}", id);
        Ok(())
    }

    /// Ask the backend to connect with the stored settings
    pub async fn test_connection(&self, id: i64) -> WorkflowResult<()> {
        let _: Value = self
            .client
            .post(&format!("/datasources/{}/test", id), &json!({}))
            .await?;
        Ok(())
    }

    /// Databases reachable with the datasource's credentials
    pub async fn list_databases(&self, id: i64) -> WorkflowResult<Vec<String>> {
        self.client
            .get_list(&format!("/datasources/{}/databases", id), &[])
            .await
    }

    /// Physical tables in one of the datasource's databases
    pub async fn list_db_tables(&self, id: i64, database: &str) -> WorkflowResult<Vec<String>> {
        self.client
            .get_list(
                &format!("/datasources/{}/db-tables", id),
                &[("database", database.to_string())],
            )
            .await
    }

    /// Physical columns of a table
    pub async fn list_db_fields(
        &self,
        id: i64,
        database: &str,
        table: &str,
    ) -> WorkflowResult<Vec<Field>> {
        self.client
            .get_list(
                &format!("/datasources/{}/db-fields", id),
                &[
                    ("database", database.to_string()),
                    ("table", table.to_string()),
                ],
            )
            .await
    }

    /// Columns produced by a custom query
    pub async fn list_db_fields_from_query(
        &self,
        id: i64,
        database: &str,
        query: &str,
    ) -> WorkflowResult<Vec<Field>> {
        self.client
            .post_list(
                &format!("/datasources/{}/db-fields-from-sql", id),
                &json!({ "database": database, "customSql": query }),
            )
            .await
    }

    // Registered tables

    pub async fn list_tables(&self, datasource_id: i64) -> WorkflowResult<Vec<ManagedTable>> {
        self.client
            .get_list(&format!("/datasources/{}/tables", datasource_id), &[])
            .await
    }

    pub async fn create_table(
        &self,
        datasource_id: i64,
        request: &CreateTableRequest,
    ) -> WorkflowResult<ManagedTable> {
        self.client
            .post(&format!("/datasources/{}/tables", datasource_id), request)
            .await
    }

    pub async fn batch_create_tables(
        &self,
        datasource_id: i64,
        request: &BatchCreateTablesRequest,
    ) -> WorkflowResult<Vec<ManagedTable>> {
        self.client
            .post_list(
                &format!("/datasources/{}/tables/batch", datasource_id),
                request,
            )
            .await
    }

    pub async fn get_table(&self, id: i64) -> WorkflowResult<ManagedTable> {
        self.client
            .get(&format!("/datasource-tables/{}", id), &[])
            .await
    }

    pub async fn update_table(&self, id: i64, request: &UpdateTableRequest) -> WorkflowResult<()> {
        self.client
            .put(&format!("/datasource-tables/{}", id), request)
            .await
    }

    pub async fn delete_table(&self, id: i64) -> WorkflowResult<()> {
        self.client
            .delete(&format!("/datasource-tables/{}", id))
            .await
    }

    pub async fn field_mappings(&self, table_id: i64) -> WorkflowResult<Vec<StoredFieldMapping>> {
        self.client
            .get_list(&format!("/datasource-tables/{}/fields", table_id), &[])
            .await
    }

    pub async fn update_field_mappings(
        &self,
        table_id: i64,
        mappings: &[FieldMapping],
    ) -> WorkflowResult<()> {
        let _: Value = self
            .client
            .post(
                &format!("/datasource-tables/{}/fields", table_id),
                &json!({ "fieldMappings": mappings }),
            )
            .await?;
        Ok(())
    }

    // Permissions

    pub async fn grant_datasources(
        &self,
        user_id: i64,
        datasource_ids: &[i64],
    ) -> WorkflowResult<()> {
        let _: Value = self
            .client
            .post(
                &format!("/users/{}/datasources", user_id),
                &DatasourceIds { datasource_ids },
            )
            .await?;
        info!(
            "Granted {} datasources to user {}",
            datasource_ids.len(),
            user_id
        );
        Ok(())
    }

    pub async fn revoke_datasource(&self, user_id: i64, datasource_id: i64) -> WorkflowResult<()> {
        self.client
            .delete(&format!("/users/{}/datasources/{}", user_id, datasource_id))
            .await
    }

    pub async fn user_datasources(&self, user_id: i64) -> WorkflowResult<Vec<ManagedDatasource>> {
        self.client
            .get_list(&format!("/users/{}/datasources", user_id), &[])
            .await
    }

    /// Every datasource, flagged with whether the user may use it
    pub async fn datasources_with_permission(
        &self,
        user_id: i64,
    ) -> WorkflowResult<Vec<DatasourcePermission>> {
        self.client
            .get_list(
                &format!("/users/{}/datasources-with-permission", user_id),
                &[],
            )
            .await
    }

    pub async fn grant_tables(&self, user_id: i64, table_ids: &[i64]) -> WorkflowResult<()> {
        let _: Value = self
            .client
            .post(&format!("/users/{}/tables", user_id), &TableIds { table_ids })
            .await?;
        info!("Granted {} tables to user {}", table_ids.len(), user_id);
        Ok(())
    }

    pub async fn revoke_table(&self, user_id: i64, table_id: i64) -> WorkflowResult<()> {
        self.client
            .delete(&format!("/users/{}/tables/{}", user_id, table_id))
            .await
    }

    pub async fn user_tables(
        &self,
        user_id: i64,
        datasource_id: Option<i64>,
    ) -> WorkflowResult<Vec<ManagedTable>> {
        let query = datasource_param(datasource_id);
        self.client
            .get_list(&format!("/users/{}/tables", user_id), &query)
            .await
    }

    /// Tables, flagged with whether the user may use them
    pub async fn tables_with_permission(
        &self,
        user_id: i64,
        datasource_id: Option<i64>,
    ) -> WorkflowResult<Vec<TablePermission>> {
        let query = datasource_param(datasource_id);
        self.client
            .get_list(&format!("/users/{}/tables-with-permission", user_id), &query)
            .await
    }

    // Operation log

    pub async fn logs(&self, query: &LogQuery) -> WorkflowResult<Page<LogEntry>> {
        self.client.get("/logs", &query.to_params()).await
    }

    pub async fn log_stats(&self) -> WorkflowResult<LogStats> {
        self.client.get("/logs/stats", &[]).await
    }

    /// Delete log entries older than `days`, returning how many were removed
    pub async fn clean_logs(&self, days: u32) -> WorkflowResult<i64> {
        let result: Affected = self
            .client
            .post("/logs/clean", &json!({ "days": days }))
            .await?;
        info!("Cleaned {} log entries older than {} days", result.affected, days);
        Ok(result.affected)
    }

    pub async fn system_info(&self) -> WorkflowResult<SystemInfo> {
        self.client.get("/system/info", &[]).await
    }
}

fn datasource_param(datasource_id: Option<i64>) -> Vec<(&'static str, String)> {
    datasource_id
        .map(|id| vec![("datasourceId", id.to_string())])
        .unwrap_or_default()
}

#[async_trait]
impl Authenticator for AdminApi {
    async fn authenticate(&self, username: &str, password: &str) -> WorkflowResult<LoginGrant> {
        self.client
            .post(
                "/login",
                &json!({ "username": username, "password": password }),
            )
            .await
    }

    async fn revoke(&self, _token: &str) -> WorkflowResult<()> {
        let _: Value = self.client.post("/logout", &json!({})).await?;
        Ok(())
    }
}
