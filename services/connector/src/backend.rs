//! Backend operations used by the configuration workflow
//!
//! Two access styles share one trait. Managed access (`conn == None`) goes
//! through the account-scoped endpoints and relies on the session token. It
//! lists the datasources and tables granted to the user; each table's query
//! and field mappings stay on the server. Direct access sends a
//! [`ConnectionProfile`] with every call and the backend connects to that
//! database on the caller's behalf. Fields and query previews only exist
//! for direct access.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    error::WorkflowResult,
    gateway::ApiClient,
    models::{
        ConnectionProfile, Datasource, Field, LoginGrant, QueryMode, ResourceId, Table, UserInfo,
    },
    session::Authenticator,
};

/// Remote operations the workflow depends on
#[async_trait]
pub trait Backend: Authenticator {
    /// Datasources visible to the user, or databases on the direct connection
    async fn list_datasources(
        &self,
        conn: Option<&ConnectionProfile>,
    ) -> WorkflowResult<Vec<Datasource>>;

    /// Tables under a datasource
    async fn list_tables(
        &self,
        conn: Option<&ConnectionProfile>,
        datasource: &Datasource,
    ) -> WorkflowResult<Vec<Table>>;

    /// Columns of a table on a direct connection
    async fn list_fields(
        &self,
        conn: &ConnectionProfile,
        datasource: &Datasource,
        table: &Table,
    ) -> WorkflowResult<Vec<Field>>;

    /// Run a custom query on a direct connection and return its fields
    async fn preview_query(
        &self,
        conn: &ConnectionProfile,
        datasource: &Datasource,
        query: &str,
    ) -> WorkflowResult<Vec<Field>>;
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Body of the direct-connection calls
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DirectRequest<'a> {
    host: &'a str,
    port: u16,
    username: &'a str,
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    table: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    query_mode: Option<QueryMode>,
    #[serde(rename = "customSQL", skip_serializing_if = "Option::is_none")]
    custom_query: Option<&'a str>,
}

impl<'a> DirectRequest<'a> {
    fn new(conn: &'a ConnectionProfile) -> Self {
        Self {
            host: &conn.host,
            port: conn.port,
            username: &conn.username,
            password: &conn.password,
            database: None,
            table: None,
            query_mode: None,
            custom_query: None,
        }
    }

    fn database(mut self, database: &'a str) -> Self {
        self.database = Some(database);
        self
    }

    fn table(mut self, table: &'a str) -> Self {
        self.table = Some(table);
        self
    }

    fn custom_query(mut self, query: &'a str) -> Self {
        self.query_mode = Some(QueryMode::Sql);
        self.custom_query = Some(query);
        self
    }
}

/// Backend reached over HTTP through the gateway client
#[derive(Clone)]
pub struct HttpBackend {
    client: ApiClient,
}

impl HttpBackend {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Fetch the user behind the current session token
    pub async fn current_user(&self) -> WorkflowResult<UserInfo> {
        self.client.get("/api/auth/current", &[]).await
    }
}

#[async_trait]
impl Authenticator for HttpBackend {
    async fn authenticate(&self, username: &str, password: &str) -> WorkflowResult<LoginGrant> {
        self.client
            .post("/api/auth/login", &LoginRequest { username, password })
            .await
    }

    async fn revoke(&self, _token: &str) -> WorkflowResult<()> {
        let _: serde_json::Value = self
            .client
            .post("/api/auth/logout", &serde_json::json!({}))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn list_datasources(
        &self,
        conn: Option<&ConnectionProfile>,
    ) -> WorkflowResult<Vec<Datasource>> {
        let datasources = match conn {
            None => self.client.get_list("/api/user/datasources", &[]).await?,
            Some(conn) => {
                let names: Vec<String> = self
                    .client
                    .post_list("/api/databases", &DirectRequest::new(conn))
                    .await?;
                names
                    .into_iter()
                    .map(|name| Datasource {
                        id: ResourceId::Text(name.clone()),
                        name,
                        description: None,
                    })
                    .collect()
            }
        };

        info!("Loaded {} datasources", datasources.len());
        Ok(datasources)
    }

    async fn list_tables(
        &self,
        conn: Option<&ConnectionProfile>,
        datasource: &Datasource,
    ) -> WorkflowResult<Vec<Table>> {
        let tables: Vec<Table> = match conn {
            None => {
                let path = format!("/api/user/datasources/{}/tables", datasource.id);
                self.client.get_list(&path, &[]).await?
            }
            Some(conn) => {
                let names: Vec<String> = self
                    .client
                    .post_list(
                        "/api/tables",
                        &DirectRequest::new(conn).database(&datasource.name),
                    )
                    .await?;
                names.into_iter().map(Table::named).collect()
            }
        };

        debug!("Datasource {} has {} tables", datasource.id, tables.len());
        Ok(tables)
    }

    async fn list_fields(
        &self,
        conn: &ConnectionProfile,
        datasource: &Datasource,
        table: &Table,
    ) -> WorkflowResult<Vec<Field>> {
        let fields: Vec<Field> = self
            .client
            .post_list(
                "/api/fields",
                &DirectRequest::new(conn)
                    .database(&datasource.name)
                    .table(&table.name),
            )
            .await?;

        debug!("Table {} has {} fields", table.name, fields.len());
        Ok(fields)
    }

    async fn preview_query(
        &self,
        conn: &ConnectionProfile,
        datasource: &Datasource,
        query: &str,
    ) -> WorkflowResult<Vec<Field>> {
        let fields: Vec<Field> = self
            .client
            .post_list(
                "/api/preview_sql",
                &DirectRequest::new(conn)
                    .database(&datasource.name)
                    .custom_query(query),
            )
            .await?;

        info!("Query preview returned {} fields", fields.len());
        Ok(fields)
    }
}
