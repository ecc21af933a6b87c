use std::sync::Arc;
use std::time::Duration;

use common::storage::{DurableStorage, MemoryStorage, NamespacedStorage};
use connector::{
    AdminApi, ApiClient, Backend, HttpBackend, SessionStore, SystemClock, WorkflowError,
    admin::ListQuery,
    models::{ConnectionProfile, Datasource, Table},
};
use mockito::{Matcher, Server, ServerGuard};
use serde_json::{Value, json};

// 2100-01-01
const FAR_FUTURE: i64 = 4_102_444_800;

fn envelope(code: i64, msg: &str, data: Value) -> String {
    json!({ "code": code, "msg": msg, "data": data }).to_string()
}

fn session(storage: &Arc<MemoryStorage>, prefix: &str) -> SessionStore {
    SessionStore::new(
        NamespacedStorage::new(storage.clone(), prefix),
        Arc::new(SystemClock),
    )
    .unwrap()
}

async fn logged_in_backend(
    server: &mut ServerGuard,
) -> (HttpBackend, SessionStore, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let session = session(&storage, "feishu_user_");
    let client = ApiClient::new(
        format!("{}/feishu", server.url()),
        Duration::from_secs(5),
        Some(session.clone()),
    )
    .unwrap();
    let backend = HttpBackend::new(client);

    let login = server
        .mock("POST", "/feishu/api/auth/login")
        .match_body(Matcher::Json(json!({"username": "alice", "password": "pw1"})))
        .with_header("content-type", "application/json")
        .with_body(envelope(
            0,
            "",
            json!({
                "token": "token-alice",
                "expiresAt": FAR_FUTURE,
                "user": {"id": 7, "username": "alice", "displayName": "Alice", "role": "user"}
            }),
        ))
        .create_async()
        .await;

    session.login(&backend, "alice", "pw1").await.unwrap();
    login.assert_async().await;

    (backend, session, storage)
}

#[tokio::test]
async fn test_reads_carry_token_cache_headers_and_timestamp() {
    let mut server = Server::new_async().await;
    let (backend, session, _) = logged_in_backend(&mut server).await;
    assert_eq!(session.subject_name().as_deref(), Some("Alice"));

    let mock = server
        .mock("GET", Matcher::Regex(r"^/feishu/api/user/datasources".to_string()))
        .match_header("authorization", "Bearer token-alice")
        .match_header("cache-control", "no-cache, no-store, must-revalidate")
        .match_header("pragma", "no-cache")
        .match_header("expires", "0")
        .match_query(Matcher::Regex(r"_t=\d+".to_string()))
        .with_header("content-type", "application/json")
        .with_body(envelope(
            0,
            "success",
            json!([
                {"id": 1, "name": "crm", "description": "客户"},
                {"id": 2, "name": "sales", "description": ""}
            ]),
        ))
        .create_async()
        .await;

    let datasources = backend.list_datasources(None).await.unwrap();
    mock.assert_async().await;

    assert_eq!(datasources.len(), 2);
    assert_eq!(datasources[0].label(), "crm (客户)");
    assert_eq!(datasources[1].description, None);
}

#[tokio::test]
async fn test_direct_fields_post_connection_without_timestamp() {
    let mut server = Server::new_async().await;
    let (backend, _, _) = logged_in_backend(&mut server).await;
    let conn = ConnectionProfile::new("db.local", 3306, "reader", "secret");

    let mock = server
        .mock("POST", "/feishu/api/fields")
        .match_header("authorization", "Bearer token-alice")
        .match_query(Matcher::Missing)
        .match_body(Matcher::PartialJson(json!({
            "host": "db.local",
            "database": "crm",
            "table": "orders"
        })))
        .with_header("content-type", "application/json")
        .with_body(envelope(
            0,
            "",
            json!([{
                "id": "amount", "name": "amount", "type": "decimal",
                "isPrimary": false, "description": "金额"
            }]),
        ))
        .create_async()
        .await;

    let datasource = Datasource {
        id: "crm".into(),
        name: "crm".to_string(),
        description: None,
    };
    let table = Table::named("orders");
    let fields = backend.list_fields(&conn, &datasource, &table).await.unwrap();
    mock.assert_async().await;

    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0].description.as_deref(), Some("金额"));
}

#[tokio::test]
async fn test_expired_code_logs_out() {
    let mut server = Server::new_async().await;
    let (backend, session, storage) = logged_in_backend(&mut server).await;
    assert!(!storage.is_empty());

    let mock = server
        .mock("GET", Matcher::Regex(r"^/feishu/api/user/datasources/1/tables".to_string()))
        .with_header("content-type", "application/json")
        .with_body(envelope(10004, "登录已过期", Value::Null))
        .create_async()
        .await;

    let datasource = Datasource {
        id: 1.into(),
        name: "crm".to_string(),
        description: None,
    };
    let err = backend.list_tables(None, &datasource).await.unwrap_err();
    mock.assert_async().await;

    assert_eq!(err, WorkflowError::Auth("登录已过期".to_string()));
    assert!(!session.is_active());
    assert_eq!(storage.get("feishu_user_token").unwrap(), None);
}

#[tokio::test]
async fn test_error_envelopes_and_bad_bodies() {
    let mut server = Server::new_async().await;
    let (backend, session, _) = logged_in_backend(&mut server).await;
    let conn = ConnectionProfile::new("db.local", 3306, "reader", "secret");

    let failing = server
        .mock("POST", "/feishu/api/databases")
        .match_body(Matcher::PartialJson(json!({"host": "db.local", "port": 3306})))
        .with_header("content-type", "application/json")
        .with_body(envelope(10005, "获取数据库列表失败", Value::Null))
        .create_async()
        .await;

    let err = backend.list_datasources(Some(&conn)).await.unwrap_err();
    failing.assert_async().await;
    assert_eq!(
        err,
        WorkflowError::Api {
            code: 10005,
            message: "获取数据库列表失败".to_string()
        }
    );
    assert!(session.is_active());

    let gateway_error = server
        .mock("POST", "/feishu/api/tables")
        .with_status(502)
        .with_body("<html>Bad Gateway</html>")
        .create_async()
        .await;

    let datasource = Datasource {
        id: "sales".into(),
        name: "sales".to_string(),
        description: None,
    };
    let err = backend.list_tables(Some(&conn), &datasource).await.unwrap_err();
    gateway_error.assert_async().await;
    assert!(matches!(err, WorkflowError::Transport(_)));
}

#[tokio::test]
async fn test_direct_lists_map_names_and_null_data() {
    let mut server = Server::new_async().await;
    let (backend, _, _) = logged_in_backend(&mut server).await;
    let conn = ConnectionProfile::new("db.local", 3306, "reader", "secret");

    let databases = server
        .mock("POST", "/feishu/api/databases")
        .with_header("content-type", "application/json")
        .with_body(envelope(0, "", json!(["crm", "sales"])))
        .create_async()
        .await;
    let tables = server
        .mock("POST", "/feishu/api/tables")
        .match_body(Matcher::PartialJson(json!({"database": "sales"})))
        .with_header("content-type", "application/json")
        .with_body(envelope(0, "", Value::Null))
        .create_async()
        .await;

    let datasources = backend.list_datasources(Some(&conn)).await.unwrap();
    assert_eq!(datasources[1].id, "sales".into());

    let listed = backend.list_tables(Some(&conn), &datasources[1]).await.unwrap();
    assert!(listed.is_empty());

    databases.assert_async().await;
    tables.assert_async().await;
}

#[tokio::test]
async fn test_admin_login_and_listing() {
    let mut server = Server::new_async().await;
    let storage = Arc::new(MemoryStorage::new());
    let session = session(&storage, "admin_");
    let client = ApiClient::new(
        format!("{}/admin/api", server.url()),
        Duration::from_secs(5),
        Some(session.clone()),
    )
    .unwrap();
    let api = AdminApi::new(client);

    let login = server
        .mock("POST", "/admin/api/login")
        .with_header("content-type", "application/json")
        .with_body(envelope(0, "", json!({"token": "admin-token", "expiresAt": FAR_FUTURE})))
        .create_async()
        .await;
    let list = server
        .mock("GET", Matcher::Regex(r"^/admin/api/datasources".to_string()))
        .match_header("authorization", "Bearer admin-token")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("page".to_string(), "1".to_string()),
            Matcher::UrlEncoded("pageSize".to_string(), "20".to_string()),
            Matcher::Regex(r"_t=\d+".to_string()),
        ]))
        .with_header("content-type", "application/json")
        .with_body(envelope(
            0,
            "",
            json!({
                "list": [{
                    "id": 1, "name": "crm", "description": "", "host": "10.0.0.8",
                    "port": 3306, "databaseName": "crm", "username": "reader",
                    "createdBy": 1, "createdAt": "2024-01-01T00:00:00Z"
                }],
                "total": 1, "page": 1, "pageSize": 20
            }),
        ))
        .create_async()
        .await;

    session.login(&api, "admin", "admin123").await.unwrap();
    assert_eq!(
        storage.get("admin_token").unwrap().as_deref(),
        Some("admin-token")
    );
    assert_eq!(session.subject_name().as_deref(), Some("admin"));

    let page = api.list_datasources(&ListQuery::page(1, 20)).await.unwrap();
    login.assert_async().await;
    list.assert_async().await;

    assert_eq!(page.total, 1);
    assert_eq!(page.list[0].database_name, "crm");
}
