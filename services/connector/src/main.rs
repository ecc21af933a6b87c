use anyhow::{Context, Result, bail};
use std::{env, sync::Arc};
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use common::{
    config::{ClientConfig, FrontendVariant},
    storage::{DurableStorage, FileStorage, NamespacedStorage},
};
use connector::{
    AdminApi, ApiClient, ConnectionHistoryStore, HostBridge, HttpBackend, NoticeLevel,
    SessionStore, SystemClock, WorkflowController,
    admin::ListQuery,
    models::{ConnectionProfile, LevelKind, QueryMode, ResourceNode, connection::DEFAULT_PORT},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_max_level(Level::INFO)
        .init();

    info!("Starting connector");

    let config = ClientConfig::from_env().context("Failed to load configuration")?;
    info!(
        "Using {} API at {} (timeout {}s)",
        config.variant,
        config.base_url(),
        config.timeout_secs
    );

    let storage: Arc<dyn DurableStorage> = Arc::new(
        FileStorage::open(&config.storage_path).context("Failed to open client storage")?,
    );
    let session = SessionStore::new(
        NamespacedStorage::new(storage.clone(), config.variant.storage_namespace()),
        Arc::new(SystemClock),
    )?;
    let client = ApiClient::from_config(&config, Some(session.clone()))?;

    match config.variant {
        FrontendVariant::Admin => run_admin(AdminApi::new(client), session).await,
        FrontendVariant::Dingtalk | FrontendVariant::Feishu => {
            run_workflow(HttpBackend::new(client), session, storage).await
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn credentials() -> Result<(String, String)> {
    let username = env_var("CONNECTOR_USERNAME").context("CONNECTOR_USERNAME is not set")?;
    let password = env_var("CONNECTOR_PASSWORD").context("CONNECTOR_PASSWORD is not set")?;
    Ok((username, password))
}

fn direct_profile() -> Result<Option<ConnectionProfile>> {
    let Some(host) = env_var("CONNECTOR_DB_HOST") else {
        return Ok(None);
    };

    let port = match env_var("CONNECTOR_DB_PORT") {
        Some(port) => port.parse().context("CONNECTOR_DB_PORT is not a valid port")?,
        None => DEFAULT_PORT,
    };
    let username = env_var("CONNECTOR_DB_USERNAME").context("CONNECTOR_DB_USERNAME is not set")?;
    let password = env_var("CONNECTOR_DB_PASSWORD").context("CONNECTOR_DB_PASSWORD is not set")?;

    Ok(Some(ConnectionProfile::new(host, port, username, password)))
}

/// Pick the option named by `wanted` (id or name), or the first one
fn choose(options: &[ResourceNode], wanted: Option<&str>) -> Option<ResourceNode> {
    match wanted {
        Some(wanted) => options
            .iter()
            .find(|node| {
                node.id().to_string() == wanted
                    || node.label() == wanted
                    || match node {
                        ResourceNode::Datasource(ds) => ds.name == wanted,
                        ResourceNode::Table(table) => table.name == wanted,
                        ResourceNode::Field(field) => field.name == wanted,
                    }
            })
            .cloned(),
        None => options.first().cloned(),
    }
}

async fn log_notices(workflow: &WorkflowController) {
    for notice in workflow.drain_notices().await {
        match notice.level {
            NoticeLevel::Info | NoticeLevel::Success => info!("{}", notice.message),
            NoticeLevel::Warning => warn!("{}", notice.message),
            NoticeLevel::Error => error!("{}", notice.message),
        }
    }
}

async fn run_workflow(
    backend: HttpBackend,
    session: SessionStore,
    storage: Arc<dyn DurableStorage>,
) -> Result<()> {
    let history = ConnectionHistoryStore::new(NamespacedStorage::new(storage, ""));
    let host = HostBridge::detect(None).await?;
    let workflow =
        WorkflowController::new(session, Arc::new(backend), host).with_history(history);

    let result = drive(&workflow).await;
    log_notices(&workflow).await;
    result
}

async fn drive(workflow: &WorkflowController) -> Result<()> {
    let profile = direct_profile()?;
    let direct = profile.is_some();
    if let Some(profile) = profile {
        if let Some(previous) = workflow.connection_history() {
            info!(
                "Last connection was {}@{}:{}",
                previous.username, previous.host, previous.port
            );
        }
        workflow.connect_with_profile(profile).await?;
    } else if workflow.resume_session().await? {
        info!("Resumed existing session");
    } else {
        let (username, password) = credentials()?;
        workflow.connect_with_login(&username, &password).await?;
    }
    log_notices(workflow).await;

    let datasources = workflow.options(LevelKind::Datasource).await;
    let Some(datasource) = choose(&datasources, env_var("CONNECTOR_DATASOURCE").as_deref()) else {
        bail!("No matching datasource among {} available", datasources.len());
    };
    info!("Using datasource {}", datasource.label());
    workflow.select_datasource(datasource.id()).await?;

    // Managed tables carry their own saved query
    let query = env_var("CONNECTOR_QUERY").filter(|_| direct);
    if let Some(query) = query {
        workflow.set_query_mode(QueryMode::Sql).await?;
        workflow.set_custom_query(&query).await?;
        workflow.preview_query().await?;
    } else {
        let tables = workflow.options(LevelKind::Table).await;
        let Some(table) = choose(&tables, env_var("CONNECTOR_TABLE").as_deref()) else {
            log_notices(workflow).await;
            bail!("No matching table in datasource {}", datasource.label());
        };
        info!("Using table {}", table.label());
        workflow.select_table(table.id()).await?;
        if !direct {
            info!("Table is configured in {} mode", workflow.query_mode().await);
        }
    }

    workflow.apply_all_descriptions().await?;
    workflow.advance().await?;

    let draft = workflow.submit().await?;
    info!("Configuration payload: {}", draft.to_payload()?);
    Ok(())
}

async fn run_admin(api: AdminApi, session: SessionStore) -> Result<()> {
    if !session.is_active() {
        let (username, password) = credentials()?;
        session.login(&api, &username, &password).await?;
    }

    let info = api.system_info().await?;
    info!("Connected to {} {}", info.service, info.version);

    let page = api.list_datasources(&ListQuery::page(1, 50)).await?;
    info!("{} datasources configured", page.total);
    for datasource in &page.list {
        let tables = api.list_tables(datasource.id).await?;
        info!(
            "{} ({}:{}/{}): {} tables",
            datasource.name,
            datasource.host,
            datasource.port,
            datasource.database_name,
            tables.len()
        );
    }

    Ok(())
}
