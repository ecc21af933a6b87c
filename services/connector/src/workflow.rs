//! Configuration workflow controller
//!
//! Drives a user from sign-in to a committed configuration:
//!
//! 1. `Connect`: log in (managed access) or supply a database connection
//!    (direct access), then load the datasource list.
//! 2. `Select`: pick a datasource and a table. On a direct connection the
//!    table's fields are loaded, or a custom query is written and previewed.
//!    A managed table brings its own query mode and saved query; its field
//!    mappings are kept on the server.
//! 3. `Map`: adjust the display alias of every field.
//! 4. `Submitted`: the draft was handed to the host; nothing changes after.
//!
//! State lives behind an async mutex that is released before every backend
//! call. Results of superseded loads are dropped by the selection chain.

use std::fmt;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    backend::Backend,
    error::{WorkflowError, WorkflowResult},
    history::ConnectionHistoryStore,
    host::HostBridge,
    models::{
        ConfigurationDraft, ConnectionHistory, ConnectionProfile, Datasource, Field,
        FieldMapping, FieldMappings, LevelKind, QueryMode, ResourceId, ResourceNode, Table,
    },
    selection::{LevelState, LoadOutcome, LoadTicket, SelectOutcome, SelectionChain},
    session::SessionStore,
    validation,
};

const DATASOURCE_LEVEL: usize = 0;
const TABLE_LEVEL: usize = 1;
const FIELD_LEVEL: usize = 2;
const CHAIN: [LevelKind; 3] = [LevelKind::Datasource, LevelKind::Table, LevelKind::Field];

/// Workflow step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Connect,
    Select,
    Map,
    Submitted,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Connect => "connect",
            Step::Select => "select",
            Step::Map => "map",
            Step::Submitted => "submitted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Transient message for the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// Marks the workflow busy until dropped
struct BusyGuard {
    counter: Arc<AtomicUsize>,
}

impl BusyGuard {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self {
            counter: counter.clone(),
        }
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct WorkflowState {
    step: Step,
    chain: SelectionChain,
    query_mode: QueryMode,
    custom_query: String,
    mappings: FieldMappings,
    connection: Option<ConnectionProfile>,
    notices: Vec<Notice>,
    submitted: Option<ConfigurationDraft>,
}

impl WorkflowState {
    fn new() -> Self {
        Self {
            step: Step::Connect,
            chain: SelectionChain::new(&CHAIN),
            query_mode: QueryMode::Table,
            custom_query: String::new(),
            mappings: FieldMappings::default(),
            connection: None,
            notices: Vec::new(),
            submitted: None,
        }
    }

    fn notify(&mut self, level: NoticeLevel, message: impl Into<String>) {
        self.notices.push(Notice {
            level,
            message: message.into(),
        });
    }

    /// Back to a fresh `Connect` step; pending notices are kept
    fn reset(&mut self) {
        self.step = Step::Connect;
        self.chain.reset_from(DATASOURCE_LEVEL);
        self.query_mode = QueryMode::Table;
        self.custom_query.clear();
        self.mappings.clear();
        self.connection = None;
    }

    fn ensure_mutable(&self) -> WorkflowResult<()> {
        if self.step == Step::Submitted {
            return Err(WorkflowError::validation(
                "workflow",
                "The configuration has already been submitted",
            ));
        }
        Ok(())
    }

    fn ensure_step(&self, allowed: &[Step]) -> WorkflowResult<()> {
        self.ensure_mutable()?;
        if !allowed.contains(&self.step) {
            return Err(WorkflowError::validation(
                "step",
                format!("Not available in the {} step", self.step),
            ));
        }
        Ok(())
    }

    fn is_managed(&self) -> bool {
        self.connection.is_none()
    }

    /// The direct connection, or an error for managed access
    fn direct_connection(&self) -> WorkflowResult<ConnectionProfile> {
        self.connection.clone().ok_or_else(|| {
            WorkflowError::validation(
                "queryMode",
                "Queries and fields of managed tables are configured by the administrator",
            )
        })
    }

    /// Mode the draft is built in; a managed table carries its own
    fn effective_query_mode(&self) -> QueryMode {
        if self.is_managed() {
            self.selected_table()
                .map(|table| table.query_mode)
                .unwrap_or_default()
        } else {
            self.query_mode
        }
    }

    fn ensure_sql_mode(&self) -> WorkflowResult<()> {
        if self.query_mode != QueryMode::Sql {
            return Err(WorkflowError::validation(
                "queryMode",
                "Switch to SQL mode to use a custom query",
            ));
        }
        Ok(())
    }

    /// Start a load, dropping mappings whenever the field level is emptied
    fn start_load(&mut self, level: usize) -> WorkflowResult<LoadTicket> {
        let ticket = self.chain.begin_load(level)?;
        if level <= FIELD_LEVEL {
            self.mappings.clear();
        }
        Ok(ticket)
    }

    fn selected_datasource(&self) -> Option<&Datasource> {
        self.chain
            .selected(DATASOURCE_LEVEL)
            .and_then(ResourceNode::as_datasource)
    }

    fn selected_table(&self) -> Option<&Table> {
        self.chain
            .selected(TABLE_LEVEL)
            .and_then(ResourceNode::as_table)
    }

    fn fields(&self) -> Vec<Field> {
        self.chain
            .options(FIELD_LEVEL)
            .iter()
            .filter_map(ResourceNode::as_field)
            .cloned()
            .collect()
    }

    /// Assemble the draft from the current selection, or explain what is missing
    fn build_draft(&self) -> WorkflowResult<ConfigurationDraft> {
        if self.chain.is_loading() {
            return Err(WorkflowError::validation(
                "selection",
                "Please wait for loading to finish",
            ));
        }

        let datasource = self
            .selected_datasource()
            .ok_or_else(|| WorkflowError::validation("datasource", "Please select a datasource"))?;

        if self.is_managed() {
            return self.build_managed_draft(datasource);
        }

        let draft = match self.query_mode {
            QueryMode::Table => {
                let table = self
                    .selected_table()
                    .ok_or_else(|| WorkflowError::validation("table", "Please select a table"))?;
                ConfigurationDraft::Table {
                    datasource_id: datasource.id.clone(),
                    table_id: table.id.clone(),
                    table_name: table.name.clone(),
                    field_mappings: self.mappings.to_vec(),
                    connection: self.connection.clone(),
                }
            }
            QueryMode::Sql => {
                let query = validation::validate_custom_query(&self.custom_query)?;
                if self.chain.options(FIELD_LEVEL).is_empty() {
                    return Err(WorkflowError::validation(
                        "fields",
                        "Preview the query to load its fields before submitting",
                    ));
                }
                ConfigurationDraft::Sql {
                    datasource_id: datasource.id.clone(),
                    table_id: None,
                    custom_query: query.to_string(),
                    field_mappings: self.mappings.to_vec(),
                    connection: self.connection.clone(),
                }
            }
        };

        Ok(draft)
    }

    /// Reference the managed table so the server applies its stored setup
    fn build_managed_draft(&self, datasource: &Datasource) -> WorkflowResult<ConfigurationDraft> {
        let table = self
            .selected_table()
            .ok_or_else(|| WorkflowError::validation("table", "Please select a table"))?;

        let draft = match table.query_mode {
            QueryMode::Table => ConfigurationDraft::Table {
                datasource_id: datasource.id.clone(),
                table_id: table.id.clone(),
                table_name: table.name.clone(),
                field_mappings: Vec::new(),
                connection: None,
            },
            QueryMode::Sql => {
                let query = table
                    .custom_query
                    .as_deref()
                    .map(str::trim)
                    .filter(|query| !query.is_empty())
                    .ok_or_else(|| {
                        WorkflowError::validation(
                            "table",
                            format!("Table {} has no saved query", table.label()),
                        )
                    })?;
                ConfigurationDraft::Sql {
                    datasource_id: datasource.id.clone(),
                    table_id: Some(table.id.clone()),
                    custom_query: query.to_string(),
                    field_mappings: Vec::new(),
                    connection: None,
                }
            }
        };

        Ok(draft)
    }
}

/// Step-based configuration workflow for one user session
pub struct WorkflowController {
    id: Uuid,
    session: SessionStore,
    backend: Arc<dyn Backend>,
    host: HostBridge,
    history: Option<ConnectionHistoryStore>,
    state: Mutex<WorkflowState>,
    busy: Arc<AtomicUsize>,
}

impl WorkflowController {
    pub fn new(session: SessionStore, backend: Arc<dyn Backend>, host: HostBridge) -> Self {
        let id = Uuid::new_v4();
        debug!("Workflow {} created (hosted: {})", id, host.is_hosted());
        Self {
            id,
            session,
            backend,
            host,
            history: None,
            state: Mutex::new(WorkflowState::new()),
            busy: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Remember direct connections in `history`
    pub fn with_history(mut self, history: ConnectionHistoryStore) -> Self {
        self.history = Some(history);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn host(&self) -> &HostBridge {
        &self.host
    }

    /// Whether any operation is still in flight
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst) > 0
    }

    fn busy_guard(&self) -> BusyGuard {
        BusyGuard::acquire(&self.busy)
    }

    /// Last direct connection, for pre-filling the connect form
    pub fn connection_history(&self) -> Option<ConnectionHistory> {
        self.history.as_ref().and_then(ConnectionHistoryStore::load)
    }

    // Connect

    /// Log in with the managed backend and load the datasources
    pub async fn connect_with_login(&self, username: &str, password: &str) -> WorkflowResult<()> {
        self.state.lock().await.ensure_step(&[Step::Connect])?;
        let _busy = self.busy_guard();

        if let Err(e) = self
            .session
            .login(self.backend.as_ref(), username, password)
            .await
        {
            if !e.is_validation() {
                self.state
                    .lock()
                    .await
                    .notify(NoticeLevel::Error, e.user_message());
            }
            return Err(e);
        }

        self.enter_managed_selection().await
    }

    /// Continue with a session restored from storage
    ///
    /// Returns `false` when there is no active session to resume.
    pub async fn resume_session(&self) -> WorkflowResult<bool> {
        if self.state.lock().await.step != Step::Connect || !self.session.is_active() {
            return Ok(false);
        }

        let _busy = self.busy_guard();
        self.enter_managed_selection().await?;
        Ok(true)
    }

    async fn enter_managed_selection(&self) -> WorkflowResult<()> {
        self.state.lock().await.connection = None;

        match self.load_datasources().await {
            Ok(_) => {}
            Err(e) if e.is_auth() => return Err(e),
            // Already surfaced as a notice; the list can be reloaded from the next step
            Err(e) => debug!("Datasource load failed: {}", e),
        }

        let mut state = self.state.lock().await;
        state.step = Step::Select;
        info!(
            "Workflow {}: {} signed in",
            self.id,
            self.session.subject_name().unwrap_or_default()
        );
        Ok(())
    }

    /// Connect directly to a database server and list its databases
    pub async fn connect_with_profile(&self, profile: ConnectionProfile) -> WorkflowResult<()> {
        self.state.lock().await.ensure_step(&[Step::Connect])?;
        validation::validate_connection(&profile)?;
        let _busy = self.busy_guard();

        self.state.lock().await.connection = Some(profile.clone());

        let outcome = match self.load_datasources().await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.state.lock().await.connection = None;
                return Err(e);
            }
        };

        let mut state = self.state.lock().await;
        match outcome {
            LoadOutcome::Applied { count } => {
                if let Some(history) = &self.history {
                    if let Err(e) = history.save(&profile) {
                        warn!("Failed to save connection history: {}", e);
                    }
                }
                state.step = Step::Select;
                info!(
                    "Workflow {}: connected to {}:{} ({} databases)",
                    self.id, profile.host, profile.port, count
                );
                Ok(())
            }
            LoadOutcome::Empty => {
                state.connection = None;
                Err(WorkflowError::validation(
                    "connection",
                    "No databases are available on this connection",
                ))
            }
            LoadOutcome::Failed(message) => {
                state.connection = None;
                Err(WorkflowError::Transport(message))
            }
            // A newer connection attempt owns the state now
            LoadOutcome::Stale => Err(WorkflowError::validation(
                "connection",
                "Superseded by a newer connection attempt",
            )),
        }
    }

    /// Fetch the datasource list again
    pub async fn reload_datasources(&self) -> WorkflowResult<()> {
        self.state.lock().await.ensure_step(&[Step::Select])?;
        let _busy = self.busy_guard();
        self.load_datasources().await?;
        Ok(())
    }

    async fn load_datasources(&self) -> WorkflowResult<LoadOutcome> {
        let (ticket, conn) = {
            let mut state = self.state.lock().await;
            let ticket = state.start_load(DATASOURCE_LEVEL)?;
            (ticket, state.connection.clone())
        };

        let result = self.backend.list_datasources(conn.as_ref()).await;

        let mut state = self.state.lock().await;
        self.apply_load(&mut state, ticket, result)
    }

    /// Offer a backend result to the chain and surface what happened
    fn apply_load<N: Into<ResourceNode>>(
        &self,
        state: &mut WorkflowState,
        ticket: LoadTicket,
        result: WorkflowResult<Vec<N>>,
    ) -> WorkflowResult<LoadOutcome> {
        let kind = state
            .chain
            .level(ticket.level())
            .map(|level| level.kind().to_string())
            .unwrap_or_default();

        match result {
            Err(e) if e.is_auth() => {
                self.handle_auth_failure(state, &e);
                Err(e)
            }
            Err(e) => match state.chain.complete_load::<N, _>(ticket, Err(e.user_message())) {
                LoadOutcome::Stale => Ok(LoadOutcome::Stale),
                _ => {
                    state.notify(NoticeLevel::Error, e.user_message());
                    Err(e)
                }
            },
            Ok(nodes) => {
                let outcome = state.chain.complete_load::<N, WorkflowError>(ticket, Ok(nodes));
                if outcome == LoadOutcome::Empty {
                    state.notify(NoticeLevel::Warning, format!("No {} available", kind));
                }
                Ok(outcome)
            }
        }
    }

    fn handle_auth_failure(&self, state: &mut WorkflowState, error: &WorkflowError) {
        warn!("Workflow {}: session rejected, back to sign-in", self.id);
        if let Err(e) = self.session.logout() {
            warn!("Failed to clear session: {}", e);
        }
        state.reset();
        state.notify(NoticeLevel::Error, error.user_message());
    }

    // Select

    /// Select a datasource and load its tables
    pub async fn select_datasource(&self, id: &ResourceId) -> WorkflowResult<()> {
        let _busy = self.busy_guard();

        let (ticket, conn, datasource) = {
            let mut state = self.state.lock().await;
            state.ensure_step(&[Step::Select])?;
            if state.chain.select(DATASOURCE_LEVEL, id)? == SelectOutcome::Unchanged {
                return Ok(());
            }
            let datasource = state
                .selected_datasource()
                .cloned()
                .ok_or_else(|| WorkflowError::validation("datasource", "Unknown datasource"))?;
            let ticket = state.start_load(TABLE_LEVEL)?;
            (ticket, state.connection.clone(), datasource)
        };

        info!(
            "Workflow {}: loading tables of {}",
            self.id,
            datasource.label()
        );
        let result = self.backend.list_tables(conn.as_ref(), &datasource).await;

        let mut state = self.state.lock().await;
        self.apply_load(&mut state, ticket, result)?;
        Ok(())
    }

    /// Select a table
    ///
    /// On a direct connection in table mode its fields are loaded. A managed
    /// table needs nothing more: its query and mappings live on the server.
    pub async fn select_table(&self, id: &ResourceId) -> WorkflowResult<()> {
        let _busy = self.busy_guard();

        let load_fields = {
            let mut state = self.state.lock().await;
            state.ensure_step(&[Step::Select])?;
            if state.chain.select(TABLE_LEVEL, id)? == SelectOutcome::Unchanged {
                return Ok(());
            }
            state.mappings.clear();
            if let (true, Some(table)) = (state.is_managed(), state.selected_table()) {
                info!(
                    "Workflow {}: managed table {} uses {} mode",
                    self.id,
                    table.label(),
                    table.query_mode
                );
            }
            !state.is_managed() && state.query_mode == QueryMode::Table
        };

        if load_fields {
            self.load_fields().await?;
        }
        Ok(())
    }

    async fn load_fields(&self) -> WorkflowResult<()> {
        let (ticket, conn, datasource, table) = {
            let mut state = self.state.lock().await;
            let (Some(conn), Some(datasource), Some(table)) = (
                state.connection.clone(),
                state.selected_datasource().cloned(),
                state.selected_table().cloned(),
            ) else {
                return Ok(());
            };
            let ticket = state.start_load(FIELD_LEVEL)?;
            (ticket, conn, datasource, table)
        };

        debug!("Workflow {}: loading fields of {}", self.id, table.name);
        let result = self.backend.list_fields(&conn, &datasource, &table).await;

        let mut state = self.state.lock().await;
        if self.apply_load(&mut state, ticket, result)? != LoadOutcome::Stale {
            let fields = state.fields();
            state.mappings = FieldMappings::from_fields(&fields);
        }
        Ok(())
    }

    /// Switch between table and custom query mode on a direct connection
    ///
    /// Fields and mappings are dropped; leaving SQL mode also drops the query.
    pub async fn set_query_mode(&self, mode: QueryMode) -> WorkflowResult<()> {
        let reload = {
            let mut state = self.state.lock().await;
            state.ensure_step(&[Step::Select])?;
            state.direct_connection()?;
            if state.query_mode == mode {
                return Ok(());
            }

            state.query_mode = mode;
            state.chain.reset_from(FIELD_LEVEL);
            state.mappings.clear();
            if mode == QueryMode::Table {
                state.custom_query.clear();
            }
            info!("Workflow {}: query mode set to {}", self.id, mode);
            mode == QueryMode::Table && state.selected_table().is_some()
        };

        if reload {
            let _busy = self.busy_guard();
            self.load_fields().await?;
        }
        Ok(())
    }

    /// Replace the custom query text; previewed fields no longer apply
    pub async fn set_custom_query(&self, query: &str) -> WorkflowResult<()> {
        let mut state = self.state.lock().await;
        state.ensure_step(&[Step::Select])?;
        state.direct_connection()?;
        state.ensure_sql_mode()?;

        if state.custom_query == query {
            return Ok(());
        }
        state.custom_query = query.to_string();
        if state.chain.state(FIELD_LEVEL) != Some(LevelState::Empty) {
            state.chain.reset_from(FIELD_LEVEL);
            state.mappings.clear();
        }
        Ok(())
    }

    /// Run the custom query and load the fields it produces
    pub async fn preview_query(&self) -> WorkflowResult<usize> {
        let _busy = self.busy_guard();

        let (ticket, conn, datasource, query) = {
            let mut state = self.state.lock().await;
            state.ensure_step(&[Step::Select])?;
            let conn = state.direct_connection()?;
            state.ensure_sql_mode()?;
            let datasource = state.selected_datasource().cloned().ok_or_else(|| {
                WorkflowError::validation("datasource", "Please select a datasource first")
            })?;
            let query = validation::validate_custom_query(&state.custom_query)?.to_string();
            let ticket = state.start_load(FIELD_LEVEL)?;
            (ticket, conn, datasource, query)
        };

        info!("Workflow {}: previewing query", self.id);
        let result = self
            .backend
            .preview_query(&conn, &datasource, &query)
            .await;

        let mut state = self.state.lock().await;
        match self.apply_load(&mut state, ticket, result)? {
            LoadOutcome::Applied { count } => {
                let fields = state.fields();
                state.mappings = FieldMappings::from_fields(&fields);
                state.notify(
                    NoticeLevel::Success,
                    format!("Query returned {} fields", count),
                );
                Ok(count)
            }
            _ => Ok(0),
        }
    }

    // Map

    /// Set the display alias of one field
    pub async fn set_alias(&self, source_field: &str, alias: &str) -> WorkflowResult<()> {
        let mut state = self.state.lock().await;
        state.ensure_step(&[Step::Select, Step::Map])?;
        if !state.mappings.set_alias(source_field, alias) {
            return Err(unknown_field(source_field));
        }
        Ok(())
    }

    /// Use a field's description as its alias; `false` if it has none
    pub async fn apply_description(&self, source_field: &str) -> WorkflowResult<bool> {
        let mut state = self.state.lock().await;
        state.ensure_step(&[Step::Select, Step::Map])?;
        if state.mappings.get(source_field).is_none() {
            return Err(unknown_field(source_field));
        }
        let fields = state.fields();
        Ok(state.mappings.apply_description(&fields, source_field))
    }

    /// Use every described field's description as its alias
    pub async fn apply_all_descriptions(&self) -> WorkflowResult<usize> {
        let mut state = self.state.lock().await;
        state.ensure_step(&[Step::Select, Step::Map])?;
        let fields = state.fields();
        let applied = state.mappings.apply_all_descriptions(&fields);
        state.notify(
            NoticeLevel::Info,
            format!("Applied {} field descriptions", applied),
        );
        Ok(applied)
    }

    // Navigation

    /// Move from `Select` to `Map` once the selection is complete
    pub async fn advance(&self) -> WorkflowResult<Step> {
        let mut state = self.state.lock().await;
        state.ensure_step(&[Step::Select])?;
        state.build_draft()?;
        state.step = Step::Map;
        debug!("Workflow {}: advanced to {}", self.id, state.step);
        Ok(state.step)
    }

    /// Go back one step
    ///
    /// Leaving `Map` drops the field level, the mappings, the query text and
    /// any preview; a direct table's fields are loaded again. Leaving
    /// `Select` drops the whole chain.
    pub async fn previous_step(&self) -> WorkflowResult<Step> {
        let (step, reload) = {
            let mut state = self.state.lock().await;
            state.ensure_mutable()?;
            let reload = match state.step {
                Step::Map => {
                    state.step = Step::Select;
                    state.chain.reset_from(FIELD_LEVEL);
                    state.mappings.clear();
                    state.custom_query.clear();
                    !state.is_managed()
                        && state.query_mode == QueryMode::Table
                        && state.selected_table().is_some()
                }
                Step::Select => {
                    state.reset();
                    false
                }
                Step::Connect | Step::Submitted => false,
            };
            debug!("Workflow {}: back to {}", self.id, state.step);
            (state.step, reload)
        };

        if reload {
            let _busy = self.busy_guard();
            self.load_fields().await?;
        }
        Ok(step)
    }

    /// Validate, assemble and commit the configuration
    pub async fn submit(&self) -> WorkflowResult<ConfigurationDraft> {
        let _busy = self.busy_guard();

        let draft = {
            let state = self.state.lock().await;
            state.ensure_step(&[Step::Select, Step::Map])?;
            state.build_draft()?
        };

        info!(
            "Workflow {}: submitting {} configuration with {} fields",
            self.id,
            draft.query_mode(),
            draft.field_mappings().len()
        );
        if let Some(table_id) = draft.table_id() {
            debug!("Workflow {}: draft references table {}", self.id, table_id);
        }

        if let Err(e) = self.host.commit(&draft).await {
            self.state
                .lock()
                .await
                .notify(NoticeLevel::Error, e.user_message());
            return Err(e);
        }

        let mut state = self.state.lock().await;
        state.step = Step::Submitted;
        state.submitted = Some(draft.clone());
        state.notify(NoticeLevel::Success, "Configuration saved");
        Ok(draft)
    }

    /// Sign out locally and on the server
    pub async fn logout(&self) -> WorkflowResult<()> {
        let _busy = self.busy_guard();
        self.session.logout_remote(self.backend.as_ref()).await?;

        let mut state = self.state.lock().await;
        if state.step != Step::Submitted {
            state.reset();
        }
        state.notify(NoticeLevel::Info, "Signed out");
        Ok(())
    }

    // Snapshots

    pub async fn step(&self) -> Step {
        self.state.lock().await.step
    }

    /// Mode the configuration will be submitted in
    pub async fn query_mode(&self) -> QueryMode {
        self.state.lock().await.effective_query_mode()
    }

    pub async fn custom_query(&self) -> String {
        self.state.lock().await.custom_query.clone()
    }

    pub async fn options(&self, kind: LevelKind) -> Vec<ResourceNode> {
        let state = self.state.lock().await;
        state
            .chain
            .index_of(kind)
            .map(|index| state.chain.options(index).to_vec())
            .unwrap_or_default()
    }

    pub async fn selected(&self, kind: LevelKind) -> Option<ResourceNode> {
        let state = self.state.lock().await;
        let index = state.chain.index_of(kind)?;
        state.chain.selected(index).cloned()
    }

    pub async fn level_state(&self, kind: LevelKind) -> Option<LevelState> {
        let state = self.state.lock().await;
        state.chain.state(state.chain.index_of(kind)?)
    }

    pub async fn fields(&self) -> Vec<Field> {
        self.state.lock().await.fields()
    }

    pub async fn mappings(&self) -> Vec<FieldMapping> {
        self.state.lock().await.mappings.to_vec()
    }

    /// The draft committed to the host, once submitted
    pub async fn submitted_draft(&self) -> Option<ConfigurationDraft> {
        self.state.lock().await.submitted.clone()
    }

    /// Take all pending notices
    pub async fn drain_notices(&self) -> Vec<Notice> {
        std::mem::take(&mut self.state.lock().await.notices)
    }
}

fn unknown_field(source_field: &str) -> WorkflowError {
    WorkflowError::validation("fieldMappings", format!("Unknown field {}", source_field))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, description: Option<&str>) -> Field {
        Field {
            id: name.into(),
            name: name.to_string(),
            field_type: "varchar".to_string(),
            is_primary: false,
            description: description.map(str::to_string),
        }
    }

    fn state_with_datasource() -> WorkflowState {
        let mut state = WorkflowState::new();
        state.step = Step::Select;
        let ticket = state.start_load(DATASOURCE_LEVEL).unwrap();
        state.chain.complete_load::<_, String>(
            ticket,
            Ok(vec![Datasource {
                id: 1.into(),
                name: "sales".to_string(),
                description: None,
            }]),
        );
        state.chain.select(DATASOURCE_LEVEL, &1.into()).unwrap();
        state
    }

    fn direct_state() -> WorkflowState {
        let mut state = state_with_datasource();
        state.connection = Some(ConnectionProfile::new("db", 3306, "u", "p"));
        state
    }

    fn select_managed_table(state: &mut WorkflowState, table: Table) {
        let id = table.id.clone();
        let ticket = state.start_load(TABLE_LEVEL).unwrap();
        state.chain.complete_load::<_, String>(ticket, Ok(vec![table]));
        state.chain.select(TABLE_LEVEL, &id).unwrap();
    }

    #[test]
    fn test_sql_draft_requires_previewed_fields() {
        let mut state = direct_state();
        state.query_mode = QueryMode::Sql;
        state.custom_query = "  select id, amount from orders ".to_string();

        let err = state.build_draft().unwrap_err();
        assert!(matches!(&err, WorkflowError::Validation { field, .. } if field == "fields"));

        let ticket = state.start_load(FIELD_LEVEL).unwrap();
        state.chain.complete_load::<_, String>(
            ticket,
            Ok(vec![field("id", None), field("amount", Some("金额"))]),
        );
        let fields = state.fields();
        state.mappings = FieldMappings::from_fields(&fields);

        match state.build_draft().unwrap() {
            ConfigurationDraft::Sql {
                table_id,
                custom_query,
                field_mappings,
                ..
            } => {
                assert_eq!(table_id, None);
                assert_eq!(custom_query, "select id, amount from orders");
                assert_eq!(field_mappings.len(), 2);
            }
            other => panic!("unexpected draft: {:?}", other),
        }
    }

    #[test]
    fn test_table_draft_requires_table() {
        let state = direct_state();
        let err = state.build_draft().unwrap_err();
        assert!(matches!(&err, WorkflowError::Validation { field, .. } if field == "table"));
    }

    #[test]
    fn test_managed_sql_table_submits_saved_query() {
        let mut state = state_with_datasource();
        select_managed_table(
            &mut state,
            Table {
                id: 12.into(),
                query_mode: QueryMode::Sql,
                custom_query: Some(" select id from orders ".to_string()),
                ..Table::named("orders_report")
            },
        );
        assert_eq!(state.effective_query_mode(), QueryMode::Sql);

        match state.build_draft().unwrap() {
            ConfigurationDraft::Sql {
                table_id,
                custom_query,
                field_mappings,
                connection,
                ..
            } => {
                assert_eq!(table_id, Some(12.into()));
                assert_eq!(custom_query, "select id from orders");
                assert!(field_mappings.is_empty());
                assert!(connection.is_none());
            }
            other => panic!("unexpected draft: {:?}", other),
        }
    }

    #[test]
    fn test_managed_sql_table_without_query_is_rejected() {
        let mut state = state_with_datasource();
        select_managed_table(
            &mut state,
            Table {
                id: 13.into(),
                query_mode: QueryMode::Sql,
                ..Table::named("broken_report")
            },
        );
        let err = state.build_draft().unwrap_err();
        assert!(matches!(&err, WorkflowError::Validation { field, .. } if field == "table"));
    }

    #[test]
    fn test_managed_table_submits_without_fields() {
        let mut state = state_with_datasource();
        select_managed_table(
            &mut state,
            Table {
                id: 11.into(),
                ..Table::named("orders")
            },
        );
        assert_eq!(state.effective_query_mode(), QueryMode::Table);
        assert!(state.direct_connection().is_err());

        match state.build_draft().unwrap() {
            ConfigurationDraft::Table {
                table_id,
                field_mappings,
                ..
            } => {
                assert_eq!(table_id, 11.into());
                assert!(field_mappings.is_empty());
            }
            other => panic!("unexpected draft: {:?}", other),
        }
    }

    #[test]
    fn test_draft_blocked_while_loading() {
        let mut state = state_with_datasource();
        state.start_load(TABLE_LEVEL).unwrap();
        let err = state.build_draft().unwrap_err();
        assert!(matches!(&err, WorkflowError::Validation { field, .. } if field == "selection"));
    }

    #[test]
    fn test_reset_returns_to_connect() {
        let mut state = state_with_datasource();
        state.query_mode = QueryMode::Sql;
        state.custom_query = "select 1".to_string();
        state.connection = Some(ConnectionProfile::new("db", 3306, "u", "p"));
        state.notify(NoticeLevel::Warning, "kept");

        state.reset();
        assert_eq!(state.step, Step::Connect);
        assert_eq!(state.query_mode, QueryMode::Table);
        assert!(state.custom_query.is_empty());
        assert!(state.connection.is_none());
        assert!(state.chain.options(DATASOURCE_LEVEL).is_empty());
        assert_eq!(state.notices.len(), 1);
    }

    #[test]
    fn test_busy_guard_releases_on_drop() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let _first = BusyGuard::acquire(&counter);
            let _second = BusyGuard::acquire(&counter);
            assert_eq!(counter.load(Ordering::SeqCst), 2);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
