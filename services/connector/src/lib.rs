//! Connector configuration client
//!
//! Takes a user from sign-in to a committed connector configuration:
//! session handling, the API gateway client, the cascading
//! datasource/table/field selection, field alias mapping and the hand-off
//! to the embedding host platform.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use common::{config::ClientConfig, storage::{FileStorage, NamespacedStorage}};
//! use connector::{
//!     ApiClient, HostBridge, HttpBackend, SessionStore, SystemClock, WorkflowController,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::from_env()?;
//! let storage = Arc::new(FileStorage::open(&config.storage_path)?);
//! let session = SessionStore::new(
//!     NamespacedStorage::new(storage, config.variant.storage_namespace()),
//!     Arc::new(SystemClock),
//! )?;
//! let client = ApiClient::from_config(&config, Some(session.clone()))?;
//! let workflow = WorkflowController::new(
//!     session,
//!     Arc::new(HttpBackend::new(client)),
//!     HostBridge::standalone(),
//! );
//!
//! workflow.connect_with_login("alice", "pw1").await?;
//! # Ok(())
//! # }
//! ```

pub mod admin;
pub mod backend;
pub mod error;
pub mod gateway;
pub mod history;
pub mod host;
pub mod models;
pub mod selection;
pub mod session;
pub mod validation;
pub mod workflow;

pub use admin::AdminApi;
pub use backend::{Backend, HttpBackend};
pub use error::{WorkflowError, WorkflowResult};
pub use gateway::ApiClient;
pub use history::ConnectionHistoryStore;
pub use host::{HostBridge, HostPlatform, HostReadiness};
pub use selection::{LevelState, LoadOutcome, SelectOutcome, SelectionChain};
pub use session::{Authenticator, Clock, SessionStore, SystemClock};
pub use workflow::{Notice, NoticeLevel, Step, WorkflowController};
