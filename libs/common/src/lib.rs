//! Common library for the connector workspace
//!
//! This crate provides the pieces shared by every frontend variant:
//! durable client storage, the backend response envelope, client
//! configuration and the associated error types.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use common::config::ClientConfig;
//! use common::storage::{FileStorage, NamespacedStorage};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::from_env()?;
//!     let storage = Arc::new(FileStorage::open(&config.storage_path)?);
//!     let session = NamespacedStorage::new(storage, config.variant.storage_namespace());
//!     println!("Persisted token: {:?}", session.get("token")?);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod envelope;
pub mod error;
pub mod storage;
