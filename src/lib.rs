//! BleepStore - S3-compatible object storage with SigV4 authentication
//!
//! This library provides the core functionality for the BleepStore server:
//! the SigV4 verifier, the request dispatcher, the SQLite metadata index,
//! the filesystem storage backend, and the multipart-upload state machine.

pub mod acl;
pub mod api;
pub mod auth;
pub mod config;
pub mod metadata;
pub mod metrics;
pub mod server;
pub mod storage;
pub mod types;

use auth::AuthCache;
use config::Config;
use metadata::MetadataStore;
use metrics::Metrics;
use std::sync::Arc;
use storage::StorageBackend;

/// Application state shared across handlers and middleware.
///
/// Initialised once at startup in dependency order (metadata store, then
/// storage backend, then caches) and passed explicitly, with no hidden
/// singletons.
pub struct AppState {
    pub config: Config,
    pub metadata: Arc<dyn MetadataStore>,
    pub storage: Arc<dyn StorageBackend>,
    pub auth_cache: AuthCache,
    pub metrics: Arc<Metrics>,
}
