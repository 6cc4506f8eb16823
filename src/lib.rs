//! CollabDrive Server Library
//!
//! This module exports the core types and functions for testing and reuse.

pub mod auth;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod models;
pub mod permissions;
pub mod realtime;
pub mod routes;
pub mod security;
pub mod storage;

pub use config::Config;
pub use db::{open_database, Db};
pub use error::{AppError, Result};
pub use realtime::{FlushSettings, Hub};
pub use routes::router;
pub use storage::BlobStore;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub config: Config,
    pub blobs: BlobStore,
    pub hub: Hub,
}

impl AppState {
    /// Open blob storage and start the realtime hub around an open database
    pub async fn new(db: Db, config: Config) -> Result<Self> {
        let blobs = BlobStore::open(&config.storage_path).await?;
        let hub = Hub::spawn(
            db.clone(),
            FlushSettings {
                debounce: config.flush_debounce(),
                max_delay: config.flush_max_delay(),
            },
        );
        Ok(Self {
            db,
            config,
            blobs,
            hub,
        })
    }
}
