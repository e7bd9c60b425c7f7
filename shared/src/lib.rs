pub mod types;
pub mod error;
pub mod config;
pub mod store;
pub mod files;
pub mod auth;
pub mod validate;
pub mod users;
pub mod branches;
pub mod students;
pub mod donations;
pub mod needs;
pub mod dashboard;
pub mod response;

use std::sync::Arc;

use auth::SessionKeys;
use config::AppConfig;
use files::FileStore;
use store::Store;

/// Shared application state
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub files: Arc<dyn FileStore>,
    pub sessions: SessionKeys,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, files: Arc<dyn FileStore>, config: AppConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            files,
            sessions: SessionKeys::new(&config.session_secret, config.session_ttl_hours),
            config,
        })
    }
}
