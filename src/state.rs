use std::sync::Arc;

use axum::extract::FromRef;

use crate::{config::Config, database::Database, realtime::ChangeFeed, storage::BlobStore};

/// Everything handlers share. Each part can be extracted on its own with
/// `State<T>`.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
    pub feed: ChangeFeed,
    pub blobs: BlobStore,
}

impl AppState {
    pub fn new(db: Database, config: Config) -> Self {
        let blobs = BlobStore::new(config.upload_dir.clone(), config.public_base_url.clone());
        Self {
            db,
            config: Arc::new(config),
            feed: ChangeFeed::new(),
            blobs,
        }
    }
}

impl FromRef<AppState> for Database {
    fn from_ref(state: &AppState) -> Self {
        state.db.clone()
    }
}

impl FromRef<AppState> for Arc<Config> {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for ChangeFeed {
    fn from_ref(state: &AppState) -> Self {
        state.feed.clone()
    }
}

impl FromRef<AppState> for BlobStore {
    fn from_ref(state: &AppState) -> Self {
        state.blobs.clone()
    }
}
