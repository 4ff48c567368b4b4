use std::sync::Arc;

use crate::core::config::Settings;
use crate::services::local_store::LocalStore;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    store: LocalStore,
}

impl AppState {
    pub(crate) fn new(settings: Settings, store: LocalStore) -> Self {
        Self { inner: Arc::new(InnerState { settings, store }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn store(&self) -> &LocalStore {
        &self.inner.store
    }
}
