use crate::services::{
    lifecycle::LifecycleCoordinator, list_file::ListFile, storage_service::StorageService,
};
use std::sync::Arc;

/// Shared handler state. Built once in `main`; cloning only bumps refcounts.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<LifecycleCoordinator>,
    pub domains: Arc<ListFile>,
    pub trust_proxy: bool,
}

impl AppState {
    pub fn storage(&self) -> &StorageService {
        self.lifecycle.store()
    }

    pub fn site_name(&self) -> &str {
        &self.lifecycle.settings().site_name
    }
}

#[cfg(test)]
pub async fn test_state(upload_window: std::time::Duration) -> (AppState, tempfile::TempDir) {
    use crate::services::{
        lifecycle::LifecycleSettings,
        secret_hash::{HashParams, SecretHasher},
    };

    let (store, dir) = crate::db::test_storage().await;
    let hasher = SecretHasher::new(&HashParams::fast()).expect("fast hash params");
    let settings = LifecycleSettings {
        size_limit: 1024 * 1024,
        key_length_limit: 64,
        site_name: "drophost".into(),
        upload_window,
        shorten_window: upload_window,
    };
    let credentials = ListFile::from_entries("keys", vec!["test-key".into()]);
    let state = AppState {
        lifecycle: Arc::new(LifecycleCoordinator::new(store, hasher, credentials, settings)),
        domains: ListFile::from_entries("domains", vec!["a.example".into(), "b.example".into()]),
        trust_proxy: false,
    };
    (state, dir)
}
