//! Builds the configured [`CallContextStore`] backend.

use std::sync::Arc;

use conduit_core::{BusError, BusResult};
use tracing::info;

use super::{
    CallContextStore, DirectoryConnector, DirectoryContextStore, FileContextStore,
    MemoryContextStore,
};
use crate::config::{ReconnectPolicy, StoreConfig};

/// Opens the store described by `config`.
///
/// The directory backend needs a `connector`; the other backends ignore it.
/// A relational store has its table created before it is returned.
///
/// # Errors
///
/// Returns `BusError::Configuration` if the backend cannot be built from the
/// given inputs, or the backend's own error if opening it fails.
pub async fn open_store(
    config: &StoreConfig,
    reconnect: &ReconnectPolicy,
    connector: Option<Arc<dyn DirectoryConnector>>,
) -> BusResult<Arc<dyn CallContextStore>> {
    let store: Arc<dyn CallContextStore> = match config {
        StoreConfig::Memory => Arc::new(MemoryContextStore::new()),
        StoreConfig::Filesystem { work_dir } => Arc::new(FileContextStore::new(work_dir)),
        #[cfg(feature = "relational")]
        StoreConfig::Relational(relational) => {
            let store = super::SqlContextStore::connect(relational).await?;
            store.initialize().await?;
            Arc::new(store)
        }
        #[cfg(not(feature = "relational"))]
        StoreConfig::Relational(_) => {
            return Err(BusError::configuration(
                "relational call context store requires the `relational` feature",
            ));
        }
        StoreConfig::Directory(directory) => {
            let connector = connector.ok_or_else(|| {
                BusError::configuration("directory call context store needs a directory connector")
            })?;
            Arc::new(DirectoryContextStore::new(
                connector,
                directory.clone(),
                reconnect.clone(),
            ))
        }
    };
    info!(backend = backend_name(config), "opened call context store");
    Ok(store)
}

fn backend_name(config: &StoreConfig) -> &'static str {
    match config {
        StoreConfig::Memory => "memory",
        StoreConfig::Filesystem { .. } => "filesystem",
        StoreConfig::Relational(_) => "relational",
        StoreConfig::Directory(_) => "directory",
    }
}
