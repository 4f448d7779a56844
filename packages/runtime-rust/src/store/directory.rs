//! Directory-service [`CallContextStore`]: one entry per key.
//!
//! Entries are named `<rdn_attribute>=<key>,<base_dn>` and carry the
//! serialized context in a single binary attribute. The store keeps one cached
//! connection. When an operation fails with a communication error the
//! connection is discarded and the operation is retried once on a fresh one.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::{BusError, BusResult, CallContext, ErrorKind};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{check_key, CallContextStore};
use crate::config::{DirectoryStoreConfig, ReconnectPolicy};

// ---------------------------------------------------------------------------
// Connection seam
// ---------------------------------------------------------------------------

/// Failure reported by a directory connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// The connection to the directory is unusable.
    #[error("directory communication failure: {0}")]
    Communication(String),
    #[error("no such directory entry: {0}")]
    NoSuchObject(String),
    #[error("directory operation failed: {0}")]
    Other(String),
}

/// An open session against a directory service.
#[async_trait]
pub trait DirectoryConnection: Send + Sync {
    /// Creates the entry `dn` holding `value` in `attribute`.
    async fn add(&self, dn: &str, attribute: &str, value: Vec<u8>) -> Result<(), DirectoryError>;

    /// Reads `attribute` of the entry `dn`.
    async fn read(&self, dn: &str, attribute: &str) -> Result<Vec<u8>, DirectoryError>;

    async fn delete(&self, dn: &str) -> Result<(), DirectoryError>;
}

/// Opens directory connections.
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn DirectoryConnection>, DirectoryError>;
}

// ---------------------------------------------------------------------------
// MemoryDirectory
// ---------------------------------------------------------------------------

/// In-process directory. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    entries: Arc<DashMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, dn: &str) -> bool {
        self.entries.contains_key(dn)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl DirectoryConnection for MemoryDirectory {
    async fn add(&self, dn: &str, attribute: &str, value: Vec<u8>) -> Result<(), DirectoryError> {
        let mut entry = BTreeMap::new();
        entry.insert(attribute.to_string(), value);
        if self.entries.insert(dn.to_string(), entry).is_some() {
            debug!(dn, "replaced directory entry");
        }
        Ok(())
    }

    async fn read(&self, dn: &str, attribute: &str) -> Result<Vec<u8>, DirectoryError> {
        let entry = self
            .entries
            .get(dn)
            .ok_or_else(|| DirectoryError::NoSuchObject(dn.to_string()))?;
        entry
            .get(attribute)
            .cloned()
            .ok_or_else(|| DirectoryError::Other(format!("{dn} has no attribute {attribute}")))
    }

    async fn delete(&self, dn: &str) -> Result<(), DirectoryError> {
        self.entries
            .remove(dn)
            .map(|_| ())
            .ok_or_else(|| DirectoryError::NoSuchObject(dn.to_string()))
    }
}

#[async_trait]
impl DirectoryConnector for MemoryDirectory {
    async fn connect(&self) -> Result<Arc<dyn DirectoryConnection>, DirectoryError> {
        Ok(Arc::new(self.clone()))
    }
}

// ---------------------------------------------------------------------------
// DirectoryContextStore
// ---------------------------------------------------------------------------

/// Escapes an attribute value for use in a DN string (RFC 4514 section 2.4).
///
/// `=` is escaped as well so a value never reads as a further attribute.
fn escape_rdn_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        match c {
            '"' | '+' | ',' | ';' | '<' | '>' | '\\' | '=' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '#' if i == 0 => escaped.push_str("\\#"),
            ' ' if i == 0 || i == last => escaped.push_str("\\ "),
            '\0' => escaped.push_str("\\00"),
            _ => escaped.push(c),
        }
    }
    escaped
}

pub struct DirectoryContextStore {
    connector: Arc<dyn DirectoryConnector>,
    connection: Mutex<Option<Arc<dyn DirectoryConnection>>>,
    config: DirectoryStoreConfig,
    reconnect: ReconnectPolicy,
}

impl DirectoryContextStore {
    #[must_use]
    pub fn new(
        connector: Arc<dyn DirectoryConnector>,
        config: DirectoryStoreConfig,
        reconnect: ReconnectPolicy,
    ) -> Self {
        Self {
            connector,
            connection: Mutex::new(None),
            config,
            reconnect,
        }
    }

    /// Distinguished name of the entry holding `key`.
    ///
    /// The key is escaped so it always forms a single RDN value below `base_dn`.
    #[must_use]
    pub fn entry_dn(&self, key: &str) -> String {
        format!(
            "{}={},{}",
            self.config.rdn_attribute,
            escape_rdn_value(key),
            self.config.base_dn
        )
    }

    async fn connection(&self) -> BusResult<Arc<dyn DirectoryConnection>> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(Arc::clone(conn));
        }
        let conn = self
            .connector
            .connect()
            .await
            .map_err(|e| BusError::communication("cannot connect to directory").with_source(e))?;
        *slot = Some(Arc::clone(&conn));
        debug!("opened directory connection");
        Ok(conn)
    }

    /// Drops the cached connection if it is still the one that failed.
    async fn discard(&self, failed: &Arc<dyn DirectoryConnection>) {
        let mut slot = self.connection.lock().await;
        if slot.as_ref().is_some_and(|conn| Arc::ptr_eq(conn, failed)) {
            *slot = None;
        }
    }

    fn map_error(key: &str, err: DirectoryError) -> BusError {
        match err {
            DirectoryError::NoSuchObject(_) => BusError::not_found(ErrorKind::IllegalInput, key),
            DirectoryError::Communication(_) => {
                BusError::communication(format!("directory unreachable for {key}")).with_source(err)
            }
            DirectoryError::Other(_) => {
                BusError::infrastructure(format!("directory operation failed for {key}"))
                    .with_source(err)
            }
        }
    }

    async fn run<T, F, Fut>(&self, key: &str, op: F) -> BusResult<T>
    where
        F: Fn(Arc<dyn DirectoryConnection>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, DirectoryError>> + Send,
        T: Send,
    {
        let conn = self.connection().await?;
        match op(Arc::clone(&conn)).await {
            Err(DirectoryError::Communication(reason)) if self.reconnect.enabled => {
                warn!(key, %reason, "directory connection failed, reconnecting once");
                self.discard(&conn).await;
                let fresh = self.connection().await?;
                op(fresh).await.map_err(|e| Self::map_error(key, e))
            }
            result => result.map_err(|e| Self::map_error(key, e)),
        }
    }
}

#[async_trait]
impl CallContextStore for DirectoryContextStore {
    async fn store(&self, ctx: &CallContext) -> BusResult<String> {
        let key = ctx.key();
        check_key(&key)?;
        let bytes = ctx.to_bytes()?;
        let dn = self.entry_dn(&key);
        let attribute = self.config.data_attribute.clone();

        self.run(&key, move |conn| {
            let dn = dn.clone();
            let attribute = attribute.clone();
            let bytes = bytes.clone();
            async move {
                match conn.delete(&dn).await {
                    Ok(()) | Err(DirectoryError::NoSuchObject(_)) => {}
                    Err(e) => return Err(e),
                }
                conn.add(&dn, &attribute, bytes).await
            }
        })
        .await?;

        debug!(key = %key, "stored call context entry");
        Ok(key)
    }

    async fn restore(&self, key: &str) -> BusResult<CallContext> {
        check_key(key)?;
        let dn = self.entry_dn(key);
        let attribute = self.config.data_attribute.clone();

        let bytes = self
            .run(key, move |conn| {
                let dn = dn.clone();
                let attribute = attribute.clone();
                async move {
                    let bytes = conn.read(&dn, &attribute).await?;
                    conn.delete(&dn).await?;
                    Ok(bytes)
                }
            })
            .await?;

        CallContext::from_bytes(&bytes)
    }

    async fn remove(&self, key: &str) -> BusResult<()> {
        check_key(key)?;
        let dn = self.entry_dn(key);
        self.run(key, move |conn| {
            let dn = dn.clone();
            async move {
                match conn.delete(&dn).await {
                    Ok(()) | Err(DirectoryError::NoSuchObject(_)) => Ok(()),
                    Err(e) => Err(e),
                }
            }
        })
        .await
    }
}
