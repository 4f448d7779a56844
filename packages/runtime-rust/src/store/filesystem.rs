//! Filesystem [`CallContextStore`]: one file per key.
//!
//! The work directory is created on first use. Contexts are written to a
//! temporary sibling and renamed into place so a concurrent restore never
//! observes a partial file.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use conduit_core::{BusError, BusResult, CallContext, ErrorKind};
use tokio::sync::OnceCell;
use tracing::debug;

use super::{check_key, CallContextStore};

pub struct FileContextStore {
    work_dir: PathBuf,
    created: OnceCell<()>,
}

impl FileContextStore {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            created: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.work_dir.join(key)
    }

    async fn ensure_work_dir(&self) -> BusResult<()> {
        self.created
            .get_or_try_init(|| async {
                tokio::fs::create_dir_all(&self.work_dir)
                    .await
                    .map_err(|e| {
                        io_error(
                            &e,
                            format!(
                                "cannot create context work directory {}",
                                self.work_dir.display()
                            ),
                        )
                    })?;
                debug!(dir = %self.work_dir.display(), "created call context work directory");
                Ok(())
            })
            .await
            .map(|()| ())
    }
}

/// Maps an I/O failure onto the error taxonomy.
fn io_error(err: &io::Error, message: String) -> BusError {
    let cause = io::Error::new(err.kind(), err.to_string());
    match err.kind() {
        io::ErrorKind::PermissionDenied => {
            BusError::infrastructure(format!("{message}: permission denied")).with_source(cause)
        }
        _ => BusError::infrastructure(message).with_source(cause),
    }
}

#[async_trait]
impl CallContextStore for FileContextStore {
    async fn store(&self, ctx: &CallContext) -> BusResult<String> {
        let key = ctx.key();
        check_key(&key)?;
        self.ensure_work_dir().await?;

        let bytes = ctx.to_bytes()?;
        let path = self.path_for(&key);
        let staging = self.work_dir.join(format!("{key}.tmp"));

        tokio::fs::write(&staging, &bytes)
            .await
            .map_err(|e| io_error(&e, format!("cannot write {}", staging.display())))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|e| io_error(&e, format!("cannot move context into {}", path.display())))?;

        debug!(key = %key, bytes = bytes.len(), "stored call context file");
        Ok(key)
    }

    async fn restore(&self, key: &str) -> BusResult<CallContext> {
        check_key(key)?;
        let path = self.path_for(key);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BusError::not_found(ErrorKind::Configuration, key));
            }
            Err(e) => return Err(io_error(&e, format!("cannot read {}", path.display()))),
        };

        let ctx = CallContext::from_bytes(&bytes)?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            // A concurrent restore consumed the same file first.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BusError::not_found(ErrorKind::Configuration, key));
            }
            Err(e) => return Err(io_error(&e, format!("cannot delete {}", path.display()))),
        }

        Ok(ctx)
    }

    async fn remove(&self, key: &str) -> BusResult<()> {
        check_key(key)?;
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&e, format!("cannot delete {}", path.display()))),
        }
    }
}
