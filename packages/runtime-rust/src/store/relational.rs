//! Relational [`CallContextStore`]: one row per key.
//!
//! Uses the `sqlx` Any driver so the same code serves SQLite and `PostgreSQL`.
//! Table and column names come from [`RelationalStoreConfig`] and must be
//! plain identifiers.

use async_trait::async_trait;
use conduit_core::{BusError, BusResult, CallContext, ErrorKind};
use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Row};
use tracing::{debug, info};

use super::{check_key, CallContextStore};
use crate::config::RelationalStoreConfig;

pub struct SqlContextStore {
    pool: AnyPool,
    create_sql: String,
    delete_sql: String,
    insert_sql: String,
    select_sql: String,
}

fn check_identifier(what: &str, ident: &str) -> BusResult<()> {
    let valid = !ident.is_empty()
        && ident
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !ident.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(BusError::configuration(format!(
            "relational store {what} `{ident}` is not a plain SQL identifier"
        )))
    }
}

fn db_error(message: impl Into<String>, err: sqlx::Error) -> BusError {
    BusError::infrastructure(message).with_source(err)
}

impl SqlContextStore {
    /// Connects to the database described by `config`.
    ///
    /// The table is not created; call [`SqlContextStore::initialize`] for that.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Configuration` for invalid identifiers and
    /// `BusError::Infrastructure` if the pool cannot connect.
    pub async fn connect(config: &RelationalStoreConfig) -> BusResult<Self> {
        check_identifier("table", &config.table)?;
        check_identifier("key column", &config.key_column)?;
        check_identifier("data column", &config.data_column)?;
        check_identifier("blob type", &config.blob_type)?;

        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect(&config.url)
            .await
            .map_err(|e| db_error("cannot connect to call context database", e))?;

        let RelationalStoreConfig {
            table,
            key_column: key,
            data_column: data,
            blob_type,
            ..
        } = config;

        info!(table = %table, "connected relational call context store");
        Ok(Self {
            pool,
            create_sql: format!(
                "CREATE TABLE IF NOT EXISTS {table} ({key} VARCHAR(512) PRIMARY KEY, {data} {blob_type} NOT NULL)"
            ),
            delete_sql: format!("DELETE FROM {table} WHERE {key} = $1"),
            insert_sql: format!("INSERT INTO {table} ({key}, {data}) VALUES ($1, $2)"),
            select_sql: format!("SELECT {data} FROM {table} WHERE {key} = $1"),
        })
    }

    /// Creates the context table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Infrastructure` if the statement fails.
    pub async fn initialize(&self) -> BusResult<()> {
        sqlx::query(&self.create_sql)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("cannot create call context table", e))?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl CallContextStore for SqlContextStore {
    async fn store(&self, ctx: &CallContext) -> BusResult<String> {
        let key = ctx.key();
        check_key(&key)?;
        let bytes = ctx.to_bytes()?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("cannot begin transaction", e))?;
        sqlx::query(&self.delete_sql)
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error(format!("cannot replace call context {key}"), e))?;
        sqlx::query(&self.insert_sql)
            .bind(&key)
            .bind(bytes)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error(format!("cannot insert call context {key}"), e))?;
        tx.commit()
            .await
            .map_err(|e| db_error("cannot commit call context", e))?;

        debug!(key = %key, "stored call context row");
        Ok(key)
    }

    async fn restore(&self, key: &str) -> BusResult<CallContext> {
        check_key(key)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("cannot begin transaction", e))?;
        let row = sqlx::query(&self.select_sql)
            .bind(key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error(format!("cannot read call context {key}"), e))?;
        let Some(row) = row else {
            return Err(BusError::not_found(ErrorKind::Configuration, key));
        };

        let bytes: &[u8] = row
            .try_get(0)
            .map_err(|e| db_error(format!("cannot read data of call context {key}"), e))?;
        let ctx = CallContext::from_reader(bytes)?;

        sqlx::query(&self.delete_sql)
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error(format!("cannot delete call context {key}"), e))?;
        tx.commit()
            .await
            .map_err(|e| db_error("cannot commit call context removal", e))?;

        Ok(ctx)
    }

    async fn remove(&self, key: &str) -> BusResult<()> {
        check_key(key)?;
        sqlx::query(&self.delete_sql)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error(format!("cannot delete call context {key}"), e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::full_context;

    fn sqlite_config() -> RelationalStoreConfig {
        RelationalStoreConfig {
            max_connections: 1,
            ..RelationalStoreConfig::default()
        }
    }

    async fn open() -> SqlContextStore {
        let store = SqlContextStore::connect(&sqlite_config()).await.unwrap();
        store.initialize().await.unwrap();
        store
    }

    #[tokio::test]
    async fn round_trip_deletes_row() {
        let store = open().await;
        let ctx = full_context("msg:1");

        let key = store.store(&ctx).await.unwrap();
        assert_eq!(store.restore(&key).await.unwrap(), ctx);

        let err = store.restore(&key).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn undecodable_blob_is_configuration_error() {
        let store = open().await;
        sqlx::query(&store.insert_sql)
            .bind("garbled")
            .bind(vec![0xc1_u8, 0xc1, 0xc1])
            .execute(&store.pool)
            .await
            .unwrap();

        let err = store.restore("garbled").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let store = open().await;
        store.initialize().await.unwrap();
    }

    #[tokio::test]
    async fn storing_same_key_replaces_row() {
        let store = open().await;
        let mut ctx = full_context("msg:2");
        store.store(&ctx).await.unwrap();
        ctx.operation = Some("refund".into());
        let key = store.store(&ctx).await.unwrap();

        assert_eq!(store.restore(&key).await.unwrap().operation.as_deref(), Some("refund"));
    }

    #[tokio::test]
    async fn remove_then_restore_is_not_found() {
        let store = open().await;
        let key = store.store(&full_context("msg:3")).await.unwrap();
        store.remove(&key).await.unwrap();
        assert!(store.restore(&key).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn rejects_injected_identifiers() {
        let config = RelationalStoreConfig {
            table: "ctx; DROP TABLE users".into(),
            ..sqlite_config()
        };
        let err = SqlContextStore::connect(&config).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
