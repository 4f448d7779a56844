//! Runtime configuration.
//!
//! Every component receives its configuration struct at construction time;
//! nothing is reconfigured through setters afterwards. The whole tree can be
//! loaded from TOML, with every field optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use conduit_core::{BusError, BusResult};
use serde::Deserialize;

/// Top-level configuration of a runtime node.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Identifier stamped into every call context this node creates.
    pub provider_id: String,
    pub listener: ListenerConfig,
    pub sender: SenderConfig,
    pub invocation: InvocationConfig,
    pub store: StoreConfig,
    pub reconnect: ReconnectPolicy,
    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Configuration` for malformed TOML or invalid values.
    pub fn from_toml_str(text: &str) -> BusResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| {
            BusError::configuration("runtime configuration is not valid TOML").with_source(e)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Configuration` if the file is missing, unreadable or invalid.
    pub fn load(path: &Path) -> BusResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            BusError::configuration(format!("cannot read configuration {}", path.display()))
                .with_source(e)
        })?;
        Self::from_toml_str(&text)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Configuration` naming the offending field.
    pub fn validate(&self) -> BusResult<()> {
        self.listener.pool.validate()
    }
}

/// Channel listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// How long one poll of the transport waits for an exchange.
    pub accept_timeout_ms: u64,
    /// Pause after an idle poll before polling again.
    pub idle_sleep_ms: u64,
    /// Upper bound on waiting for in-flight dispatches when stopping.
    pub drain_timeout_ms: u64,
    pub pool: PoolConfig,
}

impl ListenerConfig {
    #[must_use]
    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }

    #[must_use]
    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            accept_timeout_ms: 1_000,
            idle_sleep_ms: 50,
            drain_timeout_ms: 30_000,
            pool: PoolConfig::default(),
        }
    }
}

/// Bounds of the dispatch worker pool.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Workers started eagerly and never retired.
    pub min_workers: usize,
    /// Hard cap on concurrent dispatches.
    pub max_workers: usize,
    /// Idle time after which a worker above `min_workers` retires.
    pub keep_alive_ms: u64,
}

impl PoolConfig {
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    /// # Errors
    ///
    /// Returns `BusError::Configuration` if `max_workers` is zero or below `min_workers`.
    pub fn validate(&self) -> BusResult<()> {
        if self.max_workers == 0 {
            return Err(BusError::configuration(
                "listener.pool.max_workers must be at least 1",
            ));
        }
        if self.min_workers > self.max_workers {
            return Err(BusError::configuration(format!(
                "listener.pool.min_workers ({}) exceeds max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 2,
            max_workers: 16,
            keep_alive_ms: 60_000,
        }
    }
}

/// Channel sender settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Timeout applied to `send_sync` calls that do not pass one. `None`
    /// leaves the wait to the transport.
    pub default_sync_timeout_ms: Option<u64>,
}

impl SenderConfig {
    #[must_use]
    pub fn default_sync_timeout(&self) -> Option<Duration> {
        self.default_sync_timeout_ms.map(Duration::from_millis)
    }
}

/// Settings of the internal consumer invocation path.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InvocationConfig {
    /// Synchronous call timeout. Values of 1 ms or less mean "no explicit timeout".
    pub call_timeout_ms: u64,
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 30_000,
        }
    }
}

/// Backend of the call-context store.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    #[default]
    Memory,
    Filesystem {
        work_dir: PathBuf,
    },
    Relational(RelationalStoreConfig),
    Directory(DirectoryStoreConfig),
}

/// Relational store settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelationalStoreConfig {
    /// Connection URL understood by the `sqlx` Any driver.
    pub url: String,
    pub table: String,
    pub key_column: String,
    pub data_column: String,
    /// SQL type of the data column used when creating the table
    /// (`BLOB` for SQLite, `BYTEA` for `PostgreSQL`).
    pub blob_type: String,
    pub max_connections: u32,
}

impl Default for RelationalStoreConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            table: "call_context".to_string(),
            key_column: "context_key".to_string(),
            data_column: "context_data".to_string(),
            blob_type: "BLOB".to_string(),
            max_connections: 4,
        }
    }
}

/// Directory-service store settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DirectoryStoreConfig {
    /// Entries are created as `<rdn_attribute>=<key>,<base_dn>`.
    pub base_dn: String,
    pub rdn_attribute: String,
    /// Binary attribute holding the serialized context.
    pub data_attribute: String,
}

impl Default for DirectoryStoreConfig {
    fn default() -> Self {
        Self {
            base_dn: "ou=contexts,dc=conduit".to_string(),
            rdn_attribute: "cn".to_string(),
            data_attribute: "callContext;binary".to_string(),
        }
    }
}

/// Reaction of stateful store connections to communication failures.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Discard the connection and retry once after a communication failure.
    pub enabled: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,conduit_runtime=debug".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
