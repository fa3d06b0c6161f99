//! Engine configuration.

use std::time::Duration;

use quarry_proto::TransactionOptions;

use crate::connection::PoolConfig;

/// Largest number of bound parameters placed in one statement.
pub const DEFAULT_MAX_PARAMS: usize = 30_000;

/// Parent keys per secondary query of a batch-loaded relation.
pub const DEFAULT_BATCH_CHUNK_SIZE: usize = 500;

/// Configuration for an [`Engine`](crate::Engine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Connection pool settings.
    pub pool: PoolConfig,

    /// Defaults for transactions that do not override them.
    pub transaction: TransactionOptions,

    /// Wall-clock budget of a single request outside a transaction.
    /// None means unlimited.
    pub request_timeout: Option<Duration>,

    /// Parent keys per secondary query when batch-loading relations.
    pub batch_chunk_size: usize,

    /// Parameter budget per statement for multi-row inserts.
    pub max_params: usize,

    /// Extra attempts for reads that fail with a transient connection
    /// error outside a transaction. Writes are never retried.
    pub read_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            transaction: TransactionOptions::default(),
            request_timeout: None,
            batch_chunk_size: DEFAULT_BATCH_CHUNK_SIZE,
            max_params: DEFAULT_MAX_PARAMS,
            read_retries: 1,
        }
    }
}

impl EngineConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pool configuration.
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Set the default transaction options.
    pub fn with_transaction_defaults(mut self, options: TransactionOptions) -> Self {
        self.transaction = options;
        self
    }

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the relation batch chunk size.
    pub fn with_batch_chunk_size(mut self, size: usize) -> Self {
        self.batch_chunk_size = size.max(1);
        self
    }

    /// Set the parameter budget per statement.
    pub fn with_max_params(mut self, max: usize) -> Self {
        self.max_params = max.max(1);
        self
    }

    /// Set the number of read retries.
    pub fn with_read_retries(mut self, retries: u32) -> Self {
        self.read_retries = retries;
        self
    }
}
