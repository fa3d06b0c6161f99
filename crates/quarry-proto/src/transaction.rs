//! Transaction configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default time allowed to obtain a transaction slot.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(2);

/// Default time allowed for the transaction body.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationLevel {
    /// Dirty reads allowed.
    ReadUncommitted,
    /// Only committed data is visible.
    ReadCommitted,
    /// Reads within the transaction are repeatable.
    RepeatableRead,
    /// Full serializability.
    Serializable,
}

impl IsolationLevel {
    /// SQL keyword form.
    pub fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Options for batched and interactive transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionOptions {
    /// Requested isolation level; the store default when unset.
    pub isolation_level: Option<IsolationLevel>,
    /// Time allowed to obtain a connection for the transaction.
    pub max_wait: Duration,
    /// Time allowed for the transaction body.
    pub timeout: Duration,
}

impl TransactionOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the isolation level.
    pub fn with_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    /// Set the max wait.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            isolation_level: None,
            max_wait: DEFAULT_MAX_WAIT,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}
