//! Error types for the replay engine
//!
//! Failures are recovered as locally as possible:
//! - Store failures surface from the collaborator that raised them
//! - Warmup failures are fatal for one context only
//! - Analysis failures are isolated per (action, context) unit

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Persistence collaborator failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Context warmup failed
    #[error("warmup failed: {0}")]
    Warmup(#[from] WarmupError),

    /// Noise analysis failed
    #[error("analysis failed: {0}")]
    Analysis(#[from] AnalysisError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::Warmup(WarmupError::SendFailed { .. }) => true,
            Self::Analysis(AnalysisError::Store(e)) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Persistence errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Record not found
    #[error("{entity} not found: {key}")]
    NotFound {
        /// Kind of record
        entity: &'static str,
        /// Lookup key
        key: String,
    },

    /// Backend unavailable or rejected the operation
    #[error("backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    /// Create a not-found error
    #[inline]
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

/// Context warmup errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum WarmupError {
    /// No case of the context could be found to warm up with
    #[error("no warmup case for context {context}: {source}")]
    NoWarmupCase {
        /// Context name
        context: String,
        /// Underlying lookup failure
        #[source]
        source: StoreError,
    },

    /// No sender handles the warmup case's category
    #[error("no replay sender for case type {case_type}")]
    SenderNotFound {
        /// Case category
        case_type: String,
    },

    /// A single delivery attempt failed
    #[error("warmup send failed for case {case_id}: {message}")]
    SendFailed {
        /// Warmup case
        case_id: String,
        /// Failure detail
        message: String,
    },

    /// All attempts failed
    #[error("warmup exhausted {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Last attempt's failure
        #[source]
        last: Box<WarmupError>,
    },
}

/// Noise analysis errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum AnalysisError {
    /// Loading or persisting failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Analysis task panicked or was cancelled
    #[error("analysis task aborted: {0}")]
    Aborted(String),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid config value `{field}`: {reason}")]
    Invalid {
        /// Field name
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}
