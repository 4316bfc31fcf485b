use thiserror::Error;

use crate::types::{NodeId, ResultId, TaskId};

/// Convenience alias for `Result<T, TernError>`.
pub type TernResult<T> = Result<T, TernError>;

/// Error classification for retry/escalation decisions.
///
/// - `UserError`   — the statement or the transaction shape is at fault; the
///   client must change something before retrying
/// - `Retryable`   — the whole transaction may be retried as-is
/// - `Transient`   — network or resource trouble; client MAY retry after back-off
/// - `InternalBug` — should never happen; signals a defect in the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserError,
    Retryable,
    Transient,
    InternalBug,
}

/// Top-level error type that all crate-specific errors convert into.
///
/// Nothing in the executor swallows or retries these; they propagate to the
/// statement boundary and abort the surrounding transaction.
#[derive(Error, Debug)]
pub enum TernError {
    #[error("Transaction error: {0}")]
    Txn(#[from] TxnError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Internal bug. Should never occur in production.
    /// Always carries a unique `error_code` and `debug_context` for post-mortem.
    #[error("InternalBug [{error_code}]: {message} | context: {debug_context}")]
    InternalBug {
        error_code: &'static str,
        message: String,
        debug_context: String,
    },
}

/// Transaction-level policy errors.
#[derive(Error, Debug)]
pub enum TxnError {
    /// Local (single-connection) and parallel (multi-connection) execution
    /// were mixed within one transaction.
    #[error("{message}")]
    ModeConflict {
        message: String,
        detail: String,
        hint: String,
    },
}

/// Errors surfaced while running a local task or materializing a subplan.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// The engine rejected a task's query text while planning it.
    #[error("planning {task_id} failed: {message}")]
    Planning {
        task_id: TaskId,
        query: String,
        sqlstate: String,
        message: String,
    },

    /// Raised by the single-node engine; `sqlstate` is the engine's own code.
    #[error("{message}")]
    Engine {
        query: String,
        sqlstate: String,
        message: String,
    },

    #[error(
        "the intermediate result {result_id} exceeds max_intermediate_result_kb ({limit_kb} kB)"
    )]
    ResultSizeExceeded { result_id: ResultId, limit_kb: i64 },

    #[error("subplan nesting depth {depth} exceeds max_subplan_depth ({max_depth})")]
    SubPlanDepthExceeded { depth: u32, max_depth: u32 },

    #[error("IO error while writing intermediate result: {0}")]
    Io(#[from] std::io::Error),
}

/// Cluster / transport errors.
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Transport error to {node_id}: {reason}")]
    Transport { node_id: NodeId, reason: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl TernError {
    /// Classify this error for retry/escalation decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TernError::Txn(TxnError::ModeConflict { .. }) => ErrorKind::UserError,
            TernError::Execution(ExecutionError::Planning { .. }) => ErrorKind::UserError,
            TernError::Execution(ExecutionError::Engine { .. }) => ErrorKind::UserError,
            TernError::Execution(ExecutionError::ResultSizeExceeded { .. }) => ErrorKind::UserError,
            TernError::Execution(ExecutionError::SubPlanDepthExceeded { .. }) => {
                ErrorKind::UserError
            }
            TernError::Execution(ExecutionError::Io(_)) => ErrorKind::Transient,
            TernError::Cluster(ClusterError::Transport { .. }) => ErrorKind::Transient,
            TernError::Config(_) => ErrorKind::UserError,
            TernError::InternalBug { .. } => ErrorKind::InternalBug,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Retryable)
    }

    pub fn is_user_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::UserError)
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }

    pub fn is_internal_bug(&self) -> bool {
        matches!(self.kind(), ErrorKind::InternalBug)
    }

    /// Map to a PostgreSQL SQLSTATE code. Engine errors keep the code the
    /// engine reported.
    pub fn sqlstate(&self) -> &str {
        match self {
            TernError::Execution(ExecutionError::Engine { sqlstate, .. }) => sqlstate.as_str(),
            TernError::Execution(ExecutionError::Planning { sqlstate, .. }) => sqlstate.as_str(),
            TernError::Txn(TxnError::ModeConflict { .. }) => "0A000", // feature_not_supported
            TernError::Execution(ExecutionError::ResultSizeExceeded { .. }) => "54000", // program_limit_exceeded
            TernError::Execution(ExecutionError::SubPlanDepthExceeded { .. }) => "54001", // statement_too_complex
            TernError::Execution(ExecutionError::Io(_)) => "58030", // io_error
            TernError::Cluster(ClusterError::Transport { .. }) => "08006", // connection_failure
            TernError::Config(_) => "F0000", // config_file_error
            _ => "XX000",
        }
    }

    /// Construct a transaction-mode conflict with actionable guidance.
    pub fn mode_conflict(
        message: impl Into<String>,
        detail: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        TernError::Txn(TxnError::ModeConflict {
            message: message.into(),
            detail: detail.into(),
            hint: hint.into(),
        })
    }

    /// Construct an internal bug error with error code and context.
    pub fn internal_bug(
        error_code: &'static str,
        message: impl Into<String>,
        debug_context: impl Into<String>,
    ) -> Self {
        TernError::InternalBug {
            error_code,
            message: message.into(),
            debug_context: debug_context.into(),
        }
    }

    /// Add context string to an error, preserving its classification where
    /// the variant carries a free-form message.
    pub fn with_context(self, ctx: impl Into<String>) -> Self {
        let ctx = ctx.into();
        match self {
            TernError::InternalBug {
                error_code,
                message,
                debug_context,
            } => TernError::InternalBug {
                error_code,
                message: format!("{ctx}: {message}"),
                debug_context,
            },
            TernError::Execution(ExecutionError::Engine {
                query,
                sqlstate,
                message,
            }) => TernError::Execution(ExecutionError::Engine {
                query,
                sqlstate,
                message: format!("{ctx}: {message}"),
            }),
            other => other,
        }
    }
}
