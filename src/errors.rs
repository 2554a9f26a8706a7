//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Version-control collaborator failure.
    Vcs(String),
    /// The validation collaborator could not run (not a failing check).
    Validation(String),
    /// Agent runtime (process spawn, stdin write) failure.
    Runtime(String),
    /// File system path failed validation against the workspace root.
    PathViolation(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Agent identifier is not part of the fixed pool.
    UnknownAgent(String),
    /// Payload exceeds the configured byte budget.
    PayloadTooLarge {
        /// Size of the rejected payload in bytes.
        size: usize,
        /// Configured maximum in bytes.
        limit: usize,
    },
    /// The repository revision moved since the base revision was captured.
    StaleRevision {
        /// Revision the caller based its work on.
        expected: String,
        /// Revision the repository is actually at.
        actual: String,
    },
    /// Target files overlap an edit set already in flight.
    ConflictingTargets(Vec<String>),
    /// A change descriptor cannot be materialized.
    MalformedEdit(String),
    /// A restart for the agent is already running.
    RestartInProgress(String),
    /// Agent is quarantined and requires external intervention.
    Quarantined(String),
    /// The file lease was force-released before the edit set completed.
    LeaseExpired(String),
}

/// Coarse error classes used to decide retry and escalation behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry with refreshed state, bounded.
    Transient,
    /// Never retried; surfaced immediately with diagnostics.
    Structural,
    /// Escalates through resume, restart, quarantine.
    Liveness,
    /// Collaborator or environment failure.
    Infrastructure,
}

impl AppError {
    /// Classify this error for retry decisions.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::StaleRevision { .. } | Self::ConflictingTargets(_) | Self::RestartInProgress(_) => {
                ErrorClass::Transient
            }
            Self::MalformedEdit(_)
            | Self::UnknownAgent(_)
            | Self::PayloadTooLarge { .. }
            | Self::PathViolation(_) => ErrorClass::Structural,
            Self::Quarantined(_) => ErrorClass::Liveness,
            Self::Config(_)
            | Self::Db(_)
            | Self::Io(_)
            | Self::Vcs(_)
            | Self::Validation(_)
            | Self::Runtime(_)
            | Self::NotFound(_)
            | Self::LeaseExpired(_) => ErrorClass::Infrastructure,
        }
    }

    /// Whether the caller should retry with refreshed state.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Stable short identifier, used as a failing check id on rejection.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Db(_) => "db",
            Self::Io(_) => "io",
            Self::Vcs(_) => "vcs",
            Self::Validation(_) => "validation",
            Self::Runtime(_) => "runtime",
            Self::PathViolation(_) => "path_violation",
            Self::NotFound(_) => "not_found",
            Self::UnknownAgent(_) => "unknown_agent",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::StaleRevision { .. } => "stale_revision",
            Self::ConflictingTargets(_) => "conflicting_targets",
            Self::MalformedEdit(_) => "malformed_edit",
            Self::RestartInProgress(_) => "restart_in_progress",
            Self::Quarantined(_) => "quarantined",
            Self::LeaseExpired(_) => "lease_expired",
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Vcs(msg) => write!(f, "vcs: {msg}"),
            Self::Validation(msg) => write!(f, "validation: {msg}"),
            Self::Runtime(msg) => write!(f, "runtime: {msg}"),
            Self::PathViolation(msg) => write!(f, "path violation: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::UnknownAgent(agent) => write!(f, "unknown agent: {agent}"),
            Self::PayloadTooLarge { size, limit } => {
                write!(f, "payload too large: {size} bytes exceeds limit of {limit}")
            }
            Self::StaleRevision { expected, actual } => {
                write!(f, "stale revision: expected {expected}, repository is at {actual}")
            }
            Self::ConflictingTargets(paths) => {
                write!(f, "conflicting targets: {}", paths.join(", "))
            }
            Self::MalformedEdit(msg) => write!(f, "malformed edit: {msg}"),
            Self::RestartInProgress(agent) => write!(f, "restart in progress: {agent}"),
            Self::Quarantined(agent) => write!(f, "quarantined: {agent}"),
            Self::LeaseExpired(msg) => write!(f, "lease expired: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Db(format!("serialization failed: {err}"))
    }
}
