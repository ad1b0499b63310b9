use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type returned by the runner's public operations.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The connection URL has no `:<port>/` segment (or the port does not fit).
    #[error("malformed connection string '{url}': expected a ':<port>/' segment")]
    MalformedConnectionString { url: String },

    /// The managed database server did not come up.
    #[error("database server failed to start: {reason}")]
    ProcessStartFailure { reason: String },

    /// The managed database server could not be shut down cleanly.
    #[error("database server failed to stop: {reason}")]
    ProcessStopFailure { reason: String },

    /// Driver could not be resolved, or the database refused the connection.
    #[error("connection error: {message}")]
    ConnectionError {
        message: String,
        #[source]
        source: Option<sqlx::Error>,
    },

    /// The changelog engine reported a failure.
    #[error("migration failed: {0}")]
    MigrationExecution(#[from] ChangelogError),
}

impl RunnerError {
    pub(crate) fn start_failure(reason: impl Into<String>) -> Self {
        Self::ProcessStartFailure {
            reason: reason.into(),
        }
    }

    pub(crate) fn stop_failure(reason: impl Into<String>) -> Self {
        Self::ProcessStopFailure {
            reason: reason.into(),
        }
    }

    pub(crate) fn connection(message: impl Into<String>, source: Option<sqlx::Error>) -> Self {
        Self::ConnectionError {
            message: message.into(),
            source,
        }
    }
}

/// Failures raised while loading or applying a changelog.
#[derive(Debug, Error)]
pub enum ChangelogError {
    /// No search location produced the requested resource.
    #[error("changelog resource '{path}' not found (searched: {})", .searched.join(", "))]
    ResourceNotFound { path: String, searched: Vec<String> },

    #[error("failed to read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The changelog text is not valid formatted SQL.
    #[error("{file}:{line}: {message}")]
    Parse { file: String, line: usize, message: String },

    #[error("duplicate changeset {author}:{id} in {file}")]
    DuplicateChangeSet { id: String, author: String, file: String },

    #[error("include cycle detected at '{file}'")]
    IncludeCycle { file: String },

    /// A previously applied changeset was edited after it ran.
    #[error(
        "checksum mismatch for changeset {author}:{id} in {file} (recorded {stored}, now {computed})"
    )]
    ChecksumMismatch {
        id: String,
        author: String,
        file: String,
        stored: String,
        computed: String,
    },

    #[error("could not acquire changelog lock within {waited_secs}s (held by {})", .locked_by.as_deref().unwrap_or("unknown"))]
    LockTimeout {
        waited_secs: u64,
        locked_by: Option<String>,
    },

    /// A statement inside a changeset failed.
    #[error("changeset {author}:{id} in {file} failed: {source}")]
    ChangeSetFailed {
        id: String,
        author: String,
        file: String,
        #[source]
        source: sqlx::Error,
    },

    /// Tracking-table or lock bookkeeping failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ChangelogError {
    pub(crate) fn parse(file: &str, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            file: file.to_string(),
            line,
            message: message.into(),
        }
    }
}

pub type RunnerResult<T> = Result<T, RunnerError>;
