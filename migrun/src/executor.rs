//! Runs changelog operations over a single database connection.

use std::path::PathBuf;

use log::{debug, info};
use serde::Serialize;
use sqlx::{AnyConnection, Connection};

use crate::changelog::{ChangeSetStatus, ChangelogEngine, CompositeAccessor, UpdateReport};
use crate::connection::{ConnectionSpec, DriverKind};
use crate::errors::{ChangelogError, RunnerError, RunnerResult};

/// What to apply and where to look for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRequest {
    pub change_log_path: String,
    /// Searched in order before the plain filesystem.
    pub resource_search_paths: Vec<PathBuf>,
}

impl MigrationRequest {
    pub fn new(change_log_path: impl Into<String>, resource_search_paths: Vec<PathBuf>) -> Self {
        Self {
            change_log_path: change_log_path.into(),
            resource_search_paths,
        }
    }

    fn into_engine(self) -> ChangelogEngine {
        let accessor = CompositeAccessor::search_paths_then_filesystem(&self.resource_search_paths);
        ChangelogEngine::new(self.change_log_path, accessor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutorState {
    Idle,
    Connecting,
    Migrating,
    Succeeded,
    Failed,
    Closed,
}

/// Opens a connection, hands it to the changelog engine and always closes it.
#[derive(Debug)]
pub struct MigrationExecutor {
    transitions: Vec<ExecutorState>,
    create_database: bool,
}

impl Default for MigrationExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationExecutor {
    pub fn new() -> Self {
        Self {
            transitions: vec![ExecutorState::Idle],
            create_database: true,
        }
    }

    /// Whether to `CREATE DATABASE IF NOT EXISTS` before connecting (MySQL only).
    pub fn with_create_database(mut self, create_database: bool) -> Self {
        self.create_database = create_database;
        self
    }

    pub fn state(&self) -> ExecutorState {
        self.transitions.last().copied().unwrap_or(ExecutorState::Idle)
    }

    /// States visited by the most recent operation, starting at `Idle`.
    pub fn transitions(&self) -> &[ExecutorState] {
        &self.transitions
    }

    /// Apply every pending changeset of the requested changelog.
    pub async fn run(&mut self, spec: &ConnectionSpec, request: MigrationRequest) -> RunnerResult<UpdateReport> {
        let engine = request.into_engine();
        let report = self.with_connection(spec, async |conn| engine.update(conn).await).await?;
        info!(
            "applied {} changesets ({} up to date) in {}ms",
            report.applied.len(),
            report.skipped,
            report.elapsed_ms
        );
        Ok(report)
    }

    pub async fn status(
        &mut self,
        spec: &ConnectionSpec,
        request: MigrationRequest,
    ) -> RunnerResult<Vec<ChangeSetStatus>> {
        let engine = request.into_engine();
        self.with_connection(spec, async |conn| engine.status(conn).await).await
    }

    /// Clear a stale changelog lock. Returns who held it.
    pub async fn release_locks(&mut self, spec: &ConnectionSpec) -> RunnerResult<Option<String>> {
        self.with_connection(spec, async |conn| ChangelogEngine::release_locks(conn).await)
            .await
    }

    async fn with_connection<T, F>(&mut self, spec: &ConnectionSpec, work: F) -> RunnerResult<T>
    where
        F: AsyncFnOnce(&mut AnyConnection) -> Result<T, ChangelogError>,
    {
        self.transitions = vec![ExecutorState::Idle];
        self.enter(ExecutorState::Connecting);

        let mut conn = match self.connect(spec).await {
            Ok(conn) => conn,
            Err(err) => {
                self.enter(ExecutorState::Failed);
                self.enter(ExecutorState::Closed);
                return Err(err);
            }
        };

        self.enter(ExecutorState::Migrating);
        let result = work(&mut conn).await;
        self.enter(if result.is_ok() {
            ExecutorState::Succeeded
        } else {
            ExecutorState::Failed
        });

        if let Err(err) = conn.close().await {
            debug!("ignoring error while closing connection: {err}");
        }
        self.enter(ExecutorState::Closed);

        result.map_err(RunnerError::from)
    }

    async fn connect(&self, spec: &ConnectionSpec) -> RunnerResult<AnyConnection> {
        sqlx::any::install_default_drivers();
        let kind = spec.driver_kind()?;

        if kind == DriverKind::MySql
            && self.create_database
            && let Some(name) = spec.database_name()
        {
            create_database(spec, &name).await?;
        }

        debug!("connecting to {} as '{}'", spec.url(), spec.username());
        AnyConnection::connect(&spec.database_url()?)
            .await
            .map_err(|err| RunnerError::connection(format!("cannot connect to {}", spec.url()), Some(err)))
    }

    fn enter(&mut self, state: ExecutorState) {
        debug!("executor: {:?} -> {state:?}", self.state());
        self.transitions.push(state);
    }
}

async fn create_database(spec: &ConnectionSpec, name: &str) -> RunnerResult<()> {
    let mut admin = AnyConnection::connect(&spec.server_url()?)
        .await
        .map_err(|err| RunnerError::connection(format!("cannot connect to server for {}", spec.url()), Some(err)))?;

    let statement = format!("CREATE DATABASE IF NOT EXISTS `{}`", name.replace('`', "``"));
    let created = sqlx::raw_sql(&statement).execute(&mut admin).await;

    if let Err(err) = admin.close().await {
        debug!("ignoring error while closing connection: {err}");
    }
    created.map_err(|err| RunnerError::connection(format!("cannot create database '{name}'"), Some(err)))?;
    Ok(())
}
