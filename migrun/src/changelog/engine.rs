use std::collections::HashMap;
use std::time::Instant;

use log::{debug, info, warn};
use serde::Serialize;
use sqlx::{AnyConnection, Connection};

use super::changeset::{CHECKSUM_PREFIX, ChangeSet, ChangeSetKey};
use super::history::{self, ExecType, RanChangeSet};
use super::lock::ChangelogLock;
use super::parser::ChangelogLoader;
use super::resources::CompositeAccessor;
use crate::errors::ChangelogError;

/// A changeset applied by one update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedChangeSet {
    pub id: String,
    pub author: String,
    pub file: String,
    pub exec_type: ExecType,
}

/// Outcome of an update to the latest changeset.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub deployment_id: String,
    pub applied: Vec<AppliedChangeSet>,
    /// Changesets already applied and left alone.
    pub skipped: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeSetState {
    Executed,
    Pending,
    /// Applied, but the file has changed since.
    Modified,
    RunAlways,
}

impl std::fmt::Display for ChangeSetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ChangeSetState::Executed => "executed",
            ChangeSetState::Pending => "pending",
            ChangeSetState::Modified => "modified",
            ChangeSetState::RunAlways => "run-always",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSetStatus {
    pub id: String,
    pub author: String,
    pub file: String,
    pub state: ChangeSetState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Execute,
    Rerun,
    Skip,
    RefreshChecksum,
}

/// Applies a formatted-SQL changelog to one database connection.
pub struct ChangelogEngine {
    change_log_path: String,
    accessor: CompositeAccessor,
    lock: ChangelogLock,
}

impl ChangelogEngine {
    pub fn new(change_log_path: impl Into<String>, accessor: CompositeAccessor) -> Self {
        Self {
            change_log_path: change_log_path.into(),
            accessor,
            lock: ChangelogLock::new(),
        }
    }

    pub fn with_lock(mut self, lock: ChangelogLock) -> Self {
        self.lock = lock;
        self
    }

    /// Parse the changelog and its includes.
    pub fn load(&self) -> Result<Vec<ChangeSet>, ChangelogError> {
        ChangelogLoader::new(&self.accessor).load(&self.change_log_path)
    }

    /// Bring the database up to the latest changeset.
    ///
    /// Every changeset is validated against the history table before any SQL
    /// runs. The lock is released on success and on failure.
    pub async fn update(&self, conn: &mut AnyConnection) -> Result<UpdateReport, ChangelogError> {
        let started = Instant::now();
        let changesets = self.load()?;
        debug!("{} changesets in {}", changesets.len(), self.change_log_path);

        history::ensure_tables(conn).await?;
        self.lock.acquire(conn).await?;

        let outcome = self.apply(conn, &changesets, started).await;
        if let Err(err) = self.lock.release(conn).await {
            if outcome.is_ok() {
                return Err(err);
            }
            warn!("failed to release changelog lock: {err}");
        }
        outcome
    }

    /// Per-changeset state without changing anything but missing tables.
    pub async fn status(&self, conn: &mut AnyConnection) -> Result<Vec<ChangeSetStatus>, ChangelogError> {
        let changesets = self.load()?;
        history::ensure_tables(conn).await?;
        let ran = history::ran_changesets(conn).await?;

        Ok(changesets
            .iter()
            .map(|cs| ChangeSetStatus {
                id: cs.id.clone(),
                author: cs.author.clone(),
                file: cs.file.clone(),
                state: state_of(cs, ran.get(&cs.key())),
            })
            .collect())
    }

    /// Clear the lock row regardless of who holds it. Returns the previous holder.
    pub async fn release_locks(conn: &mut AnyConnection) -> Result<Option<String>, ChangelogError> {
        history::ensure_tables(conn).await?;
        let lock = ChangelogLock::new();
        let holder = lock.holder(conn).await?;
        lock.release(conn).await?;
        Ok(holder)
    }

    async fn apply(
        &self,
        conn: &mut AnyConnection,
        changesets: &[ChangeSet],
        started: Instant,
    ) -> Result<UpdateReport, ChangelogError> {
        let ran = history::ran_changesets(conn).await?;
        let actions = plan(changesets, &ran)?;

        let deployment_id = history::new_deployment_id();
        let mut order = i32::try_from(history::count(conn).await?).unwrap_or(i32::MAX);
        let mut report = UpdateReport {
            deployment_id: deployment_id.clone(),
            applied: Vec::new(),
            skipped: 0,
            elapsed_ms: 0,
        };

        for (changeset, action) in changesets.iter().zip(actions) {
            let exec_type = match action {
                Action::Skip => {
                    report.skipped += 1;
                    continue;
                }
                Action::RefreshChecksum => {
                    debug!("refreshing checksum of {}:{}", changeset.author, changeset.id);
                    history::update_checksum(conn, changeset).await?;
                    report.skipped += 1;
                    continue;
                }
                Action::Execute => ExecType::Executed,
                Action::Rerun => ExecType::Reran,
            };

            let next_order = order.saturating_add(1);
            if execute(conn, changeset, exec_type, next_order, &deployment_id).await? {
                order = next_order;
                report.applied.push(AppliedChangeSet {
                    id: changeset.id.clone(),
                    author: changeset.author.clone(),
                    file: changeset.file.clone(),
                    exec_type,
                });
            }
        }

        report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            "update complete: {} applied, {} already up to date",
            report.applied.len(),
            report.skipped
        );
        Ok(report)
    }
}

fn plan(changesets: &[ChangeSet], ran: &HashMap<ChangeSetKey, RanChangeSet>) -> Result<Vec<Action>, ChangelogError> {
    changesets
        .iter()
        .map(|cs| {
            let Some(row) = ran.get(&cs.key()) else {
                return Ok(Action::Execute);
            };
            if cs.options.run_always {
                return Ok(Action::Rerun);
            }
            match row.checksum.as_deref() {
                Some(stored) if stored == cs.checksum => Ok(Action::Skip),
                Some(stored) if stored.starts_with(CHECKSUM_PREFIX) => {
                    if cs.options.run_on_change {
                        Ok(Action::Rerun)
                    } else if cs.accepts_checksum(stored) {
                        Ok(Action::Skip)
                    } else {
                        Err(ChangelogError::ChecksumMismatch {
                            id: cs.id.clone(),
                            author: cs.author.clone(),
                            file: cs.file.clone(),
                            stored: stored.to_string(),
                            computed: cs.checksum.clone(),
                        })
                    }
                }
                _ => Ok(Action::RefreshChecksum),
            }
        })
        .collect()
}

fn state_of(cs: &ChangeSet, row: Option<&RanChangeSet>) -> ChangeSetState {
    let Some(row) = row else {
        return ChangeSetState::Pending;
    };
    if cs.options.run_always {
        return ChangeSetState::RunAlways;
    }
    match row.checksum.as_deref() {
        Some(stored) if stored.starts_with(CHECKSUM_PREFIX) && stored != cs.checksum && !cs.accepts_checksum(stored) => {
            ChangeSetState::Modified
        }
        _ => ChangeSetState::Executed,
    }
}

/// Run one changeset and record it. `Ok(false)` means it failed but was
/// marked `failOnError:false`.
async fn execute(
    conn: &mut AnyConnection,
    changeset: &ChangeSet,
    exec_type: ExecType,
    order: i32,
    deployment_id: &str,
) -> Result<bool, ChangelogError> {
    info!("applying changeset {}:{} from {}", changeset.author, changeset.id, changeset.file);
    let statements = changeset.statements();

    let outcome = if changeset.options.run_in_transaction {
        let mut tx = conn.begin().await?;
        match run_statements(&mut tx, &statements).await {
            Ok(()) => {
                history::record(&mut tx, changeset, exec_type, order, deployment_id).await?;
                tx.commit().await?;
                Ok(())
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!("rollback of {}:{} failed: {rollback}", changeset.author, changeset.id);
                }
                Err(err)
            }
        }
    } else {
        match run_statements(conn, &statements).await {
            Ok(()) => {
                history::record(conn, changeset, exec_type, order, deployment_id).await?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    };

    match outcome {
        Ok(()) => Ok(true),
        Err(source) if changeset.options.fail_on_error => Err(ChangelogError::ChangeSetFailed {
            id: changeset.id.clone(),
            author: changeset.author.clone(),
            file: changeset.file.clone(),
            source,
        }),
        Err(source) => {
            warn!(
                "changeset {}:{} failed and is marked failOnError:false, continuing: {source}",
                changeset.author, changeset.id
            );
            Ok(false)
        }
    }
}

async fn run_statements(conn: &mut AnyConnection, statements: &[String]) -> Result<(), sqlx::Error> {
    for statement in statements {
        debug!("executing: {statement}");
        sqlx::raw_sql(statement).execute(&mut *conn).await?;
    }
    Ok(())
}
