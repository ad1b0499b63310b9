//! The `liquibasechangelog` history table.

use std::collections::HashMap;

use chrono::Utc;
use log::{debug, info};
use sqlx::AnyConnection;

use super::changeset::{ChangeSet, ChangeSetKey};
use crate::errors::ChangelogError;

pub const CHANGELOG_TABLE: &str = "liquibasechangelog";
pub const LOCK_TABLE: &str = "liquibasechangeloglock";

/// Written to the LIQUIBASE column so rows can be traced back to this tool.
const ENGINE_VERSION: &str = concat!("migrun-", env!("CARGO_PKG_VERSION"));

/// Columns added to the history table after its first release, with the
/// definitions used to bring older tables up to date.
const LATER_COLUMNS: &[(&str, &str)] = &[
    ("ORDEREXECUTED", "INT NOT NULL DEFAULT 0"),
    ("EXECTYPE", "VARCHAR(10) NOT NULL DEFAULT 'EXECUTED'"),
    ("CONTEXTS", "VARCHAR(255)"),
    ("LABELS", "VARCHAR(255)"),
    ("DEPLOYMENT_ID", "VARCHAR(10)"),
];

/// How a changeset row came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecType {
    Executed,
    Reran,
}

impl ExecType {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecType::Executed => "EXECUTED",
            ExecType::Reran => "RERAN",
        }
    }
}

impl std::fmt::Display for ExecType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row of the history table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RanChangeSet {
    pub key: ChangeSetKey,
    pub checksum: Option<String>,
}

/// Create both tracking tables if missing and upgrade old history layouts.
pub async fn ensure_tables(conn: &mut AnyConnection) -> Result<(), ChangelogError> {
    let changelog_ddl = format!(
        "CREATE TABLE IF NOT EXISTS {CHANGELOG_TABLE} (\
         ID VARCHAR(255) NOT NULL, \
         AUTHOR VARCHAR(255) NOT NULL, \
         FILENAME VARCHAR(255) NOT NULL, \
         DATEEXECUTED DATETIME NOT NULL, \
         ORDEREXECUTED INT NOT NULL, \
         EXECTYPE VARCHAR(10) NOT NULL, \
         MD5SUM VARCHAR(35), \
         DESCRIPTION VARCHAR(255), \
         COMMENTS VARCHAR(255), \
         TAG VARCHAR(255), \
         LIQUIBASE VARCHAR(20), \
         CONTEXTS VARCHAR(255), \
         LABELS VARCHAR(255), \
         DEPLOYMENT_ID VARCHAR(10))"
    );
    sqlx::query(&changelog_ddl).execute(&mut *conn).await?;

    for (column, definition) in LATER_COLUMNS {
        let select = format!("SELECT {column} FROM {CHANGELOG_TABLE} WHERE 1 = 0");
        if sqlx::query(&select).execute(&mut *conn).await.is_err() {
            info!("adding missing column {column} to {CHANGELOG_TABLE}");
            let alter = format!("ALTER TABLE {CHANGELOG_TABLE} ADD COLUMN {column} {definition}");
            sqlx::query(&alter).execute(&mut *conn).await?;
        }
    }

    let lock_ddl = format!(
        "CREATE TABLE IF NOT EXISTS {LOCK_TABLE} (\
         ID INT NOT NULL, \
         LOCKED BOOLEAN NOT NULL, \
         LOCKGRANTED DATETIME, \
         LOCKEDBY VARCHAR(255), \
         PRIMARY KEY (ID))"
    );
    sqlx::query(&lock_ddl).execute(&mut *conn).await?;

    let rows: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {LOCK_TABLE} WHERE ID = 1"))
        .fetch_one(&mut *conn)
        .await?;
    if rows == 0 {
        debug!("initializing {LOCK_TABLE}");
        sqlx::query(&format!("INSERT INTO {LOCK_TABLE} (ID, LOCKED) VALUES (1, FALSE)"))
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

/// Every recorded changeset, keyed by identity.
pub async fn ran_changesets(conn: &mut AnyConnection) -> Result<HashMap<ChangeSetKey, RanChangeSet>, ChangelogError> {
    let rows: Vec<(String, String, String, Option<String>)> = sqlx::query_as(&format!(
        "SELECT ID, AUTHOR, FILENAME, MD5SUM FROM {CHANGELOG_TABLE} ORDER BY DATEEXECUTED, ORDEREXECUTED"
    ))
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, author, file, checksum)| {
            let key = ChangeSetKey { id, author, file };
            (key.clone(), RanChangeSet { key, checksum })
        })
        .collect())
}

pub async fn count(conn: &mut AnyConnection) -> Result<i64, ChangelogError> {
    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {CHANGELOG_TABLE}"))
        .fetch_one(&mut *conn)
        .await?;
    Ok(total)
}

/// Record a first execution (`Executed`) or overwrite the row of a rerun.
pub async fn record(
    conn: &mut AnyConnection,
    changeset: &ChangeSet,
    exec_type: ExecType,
    order: i32,
    deployment_id: &str,
) -> Result<(), ChangelogError> {
    match exec_type {
        ExecType::Executed => {
            let insert = format!(
                "INSERT INTO {CHANGELOG_TABLE} (ID, AUTHOR, FILENAME, DATEEXECUTED, ORDEREXECUTED, EXECTYPE, \
                 MD5SUM, DESCRIPTION, COMMENTS, LIQUIBASE, CONTEXTS, LABELS, DEPLOYMENT_ID) \
                 VALUES (?, ?, ?, CURRENT_TIMESTAMP, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            );
            sqlx::query(&insert)
                .bind(changeset.id.as_str())
                .bind(changeset.author.as_str())
                .bind(changeset.file.as_str())
                .bind(order)
                .bind(exec_type.as_str())
                .bind(changeset.checksum.as_str())
                .bind(changeset.description())
                .bind(changeset.comment.as_deref().map(|c| truncate(c, 255)))
                .bind(ENGINE_VERSION)
                .bind(changeset.options.context.clone())
                .bind(changeset.options.labels.clone())
                .bind(deployment_id)
                .execute(&mut *conn)
                .await?;
        }
        ExecType::Reran => {
            let update = format!(
                "UPDATE {CHANGELOG_TABLE} SET DATEEXECUTED = CURRENT_TIMESTAMP, ORDEREXECUTED = ?, \
                 EXECTYPE = ?, MD5SUM = ?, DEPLOYMENT_ID = ? WHERE ID = ? AND AUTHOR = ? AND FILENAME = ?"
            );
            sqlx::query(&update)
                .bind(order)
                .bind(exec_type.as_str())
                .bind(changeset.checksum.as_str())
                .bind(deployment_id)
                .bind(changeset.id.as_str())
                .bind(changeset.author.as_str())
                .bind(changeset.file.as_str())
                .execute(&mut *conn)
                .await?;
        }
    }
    Ok(())
}

/// Replace a checksum written by another tool (or missing) with ours.
pub async fn update_checksum(conn: &mut AnyConnection, changeset: &ChangeSet) -> Result<(), ChangelogError> {
    let update = format!("UPDATE {CHANGELOG_TABLE} SET MD5SUM = ? WHERE ID = ? AND AUTHOR = ? AND FILENAME = ?");
    sqlx::query(&update)
        .bind(changeset.checksum.as_str())
        .bind(changeset.id.as_str())
        .bind(changeset.author.as_str())
        .bind(changeset.file.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Ten-digit deployment id shared by every row of one update.
pub fn new_deployment_id() -> String {
    format!("{:010}", Utc::now().timestamp_millis().rem_euclid(10_000_000_000))
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
