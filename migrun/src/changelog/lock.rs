//! The single-row `liquibasechangeloglock` table.

use std::time::{Duration, Instant};

use log::{debug, info};
use sqlx::AnyConnection;

use super::history::LOCK_TABLE;
use crate::errors::ChangelogError;

pub const LOCK_WAIT: Duration = Duration::from_secs(60);
const LOCK_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Advisory lock guarding concurrent updates of one database.
#[derive(Debug, Clone)]
pub struct ChangelogLock {
    wait: Duration,
    poll: Duration,
    owner: String,
}

impl Default for ChangelogLock {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangelogLock {
    pub fn new() -> Self {
        Self {
            wait: LOCK_WAIT,
            poll: LOCK_POLL_INTERVAL,
            owner: lock_owner(),
        }
    }

    pub fn with_wait(mut self, wait: Duration, poll: Duration) -> Self {
        self.wait = wait;
        self.poll = poll;
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Take the lock, polling until the wait period runs out.
    pub async fn acquire(&self, conn: &mut AnyConnection) -> Result<(), ChangelogError> {
        let started = Instant::now();
        let statement = format!(
            "UPDATE {LOCK_TABLE} SET LOCKED = TRUE, LOCKGRANTED = CURRENT_TIMESTAMP, LOCKEDBY = ? \
             WHERE ID = 1 AND LOCKED = FALSE"
        );

        loop {
            let result = sqlx::query(&statement)
                .bind(self.owner.as_str())
                .execute(&mut *conn)
                .await?;
            if result.rows_affected() == 1 {
                debug!("changelog lock acquired by {}", self.owner);
                return Ok(());
            }

            let holder = self.holder(conn).await?;
            if started.elapsed() + self.poll > self.wait {
                return Err(ChangelogError::LockTimeout {
                    waited_secs: self.wait.as_secs(),
                    locked_by: holder,
                });
            }
            info!(
                "waiting for changelog lock held by {}",
                holder.as_deref().unwrap_or("unknown")
            );
            tokio::time::sleep(self.poll).await;
        }
    }

    pub async fn release(&self, conn: &mut AnyConnection) -> Result<(), ChangelogError> {
        sqlx::query(&format!(
            "UPDATE {LOCK_TABLE} SET LOCKED = FALSE, LOCKGRANTED = NULL, LOCKEDBY = NULL WHERE ID = 1"
        ))
        .execute(&mut *conn)
        .await?;
        debug!("changelog lock released");
        Ok(())
    }

    /// Who holds the lock, if anyone.
    pub async fn holder(&self, conn: &mut AnyConnection) -> Result<Option<String>, ChangelogError> {
        let row: Option<(Option<String>,)> = sqlx::query_as(&format!(
            "SELECT LOCKEDBY FROM {LOCK_TABLE} WHERE ID = 1 AND LOCKED = TRUE"
        ))
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row.map(|(by,)| by.unwrap_or_else(|| "unknown".to_string())))
    }
}

fn lock_owner() -> String {
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string());
    format!("{host} (pid {})", std::process::id())
}
