//! Liquibase-compatible changelog engine.
//!
//! Reads formatted-SQL changelogs, tracks applied changesets in
//! `liquibasechangelog` and serializes updates through
//! `liquibasechangeloglock`.

mod changeset;
mod engine;
mod history;
mod lock;
mod parser;
mod resources;

pub use changeset::{CHECKSUM_PREFIX, ChangeSet, ChangeSetKey, ChangeSetOptions, checksum, split_statements};
pub use engine::{AppliedChangeSet, ChangeSetState, ChangeSetStatus, ChangelogEngine, UpdateReport};
pub use history::{CHANGELOG_TABLE, ExecType, LOCK_TABLE};
pub use lock::{ChangelogLock, LOCK_WAIT};
pub use parser::{ChangelogEntry, ChangelogLoader, parse_formatted_sql};
pub use resources::{CompositeAccessor, DirectoryAccessor, FileSystemAccessor, Resource, ResourceAccessor};
