//! # migrun
//!
//! Applies a Liquibase-style changelog to a database server that the runner
//! starts and stops itself.
//!
//! ```no_run
//! use migrun::{
//!     ConnectionSpec, InstanceDirs, MigrationExecutor, MigrationRequest, ProcessSupervisor, ServerCommand,
//!     supervised,
//! };
//!
//! # async fn example() -> migrun::RunnerResult<()> {
//! let spec = ConnectionSpec::new("com.mysql.cj.jdbc.Driver", "jdbc:mysql://localhost:3316/openmrs", "root", "");
//! let dirs = InstanceDirs::new("target/mysql", "target/mysql/data");
//! let request = MigrationRequest::new("liquibase-schema-only.sql", vec!["src/main/resources".into()]);
//!
//! let mut server = ProcessSupervisor::new(ServerCommand::default());
//! let mut executor = MigrationExecutor::new();
//! let report = supervised(&mut server, &spec, &dirs, async || executor.run(&spec, request).await).await?;
//! println!("{} changesets applied", report.applied.len());
//! # Ok(())
//! # }
//! ```

pub mod changelog;
pub mod connection;
pub mod errors;
pub mod executor;
pub mod pipeline;
pub mod supervisor;

pub use changelog::{ChangeSetState, ChangeSetStatus, ChangelogEngine, ExecType, UpdateReport};
pub use connection::{ConnectionSpec, DriverKind, resolve_port};
pub use errors::{ChangelogError, RunnerError, RunnerResult};
pub use executor::{ExecutorState, MigrationExecutor, MigrationRequest};
pub use pipeline::{DatabaseServer, InstanceDirs, supervised};
pub use supervisor::{ProcessHandle, ProcessState, ProcessSupervisor, ServerCommand};
