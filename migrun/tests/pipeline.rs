mod support;

use std::path::Path;

use migrun::{
    ChangelogError, DatabaseServer, InstanceDirs, MigrationExecutor, RunnerError, RunnerResult, supervised,
};
use support::{PEOPLE_CHANGELOG, Project};

/// Records lifecycle calls instead of running a process.
#[derive(Default)]
struct RecordingServer {
    events: Vec<String>,
}

impl DatabaseServer for RecordingServer {
    type Handle = u16;

    async fn start(&mut self, port: u16, base_dir: &Path, _data_dir: &Path) -> RunnerResult<u16> {
        self.events.push(format!("start {port} {}", base_dir.display()));
        Ok(port)
    }

    async fn stop(&mut self, port: u16) -> RunnerResult<()> {
        self.events.push(format!("stop {port}"));
        Ok(())
    }
}

fn with_port(project: &Project) -> migrun::ConnectionSpec {
    // SQLite has no port; the fake server only needs one to be present in the URL.
    migrun::ConnectionSpec::new(
        "sqlite",
        format!("jdbc:sqlite:{}?port=:4406/", project.database_path().display()),
        "",
        "",
    )
}

#[tokio::test]
async fn test_migration_runs_between_start_and_stop() {
    let project = Project::new();
    project.write_changelog("changes.sql", PEOPLE_CHANGELOG);
    let spec = with_port(&project);
    let dirs = InstanceDirs::new("/srv/base", "/srv/data");

    let mut server = RecordingServer::default();
    let mut executor = MigrationExecutor::new();
    let report = supervised(&mut server, &spec, &dirs, async || {
        executor.run(&spec, project.request("changes.sql")).await
    })
    .await
    .unwrap();

    assert_eq!(report.applied.len(), 2);
    assert_eq!(server.events, vec!["start 4406 /srv/base", "stop 4406"]);
}

#[tokio::test]
async fn test_server_stopped_when_migration_fails() {
    let project = Project::new();
    project.write_changelog("changes.sql", "--liquibase formatted sql\n--changeset dev:1\nNOT VALID SQL;\n");
    let spec = with_port(&project);
    let dirs = InstanceDirs::new("/srv/base", "/srv/data");

    let mut server = RecordingServer::default();
    let mut executor = MigrationExecutor::new();
    let err = supervised(&mut server, &spec, &dirs, async || {
        executor.run(&spec, project.request("changes.sql")).await
    })
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        RunnerError::MigrationExecution(ChangelogError::ChangeSetFailed { .. })
    ));
    assert_eq!(server.events, vec!["start 4406 /srv/base", "stop 4406"]);
    assert_eq!(executor.transitions().last(), Some(&migrun::ExecutorState::Closed));
}

#[tokio::test]
async fn test_url_without_port_never_starts_server() {
    let project = Project::new();
    let mut server = RecordingServer::default();
    let dirs = InstanceDirs::new("/srv/base", "/srv/data");

    let err = supervised(&mut server, &project.spec(), &dirs, async || Ok(()))
        .await
        .unwrap_err();

    assert!(matches!(err, RunnerError::MalformedConnectionString { .. }));
    assert!(server.events.is_empty());
}
