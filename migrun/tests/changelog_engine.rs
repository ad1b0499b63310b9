mod support;

use migrun::{ChangeSetState, ChangelogError, ExecType, ExecutorState, MigrationExecutor, RunnerError};
use support::{PEOPLE_CHANGELOG, Project};

#[tokio::test]
async fn test_run_applies_changelog() {
    let project = Project::new();
    project.write_changelog("db/changes.sql", PEOPLE_CHANGELOG);

    let mut executor = MigrationExecutor::new();
    let report = executor.run(&project.spec(), project.request("db/changes.sql")).await.unwrap();

    assert_eq!(report.applied.len(), 2);
    assert!(report.applied.iter().all(|cs| cs.exec_type == ExecType::Executed));
    assert_eq!(report.applied[0].file, "db/changes.sql");
    assert_eq!(report.skipped, 0);
    assert_eq!(project.count("SELECT COUNT(*) FROM person").await, 2);
    assert_eq!(project.count("SELECT COUNT(*) FROM liquibasechangelog").await, 2);
    assert_eq!(
        project
            .count("SELECT COUNT(*) FROM liquibasechangeloglock WHERE LOCKED = TRUE")
            .await,
        0
    );
    assert_eq!(executor.state(), ExecutorState::Closed);
}

#[tokio::test]
async fn test_second_run_applies_nothing() {
    let project = Project::new();
    project.write_changelog("changes.sql", PEOPLE_CHANGELOG);

    let mut executor = MigrationExecutor::new();
    executor.run(&project.spec(), project.request("changes.sql")).await.unwrap();
    let second = executor.run(&project.spec(), project.request("changes.sql")).await.unwrap();

    assert!(second.applied.is_empty());
    assert_eq!(second.skipped, 2);
    assert_eq!(project.count("SELECT COUNT(*) FROM person").await, 2);
}

#[tokio::test]
async fn test_new_changesets_are_applied_incrementally() {
    let project = Project::new();
    project.write_changelog("changes.sql", PEOPLE_CHANGELOG);
    let mut executor = MigrationExecutor::new();
    executor.run(&project.spec(), project.request("changes.sql")).await.unwrap();

    let extended = format!("{PEOPLE_CHANGELOG}\n--changeset bob:3\nINSERT INTO person (id, name) VALUES (3, 'Linus');\n");
    project.write_changelog("changes.sql", &extended);
    let report = executor.run(&project.spec(), project.request("changes.sql")).await.unwrap();

    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.applied[0].id, "3");
    assert_eq!(project.count("SELECT MAX(ORDEREXECUTED) FROM liquibasechangelog").await, 3);
}

#[tokio::test]
async fn test_edited_changeset_is_checksum_mismatch() {
    let project = Project::new();
    project.write_changelog("changes.sql", PEOPLE_CHANGELOG);
    let mut executor = MigrationExecutor::new();
    executor.run(&project.spec(), project.request("changes.sql")).await.unwrap();

    let edited = PEOPLE_CHANGELOG.replace("'Grace'", "'Hopper'");
    let extended = format!("{edited}\n--changeset bob:3\nCREATE TABLE pet (id INTEGER);\n");
    project.write_changelog("changes.sql", &extended);

    let err = executor.run(&project.spec(), project.request("changes.sql")).await.unwrap_err();
    assert!(matches!(
        err,
        RunnerError::MigrationExecution(ChangelogError::ChecksumMismatch { ref id, .. }) if id == "2"
    ));
    // Validation happens before anything runs.
    assert_eq!(
        project
            .count("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'pet'")
            .await,
        0
    );
    assert_eq!(
        project
            .count("SELECT COUNT(*) FROM liquibasechangeloglock WHERE LOCKED = TRUE")
            .await,
        0
    );
}

#[tokio::test]
async fn test_run_on_change_reruns_edited_changeset() {
    let project = Project::new();
    let changelog = "--liquibase formatted sql\n\
                     --changeset dev:table\nCREATE TABLE setting (name VARCHAR(50), value VARCHAR(50));\n\
                     --changeset dev:view runOnChange:true\nDROP VIEW IF EXISTS setting_view;\nCREATE VIEW setting_view AS SELECT name FROM setting;\n";
    project.write_changelog("changes.sql", changelog);
    let mut executor = MigrationExecutor::new();
    executor.run(&project.spec(), project.request("changes.sql")).await.unwrap();

    project.write_changelog("changes.sql", &changelog.replace("SELECT name FROM", "SELECT name, value FROM"));
    let report = executor.run(&project.spec(), project.request("changes.sql")).await.unwrap();

    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.applied[0].exec_type, ExecType::Reran);
    assert_eq!(
        project
            .count("SELECT COUNT(*) FROM liquibasechangelog WHERE EXECTYPE = 'RERAN'")
            .await,
        1
    );
}

#[tokio::test]
async fn test_failing_changeset_is_rolled_back_and_not_recorded() {
    let project = Project::new();
    project.write_changelog(
        "changes.sql",
        "--liquibase formatted sql\n\
         --changeset dev:1\nCREATE TABLE a (id INTEGER);\n\
         --changeset dev:2\nINSERT INTO a VALUES (1);\nINSERT INTO missing_table VALUES (1);\n",
    );

    let mut executor = MigrationExecutor::new();
    let err = executor.run(&project.spec(), project.request("changes.sql")).await.unwrap_err();

    assert!(matches!(
        err,
        RunnerError::MigrationExecution(ChangelogError::ChangeSetFailed { ref id, .. }) if id == "2"
    ));
    assert_eq!(project.count("SELECT COUNT(*) FROM a").await, 0);
    assert_eq!(project.count("SELECT COUNT(*) FROM liquibasechangelog").await, 1);
    assert_eq!(
        executor.transitions(),
        &[
            ExecutorState::Idle,
            ExecutorState::Connecting,
            ExecutorState::Migrating,
            ExecutorState::Failed,
            ExecutorState::Closed
        ]
    );
}

#[tokio::test]
async fn test_fail_on_error_false_continues() {
    let project = Project::new();
    project.write_changelog(
        "changes.sql",
        "--liquibase formatted sql\n\
         --changeset dev:1 failOnError:false\nINSERT INTO missing_table VALUES (1);\n\
         --changeset dev:2\nCREATE TABLE b (id INTEGER);\n",
    );

    let mut executor = MigrationExecutor::new();
    let report = executor.run(&project.spec(), project.request("changes.sql")).await.unwrap();

    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.applied[0].id, "2");
    assert_eq!(project.count("SELECT COUNT(*) FROM liquibasechangelog").await, 1);
}

#[tokio::test]
async fn test_missing_changelog_is_reported() {
    let project = Project::new();
    let mut executor = MigrationExecutor::new();

    let err = executor.run(&project.spec(), project.request("nope.sql")).await.unwrap_err();
    assert!(matches!(
        err,
        RunnerError::MigrationExecution(ChangelogError::ResourceNotFound { ref path, .. }) if path == "nope.sql"
    ));
    assert_eq!(executor.state(), ExecutorState::Closed);
}

#[tokio::test]
async fn test_includes_are_applied_in_order() {
    let project = Project::new();
    project.write_changelog(
        "db/master.sql",
        "--liquibase formatted sql\n--include file:tables.sql relativeToChangelogFile:true\n\
         --changeset dev:seed\nINSERT INTO t VALUES (1);\n",
    );
    project.write_changelog("db/tables.sql", "--liquibase formatted sql\n--changeset dev:t\nCREATE TABLE t (id INTEGER);\n");

    let mut executor = MigrationExecutor::new();
    let report = executor.run(&project.spec(), project.request("db/master.sql")).await.unwrap();

    let files: Vec<_> = report.applied.iter().map(|cs| cs.file.as_str()).collect();
    assert_eq!(files, vec!["db/tables.sql", "db/master.sql"]);
}

#[tokio::test]
async fn test_status_reports_pending_then_executed() {
    let project = Project::new();
    project.write_changelog("changes.sql", PEOPLE_CHANGELOG);
    let mut executor = MigrationExecutor::new();

    let before = executor.status(&project.spec(), project.request("changes.sql")).await.unwrap();
    assert!(before.iter().all(|cs| cs.state == ChangeSetState::Pending));
    assert_eq!(project.count("SELECT COUNT(*) FROM liquibasechangelog").await, 0);

    executor.run(&project.spec(), project.request("changes.sql")).await.unwrap();
    let after = executor.status(&project.spec(), project.request("changes.sql")).await.unwrap();
    assert!(after.iter().all(|cs| cs.state == ChangeSetState::Executed));
}

#[tokio::test]
async fn test_release_locks_clears_stale_lock() {
    let project = Project::new();
    project.write_changelog("changes.sql", PEOPLE_CHANGELOG);
    let mut executor = MigrationExecutor::new();
    executor.run(&project.spec(), project.request("changes.sql")).await.unwrap();

    let mut conn = project.connect().await;
    sqlx::query("UPDATE liquibasechangeloglock SET LOCKED = TRUE, LOCKEDBY = 'crashed-host' WHERE ID = 1")
        .execute(&mut conn)
        .await
        .unwrap();
    drop(conn);

    let holder = executor.release_locks(&project.spec()).await.unwrap();
    assert_eq!(holder.as_deref(), Some("crashed-host"));
    assert_eq!(
        project
            .count("SELECT COUNT(*) FROM liquibasechangeloglock WHERE LOCKED = TRUE")
            .await,
        0
    );
}
