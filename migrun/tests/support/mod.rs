#![allow(dead_code)]

use std::path::{Path, PathBuf};

use migrun::{ConnectionSpec, MigrationRequest};
use sqlx::{AnyConnection, Connection};
use tempfile::TempDir;

/// A scratch project: a resource root for changelogs and a SQLite database.
pub struct Project {
    pub dir: TempDir,
}

impl Project {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        std::fs::create_dir_all(dir.path().join("resources")).expect("create resource dir");
        Self { dir }
    }

    pub fn resources(&self) -> PathBuf {
        self.dir.path().join("resources")
    }

    pub fn database_path(&self) -> PathBuf {
        self.dir.path().join("app.db")
    }

    pub fn jdbc_url(&self) -> String {
        format!("jdbc:sqlite:{}", self.database_path().display())
    }

    pub fn spec(&self) -> ConnectionSpec {
        ConnectionSpec::new("org.sqlite.JDBC", self.jdbc_url(), "", "")
    }

    pub fn request(&self, changelog: &str) -> MigrationRequest {
        MigrationRequest::new(changelog, vec![self.resources()])
    }

    /// Write a changelog beneath the resource root.
    pub fn write_changelog(&self, name: &str, content: &str) {
        let path = self.resources().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create changelog dir");
        }
        std::fs::write(path, content).expect("write changelog");
    }

    pub async fn connect(&self) -> AnyConnection {
        sqlx::any::install_default_drivers();
        AnyConnection::connect(&format!("sqlite:{}", self.database_path().display()))
            .await
            .expect("connect to test database")
    }

    pub async fn count(&self, sql: &str) -> i64 {
        let mut conn = self.connect().await;
        let value: i64 = sqlx::query_scalar(sql).fetch_one(&mut conn).await.expect("count query");
        conn.close().await.ok();
        value
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

pub const PEOPLE_CHANGELOG: &str = "\
--liquibase formatted sql

--changeset alice:1
CREATE TABLE person (id INTEGER PRIMARY KEY, name VARCHAR(100) NOT NULL);

--changeset alice:2
INSERT INTO person (id, name) VALUES (1, 'Ada');
INSERT INTO person (id, name) VALUES (2, 'Grace');
";
