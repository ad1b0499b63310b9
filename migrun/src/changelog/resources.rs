//! Locating changelog files.
//!
//! Lookups go through an ordered list of accessors; the first one that has
//! the file wins. The runner searches the configured resource roots first
//! and falls back to the plain filesystem.

use std::path::{Path, PathBuf};

use log::debug;

use crate::errors::ChangelogError;

/// A changelog file that was found.
#[derive(Debug, Clone)]
pub struct Resource {
    /// Path as referenced by the changelog (recorded in the history table).
    pub logical_path: String,
    /// Where the file was actually read from.
    pub location: PathBuf,
    pub content: String,
}

pub trait ResourceAccessor {
    /// Read `path`, or `Ok(None)` if this accessor does not have it.
    fn open(&self, path: &str) -> Result<Option<Resource>, ChangelogError>;

    /// Human-readable description of where this accessor looks.
    fn describe(&self) -> String;
}

/// Resolves paths beneath one search root.
#[derive(Debug, Clone)]
pub struct DirectoryAccessor {
    root: PathBuf,
}

impl DirectoryAccessor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ResourceAccessor for DirectoryAccessor {
    fn open(&self, path: &str) -> Result<Option<Resource>, ChangelogError> {
        let relative = path.trim_start_matches('/');
        read_if_file(path, &self.root.join(relative))
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

/// Resolves paths as given: absolute, or relative to the working directory.
#[derive(Debug, Clone, Default)]
pub struct FileSystemAccessor;

impl ResourceAccessor for FileSystemAccessor {
    fn open(&self, path: &str) -> Result<Option<Resource>, ChangelogError> {
        read_if_file(path, Path::new(path))
    }

    fn describe(&self) -> String {
        "filesystem".to_string()
    }
}

/// Ordered fallback over several accessors.
pub struct CompositeAccessor {
    accessors: Vec<Box<dyn ResourceAccessor + Send + Sync>>,
}

impl CompositeAccessor {
    pub fn new(accessors: Vec<Box<dyn ResourceAccessor + Send + Sync>>) -> Self {
        Self { accessors }
    }

    /// Search roots in order, then the filesystem.
    pub fn search_paths_then_filesystem<P: AsRef<Path>>(search_paths: &[P]) -> Self {
        let mut accessors: Vec<Box<dyn ResourceAccessor + Send + Sync>> = search_paths
            .iter()
            .map(|root| Box::new(DirectoryAccessor::new(root.as_ref())) as Box<dyn ResourceAccessor + Send + Sync>)
            .collect();
        accessors.push(Box::new(FileSystemAccessor));
        Self::new(accessors)
    }

    /// Like `open`, but a miss is an error naming every location searched.
    pub fn require(&self, path: &str) -> Result<Resource, ChangelogError> {
        self.open(path)?.ok_or_else(|| ChangelogError::ResourceNotFound {
            path: path.to_string(),
            searched: self.accessors.iter().map(|a| a.describe()).collect(),
        })
    }
}

impl ResourceAccessor for CompositeAccessor {
    fn open(&self, path: &str) -> Result<Option<Resource>, ChangelogError> {
        for accessor in &self.accessors {
            if let Some(resource) = accessor.open(path)? {
                debug!("resolved {path} via {}", accessor.describe());
                return Ok(Some(resource));
            }
        }
        Ok(None)
    }

    fn describe(&self) -> String {
        self.accessors
            .iter()
            .map(|a| a.describe())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn read_if_file(logical_path: &str, location: &Path) -> Result<Option<Resource>, ChangelogError> {
    if !location.is_file() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(location).map_err(|source| ChangelogError::Io {
        path: location.to_path_buf(),
        source,
    })?;

    Ok(Some(Resource {
        logical_path: logical_path.to_string(),
        location: location.to_path_buf(),
        content,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_first_search_path_wins() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        std::fs::create_dir_all(first.path().join("db")).unwrap();
        std::fs::create_dir_all(second.path().join("db")).unwrap();
        std::fs::write(first.path().join("db/changes.sql"), "first").unwrap();
        std::fs::write(second.path().join("db/changes.sql"), "second").unwrap();

        let accessor = CompositeAccessor::search_paths_then_filesystem(&[first.path(), second.path()]);
        let resource = accessor.require("db/changes.sql").unwrap();

        assert_eq!(resource.content, "first");
        assert_eq!(resource.logical_path, "db/changes.sql");
        assert_eq!(resource.location, first.path().join("db/changes.sql"));
    }

    #[test]
    fn test_later_search_path_used_when_earlier_misses() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        std::fs::write(second.path().join("changes.sql"), "second").unwrap();

        let accessor = CompositeAccessor::search_paths_then_filesystem(&[first.path(), second.path()]);
        assert_eq!(accessor.require("changes.sql").unwrap().content, "second");
    }

    #[test]
    fn test_falls_back_to_filesystem() {
        let root = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let file = outside.path().join("standalone.sql");
        std::fs::write(&file, "fs").unwrap();

        let accessor = CompositeAccessor::search_paths_then_filesystem(&[root.path()]);
        let resource = accessor.require(file.to_str().unwrap()).unwrap();
        assert_eq!(resource.content, "fs");
    }

    #[test]
    fn test_leading_slash_is_relative_to_search_root() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("changes.sql"), "rooted").unwrap();

        let accessor = DirectoryAccessor::new(root.path());
        let resource = accessor.open("/changes.sql").unwrap().unwrap();
        assert_eq!(resource.content, "rooted");
    }

    #[test]
    fn test_missing_resource_lists_searched_locations() {
        let root = TempDir::new().unwrap();
        let accessor = CompositeAccessor::search_paths_then_filesystem(&[root.path()]);

        let err = accessor.require("nope/missing.sql").unwrap_err();
        match err {
            ChangelogError::ResourceNotFound { path, searched } => {
                assert_eq!(path, "nope/missing.sql");
                assert_eq!(searched, vec![root.path().display().to_string(), "filesystem".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_directories_are_not_resources() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("db")).unwrap();
        let accessor = DirectoryAccessor::new(root.path());
        assert!(accessor.open("db").unwrap().is_none());
    }
}
