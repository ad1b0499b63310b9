use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "migrun.toml";

static ENV_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env reference pattern"));

/// Where the runner was invoked and what `migrun.toml` says.
#[derive(Debug)]
pub struct ProjectContext {
    /// Directory relative paths resolve against: the config file's directory,
    /// or the working directory when there is no config file.
    pub root_dir: PathBuf,
    pub config_path: Option<PathBuf>,
    pub config: MigrunConfig,
}

/// Contents of `migrun.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrunConfig {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub changelog: ChangelogSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub driver: Option<String>,
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Start and stop a local server around each command.
    #[serde(default = "default_true")]
    pub managed: bool,
    #[serde(default = "default_base_dir")]
    pub base_dir: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    pub binary: Option<String>,
    pub args: Option<Vec<String>>,
    pub install_binary: Option<String>,
    pub install_args: Option<Vec<String>>,
    /// Skip the first-start data directory initialization.
    #[serde(default)]
    pub skip_install: bool,
    #[serde(default = "default_true")]
    pub create_database: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            managed: true,
            base_dir: default_base_dir(),
            data_dir: default_data_dir(),
            binary: None,
            args: None,
            install_binary: None,
            install_args: None,
            skip_install: false,
            create_database: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangelogSettings {
    pub file: Option<String>,
    #[serde(default = "default_resource_paths")]
    pub resource_paths: Vec<String>,
}

impl Default for ChangelogSettings {
    fn default() -> Self {
        Self {
            file: None,
            resource_paths: default_resource_paths(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_base_dir() -> String {
    "target/mysql".to_string()
}

fn default_data_dir() -> String {
    "target/mysql/data".to_string()
}

fn default_resource_paths() -> Vec<String> {
    vec!["target/classes".to_string(), "src/main/resources".to_string()]
}

/// Written by `migrun init`.
pub const CONFIG_TEMPLATE: &str = r#"# migrun configuration
# Command-line flags and MIGRUN_* environment variables override these values.
# Strings may reference environment variables as ${NAME}.

[database]
driver = "com.mysql.cj.jdbc.Driver"
url = "jdbc:mysql://localhost:3316/openmrs?autoReconnect=true"
username = "root"
password = "${MIGRUN_PASSWORD}"

[server]
managed = true
base_dir = "target/mysql"
data_dir = "target/mysql/data"
# binary = "mysqld"
# args = ["--no-defaults", "--console", "--basedir={base_dir}", "--datadir={data_dir}", "--port={port}"]
# install_binary = "mysql_install_db"
create_database = true

[changelog]
file = "liquibase-schema-only.sql"
resource_paths = ["target/classes", "src/main/resources"]
"#;

impl ProjectContext {
    /// Load the given config file, or look for `migrun.toml` from the working
    /// directory upwards. No config file at all is fine.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        let current_dir = std::env::current_dir().context("Failed to get current directory")?;
        Self::find_from(&current_dir)
    }

    pub fn find_from(start: &Path) -> Result<Self> {
        match start.ancestors().map(|dir| dir.join(CONFIG_FILE_NAME)).find(|p| p.is_file()) {
            Some(path) => Self::from_file(&path),
            None => Ok(Self {
                root_dir: start.to_path_buf(),
                config_path: None,
                config: MigrunConfig::default(),
            }),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let config: MigrunConfig =
            toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;

        let root_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::env::current_dir().context("Failed to get current directory")?,
        };

        Ok(Self {
            root_dir,
            config_path: Some(path.to_path_buf()),
            config,
        })
    }

    /// Relative paths from the config are anchored at `root_dir`.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root_dir.join(path)
        }
    }
}

/// Replace every `${NAME}` with the environment variable's value.
pub fn expand_env(value: &str) -> Result<String> {
    let mut missing = None;
    let expanded = ENV_REFERENCE.replace_all(value, |caps: &Captures| match std::env::var(&caps[1]) {
        Ok(found) => found,
        Err(_) => {
            missing.get_or_insert_with(|| caps[1].to_string());
            String::new()
        }
    });

    match missing {
        Some(name) => anyhow::bail!("Environment variable {name} not set"),
        None => Ok(expanded.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = MigrunConfig::default();
        assert!(config.server.managed);
        assert!(config.server.create_database);
        assert_eq!(config.server.base_dir, "target/mysql");
        assert_eq!(config.changelog.resource_paths, vec!["target/classes", "src/main/resources"]);
        assert!(config.database.url.is_none());
    }

    #[test]
    fn test_template_parses() {
        let config: MigrunConfig = toml::from_str(CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.database.driver.as_deref(), Some("com.mysql.cj.jdbc.Driver"));
        assert_eq!(config.changelog.file.as_deref(), Some("liquibase-schema-only.sql"));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: MigrunConfig = toml::from_str("[server]\nmanaged = false\n").unwrap();
        assert!(!config.server.managed);
        assert_eq!(config.server.data_dir, "target/mysql/data");
        assert_eq!(config.changelog.resource_paths.len(), 2);
    }

    #[test]
    fn test_find_from_walks_up_to_config() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join(CONFIG_FILE_NAME), "[changelog]\nfile = \"a.sql\"\n").unwrap();
        let nested = root.path().join("x/y");
        std::fs::create_dir_all(&nested).unwrap();

        let ctx = ProjectContext::find_from(&nested).unwrap();
        assert_eq!(ctx.root_dir, root.path());
        assert_eq!(ctx.config.changelog.file.as_deref(), Some("a.sql"));
        assert_eq!(ctx.resolve_path("db"), root.path().join("db"));
    }

    #[test]
    fn test_find_from_without_config_uses_defaults() {
        let root = TempDir::new().unwrap();
        let ctx = ProjectContext::find_from(root.path()).unwrap();
        assert!(ctx.config_path.is_none());
        assert_eq!(ctx.root_dir, root.path());
    }

    #[test]
    fn test_invalid_config_is_error() {
        let root = TempDir::new().unwrap();
        let path = root.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[server\n").unwrap();
        assert!(ProjectContext::from_file(&path).is_err());
    }

    #[test]
    fn test_absolute_paths_are_kept() {
        let root = TempDir::new().unwrap();
        let ctx = ProjectContext::find_from(root.path()).unwrap();
        let absolute = root.path().join("elsewhere");
        assert_eq!(ctx.resolve_path(absolute.to_str().unwrap()), absolute);
    }

    #[test]
    #[serial]
    fn test_expand_env() {
        unsafe { std::env::set_var("MIGRUN_TEST_SECRET", "hunter2") };
        assert_eq!(expand_env("${MIGRUN_TEST_SECRET}").unwrap(), "hunter2");
        assert_eq!(expand_env("pre-${MIGRUN_TEST_SECRET}-post").unwrap(), "pre-hunter2-post");
        assert_eq!(expand_env("plain").unwrap(), "plain");
        unsafe { std::env::remove_var("MIGRUN_TEST_SECRET") };
    }

    #[test]
    #[serial]
    fn test_expand_env_missing_variable() {
        unsafe { std::env::remove_var("MIGRUN_TEST_MISSING") };
        let err = expand_env("${MIGRUN_TEST_MISSING}").unwrap_err();
        assert!(err.to_string().contains("MIGRUN_TEST_MISSING"));
    }
}
