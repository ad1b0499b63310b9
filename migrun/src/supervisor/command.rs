//! Command-line templates for the managed server.

use std::path::{Path, PathBuf};

const DEFAULT_SERVER_BINARY: &str = "mysqld";
const DEFAULT_INSTALL_BINARY: &str = "mysql_install_db";

/// How to launch (and first-time initialize) the database server.
///
/// Arguments may contain `{port}`, `{base_dir}` and `{data_dir}`; they are
/// substituted when the process is spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCommand {
    pub binary: PathBuf,
    pub args: Vec<String>,
    /// Run once against an empty data directory before the first start.
    pub install_binary: Option<PathBuf>,
    pub install_args: Vec<String>,
}

impl Default for ServerCommand {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_SERVER_BINARY),
            args: default_server_args(),
            install_binary: Some(PathBuf::from(DEFAULT_INSTALL_BINARY)),
            install_args: default_install_args(),
        }
    }
}

pub fn default_server_args() -> Vec<String> {
    [
        "--no-defaults",
        "--console",
        "--basedir={base_dir}",
        "--datadir={data_dir}",
        "--port={port}",
        "--socket={data_dir}/mysqld.sock",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

pub fn default_install_args() -> Vec<String> {
    [
        "--no-defaults",
        "--basedir={base_dir}",
        "--datadir={data_dir}",
        "--force",
        "--skip-name-resolve",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl ServerCommand {
    /// Command that ignores placeholders and just runs `binary args...`.
    pub fn new(binary: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            binary: binary.into(),
            args: args.into_iter().map(Into::into).collect(),
            install_binary: None,
            install_args: Vec::new(),
        }
    }

    pub fn server_args(&self, port: u16, base_dir: &Path, data_dir: &Path) -> Vec<String> {
        expand(&self.args, Some(port), base_dir, data_dir)
    }

    pub fn install_args(&self, base_dir: &Path, data_dir: &Path) -> Vec<String> {
        expand(&self.install_args, None, base_dir, data_dir)
    }
}

fn expand(template: &[String], port: Option<u16>, base_dir: &Path, data_dir: &Path) -> Vec<String> {
    let base_dir = base_dir.display().to_string();
    let data_dir = data_dir.display().to_string();
    let port = port.map(|p| p.to_string()).unwrap_or_default();

    template
        .iter()
        .map(|arg| {
            arg.replace("{port}", &port)
                .replace("{base_dir}", &base_dir)
                .replace("{data_dir}", &data_dir)
        })
        .collect()
}
