pub mod init;
pub mod locks;
pub mod run;
pub mod status;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use migrun::{
    ConnectionSpec, InstanceDirs, MigrationRequest, ProcessSupervisor, RunnerResult, ServerCommand, supervised,
};

use crate::context::{ProjectContext, expand_env};
use crate::output::OutputManager;

/// Connection and server flags shared by every database command.
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Driver identifier, e.g. com.mysql.cj.jdbc.Driver (inferred from the URL if omitted)
    #[arg(long, env = "MIGRUN_DRIVER")]
    pub driver: Option<String>,

    /// JDBC connection URL; must contain ':<port>/' when the server is managed
    #[arg(long, env = "MIGRUN_URL")]
    pub url: Option<String>,

    /// Database user
    #[arg(long, env = "MIGRUN_USERNAME")]
    pub username: Option<String>,

    /// Database password
    #[arg(long, env = "MIGRUN_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Base directory of the managed server instance
    #[arg(long, env = "MIGRUN_BASE_DIR")]
    pub base_dir: Option<PathBuf>,

    /// Data directory of the managed server instance
    #[arg(long, env = "MIGRUN_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Changelog to apply, looked up in the resource paths first
    #[arg(long = "change-log-file", env = "MIGRUN_CHANGELOG")]
    pub change_log_file: Option<String>,

    /// Directory searched for changelog files (repeatable, in order)
    #[arg(long = "resource-path", value_name = "DIR")]
    pub resource_paths: Vec<PathBuf>,

    /// Connect to an already running database instead of starting one
    #[arg(long)]
    pub no_server: bool,
}

/// Flags, environment and `migrun.toml` merged into one invocation's settings.
#[derive(Debug)]
pub struct Settings {
    pub spec: ConnectionSpec,
    pub dirs: InstanceDirs,
    pub managed: bool,
    pub create_database: bool,
    pub server_command: ServerCommand,
    pub change_log_file: Option<String>,
    pub resource_paths: Vec<PathBuf>,
}

impl Settings {
    pub fn resolve(args: ConnectionArgs, ctx: &ProjectContext) -> Result<Self> {
        let database = &ctx.config.database;
        let server = &ctx.config.server;

        let url = args
            .url
            .or(from_config(database.url.as_deref())?)
            .context("No connection URL configured (use --url, MIGRUN_URL or database.url)")?;
        let driver = match args.driver.or(from_config(database.driver.as_deref())?) {
            Some(driver) => driver,
            None => driver_from_url(&url)
                .with_context(|| format!("Cannot infer a driver from '{url}' (use --driver)"))?,
        };
        let username = args
            .username
            .or(from_config(database.username.as_deref())?)
            .unwrap_or_default();
        let password = args
            .password
            .or(from_config(database.password.as_deref())?)
            .unwrap_or_default();

        let base_dir = match args.base_dir {
            Some(dir) => dir,
            None => ctx.resolve_path(&expand_env(&server.base_dir)?),
        };
        let data_dir = match args.data_dir {
            Some(dir) => dir,
            None => ctx.resolve_path(&expand_env(&server.data_dir)?),
        };

        let resource_paths = if args.resource_paths.is_empty() {
            ctx.config
                .changelog
                .resource_paths
                .iter()
                .map(|path| Ok(ctx.resolve_path(&expand_env(path)?)))
                .collect::<Result<Vec<_>>>()?
        } else {
            args.resource_paths
        };

        Ok(Self {
            spec: ConnectionSpec::new(driver, url, username, password),
            dirs: InstanceDirs::new(base_dir, data_dir),
            managed: server.managed && !args.no_server,
            create_database: server.create_database,
            server_command: server_command(ctx)?,
            change_log_file: args
                .change_log_file
                .or(from_config(ctx.config.changelog.file.as_deref())?),
            resource_paths,
        })
    }

    pub fn request(&self) -> Result<MigrationRequest> {
        let change_log = self
            .change_log_file
            .clone()
            .context("No changelog configured (use --change-log-file, MIGRUN_CHANGELOG or changelog.file)")?;
        Ok(MigrationRequest::new(change_log, self.resource_paths.clone()))
    }
}

/// Run `work` with the database available: inside a managed server's
/// lifetime, or directly with `--no-server`.
pub async fn with_database<T, F>(settings: &Settings, output: &OutputManager, work: F) -> Result<T>
where
    F: AsyncFnOnce() -> RunnerResult<T>,
{
    if !settings.managed {
        return Ok(work().await?);
    }

    output.key_value("Server", &settings.server_command.binary.display().to_string());
    output.key_value("Data directory", &settings.dirs.data_dir.display().to_string());

    let mut server = ProcessSupervisor::new(settings.server_command.clone());
    output.progress("Starting database server");
    let result = supervised(&mut server, &settings.spec, &settings.dirs, async || {
        output.clear_line();
        work().await
    })
    .await;
    output.clear_line();

    Ok(result?)
}

fn server_command(ctx: &ProjectContext) -> Result<ServerCommand> {
    let server = &ctx.config.server;
    let mut command = ServerCommand::default();

    if let Some(binary) = &server.binary {
        command.binary = expand_env(binary)?.into();
    }
    if let Some(args) = &server.args {
        command.args = args.iter().map(|arg| expand_env(arg)).collect::<Result<_>>()?;
    }
    if let Some(binary) = &server.install_binary {
        command.install_binary = Some(expand_env(binary)?.into());
    }
    if let Some(args) = &server.install_args {
        command.install_args = args.iter().map(|arg| expand_env(arg)).collect::<Result<_>>()?;
    }
    if server.skip_install {
        command.install_binary = None;
    }
    Ok(command)
}

fn from_config(value: Option<&str>) -> Result<Option<String>> {
    value.map(expand_env).transpose()
}

/// `jdbc:mysql://...` names its own driver family.
fn driver_from_url(url: &str) -> Option<String> {
    let rest = url.strip_prefix("jdbc:").unwrap_or(url);
    let subprotocol = rest.split(':').next()?;
    (!subprotocol.is_empty() && subprotocol != rest).then(|| subprotocol.to_string())
}
