//! Start server, do work, stop server.

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::connection::{ConnectionSpec, resolve_port};
use crate::errors::RunnerResult;

/// A database server whose lifetime the runner controls.
#[allow(async_fn_in_trait)]
pub trait DatabaseServer {
    type Handle;

    /// Start the server on `port` and wait until it accepts connections.
    async fn start(&mut self, port: u16, base_dir: &Path, data_dir: &Path) -> RunnerResult<Self::Handle>;

    async fn stop(&mut self, handle: Self::Handle) -> RunnerResult<()>;
}

/// Instance directories handed to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDirs {
    pub base_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl InstanceDirs {
    pub fn new(base_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            data_dir: data_dir.into(),
        }
    }
}

/// Run `work` against a server started on the port named in `spec`.
///
/// The server is stopped exactly once after `work` finishes, whatever its
/// outcome. A failure to stop is logged and does not replace `work`'s result.
pub async fn supervised<S, T, F>(server: &mut S, spec: &ConnectionSpec, dirs: &InstanceDirs, work: F) -> RunnerResult<T>
where
    S: DatabaseServer,
    F: AsyncFnOnce() -> RunnerResult<T>,
{
    let port = resolve_port(spec.url())?;

    info!("starting database server on port {port}");
    let handle = server.start(port, &dirs.base_dir, &dirs.data_dir).await?;

    let result = work().await;

    info!("stopping database server on port {port}");
    if let Err(err) = server.stop(handle).await {
        warn!("{err}");
    }
    result
}
