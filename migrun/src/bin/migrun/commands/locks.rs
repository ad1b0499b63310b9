use anyhow::{Context, Result};
use clap::Args;
use migrun::MigrationExecutor;

use crate::context::ProjectContext;
use crate::examples::ExampleGroup;
use crate::output::OutputManager;
use crate::theme::ICONS;

use super::{ConnectionArgs, Settings, with_database};

pub const EXAMPLES: &[ExampleGroup] = &[ExampleGroup {
    title: "Recovery",
    commands: &["migrun release-locks      # Clear a lock left behind by an interrupted run"],
}];

#[derive(Args, Debug)]
pub struct ReleaseLocksArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

pub async fn handle_release_locks(args: ReleaseLocksArgs, ctx: &ProjectContext, output: &OutputManager) -> Result<()> {
    let settings = Settings::resolve(args.connection, ctx)?;

    output.heading("Release Changelog Lock");
    let mut executor = MigrationExecutor::new().with_create_database(settings.create_database);
    let holder = with_database(&settings, output, async || executor.release_locks(&settings.spec).await)
        .await
        .context("Failed to release changelog lock")?;

    match holder {
        Some(holder) => {
            output.indented(ICONS.unlock, &holder);
            output.success(&format!("Released lock held by {holder}"));
        }
        None => output.info("No lock was held"),
    }
    Ok(())
}
