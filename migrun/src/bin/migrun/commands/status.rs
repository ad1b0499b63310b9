use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color as TableColor, Table};
use migrun::{ChangeSetState, ChangeSetStatus, MigrationExecutor};
use serde::Serialize;

use crate::context::ProjectContext;
use crate::examples::ExampleGroup;
use crate::output::{GlobalOptions, OutputManager, TableDisplay, themed_table};

use super::{ConnectionArgs, Settings, with_database};

pub const EXAMPLES: &[ExampleGroup] = &[ExampleGroup {
    title: "Changelog Status",
    commands: &[
        "migrun status                       # Show pending and applied changesets",
        "migrun --output compact status      # One-line summary",
        "migrun status --no-server --url jdbc:sqlite:target/dev.db",
    ],
}];

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub changesets: Vec<ChangeSetStatus>,
}

impl StatusReport {
    fn count(&self, state: ChangeSetState) -> usize {
        self.changesets.iter().filter(|cs| cs.state == state).count()
    }
}

pub async fn handle_status(args: StatusArgs, ctx: &ProjectContext, output: &OutputManager) -> Result<()> {
    let settings = Settings::resolve(args.connection, ctx)?;
    let request = settings.request()?;

    output.heading("Changelog Status");
    if let Some(config_path) = &ctx.config_path {
        output.key_value("Config", &config_path.display().to_string());
    }
    output.key_value("Changelog", &request.change_log_path);

    let mut executor = MigrationExecutor::new().with_create_database(settings.create_database);
    let changesets = with_database(&settings, output, async || executor.status(&settings.spec, request).await)
        .await
        .context("Failed to read changelog status")?;

    let report = StatusReport { changesets };
    output.display(&report)?;

    let pending = report.count(ChangeSetState::Pending);
    let modified = report.count(ChangeSetState::Modified);
    if modified > 0 {
        output.warning(&format!("{modified} applied changeset(s) were modified afterwards"));
    }
    if pending == 0 {
        output.success("Database is up to date");
    } else {
        output.info(&format!("{pending} changeset(s) pending; run 'migrun run' to apply them"));
    }
    Ok(())
}

impl TableDisplay for StatusReport {
    fn to_table(&self, options: &GlobalOptions) -> Table {
        let mut table = themed_table(options, &["Author", "ID", "File", "State"]);

        for changeset in &self.changesets {
            let mut state = Cell::new(changeset.state);
            if !options.no_color {
                state = state.fg(match changeset.state {
                    ChangeSetState::Executed => TableColor::Green,
                    ChangeSetState::Pending => TableColor::Yellow,
                    ChangeSetState::Modified => TableColor::Red,
                    ChangeSetState::RunAlways => TableColor::Cyan,
                });
            }
            table.add_row(vec![
                Cell::new(&changeset.author),
                Cell::new(&changeset.id),
                Cell::new(&changeset.file),
                state,
            ]);
        }
        table
    }

    fn to_compact(&self) -> String {
        format!(
            "executed={} pending={} modified={} run_always={}",
            self.count(ChangeSetState::Executed),
            self.count(ChangeSetState::Pending),
            self.count(ChangeSetState::Modified),
            self.count(ChangeSetState::RunAlways)
        )
    }
}
