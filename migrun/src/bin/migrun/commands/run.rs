use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Table};
use migrun::{ExecType, MigrationExecutor, UpdateReport};

use crate::context::ProjectContext;
use crate::examples::ExampleGroup;
use crate::output::{GlobalOptions, OutputManager, TableDisplay, themed_table};
use crate::theme::ICONS;

use super::{ConnectionArgs, Settings, with_database};

pub const EXAMPLES: &[ExampleGroup] = &[
    ExampleGroup {
        title: "Apply Changelogs",
        commands: &[
            "migrun run                                          # Use migrun.toml",
            "migrun run --change-log-file liquibase-update.sql   # Apply a specific changelog",
            "migrun run --url jdbc:mysql://localhost:3316/openmrs --username root",
        ],
    },
    ExampleGroup {
        title: "Existing Databases",
        commands: &[
            "migrun run --no-server --url jdbc:sqlite:target/dev.db   # Skip the managed server",
            "migrun --output json run                                 # Machine-readable report",
        ],
    },
];

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

pub async fn handle_run(args: RunArgs, ctx: &ProjectContext, output: &OutputManager) -> Result<()> {
    let settings = Settings::resolve(args.connection, ctx)?;
    let request = settings.request()?;

    output.heading("Apply Changelog");
    if let Some(config_path) = &ctx.config_path {
        output.key_value("Config", &config_path.display().to_string());
    }
    output.key_value("Changelog", &request.change_log_path);
    output.key_value("Database", settings.spec.url());

    let mut executor = MigrationExecutor::new().with_create_database(settings.create_database);
    let report = with_database(&settings, output, async || executor.run(&settings.spec, request).await)
        .await
        .context("Migration failed")?;

    for applied in &report.applied {
        let icon = match applied.exec_type {
            ExecType::Executed => ICONS.applied,
            ExecType::Reran => ICONS.rerun,
        };
        output.indented(icon, &format!("{}:{} ({})", applied.author, applied.id, applied.file));
    }

    output.display(&report)?;
    if report.applied.is_empty() {
        output.success("Database is up to date");
    } else {
        output.success(&format!(
            "Applied {} changeset(s) in {}ms",
            report.applied.len(),
            report.elapsed_ms
        ));
    }
    Ok(())
}

impl TableDisplay for UpdateReport {
    fn to_table(&self, options: &GlobalOptions) -> Table {
        let mut table = themed_table(options, &["Deployment", "Applied", "Up to date", "Elapsed"]);
        table.add_row(vec![
            Cell::new(&self.deployment_id),
            Cell::new(self.applied.len()),
            Cell::new(self.skipped),
            Cell::new(format!("{}ms", self.elapsed_ms)),
        ]);
        table
    }

    fn to_compact(&self) -> String {
        format!(
            "deployment={} applied={} skipped={} elapsed_ms={}",
            self.deployment_id,
            self.applied.len(),
            self.skipped,
            self.elapsed_ms
        )
    }
}
