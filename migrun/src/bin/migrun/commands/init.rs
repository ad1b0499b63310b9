use anyhow::{Context, Result};
use clap::Args;

use crate::context::{CONFIG_FILE_NAME, CONFIG_TEMPLATE};
use crate::examples::ExampleGroup;
use crate::output::OutputManager;

pub const EXAMPLES: &[ExampleGroup] = &[ExampleGroup {
    title: "Setup",
    commands: &[
        "migrun init            # Write migrun.toml in the current directory",
        "migrun init --force    # Overwrite an existing migrun.toml",
    ],
}];

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing migrun.toml
    #[arg(long)]
    pub force: bool,
}

pub async fn handle_init(args: InitArgs, output: &OutputManager) -> Result<()> {
    let current_dir = std::env::current_dir().context("Failed to get current directory")?;
    let path = current_dir.join(CONFIG_FILE_NAME);

    output.heading("Initialize migrun");

    if path.exists() && !args.force {
        output.warning(&format!("{} already exists", path.display()));
        anyhow::bail!("Refusing to overwrite {CONFIG_FILE_NAME} (use --force)");
    }

    tokio::fs::write(&path, CONFIG_TEMPLATE)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    output.success(&format!("Created {}", path.display()));
    output.info("Next steps:");
    output.bullet("Edit the [database] and [changelog] sections");
    output.bullet("Run 'migrun run' to apply the changelog");
    Ok(())
}
