mod commands;
mod context;
mod examples;
mod output;
mod theme;

use anyhow::Result;
use clap::{ColorChoice, Command, CommandFactory, FromArgMatches, Parser, Subcommand};
use colored::{Color as ThemeColor, ColoredString, Colorize, control::ShouldColorize};
use log::LevelFilter;
use std::path::PathBuf;

use commands::{
    init::{InitArgs, handle_init},
    locks::{ReleaseLocksArgs, handle_release_locks},
    run::{RunArgs, handle_run},
    status::{StatusArgs, handle_status},
};
use context::ProjectContext;
use examples::{ExampleGroup, command_examples};
use output::{GlobalOptions, OutputFormat, OutputManager};
use theme::{ICONS, THEME};

/// Exit status after Ctrl-C, as shells report SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;

const ENVIRONMENT_VARIABLES: &[(&str, &str)] = &[
    ("MIGRUN_DRIVER", "Driver identifier (mysql, mariadb, sqlite or a JDBC class name)"),
    ("MIGRUN_URL", "JDBC connection URL, e.g. jdbc:mysql://localhost:3316/openmrs"),
    ("MIGRUN_USERNAME", "Database user"),
    ("MIGRUN_PASSWORD", "Database password"),
    ("MIGRUN_BASE_DIR", "Base directory of the managed server"),
    ("MIGRUN_DATA_DIR", "Data directory of the managed server"),
    ("MIGRUN_CHANGELOG", "Changelog file to apply"),
    ("RUST_LOG", "Log filter, overrides --verbose (e.g. migrun::server=debug)"),
];

#[derive(Parser)]
#[command(name = "migrun")]
#[command(version)]
#[command(
    about = "Apply Liquibase-style changelogs to a managed local database server",
    long_about = r#"Database migration runner that, for one invocation:

• Reads the port from a JDBC connection URL
• Starts a local MySQL/MariaDB server on that port
• Applies a formatted-SQL changelog, tracked in liquibasechangelog
• Stops the server again, whether the migration succeeded or not

Commands:
  init           Write a migrun.toml template
  run            Apply pending changesets
  status         Show which changesets are applied or pending
  release-locks  Clear a stale changelog lock
"#
)]
#[command(subcommand_required = true, arg_required_else_help = true)]
struct Cli {
    /// Output format
    #[arg(long, value_enum, default_value = "table", global = true)]
    output: OutputFormat,

    /// Suppress output (only errors will be shown)
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Enable debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Path to migrun.toml (default: search the current directory and its parents)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Help text, colours and per-command examples layered onto the derived parser.
fn build_cli_command() -> Command {
    let use_color = ShouldColorize::from_env().should_colorize();
    let mut command = Cli::command()
        .styles(THEME.help_styles())
        .color(if use_color { ColorChoice::Auto } else { ColorChoice::Never })
        .after_long_help(render_environment(use_color));

    for example in command_examples() {
        let help = render_examples(example.groups, use_color);
        command = command.mut_subcommand(example.name, |subcommand| subcommand.after_long_help(help));
    }
    command
}

fn parse_cli() -> Cli {
    let matches = build_cli_command().get_matches();
    Cli::from_arg_matches(&matches).unwrap_or_else(|err| err.exit())
}

fn render_examples(groups: &[ExampleGroup], use_color: bool) -> String {
    let mut lines = vec![paint("Examples:", THEME.highlight, use_color).bold().to_string()];
    for group in groups {
        lines.push(format!("  {}", paint(group.title, THEME.primary, use_color).bold()));
        lines.extend(group.commands.iter().map(|command| {
            format!(
                "    {} {}",
                paint(ICONS.arrow, THEME.secondary, use_color),
                paint(command, THEME.secondary, use_color)
            )
        }));
        lines.push(String::new());
    }
    lines.join("\n")
}

fn render_environment(use_color: bool) -> String {
    let width = ENVIRONMENT_VARIABLES.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut lines = vec![paint("Environment Variables:", THEME.highlight, use_color).bold().to_string()];
    for (key, description) in ENVIRONMENT_VARIABLES {
        lines.push(format!(
            "  {}  {}",
            paint(&format!("{key:<width$}"), THEME.key, use_color).bold(),
            paint(description, THEME.value, use_color)
        ));
    }
    lines.push(String::new());
    lines.push(format!(
        "{} {}",
        paint("Tip:", THEME.highlight, use_color).bold(),
        paint("'migrun <command> --help' lists examples for each command.", THEME.secondary, use_color)
    ));
    lines.join("\n")
}

/// Uncoloured when the terminal does not take colour.
fn paint(text: &str, color: ThemeColor, use_color: bool) -> ColoredString {
    if use_color { text.color(color) } else { text.normal() }
}

#[derive(Subcommand)]
enum Commands {
    /// Write a migrun.toml template in the current directory
    Init(InitArgs),

    /// Start the server, apply pending changesets, stop the server
    Run(RunArgs),

    /// Show applied, pending and modified changesets
    Status(StatusArgs),

    /// Forcibly clear the changelog lock
    ReleaseLocks(ReleaseLocksArgs),
}

fn init_logging(verbose: bool) {
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Warn };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() {
    let cli = parse_cli();
    init_logging(cli.verbose);

    let output = OutputManager::new(GlobalOptions {
        output_format: cli.output.clone(),
        quiet: cli.quiet,
        no_color: cli.no_color,
    });

    // Dropping the unfinished command future kills a managed server.
    let outcome = tokio::select! {
        result = execute(cli, &output) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    match outcome {
        Some(Ok(())) => {}
        Some(Err(err)) => {
            output.error(&format!("Error: {err:#}"));
            std::process::exit(1);
        }
        None => {
            output.error("Interrupted");
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    }
}

async fn execute(cli: Cli, output: &OutputManager) -> Result<()> {
    let load_context = || ProjectContext::load(cli.config.as_deref());

    match cli.command {
        Commands::Init(args) => handle_init(args, output).await,
        Commands::Run(args) => handle_run(args, &load_context()?, output).await,
        Commands::Status(args) => handle_status(args, &load_context()?, output).await,
        Commands::ReleaseLocks(args) => handle_release_locks(args, &load_context()?, output).await,
    }
}
