use anyhow::Result;
use clap::ValueEnum;
use colored::{ColoredString, Colorize};
use comfy_table::{Attribute, Cell, Color as TableColor, Table};
use serde::Serialize;
use std::io::Write;

use crate::theme::{ICONS, THEME};

/// Output format options for CLI commands
#[derive(Clone, Debug, ValueEnum, Default, PartialEq)]
pub enum OutputFormat {
    /// Formatted table output (default)
    #[default]
    Table,
    /// JSON output for scripting
    Json,
    /// Compact single-line output
    Compact,
}

/// Global CLI options that affect output and behavior
#[derive(Clone, Debug, Default)]
pub struct GlobalOptions {
    pub output_format: OutputFormat,
    pub quiet: bool,
    pub no_color: bool,
}

/// Data that can be rendered as a table or a single line
pub trait TableDisplay {
    fn to_table(&self, options: &GlobalOptions) -> Table;
    fn to_compact(&self) -> String;
}

pub struct OutputManager {
    pub options: GlobalOptions,
}

impl OutputManager {
    pub fn new(options: GlobalOptions) -> Self {
        if options.no_color {
            colored::control::set_override(false);
        }
        Self { options }
    }

    /// Messages other than the final result are noise in JSON mode.
    fn chatty(&self) -> bool {
        !self.options.quiet && self.options.output_format != OutputFormat::Json
    }

    fn say(&self, line: impl std::fmt::Display) {
        if self.chatty() {
            println!("{line}");
        }
    }

    fn paint(&self, text: &str, color: colored::Color) -> ColoredString {
        if self.options.no_color { text.normal() } else { text.color(color) }
    }

    /// Render the final result of a command in the selected format.
    pub fn display<T>(&self, data: &T) -> Result<()>
    where
        T: Serialize + TableDisplay,
    {
        match self.options.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(data)?),
            _ if self.options.quiet => {}
            OutputFormat::Table => println!("{}", data.to_table(&self.options)),
            OutputFormat::Compact => println!("{}", data.to_compact()),
        }
        Ok(())
    }

    pub fn success(&self, message: &str) {
        self.say(self.tagged(ICONS.success, message, THEME.success));
    }

    /// Errors are always shown, on stderr.
    pub fn error(&self, message: &str) {
        eprintln!("{}", self.tagged(ICONS.error, message, THEME.error));
    }

    pub fn warning(&self, message: &str) {
        self.say(self.tagged(ICONS.warning, message, THEME.warning));
    }

    pub fn info(&self, message: &str) {
        self.say(self.tagged(ICONS.info, message, THEME.info));
    }

    pub fn heading(&self, text: &str) {
        if self.options.no_color {
            self.say(format!("\n{text}\n{}", "=".repeat(text.chars().count())));
        } else {
            self.say(format!("\n{}", self.paint(text, THEME.primary).bold()));
        }
    }

    pub fn key_value(&self, key: &str, value: &str) {
        self.say(format!("{}: {}", self.paint(key, THEME.key).bold(), self.paint(value, THEME.value)));
    }

    pub fn bullet(&self, text: &str) {
        self.indented(ICONS.bullet, text);
    }

    pub fn indented(&self, icon: &str, text: &str) {
        self.say(format!("  {} {text}", self.paint(icon, THEME.muted)));
    }

    /// Transient status line, replaced by the next `clear_line`.
    pub fn progress(&self, message: &str) {
        if self.chatty() {
            let line = format!("{} {message}...", ICONS.loading);
            print!("\r{}", self.paint(&line, THEME.highlight));
            std::io::stdout().flush().ok();
        }
    }

    pub fn clear_line(&self) {
        if self.chatty() {
            print!("\r{:80}\r", "");
            std::io::stdout().flush().ok();
        }
    }

    fn tagged(&self, icon: &str, message: &str, color: colored::Color) -> String {
        format!("{} {}", self.paint(icon, color), self.paint(message, color))
    }
}

/// Empty table with the bold header row `TableDisplay` implementations share.
pub fn themed_table(options: &GlobalOptions, headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(if options.no_color {
        comfy_table::presets::ASCII_FULL
    } else {
        comfy_table::presets::UTF8_FULL_CONDENSED
    });
    table.set_header(headers.iter().map(|header| {
        let cell = Cell::new(header).add_attribute(Attribute::Bold);
        if options.no_color { cell } else { cell.fg(TableColor::Cyan) }
    }));
    table
}
