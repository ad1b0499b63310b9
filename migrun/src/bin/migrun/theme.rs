use clap::builder::Styles;
use clap::builder::styling::{AnsiColor, Color as HelpColor, RgbColor, Style};
use colored::Color;
use once_cell::sync::Lazy;

/// Colors used for terminal output and clap help.
pub struct ColorTheme {
    pub success: Color,
    pub error: Color,
    pub warning: Color,
    pub info: Color,
    pub highlight: Color,
    pub muted: Color,
    pub primary: Color,
    pub secondary: Color,
    pub key: Color,
    pub value: Color,
}

impl Default for ColorTheme {
    fn default() -> Self {
        Self {
            success: Color::Green,
            error: Color::Red,
            warning: Color::Yellow,
            info: Color::Blue,
            highlight: Color::Cyan,
            muted: Color::BrightBlack,
            primary: Color::BrightBlue,
            secondary: Color::Magenta,
            key: Color::BrightCyan,
            value: Color::White,
        }
    }
}

impl ColorTheme {
    /// The same palette for clap's `--help` output.
    pub fn help_styles(&self) -> Styles {
        let fg = |color: Color| Style::new().fg_color(Some(help_color(color)));
        Styles::styled()
            .usage(fg(self.primary).bold())
            .header(fg(self.highlight).bold())
            .literal(fg(self.secondary))
            .placeholder(fg(self.muted))
            .valid(fg(self.success))
            .invalid(fg(self.warning))
            .error(fg(self.error).bold())
    }
}

fn help_color(color: Color) -> HelpColor {
    let ansi = match color {
        Color::TrueColor { r, g, b } => return HelpColor::Rgb(RgbColor(r, g, b)),
        Color::Red | Color::BrightRed => AnsiColor::Red,
        Color::Green | Color::BrightGreen => AnsiColor::Green,
        Color::Yellow | Color::BrightYellow => AnsiColor::Yellow,
        Color::Blue => AnsiColor::Blue,
        Color::BrightBlue => AnsiColor::BrightBlue,
        Color::Magenta | Color::BrightMagenta => AnsiColor::Magenta,
        Color::Cyan => AnsiColor::Cyan,
        Color::BrightCyan => AnsiColor::BrightCyan,
        Color::BrightBlack => AnsiColor::BrightBlack,
        _ => AnsiColor::White,
    };
    HelpColor::Ansi(ansi)
}

pub static THEME: Lazy<ColorTheme> = Lazy::new(ColorTheme::default);

pub struct Icons {
    pub success: &'static str,
    pub error: &'static str,
    pub warning: &'static str,
    pub info: &'static str,
    pub arrow: &'static str,
    pub bullet: &'static str,
    pub loading: &'static str,
    pub applied: &'static str,
    pub rerun: &'static str,
    pub unlock: &'static str,
}

pub const ICONS: Icons = Icons {
    success: "✓",
    error: "✗",
    warning: "⚠",
    info: "ℹ",
    arrow: "→",
    bullet: "•",
    loading: "⟳",
    applied: "+",
    rerun: "~",
    unlock: "🔓",
};
