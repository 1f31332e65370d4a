//! Terminal output for the subcommands.

use colored::{ColoredString, Colorize};

/// How a labelled value is highlighted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Plain,
    Good,
    Warn,
}

impl Tone {
    fn paint(self, value: &str) -> ColoredString {
        match self {
            Tone::Plain => value.normal(),
            Tone::Good => value.green(),
            Tone::Warn => value.yellow(),
        }
    }
}

pub fn heading(title: &str) {
    println!("\n  {}", title.bold().underline());
}

/// One `label: value` line, labels padded to a common column.
pub fn field(label: &str, value: &str, tone: Tone) {
    println!("  {:>12}  {}", label.dimmed(), tone.paint(value));
}

pub fn done(msg: &str) {
    println!("  {} {msg}", "ok".green().bold());
}

/// Errors go to stderr so `--json` output stays parseable.
pub fn fail(msg: &str) {
    eprintln!("  {} {}", "error".red().bold(), msg.red());
}

pub fn note(msg: &str) {
    println!("  {}", format!("({msg})").dimmed());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_keeps_text() {
        colored::control::set_override(false);
        assert_eq!(Tone::Good.paint("up").to_string(), "up");
        assert_eq!(Tone::Warn.paint("down").to_string(), "down");
        assert_eq!(Tone::Plain.paint("x").to_string(), "x");
    }
}
