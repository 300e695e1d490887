//! Terminal output for the CLI
//!
//! Coloured status lines and the apt progress line. Connection instructions
//! are plain text so they can be copied from the notebook output.

use std::io::Write;

use crossterm::cursor::MoveToColumn;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use crossterm::terminal::{Clear, ClearType};

use rc_core::traits::ProgressReporter;

fn print_marked(out: &mut impl Write, color: Color, mark: &str, msg: &str) {
    let _ = crossterm::execute!(
        out,
        SetForegroundColor(color),
        Print(mark),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    print_marked(&mut std::io::stdout(), Color::Green, "✓ ", msg);
}

/// Print an error message to stderr in red
pub fn print_error(msg: &str) {
    print_marked(&mut std::io::stderr(), Color::Red, "✗ ", msg);
}

/// Print a warning message to stderr in yellow
pub fn print_warning(msg: &str) {
    print_marked(&mut std::io::stderr(), Color::Yellow, "⚠ ", msg);
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    print_marked(&mut std::io::stdout(), Color::Cyan, "ℹ ", msg);
}

/// One progress line, cut to `width` characters
pub fn format_progress(phase: &str, percent: f32, detail: &str, width: usize) -> String {
    let line = format!("[{} {:3.0}%] {}", phase, percent.clamp(0.0, 100.0), detail);
    if line.chars().count() <= width {
        line
    } else {
        let mut cut: String = line.chars().take(width.saturating_sub(3)).collect();
        cut.push_str("...");
        cut
    }
}

/// Redraws a single apt progress line on stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalProgress;

impl TerminalProgress {
    fn draw(&self, phase: &str, percent: f32, detail: &str) {
        let width = crossterm::terminal::size()
            .map(|(cols, _)| cols as usize)
            .unwrap_or(80);
        let _ = crossterm::execute!(
            std::io::stderr(),
            MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            Print(format_progress(phase, percent, detail, width.saturating_sub(1)))
        );
    }
}

impl ProgressReporter for TerminalProgress {
    fn fetch_progress(&self, percent: f32, detail: &str) {
        self.draw("Downloading", percent, detail);
    }

    fn install_progress(&self, percent: f32, detail: &str) {
        self.draw("Installing", percent, detail);
    }

    fn transaction_complete(&self) {
        let _ = crossterm::execute!(
            std::io::stderr(),
            MoveToColumn(0),
            Clear(ClearType::CurrentLine)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_progress() {
        assert_eq!(
            format_progress("Installing", 42.4, "Unpacking xfce4", 80),
            "[Installing  42%] Unpacking xfce4"
        );
        assert_eq!(format_progress("Downloading", 180.0, "", 80), "[Downloading 100%] ");
    }

    #[test]
    fn test_format_progress_truncates() {
        let line = format_progress("Installing", 5.0, "Setting up libnvidia-compute-418", 24);
        assert_eq!(line.chars().count(), 24);
        assert!(line.ends_with("..."));
    }
}
