//! Interactive questions asked during pre-flight checks

use std::io::{self, BufRead, Write};

/// Asks the person running the notebook cell
pub trait Prompter: Send + Sync {
    /// Ask a free-form question; end of input yields an empty answer
    fn ask(&self, question: &str) -> io::Result<String>;

    /// Ask until the answer is yes or no; end of input counts as no
    fn confirm(&self, question: &str) -> io::Result<bool> {
        loop {
            let answer = self.ask(question)?;
            if answer.is_empty() {
                return Ok(false);
            }
            if let Some(yes) = parse_yes_no(&answer) {
                return Ok(yes);
            }
        }
    }
}

/// `Some(true)` for y/yes, `Some(false)` for n/no, `None` otherwise
pub fn parse_yes_no(answer: &str) -> Option<bool> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// Reads answers from stdin; the question goes to stdout, like `input()`
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn ask(&self, question: &str) -> io::Result<String> {
        let mut stdout = io::stdout();
        writeln!(stdout, "{}", question)?;
        stdout.flush()?;

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Scripted(Mutex<Vec<&'static str>>);

    impl Prompter for Scripted {
        fn ask(&self, _question: &str) -> io::Result<String> {
            Ok(self.0.lock().unwrap().pop().unwrap_or_default().to_string())
        }
    }

    #[test]
    fn test_parse_yes_no() {
        assert_eq!(parse_yes_no("y"), Some(true));
        assert_eq!(parse_yes_no(" YES\n"), Some(true));
        assert_eq!(parse_yes_no("n"), Some(false));
        assert_eq!(parse_yes_no("maybe"), None);
    }

    #[test]
    fn test_confirm_asks_again_until_answered() {
        // popped from the back
        let prompter = Scripted(Mutex::new(vec!["y", "what", "sure"]));
        assert!(prompter.confirm("Do you want to continue? [y/n]").unwrap());
        assert!(prompter.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_confirm_end_of_input_is_no() {
        let prompter = Scripted(Mutex::new(Vec::new()));
        assert!(!prompter.confirm("Do you want to continue? [y/n]").unwrap());
    }
}
