use std::io::{self, BufRead, Write};

/// Blocking user interaction: confirmations and notices.
pub trait Prompt: Send + Sync {
    fn confirm(&self, message: &str) -> bool;

    fn alert(&self, message: &str);
}

/// Asks on stdout and reads the answer from stdin.
pub struct TerminalPrompt {
    assume_yes: bool,
}

impl TerminalPrompt {
    #[must_use]
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

impl Prompt for TerminalPrompt {
    fn confirm(&self, message: &str) -> bool {
        println!("{message}");
        if self.assume_yes {
            return true;
        }
        print!("[y/N] ");
        if io::stdout().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
            Err(e) => {
                tracing::error!("cannot read answer: {e}");
                false
            }
        }
    }

    fn alert(&self, message: &str) {
        println!("{message}");
    }
}
