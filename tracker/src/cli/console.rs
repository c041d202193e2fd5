//! Terminal implementation of [`UserInteraction`].

use std::io::{BufRead, IsTerminal, Write};

use async_trait::async_trait;
use tracker_backup::service::UserInteraction;

/// Notifications go to stderr so `--json` output on stdout stays parseable.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleInteraction {
    assume_yes: bool,
}

impl ConsoleInteraction {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

#[async_trait]
impl UserInteraction for ConsoleInteraction {
    async fn notify(&self, message: &str) {
        eprintln!("{message}");
    }

    /// Without `--yes`, a non-interactive stdin declines.
    async fn confirm(&self, message: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        if !std::io::stdin().is_terminal() {
            eprintln!("{message} (declined: stdin is not a terminal, use --yes)");
            return false;
        }
        let prompt = message.to_string();
        tokio::task::spawn_blocking(move || ask(&prompt))
            .await
            .unwrap_or(false)
    }
}

fn ask(prompt: &str) -> bool {
    let mut stderr = std::io::stderr();
    let _ = write!(stderr, "{prompt} [y/N] ");
    let _ = stderr.flush();
    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line).is_err() {
        return false;
    }
    is_yes(&line)
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
