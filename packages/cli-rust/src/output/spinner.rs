//! Step spinner with elapsed time display
//!
//! Cluster operations walk hosts one at a time and can sit on an SSH
//! handshake or a health backoff for a while; the spinner shows which
//! step is running and for how long.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

const TICK_CHARS: &str =
    "\u{28CB}\u{2819}\u{2839}\u{2838}\u{283C}\u{2834}\u{2826}\u{2827}\u{2807}\u{280F}";

/// Spinner for a single cluster step; a no-op in quiet mode
pub struct StepSpinner {
    bar: Option<ProgressBar>,
}

impl StepSpinner {
    pub fn new(message: &str) -> Self {
        let style = ProgressStyle::with_template("{spinner:.green} {msg} ({elapsed_precise:.dim})")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars(TICK_CHARS);
        let bar = ProgressBar::new_spinner();
        bar.set_style(style);
        bar.set_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar: Some(bar) }
    }

    pub fn new_maybe(message: &str, quiet: bool) -> Self {
        if quiet {
            Self { bar: None }
        } else {
            Self::new(message)
        }
    }

    /// Finish with a green check
    pub fn success(self, message: &str) {
        if let Some(bar) = self.bar {
            bar.finish_with_message(format!(
                "{} {}",
                console::style("\u{2713}").green(),
                message
            ));
        }
    }

    /// Finish with a red cross
    pub fn fail(self, message: &str) {
        if let Some(bar) = self.bar {
            bar.finish_with_message(format!("{} {}", console::style("\u{2717}").red(), message));
        }
    }
}
