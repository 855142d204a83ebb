//! Interactive bits of the CLI: the transfer progress bar and the stdin
//! confirmation prompt.

use busflash_core::flash::FlashProgress;
use busflash_core::Prompt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;

/// Progress reporter using an indicatif progress bar over image chunks.
pub struct IndicatifFlashProgress {
    bar: Option<ProgressBar>,
}

impl IndicatifFlashProgress {
    pub fn new() -> Self {
        Self { bar: None }
    }
}

impl FlashProgress for IndicatifFlashProgress {
    fn begin(&mut self, total_chunks: usize) {
        let pb = ProgressBar::new(total_chunks as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({eta})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        self.bar = Some(pb);
    }

    fn chunk_done(&mut self, index: usize) {
        if let Some(pb) = &self.bar {
            pb.set_position(index as u64 + 1);
        }
    }

    fn finish(&mut self) {
        if let Some(pb) = self.bar.take() {
            pb.finish_with_message("transferred");
        }
    }
}

/// Stdin-backed confirmation; forced mode answers yes without blocking.
pub struct StdinPrompt {
    pub assume_yes: bool,
}

impl Prompt for StdinPrompt {
    fn confirm(&mut self, message: &str) -> bool {
        if self.assume_yes {
            log::debug!("auto-confirmed: {message}");
            return true;
        }
        eprint!("{message} [y/N] ");
        let _ = std::io::stderr().flush();
        let mut answer = String::new();
        if std::io::stdin().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim(), "y" | "Y" | "yes" | "YES")
    }
}
