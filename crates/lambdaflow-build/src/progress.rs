use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner shown while a package is built
pub struct BuildProgress {
    progress_bar: ProgressBar,
}

impl BuildProgress {
    pub fn new(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));

        Self { progress_bar: pb }
    }

    pub fn finish_success(&self, what: &str) {
        self.progress_bar
            .finish_with_message(format!("{} ✓", what));
    }

    pub fn finish_error(&self, error: &str) {
        self.progress_bar
            .finish_with_message(format!("Failed: {}", error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_success_marks_artifact() {
        let progress = BuildProgress::new("Packaging function sources...");
        progress.finish_success("function.zip");
        assert!(progress.progress_bar.is_finished());
        assert_eq!(progress.progress_bar.message(), "function.zip ✓");
    }

    #[test]
    fn test_finish_error_keeps_reason() {
        let progress = BuildProgress::new("Installing dependencies...");
        progress.finish_error("pip exited with status 1");
        assert!(progress.progress_bar.is_finished());
        assert_eq!(
            progress.progress_bar.message(),
            "Failed: pip exited with status 1"
        );
    }
}
