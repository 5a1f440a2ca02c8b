//! Terminal implementation of the engine [`Reporter`].
//!
//! Progress goes to stderr so that JSON documents on stdout stay clean.
//! Each line is written whole under the stderr lock, since install tasks
//! report from several workers at once.

use super::theme::{Theme, short_id};
use crossterm::style::Stylize;
use rivet_core::Reporter;
use rivet_schema::{BinaryStatus, Context, RecipeReference};
use std::io::Write;

#[derive(Debug, Default)]
pub struct TerminalReporter {
    theme: Theme,
}

impl TerminalReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn line(text: &str) {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{text}");
    }
}

impl Reporter for TerminalReporter {
    fn section(&self, title: &str) {
        Self::line("");
        Self::line(
            &format!("======== {title} ========")
                .with(self.theme.colors.header)
                .bold()
                .to_string(),
        );
    }

    fn resolved(&self, reference: &RecipeReference, context: Context, origin: &str) {
        let context = match context {
            Context::Host => String::new(),
            Context::Build => " (build)".to_string(),
        };
        Self::line(&format!(
            "  {}{} {}",
            reference.to_string().with(self.theme.colors.reference),
            context.with(self.theme.colors.secondary),
            format!("- {origin}").with(self.theme.colors.secondary),
        ));
    }

    fn binary(&self, reference: &RecipeReference, package_id: &str, status: BinaryStatus) {
        Self::line(&format!(
            "  {}:{} {}",
            reference.to_string().with(self.theme.colors.reference),
            short_id(package_id).with(self.theme.colors.secondary),
            format!("- {status}").with(self.theme.status_color(status)),
        ));
    }

    fn downloading(&self, reference: &str, remote: &str) {
        Self::line(&format!(
            "  {} {} {}",
            self.theme.icons.active.with(self.theme.colors.active),
            reference.with(self.theme.colors.reference),
            format!("downloading from '{remote}'").with(self.theme.colors.secondary),
        ));
    }

    fn building(&self, reference: &str) {
        Self::line(&format!(
            "  {} {} {}",
            self.theme.icons.active.with(self.theme.colors.active),
            reference.with(self.theme.colors.reference),
            "building".with(self.theme.colors.secondary),
        ));
    }

    fn done(&self, reference: &str, detail: &str) {
        Self::line(&format!(
            "  {} {} {}",
            self.theme.icons.success.with(self.theme.colors.success),
            reference.with(self.theme.colors.reference),
            detail.with(self.theme.colors.secondary),
        ));
    }

    fn failed(&self, reference: &str, reason: &str) {
        Self::line(&format!(
            "  {} {} {}",
            self.theme.icons.error.with(self.theme.colors.error),
            reference.with(self.theme.colors.reference),
            reason.with(self.theme.colors.error),
        ));
    }

    fn info(&self, msg: &str) {
        Self::line(&format!(
            "  {} {msg}",
            self.theme.icons.info.with(self.theme.colors.secondary)
        ));
    }

    fn warning(&self, msg: &str) {
        Self::line(&format!(
            "  {} {}",
            self.theme.icons.warning.with(self.theme.colors.warning),
            msg.with(self.theme.colors.warning)
        ));
    }

    fn error(&self, msg: &str) {
        Self::line(&format!(
            "  {} {}",
            self.theme.icons.error.with(self.theme.colors.error),
            msg.with(self.theme.colors.error)
        ));
    }

    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        Self::line("");
        Self::line(
            &format!("  {action}: {count} package(s) in {elapsed_secs:.1}s")
                .with(self.theme.colors.success)
                .to_string(),
        );
    }
}
