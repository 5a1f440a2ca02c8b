//! Reporter trait for dependency injection
//!
//! This trait allows the engine to report progress and status without
//! being coupled to a specific terminal implementation. It is passed
//! explicitly through [`crate::Session`] instead of living in a global.

use rivet_schema::{BinaryStatus, Context, RecipeReference};

/// Sink for user-facing progress messages.
pub trait Reporter: Send + Sync {
    /// Indicates a new section or phase has started (e.g. "Computing dependency graph").
    fn section(&self, title: &str);

    /// A recipe was resolved for a graph node.
    fn resolved(&self, reference: &RecipeReference, context: Context, origin: &str);

    /// A binary status was decided for a graph node.
    fn binary(&self, reference: &RecipeReference, package_id: &str, status: BinaryStatus);

    /// A package download started.
    fn downloading(&self, reference: &str, remote: &str);

    /// A package build started.
    fn building(&self, reference: &str);

    /// Marks a package operation as successfully completed.
    fn done(&self, reference: &str, detail: &str);

    /// Marks a package operation as failed with a specific reason.
    fn failed(&self, reference: &str, reason: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Log an error message.
    fn error(&self, msg: &str);

    /// Display a final summary of multiple operations.
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title);
    }
    fn resolved(&self, reference: &RecipeReference, context: Context, origin: &str) {
        (**self).resolved(reference, context, origin);
    }
    fn binary(&self, reference: &RecipeReference, package_id: &str, status: BinaryStatus) {
        (**self).binary(reference, package_id, status);
    }
    fn downloading(&self, reference: &str, remote: &str) {
        (**self).downloading(reference, remote);
    }
    fn building(&self, reference: &str) {
        (**self).building(reference);
    }
    fn done(&self, reference: &str, detail: &str) {
        (**self).done(reference, detail);
    }
    fn failed(&self, reference: &str, reason: &str) {
        (**self).failed(reference, reason);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn error(&self, msg: &str) {
        (**self).error(msg);
    }
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        (**self).summary(count, action, elapsed_secs);
    }
}

/// A no-op reporter for silent operations (e.g., testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _: &str) {}
    fn resolved(&self, _: &RecipeReference, _: Context, _: &str) {}
    fn binary(&self, _: &RecipeReference, _: &str, _: BinaryStatus) {}
    fn downloading(&self, _: &str, _: &str) {}
    fn building(&self, _: &str) {}
    fn done(&self, _: &str, _: &str) {}
    fn failed(&self, _: &str, _: &str) {}
    fn info(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn error(&self, _: &str) {}
    fn summary(&self, _: usize, _: &str, _: f64) {}
}

/// Forwards every message to `tracing` at a matching level.
#[derive(Debug, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn section(&self, title: &str) {
        tracing::info!("== {title} ==");
    }
    fn resolved(&self, reference: &RecipeReference, context: Context, origin: &str) {
        tracing::debug!("{reference} ({context}) from {origin}");
    }
    fn binary(&self, reference: &RecipeReference, package_id: &str, status: BinaryStatus) {
        tracing::debug!("{reference}:{package_id} - {status}");
    }
    fn downloading(&self, reference: &str, remote: &str) {
        tracing::info!("Downloading {reference} from '{remote}'");
    }
    fn building(&self, reference: &str) {
        tracing::info!("Building {reference}");
    }
    fn done(&self, reference: &str, detail: &str) {
        tracing::info!("{reference}: {detail}");
    }
    fn failed(&self, reference: &str, reason: &str) {
        tracing::error!("{reference}: {reason}");
    }
    fn info(&self, msg: &str) {
        tracing::info!("{msg}");
    }
    fn warning(&self, msg: &str) {
        tracing::warn!("{msg}");
    }
    fn error(&self, msg: &str) {
        tracing::error!("{msg}");
    }
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        tracing::info!("{action} {count} package(s) in {elapsed_secs:.2}s");
    }
}
