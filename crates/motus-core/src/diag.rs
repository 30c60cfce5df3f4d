//! Explicit diagnostics context.
//!
//! Every fallible component is constructed with a [`Diag`] naming the
//! component. Failure causes are logged with a `component/op` prefix before
//! the operation reports failure, and test harnesses can install their own
//! `tracing` subscriber to capture or suppress the output.

/// Diagnostics context for one component instance.
#[derive(Debug, Clone)]
pub struct Diag {
    component: &'static str,
}

impl Diag {
    /// Create a context for the named component.
    #[must_use]
    pub const fn new(component: &'static str) -> Self {
        Self { component }
    }

    /// Component name this context reports under.
    #[must_use]
    pub const fn component(&self) -> &'static str {
        self.component
    }

    /// Log a failure cause for the given operation.
    pub fn error(&self, op: &str, message: &str) {
        tracing::error!(target: "motus", component = self.component, op, "{message}");
    }

    /// Log a recoverable configuration or runtime oddity.
    pub fn warn(&self, op: &str, message: &str) {
        tracing::warn!(target: "motus", component = self.component, op, "{message}");
    }

    /// Log progress information.
    pub fn info(&self, op: &str, message: &str) {
        tracing::info!(target: "motus", component = self.component, op, "{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_name_is_kept() {
        let diag = Diag::new("ik");
        assert_eq!(diag.component(), "ik");
        // Emitting without a subscriber installed must be a no-op, not a panic.
        diag.error("initialize", "invalid model");
        diag.warn("initialize", "rotation_matrix missing, using identity");
    }
}
