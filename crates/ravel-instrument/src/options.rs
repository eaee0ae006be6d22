//! Instrumentation options

/// Switches controlling classification, transformation and diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstrumentOptions {
    /// Accept known blocking calls in suspendable methods, warning once per kind
    pub allow_blocking: bool,
    /// Accept monitor enter/exit in transformed methods, warning once per method
    pub allow_monitors: bool,
    /// Emit info-level diagnostics
    pub verbose: bool,
    /// Emit info- and debug-level diagnostics
    pub debug: bool,
    /// Transform classes that already carry the instrumented marker
    pub force: bool,
}

impl InstrumentOptions {
    /// Options with blocking calls permitted
    pub fn allow_blocking(mut self, allow: bool) -> Self {
        self.allow_blocking = allow;
        self
    }

    /// Options with monitors permitted
    pub fn allow_monitors(mut self, allow: bool) -> Self {
        self.allow_monitors = allow;
        self
    }

    /// Options with forced re-instrumentation
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}
