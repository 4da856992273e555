//! Compile-time tracing infrastructure.
//!
//! Mirrors `VmTracer` from `ouros`'s bytecode VM: a trait with default
//! no-op hooks, so [`NoopTracer`] compiles away entirely via monomorphization,
//! plus a [`RecordingTracer`] that collects events for tests and tooling.
//! The binder and lowering passes are generic over `Tr: CompileTracer`
//! rather than reaching for an external logging crate — `ouros` itself
//! never pulls in `log`/`tracing` for this kind of instrumentation.

/// An event emitted during compilation, collected by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq)]
pub enum CompileTraceEvent {
    /// A `bind_subblock` pass started for a named binder.
    BinderPassStart { symbol: String },
    /// A `bind_subblock` pass finished, having bound this many references.
    BinderPassEnd { symbol: String, bound: usize },
    /// One round of `block_bind_referenced`'s dead-binder elimination ran.
    DeadBinderRound { kept: usize, dropped: usize },
    /// `expand_call_arglist` or `compile` found an unbound reference.
    UndefinedReference { symbol: String, nactuals: Option<usize> },
    /// The first lowering pass assigned a subfunction index.
    SubfunctionAssigned { index: usize, name: String },
}

/// Trait for observing compilation.
///
/// All methods default to no-ops; implementations override only the hooks
/// they care about, exactly like `ouros`'s `VmTracer`.
pub trait CompileTracer {
    #[inline(always)]
    fn binder_pass_start(&mut self, _symbol: &str) {}

    #[inline(always)]
    fn binder_pass_end(&mut self, _symbol: &str, _bound: usize) {}

    #[inline(always)]
    fn dead_binder_round(&mut self, _kept: usize, _dropped: usize) {}

    #[inline(always)]
    fn undefined_reference(&mut self, _symbol: &str, _nactuals: Option<usize>) {}

    #[inline(always)]
    fn subfunction_assigned(&mut self, _index: usize, _name: &str) {}
}

/// Zero-cost production default: every hook is an empty inline function.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl CompileTracer for NoopTracer {}

/// Collects every event into a `Vec`, for tests and diagnostic tooling.
#[derive(Debug, Default, Clone)]
pub struct RecordingTracer {
    pub events: Vec<CompileTraceEvent>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CompileTracer for RecordingTracer {
    fn binder_pass_start(&mut self, symbol: &str) {
        self.events.push(CompileTraceEvent::BinderPassStart { symbol: symbol.to_owned() });
    }

    fn binder_pass_end(&mut self, symbol: &str, bound: usize) {
        self.events
            .push(CompileTraceEvent::BinderPassEnd { symbol: symbol.to_owned(), bound });
    }

    fn dead_binder_round(&mut self, kept: usize, dropped: usize) {
        self.events.push(CompileTraceEvent::DeadBinderRound { kept, dropped });
    }

    fn undefined_reference(&mut self, symbol: &str, nactuals: Option<usize>) {
        self.events.push(CompileTraceEvent::UndefinedReference {
            symbol: symbol.to_owned(),
            nactuals,
        });
    }

    fn subfunction_assigned(&mut self, index: usize, name: &str) {
        self.events
            .push(CompileTraceEvent::SubfunctionAssigned { index, name: name.to_owned() });
    }
}
