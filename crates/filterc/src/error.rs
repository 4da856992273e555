//! Compile-time diagnostics (§7).
//!
//! Only one user-facing error kind exists: an undefined reference, which
//! also covers arity mismatches (§7.2 — a call with the wrong number of
//! arguments simply finds no binder of matching arity, so the reference
//! stays unbound and is reported the same way). Invariant violations
//! (§7.3/§7.4) are programmer errors and use `assert!`/`debug_assert!`
//! rather than this type, exactly as `ouros` reserves `RunResult`/
//! `ParseError` for user-facing failures and `assert!` for internal
//! contract breaches.

use std::fmt;

use crate::location::SourceRange;

/// A single compile-time diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub symbol: String,
    /// Actual argument count at the call site, or `None` for a non-call
    /// reference (a bare variable or function name used as a value).
    pub nactuals: Option<usize>,
    pub location: SourceRange,
}

impl CompileError {
    #[must_use]
    pub fn undefined(symbol: impl Into<String>, nactuals: Option<usize>, location: SourceRange) -> Self {
        Self {
            symbol: symbol.into(),
            nactuals,
            location,
        }
    }
}

impl fmt::Display for CompileError {
    /// Formats exactly as jq's `compile.c` does: `"<symbol>/<nactuals> is
    /// not defined"` (§6.5), with `nactuals` elided for non-call references.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.nactuals {
            Some(n) => write!(f, "error: {}/{n} is not defined", self.symbol),
            None => write!(f, "error: {} is not defined", self.symbol),
        }
    }
}

impl std::error::Error for CompileError {}

/// Accumulates diagnostics across a compile pass.
///
/// `expand_call_arglist` and `compile` both keep discovering further
/// undefined references after the first one (§7.1 — "non-fatal within the
/// pass"), so diagnostics are collected rather than returned eagerly; only
/// the pass's caller (`block_compile`) treats a non-empty set as fatal.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics(Vec<CompileError>);

impl Diagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: CompileError) {
        self.0.push(error);
    }

    pub fn extend(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[CompileError] {
        &self.0
    }

    /// Consumes the collector: `Ok(())` if empty, `Err(self)` otherwise.
    /// Mirrors `block_compile`'s "nonzero error count means no bytecode was
    /// produced" contract (§6.5).
    pub fn into_result(self) -> Result<(), Self> {
        if self.0.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostics {}
