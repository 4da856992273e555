//! Host-provided "C-function" builtins (§6.2).
//!
//! The actual implementation a `CFuncDescriptor` points at is an opaque,
//! host-supplied callback; this crate never calls it, only records its
//! arity (including the implicit input value, per §3.1) and carries it
//! through to the root bytecode's symbol table.

use std::rc::Rc;

/// A host builtin, identified by name and arity.
///
/// `nargs` includes the implicit input value that every filter-language
/// builtin receives, matching jq's `cfunction.nargs` convention (§6.2): a
/// builtin declared to take zero explicit arguments still has `nargs == 1`.
#[derive(Clone)]
pub struct CFuncDescriptor {
    pub name: Rc<str>,
    pub nargs: usize,
    /// Opaque to this crate: never invoked here, only carried through to
    /// the bytecode record's symbol table for the runtime to dispatch on.
    pub implementation: CFuncImpl,
}

/// Opaque handle to a host implementation.
///
/// Kept as a transparent newtype (rather than `Box<dyn Fn(..)>`) so that
/// `CFuncDescriptor` stays `Clone` without requiring the host's
/// implementation type to be: it is an identifier the host resolves at
/// execution time, not a callable this crate invokes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CFuncImpl(pub usize);

impl CFuncDescriptor {
    #[must_use]
    pub fn new(name: impl Into<Rc<str>>, nargs: usize, implementation: CFuncImpl) -> Self {
        Self {
            name: name.into(),
            nargs,
            implementation,
        }
    }

    /// Number of explicit arguments a call site must supply, excluding the
    /// implicit input (used by `bind_subblock`'s `nformals` computation,
    /// §4.3).
    #[must_use]
    pub fn explicit_arity(&self) -> usize {
        self.nargs.checked_sub(1).expect("cfunction nargs must include the implicit input")
    }
}

impl std::fmt::Debug for CFuncDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CFuncDescriptor")
            .field("name", &self.name)
            .field("nargs", &self.nargs)
            .finish_non_exhaustive()
    }
}
