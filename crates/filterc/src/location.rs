//! Source location tracking.
//!
//! The parser and link/import resolver are external collaborators (see the
//! crate root docs); this module defines only the narrow location type they
//! hand to the generators and that diagnostics carry back out. A `locfile`
//! handle identifies which source file a location belongs to, without this
//! crate ever reading or parsing that file itself.

use std::rc::Rc;

/// Opaque handle to a source file, retained (cheaply, via `Rc`) by every
/// instruction that has been stamped with a real location.
///
/// Mirrors the "opaque file handle consumed opaquely" contract in the
/// system overview: this crate never inspects the file's contents, only
/// carries the handle around for diagnostics to report against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocFile(Rc<str>);

impl LocFile {
    /// Wraps a filename as a retained locfile handle.
    #[must_use]
    pub fn new(name: impl Into<Rc<str>>) -> Self {
        Self(name.into())
    }

    /// Returns the filename this handle refers to.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

/// A single position within a source file, as produced by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl Location {
    #[must_use]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// Sentinel used by every instruction until `gen_location` stamps a real
/// range onto it. Matches the "unknown" default required by §3.1.
pub const UNKNOWN_LOCATION: Location = Location { line: 0, column: 0 };

/// A `(start, end)` source range, defaulting to "unknown" until stamped.
///
/// Retained on assignment: cloning a `SourceRange` does not re-resolve or
/// reparse anything, it just copies the two positions and bumps the
/// refcount on the shared `LocFile`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRange {
    pub start: Location,
    pub end: Location,
    pub file: Option<LocFile>,
}

impl Default for SourceRange {
    fn default() -> Self {
        Self::unknown()
    }
}

impl SourceRange {
    /// The "unknown" default every freshly constructed instruction carries.
    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            start: UNKNOWN_LOCATION,
            end: UNKNOWN_LOCATION,
            file: None,
        }
    }

    #[must_use]
    pub const fn new(start: Location, end: Location, file: LocFile) -> Self {
        Self {
            start,
            end,
            file: Some(file),
        }
    }

    /// True for an instruction that has not yet been stamped by `gen_location`.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.start == UNKNOWN_LOCATION && self.end == UNKNOWN_LOCATION
    }
}
