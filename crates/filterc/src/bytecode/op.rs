//! Opcode catalogue (§6.1).
//!
//! The *semantics* of each opcode belong to the external interpreter; this
//! module only carries the emitter-facing contract the binder and lowering
//! passes query: how many 16-bit words an instruction occupies once
//! emitted (`length`, 0 for pseudo-ops that vanish), and which immediate
//! kinds it may carry (`flags`).

/// The closed set of opcodes this crate's generators produce.
///
/// `#[repr(u16)]` because an opcode is emitted directly as one 16-bit code
/// word (§6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    LoadK,
    Dup,
    Pop,
    SubexpBegin,
    SubexpEnd,
    Append,
    StoreV,
    LoadV,
    LoadVN,
    Jump,
    JumpF,
    Fork,
    ForkOpt,
    Backtrack,
    Ret,
    Top,
    Deps,
    CallJq,
    CallBuiltin,
    ClosureCreate,
    ClosureCreateC,
    ClosureParam,
    ClosureRef,
}

/// A minimal hand-rolled bitflags macro.
///
/// Avoids pulling in the `bitflags` crate for a five-bit set that is only
/// ever combined with `|` and queried with `.contains`.
macro_rules! bitflags_lite {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $repr:ty {
            $(const $flag:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name($repr);

        impl $name {
            pub const NONE: Self = Self(0);
            $(pub const $flag: Self = Self($value);)*

            #[must_use]
            pub const fn contains(self, other: Self) -> bool {
                (self.0 & other.0) == other.0
            }

            #[must_use]
            pub const fn union(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                self.union(rhs)
            }
        }
    };
}

bitflags_lite! {
    /// Flags drawn from the closed set in §3.1.
    pub struct OpFlags: u8 {
        const HAS_CONSTANT   = 1 << 0;
        const HAS_VARIABLE   = 1 << 1;
        const HAS_BRANCH     = 1 << 2;
        const HAS_BINDING    = 1 << 3;
        const IS_CALL_PSEUDO = 1 << 4;
    }
}

/// Static descriptor for one opcode: emitted length (in 16-bit words,
/// including the opcode word itself; 0 for pseudo-ops) and its flag set.
#[derive(Debug, Clone, Copy)]
pub struct OpDescriptor {
    pub length: u8,
    pub flags: OpFlags,
}

impl Opcode {
    /// Looks up this opcode's static descriptor (§6.1).
    ///
    /// `CallJq`'s base length excludes the `2 * |arglist|` contributed by
    /// each referenced argument closure — lowering's first pass adds that
    /// separately (§4.4 step 3), since it depends on the instruction's own
    /// argument list length, not just its opcode.
    #[must_use]
    pub const fn describe(self) -> OpDescriptor {
        use OpFlags as F;
        let (length, flags) = match self {
            Self::Dup | Self::Pop | Self::SubexpBegin | Self::SubexpEnd | Self::Backtrack | Self::Ret | Self::Top => {
                (1, F::NONE)
            }
            Self::LoadK => (2, F::HAS_CONSTANT),
            Self::Append | Self::StoreV | Self::LoadV | Self::LoadVN => {
                (3, F::HAS_VARIABLE.union(F::HAS_BINDING))
            }
            Self::Jump | Self::JumpF | Self::Fork | Self::ForkOpt => (2, F::HAS_BRANCH),
            Self::Deps => (1, F::HAS_CONSTANT),
            Self::CallJq => (4, F::HAS_BINDING.union(F::IS_CALL_PSEUDO)),
            Self::CallBuiltin => (3, F::NONE),
            Self::ClosureCreate | Self::ClosureCreateC | Self::ClosureParam => {
                (0, F::HAS_BINDING.union(F::IS_CALL_PSEUDO))
            }
            Self::ClosureRef => (0, F::NONE),
        };
        OpDescriptor { length, flags }
    }

    #[must_use]
    pub const fn length(self) -> u8 {
        self.describe().length
    }

    #[must_use]
    pub const fn flags(self) -> OpFlags {
        self.describe().flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pseudo_ops_have_zero_length() {
        assert_eq!(Opcode::ClosureCreate.length(), 0);
        assert_eq!(Opcode::ClosureParam.length(), 0);
        assert_eq!(Opcode::ClosureRef.length(), 0);
    }

    #[test]
    fn variable_opcodes_share_flags() {
        for op in [Opcode::Append, Opcode::StoreV, Opcode::LoadV, Opcode::LoadVN] {
            assert!(op.flags().contains(OpFlags::HAS_VARIABLE));
            assert!(op.flags().contains(OpFlags::HAS_BINDING));
        }
    }

    #[test]
    fn branch_opcodes_are_flagged() {
        for op in [Opcode::Jump, Opcode::JumpF, Opcode::Fork, Opcode::ForkOpt] {
            assert!(op.flags().contains(OpFlags::HAS_BRANCH));
        }
    }
}
