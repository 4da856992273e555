//! The bytecode record produced by lowering (§3.4, §4.4).
//!
//! A compiled program is a tree of [`Bytecode`] nodes — one per
//! `CLOSURE_CREATE` plus the root — each owning its own 16-bit code
//! vector, constant pool, and debug info, with a back-pointer to its
//! parent. As with [`crate::ir::Arena`], the tree is stored as a flat
//! arena of nodes addressed by handle rather than as owned `Box<Bytecode>`
//! children with raw parent pointers, so [`nesting_level`] can walk
//! parent links without any unsafe aliasing.

use std::fmt;
use std::rc::Rc;

use crate::cfunc::CFuncDescriptor;
use crate::location::SourceRange;
use crate::value::Value;

/// High bit of a `CALL_JQ` closure slot, distinguishing a user-function
/// closure (`CLOSURE_CREATE`) from a parameter-referenced one
/// (`CLOSURE_PARAM`) (§6.4).
pub const NEWCLOSURE_BIT: u16 = 0x8000;

/// An opaque reference to a [`Bytecode`] node stored in a [`BytecodeArena`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BytecodeHandle(u32);

impl fmt::Debug for BytecodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BytecodeHandle({})", self.0)
    }
}

/// A formal parameter's debug-visible name and the source range it was
/// declared at (§10.5's supplemented parameter-location debug info).
#[derive(Debug, Clone)]
pub struct ParamInfo {
    pub name: Rc<str>,
    pub location: SourceRange,
}

/// Debug info for one [`Bytecode`] node: function name, parameter names
/// (with locations), and local variable names, all addressable by slot
/// index (§3.4).
#[derive(Debug, Clone, Default)]
pub struct DebugInfo {
    pub name: Option<Rc<str>>,
    pub params: Vec<ParamInfo>,
    pub locals: Vec<Rc<str>>,
}

/// One node of the compiled bytecode tree: a 16-bit code vector, its
/// constant pool, local slot count, and its children (§3.4).
#[derive(Debug)]
pub struct Bytecode {
    pub parent: Option<BytecodeHandle>,
    pub code: Vec<u16>,
    pub constants: Vec<Value>,
    pub nlocals: u16,
    pub subfunctions: Vec<BytecodeHandle>,
    pub debug: DebugInfo,
}

impl Bytecode {
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Owns every [`Bytecode`] node produced by one `block_compile` call.
#[derive(Debug, Default)]
pub struct BytecodeArena {
    nodes: Vec<Bytecode>,
}

impl BytecodeArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, bc: Bytecode) -> BytecodeHandle {
        let idx = self.nodes.len();
        self.nodes.push(bc);
        BytecodeHandle(u32::try_from(idx).expect("bytecode arena exceeded u32::MAX nodes"))
    }

    #[must_use]
    pub fn get(&self, handle: BytecodeHandle) -> &Bytecode {
        &self.nodes[handle.0 as usize]
    }

    pub fn get_mut(&mut self, handle: BytecodeHandle) -> &mut Bytecode {
        &mut self.nodes[handle.0 as usize]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// The root-level shared table of host C-functions (§3.4, §6.2),
/// populated once during the root's `compile` pass and shared by
/// reference with every subfunction's recursion (§5).
#[derive(Debug, Default)]
pub struct SymbolTable {
    pub cfunctions: Vec<Rc<CFuncDescriptor>>,
}

impl SymbolTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a host function descriptor, returning its assigned index.
    pub fn push(&mut self, descriptor: Rc<CFuncDescriptor>) -> u16 {
        let idx = self.cfunctions.len();
        self.cfunctions.push(descriptor);
        u16::try_from(idx).expect("more host functions than fit in a u16 symbol table")
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cfunctions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cfunctions.is_empty()
    }
}

/// A fully lowered program: the bytecode tree plus the shared host
/// symbol table, independently owned of the IR arena that produced it
/// (§3.5 — "the resulting bytecode tree is independently owned data").
#[derive(Debug)]
pub struct CompiledProgram {
    pub arena: BytecodeArena,
    pub root: BytecodeHandle,
    pub symbols: SymbolTable,
}

impl CompiledProgram {
    #[must_use]
    pub fn root(&self) -> &Bytecode {
        self.arena.get(self.root)
    }

    /// Number of parent hops from `from` to `to`. Zero iff `from == to`
    /// (§4.4 — "nesting_level ... Zero means 'same function'").
    #[must_use]
    pub fn nesting_level(&self, from: BytecodeHandle, to: BytecodeHandle) -> u16 {
        nesting_level(&self.arena, from, to)
    }
}

/// Free-function form used during lowering, before a [`CompiledProgram`]
/// exists to wrap the arena.
#[must_use]
pub fn nesting_level(arena: &BytecodeArena, from: BytecodeHandle, to: BytecodeHandle) -> u16 {
    let mut level: u16 = 0;
    let mut current = Some(from);
    while let Some(handle) = current {
        if handle == to {
            return level;
        }
        level += 1;
        current = arena.get(handle).parent;
    }
    unreachable!("nesting_level: `to` is not an ancestor of `from`");
}
