//! Bytecode emission: the opcode catalogue, the compiled-program record
//! tree, and the lowering pass that turns a bound [`crate::ir::Block`]
//! into one.
//!
//! # Module structure
//!
//! - `op` — the opcode catalogue (§6.1): emitted length and immediate
//!   flags per opcode.
//! - `code` — the compiled bytecode record tree (§3.4): code vectors,
//!   constant pools, the shared C-function symbol table, debug info.
//! - `compiler` — `expand_call_arglist`/`compile`/`block_compile` (§4.4):
//!   the pass that walks a bound IR block and produces a `code` tree.

mod code;
mod compiler;
mod op;

pub use code::{Bytecode, BytecodeArena, BytecodeHandle, CompiledProgram, DebugInfo, ParamInfo, SymbolTable, NEWCLOSURE_BIT};
pub use compiler::{block_compile, expand_call_arglist};
pub use op::{OpDescriptor, OpFlags, Opcode};
