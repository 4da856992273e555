//! Name resolution (§4.3).
//!
//! Binding walks a body block looking for references whose symbol
//! matches a binder's symbol and whose flags satisfy the binder's
//! `bindflags` (which `$variable` references vs. function calls vs.
//! host-builtin references are eligible), and rewrites each match's
//! `bound_by` to point at the binder. The search recurses into every
//! instruction's `subfn` and `arglist`, so a reference nested three
//! closures deep still resolves against an outer scope's binder exactly
//! as it would for the innermost enclosing one, up to whatever
//! already-bound references shadow it first (a reference already bound
//! by an inner binder never matches an outer pass, since only
//! `bound_by == Unbound` references are eligible).

use crate::bytecode::{OpFlags, Opcode};
use crate::ir::{Arena, Block, BoundBy, InstHandle};

/// True if every top-level instruction in `binders` both carries
/// `bindflags` and is itself a binder (bound to its own handle).
#[must_use]
pub fn has_only_binders(arena: &Arena, binders: Block, bindflags: OpFlags) -> bool {
    let required = bindflags.union(OpFlags::HAS_BINDING);
    binders.handles(arena).into_iter().all(|h| {
        let inst = arena.get(h);
        inst.opcode.flags().contains(required) && inst.is_binder(h)
    })
}

/// A binder's declared arity: a host builtin's `nargs - 1`, or the
/// number of `CLOSURE_PARAM` formals in its `arglist`.
#[must_use]
pub fn count_formals(arena: &Arena, binder: InstHandle) -> usize {
    let inst = arena.get(binder);
    if inst.opcode == Opcode::ClosureCreateC {
        return inst
            .imm
            .as_cfunc()
            .expect("ClosureCreateC always carries a CFunc immediate")
            .explicit_arity();
    }
    inst.arglist.len(arena)
}

/// A call site's actual argument count, counted from an arglist already
/// holding one closure node (`CLOSURE_CREATE`/`CLOSURE_PARAM`/
/// `CLOSURE_CREATE_C`) per argument.
#[must_use]
pub fn count_actuals(arena: &Arena, arglist: Block) -> usize {
    arglist.len(arena)
}

/// Counts references to `binder` occurring anywhere in `body`, including
/// inside nested `subfn`/`arglist` blocks. Used by dead-binder
/// elimination to decide whether a binder is still needed.
#[must_use]
pub fn count_refs(arena: &Arena, binder: InstHandle, body: Block) -> usize {
    let mut nrefs = 0;
    for h in body.handles(arena) {
        if h != binder && arena.get(h).bound_by == BoundBy::Bound(binder) {
            nrefs += 1;
        }
        nrefs += count_refs(arena, binder, arena.get(h).subfn);
        nrefs += count_refs(arena, binder, arena.get(h).arglist);
    }
    nrefs
}

/// Resolves every unbound, matching reference in `body` (and its nested
/// `subfn`/`arglist` blocks) against `binder`, and self-binds `binder`.
/// `bindflags` must already include `OP_HAS_BINDING`.
///
/// Returns the number of references newly bound.
pub fn bind_subblock(arena: &mut Arena, binder: InstHandle, body: Block, bindflags: OpFlags) -> usize {
    debug_assert!(arena.get(binder).opcode.flags().contains(bindflags));
    debug_assert!(!arena.get(binder).bound_by.is_bound() || arena.get(binder).is_binder(binder));

    arena.get_mut(binder).bound_by = BoundBy::Bound(binder);
    if arena.get(binder).nformals.is_none() {
        let nf = count_formals(arena, binder);
        arena.get_mut(binder).nformals = Some(nf);
    }

    let mut nrefs = 0;
    for h in body.handles(arena) {
        let flags = arena.get(h).opcode.flags();
        if flags.contains(bindflags) && !arena.get(h).bound_by.is_bound() {
            let binder_symbol = arena.get(binder).symbol.clone();
            let same_symbol = arena.get(h).symbol == binder_symbol;
            if same_symbol {
                if arena.get(h).opcode == Opcode::CallJq && arena.get(h).nactuals.is_none() {
                    let n = count_actuals(arena, arena.get(h).arglist);
                    arena.get_mut(h).nactuals = Some(n);
                }
                let nactuals = arena.get(h).nactuals;
                let nformals = arena.get(binder).nformals;
                if nactuals.is_none() || nactuals == nformals {
                    arena.get_mut(h).bound_by = BoundBy::Bound(binder);
                    nrefs += 1;
                }
            }
        }
        nrefs += bind_subblock(arena, binder, arena.get(h).subfn, bindflags);
        nrefs += bind_subblock(arena, binder, arena.get(h).arglist, bindflags);
    }
    nrefs
}

/// `binder_block` must be a single binder instruction; binds its own
/// handle's worth of references into `body` and recurses into `body`'s
/// nested blocks (used for `function`'s self/recursive-call binding,
/// where the binder and the searched body happen to be the same node).
pub fn bind_subblock_self(arena: &mut Arena, binder_block: Block, body: Block, bindflags: OpFlags) -> usize {
    let binder = binder_block.first().expect("binder block must be a single instruction");
    bind_subblock(arena, binder, body, bindflags)
}

/// Binds every top-level instruction of `binders` into `body`
/// (`block_bind_each`). Each binder in `binders` must already carry
/// `bindflags` (checked with [`has_only_binders`] in debug builds).
pub fn bind_each(arena: &mut Arena, binders: Block, body: Block, bindflags: OpFlags) -> usize {
    debug_assert!(has_only_binders(arena, binders, bindflags));
    let full = bindflags.union(OpFlags::HAS_BINDING);
    let mut nrefs = 0;
    for h in binders.handles(arena) {
        nrefs += bind_subblock(arena, h, body, full);
    }
    nrefs
}

/// `block_bind`: binds `binder` into `body`, then splices the binder
/// ahead of `body` in program order (the binder's bytecode — a
/// `CLOSURE_CREATE`/`STOREV`, itself usually zero- or near-zero-length —
/// must precede any reference to it).
#[must_use]
pub fn bind_one(arena: &mut Arena, binder: Block, body: Block, bindflags: OpFlags) -> Block {
    bind_each(arena, binder, body, bindflags);
    binder.concat(arena, body)
}

/// `block_bind_library`: binds `binder` into `body` under a
/// `libname::`-qualified name, without leaving `binder` itself spliced
/// into the result.
///
/// Used for `import "foo" as bar;`-style module imports: every
/// definition in the imported module is visible only as `bar::name`,
/// and the module's own top-level program (if any) is discarded — only
/// `body` (the importing program) is returned.
#[must_use]
pub fn bind_library(arena: &mut Arena, binder: Block, body: Block, bindflags: OpFlags, libname: &str) -> Block {
    debug_assert!(has_only_binders(arena, binder, bindflags));
    let full = bindflags.union(OpFlags::HAS_BINDING);
    for h in binder.handles(arena) {
        let original = arena.get(h).symbol.clone();
        let qualified = original.as_ref().map(|s| std::rc::Rc::from(format!("{libname}::{s}")));
        arena.get_mut(h).symbol = qualified;
        bind_subblock(arena, h, body, full);
        arena.get_mut(h).symbol = original;
    }
    body
}

/// `block_bind_referenced`: binds `binder` into `body`, but keeps only
/// the binders that end up (transitively) referenced from `body`,
/// dropping the rest. Runs to a fixed point: a binder kept because
/// another kept binder refers to it might itself only be reachable
/// through a chain resolved in a later round.
#[must_use]
pub fn bind_referenced(arena: &mut Arena, binder: Block, body: Block, bindflags: OpFlags) -> Block {
    debug_assert!(has_only_binders(arena, binder, bindflags));
    let full = bindflags.union(OpFlags::HAS_BINDING);

    let mut remaining = binder.handles(arena);
    let mut kept: Vec<InstHandle> = Vec::new();
    loop {
        let mut next_remaining = Vec::new();
        let mut progressed = false;
        for h in remaining {
            let single = Block::single(h);
            let mut nrefs = bind_subblock(arena, h, body, full);
            for &k in &kept {
                nrefs += count_refs(arena, h, Block::single(k));
            }
            nrefs += count_refs(arena, h, body);
            if nrefs > 0 {
                kept.push(h);
                progressed = true;
            } else {
                next_remaining.push(h);
            }
            let _ = single;
        }
        if !progressed {
            break;
        }
        remaining = next_remaining;
    }

    let refd = Block::concat_all(arena, kept.into_iter().map(Block::single));
    refd.concat(arena, body)
}

/// `block_drop_unreferenced`: given a whole program (optionally starting
/// with the `TOP` marker), discards top-level binders nobody in the
/// remainder of the program refers to, directly or indirectly.
///
/// Differs from [`bind_referenced`] in that it doesn't bind anything —
/// every candidate in `body` is already either a binder or ordinary
/// code, and this only ever removes, never resolves, references.
#[must_use]
pub fn drop_unreferenced(arena: &mut Arena, body: Block) -> Block {
    let handles = body.handles(arena);
    let (top, rest) = match handles.first() {
        Some(&h) if arena.get(h).opcode == Opcode::Top => (Some(h), &handles[1..]),
        _ => (None, &handles[..]),
    };

    let mut kept: Vec<InstHandle> = rest.to_vec();
    loop {
        let mut dropped_any = false;
        let mut next_kept = Vec::new();
        for (i, &h) in kept.iter().enumerate() {
            let rest_of_program = Block::concat_all(
                arena,
                kept[i + 1..].iter().chain(next_kept.iter()).copied().map(Block::single),
            );
            let already_kept = Block::concat_all(arena, next_kept.iter().copied().map(Block::single));
            let nrefs = count_refs(arena, h, already_kept) + count_refs(arena, h, rest_of_program);
            if nrefs == 0 {
                dropped_any = true;
            } else {
                next_kept.push(h);
            }
        }
        kept = next_kept;
        if !dropped_any {
            break;
        }
    }

    let mut result = Block::concat_all(arena, kept.into_iter().map(Block::single));
    if let Some(top_handle) = top {
        result = Block::single(top_handle).concat(arena, result);
    }
    result
}

/// A single extracted `import`/`include` directive (§4.2's `gen_import`
/// options, carried on a `DEPS` pseudo-instruction): the module name and
/// its host-provided options (`as`, `search`), as a dynamic value.
#[derive(Debug, Clone)]
pub struct ImportDecl {
    pub name: std::rc::Rc<str>,
    pub options: crate::value::Value,
}

/// `block_take_imports`: strips every leading `DEPS` instruction (after
/// an optional leading `TOP` marker) off the front of `body`, returning
/// them as structured import declarations for an external module
/// resolver to act on. `body` is left with the `TOP` marker (if any)
/// immediately followed by the program's real instructions.
pub fn take_imports(arena: &mut Arena, body: &mut Block) -> Vec<ImportDecl> {
    let mut imports = Vec::new();
    let handles = body.handles(arena);
    let mut idx = 0;
    let top = match handles.first() {
        Some(&h) if arena.get(h).opcode == Opcode::Top => {
            idx = 1;
            Some(h)
        }
        _ => None,
    };
    while let Some(&h) = handles.get(idx) {
        let inst = arena.get(h);
        if inst.opcode != Opcode::Deps {
            break;
        }
        let name = inst.symbol.clone().expect("DEPS always carries a module name");
        let options = inst.imm.as_const().cloned().unwrap_or(crate::value::Value::Null);
        imports.push(ImportDecl { name, options });
        idx += 1;
    }

    let remainder = Block::concat_all(arena, handles[idx..].iter().copied().map(Block::single));
    *body = match top {
        Some(top_handle) => Block::single(top_handle).concat(arena, remainder),
        None => remainder,
    };
    imports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gen;
    use crate::ir::Arena;
    use crate::location::SourceRange;
    use crate::value::Value;

    #[test]
    fn var_binding_resolves_matching_loadv() {
        let mut arena = Arena::new();
        let loc = SourceRange::unknown();
        let source = gen::constant(&mut arena, Value::Number(1.0), loc);
        let body = gen::constant(&mut arena, Value::Null, loc);
        let bound = gen::var_binding(&mut arena, "$x", source, body, loc);
        assert!(!bound.is_empty());
    }

    #[test]
    fn undefined_call_stays_unbound() {
        let mut arena = Arena::new();
        let loc = SourceRange::unknown();
        let call = gen::call(&mut arena, "nonexistent", Block::empty(), loc);
        let h = call.first().unwrap();
        assert_eq!(arena.get(h).bound_by, BoundBy::Unbound);
    }

    #[test]
    fn drop_unreferenced_removes_dead_function() {
        let mut arena = Arena::new();
        let loc = SourceRange::unknown();
        let unused_body = gen::constant(&mut arena, Value::Number(0.0), loc);
        let unused = gen::function(&mut arena, "unused", Block::empty(), unused_body, loc);
        let main_body = gen::constant(&mut arena, Value::Number(1.0), loc);
        let program = unused.concat(&mut arena, main_body);
        let dropped = drop_unreferenced(&mut arena, program);
        assert_eq!(dropped.len(&arena), 1);
    }

    #[test]
    fn take_imports_strips_leading_deps() {
        let mut arena = Arena::new();
        let loc = SourceRange::unknown();
        let dep = gen::import(&mut arena, "mymod", Value::empty_object(), loc);
        let rest = gen::constant(&mut arena, Value::Null, loc);
        let mut program = dep.concat(&mut arena, rest);
        let imports = take_imports(&mut arena, &mut program);
        assert_eq!(imports.len(), 1);
        assert_eq!(&*imports[0].name, "mymod");
        assert_eq!(program.len(&arena), 1);
    }
}
