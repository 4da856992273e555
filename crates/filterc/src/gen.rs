//! High-level IR generators (§4.2).
//!
//! Each function here mirrors one `gen_*` grammar-action constructor:
//! it takes already-built `Block`s for its
//! sub-expressions and splices them, together with a handful of new
//! instructions, into the `Block` for the larger expression. None of
//! these functions resolve names — that is `bind`'s job (§4.3) — so a
//! `call` produces an *unbound* `CALL_JQ` reference that a later pass
//! must bind or report as undefined.
//!
//! There is deliberately no AST type here: callers (a parser, or in this
//! crate's tests, direct construction) build a program by calling these
//! functions directly and combining their results, exactly as a bison
//! grammar's actions would.
//!
//! ## Branch targets land *after* their target block
//!
//! A branch's target is always the *last* instruction of the block it
//! is conceptually jumping to, not the first. Landing at a bytecode
//! position means resuming execution immediately after that position's
//! instruction finishes, so "jump to (the end of) block X" and "resume
//! right after X" are the same thing. [`op_target`] and [`set_target`]
//! both take the landing block and store its `last()` handle; get this
//! backwards and every branch lands one instruction early.

use std::rc::Rc;

use crate::bytecode::{OpFlags, Opcode};
use crate::cfunc::CFuncDescriptor;
use crate::ir::{Arena, Block, BoundBy, Immediate, InstHandle, Instruction};
use crate::location::SourceRange;
use crate::value::Value;

fn push(arena: &mut Arena, inst: Instruction) -> Block {
    Block::single(arena.alloc(inst))
}

/// A bare instruction with no immediate or binding (`gen_op_simple`).
#[must_use]
pub fn op_simple(arena: &mut Arena, opcode: Opcode, location: SourceRange) -> Block {
    push(arena, Instruction { location, ..Instruction::simple(opcode) })
}

/// A constant literal (`gen_const` — `LOADK`).
#[must_use]
pub fn constant(arena: &mut Arena, value: Value, location: SourceRange) -> Block {
    push(arena, Instruction {
        imm: Immediate::Const(value),
        location,
        ..Instruction::simple(Opcode::LoadK)
    })
}

/// A branch instruction whose target is not yet known (`gen_op_targetlater`).
/// Patch it with [`set_target`] once the landing block exists.
#[must_use]
pub fn op_targetlater(arena: &mut Arena, opcode: Opcode, location: SourceRange) -> Block {
    push(arena, Instruction {
        imm: Immediate::Target(None),
        location,
        ..Instruction::simple(opcode)
    })
}

/// A branch instruction that lands immediately after `target` (`gen_op_target`).
#[must_use]
pub fn op_target(arena: &mut Arena, opcode: Opcode, target: Block, location: SourceRange) -> Block {
    let landing = target.last().expect("branch target block must be non-empty");
    push(arena, Instruction {
        imm: Immediate::Target(Some(landing)),
        location,
        ..Instruction::simple(opcode)
    })
}

/// Patches a previously-built [`op_targetlater`] branch to land immediately
/// after `landing` (`inst_set_target`).
pub fn set_target(arena: &mut Arena, branch: Block, landing: Block) {
    let branch_handle = branch.first().expect("branch block must be a single instruction");
    let landing_handle = landing.last().expect("landing block must be non-empty");
    arena.get_mut(branch_handle).imm = Immediate::Target(Some(landing_handle));
}

/// An unresolved reference or binder-to-be, carrying only a name
/// (`gen_op_unbound`).
#[must_use]
pub fn op_unbound(arena: &mut Arena, opcode: Opcode, name: &str, location: SourceRange) -> Block {
    push(arena, Instruction {
        symbol: Some(Rc::from(name)),
        location,
        ..Instruction::simple(opcode)
    })
}

/// A reference already resolved against `binder` (`gen_op_bound`).
#[must_use]
pub fn op_bound(arena: &mut Arena, opcode: Opcode, binder: InstHandle, location: SourceRange) -> Block {
    let symbol = arena.get(binder).symbol.clone();
    push(arena, Instruction {
        symbol,
        bound_by: BoundBy::Bound(binder),
        location,
        ..Instruction::simple(opcode)
    })
}

/// A fresh internal variable, bound to itself immediately (`gen_op_var_fresh`):
/// no later `bind` pass is needed since nothing outside this function ever
/// spells its generated name.
#[must_use]
pub fn op_var_fresh(arena: &mut Arena, hint: &str, location: SourceRange) -> Block {
    let name = format!("*{hint}*");
    let b = op_unbound(arena, Opcode::StoreV, &name, location);
    let handle = b.first().expect("op_unbound produces a single instruction");
    arena.get_mut(handle).bound_by = BoundBy::Bound(handle);
    b
}

/// Sequential composition: run `a`, then backtrack into `b` once `a` is
/// exhausted (`gen_both` — the `,` operator). Unlike a plain
/// [`Block::concat`], both `a` and `b` independently see the same input
/// and both sets of outputs are produced.
#[must_use]
pub fn both(arena: &mut Arena, a: Block, b: Block, location: SourceRange) -> Block {
    let jump = op_targetlater(arena, Opcode::Jump, location);
    let fork = op_target(arena, Opcode::Fork, jump, location);
    let c = fork.concat(arena, a).concat(arena, jump).concat(arena, b);
    set_target(arena, jump, c);
    c
}

/// Brackets `body` in `SUBEXP_BEGIN`/`SUBEXP_END` so the interpreter can
/// isolate its effect on the value stack (object/array construction
/// sub-expressions; `gen_subexp`).
#[must_use]
pub fn subexp(arena: &mut Arena, body: Block, location: SourceRange) -> Block {
    let begin = op_simple(arena, Opcode::SubexpBegin, location);
    let end = op_simple(arena, Opcode::SubexpEnd, location);
    begin.concat(arena, body).concat(arena, end)
}

/// Collects every output of `expr` into an array (`gen_collect` —
/// bracket construction `[...]`).
#[must_use]
pub fn collect(arena: &mut Arena, expr: Block, location: SourceRange) -> Block {
    let array_var = op_var_fresh(arena, "collect", location);
    let dup = op_simple(arena, Opcode::Dup, location);
    let init = constant(arena, Value::empty_array(), location);
    let array_var_handle = array_var.first().expect("op_var_fresh is single-node");
    let c = dup.concat(arena, init).concat(arena, array_var);

    let append = op_bound(arena, Opcode::Append, array_var_handle, location);
    let backtrack = op_simple(arena, Opcode::Backtrack, location);
    let tail = append.concat(arena, backtrack);

    let fork = op_target(arena, Opcode::Fork, tail, location);
    let load = op_bound(arena, Opcode::LoadVN, array_var_handle, location);
    c.concat(arena, fork).concat(arena, expr).concat(arena, tail).concat(arena, load)
}

/// `reduce source as $name (init; update)` (`gen_reduce`).
#[must_use]
pub fn reduce(arena: &mut Arena, name: &str, source: Block, init: Block, update: Block, location: SourceRange) -> Block {
    let res_var = op_var_fresh(arena, "reduce", location);
    let res_var_handle = res_var.first().expect("op_var_fresh is single-node");

    let name_binder = op_unbound(arena, Opcode::StoreV, name, location);
    let body = op_bound(arena, Opcode::LoadVN, res_var_handle, location)
        .concat(arena, update)
        .concat(arena, op_bound(arena, Opcode::StoreV, res_var_handle, location));
    let bound_name = bind_one(arena, name_binder, body, OpFlags::HAS_VARIABLE);

    let loop_body = op_simple(arena, Opcode::Dup, location)
        .concat(arena, source)
        .concat(arena, bound_name)
        .concat(arena, op_simple(arena, Opcode::Backtrack, location));

    let fork = op_target(arena, Opcode::Fork, loop_body, location);
    op_simple(arena, Opcode::Dup, location)
        .concat(arena, init)
        .concat(arena, res_var)
        .concat(arena, fork)
        .concat(arena, loop_body)
        .concat(arena, op_bound(arena, Opcode::LoadVN, res_var_handle, location))
}

/// `foreach source as $name (init; update; extract)` (`gen_foreach`).
///
/// Differs from [`reduce`] in two ways: it emits `extract`'s result on
/// *every* iteration (not just the last), and a `break`/`$__loop__`
/// error raised from inside `update` or `extract` is caught and treated
/// as "stop the loop" (`error("break") | .` bails out cleanly instead of
/// propagating).
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn foreach(
    arena: &mut Arena,
    name: &str,
    source: Block,
    init: Block,
    update: Block,
    extract: Block,
    location: SourceRange,
) -> Block {
    let output = op_targetlater(arena, Opcode::Jump, location);
    let state_var = op_var_fresh(arena, "foreach", location);
    let state_var_handle = state_var.first().expect("op_var_fresh is single-node");

    let name_binder = op_unbound(arena, Opcode::StoreV, name, location);
    let per_item_body = op_bound(arena, Opcode::LoadVN, state_var_handle, location)
        .concat(arena, update)
        .concat(arena, op_simple(arena, Opcode::Dup, location))
        .concat(arena, op_bound(arena, Opcode::StoreV, state_var_handle, location))
        .concat(arena, extract)
        .concat(arena, output);
    let bound_name = bind_one(arena, name_binder, per_item_body, OpFlags::HAS_VARIABLE);

    let loop_body = op_simple(arena, Opcode::Dup, location)
        .concat(arena, source)
        .concat(arena, bound_name);

    let fork = op_target(arena, Opcode::Fork, loop_body, location);
    let foreach_block = op_simple(arena, Opcode::Dup, location)
        .concat(arena, init)
        .concat(arena, state_var)
        .concat(arena, fork)
        .concat(arena, loop_body)
        .concat(arena, op_simple(arena, Opcode::Backtrack, location));
    set_target(arena, output, foreach_block);

    let break_literal = lambda(arena, constant(arena, Value::string("break"), location), location);
    let noop_literal = lambda(arena, Block::empty(), location);
    let is_break = call(arena, "_equal", break_literal.concat(arena, noop_literal), location);
    let handler = cond(
        arena,
        is_break,
        op_simple(arena, Opcode::Backtrack, location),
        call(arena, "break", Block::empty(), location),
        location,
    );
    try_(arena, foreach_block, handler, location)
}

/// `a // b` (`gen_definedor`): use `a`'s outputs where defined, falling
/// back to `b` only if `a` produced no defined value at all.
#[must_use]
pub fn definedor(arena: &mut Arena, a: Block, b: Block, location: SourceRange) -> Block {
    let found_var = op_var_fresh(arena, "found", location);
    let found_var_handle = found_var.first().expect("op_var_fresh is single-node");
    let init = op_simple(arena, Opcode::Dup, location)
        .concat(arena, constant(arena, Value::Bool(false), location))
        .concat(arena, found_var);

    let backtrack = op_simple(arena, Opcode::Backtrack, location);
    let tail = op_simple(arena, Opcode::Dup, location)
        .concat(arena, op_bound(arena, Opcode::LoadV, found_var_handle, location))
        .concat(arena, op_target(arena, Opcode::JumpF, backtrack, location))
        .concat(arena, backtrack)
        .concat(arena, op_simple(arena, Opcode::Pop, location))
        .concat(arena, b);

    let if_notfound = op_simple(arena, Opcode::Backtrack, location);

    let jump_to_tail = op_targetlater(arena, Opcode::Jump, location);
    let if_found = op_simple(arena, Opcode::Dup, location)
        .concat(arena, constant(arena, Value::Bool(true), location))
        .concat(arena, op_bound(arena, Opcode::StoreV, found_var_handle, location))
        .concat(arena, jump_to_tail);
    set_target(arena, jump_to_tail, tail);

    let fork = op_target(arena, Opcode::Fork, if_notfound, location);
    init.concat(arena, fork)
        .concat(arena, a)
        .concat(arena, op_target(arena, Opcode::JumpF, if_found, location))
        .concat(arena, if_found)
        .concat(arena, if_notfound)
        .concat(arena, tail)
}

/// `if cond then iftrue else iffalse` as a raw branch, without the
/// `DUP`/input-threading `gen_cond` adds (`gen_condbranch`).
#[must_use]
pub fn condbranch(arena: &mut Arena, iftrue: Block, iffalse: Block, location: SourceRange) -> Block {
    let jump_end = op_target(arena, Opcode::Jump, iffalse, location);
    let iftrue = iftrue.concat(arena, jump_end);
    let jump_f = op_target(arena, Opcode::JumpF, iftrue, location);
    jump_f.concat(arena, iftrue).concat(arena, iffalse)
}

/// `a and b` (`gen_and`): short-circuits to `false` without evaluating
/// `b` if `a` is falsy.
#[must_use]
pub fn and(arena: &mut Arena, a: Block, b: Block, location: SourceRange) -> Block {
    let inner = condbranch(
        arena,
        constant(arena, Value::Bool(true), location),
        constant(arena, Value::Bool(false), location),
        location,
    );
    let true_side = op_simple(arena, Opcode::Pop, location).concat(arena, b).concat(arena, inner);
    let false_side = op_simple(arena, Opcode::Pop, location).concat(arena, constant(arena, Value::Bool(false), location));
    op_simple(arena, Opcode::Dup, location)
        .concat(arena, a)
        .concat(arena, condbranch(arena, true_side, false_side, location))
}

/// `a or b` (`gen_or`): short-circuits to `true` without evaluating `b`
/// if `a` is truthy.
#[must_use]
pub fn or(arena: &mut Arena, a: Block, b: Block, location: SourceRange) -> Block {
    let inner = condbranch(
        arena,
        constant(arena, Value::Bool(true), location),
        constant(arena, Value::Bool(false), location),
        location,
    );
    let true_side = op_simple(arena, Opcode::Pop, location).concat(arena, constant(arena, Value::Bool(true), location));
    let false_side = op_simple(arena, Opcode::Pop, location).concat(arena, b).concat(arena, inner);
    op_simple(arena, Opcode::Dup, location)
        .concat(arena, a)
        .concat(arena, condbranch(arena, true_side, false_side, location))
}

/// `source as $name | body` (`gen_var_binding`).
#[must_use]
pub fn var_binding(arena: &mut Arena, name: &str, source: Block, body: Block, location: SourceRange) -> Block {
    let binder = op_unbound(arena, Opcode::StoreV, name, location);
    let bound_body = bind_one(arena, binder, body, OpFlags::HAS_VARIABLE);
    op_simple(arena, Opcode::Dup, location).concat(arena, source).concat(arena, bound_body)
}

/// `if cond then iftrue else iffalse end` (`gen_cond`).
#[must_use]
pub fn cond(arena: &mut Arena, condition: Block, iftrue: Block, iffalse: Block, location: SourceRange) -> Block {
    let true_side = op_simple(arena, Opcode::Pop, location).concat(arena, iftrue);
    let false_side = op_simple(arena, Opcode::Pop, location).concat(arena, iffalse);
    op_simple(arena, Opcode::Dup, location)
        .concat(arena, condition)
        .concat(arena, condbranch(arena, true_side, false_side, location))
}

/// `try exp catch handler` (`gen_try`). An empty `handler` (no `catch`
/// clause) becomes the identity filter — "the handler is just `.`".
#[must_use]
pub fn try_(arena: &mut Arena, exp: Block, handler: Block, location: SourceRange) -> Block {
    let handler = if handler.is_empty() {
        op_simple(arena, Opcode::Dup, location).concat(arena, op_simple(arena, Opcode::Pop, location))
    } else {
        handler
    };
    let jump_past_handler = op_target(arena, Opcode::Jump, handler, location);
    let exp = exp.concat(arena, jump_past_handler);
    let fork_opt = op_target(arena, Opcode::ForkOpt, exp, location);
    fork_opt.concat(arena, exp).concat(arena, handler)
}

/// A formal parameter of a `function`/lambda (`gen_param`). Produces a
/// single `CLOSURE_PARAM` pseudo-instruction acting as an (initially
/// unbound) binder; it contributes no emitted bytecode (length 0) but
/// participates in `bind::bind_each`.
#[must_use]
pub fn param(arena: &mut Arena, name: &str, location: SourceRange) -> Block {
    op_unbound(arena, Opcode::ClosureParam, name, location)
}

/// `def name(formals): body;` (`gen_function`).
///
/// Binds `formals` to `body` (so references to `$x`/a nullary sibling
/// param inside the body resolve) and then self-binds the resulting
/// `CLOSURE_CREATE` node against its own body and arglist, so recursive
/// calls to `name` from within `body` resolve too.
#[must_use]
pub fn function(arena: &mut Arena, name: &str, formals: Block, body: Block, location: SourceRange) -> Block {
    let body = bind_each(arena, formals, body, OpFlags::IS_CALL_PSEUDO);
    let nformals = formals.len(arena);
    let handle = arena.alloc(Instruction {
        symbol: Some(Rc::from(name)),
        nformals: Some(nformals),
        subfn: body,
        arglist: formals,
        location,
        ..Instruction::simple(Opcode::ClosureCreate)
    });
    arena.get_mut(handle).bound_by = BoundBy::Bound(handle);
    let b = Block::single(handle);
    crate::bind::bind_subblock_self(arena, b, b, OpFlags::IS_CALL_PSEUDO.union(OpFlags::HAS_BINDING));
    b
}

/// An anonymous, nullary `function` (`gen_lambda`) — every actual
/// argument at a call site is wrapped in one of these, per the calling
/// convention (§5).
#[must_use]
pub fn lambda(arena: &mut Arena, body: Block, location: SourceRange) -> Block {
    function(arena, "@lambda", Block::empty(), body, location)
}

/// `name(args...)` (`gen_call`). `args` must already be a list of
/// closures — one [`lambda`]-wrapped expression per actual argument, in
/// order — matching what a call's arglist holds before
/// [`crate::lower::expand_call_arglist`] rewrites it. Produces an
/// *unbound* `CALL_JQ` reference; `bind` resolves it against a matching
/// binder, or it is reported as undefined (§7.2).
#[must_use]
pub fn call(arena: &mut Arena, name: &str, args: Block, location: SourceRange) -> Block {
    let nactuals = args.len(arena);
    let b = op_unbound(arena, Opcode::CallJq, name, location);
    let handle = b.first().expect("op_unbound is single-node");
    let inst = arena.get_mut(handle);
    inst.arglist = args;
    inst.nactuals = Some(nactuals);
    b
}

/// Binds a host-provided builtin into scope for `code` (§6.2 —
/// `gen_cbinding`/`CLOSURE_CREATE_C`). Unlike [`function`], there is no
/// `subfn`: the implementation lives entirely on the host side,
/// identified by `descriptor`.
#[must_use]
pub fn cbinding(arena: &mut Arena, descriptor: Rc<CFuncDescriptor>, code: Block, location: SourceRange) -> Block {
    let name = descriptor.name.clone();
    let nformals = descriptor.explicit_arity();
    let handle = arena.alloc(Instruction {
        symbol: Some(name),
        nformals: Some(nformals),
        imm: Immediate::CFunc(descriptor),
        location,
        ..Instruction::simple(Opcode::ClosureCreateC)
    });
    arena.get_mut(handle).bound_by = BoundBy::Bound(handle);
    crate::bind::bind_one(arena, Block::single(handle), code, OpFlags::IS_CALL_PSEUDO)
}

/// Marks `body` as a top-level program (§3.1's `TOP` marker), consumed
/// by `bind::take_imports`/import extraction before lowering and
/// otherwise inert.
#[must_use]
pub fn top(arena: &mut Arena, body: Block, location: SourceRange) -> Block {
    op_simple(arena, Opcode::Top, location).concat(arena, body)
}

/// Stamps `location` (and its `file`) onto every instruction in `b` that
/// still carries the "unknown" default (`gen_location`). Instructions
/// already stamped by a nested `gen_location` call — e.g. a sub-block
/// built from a more specific grammar production — are left alone, so the
/// outermost call only fills in gaps.
#[must_use]
pub fn gen_location(arena: &mut Arena, location: &SourceRange, b: Block) -> Block {
    for h in b.handles(arena) {
        let inst = arena.get_mut(h);
        if inst.location.is_unknown() {
            inst.location = location.clone();
        }
    }
    b
}

/// An import/module dependency declaration (§4.2 — `gen_import`). Holds
/// an opaque options value (`as`/`search` path overrides) and is
/// stripped from the program before compilation by
/// [`crate::bind::take_imports`]; never reaches lowering.
#[must_use]
pub fn import(arena: &mut Arena, module_name: &str, options: Value, location: SourceRange) -> Block {
    push(arena, Instruction {
        symbol: Some(Rc::from(module_name)),
        imm: Immediate::Const(options),
        location,
        ..Instruction::simple(Opcode::Deps)
    })
}

/// Thin re-export so `function`/`var_binding`/`cbinding` can call
/// `bind`'s single-binder entry point without this module depending on
/// `bind`'s full public surface.
fn bind_one(arena: &mut Arena, binder: Block, body: Block, bindflags: OpFlags) -> Block {
    crate::bind::bind_one(arena, binder, body, bindflags)
}

fn bind_each(arena: &mut Arena, binders: Block, body: Block, bindflags: OpFlags) -> Block {
    crate::bind::bind_each(arena, binders, body, bindflags);
    body
}
