//! Lowering: call-site expansion and bytecode emission (§4.4).
//!
//! This is the one pass that mutates the IR arena in place rather than
//! building new blocks: `expand_call_arglist` rewrites call sites'
//! argument lists into their calling-convention shape, and `compile`
//! walks the resulting block twice — once to assign byte offsets, local
//! slots, and subfunction/host-symbol indices, once to actually emit
//! words into the code vector — recursing into each `CLOSURE_CREATE`'s
//! body to build its child [`Bytecode`] node along the way.

use std::rc::Rc;

use crate::bind::count_actuals;
use crate::bytecode::code::nesting_level;
use crate::bytecode::{Bytecode, BytecodeArena, BytecodeHandle, CompiledProgram, DebugInfo, OpFlags, Opcode, ParamInfo, SymbolTable, NEWCLOSURE_BIT};
use crate::error::{CompileError, Diagnostics};
use crate::gen;
use crate::ir::{Arena, Block, BoundBy, Immediate, InstHandle, Instruction};
use crate::location::SourceRange;
use crate::options::CompileOptions;
use crate::trace::CompileTracer;
use crate::value::Value;

/// Recursively counts `CLOSURE_CREATE_C` binders reachable through `block`
/// and every nested function body (not argument lists — a host function
/// bound only as a call argument doesn't arise before `expand_call_arglist`
/// runs, and by the time lowering walks subfunctions every surviving
/// `CLOSURE_CREATE_C` sits in a function body's top-level chain). Used to
/// preallocate the root's C-function table (§4.4 — `block_compile`).
#[must_use]
pub fn count_cfunctions(arena: &Arena, block: Block) -> usize {
    let mut n = 0;
    for h in block.handles(arena) {
        if arena.get(h).opcode == Opcode::ClosureCreateC {
            n += 1;
        }
        n += count_cfunctions(arena, arena.get(h).subfn);
    }
    n
}

/// Builds a `CLOSURE_REF` instruction bound to `target` (the `gen_op_bound`
/// shape, specialized to the one opcode lowering needs it for).
fn closure_ref(arena: &mut Arena, target: InstHandle, location: SourceRange) -> Block {
    let symbol = arena.get(target).symbol.clone();
    let handle = arena.alloc(Instruction {
        symbol,
        bound_by: BoundBy::Bound(target),
        location,
        ..Instruction::simple(Opcode::ClosureRef)
    });
    Block::single(handle)
}

/// Expands every call site in `block` into its calling-convention shape
/// (§4.4 step 1), reporting undefined references to `diagnostics` as it
/// goes. Errors are non-fatal within this pass: an undefined reference is
/// passed through unchanged so later references can still be discovered.
#[must_use]
pub fn expand_call_arglist<Tr: CompileTracer>(arena: &mut Arena, block: Block, diagnostics: &mut Diagnostics, tracer: &mut Tr) -> Block {
    let mut ret = Block::empty();
    for h in block.handles(arena) {
        let flags = arena.get(h).opcode.flags();
        if flags.contains(OpFlags::HAS_BINDING) && !arena.get(h).bound_by.is_bound() {
            let symbol = arena.get(h).symbol.clone().unwrap_or_else(|| Rc::from(""));
            let nactuals = (arena.get(h).opcode == Opcode::CallJq).then(|| count_actuals(arena, arena.get(h).arglist));
            tracer.undefined_reference(&symbol, nactuals);
            diagnostics.push(CompileError::undefined(symbol.to_string(), nactuals, arena.get(h).location.clone()));
            ret = ret.concat(arena, Block::single(h));
            continue;
        }

        let mut prelude = Block::empty();
        if arena.get(h).opcode == Opcode::CallJq {
            let binder = arena.get(h).bound_by.binder().expect("HAS_BINDING+bound checked above");
            match arena.get(binder).opcode {
                Opcode::ClosureCreate | Opcode::ClosureParam => {
                    let mut callargs = Block::empty();
                    let mut actual_args: usize = 0;
                    for arg_h in arena.get(h).arglist.handles(arena) {
                        match arena.get(arg_h).opcode {
                            Opcode::ClosureRef => {
                                callargs = callargs.concat(arena, Block::single(arg_h));
                            }
                            Opcode::ClosureCreate => {
                                let loc = arena.get(arg_h).location.clone();
                                prelude = prelude.concat(arena, Block::single(arg_h));
                                callargs = callargs.concat(arena, closure_ref(arena, arg_h, loc));
                            }
                            other => unreachable!("unexpected call-argument pseudo-op {other:?}"),
                        }
                        actual_args += 1;
                    }
                    arena.get_mut(h).imm = Immediate::Int(actual_args as u16);
                    arena.get_mut(h).arglist = callargs;

                    if arena.get(binder).opcode == Opcode::ClosureCreate {
                        let desired = arena.get(binder).nformals.expect("ClosureCreate binder always has nformals set by bind");
                        debug_assert_eq!(actual_args, desired, "call site arity mismatches its resolved binder");
                    }
                }
                Opcode::ClosureCreateC => {
                    let mut actual_args: usize = 0;
                    for arg_h in arena.get(h).arglist.handles(arena) {
                        debug_assert_eq!(arena.get(arg_h).opcode, Opcode::ClosureCreate, "builtin call arguments are lambda-wrapped expressions");
                        let loc = arena.get(arg_h).location.clone();
                        let body = arena.get(arg_h).subfn;
                        arena.get_mut(arg_h).subfn = Block::empty();
                        let body = expand_call_arglist(arena, body, diagnostics, tracer);
                        let wrapped = gen::subexp(arena, body, loc);
                        // Arguments are pushed in reverse textual order, so
                        // each newly expanded argument is prepended.
                        prelude = wrapped.concat(arena, prelude);
                        actual_args += 1;
                    }
                    arena.get_mut(h).opcode = Opcode::CallBuiltin;
                    arena.get_mut(h).imm = Immediate::Int((actual_args + 1) as u16);
                    arena.get_mut(h).arglist = Block::empty();
                }
                other => unreachable!("CALL_JQ bound to non-callable opcode {other:?}"),
            }
        }
        ret = ret.concat(arena, prelude).concat(arena, Block::single(h));
    }
    ret
}

/// First-and-second-pass lowering for one subfunction (§4.4 step 2),
/// recursing into each `CLOSURE_CREATE` found along the way. Returns the
/// handle of the freshly built [`Bytecode`] node; errors accumulate into
/// `diagnostics` rather than aborting the walk, so every undefined
/// reference in the program is discovered before `block_compile` gives up.
///
/// `bc_handle` must already be allocated in `bc_arena` by the caller
/// (`compile.c:830` sets `param->compiled = subfn` before `compile(subfn,
/// …)` at line 835, precisely because the child's own body can call one
/// of its formal parameters — `def id(f): f;` — and that call's emission
/// needs the parameter's `compiled` handle to exist *before* the child's
/// body is walked, not after the recursion returns).
#[expect(clippy::too_many_arguments, reason = "lowering threads the same handful of pieces of shared state through every recursive call")]
fn compile<Tr: CompileTracer>(
    arena: &mut Arena,
    bc_arena: &mut BytecodeArena,
    symbols: &mut SymbolTable,
    bc_handle: BytecodeHandle,
    body: Block,
    name: Option<Rc<str>>,
    params: Vec<ParamInfo>,
    options: &CompileOptions,
    depth: u32,
    diagnostics: &mut Diagnostics,
    tracer: &mut Tr,
) -> BytecodeHandle {
    assert!(depth <= options.max_nesting_depth, "function nesting exceeds max_nesting_depth");

    let expanded = expand_call_arglist(arena, body, diagnostics, tracer);
    let ret = gen::op_simple(arena, Opcode::Ret, SourceRange::unknown());
    let full = expanded.concat(arena, ret);

    {
        let bc = bc_arena.get_mut(bc_handle);
        bc.debug.name = name;
        bc.debug.params = params;
    }

    // --- First pass: byte offsets, local slots, subfunction/host indices.
    let mut pos: u32 = 0;
    let mut var_frame_idx: u16 = 0;
    let mut locals: Vec<Rc<str>> = Vec::new();
    let mut closures: Vec<InstHandle> = Vec::new();

    for h in full.handles(arena) {
        let opcode = arena.get(h).opcode;
        let mut length = u32::from(opcode.length());
        if opcode == Opcode::CallJq {
            length += 2 * arena.get(h).arglist.len(arena) as u32;
        }
        pos += length;
        arena.get_mut(h).bytecode_pos = Some(pos);
        arena.get_mut(h).compiled = Some(bc_handle);

        let is_binder = arena.get(h).is_binder(h);
        if opcode.flags().contains(OpFlags::HAS_VARIABLE) && is_binder {
            let idx = var_frame_idx;
            var_frame_idx += 1;
            arena.get_mut(h).imm = Immediate::Int(idx);
            locals.push(arena.get(h).symbol.clone().unwrap_or_else(|| Rc::from("")));
        }

        if opcode == Opcode::ClosureCreate {
            debug_assert!(is_binder, "CLOSURE_CREATE always self-binds");
            let idx = u16::try_from(closures.len()).expect("more closures than fit in a u16 slot");
            closures.push(h);
            arena.get_mut(h).imm = Immediate::Int(idx);
            let sym = arena.get(h).symbol.clone().unwrap_or_else(|| Rc::from(""));
            tracer.subfunction_assigned(idx as usize, &sym);
        }

        if opcode == Opcode::ClosureCreateC {
            debug_assert!(is_binder, "CLOSURE_CREATE_C always self-binds");
            let descriptor = arena.get(h).imm.as_cfunc().expect("CLOSURE_CREATE_C always carries a CFunc immediate").clone();
            let idx = symbols.push(descriptor);
            arena.get_mut(h).imm = Immediate::Int(idx);
        }
    }
    let codelen = pos;
    bc_arena.get_mut(bc_handle).debug.locals = locals;

    // --- Recurse into subfunctions.
    let mut subfunctions = Vec::with_capacity(closures.len());
    for h in closures {
        let subname = arena.get(h).symbol.clone();
        let formal_handles = arena.get(h).arglist.handles(arena);
        let mut child_params = Vec::with_capacity(formal_handles.len());
        for (i, &ph) in formal_handles.iter().enumerate() {
            debug_assert_eq!(arena.get(ph).opcode, Opcode::ClosureParam);
            debug_assert!(arena.get(ph).is_binder(ph), "CLOSURE_PARAM always self-binds");
            arena.get_mut(ph).imm = Immediate::Int(u16::try_from(i).expect("more params than fit in a u16 slot"));
            child_params.push(ParamInfo {
                name: arena.get(ph).symbol.clone().unwrap_or_else(|| Rc::from("")),
                location: arena.get(ph).location.clone(),
            });
        }

        // Allocate the child's `Bytecode` node and point every formal
        // parameter at it *before* recursing: the child's own body may
        // call one of these parameters (`def id(f): f;`), and that call's
        // emission looks up `compiled` on the parameter, not on the
        // `CLOSURE_CREATE` being recursed into.
        let child = bc_arena.alloc(Bytecode {
            parent: Some(bc_handle),
            code: Vec::new(),
            constants: Vec::new(),
            nlocals: 0,
            subfunctions: Vec::new(),
            debug: DebugInfo::default(),
        });
        for &ph in &formal_handles {
            arena.get_mut(ph).compiled = Some(child);
        }

        let subfn_body = arena.get(h).subfn;
        arena.get_mut(h).subfn = Block::empty();
        compile(arena, bc_arena, symbols, child, subfn_body, subname, child_params, options, depth + 1, diagnostics, tracer);
        subfunctions.push(child);
    }
    bc_arena.get_mut(bc_handle).subfunctions = subfunctions;

    if !diagnostics.is_empty() {
        // An error occurred somewhere in this subtree; skip emission, the
        // whole `CompiledProgram` is discarded by `block_compile` anyway.
        return bc_handle;
    }

    // --- Second pass: emission.
    let mut code: Vec<u16> = Vec::with_capacity(codelen as usize);
    let mut constants: Vec<Value> = Vec::new();
    let mut maxvar: i32 = -1;
    let mut emit_pos: u32 = 0;

    for h in full.handles(arena) {
        let opcode = arena.get(h).opcode;
        if opcode.length() == 0 {
            continue;
        }
        code.push(opcode as u16);
        emit_pos += 1;

        match opcode {
            Opcode::CallBuiltin => {
                let binder = arena.get(h).bound_by.binder().expect("CALL_BUILTIN must be bound");
                debug_assert_eq!(arena.get(binder).opcode, Opcode::ClosureCreateC);
                debug_assert!(arena.get(h).arglist.is_empty());
                let argcount = arena.get(h).imm.as_int().expect("CALL_BUILTIN carries its resolved arg count");
                let slot = arena.get(binder).imm.as_int().expect("bound CLOSURE_CREATE_C carries its symbol-table index");
                code.push(argcount);
                code.push(slot);
                emit_pos += 2;
            }
            Opcode::CallJq => {
                let binder = arena.get(h).bound_by.binder().expect("CALL_JQ must be bound");
                let binder_op = arena.get(binder).opcode;
                debug_assert!(matches!(binder_op, Opcode::ClosureCreate | Opcode::ClosureParam));
                let argcount = arena.get(h).imm.as_int().expect("CALL_JQ carries its resolved arg count");
                let level = nesting_level(bc_arena, bc_handle, arena.get(binder).compiled.expect("binder was assigned a subfunction"));
                let slot = arena.get(binder).imm.as_int().expect("bound instruction carries its slot");
                let tag = if binder_op == Opcode::ClosureCreate { NEWCLOSURE_BIT } else { 0 };
                code.push(argcount);
                code.push(level);
                code.push(slot | tag);
                emit_pos += 3;
                for arg_h in arena.get(h).arglist.handles(arena) {
                    debug_assert_eq!(arena.get(arg_h).opcode, Opcode::ClosureRef);
                    let arg_binder = arena.get(arg_h).bound_by.binder().expect("CLOSURE_REF must be bound");
                    debug_assert_eq!(arena.get(arg_binder).opcode, Opcode::ClosureCreate);
                    let arg_level = nesting_level(bc_arena, bc_handle, arena.get(arg_binder).compiled.expect("closure was assigned a subfunction"));
                    let arg_slot = arena.get(arg_binder).imm.as_int().expect("closure carries its slot");
                    code.push(arg_level);
                    code.push(arg_slot | NEWCLOSURE_BIT);
                    emit_pos += 2;
                }
            }
            _ if opcode.flags().contains(OpFlags::HAS_CONSTANT) => {
                let value = arena.get(h).imm.as_const().expect("HAS_CONSTANT instruction carries a constant").clone();
                let idx = u16::try_from(constants.len()).expect("more constants than fit in a u16 pool index");
                constants.push(value);
                code.push(idx);
                emit_pos += 1;
            }
            _ if opcode.flags().contains(OpFlags::HAS_VARIABLE) => {
                let binder = arena.get(h).bound_by.binder().expect("HAS_VARIABLE instruction must be bound");
                let level = nesting_level(bc_arena, bc_handle, arena.get(binder).compiled.expect("binder was assigned a subfunction"));
                let var = arena.get(binder).imm.as_int().expect("variable binder carries its slot");
                code.push(level);
                code.push(var);
                emit_pos += 2;
                maxvar = maxvar.max(i32::from(var));
            }
            _ if opcode.flags().contains(OpFlags::HAS_BRANCH) => {
                let target = arena.get(h).imm.as_target().expect("branch carries a target");
                let target_pos = arena.get(target).bytecode_pos.expect("branch target was visited in the first pass");
                if options.reject_backward_branches {
                    assert!(target_pos > emit_pos, "backward branch rejected");
                }
                let offset = target_pos - (emit_pos + 1);
                code.push(u16::try_from(offset).expect("branch offset exceeds u16 range"));
                emit_pos += 1;
            }
            _ => {
                assert_eq!(opcode.length(), 1, "codegen not implemented for opcode {opcode:?}");
            }
        }
    }

    let bc = bc_arena.get_mut(bc_handle);
    bc.code = code;
    bc.constants = constants;
    bc.nlocals = u16::try_from(maxvar + 2).expect("nlocals exceeds u16 range"); // FIXME: reserves a slot even for a frame with no variables (§9)
    bc_handle
}

/// Entry point (§4.4 — `block_compile`): lowers `top` to a
/// [`CompiledProgram`], consuming the IR `arena` it was built in. Returns
/// every diagnostic collected if any reference stayed undefined or any
/// arity mismatched; no partial bytecode escapes a failing compile.
pub fn block_compile<Tr: CompileTracer>(mut arena: Arena, top: Block, options: &CompileOptions, tracer: &mut Tr) -> Result<CompiledProgram, Diagnostics> {
    let ncfunctions = count_cfunctions(&arena, top);
    let mut bc_arena = BytecodeArena::new();
    let mut symbols = SymbolTable::new();
    let mut diagnostics = Diagnostics::new();

    let root = bc_arena.alloc(Bytecode {
        parent: None,
        code: Vec::new(),
        constants: Vec::new(),
        nlocals: 0,
        subfunctions: Vec::new(),
        debug: DebugInfo::default(),
    });
    compile(&mut arena, &mut bc_arena, &mut symbols, root, top, None, Vec::new(), options, 0, &mut diagnostics, tracer);

    debug_assert_eq!(symbols.len(), ncfunctions, "host-function table misalignment between pre-scan and compile");

    if diagnostics.is_empty() {
        Ok(CompiledProgram { arena: bc_arena, root, symbols })
    } else {
        Err(diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::NoopTracer;

    fn compile_ok(arena: Arena, top: Block) -> CompiledProgram {
        block_compile(arena, top, &CompileOptions::default(), &mut NoopTracer).expect("compile should succeed")
    }

    #[test]
    fn constant_program_emits_loadk_then_ret() {
        let mut arena = Arena::new();
        let loc = SourceRange::unknown();
        let body = gen::constant(&mut arena, Value::Number(42.0), loc);
        let top = gen::top(&mut arena, body, loc);
        let program = compile_ok(arena, top);
        let root = program.root();
        assert_eq!(root.code[0], Opcode::Top as u16);
        assert_eq!(root.code[1], Opcode::LoadK as u16);
        assert_eq!(root.code[2], 0);
        assert_eq!(root.constants.len(), 1);
        assert_eq!(*root.code.last().unwrap(), Opcode::Ret as u16);
        assert!(root.nlocals >= 2);
    }

    #[test]
    fn empty_body_compiles_to_just_ret() {
        let arena = Arena::new();
        let program = compile_ok(arena, Block::empty());
        assert_eq!(program.root().code, vec![Opcode::Ret as u16]);
    }

    #[test]
    fn undefined_reference_is_reported_and_blocks_output() {
        let mut arena = Arena::new();
        let loc = SourceRange::unknown();
        let call = gen::call(&mut arena, "nope", Block::empty(), loc);
        let err = block_compile(arena, call, &CompileOptions::default(), &mut NoopTracer).unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(err.as_slice()[0].symbol, "nope");
    }

    #[test]
    fn arity_mismatch_is_reported_as_undefined_with_actual_arity() {
        let mut arena = Arena::new();
        let loc = SourceRange::unknown();
        let formals = gen::param(&mut arena, "$a", loc).concat(&mut arena, gen::param(&mut arena, "$b", loc));
        let body = gen::constant(&mut arena, Value::Null, loc);
        let f = gen::function(&mut arena, "f", formals, body, loc);

        let one_actual = gen::lambda(&mut arena, gen::constant(&mut arena, Value::Number(1.0), loc), loc);
        let call = gen::call(&mut arena, "f", one_actual, loc);
        // Attempt the bind so the arity gate (not just "nobody tried") is
        // what leaves `call` unresolved.
        let program = crate::bind::bind_one(&mut arena, f, call, OpFlags::IS_CALL_PSEUDO);

        let err = block_compile(arena, program, &CompileOptions::default(), &mut NoopTracer).unwrap_err();
        assert_eq!(err.len(), 1);
        assert!(err.as_slice()[0].symbol == "f");
        assert_eq!(err.as_slice()[0].nactuals, Some(1));
        assert!(err.to_string().contains("f/1"));
    }

    #[test]
    fn identity_function_call_emits_nesting_level_zero() {
        let mut arena = Arena::new();
        let loc = SourceRange::unknown();
        let formals = gen::param(&mut arena, "f", loc);
        let body = gen::call(&mut arena, "f", Block::empty(), loc);
        let def = gen::function(&mut arena, "id", formals, body, loc);

        let actual = gen::lambda(&mut arena, gen::op_simple(&mut arena, Opcode::Dup, loc), loc);
        let call = gen::call(&mut arena, "id", actual, loc);
        // `gen::function` only self-binds `id`'s recursive calls; a sibling
        // call site still needs an explicit `bind_one` (the parser's
        // `block_bind` step after every `def`).
        let program = crate::bind::bind_one(&mut arena, def, call, OpFlags::IS_CALL_PSEUDO);

        let compiled = compile_ok(arena, program);
        let root = compiled.root();
        // One CLOSURE_CREATE for `id` at the top level: `actual` is an
        // inline argument closure, moved into the prelude and referenced
        // by the call, and `id`'s own body is a *second* subfunction
        // nested as `id`'s own closure-typed parameter isn't recursed
        // into (parameters aren't CLOSURE_CREATE), so exactly two
        // CLOSURE_CREATE nodes exist at the root: `id` and the lambda.
        assert_eq!(root.subfunctions.len(), 2);
    }

    #[test]
    fn reduce_allocates_one_slot_for_state_and_one_for_the_binder() {
        let mut arena = Arena::new();
        let loc = SourceRange::unknown();
        let source = gen::op_simple(&mut arena, Opcode::Dup, loc);
        let init = gen::constant(&mut arena, Value::Number(0.0), loc);
        let update = gen::op_simple(&mut arena, Opcode::Dup, loc);
        let reduce = gen::reduce(&mut arena, "$x", source, init, update, loc);
        let program = gen::top(&mut arena, reduce, loc);

        let compiled = compile_ok(arena, program);
        assert!(compiled.root().code.iter().any(|&w| w == Opcode::Fork as u16));
        assert!(compiled.root().debug.locals.len() >= 2);
    }
}
