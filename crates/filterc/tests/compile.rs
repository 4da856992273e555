//! End-to-end scenarios for the IR-build-bind-lower pipeline, one per the
//! six scenarios the core is expected to handle correctly.
//!
//! Each test builds a program with `gen::*`, runs it through `bind::*` where
//! a scenario needs name resolution, then calls `block_compile` and asserts
//! on the emitted bytecode shape.

use std::rc::Rc;

use filterc::{
    Arena, Block, CFuncDescriptor, CFuncImpl, CompileOptions, NEWCLOSURE_BIT, NoopTracer, OpFlags, Opcode, SourceRange, Value, bind,
    block_compile, gen,
};

// ============================================================================
// 1. Constant program
// ============================================================================

#[test]
fn constant_program_compiles_to_loadk_then_ret() {
    let mut arena = Arena::new();
    let loc = SourceRange::unknown();
    let body = gen::constant(&mut arena, Value::Number(42.0), loc.clone());
    let top = gen::top(&mut arena, body, loc);

    let program = block_compile(arena, top, &CompileOptions::default(), &mut NoopTracer).expect("compile should succeed");
    let root = program.root();

    assert_eq!(root.code[1], Opcode::LoadK as u16);
    assert_eq!(root.code[2], 0, "first constant pool slot");
    assert_eq!(root.constants.len(), 1);
    assert_eq!(*root.code.last().unwrap(), Opcode::Ret as u16);
    assert!(root.nlocals >= 2);
}

// ============================================================================
// 2. Identity function with call
// ============================================================================

#[test]
fn identity_function_call_threads_one_argument_closure() {
    let mut arena = Arena::new();
    let loc = SourceRange::unknown();

    let formal = gen::param(&mut arena, "f", loc.clone());
    let body = gen::call(&mut arena, "f", Block::empty(), loc.clone());
    let id_def = gen::function(&mut arena, "id", formal, body, loc.clone());

    let dot = gen::op_simple(&mut arena, Opcode::Dup, loc.clone());
    let actual = gen::lambda(&mut arena, dot, loc.clone());
    let call = gen::call(&mut arena, "id", actual, loc.clone());
    // `gen::function` only self-binds recursive calls inside its own body;
    // a sibling call site still needs the parser's usual post-`def` bind.
    let program = bind::bind_one(&mut arena, id_def, call, OpFlags::IS_CALL_PSEUDO);

    let compiled = block_compile(arena, program, &CompileOptions::default(), &mut NoopTracer).expect("compile should succeed");
    let root = compiled.root();

    // Two CLOSURE_CREATE nodes survive at the root: `id` itself, and the
    // lambda-wrapped actual argument moved into the call's prelude.
    assert_eq!(root.subfunctions.len(), 2);

    let call_pos = root.code.iter().position(|&w| w == Opcode::CallJq as u16).expect("CALL_JQ must be emitted");
    assert_eq!(root.code[call_pos + 1], 1, "one actual argument");
    // code[call_pos+2] = nesting level, code[call_pos+3] = binder slot|tag,
    // code[call_pos+4] = the one argument's nesting level, code[call_pos+5]
    // = its slot|NEWCLOSURE_BIT (it's a CLOSURE_CREATE, not a CLOSURE_PARAM).
    assert_eq!(root.code[call_pos + 5] & NEWCLOSURE_BIT, NEWCLOSURE_BIT);
}

// ============================================================================
// 3. Arity mismatch
// ============================================================================

#[test]
fn arity_mismatch_reports_undefined_with_actual_arity() {
    let mut arena = Arena::new();
    let loc = SourceRange::unknown();

    let formals = gen::param(&mut arena, "$a", loc.clone()).concat(&mut arena, gen::param(&mut arena, "$b", loc.clone()));
    let body = gen::constant(&mut arena, Value::Null, loc.clone());
    let def = gen::function(&mut arena, "f", formals, body, loc.clone());

    let one_actual = gen::lambda(&mut arena, gen::constant(&mut arena, Value::Number(1.0), loc.clone()), loc.clone());
    let call = gen::call(&mut arena, "f", one_actual, loc.clone());
    // Bind so the arity gate, not just "nobody tried", leaves `call` unresolved.
    let program = bind::bind_one(&mut arena, def, call, OpFlags::IS_CALL_PSEUDO);

    let err = block_compile(arena, program, &CompileOptions::default(), &mut NoopTracer).expect_err("f/1 should not resolve against def f(a;b)");

    assert_eq!(err.len(), 1);
    assert!(err.to_string().contains("f/1"));
}

// ============================================================================
// 4. Reduce
// ============================================================================

#[test]
fn reduce_allocates_state_and_binder_slots_and_forks_the_loop() {
    let mut arena = Arena::new();
    let loc = SourceRange::unknown();

    let source = gen::op_simple(&mut arena, Opcode::Dup, loc.clone());
    let init = gen::constant(&mut arena, Value::Number(0.0), loc.clone());
    let update = gen::op_simple(&mut arena, Opcode::Dup, loc.clone());
    let reduce = gen::reduce(&mut arena, "$x", source, init, update, loc.clone());
    let program = gen::top(&mut arena, reduce, loc);

    let compiled = block_compile(arena, program, &CompileOptions::default(), &mut NoopTracer).expect("compile should succeed");
    let root = compiled.root();

    assert!(root.code.contains(&(Opcode::Fork as u16)));
    // `$reduce` (fresh) + `$x` (the bound name): two local slots.
    assert!(root.debug.locals.len() >= 2);
    assert!(root.debug.locals.iter().any(|n| &**n == "$x"));
}

// ============================================================================
// 5. Try/catch with break
// ============================================================================

#[test]
fn foreach_wraps_the_loop_in_a_try_whose_handler_checks_for_break() {
    let mut arena = Arena::new();
    let loc = SourceRange::unknown();

    let source = gen::op_simple(&mut arena, Opcode::Dup, loc.clone());
    let init = gen::constant(&mut arena, Value::Number(0.0), loc.clone());
    let update = gen::op_simple(&mut arena, Opcode::Dup, loc.clone());
    let extract = gen::op_simple(&mut arena, Opcode::Dup, loc.clone());
    let body = gen::foreach(&mut arena, "$x", source, init, update, extract, loc.clone());

    // foreach's handler calls the unbound builtins `_equal` and `break`;
    // bind them to fresh host descriptors so the program compiles cleanly
    // and we can inspect the resulting FORK_OPT/handler shape.
    let equal = Rc::new(CFuncDescriptor::new("_equal", 3, CFuncImpl(0)));
    let brk = Rc::new(CFuncDescriptor::new("break", 1, CFuncImpl(1)));
    let body = gen::cbinding(&mut arena, equal, body, loc.clone());
    let body = gen::cbinding(&mut arena, brk, body, loc.clone());
    let program = gen::top(&mut arena, body, loc);

    let compiled = block_compile(arena, program, &CompileOptions::default(), &mut NoopTracer).expect("compile should succeed");
    let root = compiled.root();

    assert!(root.code.contains(&(Opcode::ForkOpt as u16)), "try wraps the loop in a FORK_OPT");
    assert!(root.constants.iter().any(|c| c.is_string_eq("break")), "handler's literal \"break\" lands in the constant pool");
}

// ============================================================================
// 6. Dead-binder elimination
// ============================================================================

#[test]
fn bind_referenced_keeps_only_the_transitively_used_definition() {
    let mut arena = Arena::new();
    let loc = SourceRange::unknown();

    let f_body = gen::constant(&mut arena, Value::Number(1.0), loc.clone());
    let f = gen::function(&mut arena, "f", Block::empty(), f_body, loc.clone());
    let g_body = gen::constant(&mut arena, Value::Number(2.0), loc.clone());
    let g = gen::function(&mut arena, "g", Block::empty(), g_body, loc.clone());
    let binders = f.concat(&mut arena, g);

    let call_g = gen::call(&mut arena, "g", Block::empty(), loc.clone());
    let retained = bind::bind_referenced(&mut arena, binders, call_g, OpFlags::IS_CALL_PSEUDO);

    let program = gen::top(&mut arena, retained, loc);
    let compiled = block_compile(arena, program, &CompileOptions::default(), &mut NoopTracer).expect("g should resolve, f should simply be gone");
    assert_eq!(compiled.root().subfunctions.len(), 1, "only g's CLOSURE_CREATE should survive");
}

// ============================================================================
// Boundaries
// ============================================================================

#[test]
fn empty_body_compiles_to_just_ret() {
    let arena = Arena::new();
    let compiled = block_compile(arena, Block::empty(), &CompileOptions::default(), &mut NoopTracer).expect("compile should succeed");
    assert_eq!(compiled.root().code, vec![Opcode::Ret as u16]);
}

#[test]
fn take_imports_on_a_top_and_deps_only_body_leaves_an_empty_program() {
    let mut arena = Arena::new();
    let loc = SourceRange::unknown();
    let dep = gen::import(&mut arena, "mymod", Value::empty_object(), loc.clone());
    let mut program = gen::top(&mut arena, dep, loc);

    let imports = bind::take_imports(&mut arena, &mut program);
    assert_eq!(imports.len(), 1);
    assert_eq!(&*imports[0].name, "mymod");
    // Only the TOP marker remains.
    assert_eq!(program.len(&arena), 1);
}

#[test]
fn deeply_nested_functions_produce_correct_nesting_levels_for_an_outer_variable() {
    let mut arena = Arena::new();
    let loc = SourceRange::unknown();

    // Four levels of nested `def`, the innermost referencing a variable
    // bound outside all of them: `$v as $v | def a: def b: def c: def d: $v; d; c; b; a`.
    let innermost_ref = gen::op_unbound(&mut arena, Opcode::LoadV, "$v", loc.clone());
    let d = gen::function(&mut arena, "d", Block::empty(), innermost_ref, loc.clone());
    let call_d = gen::call(&mut arena, "d", Block::empty(), loc.clone());
    let c_body = bind::bind_one(&mut arena, d, call_d, OpFlags::IS_CALL_PSEUDO);
    let c = gen::function(&mut arena, "c", Block::empty(), c_body, loc.clone());
    let call_c = gen::call(&mut arena, "c", Block::empty(), loc.clone());
    let b_body = bind::bind_one(&mut arena, c, call_c, OpFlags::IS_CALL_PSEUDO);
    let b = gen::function(&mut arena, "b", Block::empty(), b_body, loc.clone());
    let call_b = gen::call(&mut arena, "b", Block::empty(), loc.clone());
    let a_body = bind::bind_one(&mut arena, b, call_b, OpFlags::IS_CALL_PSEUDO);
    let a = gen::function(&mut arena, "a", Block::empty(), a_body, loc.clone());
    let call_a = gen::call(&mut arena, "a", Block::empty(), loc.clone());

    let source = gen::constant(&mut arena, Value::Number(7.0), loc.clone());
    let top_body = bind::bind_one(&mut arena, a, call_a, OpFlags::IS_CALL_PSEUDO);
    let bound_body = gen::var_binding(&mut arena, "$v", source, top_body, loc.clone());
    let program = gen::top(&mut arena, bound_body, loc);

    let compiled = block_compile(arena, program, &CompileOptions::default(), &mut NoopTracer).expect("deep nesting should still resolve $v");
    // `$v`'s LOADV is emitted four subfunctions deep; its nesting level
    // must walk all four `parent` links back to the root where `$v` is bound.
    let mut innermost_bc = compiled.root();
    while let Some(&only_child) = innermost_bc.subfunctions.first() {
        let child = compiled.arena.get(only_child);
        if child.subfunctions.is_empty() {
            innermost_bc = child;
            break;
        }
        innermost_bc = child;
    }
    assert!(innermost_bc.code.contains(&(Opcode::LoadV as u16)));
}
