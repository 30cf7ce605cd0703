//! Hand-assembled bytecode integration tests for the dispatch loop, since
//! this crate has no parser/compiler of its own to lean on (that lives
//! one crate up, in `matiria-compiler`).

use std::rc::Rc;

use matiria_core::{Chunk, Op};
use matiria_runtime::{Function, NativeRegistry, Package, RuntimeError, Value, Vm};

fn package_of(functions: Vec<Function>) -> Package {
    let entry = functions.iter().position(|f| &*f.name == "main").map(|i| i as u32);
    Package { functions, entry }
}

fn main_fn(chunk: Chunk) -> Function {
    Function { name: Rc::from("main"), arity: 0, upvalue_count: 0, native: false, chunk }
}

#[test]
fn calling_a_second_function_returns_to_the_caller() {
    let mut callee = Chunk::new();
    callee.emit_op(Op::Get);
    callee.emit_u16(0);
    callee.emit_op(Op::Int);
    callee.emit_i64(1);
    callee.emit_op(Op::AddI);
    callee.emit_op(Op::Return);

    let mut main = Chunk::new();
    main.emit_op(Op::GlobalGet);
    main.emit_u16(1);
    main.emit_op(Op::Int);
    main.emit_i64(41);
    main.emit_op(Op::Call);
    main.emit_u8(1);
    main.emit_op(Op::Return);

    let functions = vec![
        main_fn(main),
        Function { name: Rc::from("increment"), arity: 1, upvalue_count: 0, native: false, chunk: callee },
    ];
    let pkg = package_of(functions);
    let natives = NativeRegistry::new();
    let mut vm = Vm::new(&pkg, &natives, 256);
    assert_eq!(vm.run().unwrap(), Value::Int(42));
}

#[test]
fn array_and_map_literals_round_trip_through_index_ops() {
    let mut main = Chunk::new();
    main.emit_op(Op::Int);
    main.emit_i64(10);
    main.emit_op(Op::Int);
    main.emit_i64(20);
    main.emit_op(Op::ArrayLiteral);
    main.emit_u32(2);
    main.emit_op(Op::Int);
    main.emit_i64(1);
    main.emit_op(Op::IndexGet);
    main.emit_op(Op::Return);

    let pkg = package_of(vec![main_fn(main)]);
    let natives = NativeRegistry::new();
    let mut vm = Vm::new(&pkg, &natives, 256);
    assert_eq!(vm.run().unwrap(), Value::Int(20));
}

#[test]
fn struct_get_after_constructor_reads_the_right_field() {
    let mut main = Chunk::new();
    main.emit_op(Op::Int);
    main.emit_i64(2);
    main.emit_op(Op::Int);
    main.emit_i64(40);
    main.emit_op(Op::Constructor);
    main.emit_u16(2);
    main.emit_op(Op::StructGet);
    main.emit_u16(1);
    main.emit_op(Op::Return);

    let pkg = package_of(vec![main_fn(main)]);
    let natives = NativeRegistry::new();
    let mut vm = Vm::new(&pkg, &natives, 256);
    assert_eq!(vm.run().unwrap(), Value::Int(40));
}

#[test]
fn calling_a_native_function_dispatches_by_name() {
    fn double(args: &[Value]) -> Result<Value, RuntimeError> {
        match args[0] {
            Value::Int(n) => Ok(Value::Int(n * 2)),
            _ => unreachable!(),
        }
    }

    let mut main = Chunk::new();
    main.emit_op(Op::GlobalGet);
    main.emit_u16(1);
    main.emit_op(Op::Int);
    main.emit_i64(21);
    main.emit_op(Op::Call);
    main.emit_u8(1);
    main.emit_op(Op::Return);

    let functions = vec![
        main_fn(main),
        Function { name: Rc::from("double"), arity: 1, upvalue_count: 0, native: true, chunk: Chunk::new() },
    ];
    let pkg = package_of(functions);
    let mut natives = NativeRegistry::new();
    natives.register("double", double);
    let mut vm = Vm::new(&pkg, &natives, 256);
    assert_eq!(vm.run().unwrap(), Value::Int(42));
}

#[test]
fn calling_with_the_wrong_arity_is_a_runtime_error() {
    let mut callee = Chunk::new();
    callee.emit_op(Op::Nil);
    callee.emit_op(Op::Return);

    let mut main = Chunk::new();
    main.emit_op(Op::GlobalGet);
    main.emit_u16(1);
    main.emit_op(Op::Call);
    main.emit_u8(0);
    main.emit_op(Op::Return);

    let functions = vec![
        main_fn(main),
        Function { name: Rc::from("needs_one"), arity: 1, upvalue_count: 0, native: false, chunk: callee },
    ];
    let pkg = package_of(functions);
    let natives = NativeRegistry::new();
    let mut vm = Vm::new(&pkg, &natives, 256);
    assert_eq!(
        vm.run(),
        Err(RuntimeError::ArityMismatch { expected: 1, got: 0 })
    );
}

#[test]
fn stack_overflow_is_reported_rather_than_crashing() {
    let mut main = Chunk::new();
    main.emit_op(Op::Nil);
    let loop_start = main.len();
    main.emit_op(Op::Nil);
    main.emit_loop(Op::Jmp, loop_start);

    let pkg = package_of(vec![main_fn(main)]);
    let natives = NativeRegistry::new();
    let mut vm = Vm::new(&pkg, &natives, 8);
    assert_eq!(vm.run(), Err(RuntimeError::StackOverflow));
}
