//! Bytecode dispatch loop (§4.5 opcode table, §4.6 execution model).
//!
//! A call is never a recursive Rust call: `CALL` pushes a [`CallFrame`] and
//! the same `execute` loop keeps running against whichever frame is now on
//! top, and `RETURN` pops it back off. Depth is therefore bounded by the
//! value stack's `capacity`, not by the host's call stack, matching "a
//! single value stack of fixed maximum depth" (§4.6).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use matiria_core::Op;
use tracing::{debug, trace};

use crate::error::RuntimeError;
use crate::function::Package;
use crate::native::NativeRegistry;
use crate::object::{MapKey, Object};
use crate::stack::{CallFrame, ValueStack};
use crate::value::Value;

pub struct Vm<'a> {
    package: &'a Package,
    natives: &'a NativeRegistry,
    stack: ValueStack,
    frames: Vec<CallFrame>,
}

impl<'a> Vm<'a> {
    pub fn new(package: &'a Package, natives: &'a NativeRegistry, stack_capacity: usize) -> Self {
        Vm {
            package,
            natives,
            stack: ValueStack::new(stack_capacity),
            frames: Vec::new(),
        }
    }

    /// Runs the package's `main` function to completion and returns its
    /// result.
    pub fn run(&mut self) -> Result<Value, RuntimeError> {
        let entry = self.package.entry.ok_or_else(|| {
            RuntimeError::InvalidObjectOperation("package has no 'main' function".into())
        })?;
        debug!(function = %self.package.functions[entry as usize].name, "entering main");
        self.frames.push(CallFrame::new(entry, 0, 0, Vec::new()));
        self.execute()
    }

    fn execute(&mut self) -> Result<Value, RuntimeError> {
        loop {
            let (function_index, ip) = {
                let frame = self.frames.last().expect("execute called with no active frame");
                (frame.function_index, frame.ip)
            };
            let function = &self.package.functions[function_index as usize];
            let chunk = &function.chunk;
            let op = Op::from_byte(chunk.read_u8(ip)).expect("codegen only ever emits valid opcodes");
            trace!(?op, ip, function = %function.name, "dispatch");
            let mut next_ip = ip + 1;

            match op {
                Op::Int => {
                    self.stack.push(Value::Int(chunk.read_i64(next_ip)))?;
                    next_ip += 8;
                }
                Op::Float => {
                    self.stack.push(Value::Float(chunk.read_f64(next_ip)))?;
                    next_ip += 8;
                }
                Op::StringLiteral => {
                    let idx = chunk.read_u32(next_ip) as usize;
                    next_ip += 4;
                    let s: Rc<str> = Rc::from(&*chunk.strings[idx]);
                    self.stack.push(Value::Object(Rc::new(Object::String(s))))?;
                }
                Op::True => self.stack.push(Value::Bool(true))?,
                Op::False => self.stack.push(Value::Bool(false))?,
                Op::Nil => self.stack.push(Value::Nil)?,
                Op::EmptyString => {
                    self.stack.push(Value::Object(Rc::new(Object::String(Rc::from("")))))?;
                }
                Op::EmptyArray => {
                    self.stack
                        .push(Value::Object(Rc::new(Object::Array(RefCell::new(Vec::new())))))?;
                }
                Op::EmptyMap => {
                    self.stack
                        .push(Value::Object(Rc::new(Object::Map(RefCell::new(HashMap::new())))))?;
                }
                Op::ArrayLiteral => {
                    let n = chunk.read_u32(next_ip) as usize;
                    next_ip += 4;
                    let mut elements = Vec::with_capacity(n);
                    for _ in 0..n {
                        elements.push(self.stack.pop());
                    }
                    elements.reverse();
                    self.stack
                        .push(Value::Object(Rc::new(Object::Array(RefCell::new(elements)))))?;
                }
                Op::MapLiteral => {
                    let n = chunk.read_u32(next_ip) as usize;
                    next_ip += 4;
                    let mut pairs = Vec::with_capacity(n);
                    for _ in 0..n {
                        let value = self.stack.pop();
                        let key = self.stack.pop();
                        pairs.push((key, value));
                    }
                    pairs.reverse();
                    let mut map = HashMap::with_capacity(n);
                    for (key, value) in pairs {
                        map.insert(to_map_key(&key)?, value);
                    }
                    self.stack
                        .push(Value::Object(Rc::new(Object::Map(RefCell::new(map)))))?;
                }
                Op::Not => {
                    let v = self.stack.pop();
                    self.stack.push(Value::Bool(!v.is_truthy()))?;
                }
                Op::NegateI => {
                    let v = expect_int(&self.stack.pop())?;
                    self.stack.push(Value::Int(-v))?;
                }
                Op::NegateF => {
                    let v = expect_float(&self.stack.pop())?;
                    self.stack.push(Value::Float(-v))?;
                }
                Op::AddI | Op::SubI | Op::MulI | Op::DivI | Op::ModI | Op::FloorDivI => {
                    let b = expect_int(&self.stack.pop())?;
                    let a = expect_int(&self.stack.pop())?;
                    self.stack.push(Value::Int(int_arith(op, a, b)?))?;
                }
                Op::AddF | Op::SubF | Op::MulF | Op::ModF | Op::FloorDivF => {
                    let b = expect_float(&self.stack.pop())?;
                    let a = expect_float(&self.stack.pop())?;
                    self.stack.push(Value::Float(float_arith(op, a, b)))?;
                }
                Op::DivF => {
                    let b = expect_float(&self.stack.pop())?;
                    let a = expect_float(&self.stack.pop())?;
                    self.stack.push(Value::Float(a / b))?;
                }
                Op::LessI => {
                    let b = expect_int(&self.stack.pop())?;
                    let a = expect_int(&self.stack.pop())?;
                    self.stack.push(Value::Bool(a < b))?;
                }
                Op::GreaterI => {
                    let b = expect_int(&self.stack.pop())?;
                    let a = expect_int(&self.stack.pop())?;
                    self.stack.push(Value::Bool(a > b))?;
                }
                Op::EqualI => {
                    let b = expect_int(&self.stack.pop())?;
                    let a = expect_int(&self.stack.pop())?;
                    self.stack.push(Value::Bool(a == b))?;
                }
                Op::LessF => {
                    let b = expect_float(&self.stack.pop())?;
                    let a = expect_float(&self.stack.pop())?;
                    self.stack.push(Value::Bool(a < b))?;
                }
                Op::GreaterF => {
                    let b = expect_float(&self.stack.pop())?;
                    let a = expect_float(&self.stack.pop())?;
                    self.stack.push(Value::Bool(a > b))?;
                }
                Op::EqualF => {
                    let b = expect_float(&self.stack.pop())?;
                    let a = expect_float(&self.stack.pop())?;
                    self.stack.push(Value::Bool(a == b))?;
                }
                Op::Get => {
                    let idx = chunk.read_u16(next_ip) as usize;
                    next_ip += 2;
                    let base = self.frames.last().unwrap().base;
                    let v = self.stack.get(base + idx);
                    self.stack.push(v)?;
                }
                Op::Set => {
                    let idx = chunk.read_u16(next_ip) as usize;
                    next_ip += 2;
                    let base = self.frames.last().unwrap().base;
                    let v = self.stack.pop();
                    self.stack.set(base + idx, v);
                }
                Op::UpvalueGet => {
                    let idx = chunk.read_u16(next_ip) as usize;
                    next_ip += 2;
                    let v = self.frames.last().unwrap().upvalues[idx].borrow().clone();
                    self.stack.push(v)?;
                }
                Op::UpvalueSet => {
                    let idx = chunk.read_u16(next_ip) as usize;
                    next_ip += 2;
                    let v = self.stack.pop();
                    *self.frames.last().unwrap().upvalues[idx].borrow_mut() = v;
                }
                Op::GlobalGet => {
                    let idx = chunk.read_u16(next_ip) as u32;
                    next_ip += 2;
                    self.stack
                        .push(Value::Object(Rc::new(Object::Function { index: idx })))?;
                }
                Op::IndexGet => {
                    let index = self.stack.pop();
                    let object = self.stack.pop();
                    let v = self.index_get(&object, &index)?;
                    self.stack.push(v)?;
                }
                Op::IndexSet => {
                    let value = self.stack.pop();
                    let index = self.stack.pop();
                    let object = self.stack.pop();
                    self.index_set(&object, &index, value)?;
                }
                Op::StructGet => {
                    let idx = chunk.read_u16(next_ip) as usize;
                    next_ip += 2;
                    let object = self.stack.pop();
                    let v = struct_fields(&object)?.borrow()[idx].clone();
                    self.stack.push(v)?;
                }
                Op::StructSet => {
                    let idx = chunk.read_u16(next_ip) as usize;
                    next_ip += 2;
                    let value = self.stack.pop();
                    let object = self.stack.pop();
                    struct_fields(&object)?.borrow_mut()[idx] = value;
                }
                Op::Jmp => {
                    next_ip = jump_target(chunk, next_ip);
                }
                Op::JmpZ => {
                    let target = jump_target(chunk, next_ip);
                    let cond = self.stack.pop();
                    next_ip = if cond.is_truthy() { next_ip + 2 } else { target };
                }
                Op::And => {
                    let target = jump_target(chunk, next_ip);
                    if self.stack.peek(0).is_truthy() {
                        self.stack.pop();
                        next_ip += 2;
                    } else {
                        next_ip = target;
                    }
                }
                Op::Or => {
                    let target = jump_target(chunk, next_ip);
                    if self.stack.peek(0).is_truthy() {
                        next_ip = target;
                    } else {
                        self.stack.pop();
                        next_ip += 2;
                    }
                }
                Op::Pop => {
                    self.stack.pop();
                }
                Op::PopV => {
                    let n = chunk.read_u16(next_ip) as usize;
                    next_ip += 2;
                    self.stack.truncate(self.stack.len() - n);
                }
                Op::Call => {
                    let argc = chunk.read_u8(next_ip) as usize;
                    next_ip += 1;
                    self.frames.last_mut().unwrap().ip = next_ip;
                    self.call(argc)?;
                    continue;
                }
                Op::Return => {
                    let value = self.stack.pop();
                    let frame = self.frames.pop().expect("return with no active frame");
                    self.stack.truncate(frame.call_start);
                    if self.frames.is_empty() {
                        return Ok(value);
                    }
                    self.stack.push(value)?;
                    continue;
                }
                Op::IntCast => {
                    let v = self.stack.pop();
                    self.stack.push(Value::Int(to_int(&v)?))?;
                }
                Op::FloatCast => {
                    let v = self.stack.pop();
                    self.stack.push(Value::Float(to_float(&v)?))?;
                }
                Op::Closure => {
                    let function_index = chunk.read_u32(next_ip);
                    next_ip += 4;
                    let upvalue_count =
                        self.package.functions[function_index as usize].upvalue_count as usize;
                    let base = self.frames.last().unwrap().base;
                    let mut upvalues = Vec::with_capacity(upvalue_count);
                    for _ in 0..upvalue_count {
                        let index = chunk.read_u16(next_ip);
                        next_ip += 2;
                        let is_local = chunk.read_u8(next_ip) != 0;
                        next_ip += 1;
                        let cell = if is_local {
                            self.stack.cell(base + index as usize)
                        } else {
                            self.frames.last().unwrap().upvalues[index as usize].clone()
                        };
                        upvalues.push(cell);
                    }
                    self.stack.push(Value::Object(Rc::new(Object::Closure {
                        index: function_index,
                        upvalues,
                    })))?;
                }
                Op::Constructor => {
                    let n = chunk.read_u16(next_ip) as usize;
                    next_ip += 2;
                    let mut fields = Vec::with_capacity(n);
                    for _ in 0..n {
                        fields.push(self.stack.pop());
                    }
                    fields.reverse();
                    self.stack
                        .push(Value::Object(Rc::new(Object::Struct { fields: RefCell::new(fields) })))?;
                }
            }

            self.frames.last_mut().unwrap().ip = next_ip;
        }
    }

    fn call(&mut self, argc: usize) -> Result<(), RuntimeError> {
        let callee_index = self.stack.len() - argc - 1;
        let callee = self.stack.get(callee_index);
        let (function_index, upvalues) = match &callee {
            Value::Object(obj) => match &**obj {
                Object::Function { index } => (*index, Vec::new()),
                Object::Closure { index, upvalues } => (*index, upvalues.clone()),
                _ => {
                    return Err(RuntimeError::InvalidObjectOperation(format!(
                        "'{}' is not callable",
                        obj.type_name()
                    )))
                }
            },
            other => {
                return Err(RuntimeError::InvalidObjectOperation(format!(
                    "'{}' is not callable",
                    other.type_name()
                )))
            }
        };

        let function = &self.package.functions[function_index as usize];
        if function.arity as usize != argc {
            return Err(RuntimeError::ArityMismatch {
                expected: function.arity as usize,
                got: argc,
            });
        }

        if function.native {
            let name = function.name.clone();
            let native = self
                .natives
                .get(&name)
                .ok_or_else(|| RuntimeError::UnboundNative(name.to_string()))?;
            let args: Vec<Value> = (0..argc).map(|i| self.stack.get(callee_index + 1 + i)).collect();
            let result = native(&args)?;
            self.stack.truncate(callee_index);
            self.stack.push(result)?;
            return Ok(());
        }

        let base = callee_index + 1;
        self.frames
            .push(CallFrame::new(function_index, callee_index, base, upvalues));
        Ok(())
    }

    fn index_get(&self, object: &Value, index: &Value) -> Result<Value, RuntimeError> {
        match object {
            Value::Object(obj) => match &**obj {
                Object::Array(arr) => {
                    let arr = arr.borrow();
                    let i = expect_int(index)?;
                    array_index(i, arr.len()).map(|idx| arr[idx].clone())
                }
                Object::Map(map) => {
                    let key = to_map_key(index)?;
                    map.borrow().get(&key).cloned().ok_or(RuntimeError::KeyNotFound)
                }
                _ => Err(not_subscriptable(obj.type_name())),
            },
            _ => Err(not_subscriptable(object.type_name())),
        }
    }

    fn index_set(&self, object: &Value, index: &Value, value: Value) -> Result<(), RuntimeError> {
        match object {
            Value::Object(obj) => match &**obj {
                Object::Array(arr) => {
                    let mut arr = arr.borrow_mut();
                    let i = expect_int(index)?;
                    let idx = array_index(i, arr.len())?;
                    arr[idx] = value;
                    Ok(())
                }
                Object::Map(map) => {
                    let key = to_map_key(index)?;
                    map.borrow_mut().insert(key, value);
                    Ok(())
                }
                _ => Err(not_subscriptable(obj.type_name())),
            },
            _ => Err(not_subscriptable(object.type_name())),
        }
    }
}

fn jump_target(chunk: &matiria_core::Chunk, operand_start: usize) -> usize {
    let offset = chunk.read_i16(operand_start);
    (operand_start as isize + 2 + offset as isize) as usize
}

fn array_index(i: i64, len: usize) -> Result<usize, RuntimeError> {
    usize::try_from(i)
        .ok()
        .filter(|idx| *idx < len)
        .ok_or(RuntimeError::IndexOutOfBounds { index: i, len })
}

fn not_subscriptable(type_name: &str) -> RuntimeError {
    RuntimeError::InvalidObjectOperation(format!("'{}' is not subscriptable", type_name))
}

fn struct_fields(object: &Value) -> Result<&RefCell<Vec<Value>>, RuntimeError> {
    match object {
        Value::Object(obj) => match &**obj {
            Object::Struct { fields } => Ok(fields),
            _ => Err(RuntimeError::InvalidObjectOperation(format!(
                "'{}' has no fields",
                obj.type_name()
            ))),
        },
        _ => Err(RuntimeError::InvalidObjectOperation(format!(
            "'{}' has no fields",
            object.type_name()
        ))),
    }
}

fn to_map_key(value: &Value) -> Result<MapKey, RuntimeError> {
    MapKey::from_value(value).ok_or_else(|| {
        RuntimeError::InvalidObjectOperation(format!("'{}' is not a valid map key", value.type_name()))
    })
}

fn expect_int(value: &Value) -> Result<i64, RuntimeError> {
    match value {
        Value::Int(n) => Ok(*n),
        _ => Err(RuntimeError::InvalidObjectOperation(format!(
            "expected Int, found '{}'",
            value.type_name()
        ))),
    }
}

fn expect_float(value: &Value) -> Result<f64, RuntimeError> {
    match value {
        Value::Float(f) => Ok(*f),
        _ => Err(RuntimeError::InvalidObjectOperation(format!(
            "expected Float, found '{}'",
            value.type_name()
        ))),
    }
}

fn to_int(value: &Value) -> Result<i64, RuntimeError> {
    match value {
        Value::Int(n) => Ok(*n),
        Value::Float(f) => Ok(*f as i64),
        Value::Bool(b) => Ok(*b as i64),
        _ => Err(RuntimeError::InvalidObjectOperation(format!(
            "cannot cast '{}' to Int",
            value.type_name()
        ))),
    }
}

fn to_float(value: &Value) -> Result<f64, RuntimeError> {
    match value {
        Value::Int(n) => Ok(*n as f64),
        Value::Float(f) => Ok(*f),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        _ => Err(RuntimeError::InvalidObjectOperation(format!(
            "cannot cast '{}' to Float",
            value.type_name()
        ))),
    }
}

/// Floor division/modulo (round toward negative infinity), the pairing
/// `//`/`%` are defined with in the grammar's FACTOR production.
fn int_arith(op: Op, a: i64, b: i64) -> Result<i64, RuntimeError> {
    if matches!(op, Op::DivI | Op::ModI | Op::FloorDivI) && b == 0 {
        return Err(RuntimeError::DivisionByZero);
    }
    Ok(match op {
        Op::AddI => a.wrapping_add(b),
        Op::SubI => a.wrapping_sub(b),
        Op::MulI => a.wrapping_mul(b),
        Op::DivI => a / b,
        Op::ModI => {
            let r = a % b;
            if r != 0 && (r < 0) != (b < 0) {
                r + b
            } else {
                r
            }
        }
        Op::FloorDivI => {
            let q = a / b;
            let r = a % b;
            if r != 0 && (r < 0) != (b < 0) {
                q - 1
            } else {
                q
            }
        }
        _ => unreachable!(),
    })
}

fn float_arith(op: Op, a: f64, b: f64) -> f64 {
    match op {
        Op::AddF => a + b,
        Op::SubF => a - b,
        Op::MulF => a * b,
        Op::ModF => a - (a / b).floor() * b,
        Op::FloorDivF => (a / b).floor(),
        _ => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::Function;
    use matiria_core::Chunk;

    fn package_with(mut chunk: Chunk) -> Package {
        chunk.emit_op(Op::Return);
        Package {
            functions: vec![Function {
                name: Rc::from("main"),
                arity: 0,
                upvalue_count: 0,
                native: false,
                chunk,
            }],
            entry: Some(0),
        }
    }

    #[test]
    fn runs_a_literal_return() {
        let mut chunk = Chunk::new();
        chunk.emit_op(Op::Int);
        chunk.emit_i64(41);
        let pkg = package_with(chunk);
        let natives = NativeRegistry::new();
        let mut vm = Vm::new(&pkg, &natives, 256);
        assert_eq!(vm.run().unwrap(), Value::Int(41));
    }

    #[test]
    fn division_by_zero_is_a_runtime_error() {
        let mut chunk = Chunk::new();
        chunk.emit_op(Op::Int);
        chunk.emit_i64(1);
        chunk.emit_op(Op::Int);
        chunk.emit_i64(0);
        chunk.emit_op(Op::DivI);
        let pkg = package_with(chunk);
        let natives = NativeRegistry::new();
        let mut vm = Vm::new(&pkg, &natives, 256);
        assert_eq!(vm.run(), Err(RuntimeError::DivisionByZero));
    }

    #[test]
    fn floor_division_rounds_toward_negative_infinity() {
        let mut chunk = Chunk::new();
        chunk.emit_op(Op::Int);
        chunk.emit_i64(-7);
        chunk.emit_op(Op::Int);
        chunk.emit_i64(2);
        chunk.emit_op(Op::FloorDivI);
        let pkg = package_with(chunk);
        let natives = NativeRegistry::new();
        let mut vm = Vm::new(&pkg, &natives, 256);
        assert_eq!(vm.run().unwrap(), Value::Int(-4));
    }

    #[test]
    fn array_index_out_of_bounds_is_reported() {
        let mut chunk = Chunk::new();
        chunk.emit_op(Op::EmptyArray);
        chunk.emit_op(Op::Int);
        chunk.emit_i64(0);
        chunk.emit_op(Op::IndexGet);
        let pkg = package_with(chunk);
        let natives = NativeRegistry::new();
        let mut vm = Vm::new(&pkg, &natives, 256);
        assert_eq!(
            vm.run(),
            Err(RuntimeError::IndexOutOfBounds { index: 0, len: 0 })
        );
    }
}
