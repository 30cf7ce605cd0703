//! Bytecode emitter (§4.5): walks a validated [`Program`] and produces a
//! [`Package`] of [`Function`]s, one per `fn`/struct-constructor/closure.
//! The emitter never fails — every tree handed to it has already passed
//! the validator, so this phase only has a `Program -> Package` function,
//! not a `Result`.
//!
//! `Function`/`Package` themselves live in `matiria-runtime` rather than
//! here, because the dependency edge runs compiler -> runtime: the runtime
//! is what executes a `Package`, so it owns the shape it expects.
//!
//! A function's global slot index (used by `GLOBAL_GET`) and its position
//! in [`Package::functions`] must be the same number, because the
//! validator assigned that index by walking `program.statements` in its
//! final order (after struct-constructor synthesis) — [`Compiler::compile`]
//! walks it the same way to keep the two in lockstep. Nested closures are
//! appended to the table as they're discovered, after every top-level
//! slot, and referenced by the `CLOSURE` operand the moment they're
//! compiled.

use matiria_core::{Chunk, NumericRank, Op};
use matiria_runtime::{Function, Package};

use crate::ast::{BinaryOp, Expr, FnDecl, Literal, Program, Stmt, UnaryOp};
use crate::types::{Type, TypeKind};

pub struct Compiler {
    functions: Vec<Function>,
}

impl Compiler {
    pub fn compile(program: &Program) -> Package {
        let mut compiler = Compiler { functions: Vec::new() };
        compiler.reserve_top_level_slots(program);
        compiler.fill_top_level_slots(program);
        let entry = compiler
            .functions
            .iter()
            .position(|f| &*f.name == "main")
            .map(|i| i as u32);
        Package {
            functions: compiler.functions,
            entry,
        }
    }

    fn reserve_top_level_slots(&mut self, program: &Program) {
        for stmt in &program.statements {
            match stmt {
                Stmt::FnDecl(decl) => self.functions.push(Function {
                    name: decl.name.clone(),
                    arity: decl.params.len() as u16,
                    upvalue_count: 0,
                    native: false,
                    chunk: Chunk::new(),
                }),
                Stmt::NativeFnDecl(decl) => self.functions.push(Function {
                    name: decl.name.clone(),
                    arity: decl.params.len() as u16,
                    upvalue_count: 0,
                    native: true,
                    chunk: Chunk::new(),
                }),
                _ => {}
            }
        }
    }

    fn fill_top_level_slots(&mut self, program: &Program) {
        let mut slot = 0usize;
        for stmt in &program.statements {
            match stmt {
                Stmt::FnDecl(decl) => {
                    self.functions[slot].chunk = self.compile_function_body(decl);
                    slot += 1;
                }
                Stmt::NativeFnDecl(_) => {
                    slot += 1;
                }
                _ => {}
            }
        }
    }

    fn compile_function_body(&mut self, decl: &FnDecl) -> Chunk {
        let mut chunk = Chunk::new();
        if let Some(body) = &decl.body {
            self.compile_stmt(&mut chunk, body);
        }
        // Fallback for a function that falls off the end of its block
        // without an explicit `return` (a void function, or one the
        // validator didn't prove returns on every path).
        chunk.emit_op(Op::Nil);
        chunk.emit_op(Op::Return);
        chunk
    }

    fn compile_closure(&mut self, decl: &FnDecl, upvalue_count: usize) -> u32 {
        let index = self.functions.len() as u32;
        self.functions.push(Function {
            name: decl.name.clone(),
            arity: decl.params.len() as u16,
            upvalue_count: upvalue_count as u16,
            native: decl.body.is_none(),
            chunk: Chunk::new(),
        });
        let chunk = self.compile_function_body(decl);
        self.functions[index as usize].chunk = chunk;
        index
    }

    // ---- statements -------------------------------------------------------

    fn compile_stmt(&mut self, chunk: &mut Chunk, stmt: &Stmt) {
        match stmt {
            Stmt::Block { statements, var_count } => {
                for s in statements {
                    self.compile_stmt(chunk, s);
                }
                if *var_count > 0 {
                    chunk.emit_op(Op::PopV);
                    chunk.emit_u16(*var_count);
                }
            }
            Stmt::Scope(inner) => self.compile_stmt(chunk, inner),
            Stmt::If { cond, then_branch, else_branch } => {
                self.compile_expr(chunk, cond);
                let else_jump = chunk.emit_jump(Op::JmpZ);
                self.compile_stmt(chunk, then_branch);
                match else_branch {
                    Some(eb) => {
                        let end_jump = chunk.emit_jump(Op::Jmp);
                        chunk.patch_jump(else_jump);
                        self.compile_stmt(chunk, eb);
                        chunk.patch_jump(end_jump);
                    }
                    None => chunk.patch_jump(else_jump),
                }
            }
            Stmt::While { cond, body } => {
                let loop_start = chunk.len();
                self.compile_expr(chunk, cond);
                let exit_jump = chunk.emit_jump(Op::JmpZ);
                self.compile_stmt(chunk, body);
                chunk.emit_loop(Op::Jmp, loop_start);
                chunk.patch_jump(exit_jump);
            }
            Stmt::Assignment { target, value } => self.compile_assignment(chunk, target, value),
            Stmt::Return { value, .. } => {
                match value {
                    Some(expr) => self.compile_expr(chunk, expr),
                    None => chunk.emit_op(Op::Nil),
                }
                chunk.emit_op(Op::Return);
            }
            Stmt::ExprStmt(expr) => {
                self.compile_expr(chunk, expr);
                chunk.emit_op(Op::Pop);
            }
            Stmt::VarDecl { init, declared_type, .. } => match init {
                Some(expr) => self.compile_expr(chunk, expr),
                None => {
                    let ty = declared_type
                        .as_ref()
                        .expect("validator always fills declared_type");
                    self.emit_default_for_type(chunk, ty);
                }
            },
            Stmt::ClosureDecl { function, upvalues } => {
                let index = self.compile_closure(function, upvalues.len());
                chunk.emit_op(Op::Closure);
                chunk.emit_u32(index);
                for uv in upvalues {
                    chunk.emit_u16(uv.index);
                    chunk.emit_u8(uv.is_local as u8);
                }
            }
            Stmt::FnDecl(_)
            | Stmt::NativeFnDecl(_)
            | Stmt::StructDecl { .. }
            | Stmt::UnionDecl { .. }
            | Stmt::Invalid => {}
        }
    }

    /// Stack discipline for a store: push `object`/`index` (if any), then
    /// the value, then the `*_SET` op consumes all of it and leaves
    /// nothing — assignment is a statement, never an expression, here.
    fn compile_assignment(&mut self, chunk: &mut Chunk, target: &Expr, value: &Expr) {
        match target {
            Expr::Primary { symbol: Some(sym), .. } => {
                self.compile_expr(chunk, value);
                if sym.is_upvalue {
                    chunk.emit_op(Op::UpvalueSet);
                } else {
                    chunk.emit_op(Op::Set);
                }
                chunk.emit_u16(sym.index);
            }
            Expr::Access { object, member_index: Some(idx), .. } => {
                self.compile_expr(chunk, object);
                self.compile_expr(chunk, value);
                chunk.emit_op(Op::StructSet);
                chunk.emit_u16(*idx as u16);
            }
            Expr::Subscript { object, index, .. } => {
                self.compile_expr(chunk, object);
                self.compile_expr(chunk, index);
                self.compile_expr(chunk, value);
                chunk.emit_op(Op::IndexSet);
            }
            _ => {
                // An unresolved/invalid target already carries a validator
                // diagnostic; emit the value and drop it so the chunk stays
                // well-formed instead of aborting codegen.
                self.compile_expr(chunk, value);
                chunk.emit_op(Op::Pop);
            }
        }
    }

    // ---- expressions ------------------------------------------------------

    fn compile_expr(&mut self, chunk: &mut Chunk, expr: &Expr) {
        match expr {
            Expr::Literal { value, .. } => self.compile_literal(chunk, value),
            Expr::Primary { symbol: Some(sym), .. } => {
                if sym.is_global {
                    chunk.emit_op(Op::GlobalGet);
                } else if sym.is_upvalue {
                    chunk.emit_op(Op::UpvalueGet);
                } else {
                    chunk.emit_op(Op::Get);
                }
                chunk.emit_u16(sym.index);
            }
            Expr::Primary { symbol: None, .. } => chunk.emit_op(Op::Nil),
            Expr::Unary { op, op_ty, child, .. } => {
                self.compile_expr(chunk, child);
                match op {
                    UnaryOp::Not => chunk.emit_op(Op::Not),
                    UnaryOp::Neg => {
                        chunk.emit_op(if is_float_ty(op_ty.as_ref()) { Op::NegateF } else { Op::NegateI });
                    }
                }
            }
            Expr::Binary { op: BinaryOp::And, left, right, .. } => {
                self.compile_expr(chunk, left);
                let end = chunk.emit_jump(Op::And);
                self.compile_expr(chunk, right);
                chunk.patch_jump(end);
            }
            Expr::Binary { op: BinaryOp::Or, left, right, .. } => {
                self.compile_expr(chunk, left);
                let end = chunk.emit_jump(Op::Or);
                self.compile_expr(chunk, right);
                chunk.patch_jump(end);
            }
            Expr::Binary { op, op_ty, left, right, .. } => {
                self.compile_expr(chunk, left);
                self.compile_expr(chunk, right);
                emit_binary_op(chunk, *op, op_ty.as_ref());
            }
            Expr::Grouping { child } => self.compile_expr(chunk, child),
            Expr::Call { callable, args, .. } => {
                self.compile_expr(chunk, callable);
                for a in args {
                    self.compile_expr(chunk, a);
                }
                chunk.emit_op(Op::Call);
                chunk.emit_u8(args.len() as u8);
            }
            Expr::Subscript { object, index, .. } => {
                self.compile_expr(chunk, object);
                self.compile_expr(chunk, index);
                chunk.emit_op(Op::IndexGet);
            }
            Expr::Access { object, member_index: Some(idx), .. } => {
                self.compile_expr(chunk, object);
                chunk.emit_op(Op::StructGet);
                chunk.emit_u16(*idx as u16);
            }
            Expr::Access { member_index: None, .. } => chunk.emit_op(Op::Nil),
            Expr::ArrayLiteral { elements, .. } => {
                for e in elements {
                    self.compile_expr(chunk, e);
                }
                chunk.emit_op(Op::ArrayLiteral);
                chunk.emit_u32(elements.len() as u32);
            }
            Expr::MapLiteral { entries, .. } => {
                for (k, v) in entries {
                    self.compile_expr(chunk, k);
                    self.compile_expr(chunk, v);
                }
                chunk.emit_op(Op::MapLiteral);
                chunk.emit_u32(entries.len() as u32);
            }
            Expr::Cast { to, child } => {
                self.compile_expr(chunk, child);
                chunk.emit_op(if is_float_ty(Some(to)) { Op::FloatCast } else { Op::IntCast });
            }
            Expr::StructConstruct { member_types, .. } => {
                for mt in member_types {
                    self.emit_default_for_type(chunk, mt);
                }
                chunk.emit_op(Op::Constructor);
                chunk.emit_u16(member_types.len() as u16);
            }
            Expr::Invalid => chunk.emit_op(Op::Nil),
        }
    }

    fn compile_literal(&self, chunk: &mut Chunk, value: &Literal) {
        match value {
            Literal::Int(n) => {
                chunk.emit_op(Op::Int);
                chunk.emit_i64(*n);
            }
            Literal::Float(f) => {
                chunk.emit_op(Op::Float);
                chunk.emit_f64(*f);
            }
            Literal::Bool(true) => chunk.emit_op(Op::True),
            Literal::Bool(false) => chunk.emit_op(Op::False),
            Literal::Str(s) => {
                chunk.emit_op(Op::StringLiteral);
                let idx = chunk.add_string(s);
                chunk.emit_u32(idx);
            }
        }
    }

    /// Shared by a `VarDecl` with no initialiser and `StructConstruct`'s
    /// per-member pushes (§4.5 "struct constructor body").
    fn emit_default_for_type(&mut self, chunk: &mut Chunk, ty: &Type) {
        let resolved = ty.resolved();
        match resolved.kind() {
            TypeKind::Bool => chunk.emit_op(Op::False),
            TypeKind::Int => {
                chunk.emit_op(Op::Int);
                chunk.emit_i64(0);
            }
            TypeKind::Float => {
                chunk.emit_op(Op::Float);
                chunk.emit_f64(0.0);
            }
            TypeKind::String => chunk.emit_op(Op::EmptyString),
            TypeKind::Array(_) => chunk.emit_op(Op::EmptyArray),
            TypeKind::Map(_, _) => chunk.emit_op(Op::EmptyMap),
            TypeKind::Struct(shape) => {
                let member_types: Vec<Type> = shape.members.iter().map(|(_, t)| t.clone()).collect();
                for mt in &member_types {
                    self.emit_default_for_type(chunk, mt);
                }
                chunk.emit_op(Op::Constructor);
                chunk.emit_u16(member_types.len() as u16);
            }
            TypeKind::Void | TypeKind::Any | TypeKind::Invalid | TypeKind::Function { .. } | TypeKind::Union(_) | TypeKind::User { .. } => {
                chunk.emit_op(Op::Nil);
            }
        }
    }
}

fn is_float_ty(ty: Option<&Type>) -> bool {
    matches!(ty.and_then(|t| t.numeric_rank()), Some(NumericRank::Float))
}

fn emit_binary_op(chunk: &mut Chunk, op: BinaryOp, op_ty: Option<&Type>) {
    let float = is_float_ty(op_ty);
    let pick = |int_op: Op, float_op: Op| if float { float_op } else { int_op };
    match op {
        BinaryOp::Add => chunk.emit_op(pick(Op::AddI, Op::AddF)),
        BinaryOp::Sub => chunk.emit_op(pick(Op::SubI, Op::SubF)),
        BinaryOp::Mul => chunk.emit_op(pick(Op::MulI, Op::MulF)),
        BinaryOp::Div => chunk.emit_op(pick(Op::DivI, Op::DivF)),
        BinaryOp::Mod => chunk.emit_op(pick(Op::ModI, Op::ModF)),
        BinaryOp::FloorDiv => chunk.emit_op(pick(Op::FloorDivI, Op::FloorDivF)),
        BinaryOp::Less => chunk.emit_op(pick(Op::LessI, Op::LessF)),
        BinaryOp::Greater => chunk.emit_op(pick(Op::GreaterI, Op::GreaterF)),
        BinaryOp::Eq => chunk.emit_op(pick(Op::EqualI, Op::EqualF)),
        BinaryOp::NotEq => {
            chunk.emit_op(pick(Op::EqualI, Op::EqualF));
            chunk.emit_op(Op::Not);
        }
        // No dedicated <=/>= opcodes: `a <= b` is `!(a > b)`, `a >= b` is `!(a < b)`.
        BinaryOp::LessEq => {
            chunk.emit_op(pick(Op::GreaterI, Op::GreaterF));
            chunk.emit_op(Op::Not);
        }
        BinaryOp::GreaterEq => {
            chunk.emit_op(pick(Op::LessI, Op::LessF));
            chunk.emit_op(Op::Not);
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("short-circuit ops are handled before reaching here"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::types::TypeRegistry;
    use crate::validator::Validator;

    fn compile_source(src: &str) -> Package {
        let types = TypeRegistry::new();
        let (mut program, parse_diags) = Parser::new(src, &types).parse();
        assert!(parse_diags.is_empty(), "{:?}", parse_diags);
        let (ok, diags) = Validator::new(&types).validate(&mut program);
        assert!(ok, "{:?}", diags);
        Compiler::compile(&program)
    }

    #[test]
    fn main_function_is_found_as_entry() {
        let pkg = compile_source("fn main() -> Int { return 42; }");
        assert_eq!(pkg.entry, Some(0));
        assert_eq!(pkg.functions[0].chunk.code[0], Op::Int as u8);
    }

    #[test]
    fn compilation_is_deterministic() {
        let src = "fn add(Int a, Int b) -> Int = a + b; fn main() -> Int { return add(1, 2); }";
        let a = compile_source(src);
        let b = compile_source(src);
        assert_eq!(a.functions[0].chunk.code, b.functions[0].chunk.code);
        assert_eq!(a.functions[1].chunk.code, b.functions[1].chunk.code);
    }

    #[test]
    fn numeric_promotion_picks_the_float_opcode() {
        let pkg = compile_source("fn main() -> Float { return 1 + 2.5; }");
        let code = &pkg.functions[0].chunk.code;
        assert!(code.contains(&(Op::AddF as u8)));
        assert!(!code.contains(&(Op::AddI as u8)));
    }

    #[test]
    fn closures_get_their_own_function_table_slot() {
        let pkg = compile_source(
            "fn makeAdder(Int x) -> (Int) -> Int { fn add(Int y) -> Int = x + y; return add; }",
        );
        // slot 0: makeAdder (global), slot 1: nested `add` (discovered during compilation)
        assert_eq!(pkg.functions.len(), 2);
        assert_eq!(&*pkg.functions[1].name, "add");
        assert_eq!(pkg.functions[1].upvalue_count, 1);
        assert!(pkg.functions[0].chunk.code.contains(&(Op::Closure as u8)));
    }

    #[test]
    fn if_without_else_patches_a_single_jump_past_the_block() {
        let pkg = compile_source("fn main() -> Int { if true: return 1; return 0; }");
        let code = &pkg.functions[0].chunk.code;
        assert!(code.contains(&(Op::JmpZ as u8)));
    }
}
