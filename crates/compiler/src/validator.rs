//! Name resolution, type checking, and closure upvalue capture.
//!
//! Two passes over the program (§4.4): [`Validator::load_globals`] binds
//! every top-level `fn`/`type` name (and, for a struct, synthesises its
//! default constructor and appends it to the program so it gets a slot
//! like any other global), then [`Validator::analyse_globals`] walks each
//! function body mutating the tree in place — filling `Option<Type>` and
//! `Option<Symbol>` fields, inserting numeric-promotion `Cast` nodes,
//! rewriting a bare undeclared assignment into an implicit `VarDecl`.
//!
//! A node that fails to type-check keeps a best-effort type (usually
//! `invalid`) rather than being pruned outright — the diagnostic is still
//! recorded, and [`Validator::validate`]'s caller never hands an
//! error-bearing program to the compiler, so the distinction is not
//! observable downstream.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use matiria_core::{NumericRank, Span};

use crate::ast::{BinaryOp, Expr, FnDecl, Program, Stmt, Symbol, UnaryOp, UpvalueDesc};
use crate::diagnostics::{Diagnostic, DiagnosticBag};
use crate::types::{StructShape, Type, TypeKind, TypeRegistry};

struct FunctionCtx {
    scopes: Vec<HashMap<Rc<str>, Symbol>>,
    next_local: u16,
    return_type: Type,
    upvalues: Vec<UpvalueDesc>,
    upvalue_cache: HashMap<Rc<str>, Symbol>,
}

impl FunctionCtx {
    fn new(return_type: Type) -> Self {
        FunctionCtx {
            scopes: vec![HashMap::new()],
            next_local: 0,
            return_type,
            upvalues: Vec::new(),
            upvalue_cache: HashMap::new(),
        }
    }

    fn declare_param(&mut self, p: &Symbol) {
        self.scopes[0].insert(p.name.clone(), p.clone());
        self.next_local = self.next_local.max(p.index + 1);
    }

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn lookup_local(&self, name: &str) -> Option<Symbol> {
        self.scopes.iter().rev().find_map(|s| s.get(name).cloned())
    }

    fn declare_local(&mut self, name: Rc<str>, ty: Type, assignable: bool) -> Symbol {
        let index = self.next_local;
        self.next_local += 1;
        let symbol = Symbol {
            name: name.clone(),
            ty,
            index,
            is_global: false,
            is_upvalue: false,
            assignable,
        };
        self.scopes
            .last_mut()
            .expect("function context always has a scope")
            .insert(name, symbol.clone());
        symbol
    }

    /// Registers (or reuses) an upvalue slot capturing `origin_index` from
    /// the immediately enclosing function (`is_local`) or chaining through
    /// one of that function's own upvalues (`!is_local`).
    fn add_or_get_upvalue(
        &mut self,
        name: &str,
        ty: Type,
        is_local: bool,
        origin_index: u16,
        assignable: bool,
    ) -> Symbol {
        if let Some(existing) = self.upvalue_cache.get(name) {
            return existing.clone();
        }
        let index = self.upvalues.len() as u16;
        self.upvalues.push(UpvalueDesc {
            index: origin_index,
            is_local,
        });
        let symbol = Symbol {
            name: Rc::from(name),
            ty,
            index,
            is_global: false,
            is_upvalue: true,
            assignable,
        };
        self.upvalue_cache.insert(Rc::from(name), symbol.clone());
        symbol
    }
}

pub struct Validator<'a> {
    types: &'a TypeRegistry,
    diagnostics: DiagnosticBag,
    globals: HashMap<Rc<str>, (Symbol, Span, bool)>,
    next_global_index: u16,
    functions: Vec<FunctionCtx>,
}

impl<'a> Validator<'a> {
    pub fn new(types: &'a TypeRegistry) -> Self {
        Validator {
            types,
            diagnostics: DiagnosticBag::default(),
            globals: HashMap::new(),
            next_global_index: 0,
            functions: Vec::new(),
        }
    }

    pub fn validate(mut self, program: &mut Program) -> (bool, Vec<Diagnostic>) {
        self.load_globals(program);
        self.analyse_globals(program);
        let ok = !self.diagnostics.had_error();
        (ok, self.diagnostics.into_vec())
    }

    // ---- pass 1 ---------------------------------------------------------

    /// Global slot indices are assigned by *final* statement order (after
    /// synthesised struct constructors are appended), because the compiler
    /// later builds its flat function table by walking `program.statements`
    /// in that same final order — `GLOBAL_GET`'s operand and a function's
    /// table position must agree. A single pass done before synthesis (or
    /// that assigns slots at a struct's pre-synthesis position) would let
    /// the two drift apart whenever a struct decl is followed by more
    /// top-level `fn`s.
    fn load_globals(&mut self, program: &mut Program) {
        let original_len = program.statements.len();
        let mut synthesised = Vec::new();
        for stmt in program.statements.iter().take(original_len) {
            if let Stmt::StructDecl { name, ty, span } = stmt {
                let Some(shape) = ty.as_struct() else { continue };
                self.check_duplicate_members(&shape, *span);
                synthesised.push(self.build_struct_ctor(name.clone(), ty.clone(), &shape, *span));
            }
        }
        program.statements.extend(synthesised);

        for stmt in program.statements.iter() {
            let (decl, is_native) = match stmt {
                Stmt::FnDecl(decl) => (decl, false),
                Stmt::NativeFnDecl(decl) => (decl, true),
                _ => continue,
            };
            let fn_ty = self.types.function(
                decl.params.iter().map(|p| p.ty.clone()).collect(),
                decl.ret.clone(),
            );
            self.declare_global(decl.name.clone(), fn_ty, decl.span, is_native);
        }
    }

    fn build_struct_ctor(&self, name: Rc<str>, ty: Type, shape: &StructShape, span: Span) -> Stmt {
        let member_types = shape.members.iter().map(|(_, t)| t.clone()).collect();
        let body = Stmt::Block {
            statements: vec![Stmt::Return {
                value: Some(Expr::StructConstruct {
                    ty: ty.clone(),
                    member_types,
                }),
                span,
            }],
            var_count: 0,
        };
        Stmt::FnDecl(FnDecl {
            name,
            params: Vec::new(),
            ret: ty,
            body: Some(Box::new(body)),
            span,
        })
    }

    fn check_duplicate_members(&mut self, shape: &StructShape, span: Span) {
        let mut seen = HashSet::new();
        for (name, _) in &shape.members {
            if !seen.insert(name.clone()) {
                self.diagnostics.push_error(
                    format!("duplicate member '{}' in struct '{}'", name, shape.name),
                    span,
                );
            }
        }
    }

    fn declare_global(&mut self, name: Rc<str>, ty: Type, span: Span, is_native: bool) -> bool {
        if let Some((_, prev_span, prev_native)) = self.globals.get(&name) {
            if is_native || *prev_native {
                self.diagnostics.push_error(
                    format!(
                        "native function '{}' is already declared and cannot be overloaded (previously declared at {})",
                        name, prev_span
                    ),
                    span,
                );
            } else {
                self.diagnostics.push_error(
                    format!("redeclaration of '{}' (previously declared at {})", name, prev_span),
                    span,
                );
            }
            return false;
        }
        let index = self.next_global_index;
        self.next_global_index += 1;
        let symbol = Symbol {
            name: name.clone(),
            ty,
            index,
            is_global: true,
            is_upvalue: false,
            assignable: false,
        };
        self.globals.insert(name, (symbol, span, is_native));
        true
    }

    // ---- pass 2 ---------------------------------------------------------

    fn analyse_globals(&mut self, program: &mut Program) {
        for stmt in program.statements.iter_mut() {
            if let Stmt::FnDecl(decl) = stmt {
                self.analyse_top_level_fn(decl);
            }
        }
    }

    fn analyse_top_level_fn(&mut self, decl: &mut FnDecl) {
        let mut ctx = FunctionCtx::new(decl.ret.clone());
        for p in &decl.params {
            ctx.declare_param(p);
        }
        self.functions.push(ctx);
        if let Some(body) = &mut decl.body {
            self.analyse_stmt(body);
        }
        self.functions.pop();
    }

    fn analyse_closure(&mut self, function: &mut FnDecl, upvalues_out: &mut Vec<UpvalueDesc>) {
        let mut ctx = FunctionCtx::new(function.ret.clone());
        for p in &function.params {
            ctx.declare_param(p);
        }
        self.functions.push(ctx);
        if let Some(body) = &mut function.body {
            self.analyse_stmt(body);
        }
        let ctx = self.functions.pop().expect("pushed above");
        *upvalues_out = ctx.upvalues;
    }

    fn current_fn_mut(&mut self) -> &mut FunctionCtx {
        self.functions.last_mut().expect("statement analysed outside a function")
    }

    fn current_fn(&self) -> &FunctionCtx {
        self.functions.last().expect("statement analysed outside a function")
    }

    fn resolve_name(&mut self, name: &str) -> Option<Symbol> {
        if self.functions.is_empty() {
            return self.globals.get(name).map(|(s, _, _)| s.clone());
        }
        self.resolve_in(self.functions.len() - 1, name)
    }

    fn resolve_in(&mut self, idx: usize, name: &str) -> Option<Symbol> {
        if let Some(sym) = self.functions[idx].lookup_local(name) {
            return Some(sym);
        }
        if idx == 0 {
            return self.globals.get(name).map(|(s, _, _)| s.clone());
        }
        let found = self.resolve_in(idx - 1, name)?;
        if found.is_global {
            return Some(found);
        }
        let is_local = !found.is_upvalue;
        Some(self.functions[idx].add_or_get_upvalue(
            name,
            found.ty.clone(),
            is_local,
            found.index,
            found.assignable,
        ))
    }

    // ---- statements -------------------------------------------------------

    fn analyse_stmt(&mut self, stmt: &mut Stmt) {
        if let Stmt::Assignment { target, .. } = stmt {
            let undeclared = matches!(target, Expr::Primary { name, .. } if self.resolve_name(name).is_none());
            if undeclared {
                self.rewrite_assignment_as_var_decl(stmt);
            }
        }

        match stmt {
            Stmt::Block { statements, var_count } => {
                self.current_fn_mut().push_scope();
                let mut count = 0u16;
                for s in statements.iter_mut() {
                    self.analyse_stmt(s);
                    if matches!(s, Stmt::VarDecl { .. }) {
                        count += 1;
                    }
                }
                self.current_fn_mut().pop_scope();
                *var_count = count;
            }
            Stmt::Scope(inner) => {
                self.current_fn_mut().push_scope();
                self.analyse_stmt(inner);
                self.current_fn_mut().pop_scope();
            }
            Stmt::If { cond, then_branch, else_branch } => {
                self.analyse_cond(cond);
                self.analyse_branch(then_branch);
                if let Some(eb) = else_branch {
                    self.analyse_branch(eb);
                }
            }
            Stmt::While { cond, body } => {
                self.analyse_cond(cond);
                self.analyse_branch(body);
            }
            Stmt::Assignment { target, value } => {
                self.analyse_expr(target);
                self.analyse_expr(value);
                self.check_assignment(target, value);
            }
            Stmt::Return { value, span } => self.analyse_return(value, *span),
            Stmt::ExprStmt(expr) => self.analyse_expr(expr),
            Stmt::VarDecl {
                name,
                declared_type,
                init,
                symbol,
                span,
            } => {
                let span = *span;
                self.analyse_var_decl(name, declared_type, init, symbol, span);
            }
            Stmt::ClosureDecl { function, upvalues } => {
                let fn_ty = self.types.function(
                    function.params.iter().map(|p| p.ty.clone()).collect(),
                    function.ret.clone(),
                );
                self.current_fn_mut().declare_local(function.name.clone(), fn_ty, false);
                self.analyse_closure(function, upvalues);
            }
            Stmt::FnDecl(_) | Stmt::NativeFnDecl(_) | Stmt::StructDecl { .. } | Stmt::UnionDecl { .. } | Stmt::Invalid => {}
        }
    }

    fn rewrite_assignment_as_var_decl(&mut self, stmt: &mut Stmt) {
        let old = std::mem::replace(stmt, Stmt::Invalid);
        let Stmt::Assignment { target, value } = old else {
            unreachable!("caller only invokes this on Stmt::Assignment");
        };
        let Expr::Primary { name, span, .. } = target else {
            unreachable!("caller only invokes this when target is a Primary");
        };
        *stmt = Stmt::VarDecl {
            name,
            declared_type: None,
            init: Some(value),
            symbol: None,
            span,
        };
    }

    fn analyse_branch(&mut self, stmt: &mut Stmt) {
        self.current_fn_mut().push_scope();
        self.analyse_stmt(stmt);
        self.current_fn_mut().pop_scope();
    }

    fn analyse_cond(&mut self, expr: &mut Expr) {
        self.analyse_expr(expr);
        if let Some(t) = expr.ty() {
            if !t.is_invalid() && !t.is_numeric() {
                self.diagnostics
                    .push_error(format!("condition must be numeric or bool, found '{}'", t), expr.span());
            }
        }
    }

    fn analyse_return(&mut self, value: &mut Option<Expr>, span: Span) {
        let ret_ty = self.current_fn().return_type.clone();
        match value {
            Some(expr) => {
                self.analyse_expr(expr);
                if let Some(vt) = expr.ty() {
                    if !vt.is_invalid() && vt != ret_ty {
                        self.diagnostics.push_error(
                            format!("return type mismatch: expected '{}', found '{}'", ret_ty, vt),
                            span,
                        );
                    }
                }
            }
            None => {
                if !matches!(ret_ty.resolved().kind(), TypeKind::Void) {
                    self.diagnostics
                        .push_error("missing return value for non-void function", span);
                }
            }
        }
    }

    fn analyse_var_decl(
        &mut self,
        name: &Rc<str>,
        declared_type: &mut Option<Type>,
        init: &mut Option<Expr>,
        symbol: &mut Option<Symbol>,
        span: Span,
    ) {
        if init.is_none() {
            if let Some(dt) = declared_type.clone() {
                if let Some(shape) = dt.resolved().as_struct() {
                    match self.globals.get(&shape.name).map(|(s, _, _)| s.clone()) {
                        Some(ctor) => {
                            *init = Some(Expr::Call {
                                callable: Box::new(Expr::Primary {
                                    name: shape.name.clone(),
                                    symbol: Some(ctor),
                                    span,
                                }),
                                args: Vec::new(),
                                span,
                                ty: Some(dt.clone()),
                            });
                        }
                        None => {
                            self.diagnostics
                                .push_error(format!("no constructor for struct '{}'", shape.name), span);
                        }
                    }
                }
            }
        }

        if let Some(init_expr) = init.as_mut() {
            self.analyse_expr(init_expr);
        }

        let final_type = match declared_type.clone() {
            Some(dt) => {
                if let Some(init_expr) = init.as_mut() {
                    self.coerce_assignment(init_expr, &dt, span);
                }
                dt
            }
            None => match init.as_ref().and_then(|e| e.ty()) {
                Some(t) if !t.is_invalid() => t,
                Some(_) => {
                    self.diagnostics
                        .push_error("cannot infer the type of an 'invalid'-typed initialiser", span);
                    self.types.invalid()
                }
                None => {
                    self.diagnostics.push_error(
                        format!("variable '{}' has no declared type and no initialiser", name),
                        span,
                    );
                    self.types.invalid()
                }
            },
        };
        *declared_type = Some(final_type.clone());
        *symbol = Some(self.current_fn_mut().declare_local(name.clone(), final_type, true));
    }

    fn check_assignment(&mut self, target: &mut Expr, value: &mut Expr) {
        let value_span = value.span();
        match target {
            Expr::Primary { symbol: Some(sym), span, .. } => {
                if !sym.assignable {
                    self.diagnostics.push_error("left-hand side is not assignable", *span);
                }
                let ty = sym.ty.clone();
                self.coerce_assignment(value, &ty, value_span);
            }
            Expr::Access { ty: Some(t), .. } | Expr::Subscript { ty: Some(t), .. } => {
                let t = t.clone();
                self.coerce_assignment(value, &t, value_span);
            }
            Expr::Invalid | Expr::Primary { symbol: None, .. } => {}
            other => {
                self.diagnostics.push_error("invalid assignment target", other.span());
            }
        }
    }

    /// `T ← U` per §4.4: identical canonical types, `T` is `any`, `T` is a
    /// union containing `U`, or `U` promotes to `T` by numeric rank (an
    /// implicit `Cast` is spliced in for the last case).
    fn coerce_assignment(&mut self, expr: &mut Expr, target_ty: &Type, span: Span) {
        let Some(src_ty) = expr.ty() else { return };
        if src_ty.is_invalid() || target_ty.is_invalid() || src_ty == *target_ty || target_ty.is_any() {
            return;
        }
        if let Some(union) = target_ty.resolved().as_union() {
            if union.alternatives.iter().any(|alt| *alt == src_ty) {
                return;
            }
        }
        if let (Some(src_rank), Some(dst_rank)) = (src_ty.numeric_rank(), target_ty.numeric_rank()) {
            if src_rank < dst_rank {
                let old = std::mem::replace(expr, Expr::Invalid);
                *expr = Expr::Cast {
                    to: target_ty.clone(),
                    child: Box::new(old),
                };
                return;
            }
            if src_rank == dst_rank {
                return;
            }
        }
        self.diagnostics.push_error(
            format!("cannot assign value of type '{}' to target of type '{}'", src_ty, target_ty),
            span,
        );
    }

    // ---- expressions ----------------------------------------------------

    fn analyse_expr(&mut self, expr: &mut Expr) {
        match expr {
            Expr::Literal { value, ty, .. } => {
                *ty = Some(match value {
                    crate::ast::Literal::Int(_) => self.types.int(),
                    crate::ast::Literal::Float(_) => self.types.float(),
                    crate::ast::Literal::Bool(_) => self.types.bool_(),
                    crate::ast::Literal::Str(_) => self.types.string(),
                });
            }
            Expr::Primary { name, symbol, span } => match self.resolve_name(name) {
                Some(sym) => *symbol = Some(sym),
                None => {
                    self.diagnostics.push_error(format!("undeclared name '{}'", name), *span);
                }
            },
            Expr::Unary { op, op_ty, child, span, ty } => {
                self.analyse_expr(child);
                self.analyse_unary(*op, op_ty, child, *span, ty);
            }
            Expr::Binary { op, op_ty, left, right, span, ty } => {
                self.analyse_expr(left);
                self.analyse_expr(right);
                self.analyse_binary(*op, op_ty, left, right, *span, ty);
            }
            Expr::Grouping { child } => self.analyse_expr(child),
            Expr::Call { callable, args, span, ty } => {
                self.analyse_expr(callable);
                for a in args.iter_mut() {
                    self.analyse_expr(a);
                }
                self.analyse_call(callable, args, *span, ty);
            }
            Expr::Subscript { object, index, span, ty } => {
                self.analyse_expr(object);
                self.analyse_expr(index);
                self.analyse_subscript(object, index, *span, ty);
            }
            Expr::Access { object, field, member_index, span, ty } => {
                self.analyse_expr(object);
                self.analyse_access(object, field, member_index, *span, ty);
            }
            Expr::ArrayLiteral { elements, span, ty } => {
                for e in elements.iter_mut() {
                    self.analyse_expr(e);
                }
                self.analyse_array_literal(elements, *span, ty);
            }
            Expr::MapLiteral { entries, span, ty } => {
                for (k, v) in entries.iter_mut() {
                    self.analyse_expr(k);
                    self.analyse_expr(v);
                }
                self.analyse_map_literal(entries, *span, ty);
            }
            Expr::Cast { .. } | Expr::StructConstruct { .. } | Expr::Invalid => {}
        }
    }

    fn analyse_unary(&mut self, op: UnaryOp, op_ty: &mut Option<Type>, child: &Expr, span: Span, ty: &mut Option<Type>) {
        let Some(ct) = child.ty() else { return };
        if ct.is_invalid() {
            return;
        }
        match op {
            UnaryOp::Not => {
                *op_ty = Some(self.types.bool_());
                *ty = Some(self.types.bool_());
            }
            UnaryOp::Neg => {
                if !ct.is_numeric() {
                    self.diagnostics.push_error(format!("cannot negate '{}'", ct), span);
                    return;
                }
                let is_float = matches!(ct.numeric_rank(), Some(NumericRank::Float));
                let result = if is_float { self.types.float() } else { self.types.int() };
                *op_ty = Some(result.clone());
                *ty = Some(result);
            }
        }
    }

    fn analyse_binary(
        &mut self,
        op: BinaryOp,
        op_ty: &mut Option<Type>,
        left: &mut Expr,
        right: &mut Expr,
        span: Span,
        ty: &mut Option<Type>,
    ) {
        let (Some(lt), Some(rt)) = (left.ty(), right.ty()) else { return };
        if lt.is_invalid() || rt.is_invalid() {
            return;
        }
        match op {
            BinaryOp::And | BinaryOp::Or => {
                if !lt.is_numeric() || !rt.is_numeric() {
                    self.diagnostics
                        .push_error("'&&'/'||' operands must be numeric or bool", span);
                }
                *ty = Some(self.types.bool_());
            }
            BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::Less | BinaryOp::LessEq | BinaryOp::Greater | BinaryOp::GreaterEq => {
                self.unify_numeric_operands(op_ty, left, right, lt, rt, span);
                *ty = Some(self.types.bool_());
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::FloorDiv => {
                self.unify_numeric_operands(op_ty, left, right, lt, rt, span);
                *ty = op_ty.clone();
            }
        }
    }

    fn unify_numeric_operands(
        &mut self,
        op_ty: &mut Option<Type>,
        left: &mut Expr,
        right: &mut Expr,
        lt: Type,
        rt: Type,
        span: Span,
    ) {
        if !lt.is_numeric() || !rt.is_numeric() {
            self.diagnostics
                .push_error(format!("operands must be numeric, found '{}' and '{}'", lt, rt), span);
            return;
        }
        let (Some(lr), Some(rr)) = (lt.numeric_rank(), rt.numeric_rank()) else { return };
        let higher = if lr >= rr { lt } else { rt };
        if lr < rr {
            let left_span = left.span();
            self.coerce_assignment(left, &higher, left_span);
        } else if rr < lr {
            let right_span = right.span();
            self.coerce_assignment(right, &higher, right_span);
        }
        let is_float = matches!(higher.numeric_rank(), Some(NumericRank::Float));
        *op_ty = Some(if is_float { self.types.float() } else { self.types.int() });
    }

    fn analyse_call(&mut self, callable: &Expr, args: &mut [Expr], span: Span, ty: &mut Option<Type>) {
        let Some(ct) = callable.ty() else { return };
        if ct.is_invalid() {
            return;
        }
        let resolved = ct.resolved();
        let TypeKind::Function { params, ret } = resolved.kind() else {
            self.diagnostics.push_error(format!("'{}' is not callable", ct), span);
            return;
        };
        let params = params.clone();
        let ret = ret.clone();
        if args.len() != params.len() {
            self.diagnostics.push_error(
                format!("expected {} argument(s), found {}", params.len(), args.len()),
                span,
            );
        } else {
            for (arg, pty) in args.iter_mut().zip(params.iter()) {
                let arg_span = arg.span();
                self.coerce_assignment(arg, pty, arg_span);
            }
        }
        *ty = Some(ret);
    }

    fn analyse_subscript(&mut self, object: &Expr, index: &Expr, span: Span, ty: &mut Option<Type>) {
        let Some(ot) = object.ty() else { return };
        if ot.is_invalid() {
            return;
        }
        let Some(it) = index.ty() else { return };
        let resolved = ot.resolved();
        match resolved.kind() {
            TypeKind::Array(elem) => {
                if it != self.types.int() {
                    self.diagnostics
                        .push_error(format!("array index must be Int, found '{}'", it), span);
                }
                *ty = Some(elem.clone());
            }
            TypeKind::Map(key, value) => {
                if it != *key {
                    self.diagnostics
                        .push_error(format!("map index must be '{}', found '{}'", key, it), span);
                }
                *ty = Some(value.clone());
            }
            TypeKind::String => {
                self.diagnostics.push_error("string indexing is not supported", span);
            }
            _ => {
                self.diagnostics.push_error(format!("'{}' is not subscriptable", ot), span);
            }
        }
    }

    fn analyse_access(&mut self, object: &Expr, field: &Rc<str>, member_index: &mut Option<usize>, span: Span, ty: &mut Option<Type>) {
        let Some(ot) = object.ty() else { return };
        if ot.is_invalid() {
            return;
        }
        let Some(shape) = ot.as_struct() else {
            self.diagnostics.push_error(format!("'{}' is not a struct", ot), span);
            return;
        };
        match shape.index_of(field) {
            Some(idx) => {
                *member_index = Some(idx);
                *ty = Some(shape.members[idx].1.clone());
            }
            None => {
                self.diagnostics
                    .push_error(format!("struct '{}' has no member '{}'", shape.name, field), span);
            }
        }
    }

    fn analyse_array_literal(&mut self, elements: &[Expr], span: Span, ty: &mut Option<Type>) {
        if elements.is_empty() {
            *ty = Some(self.types.array(self.types.any()));
            return;
        }
        let Some(elem_ty) = elements[0].ty() else { return };
        if elem_ty.is_invalid() {
            return;
        }
        for e in &elements[1..] {
            if let Some(et) = e.ty() {
                if !et.is_invalid() && et != elem_ty {
                    self.diagnostics.push_error(
                        format!("array elements must share one type; found '{}' and '{}'", elem_ty, et),
                        span,
                    );
                }
            }
        }
        *ty = Some(self.types.array(elem_ty));
    }

    fn analyse_map_literal(&mut self, entries: &[(Expr, Expr)], span: Span, ty: &mut Option<Type>) {
        if entries.is_empty() {
            *ty = Some(self.types.map(self.types.any(), self.types.any()));
            return;
        }
        let Some(key_ty) = entries[0].0.ty() else { return };
        let Some(val_ty) = entries[0].1.ty() else { return };
        if key_ty.is_invalid() || val_ty.is_invalid() {
            return;
        }
        for (k, v) in &entries[1..] {
            if let Some(kt) = k.ty() {
                if !kt.is_invalid() && kt != key_ty {
                    self.diagnostics.push_error(
                        format!("map keys must share one type; found '{}' and '{}'", key_ty, kt),
                        span,
                    );
                }
            }
            if let Some(vt) = v.ty() {
                if !vt.is_invalid() && vt != val_ty {
                    self.diagnostics.push_error(
                        format!("map values must share one type; found '{}' and '{}'", val_ty, vt),
                        span,
                    );
                }
            }
        }
        if !key_ty.is_valid_map_key() {
            self.diagnostics
                .push_error(format!("'{}' cannot be used as a map key", key_ty), span);
        }
        *ty = Some(self.types.map(key_ty, val_ty));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn validate_source(src: &str) -> (Program, bool, Vec<Diagnostic>, TypeRegistry) {
        let types = TypeRegistry::new();
        let (mut program, parse_diags) = {
            let parser = Parser::new(src, &types);
            parser.parse()
        };
        assert!(parse_diags.is_empty(), "unexpected parse diagnostics: {:?}", parse_diags);
        let validator = Validator::new(&types);
        let (ok, diags) = validator.validate(&mut program);
        (program, ok, diags, types)
    }

    #[test]
    fn simple_main_validates_cleanly() {
        let (_program, ok, diags, _types) = validate_source("fn main() -> Int { Int x := 3 + 4 * 2; return x; }");
        assert!(ok, "diagnostics: {:?}", diags);
    }

    #[test]
    fn redeclaration_of_global_is_an_error() {
        let (_program, ok, diags, _types) = validate_source("fn f() -> Int = 1; fn f() -> Int = 2;");
        assert!(!ok);
        assert!(diags.iter().any(|d| d.message.contains("redeclaration")));
    }

    #[test]
    fn a_duplicate_native_function_is_reported_as_an_overload_not_a_redeclaration() {
        let (_program, ok, diags, _types) =
            validate_source("fn puts(String s) -> Int ...; fn puts(String s) -> Int ...;");
        assert!(!ok);
        assert!(diags.iter().any(|d| d.message.contains("cannot be overloaded")));
        assert!(!diags.iter().any(|d| d.message.contains("redeclaration")));
    }

    #[test]
    fn undeclared_bare_assignment_becomes_implicit_var_decl() {
        let (program, ok, diags, _types) = validate_source("fn main() -> Int { x := 5; return x; }");
        assert!(ok, "diagnostics: {:?}", diags);
        let Stmt::FnDecl(decl) = &program.statements[0] else { panic!() };
        let Some(body) = &decl.body else { panic!() };
        let Stmt::Block { statements, .. } = &**body else { panic!() };
        assert!(matches!(statements[0], Stmt::VarDecl { .. }));
    }

    #[test]
    fn numeric_promotion_inserts_cast() {
        let (program, ok, diags, types) =
            validate_source("fn main() -> Float { Float f := 1 + 2.5; return f; }");
        assert!(ok, "diagnostics: {:?}", diags);
        let Stmt::FnDecl(decl) = &program.statements[0] else { panic!() };
        let Some(body) = &decl.body else { panic!() };
        let Stmt::Block { statements, .. } = &**body else { panic!() };
        let Stmt::VarDecl { init: Some(Expr::Binary { left, .. }), .. } = &statements[0] else {
            panic!("expected a var decl with a binary initialiser")
        };
        assert!(matches!(**left, Expr::Cast { .. }));
        assert_eq!(left.ty(), Some(types.float()));
    }

    #[test]
    fn struct_var_decl_without_initialiser_lowers_to_constructor_call() {
        let (program, ok, diags, _types) =
            validate_source("type Pair := { Int a, Int b } fn main() -> Int { Pair p; return p.a; }");
        assert!(ok, "diagnostics: {:?}", diags);
        let Stmt::FnDecl(main_decl) = &program.statements[0] else { panic!() };
        let Some(body) = &main_decl.body else { panic!() };
        let Stmt::Block { statements, .. } = &**body else { panic!() };
        let Stmt::VarDecl { init: Some(Expr::Call { args, .. }), .. } = &statements[0] else {
            panic!("expected struct default-constructor call")
        };
        assert!(args.is_empty());
        // the synthesised constructor was appended after `main`
        assert!(program.statements.iter().any(|s| matches!(s, Stmt::FnDecl(d) if &*d.name == "Pair")));
    }

    #[test]
    fn closure_captures_enclosing_local_as_upvalue() {
        let (program, ok, diags, _types) = validate_source(
            "fn makeAdder(Int x) -> (Int) -> Int { fn add(Int y) -> Int = x + y; return add; }",
        );
        assert!(ok, "diagnostics: {:?}", diags);
        let Stmt::FnDecl(decl) = &program.statements[0] else { panic!() };
        let Some(body) = &decl.body else { panic!() };
        let Stmt::Block { statements, .. } = &**body else { panic!() };
        let Stmt::ClosureDecl { upvalues, .. } = &statements[0] else {
            panic!("expected a closure declaration")
        };
        assert_eq!(upvalues.len(), 1);
        assert!(upvalues[0].is_local);
        assert_eq!(upvalues[0].index, 0); // `x` is parameter slot 0 in makeAdder
    }

    #[test]
    fn array_literal_requires_identical_element_types() {
        let (_program, ok, diags, _types) =
            validate_source("fn main() -> Int { [Int] xs := [1, 2.0]; return xs[0]; }");
        assert!(!ok);
        assert!(diags.iter().any(|d| d.message.contains("must share one type")));
    }

    #[test]
    fn return_type_mismatch_is_reported() {
        let (_program, ok, diags, _types) = validate_source("fn main() -> Int { return true; }");
        assert!(!ok);
        assert!(diags.iter().any(|d| d.message.contains("return type mismatch")));
    }
}
