//! Pratt-precedence expression parser plus a recursive-descent statement
//! and declaration grammar, producing the tree in [`crate::ast`].
//!
//! Errors are accumulated in a [`DiagnosticBag`] rather than aborting
//! immediately (§7): a malformed construct becomes `Expr::Invalid`/
//! `Stmt::Invalid` and parsing continues from the next synchronisation
//! point so later, unrelated errors can still be found in one pass.

use std::rc::Rc;

use matiria_core::Span;

use crate::ast::{BinaryOp, Expr, FnDecl, Literal, Program, Stmt, Symbol, UnaryOp};
use crate::diagnostics::{Diagnostic, DiagnosticBag};
use crate::scanner::Scanner;
use crate::token::{Token, TokenKind};
use crate::types::{Type, TypeRegistry};

/// Parameter/argument-list cap (§4.3).
const MAX_LIST_LEN: usize = 255;

const SYNC_TOKENS: &[TokenKind] = &[
    TokenKind::KwInt,
    TokenKind::KwFloat,
    TokenKind::KwBool,
    TokenKind::KwString,
    TokenKind::KwAny,
    TokenKind::Type,
    TokenKind::Fn,
    TokenKind::If,
    TokenKind::While,
    TokenKind::LBrace,
    TokenKind::RBrace,
];

pub struct Parser<'src> {
    tokens: Vec<Token<'src>>,
    pos: usize,
    types: &'src TypeRegistry,
    diagnostics: DiagnosticBag,
}

impl<'src> Parser<'src> {
    pub fn new(source: &'src str, types: &'src TypeRegistry) -> Self {
        let mut scanner = Scanner::new(source);
        let mut tokens = Vec::new();
        loop {
            let tok = scanner.next_token();
            if tok.kind == TokenKind::Comment {
                continue;
            }
            let done = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if done {
                break;
            }
        }
        Parser {
            tokens,
            pos: 0,
            types,
            diagnostics: DiagnosticBag::default(),
        }
    }

    pub fn parse(mut self) -> (Program, Vec<Diagnostic>) {
        let mut statements = Vec::new();
        while !self.is_at_end() {
            if self.match_tok(TokenKind::Fn) {
                statements.push(self.finish_global_fn());
            } else if self.match_tok(TokenKind::Type) {
                statements.push(self.parse_type_decl());
            } else {
                let tok = *self.peek();
                self.error(tok.span, "expected 'fn' or 'type' declaration at top level");
                self.synchronize();
            }
        }
        (Program { statements }, self.diagnostics.into_vec())
    }

    // ---- token helpers --------------------------------------------------

    fn peek(&self) -> &Token<'src> {
        &self.tokens[self.pos]
    }

    fn peek_at(&self, offset: usize) -> Option<&Token<'src>> {
        self.tokens.get(self.pos + offset)
    }

    fn previous(&self) -> &Token<'src> {
        &self.tokens[self.pos - 1]
    }

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn advance(&mut self) -> Token<'src> {
        let tok = self.tokens[self.pos];
        if !self.is_at_end() {
            self.pos += 1;
        }
        tok
    }

    fn match_tok(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Option<Token<'src>> {
        if self.check(kind) {
            Some(self.advance())
        } else {
            let tok = *self.peek();
            self.error(tok.span, format!("expected {}", what));
            None
        }
    }

    fn error(&mut self, span: Span, msg: impl Into<String>) {
        self.diagnostics.push_error(msg, span);
    }

    fn synchronize(&mut self) {
        while !self.is_at_end() && !SYNC_TOKENS.contains(&self.peek().kind) {
            self.advance();
        }
        self.diagnostics.resynchronise();
    }

    fn sync_if_panicking(&mut self) {
        if self.diagnostics.is_panicking() {
            self.synchronize();
        }
    }

    // ---- type expressions -------------------------------------------------

    fn parse_type_expr(&mut self) -> Type {
        let tok = self.peek();
        if tok.is_type_keyword() {
            let tok = self.advance();
            return self.types.from_token(&tok).unwrap_or_else(|| self.types.invalid());
        }
        match tok.kind {
            TokenKind::LBracket => {
                let bracket_span = tok.span;
                self.advance();
                let first = self.parse_type_expr();
                if self.match_tok(TokenKind::Comma) {
                    let value = self.parse_type_expr();
                    self.expect(TokenKind::RBracket, "']' to close map type");
                    if first.is_valid_map_key() || first.is_any() || first.is_invalid() {
                        self.types.map(first, value)
                    } else {
                        self.error(
                            bracket_span,
                            format!("'{}' cannot be used as a map key", first),
                        );
                        self.types.invalid()
                    }
                } else {
                    self.expect(TokenKind::RBracket, "']' to close array type");
                    self.types.array(first)
                }
            }
            TokenKind::LParen => {
                self.advance();
                let mut params = Vec::new();
                if !self.check(TokenKind::RParen) {
                    loop {
                        params.push(self.parse_type_expr());
                        if !self.match_tok(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RParen, "')' to close function parameter types");
                self.expect(TokenKind::Arrow, "'->' in function type");
                let ret = self.parse_type_expr();
                self.types.function(params, ret)
            }
            TokenKind::Ident => {
                let tok = self.advance();
                self.types.user(tok.lexeme)
            }
            _ => {
                let tok = *self.peek();
                self.error(tok.span, "expected a type");
                self.types.invalid()
            }
        }
    }

    // ---- global declarations ----------------------------------------------

    /// `fn` has already been consumed; returns the completed declaration.
    fn finish_global_fn(&mut self) -> Stmt {
        let decl = self.parse_fn_decl_body();
        if decl.body.is_none() {
            Stmt::NativeFnDecl(decl)
        } else {
            Stmt::FnDecl(decl)
        }
    }

    fn parse_fn_decl_body(&mut self) -> FnDecl {
        let span = self.previous().span;
        let name = self
            .expect(TokenKind::Ident, "function name")
            .map(|t| t.lexeme)
            .unwrap_or("<error>");
        self.expect(TokenKind::LParen, "'(' after function name");
        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                if params.len() >= MAX_LIST_LEN {
                    let tok = *self.peek();
                    self.error(tok.span, "too many parameters (max 255)");
                    self.skip_list_tail(TokenKind::RParen);
                    break;
                }
                let ty = self.parse_type_expr();
                let Some(pname) = self.expect(TokenKind::Ident, "parameter name") else {
                    break;
                };
                params.push(Symbol {
                    name: Rc::from(pname.lexeme),
                    ty,
                    index: params.len() as u16,
                    is_global: false,
                    is_upvalue: false,
                    assignable: true,
                });
                if !self.match_tok(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')' after parameter list");
        let ret = if self.match_tok(TokenKind::Arrow) {
            self.parse_type_expr()
        } else {
            self.types.void()
        };

        let body = if self.match_tok(TokenKind::DotDotDot) {
            self.expect(TokenKind::Semicolon, "';' after native function body");
            None
        } else if self.match_tok(TokenKind::Equal) {
            let value = self.parse_expression();
            self.expect(TokenKind::Semicolon, "';' after expression-bodied function");
            Some(Box::new(Stmt::Block {
                statements: vec![Stmt::Return {
                    value: Some(value),
                    span,
                }],
                var_count: 0,
            }))
        } else {
            Some(Box::new(self.parse_block()))
        };

        FnDecl {
            name: Rc::from(name),
            params,
            ret,
            body,
            span,
        }
    }

    /// Skip remaining `, item` entries in a capped list until `closer`.
    fn skip_list_tail(&mut self, closer: TokenKind) {
        while !self.is_at_end() && !self.check(closer) {
            self.advance();
        }
    }

    fn parse_type_decl(&mut self) -> Stmt {
        let span = self.previous().span;
        let Some(name) = self.expect(TokenKind::Ident, "type name") else {
            self.synchronize();
            return Stmt::Invalid;
        };
        if self.expect(TokenKind::ColonEqual, "':=' in type declaration").is_none() {
            self.synchronize();
            return Stmt::Invalid;
        }
        if self.match_tok(TokenKind::LBracket) {
            let mut alts = Vec::new();
            loop {
                alts.push(self.parse_type_expr());
                if !self.match_tok(TokenKind::Pipe) {
                    break;
                }
            }
            self.expect(TokenKind::RBracket, "']' to close union type");
            let ty = self.types.union_(name.lexeme, alts);
            Stmt::UnionDecl {
                name: Rc::from(name.lexeme),
                ty,
                span,
            }
        } else if self.match_tok(TokenKind::LBrace) {
            let mut members = Vec::new();
            if !self.check(TokenKind::RBrace) {
                loop {
                    let mty = self.parse_type_expr();
                    let Some(mname) = self.expect(TokenKind::Ident, "member name") else {
                        break;
                    };
                    members.push((Rc::from(mname.lexeme), mty));
                    if !self.match_tok(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(TokenKind::RBrace, "'}' to close struct type");
            let ty = self.types.struct_(name.lexeme, members);
            Stmt::StructDecl {
                name: Rc::from(name.lexeme),
                ty,
                span,
            }
        } else {
            let tok = *self.peek();
            self.error(tok.span, "expected '[' (union) or '{' (struct) after ':='");
            self.synchronize();
            Stmt::Invalid
        }
    }

    // ---- statements ---------------------------------------------------

    fn parse_block(&mut self) -> Stmt {
        self.expect(TokenKind::LBrace, "'{' to start a block");
        let mut statements = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_at_end() {
            statements.push(self.parse_statement());
            self.sync_if_panicking();
        }
        self.expect(TokenKind::RBrace, "'}' to close a block");
        Stmt::Block {
            statements,
            var_count: 0,
        }
    }

    fn parse_branch(&mut self) -> Stmt {
        if self.check(TokenKind::LBrace) {
            self.parse_block()
        } else {
            self.parse_statement()
        }
    }

    fn parse_statement(&mut self) -> Stmt {
        if self.match_tok(TokenKind::Fn) {
            let function = self.parse_fn_decl_body();
            Stmt::ClosureDecl {
                function,
                upvalues: Vec::new(),
            }
        } else if self.match_tok(TokenKind::If) {
            self.finish_if()
        } else if self.match_tok(TokenKind::While) {
            self.finish_while()
        } else if self.match_tok(TokenKind::Return) {
            self.finish_return()
        } else if self.check(TokenKind::LBrace) {
            Stmt::Scope(Box::new(self.parse_block()))
        } else if self.looks_like_var_decl() {
            self.finish_var_decl()
        } else {
            self.finish_expr_statement()
        }
    }

    fn finish_if(&mut self) -> Stmt {
        let cond = self.parse_expression();
        self.expect(TokenKind::Colon, "':' after if condition");
        let then_branch = Box::new(self.parse_branch());
        let else_branch = if self.match_tok(TokenKind::Else) {
            Some(Box::new(self.parse_branch()))
        } else {
            None
        };
        Stmt::If {
            cond,
            then_branch,
            else_branch,
        }
    }

    fn finish_while(&mut self) -> Stmt {
        let cond = self.parse_expression();
        self.expect(TokenKind::Colon, "':' after while condition");
        let body = Box::new(self.parse_branch());
        Stmt::While { cond, body }
    }

    fn finish_return(&mut self) -> Stmt {
        let span = self.previous().span;
        if self.match_tok(TokenKind::Semicolon) {
            Stmt::Return { value: None, span }
        } else {
            let value = self.parse_expression();
            self.expect(TokenKind::Semicolon, "';' after return value");
            Stmt::Return {
                value: Some(value),
                span,
            }
        }
    }

    fn looks_like_var_decl(&self) -> bool {
        match self.peek().kind {
            k if self.peek().is_type_keyword() => {
                let _ = k;
                true
            }
            TokenKind::LBracket => true,
            TokenKind::LParen => self.paren_type_lookahead(),
            TokenKind::Ident => matches!(
                self.peek_at(1).map(|t| t.kind),
                Some(TokenKind::Ident)
            ),
            _ => false,
        }
    }

    /// Looks past a balanced `( ... )` to see whether it's followed by
    /// `->`, which would make it a function-type annotation rather than a
    /// parenthesised expression.
    fn paren_type_lookahead(&self) -> bool {
        let mut depth = 0i32;
        let mut i = self.pos;
        loop {
            let Some(tok) = self.tokens.get(i) else {
                return false;
            };
            match tok.kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return matches!(
                            self.tokens.get(i + 1).map(|t| t.kind),
                            Some(TokenKind::Arrow)
                        );
                    }
                }
                TokenKind::Eof => return false,
                _ => {}
            }
            i += 1;
        }
    }

    fn finish_var_decl(&mut self) -> Stmt {
        let span = self.peek().span;
        let declared_type = self.parse_type_expr();
        let Some(name) = self.expect(TokenKind::Ident, "variable name") else {
            self.synchronize();
            return Stmt::Invalid;
        };
        let init = if self.match_tok(TokenKind::ColonEqual) {
            Some(self.parse_expression())
        } else {
            None
        };
        self.expect(TokenKind::Semicolon, "';' after variable declaration");
        Stmt::VarDecl {
            name: Rc::from(name.lexeme),
            declared_type: Some(declared_type),
            init,
            symbol: None,
            span,
        }
    }

    fn finish_expr_statement(&mut self) -> Stmt {
        let expr = self.parse_expression();
        if self.match_tok(TokenKind::ColonEqual) {
            let value = self.parse_expression();
            self.expect(TokenKind::Semicolon, "';' after assignment");
            if !matches!(expr, Expr::Primary { .. } | Expr::Access { .. } | Expr::Subscript { .. }) {
                self.error(expr.span(), "invalid assignment target");
                return Stmt::Invalid;
            }
            return Stmt::Assignment {
                target: expr,
                value,
            };
        }
        self.expect(TokenKind::Semicolon, "';' after expression statement");
        match expr {
            Expr::Call { .. } => Stmt::ExprStmt(expr),
            Expr::Invalid => Stmt::Invalid,
            other => {
                self.error(other.span(), "expression has no effect");
                Stmt::Invalid
            }
        }
    }

    // ---- expressions (Pratt precedence) --------------------------------

    fn parse_expression(&mut self) -> Expr {
        self.parse_logic()
    }

    fn parse_logic(&mut self) -> Expr {
        let mut left = self.parse_equality();
        loop {
            let op = match self.peek().kind {
                TokenKind::AmpAmp => BinaryOp::And,
                TokenKind::PipePipe => BinaryOp::Or,
                _ => break,
            };
            let span = self.advance().span;
            let right = self.parse_equality();
            left = Expr::Binary {
                op,
                op_ty: None,
                left: Box::new(left),
                right: Box::new(right),
                span,
                ty: None,
            };
        }
        left
    }

    fn parse_equality(&mut self) -> Expr {
        let mut left = self.parse_comparison();
        loop {
            let op = match self.peek().kind {
                TokenKind::Equal => BinaryOp::Eq,
                TokenKind::BangEqual => BinaryOp::NotEq,
                _ => break,
            };
            let span = self.advance().span;
            let right = self.parse_comparison();
            left = Expr::Binary {
                op,
                op_ty: None,
                left: Box::new(left),
                right: Box::new(right),
                span,
                ty: None,
            };
        }
        left
    }

    fn parse_comparison(&mut self) -> Expr {
        let mut left = self.parse_term();
        loop {
            let op = match self.peek().kind {
                TokenKind::Less => BinaryOp::Less,
                TokenKind::LessEqual => BinaryOp::LessEq,
                TokenKind::Greater => BinaryOp::Greater,
                TokenKind::GreaterEqual => BinaryOp::GreaterEq,
                _ => break,
            };
            let span = self.advance().span;
            let right = self.parse_term();
            left = Expr::Binary {
                op,
                op_ty: None,
                left: Box::new(left),
                right: Box::new(right),
                span,
                ty: None,
            };
        }
        left
    }

    fn parse_term(&mut self) -> Expr {
        let mut left = self.parse_factor();
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            let span = self.advance().span;
            let right = self.parse_factor();
            left = Expr::Binary {
                op,
                op_ty: None,
                left: Box::new(left),
                right: Box::new(right),
                span,
                ty: None,
            };
        }
        left
    }

    fn parse_factor(&mut self) -> Expr {
        let mut left = self.parse_unary();
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                TokenKind::SlashSlash => BinaryOp::FloorDiv,
                _ => break,
            };
            let span = self.advance().span;
            let right = self.parse_unary();
            left = Expr::Binary {
                op,
                op_ty: None,
                left: Box::new(left),
                right: Box::new(right),
                span,
                ty: None,
            };
        }
        left
    }

    fn parse_unary(&mut self) -> Expr {
        let op = match self.peek().kind {
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Neg,
            _ => return self.parse_postfix(),
        };
        let span = self.advance().span;
        let child = self.parse_unary();
        Expr::Unary {
            op,
            op_ty: None,
            child: Box::new(child),
            span,
            ty: None,
        }
    }

    fn parse_postfix(&mut self) -> Expr {
        let mut expr = self.parse_primary();
        loop {
            match self.peek().kind {
                TokenKind::LParen => {
                    let span = self.advance().span;
                    let mut args = Vec::new();
                    if !self.check(TokenKind::RParen) {
                        loop {
                            if args.len() >= MAX_LIST_LEN {
                                let tok = *self.peek();
                                self.error(tok.span, "too many arguments (max 255)");
                                self.skip_list_tail(TokenKind::RParen);
                                break;
                            }
                            args.push(self.parse_expression());
                            if !self.match_tok(TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(TokenKind::RParen, "')' after call arguments");
                    expr = Expr::Call {
                        callable: Box::new(expr),
                        args,
                        span,
                        ty: None,
                    };
                }
                TokenKind::LBracket => {
                    let span = self.advance().span;
                    let index = self.parse_expression();
                    self.expect(TokenKind::RBracket, "']' after subscript index");
                    expr = Expr::Subscript {
                        object: Box::new(expr),
                        index: Box::new(index),
                        span,
                        ty: None,
                    };
                }
                TokenKind::Dot => {
                    let span = self.advance().span;
                    let field = self
                        .expect(TokenKind::Ident, "member name after '.'")
                        .map(|t| Rc::from(t.lexeme))
                        .unwrap_or_else(|| Rc::from("<error>"));
                    expr = Expr::Access {
                        object: Box::new(expr),
                        field,
                        member_index: None,
                        span,
                        ty: None,
                    };
                }
                _ => break,
            }
        }
        expr
    }

    fn parse_primary(&mut self) -> Expr {
        let tok = *self.peek();
        match tok.kind {
            TokenKind::Int => {
                self.advance();
                let value = tok.lexeme.parse::<i64>().unwrap_or(0);
                Expr::Literal {
                    value: Literal::Int(value),
                    span: tok.span,
                    ty: None,
                }
            }
            TokenKind::Float => {
                self.advance();
                let value = tok.lexeme.parse::<f64>().unwrap_or(0.0);
                Expr::Literal {
                    value: Literal::Float(value),
                    span: tok.span,
                    ty: None,
                }
            }
            TokenKind::Str => {
                self.advance();
                Expr::Literal {
                    value: Literal::Str(Rc::from(tok.lexeme)),
                    span: tok.span,
                    ty: None,
                }
            }
            TokenKind::True => {
                self.advance();
                Expr::Literal {
                    value: Literal::Bool(true),
                    span: tok.span,
                    ty: None,
                }
            }
            TokenKind::False => {
                self.advance();
                Expr::Literal {
                    value: Literal::Bool(false),
                    span: tok.span,
                    ty: None,
                }
            }
            TokenKind::Ident => {
                self.advance();
                Expr::Primary {
                    name: Rc::from(tok.lexeme),
                    symbol: None,
                    span: tok.span,
                }
            }
            TokenKind::LParen => {
                self.advance();
                let child = self.parse_expression();
                self.expect(TokenKind::RParen, "')' to close grouping");
                Expr::Grouping {
                    child: Box::new(child),
                }
            }
            TokenKind::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                if !self.check(TokenKind::RBracket) {
                    loop {
                        elements.push(self.parse_expression());
                        if !self.match_tok(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RBracket, "']' to close array literal");
                Expr::ArrayLiteral {
                    elements,
                    span: tok.span,
                    ty: None,
                }
            }
            TokenKind::LBrace => {
                self.advance();
                let mut entries = Vec::new();
                if !self.check(TokenKind::RBrace) {
                    loop {
                        let key = self.parse_expression();
                        self.expect(TokenKind::Colon, "':' between map key and value");
                        let value = self.parse_expression();
                        entries.push((key, value));
                        if !self.match_tok(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RBrace, "'}' to close map literal");
                Expr::MapLiteral {
                    entries,
                    span: tok.span,
                    ty: None,
                }
            }
            _ => {
                self.advance();
                self.error(tok.span, "expected an expression");
                Expr::Invalid
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Program {
        let types = TypeRegistry::new();
        let parser = Parser::new(src, &types);
        let (program, diags) = parser.parse();
        assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
        program
    }

    #[test]
    fn parses_minimal_main() {
        let program = parse_ok("fn main() -> Int { return 1; }");
        assert_eq!(program.statements.len(), 1);
        match &program.statements[0] {
            Stmt::FnDecl(decl) => assert_eq!(&*decl.name, "main"),
            other => panic!("expected FnDecl, got {:?}", other),
        }
    }

    #[test]
    fn parses_expression_bodied_function() {
        let program = parse_ok("fn add(Int a, Int b) -> Int = a + b;");
        match &program.statements[0] {
            Stmt::FnDecl(decl) => {
                assert_eq!(decl.params.len(), 2);
                let Some(body) = &decl.body else { panic!("expected body") };
                match &**body {
                    Stmt::Block { statements, .. } => assert_eq!(statements.len(), 1),
                    _ => panic!("expected block"),
                }
            }
            other => panic!("expected FnDecl, got {:?}", other),
        }
    }

    #[test]
    fn parses_native_function() {
        let program = parse_ok("fn puts(String s) -> Int ...;");
        match &program.statements[0] {
            Stmt::NativeFnDecl(decl) => assert!(decl.body.is_none()),
            other => panic!("expected NativeFnDecl, got {:?}", other),
        }
    }

    #[test]
    fn parses_struct_decl() {
        let program = parse_ok("type Pair := { Int a, Int b }");
        match &program.statements[0] {
            Stmt::StructDecl { name, .. } => assert_eq!(&**name, "Pair"),
            other => panic!("expected StructDecl, got {:?}", other),
        }
    }

    #[test]
    fn parses_union_decl() {
        let program = parse_ok("type Shape := [Int | Float]");
        match &program.statements[0] {
            Stmt::UnionDecl { name, .. } => assert_eq!(&**name, "Shape"),
            other => panic!("expected UnionDecl, got {:?}", other),
        }
    }

    #[test]
    fn distinguishes_var_decl_from_expression_statement() {
        let program = parse_ok(
            "fn main() -> Int { Int x := 1; x := x + 1; return x; }",
        );
        let Stmt::FnDecl(decl) = &program.statements[0] else { panic!() };
        let Some(body) = &decl.body else { panic!() };
        let Stmt::Block { statements, .. } = &**body else { panic!() };
        assert!(matches!(statements[0], Stmt::VarDecl { .. }));
        assert!(matches!(statements[1], Stmt::Assignment { .. }));
        assert!(matches!(statements[2], Stmt::Return { .. }));
    }

    #[test]
    fn expression_statement_without_effect_is_an_error() {
        let types = TypeRegistry::new();
        let parser = Parser::new("fn main() -> Int { 1 + 2; return 0; }", &types);
        let (_program, diags) = parser.parse();
        assert!(diags.iter().any(|d| d.message.contains("no effect")));
    }

    #[test]
    fn a_struct_keyed_map_type_annotation_is_rejected() {
        let types = TypeRegistry::new();
        let parser = Parser::new(
            "type Pair := { Int a, Int b } fn main() -> Int { [Pair, Int] m; return 0; }",
            &types,
        );
        let (_program, diags) = parser.parse();
        assert!(diags.iter().any(|d| d.message.contains("cannot be used as a map key")));
    }

    #[test]
    fn recovers_after_parse_error_in_a_block() {
        let types = TypeRegistry::new();
        // A bogus `@` token mid-block should not stop the next statement
        // from being found once synchronisation kicks in at `return`.
        let parser = Parser::new("fn main() -> Int { @ return 1; }", &types);
        let (program, diags) = parser.parse();
        assert!(!diags.is_empty());
        let Stmt::FnDecl(decl) = &program.statements[0] else { panic!() };
        let Some(body) = &decl.body else { panic!() };
        let Stmt::Block { statements, .. } = &**body else { panic!() };
        assert!(statements.iter().any(|s| matches!(s, Stmt::Return { .. })));
    }

    #[test]
    fn parses_closure_returning_function_type() {
        let program = parse_ok(
            "fn makeAdder(Int x) -> (Int) -> Int { fn add(Int y) -> Int = x + y; return add; }",
        );
        let Stmt::FnDecl(decl) = &program.statements[0] else { panic!() };
        let Some(body) = &decl.body else { panic!() };
        let Stmt::Block { statements, .. } = &**body else { panic!() };
        assert!(matches!(statements[0], Stmt::ClosureDecl { .. }));
    }
}
