//! Hand-written recursive descent over the Joos 1W grammar.
//!
//! The parser produces the typed AST directly. Backtracking is used in the
//! two classic ambiguous spots: local declarations vs. expression statements,
//! and casts vs. parenthesized names.

use crate::{
    ast::{
        Block, BinaryOp, CompilationUnit, Constructor, Expr, ExprKind, Field, Ident, Import,
        ImportKind, Literal, LocalDecl, Method, Modifiers, Name, NodeIdGen, Param, Stmt, StmtKind,
        TypeDecl, TypeExpr, TypeKind, TypeRef, UnaryOp,
    },
    diagnostics::{Diagnostic, ErrorKind, Span},
    types::PrimitiveKind,
};

use super::token::{Keyword, Token, TokenKind};

/// The parser state for one compilation unit.
#[derive(Debug)]
pub struct Parser<'a> {
    file: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    ids: &'a mut NodeIdGen,
}

impl<'a> Parser<'a> {
    /// Creates a parser over a scanned token stream.
    #[must_use]
    pub fn new(file: &'a str, tokens: Vec<Token>, ids: &'a mut NodeIdGen) -> Self {
        Self {
            file,
            tokens,
            pos: 0,
            ids,
        }
    }

    /// Parses the whole unit: package declaration, imports, one type.
    ///
    /// # Errors
    ///
    /// Returns the first syntactic diagnostic (or a weeder-classified one
    /// for Java constructs that Joos bans outright).
    pub fn parse_compilation_unit(mut self) -> Result<CompilationUnit, Diagnostic> {
        let package = if self.eat_keyword(Keyword::Package) {
            let segments = self.dotted_ident()?;
            self.expect(&TokenKind::Semi)?;
            segments
        } else {
            Vec::new()
        };

        let mut imports = Vec::new();
        while self.at_keyword(Keyword::Import) {
            let span = self.advance().span;
            let mut segments = vec![self.ident()?];
            let mut kind = ImportKind::Single;
            while self.eat(&TokenKind::Dot) {
                if self.eat(&TokenKind::Star) {
                    kind = ImportKind::OnDemand;
                    break;
                }
                segments.push(self.ident()?);
            }
            self.expect(&TokenKind::Semi)?;
            imports.push(Import { kind, segments, span });
        }

        let modifiers = self.modifiers()?;
        let decl = self.type_decl(modifiers)?;
        self.expect(&TokenKind::Eof)?;

        Ok(CompilationUnit {
            file: self.file.to_string(),
            package,
            imports,
            decl,
        })
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn nth_kind(&self, n: usize) -> &TokenKind {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn at_keyword(&self, keyword: Keyword) -> bool {
        matches!(self.peek_kind(), TokenKind::Keyword(k) if *k == keyword)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        if self.at_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Span, Diagnostic> {
        if self.at(kind) {
            Ok(self.advance().span)
        } else {
            Err(self.syntax_error(format!("expected `{kind}`, found `{}`", self.peek_kind())))
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> Result<Span, Diagnostic> {
        if self.at_keyword(keyword) {
            Ok(self.advance().span)
        } else {
            Err(self.syntax_error(format!("expected `{keyword}`, found `{}`", self.peek_kind())))
        }
    }

    fn ident(&mut self) -> Result<Ident, Diagnostic> {
        match self.peek_kind().clone() {
            TokenKind::Ident(text) => {
                let span = self.advance().span;
                Ok(Ident { text, span })
            }
            other => Err(self.syntax_error(format!("expected identifier, found `{other}`"))),
        }
    }

    fn dotted_ident(&mut self) -> Result<Vec<Ident>, Diagnostic> {
        let mut segments = vec![self.ident()?];
        while self.at(&TokenKind::Dot) && matches!(self.nth_kind(1), TokenKind::Ident(_)) {
            self.advance();
            segments.push(self.ident()?);
        }
        Ok(segments)
    }

    fn syntax_error(&self, message: impl Into<String>) -> Diagnostic {
        Diagnostic::error(self.file, self.peek().span, ErrorKind::Syntactic, message)
    }

    fn weed_error(&self, span: Span, message: impl Into<String>) -> Diagnostic {
        Diagnostic::error(self.file, span, ErrorKind::Weeder, message)
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    fn modifiers(&mut self) -> Result<Modifiers, Diagnostic> {
        let mut modifiers = Modifiers::empty();
        loop {
            let flag = match self.peek_kind() {
                TokenKind::Keyword(Keyword::Public) => Modifiers::PUBLIC,
                TokenKind::Keyword(Keyword::Protected) => Modifiers::PROTECTED,
                TokenKind::Keyword(Keyword::Static) => Modifiers::STATIC,
                TokenKind::Keyword(Keyword::Final) => Modifiers::FINAL,
                TokenKind::Keyword(Keyword::Abstract) => Modifiers::ABSTRACT,
                TokenKind::Keyword(Keyword::Native) => Modifiers::NATIVE,
                TokenKind::Keyword(
                    k @ (Keyword::Private
                    | Keyword::Transient
                    | Keyword::Volatile
                    | Keyword::Strictfp
                    | Keyword::Synchronized),
                ) => {
                    let span = self.peek().span;
                    return Err(self.weed_error(span, format!("`{k}` is not a Joos modifier")));
                }
                _ => return Ok(modifiers),
            };
            let span = self.advance().span;
            if modifiers.contains(flag) {
                return Err(self.weed_error(span, "duplicate modifier"));
            }
            modifiers |= flag;
        }
    }

    fn type_decl(&mut self, modifiers: Modifiers) -> Result<TypeDecl, Diagnostic> {
        if self.at_keyword(Keyword::Class) {
            let span = self.advance().span;
            let name = self.ident()?;
            let extends = if self.eat_keyword(Keyword::Extends) {
                vec![self.type_ref()?]
            } else {
                Vec::new()
            };
            let mut implements = Vec::new();
            if self.eat_keyword(Keyword::Implements) {
                implements.push(self.type_ref()?);
                while self.eat(&TokenKind::Comma) {
                    implements.push(self.type_ref()?);
                }
            }
            let (fields, methods, constructors) = self.class_body(&name)?;
            Ok(TypeDecl {
                kind: TypeKind::Class,
                name,
                modifiers,
                extends,
                implements,
                fields,
                methods,
                constructors,
                span,
            })
        } else if self.at_keyword(Keyword::Interface) {
            let span = self.advance().span;
            let name = self.ident()?;
            let mut extends = Vec::new();
            if self.eat_keyword(Keyword::Extends) {
                extends.push(self.type_ref()?);
                while self.eat(&TokenKind::Comma) {
                    extends.push(self.type_ref()?);
                }
            }
            let methods = self.interface_body()?;
            Ok(TypeDecl {
                kind: TypeKind::Interface,
                name,
                modifiers,
                extends,
                implements: Vec::new(),
                fields: Vec::new(),
                methods,
                constructors: Vec::new(),
                span,
            })
        } else {
            Err(self.syntax_error("expected `class` or `interface`"))
        }
    }

    fn type_ref(&mut self) -> Result<TypeRef, Diagnostic> {
        let segments = self.dotted_ident()?;
        let span = segments[0].span;
        Ok(TypeRef {
            id: self.ids.fresh(),
            segments,
            span,
        })
    }

    fn primitive_keyword(&self) -> Option<PrimitiveKind> {
        match self.peek_kind() {
            TokenKind::Keyword(Keyword::Byte) => Some(PrimitiveKind::Byte),
            TokenKind::Keyword(Keyword::Short) => Some(PrimitiveKind::Short),
            TokenKind::Keyword(Keyword::Int) => Some(PrimitiveKind::Int),
            TokenKind::Keyword(Keyword::Char) => Some(PrimitiveKind::Char),
            TokenKind::Keyword(Keyword::Boolean) => Some(PrimitiveKind::Boolean),
            _ => None,
        }
    }

    fn type_expr(&mut self) -> Result<TypeExpr, Diagnostic> {
        let base = if let Some(primitive) = self.primitive_keyword() {
            let span = self.advance().span;
            TypeExpr::Primitive(primitive, span)
        } else if matches!(self.peek_kind(), TokenKind::Ident(_)) {
            TypeExpr::Named(self.type_ref()?)
        } else {
            return Err(self.syntax_error(format!("expected a type, found `{}`", self.peek_kind())));
        };
        self.array_dims(base)
    }

    fn array_dims(&mut self, mut base: TypeExpr) -> Result<TypeExpr, Diagnostic> {
        while self.at(&TokenKind::LBracket) && self.nth_kind(1) == &TokenKind::RBracket {
            let span = self.advance().span;
            self.advance();
            base = TypeExpr::Array(Box::new(base), span);
        }
        Ok(base)
    }

    fn class_body(
        &mut self,
        class_name: &Ident,
    ) -> Result<(Vec<Field>, Vec<Method>, Vec<Constructor>), Diagnostic> {
        self.expect(&TokenKind::LBrace)?;
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        let mut constructors = Vec::new();
        while !self.eat(&TokenKind::RBrace) {
            if self.at(&TokenKind::Eof) {
                return Err(self.syntax_error("unterminated class body"));
            }
            if self.at(&TokenKind::LBrace) {
                let span = self.peek().span;
                return Err(self.weed_error(span, "instance/static initializer blocks are not in Joos"));
            }
            let span = self.peek().span;
            let modifiers = self.modifiers()?;
            if self.at(&TokenKind::LBrace) {
                return Err(self.weed_error(span, "instance/static initializer blocks are not in Joos"));
            }
            // Constructor: the class name followed by `(`.
            if matches!(self.peek_kind(), TokenKind::Ident(text) if text == &class_name.text)
                && self.nth_kind(1) == &TokenKind::LParen
            {
                let name = self.ident()?;
                let params = self.params()?;
                self.throws_clause()?;
                let body = self.block()?;
                constructors.push(Constructor {
                    name,
                    modifiers,
                    params,
                    body,
                    span,
                });
                continue;
            }
            let return_type = if self.eat_keyword(Keyword::Void) {
                None
            } else {
                Some(self.type_expr()?)
            };
            let name = self.ident()?;
            if self.at(&TokenKind::LParen) {
                let params = self.params()?;
                let throws = self.throws_clause()?;
                let body = if self.eat(&TokenKind::Semi) {
                    None
                } else {
                    Some(self.block()?)
                };
                methods.push(Method {
                    name,
                    modifiers,
                    return_type,
                    params,
                    throws,
                    body,
                    span,
                });
            } else {
                let Some(ty) = return_type else {
                    return Err(self.weed_error(span, "fields may not have type `void`"));
                };
                let init = if self.eat(&TokenKind::Assign) {
                    Some(self.expression()?)
                } else {
                    None
                };
                self.expect(&TokenKind::Semi)?;
                fields.push(Field {
                    id: self.ids.fresh(),
                    name,
                    modifiers,
                    ty,
                    init,
                    span,
                });
            }
        }
        Ok((fields, methods, constructors))
    }

    fn interface_body(&mut self) -> Result<Vec<Method>, Diagnostic> {
        self.expect(&TokenKind::LBrace)?;
        let mut methods = Vec::new();
        while !self.eat(&TokenKind::RBrace) {
            if self.at(&TokenKind::Eof) {
                return Err(self.syntax_error("unterminated interface body"));
            }
            let span = self.peek().span;
            let modifiers = self.modifiers()?;
            let return_type = if self.eat_keyword(Keyword::Void) {
                None
            } else {
                Some(self.type_expr()?)
            };
            let name = self.ident()?;
            if !self.at(&TokenKind::LParen) {
                return Err(self.weed_error(span, "interfaces may not declare fields"));
            }
            let params = self.params()?;
            let throws = self.throws_clause()?;
            if self.at(&TokenKind::LBrace) {
                return Err(self.weed_error(span, "interface methods may not have bodies"));
            }
            self.expect(&TokenKind::Semi)?;
            methods.push(Method {
                name,
                modifiers,
                return_type,
                params,
                throws,
                body: None,
                span,
            });
        }
        Ok(methods)
    }

    fn params(&mut self) -> Result<Vec<Param>, Diagnostic> {
        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.at(&TokenKind::RParen) {
            loop {
                let ty = self.type_expr()?;
                let name = self.ident()?;
                params.push(Param {
                    id: self.ids.fresh(),
                    name,
                    ty,
                });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(params)
    }

    fn throws_clause(&mut self) -> Result<Vec<TypeRef>, Diagnostic> {
        let mut throws = Vec::new();
        if self.eat_keyword(Keyword::Throws) {
            throws.push(self.type_ref()?);
            while self.eat(&TokenKind::Comma) {
                throws.push(self.type_ref()?);
            }
        }
        Ok(throws)
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn block(&mut self) -> Result<Block, Diagnostic> {
        let span = self.expect(&TokenKind::LBrace)?;
        let mut statements = Vec::new();
        while !self.eat(&TokenKind::RBrace) {
            if self.at(&TokenKind::Eof) {
                return Err(self.syntax_error("unterminated block"));
            }
            statements.push(self.statement()?);
        }
        Ok(Block { statements, span })
    }

    fn statement(&mut self) -> Result<Stmt, Diagnostic> {
        let span = self.peek().span;
        let id = self.ids.fresh();
        let kind = match self.peek_kind() {
            TokenKind::LBrace => StmtKind::Block(self.block()?),
            TokenKind::Semi => {
                self.advance();
                StmtKind::Empty
            }
            TokenKind::Keyword(Keyword::If) => {
                self.advance();
                self.expect(&TokenKind::LParen)?;
                let cond = self.expression()?;
                self.expect(&TokenKind::RParen)?;
                let then_branch = Box::new(self.statement()?);
                let else_branch = if self.eat_keyword(Keyword::Else) {
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };
                StmtKind::If {
                    cond,
                    then_branch,
                    else_branch,
                }
            }
            TokenKind::Keyword(Keyword::While) => {
                self.advance();
                self.expect(&TokenKind::LParen)?;
                let cond = self.expression()?;
                self.expect(&TokenKind::RParen)?;
                let body = Box::new(self.statement()?);
                StmtKind::While { cond, body }
            }
            TokenKind::Keyword(Keyword::For) => {
                self.advance();
                self.expect(&TokenKind::LParen)?;
                let init = if self.at(&TokenKind::Semi) {
                    None
                } else {
                    Some(Box::new(self.for_init()?))
                };
                self.expect(&TokenKind::Semi)?;
                let cond = if self.at(&TokenKind::Semi) {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.expect(&TokenKind::Semi)?;
                let update = if self.at(&TokenKind::RParen) {
                    None
                } else {
                    Some(self.statement_expression()?)
                };
                self.expect(&TokenKind::RParen)?;
                let body = Box::new(self.statement()?);
                StmtKind::For {
                    init,
                    cond,
                    update,
                    body,
                }
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.advance();
                let value = if self.at(&TokenKind::Semi) {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.expect(&TokenKind::Semi)?;
                StmtKind::Return(value)
            }
            TokenKind::Keyword(
                k @ (Keyword::Switch
                | Keyword::Do
                | Keyword::Break
                | Keyword::Continue
                | Keyword::Try
                | Keyword::Throw
                | Keyword::Synchronized),
            ) => {
                return Err(self.weed_error(span, format!("`{k}` statements are not in Joos")));
            }
            _ => {
                if let Some(decl) = self.try_local_decl()? {
                    self.expect(&TokenKind::Semi)?;
                    StmtKind::LocalDecl(decl)
                } else {
                    let expr = self.statement_expression()?;
                    self.expect(&TokenKind::Semi)?;
                    StmtKind::Expr(expr)
                }
            }
        };
        Ok(Stmt { id, kind, span })
    }

    fn for_init(&mut self) -> Result<Stmt, Diagnostic> {
        let span = self.peek().span;
        let id = self.ids.fresh();
        let kind = if let Some(decl) = self.try_local_decl()? {
            StmtKind::LocalDecl(decl)
        } else {
            StmtKind::Expr(self.statement_expression()?)
        };
        Ok(Stmt { id, kind, span })
    }

    /// Attempts `Type Ident [= Expr]` and rolls back on mismatch.
    fn try_local_decl(&mut self) -> Result<Option<LocalDecl>, Diagnostic> {
        let looks_like_type = self.primitive_keyword().is_some()
            || matches!(self.peek_kind(), TokenKind::Ident(_));
        if !looks_like_type {
            return Ok(None);
        }
        let saved = self.pos;
        let Ok(ty) = self.type_expr() else {
            self.pos = saved;
            return Ok(None);
        };
        if !matches!(self.peek_kind(), TokenKind::Ident(_)) {
            self.pos = saved;
            return Ok(None);
        }
        let name = self.ident()?;
        let init = if self.eat(&TokenKind::Assign) {
            Some(self.expression()?)
        } else {
            None
        };
        Ok(Some(LocalDecl {
            id: self.ids.fresh(),
            name,
            ty,
            init,
        }))
    }

    /// An expression allowed in statement position: assignment, invocation,
    /// or class instance creation.
    fn statement_expression(&mut self) -> Result<Expr, Diagnostic> {
        let expr = self.expression()?;
        match expr.kind {
            ExprKind::Assign { .. } | ExprKind::Call { .. } | ExprKind::New { .. } => Ok(expr),
            _ => Err(Diagnostic::error(
                self.file,
                expr.span,
                ErrorKind::Syntactic,
                "not a statement",
            )),
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn expr(&mut self, span: Span, kind: ExprKind) -> Expr {
        Expr {
            id: self.ids.fresh(),
            kind,
            span,
        }
    }

    fn expression(&mut self) -> Result<Expr, Diagnostic> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Expr, Diagnostic> {
        let lhs = self.or_or()?;
        if !self.at(&TokenKind::Assign) {
            return Ok(lhs);
        }
        if !matches!(
            lhs.kind,
            ExprKind::Name(_) | ExprKind::FieldAccess { .. } | ExprKind::ArrayAccess { .. }
        ) {
            return Err(Diagnostic::error(
                self.file,
                lhs.span,
                ErrorKind::Syntactic,
                "invalid assignment target",
            ));
        }
        self.advance();
        let span = lhs.span;
        let value = self.assignment()?;
        Ok(self.expr(
            span,
            ExprKind::Assign {
                target: Box::new(lhs),
                value: Box::new(value),
            },
        ))
    }

    fn binary_chain(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, Diagnostic>,
        ops: &[(TokenKind, BinaryOp)],
    ) -> Result<Expr, Diagnostic> {
        let mut lhs = next(self)?;
        'outer: loop {
            for (token, op) in ops {
                if self.at(token) {
                    self.advance();
                    let rhs = next(self)?;
                    let span = lhs.span;
                    lhs = self.expr(
                        span,
                        ExprKind::Binary {
                            op: *op,
                            lhs: Box::new(lhs),
                            rhs: Box::new(rhs),
                        },
                    );
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn or_or(&mut self) -> Result<Expr, Diagnostic> {
        self.binary_chain(Self::and_and, &[(TokenKind::PipePipe, BinaryOp::OrOr)])
    }

    fn and_and(&mut self) -> Result<Expr, Diagnostic> {
        self.binary_chain(Self::eager_or, &[(TokenKind::AmpAmp, BinaryOp::AndAnd)])
    }

    fn eager_or(&mut self) -> Result<Expr, Diagnostic> {
        self.binary_chain(Self::eager_and, &[(TokenKind::Pipe, BinaryOp::Or)])
    }

    fn eager_and(&mut self) -> Result<Expr, Diagnostic> {
        self.binary_chain(Self::equality, &[(TokenKind::Amp, BinaryOp::And)])
    }

    fn equality(&mut self) -> Result<Expr, Diagnostic> {
        self.binary_chain(
            Self::relational,
            &[(TokenKind::EqEq, BinaryOp::Eq), (TokenKind::Ne, BinaryOp::Ne)],
        )
    }

    fn relational(&mut self) -> Result<Expr, Diagnostic> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Lt => Some(BinaryOp::Lt),
                TokenKind::Le => Some(BinaryOp::Le),
                TokenKind::Gt => Some(BinaryOp::Gt),
                TokenKind::Ge => Some(BinaryOp::Ge),
                TokenKind::Keyword(Keyword::Instanceof) => None,
                _ => return Ok(lhs),
            };
            let span = lhs.span;
            if let Some(op) = op {
                self.advance();
                let rhs = self.additive()?;
                lhs = self.expr(
                    span,
                    ExprKind::Binary {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                );
            } else {
                self.advance();
                let ty = self.type_expr()?;
                lhs = self.expr(
                    span,
                    ExprKind::InstanceOf {
                        expr: Box::new(lhs),
                        ty,
                    },
                );
            }
        }
    }

    fn additive(&mut self) -> Result<Expr, Diagnostic> {
        self.binary_chain(
            Self::multiplicative,
            &[(TokenKind::Plus, BinaryOp::Add), (TokenKind::Minus, BinaryOp::Sub)],
        )
    }

    fn multiplicative(&mut self) -> Result<Expr, Diagnostic> {
        self.binary_chain(
            Self::unary,
            &[
                (TokenKind::Star, BinaryOp::Mul),
                (TokenKind::Slash, BinaryOp::Div),
                (TokenKind::Percent, BinaryOp::Rem),
            ],
        )
    }

    fn unary(&mut self) -> Result<Expr, Diagnostic> {
        let span = self.peek().span;
        if self.eat(&TokenKind::Minus) {
            // `2147483648` is a valid operand only directly here, so the
            // parenthesized and binary-minus forms fall through to the
            // range check in `primary`.
            if matches!(self.peek_kind(), TokenKind::IntLit(d) if d.parse::<u64>().ok() == Some(2_147_483_648))
            {
                let lit_span = self.advance().span;
                let literal =
                    self.expr(lit_span, ExprKind::Literal(Literal::Int(2_147_483_648)));
                return Ok(self.expr(
                    span,
                    ExprKind::Unary {
                        op: UnaryOp::Minus,
                        expr: Box::new(literal),
                    },
                ));
            }
            let operand = self.unary()?;
            return Ok(self.expr(
                span,
                ExprKind::Unary {
                    op: UnaryOp::Minus,
                    expr: Box::new(operand),
                },
            ));
        }
        if self.eat(&TokenKind::Bang) {
            let operand = self.unary()?;
            return Ok(self.expr(
                span,
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(operand),
                },
            ));
        }
        if self.at(&TokenKind::LParen) {
            if let Some(cast) = self.try_cast(span)? {
                return Ok(cast);
            }
        }
        self.postfix()
    }

    /// Attempts `( Type ) UnaryExpr` with rollback.
    ///
    /// A parenthesized primitive (or array) type is always a cast. For a
    /// parenthesized name the next token decides: a cast must be followed
    /// by something that can begin an operand, and `-` is excluded so that
    /// `(a) - b` stays a subtraction.
    fn try_cast(&mut self, span: Span) -> Result<Option<Expr>, Diagnostic> {
        let saved = self.pos;
        self.advance();
        let primitive = self.primitive_keyword().is_some();
        let ty = match self.type_expr() {
            Ok(ty) => ty,
            Err(_) => {
                self.pos = saved;
                return Ok(None);
            }
        };
        if !self.eat(&TokenKind::RParen) {
            self.pos = saved;
            return Ok(None);
        }
        let operand_follows = matches!(
            self.peek_kind(),
            TokenKind::Ident(_)
                | TokenKind::IntLit(_)
                | TokenKind::CharLit(_)
                | TokenKind::StringLit(_)
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Null
                | TokenKind::LParen
                | TokenKind::Bang
                | TokenKind::Keyword(Keyword::This | Keyword::New)
        ) || (primitive && self.at(&TokenKind::Minus))
            || matches!(ty, TypeExpr::Array(..) | TypeExpr::Primitive(..))
                && self.at(&TokenKind::Minus);
        if !operand_follows {
            self.pos = saved;
            return Ok(None);
        }
        let operand = self.unary()?;
        Ok(Some(self.expr(
            span,
            ExprKind::Cast {
                ty,
                expr: Box::new(operand),
            },
        )))
    }

    fn postfix(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.primary()?;
        loop {
            if self.at(&TokenKind::Dot) && matches!(self.nth_kind(1), TokenKind::Ident(_)) {
                self.advance();
                let name = self.ident()?;
                if self.at(&TokenKind::LParen) {
                    let args = self.arguments()?;
                    let span = expr.span;
                    let call_name = Name {
                        id: self.ids.fresh(),
                        span: name.span,
                        segments: vec![name],
                    };
                    expr = self.expr(
                        span,
                        ExprKind::Call {
                            receiver: Some(Box::new(expr)),
                            name: call_name,
                            args,
                        },
                    );
                } else {
                    let span = expr.span;
                    expr = self.expr(
                        span,
                        ExprKind::FieldAccess {
                            receiver: Box::new(expr),
                            name,
                        },
                    );
                }
            } else if self.at(&TokenKind::LBracket) {
                self.advance();
                let index = self.expression()?;
                self.expect(&TokenKind::RBracket)?;
                let span = expr.span;
                expr = self.expr(
                    span,
                    ExprKind::ArrayAccess {
                        array: Box::new(expr),
                        index: Box::new(index),
                    },
                );
            } else {
                return Ok(expr);
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, Diagnostic> {
        self.expect(&TokenKind::LParen)?;
        let mut args = Vec::new();
        if !self.at(&TokenKind::RParen) {
            loop {
                args.push(self.expression()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr, Diagnostic> {
        let span = self.peek().span;
        match self.peek_kind().clone() {
            TokenKind::IntLit(digits) => {
                self.advance();
                let value = digits.parse::<u64>().unwrap_or(u64::MAX);
                if value >= 2_147_483_648 {
                    return Err(self.weed_error(span, format!("integer literal `{digits}` out of range")));
                }
                #[allow(clippy::cast_possible_truncation)]
                Ok(self.expr(span, ExprKind::Literal(Literal::Int(value as u32))))
            }
            TokenKind::CharLit(c) => {
                self.advance();
                Ok(self.expr(span, ExprKind::Literal(Literal::Char(c))))
            }
            TokenKind::StringLit(s) => {
                self.advance();
                Ok(self.expr(span, ExprKind::Literal(Literal::String(s))))
            }
            TokenKind::True => {
                self.advance();
                Ok(self.expr(span, ExprKind::Literal(Literal::Bool(true))))
            }
            TokenKind::False => {
                self.advance();
                Ok(self.expr(span, ExprKind::Literal(Literal::Bool(false))))
            }
            TokenKind::Null => {
                self.advance();
                Ok(self.expr(span, ExprKind::Literal(Literal::Null)))
            }
            TokenKind::Keyword(Keyword::This) => {
                self.advance();
                Ok(self.expr(span, ExprKind::This))
            }
            TokenKind::Keyword(Keyword::Super) => {
                Err(self.weed_error(span, "`super` expressions are not in Joos"))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(&TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::Keyword(Keyword::New) => self.creation(span),
            TokenKind::Ident(_) => {
                let segments = self.dotted_ident()?;
                let name = Name {
                    id: self.ids.fresh(),
                    span,
                    segments,
                };
                if self.at(&TokenKind::LParen) {
                    let args = self.arguments()?;
                    Ok(self.expr(
                        span,
                        ExprKind::Call {
                            receiver: None,
                            name,
                            args,
                        },
                    ))
                } else {
                    Ok(self.expr(span, ExprKind::Name(name)))
                }
            }
            other => Err(self.syntax_error(format!("expected an expression, found `{other}`"))),
        }
    }

    fn creation(&mut self, span: Span) -> Result<Expr, Diagnostic> {
        self.advance();
        if let Some(primitive) = self.primitive_keyword() {
            let ty_span = self.advance().span;
            self.expect(&TokenKind::LBracket)?;
            let length = self.expression()?;
            self.expect(&TokenKind::RBracket)?;
            if self.at(&TokenKind::LBracket) {
                return Err(self.weed_error(span, "multidimensional array creation is not in Joos"));
            }
            return Ok(self.expr(
                span,
                ExprKind::NewArray {
                    element: TypeExpr::Primitive(primitive, ty_span),
                    length: Box::new(length),
                },
            ));
        }
        let ty = self.type_ref()?;
        if self.at(&TokenKind::LBracket) {
            self.advance();
            let length = self.expression()?;
            self.expect(&TokenKind::RBracket)?;
            if self.at(&TokenKind::LBracket) {
                return Err(self.weed_error(span, "multidimensional array creation is not in Joos"));
            }
            return Ok(self.expr(
                span,
                ExprKind::NewArray {
                    element: TypeExpr::Named(ty),
                    length: Box::new(length),
                },
            ));
        }
        let args = self.arguments()?;
        Ok(self.expr(span, ExprKind::New { ty, args }))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::syntax::Lexer;

    fn parse(text: &str) -> CompilationUnit {
        let mut ids = NodeIdGen::new();
        let tokens = Lexer::new("A.java", text).scan().expect("scan");
        Parser::new("A.java", tokens, &mut ids)
            .parse_compilation_unit()
            .expect("parse")
    }

    fn parse_err(text: &str) -> Diagnostic {
        let mut ids = NodeIdGen::new();
        let tokens = Lexer::new("A.java", text).scan().expect("scan");
        Parser::new("A.java", tokens, &mut ids)
            .parse_compilation_unit()
            .expect_err("expected a parse failure")
    }

    #[test]
    fn parses_a_minimal_class() {
        let unit = parse("public class A { public A() {} public static int test() { return 123; } }");
        assert_eq!(unit.decl.name.text, "A");
        assert_eq!(unit.decl.constructors.len(), 1);
        assert_eq!(unit.decl.methods.len(), 1);
        assert!(unit.decl.methods[0].modifiers.contains(Modifiers::STATIC));
    }

    #[test]
    fn parses_package_and_imports() {
        let unit = parse(
            "package p.q; import java.util.Vector; import java.io.*; public class A { public A() {} }",
        );
        assert_eq!(unit.package_name(), "p.q");
        assert_eq!(unit.imports.len(), 2);
        assert_eq!(unit.imports[0].kind, ImportKind::Single);
        assert_eq!(unit.imports[1].kind, ImportKind::OnDemand);
        assert_eq!(unit.imports[1].dotted(), "java.io");
        assert_eq!(unit.canonical_name(), "p.q.A");
    }

    #[test]
    fn local_declaration_vs_assignment() {
        let unit = parse(
            "public class A { public A() {} public void f() { A x = null; x = new A(); a.b = 1; } }",
        );
        let body = unit.decl.methods[0].body.as_ref().expect("body");
        assert!(matches!(body.statements[0].kind, StmtKind::LocalDecl(_)));
        assert!(matches!(
            body.statements[1].kind,
            StmtKind::Expr(Expr { kind: ExprKind::Assign { .. }, .. })
        ));
        assert!(matches!(
            body.statements[2].kind,
            StmtKind::Expr(Expr { kind: ExprKind::Assign { .. }, .. })
        ));
    }

    #[test]
    fn cast_versus_parenthesized_subtraction() {
        let unit = parse(
            "public class A { public A() {} public int f(int a, int b) { int x = (a) - b; int y = (int) - b; Object o = (A) null; return x + y; } }",
        );
        let body = unit.decl.methods[0].body.as_ref().expect("body");
        let StmtKind::LocalDecl(x) = &body.statements[0].kind else {
            panic!("expected declaration");
        };
        assert!(
            matches!(&x.init.as_ref().unwrap().kind, ExprKind::Binary { op: BinaryOp::Sub, .. })
        );
        let StmtKind::LocalDecl(y) = &body.statements[1].kind else {
            panic!("expected declaration");
        };
        assert!(matches!(&y.init.as_ref().unwrap().kind, ExprKind::Cast { .. }));
        let StmtKind::LocalDecl(o) = &body.statements[2].kind else {
            panic!("expected declaration");
        };
        assert!(matches!(&o.init.as_ref().unwrap().kind, ExprKind::Cast { .. }));
    }

    #[test]
    fn dotted_call_keeps_full_name() {
        let unit = parse("public class A { public A() {} public void f() { p.q.C.m(1, 2); } }");
        let body = unit.decl.methods[0].body.as_ref().expect("body");
        let StmtKind::Expr(Expr { kind: ExprKind::Call { receiver, name, args }, .. }) =
            &body.statements[0].kind
        else {
            panic!("expected call");
        };
        assert!(receiver.is_none());
        assert_eq!(name.dotted(), "p.q.C.m");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn rejects_banned_statements_as_weeder_errors() {
        for text in [
            "public class A { public void f() { do {} while (true); } }",
            "public class A { public void f() { switch (1) {} } }",
            "public class A { public void f() { break; } }",
            "public class A { public void f() { throw null; } }",
        ] {
            assert_eq!(parse_err(text).kind, ErrorKind::Weeder, "{text}");
        }
    }

    #[test]
    fn rejects_multidimensional_creation() {
        let err = parse_err("public class A { public void f() { int[][] x = new int[2][3]; } }");
        assert_eq!(err.kind, ErrorKind::Weeder);
    }

    #[test]
    fn int_literal_bound_enforced_at_parse() {
        let err = parse_err("public class A { public int f() { return 2147483649; } }");
        assert_eq!(err.kind, ErrorKind::Weeder);
        // 2^31 itself survives parsing; the weeder checks the unary-minus rule.
        let unit = parse("public class A { public int f() { return -2147483648; } }");
        assert_eq!(unit.decl.methods.len(), 1);
    }

    #[test]
    fn instanceof_parses_at_relational_level() {
        let unit =
            parse("public class A { public boolean f(Object o) { return o instanceof A && true; } }");
        let body = unit.decl.methods[0].body.as_ref().expect("body");
        let StmtKind::Return(Some(expr)) = &body.statements[0].kind else {
            panic!("expected return");
        };
        assert!(matches!(expr.kind, ExprKind::Binary { op: BinaryOp::AndAnd, .. }));
    }
}
