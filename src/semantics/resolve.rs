//! Name disambiguation and symbol resolution.
//!
//! Every ambiguous dotted name is reclassified by trying, in order: the
//! innermost local or parameter, a field of `this` along the superclass
//! chain, then the longest prefix that names a type. Whatever suffix
//! remains becomes field accesses, typed by the type checker.

use std::collections::HashMap;

use crate::{
    ast::{
        Block, CompilationUnit, Expr, ExprKind, Modifiers, Name, Stmt, StmtKind, TypeExpr,
    },
    diagnostics::{Diagnostic, Diagnostics, ErrorKind, Span},
    semantics::{
        BodyId, ClassTable, FieldId, NameBase, Resolved, ResolvedName, TypeId,
        type_index::{TypeIndex, TypeLookupError},
    },
};

impl ClassTable {
    /// Finds a field by simple name along the superclass chain, returning
    /// the declaring type and field index.
    #[must_use]
    pub fn find_field(&self, start: TypeId, name: &str) -> Option<FieldId> {
        let mut current = Some(start);
        while let Some(id) = current {
            let class = self.get(id);
            if let Some(pos) = class.fields.iter().position(|f| f.name == name) {
                return Some(FieldId {
                    owner: id,
                    index: u32::try_from(pos).unwrap_or(u32::MAX),
                });
            }
            current = class.super_class;
        }
        None
    }
}

/// Resolves every name in every body of the program.
#[must_use]
pub fn resolve(
    units: &[CompilationUnit],
    table: &ClassTable,
    index: &TypeIndex,
) -> (Resolved, Diagnostics) {
    let mut resolver = Resolver {
        table,
        index,
        out: Diagnostics::new(),
        resolved: Resolved::default(),
        file: String::new(),
        unit: 0,
        class: TypeId(0),
        static_ctx: false,
        field_init_limit: None,
        scopes: Vec::new(),
        next_slot: 0,
        max_slot: 0,
    };

    for (i, unit) in units.iter().enumerate() {
        resolver.unit = i;
        resolver.file = unit.file.clone();
        resolver.class = TypeId(u32::try_from(i).unwrap_or(u32::MAX));

        for (fi, field) in unit.decl.fields.iter().enumerate() {
            if let Some(init) = &field.init {
                resolver.enter_body(field.modifiers.contains(Modifiers::STATIC));
                resolver.field_init_limit = Some(u32::try_from(fi).unwrap_or(u32::MAX));
                resolver.expr(init);
                resolver.field_init_limit = None;
                resolver.finish_body(BodyId::FieldInit(
                    resolver.class,
                    u32::try_from(fi).unwrap_or(u32::MAX),
                ));
            }
        }
        for (mi, method) in unit.decl.methods.iter().enumerate() {
            if let Some(body) = &method.body {
                resolver.enter_body(method.modifiers.contains(Modifiers::STATIC));
                resolver.params(&method.params);
                resolver.block(body);
                resolver.finish_body(BodyId::Method(
                    resolver.class,
                    u32::try_from(mi).unwrap_or(u32::MAX),
                ));
            }
        }
        for (ci, ctor) in unit.decl.constructors.iter().enumerate() {
            resolver.enter_body(false);
            resolver.params(&ctor.params);
            resolver.block(&ctor.body);
            resolver.finish_body(BodyId::Ctor(
                resolver.class,
                u32::try_from(ci).unwrap_or(u32::MAX),
            ));
        }
    }

    (resolver.resolved, resolver.out)
}

struct Resolver<'a> {
    table: &'a ClassTable,
    index: &'a TypeIndex,
    out: Diagnostics,
    resolved: Resolved,
    file: String,
    unit: usize,
    class: TypeId,
    static_ctx: bool,
    /// During a field initializer, the index of the field being initialized;
    /// same-class fields with an equal or later index (and the same
    /// staticness) may not be named yet.
    field_init_limit: Option<u32>,
    scopes: Vec<HashMap<String, u32>>,
    next_slot: u32,
    max_slot: u32,
}

impl Resolver<'_> {
    fn error(&mut self, span: Span, message: impl Into<String>) {
        self.out.push(Diagnostic::error(
            &self.file,
            span,
            ErrorKind::Environment,
            message,
        ));
    }

    fn enter_body(&mut self, static_ctx: bool) {
        self.static_ctx = static_ctx;
        self.scopes.clear();
        self.scopes.push(HashMap::new());
        self.next_slot = 0;
        self.max_slot = 0;
    }

    fn finish_body(&mut self, body: BodyId) {
        self.resolved.frame_locals.insert(body, self.max_slot);
        self.scopes.clear();
    }

    fn params(&mut self, params: &[crate::ast::Param]) {
        for param in params {
            self.type_expr(&param.ty);
            let slot = self.declare_local(&param.name.text, param.name.span);
            self.resolved.slots.insert(param.id, slot);
        }
    }

    fn declare_local(&mut self, name: &str, span: Span) -> u32 {
        if self.scopes.iter().any(|scope| scope.contains_key(name)) {
            self.error(span, format!("`{name}` is already declared in an enclosing scope"));
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        self.max_slot = self.max_slot.max(self.next_slot);
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), slot);
        }
        slot
    }

    fn lookup_local(&self, name: &str) -> Option<u32> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    fn block(&mut self, block: &Block) {
        self.scopes.push(HashMap::new());
        let saved = self.next_slot;
        for stmt in &block.statements {
            self.stmt(stmt);
        }
        self.scopes.pop();
        self.next_slot = saved;
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Empty | StmtKind::Return(None) => {}
            StmtKind::Expr(e) | StmtKind::Return(Some(e)) => self.expr(e),
            StmtKind::Block(b) => self.block(b),
            StmtKind::LocalDecl(decl) => self.local_decl(decl),
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.expr(cond);
                self.stmt(then_branch);
                if let Some(els) = else_branch {
                    self.stmt(els);
                }
            }
            StmtKind::While { cond, body } => {
                self.expr(cond);
                self.stmt(body);
            }
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => {
                // The initializer's declaration scopes over the whole loop.
                self.scopes.push(HashMap::new());
                let saved = self.next_slot;
                if let Some(init) = init {
                    self.stmt(init);
                }
                if let Some(cond) = cond {
                    self.expr(cond);
                }
                if let Some(update) = update {
                    self.expr(update);
                }
                self.stmt(body);
                self.scopes.pop();
                self.next_slot = saved;
            }
        }
    }

    fn local_decl(&mut self, decl: &crate::ast::LocalDecl) {
        self.type_expr(&decl.ty);
        // The local is in scope within its own initializer; reading it
        // there is caught by definite assignment.
        let slot = self.declare_local(&decl.name.text, decl.name.span);
        self.resolved.slots.insert(decl.id, slot);
        if let Some(init) = &decl.init {
            self.expr(init);
        }
    }

    fn type_expr(&mut self, te: &TypeExpr) {
        match te {
            TypeExpr::Primitive(..) => {}
            TypeExpr::Named(reference) => {
                let parts: Vec<&str> =
                    reference.segments.iter().map(|s| s.text.as_str()).collect();
                match self.index.resolve_name(self.unit, &parts) {
                    Ok(id) => {
                        self.resolved.type_refs.insert(reference.id, id);
                    }
                    Err(err) => self.error(reference.span, err.to_string()),
                }
            }
            TypeExpr::Array(element, _) => self.type_expr(element),
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Literal(_) => {}
            ExprKind::This => {
                if self.static_ctx {
                    self.error(expr.span, "`this` cannot be used in a static context");
                }
            }
            ExprKind::Name(name) => {
                self.classify(name, false);
            }
            ExprKind::FieldAccess { receiver, .. } => self.expr(receiver),
            ExprKind::ArrayAccess { array, index } => {
                self.expr(array);
                self.expr(index);
            }
            ExprKind::Call {
                receiver,
                name,
                args,
            } => {
                if let Some(receiver) = receiver {
                    self.expr(receiver);
                } else if name.segments.len() > 1 {
                    self.classify(name, true);
                }
                for arg in args {
                    self.expr(arg);
                }
            }
            ExprKind::New { ty, args } => {
                let parts: Vec<&str> = ty.segments.iter().map(|s| s.text.as_str()).collect();
                match self.index.resolve_name(self.unit, &parts) {
                    Ok(id) => {
                        self.resolved.type_refs.insert(ty.id, id);
                    }
                    Err(err) => self.error(ty.span, err.to_string()),
                }
                for arg in args {
                    self.expr(arg);
                }
            }
            ExprKind::NewArray { element, length } => {
                self.type_expr(element);
                self.expr(length);
            }
            ExprKind::Cast { ty, expr: operand } | ExprKind::InstanceOf { expr: operand, ty } => {
                self.type_expr(ty);
                self.expr(operand);
            }
            ExprKind::Unary { expr: operand, .. } => self.expr(operand),
            ExprKind::Binary { lhs, rhs, .. } => {
                self.expr(lhs);
                self.expr(rhs);
            }
            ExprKind::Assign { target, value } => {
                self.expr(target);
                self.expr(value);
            }
        }
    }

    /// The §6.5 reclassification of one ambiguous name. For invocation
    /// names the final segment is the method and only the prefix is
    /// classified here.
    fn classify(&mut self, name: &Name, is_call: bool) {
        let limit = name.segments.len() - usize::from(is_call);
        debug_assert!(limit > 0);
        let first = &name.segments[0];

        if let Some(slot) = self.lookup_local(&first.text) {
            self.resolved.names.insert(
                name.id,
                ResolvedName {
                    base: NameBase::Local(slot),
                    consumed: 1,
                },
            );
            return;
        }

        if let Some(field) = self.table.find_field(self.class, &first.text) {
            let info = &self.table.get(field.owner).fields[field.index as usize];
            if self.static_ctx && !info.is_static() {
                self.error(
                    first.span,
                    format!("instance field `{}` referenced from a static context", first.text),
                );
            }
            if let Some(current) = self.field_init_limit {
                if field.owner == self.class
                    && info.is_static() == self.static_ctx
                    && field.index >= current
                {
                    self.error(
                        first.span,
                        format!("illegal forward reference to field `{}`", first.text),
                    );
                }
            }
            self.resolved.names.insert(
                name.id,
                ResolvedName {
                    base: NameBase::Field(field),
                    consumed: 1,
                },
            );
            return;
        }

        for end in 1..=limit {
            let parts: Vec<&str> = name.segments[..end]
                .iter()
                .map(|s| s.text.as_str())
                .collect();
            match self.index.resolve_name(self.unit, &parts) {
                Ok(id) => {
                    if !is_call && end == name.segments.len() {
                        self.error(
                            name.span,
                            format!("`{}` is a type, not an expression", name.dotted()),
                        );
                        return;
                    }
                    self.resolved.names.insert(
                        name.id,
                        ResolvedName {
                            base: NameBase::Type(id),
                            consumed: end,
                        },
                    );
                    return;
                }
                Err(TypeLookupError::Unknown(_)) => {}
                Err(err) => {
                    self.error(name.span, err.to_string());
                    return;
                }
            }
        }

        self.error(name.span, format!("cannot resolve `{}`", name.dotted()));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{ast::NodeIdGen, semantics::declare, syntax};

    const OBJECT: (&str, &str) =
        ("Object.java", "package java.lang; public class Object { public Object() {} }");

    fn run(sources: &[(&str, &str)]) -> (Resolved, Diagnostics) {
        let mut ids = NodeIdGen::new();
        let units: Vec<_> = sources
            .iter()
            .map(|(file, text)| syntax::parse_source(file, text, &mut ids).expect("parse"))
            .collect();
        let (index, d1) = TypeIndex::build(&units);
        assert!(!d1.has_errors(), "{:?}", d1.items());
        let (table, d2) = declare::link(&units, &index);
        assert!(!d2.has_errors(), "{:?}", d2.items());
        resolve(&units, &table, &index)
    }

    #[test]
    fn locals_shadow_fields() {
        let (resolved, out) = run(&[
            OBJECT,
            (
                "A.java",
                "public class A { public A() {} public int x; \
                 public int f() { int x = 1; return x; } }",
            ),
        ]);
        assert!(!out.has_errors(), "{:?}", out.items());
        assert!(
            resolved
                .names
                .values()
                .any(|r| matches!(r.base, NameBase::Local(_)))
        );
    }

    #[test]
    fn field_of_this_is_found_on_the_superclass() {
        let (resolved, out) = run(&[
            OBJECT,
            ("A.java", "public class A { public A() {} public int x; }"),
            (
                "B.java",
                "public class B extends A { public B() {} public int f() { return x; } }",
            ),
        ]);
        assert!(!out.has_errors(), "{:?}", out.items());
        let field = resolved
            .names
            .values()
            .find_map(|r| match r.base {
                NameBase::Field(f) => Some(f),
                NameBase::Local(_) | NameBase::Type(_) => None,
            })
            .expect("field binding");
        assert_eq!(field.owner, TypeId(1));
    }

    #[test]
    fn instance_field_in_static_context_is_rejected() {
        let (_, out) = run(&[
            OBJECT,
            (
                "A.java",
                "public class A { public A() {} public int x; \
                 public static int f() { return x; } }",
            ),
        ]);
        assert!(out.items().iter().any(|d| d.message.contains("static context")));
    }

    #[test]
    fn overlapping_local_declarations_are_rejected() {
        let (_, out) = run(&[
            OBJECT,
            (
                "A.java",
                "public class A { public A() {} \
                 public void f(int a) { int a = 2; } }",
            ),
        ]);
        assert!(out.items().iter().any(|d| d.message.contains("already declared")));
    }

    #[test]
    fn sibling_blocks_may_reuse_names() {
        let (_, out) = run(&[
            OBJECT,
            (
                "A.java",
                "public class A { public A() {} \
                 public void f() { { int a = 1; } { int a = 2; } } }",
            ),
        ]);
        assert!(!out.has_errors(), "{:?}", out.items());
    }

    #[test]
    fn longest_type_prefix_wins_for_static_access() {
        let (resolved, out) = run(&[
            OBJECT,
            ("C.java", "package p.q; public class C { public C() {} public static int v; }"),
            (
                "A.java",
                "public class A { public A() {} public int f() { return p.q.C.v; } }",
            ),
        ]);
        assert!(!out.has_errors(), "{:?}", out.items());
        let reclassified = resolved
            .names
            .values()
            .find(|r| matches!(r.base, NameBase::Type(_)))
            .expect("type binding");
        assert_eq!(reclassified.consumed, 3);
    }

    #[test]
    fn forward_field_reference_is_rejected() {
        let (_, out) = run(&[
            OBJECT,
            ("A.java", "public class A { public A() {} public int a = b; public int b = 2; }"),
        ]);
        assert!(out.items().iter().any(|d| d.message.contains("forward reference")));
    }

    #[test]
    fn bare_type_name_is_not_an_expression() {
        let (_, out) = run(&[
            OBJECT,
            (
                "A.java",
                "public class A { public A() {} public Object f() { return Object; } }",
            ),
        ]);
        assert!(out.items().iter().any(|d| d.message.contains("not an expression")));
    }
}
