//! Post-parse syntactic restrictions the grammar cannot express.
//!
//! Runs on each compilation unit in isolation, before any cross-unit
//! information exists. Keeps reporting within the unit so independent
//! mistakes surface together.

use std::path::Path;

use crate::{
    ast::{
        Block, CompilationUnit, Expr, ExprKind, Literal, Method, Modifiers, Stmt, StmtKind,
        TypeKind, UnaryOp,
    },
    diagnostics::{Diagnostic, Diagnostics, ErrorKind, Span},
};

/// The value `2^31`, valid only as the operand of unary minus.
const INT_MIN_MAGNITUDE: u32 = 2_147_483_648;

/// Weeds one compilation unit.
#[must_use]
pub fn weed(unit: &CompilationUnit) -> Diagnostics {
    let mut w = Weeder {
        file: &unit.file,
        out: Diagnostics::new(),
    };
    w.unit(unit);
    w.out
}

struct Weeder<'a> {
    file: &'a str,
    out: Diagnostics,
}

impl Weeder<'_> {
    fn error(&mut self, span: Span, message: impl Into<String>) {
        self.out
            .push(Diagnostic::error(self.file, span, ErrorKind::Weeder, message));
    }

    fn unit(&mut self, unit: &CompilationUnit) {
        let decl = &unit.decl;

        let stem = Path::new(&unit.file)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        if decl.name.text != stem {
            self.error(
                decl.name.span,
                format!(
                    "{} `{}` must be declared in a file named `{}.java`",
                    decl.kind, decl.name.text, decl.name.text
                ),
            );
        }

        if !decl.modifiers.contains(Modifiers::PUBLIC) {
            self.error(decl.span, format!("{} must be declared public", decl.kind));
        }
        if decl.modifiers.contains(Modifiers::PROTECTED) {
            self.error(decl.span, "top-level declarations may not be protected");
        }
        if decl
            .modifiers
            .contains(Modifiers::ABSTRACT | Modifiers::FINAL)
        {
            self.error(decl.span, "a class may not be both abstract and final");
        }
        if decl.modifiers.intersects(Modifiers::STATIC | Modifiers::NATIVE) {
            self.error(decl.span, "invalid modifier on a top-level declaration");
        }
        if decl.kind == TypeKind::Interface && decl.modifiers.contains(Modifiers::FINAL) {
            self.error(decl.span, "an interface may not be final");
        }

        for field in &decl.fields {
            self.visibility(field.span, field.modifiers, "field");
            if field.modifiers.contains(Modifiers::FINAL) && field.init.is_none() {
                self.error(field.span, format!("final field `{}` lacks an initializer", field.name.text));
            }
            if field
                .modifiers
                .intersects(Modifiers::ABSTRACT | Modifiers::NATIVE)
            {
                self.error(field.span, "invalid modifier on a field");
            }
            if let Some(init) = &field.init {
                self.expr(init);
            }
        }

        for method in &decl.methods {
            self.method(method, decl.kind);
        }

        for ctor in &decl.constructors {
            self.visibility(ctor.span, ctor.modifiers, "constructor");
            if ctor.modifiers.intersects(
                Modifiers::ABSTRACT | Modifiers::STATIC | Modifiers::FINAL | Modifiers::NATIVE,
            ) {
                self.error(ctor.span, "invalid modifier on a constructor");
            }
            self.block(&ctor.body);
        }
    }

    fn visibility(&mut self, span: Span, modifiers: Modifiers, what: &str) {
        if modifiers.contains(Modifiers::PUBLIC | Modifiers::PROTECTED) {
            self.error(span, format!("{what} may not be both public and protected"));
        }
        if !modifiers.intersects(Modifiers::PUBLIC | Modifiers::PROTECTED) {
            self.error(span, format!("{what} must have an access modifier"));
        }
    }

    fn method(&mut self, method: &Method, kind: TypeKind) {
        let m = method.modifiers;
        self.visibility(method.span, m, "method");
        if m.contains(Modifiers::FINAL) {
            self.error(method.span, format!("method `{}` may not be final", method.name.text));
        }
        if m.contains(Modifiers::ABSTRACT)
            && m.intersects(Modifiers::STATIC | Modifiers::NATIVE | Modifiers::FINAL)
        {
            self.error(
                method.span,
                "an abstract method may not be static, final, or native",
            );
        }
        if m.contains(Modifiers::NATIVE) && !m.contains(Modifiers::STATIC) {
            self.error(method.span, "a native method must be static");
        }
        match kind {
            TypeKind::Interface => {
                if m.intersects(Modifiers::STATIC | Modifiers::NATIVE) {
                    self.error(method.span, "invalid modifier on an interface method");
                }
            }
            TypeKind::Class => {
                let body_free = m.intersects(Modifiers::ABSTRACT | Modifiers::NATIVE);
                match (&method.body, body_free) {
                    (Some(_), true) => {
                        self.error(method.span, "an abstract or native method may not have a body");
                    }
                    (None, false) => {
                        self.error(method.span, format!("method `{}` requires a body", method.name.text));
                    }
                    _ => {}
                }
            }
        }
        if let Some(body) = &method.body {
            self.block(body);
        }
    }

    fn block(&mut self, block: &Block) {
        for stmt in &block.statements {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Empty => {}
            StmtKind::Expr(e) | StmtKind::Return(Some(e)) => self.expr(e),
            StmtKind::Return(None) => {}
            StmtKind::Block(b) => self.block(b),
            StmtKind::LocalDecl(decl) => {
                if let Some(init) = &decl.init {
                    self.expr(init);
                }
            }
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
            }
        }
    }

    /// Walks an expression, enforcing the `2^31`-under-minus rule.
    fn expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Unary {
                op: UnaryOp::Minus,
                expr: operand,
            } => {
                // The magnitude of INT_MIN is legal exactly here.
                if !matches!(operand.kind, ExprKind::Literal(Literal::Int(INT_MIN_MAGNITUDE))) {
                    self.expr(operand);
                }
            }
            ExprKind::Literal(Literal::Int(INT_MIN_MAGNITUDE)) => {
                self.error(expr.span, "integer literal 2147483648 out of range");
            }
            ExprKind::Literal(_) | ExprKind::This | ExprKind::Name(_) => {}
            ExprKind::Unary { expr: operand, .. } => self.expr(operand),
            ExprKind::FieldAccess { receiver, .. } => self.expr(receiver),
            ExprKind::ArrayAccess { array, index } => {
                self.expr(array);
                self.expr(index);
            }
            ExprKind::Call { receiver, args, .. } => {
                if let Some(receiver) = receiver {
                    self.expr(receiver);
                }
                for arg in args {
                    self.expr(arg);
                }
            }
            ExprKind::New { args, .. } => {
                for arg in args {
                    self.expr(arg);
                }
            }
            ExprKind::NewArray { length, .. } => self.expr(length),
            ExprKind::Cast { expr: operand, .. } | ExprKind::InstanceOf { expr: operand, .. } => {
                self.expr(operand);
            }
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
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{ast::NodeIdGen, syntax};

    fn weed_src(file: &str, text: &str) -> Diagnostics {
        let mut ids = NodeIdGen::new();
        let unit = syntax::parse_source(file, text, &mut ids).expect("parse");
        weed(&unit)
    }

    fn messages(d: &Diagnostics) -> Vec<String> {
        d.items().iter().map(|d| d.message.clone()).collect()
    }

    #[test]
    fn accepts_a_well_formed_class() {
        let d = weed_src(
            "A.java",
            "public class A { public A() {} public static int test() { return 123; } }",
        );
        assert!(d.is_empty(), "{:?}", messages(&d));
    }

    #[test]
    fn class_name_must_match_file_name() {
        let d = weed_src("B.java", "public class A { public A() {} }");
        assert!(d.has_errors());
    }

    #[test]
    fn rejects_final_methods() {
        let d = weed_src(
            "A.java",
            "public class A { public A() {} public final int f() { return 0; } }",
        );
        assert!(messages(&d).iter().any(|m| m.contains("final")));
    }

    #[test]
    fn rejects_abstract_static_combination() {
        let d = weed_src(
            "A.java",
            "public abstract class A { public A() {} public abstract static int f(); }",
        );
        assert!(d.has_errors());
    }

    #[test]
    fn rejects_native_instance_method() {
        let d = weed_src(
            "A.java",
            "public class A { public A() {} public native int f(); }",
        );
        assert!(messages(&d).iter().any(|m| m.contains("native")));
    }

    #[test]
    fn final_field_requires_initializer() {
        let d = weed_src("A.java", "public class A { public A() {} public final int f; }");
        assert!(messages(&d).iter().any(|m| m.contains("initializer")));
    }

    #[test]
    fn int_min_magnitude_requires_unary_minus() {
        let ok = weed_src(
            "A.java",
            "public class A { public A() {} public int f() { return -2147483648; } }",
        );
        assert!(ok.is_empty(), "{:?}", messages(&ok));

        // The parenthesized form is rejected during parsing, since parens
        // break the required adjacency.
        let mut ids = NodeIdGen::new();
        let err = syntax::parse_source(
            "A.java",
            "public class A { public A() {} public int f() { return -(2147483648); } }",
            &mut ids,
        )
        .expect_err("expected rejection");
        assert_eq!(err.kind, crate::diagnostics::ErrorKind::Weeder);
    }
}
