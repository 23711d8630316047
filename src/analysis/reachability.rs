//! Reachability and normal-completion analysis.
//!
//! Every statement receives an *in* flag and a *completes normally* flag.
//! Constant conditions are folded into the rules, so `while (true)` makes
//! its successors unreachable and `if (false)` hides its branch. Joos has
//! no `break`, which collapses the usual loop escape analysis.
//!
//! Unreachable statements are reported as warnings; a non-void method body
//! that can complete normally is an error.

use std::collections::HashMap;

use crate::{
    analysis::const_fold::{ConstValue, Constants},
    ast::{Block, CompilationUnit, Expr, NodeId, Stmt, StmtKind},
    diagnostics::{Diagnostic, Diagnostics, ErrorKind},
    semantics::ClassTable,
    types::Type,
};

/// The analyser-assigned flags of one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StmtFlags {
    /// Whether the statement can be reached.
    pub reachable: bool,
    /// Whether execution can fall through past the statement.
    pub completes_normally: bool,
}

/// The reachability tables.
#[derive(Debug, Default)]
pub struct Reachability {
    /// Flags per statement node.
    pub flags: HashMap<NodeId, StmtFlags>,
}

/// Analyzes every body, recording flags and reporting findings.
#[must_use]
pub fn analyze(
    units: &[CompilationUnit],
    table: &ClassTable,
    constants: &Constants,
) -> (Reachability, Diagnostics) {
    let mut analysis = Analysis {
        constants,
        out: Diagnostics::new(),
        flags: HashMap::new(),
        file: String::new(),
    };

    for (i, unit) in units.iter().enumerate() {
        analysis.file = unit.file.clone();
        let info = &table.classes[i];
        for (mi, method) in unit.decl.methods.iter().enumerate() {
            if let Some(body) = &method.body {
                let completes = analysis.block(body, true);
                if completes && info.methods[mi].return_type != Type::Void {
                    analysis.out.push(Diagnostic::error(
                        &unit.file,
                        method.span,
                        ErrorKind::Reachability,
                        format!("method `{}` can complete without returning a value", method.name.text),
                    ));
                }
            }
        }
        for ctor in &unit.decl.constructors {
            analysis.block(&ctor.body, true);
        }
    }

    (Reachability { flags: analysis.flags }, analysis.out)
}

struct Analysis<'a> {
    constants: &'a Constants,
    out: Diagnostics,
    flags: HashMap<NodeId, StmtFlags>,
    file: String,
}

impl Analysis<'_> {
    fn const_cond(&self, cond: &Expr) -> Option<bool> {
        self.constants.of(cond.id).and_then(ConstValue::as_bool)
    }

    /// Analyzes a statement sequence; returns whether it completes normally.
    fn block(&mut self, block: &Block, mut reachable: bool) -> bool {
        let mut warned = false;
        for stmt in &block.statements {
            if !reachable && !warned {
                self.out.push(Diagnostic::warning(
                    &self.file,
                    stmt.span,
                    ErrorKind::Reachability,
                    "unreachable statement",
                ));
                warned = true;
            }
            reachable = self.stmt(stmt, reachable);
        }
        reachable
    }

    /// Analyzes one statement; returns whether it completes normally.
    /// An unreachable statement never completes.
    fn stmt(&mut self, stmt: &Stmt, reachable: bool) -> bool {
        let completes = match &stmt.kind {
            StmtKind::Empty | StmtKind::Expr(_) | StmtKind::LocalDecl(_) => reachable,
            StmtKind::Block(b) => self.block(b, reachable),
            StmtKind::Return(_) => false,
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => match (self.const_cond(cond), else_branch) {
                (Some(true), els) => {
                    let then_completes = self.stmt(then_branch, reachable);
                    if let Some(els) = els {
                        self.warn_unreachable(els);
                        self.stmt(els, false);
                    }
                    then_completes
                }
                (Some(false), els) => {
                    self.warn_unreachable(then_branch);
                    self.stmt(then_branch, false);
                    match els {
                        Some(els) => self.stmt(els, reachable),
                        None => reachable,
                    }
                }
                (None, Some(els)) => {
                    let then_completes = self.stmt(then_branch, reachable);
                    let else_completes = self.stmt(els, reachable);
                    then_completes || else_completes
                }
                (None, None) => {
                    self.stmt(then_branch, reachable);
                    reachable
                }
            },
            StmtKind::While { cond, body } => match self.const_cond(cond) {
                Some(true) => {
                    self.stmt(body, reachable);
                    false
                }
                Some(false) => {
                    self.warn_unreachable(body);
                    self.stmt(body, false);
                    reachable
                }
                None => {
                    self.stmt(body, reachable);
                    reachable
                }
            },
            StmtKind::For {
                init, cond, body, ..
            } => {
                if let Some(init) = init {
                    self.stmt(init, reachable);
                }
                match cond.as_ref().map_or(Some(true), |c| self.const_cond(c)) {
                    Some(true) => {
                        self.stmt(body, reachable);
                        false
                    }
                    Some(false) => {
                        self.warn_unreachable(body);
                        self.stmt(body, false);
                        reachable
                    }
                    None => {
                        self.stmt(body, reachable);
                        reachable
                    }
                }
            }
        };
        let completes = completes && reachable;
        self.flags.insert(
            stmt.id,
            StmtFlags {
                reachable,
                completes_normally: completes,
            },
        );
        completes
    }

    fn warn_unreachable(&mut self, stmt: &Stmt) {
        self.out.push(Diagnostic::warning(
            &self.file,
            stmt.span,
            ErrorKind::Reachability,
            "unreachable statement",
        ));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        analysis::const_fold,
        ast::NodeIdGen,
        semantics::{declare, hierarchy, resolve, type_index::TypeIndex, typeck},
        syntax,
    };

    const OBJECT: (&str, &str) =
        ("Object.java", "package java.lang; public class Object { public Object() {} }");
    const STRING: (&str, &str) = (
        "String.java",
        "package java.lang; public class String { public String() {} }",
    );

    fn run(body: &str) -> Diagnostics {
        let source = format!("public class A {{ public A() {{}} {body} }}");
        let mut ids = NodeIdGen::new();
        let units: Vec<_> = [OBJECT, STRING, ("A.java", source.as_str())]
            .iter()
            .map(|(file, text)| syntax::parse_source(file, text, &mut ids).expect("parse"))
            .collect();
        let (index, _) = TypeIndex::build(&units);
        let (table, _) = declare::link(&units, &index);
        let (h, _) = hierarchy::check(&table);
        let (resolved, d) = resolve::resolve(&units, &table, &index);
        assert!(!d.has_errors(), "{:?}", d.items());
        let (typed, d) = typeck::check(&units, &table, &h, &resolved).expect("typeck");
        assert!(!d.has_errors(), "{:?}", d.items());
        let constants = const_fold::fold(&units, &table, &resolved, &typed);
        analyze(&units, &table, &constants).1
    }

    #[test]
    fn code_after_return_is_unreachable() {
        let out = run("public static int test() { if (true) return 1; return 2; }");
        assert!(!out.has_errors());
        assert!(out.items().iter().any(|d| d.message == "unreachable statement"));
    }

    #[test]
    fn branching_returns_are_clean() {
        let out = run("public int f(boolean b) { if (b) { return 1; } else { return 2; } }");
        assert!(out.is_empty(), "{:?}", out.items());
    }

    #[test]
    fn missing_return_is_an_error() {
        let out = run("public int f(boolean b) { if (b) { return 1; } }");
        assert!(out.has_errors());
        assert!(out.items().iter().any(|d| d.message.contains("without returning")));
    }

    #[test]
    fn while_true_satisfies_return_requirements() {
        let out = run("public int f() { while (true) { } }");
        assert!(out.is_empty(), "{:?}", out.items());
    }

    #[test]
    fn while_false_body_is_unreachable() {
        let out = run("public void f() { while (false) { f(); } }");
        assert!(!out.has_errors());
        assert!(out.items().iter().any(|d| d.message == "unreachable statement"));
    }

    #[test]
    fn statements_after_an_infinite_loop_are_unreachable() {
        let out = run("public void f() { while (true) { } return; }");
        assert!(out.items().iter().any(|d| d.message == "unreachable statement"));
    }
}
