//! Definite assignment analysis.
//!
//! Tracks, at each point, the set of local slots assigned on every path.
//! Joins intersect; a loop body's assignments are not assumed on exit; a
//! statement that cannot complete (a `return`, an infinite loop)
//! contributes the top element so that `if (c) return; else x = 1;`
//! leaves `x` assigned.

use std::collections::BTreeSet;

use crate::{
    analysis::const_fold::{ConstValue, Constants},
    ast::{Block, CompilationUnit, Expr, ExprKind, Stmt, StmtKind},
    diagnostics::{Diagnostic, Diagnostics, ErrorKind},
    semantics::{NameBase, Resolved},
};

/// The set of definitely-assigned slots, with `Top` standing for
/// "unreachable, everything assigned".
#[derive(Debug, Clone, PartialEq, Eq)]
enum Flow {
    Live(BTreeSet<u32>),
    Top,
}

impl Flow {
    fn assign(&mut self, slot: u32) {
        if let Flow::Live(set) = self {
            set.insert(slot);
        }
    }

    fn contains(&self, slot: u32) -> bool {
        match self {
            Flow::Live(set) => set.contains(&slot),
            Flow::Top => true,
        }
    }

    fn meet(self, other: Flow) -> Flow {
        match (self, other) {
            (Flow::Top, flow) | (flow, Flow::Top) => flow,
            (Flow::Live(a), Flow::Live(b)) => Flow::Live(a.intersection(&b).copied().collect()),
        }
    }

    fn remove_all(&mut self, slots: &[u32]) {
        if let Flow::Live(set) = self {
            for slot in slots {
                set.remove(slot);
            }
        }
    }
}

/// Checks every body of the program.
#[must_use]
pub fn analyze(
    units: &[CompilationUnit],
    resolved: &Resolved,
    constants: &Constants,
) -> Diagnostics {
    let mut analysis = Analysis {
        resolved,
        constants,
        out: Diagnostics::new(),
        file: String::new(),
    };

    for unit in units {
        analysis.file = unit.file.clone();
        for field in &unit.decl.fields {
            if let Some(init) = &field.init {
                let mut flow = Flow::Live(BTreeSet::new());
                analysis.expr(init, &mut flow);
            }
        }
        for method in &unit.decl.methods {
            if let Some(body) = &method.body {
                let mut flow = analysis.entry(&method.params);
                analysis.block(body, &mut flow);
            }
        }
        for ctor in &unit.decl.constructors {
            let mut flow = analysis.entry(&ctor.params);
            analysis.block(&ctor.body, &mut flow);
        }
    }

    analysis.out
}

struct Analysis<'a> {
    resolved: &'a Resolved,
    constants: &'a Constants,
    out: Diagnostics,
    file: String,
}

impl Analysis<'_> {
    fn entry(&self, params: &[crate::ast::Param]) -> Flow {
        let assigned = params
            .iter()
            .filter_map(|p| self.resolved.slots.get(&p.id).copied())
            .collect();
        Flow::Live(assigned)
    }

    fn const_cond(&self, cond: &Expr) -> Option<bool> {
        self.constants.of(cond.id).and_then(ConstValue::as_bool)
    }

    /// Walks a block; `flow` is updated in place. Returns the slots the
    /// block declared, already removed from `flow` (they went out of
    /// scope, and their frame slots are reused by sibling blocks).
    fn block(&mut self, block: &Block, flow: &mut Flow) {
        let mut declared = Vec::new();
        for stmt in &block.statements {
            self.stmt(stmt, flow, &mut declared);
        }
        flow.remove_all(&declared);
    }

    fn stmt(&mut self, stmt: &Stmt, flow: &mut Flow, declared: &mut Vec<u32>) {
        match &stmt.kind {
            StmtKind::Empty => {}
            StmtKind::Expr(e) => self.expr(e, flow),
            StmtKind::Block(b) => self.block(b, flow),
            StmtKind::LocalDecl(decl) => {
                if let Some(&slot) = self.resolved.slots.get(&decl.id) {
                    declared.push(slot);
                    if let Some(init) = &decl.init {
                        self.expr(init, flow);
                        flow.assign(slot);
                    }
                }
            }
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.expr(value, flow);
                }
                *flow = Flow::Top;
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.expr(cond, flow);
                let mut then_flow = flow.clone();
                let mut ignored = Vec::new();
                self.stmt(then_branch, &mut then_flow, &mut ignored);
                then_flow.remove_all(&ignored);
                match else_branch {
                    Some(els) => {
                        let mut else_flow = flow.clone();
                        let mut ignored = Vec::new();
                        self.stmt(els, &mut else_flow, &mut ignored);
                        else_flow.remove_all(&ignored);
                        *flow = then_flow.meet(else_flow);
                    }
                    None => *flow = flow.clone().meet(then_flow),
                }
            }
            StmtKind::While { cond, body } => {
                self.expr(cond, flow);
                let mut body_flow = flow.clone();
                let mut ignored = Vec::new();
                self.stmt(body, &mut body_flow, &mut ignored);
                if self.const_cond(cond) == Some(true) {
                    *flow = Flow::Top;
                }
            }
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => {
                let mut loop_declared = Vec::new();
                if let Some(init) = init {
                    self.stmt(init, flow, &mut loop_declared);
                }
                if let Some(cond) = cond {
                    self.expr(cond, flow);
                }
                let mut body_flow = flow.clone();
                let mut ignored = Vec::new();
                self.stmt(body, &mut body_flow, &mut ignored);
                if let Some(update) = update {
                    self.expr(update, &mut body_flow);
                }
                let diverges = cond.as_ref().map_or(true, |c| self.const_cond(c) == Some(true));
                if diverges {
                    *flow = Flow::Top;
                }
                flow.remove_all(&loop_declared);
            }
        }
    }

    /// Walks an expression, checking local reads and recording assignment
    /// effects. Short-circuit right-hand sides and other conditionally
    /// evaluated subexpressions are checked against a discarded copy.
    fn expr(&mut self, expr: &Expr, flow: &mut Flow) {
        match &expr.kind {
            ExprKind::Literal(_) | ExprKind::This => {}
            ExprKind::Name(name) => {
                if let Some(binding) = self.resolved.names.get(&name.id) {
                    if let NameBase::Local(slot) = binding.base {
                        if !flow.contains(slot) {
                            self.out.push(Diagnostic::error(
                                &self.file,
                                name.span,
                                ErrorKind::DefiniteAssignment,
                                format!(
                                    "`{}` may not have been assigned",
                                    name.segments[0].text
                                ),
                            ));
                        }
                    }
                }
            }
            ExprKind::FieldAccess { receiver, .. } => self.expr(receiver, flow),
            ExprKind::ArrayAccess { array, index } => {
                self.expr(array, flow);
                self.expr(index, flow);
            }
            ExprKind::Call { receiver, args, .. } => {
                if let Some(receiver) = receiver {
                    self.expr(receiver, flow);
                }
                for arg in args {
                    self.expr(arg, flow);
                }
            }
            ExprKind::New { args, .. } => {
                for arg in args {
                    self.expr(arg, flow);
                }
            }
            ExprKind::NewArray { length, .. } => self.expr(length, flow),
            ExprKind::Cast { expr: operand, .. }
            | ExprKind::InstanceOf { expr: operand, .. }
            | ExprKind::Unary { expr: operand, .. } => self.expr(operand, flow),
            ExprKind::Binary { op, lhs, rhs } => {
                self.expr(lhs, flow);
                if matches!(op, crate::ast::BinaryOp::AndAnd | crate::ast::BinaryOp::OrOr) {
                    let mut rhs_flow = flow.clone();
                    self.expr(rhs, &mut rhs_flow);
                } else {
                    self.expr(rhs, flow);
                }
            }
            ExprKind::Assign { target, value } => {
                // Subexpressions of the target are evaluated, but the
                // target's own slot is a write, not a read.
                match &target.kind {
                    ExprKind::Name(name) if name.segments.len() == 1 => {
                        if let Some(binding) = self.resolved.names.get(&name.id) {
                            self.expr(value, flow);
                            if let NameBase::Local(slot) = binding.base {
                                flow.assign(slot);
                            }
                            return;
                        }
                    }
                    ExprKind::ArrayAccess { array, index } => {
                        self.expr(array, flow);
                        self.expr(index, flow);
                    }
                    ExprKind::FieldAccess { receiver, .. } => self.expr(receiver, flow),
                    _ => self.expr(target, flow),
                }
                self.expr(value, flow);
            }
        }
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
        analyze(&units, &resolved, &constants)
    }

    #[test]
    fn read_before_assignment_is_rejected() {
        let out = run("public static int test() { int x; return x; }");
        assert!(out.has_errors());
        assert_eq!(out.items()[0].kind, ErrorKind::DefiniteAssignment);
    }

    #[test]
    fn initializers_and_parameters_count() {
        let out = run("public int f(int p) { int x = p + 1; return x; }");
        assert!(out.is_empty(), "{:?}", out.items());
    }

    #[test]
    fn both_branches_must_assign() {
        let out = run(
            "public int f(boolean b) { int x; if (b) { x = 1; } return x; }",
        );
        assert!(out.has_errors());

        let ok = run(
            "public int f(boolean b) { int x; if (b) { x = 1; } else { x = 2; } return x; }",
        );
        assert!(ok.is_empty(), "{:?}", ok.items());
    }

    #[test]
    fn returning_branch_contributes_top() {
        let out = run(
            "public int f(boolean b) { int x; if (b) { return 0; } else { x = 2; } return x; }",
        );
        assert!(out.is_empty(), "{:?}", out.items());
    }

    #[test]
    fn loop_body_assignment_is_not_assumed() {
        let out = run(
            "public int f(boolean b) { int x; while (b) { x = 1; } return x; }",
        );
        assert!(out.has_errors());
    }

    #[test]
    fn short_circuit_rhs_assignments_do_not_escape() {
        let out = run(
            "public boolean g(int v) { return v > 0; } \
             public int f(int v) { int x; boolean ok = v > 0 && g(x = v); return x; }",
        );
        assert!(out.has_errors());
    }

    #[test]
    fn sibling_blocks_do_not_leak_slots() {
        let out = run(
            "public int f() { { int a = 1; } int b; { return b; } }",
        );
        assert!(out.has_errors());
    }
}
