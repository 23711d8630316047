//! Compile-time evaluation of constant expressions.
//!
//! Folds literals, unary `-`/`!`, binary operators over constant operands
//! (including string concatenation), primitive casts, and `static final`
//! fields whose initializers are themselves constant. Results feed the
//! reachability pass and the code generator.

use std::collections::{HashMap, HashSet};

use crate::{
    ast::{
        BinaryOp, Block, CompilationUnit, Expr, ExprKind, Literal, Modifiers, NodeId, Stmt,
        StmtKind, UnaryOp,
    },
    semantics::{ClassTable, FieldId, NameBase, Resolved},
    semantics::typeck::{FieldUse, Typed},
    types::{PrimitiveKind, Type},
};

/// A compile-time value.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum ConstValue {
    /// An `int`-domain value (covers byte, short, and int).
    #[display("{_0}")]
    Int(i32),
    /// A `boolean` value.
    #[display("{_0}")]
    Bool(bool),
    /// A `char` value.
    #[display("'{_0}'")]
    Char(char),
    /// A `String` value.
    #[display("{_0:?}")]
    Str(String),
}

impl ConstValue {
    /// The numeric value after unary promotion, if the constant is numeric.
    #[must_use]
    pub fn as_int(&self) -> Option<i32> {
        match self {
            ConstValue::Int(v) => Some(*v),
            ConstValue::Char(c) => i32::try_from(u32::from(*c)).ok(),
            ConstValue::Bool(_) | ConstValue::Str(_) => None,
        }
    }

    /// The boolean value, if the constant is boolean.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConstValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The text the value contributes to a string concatenation.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            ConstValue::Int(v) => v.to_string(),
            ConstValue::Bool(b) => b.to_string(),
            ConstValue::Char(c) => c.to_string(),
            ConstValue::Str(s) => s.clone(),
        }
    }
}

/// The folding results.
#[derive(Debug, Default)]
pub struct Constants {
    /// Constant value per expression node.
    pub exprs: HashMap<NodeId, ConstValue>,
    /// Constant value per `static final` field with a constant initializer.
    pub fields: HashMap<FieldId, ConstValue>,
}

impl Constants {
    /// The constant value of an expression, if the folder proved one.
    #[must_use]
    pub fn of(&self, id: NodeId) -> Option<&ConstValue> {
        self.exprs.get(&id)
    }
}

/// Folds every body in the program.
#[must_use]
pub fn fold(
    units: &[CompilationUnit],
    table: &ClassTable,
    resolved: &Resolved,
    typed: &Typed,
) -> Constants {
    let mut folder = Folder {
        units,
        table,
        resolved,
        typed,
        constants: Constants::default(),
        in_progress: HashSet::new(),
    };
    for unit in units {
        for field in &unit.decl.fields {
            if let Some(init) = &field.init {
                folder.expr(init);
            }
        }
        for method in &unit.decl.methods {
            if let Some(body) = &method.body {
                folder.block(body);
            }
        }
        for ctor in &unit.decl.constructors {
            folder.block(&ctor.body);
        }
    }
    folder.constants
}

struct Folder<'a> {
    units: &'a [CompilationUnit],
    table: &'a ClassTable,
    resolved: &'a Resolved,
    typed: &'a Typed,
    constants: Constants,
    /// Guards against initializer cycles across classes; a field on the
    /// stack is simply not a constant.
    in_progress: HashSet<FieldId>,
}

impl Folder<'_> {
    fn block(&mut self, block: &Block) {
        for stmt in &block.statements {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Empty | StmtKind::Return(None) => {}
            StmtKind::Expr(e) | StmtKind::Return(Some(e)) => {
                self.expr(e);
            }
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

    fn expr(&mut self, expr: &Expr) -> Option<ConstValue> {
        if let Some(done) = self.constants.exprs.get(&expr.id) {
            return Some(done.clone());
        }
        let value = self.expr_inner(expr)?;
        self.constants.exprs.insert(expr.id, value.clone());
        Some(value)
    }

    fn expr_inner(&mut self, expr: &Expr) -> Option<ConstValue> {
        match &expr.kind {
            ExprKind::Literal(lit) => match lit {
                Literal::Int(v) => Some(ConstValue::Int(i32::try_from(*v).ok()?)),
                Literal::Bool(b) => Some(ConstValue::Bool(*b)),
                Literal::Char(c) => Some(ConstValue::Char(*c)),
                Literal::String(s) => Some(ConstValue::Str(s.clone())),
                Literal::Null => None,
            },
            ExprKind::Unary { op, expr: operand } => {
                // The INT_MIN magnitude is only representable under minus.
                if let (UnaryOp::Minus, ExprKind::Literal(Literal::Int(2_147_483_648))) =
                    (op, &operand.kind)
                {
                    return Some(ConstValue::Int(i32::MIN));
                }
                let value = self.expr(operand)?;
                match op {
                    UnaryOp::Minus => Some(ConstValue::Int(value.as_int()?.wrapping_neg())),
                    UnaryOp::Not => Some(ConstValue::Bool(!value.as_bool()?)),
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs_value = self.expr(lhs);
                let rhs_value = self.expr(rhs);
                self.binary(*op, lhs_value?, rhs_value?)
            }
            ExprKind::Cast { expr: operand, .. } => {
                let value = self.expr(operand)?;
                match self.typed.expr_types.get(&expr.id)? {
                    Type::Primitive(PrimitiveKind::Int) => Some(ConstValue::Int(value.as_int()?)),
                    Type::Primitive(PrimitiveKind::Byte) => {
                        #[allow(clippy::cast_possible_truncation)]
                        Some(ConstValue::Int(i32::from(value.as_int()? as i8)))
                    }
                    Type::Primitive(PrimitiveKind::Short) => {
                        #[allow(clippy::cast_possible_truncation)]
                        Some(ConstValue::Int(i32::from(value.as_int()? as i16)))
                    }
                    Type::Primitive(PrimitiveKind::Char) => {
                        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                        let code = value.as_int()? as u16;
                        Some(ConstValue::Char(char::from_u32(u32::from(code))?))
                    }
                    Type::Primitive(PrimitiveKind::Boolean) => value.as_bool().map(ConstValue::Bool),
                    ty if matches!(value, ConstValue::Str(_)) => {
                        // A cast of a constant string to String is constant.
                        let is_string = matches!(
                            ty,
                            Type::Reference(id)
                                if self.table.get(*id).canonical == "java.lang.String"
                        );
                        is_string.then_some(value)
                    }
                    _ => None,
                }
            }
            ExprKind::Name(name) => {
                let binding = self.resolved.names.get(&name.id)?;
                let field = match (binding.base, name.segments.len()) {
                    (NameBase::Field(field), 1) => field,
                    (NameBase::Type(_), n) if n == binding.consumed + 1 => {
                        match self.typed.name_fields.get(&name.id)?.first()? {
                            FieldUse::Declared { field, .. } => *field,
                            FieldUse::ArrayLength => return None,
                        }
                    }
                    _ => return None,
                };
                self.field_const(field)
            }
            // Evaluation may still need the operands folded for codegen.
            ExprKind::FieldAccess { receiver, .. } => {
                self.expr(receiver);
                None
            }
            ExprKind::ArrayAccess { array, index } => {
                self.expr(array);
                self.expr(index);
                None
            }
            ExprKind::Call { receiver, args, .. } => {
                if let Some(receiver) = receiver {
                    self.expr(receiver);
                }
                for arg in args {
                    self.expr(arg);
                }
                None
            }
            ExprKind::New { args, .. } => {
                for arg in args {
                    self.expr(arg);
                }
                None
            }
            ExprKind::NewArray { length, .. } => {
                self.expr(length);
                None
            }
            ExprKind::InstanceOf { expr: operand, .. } => {
                self.expr(operand);
                None
            }
            ExprKind::Assign { target, value } => {
                self.expr(target);
                self.expr(value);
                None
            }
            ExprKind::This => None,
        }
    }

    fn binary(&self, op: BinaryOp, lhs: ConstValue, rhs: ConstValue) -> Option<ConstValue> {
        use BinaryOp::*;
        if op == Add && (matches!(lhs, ConstValue::Str(_)) || matches!(rhs, ConstValue::Str(_))) {
            return Some(ConstValue::Str(format!("{}{}", lhs.to_text(), rhs.to_text())));
        }
        match op {
            Add | Sub | Mul | Div | Rem => {
                let (a, b) = (lhs.as_int()?, rhs.as_int()?);
                let value = match op {
                    Add => a.wrapping_add(b),
                    Sub => a.wrapping_sub(b),
                    Mul => a.wrapping_mul(b),
                    Div | Rem if b == 0 => return None,
                    Div => a.wrapping_div(b),
                    Rem => a.wrapping_rem(b),
                    _ => unreachable!(),
                };
                Some(ConstValue::Int(value))
            }
            Lt | Le | Gt | Ge => {
                let (a, b) = (lhs.as_int()?, rhs.as_int()?);
                let value = match op {
                    Lt => a < b,
                    Le => a <= b,
                    Gt => a > b,
                    Ge => a >= b,
                    _ => unreachable!(),
                };
                Some(ConstValue::Bool(value))
            }
            Eq | Ne => {
                let equal = match (&lhs, &rhs) {
                    (ConstValue::Bool(a), ConstValue::Bool(b)) => a == b,
                    _ => lhs.as_int()? == rhs.as_int()?,
                };
                Some(ConstValue::Bool(if op == Eq { equal } else { !equal }))
            }
            And | AndAnd => Some(ConstValue::Bool(lhs.as_bool()? && rhs.as_bool()?)),
            Or | OrOr => Some(ConstValue::Bool(lhs.as_bool()? || rhs.as_bool()?)),
        }
    }

    /// The constant value of a `static final` field with a constant
    /// initializer, evaluated on demand and memoized.
    fn field_const(&mut self, field: FieldId) -> Option<ConstValue> {
        if let Some(done) = self.constants.fields.get(&field) {
            return Some(done.clone());
        }
        let info = &self.table.get(field.owner).fields[field.index as usize];
        if !info.modifiers.contains(Modifiers::STATIC | Modifiers::FINAL) {
            return None;
        }
        if !self.in_progress.insert(field) {
            return None;
        }
        let init = self.units[field.owner.index()].decl.fields[field.index as usize]
            .init
            .as_ref();
        let value = init.and_then(|init| self.expr(init));
        self.in_progress.remove(&field);
        if let Some(value) = &value {
            self.constants.fields.insert(field, value.clone());
        }
        value
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
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

    fn fold_program(sources: &[(&str, &str)]) -> Constants {
        let mut ids = NodeIdGen::new();
        let units: Vec<_> = sources
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
        fold(&units, &table, &resolved, &typed)
    }

    fn folded_ints(constants: &Constants) -> Vec<i32> {
        let mut values: Vec<i32> = constants
            .exprs
            .values()
            .filter_map(ConstValue::as_int)
            .collect();
        values.sort_unstable();
        values.dedup();
        values
    }

    #[test]
    fn arithmetic_folds_with_wrapping() {
        let constants = fold_program(&[
            OBJECT,
            STRING,
            (
                "A.java",
                "public class A { public A() {} \
                 public int f() { return 6 * 7 + 2147483647 + 1; } }",
            ),
        ]);
        // 6*7 = 42; 42 + INT_MAX wraps; + 1 lands on INT_MIN + 42.
        assert!(folded_ints(&constants).contains(&(i32::MIN + 42)));
    }

    #[test]
    fn negated_int_min_folds() {
        let constants = fold_program(&[
            OBJECT,
            STRING,
            (
                "A.java",
                "public class A { public A() {} public int f() { return -2147483648; } }",
            ),
        ]);
        assert!(folded_ints(&constants).contains(&i32::MIN));
    }

    #[test]
    fn division_by_zero_is_not_constant() {
        let constants = fold_program(&[
            OBJECT,
            STRING,
            (
                "A.java",
                "public class A { public A() {} public int f() { return 1 / 0; } }",
            ),
        ]);
        assert!(!folded_ints(&constants).iter().any(|v| *v > 100_000));
        // Only the operand literals fold, never the division.
        assert_eq!(folded_ints(&constants), vec![0, 1]);
    }

    #[test]
    fn static_final_fields_propagate() {
        let constants = fold_program(&[
            OBJECT,
            STRING,
            (
                "K.java",
                "public class K { public K() {} public static final int WIDTH = 8 * 5; }",
            ),
            (
                "A.java",
                "public class A { public A() {} public int f() { return K.WIDTH + 2; } }",
            ),
        ]);
        assert!(folded_ints(&constants).contains(&42));
    }

    #[test]
    fn string_concatenation_folds() {
        let constants = fold_program(&[
            OBJECT,
            STRING,
            (
                "A.java",
                "public class A { public A() {} \
                 public String f() { return \"n=\" + (40 + 2); } }",
            ),
        ]);
        assert!(
            constants
                .exprs
                .values()
                .any(|v| *v == ConstValue::Str("n=42".to_string()))
        );
    }

    #[test]
    fn narrowing_casts_truncate() {
        let constants = fold_program(&[
            OBJECT,
            STRING,
            (
                "A.java",
                "public class A { public A() {} public int f() { return (byte) 257; } }",
            ),
        ]);
        assert!(folded_ints(&constants).contains(&1));
    }
}
