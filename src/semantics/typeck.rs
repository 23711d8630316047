//! The type checker: assigns a static type to every expression,
//! resolves overloads and constructors, and enforces assignability, cast,
//! and access rules.
//!
//! Runs only on programs the earlier passes accepted, so missing table
//! entries are internal errors, never user errors.

use std::collections::HashMap;

use crate::{
    ast::{
        Block, CompilationUnit, Expr, ExprKind, Literal, Modifiers, Name, NodeId, Stmt, StmtKind,
        TypeExpr, UnaryOp,
    },
    diagnostics::{Diagnostic, Diagnostics, ErrorKind, InternalError, Span, internal_error},
    semantics::{
        ClassTable, FieldId, MethodId, NameBase, Resolved, TypeId,
        hierarchy::{Hierarchy, Member},
    },
    types::{Subtyping, Type, assignable, binary_numeric_promotion, castable},
};

/// One resolved field access step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldUse {
    /// A declared field.
    Declared {
        /// The declaring type and index.
        field: FieldId,
        /// Whether the field is `static`.
        is_static: bool,
    },
    /// The `length` pseudo-field of arrays.
    ArrayLength,
}

/// A resolved method invocation target.
#[derive(Debug, Clone, Copy)]
pub struct CallTarget {
    /// The chosen declaration.
    pub method: MethodId,
    /// Whether the call is static (direct) rather than dispatched.
    pub is_static: bool,
}

/// The type checker's output tables.
#[derive(Debug, Default)]
pub struct Typed {
    /// The unique type of every expression.
    pub expr_types: HashMap<NodeId, Type>,
    /// The field-access suffix chain of each dotted name, covering the
    /// segments the resolver did not consume.
    pub name_fields: HashMap<NodeId, Vec<FieldUse>>,
    /// The resolved field of each explicit field-access expression.
    pub field_uses: HashMap<NodeId, FieldUse>,
    /// The overload chosen for each invocation expression.
    pub calls: HashMap<NodeId, CallTarget>,
    /// The constructor chosen for each `new` expression.
    pub ctor_calls: HashMap<NodeId, MethodId>,
}

/// Type-checks every body in the program.
///
/// # Errors
///
/// Returns [`InternalError`] only on inconsistencies the earlier passes
/// should have ruled out; user-level findings go into the diagnostics.
pub fn check(
    units: &[CompilationUnit],
    table: &ClassTable,
    hierarchy: &Hierarchy,
    resolved: &Resolved,
) -> Result<(Typed, Diagnostics), InternalError> {
    let mut checker = Checker {
        table,
        hierarchy,
        resolved,
        string: table
            .iter()
            .find(|c| c.canonical == "java.lang.String")
            .map(|c| c.id),
        out: Diagnostics::new(),
        typed: Typed::default(),
        file: String::new(),
        class: TypeId(0),
        static_ctx: false,
        return_type: Type::Void,
        slot_types: HashMap::new(),
    };

    for (i, unit) in units.iter().enumerate() {
        checker.file = unit.file.clone();
        checker.class = TypeId(u32::try_from(i).unwrap_or(u32::MAX));
        let info = table.get(checker.class);

        for (fi, field) in unit.decl.fields.iter().enumerate() {
            if let Some(init) = &field.init {
                checker.static_ctx = field.modifiers.contains(Modifiers::STATIC);
                checker.slot_types.clear();
                let expected = info.fields[fi].ty.clone();
                if let Some(found) = checker.expr(init)? {
                    checker.require_assignable(&found, &expected, init.span);
                }
            }
        }
        for (mi, method) in unit.decl.methods.iter().enumerate() {
            if let Some(body) = &method.body {
                let signature = &info.methods[mi];
                checker.static_ctx = signature.is_static();
                checker.return_type = signature.return_type.clone();
                checker.slot_types.clear();
                checker.bind_params(&method.params, &signature.params)?;
                checker.block(body)?;
            }
        }
        for (ci, ctor) in unit.decl.constructors.iter().enumerate() {
            let signature = &info.constructors[ci];
            checker.static_ctx = false;
            checker.return_type = Type::Void;
            checker.slot_types.clear();
            checker.bind_params(&ctor.params, &signature.params)?;
            checker.block(&ctor.body)?;
        }

        // The implicit super() chain requires a zero-argument superclass
        // constructor; `new` never reaches it, so check per class.
        if let Some(sup) = info.super_class {
            let sup_info = table.get(sup);
            let has_nullary = sup_info.constructors.iter().any(|c| c.params.is_empty());
            if !has_nullary {
                checker.out.push(Diagnostic::error(
                    &unit.file,
                    unit.decl.span,
                    ErrorKind::Type,
                    format!(
                        "superclass `{}` has no zero-argument constructor",
                        sup_info.canonical
                    ),
                ));
            }
        }
    }

    Ok((checker.typed, checker.out))
}

struct Checker<'a> {
    table: &'a ClassTable,
    hierarchy: &'a Hierarchy,
    resolved: &'a Resolved,
    string: Option<TypeId>,
    out: Diagnostics,
    typed: Typed,
    file: String,
    class: TypeId,
    static_ctx: bool,
    return_type: Type,
    slot_types: HashMap<u32, Type>,
}

impl Checker<'_> {
    fn error(&mut self, span: Span, message: impl Into<String>) {
        self.out
            .push(Diagnostic::error(&self.file, span, ErrorKind::Type, message));
    }

    fn display(&self, ty: &Type) -> String {
        match ty {
            Type::Primitive(p) => p.to_string(),
            Type::Array(elem) => format!("{}[]", self.display(elem)),
            Type::Reference(id) => self.table.get(*id).canonical.clone(),
            Type::Null => "null".to_string(),
            Type::Void => "void".to_string(),
        }
    }

    fn string_type(&mut self, span: Span) -> Result<Type, InternalError> {
        match self.string {
            Some(id) => Ok(Type::Reference(id)),
            None => internal_error!("string literal at {span} without java.lang.String"),
        }
    }

    fn bind_params(
        &mut self,
        params: &[crate::ast::Param],
        linked: &[Type],
    ) -> Result<(), InternalError> {
        if params.len() != linked.len() {
            internal_error!("parameter arity mismatch after linking");
        }
        for (param, ty) in params.iter().zip(linked) {
            let Some(&slot) = self.resolved.slots.get(&param.id) else {
                internal_error!("unresolved parameter `{}`", param.name.text);
            };
            self.slot_types.insert(slot, ty.clone());
        }
        Ok(())
    }

    fn lower_type_expr(&mut self, te: &TypeExpr) -> Result<Option<Type>, InternalError> {
        match te {
            TypeExpr::Primitive(kind, _) => Ok(Some(Type::Primitive(*kind))),
            TypeExpr::Named(reference) => match self.resolved.type_refs.get(&reference.id) {
                Some(&id) => Ok(Some(Type::Reference(id))),
                None => internal_error!("unresolved type reference `{}`", reference.dotted()),
            },
            TypeExpr::Array(element, _) => {
                Ok(self.lower_type_expr(element)?.map(Type::array))
            }
        }
    }

    fn require_assignable(&mut self, found: &Type, expected: &Type, span: Span) {
        if !assignable(self.hierarchy, found, expected) {
            let found = self.display(found);
            let expected = self.display(expected);
            self.error(span, format!("`{found}` is not assignable to `{expected}`"));
        }
    }

    fn require_boolean(&mut self, expr: &Expr) -> Result<(), InternalError> {
        if let Some(ty) = self.expr(expr)? {
            if !ty.is_boolean() {
                let ty = self.display(&ty);
                self.error(expr.span, format!("condition must be boolean, found `{ty}`"));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn block(&mut self, block: &Block) -> Result<(), InternalError> {
        for stmt in &block.statements {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), InternalError> {
        match &stmt.kind {
            StmtKind::Empty => {}
            StmtKind::Expr(e) => {
                self.expr(e)?;
            }
            StmtKind::Block(b) => self.block(b)?,
            StmtKind::LocalDecl(decl) => self.local_decl(decl)?,
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.require_boolean(cond)?;
                self.stmt(then_branch)?;
                if let Some(els) = else_branch {
                    self.stmt(els)?;
                }
            }
            StmtKind::While { cond, body } => {
                self.require_boolean(cond)?;
                self.stmt(body)?;
            }
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => {
                if let Some(init) = init {
                    self.stmt(init)?;
                }
                if let Some(cond) = cond {
                    self.require_boolean(cond)?;
                }
                if let Some(update) = update {
                    self.expr(update)?;
                }
                self.stmt(body)?;
            }
            StmtKind::Return(value) => match (value, self.return_type.clone()) {
                (None, Type::Void) => {}
                (None, expected) => {
                    let expected = self.display(&expected);
                    self.error(stmt.span, format!("missing return value of type `{expected}`"));
                }
                (Some(value), Type::Void) => {
                    self.expr(value)?;
                    self.error(stmt.span, "void method cannot return a value");
                }
                (Some(value), expected) => {
                    if let Some(found) = self.expr(value)? {
                        self.require_assignable(&found, &expected, value.span);
                    }
                }
            },
        }
        Ok(())
    }

    fn local_decl(&mut self, decl: &crate::ast::LocalDecl) -> Result<(), InternalError> {
        let Some(&slot) = self.resolved.slots.get(&decl.id) else {
            internal_error!("unresolved local `{}`", decl.name.text);
        };
        let declared = self.lower_type_expr(&decl.ty)?;
        if let Some(declared) = declared {
            self.slot_types.insert(slot, declared.clone());
            if let Some(init) = &decl.init {
                if let Some(found) = self.expr(init)? {
                    self.require_assignable(&found, &declared, init.span);
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// Types one expression. `None` means a diagnostic was already issued
    /// somewhere beneath; the poison silences follow-on errors.
    fn expr(&mut self, expr: &Expr) -> Result<Option<Type>, InternalError> {
        let ty = self.expr_inner(expr)?;
        if let Some(ty) = &ty {
            self.typed.expr_types.insert(expr.id, ty.clone());
        }
        Ok(ty)
    }

    fn expr_inner(&mut self, expr: &Expr) -> Result<Option<Type>, InternalError> {
        match &expr.kind {
            ExprKind::Literal(lit) => self.literal(lit, expr.span).map(Some),
            ExprKind::This => Ok(Some(Type::Reference(self.class))),
            ExprKind::Name(name) => self.name(name),
            ExprKind::FieldAccess { receiver, name } => {
                let Some(receiver_ty) = self.expr(receiver)? else {
                    return Ok(None);
                };
                let Some((ty, field_use)) =
                    self.field_on(&receiver_ty, &name.text, name.span)?
                else {
                    return Ok(None);
                };
                self.typed.field_uses.insert(expr.id, field_use);
                Ok(Some(ty))
            }
            ExprKind::ArrayAccess { array, index } => {
                let array_ty = self.expr(array)?;
                if let Some(index_ty) = self.expr(index)? {
                    self.require_assignable(&index_ty, &Type::INT, index.span);
                }
                match array_ty {
                    Some(Type::Array(elem)) => Ok(Some(*elem)),
                    Some(other) => {
                        let other = self.display(&other);
                        self.error(array.span, format!("`{other}` is not an array"));
                        Ok(None)
                    }
                    None => Ok(None),
                }
            }
            ExprKind::Call {
                receiver,
                name,
                args,
            } => self.call(expr, receiver.as_deref(), name, args),
            ExprKind::New { ty, args } => self.new_instance(expr, ty, args),
            ExprKind::NewArray { element, length } => {
                if let Some(length_ty) = self.expr(length)? {
                    self.require_assignable(&length_ty, &Type::INT, length.span);
                }
                Ok(self.lower_type_expr(element)?.map(Type::array))
            }
            ExprKind::Cast { ty, expr: operand } => {
                let Some(target) = self.lower_type_expr(ty)? else {
                    return Ok(None);
                };
                let Some(source) = self.expr(operand)? else {
                    return Ok(None);
                };
                let is_interface = |id: TypeId| self.table.get(id).is_interface();
                if !castable(self.hierarchy, &is_interface, &source, &target) {
                    let source = self.display(&source);
                    let target = self.display(&target);
                    self.error(expr.span, format!("cannot cast `{source}` to `{target}`"));
                }
                Ok(Some(target))
            }
            ExprKind::InstanceOf { expr: operand, ty } => {
                let source = self.expr(operand)?;
                let target = self.lower_type_expr(ty)?;
                if let (Some(source), Some(target)) = (source, target) {
                    if !source.is_reference_like() {
                        let source = self.display(&source);
                        self.error(
                            operand.span,
                            format!("`instanceof` needs a reference operand, found `{source}`"),
                        );
                    } else if !target.is_reference_like() {
                        let target = self.display(&target);
                        self.error(operand.span, format!("`instanceof {target}` is not a reference test"));
                    } else {
                        let is_interface = |id: TypeId| self.table.get(id).is_interface();
                        if !castable(self.hierarchy, &is_interface, &source, &target) {
                            let source = self.display(&source);
                            let target = self.display(&target);
                            self.error(
                                operand.span,
                                format!("`{source}` can never be an instance of `{target}`"),
                            );
                        }
                    }
                }
                Ok(Some(Type::BOOLEAN))
            }
            ExprKind::Unary { op, expr: operand } => {
                let Some(ty) = self.expr(operand)? else {
                    return Ok(None);
                };
                match op {
                    UnaryOp::Minus if ty.is_numeric() => Ok(Some(Type::INT)),
                    UnaryOp::Not if ty.is_boolean() => Ok(Some(Type::BOOLEAN)),
                    _ => {
                        let ty = self.display(&ty);
                        self.error(expr.span, format!("invalid operand `{ty}` for `{op}`"));
                        Ok(None)
                    }
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs_ty = self.expr(lhs)?;
                let rhs_ty = self.expr(rhs)?;
                let (Some(lhs_ty), Some(rhs_ty)) = (lhs_ty, rhs_ty) else {
                    return Ok(None);
                };
                self.binary(*op, &lhs_ty, &rhs_ty, expr.span)
            }
            ExprKind::Assign { target, value } => {
                let target_ty = self.expr(target)?;
                self.check_assignment_target(target);
                let value_ty = self.expr(value)?;
                let (Some(target_ty), Some(value_ty)) = (target_ty, value_ty) else {
                    return Ok(None);
                };
                self.require_assignable(&value_ty, &target_ty, value.span);
                Ok(Some(target_ty))
            }
        }
    }

    fn literal(&mut self, lit: &Literal, span: Span) -> Result<Type, InternalError> {
        match lit {
            Literal::Int(_) => Ok(Type::INT),
            Literal::Bool(_) => Ok(Type::BOOLEAN),
            Literal::Char(_) => Ok(Type::CHAR),
            Literal::String(_) => self.string_type(span),
            Literal::Null => Ok(Type::Null),
        }
    }

    fn binary(
        &mut self,
        op: crate::ast::BinaryOp,
        lhs: &Type,
        rhs: &Type,
        span: Span,
    ) -> Result<Option<Type>, InternalError> {
        use crate::ast::BinaryOp;
        if op == BinaryOp::Add {
            let string = self.string.map(Type::Reference);
            if let Some(string) = string {
                if (*lhs == string || *rhs == string)
                    && *lhs != Type::Void
                    && *rhs != Type::Void
                {
                    return Ok(Some(string));
                }
            }
        }
        if op.is_arithmetic() {
            if let Some(result) = binary_numeric_promotion(lhs, rhs) {
                return Ok(Some(result));
            }
        } else if op.is_comparison() {
            if binary_numeric_promotion(lhs, rhs).is_some() {
                return Ok(Some(Type::BOOLEAN));
            }
        } else if op.is_equality() {
            let numeric = binary_numeric_promotion(lhs, rhs).is_some();
            let boolean = lhs.is_boolean() && rhs.is_boolean();
            let reference = lhs.is_reference_like()
                && rhs.is_reference_like()
                && (assignable(self.hierarchy, lhs, rhs) || assignable(self.hierarchy, rhs, lhs));
            if numeric || boolean || reference {
                return Ok(Some(Type::BOOLEAN));
            }
        } else if op.is_boolean() && lhs.is_boolean() && rhs.is_boolean() {
            return Ok(Some(Type::BOOLEAN));
        }
        let lhs = self.display(lhs);
        let rhs = self.display(rhs);
        self.error(span, format!("invalid operands `{lhs}` and `{rhs}` for `{op}`"));
        Ok(None)
    }

    /// Rejects writes to final fields and to the array `length`.
    fn check_assignment_target(&mut self, target: &Expr) {
        let finding = match &target.kind {
            ExprKind::Name(name) => match self.typed.name_fields.get(&name.id) {
                Some(chain) => chain.last().copied(),
                None => match self.resolved.names.get(&name.id) {
                    Some(r) if name.segments.len() == r.consumed => match r.base {
                        NameBase::Field(field) => Some(FieldUse::Declared {
                            field,
                            is_static: false,
                        }),
                        NameBase::Local(_) | NameBase::Type(_) => None,
                    },
                    _ => None,
                },
            },
            ExprKind::FieldAccess { .. } => self.typed.field_uses.get(&target.id).copied(),
            _ => None,
        };
        match finding {
            Some(FieldUse::ArrayLength) => {
                self.error(target.span, "the array `length` field is final");
            }
            Some(FieldUse::Declared { field, .. }) => {
                let info = &self.table.get(field.owner).fields[field.index as usize];
                if info.modifiers.contains(Modifiers::FINAL) {
                    self.error(
                        target.span,
                        format!("final field `{}` cannot be assigned", info.name),
                    );
                }
            }
            None => {}
        }
    }

    /// Types a dotted name: the resolver's base binding plus a chain of
    /// field accesses for the remaining segments.
    fn name(&mut self, name: &Name) -> Result<Option<Type>, InternalError> {
        let Some(binding) = self.resolved.names.get(&name.id).copied() else {
            internal_error!("unclassified name `{}`", name.dotted());
        };
        let mut chain = Vec::new();
        let mut current = match binding.base {
            NameBase::Local(slot) => match self.slot_types.get(&slot) {
                Some(ty) => ty.clone(),
                None => internal_error!("untyped local slot {slot}"),
            },
            NameBase::Field(field) => {
                let info = &self.table.get(field.owner).fields[field.index as usize];
                chain.push(FieldUse::Declared {
                    field,
                    is_static: info.is_static(),
                });
                info.ty.clone()
            }
            NameBase::Type(id) => {
                // The next segment must be a static field of that type.
                let segment = &name.segments[binding.consumed];
                let Some(field) = self.table.find_field(id, &segment.text) else {
                    let owner = self.table.get(id).canonical.clone();
                    self.error(
                        segment.span,
                        format!("no field `{}` in `{owner}`", segment.text),
                    );
                    return Ok(None);
                };
                let info = &self.table.get(field.owner).fields[field.index as usize];
                if !info.is_static() {
                    self.error(
                        segment.span,
                        format!("instance field `{}` accessed through a type name", segment.text),
                    );
                    return Ok(None);
                }
                let modifiers = info.modifiers;
                let ty = info.ty.clone();
                self.check_protected_member(field.owner, modifiers, None, segment.span);
                chain.push(FieldUse::Declared {
                    field,
                    is_static: true,
                });
                ty
            }
        };
        let start = match binding.base {
            NameBase::Type(_) => binding.consumed + 1,
            NameBase::Local(_) | NameBase::Field(_) => binding.consumed,
        };
        for segment in &name.segments[start..] {
            match self.field_on(&current.clone(), &segment.text, segment.span)? {
                Some((ty, field_use)) => {
                    chain.push(field_use);
                    current = ty;
                }
                None => return Ok(None),
            }
        }
        self.typed.name_fields.insert(name.id, chain);
        Ok(Some(current))
    }

    /// Resolves one instance field access on a value of the given type.
    fn field_on(
        &mut self,
        receiver: &Type,
        field_name: &str,
        span: Span,
    ) -> Result<Option<(Type, FieldUse)>, InternalError> {
        match receiver {
            Type::Array(_) if field_name == "length" => {
                Ok(Some((Type::INT, FieldUse::ArrayLength)))
            }
            Type::Reference(id) => {
                let Some(field) = self.table.find_field(*id, field_name) else {
                    let owner = self.table.get(*id).canonical.clone();
                    self.error(span, format!("no field `{field_name}` in `{owner}`"));
                    return Ok(None);
                };
                let info = &self.table.get(field.owner).fields[field.index as usize];
                if info.is_static() {
                    self.error(
                        span,
                        format!("static field `{field_name}` accessed through an instance"),
                    );
                    return Ok(None);
                }
                let modifiers = info.modifiers;
                let ty = info.ty.clone();
                self.check_protected_member(field.owner, modifiers, Some(receiver), span);
                Ok(Some((
                    ty,
                    FieldUse::Declared {
                        field,
                        is_static: false,
                    },
                )))
            }
            other => {
                let other = self.display(other);
                self.error(span, format!("`{other}` has no field `{field_name}`"));
                Ok(None)
            }
        }
    }

    /// The protected-access rule: outside the declaring package, access
    /// requires the current class to be a subclass, and instance accesses
    /// additionally require the receiver's static type to be the current
    /// class or a subtype of it.
    fn check_protected_member(
        &mut self,
        declaring: TypeId,
        modifiers: Modifiers,
        receiver: Option<&Type>,
        span: Span,
    ) {
        if !modifiers.contains(Modifiers::PROTECTED) {
            return;
        }
        let declaring_info = self.table.get(declaring);
        let current_info = self.table.get(self.class);
        if declaring_info.package == current_info.package {
            return;
        }
        if !self.hierarchy.is_subtype(self.class, declaring) {
            self.error(
                span,
                format!("protected member of `{}` is not accessible here", declaring_info.canonical),
            );
            return;
        }
        if let Some(Type::Reference(receiver_id)) = receiver {
            if !self.hierarchy.is_subtype(*receiver_id, self.class) {
                self.error(
                    span,
                    "protected member accessed through a receiver outside the current class's subtree",
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Invocations
    // ------------------------------------------------------------------

    fn call(
        &mut self,
        expr: &Expr,
        receiver: Option<&Expr>,
        name: &Name,
        args: &[Expr],
    ) -> Result<Option<Type>, InternalError> {
        let mut arg_types = Vec::with_capacity(args.len());
        for arg in args {
            match self.expr(arg)? {
                Some(ty) => arg_types.push(ty),
                None => return Ok(None),
            }
        }
        let method_name = &name.segments[name.segments.len() - 1];

        // Work out the dispatch context: a receiver type for instance
        // calls, a type for static calls, or the enclosing class.
        enum Context {
            Instance(Type),
            Static(TypeId),
            Implicit,
        }
        let context = if let Some(receiver) = receiver {
            match self.expr(receiver)? {
                Some(ty) => Context::Instance(ty),
                None => return Ok(None),
            }
        } else if name.segments.len() == 1 {
            Context::Implicit
        } else {
            let Some(binding) = self.resolved.names.get(&name.id).copied() else {
                return Ok(None);
            };
            match binding.base {
                NameBase::Type(id) if binding.consumed == name.segments.len() - 1 => {
                    Context::Static(id)
                }
                _ => {
                    // The prefix is a value; type its field chain.
                    let prefix = Name {
                        id: name.id,
                        segments: name.segments[..name.segments.len() - 1].to_vec(),
                        span: name.span,
                    };
                    match self.name(&prefix)? {
                        Some(ty) => Context::Instance(ty),
                        None => return Ok(None),
                    }
                }
            }
        };

        let (lookup_type, want_static, receiver_ty) = match &context {
            Context::Instance(Type::Reference(id)) => (*id, false, Some(Type::Reference(*id))),
            Context::Instance(Type::Array(_)) => {
                // Array receivers expose Object's methods.
                (self.hierarchy.object(), false, None)
            }
            Context::Instance(other) => {
                let other = self.display(other);
                self.error(expr.span, format!("cannot invoke a method on `{other}`"));
                return Ok(None);
            }
            Context::Static(id) => (*id, true, None),
            Context::Implicit => (self.class, self.static_ctx, None),
        };

        let candidates: Vec<Member> = self
            .hierarchy
            .contains(lookup_type)
            .iter()
            .filter(|m| m.sig.name == method_name.text)
            .filter(|m| match context {
                Context::Implicit => true,
                _ => m.is_static() == want_static,
            })
            .cloned()
            .collect();
        let Some(chosen) = self.pick_overload(&candidates, &arg_types, method_name.span, || {
            format!("method `{}`", method_name.text)
        }) else {
            return Ok(None);
        };

        if matches!(context, Context::Implicit) && self.static_ctx && !chosen.is_static() {
            self.error(
                method_name.span,
                format!(
                    "instance method `{}` invoked from a static context",
                    method_name.text
                ),
            );
        }
        self.check_protected_member(
            chosen.decl.owner,
            chosen.modifiers,
            receiver_ty.as_ref(),
            method_name.span,
        );

        self.typed.calls.insert(
            expr.id,
            CallTarget {
                method: chosen.decl,
                is_static: chosen.is_static(),
            },
        );
        Ok(Some(chosen.return_type.clone()))
    }

    fn new_instance(
        &mut self,
        expr: &Expr,
        ty: &crate::ast::TypeRef,
        args: &[Expr],
    ) -> Result<Option<Type>, InternalError> {
        let mut arg_types = Vec::with_capacity(args.len());
        for arg in args {
            match self.expr(arg)? {
                Some(found) => arg_types.push(found),
                None => return Ok(None),
            }
        }
        let Some(&id) = self.resolved.type_refs.get(&ty.id) else {
            internal_error!("unresolved instantiation of `{}`", ty.dotted());
        };
        let info = self.table.get(id);
        if info.is_interface() {
            self.error(ty.span, format!("cannot instantiate interface `{}`", info.canonical));
            return Ok(None);
        }
        if info.is_abstract() {
            self.error(ty.span, format!("cannot instantiate abstract class `{}`", info.canonical));
            return Ok(None);
        }

        let candidates: Vec<Member> = info
            .constructors
            .iter()
            .map(|c| Member {
                sig: c.signature(),
                decl: MethodId {
                    owner: id,
                    index: c.index,
                    is_ctor: true,
                },
                modifiers: c.modifiers,
                return_type: Type::Reference(id),
            })
            .collect();
        let canonical = info.canonical.clone();
        let package = info.package.clone();
        let Some(chosen) = self.pick_overload(&candidates, &arg_types, ty.span, || {
            format!("constructor of `{canonical}`")
        }) else {
            return Ok(None);
        };
        // Protected constructors are package-local for instantiation; the
        // subclass allowance applies to the implicit super() chain only.
        if chosen.modifiers.contains(Modifiers::PROTECTED)
            && package != self.table.get(self.class).package
        {
            self.error(
                ty.span,
                format!("protected constructor of `{canonical}` is not accessible here"),
            );
        }
        self.typed.ctor_calls.insert(expr.id, chosen.decl);
        Ok(Some(Type::Reference(id)))
    }

    /// Applicability filtering plus the unique most-specific rule.
    fn pick_overload(
        &mut self,
        candidates: &[Member],
        args: &[Type],
        span: Span,
        describe: impl Fn() -> String,
    ) -> Option<Member> {
        let applicable: Vec<&Member> = candidates
            .iter()
            .filter(|m| {
                m.sig.params.len() == args.len()
                    && args
                        .iter()
                        .zip(&m.sig.params)
                        .all(|(arg, param)| assignable(self.hierarchy, arg, param))
            })
            .collect();
        if applicable.is_empty() {
            let shown = args
                .iter()
                .map(|t| self.display(t))
                .collect::<Vec<_>>()
                .join(", ");
            self.error(span, format!("no applicable {} for ({shown})", describe()));
            return None;
        }
        let more_specific = |a: &Member, b: &Member| {
            a.sig
                .params
                .iter()
                .zip(&b.sig.params)
                .all(|(pa, pb)| assignable(self.hierarchy, pa, pb))
        };
        let maxima: Vec<&Member> = applicable
            .iter()
            .copied()
            .filter(|m| applicable.iter().all(|other| more_specific(m, other)))
            .collect();
        match maxima.as_slice() {
            [unique] => Some((*unique).clone()),
            _ => {
                self.error(span, format!("ambiguous {}", describe()));
                None
            }
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        ast::NodeIdGen,
        semantics::{declare, hierarchy, resolve, type_index::TypeIndex},
        syntax,
    };

    const OBJECT: (&str, &str) =
        ("Object.java", "package java.lang; public class Object { public Object() {} }");
    const STRING: (&str, &str) = (
        "String.java",
        "package java.lang; public class String { public String() {} \
         public String concat(String other) { return other; } }",
    );

    fn run(sources: &[(&str, &str)]) -> (Typed, Diagnostics) {
        let mut ids = NodeIdGen::new();
        let units: Vec<_> = sources
            .iter()
            .map(|(file, text)| syntax::parse_source(file, text, &mut ids).expect("parse"))
            .collect();
        let (index, d1) = TypeIndex::build(&units);
        assert!(!d1.has_errors(), "{:?}", d1.items());
        let (table, d2) = declare::link(&units, &index);
        assert!(!d2.has_errors(), "{:?}", d2.items());
        let (h, d3) = hierarchy::check(&table);
        assert!(!d3.has_errors(), "{:?}", d3.items());
        let (resolved, d4) = resolve::resolve(&units, &table, &index);
        assert!(!d4.has_errors(), "{:?}", d4.items());
        check(&units, &table, &h, &resolved).expect("typeck")
    }

    fn errors(d: &Diagnostics) -> Vec<String> {
        d.items().iter().map(|d| d.message.clone()).collect()
    }

    #[test]
    fn promotion_yields_int_for_mixed_numerics() {
        let (typed, out) = run(&[
            OBJECT,
            (
                "A.java",
                "public class A { public A() {} \
                 public int f(byte b, char c) { return b + c; } }",
            ),
        ]);
        assert!(!out.has_errors(), "{:?}", errors(&out));
        assert!(typed.expr_types.values().any(|t| *t == Type::INT));
    }

    #[test]
    fn overload_prefers_the_most_specific() {
        let (typed, out) = run(&[
            OBJECT,
            (
                "A.java",
                "public class A { public A() {} \
                 public void f(int x) {} public void f(short y) {} \
                 public void g(byte b) { f(b); } }",
            ),
        ]);
        assert!(!out.has_errors(), "{:?}", errors(&out));
        // byte widens to both int and short; short is the more specific.
        let target = typed.calls.values().next().expect("call target");
        assert_eq!(target.method.index, 1);
    }

    #[test]
    fn int_argument_selects_the_int_overload() {
        let (typed, out) = run(&[
            OBJECT,
            (
                "A.java",
                "public class A { public A() {} \
                 public void f(int x) {} public void f(short y) {} \
                 public void g(int v) { f(v); } }",
            ),
        ]);
        assert!(!out.has_errors(), "{:?}", errors(&out));
        let target = typed.calls.values().next().expect("call target");
        assert_eq!(target.method.index, 0);
    }

    #[test]
    fn string_concatenation_types_as_string() {
        let (_, out) = run(&[
            OBJECT,
            STRING,
            (
                "A.java",
                "public class A { public A() {} \
                 public String f(int x) { return \"v=\" + x; } }",
            ),
        ]);
        assert!(!out.has_errors(), "{:?}", errors(&out));
    }

    #[test]
    fn final_field_assignment_is_rejected() {
        let (_, out) = run(&[
            OBJECT,
            (
                "A.java",
                "public class A { public A() {} public final int k = 1; \
                 public void f() { k = 2; } }",
            ),
        ]);
        assert!(errors(&out).iter().any(|m| m.contains("final field")));
    }

    #[test]
    fn array_length_is_final_and_int() {
        let (_, out) = run(&[
            OBJECT,
            (
                "A.java",
                "public class A { public A() {} \
                 public int f(int[] xs) { return xs.length; } }",
            ),
        ]);
        assert!(!out.has_errors(), "{:?}", errors(&out));

        let (_, out) = run(&[
            OBJECT,
            (
                "A.java",
                "public class A { public A() {} \
                 public void f(int[] xs) { xs.length = 3; } }",
            ),
        ]);
        assert!(errors(&out).iter().any(|m| m.contains("length")));
    }

    #[test]
    fn unrelated_equality_is_rejected() {
        let (_, out) = run(&[
            OBJECT,
            ("B.java", "public class B { public B() {} }"),
            ("C.java", "public class C { public C() {} }"),
            (
                "A.java",
                "public class A { public A() {} \
                 public boolean f(B b, C c) { return b == c; } }",
            ),
        ]);
        assert!(errors(&out).iter().any(|m| m.contains("invalid operands")));
    }

    #[test]
    fn protected_access_through_unrelated_supertype_receiver() {
        let (_, out) = run(&[
            OBJECT,
            (
                "Base.java",
                "package p; public class Base { public Base() {} protected int v; }",
            ),
            (
                "Sub.java",
                "package q; import p.Base; public class Sub extends Base { public Sub() {} \
                 public int f(Base other) { return other.v; } }",
            ),
        ]);
        assert!(errors(&out).iter().any(|m| m.contains("protected")));

        let (_, ok) = run(&[
            OBJECT,
            (
                "Base.java",
                "package p; public class Base { public Base() {} protected int v; }",
            ),
            (
                "Sub.java",
                "package q; import p.Base; public class Sub extends Base { public Sub() {} \
                 public int f(Sub other) { return other.v; } }",
            ),
        ]);
        assert!(!ok.has_errors(), "{:?}", errors(&ok));
    }

    #[test]
    fn cannot_instantiate_abstract_or_interface() {
        let (_, out) = run(&[
            OBJECT,
            ("I.java", "public interface I { }"),
            (
                "A.java",
                "public class A { public A() {} public Object f() { return new I(); } }",
            ),
        ]);
        assert!(errors(&out).iter().any(|m| m.contains("interface")));
    }

    #[test]
    fn superclass_needs_a_nullary_constructor() {
        let (_, out) = run(&[
            OBJECT,
            ("A.java", "public class A { public A(int x) {} }"),
            ("B.java", "public class B extends A { public B() {} }"),
        ]);
        assert!(errors(&out).iter().any(|m| m.contains("zero-argument")));
    }

    #[test]
    fn void_results_do_not_flow_into_values() {
        let (_, out) = run(&[
            OBJECT,
            (
                "A.java",
                "public class A { public A() {} public void g() {} \
                 public int f() { return g(); } }",
            ),
        ]);
        assert!(out.has_errors());
    }
}
