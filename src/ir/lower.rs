//! Lowering of typed method bodies into the three-address IR, plus the
//! per-class artifacts: static initializer functions, constructor
//! functions, vtables, subtype columns, and string literal data.

use std::collections::HashMap;

use crate::{
    analysis::const_fold::{ConstValue, Constants},
    ast::{
        BinaryOp, Block, CompilationUnit, Expr, ExprKind, Literal, Modifiers, Name, Stmt,
        StmtKind, TypeKind, UnaryOp,
    },
    diagnostics::{InternalError, internal_error},
    ir::{
        Addr, BinOp, DataItem, DataValue, Function, Instr, Label, RelOp, Temp, UnOp, Value,
        layout::{
            ARRAY_HEADER, Layout, array_vtable_labels, class_init_label, column_label,
            method_label, static_field_label, vtable_label,
        },
    },
    semantics::{
        BodyId, ClassTable, MethodId, NameBase, Resolved, TypeId,
        hierarchy::Hierarchy,
        typeck::{CallTarget, FieldUse, Typed},
    },
    types::{PrimitiveKind, Subtyping, Type, assignable},
};

/// The lowered form of one compilation unit.
#[derive(Debug)]
pub struct UnitIr {
    /// The output file stem (the unit's simple type name).
    pub stem: String,
    /// The functions the unit defines.
    pub functions: Vec<Function>,
    /// The unit's data blocks.
    pub data: Vec<DataItem>,
}

/// The whole lowered program.
#[derive(Debug)]
pub struct ProgramIr {
    /// One entry per compilation unit, in unit order.
    pub units: Vec<UnitIr>,
    /// The `_start` function.
    pub start: Function,
    /// Program-wide data emitted alongside `_start` (the primitive array
    /// vtables).
    pub start_data: Vec<DataItem>,
}

/// Everything the lowering pass reads.
pub struct LowerCtx<'a> {
    /// The parsed units.
    pub units: &'a [CompilationUnit],
    /// The linked declarations.
    pub table: &'a ClassTable,
    /// The validated hierarchy with dispatch slots.
    pub hierarchy: &'a Hierarchy,
    /// Name resolution results.
    pub resolved: &'a Resolved,
    /// Typing results.
    pub typed: &'a Typed,
    /// Constant folding results.
    pub constants: &'a Constants,
    /// Object layout.
    pub layout: &'a Layout,
}

impl std::fmt::Debug for LowerCtx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LowerCtx").finish_non_exhaustive()
    }
}

/// Lowers the whole program. `main_unit` designates the unit whose
/// `static int test()` the entry point invokes.
///
/// # Errors
///
/// Internal errors only; user-facing findings were settled by the earlier
/// passes.
pub fn lower(ctx: &LowerCtx<'_>, main_unit: usize) -> Result<ProgramIr, InternalError> {
    let mut units = Vec::with_capacity(ctx.units.len());
    for (i, unit) in ctx.units.iter().enumerate() {
        units.push(lower_unit(ctx, i, unit)?);
    }
    let (start, start_data) = build_start(ctx, main_unit)?;
    Ok(ProgramIr {
        units,
        start,
        start_data,
    })
}

fn lower_unit(ctx: &LowerCtx<'_>, i: usize, unit: &CompilationUnit) -> Result<UnitIr, InternalError> {
    let id = TypeId(u32::try_from(i).unwrap_or(u32::MAX));
    let class = ctx.table.get(id);
    let stem = unit.decl.name.text.clone();
    if class.is_interface() {
        return Ok(UnitIr {
            stem,
            functions: Vec::new(),
            data: Vec::new(),
        });
    }

    let mut data = Vec::new();
    let mut strings = StringPool::new(i);

    // Static field storage, zero-initialized words.
    for (fi, field) in class.fields.iter().enumerate() {
        if field.is_static() {
            data.push(DataItem {
                label: static_field_label(
                    ctx.table,
                    crate::semantics::FieldId {
                        owner: id,
                        index: u32::try_from(fi).unwrap_or(u32::MAX),
                    },
                ),
                words: vec![DataValue::Int(0)],
            });
        }
    }

    // The vtable: word 0 points at the subtype column, dispatch slots
    // follow.
    let mut vtable_words = vec![DataValue::Label(column_label(ctx.table, id))];
    for slot in ctx.hierarchy.vtable(id) {
        vtable_words.push(match slot {
            Some(decl) => DataValue::Label(method_label(ctx.table, *decl)),
            None => DataValue::Int(0),
        });
    }
    data.push(DataItem {
        label: vtable_label(ctx.table, id),
        words: vtable_words,
    });
    data.push(DataItem {
        label: column_label(ctx.table, id),
        words: ctx
            .layout
            .class_column(ctx.hierarchy, id)
            .into_iter()
            .map(|b| DataValue::Int(i32::from(b)))
            .collect(),
    });

    // The array-of-this-class vtable shares Object's dispatch slots.
    let n = ctx.table.classes.len();
    if let Some((vta, cola)) = array_vtable_labels(ctx.table, &Type::Reference(id)) {
        let mut words = vec![DataValue::Label(cola.clone())];
        for slot in ctx.hierarchy.vtable(ctx.hierarchy.object()) {
            words.push(match slot {
                Some(decl) => DataValue::Label(method_label(ctx.table, *decl)),
                None => DataValue::Int(0),
            });
        }
        data.push(DataItem {
            label: vta,
            words,
        });
        data.push(DataItem {
            label: cola,
            words: ctx
                .layout
                .array_column(ctx.hierarchy, n, &Type::Reference(id))?
                .into_iter()
                .map(|b| DataValue::Int(i32::from(b)))
                .collect(),
        });
    }

    let mut functions = Vec::new();

    // The static initializer function.
    {
        let mut lowerer = Lowerer::new(ctx, 0, 0, &mut strings);
        for (fi, field) in unit.decl.fields.iter().enumerate() {
            if !field.modifiers.contains(Modifiers::STATIC) {
                continue;
            }
            if let Some(init) = &field.init {
                let value = lowerer.expr(init)?;
                let label = static_field_label(
                    ctx.table,
                    crate::semantics::FieldId {
                        owner: id,
                        index: u32::try_from(fi).unwrap_or(u32::MAX),
                    },
                );
                lowerer.emit(Instr::Move {
                    dst: Value::mem(Value::Name(label), 0),
                    src: value,
                });
            }
        }
        lowerer.emit(Instr::Return(None));
        functions.push(lowerer.finish(class_init_label(ctx.table, id)));
    }

    // Methods with bodies.
    for (mi, method) in unit.decl.methods.iter().enumerate() {
        let Some(body) = &method.body else { continue };
        let info = &class.methods[mi];
        let param_base = u32::from(!info.is_static());
        let locals = ctx
            .resolved
            .frame_locals
            .get(&BodyId::Method(id, u32::try_from(mi).unwrap_or(u32::MAX)))
            .copied()
            .unwrap_or_default();
        let mut lowerer = Lowerer::new(ctx, param_base, locals, &mut strings);
        lowerer.block(body)?;
        if info.return_type == Type::Void {
            lowerer.emit(Instr::Return(None));
        }
        let mut function = lowerer.finish(method_label(
            ctx.table,
            MethodId {
                owner: id,
                index: u32::try_from(mi).unwrap_or(u32::MAX),
                is_ctor: false,
            },
        ));
        function.params = param_base + u32::try_from(method.params.len()).unwrap_or_default();
        functions.push(function);
    }

    // Constructors: super chain call, zero-initialization of the class's
    // own fields, field initializers in declaration order, then the body.
    for (ci, info) in class.constructors.iter().enumerate() {
        let locals = ctx
            .resolved
            .frame_locals
            .get(&BodyId::Ctor(id, u32::try_from(ci).unwrap_or(u32::MAX)))
            .copied()
            .unwrap_or_default();
        let mut lowerer = Lowerer::new(ctx, 1, locals, &mut strings);
        let this = Value::Temp(Temp(0));

        if let Some(sup) = class.super_class {
            let sup_class = ctx.table.get(sup);
            let Some(nullary) = sup_class.constructors.iter().position(|c| c.params.is_empty())
            else {
                internal_error!("missing nullary constructor in `{}`", sup_class.canonical);
            };
            let label = method_label(
                ctx.table,
                MethodId {
                    owner: sup,
                    index: u32::try_from(nullary).unwrap_or_default(),
                    is_ctor: true,
                },
            );
            lowerer.emit(Instr::Call {
                dst: None,
                target: Value::Name(label),
                args: vec![this.clone()],
            });
        }

        for (fi, field) in class.fields.iter().enumerate() {
            if field.is_static() {
                continue;
            }
            let offset = ctx.layout.field_offset(crate::semantics::FieldId {
                owner: id,
                index: u32::try_from(fi).unwrap_or(u32::MAX),
            })?;
            lowerer.emit(Instr::Move {
                dst: Value::mem(this.clone(), offset),
                src: Value::Const(0),
            });
        }

        for (fi, field) in unit.decl.fields.iter().enumerate() {
            if field.modifiers.contains(Modifiers::STATIC) {
                continue;
            }
            if let Some(init) = &field.init {
                let value = lowerer.expr(init)?;
                let offset = ctx.layout.field_offset(crate::semantics::FieldId {
                    owner: id,
                    index: u32::try_from(fi).unwrap_or(u32::MAX),
                })?;
                lowerer.emit(Instr::Move {
                    dst: Value::mem(this.clone(), offset),
                    src: value,
                });
            }
        }

        // The declared body, when the constructor is not the synthesized
        // default.
        if let Some(ctor) = unit.decl.constructors.get(ci) {
            lowerer.block(&ctor.body)?;
        }
        lowerer.emit(Instr::Return(None));
        let mut function = lowerer.finish(method_label(
            ctx.table,
            MethodId {
                owner: id,
                index: info.index,
                is_ctor: true,
            },
        ));
        function.params = 1 + u32::try_from(info.params.len()).unwrap_or_default();
        functions.push(function);
    }

    data.extend(strings.into_data(ctx)?);

    Ok(UnitIr {
        stem,
        functions,
        data,
    })
}

/// Builds `_start`: run every class initializer in unit order, call the
/// start class's `static int test()`, and hand the result to `__debexit`.
fn build_start(
    ctx: &LowerCtx<'_>,
    main_unit: usize,
) -> Result<(Function, Vec<DataItem>), InternalError> {
    let mut body = Vec::new();
    for class in ctx.table.iter() {
        if class.kind == TypeKind::Class {
            body.push(Instr::Call {
                dst: None,
                target: Value::Name(class_init_label(ctx.table, class.id)),
                args: vec![],
            });
        }
    }
    let main_id = TypeId(u32::try_from(main_unit).unwrap_or(u32::MAX));
    let main_class = ctx.table.get(main_id);
    let Some(test) = main_class
        .methods
        .iter()
        .position(|m| m.name == "test" && m.params.is_empty() && m.is_static())
    else {
        internal_error!("start class `{}` lacks `static int test()`", main_class.canonical);
    };
    let result = Temp(0);
    body.push(Instr::Call {
        dst: Some(result),
        target: Value::Name(method_label(
            ctx.table,
            MethodId {
                owner: main_id,
                index: u32::try_from(test).unwrap_or_default(),
                is_ctor: false,
            },
        )),
        args: vec![],
    });
    body.push(Instr::Call {
        dst: None,
        target: Value::Name(Label::new("__debexit")),
        args: vec![Value::Temp(result)],
    });

    // Primitive array vtables, shared by every unit.
    let mut data = Vec::new();
    let n = ctx.table.classes.len();
    for primitive in [
        PrimitiveKind::Byte,
        PrimitiveKind::Short,
        PrimitiveKind::Int,
        PrimitiveKind::Char,
        PrimitiveKind::Boolean,
    ] {
        let element = Type::Primitive(primitive);
        let Some((vta, cola)) = array_vtable_labels(ctx.table, &element) else {
            internal_error!("no array vtable labels for {primitive}");
        };
        let mut words = vec![DataValue::Label(cola.clone())];
        for slot in ctx.hierarchy.vtable(ctx.hierarchy.object()) {
            words.push(match slot {
                Some(decl) => DataValue::Label(method_label(ctx.table, *decl)),
                None => DataValue::Int(0),
            });
        }
        data.push(DataItem { label: vta, words });
        data.push(DataItem {
            label: cola,
            words: ctx
                .layout
                .array_column(ctx.hierarchy, n, &element)?
                .into_iter()
                .map(|b| DataValue::Int(i32::from(b)))
                .collect(),
        });
    }

    Ok((
        Function {
            label: Label::new("_start"),
            params: 0,
            temps: 1,
            body,
        },
        data,
    ))
}

/// The per-unit string literal pool.
#[derive(Debug)]
struct StringPool {
    unit: usize,
    by_text: HashMap<String, Label>,
    ordered: Vec<(Label, Label, String)>,
}

impl StringPool {
    fn new(unit: usize) -> Self {
        Self {
            unit,
            by_text: HashMap::new(),
            ordered: Vec::new(),
        }
    }

    fn intern(&mut self, text: &str) -> Label {
        if let Some(label) = self.by_text.get(text) {
            return label.clone();
        }
        let k = self.ordered.len();
        let object = Label::new(format!("STR${}${k}", self.unit));
        let chars = Label::new(format!("STRD${}${k}", self.unit));
        self.by_text.insert(text.to_string(), object.clone());
        self.ordered.push((object.clone(), chars, text.to_string()));
        object
    }

    fn into_data(self, ctx: &LowerCtx<'_>) -> Result<Vec<DataItem>, InternalError> {
        if self.ordered.is_empty() {
            return Ok(Vec::new());
        }
        let Some(string) = ctx.table.iter().find(|c| c.canonical == "java.lang.String") else {
            internal_error!("string literal without java.lang.String");
        };
        let Some((char_vta, _)) = array_vtable_labels(ctx.table, &Type::CHAR) else {
            internal_error!("no char array vtable label");
        };
        let string_vt = vtable_label(ctx.table, string.id);
        let mut data = Vec::new();
        for (object, chars, text) in self.ordered {
            let mut words = vec![
                DataValue::Label(char_vta.clone()),
                DataValue::Int(i32::try_from(text.len()).unwrap_or(i32::MAX)),
            ];
            words.extend(
                text.chars()
                    .map(|c| DataValue::Int(i32::try_from(u32::from(c)).unwrap_or_default())),
            );
            data.push(DataItem {
                label: chars.clone(),
                words,
            });
            data.push(DataItem {
                label: object,
                words: vec![DataValue::Label(string_vt.clone()), DataValue::Label(chars)],
            });
        }
        Ok(data)
    }
}

/// Lowers one function body.
struct Lowerer<'a, 'p> {
    ctx: &'a LowerCtx<'a>,
    strings: &'p mut StringPool,
    instrs: Vec<Instr>,
    param_base: u32,
    next_temp: u32,
    next_label: u32,
    exception: Option<Label>,
}

impl<'a, 'p> Lowerer<'a, 'p> {
    fn new(
        ctx: &'a LowerCtx<'a>,
        param_base: u32,
        locals: u32,
        strings: &'p mut StringPool,
    ) -> Self {
        Self {
            ctx,
            strings,
            instrs: Vec::new(),
            param_base,
            next_temp: param_base + locals,
            next_label: 0,
            exception: None,
        }
    }

    fn emit(&mut self, instr: Instr) {
        self.instrs.push(instr);
    }

    fn fresh_temp(&mut self) -> Temp {
        let t = Temp(self.next_temp);
        self.next_temp += 1;
        t
    }

    fn fresh_label(&mut self) -> Label {
        let l = Label::new(format!(".L{}", self.next_label));
        self.next_label += 1;
        l
    }

    fn slot_temp(&self, slot: u32) -> Temp {
        Temp(self.param_base + slot)
    }

    fn exception_label(&mut self) -> Label {
        self.exception
            .get_or_insert_with(|| Label::new(".Lexc"))
            .clone()
    }

    fn finish(mut self, label: Label) -> Function {
        if let Some(exc) = self.exception.take() {
            self.instrs.push(Instr::Label(exc));
            self.instrs.push(Instr::Call {
                dst: None,
                target: Value::Name(Label::new("__exception")),
                args: vec![],
            });
        }
        Function {
            label,
            params: self.param_base,
            temps: self.next_temp,
            body: self.instrs,
        }
    }

    /// Copies a value into a fresh temporary.
    fn load(&mut self, src: Value) -> Value {
        let t = self.fresh_temp();
        self.emit(Instr::Move {
            dst: Value::Temp(t),
            src,
        });
        Value::Temp(t)
    }

    /// A null receiver raises the runtime exception.
    fn null_check(&mut self, value: &Value) {
        let exc = self.exception_label();
        self.emit(Instr::CJump {
            op: RelOp::Eq,
            lhs: value.clone(),
            rhs: Value::Const(0),
            if_true: exc,
        });
    }

    fn bounds_check(&mut self, array: &Value, index: &Value) {
        let exc = self.exception_label();
        self.emit(Instr::CJump {
            op: RelOp::Lt,
            lhs: index.clone(),
            rhs: Value::Const(0),
            if_true: exc.clone(),
        });
        let length = self.load(Value::mem(array.clone(), 4));
        self.emit(Instr::CJump {
            op: RelOp::Ge,
            lhs: index.clone(),
            rhs: length,
            if_true: exc,
        });
    }

    /// The address of an array element, after the checks.
    fn element_addr(&mut self, array: Value, index: Value) -> Value {
        let scaled = self.fresh_temp();
        self.emit(Instr::Bin {
            dst: scaled,
            op: BinOp::Mul,
            lhs: index,
            rhs: Value::Const(4),
        });
        let base = self.fresh_temp();
        self.emit(Instr::Bin {
            dst: base,
            op: BinOp::Add,
            lhs: array,
            rhs: Value::Temp(scaled),
        });
        Value::Mem(Box::new(Addr {
            base: Value::Temp(base),
            offset: ARRAY_HEADER,
        }))
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
            StmtKind::LocalDecl(decl) => {
                if let Some(init) = &decl.init {
                    let value = self.expr(init)?;
                    let Some(&slot) = self.ctx.resolved.slots.get(&decl.id) else {
                        internal_error!("unresolved local `{}`", decl.name.text);
                    };
                    let dst = self.slot_temp(slot);
                    self.emit(Instr::Move {
                        dst: Value::Temp(dst),
                        src: value,
                    });
                }
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let l_false = self.fresh_label();
                self.cond_false(cond, &l_false)?;
                self.stmt(then_branch)?;
                match else_branch {
                    Some(els) => {
                        let l_end = self.fresh_label();
                        self.emit(Instr::Jump(l_end.clone()));
                        self.emit(Instr::Label(l_false));
                        self.stmt(els)?;
                        self.emit(Instr::Label(l_end));
                    }
                    None => self.emit(Instr::Label(l_false)),
                }
            }
            StmtKind::While { cond, body } => {
                let l_cond = self.fresh_label();
                let l_end = self.fresh_label();
                self.emit(Instr::Label(l_cond.clone()));
                self.cond_false(cond, &l_end)?;
                self.stmt(body)?;
                self.emit(Instr::Jump(l_cond));
                self.emit(Instr::Label(l_end));
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
                let l_cond = self.fresh_label();
                let l_end = self.fresh_label();
                self.emit(Instr::Label(l_cond.clone()));
                if let Some(cond) = cond {
                    self.cond_false(cond, &l_end)?;
                }
                self.stmt(body)?;
                if let Some(update) = update {
                    self.expr(update)?;
                }
                self.emit(Instr::Jump(l_cond));
                self.emit(Instr::Label(l_end));
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(v) => Some(self.expr(v)?),
                    None => None,
                };
                self.emit(Instr::Return(value));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Conditions as jumps
    // ------------------------------------------------------------------

    /// Jumps to `target` when the condition is false; falls through
    /// otherwise. `&&`, `||`, and `!` become jump graphs without a boolean
    /// temporary.
    fn cond_false(&mut self, cond: &Expr, target: &Label) -> Result<(), InternalError> {
        if let Some(value) = self.ctx.constants.of(cond.id).and_then(ConstValue::as_bool) {
            if !value {
                self.emit(Instr::Jump(target.clone()));
            }
            return Ok(());
        }
        match &cond.kind {
            ExprKind::Unary {
                op: UnaryOp::Not,
                expr: inner,
            } => self.cond_true(inner, target),
            ExprKind::Binary {
                op: BinaryOp::AndAnd,
                lhs,
                rhs,
            } => {
                self.cond_false(lhs, target)?;
                self.cond_false(rhs, target)
            }
            ExprKind::Binary {
                op: BinaryOp::OrOr,
                lhs,
                rhs,
            } => {
                let l_taken = self.fresh_label();
                self.cond_true(lhs, &l_taken)?;
                self.cond_false(rhs, target)?;
                self.emit(Instr::Label(l_taken));
                Ok(())
            }
            ExprKind::Binary { op, lhs, rhs } if rel_op(*op).is_some() => {
                let rel = rel_op(*op).unwrap_or(RelOp::Eq);
                let lhs = self.expr(lhs)?;
                let rhs = self.expr(rhs)?;
                self.emit(Instr::CJump {
                    op: rel.negated(),
                    lhs,
                    rhs,
                    if_true: target.clone(),
                });
                Ok(())
            }
            _ => {
                let value = self.expr(cond)?;
                self.emit(Instr::CJump {
                    op: RelOp::Eq,
                    lhs: value,
                    rhs: Value::Const(0),
                    if_true: target.clone(),
                });
                Ok(())
            }
        }
    }

    /// Jumps to `target` when the condition is true.
    fn cond_true(&mut self, cond: &Expr, target: &Label) -> Result<(), InternalError> {
        if let Some(value) = self.ctx.constants.of(cond.id).and_then(ConstValue::as_bool) {
            if value {
                self.emit(Instr::Jump(target.clone()));
            }
            return Ok(());
        }
        match &cond.kind {
            ExprKind::Unary {
                op: UnaryOp::Not,
                expr: inner,
            } => self.cond_false(inner, target),
            ExprKind::Binary {
                op: BinaryOp::OrOr,
                lhs,
                rhs,
            } => {
                self.cond_true(lhs, target)?;
                self.cond_true(rhs, target)
            }
            ExprKind::Binary {
                op: BinaryOp::AndAnd,
                lhs,
                rhs,
            } => {
                let l_skip = self.fresh_label();
                self.cond_false(lhs, &l_skip)?;
                self.cond_true(rhs, target)?;
                self.emit(Instr::Label(l_skip));
                Ok(())
            }
            ExprKind::Binary { op, lhs, rhs } if rel_op(*op).is_some() => {
                let rel = rel_op(*op).unwrap_or(RelOp::Eq);
                let lhs = self.expr(lhs)?;
                let rhs = self.expr(rhs)?;
                self.emit(Instr::CJump {
                    op: rel,
                    lhs,
                    rhs,
                    if_true: target.clone(),
                });
                Ok(())
            }
            _ => {
                let value = self.expr(cond)?;
                self.emit(Instr::CJump {
                    op: RelOp::Ne,
                    lhs: value,
                    rhs: Value::Const(0),
                    if_true: target.clone(),
                });
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn materialize(&mut self, constant: &ConstValue) -> Value {
        match constant {
            ConstValue::Int(v) => Value::Const(*v),
            ConstValue::Bool(b) => Value::Const(i32::from(*b)),
            ConstValue::Char(c) => Value::Const(i32::try_from(u32::from(*c)).unwrap_or_default()),
            ConstValue::Str(text) => Value::Name(self.strings.intern(text)),
        }
    }

    fn expr(&mut self, expr: &Expr) -> Result<Value, InternalError> {
        if let Some(constant) = self.ctx.constants.of(expr.id) {
            let constant = constant.clone();
            return Ok(self.materialize(&constant));
        }
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(match lit {
                Literal::Int(v) => Value::Const(i32::try_from(*v).unwrap_or(i32::MAX)),
                Literal::Bool(b) => Value::Const(i32::from(*b)),
                Literal::Char(c) => {
                    Value::Const(i32::try_from(u32::from(*c)).unwrap_or_default())
                }
                Literal::String(text) => Value::Name(self.strings.intern(text)),
                Literal::Null => Value::Const(0),
            }),
            ExprKind::This => Ok(Value::Temp(Temp(0))),
            ExprKind::Name(name) => self.name_value(name),
            ExprKind::FieldAccess { receiver, name } => {
                let recv = self.expr(receiver)?;
                let Some(&field_use) = self.ctx.typed.field_uses.get(&expr.id) else {
                    internal_error!("untyped field access `{}`", name.text);
                };
                self.field_load(recv, field_use)
            }
            ExprKind::ArrayAccess { array, index } => {
                let array = self.expr(array)?;
                self.null_check(&array);
                let index = self.expr(index)?;
                self.bounds_check(&array, &index);
                let addr = self.element_addr(array, index);
                Ok(self.load(addr))
            }
            ExprKind::Call {
                receiver,
                name,
                args,
            } => self.call(expr, receiver.as_deref(), name, args),
            ExprKind::New { args, .. } => self.new_instance(expr, args),
            ExprKind::NewArray { element, length } => self.new_array(expr, element, length),
            ExprKind::Cast { expr: operand, .. } => self.cast(expr, operand),
            ExprKind::InstanceOf { expr: operand, ty: _ } => self.instance_of(expr, operand),
            ExprKind::Unary { op, expr: operand } => {
                let value = self.expr(operand)?;
                let dst = self.fresh_temp();
                match op {
                    UnaryOp::Minus => self.emit(Instr::Un {
                        dst,
                        op: UnOp::Neg,
                        src: value,
                    }),
                    UnaryOp::Not => self.emit(Instr::Bin {
                        dst,
                        op: BinOp::Sub,
                        lhs: Value::Const(1),
                        rhs: value,
                    }),
                }
                Ok(Value::Temp(dst))
            }
            ExprKind::Binary { op, lhs, rhs } => self.binary(expr, *op, lhs, rhs),
            ExprKind::Assign { target, value } => self.assign(target, value),
        }
    }

    fn name_value(&mut self, name: &Name) -> Result<Value, InternalError> {
        let Some(binding) = self.ctx.resolved.names.get(&name.id).copied() else {
            internal_error!("unclassified name `{}`", name.dotted());
        };
        let mut value = match binding.base {
            NameBase::Local(slot) => Value::Temp(self.slot_temp(slot)),
            NameBase::Field(_) => Value::Temp(Temp(0)),
            NameBase::Type(_) => Value::Const(0),
        };
        let empty = Vec::new();
        let chain = self.ctx.typed.name_fields.get(&name.id).unwrap_or(&empty);
        for &field_use in chain {
            value = self.field_load(value, field_use)?;
        }
        Ok(value)
    }

    fn field_load(&mut self, receiver: Value, field_use: FieldUse) -> Result<Value, InternalError> {
        match field_use {
            FieldUse::ArrayLength => {
                self.null_check(&receiver);
                Ok(self.load(Value::mem(receiver, 4)))
            }
            FieldUse::Declared { field, is_static } => {
                if is_static {
                    let label = static_field_label(self.ctx.table, field);
                    Ok(self.load(Value::mem(Value::Name(label), 0)))
                } else {
                    self.null_check(&receiver);
                    let offset = self.ctx.layout.field_offset(field)?;
                    Ok(self.load(Value::mem(receiver, offset)))
                }
            }
        }
    }

    fn place(&mut self, target: &Expr) -> Result<Place, InternalError> {
        match &target.kind {
            ExprKind::Name(name) => {
                let Some(binding) = self.ctx.resolved.names.get(&name.id).copied() else {
                    internal_error!("unclassified assignment target `{}`", name.dotted());
                };
                let empty = Vec::new();
                let chain = self.ctx.typed.name_fields.get(&name.id).unwrap_or(&empty);
                let mut value = match binding.base {
                    NameBase::Local(slot) if chain.is_empty() => {
                        return Ok(Place::Slot(self.slot_temp(slot)));
                    }
                    NameBase::Local(slot) => Value::Temp(self.slot_temp(slot)),
                    NameBase::Field(_) => Value::Temp(Temp(0)),
                    NameBase::Type(_) => Value::Const(0),
                };
                let (last, prefix) = chain
                    .split_last()
                    .ok_or_else(|| InternalError("empty assignment chain".into()))?;
                for &field_use in prefix {
                    value = self.field_load(value, field_use)?;
                }
                match *last {
                    FieldUse::Declared { field, is_static } => {
                        if is_static {
                            Ok(Place::Static(static_field_label(self.ctx.table, field)))
                        } else {
                            Ok(Place::Field {
                                receiver: value,
                                offset: self.ctx.layout.field_offset(field)?,
                            })
                        }
                    }
                    FieldUse::ArrayLength => {
                        internal_error!("array length as assignment target")
                    }
                }
            }
            ExprKind::FieldAccess { receiver, name } => {
                let recv = self.expr(receiver)?;
                let Some(&field_use) = self.ctx.typed.field_uses.get(&target.id) else {
                    internal_error!("untyped field store `{}`", name.text);
                };
                match field_use {
                    FieldUse::Declared { field, is_static: false } => Ok(Place::Field {
                        receiver: recv,
                        offset: self.ctx.layout.field_offset(field)?,
                    }),
                    FieldUse::Declared { field, is_static: true } => {
                        Ok(Place::Static(static_field_label(self.ctx.table, field)))
                    }
                    FieldUse::ArrayLength => internal_error!("array length as assignment target"),
                }
            }
            ExprKind::ArrayAccess { array, index } => {
                let array = self.expr(array)?;
                let index = self.expr(index)?;
                Ok(Place::Element { array, index })
            }
            _ => internal_error!("invalid assignment target"),
        }
    }

    fn assign(&mut self, target: &Expr, value: &Expr) -> Result<Value, InternalError> {
        let place = self.place(target)?;
        let value = self.expr(value)?;
        // Keep the stored value in a temp so the assignment has a result.
        let result = match &value {
            Value::Temp(_) | Value::Const(_) | Value::Name(_) => value.clone(),
            Value::Mem(_) => self.load(value.clone()),
        };
        match place {
            Place::Slot(slot) => self.emit(Instr::Move {
                dst: Value::Temp(slot),
                src: result.clone(),
            }),
            Place::Static(label) => self.emit(Instr::Move {
                dst: Value::mem(Value::Name(label), 0),
                src: result.clone(),
            }),
            Place::Field { receiver, offset } => {
                self.null_check(&receiver);
                self.emit(Instr::Move {
                    dst: Value::mem(receiver, offset),
                    src: result.clone(),
                });
            }
            Place::Element { array, index } => {
                self.null_check(&array);
                self.bounds_check(&array, &index);
                let addr = self.element_addr(array, index);
                self.emit(Instr::Move {
                    dst: addr,
                    src: result.clone(),
                });
            }
        }
        Ok(result)
    }

    fn binary(
        &mut self,
        expr: &Expr,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<Value, InternalError> {
        // String concatenation routes through String.valueOf and concat.
        if op == BinaryOp::Add && self.is_string_typed(expr.id) {
            let left = self.to_string_value(lhs)?;
            let right = self.to_string_value(rhs)?;
            return self.concat(left, right);
        }
        match op {
            BinaryOp::AndAnd => {
                let dst = self.fresh_temp();
                let l_end = self.fresh_label();
                self.emit(Instr::Move {
                    dst: Value::Temp(dst),
                    src: Value::Const(0),
                });
                self.cond_false(lhs, &l_end)?;
                let right = self.expr(rhs)?;
                self.emit(Instr::Move {
                    dst: Value::Temp(dst),
                    src: right,
                });
                self.emit(Instr::Label(l_end));
                Ok(Value::Temp(dst))
            }
            BinaryOp::OrOr => {
                let dst = self.fresh_temp();
                let l_end = self.fresh_label();
                self.emit(Instr::Move {
                    dst: Value::Temp(dst),
                    src: Value::Const(1),
                });
                self.cond_true(lhs, &l_end)?;
                let right = self.expr(rhs)?;
                self.emit(Instr::Move {
                    dst: Value::Temp(dst),
                    src: right,
                });
                self.emit(Instr::Label(l_end));
                Ok(Value::Temp(dst))
            }
            BinaryOp::Add
            | BinaryOp::Sub
            | BinaryOp::Mul
            | BinaryOp::Div
            | BinaryOp::Rem
            | BinaryOp::And
            | BinaryOp::Or => {
                let left = self.expr(lhs)?;
                let right = self.expr(rhs)?;
                if matches!(op, BinaryOp::Div | BinaryOp::Rem) {
                    let exc = self.exception_label();
                    self.emit(Instr::CJump {
                        op: RelOp::Eq,
                        lhs: right.clone(),
                        rhs: Value::Const(0),
                        if_true: exc,
                    });
                }
                let dst = self.fresh_temp();
                self.emit(Instr::Bin {
                    dst,
                    op: match op {
                        BinaryOp::Add => BinOp::Add,
                        BinaryOp::Sub => BinOp::Sub,
                        BinaryOp::Mul => BinOp::Mul,
                        BinaryOp::Div => BinOp::Div,
                        BinaryOp::Rem => BinOp::Rem,
                        BinaryOp::And => BinOp::And,
                        _ => BinOp::Or,
                    },
                    lhs: left,
                    rhs: right,
                });
                Ok(Value::Temp(dst))
            }
            _ => {
                // Comparisons and equality as values.
                let Some(rel) = rel_op(op) else {
                    internal_error!("unexpected binary operator {op}");
                };
                let left = self.expr(lhs)?;
                let right = self.expr(rhs)?;
                let dst = self.fresh_temp();
                let l_end = self.fresh_label();
                self.emit(Instr::Move {
                    dst: Value::Temp(dst),
                    src: Value::Const(1),
                });
                self.emit(Instr::CJump {
                    op: rel,
                    lhs: left,
                    rhs: right,
                    if_true: l_end.clone(),
                });
                self.emit(Instr::Move {
                    dst: Value::Temp(dst),
                    src: Value::Const(0),
                });
                self.emit(Instr::Label(l_end));
                Ok(Value::Temp(dst))
            }
        }
    }

    fn is_string_typed(&self, id: crate::ast::NodeId) -> bool {
        matches!(
            self.ctx.typed.expr_types.get(&id),
            Some(Type::Reference(t))
                if self.ctx.table.get(*t).canonical == "java.lang.String"
        )
    }

    fn string_class(&self) -> Result<TypeId, InternalError> {
        match self
            .ctx
            .table
            .iter()
            .find(|c| c.canonical == "java.lang.String")
        {
            Some(c) => Ok(c.id),
            None => internal_error!("string concatenation without java.lang.String"),
        }
    }

    fn string_method(&self, name: &str, params: &[Type]) -> Result<MethodId, InternalError> {
        let string = self.string_class()?;
        let class = self.ctx.table.get(string);
        match class
            .methods
            .iter()
            .find(|m| m.name == name && m.params == params)
        {
            Some(m) => Ok(MethodId {
                owner: string,
                index: m.index,
                is_ctor: false,
            }),
            None => internal_error!("java.lang.String lacks `{name}`"),
        }
    }

    /// Converts one concatenation operand to a string via the matching
    /// `String.valueOf` overload.
    fn to_string_value(&mut self, operand: &Expr) -> Result<Value, InternalError> {
        let value = self.expr(operand)?;
        let object = Type::Reference(self.ctx.hierarchy.object());
        let param = match self.ctx.typed.expr_types.get(&operand.id) {
            Some(Type::Primitive(PrimitiveKind::Char)) => Type::CHAR,
            Some(Type::Primitive(PrimitiveKind::Boolean)) => Type::BOOLEAN,
            Some(Type::Primitive(_)) => Type::INT,
            _ => object.clone(),
        };
        let value_of = self.string_method("valueOf", std::slice::from_ref(&param))?;
        let dst = self.fresh_temp();
        self.emit(Instr::Call {
            dst: Some(dst),
            target: Value::Name(method_label(self.ctx.table, value_of)),
            args: vec![value],
        });
        Ok(Value::Temp(dst))
    }

    fn concat(&mut self, left: Value, right: Value) -> Result<Value, InternalError> {
        let string = self.string_class()?;
        let concat = self.string_method("concat", &[Type::Reference(string)])?;
        let info = &self.ctx.table.get(string).methods[concat.index as usize];
        let Some(slot) = self.ctx.hierarchy.slot(&info.signature()) else {
            internal_error!("no dispatch slot for String.concat");
        };
        self.virtual_call(left, slot, vec![right], true)
    }

    /// Emits a dispatched call: vtable load, slot load, indirect call.
    fn virtual_call(
        &mut self,
        receiver: Value,
        slot: u32,
        mut args: Vec<Value>,
        returns: bool,
    ) -> Result<Value, InternalError> {
        self.null_check(&receiver);
        let vtable = self.load(Value::mem(receiver.clone(), 0));
        let slot_offset = 4 + 4 * i32::try_from(slot).unwrap_or(i32::MAX);
        let target = self.load(Value::mem(vtable, slot_offset));
        let mut call_args = vec![receiver];
        call_args.append(&mut args);
        let dst = returns.then(|| self.fresh_temp());
        self.emit(Instr::Call {
            dst,
            target,
            args: call_args,
        });
        Ok(dst.map_or(Value::Const(0), Value::Temp))
    }

    fn call(
        &mut self,
        expr: &Expr,
        receiver: Option<&Expr>,
        name: &Name,
        args: &[Expr],
    ) -> Result<Value, InternalError> {
        let Some(&CallTarget { method, is_static }) = self.ctx.typed.calls.get(&expr.id) else {
            internal_error!("unresolved call `{}`", name.dotted());
        };
        let info = &self.ctx.table.get(method.owner).methods[method.index as usize];
        let returns = info.return_type != Type::Void;
        let signature = info.signature();

        // The receiver value, for instance calls.
        let receiver_value = if is_static {
            None
        } else if let Some(receiver) = receiver {
            Some(self.expr(receiver)?)
        } else if name.segments.len() > 1 {
            // The resolver classified the prefix; its chain is on this
            // name's id.
            Some(self.name_value(name)?)
        } else {
            Some(Value::Temp(Temp(0)))
        };

        let mut arg_values = Vec::with_capacity(args.len());
        for arg in args {
            arg_values.push(self.expr(arg)?);
        }

        match receiver_value {
            None => {
                let dst = returns.then(|| self.fresh_temp());
                self.emit(Instr::Call {
                    dst,
                    target: Value::Name(method_label(self.ctx.table, method)),
                    args: arg_values,
                });
                Ok(dst.map_or(Value::Const(0), Value::Temp))
            }
            Some(receiver) => {
                let Some(slot) = self.ctx.hierarchy.slot(&signature) else {
                    internal_error!("no dispatch slot for `{}`", signature.name);
                };
                self.virtual_call(receiver, slot, arg_values, returns)
            }
        }
    }

    fn new_instance(&mut self, expr: &Expr, args: &[Expr]) -> Result<Value, InternalError> {
        let Some(&ctor) = self.ctx.typed.ctor_calls.get(&expr.id) else {
            internal_error!("unresolved instantiation");
        };
        let class = ctor.owner;
        let size = self.ctx.layout.object_size(class);
        let object = self.fresh_temp();
        self.emit(Instr::Call {
            dst: Some(object),
            target: Value::Name(Label::new("__malloc")),
            args: vec![Value::Const(size)],
        });
        self.emit(Instr::Move {
            dst: Value::mem(Value::Temp(object), 0),
            src: Value::Name(vtable_label(self.ctx.table, class)),
        });
        let mut call_args = vec![Value::Temp(object)];
        for arg in args {
            call_args.push(self.expr(arg)?);
        }
        self.emit(Instr::Call {
            dst: None,
            target: Value::Name(method_label(self.ctx.table, ctor)),
            args: call_args,
        });
        Ok(Value::Temp(object))
    }

    fn new_array(
        &mut self,
        expr: &Expr,
        element: &crate::ast::TypeExpr,
        length: &Expr,
    ) -> Result<Value, InternalError> {
        let _ = expr;
        let Some(element_ty) = lower_type_expr(self.ctx, element) else {
            internal_error!("unresolved array element type");
        };
        let Some((vta, _)) = array_vtable_labels(self.ctx.table, &element_ty) else {
            internal_error!("no array vtable for element {element_ty:?}");
        };

        let len = self.expr(length)?;
        let len = match len {
            Value::Const(_) | Value::Temp(_) => len,
            other => self.load(other),
        };
        let exc = self.exception_label();
        self.emit(Instr::CJump {
            op: RelOp::Lt,
            lhs: len.clone(),
            rhs: Value::Const(0),
            if_true: exc,
        });

        let bytes = self.fresh_temp();
        self.emit(Instr::Bin {
            dst: bytes,
            op: BinOp::Mul,
            lhs: len.clone(),
            rhs: Value::Const(4),
        });
        let total = self.fresh_temp();
        self.emit(Instr::Bin {
            dst: total,
            op: BinOp::Add,
            lhs: Value::Temp(bytes),
            rhs: Value::Const(ARRAY_HEADER),
        });
        let array = self.fresh_temp();
        self.emit(Instr::Call {
            dst: Some(array),
            target: Value::Name(Label::new("__malloc")),
            args: vec![Value::Temp(total)],
        });
        self.emit(Instr::Move {
            dst: Value::mem(Value::Temp(array), 0),
            src: Value::Name(vta),
        });
        self.emit(Instr::Move {
            dst: Value::mem(Value::Temp(array), 4),
            src: len.clone(),
        });

        // Zero the elements.
        let index = self.fresh_temp();
        self.emit(Instr::Move {
            dst: Value::Temp(index),
            src: Value::Const(0),
        });
        let l_loop = self.fresh_label();
        let l_done = self.fresh_label();
        self.emit(Instr::Label(l_loop.clone()));
        self.emit(Instr::CJump {
            op: RelOp::Ge,
            lhs: Value::Temp(index),
            rhs: len,
            if_true: l_done.clone(),
        });
        let addr = self.element_addr(Value::Temp(array), Value::Temp(index));
        self.emit(Instr::Move {
            dst: addr,
            src: Value::Const(0),
        });
        self.emit(Instr::Bin {
            dst: index,
            op: BinOp::Add,
            lhs: Value::Temp(index),
            rhs: Value::Const(1),
        });
        self.emit(Instr::Jump(l_loop));
        self.emit(Instr::Label(l_done));
        Ok(Value::Temp(array))
    }

    fn cast(&mut self, expr: &Expr, operand: &Expr) -> Result<Value, InternalError> {
        let value = self.expr(operand)?;
        let Some(target) = self.ctx.typed.expr_types.get(&expr.id) else {
            internal_error!("untyped cast");
        };
        let Some(source) = self.ctx.typed.expr_types.get(&operand.id) else {
            internal_error!("untyped cast operand");
        };
        match target {
            Type::Primitive(PrimitiveKind::Byte) => {
                let dst = self.fresh_temp();
                self.emit(Instr::Un {
                    dst,
                    op: UnOp::SignExtendByte,
                    src: value,
                });
                Ok(Value::Temp(dst))
            }
            Type::Primitive(PrimitiveKind::Short) => {
                let dst = self.fresh_temp();
                self.emit(Instr::Un {
                    dst,
                    op: UnOp::SignExtendShort,
                    src: value,
                });
                Ok(Value::Temp(dst))
            }
            Type::Primitive(PrimitiveKind::Char) => {
                let dst = self.fresh_temp();
                self.emit(Instr::Un {
                    dst,
                    op: UnOp::ZeroExtendChar,
                    src: value,
                });
                Ok(Value::Temp(dst))
            }
            Type::Primitive(_) => Ok(value),
            _ if assignable(self.ctx.hierarchy, source, target) => Ok(value),
            _ => {
                // A genuine downcast: null passes, otherwise the subtype
                // column decides.
                let value = match value {
                    Value::Temp(_) => value,
                    other => self.load(other),
                };
                let l_ok = self.fresh_label();
                self.emit(Instr::CJump {
                    op: RelOp::Eq,
                    lhs: value.clone(),
                    rhs: Value::Const(0),
                    if_true: l_ok.clone(),
                });
                let n = self.ctx.table.classes.len();
                match self.ctx.layout.column_index(n, target) {
                    Some(idx) => {
                        let vtable = self.load(Value::mem(value.clone(), 0));
                        let column = self.load(Value::mem(vtable, 0));
                        let offset = 4 * i32::try_from(idx).unwrap_or(i32::MAX);
                        let bit = self.load(Value::mem(column, offset));
                        let exc = self.exception_label();
                        self.emit(Instr::CJump {
                            op: RelOp::Eq,
                            lhs: bit,
                            rhs: Value::Const(0),
                            if_true: exc,
                        });
                    }
                    None => {
                        // No runtime representation can satisfy the cast.
                        let exc = self.exception_label();
                        self.emit(Instr::Jump(exc));
                    }
                }
                self.emit(Instr::Label(l_ok));
                Ok(value)
            }
        }
    }

    fn instance_of(&mut self, expr: &Expr, operand: &Expr) -> Result<Value, InternalError> {
        let value = self.expr(operand)?;
        let value = match value {
            Value::Temp(_) | Value::Const(_) => value,
            other => self.load(other),
        };
        let Some(target) = self.ctx.typed.expr_types.get(&expr.id) else {
            internal_error!("untyped instanceof");
        };
        debug_assert!(target.is_boolean());
        let Some(queried) = instanceof_target(self.ctx, expr) else {
            internal_error!("instanceof without a queried type");
        };

        let dst = self.fresh_temp();
        self.emit(Instr::Move {
            dst: Value::Temp(dst),
            src: Value::Const(0),
        });
        let l_end = self.fresh_label();
        // A null receiver is never an instance of anything.
        self.emit(Instr::CJump {
            op: RelOp::Eq,
            lhs: value.clone(),
            rhs: Value::Const(0),
            if_true: l_end.clone(),
        });
        let n = self.ctx.table.classes.len();
        if let Some(idx) = self.ctx.layout.column_index(n, &queried) {
            let vtable = self.load(Value::mem(value, 0));
            let column = self.load(Value::mem(vtable, 0));
            let offset = 4 * i32::try_from(idx).unwrap_or(i32::MAX);
            let bit = self.load(Value::mem(column, offset));
            self.emit(Instr::Move {
                dst: Value::Temp(dst),
                src: bit,
            });
        }
        self.emit(Instr::Label(l_end));
        Ok(Value::Temp(dst))
    }
}

/// The queried type of an `instanceof`, lowered from its syntax.
fn instanceof_target(ctx: &LowerCtx<'_>, expr: &Expr) -> Option<Type> {
    let ExprKind::InstanceOf { ty, .. } = &expr.kind else {
        return None;
    };
    lower_type_expr(ctx, ty)
}

fn lower_type_expr(ctx: &LowerCtx<'_>, te: &crate::ast::TypeExpr) -> Option<Type> {
    match te {
        crate::ast::TypeExpr::Primitive(kind, _) => Some(Type::Primitive(*kind)),
        crate::ast::TypeExpr::Named(reference) => ctx
            .resolved
            .type_refs
            .get(&reference.id)
            .map(|&id| Type::Reference(id)),
        crate::ast::TypeExpr::Array(element, _) => {
            lower_type_expr(ctx, element).map(Type::array)
        }
    }
}

/// The comparison corresponding to a source-level operator, if any.
const fn rel_op(op: BinaryOp) -> Option<RelOp> {
    match op {
        BinaryOp::Eq => Some(RelOp::Eq),
        BinaryOp::Ne => Some(RelOp::Ne),
        BinaryOp::Lt => Some(RelOp::Lt),
        BinaryOp::Le => Some(RelOp::Le),
        BinaryOp::Gt => Some(RelOp::Gt),
        BinaryOp::Ge => Some(RelOp::Ge),
        _ => None,
    }
}

/// An assignable location, fully evaluated but not yet checked.
enum Place {
    /// A local or parameter temporary.
    Slot(Temp),
    /// A static field word.
    Static(Label),
    /// An instance field of an evaluated receiver.
    Field {
        /// The receiver value.
        receiver: Value,
        /// The field's byte offset.
        offset: i32,
    },
    /// An element of an evaluated array.
    Element {
        /// The array value.
        array: Value,
        /// The index value.
        index: Value,
    },
}
