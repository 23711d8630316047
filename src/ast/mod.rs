//! The abstract syntax tree produced by the parser.
//!
//! Nodes are allocated once and read-only afterwards. Every expression,
//! statement, and type reference carries a program-unique [`NodeId`]; the
//! analysis passes record their results in side tables keyed by those ids
//! rather than mutating the tree.

use bitflags::bitflags;

use crate::diagnostics::Span;

/// A program-unique id of an AST node, used as the key of pass-owned
/// attribute tables.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display, derive_more::From,
)]
#[display("n{_0}")]
#[repr(transparent)]
pub struct NodeId(pub u32);

/// A monotonically increasing [`NodeId`] source shared by all parses of one
/// compilation.
#[derive(Debug, Default)]
pub struct NodeIdGen {
    next: u32,
}

impl NodeIdGen {
    /// Creates a generator starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Produces the next unused id.
    pub fn fresh(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        id
    }

    /// The number of ids handed out so far.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.next
    }
}

bitflags! {
    /// Declaration modifiers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Modifiers: u16 {
        /// Declared `public`.
        const PUBLIC = 0x0001;
        /// Declared `protected`.
        const PROTECTED = 0x0002;
        /// Declared `static`.
        const STATIC = 0x0004;
        /// Declared `final`.
        const FINAL = 0x0008;
        /// Declared `abstract`.
        const ABSTRACT = 0x0010;
        /// Declared `native`.
        const NATIVE = 0x0020;
    }
}

/// An identifier with its source position.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
#[display("{text}")]
pub struct Ident {
    /// The identifier text.
    pub text: String,
    /// Where the identifier appears.
    pub span: Span,
}

/// A possibly-dotted name, not yet classified.
#[derive(Debug, Clone)]
pub struct Name {
    /// The id under which the resolver records the classification.
    pub id: NodeId,
    /// The dot-separated segments, in source order. Never empty.
    pub segments: Vec<Ident>,
    /// The span of the whole name.
    pub span: Span,
}

impl Name {
    /// The dotted source text of the name.
    #[must_use]
    pub fn dotted(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// A syntactic reference to a named type, resolved by the environment pass.
#[derive(Debug, Clone)]
pub struct TypeRef {
    /// The id under which the resolver records the referenced declaration.
    pub id: NodeId,
    /// The dot-separated segments of the name.
    pub segments: Vec<Ident>,
    /// The span of the whole reference.
    pub span: Span,
}

impl TypeRef {
    /// The dotted source text of the reference.
    #[must_use]
    pub fn dotted(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// A syntactic type: a primitive, a named reference, or an array thereof.
#[derive(Debug, Clone)]
pub enum TypeExpr {
    /// A primitive type keyword.
    Primitive(crate::types::PrimitiveKind, Span),
    /// A class or interface name.
    Named(TypeRef),
    /// An array of the element type. Joos has no multidimensional creation,
    /// but array-of-array declarations are still syntactically types.
    Array(Box<TypeExpr>, Span),
}

impl TypeExpr {
    /// The span of the type expression.
    #[must_use]
    pub fn span(&self) -> Span {
        match self {
            TypeExpr::Primitive(_, span) | TypeExpr::Array(_, span) => *span,
            TypeExpr::Named(r) => r.span,
        }
    }
}

/// One parsed source file.
#[derive(Debug)]
pub struct CompilationUnit {
    /// The path the unit was read from, used in diagnostics and for the
    /// class-name/file-name agreement check.
    pub file: String,
    /// The declared package, empty for the default package.
    pub package: Vec<Ident>,
    /// The import declarations, in source order.
    pub imports: Vec<Import>,
    /// The single top-level type declaration.
    pub decl: TypeDecl,
}

impl CompilationUnit {
    /// The dotted package name, empty string for the default package.
    #[must_use]
    pub fn package_name(&self) -> String {
        self.package
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// The canonical (package-qualified) name of the unit's type.
    #[must_use]
    pub fn canonical_name(&self) -> String {
        let pkg = self.package_name();
        if pkg.is_empty() {
            self.decl.name.text.clone()
        } else {
            format!("{pkg}.{}", self.decl.name.text)
        }
    }
}

/// The kind of an import declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    /// `import p.C;`
    Single,
    /// `import p.*;`
    OnDemand,
}

/// An import declaration.
#[derive(Debug)]
pub struct Import {
    /// Whether the import names a type or a package.
    pub kind: ImportKind,
    /// The imported name (`p.C` or the `p` of `p.*`).
    pub segments: Vec<Ident>,
    /// The span of the declaration.
    pub span: Span,
}

impl Import {
    /// The dotted source text of the imported name.
    #[must_use]
    pub fn dotted(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Whether a declaration is a class or an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum TypeKind {
    /// A class declaration.
    #[display("class")]
    Class,
    /// An interface declaration.
    #[display("interface")]
    Interface,
}

/// A top-level class or interface declaration.
#[derive(Debug)]
pub struct TypeDecl {
    /// Class or interface.
    pub kind: TypeKind,
    /// The simple name.
    pub name: Ident,
    /// The declared modifiers.
    pub modifiers: Modifiers,
    /// `extends` clause: at most one entry for classes, any number for
    /// interfaces.
    pub extends: Vec<TypeRef>,
    /// `implements` clause; always empty for interfaces.
    pub implements: Vec<TypeRef>,
    /// Declared fields, in declaration order.
    pub fields: Vec<Field>,
    /// Declared methods, in declaration order.
    pub methods: Vec<Method>,
    /// Declared constructors; always empty for interfaces.
    pub constructors: Vec<Constructor>,
    /// The span of the declaration header.
    pub span: Span,
}

/// A field declaration.
#[derive(Debug)]
pub struct Field {
    /// The id under which layout and constant-folding results are recorded.
    pub id: NodeId,
    /// The field name.
    pub name: Ident,
    /// The declared modifiers.
    pub modifiers: Modifiers,
    /// The declared type.
    pub ty: TypeExpr,
    /// The initializer expression, if any.
    pub init: Option<Expr>,
    /// The span of the declaration.
    pub span: Span,
}

/// A method declaration.
#[derive(Debug)]
pub struct Method {
    /// The method name.
    pub name: Ident,
    /// The declared modifiers.
    pub modifiers: Modifiers,
    /// The return type; `None` for `void`.
    pub return_type: Option<TypeExpr>,
    /// The formal parameters, in order.
    pub params: Vec<Param>,
    /// The `throws` clause type names (checked for resolvability only).
    pub throws: Vec<TypeRef>,
    /// The body; absent for `abstract` and `native` methods.
    pub body: Option<Block>,
    /// The span of the declaration header.
    pub span: Span,
}

/// A constructor declaration.
#[derive(Debug)]
pub struct Constructor {
    /// The declared name, which the weeder checks against the class name.
    pub name: Ident,
    /// The declared modifiers.
    pub modifiers: Modifiers,
    /// The formal parameters, in order.
    pub params: Vec<Param>,
    /// The body.
    pub body: Block,
    /// The span of the declaration header.
    pub span: Span,
}

/// A formal parameter.
#[derive(Debug)]
pub struct Param {
    /// The id the resolver keys the parameter's local slot on.
    pub id: NodeId,
    /// The parameter name.
    pub name: Ident,
    /// The declared type.
    pub ty: TypeExpr,
}

/// A brace-delimited statement sequence.
#[derive(Debug)]
pub struct Block {
    /// The statements, in order.
    pub statements: Vec<Stmt>,
    /// The span of the opening brace.
    pub span: Span,
}

/// A statement. Reachability and completion flags are recorded against
/// [`id`](Stmt::id) by the static analyser.
#[derive(Debug)]
pub struct Stmt {
    /// The id under which analyser attributes are recorded.
    pub id: NodeId,
    /// The statement itself.
    pub kind: StmtKind,
    /// The span of the first token.
    pub span: Span,
}

/// The statement variants of Joos 1W.
#[derive(Debug)]
pub enum StmtKind {
    /// `;`
    Empty,
    /// An expression statement.
    Expr(Expr),
    /// A nested block.
    Block(Block),
    /// A local variable declaration.
    LocalDecl(LocalDecl),
    /// `if` with optional `else`.
    If {
        /// The condition.
        cond: Expr,
        /// The then-branch.
        then_branch: Box<Stmt>,
        /// The else-branch, if present.
        else_branch: Option<Box<Stmt>>,
    },
    /// `while`.
    While {
        /// The condition.
        cond: Expr,
        /// The loop body.
        body: Box<Stmt>,
    },
    /// `for`. Every part is optional, as in Java.
    For {
        /// The initializer: a local declaration or an expression statement.
        init: Option<Box<Stmt>>,
        /// The condition.
        cond: Option<Expr>,
        /// The update expression.
        update: Option<Expr>,
        /// The loop body.
        body: Box<Stmt>,
    },
    /// `return` with optional value.
    Return(Option<Expr>),
}

/// A local variable declaration, also usable as a `for` initializer.
#[derive(Debug)]
pub struct LocalDecl {
    /// The id the resolver keys the local's slot on.
    pub id: NodeId,
    /// The variable name.
    pub name: Ident,
    /// The declared type.
    pub ty: TypeExpr,
    /// The initializer, if present. Reads before assignment are caught by
    /// the definite-assignment pass.
    pub init: Option<Expr>,
}

/// An expression. The type checker assigns exactly one type to every
/// expression, recorded against [`id`](Expr::id).
#[derive(Debug)]
pub struct Expr {
    /// The id under which the computed type, binding, and constant value
    /// are recorded.
    pub id: NodeId,
    /// The expression itself.
    pub kind: ExprKind,
    /// The span of the first token.
    pub span: Span,
}

/// A literal token value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    /// An integer literal. Stored unsigned; the weeder enforces the
    /// `[0, 2^31]` bound and the unary-minus rule for `2^31`.
    Int(u32),
    /// `true` or `false`.
    Bool(bool),
    /// A character literal, already unescaped.
    Char(char),
    /// A string literal, already unescaped.
    String(String),
    /// `null`.
    Null,
}

/// A unary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum UnaryOp {
    /// Arithmetic negation.
    #[display("-")]
    Minus,
    /// Logical complement.
    #[display("!")]
    Not,
}

/// A binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum BinaryOp {
    /// `+`, numeric addition or string concatenation.
    #[display("+")]
    Add,
    /// `-`
    #[display("-")]
    Sub,
    /// `*`
    #[display("*")]
    Mul,
    /// `/`
    #[display("/")]
    Div,
    /// `%`
    #[display("%")]
    Rem,
    /// `<`
    #[display("<")]
    Lt,
    /// `<=`
    #[display("<=")]
    Le,
    /// `>`
    #[display(">")]
    Gt,
    /// `>=`
    #[display(">=")]
    Ge,
    /// `==`
    #[display("==")]
    Eq,
    /// `!=`
    #[display("!=")]
    Ne,
    /// Eager boolean and.
    #[display("&")]
    And,
    /// Eager boolean or.
    #[display("|")]
    Or,
    /// Short-circuit and.
    #[display("&&")]
    AndAnd,
    /// Short-circuit or.
    #[display("||")]
    OrOr,
}

impl BinaryOp {
    /// Whether the operator is arithmetic (operands numeric, result `int`).
    #[must_use]
    pub const fn is_arithmetic(self) -> bool {
        matches!(self, Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Rem)
    }

    /// Whether the operator is a numeric comparison yielding `boolean`.
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        matches!(self, Self::Lt | Self::Le | Self::Gt | Self::Ge)
    }

    /// Whether the operator is `==` or `!=`.
    #[must_use]
    pub const fn is_equality(self) -> bool {
        matches!(self, Self::Eq | Self::Ne)
    }

    /// Whether the operator takes boolean operands and yields `boolean`.
    #[must_use]
    pub const fn is_boolean(self) -> bool {
        matches!(self, Self::And | Self::Or | Self::AndAnd | Self::OrOr)
    }
}

/// The expression variants of Joos 1W.
#[derive(Debug)]
pub enum ExprKind {
    /// A literal.
    Literal(Literal),
    /// `this`.
    This,
    /// An unclassified (possibly dotted) name.
    Name(Name),
    /// `primary.field`, including the `length` pseudo-field of arrays.
    FieldAccess {
        /// The receiver expression.
        receiver: Box<Expr>,
        /// The accessed field name.
        name: Ident,
    },
    /// `array[index]`.
    ArrayAccess {
        /// The array expression.
        array: Box<Expr>,
        /// The index expression.
        index: Box<Expr>,
    },
    /// A method invocation. With no receiver, `name` may be dotted and its
    /// prefix is disambiguated by the resolver; with a receiver, `name` is a
    /// single identifier.
    Call {
        /// The receiver expression, if syntactically present.
        receiver: Option<Box<Expr>>,
        /// The (possibly dotted) method name.
        name: Name,
        /// The actual arguments.
        args: Vec<Expr>,
    },
    /// `new T(args)`.
    New {
        /// The instantiated class.
        ty: TypeRef,
        /// The constructor arguments.
        args: Vec<Expr>,
    },
    /// `new T[length]`.
    NewArray {
        /// The element type.
        element: TypeExpr,
        /// The length expression.
        length: Box<Expr>,
    },
    /// `(T) expr`.
    Cast {
        /// The target type.
        ty: TypeExpr,
        /// The operand.
        expr: Box<Expr>,
    },
    /// `expr instanceof T`.
    InstanceOf {
        /// The tested expression.
        expr: Box<Expr>,
        /// The queried type.
        ty: TypeExpr,
    },
    /// A unary operation.
    Unary {
        /// The operator.
        op: UnaryOp,
        /// The operand.
        expr: Box<Expr>,
    },
    /// A binary operation.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// The left operand.
        lhs: Box<Expr>,
        /// The right operand.
        rhs: Box<Expr>,
    },
    /// An assignment. The left side is a name, field access, or array access.
    Assign {
        /// The assigned place.
        target: Box<Expr>,
        /// The assigned value.
        value: Box<Expr>,
    },
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn node_ids_are_unique_and_dense() {
        let mut generator = NodeIdGen::new();
        let a = generator.fresh();
        let b = generator.fresh();
        assert_ne!(a, b);
        assert_eq!(generator.count(), 2);
    }

    #[test]
    fn canonical_name_joins_package_and_simple_name() {
        let unit = CompilationUnit {
            file: "A.java".into(),
            package: vec![
                Ident { text: "p".into(), span: crate::diagnostics::Span::FILE },
                Ident { text: "q".into(), span: crate::diagnostics::Span::FILE },
            ],
            imports: vec![],
            decl: TypeDecl {
                kind: TypeKind::Class,
                name: Ident { text: "A".into(), span: crate::diagnostics::Span::FILE },
                modifiers: Modifiers::PUBLIC,
                extends: vec![],
                implements: vec![],
                fields: vec![],
                methods: vec![],
                constructors: vec![],
                span: crate::diagnostics::Span::FILE,
            },
        };
        assert_eq!(unit.canonical_name(), "p.q.A");
        assert_eq!(unit.package_name(), "p.q");
    }
}
