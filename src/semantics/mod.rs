//! The static-semantic passes: weeding, type indexing and linking, hierarchy
//! checking, name resolution, and type checking.
//!
//! Each pass is a pure function from the program model built so far to a new
//! attribute table plus diagnostics; nothing built earlier is mutated.

pub mod declare;
pub mod hierarchy;
pub mod prelude;
pub mod resolve;
pub mod type_index;
pub mod typeck;
pub mod weeder;

use std::collections::HashMap;

use crate::{
    ast::{Modifiers, NodeId, TypeKind},
    types::Type,
};

/// The id of a declared class or interface: the index of its compilation
/// unit in the program. Edges between declarations are id-valued; the
/// arenas own the nodes and passes borrow.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display, derive_more::From,
)]
#[display("t{_0}")]
#[repr(transparent)]
pub struct TypeId(pub u32);

impl TypeId {
    /// The unit index the id denotes.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identifies a declared method or constructor within the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
#[display("{owner}#{}{index}", if *is_ctor { "ctor" } else { "m" })]
pub struct MethodId {
    /// The declaring type.
    pub owner: TypeId,
    /// The index into the declaring type's method (or constructor) list.
    pub index: u32,
    /// Whether this identifies a constructor.
    pub is_ctor: bool,
}

/// Identifies a declared field within the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId {
    /// The declaring type.
    pub owner: TypeId,
    /// The index into the declaring type's field list.
    pub index: u32,
}

/// A method-body-like region: a method body, a constructor body, or a field
/// initializer. Used to key per-body attribute tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyId {
    /// The body of the `index`-th method of `TypeId`.
    Method(TypeId, u32),
    /// The body of the `index`-th constructor of `TypeId`.
    Ctor(TypeId, u32),
    /// The initializer of the `index`-th field of `TypeId`.
    FieldInit(TypeId, u32),
}

/// A declared field, with its type linked.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    /// The field name.
    pub name: String,
    /// The declared modifiers.
    pub modifiers: Modifiers,
    /// The linked declared type.
    pub ty: Type,
    /// The declaration order index within the declaring type.
    pub index: u32,
}

impl FieldInfo {
    /// Whether the field is `static`.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.modifiers.contains(Modifiers::STATIC)
    }
}

/// A declared method or constructor, with parameter and return types linked.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    /// The simple name; the class name for constructors.
    pub name: String,
    /// The declared modifiers.
    pub modifiers: Modifiers,
    /// The linked return type; [`Type::Void`] for `void` and constructors.
    pub return_type: Type,
    /// The linked parameter types, in order.
    pub params: Vec<Type>,
    /// The declaration order index.
    pub index: u32,
    /// Whether this is a constructor.
    pub is_ctor: bool,
}

impl MethodInfo {
    /// The inheritance identity of the method: simple name plus parameter
    /// types.
    #[must_use]
    pub fn signature(&self) -> MethodSig {
        MethodSig {
            name: self.name.clone(),
            params: self.params.clone(),
        }
    }

    /// Whether the method is `static`.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.modifiers.contains(Modifiers::STATIC)
    }

    /// Whether the method is `abstract` (declared so, or an interface
    /// method, which never has a body).
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.modifiers.contains(Modifiers::ABSTRACT)
    }
}

/// The identity of a method within an inheritance frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSig {
    /// The simple name.
    pub name: String,
    /// The parameter types.
    pub params: Vec<Type>,
}

/// A class or interface with all declaration types linked.
#[derive(Debug)]
pub struct ClassInfo {
    /// The id (also the unit index).
    pub id: TypeId,
    /// Class or interface.
    pub kind: TypeKind,
    /// The canonical name.
    pub canonical: String,
    /// The declaring package name, empty for the default package.
    pub package: String,
    /// The declared modifiers.
    pub modifiers: Modifiers,
    /// The linked superclass. `None` for `java.lang.Object` and for
    /// interfaces (whose `Object` membership the hierarchy pass supplies).
    pub super_class: Option<TypeId>,
    /// The linked superinterfaces.
    pub interfaces: Vec<TypeId>,
    /// Declared fields in declaration order.
    pub fields: Vec<FieldInfo>,
    /// Declared methods in declaration order.
    pub methods: Vec<MethodInfo>,
    /// Declared constructors in declaration order.
    pub constructors: Vec<MethodInfo>,
}

impl ClassInfo {
    /// Whether this declaration is an interface.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.kind == TypeKind::Interface
    }

    /// Whether this declaration is `abstract`.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.modifiers.contains(Modifiers::ABSTRACT) || self.is_interface()
    }
}

/// All linked declarations, indexed by [`TypeId`].
#[derive(Debug, Default)]
pub struct ClassTable {
    /// The classes, in unit order.
    pub classes: Vec<ClassInfo>,
}

impl ClassTable {
    /// The class with the given id.
    #[must_use]
    pub fn get(&self, id: TypeId) -> &ClassInfo {
        &self.classes[id.index()]
    }

    /// Iterates over all classes in unit order.
    pub fn iter(&self) -> impl Iterator<Item = &ClassInfo> {
        self.classes.iter()
    }
}

/// The base classification of an ambiguous name's longest resolvable prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameBase {
    /// A local variable or formal parameter, identified by its frame slot.
    Local(u32),
    /// A field of the enclosing instance (or of the enclosing class, when
    /// static), found on the declaring type given here.
    Field(FieldId),
    /// A type, for static member access.
    Type(TypeId),
}

/// The resolver's classification of one [`crate::ast::Name`].
#[derive(Debug, Clone, Copy)]
pub struct ResolvedName {
    /// What the longest resolvable prefix is.
    pub base: NameBase,
    /// How many leading segments the base consumed. The remaining segments
    /// are instance field accesses typed by the type checker.
    pub consumed: usize,
}

/// The resolver's output tables.
#[derive(Debug, Default)]
pub struct Resolved {
    /// Classification per [`crate::ast::Name`] node.
    pub names: HashMap<NodeId, ResolvedName>,
    /// Referenced declaration per [`crate::ast::TypeRef`] node, covering
    /// both declaration sites and body sites (casts, `new`, `instanceof`,
    /// local types).
    pub type_refs: HashMap<NodeId, TypeId>,
    /// Frame slot per local declaration and parameter node.
    pub slots: HashMap<NodeId, u32>,
    /// The body's local-slot high-water mark (parameters included).
    pub frame_locals: HashMap<BodyId, u32>,
}
