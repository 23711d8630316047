//! The Joos 1W static type model: primitives, arrays, references, `null`,
//! and `void`, together with the conversion rules the type checker applies.

use crate::semantics::TypeId;

/// A primitive type.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, derive_more::Display)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum PrimitiveKind {
    /// The `byte` type.
    #[display("byte")]
    Byte,
    /// The `short` type.
    #[display("short")]
    Short,
    /// The `int` type.
    #[display("int")]
    Int,
    /// The `char` type.
    #[display("char")]
    Char,
    /// The `boolean` type.
    #[display("boolean")]
    Boolean,
}

impl PrimitiveKind {
    /// Whether this primitive participates in numeric promotion.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        !matches!(self, Self::Boolean)
    }

    /// The label-mangling descriptor character of the primitive.
    #[must_use]
    pub const fn descriptor(self) -> char {
        match self {
            Self::Byte => 'B',
            Self::Short => 'S',
            Self::Int => 'I',
            Self::Char => 'C',
            Self::Boolean => 'Z',
        }
    }
}

/// The static type of an expression or declaration.
///
/// Equality is structural. Reference types are identified by the [`TypeId`]
/// of their declaration in the program model.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum Type {
    /// A primitive type.
    Primitive(PrimitiveKind),
    /// An array type with the given element type.
    Array(Box<Type>),
    /// A class or interface type.
    Reference(TypeId),
    /// The type of the `null` literal.
    Null,
    /// The pseudo-type of `void` method returns.
    Void,
}

impl Type {
    /// The `int` type.
    pub const INT: Type = Type::Primitive(PrimitiveKind::Int);
    /// The `boolean` type.
    pub const BOOLEAN: Type = Type::Primitive(PrimitiveKind::Boolean);
    /// The `char` type.
    pub const CHAR: Type = Type::Primitive(PrimitiveKind::Char);

    /// Creates an array type over the given element type.
    #[must_use]
    pub fn array(element: Type) -> Type {
        Type::Array(Box::new(element))
    }

    /// Whether the type is a numeric primitive.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Primitive(p) if p.is_numeric())
    }

    /// Whether the type is `boolean`.
    #[must_use]
    pub fn is_boolean(&self) -> bool {
        matches!(self, Type::Primitive(PrimitiveKind::Boolean))
    }

    /// Whether the type can hold a reference (class, interface, array, or null).
    #[must_use]
    pub fn is_reference_like(&self) -> bool {
        matches!(self, Type::Reference(_) | Type::Array(_) | Type::Null)
    }

    /// The label-mangling descriptor of the type.
    #[must_use]
    pub fn descriptor(&self, canonical_name_of: &impl Fn(TypeId) -> String) -> String {
        match self {
            Type::Primitive(p) => p.descriptor().to_string(),
            Type::Array(elem) => format!("A{}", elem.descriptor(canonical_name_of)),
            Type::Reference(id) => format!("L{}$", canonical_name_of(*id)),
            Type::Null => "0".to_string(),
            Type::Void => "V".to_string(),
        }
    }
}

/// The subtype relation over declared reference types.
///
/// Implemented by the hierarchy pass; the conversion rules below only need
/// this single question answered.
pub trait Subtyping {
    /// Whether `sub` is the same type as, or a declared subtype of, `sup`
    /// along the `extends`/`implements` closure.
    fn is_subtype(&self, sub: TypeId, sup: TypeId) -> bool;

    /// The id of `java.lang.Object`.
    fn object(&self) -> TypeId;
}

/// Whether `from` widens to `to` among primitives: `byte → short → int` and
/// `char → int`. There is no conversion between `char` and `short`.
#[must_use]
pub fn widens_to(from: PrimitiveKind, to: PrimitiveKind) -> bool {
    use PrimitiveKind::{Byte, Char, Int, Short};
    if from == to {
        return true;
    }
    matches!((from, to), (Byte, Short) | (Byte, Int) | (Short, Int) | (Char, Int))
}

/// The assignability relation `source → target`.
#[must_use]
pub fn assignable(subtyping: &impl Subtyping, source: &Type, target: &Type) -> bool {
    match (source, target) {
        _ if source == target => !matches!(source, Type::Void),
        (Type::Primitive(s), Type::Primitive(t)) => widens_to(*s, *t),
        (Type::Null, t) => t.is_reference_like() && *t != Type::Null,
        (Type::Reference(s), Type::Reference(t)) => subtyping.is_subtype(*s, *t),
        // Arrays are subtypes of Object; element covariance applies to
        // reference elements only, primitives are invariant.
        (Type::Array(_), Type::Reference(t)) => *t == subtyping.object(),
        (Type::Array(s), Type::Array(t)) => match (s.as_ref(), t.as_ref()) {
            (Type::Reference(se), Type::Reference(te)) => subtyping.is_subtype(*se, *te),
            (se, te) => se == te,
        },
        _ => false,
    }
}

/// Whether the cast `(target) source` is permitted.
///
/// Numeric casts are allowed in both directions; reference casts are allowed
/// when the types are related or when an interface is involved and the class
/// side is not final (the compile-time narrowing rule).
#[must_use]
pub fn castable(
    subtyping: &impl Subtyping,
    is_interface: &impl Fn(TypeId) -> bool,
    source: &Type,
    target: &Type,
) -> bool {
    match (source, target) {
        _ if source == target => true,
        (Type::Primitive(s), Type::Primitive(t)) => s.is_numeric() && t.is_numeric(),
        (Type::Null, t) | (t, Type::Null) => t.is_reference_like(),
        (Type::Reference(s), Type::Reference(t)) => {
            subtyping.is_subtype(*s, *t)
                || subtyping.is_subtype(*t, *s)
                || is_interface(*s)
                || is_interface(*t)
        }
        (Type::Array(_), Type::Reference(t)) | (Type::Reference(t), Type::Array(_)) => {
            *t == subtyping.object()
        }
        (Type::Array(s), Type::Array(t)) => match (s.as_ref(), t.as_ref()) {
            (Type::Reference(_), Type::Reference(_)) => {
                castable(subtyping, is_interface, s, t)
            }
            (se, te) => se == te,
        },
        _ => false,
    }
}

/// Binary numeric promotion: both operands must be numeric and the result
/// is always `int`.
#[must_use]
pub fn binary_numeric_promotion(lhs: &Type, rhs: &Type) -> Option<Type> {
    (lhs.is_numeric() && rhs.is_numeric()).then_some(Type::INT)
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use proptest::prelude::*;

    use super::*;
    use crate::semantics::TypeId;

    /// A toy hierarchy: 0 = Object, 1 extends 0, 2 extends 1, 3 unrelated.
    struct Toy;

    impl Subtyping for Toy {
        fn is_subtype(&self, sub: TypeId, sup: TypeId) -> bool {
            let chains: HashSet<(u32, u32)> =
                HashSet::from([(1, 0), (2, 1), (2, 0), (3, 0)]);
            sub == sup || chains.contains(&(sub.0, sup.0))
        }

        fn object(&self) -> TypeId {
            TypeId(0)
        }
    }

    #[test]
    fn widening_excludes_char_short() {
        use PrimitiveKind::{Byte, Char, Int, Short};
        assert!(widens_to(Byte, Int));
        assert!(widens_to(Char, Int));
        assert!(!widens_to(Char, Short));
        assert!(!widens_to(Short, Char));
        assert!(!widens_to(Int, Short));
    }

    #[test]
    fn null_assigns_to_references_and_arrays() {
        assert!(assignable(&Toy, &Type::Null, &Type::Reference(TypeId(1))));
        assert!(assignable(&Toy, &Type::Null, &Type::array(Type::INT)));
        assert!(!assignable(&Toy, &Type::Null, &Type::INT));
    }

    #[test]
    fn arrays_are_covariant_for_references_only() {
        let sub_arr = Type::array(Type::Reference(TypeId(2)));
        let sup_arr = Type::array(Type::Reference(TypeId(0)));
        assert!(assignable(&Toy, &sub_arr, &sup_arr));
        assert!(!assignable(&Toy, &sup_arr, &sub_arr));

        let byte_arr = Type::array(Type::Primitive(PrimitiveKind::Byte));
        let int_arr = Type::array(Type::INT);
        assert!(!assignable(&Toy, &byte_arr, &int_arr));
        assert!(assignable(&Toy, &byte_arr, &Type::Reference(TypeId(0))));
    }

    #[test]
    fn unrelated_classes_do_not_cast() {
        let is_interface = |_| false;
        assert!(!castable(
            &Toy,
            &is_interface,
            &Type::Reference(TypeId(1)),
            &Type::Reference(TypeId(3)),
        ));
        assert!(castable(
            &Toy,
            &is_interface,
            &Type::Reference(TypeId(0)),
            &Type::Reference(TypeId(2)),
        ));
    }

    proptest! {
        #[test]
        fn widening_is_reflexive_and_antisymmetric(
            a in any::<PrimitiveKind>(),
            b in any::<PrimitiveKind>(),
        ) {
            prop_assert!(widens_to(a, a));
            if a != b && widens_to(a, b) {
                prop_assert!(!widens_to(b, a));
            }
        }
    }
}
