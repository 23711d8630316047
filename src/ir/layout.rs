//! Object layout, vtable data, and subtype-test columns.
//!
//! Every object starts with a vtable pointer; instance fields follow in
//! 4-byte slots, inherited fields first. A vtable's word 0 points at the
//! class's subtype column, and the dispatch slots follow from word 1.
//! Arrays carry a per-element-type vtable so `instanceof` over array types
//! reads the same column format.

use std::collections::HashMap;

use crate::{
    diagnostics::{InternalError, internal_error},
    ir::Label,
    semantics::{ClassTable, FieldId, MethodId, TypeId, hierarchy::Hierarchy},
    types::{PrimitiveKind, Subtyping, Type},
};

/// All primitive kinds that can be array elements, in column order.
const PRIMITIVES: [PrimitiveKind; 5] = [
    PrimitiveKind::Byte,
    PrimitiveKind::Short,
    PrimitiveKind::Int,
    PrimitiveKind::Char,
    PrimitiveKind::Boolean,
];

/// The fixed size of an array header: vtable pointer plus length.
pub const ARRAY_HEADER: i32 = 8;

/// The computed layout tables.
#[derive(Debug)]
pub struct Layout {
    /// Allocation size per class, header included.
    object_size: Vec<i32>,
    /// Byte offset of every instance field within its object.
    field_offsets: HashMap<FieldId, i32>,
    /// The number of entries in every subtype column.
    column_len: usize,
}

impl Layout {
    /// Computes sizes and field offsets for every class.
    #[must_use]
    pub fn compute(table: &ClassTable) -> Layout {
        let n = table.classes.len();
        let mut layout = Layout {
            object_size: vec![4; n],
            field_offsets: HashMap::new(),
            column_len: 2 * n + PRIMITIVES.len(),
        };
        for class in table.iter() {
            layout.class_fields(table, class.id);
        }
        layout
    }

    /// Assigns offsets along the superclass chain, inherited fields first.
    /// Returns the size of the instance. Recomputation along shared chains
    /// is idempotent.
    fn class_fields(&mut self, table: &ClassTable, id: TypeId) -> i32 {
        let class = table.get(id);
        let base = match class.super_class {
            Some(sup) => self.class_fields(table, sup),
            None => 4,
        };
        let mut offset = base;
        for (fi, field) in class.fields.iter().enumerate() {
            if field.is_static() {
                continue;
            }
            self.field_offsets.insert(
                FieldId {
                    owner: id,
                    index: u32::try_from(fi).unwrap_or(u32::MAX),
                },
                offset,
            );
            offset += 4;
        }
        self.object_size[id.index()] = offset;
        offset
    }

    /// The allocation size of a class instance in bytes.
    #[must_use]
    pub fn object_size(&self, id: TypeId) -> i32 {
        self.object_size[id.index()]
    }

    /// The byte offset of an instance field.
    ///
    /// # Errors
    ///
    /// Internal if the field is static or unknown.
    pub fn field_offset(&self, field: FieldId) -> Result<i32, InternalError> {
        match self.field_offsets.get(&field) {
            Some(&offset) => Ok(offset),
            None => internal_error!("no layout offset for field {}#{}", field.owner, field.index),
        }
    }

    /// The number of words in every subtype column.
    #[must_use]
    pub fn column_len(&self) -> usize {
        self.column_len
    }

    /// The column index a type occupies, when it can be tested at runtime.
    #[must_use]
    pub fn column_index(&self, n: usize, ty: &Type) -> Option<usize> {
        match ty {
            Type::Reference(id) => Some(id.index()),
            Type::Array(elem) => match elem.as_ref() {
                Type::Reference(id) => Some(n + id.index()),
                Type::Primitive(p) => {
                    PRIMITIVES.iter().position(|q| q == p).map(|i| 2 * n + i)
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// The subtype column of a class: one word per testable type.
    #[must_use]
    pub fn class_column(&self, hierarchy: &Hierarchy, id: TypeId) -> Vec<bool> {
        let mut bits = vec![false; self.column_len];
        for &sup in hierarchy.supertypes(id) {
            bits[sup.index()] = true;
        }
        bits
    }

    /// The subtype column of an array type.
    pub fn array_column(
        &self,
        hierarchy: &Hierarchy,
        n: usize,
        element: &Type,
    ) -> Result<Vec<bool>, InternalError> {
        let mut bits = vec![false; self.column_len];
        bits[hierarchy.object().index()] = true;
        match element {
            Type::Reference(id) => {
                // Covariance: T[] is-a S[] for every supertype S of T.
                for &sup in hierarchy.supertypes(*id) {
                    bits[n + sup.index()] = true;
                }
            }
            Type::Primitive(p) => {
                let Some(i) = PRIMITIVES.iter().position(|q| q == p) else {
                    internal_error!("array of unexpected primitive {p}");
                };
                bits[2 * n + i] = true;
            }
            other => internal_error!("array of unexpected element type {other:?}"),
        }
        Ok(bits)
    }
}

// ----------------------------------------------------------------------
// Label mangling
// ----------------------------------------------------------------------

/// The label of a declared method or constructor.
#[must_use]
pub fn method_label(table: &ClassTable, id: MethodId) -> Label {
    let class = table.get(id.owner);
    let info = if id.is_ctor {
        &class.constructors[id.index as usize]
    } else {
        &class.methods[id.index as usize]
    };
    let descriptor: String = info
        .params
        .iter()
        .map(|p| p.descriptor(&|t| table.get(t).canonical.clone()))
        .collect();
    if id.is_ctor {
        Label::new(format!("CTOR${}${descriptor}", class.canonical))
    } else if info.modifiers.contains(crate::ast::Modifiers::NATIVE) {
        Label::new(format!("NATIVE{}.{}", class.canonical, info.name))
    } else {
        Label::new(format!("{}.{}${descriptor}", class.canonical, info.name))
    }
}

/// The label of a class's static initializer function.
#[must_use]
pub fn class_init_label(table: &ClassTable, id: TypeId) -> Label {
    Label::new(format!("CINIT${}", table.get(id).canonical))
}

/// The label of a static field's storage word.
#[must_use]
pub fn static_field_label(table: &ClassTable, field: FieldId) -> Label {
    let class = table.get(field.owner);
    Label::new(format!(
        "STATIC${}.{}",
        class.canonical, class.fields[field.index as usize].name
    ))
}

/// The label of a class vtable.
#[must_use]
pub fn vtable_label(table: &ClassTable, id: TypeId) -> Label {
    Label::new(format!("VT${}", table.get(id).canonical))
}

/// The label of a class's subtype column.
#[must_use]
pub fn column_label(table: &ClassTable, id: TypeId) -> Label {
    Label::new(format!("COL${}", table.get(id).canonical))
}

/// The labels of an array vtable and its column, keyed by element type.
#[must_use]
pub fn array_vtable_labels(table: &ClassTable, element: &Type) -> Option<(Label, Label)> {
    let key = match element {
        Type::Reference(id) => table.get(*id).canonical.clone(),
        Type::Primitive(p) => p.to_string(),
        _ => return None,
    };
    Some((
        Label::new(format!("VTA${key}")),
        Label::new(format!("COLA${key}")),
    ))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        ast::NodeIdGen,
        semantics::{declare, hierarchy, type_index::TypeIndex},
        syntax,
    };

    const OBJECT: (&str, &str) =
        ("Object.java", "package java.lang; public class Object { public Object() {} }");

    fn build(sources: &[(&str, &str)]) -> (ClassTable, Hierarchy, Layout) {
        let mut ids = NodeIdGen::new();
        let units: Vec<_> = sources
            .iter()
            .map(|(file, text)| syntax::parse_source(file, text, &mut ids).expect("parse"))
            .collect();
        let (index, _) = TypeIndex::build(&units);
        let (table, d) = declare::link(&units, &index);
        assert!(!d.has_errors());
        let (h, d) = hierarchy::check(&table);
        assert!(!d.has_errors());
        let layout = Layout::compute(&table);
        (table, h, layout)
    }

    #[test]
    fn own_fields_follow_inherited_fields() {
        let (table, _, layout) = build(&[
            OBJECT,
            ("A.java", "public class A { public A() {} public int x; public int y; }"),
            ("B.java", "public class B extends A { public B() {} public int z; }"),
        ]);
        let a = table.iter().find(|c| c.canonical == "A").unwrap().id;
        let b = table.iter().find(|c| c.canonical == "B").unwrap().id;
        assert_eq!(layout.field_offset(FieldId { owner: a, index: 0 }).unwrap(), 4);
        assert_eq!(layout.field_offset(FieldId { owner: a, index: 1 }).unwrap(), 8);
        assert_eq!(layout.field_offset(FieldId { owner: b, index: 0 }).unwrap(), 12);
        assert_eq!(layout.object_size(b), 16);
        assert_eq!(layout.object_size(a), 12);
    }

    #[test]
    fn static_fields_take_no_instance_space() {
        let (table, _, layout) = build(&[
            OBJECT,
            ("A.java", "public class A { public A() {} public static int s; public int x; }"),
        ]);
        let a = table.iter().find(|c| c.canonical == "A").unwrap().id;
        assert_eq!(layout.object_size(a), 8);
        assert_eq!(layout.field_offset(FieldId { owner: a, index: 1 }).unwrap(), 4);
    }

    #[test]
    fn subtype_columns_reflect_the_hierarchy() {
        let (table, h, layout) = build(&[
            OBJECT,
            ("A.java", "public class A { public A() {} }"),
            ("B.java", "public class B extends A { public B() {} }"),
        ]);
        let a = table.iter().find(|c| c.canonical == "A").unwrap().id;
        let b = table.iter().find(|c| c.canonical == "B").unwrap().id;
        let column = layout.class_column(&h, b);
        assert!(column[a.index()]);
        assert!(column[b.index()]);
        let column = layout.class_column(&h, a);
        assert!(!column[b.index()]);
    }

    #[test]
    fn array_columns_are_covariant_for_references() {
        let (table, h, layout) = build(&[
            OBJECT,
            ("A.java", "public class A { public A() {} }"),
            ("B.java", "public class B extends A { public B() {} }"),
        ]);
        let n = table.classes.len();
        let a = table.iter().find(|c| c.canonical == "A").unwrap().id;
        let b = table.iter().find(|c| c.canonical == "B").unwrap().id;
        let bits = layout
            .array_column(&h, n, &Type::Reference(b))
            .expect("column");
        let a_arr = layout.column_index(n, &Type::array(Type::Reference(a))).unwrap();
        let b_arr = layout.column_index(n, &Type::array(Type::Reference(b))).unwrap();
        assert!(bits[a_arr]);
        assert!(bits[b_arr]);
        assert!(bits[h.object().index()]);
    }
}
