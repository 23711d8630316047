//! Type linking: builds the [`ClassTable`] by resolving every type name
//! that appears in a declaration header.

use std::collections::{HashMap, HashSet};

use crate::{
    ast::{CompilationUnit, Modifiers, TypeExpr, TypeKind},
    diagnostics::{Diagnostic, Diagnostics, ErrorKind},
    semantics::{
        ClassInfo, ClassTable, FieldInfo, MethodInfo, TypeId, type_index::TypeIndex,
    },
    types::Type,
};

/// Links all declaration headers, producing the class table.
#[must_use]
pub fn link(units: &[CompilationUnit], index: &TypeIndex) -> (ClassTable, Diagnostics) {
    let mut out = Diagnostics::new();
    let mut table = ClassTable::default();
    let object = index.lookup_canonical("java.lang.Object");

    for (i, unit) in units.iter().enumerate() {
        let id = TypeId(u32::try_from(i).unwrap_or(u32::MAX));
        let decl = &unit.decl;
        let mut linker = Linker {
            index,
            unit: i,
            file: &unit.file,
            out: &mut out,
        };

        let mut super_class = None;
        let mut interfaces = Vec::new();
        match decl.kind {
            TypeKind::Class => {
                if let Some(reference) = decl.extends.first() {
                    super_class = linker.resolve(&reference.segments, reference.span);
                } else if object.is_some_and(|o| o != id) {
                    super_class = object;
                }
                for reference in &decl.implements {
                    if let Some(target) = linker.resolve(&reference.segments, reference.span) {
                        if interfaces.contains(&target) {
                            linker.error(
                                reference.span,
                                format!("duplicate interface `{}`", reference.dotted()),
                            );
                        } else {
                            interfaces.push(target);
                        }
                    }
                }
            }
            TypeKind::Interface => {
                for reference in &decl.extends {
                    if let Some(target) = linker.resolve(&reference.segments, reference.span) {
                        if interfaces.contains(&target) {
                            linker.error(
                                reference.span,
                                format!("duplicate superinterface `{}`", reference.dotted()),
                            );
                        } else {
                            interfaces.push(target);
                        }
                    }
                }
            }
        }

        let mut fields = Vec::new();
        let mut seen_fields = HashSet::new();
        for (fi, field) in decl.fields.iter().enumerate() {
            if !seen_fields.insert(field.name.text.clone()) {
                linker.error(
                    field.name.span,
                    format!("duplicate field `{}`", field.name.text),
                );
            }
            let Some(ty) = linker.link_type(&field.ty) else {
                continue;
            };
            fields.push(FieldInfo {
                name: field.name.text.clone(),
                modifiers: field.modifiers,
                ty,
                index: u32::try_from(fi).unwrap_or(u32::MAX),
            });
        }

        let mut methods = Vec::new();
        let mut seen_methods: HashMap<(String, Vec<Type>), ()> = HashMap::new();
        for (mi, method) in decl.methods.iter().enumerate() {
            let return_type = match &method.return_type {
                None => Type::Void,
                Some(te) => match linker.link_type(te) {
                    Some(ty) => ty,
                    None => continue,
                },
            };
            let Some(params) = linker.link_params(method.params.iter().map(|p| &p.ty)) else {
                continue;
            };
            for thrown in &method.throws {
                linker.resolve(&thrown.segments, thrown.span);
            }
            if seen_methods
                .insert((method.name.text.clone(), params.clone()), ())
                .is_some()
            {
                linker.error(
                    method.name.span,
                    format!("duplicate method `{}`", method.name.text),
                );
            }
            let mut modifiers = method.modifiers;
            if decl.kind == TypeKind::Interface {
                modifiers |= Modifiers::PUBLIC | Modifiers::ABSTRACT;
            }
            methods.push(MethodInfo {
                name: method.name.text.clone(),
                modifiers,
                return_type,
                params,
                index: u32::try_from(mi).unwrap_or(u32::MAX),
                is_ctor: false,
            });
        }

        let mut constructors = Vec::new();
        let mut seen_ctors: HashSet<Vec<Type>> = HashSet::new();
        for (ci, ctor) in decl.constructors.iter().enumerate() {
            let Some(params) = linker.link_params(ctor.params.iter().map(|p| &p.ty)) else {
                continue;
            };
            if !seen_ctors.insert(params.clone()) {
                linker.error(ctor.name.span, "duplicate constructor");
            }
            constructors.push(MethodInfo {
                name: ctor.name.text.clone(),
                modifiers: ctor.modifiers,
                return_type: Type::Void,
                params,
                index: u32::try_from(ci).unwrap_or(u32::MAX),
                is_ctor: true,
            });
        }
        if constructors.is_empty() && decl.kind == TypeKind::Class {
            // The implicit default constructor.
            constructors.push(MethodInfo {
                name: decl.name.text.clone(),
                modifiers: Modifiers::PUBLIC,
                return_type: Type::Void,
                params: Vec::new(),
                index: 0,
                is_ctor: true,
            });
        }

        table.classes.push(ClassInfo {
            id,
            kind: decl.kind,
            canonical: unit.canonical_name(),
            package: unit.package_name(),
            modifiers: decl.modifiers,
            super_class,
            interfaces,
            fields,
            methods,
            constructors,
        });
    }

    (table, out)
}

struct Linker<'a> {
    index: &'a TypeIndex,
    unit: usize,
    file: &'a str,
    out: &'a mut Diagnostics,
}

impl Linker<'_> {
    fn error(&mut self, span: crate::diagnostics::Span, message: impl Into<String>) {
        self.out.push(Diagnostic::error(
            self.file,
            span,
            ErrorKind::Environment,
            message,
        ));
    }

    fn resolve(
        &mut self,
        segments: &[crate::ast::Ident],
        span: crate::diagnostics::Span,
    ) -> Option<TypeId> {
        let parts: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
        match self.index.resolve_name(self.unit, &parts) {
            Ok(id) => Some(id),
            Err(err) => {
                self.error(span, err.to_string());
                None
            }
        }
    }

    fn link_type(&mut self, te: &TypeExpr) -> Option<Type> {
        match te {
            TypeExpr::Primitive(kind, _) => Some(Type::Primitive(*kind)),
            TypeExpr::Named(reference) => self
                .resolve(&reference.segments, reference.span)
                .map(Type::Reference),
            TypeExpr::Array(element, _) => self.link_type(element).map(Type::array),
        }
    }

    fn link_params<'t>(
        &mut self,
        params: impl Iterator<Item = &'t TypeExpr>,
    ) -> Option<Vec<Type>> {
        params.map(|p| self.link_type(p)).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{ast::NodeIdGen, syntax};

    fn build(sources: &[(&str, &str)]) -> (Vec<CompilationUnit>, ClassTable, Diagnostics) {
        let mut ids = NodeIdGen::new();
        let units: Vec<_> = sources
            .iter()
            .map(|(file, text)| syntax::parse_source(file, text, &mut ids).expect("parse"))
            .collect();
        let (index, mut diagnostics) = TypeIndex::build(&units);
        assert!(!diagnostics.has_errors());
        let (table, more) = link(&units, &index);
        diagnostics.extend(more);
        (units, table, diagnostics)
    }

    const OBJECT: (&str, &str) =
        ("Object.java", "package java.lang; public class Object { public Object() {} }");

    #[test]
    fn classes_default_to_extending_object() {
        let (_, table, diagnostics) = build(&[OBJECT, ("A.java", "public class A { public A() {} }")]);
        assert!(!diagnostics.has_errors());
        assert_eq!(table.get(TypeId(1)).super_class, Some(TypeId(0)));
        assert_eq!(table.get(TypeId(0)).super_class, None);
    }

    #[test]
    fn missing_constructor_synthesizes_the_default() {
        let (_, table, diagnostics) = build(&[OBJECT, ("A.java", "public class A { }")]);
        assert!(!diagnostics.has_errors());
        let ctors = &table.get(TypeId(1)).constructors;
        assert_eq!(ctors.len(), 1);
        assert!(ctors[0].params.is_empty());
    }

    #[test]
    fn duplicate_members_are_reported() {
        let (_, _, diagnostics) = build(&[
            OBJECT,
            (
                "A.java",
                "public class A { public A() {} public int x; public boolean x; \
                 public void f(int a) {} public void f(int b) {} }",
            ),
        ]);
        assert_eq!(
            diagnostics.items().iter().filter(|d| d.is_error()).count(),
            2
        );
    }

    #[test]
    fn interface_methods_become_public_abstract() {
        let (_, table, diagnostics) = build(&[
            OBJECT,
            ("I.java", "public interface I { int size(); }"),
        ]);
        assert!(!diagnostics.has_errors());
        let m = &table.get(TypeId(1)).methods[0];
        assert!(m.is_abstract());
        assert!(m.modifiers.contains(Modifiers::PUBLIC));
    }

    #[test]
    fn unresolvable_extends_is_an_environment_error() {
        let (_, _, diagnostics) =
            build(&[OBJECT, ("A.java", "public class A extends Missing { public A() {} }")]);
        assert!(diagnostics.has_errors());
        assert!(
            diagnostics
                .items()
                .iter()
                .all(|d| d.kind == ErrorKind::Environment)
        );
    }
}
