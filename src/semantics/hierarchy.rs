//! The class/interface graph checks and the member tables derived from
//! it: shape rules, cycle rejection, contains sets, abstract
//! coverage, override rules, and vtable slot assignment.

use std::collections::{HashMap, HashSet};

use petgraph::{algo::tarjan_scc, graphmap::DiGraphMap};

use crate::{
    ast::{Modifiers, TypeKind},
    diagnostics::{Diagnostic, Diagnostics, ErrorKind, Span},
    semantics::{ClassInfo, ClassTable, MethodId, MethodSig, TypeId},
    types::{Subtyping, Type},
};

/// A method visible through a type, as produced by the contains-set
/// computation.
#[derive(Debug, Clone)]
pub struct Member {
    /// The inheritance identity.
    pub sig: MethodSig,
    /// The declaration the member denotes (after override/merge rules).
    pub decl: MethodId,
    /// The effective modifiers.
    pub modifiers: Modifiers,
    /// The return type.
    pub return_type: Type,
}

impl Member {
    /// Whether the member is `static`.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.modifiers.contains(Modifiers::STATIC)
    }

    /// Whether the member is `abstract`.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.modifiers.contains(Modifiers::ABSTRACT)
    }
}

/// The validated hierarchy: subtype closure, contains sets, and dispatch
/// slot assignment.
///
/// Dispatch slots are global: every instance-method signature in the
/// program gets one index, and every class vtable is laid out over the full
/// signature table. Overriding methods therefore land on the inherited slot
/// by construction, and interface-typed receivers dispatch through the same
/// index as class-typed ones.
#[derive(Debug)]
pub struct Hierarchy {
    object: TypeId,
    supertypes: Vec<HashSet<TypeId>>,
    contains: Vec<Vec<Member>>,
    slots: HashMap<MethodSig, u32>,
    vtables: Vec<Vec<Option<MethodId>>>,
}

impl Subtyping for Hierarchy {
    fn is_subtype(&self, sub: TypeId, sup: TypeId) -> bool {
        self.supertypes[sub.index()].contains(&sup)
    }

    fn object(&self) -> TypeId {
        self.object
    }
}

impl Hierarchy {
    /// The reflexive-transitive supertype set of a type.
    #[must_use]
    pub fn supertypes(&self, id: TypeId) -> &HashSet<TypeId> {
        &self.supertypes[id.index()]
    }

    /// The methods visible through the given type.
    #[must_use]
    pub fn contains(&self, id: TypeId) -> &[Member] {
        &self.contains[id.index()]
    }

    /// Looks up a visible method by signature.
    #[must_use]
    pub fn find_member(&self, id: TypeId, sig: &MethodSig) -> Option<&Member> {
        self.contains[id.index()].iter().find(|m| &m.sig == sig)
    }

    /// The dispatch slot of an instance-method signature.
    #[must_use]
    pub fn slot(&self, sig: &MethodSig) -> Option<u32> {
        self.slots.get(sig).copied()
    }

    /// The number of dispatch slots every vtable carries.
    #[must_use]
    pub fn slot_count(&self) -> u32 {
        u32::try_from(self.slots.len()).unwrap_or(u32::MAX)
    }

    /// The vtable of a class: the implementing declaration per slot.
    #[must_use]
    pub fn vtable(&self, id: TypeId) -> &[Option<MethodId>] {
        &self.vtables[id.index()]
    }
}

/// Validates the hierarchy and computes the derived tables.
#[must_use]
pub fn check(table: &ClassTable) -> (Hierarchy, Diagnostics) {
    let mut out = Diagnostics::new();
    let n = table.classes.len();

    let object = table
        .iter()
        .find(|c| c.canonical == "java.lang.Object")
        .map(|c| c.id)
        .unwrap_or_else(|| {
            out.push(Diagnostic::error(
                "<program>",
                Span::FILE,
                ErrorKind::Environment,
                "no declaration of java.lang.Object in the compilation",
            ));
            TypeId(0)
        });

    // Shape rules on the declared edges.
    for class in table.iter() {
        let file = class_file(table, class.id);
        if let Some(sup) = class.super_class {
            let sup_decl = table.get(sup);
            if sup == class.id {
                out.push(Diagnostic::error(
                    file.clone(),
                    Span::FILE,
                    ErrorKind::Hierarchy,
                    format!("`{}` extends itself", class.canonical),
                ));
            } else if sup_decl.is_interface() {
                out.push(Diagnostic::error(
                    file.clone(),
                    Span::FILE,
                    ErrorKind::Hierarchy,
                    format!("class `{}` extends interface `{}`", class.canonical, sup_decl.canonical),
                ));
            } else if sup_decl.modifiers.contains(Modifiers::FINAL) {
                out.push(Diagnostic::error(
                    file.clone(),
                    Span::FILE,
                    ErrorKind::Hierarchy,
                    format!("class `{}` extends final class `{}`", class.canonical, sup_decl.canonical),
                ));
            }
        }
        for &iface in &class.interfaces {
            let target = table.get(iface);
            if !target.is_interface() {
                let verb = if class.is_interface() { "extends" } else { "implements" };
                out.push(Diagnostic::error(
                    file.clone(),
                    Span::FILE,
                    ErrorKind::Hierarchy,
                    format!("`{}` {verb} class `{}`", class.canonical, target.canonical),
                ));
            }
        }
    }

    // Cycle rejection over the combined extends/implements closure.
    let mut graph: DiGraphMap<u32, ()> = DiGraphMap::new();
    for class in table.iter() {
        graph.add_node(class.id.0);
        if let Some(sup) = class.super_class {
            graph.add_edge(class.id.0, sup.0, ());
        }
        for &iface in &class.interfaces {
            graph.add_edge(class.id.0, iface.0, ());
        }
    }
    let mut cyclic = false;
    for component in tarjan_scc(&graph) {
        let self_loop = component.len() == 1 && graph.contains_edge(component[0], component[0]);
        if component.len() > 1 || self_loop {
            cyclic = true;
            let names = component
                .iter()
                .map(|&i| table.get(TypeId(i)).canonical.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            out.push(Diagnostic::error(
                class_file(table, TypeId(component[0])),
                Span::FILE,
                ErrorKind::Hierarchy,
                format!("cyclic type hierarchy involving {names}"),
            ));
        }
    }

    if cyclic || out.has_errors() {
        // The member tables below assume an acyclic, well-shaped graph.
        let empty = Hierarchy {
            object,
            supertypes: vec![HashSet::new(); n],
            contains: vec![Vec::new(); n],
            slots: HashMap::new(),
            vtables: vec![Vec::new(); n],
        };
        return (empty, out);
    }

    // Reflexive-transitive supertype closure, memoized per type.
    let mut supertypes: Vec<Option<HashSet<TypeId>>> = vec![None; n];
    for class in table.iter() {
        closure(table, object, class.id, &mut supertypes);
    }
    let supertypes: Vec<HashSet<TypeId>> = supertypes
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect();

    // Contains sets, leaves first.
    let mut builder = ContainsBuilder {
        table,
        object,
        memo: vec![None; n],
        out: &mut out,
    };
    for class in table.iter() {
        builder.contains(class.id);
    }
    let contains: Vec<Vec<Member>> = builder
        .memo
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect();

    // A concrete class must implement everything it contains.
    for class in table.iter() {
        if class.is_abstract() {
            continue;
        }
        for member in &contains[class.id.index()] {
            if member.is_abstract() {
                out.push(Diagnostic::error(
                    class_file(table, class.id),
                    Span::FILE,
                    ErrorKind::Hierarchy,
                    format!(
                        "non-abstract class `{}` does not implement `{}`",
                        class.canonical, member.sig.name
                    ),
                ));
            }
        }
    }

    // Global dispatch slot table over all instance-method signatures.
    let mut slots: HashMap<MethodSig, u32> = HashMap::new();
    for class in table.iter() {
        for member in &contains[class.id.index()] {
            if !member.is_static() {
                let next = u32::try_from(slots.len()).unwrap_or(u32::MAX);
                slots.entry(member.sig.clone()).or_insert(next);
            }
        }
    }

    let mut vtables = Vec::with_capacity(n);
    for class in table.iter() {
        let mut vtable = vec![None; slots.len()];
        if !class.is_interface() {
            for member in &contains[class.id.index()] {
                if !member.is_static() && !member.is_abstract() {
                    if let Some(&slot) = slots.get(&member.sig) {
                        vtable[slot as usize] = Some(member.decl);
                    }
                }
            }
        }
        vtables.push(vtable);
    }

    (
        Hierarchy {
            object,
            supertypes,
            contains,
            slots,
            vtables,
        },
        out,
    )
}

fn class_file(table: &ClassTable, id: TypeId) -> String {
    format!("{}.java", table.get(id).canonical.rsplit('.').next().unwrap_or_default())
}

fn closure(
    table: &ClassTable,
    object: TypeId,
    id: TypeId,
    memo: &mut Vec<Option<HashSet<TypeId>>>,
) -> HashSet<TypeId> {
    if let Some(done) = &memo[id.index()] {
        return done.clone();
    }
    let class = table.get(id);
    let mut set = HashSet::from([id]);
    if let Some(sup) = class.super_class {
        set.extend(closure(table, object, sup, memo));
    }
    for &iface in &class.interfaces {
        set.extend(closure(table, object, iface, memo));
    }
    // Interface references can receive Object's methods, and every
    // interface value is assignable to Object.
    if class.is_interface() {
        set.insert(object);
    }
    memo[id.index()] = Some(set.clone());
    set
}

struct ContainsBuilder<'a> {
    table: &'a ClassTable,
    object: TypeId,
    memo: Vec<Option<Vec<Member>>>,
    out: &'a mut Diagnostics,
}

impl ContainsBuilder<'_> {
    fn error(&mut self, id: TypeId, message: String) {
        self.out.push(Diagnostic::error(
            class_file(self.table, id),
            Span::FILE,
            ErrorKind::Hierarchy,
            message,
        ));
    }

    fn declared_members(class: &ClassInfo) -> Vec<Member> {
        class
            .methods
            .iter()
            .map(|m| Member {
                sig: m.signature(),
                decl: MethodId {
                    owner: class.id,
                    index: m.index,
                    is_ctor: false,
                },
                modifiers: m.modifiers,
                return_type: m.return_type.clone(),
            })
            .collect()
    }

    fn contains(&mut self, id: TypeId) -> Vec<Member> {
        if let Some(done) = &self.memo[id.index()] {
            return done.clone();
        }
        let table = self.table;
        let class = table.get(id);
        let declared = Self::declared_members(class);

        let mut inherited: Vec<Member> = Vec::new();
        if let Some(sup) = class.super_class {
            inherited.extend(self.contains(sup));
        }
        for &iface in &class.interfaces.clone() {
            inherited.extend(self.contains(iface));
        }
        if class.is_interface() && id != self.object {
            // Object's public methods are implicitly contained in every
            // interface, as abstract declarations.
            for member in self.contains(self.object) {
                if member.modifiers.contains(Modifiers::PUBLIC) && !member.is_static() {
                    inherited.push(Member {
                        modifiers: member.modifiers | Modifiers::ABSTRACT,
                        ..member
                    });
                }
            }
        }

        let mut merged = declared.clone();
        let canonical = class.canonical.clone();

        // Group the inherited members by signature, in a deterministic
        // order so dispatch slot assignment is stable across runs.
        let mut groups: HashMap<MethodSig, Vec<Member>> = HashMap::new();
        for member in inherited {
            groups.entry(member.sig.clone()).or_default().push(member);
        }
        let mut groups: Vec<(MethodSig, Vec<Member>)> = groups.into_iter().collect();
        groups.sort_by_key(|(sig, _)| (sig.name.clone(), format!("{:?}", sig.params)));

        for (sig, group) in groups {
            if let Some(decl) = merged.iter().find(|m| m.sig == sig) {
                // A declared method replaces every inherited one; check the
                // override rules against each.
                for inherited in &group {
                    if inherited.decl == decl.decl {
                        continue;
                    }
                    if inherited.return_type != decl.return_type {
                        self.error(
                            id,
                            format!(
                                "`{}.{}` overrides a method with a different return type",
                                canonical, sig.name
                            ),
                        );
                    }
                    if inherited.is_static() != decl.is_static() {
                        self.error(
                            id,
                            format!("`{}.{}` mixes static and instance declarations", canonical, sig.name),
                        );
                    }
                    if inherited.modifiers.contains(Modifiers::FINAL) {
                        self.error(
                            id,
                            format!("`{}.{}` overrides a final method", canonical, sig.name),
                        );
                    }
                    if inherited.modifiers.contains(Modifiers::PUBLIC)
                        && decl.modifiers.contains(Modifiers::PROTECTED)
                    {
                        self.error(
                            id,
                            format!(
                                "`{}.{}` narrows the visibility of a public method",
                                canonical, sig.name
                            ),
                        );
                    }
                }
                continue;
            }

            // No declaration here: merge what the supertypes supply.
            let first = &group[0];
            if group.iter().any(|m| m.return_type != first.return_type) {
                self.error(
                    id,
                    format!("`{canonical}` inherits `{}` with conflicting return types", sig.name),
                );
                continue;
            }
            if group.iter().any(|m| m.is_static() != first.is_static()) {
                self.error(
                    id,
                    format!("`{canonical}` inherits `{}` as both static and instance", sig.name),
                );
                continue;
            }
            // A concrete inherited body wins over abstract declarations.
            let representative = group
                .iter()
                .find(|m| !m.is_abstract())
                .unwrap_or(first)
                .clone();
            if representative.modifiers.contains(Modifiers::PROTECTED)
                && group.iter().any(|m| m.modifiers.contains(Modifiers::PUBLIC))
            {
                self.error(
                    id,
                    format!(
                        "`{canonical}` inherits a protected implementation of public method `{}`",
                        sig.name
                    ),
                );
            }
            merged.push(representative);
        }

        self.memo[id.index()] = Some(merged.clone());
        merged
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        ast::NodeIdGen,
        semantics::{declare, type_index::TypeIndex},
        syntax,
    };

    const OBJECT: (&str, &str) = (
        "Object.java",
        "package java.lang; public class Object { public Object() {} \
         public boolean equals(Object other) { return this == other; } \
         public int hashCode() { return 0; } }",
    );

    fn run(sources: &[(&str, &str)]) -> (ClassTable, Hierarchy, Diagnostics) {
        let mut ids = NodeIdGen::new();
        let units: Vec<_> = sources
            .iter()
            .map(|(file, text)| syntax::parse_source(file, text, &mut ids).expect("parse"))
            .collect();
        let (index, d1) = TypeIndex::build(&units);
        assert!(!d1.has_errors());
        let (table, d2) = declare::link(&units, &index);
        assert!(!d2.has_errors());
        let (hierarchy, out) = check(&table);
        (table, hierarchy, out)
    }

    #[test]
    fn cyclic_hierarchy_is_rejected() {
        let (_, _, out) = run(&[
            OBJECT,
            ("A.java", "public class A extends B { public A() {} }"),
            ("B.java", "public class B extends A { public B() {} }"),
        ]);
        assert!(out.items().iter().any(|d| d.kind == ErrorKind::Hierarchy
            && d.message.contains("cyclic")));
    }

    #[test]
    fn extending_a_final_class_is_rejected() {
        let (_, _, out) = run(&[
            OBJECT,
            ("A.java", "public final class A { public A() {} }"),
            ("B.java", "public class B extends A { public B() {} }"),
        ]);
        assert!(out.items().iter().any(|d| d.message.contains("final class")));
    }

    #[test]
    fn concrete_class_must_cover_inherited_abstract_methods() {
        let (_, _, out) = run(&[
            OBJECT,
            ("I.java", "public interface I { int size(); }"),
            ("A.java", "public class A implements I { public A() {} }"),
        ]);
        assert!(out.items().iter().any(|d| d.message.contains("does not implement")));

        let (_, _, ok) = run(&[
            OBJECT,
            ("I.java", "public interface I { int size(); }"),
            (
                "A.java",
                "public class A implements I { public A() {} public int size() { return 0; } }",
            ),
        ]);
        assert!(!ok.has_errors());
    }

    #[test]
    fn override_keeps_the_inherited_slot() {
        let (table, hierarchy, out) = run(&[
            OBJECT,
            (
                "A.java",
                "public class A { public A() {} public int f() { return 1; } }",
            ),
            (
                "B.java",
                "public class B extends A { public B() {} public int f() { return 2; } }",
            ),
        ]);
        assert!(!out.has_errors());
        let a = table.iter().find(|c| c.canonical == "A").unwrap().id;
        let b = table.iter().find(|c| c.canonical == "B").unwrap().id;
        let sig = MethodSig { name: "f".into(), params: vec![] };
        let slot = hierarchy.slot(&sig).expect("slot") as usize;
        assert_eq!(hierarchy.vtable(a)[slot].unwrap().owner, a);
        assert_eq!(hierarchy.vtable(b)[slot].unwrap().owner, b);
    }

    #[test]
    fn return_type_conflicts_are_rejected() {
        let (_, _, out) = run(&[
            OBJECT,
            ("A.java", "public class A { public A() {} public int f() { return 1; } }"),
            (
                "B.java",
                "public class B extends A { public B() {} public boolean f() { return true; } }",
            ),
        ]);
        assert!(out.items().iter().any(|d| d.message.contains("return type")));
    }

    #[test]
    fn interfaces_contain_objects_public_methods() {
        let (table, hierarchy, out) = run(&[OBJECT, ("I.java", "public interface I { }")]);
        assert!(!out.has_errors());
        let i = table.iter().find(|c| c.canonical == "I").unwrap().id;
        let sig = MethodSig {
            name: "equals".into(),
            params: vec![Type::Reference(TypeId(0))],
        };
        assert!(hierarchy.find_member(i, &sig).is_some());
        let object = TypeId(0);
        assert!(hierarchy.is_subtype(i, object));
    }

    #[test]
    fn static_instance_mixes_are_rejected() {
        let (_, _, out) = run(&[
            OBJECT,
            ("A.java", "public class A { public A() {} public int f() { return 1; } }"),
            (
                "B.java",
                "public class B extends A { public B() {} public static int f() { return 2; } }",
            ),
        ]);
        assert!(out.items().iter().any(|d| d.message.contains("static")));
    }
}
