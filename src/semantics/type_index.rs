//! The global type index and per-unit import tables.

use std::collections::{HashMap, HashSet};

use crate::{
    ast::{CompilationUnit, ImportKind},
    diagnostics::{Diagnostic, Diagnostics, ErrorKind},
    semantics::TypeId,
};

/// Why a type name failed to resolve.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TypeLookupError {
    /// No declaration matches the name.
    #[error("cannot resolve type `{0}`")]
    Unknown(String),
    /// Two or more on-demand imports supply the simple name.
    #[error("ambiguous type `{0}`: imported on demand from `{1}` and `{2}`")]
    Ambiguous(String, String, String),
    /// A strict prefix of a qualified name is itself a type.
    #[error("prefix `{0}` of qualified name `{1}` resolves to a type")]
    PrefixIsType(String, String),
}

/// Per-unit import tables.
#[derive(Debug)]
struct UnitScope {
    package: String,
    self_simple: String,
    self_id: TypeId,
    single: HashMap<String, TypeId>,
    /// On-demand packages in declaration order; `java.lang` is appended
    /// with the lowest priority.
    on_demand: Vec<String>,
}

/// The global `canonical name → TypeId` map plus per-unit import scopes.
#[derive(Debug, Default)]
pub struct TypeIndex {
    by_canonical: HashMap<String, TypeId>,
    packages: HashSet<String>,
    scopes: Vec<UnitScope>,
}

impl TypeIndex {
    /// Builds the index, reporting duplicate canonical names and import
    /// conflicts.
    #[must_use]
    pub fn build(units: &[CompilationUnit]) -> (TypeIndex, Diagnostics) {
        let mut out = Diagnostics::new();
        let mut index = TypeIndex::default();

        for (i, unit) in units.iter().enumerate() {
            let id = TypeId(u32::try_from(i).unwrap_or(u32::MAX));
            let canonical = unit.canonical_name();
            if let Some(previous) = index.by_canonical.insert(canonical.clone(), id) {
                out.push(Diagnostic::error(
                    &unit.file,
                    unit.decl.name.span,
                    ErrorKind::Environment,
                    format!(
                        "duplicate declaration of `{canonical}` (also declared in `{}`)",
                        units[previous.index()].file
                    ),
                ));
            }
            let package = unit.package_name();
            let mut prefix = String::new();
            for segment in package.split('.').filter(|s| !s.is_empty()) {
                if !prefix.is_empty() {
                    prefix.push('.');
                }
                prefix.push_str(segment);
                index.packages.insert(prefix.clone());
            }
        }

        for (i, unit) in units.iter().enumerate() {
            let id = TypeId(u32::try_from(i).unwrap_or(u32::MAX));
            let mut scope = UnitScope {
                package: unit.package_name(),
                self_simple: unit.decl.name.text.clone(),
                self_id: id,
                single: HashMap::new(),
                on_demand: Vec::new(),
            };
            for import in &unit.imports {
                let dotted = import.dotted();
                match import.kind {
                    ImportKind::Single => {
                        let Some(&target) = index.by_canonical.get(&dotted) else {
                            out.push(Diagnostic::error(
                                &unit.file,
                                import.span,
                                ErrorKind::Environment,
                                format!("import `{dotted}` does not resolve to a type"),
                            ));
                            continue;
                        };
                        let simple = import
                            .segments
                            .last()
                            .map(|s| s.text.clone())
                            .unwrap_or_default();
                        if simple == scope.self_simple && target != id {
                            out.push(Diagnostic::error(
                                &unit.file,
                                import.span,
                                ErrorKind::Environment,
                                format!("import `{dotted}` clashes with the declared type `{simple}`"),
                            ));
                            continue;
                        }
                        match scope.single.get(&simple) {
                            Some(&existing) if existing != target => {
                                out.push(Diagnostic::error(
                                    &unit.file,
                                    import.span,
                                    ErrorKind::Environment,
                                    format!("conflicting single-type imports of `{simple}`"),
                                ));
                            }
                            _ => {
                                scope.single.insert(simple, target);
                            }
                        }
                    }
                    ImportKind::OnDemand => {
                        if !index.packages.contains(&dotted) {
                            out.push(Diagnostic::error(
                                &unit.file,
                                import.span,
                                ErrorKind::Environment,
                                format!("import `{dotted}.*` does not name a package"),
                            ));
                            continue;
                        }
                        if !scope.on_demand.contains(&dotted) {
                            scope.on_demand.push(dotted);
                        }
                    }
                }
            }
            if scope.on_demand.iter().all(|p| p != "java.lang") {
                scope.on_demand.push("java.lang".to_string());
            }
            index.scopes.push(scope);
        }

        (index, out)
    }

    /// The id declared under the exact canonical name, if any.
    #[must_use]
    pub fn lookup_canonical(&self, canonical: &str) -> Option<TypeId> {
        self.by_canonical.get(canonical).copied()
    }

    /// Whether the dotted name is a declared package or a prefix of one.
    #[must_use]
    pub fn is_package(&self, name: &str) -> bool {
        self.packages.contains(name)
    }

    /// Resolves a simple type name in the given unit, in the order:
    /// enclosing type, single-type imports, same package, on-demand
    /// imports (ambiguity among the latter is an error).
    ///
    /// # Errors
    ///
    /// See [`TypeLookupError`].
    pub fn resolve_simple(&self, unit: usize, name: &str) -> Result<TypeId, TypeLookupError> {
        let scope = &self.scopes[unit];
        if name == scope.self_simple {
            return Ok(scope.self_id);
        }
        if let Some(&id) = scope.single.get(name) {
            return Ok(id);
        }
        let in_package = if scope.package.is_empty() {
            name.to_string()
        } else {
            format!("{}.{name}", scope.package)
        };
        if let Some(&id) = self.by_canonical.get(&in_package) {
            return Ok(id);
        }
        let mut found: Option<(TypeId, &str)> = None;
        for package in &scope.on_demand {
            if let Some(&id) = self.by_canonical.get(&format!("{package}.{name}")) {
                match found {
                    Some((other, other_pkg)) if other != id => {
                        return Err(TypeLookupError::Ambiguous(
                            name.to_string(),
                            other_pkg.to_string(),
                            package.clone(),
                        ));
                    }
                    Some(_) => {}
                    None => found = Some((id, package)),
                }
            }
        }
        found
            .map(|(id, _)| id)
            .ok_or_else(|| TypeLookupError::Unknown(name.to_string()))
    }

    /// Resolves a (possibly qualified) type name in the given unit.
    ///
    /// # Errors
    ///
    /// Qualified names must match a canonical name exactly, and no strict
    /// prefix of them may itself resolve to a type.
    pub fn resolve_name(&self, unit: usize, segments: &[&str]) -> Result<TypeId, TypeLookupError> {
        if let [simple] = segments {
            return self.resolve_simple(unit, simple);
        }
        let dotted = segments.join(".");
        let id = self
            .by_canonical
            .get(&dotted)
            .copied()
            .ok_or_else(|| TypeLookupError::Unknown(dotted.clone()))?;
        if self.resolve_simple(unit, segments[0]).is_ok() {
            return Err(TypeLookupError::PrefixIsType(
                segments[0].to_string(),
                dotted,
            ));
        }
        for end in 2..segments.len() {
            let prefix = segments[..end].join(".");
            if self.by_canonical.contains_key(&prefix) {
                return Err(TypeLookupError::PrefixIsType(prefix, dotted));
            }
        }
        Ok(id)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ast::NodeIdGen;
    use crate::syntax;

    fn units(sources: &[(&str, &str)]) -> Vec<CompilationUnit> {
        let mut ids = NodeIdGen::new();
        sources
            .iter()
            .map(|(file, text)| syntax::parse_source(file, text, &mut ids).expect("parse"))
            .collect()
    }

    const OBJECT: (&str, &str) =
        ("Object.java", "package java.lang; public class Object { public Object() {} }");

    #[test]
    fn duplicate_canonical_names_are_fatal() {
        let units = units(&[
            OBJECT,
            ("A.java", "package p; public class A { public A() {} }"),
            ("A.java", "package p; public class A { public A() {} }"),
        ]);
        let (_, diagnostics) = TypeIndex::build(&units);
        assert!(diagnostics.has_errors());
    }

    #[test]
    fn resolution_order_prefers_single_imports_over_package() {
        let units = units(&[
            OBJECT,
            ("V.java", "package q; public class V { public V() {} }"),
            ("V.java", "package p; public class V { public V() {} }"),
            ("A.java", "package p; import q.V; public class A { public A() {} }"),
        ]);
        let (index, diagnostics) = TypeIndex::build(&units);
        assert!(!diagnostics.has_errors());
        // Unit 3 is A; its single import q.V wins over package-sibling p.V.
        assert_eq!(index.resolve_simple(3, "V"), Ok(TypeId(1)));
    }

    #[test]
    fn on_demand_ambiguity_is_an_error_at_use() {
        let units = units(&[
            OBJECT,
            ("V.java", "package q; public class V { public V() {} }"),
            ("V.java", "package r; public class V { public V() {} }"),
            (
                "A.java",
                "package p; import q.*; import r.*; public class A { public A() {} }",
            ),
        ]);
        let (index, diagnostics) = TypeIndex::build(&units);
        assert!(!diagnostics.has_errors());
        assert!(matches!(
            index.resolve_simple(3, "V"),
            Err(TypeLookupError::Ambiguous(..))
        ));
    }

    #[test]
    fn java_lang_is_implicitly_on_demand() {
        let units = units(&[OBJECT, ("A.java", "public class A { public A() {} }")]);
        let (index, diagnostics) = TypeIndex::build(&units);
        assert!(!diagnostics.has_errors());
        assert_eq!(index.resolve_simple(1, "Object"), Ok(TypeId(0)));
    }

    #[test]
    fn qualified_prefix_must_not_be_a_type() {
        let units = units(&[
            OBJECT,
            ("A.java", "package p; public class A { public A() {} }"),
            ("B.java", "package p.A; public class B { public B() {} }"),
            ("C.java", "package q; public class C { public C() {} }"),
        ]);
        let (index, diagnostics) = TypeIndex::build(&units);
        assert!(!diagnostics.has_errors());
        assert!(matches!(
            index.resolve_name(3, &["p", "A", "B"]),
            Err(TypeLookupError::PrefixIsType(..))
        ));
        assert_eq!(index.resolve_name(3, &["p", "A"]), Ok(TypeId(1)));
    }

    #[test]
    fn unknown_on_demand_package_is_reported() {
        let units = units(&[
            OBJECT,
            ("A.java", "import nosuch.pkg.*; public class A { public A() {} }"),
        ]);
        let (_, diagnostics) = TypeIndex::build(&units);
        assert!(diagnostics.has_errors());
    }
}
