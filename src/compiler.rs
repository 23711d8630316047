//! The batch pipeline: a linear sequence of whole-program passes over a
//! shared, progressively enriched program model.
//!
//! Each pass only adds attributes. Within a pass the compiler keeps
//! reporting to surface independent failures; once a pass has produced an
//! error, all later passes are skipped so they can rely on well-formed
//! input.

use crate::{
    analysis::{const_fold, definite_assignment, reachability},
    ast::{CompilationUnit, NodeIdGen, TypeKind},
    codegen::{self, AllocatorKind, AsmFile},
    diagnostics::{Diagnostic, Diagnostics, ErrorKind, InternalError, Span},
    ir::{Layout, lower},
    semantics::{declare, prelude, resolve, type_index::TypeIndex, typeck, weeder},
    types::Type,
};

/// One input source file.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// The file name used in diagnostics and for the class-name check.
    pub name: String,
    /// The source text.
    pub text: String,
}

/// The result of a compilation.
#[derive(Debug)]
pub enum Outcome {
    /// The program was accepted; warnings may still be present.
    Success {
        /// One assembly file per unit plus `start.s`.
        files: Vec<AsmFile>,
        /// Advisory diagnostics (warnings only).
        diagnostics: Vec<Diagnostic>,
    },
    /// The program was rejected.
    Rejected {
        /// The findings of the first failing pass.
        diagnostics: Vec<Diagnostic>,
    },
    /// The compiler itself failed an invariant.
    Internal(InternalError),
}

impl Outcome {
    /// The process exit code the driver contract prescribes.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Success { diagnostics, .. } if diagnostics.is_empty() => 0,
            Outcome::Success { .. } => 43,
            Outcome::Rejected { .. } => 42,
            Outcome::Internal(_) => 13,
        }
    }

    /// The diagnostics to show, in report order.
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Outcome::Success { diagnostics, .. } | Outcome::Rejected { diagnostics } => diagnostics,
            Outcome::Internal(_) => &[],
        }
    }
}

/// Compiles the given sources to assembly.
///
/// The embedded `java.lang`/`java.io` prelude is prepended; a user
/// declaration with the same canonical name shadows its prelude unit. The
/// first user file designates the start class whose `static int test()`
/// the emitted `_start` invokes.
#[must_use]
pub fn compile(sources: &[SourceFile], allocator: AllocatorKind) -> Outcome {
    if sources.is_empty() {
        return Outcome::Rejected {
            diagnostics: vec![Diagnostic::error(
                "<program>",
                Span::FILE,
                ErrorKind::Environment,
                "no input files",
            )],
        };
    }
    let mut ids = NodeIdGen::new();
    let mut parse_errors = Diagnostics::new();

    let mut user_units = Vec::new();
    for source in sources {
        match crate::syntax::parse_source(&source.name, &source.text, &mut ids) {
            Ok(unit) => user_units.push(unit),
            Err(diagnostic) => parse_errors.push(diagnostic),
        }
    }
    if parse_errors.has_errors() {
        return Outcome::Rejected {
            diagnostics: parse_errors.into_items(),
        };
    }

    let shadowed: Vec<String> = user_units
        .iter()
        .map(CompilationUnit::canonical_name)
        .collect();
    let mut units = Vec::new();
    for (file, text) in prelude::units() {
        match crate::syntax::parse_source(file, text, &mut ids) {
            Ok(unit) => {
                if !shadowed.contains(&unit.canonical_name()) {
                    units.push(unit);
                }
            }
            Err(diagnostic) => {
                return Outcome::Internal(InternalError(format!(
                    "prelude {file} failed to parse: {diagnostic}"
                )));
            }
        }
    }
    let main_unit = units.len();
    units.extend(user_units);

    // Weeding.
    let mut diagnostics = Diagnostics::new();
    for unit in &units {
        diagnostics.extend(weeder::weed(unit));
    }
    if diagnostics.has_errors() {
        return Outcome::Rejected {
            diagnostics: diagnostics.into_items(),
        };
    }

    // Type index and imports.
    let (index, found) = TypeIndex::build(&units);
    diagnostics.extend(found);
    if diagnostics.has_errors() {
        return Outcome::Rejected {
            diagnostics: diagnostics.into_items(),
        };
    }

    // Declaration linking.
    let (table, found) = declare::link(&units, &index);
    diagnostics.extend(found);
    if diagnostics.has_errors() {
        return Outcome::Rejected {
            diagnostics: diagnostics.into_items(),
        };
    }

    // Hierarchy.
    let (hierarchy, found) = crate::semantics::hierarchy::check(&table);
    diagnostics.extend(found);
    if diagnostics.has_errors() {
        return Outcome::Rejected {
            diagnostics: diagnostics.into_items(),
        };
    }

    // Name resolution.
    let (resolved, found) = resolve::resolve(&units, &table, &index);
    diagnostics.extend(found);
    if diagnostics.has_errors() {
        return Outcome::Rejected {
            diagnostics: diagnostics.into_items(),
        };
    }

    // Type checking.
    let (typed, found) = match typeck::check(&units, &table, &hierarchy, &resolved) {
        Ok(result) => result,
        Err(internal) => return Outcome::Internal(internal),
    };
    diagnostics.extend(found);
    if diagnostics.has_errors() {
        return Outcome::Rejected {
            diagnostics: diagnostics.into_items(),
        };
    }

    // Static analysis: folding feeds reachability; definite assignment
    // runs alongside. The start-class contract is checked here too.
    let constants = const_fold::fold(&units, &table, &resolved, &typed);
    let (_, found) = reachability::analyze(&units, &table, &constants);
    diagnostics.extend(found);
    diagnostics.extend(definite_assignment::analyze(&units, &resolved, &constants));
    if let Some(unit) = units.get(main_unit) {
        let class = &table.classes[main_unit];
        let has_test = class.kind == TypeKind::Class
            && class
                .methods
                .iter()
                .any(|m| {
                    m.name == "test" && m.params.is_empty() && m.is_static()
                        && m.return_type == Type::INT
                });
        if !has_test {
            diagnostics.push(Diagnostic::error(
                &unit.file,
                Span::FILE,
                ErrorKind::Type,
                "the start class must declare `static int test()`",
            ));
        }
    }
    if diagnostics.has_errors() {
        return Outcome::Rejected {
            diagnostics: diagnostics.into_items(),
        };
    }

    // Back end.
    let object_layout = Layout::compute(&table);
    let ctx = lower::LowerCtx {
        units: &units,
        table: &table,
        hierarchy: &hierarchy,
        resolved: &resolved,
        typed: &typed,
        constants: &constants,
        layout: &object_layout,
    };
    let program = match lower::lower(&ctx, main_unit) {
        Ok(program) => program,
        Err(internal) => return Outcome::Internal(internal),
    };
    let files = match codegen::generate(&program, allocator) {
        Ok(files) => files,
        Err(internal) => return Outcome::Internal(internal),
    };

    Outcome::Success {
        files,
        diagnostics: diagnostics.into_items(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn source(name: &str, text: &str) -> SourceFile {
        SourceFile {
            name: name.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn a_minimal_program_compiles_cleanly() {
        let outcome = compile(
            &[source(
                "A.java",
                "public class A { public A() {} public static int test() { return 123; } }",
            )],
            AllocatorKind::Trivial,
        );
        assert_eq!(outcome.exit_code(), 0, "{:?}", outcome.diagnostics());
        let Outcome::Success { files, .. } = outcome else {
            panic!("expected success");
        };
        assert!(files.iter().any(|f| f.name == "A.s"));
        assert!(files.iter().any(|f| f.name == "start.s"));
        let start = files.iter().find(|f| f.name == "start.s").unwrap();
        assert!(start.text.contains("call __debexit"));
        assert!(start.text.contains("call CINIT$A"));
    }

    #[test]
    fn the_start_class_must_expose_test() {
        let outcome = compile(
            &[source("A.java", "public class A { public A() {} }")],
            AllocatorKind::Trivial,
        );
        assert_eq!(outcome.exit_code(), 42);
    }

    #[test]
    fn later_passes_are_skipped_after_a_failing_pass() {
        // A weeder error (final method) and a would-be type error; only
        // the weeder finding is reported.
        let outcome = compile(
            &[source(
                "A.java",
                "public class A { public A() {} public final int f() { return true; } \
                 public static int test() { return 0; } }",
            )],
            AllocatorKind::Trivial,
        );
        assert_eq!(outcome.exit_code(), 42);
        assert!(
            outcome
                .diagnostics()
                .iter()
                .all(|d| d.kind == ErrorKind::Weeder)
        );
    }
}
