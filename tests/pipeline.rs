//! End-to-end pipeline scenarios: source text in, exit code and emitted
//! assembly out.

use joosc::{
    codegen::AllocatorKind,
    compiler::{Outcome, SourceFile, compile},
    diagnostics::ErrorKind,
};
use pretty_assertions::assert_eq;

fn sources(list: &[(&str, &str)]) -> Vec<SourceFile> {
    list.iter()
        .map(|(name, text)| SourceFile {
            name: (*name).to_string(),
            text: (*text).to_string(),
        })
        .collect()
}

fn run(list: &[(&str, &str)]) -> Outcome {
    compile(&sources(list), AllocatorKind::Trivial)
}

fn emitted(outcome: &Outcome, name: &str) -> String {
    let Outcome::Success { files, .. } = outcome else {
        panic!("expected success, got {:?}", outcome.diagnostics());
    };
    files
        .iter()
        .find(|f| f.name == name)
        .unwrap_or_else(|| panic!("no emitted file {name}"))
        .text
        .clone()
}

#[test]
fn return_constant_program_exits_cleanly() {
    let outcome = run(&[(
        "A.java",
        "public class A { public A() {} public static int test() { return 123; } }",
    )]);
    assert_eq!(outcome.exit_code(), 0, "{:?}", outcome.diagnostics());
    let a = emitted(&outcome, "A.s");
    assert!(a.contains("mov eax, 123"), "{a}");
    let start = emitted(&outcome, "start.s");
    assert!(start.contains("global _start"));
    assert!(start.contains("call A.test$"));
    assert!(start.contains("push eax") || start.contains("push dword"));
    assert!(start.contains("call __debexit"));
}

#[test]
fn final_override_is_rejected() {
    let outcome = run(&[
        (
            "A.java",
            "public class A { public A() {} public final int f() { return 0; } \
             public static int test() { return 0; } }",
        ),
        (
            "B.java",
            "public class B extends A { public B() {} public int f() { return 1; } }",
        ),
    ]);
    assert_eq!(outcome.exit_code(), 42);
}

#[test]
fn definite_assignment_violation_is_rejected() {
    let outcome = run(&[(
        "A.java",
        "public class A { public A() {} public static int test() { int x; return x; } }",
    )]);
    assert_eq!(outcome.exit_code(), 42);
    assert!(
        outcome
            .diagnostics()
            .iter()
            .any(|d| d.kind == ErrorKind::DefiniteAssignment)
    );
}

#[test]
fn unreachable_statement_warns_with_exit_43() {
    let outcome = run(&[(
        "A.java",
        "public class A { public A() {} \
         public static int test() { if (true) return 1; return 2; } }",
    )]);
    assert_eq!(outcome.exit_code(), 43, "{:?}", outcome.diagnostics());
    assert!(
        outcome
            .diagnostics()
            .iter()
            .all(|d| d.kind == ErrorKind::Reachability)
    );
}

#[test]
fn overload_resolution_picks_the_int_overload() {
    let outcome = run(&[(
        "A.java",
        "public class A { public A() {} \
         public void f(int x) {} public void f(short y) {} \
         public static int test() { A a = new A(); int v = 7; a.f(v); return 0; } }",
    )]);
    assert_eq!(outcome.exit_code(), 0, "{:?}", outcome.diagnostics());
    let a = emitted(&outcome, "A.s");
    // The chosen overload's mangled label carries the int descriptor; the
    // dispatch slot is resolved through the vtable, which must carry both.
    assert!(a.contains("A.f$I"), "{a}");
    assert!(a.contains("A.f$S"), "{a}");
}

#[test]
fn cyclic_hierarchy_is_rejected() {
    let outcome = run(&[
        ("A.java", "public class A extends B { public A() {} }"),
        ("B.java", "public class B extends A { public B() {} }"),
    ]);
    assert_eq!(outcome.exit_code(), 42);
    assert!(
        outcome
            .diagnostics()
            .iter()
            .any(|d| d.kind == ErrorKind::Hierarchy)
    );
}

#[test]
fn null_instanceof_compiles_to_a_false_path() {
    let outcome = run(&[(
        "A.java",
        "public class A { public A() {} \
         public static int test() { Object o = null; if (o instanceof A) return 1; return 0; } }",
    )]);
    assert_eq!(outcome.exit_code(), 0, "{:?}", outcome.diagnostics());
}

#[test]
fn overriding_methods_share_the_vtable_slot() {
    let outcome = run(&[
        (
            "A.java",
            "public class A { public A() {} public int f() { return 1; } \
             public static int test() { return 0; } }",
        ),
        (
            "B.java",
            "public class B extends A { public B() {} public int f() { return 2; } }",
        ),
    ]);
    let a = emitted(&outcome, "A.s");
    let b = emitted(&outcome, "B.s");

    let slot_of = |text: &str, vtable: &str, method: &str| -> usize {
        let line = text
            .lines()
            .skip_while(|l| !l.starts_with(vtable))
            .nth(1)
            .unwrap_or_else(|| panic!("no vtable {vtable}"));
        let words: Vec<&str> = line.trim().trim_start_matches("dd ").split(", ").collect();
        words
            .iter()
            .position(|w| w.starts_with(method))
            .unwrap_or_else(|| panic!("{method} not in {vtable}: {line}"))
    };
    assert_eq!(
        slot_of(&a, "VT$A:", "A.f$"),
        slot_of(&b, "VT$B:", "B.f$")
    );
}

#[test]
fn string_concatenation_emits_string_data() {
    let outcome = run(&[(
        "A.java",
        "public class A { public A() {} \
         public static int test() { String s = \"n=\"; String t = s + 42; return t.length(); } }",
    )]);
    assert_eq!(outcome.exit_code(), 0, "{:?}", outcome.diagnostics());
    let a = emitted(&outcome, "A.s");
    assert!(a.contains("STR$"), "{a}");
    assert!(a.contains("call java.lang.String.valueOf$I"), "{a}");
}

#[test]
fn static_initializers_run_from_start_in_unit_order() {
    let outcome = run(&[
        (
            "A.java",
            "public class A { public A() {} public static int k = 40 + 2; \
             public static int test() { return A.k; } }",
        ),
        (
            "B.java",
            "public class B { public B() {} public static int j = 1; }",
        ),
    ]);
    let start = emitted(&outcome, "start.s");
    let a_pos = start.find("call CINIT$A").expect("CINIT$A");
    let b_pos = start.find("call CINIT$B").expect("CINIT$B");
    let test_pos = start.find("call A.test$").expect("test call");
    assert!(a_pos < b_pos && b_pos < test_pos, "{start}");
    // Prelude initializers run before user ones.
    let system_pos = start.find("call CINIT$java.lang.System").expect("System");
    assert!(system_pos < a_pos);
}

#[test]
fn linear_scan_mode_compiles_the_same_program() {
    let outcome = compile(
        &sources(&[(
            "A.java",
            "public class A { public A() {} \
             public static int test() { int a = 1; int b = 2; int c = a + b; return c * 10 / 3; } }",
        )]),
        AllocatorKind::LinearScan,
    );
    assert_eq!(outcome.exit_code(), 0, "{:?}", outcome.diagnostics());
    let a = emitted(&outcome, "A.s");
    assert!(a.contains("idiv"), "{a}");
}

#[test]
fn array_programs_emit_bounds_checks() {
    let outcome = run(&[(
        "A.java",
        "public class A { public A() {} \
         public static int test() { int[] xs = new int[3]; xs[0] = 9; return xs[0] + xs.length; } }",
    )]);
    assert_eq!(outcome.exit_code(), 0, "{:?}", outcome.diagnostics());
    let a = emitted(&outcome, "A.s");
    assert!(a.contains("call __malloc"), "{a}");
    assert!(a.contains("extern __exception"), "{a}");
}

#[test]
fn interfaces_dispatch_through_the_shared_slot_table() {
    let outcome = run(&[
        ("I.java", "public interface I { int size(); }"),
        (
            "A.java",
            "public class A implements I { public A() {} \
             public int size() { return 4; } \
             public static int test() { I x = new A(); return x.size(); } }",
        ),
    ]);
    assert_eq!(outcome.exit_code(), 0, "{:?}", outcome.diagnostics());
}

#[test]
fn protected_cross_package_access_is_rejected() {
    let outcome = run(&[
        (
            "Base.java",
            "package p; public class Base { public Base() {} protected int v; }",
        ),
        (
            "Main.java",
            "package q; import p.Base; public class Main extends Base { public Main() {} \
             public static int test() { return 0; } \
             public int f(Base other) { return other.v; } }",
        ),
    ]);
    assert_eq!(outcome.exit_code(), 42);
    assert!(
        outcome
            .diagnostics()
            .iter()
            .any(|d| d.kind == ErrorKind::Type)
    );
}

#[test]
fn quiet_contract_surfaces_only_the_first_failing_pass() {
    // An unresolvable import plus a type error further in; environment
    // findings stop the pipeline first.
    let outcome = run(&[(
        "A.java",
        "import no.such.Type; public class A { public A() {} \
         public static int test() { return true; } }",
    )]);
    assert_eq!(outcome.exit_code(), 42);
    assert!(
        outcome
            .diagnostics()
            .iter()
            .all(|d| d.kind == ErrorKind::Environment)
    );
}
