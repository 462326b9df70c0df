use karst::{ErrorKind, Op, Session};

fn compile(source: &str) -> Session {
    let mut session = Session::new();
    let ok = session.compile_str(source, "test.ka");
    assert!(ok, "unexpected diagnostics: {:?}", session.diagnostics());
    session
}

fn compile_err(source: &str) -> Vec<ErrorKind> {
    let mut session = Session::new();
    let ok = session.compile_str(source, "test.ka");
    assert!(!ok, "expected diagnostics");
    session.diagnostics().iter().map(|d| d.kind).collect()
}

#[test]
fn must_init_struct_rejects_bare_declaration() {
    let kinds = compile_err(
        "(def s (struct intern (attr must-init) ((a int))))\n\
         (def main (fn intern int (void) (def v (var auto s)) 0))",
    );
    assert!(kinds.contains(&ErrorKind::MustHaveInitialiserForType), "{kinds:?}");
}

#[test]
fn must_init_struct_accepts_an_init_overload() {
    let session = compile(
        "(def s (struct intern (attr must-init) ((a int))))\n\
         (def init (fn intern bool ((x (p s))) true))\n\
         (def main (fn intern int (void) (def v (var auto s)) 0))",
    );
    let id = session.ir.get_function("_Z4main").expect("main");
    let calls = session
        .ir
        .function(id)
        .all_instrs()
        .filter(|(_, _, i)| matches!(i.op, Op::Call { .. }))
        .count();
    assert_eq!(calls, 1, "the init overload runs for the bare declaration");
}

#[test]
fn const_type_requires_an_initializer() {
    let kinds = compile_err("(def main (fn intern int (void) (def c (var auto (const int))) 0))");
    assert!(kinds.contains(&ErrorKind::MustHaveInitialiserForConstType), "{kinds:?}");
}

#[test]
fn const_type_with_initializer_is_accepted() {
    compile("(def main (fn intern int (void) (def c (var auto (const int) 3)) 0))");
}

#[test]
fn extern_linkage_rejects_local_initializer() {
    let kinds = compile_err("(def main (fn intern int (void) (def g (var extern int 3)) 0))");
    assert!(kinds.contains(&ErrorKind::HasBothExternAndInitialiser), "{kinds:?}");
}

#[test]
fn redefinition_in_one_scope_is_rejected() {
    let kinds = compile_err(
        "(def main (fn intern int (void)\n\
           (def y (var auto int 1))\n\
           (def y (var auto int 2))\n\
           0))",
    );
    assert!(kinds.contains(&ErrorKind::RedefinitionOfVariable), "{kinds:?}");
}

#[test]
fn implied_type_takes_the_initializer_type() {
    let session = compile("(def main (fn intern int (void) (def z (var auto \\ 42)) z))");
    let id = session.ir.get_function("_Z4main").expect("main");
    assert!(
        session
            .ir
            .function(id)
            .all_instrs()
            .any(|(_, _, i)| matches!(i.op, Op::Ret { value: Some(_) })),
        "z reads back as int"
    );
}

#[test]
fn implied_type_without_initializer_is_rejected() {
    let kinds = compile_err("(def main (fn intern int (void) (def z (var auto \\)) 0))");
    assert!(kinds.contains(&ErrorKind::MustHaveInitialiserForImpliedType), "{kinds:?}");
}

#[test]
fn zero_length_array_takes_its_length_from_the_literal() {
    let session = compile(
        "(def main (fn intern int (void)\n\
           (def a (var auto (array-of 0 int) (array 1 2 3)))\n\
           (@$ a 2)))",
    );
    let id = session.ir.get_function("_Z4main").expect("main");
    // Three element stores from the literal.
    let stores = session
        .ir
        .function(id)
        .all_instrs()
        .filter(|(_, _, i)| matches!(i.op, Op::Store { .. }))
        .count();
    assert!(stores >= 3, "literal fills every inferred element");
}

#[test]
fn nested_scopes_shadow_outer_variables() {
    compile(
        "(def main (fn intern int (void)\n\
           (def y (var auto int 1))\n\
           (new-scope (def y (var auto bool true)))\n\
           y))",
    );
}

#[test]
fn anonymous_struct_types_expand_to_fresh_structs() {
    compile("(def main (fn intern int (void) (def v (var auto (struct ((a int))))) 0))");
}
