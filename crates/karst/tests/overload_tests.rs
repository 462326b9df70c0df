use karst::{Callee, ErrorKind, Op, ROOT_NS, Session};

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
fn overloads_resolve_on_argument_types() {
    let session = compile(
        "(def f (fn intern int ((x int)) x))\n\
         (def f (fn intern int ((x int) (y int)) (+ x y)))\n\
         (def main (fn intern int (void) (f 1 2)))",
    );
    let two_arg = session.ir.get_function("_Z1fii").expect("two-int overload exists");
    let main = session.ir.function(session.ir.get_function("_Z4main").expect("main"));
    assert!(
        main.all_instrs().any(|(_, _, i)| matches!(
            &i.op,
            Op::Call {
                callee: Callee::Function(id),
                ..
            } if *id == two_arg
        )),
        "the two-argument overload is called"
    );
}

#[test]
fn failed_overload_reports_the_closest_candidate() {
    let kinds = compile_err(
        "(def f (fn intern int ((x int)) x))\n\
         (def f (fn intern int ((x int) (y int)) (+ x y)))\n\
         (def main (fn intern int (void) (f 1.5 2)))",
    );
    assert!(
        kinds.contains(&ErrorKind::OverloadedFunctionOrMacroNotInScopeWithClosest),
        "{kinds:?}"
    );
}

#[test]
fn unknown_names_report_not_in_scope() {
    let kinds = compile_err("(def main (fn intern int (void) (missing 1)))");
    assert!(kinds.contains(&ErrorKind::NotInScope), "{kinds:?}");
}

#[test]
fn extern_c_calls_promote_small_integers() {
    let session = compile(
        "(def putnum (fn extern-c int ((c int32))))\n\
         (def main (fn intern int (void) (putnum (cast 65 int8))))",
    );
    let main = session.ir.function(session.ir.get_function("_Z4main").expect("main"));
    let casts = main
        .all_instrs()
        .filter(|(_, _, i)| matches!(i.op, Op::Cast { .. }))
        .count();
    // One explicit cast to int8, one implicit promotion back up to int32.
    assert!(casts >= 2, "implicit integer promotion emitted a widening cast");
    assert!(main.all_instrs().any(|(_, _, i)| matches!(i.op, Op::Call { .. })));
}

#[test]
fn extern_c_promotion_rejects_non_integer_mismatches() {
    let kinds = compile_err(
        "(def putnum (fn extern-c int ((c int32))))\n\
         (def main (fn intern int (void) (putnum 1.5)))",
    );
    assert!(kinds.contains(&ErrorKind::FunctionNotInScope), "{kinds:?}");
}

#[test]
fn varargs_functions_promote_trailing_arguments() {
    let session = compile(
        "(def logf (fn extern-c int ((fmt (p char)) ...)))\n\
         (def main (fn intern int (void) (logf \"x\" (cast 1 int8) 2.0)))",
    );
    let main = session.ir.function(session.ir.get_function("_Z4main").expect("main"));
    assert!(
        main.all_instrs().any(|(_, _, i)| matches!(
            i.op,
            Op::Cast {
                kind: karst::CastKind::SExt,
                ..
            }
        )),
        "small integers widen to native int past the fixed arity"
    );
}

#[test]
fn function_declarations_are_superseded_by_definitions() {
    let session = compile(
        "(def f (fn intern int ((x int))))\n\
         (def f (fn intern int ((x int)) (+ x 1)))\n\
         (def main (fn intern int (void) (f 1)))",
    );
    let f = session.ir.function(session.ir.get_function("_Z1fi").expect("f"));
    assert!(!f.is_declaration(), "the definition owns the symbol");
}

#[test]
fn mangled_names_are_deterministic() {
    let session = compile("(def f (fn intern int ((x int)) x))");
    assert_eq!(session.tree.name_to_symbol(ROOT_NS, "f"), "_Z1f");
    assert_eq!(session.tree.name_to_symbol(ROOT_NS, "f"), "_Z1f");
    assert!(session.ir.get_function("_Z1fi").is_some());
}

#[test]
fn namespaced_definitions_mangle_with_their_path() {
    let session = compile(
        "(namespace geo\n\
           (def area (fn intern int ((w int) (h int)) (* w h))))",
    );
    assert!(session.ir.get_function("_ZN3geo4areaEii").is_some());
}

#[test]
fn using_namespace_brings_bindings_into_scope() {
    compile(
        "(namespace geo\n\
           (def area (fn intern int ((w int) (h int)) (* w h))))\n\
         (def main (fn intern int (void) (using-namespace geo (area 2 3))))",
    );
}
