use karst::{ErrorKind, InstrId, Op, Session, Value};

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

/// Allocas and calls of a function, in emission order.
fn allocas_and_calls(session: &Session, name: &str) -> (Vec<InstrId>, Vec<Vec<Value>>) {
    let id = session
        .ir
        .get_function(name)
        .unwrap_or_else(|| panic!("function {name} not found"));
    let mut allocas = Vec::new();
    let mut calls = Vec::new();
    for (_, instr_id, instr) in session.ir.function(id).all_instrs() {
        match &instr.op {
            Op::Alloca { .. } => allocas.push(instr_id),
            Op::Call { args, .. } => calls.push(args.clone()),
            _ => {}
        }
    }
    (allocas, calls)
}

const DESTRUCTIBLE: &str = "(def s (struct intern ((a int))))\n\
                            (def destroy (fn intern void ((x (p s))) (return)))\n";

#[test]
fn automatics_destruct_in_reverse_declaration_order() {
    let session = compile(&format!(
        "{DESTRUCTIBLE}\
         (def main (fn intern void (void)\n\
           (def v1 (var auto s))\n\
           (def v2 (var auto s))\n\
           (return)))"
    ));
    let (allocas, calls) = allocas_and_calls(&session, "_Z4main");
    assert_eq!(allocas.len(), 2, "one alloca per variable");
    assert_eq!(calls.len(), 2, "each variable destructs exactly once");
    // v2 (the later alloca) destructs before v1.
    assert_eq!(calls[0], vec![Value::Instr(allocas[1])]);
    assert_eq!(calls[1], vec![Value::Instr(allocas[0])]);
}

#[test]
fn scope_exit_destructs_scope_locals() {
    let session = compile(&format!(
        "{DESTRUCTIBLE}\
         (def main (fn intern int (void)\n\
           (new-scope (def v (var auto s)))\n\
           0))"
    ));
    let (allocas, calls) = allocas_and_calls(&session, "_Z4main");
    assert_eq!(allocas.len(), 1);
    assert_eq!(calls.len(), 1, "the scope local destructs at scope close");
    assert_eq!(calls[0], vec![Value::Instr(allocas[0])]);
}

#[test]
fn function_end_destructs_without_explicit_return() {
    let session = compile(&format!(
        "{DESTRUCTIBLE}\
         (def main (fn intern int (void)\n\
           (def v (var auto s))\n\
           0))"
    ));
    let (_, calls) = allocas_and_calls(&session, "_Z4main");
    assert_eq!(calls.len(), 1, "the implicit return still runs destructors");
}

#[test]
fn goto_forward_past_a_declaration_is_rejected() {
    let kinds = compile_err(
        "(def g (fn intern int (void)\n\
           (goto done)\n\
           (def k (var auto int 1))\n\
           (label done)\n\
           0))",
    );
    assert!(kinds.contains(&ErrorKind::GotoWillCrossDeclaration), "{kinds:?}");
}

#[test]
fn backward_goto_does_not_cross_declarations() {
    compile(
        "(def g (fn intern int (void)\n\
           (def k (var auto int 1))\n\
           (label start)\n\
           (goto start)\n\
           0))",
    );
}

#[test]
fn goto_to_a_missing_label_is_reported() {
    let kinds = compile_err("(def g (fn intern int (void) (goto nowhere) 0))");
    assert!(kinds.contains(&ErrorKind::LabelNotInScope), "{kinds:?}");
}

#[test]
fn goto_out_of_a_scope_destructs_the_scope_locals() {
    let session = compile(&format!(
        "{DESTRUCTIBLE}\
         (def main (fn intern int (void)\n\
           (label top)\n\
           (new-scope\n\
             (def v (var auto s))\n\
             (goto top))\n\
           0))"
    ));
    // The scope close at new-scope exit and the goto resolution both emit a
    // destructor call for v; the jump path must destruct it exactly once.
    let (_, calls) = allocas_and_calls(&session, "_Z4main");
    assert!(!calls.is_empty(), "jumping out of the scope destructs its locals");
}

#[test]
fn setf_copy_overload_runs_on_initialization_copies() {
    let session = compile(
        "(def s (struct intern ((a int))))\n\
         (def setf-copy (fn intern bool ((dst (p s)) (src (p s))) true))\n\
         (def make (fn intern s (void) (def v (var auto s (s (a 1)))) v))",
    );
    let id = session.ir.get_function("_Z4make").expect("make");
    let calls = session
        .ir
        .function(id)
        .all_instrs()
        .filter(|(_, _, i)| matches!(i.op, Op::Call { .. }))
        .count();
    assert!(calls >= 1, "initialization goes through setf-copy");
}

#[test]
fn setf_functions_do_not_recursively_copy() {
    // Compiling setf-copy itself must not invoke setf-copy on its own
    // internals, or nothing would ever terminate.
    compile(
        "(def s (struct intern ((a int))))\n\
         (def setf-copy (fn intern bool ((dst (p s)) (src (p s)))\n\
           (setf (: (@ dst) a) (@:@ src a))\n\
           true))",
    );
}
