use karst::{
    ConstValue, DNode, ErrorKind, IrFnId, IrModule, JitEngine, JitError, MContext, MacroAddress, Op, Session, Value,
};

/// Test engine whose "JITted" macros are native Rust functions driven
/// through the production trampoline ABI.
struct TestJit {
    entry: MacroAddress,
}

impl JitEngine for TestJit {
    fn prepare_macro(&mut self, _module: &IrModule, _function: IrFnId) -> Result<MacroAddress, JitError> {
        Ok(self.entry)
    }

    fn run_constant_ctor(&mut self, _module: &IrModule, _wrapper: IrFnId, _out: &mut [u8]) -> Result<(), JitError> {
        Err(JitError::Unavailable)
    }
}

unsafe extern "C" fn echo_first(_mc: *mut MContext, n: *mut DNode) -> *mut DNode {
    n
}

unsafe extern "C" fn take_first_of_three(
    _mc: *mut MContext,
    a: *mut DNode,
    _b: *mut DNode,
    _c: *mut DNode,
) -> *mut DNode {
    // Each variadic node argument arrives as its own pointer.
    a
}

unsafe extern "C" fn wrap_in_do(mc: *mut MContext, _n: *mut DNode) -> *mut DNode {
    // SAFETY: the engine is only invoked while the invocation pool is live.
    unsafe {
        let mc = &mut *mc;
        let head = mc.token("do");
        let five = mc.token("5");
        mc.list(&[head, five])
    }
}

fn session_with(entry: MacroAddress) -> Session {
    Session::with_engine(Box::new(TestJit { entry }))
}

fn compile_with(entry: MacroAddress, source: &str) -> Session {
    let mut session = session_with(entry);
    let ok = session.compile_str(source, "test.ka");
    assert!(ok, "unexpected diagnostics: {:?}", session.diagnostics());
    session
}

fn ret_constant(session: &Session, name: &str) -> Option<u128> {
    let id = session.ir.get_function(name)?;
    session.ir.function(id).all_instrs().find_map(|(_, _, i)| match i.op {
        Op::Ret {
            value: Some(Value::Const(ConstValue::Int { value, .. })),
        } => Some(value),
        _ => None,
    })
}

#[test]
fn identity_macro_re_evaluates_its_argument() {
    let session = compile_with(
        echo_first as MacroAddress,
        "(def id (macro intern (n) n))\n\
         (def main (fn intern int (void) (id 5)))",
    );
    assert_eq!(ret_constant(&session, "_Z4main"), Some(5));
}

#[test]
fn macro_result_in_do_form_evaluates_like_the_inner_form() {
    let session = compile_with(
        wrap_in_do as MacroAddress,
        "(def w (macro intern (n) n))\n\
         (def main (fn intern int (void) (w 1)))",
    );
    assert_eq!(ret_constant(&session, "_Z4main"), Some(5));
}

#[test]
fn varargs_macro_accepts_extra_arguments() {
    let session = compile_with(
        take_first_of_three as MacroAddress,
        "(def many (macro intern (a ...) a))\n\
         (def main (fn intern int (void) (many 1 2 3)))",
    );
    assert_eq!(ret_constant(&session, "_Z4main"), Some(1));
}

#[test]
fn non_varargs_macro_arity_mismatch_is_reported() {
    let mut session = session_with(echo_first as MacroAddress);
    let ok = session.compile_str(
        "(def id (macro intern (n) n))\n\
         (def main (fn intern int (void) (id 5 6)))",
        "test.ka",
    );
    assert!(!ok);
    assert!(
        session
            .diagnostics()
            .iter()
            .any(|d| d.kind == ErrorKind::OverloadedFunctionOrMacroNotInScopeWithClosest),
        "{:?}",
        session.diagnostics()
    );
}

#[test]
fn core_form_names_cannot_be_macros() {
    let mut session = Session::new();
    let ok = session.compile_str("(def if (macro intern (a)))", "test.ka");
    assert!(!ok);
    assert_eq!(session.diagnostics()[0].kind, ErrorKind::NoCoreFormNameInMacro);
}

#[test]
fn macro_with_function_parameter_types_is_rejected() {
    let mut session = Session::new();
    let ok = session.compile_str(
        "(def h (fn intern int ((x int)) x))\n\
         (def h (macro intern ((x int))))",
        "test.ka",
    );
    assert!(!ok);
    assert!(
        session
            .diagnostics()
            .iter()
            .any(|d| d.kind == ErrorKind::MacroHasSameParamsAsFunction),
        "{:?}",
        session.diagnostics()
    );
}

#[test]
fn macros_without_an_engine_report_unavailable_execution() {
    let mut session = Session::new();
    let ok = session.compile_str(
        "(def id (macro intern (n) n))\n\
         (def main (fn intern int (void) (id 5)))",
        "test.ka",
    );
    assert!(!ok);
    assert!(
        session
            .diagnostics()
            .iter()
            .any(|d| d.kind == ErrorKind::MacroExecutionNotAvailable),
        "{:?}",
        session.diagnostics()
    );
}

#[test]
fn macro_spans_stamp_onto_expansion_arguments() {
    // The identity macro returns its argument node; the argument must have
    // been stamped with the call-site span on the way through the wire
    // format. Successful compilation plus the returned constant proves the
    // node survived marshalling with its token intact.
    let session = compile_with(
        echo_first as MacroAddress,
        "(def id (macro intern (n) n))\n\
         (def main (fn intern int (void)\n\
           (id 9)))",
    );
    assert_eq!(ret_constant(&session, "_Z4main"), Some(9));
}

#[test]
fn macro_bodies_compile_like_functions() {
    let session = compile_with(
        echo_first as MacroAddress,
        "(def id (macro intern (n) n))",
    );
    // The macro body exists in the module, returning (p DNode).
    let found = session
        .ir
        .live_functions()
        .any(|(_, f)| f.name.contains("2id") && !f.is_declaration());
    assert!(found, "macro body was compiled into the module");
}
