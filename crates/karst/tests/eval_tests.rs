use karst::{ConstValue, GlobalInit, Instruction, Op, ROOT_NS, Session, Value};

fn compile(source: &str) -> Session {
    let mut session = Session::new();
    let ok = session.compile_str(source, "test.ka");
    assert!(ok, "unexpected diagnostics: {:?}", session.diagnostics());
    session
}

fn fn_instrs<'a>(session: &'a Session, name: &str) -> Vec<&'a Instruction> {
    let id = session
        .ir
        .get_function(name)
        .unwrap_or_else(|| panic!("function {name} not found"));
    session.ir.function(id).all_instrs().map(|(_, _, i)| i).collect()
}

#[test]
fn global_int_binding_with_constant_initializer() {
    let session = compile("(def x (var intern int 42))");
    let mangled = session.tree.name_to_symbol(ROOT_NS, "x");
    assert_eq!(mangled, "_Z1x");
    let global = session.ir.global(session.ir.get_global("_Z1x").expect("global bound"));
    assert_eq!(
        global.init,
        Some(GlobalInit::Scalar(ConstValue::Int { bits: 32, value: 42 }))
    );
}

#[test]
fn function_body_allocates_stores_and_calls() {
    let session = compile("(def main (fn extern-c int (void) (def y (var auto int 3)) (+ y 4)))");
    let instrs = fn_instrs(&session, "main");
    let allocas = instrs.iter().filter(|i| matches!(i.op, Op::Alloca { .. })).count();
    assert_eq!(allocas, 1, "exactly one alloca for y");
    assert!(
        instrs.iter().any(|i| matches!(
            i.op,
            Op::Store {
                value: Value::Const(ConstValue::Int { value: 3, .. }),
                ..
            }
        )),
        "initializer stores 3"
    );
    let calls = instrs.iter().filter(|i| matches!(i.op, Op::Call { .. })).count();
    assert_eq!(calls, 1, "one call to + and no destructor calls");
    assert!(
        instrs.iter().any(|i| matches!(i.op, Op::Ret { value: Some(_) })),
        "function returns the sum"
    );
}

#[test]
fn struct_literal_initializes_fields_by_name() {
    let session = compile(
        "(def s (struct intern ((a int) (b int))))\n\
         (def main (fn intern int (void) (def v (var auto s (s (b 2) (a 1)))) 0))",
    );
    let instrs = fn_instrs(&session, "_Z4main");
    let geps = instrs.iter().filter(|i| matches!(i.op, Op::Gep { .. })).count();
    assert!(geps >= 2, "one GEP per field");
    for field_value in [1u128, 2u128] {
        assert!(
            instrs.iter().any(|i| match &i.op {
                Op::Store {
                    value: Value::Const(ConstValue::Int { value, .. }),
                    ..
                } => *value == field_value,
                _ => false,
            }),
            "field initializer {field_value} stored"
        );
    }
    // The literal scratch slot plus the variable's own storage.
    let allocas = instrs.iter().filter(|i| matches!(i.op, Op::Alloca { .. })).count();
    assert_eq!(allocas, 2);
}

#[test]
fn address_of_parameter_round_trips_through_deref() {
    let session = compile(
        "(def f (fn intern (p int) ((x int)) (return (# x))))\n\
         (def main (fn intern int (void) (@ (f 7))))",
    );
    let f_instrs = fn_instrs(&session, "_Z1fi");
    // The parameter spills to an alloca; its address is the return value.
    let alloca_id = session
        .ir
        .function(session.ir.get_function("_Z1fi").expect("f exists"))
        .all_instrs()
        .find(|(_, _, i)| matches!(i.op, Op::Alloca { .. }))
        .map(|(_, id, _)| id)
        .expect("parameter alloca");
    assert!(
        f_instrs.iter().any(|i| matches!(
            i.op,
            Op::Ret {
                value: Some(Value::Instr(id))
            } if id == alloca_id
        )),
        "f returns the parameter's storage address"
    );
    let main_instrs = fn_instrs(&session, "_Z4main");
    assert!(main_instrs.iter().any(|i| matches!(i.op, Op::Call { .. })));
    assert!(main_instrs.iter().any(|i| matches!(i.op, Op::Load { .. })));
}

#[test]
fn string_literals_become_private_char_globals() {
    let session = compile("(def main (fn intern (p char) (void) \"hi\\n\"))");
    let found = session
        .ir
        .globals()
        .any(|(_, g)| g.constant && g.init == Some(GlobalInit::Bytes(b"hi\n\0".to_vec())));
    assert!(found, "string literal global with trailing NUL");
    let instrs = fn_instrs(&session, "_Z4main");
    assert!(
        instrs.iter().any(|i| matches!(
            i.op,
            Op::Gep {
                base: Value::Global(_),
                ..
            }
        )),
        "result is a pointer to the literal's first element"
    );
}

#[test]
fn string_literal_globals_are_shared_per_module() {
    let session = compile(
        "(def f (fn intern (p char) (void) \"same\"))\n\
         (def g (fn intern (p char) (void) \"same\"))",
    );
    let count = session
        .ir
        .globals()
        .filter(|(_, g)| g.init == Some(GlobalInit::Bytes(b"same\0".to_vec())))
        .count();
    assert_eq!(count, 1, "one cached global per distinct literal");
}

#[test]
fn funcall_calls_through_a_function_pointer() {
    let session = compile(
        "(def add1 (fn intern int ((x int)) (+ x 1)))\n\
         (def main (fn intern int (void) (funcall (# add1) 41)))",
    );
    let instrs = fn_instrs(&session, "_Z4main");
    assert!(
        instrs.iter().any(|i| matches!(
            i.op,
            Op::Call {
                callee: karst::Callee::Pointer(_),
                ..
            }
        )),
        "funcall emits an indirect call"
    );
}

#[test]
fn bare_function_pointer_head_rewrites_to_funcall() {
    let session = compile(
        "(def add1 (fn intern int ((x int)) (+ x 1)))\n\
         (def main (fn intern int (void) (def fp (var auto (p (fn int ((a int)))) (# add1))) (fp 5)))",
    );
    let instrs = fn_instrs(&session, "_Z4main");
    assert!(
        instrs.iter().any(|i| matches!(
            i.op,
            Op::Call {
                callee: karst::Callee::Pointer(_),
                ..
            }
        )),
        "calling a pointer-to-function variable goes through funcall"
    );
}

#[test]
fn if_with_matching_branches_is_an_expression() {
    let session = compile("(def main (fn intern int (void) (if true 1 2)))");
    let function = session.ir.function(session.ir.get_function("_Z4main").expect("main"));
    assert!(function.blocks.len() >= 4, "then/else/join blocks exist");
    let instrs = fn_instrs(&session, "_Z4main");
    assert!(instrs.iter().any(|i| matches!(i.op, Op::CondBr { .. })));
    // Both branch values funnel through one slot.
    let stores = instrs
        .iter()
        .filter(|i| {
            matches!(
                i.op,
                Op::Store {
                    value: Value::Const(ConstValue::Int { value: 1, .. } | ConstValue::Int { value: 2, .. }),
                    ..
                }
            )
        })
        .count();
    assert_eq!(stores, 2);
}

#[test]
fn setv_sugar_stores_through_the_address() {
    let session = compile("(def main (fn intern int (void) (def y (var auto int 1)) (setv y 5) y))");
    let instrs = fn_instrs(&session, "_Z4main");
    assert!(instrs.iter().any(|i| matches!(
        i.op,
        Op::Store {
            value: Value::Const(ConstValue::Int { value: 5, .. }),
            ..
        }
    )));
}

#[test]
fn sizeof_folds_to_a_size_constant() {
    let session = compile("(def main (fn intern size (void) (sizeof int)))");
    let instrs = fn_instrs(&session, "_Z4main");
    assert!(instrs.iter().any(|i| matches!(
        i.op,
        Op::Ret {
            value: Some(Value::Const(ConstValue::Int { bits: 64, value: 4 }))
        }
    )));
}

#[test]
fn cast_widens_signed_integers_with_sext() {
    let session = compile("(def main (fn intern int64 (void) (cast 7 int64)))");
    let instrs = fn_instrs(&session, "_Z4main");
    assert!(instrs.iter().any(|i| matches!(
        i.op,
        Op::Cast {
            kind: karst::CastKind::SExt,
            ..
        }
    )));
}

#[test]
fn enum_literals_build_wrapped_constants() {
    let session = compile(
        "(def color (enum intern int (red green (blue 7))))\n\
         (def main (fn intern int (void) (def c (var auto color (color blue))) 0))",
    );
    let instrs = fn_instrs(&session, "_Z4main");
    assert!(
        instrs.iter().any(|i| matches!(
            i.op,
            Op::Store {
                value: Value::Const(ConstValue::Int { value: 7, .. }),
                ..
            }
        )),
        "explicit enum member value is stored"
    );
}

#[test]
fn array_subscript_reads_elements() {
    let session = compile(
        "(def main (fn intern int (void)\n\
           (def a (var auto (array-of 3 int) (array 10 20 30)))\n\
           (@$ a 1)))",
    );
    let instrs = fn_instrs(&session, "_Z4main");
    assert!(instrs.iter().any(|i| matches!(i.op, Op::Gep { .. })));
    assert!(instrs.iter().any(|i| matches!(i.op, Op::Ret { value: Some(_) })));
}

#[test]
fn pointer_arithmetic_scales_by_element_size() {
    let session = compile(
        "(def main (fn intern (p int) (void)\n\
           (def a (var auto (array-of 2 int) (array 1 2)))\n\
           (p+ a 1)))",
    );
    let instrs = fn_instrs(&session, "_Z4main");
    assert!(
        instrs.iter().any(|i| match &i.op {
            Op::Arith {
                op: karst::ArithOp::Mul,
                rhs: Value::Const(ConstValue::Int { value, .. }),
                ..
            } => *value == 4,
            _ => false,
        }),
        "offset multiplies by sizeof(int)"
    );
}
