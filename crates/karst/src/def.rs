//! The `def` form inside function bodies.
//!
//! `(def NAME (var LINKAGE TYPE [INIT]))` binds a variable with storage in
//! the current block. `TYPE` may be the literal `\`, meaning "infer from
//! the initializer". Without an initializer the `init` overload protocol
//! runs (scalar, per-array-element, per-struct-field); with one, copies go
//! through `setf-copy` when an overload is in scope. `struct`, `enum`,
//! `fn`, and `macro` bodies delegate to the top-level parsers.

use crate::{
    element::{FnId, Linkage, Variable},
    error::{CResult, ErrorKind, Failed},
    eval::ParseResult,
    ir::{BlockId, Builder, Callee, Value},
    node::Node,
    run::{Session, parse_linkage},
    types::TypeId,
};

pub(crate) fn form_def(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    node: &Node,
    get_address: bool,
    _core: bool,
    _wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    let list = node.as_list().expect("form node is a list");
    let [_, name_node, body_node] = list else {
        return Err(session.report_detail(ErrorKind::IncorrectNumberOfArgs, node.span, "def"));
    };
    let Some(name) = name_node.as_symbol().map(str::to_owned) else {
        return Err(session.report(ErrorKind::FirstListElementMustBeAtom, name_node.span));
    };
    let Some(body) = body_node.as_list() else {
        return Err(session.report(ErrorKind::UnexpectedElement, body_node.span));
    };
    match body.first().and_then(Node::as_symbol) {
        Some("var") => def_var(session, dfn, block, node, body_node, &name, get_address),
        Some("struct") => {
            session.parse_struct_definition(&name, body_node)?;
            Ok(ParseResult::filler(block, session.common.int_))
        }
        Some("enum") => {
            session.parse_enum_definition(&name, body_node)?;
            Ok(ParseResult::filler(block, session.common.int_))
        }
        Some("fn") => {
            session.parse_function_definition(&name, body_node, None)?;
            Ok(ParseResult::filler(block, session.common.int_))
        }
        Some("macro") => {
            session.parse_macro_definition(&name, body_node)?;
            Ok(ParseResult::filler(block, session.common.int_))
        }
        _ => Err(session.report(ErrorKind::OnlyVarAndStructPermitted, body_node.span)),
    }
}

fn lookup_init_fn(session: &mut Session, ty: TypeId) -> Option<FnId> {
    let p_ty = session.types.pointer_to(ty);
    session
        .ctx
        .get_function(&session.tree, &session.els, &session.types, "init", Some(&[p_ty]), false, None)
        .found
}

fn lookup_setf_copy(session: &mut Session, dst: TypeId, src: TypeId) -> Option<FnId> {
    session
        .ctx
        .get_function(&session.tree, &session.els, &session.types, "setf-copy", Some(&[dst, src]), false, None)
        .found
}

fn def_var(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    node: &Node,
    body_node: &Node,
    name: &str,
    get_address: bool,
) -> CResult<ParseResult> {
    let body = body_node.as_list().expect("checked by caller");
    if body.len() < 3 {
        return Err(session.report_detail(ErrorKind::IncorrectMinimumNumberOfArgs, body_node.span, "var"));
    }
    let linkage = parse_linkage(session, &body[1])?;
    if !matches!(linkage, Linkage::Auto | Linkage::Intern) && body.len() > 3 {
        return Err(session.report(ErrorKind::HasBothExternAndInitialiser, body_node.span));
    }

    // Implied type: `\` takes the type of the initializer expression.
    if body[2].is_symbol("\\") {
        if body.len() != 4 {
            return Err(session.report(ErrorKind::MustHaveInitialiserForImpliedType, body_node.span));
        }
        let init_pr = session.evaluate(dfn, block, &body[3], get_address, None)?;
        let ty = init_pr.ty;
        let current = init_pr.block;

        let storage = alloca_for(session, dfn, current, ty);
        let var_id = session.els.add_var(Variable {
            value: Some(storage),
            has_initializer: true,
            ..Variable::new(name, ty, Linkage::Auto)
        });
        if !session.tree.add_variable(&mut session.els, session.ctx.current(), name, var_id) {
            return Err(session.report_detail(ErrorKind::RedefinitionOfVariable, node.span, name.to_owned()));
        }
        if init_pr.retval_used {
            session.els.var_mut(var_id).value = init_pr.retval;
            let mut pr = ParseResult::filler(current, session.common.int_);
            pr.block = init_pr.block;
            return Ok(pr);
        }
        return store_initializer(session, dfn, node, ty, storage, &init_pr);
    }

    let ty = session.parse_type(&body[2])?;
    let init_fn = lookup_init_fn(session, ty);

    // A must-init struct requires either an explicit initializer or an
    // `init` overload.
    if let Some(struct_id) = session.struct_of_type(ty) {
        if session.els.struct_def(struct_id).must_init && body.len() == 3 && init_fn.is_none() {
            return Err(session.report(ErrorKind::MustHaveInitialiserForType, body_node.span));
        }
    }

    let zero_sized_array = session.types.array_element(ty).is_some_and(|(_, len)| len == 0);

    let storage = alloca_for(session, dfn, block, ty);
    let var_id = session.els.add_var(Variable {
        value: Some(storage),
        has_initializer: body.len() > 3,
        ..Variable::new(name, ty, linkage)
    });
    if !session.tree.add_variable(&mut session.els, session.ctx.current(), name, var_id) {
        return Err(session.report_detail(ErrorKind::RedefinitionOfVariable, node.span, name.to_owned()));
    }

    if body.len() == 3 {
        if session.types.get(ty).is_const && init_fn.is_none() {
            return Err(session.report(ErrorKind::MustHaveInitialiserForConstType, body_node.span));
        }
        initialise_storage(session, dfn, block, ty, storage, init_fn)?;
        return Ok(ParseResult::filler(block, session.common.int_));
    }

    let init_node = &body[3];
    let init_pr = session.evaluate(dfn, block, init_node, get_address, Some(ty))?;
    let current = init_pr.block;

    // The in-place return-value protocol hands the variable its storage.
    if init_pr.retval_used {
        session.els.var_mut(var_id).value = init_pr.retval;
        let mut pr = ParseResult::filler(current, session.common.int_);
        pr.block = current;
        return Ok(pr);
    }

    // An initializer form headed by `init` took responsibility for the
    // storage itself.
    if init_node
        .as_list()
        .and_then(|l| l.first())
        .is_some_and(|h| h.is_symbol("init"))
    {
        let mut pr = ParseResult::filler(current, session.common.int_);
        pr.block = current;
        return Ok(pr);
    }

    // A constant integer zero feeding a non-integer type means the
    // expression initialized the storage as a side effect; skip the copy.
    if !session.types.is_integer(ty)
        && session.types.base_type(ty) != Some(crate::types::BaseType::Bool)
        && init_pr.value.and_then(Value::as_const).is_some_and(crate::ir::ConstValue::is_integer_zero)
    {
        let mut pr = ParseResult::filler(current, session.common.int_);
        pr.block = current;
        return Ok(pr);
    }

    // Zero-length arrays take their length (and so their type) from the
    // initializer.
    let (ty, storage) = if zero_sized_array {
        let inferred = init_pr.ty;
        let new_storage = alloca_for(session, dfn, current, inferred);
        let var = session.els.var_mut(var_id);
        var.ty = inferred;
        var.value = Some(new_storage);
        (inferred, new_storage)
    } else {
        (ty, storage)
    };
    store_initializer(session, dfn, node, ty, storage, &init_pr)
}

fn alloca_for(session: &mut Session, dfn: FnId, block: BlockId, ty: TypeId) -> Value {
    let p_ty = session.types.pointer_to(ty);
    let ir_fn = session.ir_fn_of(dfn);
    let mut builder = Builder::new(&mut session.ir, ir_fn, block);
    builder.alloca(ty, p_ty)
}

/// Moves an evaluated initializer into freshly bound storage, through
/// `setf-copy` when an overload is in scope, then destructs the temporary.
fn store_initializer(
    session: &mut Session,
    dfn: FnId,
    node: &Node,
    ty: TypeId,
    storage: Value,
    init_pr: &ParseResult,
) -> CResult<ParseResult> {
    let current = init_pr.block;
    let p_ty = session.types.pointer_to(ty);
    // The pointer/pointer setf-copy applies only on strict equality; the
    // plain store accepts a non-const value feeding a const target.
    let strict_equal = session.types.equal_relaxed(ty, init_pr.ty, false);
    let types_equal = session.types.equal_relaxed(init_pr.ty, ty, true);

    let copy_pp = lookup_setf_copy(session, p_ty, p_ty).filter(|_| strict_equal);
    if let Some(copy_fn) = copy_pp {
        let copy_ir = session.els.function(copy_fn).ir.expect("setf-copy has a body");
        let ir_fn = session.ir_fn_of(dfn);
        let mut builder = Builder::new(&mut session.ir, ir_fn, current);
        let spill = builder.alloca(ty, p_ty);
        builder.store(init_pr.value_or_unit(), spill);
        builder.call(Callee::Function(copy_ir), vec![storage, spill], None);
    } else if let Some(copy_fn) = lookup_setf_copy(session, p_ty, init_pr.ty) {
        let copy_ir = session.els.function(copy_fn).ir.expect("setf-copy has a body");
        let ir_fn = session.ir_fn_of(dfn);
        let mut builder = Builder::new(&mut session.ir, ir_fn, current);
        builder.call(Callee::Function(copy_ir), vec![storage, init_pr.value_or_unit()], None);
    } else {
        if !types_equal {
            let expected = session.types.display(ty);
            let got = session.types.display(init_pr.ty);
            return Err(session.report_detail(
                ErrorKind::IncorrectType,
                node.span,
                format!("expected {expected}, got {got}"),
            ));
        }
        let ir_fn = session.ir_fn_of(dfn);
        let mut builder = Builder::new(&mut session.ir, ir_fn, current);
        builder.store(init_pr.value_or_unit(), storage);
    }

    let done = session.destruct_if_applicable(dfn, init_pr, false)?;
    let mut pr = ParseResult::filler(done.block, session.common.int_);
    pr.block = done.block;
    Ok(pr)
}

/// Default initialization without an explicit initializer: `init` overload
/// first, then element-wise for arrays, then field-wise for structs.
fn initialise_storage(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    ty: TypeId,
    storage: Value,
    init_fn: Option<FnId>,
) -> CResult<()> {
    let init_fn = init_fn.or_else(|| lookup_init_fn(session, ty));
    if let Some(init_fn) = init_fn {
        let Some(init_ir) = session.els.function(init_fn).ir else {
            return Err(Failed);
        };
        let ir_fn = session.ir_fn_of(dfn);
        let mut builder = Builder::new(&mut session.ir, ir_fn, block);
        builder.call(Callee::Function(init_ir), vec![storage], None);
        return Ok(());
    }

    if let Some((element_ty, length)) = session.types.array_element(ty) {
        let element_init = lookup_init_fn(session, element_ty);
        if element_init.is_none() && session.types.struct_name(element_ty).is_none() {
            return Ok(());
        }
        let p_elem = session.types.pointer_to(element_ty);
        for i in 0..length {
            let ir_fn = session.ir_fn_of(dfn);
            let mut builder = Builder::new(&mut session.ir, ir_fn, block);
            let slot = builder.gep_member(storage, i, p_elem);
            initialise_storage(session, dfn, block, element_ty, slot, element_init)?;
        }
        return Ok(());
    }

    if let Some(struct_id) = session.struct_of_type(ty) {
        let members: Vec<TypeId> = session.els.struct_def(struct_id).members.values().copied().collect();
        for (i, member_ty) in members.into_iter().enumerate() {
            let p_member = session.types.pointer_to(member_ty);
            let ir_fn = session.ir_fn_of(dfn);
            let mut builder = Builder::new(&mut session.ir, ir_fn, block);
            let slot = builder.gep_member(storage, i as u64, p_member);
            initialise_storage(session, dfn, block, member_ty, slot, None)?;
        }
    }
    Ok(())
}
