//! Core forms.
//!
//! Core forms are recognized directly by the evaluator and cannot be
//! overridden by macros. The core sugar macros (`setv`, `@$`, `:@`, `@:`,
//! `@:@`) expand inline to compositions of the real forms.

use crate::{
    element::{DeferredGoto, FnId, Label},
    error::{CResult, ErrorKind, Failed},
    eval::ParseResult,
    ir::{BlockId, Builder, CmpPred, ConstValue, GlobalId, GlobalInit, IrLinkage, Value},
    node::{Node, NodeKind, TokenKind},
    run::Session,
    types::TypeId,
};

pub(crate) type FormHandler =
    fn(&mut Session, FnId, BlockId, &Node, bool, bool, Option<TypeId>) -> CResult<ParseResult>;

pub(crate) fn core_form_handler(name: &str) -> Option<FormHandler> {
    Some(match name {
        "goto" => form_goto,
        "label" => form_label,
        "return" => form_return,
        "setf" => form_setf,
        "@" => form_deref,
        ":" => form_sref,
        "#" => form_address_of,
        "$" => form_aref,
        "p=" => form_ptr_eq,
        "p<" => form_ptr_lt,
        "p>" => form_ptr_gt,
        "p+" => form_ptr_add,
        "p-" => form_ptr_sub,
        "va-start" => form_va_start,
        "va-end" => form_va_end,
        "va-arg" => form_va_arg,
        "null" => form_null,
        "nullptr" => form_nullptr,
        "get-dnodes" => form_get_dnodes,
        "def" => crate::def::form_def,
        "if" => form_if,
        "do" => form_do,
        "cast" => form_cast,
        "sizeof" => form_sizeof,
        "offsetof" => form_offsetof,
        "alignmentof" => form_alignmentof,
        "funcall" => form_funcall,
        "using-namespace" => form_using_namespace,
        "new-scope" => form_new_scope,
        "array-of" => form_array_of,
        _ => return None,
    })
}

/// Expands the core sugar macros; returns `None` when `name` is not one.
pub(crate) fn expand_core_sugar(session: &mut Session, node: &Node, name: &str) -> CResult<Option<Node>> {
    let mut rewrite = |head: &str, wrap: &dyn Fn(&[Node]) -> Vec<Node>| -> CResult<Node> {
        let list = node.as_list().expect("sugar node is a list");
        if list.len() != 3 {
            return Err(session.report_detail(ErrorKind::IncorrectNumberOfArgs, node.span, head.to_owned()));
        }
        Ok(Node::list(wrap(&list[1..]), node.span))
    };
    let sym = |text: &str| Node::symbol(text, node.span);
    let result = match name {
        // (setv x v) -> (setf (# x) v)
        "setv" => rewrite("setv", &|args| {
            vec![
                sym("setf"),
                Node::list(vec![sym("#"), args[0].clone()], node.span),
                args[1].clone(),
            ]
        })?,
        // (@$ a i) -> (@ ($ a i))
        "@$" => rewrite("@$", &|args| {
            vec![
                sym("@"),
                Node::list(vec![sym("$"), args[0].clone(), args[1].clone()], node.span),
            ]
        })?,
        // (:@ s f) -> (: (@ s) f)
        ":@" => rewrite(":@", &|args| {
            vec![
                sym(":"),
                Node::list(vec![sym("@"), args[0].clone()], node.span),
                args[1].clone(),
            ]
        })?,
        // (@: s f) -> (@ (: s f))
        "@:" => rewrite("@:", &|args| {
            vec![
                sym("@"),
                Node::list(vec![sym(":"), args[0].clone(), args[1].clone()], node.span),
            ]
        })?,
        // (@:@ s f) -> (@ (: (@ s) f))
        "@:@" => rewrite("@:@", &|args| {
            vec![
                sym("@"),
                Node::list(
                    vec![
                        sym(":"),
                        Node::list(vec![sym("@"), args[0].clone()], node.span),
                        args[1].clone(),
                    ],
                    node.span,
                ),
            ]
        })?,
        _ => return Ok(None),
    };
    Ok(Some(result))
}

fn expect_args<'n>(
    session: &mut Session,
    node: &'n Node,
    name: &str,
    min: usize,
    max: Option<usize>,
) -> CResult<&'n [Node]> {
    let list = node.as_list().expect("form node is a list");
    let given = list.len() - 1;
    if given < min || max.is_some_and(|m| given > m) {
        let kind = if max == Some(min) {
            ErrorKind::IncorrectNumberOfArgs
        } else {
            ErrorKind::IncorrectMinimumNumberOfArgs
        };
        return Err(session.report_detail(kind, node.span, format!("{name}: got {given}")));
    }
    Ok(&list[1..])
}

// --- control flow ---------------------------------------------------------

fn form_goto(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    node: &Node,
    _get_address: bool,
    _core: bool,
    _wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    let args = expect_args(session, node, "goto", 1, Some(1))?;
    let Some(label_name) = args[0].as_symbol() else {
        return Err(session.report(ErrorKind::FirstListElementMustBeSymbol, args[0].span));
    };
    let ns = session.ctx.current();
    let index = session.tree.get(ns).lv_index;
    session.els.function_mut(dfn).deferred_gotos.push(DeferredGoto {
        label_name: label_name.to_owned(),
        ns,
        index,
        block,
        span: node.span,
    });
    // Code after a goto is unreachable; it lands in a fresh block so the
    // branch can be appended to the recorded one during resolution.
    let ir_fn = session.ir_fn_of(dfn);
    let next = session.ir.function_mut(ir_fn).add_block("post_goto");
    Ok(ParseResult::filler(next, session.common.int_))
}

fn form_label(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    node: &Node,
    _get_address: bool,
    _core: bool,
    _wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    let args = expect_args(session, node, "label", 1, Some(1))?;
    let Some(label_name) = args[0].as_symbol() else {
        return Err(session.report(ErrorKind::FirstListElementMustBeSymbol, args[0].span));
    };
    let ir_fn = session.ir_fn_of(dfn);
    let target = session.ir.function_mut(ir_fn).add_block(label_name);
    let mut builder = Builder::new(&mut session.ir, ir_fn, block);
    builder.br(target);
    let ns = session.ctx.current();
    let index = {
        let data = session.tree.get_mut(ns);
        data.lv_index += 1;
        data.lv_index
    };
    session.els.function_mut(dfn).labels.insert(
        label_name.to_owned(),
        Label {
            block: target,
            ns,
            index,
        },
    );
    Ok(ParseResult::filler(target, session.common.int_))
}

fn form_return(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    node: &Node,
    _get_address: bool,
    _core: bool,
    _wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    let args = expect_args(session, node, "return", 0, Some(1))?;
    let ret_ty = session.els.function(dfn).return_type;
    let void_ty = session.common.void_;

    let (mut current, ret_value) = if let Some(expr) = args.first() {
        let pr = session.evaluate(dfn, block, expr, false, Some(ret_ty))?;
        if ret_ty != void_ty && !session.types.equal_relaxed(pr.ty, ret_ty, true) {
            let expected = session.types.display(ret_ty);
            let got = session.types.display(pr.ty);
            return Err(session.report_detail(
                ErrorKind::IncorrectReturnType,
                expr.span,
                format!("expected {expected}, got {got}"),
            ));
        }
        (pr.block, pr.value)
    } else {
        (block, None)
    };

    // Destructors for every scope of this function run before the return.
    let body_ns = session.els.function(dfn).body_ns;
    if let Some(body_ns) = body_ns {
        let active: Vec<_> = session.ctx.active.clone();
        for &ns in active.iter().rev() {
            current = session.close_namespace_vars(dfn, current, ns, None)?;
            if ns == body_ns {
                break;
            }
        }
    } else {
        current = session.scope_close(dfn, current, None)?;
    }

    let ir_fn = session.ir_fn_of(dfn);
    let mut builder = Builder::new(&mut session.ir, ir_fn, current);
    if ret_ty == void_ty {
        builder.ret(None);
    } else {
        builder.ret(Some(ret_value.unwrap_or(Value::Const(ConstValue::Int { bits: 32, value: 0 }))));
    }
    // The block is now terminated; anything evaluated after a return is
    // unreachable and gets pruned with the other post-terminator
    // instructions when the body finishes.
    Ok(ParseResult::filler(current, session.common.int_))
}

fn form_if(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    node: &Node,
    _get_address: bool,
    _core: bool,
    wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    let args = expect_args(session, node, "if", 2, Some(3))?;
    let cond = session.evaluate(dfn, block, &args[0], false, Some(session.common.bool_))?;
    if cond.ty != session.common.bool_ {
        return Err(session.report_detail(ErrorKind::IncorrectType, args[0].span, "if condition must be bool"));
    }

    let ir_fn = session.ir_fn_of(dfn);
    let then_block = session.ir.function_mut(ir_fn).add_block("then");
    let else_block = session.ir.function_mut(ir_fn).add_block("else");

    let then_pr = session.evaluate(dfn, then_block, &args[1], false, wanted)?;
    let else_pr = match args.get(2) {
        Some(else_node) => Some(session.evaluate(dfn, else_block, else_node, false, wanted)?),
        None => None,
    };

    let join_block = session.ir.function_mut(ir_fn).add_block("join");
    let value_ty = match &else_pr {
        Some(e) if then_pr.ty == e.ty && then_pr.ty != session.common.void_ && then_pr.value.is_some() => {
            Some(then_pr.ty)
        }
        _ => None,
    };

    // When both branches produce a value of one type the form is an
    // expression; the value moves through a temporary slot allocated before
    // the branch.
    let slot = value_ty.map(|ty| {
        let p_ty = session.types.pointer_to(ty);
        let mut builder = Builder::new(&mut session.ir, ir_fn, cond.block);
        builder.alloca(ty, p_ty)
    });
    let mut builder = Builder::new(&mut session.ir, ir_fn, cond.block);
    builder.cond_br(cond.value_or_unit(), then_block, else_block);

    let mut finish_branch = |session: &mut Session, pr: &ParseResult| -> CResult<()> {
        // Branch-local temporaries destruct at the join.
        let done = session.destruct_if_applicable(dfn, pr, false)?;
        let end = done.block;
        if !session.ir.function(ir_fn).block_terminated(end) {
            let mut builder = Builder::new(&mut session.ir, ir_fn, end);
            if let (Some(slot), Some(value)) = (slot, pr.value) {
                builder.store(value, slot);
            }
            builder.br(join_block);
        }
        Ok(())
    };
    finish_branch(session, &then_pr)?;
    match &else_pr {
        Some(e) => finish_branch(session, e)?,
        None => {
            let mut builder = Builder::new(&mut session.ir, ir_fn, else_block);
            builder.br(join_block);
        }
    }

    match (value_ty, slot) {
        (Some(ty), Some(slot)) => {
            let mut builder = Builder::new(&mut session.ir, ir_fn, join_block);
            let value = builder.load(slot, ty);
            Ok(ParseResult::new(join_block, ty, value))
        }
        _ => Ok(ParseResult::filler(join_block, session.common.int_)),
    }
}

// --- assignment and addressing --------------------------------------------

fn form_setf(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    node: &Node,
    _get_address: bool,
    _core: bool,
    _wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    let args = expect_args(session, node, "setf", 2, Some(2))?;
    let dst = session.evaluate(dfn, block, &args[0], false, None)?;
    let Some(target_ty) = session.types.pointee(dst.ty) else {
        return Err(session.report_detail(ErrorKind::IncorrectType, args[0].span, "setf target must be a pointer"));
    };
    if session.types.get(target_ty).is_const {
        return Err(session.report(ErrorKind::CannotModifyConstVariable, args[0].span));
    }
    let src = session.evaluate(dfn, dst.block, &args[1], false, Some(target_ty))?;
    let current = src.block;

    let p_target = session.types.pointer_to(target_ty);
    let bool_ty = session.common.bool_;
    let types_equal = session.types.equal_relaxed(src.ty, target_ty, true);

    // setf-assign overrides the store; the pointer/pointer form applies
    // when the types line up, the value form when an overload exists for
    // the source type directly.
    let assign_pp = session
        .ctx
        .get_function(&session.tree, &session.els, &session.types, "setf-assign", Some(&[p_target, p_target]), false, None)
        .found
        .filter(|_| types_equal);
    let result_value;
    if let Some(assign) = assign_pp {
        let assign_ir = session.els.function(assign).ir.expect("setf-assign has a body");
        let ir_fn = session.ir_fn_of(dfn);
        let mut builder = Builder::new(&mut session.ir, ir_fn, current);
        let spill = builder.alloca(target_ty, p_target);
        builder.store(src.value_or_unit(), spill);
        result_value = builder.call(
            crate::ir::Callee::Function(assign_ir),
            vec![dst.value_or_unit(), spill],
            Some(bool_ty),
        );
    } else {
        let assign_direct = session
            .ctx
            .get_function(&session.tree, &session.els, &session.types, "setf-assign", Some(&[p_target, src.ty]), false, None)
            .found;
        if let Some(assign) = assign_direct {
            let assign_ir = session.els.function(assign).ir.expect("setf-assign has a body");
            let ir_fn = session.ir_fn_of(dfn);
            let mut builder = Builder::new(&mut session.ir, ir_fn, current);
            result_value = builder.call(
                crate::ir::Callee::Function(assign_ir),
                vec![dst.value_or_unit(), src.value_or_unit()],
                Some(bool_ty),
            );
        } else {
            if !types_equal {
                let expected = session.types.display(target_ty);
                let got = session.types.display(src.ty);
                return Err(session.report_detail(
                    ErrorKind::IncorrectType,
                    args[1].span,
                    format!("expected {expected}, got {got}"),
                ));
            }
            let ir_fn = session.ir_fn_of(dfn);
            let mut builder = Builder::new(&mut session.ir, ir_fn, current);
            builder.store(src.value_or_unit(), dst.value_or_unit());
            result_value = Value::Const(ConstValue::bool(true));
        }
    }

    let done = session.destruct_if_applicable(dfn, &src, false)?;
    let mut pr = ParseResult::new(done.block, bool_ty, result_value);
    pr.do_not_copy_with_setf = true;
    pr.do_not_destruct = true;
    Ok(pr)
}

fn form_deref(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    node: &Node,
    get_address: bool,
    _core: bool,
    _wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    let args = expect_args(session, node, "@", 1, Some(1))?;
    let pr = session.evaluate(dfn, block, &args[0], false, None)?;
    let Some(pointee) = session.types.pointee(pr.ty) else {
        return Err(session.report_detail(ErrorKind::IncorrectType, args[0].span, "@ requires a pointer"));
    };
    if get_address {
        // The address of the dereferenced object is the pointer itself.
        return Ok(pr);
    }
    let ir_fn = session.ir_fn_of(dfn);
    let mut builder = Builder::new(&mut session.ir, ir_fn, pr.block);
    let value = builder.load(pr.value_or_unit(), pointee);
    Ok(ParseResult::new(pr.block, pointee, value))
}

/// `(: STRUCT MEMBER)` yields a pointer to the member; loading is the
/// caller's business (hence the `@:` sugar).
fn form_sref(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    node: &Node,
    _get_address: bool,
    _core: bool,
    _wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    let args = expect_args(session, node, ":", 2, Some(2))?;
    let Some(member_name) = args[1].as_symbol() else {
        return Err(session.report(ErrorKind::FirstListElementMustBeSymbol, args[1].span));
    };

    // Prefer the operand's address; fall back to a pointer-typed value.
    let errors = session.reporter.error_count();
    let base = match session.evaluate(dfn, block, &args[0], true, None) {
        Ok(pr) if session.types.pointee(pr.ty).is_some_and(|p| session.types.struct_name(p).is_some()) => pr,
        _ => {
            session.reporter.truncate(errors);
            let pr = session.evaluate(dfn, block, &args[0], false, None)?;
            if !session.types.pointee(pr.ty).is_some_and(|p| session.types.struct_name(p).is_some()) {
                return Err(session.report_detail(ErrorKind::IncorrectType, args[0].span, ": requires a struct"));
            }
            pr
        }
    };
    let struct_ty = session.types.pointee(base.ty).expect("checked above");
    let Some(struct_id) = session.struct_of_type(struct_ty) else {
        return Err(session.report_detail(ErrorKind::TypeNotInScope, args[0].span, session.types.display(struct_ty)));
    };
    let member = {
        let def = session.els.struct_def(struct_id);
        def.member_type(member_name).zip(def.member_index(member_name))
    };
    let Some((member_ty, member_idx)) = member else {
        return Err(session.report_detail(ErrorKind::FieldDoesNotExistInStruct, args[1].span, member_name.to_owned()));
    };

    let p_member = session.types.pointer_to(member_ty);
    let ir_fn = session.ir_fn_of(dfn);
    let mut builder = Builder::new(&mut session.ir, ir_fn, base.block);
    let field = builder.gep_member(base.value_or_unit(), member_idx, p_member);
    Ok(ParseResult::new(base.block, p_member, field))
}

fn form_address_of(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    node: &Node,
    _get_address: bool,
    _core: bool,
    _wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    let args = expect_args(session, node, "#", 1, Some(1))?;
    if let Some(name) = args[0].as_symbol() {
        if session.ctx.get_variable(&session.tree, name).is_none() {
            // Not a variable: a unique function overload's address works.
            let m = session
                .ctx
                .get_function(&session.tree, &session.els, &session.types, name, None, false, None);
            if let Some(found) = m.found {
                let (ir_fn, ret, params) = {
                    let function = session.els.function(found);
                    let params: Vec<TypeId> = function.params.iter().map(|&p| session.els.var(p).ty).collect();
                    (function.ir, function.return_type, params)
                };
                let Some(ir_fn) = ir_fn else {
                    return Err(session.report_detail(ErrorKind::NotInScope, args[0].span, name.to_owned()));
                };
                let fn_ty = session.types.function(ret, params);
                let p_fn = session.types.pointer_to(fn_ty);
                return Ok(ParseResult::new(block, p_fn, Value::FuncAddr(ir_fn)));
            }
        }
    }
    session.evaluate(dfn, block, &args[0], true, None)
}

/// `($ ARRAY INDEX)` yields a pointer to the indexed element; loading is
/// the caller's business (hence the `@$` sugar).
fn form_aref(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    node: &Node,
    _get_address: bool,
    _core: bool,
    _wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    let args = expect_args(session, node, "$", 2, Some(2))?;
    let errors = session.reporter.error_count();
    // An array-typed lvalue indexes through its storage; anything else must
    // already be a pointer.
    let base = match session.evaluate(dfn, block, &args[0], true, None) {
        Ok(pr) if session.types.pointee(pr.ty).is_some() => pr,
        _ => {
            session.reporter.truncate(errors);
            session.evaluate(dfn, block, &args[0], false, None)?
        }
    };
    let index = session.evaluate(dfn, base.block, &args[1], false, Some(session.common.int_))?;
    if !session.types.is_integer(index.ty) {
        return Err(session.report_detail(ErrorKind::IncorrectType, args[1].span, "array index must be an integer"));
    }
    let current = index.block;

    let Some(pointee) = session.types.pointee(base.ty) else {
        return Err(session.report_detail(ErrorKind::IncorrectType, args[0].span, "$ requires an array or pointer"));
    };
    let (element_ty, slot) = if let Some((element, _len)) = session.types.array_element(pointee) {
        let p_elem = session.types.pointer_to(element);
        let ir_fn = session.ir_fn_of(dfn);
        let mut builder = Builder::new(&mut session.ir, ir_fn, current);
        let zero = Value::Const(ConstValue::Int { bits: 32, value: 0 });
        let slot = builder.gep(base.value_or_unit(), [zero, index.value_or_unit()], p_elem);
        (element, slot)
    } else {
        let p_elem = session.types.pointer_to(pointee);
        let ir_fn = session.ir_fn_of(dfn);
        let mut builder = Builder::new(&mut session.ir, ir_fn, current);
        let slot = builder.gep(base.value_or_unit(), [index.value_or_unit()], p_elem);
        (pointee, slot)
    };
    let p_elem = session.types.pointer_to(element_ty);
    Ok(ParseResult::new(current, p_elem, slot))
}

// --- pointer arithmetic and comparison ------------------------------------

fn eval_pointer_pair(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    node: &Node,
    name: &str,
) -> CResult<(ParseResult, ParseResult)> {
    let args = expect_args(session, node, name, 2, Some(2))?;
    let lhs = session.evaluate(dfn, block, &args[0], false, None)?;
    if session.types.pointee(lhs.ty).is_none() {
        return Err(session.report_detail(ErrorKind::IncorrectType, args[0].span, format!("{name} requires pointers")));
    }
    let rhs = session.evaluate(dfn, lhs.block, &args[1], false, Some(lhs.ty))?;
    Ok((lhs, rhs))
}

fn form_ptr_cmp(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    node: &Node,
    name: &str,
    pred: CmpPred,
) -> CResult<ParseResult> {
    let (lhs, rhs) = eval_pointer_pair(session, dfn, block, node, name)?;
    let bool_ty = session.common.bool_;
    let ir_fn = session.ir_fn_of(dfn);
    let mut builder = Builder::new(&mut session.ir, ir_fn, rhs.block);
    let value = builder.cmp(pred, false, lhs.value_or_unit(), rhs.value_or_unit(), bool_ty);
    Ok(ParseResult::new(rhs.block, bool_ty, value))
}

fn form_ptr_eq(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    node: &Node,
    _get_address: bool,
    _core: bool,
    _wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    form_ptr_cmp(session, dfn, block, node, "p=", CmpPred::Eq)
}

fn form_ptr_lt(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    node: &Node,
    _get_address: bool,
    _core: bool,
    _wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    form_ptr_cmp(session, dfn, block, node, "p<", CmpPred::Lt)
}

fn form_ptr_gt(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    node: &Node,
    _get_address: bool,
    _core: bool,
    _wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    form_ptr_cmp(session, dfn, block, node, "p>", CmpPred::Gt)
}

fn form_ptr_add(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    node: &Node,
    _get_address: bool,
    _core: bool,
    _wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    let args = expect_args(session, node, "p+", 2, Some(2))?;
    let ptr = session.evaluate(dfn, block, &args[0], false, None)?;
    let offset = session.evaluate(dfn, ptr.block, &args[1], false, Some(session.common.int_))?;
    session.pointer_offset(dfn, offset.block, &ptr, &offset, false, node.span)
}

fn form_ptr_sub(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    node: &Node,
    _get_address: bool,
    _core: bool,
    _wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    let args = expect_args(session, node, "p-", 2, Some(2))?;
    let ptr = session.evaluate(dfn, block, &args[0], false, None)?;
    let offset = session.evaluate(dfn, ptr.block, &args[1], false, Some(session.common.int_))?;
    session.pointer_offset(dfn, offset.block, &ptr, &offset, true, node.span)
}

// --- varargs --------------------------------------------------------------

fn form_va_start(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    node: &Node,
    _get_address: bool,
    _core: bool,
    _wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    let args = expect_args(session, node, "va-start", 1, Some(1))?;
    let list_pr = session.evaluate(dfn, block, &args[0], false, None)?;
    let ir_fn = session.ir_fn_of(dfn);
    let mut builder = Builder::new(&mut session.ir, ir_fn, list_pr.block);
    builder.va_start(list_pr.value_or_unit());
    Ok(ParseResult::void(list_pr.block, session.common.void_))
}

fn form_va_end(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    node: &Node,
    _get_address: bool,
    _core: bool,
    _wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    let args = expect_args(session, node, "va-end", 1, Some(1))?;
    let list_pr = session.evaluate(dfn, block, &args[0], false, None)?;
    let ir_fn = session.ir_fn_of(dfn);
    let mut builder = Builder::new(&mut session.ir, ir_fn, list_pr.block);
    builder.va_end(list_pr.value_or_unit());
    Ok(ParseResult::void(list_pr.block, session.common.void_))
}

fn form_va_arg(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    node: &Node,
    _get_address: bool,
    _core: bool,
    _wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    let args = expect_args(session, node, "va-arg", 2, Some(2))?;
    let list_pr = session.evaluate(dfn, block, &args[0], false, None)?;
    let ty = session.parse_type(&args[1])?;
    let ir_fn = session.ir_fn_of(dfn);
    let mut builder = Builder::new(&mut session.ir, ir_fn, list_pr.block);
    let value = builder.va_arg(list_pr.value_or_unit(), ty);
    Ok(ParseResult::new(list_pr.block, ty, value))
}

// --- pointers and constants -----------------------------------------------

fn form_null(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    node: &Node,
    _get_address: bool,
    _core: bool,
    _wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    let args = expect_args(session, node, "null", 1, Some(1))?;
    let pr = session.evaluate(dfn, block, &args[0], false, None)?;
    if session.types.pointee(pr.ty).is_none() {
        return Err(session.report_detail(ErrorKind::IncorrectType, args[0].span, "null requires a pointer"));
    }
    let bool_ty = session.common.bool_;
    let ir_fn = session.ir_fn_of(dfn);
    let mut builder = Builder::new(&mut session.ir, ir_fn, pr.block);
    let value = builder.cmp(
        CmpPred::Eq,
        false,
        pr.value_or_unit(),
        Value::Const(ConstValue::NullPtr),
        bool_ty,
    );
    Ok(ParseResult::new(pr.block, bool_ty, value))
}

fn form_nullptr(
    session: &mut Session,
    _dfn: FnId,
    block: BlockId,
    node: &Node,
    _get_address: bool,
    _core: bool,
    _wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    let args = expect_args(session, node, "nullptr", 1, Some(1))?;
    let ty = session.parse_type(&args[0])?;
    let p_ty = session.types.pointer_to(ty);
    Ok(ParseResult::new(block, p_ty, Value::Const(ConstValue::NullPtr)))
}

fn form_get_dnodes(
    session: &mut Session,
    _dfn: FnId,
    block: BlockId,
    node: &Node,
    _get_address: bool,
    _core: bool,
    _wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    let args = expect_args(session, node, "get-dnodes", 1, Some(1))?;
    let global = static_dnode(session, &args[0], None);
    Ok(ParseResult::new(block, session.common.pdnode, Value::Global(global)))
}

/// Lowers quoted syntax into constant DNode globals, linked through their
/// `next-node` fields. Built bottom-up so sibling references already exist.
fn static_dnode(session: &mut Session, node: &Node, next: Option<GlobalId>) -> GlobalId {
    let (is_list, token_init, list_init) = match &node.kind {
        NodeKind::Token(token) => {
            let (text_global, _) = session.string_literal_global(&token.value_to_string());
            (0, GlobalInit::GlobalRef(text_global), GlobalInit::Zero)
        }
        NodeKind::List(children) => {
            let mut next_child: Option<GlobalId> = None;
            for child in children.iter().rev() {
                next_child = Some(static_dnode(session, child, next_child));
            }
            let list_init = match next_child {
                Some(first) => GlobalInit::GlobalRef(first),
                None => GlobalInit::Zero,
            };
            (1, GlobalInit::Zero, list_init)
        }
    };
    let int_const = |v: u32| GlobalInit::Scalar(ConstValue::Int { bits: 32, value: u128::from(v) });
    let fields = vec![
        GlobalInit::Scalar(ConstValue::Int { bits: 32, value: is_list }),
        token_init,
        list_init,
        next.map_or(GlobalInit::Zero, GlobalInit::GlobalRef),
        int_const(node.span.begin_line),
        int_const(node.span.begin_column),
        int_const(node.span.end_line),
        int_const(node.span.end_column),
        int_const(node.macro_span.begin_line),
        int_const(node.macro_span.begin_column),
        int_const(node.macro_span.end_line),
        int_const(node.macro_span.end_column),
    ];
    let name = session.fresh_global_name();
    let dnode_ty = session.common.dnode;
    session
        .ir
        .add_global(name, dnode_ty, Some(GlobalInit::Struct(fields)), true, IrLinkage::Private)
}

// --- sequencing and scoping -----------------------------------------------

/// Evaluates forms in order, destructing every intermediate result; the
/// last form's result is the sequence's result.
pub(crate) fn eval_sequence(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    forms: &[Node],
    wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    let mut current = block;
    let mut last: Option<ParseResult> = None;
    for (i, form) in forms.iter().enumerate() {
        let is_last = i + 1 == forms.len();
        let pr = session.evaluate(dfn, current, form, false, if is_last { wanted } else { None })?;
        current = pr.block;
        if is_last {
            last = Some(pr);
        } else {
            let done = session.destruct_if_applicable(dfn, &pr, false)?;
            current = done.block;
        }
    }
    Ok(last.unwrap_or_else(|| ParseResult::filler(current, session.common.int_)))
}

fn form_do(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    node: &Node,
    _get_address: bool,
    _core: bool,
    wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    let list = node.as_list().expect("form node is a list");
    eval_sequence(session, dfn, block, &list[1..], wanted)
}

fn form_new_scope(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    node: &Node,
    _get_address: bool,
    _core: bool,
    wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    let list = node.as_list().expect("form node is a list");
    session.ctx.activate_anonymous_namespace(&mut session.tree);
    let result = eval_sequence(session, dfn, block, &list[1..], wanted);
    let result = match result {
        Ok(pr) => {
            let end = session.scope_close(dfn, pr.block, None)?;
            let mut pr = pr;
            pr.block = end;
            Ok(pr)
        }
        Err(Failed) => Err(Failed),
    };
    session.ctx.deactivate_namespace();
    result
}

fn form_using_namespace(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    node: &Node,
    _get_address: bool,
    _core: bool,
    wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    let args = expect_args(session, node, "using-namespace", 1, None)?;
    let Some(name) = args[0].as_symbol() else {
        return Err(session.report(ErrorKind::FirstListElementMustBeSymbol, args[0].span));
    };
    if session.ctx.use_namespace(&session.tree, name).is_none() {
        return Err(session.report_detail(ErrorKind::NotInScope, args[0].span, name.to_owned()));
    }
    let result = eval_sequence(session, dfn, block, &args[1..], wanted);
    session.ctx.unuse_namespace();
    result
}

// --- type-level forms -----------------------------------------------------

fn form_cast(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    node: &Node,
    _get_address: bool,
    _core: bool,
    _wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    let args = expect_args(session, node, "cast", 2, Some(2))?;
    let pr = session.evaluate(dfn, block, &args[0], false, None)?;
    let target = session.parse_type(&args[1])?;
    session.do_cast(dfn, pr.block, pr.value_or_unit(), pr.ty, target, node.span)
}

fn size_like_result(session: &Session, block: BlockId, value: u64) -> ParseResult {
    ParseResult::new(
        block,
        session.common.size,
        Value::Const(ConstValue::Int {
            bits: 64,
            value: u128::from(value),
        }),
    )
}

fn form_sizeof(
    session: &mut Session,
    _dfn: FnId,
    block: BlockId,
    node: &Node,
    _get_address: bool,
    _core: bool,
    _wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    let args = expect_args(session, node, "sizeof", 1, Some(1))?;
    let ty = session.parse_type(&args[0])?;
    let Some(size) = session.type_size(ty) else {
        return Err(session.report_detail(ErrorKind::IncorrectType, args[0].span, "type has no size"));
    };
    Ok(size_like_result(session, block, size))
}

fn form_offsetof(
    session: &mut Session,
    _dfn: FnId,
    block: BlockId,
    node: &Node,
    _get_address: bool,
    _core: bool,
    _wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    let args = expect_args(session, node, "offsetof", 2, Some(2))?;
    let ty = session.parse_type(&args[0])?;
    let Some(member_name) = args[1].as_symbol() else {
        return Err(session.report(ErrorKind::FirstListElementMustBeSymbol, args[1].span));
    };
    let Some(struct_id) = session.struct_of_type(ty) else {
        return Err(session.report_detail(ErrorKind::IncorrectType, args[0].span, "offsetof requires a struct"));
    };
    let def = session.els.struct_def(struct_id);
    let Some(member_idx) = def.member_index(member_name) else {
        return Err(session.report_detail(ErrorKind::FieldDoesNotExistInStruct, args[1].span, member_name.to_owned()));
    };
    let members: Vec<TypeId> = def.members.values().copied().collect();
    let view = crate::run::StructView {
        tree: &session.tree,
        els: &session.els,
    };
    let Some(layout) = session.layout.struct_layout(&session.types, &view, &members) else {
        return Err(session.report_detail(ErrorKind::IncorrectType, args[0].span, "type has no layout"));
    };
    let offset = layout.offsets[usize::try_from(member_idx).expect("index fits")];
    Ok(size_like_result(session, block, offset))
}

fn form_alignmentof(
    session: &mut Session,
    _dfn: FnId,
    block: BlockId,
    node: &Node,
    _get_address: bool,
    _core: bool,
    _wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    let args = expect_args(session, node, "alignmentof", 1, Some(1))?;
    let ty = session.parse_type(&args[0])?;
    let Some(align) = session.type_align(ty) else {
        return Err(session.report_detail(ErrorKind::IncorrectType, args[0].span, "type has no alignment"));
    };
    Ok(size_like_result(session, block, align))
}

fn form_funcall(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    node: &Node,
    _get_address: bool,
    _core: bool,
    _wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    let list = node.as_list().expect("form node is a list");
    if list.len() < 2 {
        return Err(session.report_detail(ErrorKind::IncorrectMinimumNumberOfArgs, node.span, "funcall"));
    }
    let fn_ptr = session.evaluate(dfn, block, &list[1], false, None)?;
    let block = fn_ptr.block;
    session.eval_funcall_ptr(dfn, block, fn_ptr, list, 2, Vec::new())
}

fn form_array_of(
    session: &mut Session,
    dfn: FnId,
    block: BlockId,
    node: &Node,
    get_address: bool,
    _core: bool,
    _wanted: Option<TypeId>,
) -> CResult<ParseResult> {
    let args = expect_args(session, node, "array-of", 3, Some(3))?;
    let Some(len_token) = args[0].as_token().filter(|t| t.kind == TokenKind::Int) else {
        return Err(session.report(ErrorKind::UnexpectedElement, args[0].span));
    };
    let length: u64 = len_token
        .text
        .parse()
        .map_err(|_| session.report_detail(ErrorKind::InvalidInteger, args[0].span, len_token.text.clone()))?;
    let element_ty = session.parse_type(&args[1])?;
    let array_ty = session.types.array_of(element_ty, length);
    let Some(elements) = args[2].as_list().filter(|l| l.first().is_some_and(|h| h.is_symbol("array"))) else {
        return Err(session.report_detail(ErrorKind::UnexpectedElement, args[2].span, "expected (array ...)"));
    };
    session.eval_array_literal(dfn, block, &elements[1..], array_ty, get_address, node.span)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sugar_rewrites_compose() {
        let mut session = Session::new();
        let mut reporter = crate::error::Reporter::new("test.ka");
        let node = crate::reader::read_one("(@:@ s field)", &mut reporter).unwrap();
        let rewritten = expand_core_sugar(&mut session, &node, "@:@").unwrap().unwrap();
        assert_eq!(rewritten.to_string(), "(@ (: (@ s) field))");
        let node = crate::reader::read_one("(setv x 1)", &mut reporter).unwrap();
        let rewritten = expand_core_sugar(&mut session, &node, "setv").unwrap().unwrap();
        assert_eq!(rewritten.to_string(), "(setf (# x) 1)");
    }
}
