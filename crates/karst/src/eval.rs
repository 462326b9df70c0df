//! The form evaluator.
//!
//! [`Session::evaluate`] maps a node, an expected type, and a
//! wanted-address flag to a [`ParseResult`]: the block evaluation ended in,
//! the resulting type, and the SSA value. Dispatch order for lists follows
//! the language definition: anonymous `fn`, enum literals, struct literals,
//! array literals under an array wanted-type, user functions and macros,
//! core forms, core sugar macros, then the funcall / function-object
//! fallbacks.
//!
//! Function-call resolution evaluates arguments speculatively; when the
//! winner turns out to be a macro, every side effect of argument evaluation
//! (IR, bindings, deferred gotos, diagnostics) is rolled back before the
//! macro engine takes over.

use crate::{
    context::SavePoint,
    element::{FnId, Linkage},
    error::{CResult, ErrorKind, Failed},
    ir::{ArithOp, BlockId, Builder, Callee, CastKind, ConstValue, FloatKind, IrFnId, RollbackMark, Value},
    node::{Node, NodeKind, Span, TokenKind},
    run::{Session, const_int_from_text},
    types::{BaseType, TypeId},
};

/// Evaluation output: target block, resulting type, SSA value, the
/// in-place return-value pair, and copy/destroy policy flags.
#[derive(Debug, Clone)]
pub struct ParseResult {
    pub block: BlockId,
    pub ty: TypeId,
    /// Absent for void results.
    pub value: Option<Value>,
    pub retval: Option<Value>,
    pub retval_type: Option<TypeId>,
    pub retval_used: bool,
    pub do_not_destruct: bool,
    pub do_not_copy_with_setf: bool,
    pub freshly_copied: bool,
}

impl ParseResult {
    pub fn new(block: BlockId, ty: TypeId, value: Value) -> Self {
        Self {
            block,
            ty,
            value: Some(value),
            retval: None,
            retval_type: None,
            retval_used: false,
            do_not_destruct: false,
            do_not_copy_with_setf: false,
            freshly_copied: false,
        }
    }

    pub fn void(block: BlockId, void_ty: TypeId) -> Self {
        Self {
            block,
            ty: void_ty,
            value: None,
            retval: None,
            retval_type: None,
            retval_used: false,
            do_not_destruct: true,
            do_not_copy_with_setf: true,
            freshly_copied: false,
        }
    }

    /// The conventional filler result for statement-like forms: native int
    /// zero, excluded from destruction and copying.
    pub fn filler(block: BlockId, int_ty: TypeId) -> Self {
        let mut pr = Self::new(block, int_ty, Value::Const(ConstValue::Int { bits: 32, value: 0 }));
        pr.do_not_destruct = true;
        pr.do_not_copy_with_setf = true;
        pr
    }

    pub fn value_or_unit(&self) -> Value {
        self.value.unwrap_or(Value::Const(ConstValue::Int { bits: 32, value: 0 }))
    }
}

/// Outcome of function-call resolution.
pub(crate) enum CallOutcome {
    Done(ParseResult),
    /// The resolved callee is a macro; all speculative state has been
    /// rolled back and the caller should re-enter through the macro engine.
    ExpandMacro(FnId),
}

impl Session {
    pub(crate) fn ir_fn_of(&self, dfn: FnId) -> IrFnId {
        self.els
            .function(dfn)
            .ir
            .expect("function being compiled has no IR body")
    }

    /// Evaluates a node to a typed value, then applies the copy-with-setf
    /// post-processing step (skipped inside setf functions to avoid
    /// non-terminating recursion).
    pub fn evaluate(
        &mut self,
        dfn: FnId,
        block: BlockId,
        node: &Node,
        get_address: bool,
        wanted: Option<TypeId>,
    ) -> CResult<ParseResult> {
        let pr = self.eval_inner(dfn, block, node, get_address, wanted)?;
        if self.els.function(dfn).is_setf_fn {
            return Ok(pr);
        }
        self.copy_with_setf_if_applicable(dfn, pr)
    }

    fn eval_inner(
        &mut self,
        dfn: FnId,
        block: BlockId,
        node: &Node,
        get_address: bool,
        wanted: Option<TypeId>,
    ) -> CResult<ParseResult> {
        match &node.kind {
            NodeKind::Token(_) => self.eval_token(dfn, block, node, get_address, wanted),
            NodeKind::List(_) => self.eval_list(dfn, block, node, get_address, wanted),
        }
    }

    // --- tokens -----------------------------------------------------------

    fn eval_token(
        &mut self,
        dfn: FnId,
        block: BlockId,
        node: &Node,
        get_address: bool,
        wanted: Option<TypeId>,
    ) -> CResult<ParseResult> {
        let token = node.as_token().expect("token node");

        // A wanted enum type turns a bare symbol into an enum literal; when
        // the symbol is not a member, fall through to variable lookup.
        if let Some(wanted_ty) = wanted {
            if let Some((name, _)) = self.types.struct_name(wanted_ty) {
                let name = name.to_owned();
                if let Some(enum_id) = self.ctx.get_enum(&self.tree, &name) {
                    let errors = self.reporter.error_count();
                    match self.eval_enum_literal(dfn, block, node, enum_id, wanted_ty, get_address) {
                        Ok(pr) => return Ok(pr),
                        Err(Failed) => self.reporter.truncate(errors),
                    }
                }
            }
        }

        match token.kind {
            TokenKind::Int => {
                let target = wanted.filter(|&w| self.types.is_integer(w));
                let (ty, bits) = match target {
                    Some(w) => {
                        let marker = self.types.base_type(w).expect("integer type has base").integer_size();
                        (w, self.layout.real_int_bits(marker))
                    }
                    None => (self.common.int_, self.layout.native_int_bits),
                };
                match const_int_from_text(&token.text, bits) {
                    Some(value) => Ok(ParseResult::new(block, ty, Value::Const(value))),
                    None => Err(self.report_detail(ErrorKind::InvalidInteger, node.span, token.text.clone())),
                }
            }
            TokenKind::Float => {
                let (ty, kind) = match wanted.and_then(|w| self.types.base_type(w)) {
                    Some(BaseType::Double) => (self.common.double_, FloatKind::Double),
                    Some(BaseType::LongDouble) => (self.common.long_double, FloatKind::LongDouble),
                    _ => (self.common.float_, FloatKind::Float),
                };
                let value: f64 = token
                    .text
                    .parse()
                    .map_err(|_| self.report_detail(ErrorKind::InvalidFloat, node.span, token.text.clone()))?;
                Ok(ParseResult::new(block, ty, Value::Const(ConstValue::Float { kind, value })))
            }
            TokenKind::StringLit => {
                let (global, _array_ty) = self.string_literal_global(&token.text);
                let pchar = self.common.pchar;
                let ir_fn = self.ir_fn_of(dfn);
                let mut builder = Builder::new(&mut self.ir, ir_fn, block);
                let ptr = builder.gep_member(Value::Global(global), 0, pchar);
                Ok(ParseResult::new(block, pchar, ptr))
            }
            TokenKind::Symbol => self.eval_symbol(dfn, block, node, get_address),
        }
    }

    fn eval_symbol(&mut self, dfn: FnId, block: BlockId, node: &Node, get_address: bool) -> CResult<ParseResult> {
        let text = node.as_symbol().expect("symbol token");

        if text == "true" || text == "false" {
            return Ok(ParseResult::new(
                block,
                self.common.bool_,
                Value::Const(ConstValue::bool(text == "true")),
            ));
        }

        // Character constants: `#\NAME` or `#\c`.
        if let Some(rest) = text.strip_prefix("#\\") {
            let c = match rest {
                "NULL" => 0u8,
                "TAB" => b'\t',
                "SPACE" => b' ',
                "NEWLINE" => b'\n',
                "CARRIAGE" => b'\r',
                "EOF" => 0xFF,
                single if single.len() == 1 => single.as_bytes()[0],
                other => {
                    return Err(self.report_detail(ErrorKind::InvalidChar, node.span, other.to_owned()));
                }
            };
            return Ok(ParseResult::new(
                block,
                self.common.char_,
                Value::Const(ConstValue::Int {
                    bits: 8,
                    value: u128::from(c),
                }),
            ));
        }

        let Some(var_id) = self.ctx.get_variable(&self.tree, text) else {
            return Err(self.report_detail(ErrorKind::VariableNotInScope, node.span, text.to_owned()));
        };
        let var = self.els.var(var_id);
        let var_ty = var.ty;
        let Some(storage) = var.value else {
            return Err(self.report_detail(ErrorKind::VariableNotInScope, node.span, text.to_owned()));
        };

        if get_address {
            let ptr_ty = self.types.pointer_to(var_ty);
            return Ok(ParseResult::new(block, ptr_ty, storage));
        }
        if let Some((element, _len)) = self.types.array_element(var_ty) {
            // Array-typed variables always decay to a pointer to the first
            // element in value position.
            let elem_ptr_ty = self.types.pointer_to(element);
            let ir_fn = self.ir_fn_of(dfn);
            let mut builder = Builder::new(&mut self.ir, ir_fn, block);
            let ptr = builder.gep_member(storage, 0, elem_ptr_ty);
            return Ok(ParseResult::new(block, elem_ptr_ty, ptr));
        }
        let ir_fn = self.ir_fn_of(dfn);
        let mut builder = Builder::new(&mut self.ir, ir_fn, block);
        let loaded = builder.load(storage, var_ty);
        Ok(ParseResult::new(block, var_ty, loaded))
    }

    // --- lists ------------------------------------------------------------

    fn eval_list(
        &mut self,
        dfn: FnId,
        block: BlockId,
        node: &Node,
        get_address: bool,
        wanted: Option<TypeId>,
    ) -> CResult<ParseResult> {
        let list = node.as_list().expect("list node");
        if list.is_empty() {
            return Err(self.report(ErrorKind::NoEmptyLists, node.span));
        }

        let mut head = list[0].clone();
        if !head.is_token() {
            head = self.expand_optional_macro_call(head)?;
        }

        // Anonymous functions yield a pointer to a freshly compiled fn.
        if head.is_symbol("fn") {
            return self.eval_anonymous_fn(block, node);
        }

        // A wanted struct type with a list head means a struct literal body.
        if let Some(wanted_ty) = wanted {
            if !head.is_token() && self.types.struct_name(wanted_ty).is_some() {
                if let Some(struct_id) = self.struct_of_type(wanted_ty) {
                    return self.eval_struct_literal(dfn, block, list, struct_id, wanted_ty, get_address, node.span);
                }
            }
        }

        let Some(head_name) = head.as_symbol().map(str::to_owned) else {
            return Err(self.report(ErrorKind::FirstListElementMustBeAtom, node.span));
        };

        // Enum literal: `(Name member)`.
        if list.len() == 2 {
            if let Some(enum_id) = self.ctx.get_enum(&self.tree, &head_name) {
                let enum_ty = self.enum_struct_type(&head_name);
                let errors = self.reporter.error_count();
                match self.eval_enum_literal(dfn, block, &list[1], enum_id, enum_ty, get_address) {
                    Ok(pr) => return Ok(pr),
                    Err(Failed) => self.reporter.truncate(errors),
                }
            }
        }

        // Struct literal: `(Name (fields...))` or `(Name (f v) (f v)...)`.
        if list.len() >= 2 && self.ctx.get_struct(&self.tree, &head_name).is_some() {
            let (ns, struct_id) = self.ctx.get_struct(&self.tree, &head_name).expect("just checked");
            let path = self.tree.path_of(ns);
            let struct_ty = self.types.struct_ref(head_name.clone(), path);
            let errors = self.reporter.error_count();
            let body: &[Node] = if list.len() == 2 {
                match list[1].as_list() {
                    Some(pairs) => pairs,
                    None => &list[1..],
                }
            } else {
                &list[1..]
            };
            match self.eval_struct_pairs(dfn, block, body, struct_id, struct_ty, get_address, node.span) {
                Ok(pr) => return Ok(pr),
                Err(Failed) => self.reporter.truncate(errors),
            }
        }

        // Array literal under an array wanted-type.
        if let Some(wanted_ty) = wanted {
            if self.types.array_element(wanted_ty).is_some() && head_name == "array" {
                return self.eval_array_literal(dfn, block, &list[1..], wanted_ty, get_address, node.span);
            }
        }

        // `core` prefix: skip user-macro and function dispatch entirely.
        let prefixed_with_core = head_name == "core";
        let mut backup_error = None;
        let core_list_holder;
        let (core_list, core_name, core_node) = if prefixed_with_core {
            if list.len() < 2 {
                return Err(self.report(ErrorKind::NoEmptyLists, node.span));
            }
            let mut inner_head = list[1].clone();
            if !inner_head.is_token() {
                inner_head = self.expand_optional_macro_call(inner_head)?;
            }
            let Some(name) = inner_head.as_symbol().map(str::to_owned) else {
                return Err(self.report(ErrorKind::FirstListElementMustBeSymbol, node.span));
            };
            core_list_holder = Node::list(list[1..].to_vec(), node.span);
            (
                core_list_holder.as_list().expect("freshly built list"),
                name,
                &core_list_holder,
            )
        } else {
            // A function or macro with this name takes priority over core
            // forms. Exactly one retryable overload failure falls through
            // to core dispatch, carrying the diagnostic in case nothing
            // else matches either.
            let fn_exists = self
                .ctx
                .get_function(&self.tree, &self.els, &self.types, &head_name, None, false, None)
                .found
                .is_some();
            let mac_exists = self
                .ctx
                .get_function(&self.tree, &self.els, &self.types, &head_name, None, true, None)
                .found
                .is_some();
            if fn_exists || mac_exists {
                let errors = self.reporter.error_count();
                match self.eval_call(dfn, block, node, &head_name, get_address) {
                    Ok(CallOutcome::Done(pr)) => return Ok(pr),
                    Ok(CallOutcome::ExpandMacro(mac)) => {
                        let Some(expansion) = self.expand_macro_call(node, &head_name, mac)? else {
                            return Err(Failed);
                        };
                        return self.evaluate(dfn, block, &expansion, get_address, wanted);
                    }
                    Err(Failed) => {
                        if !self.reporter.only_overload_failure_since(errors) {
                            return Err(Failed);
                        }
                        backup_error = self.reporter.pop_last();
                    }
                }
            }
            (list, head_name.clone(), node)
        };

        self.eval_core_dispatch(
            dfn,
            block,
            core_node,
            core_list,
            &core_name,
            get_address,
            prefixed_with_core,
            wanted,
            backup_error,
        )
    }

    /// Core form and sugar dispatch plus the function-pointer and
    /// function-object fallbacks.
    #[expect(clippy::too_many_arguments, reason = "dispatch carries the full evaluation state")]
    fn eval_core_dispatch(
        &mut self,
        dfn: FnId,
        block: BlockId,
        node: &Node,
        list: &[Node],
        name: &str,
        get_address: bool,
        prefixed_with_core: bool,
        wanted: Option<TypeId>,
        backup_error: Option<crate::error::Diagnostic>,
    ) -> CResult<ParseResult> {
        if let Some(handler) = crate::forms::core_form_handler(name) {
            return handler(self, dfn, block, node, get_address, prefixed_with_core, wanted);
        }
        if let Some(rewritten) = crate::forms::expand_core_sugar(self, node, name)? {
            return self.evaluate(dfn, block, &rewritten, get_address, wanted);
        }

        // `destroy` with no matching overload is a no-op, so generic code
        // need not probe for destructors.
        if name == "destroy" {
            return Ok(ParseResult::void(block, self.common.void_));
        }

        // An overload failure was deferred in the hope of a core form; no
        // core form matched, so the original diagnostic stands.
        if let Some(diagnostic) = backup_error {
            self.reporter.report(diagnostic);
            return Err(Failed);
        }

        // Evaluate the head; a pointer-to-function rewrites to funcall, a
        // pointer-to-struct with an `apply` member is a function object.
        let errors = self.reporter.error_count();
        let head_pr = match self.evaluate(dfn, block, &list[0], get_address, wanted) {
            Ok(pr) => pr,
            Err(Failed) => {
                if self.reporter.error_count() == errors + 1 {
                    if let Some(mut diag) = self.reporter.pop_last() {
                        if diag.kind == ErrorKind::VariableNotInScope {
                            diag.kind = ErrorKind::NotInScope;
                        }
                        self.reporter.report(diag);
                    }
                }
                return Err(Failed);
            }
        };
        let block = head_pr.block;
        if self
            .types
            .pointee(head_pr.ty)
            .is_some_and(|p| self.types.function_parts(p).is_some())
        {
            return self.eval_funcall_ptr(dfn, block, head_pr, list, 1, Vec::new());
        }

        let addr_pr = self.evaluate(dfn, block, &list[0], true, wanted)?;
        let block = addr_pr.block;
        if let Some(inner) = self.types.pointee(addr_pr.ty) {
            if let Some((struct_name, _)) = self.types.struct_name(inner) {
                let struct_name = struct_name.to_owned();
                if let Some((_, struct_id)) = self.ctx.get_struct(&self.tree, &struct_name) {
                    let def = self.els.struct_def(struct_id);
                    if let (Some(apply_ty), Some(apply_idx)) = (def.member_type("apply"), def.member_index("apply")) {
                        let Some(apply_fn_ty) = self.types.pointee(apply_ty) else {
                            return Err(self.report(ErrorKind::ApplyMustTakePointerToStructAsFirstArgument, node.span));
                        };
                        let Some((_, params)) = self.types.function_parts(apply_fn_ty) else {
                            return Err(self.report(ErrorKind::ApplyMustTakePointerToStructAsFirstArgument, node.span));
                        };
                        let first = params.first().copied();
                        if first != Some(addr_pr.ty) {
                            return Err(self.report(ErrorKind::ApplyMustTakePointerToStructAsFirstArgument, node.span));
                        }
                        let p_apply = self.types.pointer_to(apply_ty);
                        let ir_fn = self.ir_fn_of(dfn);
                        let mut builder = Builder::new(&mut self.ir, ir_fn, block);
                        let slot = builder.gep_member(addr_pr.value_or_unit(), apply_idx, p_apply);
                        let fn_ptr = builder.load(slot, apply_ty);
                        let fn_pr = ParseResult::new(block, apply_ty, fn_ptr);
                        let extra = vec![addr_pr.value_or_unit()];
                        return self.eval_funcall_ptr(dfn, block, fn_pr, list, 1, extra);
                    }
                }
            }
        }

        Err(self.report_detail(ErrorKind::NotInScope, node.span, name.to_owned()))
    }

    // --- literals ---------------------------------------------------------

    pub(crate) fn enum_struct_type(&mut self, name: &str) -> TypeId {
        let path = self
            .ctx
            .get_struct(&self.tree, name)
            .map(|(ns, _)| self.tree.path_of(ns))
            .unwrap_or_default();
        self.types.struct_ref(name.to_owned(), path)
    }

    fn eval_enum_literal(
        &mut self,
        dfn: FnId,
        block: BlockId,
        member_node: &Node,
        enum_id: crate::element::EnumId,
        enum_ty: TypeId,
        get_address: bool,
    ) -> CResult<ParseResult> {
        let Some(member) = member_node.as_symbol() else {
            return Err(self.report_detail(ErrorKind::UnexpectedElement, member_node.span, "enum literal"));
        };
        let def = self.els.enum_def(enum_id);
        let underlying = def.underlying;
        let Some(value) = def.value_of(member) else {
            return Err(self.report_detail(ErrorKind::FieldDoesNotExistInStruct, member_node.span, member.to_owned()));
        };
        let marker = self
            .types
            .base_type(underlying)
            .expect("enum underlying type is integral")
            .integer_size();
        let bits = self.layout.real_int_bits(marker);
        #[expect(clippy::cast_sign_loss, reason = "two's-complement bit pattern is intended")]
        let raw = (i128::from(value)) as u128;
        let constant = ConstValue::Int {
            bits,
            value: if bits >= 128 { raw } else { raw & ((1u128 << bits) - 1) },
        };

        let ptr_ty = self.types.pointer_to(enum_ty);
        let p_underlying = self.types.pointer_to(underlying);
        let ir_fn = self.ir_fn_of(dfn);
        let mut builder = Builder::new(&mut self.ir, ir_fn, block);
        let slot = builder.alloca(enum_ty, ptr_ty);
        let field = builder.gep_member(slot, 0, p_underlying);
        builder.store(Value::Const(constant), field);
        if get_address {
            Ok(ParseResult::new(block, ptr_ty, slot))
        } else {
            let loaded = builder.load(slot, enum_ty);
            Ok(ParseResult::new(block, enum_ty, loaded))
        }
    }

    fn eval_struct_literal(
        &mut self,
        dfn: FnId,
        block: BlockId,
        pairs: &[Node],
        struct_id: crate::element::StructId,
        struct_ty: TypeId,
        get_address: bool,
        span: Span,
    ) -> CResult<ParseResult> {
        self.eval_struct_pairs(dfn, block, pairs, struct_id, struct_ty, get_address, span)
    }

    /// Builds a struct literal from `(name value)` pairs. Fields initialize
    /// by name, independent of source order; a repeated field silently
    /// overwrites the earlier store.
    #[expect(clippy::too_many_arguments, reason = "literal construction carries the full evaluation state")]
    fn eval_struct_pairs(
        &mut self,
        dfn: FnId,
        block: BlockId,
        pairs: &[Node],
        struct_id: crate::element::StructId,
        struct_ty: TypeId,
        get_address: bool,
        span: Span,
    ) -> CResult<ParseResult> {
        let ptr_ty = self.types.pointer_to(struct_ty);
        let ir_fn = self.ir_fn_of(dfn);
        let mut builder = Builder::new(&mut self.ir, ir_fn, block);
        let slot = builder.alloca(struct_ty, ptr_ty);
        let mut current = block;
        for pair in pairs {
            let Some([name_node, value_node]) = pair.as_list() else {
                return Err(self.report_detail(ErrorKind::UnexpectedElement, pair.span, "struct literal member"));
            };
            let Some(member_name) = name_node.as_symbol() else {
                return Err(self.report_detail(ErrorKind::UnexpectedElement, name_node.span, "struct literal member"));
            };
            let member = {
                let def = self.els.struct_def(struct_id);
                def.member_type(member_name).zip(def.member_index(member_name))
            };
            let Some((member_ty, member_idx)) = member else {
                return Err(self.report_detail(
                    ErrorKind::FieldDoesNotExistInStruct,
                    name_node.span,
                    member_name.to_owned(),
                ));
            };
            let value_pr = self.evaluate(dfn, current, value_node, false, Some(member_ty))?;
            current = value_pr.block;
            if !self.types.equal_relaxed(value_pr.ty, member_ty, true) {
                let expected = self.types.display(member_ty);
                let got = self.types.display(value_pr.ty);
                return Err(self.report_detail(
                    ErrorKind::IncorrectType,
                    value_node.span,
                    format!("expected {expected}, got {got}"),
                ));
            }
            let p_member = self.types.pointer_to(member_ty);
            let ir_fn = self.ir_fn_of(dfn);
            let mut builder = Builder::new(&mut self.ir, ir_fn, current);
            let field = builder.gep_member(slot, member_idx, p_member);
            builder.store(value_pr.value_or_unit(), field);
        }
        let _ = span;
        if get_address {
            Ok(ParseResult::new(current, ptr_ty, slot))
        } else {
            let ir_fn = self.ir_fn_of(dfn);
            let mut builder = Builder::new(&mut self.ir, ir_fn, current);
            let loaded = builder.load(slot, struct_ty);
            Ok(ParseResult::new(current, struct_ty, loaded))
        }
    }

    /// Array literal under a wanted array type. A declared length of zero
    /// takes its length from the element count.
    pub(crate) fn eval_array_literal(
        &mut self,
        dfn: FnId,
        block: BlockId,
        elements: &[Node],
        wanted: TypeId,
        get_address: bool,
        span: Span,
    ) -> CResult<ParseResult> {
        let (element_ty, declared_len) = self.types.array_element(wanted).expect("array wanted type");
        let len = if declared_len == 0 {
            elements.len() as u64
        } else {
            declared_len
        };
        if declared_len != 0 && elements.len() as u64 != declared_len {
            return Err(self.report_detail(
                ErrorKind::IncorrectNumberOfArgs,
                span,
                format!("array literal has {} elements, type wants {declared_len}", elements.len()),
            ));
        }
        let array_ty = self.types.array_of(element_ty, len);
        let ptr_ty = self.types.pointer_to(array_ty);
        let p_elem = self.types.pointer_to(element_ty);
        let ir_fn = self.ir_fn_of(dfn);
        let mut builder = Builder::new(&mut self.ir, ir_fn, block);
        let slot = builder.alloca(array_ty, ptr_ty);
        let mut current = block;
        for (i, element) in elements.iter().enumerate() {
            let pr = self.evaluate(dfn, current, element, false, Some(element_ty))?;
            current = pr.block;
            let ir_fn = self.ir_fn_of(dfn);
            let mut builder = Builder::new(&mut self.ir, ir_fn, current);
            let field = builder.gep_member(slot, i as u64, p_elem);
            builder.store(pr.value_or_unit(), field);
        }
        let ir_fn = self.ir_fn_of(dfn);
        let mut builder = Builder::new(&mut self.ir, ir_fn, current);
        if get_address {
            Ok(ParseResult::new(current, ptr_ty, slot))
        } else {
            let loaded = builder.load(slot, array_ty);
            Ok(ParseResult::new(current, array_ty, loaded))
        }
    }

    // --- anonymous functions ----------------------------------------------

    /// Compiles `(fn RET PARAMS BODY...)` as a fresh intern function in the
    /// pre-function scope chain and yields a pointer to it.
    fn eval_anonymous_fn(&mut self, block: BlockId, node: &Node) -> CResult<ParseResult> {
        let preindex = self.tree.get(self.ctx.current()).lv_index;
        let stacks = self.ctx.save_and_pop_until(crate::namespace::ROOT_NS);

        self.anon_fn_count += 1;
        let name = format!("_anon_{}", self.anon_fn_count);
        let errors = self.reporter.error_count();
        let result = self.parse_function_definition(&name, node, Some(Linkage::Intern));
        let failed = self.reporter.error_count() != errors;
        self.ctx.restore_stacks(stacks);
        let anon_fn = result?;
        if failed {
            return Err(Failed);
        }

        let function = self.els.function(anon_fn);
        let ret = function.return_type;
        let param_types: Vec<TypeId> = function.params.iter().map(|&p| self.els.var(p).ty).collect();
        let ir_fn = function.ir.expect("anonymous function was compiled");
        let fn_ty = self.types.function(ret, param_types);
        let p_fn = self.types.pointer_to(fn_ty);

        // Variables declared since the pre-function index belong to the
        // closure body; zero their indexes so the enclosing scope's
        // lifetime pass does not destruct across the boundary.
        let mut captured = Vec::new();
        self.tree
            .get_vars_after_index(&self.els, self.ctx.current(), preindex, &mut captured);
        for var in captured {
            self.els.var_mut(var).index = 0;
        }

        Ok(ParseResult::new(block, p_fn, Value::FuncAddr(ir_fn)))
    }

    // --- function calls ---------------------------------------------------

    /// Resolves and emits a call of `name` with speculatively evaluated
    /// arguments, or hands back a macro to expand after rolling back.
    pub(crate) fn eval_call(
        &mut self,
        dfn: FnId,
        block: BlockId,
        node: &Node,
        name: &str,
        get_address: bool,
    ) -> CResult<CallOutcome> {
        if get_address {
            return Err(self.report(ErrorKind::CannotTakeAddressOfNonLvalue, node.span));
        }
        let list = node.as_list().expect("call node is a list");

        // Short-circuit: a non-overloaded macro whose first real parameter
        // is (p DNode) matches on arity alone, before any argument
        // evaluation can go wrong.
        if !self.ctx.is_overloaded(&self.tree, name) {
            if let Some(first) = self.ctx.first_function(&self.tree, name) {
                let function = self.els.function(first);
                if function.is_macro {
                    let params = &function.params;
                    let first_real = params.get(1).map(|&p| self.els.var(p).ty);
                    let arity_ok = {
                        let param_tys: Vec<TypeId> = params.iter().map(|&p| self.els.var(p).ty).collect();
                        let required = self.types.required_args(&param_tys);
                        let given = list.len() - 1;
                        if self.types.params_are_varargs(&param_tys) {
                            required.saturating_sub(1) <= given
                        } else {
                            required.saturating_sub(1) == given
                        }
                    };
                    if arity_ok && (first_real.is_none() || first_real == Some(self.common.pdnode)) {
                        return Ok(CallOutcome::ExpandMacro(first));
                    }
                }
            }
        }

        // Snapshot everything argument evaluation can touch.
        let ir_fn = self.ir_fn_of(dfn);
        let ir_mark: RollbackMark = self.ir.function(ir_fn).mark(block);
        let goto_count = self.els.function(dfn).deferred_gotos.len();
        let labels_snapshot = self.els.function(dfn).labels.clone();
        let save_point = SavePoint::capture(&self.ctx, &self.tree, &self.els);
        let mut stashed = Vec::new();

        let mut current = block;
        let mut arg_values: Vec<Option<Value>> = Vec::new();
        let mut arg_types: Vec<TypeId> = Vec::new();
        for arg_node in &list[1..] {
            let errors = self.reporter.error_count();
            let outcome = self.evaluate(dfn, current, arg_node, false, None);
            let fresh_errors = self.reporter.error_count() != errors;
            match outcome {
                Ok(pr) if !fresh_errors => {
                    current = pr.block;
                    if let Some((element, _)) = self.types.array_element(pr.ty) {
                        // Arrays decay: spill and pass a pointer to the
                        // first element.
                        let p_elem = self.types.pointer_to(element);
                        let p_arr = self.types.pointer_to(pr.ty);
                        let ir_fn = self.ir_fn_of(dfn);
                        let mut builder = Builder::new(&mut self.ir, ir_fn, current);
                        let spill = builder.alloca(pr.ty, p_arr);
                        builder.store(pr.value_or_unit(), spill);
                        let decayed = builder.gep_member(spill, 0, p_elem);
                        arg_values.push(Some(decayed));
                        arg_types.push(p_elem);
                    } else {
                        arg_values.push(pr.value);
                        arg_types.push(pr.ty);
                    }
                }
                _ => {
                    // Unparseable argument: classify as (p DNode) so a
                    // macro candidate is still considered.
                    stashed.extend(self.reporter.take_from(errors));
                    arg_values.push(None);
                    arg_types.push(self.common.pdnode);
                }
            }
        }

        let resolution = self.ctx.get_function(
            &self.tree,
            &self.els,
            &self.types,
            name,
            Some(&arg_types),
            false,
            Some(self.common.pdnode),
        );

        if let Some(found) = resolution.found {
            if self.els.function(found).is_macro {
                // Roll back everything the argument probe emitted.
                self.ir.function_mut(ir_fn).rollback(&ir_mark);
                let function = self.els.function_mut(dfn);
                function.deferred_gotos.truncate(goto_count);
                function.labels = labels_snapshot;
                save_point.restore(&mut self.ctx, &mut self.tree, &mut self.els);
                return Ok(CallOutcome::ExpandMacro(found));
            }
        }

        if let Some(found) = resolution.found {
            if !stashed.is_empty() {
                // A plain function resolved against an argument that never
                // parsed; restore the real errors.
                self.reporter.extend(stashed);
                return Err(Failed);
            }
            let pr = self.emit_call(dfn, current, found, arg_values, arg_types, node.span)?;
            return Ok(CallOutcome::Done(pr));
        }

        if !stashed.is_empty() {
            self.reporter.extend(stashed);
            return Err(Failed);
        }

        // Extern-C functions take one more chance with implicit integer
        // promotion on each mismatched argument.
        if self.ctx.exists_extern_c_function(&self.tree, &self.els, name) {
            let pr = self.call_extern_c_with_promotion(dfn, current, node, name, arg_values, arg_types)?;
            return Ok(CallOutcome::Done(pr));
        }

        if self.ctx.exists_non_extern_c_function(&self.tree, &self.els, name) {
            if name == "destroy" {
                return Ok(CallOutcome::Done(ParseResult::void(current, self.common.void_)));
            }
            let provided = self.render_types(&arg_types);
            if let Some(closest) = resolution.closest {
                let function = self.els.function(closest);
                let skip = usize::from(function.is_macro);
                let closest_params: Vec<TypeId> =
                    function.params[skip..].iter().map(|&p| self.els.var(p).ty).collect();
                let expected = self.render_types(&closest_params);
                return Err(self.report_detail(
                    ErrorKind::OverloadedFunctionOrMacroNotInScopeWithClosest,
                    node.span,
                    format!("{name} ({provided}); closest candidate expects ({expected})"),
                ));
            }
            return Err(self.report_detail(
                ErrorKind::OverloadedFunctionOrMacroNotInScope,
                node.span,
                format!("{name} ({provided})"),
            ));
        }

        Err(self.report_detail(ErrorKind::NotInScope, node.span, name.to_owned()))
    }

    pub(crate) fn render_types(&self, types: &[TypeId]) -> String {
        if types.is_empty() {
            return "void".to_owned();
        }
        types
            .iter()
            .map(|&t| self.types.display(t))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Emits the call once resolution picked a non-macro function,
    /// applying varargs promotions first.
    fn emit_call(
        &mut self,
        dfn: FnId,
        block: BlockId,
        callee: FnId,
        mut arg_values: Vec<Option<Value>>,
        mut arg_types: Vec<TypeId>,
        span: Span,
    ) -> CResult<ParseResult> {
        let function = self.els.function(callee);
        let ret = function.return_type;
        let param_tys: Vec<TypeId> = function.params.iter().map(|&p| self.els.var(p).ty).collect();
        let callee_ir = function.ir;
        let required = self.types.required_args(&param_tys);
        if self.types.params_are_varargs(&param_tys) {
            self.promote_varargs(dfn, block, required, &mut arg_values, &mut arg_types);
        }

        let Some(callee_ir) = callee_ir else {
            return Err(self.report_detail(
                ErrorKind::FunctionNotInScope,
                span,
                "function has no compiled body".to_owned(),
            ));
        };
        let args: Vec<Value> = arg_values.into_iter().map(|v| v.unwrap_or(Value::Const(ConstValue::NullPtr))).collect();
        let ir_fn = self.ir_fn_of(dfn);
        let mut builder = Builder::new(&mut self.ir, ir_fn, block);
        let is_void = ret == self.common.void_;
        let result = builder.call(Callee::Function(callee_ir), args, (!is_void).then_some(ret));
        let mut pr = if is_void {
            ParseResult::void(block, ret)
        } else {
            ParseResult::new(block, ret, result)
        };
        // The callee performed its own initialization of the return value;
        // re-copying here would lack a matching destructor call.
        pr.do_not_copy_with_setf = true;
        Ok(pr)
    }

    /// Promotes varargs beyond the fixed arity: floats widen to double,
    /// integers narrower than the native int widen with their own
    /// signedness.
    fn promote_varargs(
        &mut self,
        dfn: FnId,
        block: BlockId,
        fixed: usize,
        arg_values: &mut [Option<Value>],
        arg_types: &mut [TypeId],
    ) {
        let ir_fn = self.ir_fn_of(dfn);
        for i in fixed..arg_types.len() {
            let ty = arg_types[i];
            let Some(value) = arg_values[i] else { continue };
            if self.types.base_type(ty) == Some(BaseType::Float) {
                let mut builder = Builder::new(&mut self.ir, ir_fn, block);
                arg_values[i] = Some(builder.cast(value, CastKind::FpExt, self.common.double_));
                arg_types[i] = self.common.double_;
            } else if self.types.is_integer(ty) {
                let marker = self.types.base_type(ty).expect("integer").integer_size();
                let bits = self.layout.real_int_bits(marker);
                if bits < self.layout.native_int_bits {
                    let signed = self.types.is_signed_integer(ty);
                    let (target, kind) = if signed {
                        (self.common.int_, CastKind::SExt)
                    } else {
                        (self.common.uint, CastKind::ZExt)
                    };
                    let mut builder = Builder::new(&mut self.ir, ir_fn, block);
                    arg_values[i] = Some(builder.cast(value, kind, target));
                    arg_types[i] = target;
                }
            }
        }
    }

    /// Extern-C fallback: exact match failed, so cast each mismatched
    /// integer/bool argument to the declared parameter type.
    fn call_extern_c_with_promotion(
        &mut self,
        dfn: FnId,
        block: BlockId,
        node: &Node,
        name: &str,
        arg_values: Vec<Option<Value>>,
        arg_types: Vec<TypeId>,
    ) -> CResult<ParseResult> {
        let resolution = self
            .ctx
            .get_function(&self.tree, &self.els, &self.types, name, None, false, None);
        let Some(callee) = resolution.found else {
            return Err(self.report_detail(ErrorKind::NotInScope, node.span, name.to_owned()));
        };
        let function = self.els.function(callee);
        let param_tys: Vec<TypeId> = function.params.iter().map(|&p| self.els.var(p).ty).collect();
        let required = self.types.required_args(&param_tys);
        let varargs = self.types.params_are_varargs(&param_tys);

        let provided = self.render_types(&arg_types);
        let expected = self.render_types(&param_tys);
        let not_in_scope = |session: &mut Self| {
            session.report_detail(
                ErrorKind::FunctionNotInScope,
                node.span,
                format!("{name}: provided ({provided}), expected ({expected})"),
            )
        };

        if arg_values.len() < required || (!varargs && arg_values.len() != required) {
            return Err(not_in_scope(self));
        }

        let mut new_values = Vec::with_capacity(arg_values.len());
        let mut new_types = Vec::with_capacity(arg_types.len());
        let mut current = block;
        for (i, (&arg_ty, value)) in arg_types.iter().zip(arg_values).enumerate() {
            let Some(&param_ty) = param_tys.get(i) else {
                // Into the varargs tail.
                new_values.push(value);
                new_types.push(arg_ty);
                continue;
            };
            if self.types.equal_relaxed(param_ty, arg_ty, true) {
                new_values.push(value);
                new_types.push(arg_ty);
                continue;
            }
            let param_intish = self.types.is_integer(param_ty) || self.types.base_type(param_ty) == Some(BaseType::Bool);
            let arg_intish = self.types.is_integer(arg_ty) || self.types.base_type(arg_ty) == Some(BaseType::Bool);
            if !param_intish || !arg_intish {
                return Err(not_in_scope(self));
            }
            let Some(value) = value else {
                return Err(not_in_scope(self));
            };
            let cast = self.do_cast(dfn, current, value, arg_ty, param_ty, node.span)?;
            current = cast.block;
            new_values.push(cast.value);
            new_types.push(cast.ty);
        }
        self.emit_call(dfn, current, callee, new_values, new_types, node.span)
    }

    /// Calls through a function-pointer value, evaluating the remaining
    /// list elements as arguments. `extra_args` are prepended (the function
    /// object's self pointer).
    pub(crate) fn eval_funcall_ptr(
        &mut self,
        dfn: FnId,
        block: BlockId,
        fn_ptr: ParseResult,
        list: &[Node],
        skip: usize,
        extra_args: Vec<Value>,
    ) -> CResult<ParseResult> {
        let Some(fn_ty) = self.types.pointee(fn_ptr.ty) else {
            return Err(self.report(ErrorKind::IncorrectType, list[0].span));
        };
        let Some((ret, params)) = self.types.function_parts(fn_ty) else {
            return Err(self.report(ErrorKind::IncorrectType, list[0].span));
        };
        let params: Vec<TypeId> = params.to_vec();
        let required = self.types.required_args(&params);
        let varargs = self.types.params_are_varargs(&params);

        let mut current = block;
        let mut arg_values: Vec<Option<Value>> = extra_args.into_iter().map(Some).collect();
        let mut arg_types: Vec<TypeId> = params[..arg_values.len().min(params.len())].to_vec();
        for arg_node in &list[skip..] {
            let wanted = params.get(arg_values.len()).copied().filter(|&t| !self.types.is_varargs_marker(t));
            let pr = self.evaluate(dfn, current, arg_node, false, wanted)?;
            current = pr.block;
            arg_values.push(pr.value);
            arg_types.push(pr.ty);
        }
        if arg_values.len() < required || (!varargs && arg_values.len() != required) {
            return Err(self.report(ErrorKind::IncorrectNumberOfArgs, list[0].span));
        }
        if varargs {
            self.promote_varargs(dfn, current, required, &mut arg_values, &mut arg_types);
        }
        let args: Vec<Value> = arg_values
            .into_iter()
            .map(|v| v.unwrap_or(Value::Const(ConstValue::NullPtr)))
            .collect();
        let ir_fn = self.ir_fn_of(dfn);
        let mut builder = Builder::new(&mut self.ir, ir_fn, current);
        let is_void = ret == self.common.void_;
        let result = builder.call(Callee::Pointer(fn_ptr.value_or_unit()), args, (!is_void).then_some(ret));
        let mut pr = if is_void {
            ParseResult::void(current, ret)
        } else {
            ParseResult::new(current, ret, result)
        };
        pr.do_not_copy_with_setf = true;
        Ok(pr)
    }

    // --- casts ------------------------------------------------------------

    /// Emits a conversion between two types, used by `cast` and by the
    /// implicit promotions.
    pub(crate) fn do_cast(
        &mut self,
        dfn: FnId,
        block: BlockId,
        value: Value,
        from: TypeId,
        to: TypeId,
        span: Span,
    ) -> CResult<ParseResult> {
        if from == to || self.types.equal_relaxed(to, from, true) {
            return Ok(ParseResult::new(block, to, value));
        }
        let from_base = self.types.base_type(from);
        let to_base = self.types.base_type(to);
        let from_ptr = self.types.pointee(from).is_some();
        let to_ptr = self.types.pointee(to).is_some();
        let ir_fn = self.ir_fn_of(dfn);

        let kind = match (from_base, to_base, from_ptr, to_ptr) {
            (_, _, true, true) => CastKind::Bitcast,
            (Some(f), _, false, true) if f.is_integer() => CastKind::IntToPtr,
            (_, Some(t), true, false) if t.is_integer() => CastKind::PtrToInt,
            (Some(f), Some(t), false, false) => {
                let f_int = f.is_integer() || f == BaseType::Bool;
                let t_int = t.is_integer() || t == BaseType::Bool;
                if f_int && t_int {
                    let fb = if f == BaseType::Bool { 1 } else { self.layout.real_int_bits(f.integer_size()) };
                    let tb = if t == BaseType::Bool { 1 } else { self.layout.real_int_bits(t.integer_size()) };
                    if fb == tb {
                        CastKind::Bitcast
                    } else if fb > tb {
                        CastKind::Trunc
                    } else if f.is_signed_integer() {
                        CastKind::SExt
                    } else {
                        CastKind::ZExt
                    }
                } else if f.is_floating() && t.is_floating() {
                    if f.fp_relative_size() < t.fp_relative_size() {
                        CastKind::FpExt
                    } else {
                        CastKind::FpTrunc
                    }
                } else if f_int && t.is_floating() {
                    if f.is_signed_integer() {
                        CastKind::SiToFp
                    } else {
                        CastKind::UiToFp
                    }
                } else if f.is_floating() && t_int {
                    if t.is_signed_integer() {
                        CastKind::FpToSi
                    } else {
                        CastKind::FpToUi
                    }
                } else {
                    return Err(self.report_detail(
                        ErrorKind::IncorrectType,
                        span,
                        format!("cannot cast {} to {}", self.types.display(from), self.types.display(to)),
                    ));
                }
            }
            _ => {
                return Err(self.report_detail(
                    ErrorKind::IncorrectType,
                    span,
                    format!("cannot cast {} to {}", self.types.display(from), self.types.display(to)),
                ));
            }
        };
        let mut builder = Builder::new(&mut self.ir, ir_fn, block);
        let result = builder.cast(value, kind, to);
        Ok(ParseResult::new(block, to, result))
    }

    /// Pointer arithmetic helper shared by `p+` and `p-`: scale the offset
    /// by the pointee size in the address space.
    pub(crate) fn pointer_offset(
        &mut self,
        dfn: FnId,
        block: BlockId,
        ptr: &ParseResult,
        offset: &ParseResult,
        negate: bool,
        span: Span,
    ) -> CResult<ParseResult> {
        let Some(pointee) = self.types.pointee(ptr.ty) else {
            return Err(self.report(ErrorKind::IncorrectType, span));
        };
        let Some(size) = self.type_size(pointee) else {
            return Err(self.report(ErrorKind::IncorrectType, span));
        };
        let intptr = self.common.intptr;
        let offset_cast = self.do_cast(dfn, block, offset.value_or_unit(), offset.ty, intptr, span)?;
        let ir_fn = self.ir_fn_of(dfn);
        let mut builder = Builder::new(&mut self.ir, ir_fn, block);
        let addr = builder.cast(ptr.value_or_unit(), CastKind::PtrToInt, intptr);
        let ptr_bits = 64u32;
        let scaled = builder.arith(
            ArithOp::Mul,
            offset_cast.value_or_unit(),
            Value::Const(ConstValue::Int {
                bits: ptr_bits,
                value: u128::from(size),
            }),
            intptr,
        );
        let op = if negate { ArithOp::Sub } else { ArithOp::Add };
        let moved = builder.arith(op, addr, scaled, intptr);
        let back = builder.cast(moved, CastKind::IntToPtr, ptr.ty);
        Ok(ParseResult::new(block, ptr.ty, back))
    }
}
