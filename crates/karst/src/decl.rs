//! Top-level definitions and type syntax.
//!
//! `(def NAME (fn|macro|struct|enum|var ...))` at file scope. Function and
//! macro bodies compile through the form evaluator; global variable
//! initializers that are not simple literals are evaluated by JIT-compiling
//! a temporary constructor function and decoding the raw bytes it produces.

use indexmap::IndexMap;

use crate::{
    element::{EnumDef, EnumLinkage, FnId, Function, Linkage, StructDef, StructLinkage, VarId, Variable},
    error::{CResult, ErrorKind, Failed},
    ir::{BlockId, Builder, ConstValue, FloatKind, GlobalInit, IrFnId, Value},
    namespace::AddFunctionError,
    node::{Node, NodeKind, TokenKind},
    run::{CORE_FORMS, Session, StructView, const_int_from_text, parse_enum_linkage, parse_linkage, parse_struct_linkage},
    types::{BaseType, TypeId},
};

impl Session {
    // --- type syntax ------------------------------------------------------

    /// Parses type syntax: basic type names, `(p T)`, `(const T)`,
    /// `(array-of N T)`, `(bf T N)`, `(fn RET (PARAMS))`, `(struct NAME)`,
    /// and anonymous `(struct (MEMBERS...))`.
    pub fn parse_type(&mut self, node: &Node) -> CResult<TypeId> {
        match &node.kind {
            NodeKind::Token(token) if token.kind == TokenKind::Symbol => {
                if let Ok(base) = token.text.parse::<BaseType>() {
                    return Ok(self.types.basic(base));
                }
                // The type map lets modules alias struct names.
                let name = match self.types.typemap_entry(&token.text) {
                    Some(aliased) => aliased.to_owned(),
                    None => token.text.clone(),
                };
                if let Some((ns, _)) = self.ctx.get_struct(&self.tree, &name) {
                    let path = self.tree.path_of(ns);
                    let plain = name.rsplit('.').next().unwrap_or(&name).to_owned();
                    return Ok(self.types.struct_ref(plain, path));
                }
                Err(self.report_detail(ErrorKind::TypeNotInScope, node.span, token.text.clone()))
            }
            NodeKind::Token(_) => Err(self.report_detail(ErrorKind::TypeNotInScope, node.span, node.to_string())),
            NodeKind::List(list) => {
                let Some(head) = list.first().and_then(Node::as_symbol) else {
                    return Err(self.report(ErrorKind::FirstListElementMustBeSymbol, node.span));
                };
                match head {
                    "p" => {
                        let [_, inner] = &list[..] else {
                            return Err(self.report_detail(ErrorKind::IncorrectNumberOfArgs, node.span, "p"));
                        };
                        let pointee = self.parse_type(inner)?;
                        Ok(self.types.pointer_to(pointee))
                    }
                    "const" => {
                        let [_, inner] = &list[..] else {
                            return Err(self.report_detail(ErrorKind::IncorrectNumberOfArgs, node.span, "const"));
                        };
                        let ty = self.parse_type(inner)?;
                        Ok(self.types.const_of(ty))
                    }
                    "array-of" => {
                        let [_, len_node, elem_node] = &list[..] else {
                            return Err(self.report_detail(ErrorKind::IncorrectNumberOfArgs, node.span, "array-of"));
                        };
                        let Some(len_token) = len_node.as_token().filter(|t| t.kind == TokenKind::Int) else {
                            return Err(self.report(ErrorKind::UnexpectedElement, len_node.span));
                        };
                        let length: u64 = len_token
                            .text
                            .parse()
                            .map_err(|_| self.report_detail(ErrorKind::InvalidInteger, len_node.span, len_token.text.clone()))?;
                        let element = self.parse_type(elem_node)?;
                        Ok(self.types.array_of(element, length))
                    }
                    "bf" => {
                        let [_, base_node, width_node] = &list[..] else {
                            return Err(self.report_detail(ErrorKind::IncorrectNumberOfArgs, node.span, "bf"));
                        };
                        let base = base_node
                            .as_symbol()
                            .and_then(|s| s.parse::<BaseType>().ok())
                            .filter(|b| b.is_integer());
                        let Some(base) = base else {
                            return Err(self.report(ErrorKind::BitfieldMustHaveIntegerType, base_node.span));
                        };
                        let Some(width_token) = width_node.as_token().filter(|t| t.kind == TokenKind::Int) else {
                            return Err(self.report(ErrorKind::UnexpectedElement, width_node.span));
                        };
                        let width: u32 = width_token
                            .text
                            .parse()
                            .map_err(|_| self.report_detail(ErrorKind::InvalidInteger, width_node.span, width_token.text.clone()))?;
                        Ok(self.types.bitfield(base, width))
                    }
                    "fn" => {
                        let [_, ret_node, params_node] = &list[..] else {
                            return Err(self.report_detail(ErrorKind::IncorrectNumberOfArgs, node.span, "fn"));
                        };
                        let ret = self.parse_type(ret_node)?;
                        let Some(param_list) = params_node.as_list() else {
                            return Err(self.report(ErrorKind::UnexpectedElement, params_node.span));
                        };
                        let mut params = Vec::with_capacity(param_list.len());
                        for param in param_list {
                            if param.is_symbol("void") {
                                break;
                            }
                            if param.is_symbol("...") {
                                params.push(self.common.varargs);
                                break;
                            }
                            // Parameters may appear bare or as (name TYPE).
                            let ty_node = match param.as_list() {
                                Some([_, ty_node]) => ty_node,
                                _ => param,
                            };
                            params.push(self.parse_type(ty_node)?);
                        }
                        Ok(self.types.function(ret, params))
                    }
                    "struct" => match &list[1..] {
                        [name_node] if name_node.is_token() => {
                            let Some(name) = name_node.as_symbol() else {
                                return Err(self.report(ErrorKind::FirstListElementMustBeSymbol, name_node.span));
                            };
                            let name = name.to_owned();
                            let Some((ns, _)) = self.ctx.get_struct(&self.tree, &name) else {
                                return Err(self.report_detail(ErrorKind::TypeNotInScope, name_node.span, name));
                            };
                            let path = self.tree.path_of(ns);
                            Ok(self.types.struct_ref(name, path))
                        }
                        [members] if members.is_list() => {
                            // Anonymous struct in type position becomes a
                            // fresh named struct.
                            self.tmp_count += 1;
                            let name = format!("_anon_struct_{}", self.tmp_count);
                            let body = Node::list(
                                vec![
                                    Node::symbol("struct", node.span),
                                    Node::symbol("intern", node.span),
                                    members.clone(),
                                ],
                                node.span,
                            );
                            self.parse_struct_definition(&name, &body)?;
                            let (ns, _) = self.ctx.get_struct(&self.tree, &name).expect("just defined");
                            let path = self.tree.path_of(ns);
                            Ok(self.types.struct_ref(name, path))
                        }
                        _ => Err(self.report(ErrorKind::UnexpectedElement, node.span)),
                    },
                    _ => Err(self.report_detail(ErrorKind::TypeNotInScope, node.span, head.to_owned())),
                }
            }
        }
    }

    /// Parses one `(name TYPE)` parameter.
    fn parse_argument(&mut self, node: &Node) -> CResult<(String, TypeId)> {
        let Some([name_node, ty_node]) = node.as_list() else {
            return Err(self.report_detail(ErrorKind::UnexpectedElement, node.span, "parameter"));
        };
        let Some(name) = name_node.as_symbol() else {
            return Err(self.report(ErrorKind::FirstListElementMustBeSymbol, name_node.span));
        };
        let ty = self.parse_type(ty_node)?;
        Ok((name.to_owned(), ty))
    }

    /// Parses `(attr X)` entries; returns (always_inline, cto) or an error
    /// for unknown attributes.
    fn parse_fn_attributes(&mut self, node: &Node) -> CResult<(bool, bool)> {
        let mut always_inline = false;
        let mut cto = false;
        let Some(list) = node.as_list() else {
            return Err(self.report(ErrorKind::InvalidAttribute, node.span));
        };
        for attr in &list[1..] {
            match attr.as_symbol() {
                Some("inline") => always_inline = true,
                Some("cto") => cto = true,
                _ => return Err(self.report(ErrorKind::InvalidAttribute, attr.span)),
            }
        }
        Ok((always_inline, cto))
    }

    // --- functions --------------------------------------------------------

    /// Parses a function definition or declaration. For anonymous
    /// functions `anonymous_linkage` supplies the linkage and the node
    /// carries no linkage element.
    pub(crate) fn parse_function_definition(
        &mut self,
        name: &str,
        node: &Node,
        anonymous_linkage: Option<Linkage>,
    ) -> CResult<FnId> {
        let list = node.as_list().expect("fn body is a list");
        let mut cursor = 1usize;
        let linkage = match anonymous_linkage {
            Some(linkage) => linkage,
            None => {
                let Some(linkage_node) = list.get(cursor) else {
                    return Err(self.report_detail(ErrorKind::IncorrectMinimumNumberOfArgs, node.span, "fn"));
                };
                cursor += 1;
                parse_linkage(self, linkage_node)?
            }
        };

        let mut always_inline = false;
        let mut cto = false;
        if list
            .get(cursor)
            .and_then(Node::as_list)
            .and_then(|l| l.first())
            .is_some_and(|h| h.is_symbol("attr"))
        {
            (always_inline, cto) = self.parse_fn_attributes(&list[cursor])?;
            cursor += 1;
        }

        let Some(ret_node) = list.get(cursor) else {
            return Err(self.report_detail(ErrorKind::IncorrectMinimumNumberOfArgs, node.span, "fn"));
        };
        let return_type = self.parse_type(ret_node)?;
        if self.types.array_element(return_type).is_some() {
            return Err(self.report(ErrorKind::ReturnTypesCannotBeArrays, ret_node.span));
        }
        cursor += 1;

        let Some(params_node) = list.get(cursor) else {
            return Err(self.report_detail(ErrorKind::IncorrectMinimumNumberOfArgs, node.span, "fn"));
        };
        let params = self.parse_parameter_list(params_node)?;
        cursor += 1;

        // setf-* overrides customize copy and store and must return bool;
        // destroy functions are destructors.
        let is_setf_fn = name.starts_with("setf-");
        if is_setf_fn && return_type != self.common.bool_ {
            return Err(self.report_detail(ErrorKind::IncorrectReturnType, node.span, "setf overrides return bool"));
        }

        let internal_name = self
            .tree
            .function_name_to_symbol(&self.els, &self.types, self.ctx.current(), name, linkage, &params);

        let has_body = list.len() > cursor;
        let param_types: Vec<TypeId> = params.iter().map(|&p| self.els.var(p).ty).collect();
        let varargs = self.types.params_are_varargs(&param_types);
        let ir_fn = match self.ir.get_function(&internal_name) {
            Some(existing) if self.ir.function(existing).is_declaration() => existing,
            Some(_) if has_body => {
                return Err(self.report_detail(ErrorKind::RedeclarationOfFunctionOrMacro, node.span, name.to_owned()));
            }
            Some(existing) => existing,
            None => self.ir.add_function(
                internal_name.clone(),
                param_types.iter().copied().filter(|&t| !self.types.is_varargs_marker(t)).collect(),
                return_type,
                varargs,
                linkage.to_ir(),
            ),
        };

        let mut function = Function::new(name, return_type, params, linkage);
        function.ir = Some(ir_fn);
        function.internal_name = internal_name;
        function.is_setf_fn = is_setf_fn;
        function.is_destructor = name == "destroy";
        function.always_inline = always_inline;
        function.cto = cto;
        function.once_tag = self.current_once_tag.clone();
        let fn_id = self.els.add_fn(function);

        match self
            .tree
            .add_function(&mut self.els, &self.types, self.ctx.current(), name, fn_id)
        {
            Ok(()) => {}
            Err(AddFunctionError::SameParamsAsMacro) => {
                return Err(self.report_detail(ErrorKind::FunctionHasSameParamsAsMacro, node.span, name.to_owned()));
            }
            Err(AddFunctionError::SameParamsAsFunction) => {
                return Err(self.report_detail(ErrorKind::MacroHasSameParamsAsFunction, node.span, name.to_owned()));
            }
        }

        if has_body {
            self.parse_function_body(fn_id, &list[cursor..], false)?;
        }
        Ok(fn_id)
    }

    fn parse_parameter_list(&mut self, params_node: &Node) -> CResult<Vec<VarId>> {
        let Some(param_list) = params_node.as_list() else {
            return Err(self.report(ErrorKind::UnexpectedElement, params_node.span));
        };
        let mut params = Vec::new();
        for (i, param) in param_list.iter().enumerate() {
            if param.is_symbol("void") {
                if param_list.len() != 1 {
                    return Err(self.report(ErrorKind::VoidMustBeTheOnlyParameter, params_node.span));
                }
                break;
            }
            if param.is_symbol("...") {
                if i + 1 != param_list.len() {
                    return Err(self.report(ErrorKind::VarArgsMustBeLastParameter, params_node.span));
                }
                let var = Variable::new("...", self.common.varargs, Linkage::Auto);
                params.push(self.els.add_var(var));
                break;
            }
            let (param_name, ty) = self.parse_argument(param)?;
            params.push(self.els.add_var(Variable::new(param_name, ty, Linkage::Auto)));
        }
        Ok(params)
    }

    /// Compiles a function body: entry block, parameter spill slots, each
    /// form in order (destructing intermediates), deferred-goto
    /// resolution, then terminator fixup for every block.
    pub(crate) fn parse_function_body(&mut self, fn_id: FnId, forms: &[Node], as_macro: bool) -> CResult<()> {
        let ir_fn = self.els.function(fn_id).ir.expect("function body needs an IR function");
        let entry = self.ir.function_mut(ir_fn).add_block("entry");

        let body_ns = self.ctx.activate_anonymous_namespace(&mut self.tree);
        self.els.function_mut(fn_id).body_ns = Some(body_ns);

        // Parameters spill to allocas so address-of works uniformly.
        let params = self.els.function(fn_id).params.clone();
        let mut failed = false;
        for (i, &param) in params.iter().enumerate() {
            let source = self.els.var(param);
            let mut ty = source.ty;
            let param_name = source.name.clone();
            if self.types.is_varargs_marker(ty) {
                break;
            }
            // Macro parameters past the implicit context are always
            // (p DNode) in the compiled body, whatever their declared type.
            if as_macro && i >= 1 {
                ty = self.common.pdnode;
            }
            let p_ty = self.types.pointer_to(ty);
            let mut builder = Builder::new(&mut self.ir, ir_fn, entry);
            let slot = builder.alloca(ty, p_ty);
            builder.store(Value::Arg(u32::try_from(i).expect("parameter index fits")), slot);
            let local = self.els.add_var(Variable {
                value: Some(slot),
                ..Variable::new(param_name.clone(), ty, Linkage::Auto)
            });
            if !self.tree.add_variable(&mut self.els, body_ns, &param_name, local) {
                self.report_detail(ErrorKind::RedefinitionOfVariable, Default::default(), param_name);
                failed = true;
            }
        }

        let return_type = self.els.function(fn_id).return_type;
        let mut current = entry;
        let mut last: Option<(ParseOutcome, crate::node::Span)> = None;
        for (i, form) in forms.iter().enumerate() {
            let is_last = i + 1 == forms.len();
            let wanted = if is_last { Some(return_type) } else { None };
            match self.evaluate(fn_id, current, form, false, wanted) {
                Ok(pr) => {
                    current = pr.block;
                    if is_last {
                        last = Some((ParseOutcome { ty: pr.ty, value: pr.value }, form.span));
                    } else {
                        match self.destruct_if_applicable(fn_id, &pr, false) {
                            Ok(done) => current = done.block,
                            Err(Failed) => failed = true,
                        }
                    }
                }
                Err(Failed) => failed = true,
            }
        }

        if self.resolve_deferred_gotos(fn_id).is_err() {
            failed = true;
        }

        // Blocks without a terminator fall through to the next block; the
        // final block returns the last evaluated value.
        let block_count = self.ir.function(ir_fn).blocks.len();
        for bi in 0..block_count {
            let block = BlockId::from_index(bi);
            if self.ir.function(ir_fn).block_terminated(block) {
                continue;
            }
            if bi + 1 < block_count {
                let mut builder = Builder::new(&mut self.ir, ir_fn, block);
                builder.br(BlockId::from_index(bi + 1));
                continue;
            }
            if return_type == self.common.void_ {
                let end = self.scope_close(fn_id, block, None)?;
                let mut builder = Builder::new(&mut self.ir, ir_fn, end);
                builder.ret(None);
            } else if let Some((outcome, span)) = &last {
                if !self.types.equal_relaxed(outcome.ty, return_type, true) {
                    let expected = self.types.display(return_type);
                    let got = self.types.display(outcome.ty);
                    self.report_detail(
                        ErrorKind::IncorrectReturnType,
                        *span,
                        format!("expected {expected}, got {got}"),
                    );
                    failed = true;
                    let mut builder = Builder::new(&mut self.ir, ir_fn, block);
                    builder.ret(None);
                } else {
                    let end = self.scope_close(fn_id, block, None)?;
                    let mut builder = Builder::new(&mut self.ir, ir_fn, end);
                    builder.ret(outcome.value);
                }
            } else {
                let end = self.scope_close(fn_id, block, None)?;
                let mut builder = Builder::new(&mut self.ir, ir_fn, end);
                builder.ret(None);
            }
        }

        self.ir.function_mut(ir_fn).prune_after_terminators();
        self.ctx.deactivate_namespace();
        self.els.function_mut(fn_id).body_ns = None;
        self.els.function_mut(fn_id).defined = true;
        if failed { Err(Failed) } else { Ok(()) }
    }

    // --- macros -----------------------------------------------------------

    /// Parses a macro definition: `(macro LINKAGE (ARGS...) BODY...)`.
    /// Every macro implicitly receives an `(p MContext)` first parameter;
    /// user parameters are `(p DNode)` in the IR regardless of their
    /// declared types, which exist for overload resolution only.
    pub(crate) fn parse_macro_definition(&mut self, name: &str, node: &Node) -> CResult<()> {
        if CORE_FORMS.contains(&name) {
            return Err(self.report_detail(ErrorKind::NoCoreFormNameInMacro, node.span, name.to_owned()));
        }
        let list = node.as_list().expect("macro body is a list");
        if list.len() < 3 {
            return Err(self.report_detail(ErrorKind::IncorrectMinimumNumberOfArgs, node.span, "macro"));
        }
        let linkage = parse_linkage(self, &list[1])?;
        let Some(args) = list[2].as_list() else {
            return Err(self.report_detail(ErrorKind::UnexpectedElement, list[2].span, "macro parameters"));
        };

        let mut params = Vec::new();
        params.push(self.els.add_var(Variable::new("mc", self.common.pmcontext, Linkage::Auto)));
        let mut past_first = false;
        for (i, arg) in args.iter().enumerate() {
            match &arg.kind {
                NodeKind::List(_) => {
                    let (param_name, ty) = self.parse_argument(arg)?;
                    params.push(self.els.add_var(Variable::new(param_name, ty, Linkage::Auto)));
                    past_first = true;
                }
                NodeKind::Token(_) if arg.is_symbol("void") => {
                    if past_first || args.len() > 1 {
                        return Err(self.report(ErrorKind::VoidMustBeTheOnlyParameter, list[2].span));
                    }
                    break;
                }
                NodeKind::Token(_) if arg.is_symbol("...") => {
                    if i + 1 != args.len() {
                        return Err(self.report(ErrorKind::VarArgsMustBeLastParameter, list[2].span));
                    }
                    params.push(self.els.add_var(Variable::new("...", self.common.varargs, Linkage::Auto)));
                    break;
                }
                NodeKind::Token(_) => {
                    let Some(param_name) = arg.as_symbol() else {
                        return Err(self.report(ErrorKind::FirstListElementMustBeSymbol, arg.span));
                    };
                    params.push(self.els.add_var(Variable::new(param_name, self.common.pdnode, Linkage::Auto)));
                    past_first = true;
                }
            }
        }

        let internal_name = self
            .tree
            .function_name_to_symbol(&self.els, &self.types, self.ctx.current(), name, linkage, &params);
        if self.ir.get_function(&internal_name).is_some() {
            return Err(self.report_detail(ErrorKind::RedeclarationOfFunctionOrMacro, node.span, name.to_owned()));
        }

        // In the IR every non-context parameter is (p DNode).
        let mut ir_params = vec![self.common.pmcontext];
        let mut varargs = false;
        for &param in &params[1..] {
            if self.types.is_varargs_marker(self.els.var(param).ty) {
                varargs = true;
                break;
            }
            ir_params.push(self.common.pdnode);
        }
        let ir_fn = self
            .ir
            .add_function(internal_name.clone(), ir_params, self.common.pdnode, varargs, linkage.to_ir());

        let mut function = Function::new(name, self.common.pdnode, params, linkage);
        function.is_macro = true;
        function.ir = Some(ir_fn);
        function.internal_name = internal_name;
        function.once_tag = self.current_once_tag.clone();
        let fn_id = self.els.add_fn(function);

        match self
            .tree
            .add_function(&mut self.els, &self.types, self.ctx.current(), name, fn_id)
        {
            Ok(()) => {}
            Err(AddFunctionError::SameParamsAsMacro) => {
                return Err(self.report_detail(ErrorKind::FunctionHasSameParamsAsMacro, node.span, name.to_owned()));
            }
            Err(AddFunctionError::SameParamsAsFunction) => {
                return Err(self.report_detail(ErrorKind::MacroHasSameParamsAsFunction, node.span, name.to_owned()));
            }
        }

        // Three elements means a declaration.
        if list.len() == 3 {
            return Ok(());
        }

        if linkage == Linkage::Extern {
            self.has_defined_extern_macro = true;
        }

        let errors = self.reporter.error_count();
        let body_result = self.parse_function_body(fn_id, &list[3..], true);
        if body_result.is_err() || self.reporter.error_count() != errors {
            // A macro whose body failed to compile is removed from the
            // overload set to avoid partial definitions.
            let ns = self.ctx.current();
            let node_data = self.tree.get_mut(ns);
            if let Some(overloads) = node_data.functions.get_mut(name) {
                overloads.retain(|&f| f != fn_id);
                if overloads.is_empty() {
                    node_data.functions.remove(name);
                }
            }
            self.ir.erase_function(ir_fn);
            return Err(Failed);
        }
        Ok(())
    }

    // --- structs and enums ------------------------------------------------

    /// Parses `(struct LINKAGE [(attr must-init)] [MEMBERS])`. Opaque
    /// structs may be completed later exactly once.
    pub(crate) fn parse_struct_definition(&mut self, name: &str, node: &Node) -> CResult<()> {
        let list = node.as_list().expect("struct body is a list");
        if list.len() < 2 {
            return Err(self.report_detail(ErrorKind::IncorrectMinimumNumberOfArgs, node.span, "struct"));
        }
        let linkage = parse_struct_linkage(self, &list[1])?;
        let mut cursor = 2usize;
        let mut must_init = false;
        if list
            .get(cursor)
            .and_then(Node::as_list)
            .and_then(|l| l.first())
            .is_some_and(|h| h.is_symbol("attr"))
        {
            let Some(attrs) = list[cursor].as_list() else {
                return Err(self.report(ErrorKind::InvalidAttribute, list[cursor].span));
            };
            for attr in &attrs[1..] {
                match attr.as_symbol() {
                    Some("must-init") => must_init = true,
                    _ => return Err(self.report(ErrorKind::InvalidAttribute, attr.span)),
                }
            }
            cursor += 1;
        }

        let ns = self.ctx.current();
        // Register (or fetch the incomplete opaque) before parsing members,
        // so self-referential pointer members resolve.
        let struct_id = match self.tree.get_struct(ns, name) {
            Some(existing) => {
                let def = self.els.struct_def(existing);
                if !def.is_opaque || linkage == StructLinkage::Opaque {
                    return Err(self.report_detail(ErrorKind::RedeclarationOfStruct, node.span, name.to_owned()));
                }
                existing
            }
            None => {
                let internal_name = {
                    let mangled = self.tree.name_to_symbol(ns, name);
                    format!("struct_{mangled}")
                };
                let def = StructDef {
                    name: name.to_owned(),
                    members: IndexMap::new(),
                    must_init,
                    is_opaque: true,
                    linkage,
                    internal_name,
                    once_tag: self.current_once_tag.clone(),
                    serialize: true,
                };
                let id = self.els.add_struct(def);
                self.tree.add_struct(ns, name, id);
                id
            }
        };
        self.els.struct_def_mut(struct_id).must_init |= must_init;
        self.els.struct_def_mut(struct_id).linkage = linkage;

        if linkage == StructLinkage::Opaque || list.len() <= cursor {
            return Ok(());
        }

        let Some(member_list) = list[cursor].as_list() else {
            return Err(self.report(ErrorKind::UnexpectedElement, list[cursor].span));
        };
        let mut members = IndexMap::new();
        for member in member_list {
            let (member_name, ty) = self.parse_argument(member)?;
            if ty == self.common.void_ || self.types.is_varargs_marker(ty) {
                return Err(self.report_detail(ErrorKind::TypeNotAllowedInStruct, member.span, member_name));
            }
            members.insert(member_name, ty);
        }
        let def = self.els.struct_def_mut(struct_id);
        def.members = members;
        def.is_opaque = false;
        Ok(())
    }

    /// Parses `(enum LINKAGE TYPE (MEMBERS...))` where each member is a
    /// symbol or `(symbol VALUE)`. The underlying type must be an integer.
    /// A companion single-member struct makes the enum name usable in type
    /// position.
    pub(crate) fn parse_enum_definition(&mut self, name: &str, node: &Node) -> CResult<()> {
        let list = node.as_list().expect("enum body is a list");
        let [_, linkage_node, ty_node, members_node] = list else {
            return Err(self.report_detail(ErrorKind::IncorrectNumberOfArgs, node.span, "enum"));
        };
        let linkage = parse_enum_linkage(self, linkage_node)?;
        let underlying = self.parse_type(ty_node)?;
        if !self.types.is_integer(underlying) {
            return Err(self.report(ErrorKind::EnumTypeMustBeInteger, ty_node.span));
        }
        let Some(member_list) = members_node.as_list() else {
            return Err(self.report(ErrorKind::UnexpectedElement, members_node.span));
        };

        let mut members = IndexMap::new();
        let mut next_value: i64 = 0;
        for member in member_list {
            let (member_name, value) = match &member.kind {
                NodeKind::Token(_) => {
                    let Some(member_name) = member.as_symbol() else {
                        return Err(self.report(ErrorKind::FirstListElementMustBeSymbol, member.span));
                    };
                    (member_name.to_owned(), next_value)
                }
                NodeKind::List(pair) => {
                    let [name_node, value_node] = &pair[..] else {
                        return Err(self.report(ErrorKind::UnexpectedElement, member.span));
                    };
                    let Some(member_name) = name_node.as_symbol() else {
                        return Err(self.report(ErrorKind::FirstListElementMustBeSymbol, name_node.span));
                    };
                    let Some(value_token) = value_node.as_token().filter(|t| t.kind == TokenKind::Int) else {
                        return Err(self.report(ErrorKind::UnexpectedElement, value_node.span));
                    };
                    let value: i64 = value_token
                        .text
                        .parse()
                        .map_err(|_| self.report_detail(ErrorKind::InvalidInteger, value_node.span, value_token.text.clone()))?;
                    (member_name.to_owned(), value)
                }
            };
            if members.insert(member_name.clone(), value).is_some() {
                return Err(self.report_detail(ErrorKind::RedeclarationOfEnum, member.span, member_name));
            }
            next_value = value + 1;
        }

        let ns = self.ctx.current();
        let enum_def = EnumDef {
            name: name.to_owned(),
            underlying,
            members,
            linkage,
            once_tag: self.current_once_tag.clone(),
            serialize: true,
        };
        let enum_id = self.els.add_enum(enum_def);
        if !self.tree.add_enum(ns, name, enum_id) {
            return Err(self.report_detail(ErrorKind::RedeclarationOfEnum, node.span, name.to_owned()));
        }

        let mut struct_members = IndexMap::new();
        struct_members.insert("value".to_owned(), underlying);
        let companion = StructDef {
            name: name.to_owned(),
            members: struct_members,
            must_init: false,
            is_opaque: false,
            linkage: match linkage {
                EnumLinkage::Extern => StructLinkage::Extern,
                EnumLinkage::Intern => StructLinkage::Intern,
            },
            internal_name: format!("struct_{}", self.tree.name_to_symbol(ns, name)),
            once_tag: self.current_once_tag.clone(),
            serialize: false,
        };
        let companion_id = self.els.add_struct(companion);
        if !self.tree.add_struct(ns, name, companion_id) {
            return Err(self.report_detail(ErrorKind::RedeclarationOfStruct, node.span, name.to_owned()));
        }
        Ok(())
    }

    // --- global variables -------------------------------------------------

    /// Parses `(var LINKAGE TYPE [INIT])` at file scope. Initializers that
    /// are not simple literals run through the constant constructor.
    pub(crate) fn parse_global_variable(&mut self, name: &str, node: &Node) -> CResult<()> {
        let list = node.as_list().expect("var body is a list");
        if list.len() < 3 {
            return Err(self.report_detail(ErrorKind::IncorrectMinimumNumberOfArgs, node.span, "var"));
        }
        let linkage = parse_linkage(self, &list[1])?;

        let (ty, init) = if list[2].is_symbol("\\") {
            let Some(init_node) = list.get(3) else {
                return Err(self.report(ErrorKind::MustHaveInitialiserForImpliedType, node.span));
            };
            let (ty, init) = self.construct_literal_inferred(init_node)?;
            (ty, Some(init))
        } else {
            let ty = self.parse_type(&list[2])?;
            let init = match list.get(3) {
                Some(init_node) => Some(self.construct_literal(ty, init_node)?),
                None => None,
            };
            (ty, init)
        };

        if init.is_none() && self.types.get(ty).is_const {
            return Err(self.report(ErrorKind::MustHaveInitialiserForConstType, node.span));
        }

        let ns = self.ctx.current();
        let internal_name = if linkage == Linkage::ExternC {
            name.to_owned()
        } else {
            self.tree.name_to_symbol(ns, name)
        };
        let init_or_zero = if init.is_some() {
            init
        } else if linkage.is_extern_any() {
            // Extern declarations take their initializer from the defining
            // module.
            None
        } else {
            Some(GlobalInit::Zero)
        };
        let global = self
            .ir
            .add_global(internal_name.clone(), ty, init_or_zero, false, linkage.to_ir());

        let var = Variable {
            internal_name,
            value: Some(Value::Global(global)),
            global: Some(global),
            has_initializer: list.len() > 3,
            once_tag: self.current_once_tag.clone(),
            ..Variable::new(name, ty, linkage)
        };
        let var_id = self.els.add_var(var);
        if !self.tree.add_variable(&mut self.els, ns, name, var_id) {
            return Err(self.report_detail(ErrorKind::RedefinitionOfVariable, node.span, name.to_owned()));
        }
        Ok(())
    }

    // --- constant construction --------------------------------------------

    /// Builds a constant initializer for a global of type `ty`. Simple
    /// literals fold directly; everything else compiles into a temporary
    /// constructor, runs under the JIT, and is decoded from raw bytes.
    pub(crate) fn construct_literal(&mut self, ty: TypeId, node: &Node) -> CResult<GlobalInit> {
        if let Some(folded) = self.try_fold_literal(ty, node) {
            return Ok(folded);
        }
        self.construct_literal_via_jit(ty, node)
    }

    fn construct_literal_inferred(&mut self, node: &Node) -> CResult<(TypeId, GlobalInit)> {
        // Infer from token shape for the simple cases.
        if let Some(token) = node.as_token() {
            let ty = match token.kind {
                TokenKind::Int => self.common.int_,
                TokenKind::Float => self.common.float_,
                TokenKind::StringLit => self.common.pchar,
                TokenKind::Symbol if token.text == "true" || token.text == "false" => self.common.bool_,
                TokenKind::Symbol => {
                    return Err(self.report(ErrorKind::MustHaveInitialiserForImpliedType, node.span));
                }
            };
            let init = self.construct_literal(ty, node)?;
            return Ok((ty, init));
        }
        Err(self.report(ErrorKind::MustHaveInitialiserForImpliedType, node.span))
    }

    /// Folds literal tokens and all-literal aggregates without involving
    /// the execution engine.
    fn try_fold_literal(&mut self, ty: TypeId, node: &Node) -> Option<GlobalInit> {
        if let Some(token) = node.as_token() {
            match token.kind {
                TokenKind::Int if self.types.is_integer(ty) => {
                    let marker = self.types.base_type(ty)?.integer_size();
                    let bits = self.layout.real_int_bits(marker);
                    return const_int_from_text(&token.text, bits).map(GlobalInit::Scalar);
                }
                TokenKind::Float if self.types.is_floating(ty) => {
                    let value: f64 = token.text.parse().ok()?;
                    let kind = match self.types.base_type(ty)? {
                        BaseType::Float => FloatKind::Float,
                        BaseType::Double => FloatKind::Double,
                        _ => FloatKind::LongDouble,
                    };
                    return Some(GlobalInit::Scalar(ConstValue::Float { kind, value }));
                }
                TokenKind::Symbol if token.text == "true" || token.text == "false" => {
                    if self.types.base_type(ty)? == BaseType::Bool {
                        return Some(GlobalInit::Scalar(ConstValue::bool(token.text == "true")));
                    }
                }
                TokenKind::StringLit => {
                    if self.types.pointee(ty) == Some(self.common.char_) {
                        let text = token.text.clone();
                        let (global, _) = self.string_literal_global(&text);
                        return Some(GlobalInit::GlobalRef(global));
                    }
                    if let Some((element, length)) = self.types.array_element(ty) {
                        if element == self.common.char_ && length as usize == token.text.len() + 1 {
                            let mut bytes = token.text.clone().into_bytes();
                            bytes.push(0);
                            return Some(GlobalInit::Bytes(bytes));
                        }
                    }
                }
                _ => {}
            }
            return None;
        }

        // Aggregates fold when every leaf folds.
        let list = node.as_list()?;
        if let Some((element, declared_len)) = self.types.array_element(ty) {
            let head_is_array = list.first().is_some_and(|h| h.is_symbol("array"));
            if !head_is_array {
                return None;
            }
            let elements = &list[1..];
            if declared_len != 0 && elements.len() as u64 != declared_len {
                return None;
            }
            let folded: Option<Vec<GlobalInit>> = elements.iter().map(|e| self.try_fold_literal(element, e)).collect();
            return folded.map(GlobalInit::Array);
        }
        if self.types.struct_name(ty).is_some() {
            let struct_id = self.struct_of_type(ty)?;
            let head_matches = list
                .first()
                .and_then(Node::as_symbol)
                .is_some_and(|h| h == self.els.struct_def(struct_id).name);
            let pairs: &[Node] = if head_matches {
                if list.len() == 2 {
                    list[1].as_list().unwrap_or(&list[1..])
                } else {
                    &list[1..]
                }
            } else {
                list
            };
            let member_names: Vec<String> = self.els.struct_def(struct_id).members.keys().cloned().collect();
            let mut fields: Vec<Option<GlobalInit>> = vec![None; member_names.len()];
            for pair in pairs {
                let [name_node, value_node] = pair.as_list()? else {
                    return None;
                };
                let member_name = name_node.as_symbol()?;
                let index = self.els.struct_def(struct_id).member_index(member_name)?;
                let member_ty = self.els.struct_def(struct_id).member_type(member_name)?;
                let folded = self.try_fold_literal(member_ty, value_node)?;
                fields[usize::try_from(index).ok()?] = Some(folded);
            }
            return Some(GlobalInit::Struct(
                fields.into_iter().map(|f| f.unwrap_or(GlobalInit::Zero)).collect(),
            ));
        }
        None
    }

    /// The JIT path: compile `(fn T (void) NODE)` plus a wrapper that
    /// memcpys the result into a scratch buffer, run the wrapper, decode
    /// the bytes, then erase both temporaries from the module.
    fn construct_literal_via_jit(&mut self, ty: TypeId, node: &Node) -> CResult<GlobalInit> {
        let Some(size) = self.type_size(ty) else {
            return Err(self.report_detail(ErrorKind::IncorrectType, node.span, "type has no size"));
        };
        let (ctor_id, ctor_ir) = self.make_temp_function(ty)?;
        let entry = BlockId::from_index(0);
        let body_result = (|| -> CResult<()> {
            self.els.function_mut(ctor_id).body_ns = Some(self.ctx.current());
            let pr = self.evaluate(ctor_id, entry, node, false, Some(ty))?;
            if !self.types.equal_relaxed(ty, pr.ty, true) {
                let expected = self.types.display(ty);
                let got = self.types.display(pr.ty);
                return Err(self.report_detail(
                    ErrorKind::IncorrectType,
                    node.span,
                    format!("expected {expected}, got {got}"),
                ));
            }
            let mut builder = Builder::new(&mut self.ir, ctor_ir, pr.block);
            builder.ret(pr.value);
            Ok(())
        })();

        let result = body_result.and_then(|()| {
            // The wrapper takes the scratch buffer's address (a buffer in
            // the compiler's own space, supplied by the engine), calls the
            // constructor, and memcpys the value out.
            let wrapper_name = self.fresh_fn_name("_ctor_wrap");
            let out_ptr_ty = self.types.pointer_to(self.common.char_);
            let wrapper_ir = self.ir.add_function(
                wrapper_name,
                vec![out_ptr_ty],
                self.common.void_,
                false,
                crate::ir::IrLinkage::Internal,
            );
            let wrapper_entry = self.ir.function_mut(wrapper_ir).add_block("entry");
            let p_ty = self.types.pointer_to(ty);
            let mut builder = Builder::new(&mut self.ir, wrapper_ir, wrapper_entry);
            let slot = builder.alloca(ty, p_ty);
            let value = builder.call(crate::ir::Callee::Function(ctor_ir), vec![], Some(ty));
            builder.store(value, slot);
            builder.memcpy(Value::Arg(0), slot, size);
            builder.ret(None);

            let mut bytes = vec![0u8; usize::try_from(size).expect("constant size fits")];
            let run = self.backend.run_constant_ctor(&self.ir, wrapper_ir, &mut bytes);
            self.ir.erase_function(wrapper_ir);
            match run {
                Ok(()) => self.decode_constant_bytes(ty, &bytes, node),
                Err(err) => Err(self.report_detail(ErrorKind::MacroExecutionNotAvailable, node.span, err.to_string())),
            }
        });
        self.ir.erase_function(ctor_ir);
        result
    }

    /// Creates a temporary function used for constant evaluation or
    /// macro-argument typing. The caller erases it when done.
    pub(crate) fn make_temp_function(&mut self, ret: TypeId) -> CResult<(FnId, IrFnId)> {
        let base = self.fresh_fn_name("_tmpfn");
        let internal_name = self.tree.name_to_symbol(crate::namespace::ROOT_NS, &base);
        assert!(
            self.ir.get_function(&internal_name).is_none(),
            "temporary function {internal_name} already exists in module"
        );
        let ir_fn = self
            .ir
            .add_function(internal_name.clone(), vec![], ret, false, crate::ir::IrLinkage::Internal);
        self.ir.function_mut(ir_fn).add_block("entry");
        let mut function = Function::new(base, ret, vec![], Linkage::Intern);
        function.ir = Some(ir_fn);
        function.internal_name = internal_name;
        function.defined = true;
        function.serialize = false;
        let fn_id = self.els.add_fn(function);
        Ok((fn_id, ir_fn))
    }

    /// Decodes the raw little-endian bytes of a constructed value back
    /// into an IR constant, per base kind.
    pub(crate) fn decode_constant_bytes(&mut self, ty: TypeId, bytes: &[u8], node: &Node) -> CResult<GlobalInit> {
        use num_bigint::BigUint;
        use num_traits::ToPrimitive;

        if self.types.is_integer(ty) || self.types.base_type(ty) == Some(BaseType::Bool) {
            let marker = self.types.base_type(ty).expect("integral").integer_size();
            let bits = if self.types.base_type(ty) == Some(BaseType::Bool) {
                1
            } else {
                self.layout.real_int_bits(marker)
            };
            let width = usize::try_from((u64::from(bits.max(8))) / 8).expect("width fits");
            let raw = BigUint::from_bytes_le(&bytes[..width.min(bytes.len())]);
            let value = raw.to_u128().unwrap_or(u128::MAX);
            return Ok(GlobalInit::Scalar(ConstValue::Int { bits, value }));
        }
        if let Some(base) = self.types.base_type(ty).filter(|b| b.is_floating()) {
            let value = match base {
                BaseType::Float => {
                    let mut buf = [0u8; 4];
                    buf.copy_from_slice(&bytes[..4]);
                    f64::from(f32::from_le_bytes(buf))
                }
                _ => {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(&bytes[..8]);
                    f64::from_le_bytes(buf)
                }
            };
            let kind = match base {
                BaseType::Float => FloatKind::Float,
                BaseType::Double => FloatKind::Double,
                _ => FloatKind::LongDouble,
            };
            return Ok(GlobalInit::Scalar(ConstValue::Float { kind, value }));
        }
        if self.types.pointee(ty).is_some() {
            let width = usize::try_from(self.layout.pointer_bytes).expect("pointer width fits");
            let raw = u64::from_le_bytes(
                bytes[..width]
                    .try_into()
                    .map_err(|_| self.report(ErrorKind::IncorrectType, node.span))?,
            );
            if raw == 0 {
                return Ok(GlobalInit::Scalar(ConstValue::NullPtr));
            }
            if self.types.pointee(ty) == Some(self.common.char_) {
                // A char pointer in a constructed constant points into the
                // compiler's own address space; re-emit its contents as a
                // fresh private global.
                // SAFETY: the JitEngine contract guarantees that pointer
                // fields in constructed values are either null or live
                // NUL-terminated strings for the duration of decoding.
                let text = unsafe {
                    std::ffi::CStr::from_ptr(raw as usize as *const std::ffi::c_char)
                        .to_string_lossy()
                        .into_owned()
                };
                let (global, _) = self.string_literal_global(&text);
                return Ok(GlobalInit::GlobalRef(global));
            }
            return Err(self.report(ErrorKind::NonNullPointerInGlobalStructDeclaration, node.span));
        }
        if let Some((element, length)) = self.types.array_element(ty) {
            let Some(element_size) = self.type_size(element) else {
                return Err(self.report(ErrorKind::IncorrectType, node.span));
            };
            let element_size = usize::try_from(element_size).expect("element size fits");
            let mut elements = Vec::with_capacity(usize::try_from(length).expect("array length fits"));
            for i in 0..usize::try_from(length).expect("array length fits") {
                let start = i * element_size;
                elements.push(self.decode_constant_bytes(element, &bytes[start..start + element_size], node)?);
            }
            return Ok(GlobalInit::Array(elements));
        }
        if self.types.struct_name(ty).is_some() {
            let Some(struct_id) = self.struct_of_type(ty) else {
                return Err(self.report_detail(ErrorKind::TypeNotInScope, node.span, self.types.display(ty)));
            };
            let members: Vec<TypeId> = self.els.struct_def(struct_id).members.values().copied().collect();
            let view = StructView {
                tree: &self.tree,
                els: &self.els,
            };
            let Some(layout) = self.layout.struct_layout(&self.types, &view, &members) else {
                return Err(self.report(ErrorKind::IncorrectType, node.span));
            };
            if layout.has_padding {
                return Err(self.report(ErrorKind::StructContainsPadding, node.span));
            }
            let mut fields = Vec::with_capacity(members.len());
            for (member, offset) in members.iter().zip(&layout.offsets) {
                let member_size =
                    usize::try_from(self.type_size(*member).unwrap_or(0)).expect("member size fits");
                let start = usize::try_from(*offset).expect("offset fits");
                fields.push(self.decode_constant_bytes(*member, &bytes[start..start + member_size], node)?);
            }
            return Ok(GlobalInit::Struct(fields));
        }
        Err(self.report(ErrorKind::IncorrectType, node.span))
    }
}

struct ParseOutcome {
    ty: TypeId,
    value: Option<Value>,
}
