//! The compile-time macro engine.
//!
//! A macro body is compiled like any function (returning `(p DNode)`),
//! JITted by the backend, and invoked synchronously with its syntactic
//! arguments marshalled through the pool-allocated DNode wire format. The
//! node it returns replaces the call and re-enters the evaluator.
//!
//! [`Session::expand_optional_macro_call`] is used wherever a node might be
//! either a direct form or a macro call: argument types are discovered by
//! compiling the arguments into a throwaway function, unparseable arguments
//! degrade to `(p DNode)`, and expansion recurses until the result is no
//! longer a macro call.

use crate::{
    backend::call_macro,
    dnode::{MContext, Pool, dnode_to_node, node_to_dnode},
    element::FnId,
    error::{CResult, Diagnostic, ErrorKind, Failed},
    node::{Node, NodeKind},
    run::Session,
    types::TypeId,
};

impl Session {
    /// Invokes a macro on a call node and converts the returned DNode back
    /// into syntax. Returns `None` when the expansion produced no
    /// replacement.
    pub(crate) fn expand_macro_call(&mut self, node: &Node, name: &str, macro_fn: FnId) -> CResult<Option<Node>> {
        let list = node.as_list().expect("macro call is a list");

        let function = self.els.function(macro_fn);
        let param_types: Vec<TypeId> = function.params.iter().map(|&p| self.els.var(p).ty).collect();
        let Some(ir_fn) = function.ir else {
            return Err(self.report_detail(ErrorKind::MacroExecutionNotAvailable, node.span, name.to_owned()));
        };
        // The head token stands in for the implicit context argument, so
        // the list length compares directly against the parameter count.
        let required = self.types.required_args(&param_types);
        let varargs = self.types.params_are_varargs(&param_types);
        if varargs {
            if list.len() < required {
                return Err(self.report_detail(
                    ErrorKind::IncorrectMinimumNumberOfArgs,
                    node.span,
                    format!("{name}: expected at least {}, got {}", required - 1, list.len() - 1),
                ));
            }
        } else if list.len() != required {
            return Err(self.report_detail(
                ErrorKind::IncorrectNumberOfArgs,
                node.span,
                format!("{name}: expected {}, got {}", required - 1, list.len() - 1),
            ));
        }

        let address = match self.backend.prepare_macro(&self.ir, ir_fn) {
            Ok(address) => address,
            Err(err) => {
                return Err(self.report_detail(ErrorKind::MacroExecutionNotAvailable, node.span, err.to_string()));
            }
        };

        // Marshal the syntactic arguments, stamping the call-site span as
        // their macro span first.
        let mut pool = Pool::new();
        let mut args = Vec::with_capacity(list.len() - 1);
        for arg in &list[1..] {
            let mut arg = arg.clone();
            arg.stamp_macro_span(node.span);
            args.push(node_to_dnode(&mut pool, &arg));
        }

        let mut mcontext = MContext { pool: &mut pool };
        // SAFETY: the backend vouched for `address` having the macro ABI at
        // this arity; the arguments and context are pool-backed and live
        // across the call.
        let returned = match unsafe { call_macro(address, &mut mcontext, &args) } {
            Ok(returned) => returned,
            Err(err) => {
                return Err(self.report_detail(ErrorKind::MacroExecutionNotAvailable, node.span, err.to_string()));
            }
        };

        if returned.is_null() {
            return Ok(None);
        }
        // SAFETY: a non-null return is a well-formed DNode tree owned by
        // the invocation pool, which is still alive here.
        let converted = unsafe { dnode_to_node(returned) };
        // The pool (and everything the macro allocated) dies with the
        // invocation, after conversion.
        drop(pool);
        match converted {
            Ok(mut out) => {
                out.stamp_macro_span(node.span);
                Ok(Some(out))
            }
            Err((kind, span)) => Err(self.reporter.report(Diagnostic::new(kind, span))),
        }
    }

    /// Expands a node that may be a macro call, recursively, returning the
    /// first non-macro form. Nodes that are not macro calls pass through
    /// unchanged.
    pub(crate) fn expand_optional_macro_call(&mut self, node: Node) -> CResult<Node> {
        let NodeKind::List(list) = &node.kind else {
            return Ok(node);
        };
        let Some(head_name) = list.first().and_then(Node::as_symbol).map(str::to_owned) else {
            return Ok(node);
        };

        // Core sugar expands without consulting the macro tables.
        if let Some(rewritten) = crate::forms::expand_core_sugar(self, &node, &head_name)? {
            return self.expand_optional_macro_call(rewritten);
        }

        let any_macro = self
            .ctx
            .get_function(&self.tree, &self.els, &self.types, &head_name, None, true, None)
            .found;
        if any_macro.is_none() {
            return Ok(node);
        }

        // Discover argument types by compiling the arguments into a
        // temporary function; arguments that cannot be typed become
        // (p DNode), which is how macros receive raw syntax.
        let (tmp_id, tmp_ir) = self.make_temp_function(self.common.int_)?;
        let entry = crate::ir::BlockId::from_index(0);
        self.els.function_mut(tmp_id).body_ns = Some(self.ctx.current());
        self.ctx.activate_anonymous_namespace(&mut self.tree);
        let errors = self.reporter.error_count();
        let mut current = entry;
        let mut arg_types = Vec::with_capacity(list.len() - 1);
        for arg in &list[1..] {
            match self.evaluate(tmp_id, current, arg, false, None) {
                Ok(pr) => {
                    current = pr.block;
                    arg_types.push(pr.ty);
                }
                Err(Failed) => arg_types.push(self.common.pdnode),
            }
        }
        self.reporter.truncate(errors);
        self.ctx.deactivate_namespace();
        self.ir.erase_function(tmp_ir);

        let resolved = self
            .ctx
            .get_function(
                &self.tree,
                &self.els,
                &self.types,
                &head_name,
                Some(&arg_types),
                true,
                Some(self.common.pdnode),
            )
            .found
            .filter(|&f| self.els.function(f).is_macro);
        let Some(macro_fn) = resolved else {
            return Ok(node);
        };

        let Some(expanded) = self.expand_macro_call(&node, &head_name, macro_fn)? else {
            return Err(self.report_detail(
                ErrorKind::UnableToParseForm,
                node.span,
                format!("macro {head_name} expanded to nothing"),
            ));
        };

        // `(do X)` from a macro unwraps to X directly.
        if let Some([head, inner]) = expanded.as_list() {
            if head.is_symbol("do") {
                return self.expand_optional_macro_call(inner.clone());
            }
        }
        self.expand_optional_macro_call(expanded)
    }
}
