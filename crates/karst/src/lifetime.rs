//! Variable lifetime and destruction.
//!
//! Automatics destruct in reverse declaration-index order when their scope
//! closes, including at function exits and `if` branch joins. Temporaries
//! destruct once the enclosing form has consumed them. Assignment and copy
//! semantics are overridable through `setf-copy` / `setf-assign`, and a
//! function named `destroy` taking a pointer is a destructor.
//!
//! All gotos defer: when a function body finishes, each recorded goto is
//! resolved against the labels the body registered, destructors for every
//! scope between the goto and its label are emitted at the recorded
//! position, and a goto that would jump forward past a declaration is
//! rejected.

use crate::{
    element::{FnId, VarId},
    error::{CResult, ErrorKind, Failed},
    eval::ParseResult,
    ir::{BlockId, Builder, Callee, Value},
    namespace::NsId,
};

impl crate::run::Session {
    /// Looks up `destroy((p T))` for a value type.
    fn destroy_fn_for(&mut self, ty: crate::types::TypeId) -> Option<FnId> {
        let p_ty = self.types.pointer_to(ty);
        self.ctx
            .get_function(&self.tree, &self.els, &self.types, "destroy", Some(&[p_ty]), false, None)
            .found
    }

    /// Emits the destructor call for a result, when one is in scope.
    /// Arrays destruct element by element, last to first. The value is
    /// spilled into fresh storage unless `value_is_ptr` says it already is
    /// storage.
    pub(crate) fn destruct_if_applicable(
        &mut self,
        dfn: FnId,
        pr: &ParseResult,
        value_is_ptr: bool,
    ) -> CResult<ParseResult> {
        if pr.do_not_destruct {
            return Ok(pr.clone());
        }
        let Some(value) = pr.value else {
            return Ok(pr.clone());
        };

        if let Some((element_ty, length)) = self.types.array_element(pr.ty) {
            if length == 0 {
                return Ok(pr.clone());
            }
            // Nothing to do when the element type has no destructor.
            if self.types.array_element(element_ty).is_none() && self.destroy_fn_for(element_ty).is_none() {
                return Ok(pr.clone());
            }
            let block = pr.block;
            // Array literals carry array values; spill to storage first.
            let storage = if value_is_ptr {
                value
            } else {
                let p_arr = self.types.pointer_to(pr.ty);
                let ir_fn = self.ir_fn_of(dfn);
                let mut builder = Builder::new(&mut self.ir, ir_fn, block);
                let slot = builder.alloca(pr.ty, p_arr);
                builder.store(value, slot);
                slot
            };
            let p_elem = self.types.pointer_to(element_ty);
            let mut current = block;
            for i in (0..length).rev() {
                let ir_fn = self.ir_fn_of(dfn);
                let mut builder = Builder::new(&mut self.ir, ir_fn, current);
                let slot = builder.gep_member(storage, i, p_elem);
                let inner_is_ptr = self.types.array_element(element_ty).is_some();
                let element_pr = if inner_is_ptr {
                    ParseResult::new(current, element_ty, slot)
                } else {
                    let loaded = builder.load(slot, element_ty);
                    ParseResult::new(current, element_ty, loaded)
                };
                let done = self.destruct_if_applicable(dfn, &element_pr, inner_is_ptr)?;
                current = done.block;
            }
            let mut out = pr.clone();
            out.block = current;
            return Ok(out);
        }

        let Some(destroy_fn) = self.destroy_fn_for(pr.ty) else {
            return Ok(pr.clone());
        };
        let Some(destroy_ir) = self.els.function(destroy_fn).ir else {
            return Ok(pr.clone());
        };
        let block = pr.block;
        let ir_fn = self.ir_fn_of(dfn);
        let mut builder = Builder::new(&mut self.ir, ir_fn, block);
        let storage = if value_is_ptr {
            value
        } else {
            let p_ty = self.types.pointer_to(pr.ty);
            let slot = builder.alloca(pr.ty, p_ty);
            builder.store(value, slot);
            slot
        };
        builder.call(Callee::Function(destroy_ir), vec![storage], None);
        Ok(pr.clone())
    }

    /// Copies a result through `setf-copy((p T) (p T))` when one is in
    /// scope, yielding the copy as the new value. Skipped for results
    /// flagged as already handled and inside setf functions (the caller
    /// checks the latter).
    pub(crate) fn copy_with_setf_if_applicable(&mut self, dfn: FnId, pr: ParseResult) -> CResult<ParseResult> {
        if pr.do_not_copy_with_setf || pr.freshly_copied {
            return Ok(pr);
        }
        let Some(value) = pr.value else {
            return Ok(pr);
        };
        let p_ty = self.types.pointer_to(pr.ty);
        let Some(over_setf) = self
            .ctx
            .get_function(&self.tree, &self.els, &self.types, "setf-copy", Some(&[p_ty, p_ty]), false, None)
            .found
        else {
            return Ok(pr);
        };
        let Some(setf_ir) = self.els.function(over_setf).ir else {
            return Ok(pr);
        };
        let ir_fn = self.ir_fn_of(dfn);
        let mut builder = Builder::new(&mut self.ir, ir_fn, pr.block);
        let dst = builder.alloca(pr.ty, p_ty);
        let src = builder.alloca(pr.ty, p_ty);
        builder.store(value, src);
        builder.call(Callee::Function(setf_ir), vec![dst, src], None);
        let copied = builder.load(dst, pr.ty);
        let mut out = pr;
        out.value = Some(copied);
        out.freshly_copied = true;
        Ok(out)
    }

    /// Destructs every variable of the current namespace, in reverse
    /// declaration order, before the scope's terminator. `no_destruct`
    /// exempts the storage being returned.
    pub(crate) fn scope_close(&mut self, dfn: FnId, block: BlockId, no_destruct: Option<Value>) -> CResult<BlockId> {
        self.close_namespace_vars(dfn, block, self.ctx.current(), no_destruct)
    }

    pub(crate) fn close_namespace_vars(
        &mut self,
        dfn: FnId,
        block: BlockId,
        ns: NsId,
        no_destruct: Option<Value>,
    ) -> CResult<BlockId> {
        let vars = self.tree.get_variables(ns);
        self.destruct_variables(dfn, block, &vars, no_destruct)
    }

    fn destruct_variables(
        &mut self,
        dfn: FnId,
        block: BlockId,
        vars: &[VarId],
        no_destruct: Option<Value>,
    ) -> CResult<BlockId> {
        let mut current = block;
        for &var_id in vars {
            let var = self.els.var(var_id);
            let Some(storage) = var.value else { continue };
            if no_destruct == Some(storage) {
                continue;
            }
            let mut pr = ParseResult::new(current, var.ty, storage);
            pr.value = Some(storage);
            let done = self.destruct_if_applicable(dfn, &pr, true)?;
            current = done.block;
        }
        Ok(current)
    }

    /// Resolves the deferred gotos recorded while compiling `dfn`'s body.
    ///
    /// For each goto: find the label (else *LabelNotInScope*); collect the
    /// variables of every namespace from the goto's scope up to, but
    /// excluding, the label's scope, and destruct them at the goto's
    /// position; reject a goto that would jump forward past a declaration
    /// whose destructor would then be scheduled (*GotoWillCrossDeclaration*);
    /// finally emit the branch.
    pub(crate) fn resolve_deferred_gotos(&mut self, dfn: FnId) -> CResult<()> {
        let gotos = std::mem::take(&mut self.els.function_mut(dfn).deferred_gotos);
        let mut ok = true;
        for goto in &gotos {
            let label = self.els.function(dfn).labels.get(&goto.label_name).cloned();
            let Some(label) = label else {
                self.report_detail(ErrorKind::LabelNotInScope, goto.span, goto.label_name.clone());
                ok = false;
                continue;
            };

            // Walk from the goto's namespace toward the label's, collecting
            // scopes whose variables the jump abandons.
            let mut to_destruct: Vec<VarId> = Vec::new();
            let mut cursor = Some(goto.ns);
            let mut reached_label_ns = false;
            while let Some(ns) = cursor {
                if ns == label.ns {
                    reached_label_ns = true;
                    break;
                }
                to_destruct.extend(self.tree.get_variables(ns));
                cursor = self.tree.get(ns).parent;
            }

            // A declaration at or before the label with an index after the
            // goto means the jump crosses it.
            let mut crossed = false;
            if reached_label_ns {
                // Jump within the label's own scope chain: only a forward
                // jump over a declaration made between the goto and the
                // label is a cross.
                let mut before = Vec::new();
                self.tree
                    .get_vars_before_index(&self.els, label.ns, label.index, &mut before);
                crossed = before.iter().any(|&v| {
                    let index = self.els.var(v).index;
                    index >= goto.index && index <= label.index
                });
            } else {
                let mut label_chain = Some(label.ns);
                while let Some(ns) = label_chain {
                    let mut before = Vec::new();
                    self.tree.get_vars_before_index(&self.els, ns, label.index, &mut before);
                    if before.iter().any(|&v| self.els.var(v).index >= goto.index) {
                        crossed = true;
                        break;
                    }
                    label_chain = self.tree.get(ns).parent;
                }
            }
            if crossed {
                self.report(ErrorKind::GotoWillCrossDeclaration, goto.span);
                ok = false;
                continue;
            }

            let end_block = self.destruct_variables(dfn, goto.block, &to_destruct, None)?;
            let ir_fn = self.ir_fn_of(dfn);
            let mut builder = Builder::new(&mut self.ir, ir_fn, end_block);
            builder.br(label.block);
        }
        self.els.function_mut(dfn).labels.clear();
        if ok { Ok(()) } else { Err(Failed) }
    }
}
