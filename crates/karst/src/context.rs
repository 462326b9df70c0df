//! The active namespace context.
//!
//! The context is a stack-based facade over the namespace tree: the active
//! stack is the path currently being entered, the used stack additionally
//! holds namespaces brought in by `using-namespace`. Lookups walk the used
//! stack most-recently-first (the active chain is always in it).
//!
//! [`SavePoint`] snapshots everything speculative evaluation can touch —
//! stack shapes, per-namespace binding counts, and the element arenas — so
//! overload probing and macro-argument discovery can roll back cleanly.

use ahash::AHashMap;

use crate::{
    element::{ElementCounts, Elements, EnumId, FnId, StructId, VarId},
    namespace::{NamespaceTree, NsId, OverloadMatch, ROOT_NS},
    types::{TypeId, TypeRegistry},
};

#[derive(Debug)]
pub struct Context {
    /// Path of namespaces currently being entered; the last is current.
    pub active: Vec<NsId>,
    /// Namespaces searched during lookup, most-recently-used last.
    pub used: Vec<NsId>,
    anon_count: u32,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            active: vec![ROOT_NS],
            used: vec![ROOT_NS],
            anon_count: 0,
        }
    }

    pub fn current(&self) -> NsId {
        *self.active.last().expect("active namespace stack is never empty")
    }

    /// Enters the named child of the current namespace, creating it on
    /// first use.
    pub fn activate_namespace(&mut self, tree: &mut NamespaceTree, name: &str) -> NsId {
        let child = tree.child(self.current(), name);
        self.active.push(child);
        self.used.push(child);
        child
    }

    /// Enters a fresh uniquely-named scope.
    pub fn activate_anonymous_namespace(&mut self, tree: &mut NamespaceTree) -> NsId {
        self.anon_count += 1;
        let name = format!("anon{}", self.anon_count);
        self.activate_namespace(tree, &name)
    }

    pub fn deactivate_namespace(&mut self) {
        let left = self.active.pop().expect("deactivating with empty active stack");
        if let Some(pos) = self.used.iter().rposition(|&ns| ns == left) {
            self.used.remove(pos);
        }
    }

    /// Brings a namespace into lookup without entering it. The name is
    /// resolved against the current chain, outermost match last.
    pub fn use_namespace(&mut self, tree: &NamespaceTree, name: &str) -> Option<NsId> {
        for &ns in self.active.iter().rev() {
            if let Some(&child) = tree.get(ns).children.get(name) {
                self.used.push(child);
                return Some(child);
            }
        }
        None
    }

    pub fn unuse_namespace(&mut self) {
        self.used.pop();
    }

    /// Pops active scopes until `target` is current, returning the popped
    /// ids so the caller can restore them. Used when an anonymous function
    /// must compile in the pre-function scope chain.
    pub fn save_and_pop_until(&mut self, target: NsId) -> ContextStacks {
        let saved = ContextStacks {
            active: self.active.clone(),
            used: self.used.clone(),
        };
        while self.current() != target && self.active.len() > 1 {
            self.deactivate_namespace();
        }
        saved
    }

    pub fn restore_stacks(&mut self, stacks: ContextStacks) {
        self.active = stacks.active;
        self.used = stacks.used;
    }

    // --- lookup -----------------------------------------------------------

    pub fn get_variable(&self, tree: &NamespaceTree, name: &str) -> Option<VarId> {
        self.used
            .iter()
            .rev()
            .find_map(|&ns| tree.get_variable(ns, name))
    }

    pub fn get_struct(&self, tree: &NamespaceTree, name: &str) -> Option<(NsId, StructId)> {
        // Dotted names resolve through the namespace path.
        if let Some((path, last)) = name.rsplit_once('.') {
            let mut ns = ROOT_NS;
            for part in path.split('.') {
                ns = *tree.get(ns).children.get(part)?;
            }
            return tree.get_struct(ns, last).map(|s| (ns, s));
        }
        self.used
            .iter()
            .rev()
            .find_map(|&ns| tree.get_struct(ns, name).map(|s| (ns, s)))
    }

    pub fn get_enum(&self, tree: &NamespaceTree, name: &str) -> Option<EnumId> {
        self.used.iter().rev().find_map(|&ns| tree.get_enum(ns, name))
    }

    /// Overload resolution across the used-namespace stack. When no
    /// candidate matches and the argument list is not already all
    /// pointer-to-DNode, the last non-DNode argument is replaced with
    /// pointer-to-DNode and the search retried as a macro lookup — this is
    /// how macros that accept raw syntax are discovered.
    pub fn get_function(
        &self,
        tree: &NamespaceTree,
        els: &Elements,
        types: &TypeRegistry,
        name: &str,
        arg_types: Option<&[TypeId]>,
        is_macro: bool,
        pdnode: Option<TypeId>,
    ) -> OverloadMatch {
        let mut closest = OverloadMatch {
            closest_count: -1,
            ..OverloadMatch::default()
        };
        for &ns in self.used.iter().rev() {
            let m = tree.get_function_in(els, types, ns, name, arg_types, is_macro);
            if m.found.is_some() {
                return m;
            }
            if m.closest_count > closest.closest_count {
                closest.closest = m.closest;
                closest.closest_count = m.closest_count;
            }
        }

        if let (Some(arg_types), Some(pdnode)) = (arg_types, pdnode) {
            if let Some(pos) = arg_types.iter().rposition(|&ty| ty != pdnode) {
                let mut retry: Vec<TypeId> = arg_types.to_vec();
                retry[pos] = pdnode;
                for &ns in self.used.iter().rev() {
                    let m = tree.get_function_in(els, types, ns, name, Some(&retry), true);
                    if m.found.is_some() {
                        return m;
                    }
                }
            }
        }
        closest
    }

    /// Whether any visible overload set for `name` has more than one entry.
    pub fn is_overloaded(&self, tree: &NamespaceTree, name: &str) -> bool {
        let mut seen = 0usize;
        for &ns in self.used.iter().rev() {
            if let Some(list) = tree.get(ns).functions.get(name) {
                seen += list.len();
                if seen > 1 {
                    return true;
                }
            }
        }
        false
    }

    /// First entry of the nearest overload set, ignoring types.
    pub fn first_function(&self, tree: &NamespaceTree, name: &str) -> Option<FnId> {
        for &ns in self.used.iter().rev() {
            if let Some(list) = tree.get(ns).functions.get(name) {
                if let Some(&first) = list.first() {
                    return Some(first);
                }
            }
        }
        None
    }

    pub fn exists_extern_c_function(&self, tree: &NamespaceTree, els: &Elements, name: &str) -> bool {
        self.any_function(tree, els, name, |f| f.linkage == crate::element::Linkage::ExternC)
    }

    pub fn exists_non_extern_c_function(&self, tree: &NamespaceTree, els: &Elements, name: &str) -> bool {
        self.any_function(tree, els, name, |f| f.linkage != crate::element::Linkage::ExternC)
    }

    fn any_function(
        &self,
        tree: &NamespaceTree,
        els: &Elements,
        name: &str,
        pred: impl Fn(&crate::element::Function) -> bool,
    ) -> bool {
        self.used.iter().rev().any(|&ns| {
            tree.get(ns)
                .functions
                .get(name)
                .is_some_and(|list| list.iter().any(|&f| pred(els.function(f))))
        })
    }
}

/// Saved active/used stacks, restored verbatim.
#[derive(Debug, Clone)]
pub struct ContextStacks {
    pub active: Vec<NsId>,
    pub used: Vec<NsId>,
}

/// Snapshot of everything speculative evaluation can mutate outside the IR.
#[derive(Debug)]
pub struct SavePoint {
    stacks: ContextStacks,
    tree_len: usize,
    elements: ElementCounts,
    ns_states: Vec<NsState>,
    anon_count: u32,
}

#[derive(Debug)]
struct NsState {
    ns: NsId,
    lv_index: u32,
    functions_ordered: usize,
    variables: usize,
    structs: usize,
    enums: usize,
    overloads: AHashMap<String, usize>,
}

impl SavePoint {
    pub fn capture(ctx: &Context, tree: &NamespaceTree, els: &Elements) -> Self {
        let ns_states = (0..tree.len())
            .map(|i| {
                let ns = NsId(u32::try_from(i).expect("namespace id overflow"));
                let node = tree.get(ns);
                NsState {
                    ns,
                    lv_index: node.lv_index,
                    functions_ordered: node.functions_ordered.len(),
                    variables: node.variables.len(),
                    structs: node.structs.len(),
                    enums: node.enums.len(),
                    overloads: node.functions.iter().map(|(k, v)| (k.clone(), v.len())).collect(),
                }
            })
            .collect();
        Self {
            stacks: ContextStacks {
                active: ctx.active.clone(),
                used: ctx.used.clone(),
            },
            tree_len: tree.len(),
            elements: els.counts(),
            ns_states,
            anon_count: ctx.anon_count,
        }
    }

    /// Restores the context, namespace tree, and element arenas to the
    /// captured state. Everything created since the capture must be
    /// unreachable afterwards.
    pub fn restore(&self, ctx: &mut Context, tree: &mut NamespaceTree, els: &mut Elements) {
        tree.truncate(self.tree_len);
        for state in &self.ns_states {
            let node = tree.get_mut(state.ns);
            node.lv_index = state.lv_index;
            node.functions_ordered.truncate(state.functions_ordered);
            node.variables.truncate(state.variables);
            node.structs.truncate(state.structs);
            node.enums.truncate(state.enums);
            node.functions.retain(|name, list| {
                match state.overloads.get(name) {
                    Some(&len) => {
                        list.truncate(len);
                        !list.is_empty()
                    }
                    None => false,
                }
            });
        }
        els.truncate(&self.elements);
        ctx.active = self.stacks.active.clone();
        ctx.used = self.stacks.used.clone();
        ctx.anon_count = self.anon_count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        element::{Linkage, Variable},
        types::BaseType,
    };

    #[test]
    fn lookup_prefers_inner_scopes() {
        let mut tree = NamespaceTree::new();
        let mut els = Elements::default();
        let mut types = TypeRegistry::new();
        let mut ctx = Context::new();
        let int = types.basic(BaseType::Int);
        let bool_ty = types.basic(BaseType::Bool);

        let outer = els.add_var(Variable::new("x", int, Linkage::Auto));
        tree.add_variable(&mut els, ROOT_NS, "x", outer);
        ctx.activate_anonymous_namespace(&mut tree);
        let inner = els.add_var(Variable::new("x", bool_ty, Linkage::Auto));
        tree.add_variable(&mut els, ctx.current(), "x", inner);

        assert_eq!(ctx.get_variable(&tree, "x"), Some(inner));
        ctx.deactivate_namespace();
        assert_eq!(ctx.get_variable(&tree, "x"), Some(outer));
    }

    #[test]
    fn save_point_rolls_back_bindings_and_scopes() {
        let mut tree = NamespaceTree::new();
        let mut els = Elements::default();
        let mut types = TypeRegistry::new();
        let mut ctx = Context::new();
        let int = types.basic(BaseType::Int);

        let save = SavePoint::capture(&ctx, &tree, &els);
        ctx.activate_anonymous_namespace(&mut tree);
        let v = els.add_var(Variable::new("tmp", int, Linkage::Auto));
        tree.add_variable(&mut els, ctx.current(), "tmp", v);
        assert!(ctx.get_variable(&tree, "tmp").is_some());

        save.restore(&mut ctx, &mut tree, &mut els);
        assert_eq!(tree.len(), 1);
        assert_eq!(els.vars.len(), 0);
        assert_eq!(ctx.current(), ROOT_NS);
        assert!(ctx.get_variable(&tree, "tmp").is_none());
    }
}
