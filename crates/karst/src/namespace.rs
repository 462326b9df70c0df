//! The hierarchical namespace tree.
//!
//! Namespaces bind names to variables, structs, enums, and function
//! overload sets. Each namespace keeps a monotonic `lv_index`; bindings
//! record the index they were given, which drives destructor ordering and
//! the goto-crosses-declaration check. A child namespace continues its
//! parent's counter so indexes are comparable along any parent chain.

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    element::{Elements, FnId, Linkage, StructId, VarId},
    ir::IrModule,
    types::{TypeRegistry, encode_standard},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NsId(pub(crate) u32);

impl NsId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Root namespace id; always present.
pub const ROOT_NS: NsId = NsId(0);

#[derive(Debug)]
pub struct NamespaceData {
    pub name: String,
    pub parent: Option<NsId>,
    /// Monotonic declaration counter, continued from the parent at
    /// creation time.
    pub lv_index: u32,
    pub functions: AHashMap<String, Vec<FnId>>,
    pub functions_ordered: Vec<FnId>,
    pub variables: IndexMap<String, VarId>,
    pub structs: IndexMap<String, StructId>,
    pub enums: IndexMap<String, crate::element::EnumId>,
    pub children: AHashMap<String, NsId>,
    /// Cached `<len><name>` chain for symbol mangling; empty at the root.
    pub symbol_prefix: String,
}

/// Why `add_function` refused an insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddFunctionError {
    /// The new function's parameters match an existing macro's.
    SameParamsAsMacro,
    /// The new macro's parameters match an existing function's.
    SameParamsAsFunction,
}

/// Outcome of overload resolution within one namespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverloadMatch {
    pub found: Option<FnId>,
    /// Longest-prefix partial match, for diagnostics.
    pub closest: Option<FnId>,
    pub closest_count: i64,
}

#[derive(Debug)]
pub struct NamespaceTree {
    nodes: Vec<NamespaceData>,
}

impl Default for NamespaceTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![NamespaceData {
                name: ".".to_owned(),
                parent: None,
                lv_index: 0,
                functions: AHashMap::new(),
                functions_ordered: Vec::new(),
                variables: IndexMap::new(),
                structs: IndexMap::new(),
                enums: IndexMap::new(),
                children: AHashMap::new(),
                symbol_prefix: String::new(),
            }],
        }
    }

    pub fn get(&self, id: NsId) -> &NamespaceData {
        &self.nodes[id.index()]
    }

    pub fn get_mut(&mut self, id: NsId) -> &mut NamespaceData {
        &mut self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drops namespaces created after a snapshot, unhooking them from their
    /// parents' child maps.
    pub fn truncate(&mut self, len: usize) {
        while self.nodes.len() > len {
            let node = self.nodes.pop().expect("truncate underflow");
            if let Some(parent) = node.parent {
                self.nodes[parent.index()].children.remove(&node.name);
            }
        }
    }

    /// Creates (or returns the existing) child namespace `name` under
    /// `parent`. The child's `lv_index` continues the parent's counter.
    pub fn child(&mut self, parent: NsId, name: &str) -> NsId {
        if let Some(&existing) = self.nodes[parent.index()].children.get(name) {
            return existing;
        }
        let prefix = {
            let parent_node = &self.nodes[parent.index()];
            let mut prefix = parent_node.symbol_prefix.clone();
            if name != "." {
                prefix.push_str(&name.len().to_string());
                prefix.push_str(name);
            }
            prefix
        };
        let id = NsId(u32::try_from(self.nodes.len()).expect("namespace arena overflow"));
        let lv_index = self.nodes[parent.index()].lv_index;
        self.nodes.push(NamespaceData {
            name: name.to_owned(),
            parent: Some(parent),
            lv_index,
            functions: AHashMap::new(),
            functions_ordered: Vec::new(),
            variables: IndexMap::new(),
            structs: IndexMap::new(),
            enums: IndexMap::new(),
            children: AHashMap::new(),
            symbol_prefix: prefix,
        });
        self.nodes[parent.index()].children.insert(name.to_owned(), id);
        id
    }

    /// Names of the enclosing namespaces from the root down, excluding the
    /// root itself and anonymous scopes.
    pub fn path_of(&self, id: NsId) -> Vec<String> {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(ns) = current {
            let node = self.get(ns);
            if node.parent.is_some() && !node.name.starts_with("anon") {
                names.push(node.name.clone());
            }
            current = node.parent;
        }
        names.reverse();
        names
    }

    // --- insertion --------------------------------------------------------

    pub fn add_function(
        &mut self,
        els: &mut Elements,
        types: &TypeRegistry,
        ns: NsId,
        name: &str,
        function: FnId,
    ) -> Result<(), AddFunctionError> {
        let node = &mut self.nodes[ns.index()];
        node.lv_index += 1;
        els.function_mut(function).index = node.lv_index;

        let Some(existing_list) = node.functions.get(name) else {
            node.functions.insert(name.to_owned(), vec![function]);
            node.functions_ordered.push(function);
            return Ok(());
        };

        let new_is_macro = els.function(function).is_macro;
        let mut replace_at = None;
        let mut already_present = false;
        for (i, &existing) in existing_list.iter().enumerate() {
            let old = els.function(existing);
            if old.is_macro == new_is_macro {
                if existing == function {
                    already_present = true;
                    break;
                }
                if Self::params_equal(els, types, existing, function, false) {
                    if old.is_declaration() {
                        // A definition supersedes its declaration.
                        replace_at = Some(i);
                    } else {
                        already_present = true;
                    }
                    break;
                }
            } else {
                // A macro and a function may not share non-implicit
                // parameter types under one name.
                if Self::params_equal(els, types, existing, function, true) {
                    return Err(if old.is_macro {
                        AddFunctionError::SameParamsAsMacro
                    } else {
                        AddFunctionError::SameParamsAsFunction
                    });
                }
            }
        }

        let node = &mut self.nodes[ns.index()];
        if already_present {
            node.functions_ordered.push(function);
            return Ok(());
        }
        let list = node.functions.get_mut(name).expect("overload list disappeared");
        match replace_at {
            Some(i) => list[i] = function,
            None => list.push(function),
        }
        node.functions_ordered.push(function);
        Ok(())
    }

    /// Element-wise parameter type comparison, skipping each macro's
    /// implicit context argument when `skip_implicit` is set.
    fn params_equal(els: &Elements, types: &TypeRegistry, a: FnId, b: FnId, skip_implicit: bool) -> bool {
        let fa = els.function(a);
        let fb = els.function(b);
        let skip_a = usize::from(skip_implicit && fa.is_macro);
        let skip_b = usize::from(skip_implicit && fb.is_macro);
        let pa = &fa.params[skip_a.min(fa.params.len())..];
        let pb = &fb.params[skip_b.min(fb.params.len())..];
        pa.len() == pb.len()
            && pa
                .iter()
                .zip(pb)
                .all(|(&x, &y)| types.equal_relaxed(els.var(x).ty, els.var(y).ty, false))
    }

    pub fn add_variable(&mut self, els: &mut Elements, ns: NsId, name: &str, var: VarId) -> bool {
        let node = &mut self.nodes[ns.index()];
        if node.variables.contains_key(name) {
            return false;
        }
        node.lv_index += 1;
        els.var_mut(var).index = node.lv_index;
        node.variables.insert(name.to_owned(), var);
        true
    }

    pub fn add_struct(&mut self, ns: NsId, name: &str, def: StructId) -> bool {
        let node = &mut self.nodes[ns.index()];
        if node.structs.contains_key(name) {
            return false;
        }
        node.structs.insert(name.to_owned(), def);
        true
    }

    pub fn add_enum(&mut self, ns: NsId, name: &str, def: crate::element::EnumId) -> bool {
        let node = &mut self.nodes[ns.index()];
        if node.enums.contains_key(name) {
            return false;
        }
        node.enums.insert(name.to_owned(), def);
        true
    }

    // --- lookup -----------------------------------------------------------

    pub fn get_variable(&self, ns: NsId, name: &str) -> Option<VarId> {
        self.get(ns).variables.get(name).copied()
    }

    pub fn get_struct(&self, ns: NsId, name: &str) -> Option<StructId> {
        self.get(ns).structs.get(name).copied()
    }

    pub fn get_enum(&self, ns: NsId, name: &str) -> Option<crate::element::EnumId> {
        self.get(ns).enums.get(name).copied()
    }

    /// Overload resolution within one namespace.
    ///
    /// Without argument types, returns the most recent matching definition,
    /// falling back to a declaration. With argument types, matches
    /// element-wise with the can-be-passed-from rule, preferring exact
    /// definitions, then exact declarations, then the varargs candidate
    /// with the most fixed arguments matched. `is_macro` restricts the
    /// search to macros only when set (there is never a need for the
    /// reverse restriction once types are known).
    pub fn get_function_in(
        &self,
        els: &Elements,
        types: &TypeRegistry,
        ns: NsId,
        name: &str,
        arg_types: Option<&[crate::types::TypeId]>,
        is_macro: bool,
    ) -> OverloadMatch {
        let mut result = OverloadMatch {
            closest_count: -1,
            ..OverloadMatch::default()
        };
        let Some(list) = self.get(ns).functions.get(name) else {
            return result;
        };
        if list.is_empty() {
            return result;
        }

        let Some(arg_types) = arg_types else {
            let mut last_declaration = None;
            for &candidate in list.iter().rev() {
                let f = els.function(candidate);
                if f.is_macro == is_macro {
                    if !f.is_declaration() {
                        result.found = Some(candidate);
                        return result;
                    }
                    if last_declaration.is_none() {
                        last_declaration = Some(candidate);
                    }
                }
            }
            result.found = last_declaration;
            return result;
        };

        let mut best_va: Option<FnId> = None;
        let mut best_va_count: i64 = -1;
        let mut decl_fn: Option<FnId> = None;

        for &candidate in list {
            let f = els.function(candidate);
            if is_macro && !f.is_macro {
                continue;
            }
            let params = if f.is_macro { &f.params[1..] } else { &f.params[..] };

            let mut matched: i64 = 0;
            let mut args = arg_types.iter();
            let mut broke_on_va = false;
            let mut broke_on_failure = false;
            let mut pending_arg = args.next();
            for &param in params {
                let param_ty = els.var(param).ty;
                if types.is_varargs_marker(param_ty) {
                    if matched > best_va_count {
                        best_va_count = matched;
                        best_va = Some(candidate);
                        broke_on_va = true;
                    } else {
                        broke_on_failure = true;
                    }
                    break;
                }
                let Some(&arg) = pending_arg else {
                    broke_on_failure = true;
                    break;
                };
                if types.can_be_passed_from(param_ty, arg, true) {
                    matched += 1;
                    pending_arg = args.next();
                } else {
                    broke_on_failure = true;
                    break;
                }
            }

            if !broke_on_failure && !broke_on_va && pending_arg.is_none() {
                if f.is_declaration() {
                    decl_fn = Some(candidate);
                } else {
                    result.found = Some(candidate);
                    return result;
                }
            }
            if broke_on_failure && matched > result.closest_count {
                result.closest_count = matched;
                result.closest = Some(candidate);
            }
        }

        result.found = best_va.or(decl_fn);
        result
    }

    /// Collects the namespace's variables in reverse declaration order,
    /// which is destructor order.
    pub fn get_variables(&self, ns: NsId) -> Vec<VarId> {
        self.get(ns).variables.values().rev().copied().collect()
    }

    /// Variables with `index >= index`, this namespace and upwards.
    pub fn get_vars_after_index(&self, els: &Elements, ns: NsId, index: u32, out: &mut Vec<VarId>) {
        let node = self.get(ns);
        for &var in node.variables.values().rev() {
            let v = els.var(var);
            if v.index != 0 && v.index >= index {
                out.push(var);
            }
        }
        if let Some(parent) = node.parent {
            self.get_vars_after_index(els, parent, index, out);
        }
    }

    /// Variables with `index <= index`, this namespace and upwards.
    pub fn get_vars_before_index(&self, els: &Elements, ns: NsId, index: u32, out: &mut Vec<VarId>) {
        let node = self.get(ns);
        for &var in node.variables.values() {
            let v = els.var(var);
            if v.index != 0 && v.index <= index {
                out.push(var);
            }
        }
        if let Some(parent) = node.parent {
            self.get_vars_before_index(els, parent, index, out);
        }
    }

    // --- mangling ---------------------------------------------------------

    /// Mangles a plain name in this namespace: the fixed `_Z` prefix, the
    /// namespace chain wrapped in `N`/`E` when nested, then the
    /// length-prefixed, escaped name.
    pub fn name_to_symbol(&self, ns: NsId, name: &str) -> String {
        let node = self.get(ns);
        let mut out = String::from("_Z");
        let nested = !node.symbol_prefix.is_empty();
        if nested {
            out.push('N');
            out.push_str(&node.symbol_prefix);
        }
        out.push_str(&name.len().to_string());
        encode_standard(name, &mut out);
        if nested {
            out.push('E');
        }
        out
    }

    /// Mangles a function name: extern-C names pass through raw (with `-`
    /// mapped to `_2D_`); everything else appends each parameter type's
    /// encoded form.
    pub fn function_name_to_symbol(
        &self,
        els: &Elements,
        types: &TypeRegistry,
        ns: NsId,
        name: &str,
        linkage: Linkage,
        params: &[VarId],
    ) -> String {
        if linkage == Linkage::ExternC {
            let mut out = String::new();
            for c in name.chars() {
                if c == '-' {
                    out.push_str("_2D_");
                } else {
                    out.push(c);
                }
            }
            return out;
        }
        let mut out = self.name_to_symbol(ns, name);
        for &param in params {
            types.encode_symbol(els.var(param).ty, &mut out);
        }
        out
    }

    // --- module support ---------------------------------------------------

    /// Imports externally-linked bindings of `src` into `dst`. Intern
    /// bindings are skipped; existing names win for variables, structs, and
    /// enums; functions go through normal overload insertion.
    pub fn merge(
        &mut self,
        els: &mut Elements,
        types: &TypeRegistry,
        dst: NsId,
        src: NsId,
    ) -> Result<(), AddFunctionError> {
        if self.get(src).lv_index > self.get(dst).lv_index {
            self.get_mut(dst).lv_index += 1;
        }

        let fn_entries: Vec<(String, Vec<FnId>)> = self
            .get(src)
            .functions
            .iter()
            .map(|(n, fns)| (n.clone(), fns.clone()))
            .collect();
        for (name, fns) in fn_entries {
            for f in fns {
                if !els.function(f).linkage.is_extern_any() {
                    continue;
                }
                self.add_function(els, types, dst, &name, f)?;
            }
        }

        let enum_entries: Vec<(String, crate::element::EnumId)> = self
            .get(src)
            .enums
            .iter()
            .map(|(n, &e)| (n.clone(), e))
            .collect();
        for (name, e) in enum_entries {
            if els.enum_def(e).linkage.is_extern() && self.get_enum(dst, &name).is_none() {
                self.add_enum(dst, &name, e);
            }
        }

        let var_entries: Vec<(String, VarId)> = self
            .get(src)
            .variables
            .iter()
            .map(|(n, &v)| (n.clone(), v))
            .collect();
        for (name, v) in var_entries {
            if els.var(v).linkage.is_extern_any() && self.get_variable(dst, &name).is_none() {
                self.add_variable(els, dst, &name, v);
            }
        }

        let struct_entries: Vec<(String, StructId)> = self
            .get(src)
            .structs
            .iter()
            .map(|(n, &s)| (n.clone(), s))
            .collect();
        for (name, s) in struct_entries {
            if els.struct_def(s).linkage.is_extern() && self.get_struct(dst, &name).is_none() {
                self.add_struct(dst, &name, s);
            }
        }

        // Child namespaces merge recursively into same-named children.
        let child_entries: Vec<(String, NsId)> = self
            .get(src)
            .children
            .iter()
            .map(|(n, &c)| (n.clone(), c))
            .collect();
        for (name, src_child) in child_entries {
            let dst_child = self.child(dst, &name);
            self.merge(els, types, dst_child, src_child)?;
        }
        Ok(())
    }

    /// Drops the IR bodies of macros in this namespace (and, when
    /// `and_cto`, of compile-time-only functions) that are no longer needed
    /// for runtime.
    pub fn erase_macro_bodies(&self, els: &mut Elements, ir: &mut IrModule, ns: NsId, and_cto: bool) {
        for &f in self.get(ns).functions_ordered.iter().rev() {
            let function = els.function_mut(f);
            if !(function.is_macro || (and_cto && function.cto)) {
                continue;
            }
            let Some(ir_fn) = function.ir else {
                continue;
            };
            if !and_cto {
                function.ir = None;
            }
            if ir.get_function(&function.internal_name).is_some() {
                ir.erase_function(ir_fn);
            }
        }
        let children: Vec<NsId> = self.get(ns).children.values().copied().collect();
        for child in children {
            self.erase_macro_bodies(els, ir, child, and_cto);
        }
    }

    /// Drops the IR bodies of re-included bindings whose once-tag is
    /// already recorded.
    pub fn erase_once_bodies(&self, els: &Elements, ir: &mut IrModule, ns: NsId, once_tags: &ahash::AHashSet<String>) {
        let node = self.get(ns);
        for &f in &node.functions_ordered {
            let function = els.function(f);
            if function.internal_name.is_empty() {
                continue;
            }
            if let Some(tag) = &function.once_tag {
                if once_tags.contains(tag) {
                    if let Some(ir_fn) = function.ir {
                        ir.delete_body(ir_fn);
                    }
                }
            }
        }
        for &v in node.variables.values() {
            let var = els.var(v);
            if var.internal_name.is_empty() {
                continue;
            }
            if let Some(tag) = &var.once_tag {
                if once_tags.contains(tag) {
                    if let Some(global) = var.global {
                        ir.global_mut(global).init = None;
                    }
                }
            }
        }
        for &child in node.children.values() {
            self.erase_once_bodies(els, ir, child, once_tags);
        }
    }

    /// Prunes this namespace's bindings down to `wanted`, recording in
    /// `found` each wanted name that an extern binding satisfied.
    pub fn remove_unneeded(
        &mut self,
        els: &Elements,
        ns: NsId,
        wanted: &ahash::AHashSet<String>,
        found: &mut ahash::AHashSet<String>,
    ) {
        let node = &mut self.nodes[ns.index()];
        node.functions.retain(|name, fns| {
            if !wanted.contains(name) {
                return false;
            }
            if fns.iter().any(|&f| els.function(f).linkage.is_extern_any()) {
                found.insert(name.clone());
            }
            true
        });
        node.variables.retain(|name, &mut v| {
            if !wanted.contains(name) {
                return false;
            }
            if els.var(v).linkage.is_extern_any() {
                found.insert(name.clone());
            }
            true
        });
        node.structs.retain(|name, &mut s| {
            if !wanted.contains(name) {
                return false;
            }
            if els.struct_def(s).linkage.is_extern() {
                found.insert(name.clone());
            }
            true
        });
        node.enums.retain(|name, &mut e| {
            if !wanted.contains(name) {
                return false;
            }
            if els.enum_def(e).linkage.is_extern() {
                found.insert(name.clone());
            }
            true
        });
    }

    /// Re-resolves each binding's IR entity by mangled name after a module
    /// re-link. Losing a function here is an internal inconsistency.
    ///
    /// # Panics
    /// Panics when a defined function's internal name no longer resolves.
    pub fn reget_pointers(&self, els: &mut Elements, ir: &IrModule, ns: NsId) {
        let node = self.get(ns);
        for &f in &node.functions_ordered {
            let function = els.function_mut(f);
            if function.internal_name.is_empty() {
                continue;
            }
            match ir.get_function(&function.internal_name) {
                Some(ir_fn) => function.ir = Some(ir_fn),
                None => {
                    assert!(
                        function.is_declaration() || function.ir.is_none(),
                        "unable to re-get function {} after module link",
                        function.internal_name
                    );
                }
            }
        }
        for &v in node.variables.values() {
            let var = els.var_mut(v);
            if var.internal_name.is_empty() {
                continue;
            }
            if let Some(global) = ir.get_global(&var.internal_name) {
                var.global = Some(global);
                var.value = Some(crate::ir::Value::Global(global));
            }
        }
        for &child in node.children.values() {
            self.reget_pointers(els, ir, child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        element::{Function, Variable},
        types::BaseType,
    };

    fn fixture() -> (NamespaceTree, Elements, TypeRegistry) {
        (NamespaceTree::new(), Elements::default(), TypeRegistry::new())
    }

    fn make_fn(els: &mut Elements, types: &mut TypeRegistry, name: &str, param_types: &[crate::types::TypeId]) -> FnId {
        let int = types.basic(BaseType::Int);
        let params = param_types
            .iter()
            .map(|&ty| els.add_var(Variable::new("p", ty, Linkage::Auto)))
            .collect();
        let mut f = Function::new(name, int, params, Linkage::Intern);
        f.defined = true;
        els.add_fn(f)
    }

    #[test]
    fn variables_get_monotonic_indexes() {
        let (mut tree, mut els, mut types) = fixture();
        let int = types.basic(BaseType::Int);
        let a = els.add_var(Variable::new("a", int, Linkage::Auto));
        let b = els.add_var(Variable::new("b", int, Linkage::Auto));
        assert!(tree.add_variable(&mut els, ROOT_NS, "a", a));
        assert!(tree.add_variable(&mut els, ROOT_NS, "b", b));
        assert!(!tree.add_variable(&mut els, ROOT_NS, "a", b));
        assert!(els.var(a).index > 0);
        assert!(els.var(b).index > els.var(a).index);
    }

    #[test]
    fn exact_overload_beats_varargs() {
        let (mut tree, mut els, mut types) = fixture();
        let int = types.basic(BaseType::Int);
        let va = types.basic(BaseType::VarArgs);
        let exact = make_fn(&mut els, &mut types, "f", &[int, int]);
        let variadic = make_fn(&mut els, &mut types, "f", &[int, va]);
        tree.add_function(&mut els, &types, ROOT_NS, "f", variadic).unwrap();
        tree.add_function(&mut els, &types, ROOT_NS, "f", exact).unwrap();
        let m = tree.get_function_in(&els, &types, ROOT_NS, "f", Some(&[int, int]), false);
        assert_eq!(m.found, Some(exact));
        let m = tree.get_function_in(&els, &types, ROOT_NS, "f", Some(&[int, int, int]), false);
        assert_eq!(m.found, Some(variadic));
    }

    #[test]
    fn definition_supersedes_declaration() {
        let (mut tree, mut els, mut types) = fixture();
        let int = types.basic(BaseType::Int);
        let decl = make_fn(&mut els, &mut types, "f", &[int]);
        els.function_mut(decl).defined = false;
        let def = make_fn(&mut els, &mut types, "f", &[int]);
        tree.add_function(&mut els, &types, ROOT_NS, "f", decl).unwrap();
        tree.add_function(&mut els, &types, ROOT_NS, "f", def).unwrap();
        let m = tree.get_function_in(&els, &types, ROOT_NS, "f", Some(&[int]), false);
        assert_eq!(m.found, Some(def));
        assert_eq!(tree.get(ROOT_NS).functions["f"].len(), 1);
    }

    #[test]
    fn macro_function_collision_is_rejected() {
        let (mut tree, mut els, mut types) = fixture();
        let int = types.basic(BaseType::Int);
        let plain = make_fn(&mut els, &mut types, "f", &[int]);
        tree.add_function(&mut els, &types, ROOT_NS, "f", plain).unwrap();
        // A macro whose single non-implicit parameter type matches.
        let ctx_ty = types.struct_ref("MContext", vec![]);
        let p_ctx = types.pointer_to(ctx_ty);
        let mac = make_fn(&mut els, &mut types, "f", &[p_ctx, int]);
        els.function_mut(mac).is_macro = true;
        assert_eq!(
            tree.add_function(&mut els, &types, ROOT_NS, "f", mac),
            Err(AddFunctionError::SameParamsAsFunction)
        );
    }

    #[test]
    fn mangling_is_deterministic_and_namespaced() {
        let (mut tree, els, mut types) = fixture();
        let geo = tree.child(ROOT_NS, "geo");
        assert_eq!(tree.name_to_symbol(ROOT_NS, "main"), "_Z4main");
        assert_eq!(tree.name_to_symbol(geo, "area"), "_ZN3geo4areaE");
        // Non-alphanumerics escape as $<hex>.
        assert_eq!(tree.name_to_symbol(ROOT_NS, "p+"), "_Z2p$2b");
        let int = types.basic(BaseType::Int);
        let mut els = els;
        let v = els.add_var(Variable::new("x", int, Linkage::Auto));
        let sym = tree.function_name_to_symbol(&els, &types, ROOT_NS, "inc", Linkage::Intern, &[v]);
        assert_eq!(sym, "_Z3inci");
        let sym = tree.function_name_to_symbol(&els, &types, ROOT_NS, "do-thing", Linkage::ExternC, &[v]);
        assert_eq!(sym, "do_2D_thing");
    }
}
