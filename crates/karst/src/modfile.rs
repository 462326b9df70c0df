//! Compile-time module files.
//!
//! A `.ktm` file is a serialized snapshot of a namespace: extern
//! functions, structs, enums, and variables, plus the once-tag set, the
//! imported module names, the compile-time-only flag, and the type-map
//! entries. Types serialize as their canonical source syntax and re-enter
//! through the type parser on load, so the format is independent of
//! registry ids. Encoding is postcard; serialization is deterministic
//! (ordered maps, sorted children), so an unchanged namespace round-trips
//! byte-equal.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{
    element::{EnumDef, EnumLinkage, Function, Linkage, StructDef, StructLinkage, Variable},
    error::{CResult, ErrorKind},
    ir::Value,
    namespace::{NsId, ROOT_NS},
    node::Span,
    run::Session,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleFile {
    pub name: String,
    pub root: SerializedNamespace,
    pub once_tags: Vec<String>,
    pub imports: Vec<String>,
    pub cto: bool,
    pub typemap: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedNamespace {
    pub name: String,
    pub functions: Vec<SerializedFunction>,
    pub variables: Vec<SerializedVariable>,
    pub structs: Vec<SerializedStruct>,
    pub enums: Vec<SerializedEnum>,
    pub children: Vec<SerializedNamespace>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedFunction {
    pub name: String,
    pub return_type: String,
    /// Parameter (name, type-syntax) pairs.
    pub params: Vec<(String, String)>,
    pub is_macro: bool,
    pub always_inline: bool,
    pub cto: bool,
    pub linkage: Linkage,
    pub internal_name: String,
    pub once_tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedVariable {
    pub name: String,
    pub ty: String,
    pub linkage: Linkage,
    pub internal_name: String,
    pub once_tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedStruct {
    pub name: String,
    pub members: Vec<(String, String)>,
    pub must_init: bool,
    pub is_opaque: bool,
    pub linkage: StructLinkage,
    pub internal_name: String,
    pub once_tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedEnum {
    pub name: String,
    pub underlying: String,
    pub members: Vec<(String, i64)>,
    pub linkage: EnumLinkage,
    pub once_tag: Option<String>,
}

impl Session {
    // --- writing ----------------------------------------------------------

    /// Snapshots the externally visible contents of the root namespace.
    pub fn module_snapshot(&self) -> ModuleFile {
        let mut once_tags: Vec<String> = self.once_tags.iter().cloned().collect();
        once_tags.sort_unstable();
        let mut typemap: Vec<(String, String)> = self
            .types
            .typemap_entries()
            .map(|(from, to)| (from.to_owned(), to.to_owned()))
            .collect();
        typemap.sort_unstable();
        ModuleFile {
            name: self.module_name.clone(),
            root: self.serialize_namespace(ROOT_NS),
            once_tags,
            imports: self.imports.clone(),
            cto: self.cto_module,
            typemap,
        }
    }

    fn serialize_namespace(&self, ns: NsId) -> SerializedNamespace {
        let node = self.tree.get(ns);
        let functions = node
            .functions_ordered
            .iter()
            .map(|&f| self.els.function(f))
            .filter(|f| f.serialize && f.linkage.is_extern_any())
            .map(|f| SerializedFunction {
                name: f.name.clone(),
                return_type: self.types.display(f.return_type),
                params: f
                    .params
                    .iter()
                    .map(|&p| {
                        let var = self.els.var(p);
                        (var.name.clone(), self.types.display(var.ty))
                    })
                    .collect(),
                is_macro: f.is_macro,
                always_inline: f.always_inline,
                cto: f.cto,
                linkage: f.linkage,
                internal_name: f.internal_name.clone(),
                once_tag: f.once_tag.clone(),
            })
            .collect();
        let variables = node
            .variables
            .values()
            .map(|&v| self.els.var(v))
            .filter(|v| v.serialize && v.linkage.is_extern_any())
            .map(|v| SerializedVariable {
                name: v.name.clone(),
                ty: self.types.display(v.ty),
                linkage: v.linkage,
                internal_name: v.internal_name.clone(),
                once_tag: v.once_tag.clone(),
            })
            .collect();
        let structs = node
            .structs
            .values()
            .map(|&s| self.els.struct_def(s))
            .filter(|s| s.serialize && s.linkage.is_extern())
            .map(|s| SerializedStruct {
                name: s.name.clone(),
                members: s
                    .members
                    .iter()
                    .map(|(name, &ty)| (name.clone(), self.types.display(ty)))
                    .collect(),
                must_init: s.must_init,
                is_opaque: s.is_opaque,
                linkage: s.linkage,
                internal_name: s.internal_name.clone(),
                once_tag: s.once_tag.clone(),
            })
            .collect();
        let enums = node
            .enums
            .values()
            .map(|&e| self.els.enum_def(e))
            .filter(|e| e.serialize && e.linkage.is_extern())
            .map(|e| SerializedEnum {
                name: e.name.clone(),
                underlying: self.types.display(e.underlying),
                members: e.members.iter().map(|(name, &value)| (name.clone(), value)).collect(),
                linkage: e.linkage,
                once_tag: e.once_tag.clone(),
            })
            .collect();
        let mut child_names: Vec<&String> = node.children.keys().collect();
        child_names.sort_unstable();
        let children = child_names
            .into_iter()
            .filter(|name| !name.starts_with("anon"))
            .map(|name| self.serialize_namespace(node.children[name]))
            .collect();
        SerializedNamespace {
            name: node.name.clone(),
            functions,
            variables,
            structs,
            enums,
            children,
        }
    }

    /// Writes the module snapshot next to the bitcode artifacts.
    pub fn write_module(&self, dir: &std::path::Path) -> std::io::Result<PathBuf> {
        let snapshot = self.module_snapshot();
        let bytes = postcard::to_allocvec(&snapshot)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        let path = dir.join(format!("lib{}.ktm", self.module_name));
        std::fs::write(&path, bytes)?;
        Ok(path)
    }

    // --- importing --------------------------------------------------------

    /// Handles `(import NAME [(FORMS...)])`.
    pub(crate) fn parse_import(&mut self, node: &crate::node::Node) -> CResult<()> {
        let list = node.as_list().expect("checked by caller");
        if list.len() < 2 || list.len() > 3 {
            return Err(self.report(ErrorKind::IncorrectNumberOfArgs, node.span));
        }
        let Some(name) = list[1].as_symbol().map(str::to_owned) else {
            return Err(self.report(ErrorKind::InvalidModuleName, list[1].span));
        };
        let wanted: Option<Vec<String>> = match list.get(2) {
            Some(forms_node) => {
                let Some(forms) = forms_node.as_list() else {
                    return Err(self.report(ErrorKind::UnexpectedElement, forms_node.span));
                };
                let mut names = Vec::with_capacity(forms.len());
                for form in forms {
                    let Some(form_name) = form.as_symbol() else {
                        return Err(self.report(ErrorKind::UnexpectedElement, form.span));
                    };
                    names.push(form_name.to_owned());
                }
                Some(names)
            }
            None => None,
        };

        let mut found = None;
        for dir in &self.module_paths {
            for candidate in [dir.join(format!("lib{name}.ktm")), dir.join(format!("{name}.ktm"))] {
                if candidate.exists() {
                    found = Some(candidate);
                    break;
                }
            }
            if found.is_some() {
                break;
            }
        }
        let Some(path) = found else {
            return Err(self.report_detail(ErrorKind::CannotFindModule, list[1].span, name));
        };
        let bytes = std::fs::read(&path)
            .map_err(|e| self.report_detail(ErrorKind::CannotFindModule, list[1].span, e.to_string()))?;
        let module: ModuleFile = postcard::from_bytes(&bytes)
            .map_err(|e| self.report_detail(ErrorKind::CannotLinkModules, list[1].span, e.to_string()))?;
        self.import_module(&module, wanted.as_deref(), node.span)
    }

    /// Merges a deserialized module into the root namespace. Once-tags
    /// union across re-import chains; bindings whose tag is already
    /// present are pruned; `wanted` restricts the import to named forms.
    pub fn import_module(&mut self, module: &ModuleFile, wanted: Option<&[String]>, span: Span) -> CResult<()> {
        if self.imports.iter().any(|m| m == &module.name) {
            return Ok(());
        }
        self.imports.push(module.name.clone());
        for (from, to) in &module.typemap {
            self.types.add_typemap_entry(from.clone(), to.clone());
        }

        let mut satisfied = ahash::AHashSet::new();
        self.import_namespace(&module.root, ROOT_NS, wanted, &mut satisfied, span)?;

        if let Some(wanted) = wanted {
            if let Some(missing) = wanted.iter().find(|w| !satisfied.contains(w.as_str())) {
                return Err(self.report_detail(
                    ErrorKind::ModuleDoesNotProvideForms,
                    span,
                    format!("{}: {missing}", module.name),
                ));
            }
        }

        // Union after pruning so a tag carried by this module's elements
        // blocks the next re-import, not this one.
        for tag in &module.once_tags {
            self.once_tags.insert(tag.clone());
        }
        for import in &module.imports {
            if !self.imports.contains(import) {
                self.imports.push(import.clone());
            }
        }
        Ok(())
    }

    fn import_namespace(
        &mut self,
        serialized: &SerializedNamespace,
        dst: NsId,
        wanted: Option<&[String]>,
        satisfied: &mut ahash::AHashSet<String>,
        span: Span,
    ) -> CResult<()> {
        let nested = dst != ROOT_NS;
        let keep = |name: &str| nested || wanted.is_none_or(|w| w.iter().any(|x| x == name));
        let known_tags = self.once_tags.clone();
        let pruned = move |tag: &Option<String>| tag.as_ref().is_some_and(|t| known_tags.contains(t));

        // Structs and enums first: function and variable types may
        // reference them.
        for s in &serialized.structs {
            if !keep(&s.name) || pruned(&s.once_tag) {
                continue;
            }
            satisfied.insert(s.name.clone());
            if self.tree.get_struct(dst, &s.name).is_some() {
                continue;
            }
            let def = StructDef {
                name: s.name.clone(),
                members: indexmap::IndexMap::new(),
                must_init: s.must_init,
                is_opaque: true,
                linkage: s.linkage,
                internal_name: s.internal_name.clone(),
                once_tag: s.once_tag.clone(),
                serialize: true,
            };
            let id = self.els.add_struct(def);
            self.tree.add_struct(dst, &s.name, id);
        }
        // Second pass fills in member types now that all names resolve.
        for s in &serialized.structs {
            if !keep(&s.name) || pruned(&s.once_tag) || s.is_opaque {
                continue;
            }
            let Some(struct_id) = self.tree.get_struct(dst, &s.name) else {
                continue;
            };
            if !self.els.struct_def(struct_id).is_opaque {
                continue;
            }
            let mut members = indexmap::IndexMap::new();
            for (member_name, ty_text) in &s.members {
                let ty = self.parse_type_text(ty_text, span)?;
                members.insert(member_name.clone(), ty);
            }
            let def = self.els.struct_def_mut(struct_id);
            def.members = members;
            def.is_opaque = false;
        }

        for e in &serialized.enums {
            if !keep(&e.name) || pruned(&e.once_tag) {
                continue;
            }
            satisfied.insert(e.name.clone());
            if self.tree.get_enum(dst, &e.name).is_some() {
                continue;
            }
            let underlying = self.parse_type_text(&e.underlying, span)?;
            let mut members = indexmap::IndexMap::new();
            for (member_name, value) in &e.members {
                members.insert(member_name.clone(), *value);
            }
            let def = EnumDef {
                name: e.name.clone(),
                underlying,
                members,
                linkage: e.linkage,
                once_tag: e.once_tag.clone(),
                serialize: true,
            };
            let id = self.els.add_enum(def);
            self.tree.add_enum(dst, &e.name, id);
        }

        for v in &serialized.variables {
            if !keep(&v.name) || pruned(&v.once_tag) {
                continue;
            }
            satisfied.insert(v.name.clone());
            if self.tree.get_variable(dst, &v.name).is_some() {
                continue;
            }
            let ty = self.parse_type_text(&v.ty, span)?;
            let global = match self.ir.get_global(&v.internal_name) {
                Some(existing) => existing,
                None => self
                    .ir
                    .add_global(v.internal_name.clone(), ty, None, false, v.linkage.to_ir()),
            };
            let var = Variable {
                internal_name: v.internal_name.clone(),
                value: Some(Value::Global(global)),
                global: Some(global),
                once_tag: v.once_tag.clone(),
                ..Variable::new(v.name.clone(), ty, v.linkage)
            };
            let var_id = self.els.add_var(var);
            self.tree.add_variable(&mut self.els, dst, &v.name, var_id);
        }

        for f in &serialized.functions {
            if !keep(&f.name) || pruned(&f.once_tag) {
                continue;
            }
            satisfied.insert(f.name.clone());
            let return_type = self.parse_type_text(&f.return_type, span)?;
            let mut params = Vec::with_capacity(f.params.len());
            for (param_name, ty_text) in &f.params {
                let ty = self.parse_type_text(ty_text, span)?;
                params.push(self.els.add_var(Variable::new(param_name.clone(), ty, Linkage::Auto)));
            }
            let param_types: Vec<crate::types::TypeId> = params.iter().map(|&p| self.els.var(p).ty).collect();
            let varargs = self.types.params_are_varargs(&param_types);
            let ir_fn = match self.ir.get_function(&f.internal_name) {
                Some(existing) => existing,
                None => self.ir.add_function(
                    f.internal_name.clone(),
                    param_types
                        .iter()
                        .copied()
                        .filter(|&t| !self.types.is_varargs_marker(t))
                        .collect(),
                    return_type,
                    varargs,
                    f.linkage.to_ir(),
                ),
            };
            let mut function = Function::new(f.name.clone(), return_type, params, f.linkage);
            function.is_macro = f.is_macro;
            function.always_inline = f.always_inline;
            function.cto = f.cto;
            function.ir = Some(ir_fn);
            function.internal_name = f.internal_name.clone();
            function.once_tag = f.once_tag.clone();
            let fn_id = self.els.add_fn(function);
            if self
                .tree
                .add_function(&mut self.els, &self.types, dst, &f.name, fn_id)
                .is_err()
            {
                return Err(self.report_detail(ErrorKind::CannotLinkModules, span, f.name.clone()));
            }
        }

        for child in &serialized.children {
            let dst_child = self.tree.child(dst, &child.name);
            self.import_namespace(child, dst_child, wanted, satisfied, span)?;
        }
        Ok(())
    }

    fn parse_type_text(&mut self, text: &str, span: Span) -> CResult<crate::types::TypeId> {
        let errors = self.reporter.error_count();
        let node = crate::reader::read_one(text, &mut self.reporter).map_err(|f| {
            self.reporter.truncate(errors);
            self.report_detail(ErrorKind::CannotLinkModules, span, format!("bad type syntax {text}"));
            f
        })?;
        self.parse_type(&node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trips_byte_equal() {
        let mut session = Session::new();
        session.compile_str(
            "(module geo)\n(def origin (var extern int 0))\n(def Pair (struct extern ((a int) (b int))))",
            "geo.ka",
        );
        let first = session.module_snapshot();
        let bytes = postcard::to_allocvec(&first).unwrap();
        let reread: ModuleFile = postcard::from_bytes(&bytes).unwrap();
        let bytes_again = postcard::to_allocvec(&reread).unwrap();
        assert_eq!(bytes, bytes_again);
        assert_eq!(first, reread);
    }
}
