//! The compilation session and top-level driver.
//!
//! A [`Session`] owns every piece of process state the original kept
//! global: the type registry, the namespace tree and active context, the
//! IR module, the diagnostic reporter, the once-tag sets, the string
//! literal cache, and the temporary-name counters. Tests construct a fresh
//! session per case.
//!
//! The driver walks top-level forms in source order: `module`, `import`,
//! `include`, `once`, `namespace`, `using-namespace`, `def`, and `do`.

use std::path::{Path, PathBuf};

use ahash::{AHashMap, AHashSet};

use crate::{
    backend::{JitEngine, NoJit},
    context::Context,
    element::{Elements, Function, Linkage, StructDef, StructId, StructLinkage, Variable},
    error::{CResult, Diagnostic, ErrorKind, Failed, Reporter},
    ir::{
        ArithOp, Builder, CmpPred, ConstValue, DataLayout, GlobalId, GlobalInit, IrLinkage, IrModule, StructSource,
        Value,
    },
    namespace::{NamespaceTree, ROOT_NS},
    node::{Node, Span},
    reader,
    types::{BaseType, TypeId, TypeRegistry},
};

/// Core forms recognized directly by the evaluator; macros may not take
/// these names.
pub const CORE_FORMS: &[&str] = &[
    "goto",
    "label",
    "return",
    "setf",
    "@",
    ":",
    "#",
    "$",
    "p=",
    "p+",
    "p-",
    "p<",
    "p>",
    "va-arg",
    "va-start",
    "va-end",
    "null",
    "nullptr",
    "get-dnodes",
    "def",
    "if",
    "do",
    "cast",
    "sizeof",
    "offsetof",
    "alignmentof",
    "funcall",
    "using-namespace",
    "new-scope",
    "array-of",
    "setv",
    "@$",
    ":@",
    "@:",
    "@:@",
];

/// Cached ids of the frequently used basic types, plus the macro wire
/// types declared at bootstrap.
#[derive(Debug, Clone, Copy)]
pub struct CommonTypes {
    pub void_: TypeId,
    pub bool_: TypeId,
    pub char_: TypeId,
    pub int_: TypeId,
    pub uint: TypeId,
    pub intptr: TypeId,
    pub size: TypeId,
    pub ptrdiff: TypeId,
    pub float_: TypeId,
    pub double_: TypeId,
    pub long_double: TypeId,
    pub varargs: TypeId,
    pub pchar: TypeId,
    pub dnode: TypeId,
    pub pdnode: TypeId,
    pub mcontext: TypeId,
    pub pmcontext: TypeId,
}

/// One compilation session; owns all compiler state.
pub struct Session {
    pub types: TypeRegistry,
    pub els: Elements,
    pub tree: NamespaceTree,
    pub ctx: Context,
    pub ir: IrModule,
    pub reporter: Reporter,
    pub backend: Box<dyn JitEngine>,
    pub layout: DataLayout,
    pub common: CommonTypes,
    pub module_name: String,
    pub cto_module: bool,
    /// Names of modules imported so far.
    pub imports: Vec<String>,
    /// Include-guard tags recorded in this session.
    pub once_tags: AHashSet<String>,
    /// Tag applied to elements currently being defined, when inside a
    /// `once`-guarded file.
    pub current_once_tag: Option<String>,
    pub module_paths: Vec<PathBuf>,
    pub include_paths: Vec<PathBuf>,
    pub has_defined_extern_macro: bool,
    pub(crate) string_cache: AHashMap<String, GlobalId>,
    pub(crate) anon_fn_count: u32,
    pub(crate) tmp_count: u32,
    /// Set by `once` when the rest of the current file must be skipped.
    pub(crate) skip_rest_of_file: bool,
}

/// Immutable view for layout queries; resolves struct member types through
/// the namespace tree.
pub(crate) struct StructView<'a> {
    pub tree: &'a NamespaceTree,
    pub els: &'a Elements,
}

impl StructSource for StructView<'_> {
    fn struct_member_types(&self, name: &str, namespaces: &[String]) -> Option<Vec<TypeId>> {
        let mut ns = ROOT_NS;
        for part in namespaces {
            ns = *self.tree.get(ns).children.get(part)?;
        }
        let def = self.els.struct_def(self.tree.get_struct(ns, name)?);
        if def.is_opaque {
            return None;
        }
        Some(def.members.values().copied().collect())
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_engine(Box::new(NoJit))
    }

    pub fn with_engine(backend: Box<dyn JitEngine>) -> Self {
        let mut types = TypeRegistry::new();
        let void_ = types.basic(BaseType::Void);
        let bool_ = types.basic(BaseType::Bool);
        let char_ = types.basic(BaseType::Char);
        let int_ = types.basic(BaseType::Int);
        let uint = types.basic(BaseType::UInt);
        let intptr = types.basic(BaseType::IntPtr);
        let size = types.basic(BaseType::Size);
        let ptrdiff = types.basic(BaseType::PtrDiff);
        let float_ = types.basic(BaseType::Float);
        let double_ = types.basic(BaseType::Double);
        let long_double = types.basic(BaseType::LongDouble);
        let varargs = types.basic(BaseType::VarArgs);
        let pchar = types.pointer_to(char_);
        let dnode = types.struct_ref("DNode", vec![]);
        let pdnode = types.pointer_to(dnode);
        let mcontext = types.struct_ref("MContext", vec![]);
        let pmcontext = types.pointer_to(mcontext);

        let common = CommonTypes {
            void_,
            bool_,
            char_,
            int_,
            uint,
            intptr,
            size,
            ptrdiff,
            float_,
            double_,
            long_double,
            varargs,
            pchar,
            dnode,
            pdnode,
            mcontext,
            pmcontext,
        };

        let mut session = Self {
            types,
            els: Elements::default(),
            tree: NamespaceTree::new(),
            ctx: Context::new(),
            ir: IrModule::new(),
            reporter: Reporter::new("<input>"),
            backend,
            layout: DataLayout::default(),
            common,
            module_name: "main".to_owned(),
            cto_module: false,
            imports: Vec::new(),
            once_tags: AHashSet::new(),
            current_once_tag: None,
            module_paths: vec![PathBuf::from(".")],
            include_paths: vec![PathBuf::from(".")],
            has_defined_extern_macro: false,
            string_cache: AHashMap::new(),
            anon_fn_count: 0,
            tmp_count: 0,
            skip_rest_of_file: false,
        };
        session.add_common_declarations();
        session.add_builtin_ops();
        session
    }

    /// Declares the macro wire types (`DNode`, `MContext`) and the varargs
    /// plumbing type, which bootstrap everything macros touch.
    fn add_common_declarations(&mut self) {
        let int_ = self.common.int_;
        let pchar = self.common.pchar;
        let pdnode = self.common.pdnode;
        let mut dnode_members = indexmap::IndexMap::new();
        dnode_members.insert("is-list".to_owned(), int_);
        dnode_members.insert("token-str".to_owned(), pchar);
        dnode_members.insert("list-node".to_owned(), pdnode);
        dnode_members.insert("next-node".to_owned(), pdnode);
        for field in [
            "begin-line",
            "begin-column",
            "end-line",
            "end-column",
            "macro-begin-line",
            "macro-begin-column",
            "macro-end-line",
            "macro-end-column",
        ] {
            dnode_members.insert(field.to_owned(), int_);
        }
        let dnode_def = StructDef {
            name: "DNode".to_owned(),
            members: dnode_members,
            must_init: false,
            is_opaque: false,
            linkage: StructLinkage::Extern,
            internal_name: "struct_DNode".to_owned(),
            once_tag: None,
            serialize: false,
        };
        let dnode_id = self.els.add_struct(dnode_def);
        self.tree.add_struct(ROOT_NS, "DNode", dnode_id);

        for name in ["MContext", "PoolNode", "va-list"] {
            let def = StructDef {
                name: name.to_owned(),
                members: indexmap::IndexMap::new(),
                must_init: false,
                is_opaque: true,
                linkage: StructLinkage::Opaque,
                internal_name: format!("struct_{name}"),
                once_tag: None,
                serialize: false,
            };
            let id = self.els.add_struct(def);
            self.tree.add_struct(ROOT_NS, name, id);
        }
    }

    /// Defines the built-in arithmetic and comparison operators for each
    /// numeric type. These are ordinary overloaded functions with tiny IR
    /// bodies, so user code and macros resolve them like anything else.
    fn add_builtin_ops(&mut self) {
        let numeric = [
            self.common.char_,
            self.common.int_,
            self.common.uint,
            self.common.intptr,
            self.common.size,
            self.common.ptrdiff,
            self.types.basic(BaseType::Int8),
            self.types.basic(BaseType::Int16),
            self.types.basic(BaseType::Int32),
            self.types.basic(BaseType::Int64),
            self.types.basic(BaseType::UInt8),
            self.types.basic(BaseType::UInt16),
            self.types.basic(BaseType::UInt32),
            self.types.basic(BaseType::UInt64),
            self.common.float_,
            self.common.double_,
            self.common.long_double,
        ];
        let arith: [(&str, ArithOp); 4] = [("+", ArithOp::Add), ("-", ArithOp::Sub), ("*", ArithOp::Mul), ("/", ArithOp::Div)];
        let cmps: [(&str, CmpPred); 6] = [
            ("=", CmpPred::Eq),
            ("!=", CmpPred::Ne),
            ("<", CmpPred::Lt),
            ("<=", CmpPred::Le),
            (">", CmpPred::Gt),
            (">=", CmpPred::Ge),
        ];
        for ty in numeric {
            let signed = self.types.is_signed_integer(ty) || self.types.is_floating(ty);
            for (name, op) in arith {
                self.add_builtin_binary(name, ty, ty, BuiltinBody::Arith(op));
            }
            for (name, pred) in cmps {
                self.add_builtin_binary(name, ty, self.common.bool_, BuiltinBody::Cmp(pred, signed));
            }
        }
    }

    fn add_builtin_binary(&mut self, name: &str, operand: TypeId, ret: TypeId, body: BuiltinBody) {
        let a = self.els.add_var(Variable::new("a", operand, Linkage::Auto));
        let b = self.els.add_var(Variable::new("b", operand, Linkage::Auto));
        let internal_name =
            self.tree
                .function_name_to_symbol(&self.els, &self.types, ROOT_NS, name, Linkage::Intern, &[a, b]);
        let ir_fn = self
            .ir
            .add_function(internal_name.clone(), vec![operand, operand], ret, false, IrLinkage::Internal);
        let entry = self.ir.function_mut(ir_fn).add_block("entry");
        let mut builder = Builder::new(&mut self.ir, ir_fn, entry);
        let result = match body {
            BuiltinBody::Arith(op) => builder.arith(op, Value::Arg(0), Value::Arg(1), ret),
            BuiltinBody::Cmp(pred, signed) => builder.cmp(pred, signed, Value::Arg(0), Value::Arg(1), ret),
        };
        builder.ret(Some(result));

        let mut function = Function::new(name, ret, vec![a, b], Linkage::Intern);
        function.ir = Some(ir_fn);
        function.internal_name = internal_name;
        function.defined = true;
        function.serialize = false;
        let id = self.els.add_fn(function);
        self.tree
            .add_function(&mut self.els, &self.types, ROOT_NS, name, id)
            .expect("builtin operators never collide");
    }

    // --- naming helpers ---------------------------------------------------

    pub(crate) fn fresh_global_name(&mut self) -> String {
        loop {
            self.tmp_count += 1;
            let name = format!("_kv{}", self.tmp_count);
            if self.ir.get_global(&name).is_none() {
                return name;
            }
        }
    }

    pub(crate) fn fresh_fn_name(&mut self, prefix: &str) -> String {
        loop {
            self.tmp_count += 1;
            let name = format!("{prefix}{}", self.tmp_count);
            if self.ir.get_function(&name).is_none() {
                return name;
            }
        }
    }

    pub(crate) fn report(&mut self, kind: ErrorKind, span: Span) -> Failed {
        self.reporter.report(Diagnostic::new(kind, span))
    }

    pub(crate) fn report_detail(&mut self, kind: ErrorKind, span: Span, detail: impl Into<String>) -> Failed {
        self.reporter.report(Diagnostic::with_detail(kind, span, detail))
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.reporter.diagnostics()
    }

    // --- layout wrappers --------------------------------------------------

    pub(crate) fn type_size(&self, ty: TypeId) -> Option<u64> {
        let view = StructView {
            tree: &self.tree,
            els: &self.els,
        };
        self.layout.size_of(&self.types, &view, ty)
    }

    pub(crate) fn type_align(&self, ty: TypeId) -> Option<u64> {
        let view = StructView {
            tree: &self.tree,
            els: &self.els,
        };
        self.layout.align_of(&self.types, &view, ty)
    }

    /// Looks up the struct definition behind a struct-typed id.
    pub(crate) fn struct_of_type(&self, ty: TypeId) -> Option<StructId> {
        let (name, namespaces) = self.types.struct_name(ty)?;
        let mut ns = ROOT_NS;
        for part in namespaces {
            ns = *self.tree.get(ns).children.get(part)?;
        }
        self.tree
            .get_struct(ns, name)
            .or_else(|| self.ctx.get_struct(&self.tree, name).map(|(_, s)| s))
    }

    // --- string literals --------------------------------------------------

    /// Returns a module-scoped read-only global holding `text` with a
    /// trailing NUL, reusing one cached per distinct literal.
    pub(crate) fn string_literal_global(&mut self, text: &str) -> (GlobalId, TypeId) {
        let len = text.len() as u64 + 1;
        let array_ty = self.types.array_of(self.common.char_, len);
        if let Some(&existing) = self.string_cache.get(text) {
            return (existing, array_ty);
        }
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        let name = self.fresh_global_name();
        let global = self
            .ir
            .add_global(name, array_ty, Some(GlobalInit::Bytes(bytes)), true, IrLinkage::Private);
        self.string_cache.insert(text.to_owned(), global);
        (global, array_ty)
    }

    // --- driver -----------------------------------------------------------

    /// Compiles a whole source string. Returns true when no diagnostics
    /// were reported.
    pub fn compile_str(&mut self, source: &str, filename: &str) -> bool {
        self.reporter.filename = filename.to_owned();
        let start_errors = self.reporter.error_count();
        let Ok(forms) = reader::read_all(source, &mut self.reporter) else {
            return false;
        };
        self.skip_rest_of_file = false;
        for form in &forms {
            if self.skip_rest_of_file {
                break;
            }
            // Errors in one form do not stop the walk; diagnostics
            // accumulate and later forms still compile.
            let _ = self.parse_top_level(form);
        }
        self.skip_rest_of_file = false;
        self.reporter.error_count() == start_errors
    }

    pub fn compile_file(&mut self, path: &Path) -> std::io::Result<bool> {
        let source = std::fs::read_to_string(path)?;
        Ok(self.compile_str(&source, &path.to_string_lossy()))
    }

    pub(crate) fn parse_top_level(&mut self, node: &Node) -> CResult<()> {
        let Some(list) = node.as_list() else {
            return Err(self.report(ErrorKind::UnableToParseForm, node.span));
        };
        if list.is_empty() {
            return Err(self.report(ErrorKind::NoEmptyLists, node.span));
        }
        let Some(head) = list[0].as_symbol() else {
            return Err(self.report(ErrorKind::FirstListElementMustBeSymbol, list[0].span));
        };
        match head {
            "module" => self.parse_module_form(node),
            "import" => self.parse_import(node),
            "include" => self.parse_include(node),
            "once" => self.parse_once(node),
            "namespace" => {
                if list.len() < 2 {
                    return Err(self.report(ErrorKind::IncorrectMinimumNumberOfArgs, node.span));
                }
                let Some(name) = list[1].as_symbol().map(str::to_owned) else {
                    return Err(self.report(ErrorKind::FirstListElementMustBeSymbol, list[1].span));
                };
                self.ctx.activate_namespace(&mut self.tree, &name);
                for form in &list[2..] {
                    let _ = self.parse_top_level(form);
                }
                self.ctx.deactivate_namespace();
                Ok(())
            }
            "using-namespace" => {
                if list.len() < 2 {
                    return Err(self.report(ErrorKind::IncorrectMinimumNumberOfArgs, node.span));
                }
                let Some(name) = list[1].as_symbol().map(str::to_owned) else {
                    return Err(self.report(ErrorKind::FirstListElementMustBeSymbol, list[1].span));
                };
                if self.ctx.use_namespace(&self.tree, &name).is_none() {
                    return Err(self.report_detail(ErrorKind::NotInScope, list[1].span, name));
                }
                for form in &list[2..] {
                    let _ = self.parse_top_level(form);
                }
                self.ctx.unuse_namespace();
                Ok(())
            }
            "def" => self.parse_define(node),
            "do" => {
                for form in &list[1..] {
                    let _ = self.parse_top_level(form);
                }
                Ok(())
            }
            _ => {
                // Top-level forms may be macro invocations.
                let expanded = self.expand_optional_macro_call(node.clone())?;
                if expanded == *node {
                    Err(self.report_detail(ErrorKind::UnableToParseForm, node.span, head.to_owned()))
                } else {
                    self.parse_top_level(&expanded)
                }
            }
        }
    }

    fn parse_module_form(&mut self, node: &Node) -> CResult<()> {
        let list = node.as_list().expect("checked by caller");
        if list.len() < 2 {
            return Err(self.report(ErrorKind::IncorrectMinimumNumberOfArgs, node.span));
        }
        let Some(name) = list[1].as_symbol() else {
            return Err(self.report(ErrorKind::InvalidModuleName, list[1].span));
        };
        if !is_valid_module_name(name) {
            return Err(self.report_detail(ErrorKind::InvalidModuleName, list[1].span, name.to_owned()));
        }
        self.module_name = name.to_owned();
        for attr in &list[2..] {
            match attr.as_list() {
                Some([head, value]) if head.is_symbol("attr") && value.is_symbol("cto") => {
                    self.cto_module = true;
                }
                _ => return Err(self.report(ErrorKind::InvalidAttribute, attr.span)),
            }
        }
        Ok(())
    }

    fn parse_once(&mut self, node: &Node) -> CResult<()> {
        let list = node.as_list().expect("checked by caller");
        let [_, tag_node] = list else {
            return Err(self.report(ErrorKind::IncorrectNumberOfArgs, node.span));
        };
        let Some(tag) = tag_node.as_symbol() else {
            return Err(self.report(ErrorKind::FirstListElementMustBeSymbol, tag_node.span));
        };
        if self.once_tags.contains(tag) {
            // Already included once; the rest of this file is skipped and
            // any bodies it re-defined are dropped.
            self.skip_rest_of_file = true;
            let tags = self.once_tags.clone();
            self.tree.erase_once_bodies(&self.els, &mut self.ir, ROOT_NS, &tags);
            return Ok(());
        }
        self.once_tags.insert(tag.to_owned());
        self.current_once_tag = Some(tag.to_owned());
        Ok(())
    }

    fn parse_include(&mut self, node: &Node) -> CResult<()> {
        let list = node.as_list().expect("checked by caller");
        let [_, path_node] = list else {
            return Err(self.report(ErrorKind::IncorrectNumberOfArgs, node.span));
        };
        let Some(token) = path_node.as_token().filter(|t| t.kind == crate::node::TokenKind::StringLit) else {
            return Err(self.report(ErrorKind::UnexpectedElement, path_node.span));
        };
        let mut found = None;
        for dir in &self.include_paths {
            let candidate = dir.join(&token.text);
            if candidate.exists() {
                found = Some(candidate);
                break;
            }
        }
        let Some(path) = found else {
            return Err(self.report_detail(ErrorKind::CannotFindModule, path_node.span, token.text.clone()));
        };
        let source = match std::fs::read_to_string(&path) {
            Ok(source) => source,
            Err(err) => {
                return Err(self.report_detail(ErrorKind::CannotFindModule, path_node.span, err.to_string()));
            }
        };
        // Included files get their own once-tag scope and skip flag.
        let saved_tag = self.current_once_tag.take();
        let saved_skip = self.skip_rest_of_file;
        self.skip_rest_of_file = false;
        let Ok(forms) = reader::read_all(&source, &mut self.reporter) else {
            self.current_once_tag = saved_tag;
            self.skip_rest_of_file = saved_skip;
            return Err(Failed);
        };
        for form in &forms {
            if self.skip_rest_of_file {
                break;
            }
            let _ = self.parse_top_level(form);
        }
        self.current_once_tag = saved_tag;
        self.skip_rest_of_file = saved_skip;
        Ok(())
    }

    pub(crate) fn parse_define(&mut self, node: &Node) -> CResult<()> {
        let list = node.as_list().expect("checked by caller");
        let [_, name_node, body_node] = list else {
            return Err(self.report(ErrorKind::IncorrectNumberOfArgs, node.span));
        };
        let Some(name) = name_node.as_symbol().map(str::to_owned) else {
            return Err(self.report(ErrorKind::FirstListElementMustBeAtom, name_node.span));
        };
        let Some(body) = body_node.as_list() else {
            return Err(self.report(ErrorKind::UnexpectedElement, body_node.span));
        };
        let Some(kind) = body.first().and_then(Node::as_symbol) else {
            return Err(self.report(ErrorKind::OnlyVarAndStructPermitted, body_node.span));
        };
        match kind {
            "fn" => self.parse_function_definition(&name, body_node, None).map(|_| ()),
            "var" => self.parse_global_variable(&name, body_node),
            "struct" => self.parse_struct_definition(&name, body_node),
            "macro" => self.parse_macro_definition(&name, body_node),
            "enum" => self.parse_enum_definition(&name, body_node),
            _ => Err(self.report(ErrorKind::OnlyVarAndStructPermitted, body_node.span)),
        }
    }

    /// Drops the IR bodies of macros (and compile-time-only functions when
    /// the module itself is not CTO) before final emission. Extern macros
    /// keep their bodies so importing modules can run them.
    pub fn remove_macros_for_runtime(&mut self) {
        if self.has_defined_extern_macro {
            return;
        }
        self.tree
            .erase_macro_bodies(&mut self.els, &mut self.ir, ROOT_NS, !self.cto_module);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
enum BuiltinBody {
    Arith(ArithOp),
    Cmp(CmpPred, bool),
}

/// Module names are `[A-Za-z0-9_.-]+`.
pub(crate) fn is_valid_module_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b == b'-')
}

/// Parses a linkage keyword for functions and variables.
pub(crate) fn parse_linkage(session: &mut Session, node: &Node) -> CResult<Linkage> {
    let text = node.as_symbol().unwrap_or("");
    text.parse()
        .map_err(|_| session.report_detail(ErrorKind::UnexpectedElement, node.span, format!("bad linkage {text}")))
}

pub(crate) fn parse_struct_linkage(session: &mut Session, node: &Node) -> CResult<crate::element::StructLinkage> {
    let text = node.as_symbol().unwrap_or("");
    text.parse()
        .map_err(|_| session.report_detail(ErrorKind::UnexpectedElement, node.span, format!("bad linkage {text}")))
}

pub(crate) fn parse_enum_linkage(session: &mut Session, node: &Node) -> CResult<crate::element::EnumLinkage> {
    let text = node.as_symbol().unwrap_or("");
    text.parse()
        .map_err(|_| session.report_detail(ErrorKind::UnexpectedElement, node.span, format!("bad linkage {text}")))
}

/// Interns a constant integer of the given bit width from decimal text.
pub(crate) fn const_int_from_text(text: &str, bits: u32) -> Option<ConstValue> {
    let value: i128 = text.parse().ok()?;
    #[expect(clippy::cast_sign_loss, reason = "two's-complement bit pattern is intended")]
    let raw = value as u128;
    let masked = if bits >= 128 { raw } else { raw & ((1u128 << bits) - 1) };
    Some(ConstValue::Int { bits, value: masked })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_names_validate() {
        assert!(is_valid_module_name("geo.vector-2"));
        assert!(!is_valid_module_name("geo vector"));
        assert!(!is_valid_module_name(""));
    }

    #[test]
    fn builtin_operators_resolve() {
        let session = Session::new();
        let int = session.common.int_;
        let m = session.ctx.get_function(
            &session.tree,
            &session.els,
            &session.types,
            "+",
            Some(&[int, int]),
            false,
            None,
        );
        let f = m.found.expect("+ on (int int) exists");
        assert_eq!(session.els.function(f).return_type, int);
    }

    #[test]
    fn string_literals_are_cached_per_content() {
        let mut session = Session::new();
        let (a, _) = session.string_literal_global("hi");
        let (b, _) = session.string_literal_global("hi");
        let (c, _) = session.string_literal_global("other");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
