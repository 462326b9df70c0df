//! Named program elements and their arenas.
//!
//! Variables, functions, structs, and enums are stored in central arenas
//! owned by the session; namespaces bind names to ids. Ids stay valid for
//! the whole session, which lets speculative rollback truncate the arenas
//! without invalidating anything that survives.

use ahash::AHashMap;
use indexmap::IndexMap;
use strum::{Display, EnumString};

use crate::{
    ir::{BlockId, GlobalId, IrFnId, IrLinkage, Value},
    namespace::NsId,
    node::Span,
    types::TypeId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(pub(crate) u32);

impl VarId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FnId(pub(crate) u32);

impl FnId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StructId(pub(crate) u32);

impl StructId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnumId(pub(crate) u32);

impl EnumId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Visibility class of functions and variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "kebab-case")]
pub enum Linkage {
    Auto,
    Intern,
    Extern,
    #[strum(serialize = "extern-c")]
    ExternC,
    #[strum(serialize = "_extern-weak")]
    ExternWeak,
}

impl Linkage {
    /// Whether the binding is visible to importing modules.
    pub fn is_extern_any(self) -> bool {
        matches!(self, Self::Extern | Self::ExternC | Self::ExternWeak)
    }

    pub fn to_ir(self) -> IrLinkage {
        match self {
            Self::Auto | Self::Intern => IrLinkage::Internal,
            Self::Extern | Self::ExternC => IrLinkage::External,
            Self::ExternWeak => IrLinkage::ExternalWeak,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "kebab-case")]
pub enum StructLinkage {
    Intern,
    Extern,
    Opaque,
}

impl StructLinkage {
    pub fn is_extern(self) -> bool {
        matches!(self, Self::Extern | Self::Opaque)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "kebab-case")]
pub enum EnumLinkage {
    Intern,
    Extern,
}

impl EnumLinkage {
    pub fn is_extern(self) -> bool {
        matches!(self, Self::Extern)
    }
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub ty: TypeId,
    pub linkage: Linkage,
    /// Mangled name; set only when the variable backs an IR global.
    pub internal_name: String,
    /// Per-scope declaration counter; zero means "excluded from lifetime
    /// ordering" (e.g. captured across an anonymous function boundary).
    pub index: u32,
    /// Address of the backing storage (alloca result or global).
    pub value: Option<Value>,
    /// Backing IR global for module-level variables.
    pub global: Option<GlobalId>,
    pub has_initializer: bool,
    pub once_tag: Option<String>,
    /// Whether the binding is written out when the namespace is serialized.
    pub serialize: bool,
}

impl Variable {
    pub fn new(name: impl Into<String>, ty: TypeId, linkage: Linkage) -> Self {
        Self {
            name: name.into(),
            ty,
            linkage,
            internal_name: String::new(),
            index: 0,
            value: None,
            global: None,
            has_initializer: false,
            once_tag: None,
            serialize: true,
        }
    }
}

/// A label registered while compiling a function body.
#[derive(Debug, Clone)]
pub struct Label {
    pub block: BlockId,
    pub ns: NsId,
    pub index: u32,
}

/// A `goto` whose label may not exist yet. All gotos defer; they are
/// resolved in one pass when the enclosing body finishes.
#[derive(Debug, Clone)]
pub struct DeferredGoto {
    pub label_name: String,
    pub ns: NsId,
    /// The declaration index of the goto's namespace when the goto was
    /// emitted; used for the crossed-declaration check.
    pub index: u32,
    /// Block left unterminated, awaiting destructors plus the branch.
    pub block: BlockId,
    pub span: Span,
}

#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub return_type: TypeId,
    /// Ordered parameters, as variables (macro parameters keep their
    /// declared types here to support overloading, regardless of their IR
    /// representation).
    pub params: Vec<VarId>,
    pub ir: Option<IrFnId>,
    pub is_macro: bool,
    pub is_setf_fn: bool,
    pub is_destructor: bool,
    pub always_inline: bool,
    /// Compile-time only: erased from the emitted module once compile-time
    /// uses are done.
    pub cto: bool,
    pub linkage: Linkage,
    pub internal_name: String,
    pub once_tag: Option<String>,
    pub index: u32,
    /// Whether a body has been compiled (as opposed to a declaration).
    pub defined: bool,
    pub serialize: bool,
    // Body-compilation state; cleared when the body finishes.
    pub deferred_gotos: Vec<DeferredGoto>,
    pub labels: AHashMap<String, Label>,
    /// Scope the body opened, so `return` knows how far to unwind.
    pub body_ns: Option<NsId>,
}

impl Function {
    pub fn new(name: impl Into<String>, return_type: TypeId, params: Vec<VarId>, linkage: Linkage) -> Self {
        Self {
            name: name.into(),
            return_type,
            params,
            ir: None,
            is_macro: false,
            is_setf_fn: false,
            is_destructor: false,
            always_inline: false,
            cto: false,
            linkage,
            internal_name: String::new(),
            once_tag: None,
            index: 0,
            defined: false,
            serialize: true,
            deferred_gotos: Vec::new(),
            labels: AHashMap::new(),
            body_ns: None,
        }
    }

    pub fn is_declaration(&self) -> bool {
        !self.defined
    }
}

#[derive(Debug, Clone)]
pub struct StructDef {
    pub name: String,
    /// Members in declaration order.
    pub members: IndexMap<String, TypeId>,
    pub must_init: bool,
    pub is_opaque: bool,
    pub linkage: StructLinkage,
    pub internal_name: String,
    pub once_tag: Option<String>,
    pub serialize: bool,
}

impl StructDef {
    pub fn member_index(&self, name: &str) -> Option<u64> {
        self.members.get_index_of(name).map(|i| i as u64)
    }

    pub fn member_type(&self, name: &str) -> Option<TypeId> {
        self.members.get(name).copied()
    }
}

#[derive(Debug, Clone)]
pub struct EnumDef {
    pub name: String,
    pub underlying: TypeId,
    /// Member name to value, in declaration order.
    pub members: IndexMap<String, i64>,
    pub linkage: EnumLinkage,
    pub once_tag: Option<String>,
    pub serialize: bool,
}

impl EnumDef {
    pub fn value_of(&self, name: &str) -> Option<i64> {
        self.members.get(name).copied()
    }
}

/// Central element arenas.
#[derive(Debug, Default)]
pub struct Elements {
    pub vars: Vec<Variable>,
    pub fns: Vec<Function>,
    pub structs: Vec<StructDef>,
    pub enums: Vec<EnumDef>,
}

impl Elements {
    pub fn add_var(&mut self, var: Variable) -> VarId {
        let id = VarId(u32::try_from(self.vars.len()).expect("variable arena overflow"));
        self.vars.push(var);
        id
    }

    pub fn add_fn(&mut self, function: Function) -> FnId {
        let id = FnId(u32::try_from(self.fns.len()).expect("function arena overflow"));
        self.fns.push(function);
        id
    }

    pub fn add_struct(&mut self, def: StructDef) -> StructId {
        let id = StructId(u32::try_from(self.structs.len()).expect("struct arena overflow"));
        self.structs.push(def);
        id
    }

    pub fn add_enum(&mut self, def: EnumDef) -> EnumId {
        let id = EnumId(u32::try_from(self.enums.len()).expect("enum arena overflow"));
        self.enums.push(def);
        id
    }

    pub fn var(&self, id: VarId) -> &Variable {
        &self.vars[id.index()]
    }

    pub fn var_mut(&mut self, id: VarId) -> &mut Variable {
        &mut self.vars[id.index()]
    }

    pub fn function(&self, id: FnId) -> &Function {
        &self.fns[id.index()]
    }

    pub fn function_mut(&mut self, id: FnId) -> &mut Function {
        &mut self.fns[id.index()]
    }

    pub fn struct_def(&self, id: StructId) -> &StructDef {
        &self.structs[id.index()]
    }

    pub fn struct_def_mut(&mut self, id: StructId) -> &mut StructDef {
        &mut self.structs[id.index()]
    }

    pub fn enum_def(&self, id: EnumId) -> &EnumDef {
        &self.enums[id.index()]
    }

    pub fn enum_def_mut(&mut self, id: EnumId) -> &mut EnumDef {
        &mut self.enums[id.index()]
    }

    /// Arena sizes, recorded by context save points.
    pub fn counts(&self) -> ElementCounts {
        ElementCounts {
            vars: self.vars.len(),
            fns: self.fns.len(),
            structs: self.structs.len(),
            enums: self.enums.len(),
        }
    }

    /// Truncates each arena back to a recorded snapshot. Only sound when
    /// every binding referencing the dropped tail has been rolled back too,
    /// which the context save point guarantees.
    pub fn truncate(&mut self, counts: &ElementCounts) {
        self.vars.truncate(counts.vars);
        self.fns.truncate(counts.fns);
        self.structs.truncate(counts.structs);
        self.enums.truncate(counts.enums);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementCounts {
    pub vars: usize,
    pub fns: usize,
    pub structs: usize,
    pub enums: usize,
}
