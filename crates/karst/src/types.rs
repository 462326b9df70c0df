//! The type registry.
//!
//! Types are value objects interned by the [`TypeRegistry`]: structurally
//! equal descriptions always map to the same [`TypeId`], so canonical
//! equality is id equality. Relaxed comparisons (argument passing, where a
//! const source may feed a non-const target) walk the structure instead.

use std::fmt::Write as _;

use ahash::AHashMap;
use strum::{Display, EnumString, IntoStaticStr};

use crate::node::{Node, Span, TokenKind};

/// Canonical handle for an interned type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct TypeId(u32);

impl TypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Base kinds for non-composite types.
///
/// The `Display` form is the source-level spelling (`int`, `uint8`,
/// `long-double`, ...). `VarArgs` renders as `...`, matching parameter
/// lists.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, serde::Serialize, serde::Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
pub enum BaseType {
    Void,
    Bool,
    Char,
    Int,
    #[strum(serialize = "uint")]
    UInt,
    #[strum(serialize = "intptr")]
    IntPtr,
    Size,
    #[strum(serialize = "ptrdiff")]
    PtrDiff,
    Int8,
    Int16,
    Int32,
    Int64,
    Int128,
    #[strum(serialize = "uint8")]
    UInt8,
    #[strum(serialize = "uint16")]
    UInt16,
    #[strum(serialize = "uint32")]
    UInt32,
    #[strum(serialize = "uint64")]
    UInt64,
    #[strum(serialize = "uint128")]
    UInt128,
    Float,
    Double,
    LongDouble,
    #[strum(serialize = "...")]
    VarArgs,
}

impl BaseType {
    /// Single-character code used in mangled symbols.
    pub fn symbol_code(self) -> char {
        match self {
            Self::Void => 'v',
            Self::Bool => 'b',
            Self::Char => 'c',
            Self::Int => 'i',
            Self::UInt => 'j',
            Self::IntPtr => 'l',
            Self::Int8 => 'y',
            Self::UInt8 => 'm',
            Self::Int16 => 'n',
            Self::UInt16 => 'o',
            Self::Int32 => 'p',
            Self::UInt32 => 'q',
            Self::Int64 => 'r',
            Self::UInt64 => 's',
            Self::Int128 => 't',
            Self::UInt128 => 'u',
            Self::Float => 'f',
            Self::Double => 'd',
            Self::LongDouble => 'a',
            Self::Size => 'w',
            Self::PtrDiff => 'x',
            Self::VarArgs => 'z',
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Int
                | Self::Char
                | Self::UInt
                | Self::IntPtr
                | Self::Size
                | Self::PtrDiff
                | Self::Int8
                | Self::UInt8
                | Self::Int16
                | Self::UInt16
                | Self::Int32
                | Self::UInt32
                | Self::Int64
                | Self::UInt64
                | Self::Int128
                | Self::UInt128
        )
    }

    pub fn is_signed_integer(self) -> bool {
        matches!(
            self,
            Self::Int | Self::Char | Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64 | Self::Int128
        )
    }

    pub fn is_floating(self) -> bool {
        matches!(self, Self::Float | Self::Double | Self::LongDouble)
    }

    /// Integer size marker: concrete widths return their bit count, the
    /// platform-relative kinds return a small code resolved by the data
    /// layout (1 native int, 2 pointer, 3 size, 4 ptrdiff).
    pub fn integer_size(self) -> u32 {
        match self {
            Self::Char | Self::Int8 | Self::UInt8 => 8,
            Self::Int | Self::UInt => 1,
            Self::IntPtr => 2,
            Self::Size => 3,
            Self::PtrDiff => 4,
            Self::Int16 | Self::UInt16 => 16,
            Self::Int32 | Self::UInt32 => 32,
            Self::Int64 | Self::UInt64 => 64,
            Self::Int128 | Self::UInt128 => 128,
            _ => 0,
        }
    }

    /// Relative widths of the floating kinds, for cast direction checks.
    pub fn fp_relative_size(self) -> u32 {
        match self {
            Self::Float => 1,
            Self::Double => 2,
            Self::LongDouble => 3,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TypeKind {
    Basic(BaseType),
    Pointer(TypeId),
    Array { element: TypeId, length: u64 },
    Bitfield { base: BaseType, width: u32 },
    Struct { name: String, namespaces: Vec<String> },
    Function { ret: TypeId, params: Vec<TypeId> },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Type {
    pub kind: TypeKind,
    pub is_const: bool,
    pub is_reference: bool,
    pub is_retval: bool,
}

impl Type {
    fn plain(kind: TypeKind) -> Self {
        Self {
            kind,
            is_const: false,
            is_reference: false,
            is_retval: false,
        }
    }
}

/// Interning registry for types; owns every [`Type`] for the session's
/// lifetime.
#[derive(Debug)]
pub struct TypeRegistry {
    types: Vec<Type>,
    interned: AHashMap<Type, TypeId>,
    /// String aliases for struct names, consulted when rendering.
    typemap: AHashMap<String, String>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            types: Vec::new(),
            interned: AHashMap::new(),
            typemap: AHashMap::new(),
        }
    }

    fn intern(&mut self, ty: Type) -> TypeId {
        if let Some(&id) = self.interned.get(&ty) {
            return id;
        }
        let id = TypeId(u32::try_from(self.types.len()).expect("type registry overflow"));
        self.types.push(ty.clone());
        self.interned.insert(ty, id);
        id
    }

    pub fn get(&self, id: TypeId) -> &Type {
        &self.types[id.index()]
    }

    pub fn basic(&mut self, base: BaseType) -> TypeId {
        self.intern(Type::plain(TypeKind::Basic(base)))
    }

    pub fn pointer_to(&mut self, pointee: TypeId) -> TypeId {
        self.intern(Type::plain(TypeKind::Pointer(pointee)))
    }

    pub fn array_of(&mut self, element: TypeId, length: u64) -> TypeId {
        self.intern(Type::plain(TypeKind::Array { element, length }))
    }

    pub fn bitfield(&mut self, base: BaseType, width: u32) -> TypeId {
        self.intern(Type::plain(TypeKind::Bitfield { base, width }))
    }

    pub fn struct_ref(&mut self, name: impl Into<String>, namespaces: Vec<String>) -> TypeId {
        self.intern(Type::plain(TypeKind::Struct {
            name: name.into(),
            namespaces,
        }))
    }

    pub fn function(&mut self, ret: TypeId, params: Vec<TypeId>) -> TypeId {
        self.intern(Type::plain(TypeKind::Function { ret, params }))
    }

    pub fn const_of(&mut self, id: TypeId) -> TypeId {
        let mut ty = self.get(id).clone();
        ty.is_const = true;
        self.intern(ty)
    }

    pub fn strip_const(&mut self, id: TypeId) -> TypeId {
        let mut ty = self.get(id).clone();
        ty.is_const = false;
        self.intern(ty)
    }

    pub fn retval_of(&mut self, id: TypeId) -> TypeId {
        let mut ty = self.get(id).clone();
        ty.is_retval = true;
        self.intern(ty)
    }

    pub fn add_typemap_entry(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.typemap.insert(from.into(), to.into());
    }

    pub fn typemap_entry(&self, from: &str) -> Option<&str> {
        self.typemap.get(from).map(String::as_str)
    }

    pub fn typemap_entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.typemap.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    // --- predicates -------------------------------------------------------

    pub fn base_type(&self, id: TypeId) -> Option<BaseType> {
        match self.get(id).kind {
            TypeKind::Basic(base) | TypeKind::Bitfield { base, .. } => Some(base),
            _ => None,
        }
    }

    pub fn is_integer(&self, id: TypeId) -> bool {
        self.base_type(id).is_some_and(BaseType::is_integer)
    }

    pub fn is_signed_integer(&self, id: TypeId) -> bool {
        self.base_type(id).is_some_and(BaseType::is_signed_integer)
    }

    pub fn is_floating(&self, id: TypeId) -> bool {
        self.base_type(id).is_some_and(BaseType::is_floating)
    }

    pub fn is_varargs_marker(&self, id: TypeId) -> bool {
        self.base_type(id) == Some(BaseType::VarArgs)
    }

    pub fn pointee(&self, id: TypeId) -> Option<TypeId> {
        match self.get(id).kind {
            TypeKind::Pointer(pointee) => Some(pointee),
            _ => None,
        }
    }

    pub fn array_element(&self, id: TypeId) -> Option<(TypeId, u64)> {
        match self.get(id).kind {
            TypeKind::Array { element, length } => Some((element, length)),
            _ => None,
        }
    }

    pub fn struct_name(&self, id: TypeId) -> Option<(&str, &[String])> {
        match &self.get(id).kind {
            TypeKind::Struct { name, namespaces } => Some((name, namespaces)),
            _ => None,
        }
    }

    pub fn function_parts(&self, id: TypeId) -> Option<(TypeId, &[TypeId])> {
        match &self.get(id).kind {
            TypeKind::Function { ret, params } => Some((*ret, params)),
            _ => None,
        }
    }

    /// Whether the parameter list of a function type ends in varargs.
    pub fn params_are_varargs(&self, params: &[TypeId]) -> bool {
        params.last().is_some_and(|&last| self.is_varargs_marker(last))
    }

    /// Number of fixed (non-varargs) parameters.
    pub fn required_args(&self, params: &[TypeId]) -> usize {
        if self.params_are_varargs(params) {
            params.len() - 1
        } else {
            params.len()
        }
    }

    // --- comparisons ------------------------------------------------------

    /// Structural equality, optionally accepting a const source feeding a
    /// non-const target (the C value-passing relaxation). `a` is the target.
    pub fn equal_relaxed(&self, a: TypeId, b: TypeId, ignore_arg_constness: bool) -> bool {
        self.eq_with(a, b, ignore_arg_constness, false, false)
    }

    /// Whether storage of type `target` can be assigned from a value of type
    /// `value`. Top-level constness of the value is irrelevant.
    pub fn can_be_set_from(&self, target: TypeId, value: TypeId, ignore_arg_constness: bool) -> bool {
        let (ta, tb) = (self.get(target), self.get(value));
        if matches!(ta.kind, TypeKind::Pointer(_)) && matches!(tb.kind, TypeKind::Pointer(_)) {
            self.eq_with(value, target, ignore_arg_constness, true, false)
        } else {
            self.eq_with(target, value, ignore_arg_constness, false, true)
        }
    }

    /// Whether a parameter of type `target` accepts an argument of type
    /// `value`. Top-level constness on both sides is irrelevant.
    pub fn can_be_passed_from(&self, target: TypeId, value: TypeId, ignore_arg_constness: bool) -> bool {
        let (ta, tb) = (self.get(target), self.get(value));
        if matches!(ta.kind, TypeKind::Pointer(_)) && matches!(tb.kind, TypeKind::Pointer(_)) {
            self.eq_with(value, target, ignore_arg_constness, true, true)
        } else {
            self.eq_with(target, value, ignore_arg_constness, true, true)
        }
    }

    fn eq_with(&self, a: TypeId, b: TypeId, iac: bool, clear_a_const: bool, clear_b_const: bool) -> bool {
        if a == b && !clear_a_const && !clear_b_const {
            return true;
        }
        let (ta, tb) = (self.get(a), self.get(b));
        let a_const = ta.is_const && !clear_a_const;
        let b_const = tb.is_const && !clear_b_const;
        if a_const != b_const {
            // The one relaxation: a const argument may feed a non-const
            // target when the caller asked for it.
            let acceptable = iac && !a_const && b_const;
            if !acceptable {
                return false;
            }
        }
        match (&ta.kind, &tb.kind) {
            (TypeKind::Basic(x), TypeKind::Basic(y)) => x == y,
            (TypeKind::Bitfield { base: xb, width: xw }, TypeKind::Bitfield { base: yb, width: yw }) => {
                xb == yb && xw == yw
            }
            (
                TypeKind::Struct {
                    name: xn,
                    namespaces: xs,
                },
                TypeKind::Struct {
                    name: yn,
                    namespaces: ys,
                },
            ) => xn == yn && xs == ys,
            (TypeKind::Pointer(x), TypeKind::Pointer(y)) => self.eq_with(*x, *y, iac, false, false),
            (
                TypeKind::Array {
                    element: xe,
                    length: xl,
                },
                TypeKind::Array {
                    element: ye,
                    length: yl,
                },
            ) => xl == yl && self.eq_with(*xe, *ye, iac, false, false),
            (TypeKind::Function { ret: xr, params: xp }, TypeKind::Function { ret: yr, params: yp }) => {
                self.eq_with(*xr, *yr, false, false, false)
                    && xp.len() == yp.len()
                    && xp
                        .iter()
                        .zip(yp)
                        .all(|(&x, &y)| self.eq_with(x, y, false, false, false))
            }
            _ => false,
        }
    }

    // --- rendering --------------------------------------------------------

    /// Source-syntax rendering, e.g. `(p (const char))`. The output parses
    /// back to the same type, which the module format relies on.
    pub fn display(&self, id: TypeId) -> String {
        let mut out = String::new();
        self.display_into(id, &mut out);
        out
    }

    fn display_into(&self, id: TypeId, out: &mut String) {
        let ty = self.get(id);
        if ty.is_const {
            out.push_str("(const ");
            self.display_plain(ty, out);
            out.push(')');
            return;
        }
        if ty.is_reference {
            out.push_str("(ref ");
            self.display_plain(ty, out);
            out.push(')');
            return;
        }
        self.display_plain(ty, out);
    }

    fn display_plain(&self, ty: &Type, out: &mut String) {
        match &ty.kind {
            TypeKind::Basic(base) => {
                let _ = write!(out, "{base}");
            }
            TypeKind::Bitfield { base, width } => {
                let _ = write!(out, "(bf {base} {width})");
            }
            TypeKind::Struct { name, namespaces } => {
                let mut full = String::new();
                for ns in namespaces {
                    full.push_str(ns);
                    full.push('.');
                }
                full.push_str(name);
                match self.typemap.get(&full) {
                    Some(alias) => out.push_str(alias),
                    None => out.push_str(&full),
                }
            }
            TypeKind::Pointer(pointee) => {
                out.push_str("(p ");
                self.display_into(*pointee, out);
                out.push(')');
            }
            TypeKind::Array { element, length } => {
                let _ = write!(out, "(array-of {length} ");
                self.display_into(*element, out);
                out.push(')');
            }
            TypeKind::Function { ret, params } => {
                out.push_str("(fn ");
                self.display_into(*ret, out);
                out.push_str(" (");
                for (i, &param) in params.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    self.display_into(param, out);
                }
                out.push_str("))");
            }
        }
    }

    /// Renders a type back into node form, for macros that consume or emit
    /// type syntax. Arrays are not representable here.
    pub fn type_to_node(&self, id: TypeId) -> Option<Node> {
        let ty = self.get(id);
        match &ty.kind {
            TypeKind::Array { .. } => None,
            TypeKind::Pointer(pointee) => {
                let inner = self.type_to_node(*pointee)?;
                Some(Node::list(
                    vec![Node::symbol("p", Span::default()), inner],
                    Span::default(),
                ))
            }
            TypeKind::Basic(base) => Some(Node::symbol(base.to_string(), Span::default())),
            TypeKind::Bitfield { base, width } => Some(Node::list(
                vec![
                    Node::symbol("bf", Span::default()),
                    Node::symbol(base.to_string(), Span::default()),
                    Node::token(TokenKind::Int, width.to_string(), Span::default()),
                ],
                Span::default(),
            )),
            TypeKind::Struct { name, namespaces } => {
                let mut full = String::new();
                for ns in namespaces {
                    full.push_str(ns);
                    full.push('.');
                }
                full.push_str(name);
                let rendered = self.typemap.get(&full).cloned().unwrap_or(full);
                Some(Node::symbol(rendered, Span::default()))
            }
            TypeKind::Function { ret, params } => {
                let ret_node = self.type_to_node(*ret)?;
                let mut param_nodes = Vec::with_capacity(params.len());
                let mut arg_name = b'a';
                for &param in params {
                    let ty_node = self.type_to_node(param)?;
                    param_nodes.push(Node::list(
                        vec![Node::symbol(String::from(char::from(arg_name)), Span::default()), ty_node],
                        Span::default(),
                    ));
                    arg_name += 1;
                }
                Some(Node::list(
                    vec![
                        Node::symbol("fn", Span::default()),
                        ret_node,
                        Node::list(param_nodes, Span::default()),
                    ],
                    Span::default(),
                ))
            }
        }
    }

    // --- symbol encoding --------------------------------------------------

    /// Appends the mangled encoding of a type: base-kind codes, `P<t>`,
    /// `A<n><t>`, `Z[N...E]<len><name>`, `F<ret><args>E`.
    pub fn encode_symbol(&self, id: TypeId, out: &mut String) {
        let ty = self.get(id);
        match &ty.kind {
            TypeKind::Pointer(pointee) => {
                out.push('P');
                self.encode_symbol(*pointee, out);
            }
            TypeKind::Array { element, length } => {
                let _ = write!(out, "A{length}");
                self.encode_symbol(*element, out);
            }
            TypeKind::Basic(base) | TypeKind::Bitfield { base, .. } => out.push(base.symbol_code()),
            TypeKind::Struct { name, namespaces } => {
                out.push('Z');
                if !namespaces.is_empty() {
                    out.push('N');
                    for ns in namespaces {
                        let _ = write!(out, "{}{}", ns.len(), ns);
                    }
                    out.push('E');
                }
                let _ = write!(out, "{}", name.len());
                encode_standard(name, out);
            }
            TypeKind::Function { ret, params } => {
                out.push('F');
                self.encode_symbol(*ret, out);
                for &param in params {
                    self.encode_symbol(param, out);
                }
                out.push('E');
            }
        }
    }
}

/// Escapes a name for symbol use: alphanumerics and `_` pass through,
/// everything else becomes `$<hex>`.
pub fn encode_standard(from: &str, to: &mut String) {
    for byte in from.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' {
            to.push(char::from(byte));
        } else {
            let _ = write!(to, "${byte:x}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_canonical() {
        let mut registry = TypeRegistry::new();
        let int = registry.basic(BaseType::Int);
        let p1 = registry.pointer_to(int);
        let p2 = registry.pointer_to(int);
        assert_eq!(p1, p2);
        let arr1 = registry.array_of(int, 4);
        let arr2 = registry.array_of(int, 4);
        assert_eq!(arr1, arr2);
        assert_ne!(arr1, registry.array_of(int, 5));
    }

    #[test]
    fn const_relaxation_is_one_way() {
        let mut registry = TypeRegistry::new();
        let int = registry.basic(BaseType::Int);
        let const_int = registry.const_of(int);
        assert!(!registry.equal_relaxed(int, const_int, false));
        assert!(registry.equal_relaxed(int, const_int, true));
        // A non-const source never satisfies a const target this way round.
        assert!(!registry.equal_relaxed(const_int, int, true));
    }

    #[test]
    fn pass_from_relaxes_toward_const_targets() {
        let mut registry = TypeRegistry::new();
        let char_ty = registry.basic(BaseType::Char);
        let const_char = registry.const_of(char_ty);
        let p_char = registry.pointer_to(char_ty);
        let p_const_char = registry.pointer_to(const_char);
        // Passing (p char) where (p (const char)) is expected needs the
        // relaxation; the reverse direction stays rejected.
        assert!(!registry.can_be_passed_from(p_const_char, p_char, false));
        assert!(registry.can_be_passed_from(p_const_char, p_char, true));
        assert!(!registry.can_be_passed_from(p_char, p_const_char, true));
        assert!(registry.can_be_passed_from(p_char, p_char, false));
    }

    #[test]
    fn display_round_trip_forms() {
        let mut registry = TypeRegistry::new();
        let char_ty = registry.basic(BaseType::Char);
        let const_char = registry.const_of(char_ty);
        let p = registry.pointer_to(const_char);
        assert_eq!(registry.display(p), "(p (const char))");
        let arr = registry.array_of(char_ty, 8);
        assert_eq!(registry.display(arr), "(array-of 8 char)");
    }

    #[test]
    fn symbol_encoding_matches_scheme() {
        let mut registry = TypeRegistry::new();
        let int = registry.basic(BaseType::Int);
        let void = registry.basic(BaseType::Void);
        let p_int = registry.pointer_to(int);
        let st = registry.struct_ref("Pair", vec!["geo".to_owned()]);
        let f = registry.function(void, vec![p_int, st]);
        let mut out = String::new();
        registry.encode_symbol(f, &mut out);
        assert_eq!(out, "FvPiZN3geoE4PairE");
    }

    #[test]
    fn varargs_params_counted() {
        let mut registry = TypeRegistry::new();
        let int = registry.basic(BaseType::Int);
        let va = registry.basic(BaseType::VarArgs);
        assert!(registry.params_are_varargs(&[int, va]));
        assert_eq!(registry.required_args(&[int, va]), 1);
        assert_eq!(registry.required_args(&[int]), 1);
    }
}
