//! The typed SSA intermediate representation.
//!
//! A thin, inspectable in-memory model of what the evaluator emits:
//! functions of basic blocks of instructions, plus globals. Every
//! value-producing instruction is tagged with its [`TypeId`]. Machine-code
//! generation, bitcode emission, and JIT execution are the backend's
//! business (see `backend.rs`); this module only has to be faithful enough
//! for the front-end to build against and roll back speculative work.
//!
//! Rollback support is load-bearing: overload probing evaluates arguments
//! into real blocks and must be able to truncate the damage when the callee
//! turns out to be a macro.

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::types::{BaseType, Type, TypeId, TypeKind, TypeRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IrFnId(u32);

impl IrFnId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Blocks are densely indexed in creation order within a function.
    pub fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).expect("block id overflow"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstrId(u32);

impl InstrId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalId(u32);

impl GlobalId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Linkage at the IR level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrLinkage {
    Private,
    Internal,
    External,
    ExternalWeak,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FloatKind {
    Float,
    Double,
    LongDouble,
}

/// A compile-time constant value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    /// Raw two's-complement bits of the stated width.
    Int { bits: u32, value: u128 },
    Float { kind: FloatKind, value: f64 },
    NullPtr,
}

impl ConstValue {
    pub fn bool(value: bool) -> Self {
        Self::Int {
            bits: 1,
            value: u128::from(value),
        }
    }

    pub fn is_integer_zero(self) -> bool {
        matches!(self, Self::Int { value: 0, .. })
    }
}

/// An SSA value reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Instr(InstrId),
    Const(ConstValue),
    Global(GlobalId),
    FuncAddr(IrFnId),
    Arg(u32),
}

impl Value {
    pub fn as_const(self) -> Option<ConstValue> {
        match self {
            Self::Const(c) => Some(c),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    Trunc,
    SExt,
    ZExt,
    FpExt,
    FpTrunc,
    PtrToInt,
    IntToPtr,
    Bitcast,
    SiToFp,
    UiToFp,
    FpToSi,
    FpToUi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Comparison predicate; operand signedness rides alongside in the
/// instruction since the predicate set is shared by integer, float, and
/// pointer comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpPred {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
    Function(IrFnId),
    Pointer(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Alloca { ty: TypeId },
    Load { ptr: Value },
    Store { value: Value, ptr: Value },
    Gep { base: Value, indices: SmallVec<[Value; 2]> },
    Call { callee: Callee, args: Vec<Value> },
    Br { dest: BlockId },
    CondBr { cond: Value, then_dest: BlockId, else_dest: BlockId },
    Ret { value: Option<Value> },
    Cast { value: Value, kind: CastKind },
    Arith { op: ArithOp, lhs: Value, rhs: Value },
    Cmp { pred: CmpPred, signed: bool, lhs: Value, rhs: Value },
    VaStart { list: Value },
    VaEnd { list: Value },
    VaArg { list: Value },
    Memcpy { dst: Value, src: Value, len: u64 },
}

impl Op {
    pub fn is_terminator(&self) -> bool {
        matches!(self, Self::Br { .. } | Self::CondBr { .. } | Self::Ret { .. })
    }
}

/// One instruction plus the type of the value it produces (if any).
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub op: Op,
    pub ty: Option<TypeId>,
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub name: String,
    pub instrs: Vec<InstrId>,
}

#[derive(Debug)]
pub struct IrFunction {
    pub name: String,
    pub params: Vec<TypeId>,
    pub ret: TypeId,
    pub varargs: bool,
    pub linkage: IrLinkage,
    pub blocks: Vec<Block>,
    instrs: Vec<Instruction>,
    /// Erased functions keep their slot (ids stay stable) but drop their
    /// body and leave the name table.
    pub erased: bool,
}

impl IrFunction {
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn instr(&self, id: InstrId) -> &Instruction {
        &self.instrs[id.index()]
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    /// Iterates the instructions of a block in order.
    pub fn block_instrs(&self, id: BlockId) -> impl Iterator<Item = (InstrId, &Instruction)> {
        self.blocks[id.index()].instrs.iter().map(|&i| (i, self.instr(i)))
    }

    /// Iterates every live instruction in block order, for tests and for
    /// the terminator-fixup pass.
    pub fn all_instrs(&self) -> impl Iterator<Item = (BlockId, InstrId, &Instruction)> {
        self.blocks.iter().enumerate().flat_map(move |(bi, block)| {
            let block_id = BlockId(u32::try_from(bi).expect("block id overflow"));
            block.instrs.iter().map(move |&i| (block_id, i, self.instr(i)))
        })
    }

    fn push_instr(&mut self, block: BlockId, op: Op, ty: Option<TypeId>) -> InstrId {
        let id = InstrId(u32::try_from(self.instrs.len()).expect("instruction id overflow"));
        self.instrs.push(Instruction { op, ty });
        self.blocks[block.index()].instrs.push(id);
        id
    }

    pub fn add_block(&mut self, name: impl Into<String>) -> BlockId {
        let id = BlockId(u32::try_from(self.blocks.len()).expect("block id overflow"));
        self.blocks.push(Block {
            name: name.into(),
            instrs: Vec::new(),
        });
        id
    }

    pub fn block_terminated(&self, block: BlockId) -> bool {
        self.blocks[block.index()]
            .instrs
            .last()
            .is_some_and(|&i| self.instr(i).op.is_terminator())
    }

    /// Records the current shape for speculative rollback.
    pub fn mark(&self, block: BlockId) -> RollbackMark {
        RollbackMark {
            block_count: self.blocks.len(),
            block,
            instr_count: self.blocks[block.index()].instrs.len(),
        }
    }

    /// Discards every block and instruction added after `mark`. Orphaned
    /// entries stay in the instruction arena; they are unreachable and ids
    /// are never reused.
    pub fn rollback(&mut self, mark: &RollbackMark) {
        self.blocks.truncate(mark.block_count);
        self.blocks[mark.block.index()].instrs.truncate(mark.instr_count);
    }

    /// Deletes every instruction after the first terminator in each block.
    pub fn prune_after_terminators(&mut self) {
        let instrs = &self.instrs;
        for block in &mut self.blocks {
            if let Some(pos) = block.instrs.iter().position(|&i| instrs[i.index()].op.is_terminator()) {
                block.instrs.truncate(pos + 1);
            }
        }
    }
}

/// Snapshot of a function's shape, used to undo speculative emission.
#[derive(Debug, Clone)]
pub struct RollbackMark {
    pub block_count: usize,
    pub block: BlockId,
    pub instr_count: usize,
}

/// Initializer of a global variable.
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalInit {
    Scalar(ConstValue),
    /// Raw bytes, used for string data (with the trailing NUL included).
    Bytes(Vec<u8>),
    Array(Vec<GlobalInit>),
    Struct(Vec<GlobalInit>),
    /// Address of another global (string fields inside aggregates).
    GlobalRef(GlobalId),
    Zero,
}

#[derive(Debug)]
pub struct IrGlobal {
    pub name: String,
    pub ty: TypeId,
    pub init: Option<GlobalInit>,
    pub constant: bool,
    pub linkage: IrLinkage,
}

/// The IR module for one compilation session.
#[derive(Debug, Default)]
pub struct IrModule {
    functions: Vec<IrFunction>,
    globals: Vec<IrGlobal>,
    fn_by_name: AHashMap<String, IrFnId>,
    global_by_name: AHashMap<String, GlobalId>,
}

impl IrModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function(&self, id: IrFnId) -> &IrFunction {
        &self.functions[id.index()]
    }

    pub fn function_mut(&mut self, id: IrFnId) -> &mut IrFunction {
        &mut self.functions[id.index()]
    }

    pub fn get_function(&self, name: &str) -> Option<IrFnId> {
        self.fn_by_name.get(name).copied()
    }

    pub fn add_function(
        &mut self,
        name: impl Into<String>,
        params: Vec<TypeId>,
        ret: TypeId,
        varargs: bool,
        linkage: IrLinkage,
    ) -> IrFnId {
        let name = name.into();
        let id = IrFnId(u32::try_from(self.functions.len()).expect("function id overflow"));
        self.fn_by_name.insert(name.clone(), id);
        self.functions.push(IrFunction {
            name,
            params,
            ret,
            varargs,
            linkage,
            blocks: Vec::new(),
            instrs: Vec::new(),
            erased: false,
        });
        id
    }

    /// Removes a function's body and name binding. The slot stays so other
    /// ids remain stable; callers must not reference it afterwards.
    pub fn erase_function(&mut self, id: IrFnId) {
        let function = &mut self.functions[id.index()];
        function.erased = true;
        function.blocks.clear();
        function.instrs.clear();
        self.fn_by_name.remove(&function.name);
    }

    /// Drops a function's body but keeps the declaration, for once-tag
    /// deduplication.
    pub fn delete_body(&mut self, id: IrFnId) {
        let function = &mut self.functions[id.index()];
        function.blocks.clear();
        function.instrs.clear();
    }

    pub fn global(&self, id: GlobalId) -> &IrGlobal {
        &self.globals[id.index()]
    }

    pub fn global_mut(&mut self, id: GlobalId) -> &mut IrGlobal {
        &mut self.globals[id.index()]
    }

    pub fn get_global(&self, name: &str) -> Option<GlobalId> {
        self.global_by_name.get(name).copied()
    }

    pub fn add_global(
        &mut self,
        name: impl Into<String>,
        ty: TypeId,
        init: Option<GlobalInit>,
        constant: bool,
        linkage: IrLinkage,
    ) -> GlobalId {
        let name = name.into();
        let id = GlobalId(u32::try_from(self.globals.len()).expect("global id overflow"));
        self.global_by_name.insert(name.clone(), id);
        self.globals.push(IrGlobal {
            name,
            ty,
            init,
            constant,
            linkage,
        });
        id
    }

    pub fn globals(&self) -> impl Iterator<Item = (GlobalId, &IrGlobal)> {
        self.globals
            .iter()
            .enumerate()
            .map(|(i, g)| (GlobalId(u32::try_from(i).expect("global id overflow")), g))
    }

    pub fn live_functions(&self) -> impl Iterator<Item = (IrFnId, &IrFunction)> {
        self.functions
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.erased)
            .map(|(i, f)| (IrFnId(u32::try_from(i).expect("function id overflow")), f))
    }
}

/// Append-only instruction builder positioned at the end of a block.
pub struct Builder<'a> {
    module: &'a mut IrModule,
    func: IrFnId,
    pub block: BlockId,
}

impl<'a> Builder<'a> {
    pub fn new(module: &'a mut IrModule, func: IrFnId, block: BlockId) -> Self {
        Self { module, func, block }
    }

    fn push(&mut self, op: Op, ty: Option<TypeId>) -> Value {
        let id = self.module.functions[self.func.index()].push_instr(self.block, op, ty);
        Value::Instr(id)
    }

    pub fn alloca(&mut self, ty: TypeId, ptr_ty: TypeId) -> Value {
        self.push(Op::Alloca { ty }, Some(ptr_ty))
    }

    pub fn load(&mut self, ptr: Value, result_ty: TypeId) -> Value {
        self.push(Op::Load { ptr }, Some(result_ty))
    }

    pub fn store(&mut self, value: Value, ptr: Value) {
        self.push(Op::Store { value, ptr }, None);
    }

    pub fn gep(&mut self, base: Value, indices: impl IntoIterator<Item = Value>, result_ty: TypeId) -> Value {
        self.push(
            Op::Gep {
                base,
                indices: indices.into_iter().collect(),
            },
            Some(result_ty),
        )
    }

    /// GEP with the `[0, i]` index pair used for aggregate member access.
    pub fn gep_member(&mut self, base: Value, index: u64, result_ty: TypeId) -> Value {
        let zero = Value::Const(ConstValue::Int { bits: 32, value: 0 });
        let idx = Value::Const(ConstValue::Int {
            bits: 32,
            value: u128::from(index),
        });
        self.gep(base, [zero, idx], result_ty)
    }

    pub fn call(&mut self, callee: Callee, args: Vec<Value>, result_ty: Option<TypeId>) -> Value {
        self.push(Op::Call { callee, args }, result_ty)
    }

    pub fn br(&mut self, dest: BlockId) {
        self.push(Op::Br { dest }, None);
    }

    pub fn cond_br(&mut self, cond: Value, then_dest: BlockId, else_dest: BlockId) {
        self.push(
            Op::CondBr {
                cond,
                then_dest,
                else_dest,
            },
            None,
        );
    }

    pub fn ret(&mut self, value: Option<Value>) {
        self.push(Op::Ret { value }, None);
    }

    pub fn cast(&mut self, value: Value, kind: CastKind, result_ty: TypeId) -> Value {
        self.push(Op::Cast { value, kind }, Some(result_ty))
    }

    pub fn arith(&mut self, op: ArithOp, lhs: Value, rhs: Value, result_ty: TypeId) -> Value {
        self.push(Op::Arith { op, lhs, rhs }, Some(result_ty))
    }

    pub fn cmp(&mut self, pred: CmpPred, signed: bool, lhs: Value, rhs: Value, bool_ty: TypeId) -> Value {
        self.push(Op::Cmp { pred, signed, lhs, rhs }, Some(bool_ty))
    }

    pub fn va_start(&mut self, list: Value) {
        self.push(Op::VaStart { list }, None);
    }

    pub fn va_end(&mut self, list: Value) {
        self.push(Op::VaEnd { list }, None);
    }

    pub fn va_arg(&mut self, list: Value, result_ty: TypeId) -> Value {
        self.push(Op::VaArg { list }, Some(result_ty))
    }

    pub fn memcpy(&mut self, dst: Value, src: Value, len: u64) {
        self.push(Op::Memcpy { dst, src, len }, None);
    }
}

/// Looks up struct member types during layout computation; implemented by
/// the session, which owns the struct table.
pub trait StructSource {
    fn struct_member_types(&self, name: &str, namespaces: &[String]) -> Option<Vec<TypeId>>;
}

/// Target data layout used for sizeof/offsetof/alignmentof and for decoding
/// JIT-produced constant bytes. Fixed to the usual 64-bit model.
#[derive(Debug, Clone, Copy)]
pub struct DataLayout {
    pub pointer_bytes: u64,
    pub native_int_bits: u32,
}

impl Default for DataLayout {
    fn default() -> Self {
        Self {
            pointer_bytes: 8,
            native_int_bits: 32,
        }
    }
}

impl DataLayout {
    /// Resolves the integer-size markers from [`BaseType::integer_size`]
    /// into real bit widths.
    pub fn real_int_bits(self, marker: u32) -> u32 {
        match marker {
            1 => self.native_int_bits,
            2..=4 => u32::try_from(self.pointer_bytes * 8).expect("pointer width fits u32"),
            bits => bits,
        }
    }

    fn base_size(self, base: BaseType) -> Option<u64> {
        match base {
            BaseType::Void | BaseType::VarArgs => None,
            BaseType::Bool => Some(1),
            BaseType::Float => Some(4),
            BaseType::Double => Some(8),
            BaseType::LongDouble => Some(16),
            other => Some(u64::from(self.real_int_bits(other.integer_size())) / 8),
        }
    }

    pub fn size_of(self, types: &TypeRegistry, structs: &dyn StructSource, id: TypeId) -> Option<u64> {
        let ty: &Type = types.get(id);
        match &ty.kind {
            TypeKind::Basic(base) | TypeKind::Bitfield { base, .. } => self.base_size(*base),
            TypeKind::Pointer(_) | TypeKind::Function { .. } => Some(self.pointer_bytes),
            TypeKind::Array { element, length } => Some(self.size_of(types, structs, *element)? * length),
            TypeKind::Struct { name, namespaces } => {
                let members = structs.struct_member_types(name, namespaces)?;
                let layout = self.struct_layout(types, structs, &members)?;
                Some(layout.size)
            }
        }
    }

    pub fn align_of(self, types: &TypeRegistry, structs: &dyn StructSource, id: TypeId) -> Option<u64> {
        let ty: &Type = types.get(id);
        match &ty.kind {
            TypeKind::Basic(base) | TypeKind::Bitfield { base, .. } => self.base_size(*base),
            TypeKind::Pointer(_) | TypeKind::Function { .. } => Some(self.pointer_bytes),
            TypeKind::Array { element, .. } => self.align_of(types, structs, *element),
            TypeKind::Struct { name, namespaces } => {
                let members = structs.struct_member_types(name, namespaces)?;
                members
                    .iter()
                    .map(|&m| self.align_of(types, structs, m))
                    .try_fold(1u64, |acc, a| Some(acc.max(a?)))
            }
        }
    }

    /// Offsets, total size, and padding presence for a struct body.
    pub fn struct_layout(
        self,
        types: &TypeRegistry,
        structs: &dyn StructSource,
        members: &[TypeId],
    ) -> Option<StructLayout> {
        let mut offset = 0u64;
        let mut align = 1u64;
        let mut offsets = Vec::with_capacity(members.len());
        let mut has_padding = false;
        for &member in members {
            let member_align = self.align_of(types, structs, member)?;
            let aligned = offset.next_multiple_of(member_align);
            if aligned != offset {
                has_padding = true;
            }
            offsets.push(aligned);
            offset = aligned + self.size_of(types, structs, member)?;
            align = align.max(member_align);
        }
        let size = offset.next_multiple_of(align);
        if size != offset {
            has_padding = true;
        }
        Some(StructLayout {
            offsets,
            size,
            has_padding,
        })
    }
}

#[derive(Debug, Clone)]
pub struct StructLayout {
    pub offsets: Vec<u64>,
    pub size: u64,
    pub has_padding: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoStructs;

    impl StructSource for NoStructs {
        fn struct_member_types(&self, _: &str, _: &[String]) -> Option<Vec<TypeId>> {
            None
        }
    }

    #[test]
    fn rollback_truncates_blocks_and_instrs() {
        let mut types = TypeRegistry::new();
        let int = types.basic(BaseType::Int);
        let p_int = types.pointer_to(int);
        let mut module = IrModule::new();
        let f = module.add_function("f", vec![], int, false, IrLinkage::Internal);
        let entry = module.function_mut(f).add_block("entry");
        let mut b = Builder::new(&mut module, f, entry);
        b.alloca(int, p_int);
        let mark = module.function(f).mark(entry);
        let mut b = Builder::new(&mut module, f, entry);
        let slot = b.alloca(int, p_int);
        b.store(Value::Const(ConstValue::Int { bits: 32, value: 7 }), slot);
        let extra = module.function_mut(f).add_block("extra");
        let mut b = Builder::new(&mut module, f, extra);
        b.ret(None);

        module.function_mut(f).rollback(&mark);
        let function = module.function(f);
        assert_eq!(function.blocks.len(), 1);
        assert_eq!(function.block(entry).instrs.len(), 1);
    }

    #[test]
    fn struct_layout_detects_padding() {
        let mut types = TypeRegistry::new();
        let layout = DataLayout::default();
        let char_ty = types.basic(BaseType::Char);
        let int = types.basic(BaseType::Int);
        let packed = layout.struct_layout(&types, &NoStructs, &[int, int]).unwrap();
        assert!(!packed.has_padding);
        assert_eq!(packed.offsets, vec![0, 4]);
        assert_eq!(packed.size, 8);
        let padded = layout.struct_layout(&types, &NoStructs, &[char_ty, int]).unwrap();
        assert!(padded.has_padding);
        assert_eq!(padded.offsets, vec![0, 4]);
    }

    #[test]
    fn erased_functions_leave_name_table() {
        let mut types = TypeRegistry::new();
        let int = types.basic(BaseType::Int);
        let mut module = IrModule::new();
        let f = module.add_function("gone", vec![], int, false, IrLinkage::Internal);
        assert_eq!(module.get_function("gone"), Some(f));
        module.erase_function(f);
        assert_eq!(module.get_function("gone"), None);
        assert!(module.function(f).erased);
    }
}
