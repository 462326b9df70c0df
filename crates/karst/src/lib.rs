#![doc = include_str!("../../../README.md")]

mod backend;
mod context;
mod decl;
mod def;
mod dnode;
mod element;
mod error;
mod eval;
mod forms;
mod ir;
mod lifetime;
mod macros;
mod modfile;
mod namespace;
mod node;
mod reader;
mod run;
mod types;

pub use crate::{
    backend::{JitEngine, JitError, MAX_MACRO_ARITY, MacroAddress, NoJit, call_macro},
    dnode::{DNode, MContext, Pool, dnode_to_node, node_to_dnode},
    element::{EnumLinkage, FnId, Linkage, StructLinkage, VarId},
    error::{CResult, Diagnostic, ErrorKind, Failed, Reporter},
    eval::ParseResult,
    ir::{
        ArithOp, BlockId, Builder, Callee, CastKind, CmpPred, ConstValue, DataLayout, FloatKind, GlobalId, GlobalInit,
        InstrId, Instruction, IrFnId, IrLinkage, IrModule, Op, Value,
    },
    modfile::{ModuleFile, SerializedEnum, SerializedFunction, SerializedNamespace, SerializedStruct, SerializedVariable},
    namespace::{NamespaceTree, NsId, ROOT_NS},
    node::{Node, NodeKind, Span, Token, TokenKind},
    reader::{read_all, read_one},
    run::{CORE_FORMS, CommonTypes, Session},
    types::{BaseType, Type, TypeId, TypeKind, TypeRegistry},
};
