//! The boundary to the code generator and JIT.
//!
//! The front-end never executes code itself: compiling a macro body or a
//! constant constructor produces IR, and a [`JitEngine`] turns that IR into
//! something callable. The engine is supplied by the embedder; the library
//! ships [`NoJit`], which refuses, so pure front-end work (and testing)
//! needs no code generator at all. Test suites install engines whose
//! "JITted" entry points are ordinary `extern "C"` Rust functions, driven
//! through the same trampoline ABI as real generated code.

use std::fmt;

use crate::{
    dnode::{DNode, MContext},
    ir::{IrFnId, IrModule},
};

/// Native entry point of a JIT-compiled function.
pub type MacroAddress = *const ();

/// Signature of a macro entry point with `N` syntactic arguments:
/// `fn(*mut MContext, *mut DNode × N) -> *mut DNode`.
pub const MAX_MACRO_ARITY: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JitError {
    /// No execution engine is available in this session.
    Unavailable,
    /// The engine has no entry for the requested function.
    UnknownFunction(String),
    /// Arity exceeds the trampoline set.
    TooManyArguments(usize),
}

impl fmt::Display for JitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => f.write_str("no JIT engine is available"),
            Self::UnknownFunction(name) => write!(f, "no JITted entry for function {name}"),
            Self::TooManyArguments(n) => write!(f, "macro arity {n} exceeds trampoline set"),
        }
    }
}

/// Execution services required from the backend.
pub trait JitEngine {
    /// Compiles (or looks up) the native entry point for a macro body.
    fn prepare_macro(&mut self, module: &IrModule, function: IrFnId) -> Result<MacroAddress, JitError>;

    /// Runs a constant-constructor wrapper, filling `out` with the raw
    /// little-endian bytes of the constructed value.
    fn run_constant_ctor(&mut self, module: &IrModule, wrapper: IrFnId, out: &mut [u8]) -> Result<(), JitError>;
}

/// The default engine: compile-time execution is unavailable.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoJit;

impl JitEngine for NoJit {
    fn prepare_macro(&mut self, _module: &IrModule, _function: IrFnId) -> Result<MacroAddress, JitError> {
        Err(JitError::Unavailable)
    }

    fn run_constant_ctor(&mut self, _module: &IrModule, _wrapper: IrFnId, _out: &mut [u8]) -> Result<(), JitError> {
        Err(JitError::Unavailable)
    }
}

macro_rules! dnode_ptr_ty {
    ($idx:tt) => { *mut DNode };
}

macro_rules! trampoline_arm {
    ($addr:expr, $mcontext:expr, $args:expr $(, $idx:tt)*) => {{
        type Entry = unsafe extern "C" fn(*mut MContext $(, dnode_ptr_ty!($idx))*) -> *mut DNode;
        // SAFETY: the engine vouched that `addr` is an entry point with the
        // macro ABI for this arity.
        let entry: Entry = unsafe { std::mem::transmute($addr) };
        // SAFETY: argument count matches the selected signature.
        unsafe { entry($mcontext $(, $args[$idx])*) }
    }};
}

/// Calls a JITted macro through the fixed per-arity trampoline set.
///
/// # Safety
/// `addr` must be a live entry point with the macro ABI
/// (`MContext*, DNode* × args.len() -> DNode*`); `mcontext` and every
/// argument must be valid for the duration of the call.
pub unsafe fn call_macro(
    addr: MacroAddress,
    mcontext: *mut MContext,
    args: &[*mut DNode],
) -> Result<*mut DNode, JitError> {
    Ok(match args.len() {
        0 => trampoline_arm!(addr, mcontext, args),
        1 => trampoline_arm!(addr, mcontext, args, 0),
        2 => trampoline_arm!(addr, mcontext, args, 0, 1),
        3 => trampoline_arm!(addr, mcontext, args, 0, 1, 2),
        4 => trampoline_arm!(addr, mcontext, args, 0, 1, 2, 3),
        5 => trampoline_arm!(addr, mcontext, args, 0, 1, 2, 3, 4),
        6 => trampoline_arm!(addr, mcontext, args, 0, 1, 2, 3, 4, 5),
        7 => trampoline_arm!(addr, mcontext, args, 0, 1, 2, 3, 4, 5, 6),
        8 => trampoline_arm!(addr, mcontext, args, 0, 1, 2, 3, 4, 5, 6, 7),
        n => return Err(JitError::TooManyArguments(n)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn first_arg(_mc: *mut MContext, arg: *mut DNode) -> *mut DNode {
        arg
    }

    #[test]
    fn trampoline_dispatches_by_arity() {
        let mut pool = crate::dnode::Pool::new();
        let token = pool.token("5");
        let mut mcontext = MContext { pool: &mut pool };
        // SAFETY: first_arg has the 1-argument macro ABI and the token is
        // pool-owned and live.
        let result = unsafe { call_macro(first_arg as MacroAddress, &mut mcontext, &[token]) };
        assert_eq!(result.unwrap(), token);
    }

    #[test]
    fn oversized_arity_is_rejected() {
        let mut pool = crate::dnode::Pool::new();
        let token = pool.token("x");
        let args = [token; MAX_MACRO_ARITY + 1];
        let mut mcontext = MContext { pool: &mut pool };
        // SAFETY: the call is rejected before any entry point is invoked.
        let result = unsafe { call_macro(first_arg as MacroAddress, &mut mcontext, &args) };
        assert_eq!(result.unwrap_err(), JitError::TooManyArguments(MAX_MACRO_ARITY + 1));
    }
}
