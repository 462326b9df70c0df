//! The DNode wire format for macro FFI.
//!
//! Macros receive their syntactic arguments as C-compatible [`DNode`]
//! linked structures and return one. DNodes never share storage with
//! [`Node`]: every allocation comes from a per-invocation [`Pool`], owned
//! by the macro call and freed when it returns. The [`MContext`] passed as
//! every macro's implicit first argument carries the pool handle, which is
//! how macro code (and the `pool-free` protocol) reaches the allocator.

use std::ffi::{CStr, CString, c_char};

use crate::{
    error::ErrorKind,
    node::{Node, NodeKind, Span, TokenKind},
    reader::classify_atom,
};

/// On-wire AST node. Field layout is ABI: JIT-compiled macro bodies index
/// into this struct directly.
#[repr(C)]
#[derive(Debug)]
pub struct DNode {
    /// Discriminator: zero for a token, non-zero for a list.
    pub is_list: i32,
    /// Token text as a NUL-terminated string; null for lists.
    pub token_str: *mut c_char,
    /// First child, for lists.
    pub list_node: *mut DNode,
    /// Next sibling in the parent list.
    pub next_node: *mut DNode,
    pub begin_line: i32,
    pub begin_column: i32,
    pub end_line: i32,
    pub end_column: i32,
    pub macro_begin_line: i32,
    pub macro_begin_column: i32,
    pub macro_end_line: i32,
    pub macro_end_column: i32,
}

impl DNode {
    fn empty() -> Self {
        Self {
            is_list: 0,
            token_str: std::ptr::null_mut(),
            list_node: std::ptr::null_mut(),
            next_node: std::ptr::null_mut(),
            begin_line: 0,
            begin_column: 0,
            end_line: 0,
            end_column: 0,
            macro_begin_line: 0,
            macro_begin_column: 0,
            macro_end_line: 0,
            macro_end_column: 0,
        }
    }
}

/// Per-invocation allocator for DNodes and their token strings. Everything
/// handed out lives exactly as long as the pool.
#[derive(Debug, Default)]
pub struct Pool {
    nodes: Vec<*mut DNode>,
    strings: Vec<*mut c_char>,
}

impl Pool {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_node(&mut self, node: DNode) -> *mut DNode {
        let ptr = Box::into_raw(Box::new(node));
        self.nodes.push(ptr);
        ptr
    }

    fn alloc_str(&mut self, text: &str) -> *mut c_char {
        // Interior NULs cannot come from the reader; replace defensively is
        // unnecessary, truncation at the first NUL matches C semantics.
        let c_string = CString::new(text.as_bytes().to_vec())
            .unwrap_or_else(|e| {
                let mut bytes = e.into_vec();
                bytes.truncate(bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len()));
                CString::new(bytes).expect("NUL-free prefix")
            });
        let ptr = c_string.into_raw();
        self.strings.push(ptr);
        ptr
    }

    /// Allocates a token DNode with the given text.
    pub fn token(&mut self, text: &str) -> *mut DNode {
        let token_str = self.alloc_str(text);
        self.alloc_node(DNode {
            token_str,
            ..DNode::empty()
        })
    }

    /// Allocates a list DNode over already-pool-owned children, linking
    /// them as siblings.
    pub fn list(&mut self, children: &[*mut DNode]) -> *mut DNode {
        for pair in children.windows(2) {
            // SAFETY: children are pool-owned, live, and uniquely referenced
            // by the caller while linking.
            unsafe {
                (*pair[0]).next_node = pair[1];
            }
        }
        self.alloc_node(DNode {
            is_list: 1,
            list_node: children.first().copied().unwrap_or(std::ptr::null_mut()),
            ..DNode::empty()
        })
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        for &ptr in &self.nodes {
            // SAFETY: every pointer in `nodes` came from Box::into_raw in
            // alloc_node and is freed exactly once, here.
            drop(unsafe { Box::from_raw(ptr) });
        }
        for &ptr in &self.strings {
            // SAFETY: every pointer in `strings` came from CString::into_raw
            // in alloc_str and is reclaimed exactly once, here.
            drop(unsafe { CString::from_raw(ptr) });
        }
    }
}

/// The implicit first argument of every macro. Carries the pool so macro
/// code can allocate nodes; released through `pool_free` when the
/// invocation returns.
#[repr(C)]
#[derive(Debug)]
pub struct MContext {
    pub pool: *mut Pool,
}

impl MContext {
    /// Allocates a token node from the invocation pool.
    ///
    /// # Safety
    /// `self.pool` must point to the live pool of the current invocation.
    pub unsafe fn token(&mut self, text: &str) -> *mut DNode {
        // SAFETY: per contract, the pool outlives this call.
        unsafe { (*self.pool).token(text) }
    }

    /// Allocates a list node from the invocation pool.
    ///
    /// # Safety
    /// `self.pool` must point to the live pool of the current invocation,
    /// and `children` must be pool-owned.
    pub unsafe fn list(&mut self, children: &[*mut DNode]) -> *mut DNode {
        // SAFETY: per contract, the pool outlives this call.
        unsafe { (*self.pool).list(children) }
    }
}

/// Marshals a [`Node`] into the wire format, allocating from `pool`.
pub fn node_to_dnode(pool: &mut Pool, node: &Node) -> *mut DNode {
    let ptr = match &node.kind {
        NodeKind::Token(token) => pool.token(&token.value_to_string()),
        NodeKind::List(children) => {
            let child_ptrs: Vec<*mut DNode> = children.iter().map(|c| node_to_dnode(pool, c)).collect();
            pool.list(&child_ptrs)
        }
    };
    // SAFETY: ptr was just allocated from the pool and is uniquely ours.
    unsafe {
        set_spans(&mut *ptr, node.span, node.macro_span);
    }
    ptr
}

fn set_spans(dnode: &mut DNode, span: Span, macro_span: Span) {
    dnode.begin_line = cast_pos(span.begin_line);
    dnode.begin_column = cast_pos(span.begin_column);
    dnode.end_line = cast_pos(span.end_line);
    dnode.end_column = cast_pos(span.end_column);
    if macro_span.is_set() {
        dnode.macro_begin_line = cast_pos(macro_span.begin_line);
        dnode.macro_begin_column = cast_pos(macro_span.begin_column);
        dnode.macro_end_line = cast_pos(macro_span.end_line);
        dnode.macro_end_column = cast_pos(macro_span.end_column);
    }
}

fn cast_pos(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn pos(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

/// Demarshals a returned DNode tree back into a [`Node`].
///
/// Token kinds are re-derived from the text: a leading digit (or `-` then a
/// digit) makes a numeric literal, surrounding quotes make a string
/// literal, anything else is a symbol.
///
/// # Safety
/// `dnode` must point to a live, well-formed DNode tree (no cycles; token
/// nodes carry valid NUL-terminated strings or null).
pub unsafe fn dnode_to_node(dnode: *const DNode) -> Result<Node, (ErrorKind, Span)> {
    // SAFETY: caller guarantees a live, well-formed node.
    let raw = unsafe { &*dnode };
    let span = Span::new(pos(raw.begin_line), pos(raw.begin_column), pos(raw.end_line), pos(raw.end_column));
    let macro_span = Span::new(
        pos(raw.macro_begin_line),
        pos(raw.macro_begin_column),
        pos(raw.macro_end_line),
        pos(raw.macro_end_column),
    );

    let mut node = if raw.is_list == 0 {
        if raw.token_str.is_null() {
            return Err((ErrorKind::DNodeHasNoString, span));
        }
        // SAFETY: caller guarantees token_str is NUL-terminated and valid.
        let text = unsafe { CStr::from_ptr(raw.token_str) }.to_string_lossy().into_owned();
        if text.is_empty() {
            return Err((ErrorKind::DNodeHasNoString, span));
        }
        if let Some(inner) = text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
            Node::token(TokenKind::StringLit, inner, span)
        } else {
            classify_atom(&text, span).map_err(|kind| (kind, span))?
        }
    } else {
        let mut children = Vec::new();
        let mut current = raw.list_node;
        while !current.is_null() {
            // SAFETY: caller guarantees the sibling chain is live and
            // acyclic.
            children.push(unsafe { dnode_to_node(current) }?);
            // SAFETY: same chain.
            current = unsafe { (*current).next_node };
        }
        Node::list(children, span)
    };
    node.macro_span = macro_span;
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_one;

    fn parse(source: &str) -> Node {
        let mut reporter = crate::error::Reporter::new("test.ka");
        read_one(source, &mut reporter).expect("fixture parses")
    }

    #[test]
    fn round_trip_preserves_structure_and_kinds() {
        let node = parse("(add 1 2.5 \"hi\" sym)");
        let mut pool = Pool::new();
        let wire = node_to_dnode(&mut pool, &node);
        // SAFETY: wire was just produced by node_to_dnode over the pool.
        let back = unsafe { dnode_to_node(wire) }.expect("round trip");
        assert_eq!(back, node);
    }

    #[test]
    fn round_trip_preserves_spans() {
        let node = parse("(a\n  (b c))");
        let mut pool = Pool::new();
        let wire = node_to_dnode(&mut pool, &node);
        // SAFETY: wire was just produced by node_to_dnode over the pool.
        let back = unsafe { dnode_to_node(wire) }.expect("round trip");
        let inner = &back.as_list().unwrap()[1];
        assert_eq!(inner.span.begin_line, 2);
        assert_eq!(inner.span.begin_column, 3);
    }

    #[test]
    fn tokenless_dnode_is_rejected() {
        let mut pool = Pool::new();
        let bad = pool.list(&[]);
        // SAFETY: bad is pool-owned; flipping the discriminator makes it a
        // token node with a null string, the exact error case under test.
        unsafe {
            (*bad).is_list = 0;
            assert_eq!(dnode_to_node(bad).unwrap_err().0, ErrorKind::DNodeHasNoString);
        }
    }
}
