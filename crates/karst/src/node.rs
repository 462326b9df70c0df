//! The AST node model.
//!
//! A [`Node`] is either a token or an ordered list of nodes. Every node
//! carries its source span, plus a distinct macro span recording the macro
//! invocation that produced it, if any. Macro spans propagate to every
//! descendant produced by a macro call, but never overwrite an existing one.

use std::fmt;

use strum::{Display, IntoStaticStr};

/// A half-open source region in line/column coordinates (1-based lines).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Span {
    pub begin_line: u32,
    pub begin_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl Span {
    pub fn new(begin_line: u32, begin_column: u32, end_line: u32, end_column: u32) -> Self {
        Self {
            begin_line,
            begin_column,
            end_line,
            end_column,
        }
    }

    /// A span is "set" once its begin line is non-zero; the default span is
    /// the absent marker, matching the reader's 1-based line numbering.
    pub fn is_set(self) -> bool {
        self.begin_line != 0
    }
}

/// Token classification as produced by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "kebab-case")]
pub enum TokenKind {
    /// A bare symbol, including special forms like `#\a` and `true`.
    Symbol,
    /// A quoted string literal; `text` holds the unescaped contents.
    StringLit,
    Int,
    Float,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    /// Renders the token the way it appeared in source, re-quoting string
    /// literals. This is the representation carried across the macro wire
    /// format, where the kind must be re-derivable from the text alone.
    pub fn value_to_string(&self) -> String {
        match self.kind {
            TokenKind::StringLit => format!("\"{}\"", self.text),
            _ => self.text.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum NodeKind {
    Token(Token),
    List(Vec<Node>),
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
    /// Span of the macro invocation that produced this node, when any.
    pub macro_span: Span,
}

impl Node {
    pub fn token(kind: TokenKind, text: impl Into<String>, span: Span) -> Self {
        Self {
            kind: NodeKind::Token(Token::new(kind, text)),
            span,
            macro_span: Span::default(),
        }
    }

    pub fn symbol(text: impl Into<String>, span: Span) -> Self {
        Self::token(TokenKind::Symbol, text, span)
    }

    pub fn list(children: Vec<Node>, span: Span) -> Self {
        Self {
            kind: NodeKind::List(children),
            span,
            macro_span: Span::default(),
        }
    }

    pub fn is_token(&self) -> bool {
        matches!(self.kind, NodeKind::Token(_))
    }

    pub fn is_list(&self) -> bool {
        matches!(self.kind, NodeKind::List(_))
    }

    pub fn as_token(&self) -> Option<&Token> {
        match &self.kind {
            NodeKind::Token(token) => Some(token),
            NodeKind::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Node]> {
        match &self.kind {
            NodeKind::List(children) => Some(children),
            NodeKind::Token(_) => None,
        }
    }

    /// Returns the symbol text when this node is a symbol token.
    pub fn as_symbol(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Token(token) if token.kind == TokenKind::Symbol => Some(&token.text),
            _ => None,
        }
    }

    /// True when this node is the symbol `text`.
    pub fn is_symbol(&self, text: &str) -> bool {
        self.as_symbol() == Some(text)
    }

    /// Stamps `macro_span` onto this node and every descendant that does not
    /// already carry a macro span. Existing macro spans are never
    /// overwritten, so nested expansions keep their original provenance.
    pub fn stamp_macro_span(&mut self, macro_span: Span) {
        if !self.macro_span.is_set() {
            self.macro_span = macro_span;
        }
        if let NodeKind::List(children) = &mut self.kind {
            for child in children {
                child.stamp_macro_span(macro_span);
            }
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NodeKind::Token(token) => f.write_str(&token.value_to_string()),
            NodeKind::List(children) => {
                f.write_str("(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{child}")?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_list() -> Node {
        let span = Span::new(1, 1, 1, 10);
        Node::list(
            vec![Node::symbol("do", span), Node::token(TokenKind::Int, "5", span)],
            span,
        )
    }

    #[test]
    fn stamping_reaches_descendants() {
        let mut node = sample_list();
        let macro_span = Span::new(3, 2, 3, 9);
        node.stamp_macro_span(macro_span);
        assert_eq!(node.macro_span, macro_span);
        let children = node.as_list().unwrap();
        assert_eq!(children[0].macro_span, macro_span);
        assert_eq!(children[1].macro_span, macro_span);
    }

    #[test]
    fn stamping_does_not_overwrite() {
        let mut node = sample_list();
        let first = Span::new(3, 2, 3, 9);
        let second = Span::new(7, 1, 7, 4);
        node.stamp_macro_span(first);
        node.stamp_macro_span(second);
        assert_eq!(node.macro_span, first);
        assert_eq!(node.as_list().unwrap()[0].macro_span, first);
    }

    #[test]
    fn display_round_trips_structure() {
        let node = sample_list();
        assert_eq!(node.to_string(), "(do 5)");
    }
}
