//! Lexer and S-expression reader.
//!
//! Turns source text into [`Node`] trees with line/column spans. The reader
//! is deliberately small: tokens are parentheses, symbols, integer and float
//! literals, and quoted strings with `\n` / `\t` / `\\` / `\"` escapes.
//! Comments run from `;` to end of line.

use crate::{
    error::{CResult, Diagnostic, ErrorKind, Failed, Reporter},
    node::{Node, Span, TokenKind},
};

struct Reader<'a> {
    source: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
}

/// Reads every top-level form in `source`. Diagnostics go to `reporter`;
/// an `Err` means at least one form was unreadable.
pub fn read_all(source: &str, reporter: &mut Reporter) -> CResult<Vec<Node>> {
    let mut reader = Reader {
        source: source.as_bytes(),
        pos: 0,
        line: 1,
        column: 1,
    };
    let mut forms = Vec::new();
    loop {
        reader.skip_trivia();
        if reader.at_end() {
            return Ok(forms);
        }
        forms.push(reader.read_form(reporter)?);
    }
}

/// Reads a single form from `source`; trailing text is an error.
pub fn read_one(source: &str, reporter: &mut Reporter) -> CResult<Node> {
    let mut forms = read_all(source, reporter)?;
    match forms.len() {
        1 => Ok(forms.pop().unwrap_or_else(|| unreachable!())),
        _ => Err(reporter.report(Diagnostic::with_detail(
            ErrorKind::UnableToParseForm,
            Span::default(),
            "expected exactly one form",
        ))),
    }
}

impl Reader<'_> {
    fn at_end(&self) -> bool {
        self.pos >= self.source.len()
    }

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn here(&self) -> (u32, u32) {
        (self.line, self.column)
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        if byte == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(byte)
    }

    fn skip_trivia(&mut self) {
        while let Some(byte) = self.peek() {
            match byte {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.bump();
                }
                b';' => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn read_form(&mut self, reporter: &mut Reporter) -> CResult<Node> {
        self.skip_trivia();
        let (begin_line, begin_column) = self.here();
        match self.peek() {
            None => Err(reporter.report(Diagnostic::new(
                ErrorKind::UnbalancedParenthesis,
                Span::new(begin_line, begin_column, begin_line, begin_column),
            ))),
            Some(b'(') => {
                self.bump();
                let mut children = Vec::new();
                loop {
                    self.skip_trivia();
                    match self.peek() {
                        None => {
                            return Err(reporter.report(Diagnostic::new(
                                ErrorKind::UnbalancedParenthesis,
                                Span::new(begin_line, begin_column, self.line, self.column),
                            )));
                        }
                        Some(b')') => {
                            self.bump();
                            let span = Span::new(begin_line, begin_column, self.line, self.column.saturating_sub(1));
                            return Ok(Node::list(children, span));
                        }
                        Some(_) => children.push(self.read_form(reporter)?),
                    }
                }
            }
            Some(b')') => {
                self.bump();
                Err(reporter.report(Diagnostic::new(
                    ErrorKind::UnbalancedParenthesis,
                    Span::new(begin_line, begin_column, self.line, self.column),
                )))
            }
            Some(b'"') => self.read_string(reporter, begin_line, begin_column),
            Some(_) => self.read_atom(reporter, begin_line, begin_column),
        }
    }

    fn read_string(&mut self, reporter: &mut Reporter, begin_line: u32, begin_column: u32) -> CResult<Node> {
        self.bump();
        let mut text = String::new();
        loop {
            match self.bump() {
                None => {
                    return Err(reporter.report(Diagnostic::new(
                        ErrorKind::UnterminatedStringLiteral,
                        Span::new(begin_line, begin_column, self.line, self.column),
                    )));
                }
                Some(b'"') => {
                    let span = Span::new(begin_line, begin_column, self.line, self.column.saturating_sub(1));
                    return Ok(Node::token(TokenKind::StringLit, text, span));
                }
                Some(b'\\') => match self.bump() {
                    Some(b'n') => text.push('\n'),
                    Some(b't') => text.push('\t'),
                    Some(b'r') => text.push('\r'),
                    Some(b'0') => text.push('\0'),
                    Some(b'\\') => text.push('\\'),
                    Some(b'"') => text.push('"'),
                    Some(other) => text.push(char::from(other)),
                    None => {
                        return Err(reporter.report(Diagnostic::new(
                            ErrorKind::UnterminatedStringLiteral,
                            Span::new(begin_line, begin_column, self.line, self.column),
                        )));
                    }
                },
                Some(byte) => text.push(char::from(byte)),
            }
        }
    }

    fn read_atom(&mut self, reporter: &mut Reporter, begin_line: u32, begin_column: u32) -> CResult<Node> {
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if matches!(byte, b' ' | b'\t' | b'\r' | b'\n' | b'(' | b')' | b'"' | b';') {
                break;
            }
            self.bump();
        }
        let text = String::from_utf8_lossy(&self.source[start..self.pos]).into_owned();
        let span = Span::new(begin_line, begin_column, self.line, self.column.saturating_sub(1));
        classify_atom(&text, span).map_err(|kind| reporter.report(Diagnostic::with_detail(kind, span, text)))
    }
}

/// Classifies an atom's text as an integer, a float, or a symbol.
///
/// A leading digit (or `-` followed by a digit) commits the atom to the
/// numeric grammar; malformed numerics are lexical errors rather than
/// symbols. This same classification runs on token text returned from
/// macros over the wire format.
pub fn classify_atom(text: &str, span: Span) -> Result<Node, ErrorKind> {
    let bytes = text.as_bytes();
    let numeric = match bytes {
        [] => false,
        [b'-', second, ..] => second.is_ascii_digit(),
        [first, ..] => first.is_ascii_digit(),
    };
    if !numeric {
        return Ok(Node::token(TokenKind::Symbol, text, span));
    }
    if text.contains('.') {
        if is_simple_float(text) {
            Ok(Node::token(TokenKind::Float, text, span))
        } else {
            Err(ErrorKind::InvalidFloat)
        }
    } else if is_simple_int(text) {
        Ok(Node::token(TokenKind::Int, text, span))
    } else {
        Err(ErrorKind::InvalidInteger)
    }
}

fn is_simple_int(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn is_simple_float(text: &str) -> bool {
    let unsigned = text.strip_prefix('-').unwrap_or(text);
    let Some((whole, frac)) = unsigned.split_once('.') else {
        return false;
    };
    !whole.is_empty()
        && !frac.is_empty()
        && whole.bytes().all(|b| b.is_ascii_digit())
        && frac.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(source: &str) -> Vec<Node> {
        let mut reporter = Reporter::new("test.ka");
        let forms = read_all(source, &mut reporter);
        assert!(reporter.diagnostics().is_empty(), "{:?}", reporter.diagnostics());
        forms.unwrap()
    }

    #[test]
    fn reads_nested_lists() {
        let forms = read("(def x (var auto int 42))");
        assert_eq!(forms.len(), 1);
        assert_eq!(forms[0].to_string(), "(def x (var auto int 42))");
    }

    #[test]
    fn classifies_numbers() {
        let forms = read("(-12 3.5 abc -x)");
        let children = forms[0].as_list().unwrap();
        assert_eq!(children[0].as_token().unwrap().kind, TokenKind::Int);
        assert_eq!(children[1].as_token().unwrap().kind, TokenKind::Float);
        assert_eq!(children[2].as_token().unwrap().kind, TokenKind::Symbol);
        assert_eq!(children[3].as_token().unwrap().kind, TokenKind::Symbol);
    }

    #[test]
    fn rejects_malformed_float() {
        let mut reporter = Reporter::new("test.ka");
        assert_eq!(read_all("(1.2.3)", &mut reporter), Err(Failed));
        assert_eq!(reporter.diagnostics()[0].kind, ErrorKind::InvalidFloat);
    }

    #[test]
    fn string_escapes_expand() {
        let forms = read("(\"a\\nb\")");
        let children = forms[0].as_list().unwrap();
        assert_eq!(children[0].as_token().unwrap().text, "a\nb");
    }

    #[test]
    fn spans_track_lines() {
        let forms = read("(a\n  b)");
        let children = forms[0].as_list().unwrap();
        assert_eq!(children[1].span.begin_line, 2);
        assert_eq!(children[1].span.begin_column, 3);
    }

    #[test]
    fn comments_are_skipped() {
        let forms = read("; heading\n(a) ; trailing\n(b)");
        assert_eq!(forms.len(), 2);
    }
}
