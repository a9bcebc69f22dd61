//! Default syntax checker: delimiter balance for Elixir-like sources.
//!
//! This is not a parser. It tracks brackets, `do`/`fn` ... `end` blocks,
//! strings, heredocs, sigils and comments, and flags a dangling binary
//! operator at end of input. Only the first problem is reported, the way a
//! compiler stops at its first syntax error.

use std::panic::AssertUnwindSafe;
use std::path::Path;

use ember_types::{Diagnostic, DiagnosticSource, Point, Severity, Span};

use crate::ledger::panic_payload_to_string;
use crate::toolchain::SyntaxChecker;

const TRAILING_OPERATORS: &[char] = &['+', '-', '*', '/', '=', '<', '>', '|', '&', ',', '.'];

#[derive(Debug, Clone, Copy, Default)]
pub struct DelimiterChecker;

impl SyntaxChecker for DelimiterChecker {
    fn check(&self, text: &str, path: &Path) -> Vec<Diagnostic> {
        Scanner::new(text)
            .run()
            .err()
            .map(|(span, message)| {
                Diagnostic::new(path, Severity::Error, message, span, DiagnosticSource::Parser)
            })
            .into_iter()
            .collect()
    }
}

/// Run `checker`, converting a panic into an error diagnostic for `path`.
pub fn check_isolated(checker: &dyn SyntaxChecker, text: &str, path: &Path) -> Vec<Diagnostic> {
    match std::panic::catch_unwind(AssertUnwindSafe(|| checker.check(text, path))) {
        Ok(diagnostics) => diagnostics,
        Err(payload) => {
            let reason = panic_payload_to_string(&payload);
            tracing::error!(path = %path.display(), "syntax checker panicked: {reason}");
            vec![Diagnostic::new(
                path,
                Severity::Error,
                format!("internal error while parsing: {reason}"),
                Span::File,
                DiagnosticSource::Parser,
            )]
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Open {
    opener: &'static str,
    closer: &'static str,
    at: Point,
}

type ScanError = (Span, String);

struct Scanner {
    chars: Vec<(Point, char)>,
    idx: usize,
    stack: Vec<Open>,
    /// Last significant token was a binary operator.
    dangling_operator: bool,
    /// Position just past the last significant character.
    end: Point,
}

impl Scanner {
    fn new(text: &str) -> Self {
        let mut chars = Vec::with_capacity(text.len());
        let (mut line, mut column) = (1, 1);
        for ch in text.chars() {
            chars.push((Point::new(line, column), ch));
            if ch == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        Self {
            chars,
            idx: 0,
            stack: Vec::new(),
            dangling_operator: false,
            end: Point::new(1, 1),
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.idx + offset).map(|(_, ch)| *ch)
    }

    fn point(&self) -> Point {
        self.chars
            .get(self.idx)
            .map_or(self.end, |(point, _)| *point)
    }

    fn mark_significant(&mut self, last_idx: usize) {
        if let Some((point, _)) = self.chars.get(last_idx) {
            self.end = Point::new(point.line, point.column + 1);
        }
    }

    fn run(mut self) -> Result<(), ScanError> {
        while let Some(ch) = self.peek(0) {
            match ch {
                '#' => self.skip_comment(),
                c if c.is_whitespace() => self.idx += 1,
                '"' | '\'' => self.string(ch)?,
                '~' if self.peek(1).is_some_and(|c| c.is_ascii_alphabetic()) => self.sigil()?,
                '?' if self.peek(1).is_some() => {
                    // Character literal such as `?(`.
                    self.mark_significant(self.idx + 1);
                    self.idx += 2;
                    self.dangling_operator = false;
                }
                ':' if self.peek(1).is_some_and(is_ident_start) => {
                    self.idx += 1;
                    self.identifier();
                    self.dangling_operator = false;
                }
                c if is_ident_start(c) => self.word()?,
                '(' | '[' | '{' => {
                    let (opener, closer) = match ch {
                        '(' => ("(", ")"),
                        '[' => ("[", "]"),
                        _ => ("{", "}"),
                    };
                    self.push(opener, closer);
                    self.idx += 1;
                }
                ')' | ']' | '}' => {
                    let closer = match ch {
                        ')' => ")",
                        ']' => "]",
                        _ => "}",
                    };
                    self.pop(closer)?;
                    self.idx += 1;
                }
                c => {
                    self.mark_significant(self.idx);
                    self.dangling_operator = TRAILING_OPERATORS.contains(&c);
                    self.idx += 1;
                }
            }
        }

        if let Some(open) = self.stack.last() {
            return Err((
                Span::Point(self.end),
                format!(
                    "missing terminator: {} (for \"{}\" starting at line {})",
                    open.closer, open.opener, open.at.line
                ),
            ));
        }
        if self.dangling_operator {
            return Err((
                Span::Point(self.end),
                "syntax error: expression is incomplete".to_string(),
            ));
        }
        Ok(())
    }

    fn push(&mut self, opener: &'static str, closer: &'static str) {
        let at = self.point();
        self.stack.push(Open { opener, closer, at });
        self.mark_significant(self.idx);
        self.dangling_operator = false;
    }

    fn pop(&mut self, closer: &'static str) -> Result<(), ScanError> {
        let at = self.point();
        match self.stack.pop() {
            Some(open) if open.closer == closer => {
                self.mark_significant(self.idx);
                self.dangling_operator = false;
                Ok(())
            }
            Some(open) => Err((
                Span::Point(at),
                format!(
                    "unexpected token: {closer}. The \"{}\" at line {} is missing terminator \"{}\"",
                    open.opener, open.at.line, open.closer
                ),
            )),
            None => Err((Span::Point(at), format!("unexpected token: {closer}"))),
        }
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek(0) {
            if ch == '\n' {
                break;
            }
            self.idx += 1;
        }
    }

    /// Consume an identifier and return it.
    fn identifier(&mut self) -> String {
        let mut word = String::new();
        while let Some(ch) = self.peek(0) {
            if ch.is_alphanumeric() || ch == '_' {
                word.push(ch);
                self.idx += 1;
            } else {
                break;
            }
        }
        if let Some(ch @ ('?' | '!')) = self.peek(0) {
            word.push(ch);
            self.idx += 1;
        }
        self.mark_significant(self.idx - 1);
        word
    }

    fn word(&mut self) -> Result<(), ScanError> {
        let at = self.point();
        let after_dot = self.idx > 0 && self.chars[self.idx - 1].1 == '.';
        let word = self.identifier();
        self.dangling_operator = false;

        // `do:` and friends are keyword-list keys; `foo.end` is a call.
        let is_key = self.peek(0) == Some(':') && self.peek(1) != Some(':');
        if is_key || after_dot {
            return Ok(());
        }
        match word.as_str() {
            "do" | "fn" => self.stack.push(Open {
                opener: if word == "do" { "do" } else { "fn" },
                closer: "end",
                at,
            }),
            "end" => match self.stack.pop() {
                Some(open) if open.closer == "end" => {}
                Some(open) => {
                    return Err((
                        Span::Point(at),
                        format!(
                            "unexpected reserved word: end. The \"{}\" at line {} is missing terminator \"{}\"",
                            open.opener, open.at.line, open.closer
                        ),
                    ));
                }
                None => return Err((Span::Point(at), "unexpected reserved word: end".to_string())),
            },
            _ => {}
        }
        Ok(())
    }

    fn string(&mut self, quote: char) -> Result<(), ScanError> {
        let at = self.point();
        if self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
            return self.heredoc(quote, at);
        }
        self.idx += 1;
        while let Some(ch) = self.peek(0) {
            match ch {
                '\\' => self.idx += 2,
                c if c == quote => {
                    self.mark_significant(self.idx);
                    self.idx += 1;
                    self.dangling_operator = false;
                    return Ok(());
                }
                _ => self.idx += 1,
            }
        }
        Err((
            Span::Point(self.chars.last().map_or(at, |(p, _)| Point::new(p.line, p.column + 1))),
            format!("missing terminator: {quote} (for string starting at line {})", at.line),
        ))
    }

    fn heredoc(&mut self, quote: char, at: Point) -> Result<(), ScanError> {
        self.idx += 3;
        while self.idx < self.chars.len() {
            if self.peek(0) == Some('\\') {
                self.idx += 2;
                continue;
            }
            if self.peek(0) == Some(quote) && self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
                self.mark_significant(self.idx + 2);
                self.idx += 3;
                self.dangling_operator = false;
                return Ok(());
            }
            self.idx += 1;
        }
        let delimiter: String = std::iter::repeat_n(quote, 3).collect();
        Err((
            Span::Point(self.chars.last().map_or(at, |(p, _)| Point::new(p.line, p.column + 1))),
            format!("missing terminator: {delimiter} (for heredoc starting at line {})", at.line),
        ))
    }

    fn sigil(&mut self) -> Result<(), ScanError> {
        let at = self.point();
        self.idx += 1;
        while self.peek(0).is_some_and(|c| c.is_ascii_alphabetic()) {
            self.idx += 1;
        }
        let Some(open) = self.peek(0) else {
            return Err((Span::Point(at), "syntax error: incomplete sigil".to_string()));
        };
        if matches!(open, '"' | '\'') && self.peek(1) == Some(open) && self.peek(2) == Some(open) {
            return self.heredoc(open, at);
        }
        let close = match open {
            '(' => ')',
            '[' => ']',
            '{' => '}',
            '<' => '>',
            c => c,
        };
        self.idx += 1;
        while let Some(ch) = self.peek(0) {
            match ch {
                '\\' => self.idx += 2,
                c if c == close => {
                    self.idx += 1;
                    // Modifiers, e.g. `~r/x/i`.
                    while self.peek(0).is_some_and(|c| c.is_ascii_alphabetic()) {
                        self.idx += 1;
                    }
                    self.mark_significant(self.idx - 1);
                    self.dangling_operator = false;
                    return Ok(());
                }
                _ => self.idx += 1,
            }
        }
        Err((
            Span::Point(self.chars.last().map_or(at, |(p, _)| Point::new(p.line, p.column + 1))),
            format!("missing terminator: {close} (for sigil starting at line {})", at.line),
        ))
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}
