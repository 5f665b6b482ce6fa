//! Declaration scanner for Go test sources.
//!
//! This is not a full Go parser. It tokenizes enough of the language (comments,
//! string/rune literals, identifiers, brackets) to find top-level `func`
//! declarations, their parameter shapes and the doc comment group in front of
//! them. Everything inside function bodies is skipped by bracket depth.

use crate::discovery::{Declaration, DiscoveryError, Param, SourceParser, TypeExpr};
use std::fs;
use std::path::Path;

/// [`SourceParser`] for Go source files.
#[derive(Debug, Default, Clone, Copy)]
pub struct GoSourceParser;

impl GoSourceParser {
    pub fn new() -> Self {
        GoSourceParser
    }

    /// Parses Go source text. `origin` is only used in error messages.
    pub fn parse_source(&self, origin: &str, src: &str) -> Result<Vec<Declaration>, DiscoveryError> {
        let tokens = Lexer::new(src).tokenize().map_err(|(line, msg)| DiscoveryError::Parse {
            file: origin.to_string(),
            line,
            message: msg,
        })?;
        DeclScanner::new(tokens)
            .scan()
            .map_err(|(line, msg)| DiscoveryError::Parse {
                file: origin.to_string(),
                line,
                message: msg,
            })
    }
}

impl SourceParser for GoSourceParser {
    fn parse_file(&self, path: &Path) -> Result<Vec<Declaration>, DiscoveryError> {
        let src = fs::read_to_string(path).map_err(|e| {
            DiscoveryError::Io(format!("Failed to read source file {:?}: {}", path, e))
        })?;
        self.parse_source(&path.display().to_string(), &src)
    }
}

type ScanResult<T> = Result<T, (usize, String)>;

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Punct(char),
    Literal,
    Comment(String),
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    line: usize,
    /// Last line the token spans; differs from `line` for block comments and raw strings.
    end_line: usize,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            chars: src.chars().peekable(),
            line: 1,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn tokenize(mut self) -> ScanResult<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(&c) = self.chars.peek() {
            let line = self.line;
            if c.is_whitespace() {
                self.bump();
                continue;
            }
            let kind = match c {
                '/' => {
                    self.bump();
                    match self.chars.peek() {
                        Some('/') => {
                            self.bump();
                            let mut text = String::from("//");
                            while let Some(&n) = self.chars.peek() {
                                if n == '\n' {
                                    break;
                                }
                                text.push(n);
                                self.bump();
                            }
                            TokenKind::Comment(text)
                        }
                        Some('*') => {
                            self.bump();
                            let mut text = String::from("/*");
                            loop {
                                match self.bump() {
                                    Some('*') if self.chars.peek() == Some(&'/') => {
                                        self.bump();
                                        text.push_str("*/");
                                        break;
                                    }
                                    Some(n) => text.push(n),
                                    None => return Err((line, "comment not terminated".into())),
                                }
                            }
                            TokenKind::Comment(text)
                        }
                        _ => TokenKind::Punct('/'),
                    }
                }
                '"' | '\'' => {
                    self.bump();
                    self.quoted(c, line)?;
                    TokenKind::Literal
                }
                '`' => {
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('`') => break,
                            Some(_) => {}
                            None => return Err((line, "raw string literal not terminated".into())),
                        }
                    }
                    TokenKind::Literal
                }
                c if c == '_' || c.is_alphabetic() => {
                    let mut ident = String::new();
                    while let Some(&n) = self.chars.peek() {
                        if n == '_' || n.is_alphanumeric() {
                            ident.push(n);
                            self.bump();
                        } else {
                            break;
                        }
                    }
                    TokenKind::Ident(ident)
                }
                c if c.is_ascii_digit() => {
                    while let Some(&n) = self.chars.peek() {
                        if n.is_alphanumeric() || n == '_' || n == '.' {
                            self.bump();
                        } else {
                            break;
                        }
                    }
                    TokenKind::Literal
                }
                other => {
                    self.bump();
                    TokenKind::Punct(other)
                }
            };
            tokens.push(Token {
                kind,
                line,
                end_line: self.line,
            });
        }
        Ok(tokens)
    }

    fn quoted(&mut self, quote: char, line: usize) -> ScanResult<()> {
        loop {
            match self.chars.peek().copied() {
                Some('\\') => {
                    self.bump();
                    self.bump();
                }
                Some('\n') | None => return Err((line, "literal not terminated".into())),
                Some(c) => {
                    self.bump();
                    if c == quote {
                        return Ok(());
                    }
                }
            }
        }
    }
}

const TYPE_KEYWORDS: &[&str] = &["chan", "func", "map", "struct", "interface"];

struct DeclScanner {
    tokens: Vec<Token>,
    pos: usize,
}

impl DeclScanner {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn scan(mut self) -> ScanResult<Vec<Declaration>> {
        // Tokens are cloned out so declaration parsing can advance `pos`.
        let tokens = self.tokens.clone();
        let mut decls = Vec::new();
        let mut open: Vec<(char, usize)> = Vec::new();
        let mut doc_group: Vec<&Token> = Vec::new();
        let mut last_code_line = 0usize;
        let mut prev_code: Option<&Token> = None;

        while self.pos < tokens.len() {
            let tok = &tokens[self.pos];
            if let TokenKind::Comment(_) = tok.kind {
                if tok.line == last_code_line {
                    // trailing comment of a code line
                } else if doc_group.last().is_some_and(|prev| prev.end_line + 1 >= tok.line) {
                    doc_group.push(tok);
                } else {
                    doc_group = vec![tok];
                }
                self.pos += 1;
                continue;
            }

            let first_on_line = tok.line > last_code_line;
            let doc = doc_group
                .last()
                .filter(|c| c.end_line + 1 == tok.line)
                .map(|_| doc_text(&doc_group));
            doc_group.clear();

            match &tok.kind {
                TokenKind::Ident(word)
                    if word == "func"
                        && open.is_empty()
                        && first_on_line
                        && ends_statement(prev_code) =>
                {
                    decls.push(self.declaration(tok.line, doc)?);
                    let last = &tokens[self.pos.saturating_sub(1)];
                    last_code_line = last.end_line;
                    prev_code = Some(last);
                    continue;
                }
                TokenKind::Punct(c @ ('(' | '[' | '{')) => open.push((*c, tok.line)),
                TokenKind::Punct(c @ (')' | ']' | '}')) => match open.pop() {
                    Some((o, _)) if closes(o, *c) => {}
                    Some((o, line)) => {
                        return Err((tok.line, format!("'{}' opened on line {} closed by '{}'", o, line, c)));
                    }
                    None => return Err((tok.line, format!("unexpected '{}'", c))),
                },
                _ => {}
            }
            last_code_line = tok.end_line;
            prev_code = Some(tok);
            self.pos += 1;
        }

        if let Some((o, line)) = open.pop() {
            return Err((line, format!("'{}' is never closed", o)));
        }
        Ok(decls)
    }

    /// Parses the signature after a top-level `func` keyword at `self.pos`.
    /// Leaves `self.pos` on the first token after the parameter list; the body
    /// is consumed by the caller's bracket tracking.
    fn declaration(&mut self, line: usize, doc: Option<String>) -> ScanResult<Declaration> {
        self.pos += 1;
        let mut is_method = false;
        if self.peek_punct('(') {
            is_method = true;
            self.group('(')?;
        }
        let name = match self.tokens.get(self.pos).map(|t| t.kind.clone()) {
            Some(TokenKind::Ident(name)) => name,
            _ => return Err((line, "expected function name after 'func'".into())),
        };
        self.pos += 1;
        if self.peek_punct('[') {
            self.group('[')?;
        }
        if !self.peek_punct('(') {
            return Err((line, format!("expected parameter list for '{}'", name)));
        }
        let inner = self.group('(')?;
        let params = parse_params(&inner).map_err(|msg| (line, msg))?;
        Ok(Declaration {
            name,
            params,
            doc,
            is_method,
            line,
        })
    }

    fn peek_punct(&self, c: char) -> bool {
        matches!(self.tokens.get(self.pos), Some(Token { kind: TokenKind::Punct(p), .. }) if *p == c)
    }

    /// Consumes a bracketed group starting at `self.pos` and returns the
    /// non-comment tokens between the outer brackets.
    fn group(&mut self, opener: char) -> ScanResult<Vec<Token>> {
        let start_line = self.tokens[self.pos].line;
        self.pos += 1;
        let mut depth = 1usize;
        let mut inner = Vec::new();
        while let Some(tok) = self.tokens.get(self.pos) {
            self.pos += 1;
            match tok.kind {
                TokenKind::Punct('(' | '[' | '{') => depth += 1,
                TokenKind::Punct(')' | ']' | '}') => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(inner);
                    }
                }
                TokenKind::Comment(_) => continue,
                _ => {}
            }
            inner.push(tok.clone());
        }
        Err((start_line, format!("'{}' is never closed", opener)))
    }
}

/// Whether a line break after `prev` terminates the statement, following
/// Go's semicolon insertion. A `func` after `=`, `,` or an operator
/// continues an expression and is a literal, not a declaration.
fn ends_statement(prev: Option<&Token>) -> bool {
    match prev.map(|t| &t.kind) {
        None => true,
        Some(TokenKind::Ident(_) | TokenKind::Literal) => true,
        Some(TokenKind::Punct(c)) => matches!(c, ')' | ']' | '}'),
        Some(TokenKind::Comment(_)) => true,
    }
}

fn closes(open: char, close: char) -> bool {
    matches!((open, close), ('(', ')') | ('[', ']') | ('{', '}'))
}

/// Splits a parameter list on top-level commas and applies Go's grouping rule:
/// if any entry is `name Type`, bare entries are names sharing the next type.
fn parse_params(tokens: &[Token]) -> Result<Vec<Param>, String> {
    let mut entries: Vec<Vec<&Token>> = vec![Vec::new()];
    let mut depth = 0usize;
    for tok in tokens {
        match tok.kind {
            TokenKind::Punct('(' | '[' | '{') => depth += 1,
            TokenKind::Punct(')' | ']' | '}') => depth = depth.saturating_sub(1),
            TokenKind::Punct(',') if depth == 0 => {
                entries.push(Vec::new());
                continue;
            }
            _ => {}
        }
        if let Some(last) = entries.last_mut() {
            last.push(tok);
        }
    }
    if entries.last().is_some_and(|e| e.is_empty()) {
        entries.pop();
    }
    if entries.iter().any(|e| e.is_empty()) {
        return Err("empty parameter entry".into());
    }

    let split: Vec<(Option<String>, &[&Token])> = entries
        .iter()
        .map(|entry| match (&entry[0].kind, entry.get(1)) {
            (TokenKind::Ident(name), Some(_))
                if !TYPE_KEYWORDS.contains(&name.as_str()) && !is_qualified(entry) =>
            {
                (Some(name.clone()), &entry[1..])
            }
            _ => (None, &entry[..]),
        })
        .collect();

    if split.iter().all(|(name, _)| name.is_none()) {
        return Ok(split
            .into_iter()
            .map(|(_, ty)| Param {
                name: None,
                ty: parse_type(ty),
            })
            .collect());
    }

    let mut params = Vec::new();
    let mut pending: Vec<String> = Vec::new();
    for (name, ty) in split {
        match name {
            Some(name) => {
                let ty = parse_type(ty);
                for pending_name in pending.drain(..) {
                    params.push(Param {
                        name: Some(pending_name),
                        ty: ty.clone(),
                    });
                }
                params.push(Param { name: Some(name), ty });
            }
            None => match ty {
                [Token { kind: TokenKind::Ident(n), .. }] => pending.push(n.clone()),
                _ => return Err("mixed named and unnamed parameters".into()),
            },
        }
    }
    if !pending.is_empty() {
        return Err(format!("parameters {:?} have no type", pending));
    }
    Ok(params)
}

/// `pkg.Type` as opposed to `name ...Type`.
fn is_qualified(entry: &[&Token]) -> bool {
    matches!(
        (entry.get(1).map(|t| &t.kind), entry.get(2).map(|t| &t.kind)),
        (Some(TokenKind::Punct('.')), Some(TokenKind::Ident(_)))
    )
}

fn parse_type(tokens: &[&Token]) -> TypeExpr {
    match tokens {
        [Token { kind: TokenKind::Punct('*'), .. }, rest @ ..] if !rest.is_empty() => {
            TypeExpr::Pointer(Box::new(parse_type(rest)))
        }
        [Token { kind: TokenKind::Ident(name), .. }] => TypeExpr::Named {
            qualifier: None,
            name: name.clone(),
        },
        [
            Token { kind: TokenKind::Ident(qualifier), .. },
            Token { kind: TokenKind::Punct('.'), .. },
            Token { kind: TokenKind::Ident(name), .. },
        ] => TypeExpr::Named {
            qualifier: Some(qualifier.clone()),
            name: name.clone(),
        },
        _ => TypeExpr::Other(render(tokens)),
    }
}

fn render(tokens: &[&Token]) -> String {
    let mut out = String::new();
    for tok in tokens {
        match &tok.kind {
            TokenKind::Ident(s) => {
                if out.ends_with(|c: char| c.is_alphanumeric() || c == '_') {
                    out.push(' ');
                }
                out.push_str(s);
            }
            TokenKind::Punct(c) => out.push(*c),
            TokenKind::Literal => out.push('_'),
            TokenKind::Comment(_) => {}
        }
    }
    out
}

fn doc_text(group: &[&Token]) -> String {
    let mut lines: Vec<String> = Vec::new();
    for tok in group {
        let TokenKind::Comment(text) = &tok.kind else {
            continue;
        };
        if let Some(body) = text.strip_prefix("//") {
            if is_directive(body) {
                continue;
            }
            lines.push(body.strip_prefix(' ').unwrap_or(body).trim_end().to_string());
        } else {
            let body = text
                .strip_prefix("/*")
                .and_then(|t| t.strip_suffix("*/"))
                .unwrap_or(text);
            lines.extend(body.lines().map(|l| l.trim().to_string()));
        }
    }
    lines.join("\n").trim().to_string()
}

/// `//go:generate`, `//line foo.go:1` and friends are not documentation.
fn is_directive(body: &str) -> bool {
    if body.starts_with("line ") {
        return true;
    }
    match body.split_once(':') {
        Some((prefix, _)) => {
            !prefix.is_empty()
                && prefix
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Vec<Declaration> {
        GoSourceParser::new().parse_source("test.go", src).unwrap()
    }

    #[test]
    fn finds_top_level_functions_with_doc() {
        let decls = parse(
            r#"package codec

import "testing"

// FuzzDecode finds decoder bugs.
//
// It seeds from testdata.
func FuzzDecode(f *testing.F) {
	f.Fuzz(func(t *testing.T, data []byte) {
		if len(data) > 3 { t.Fatal("}") }
	})
}

func helper(a, b int, s ...string) error { return nil }
"#,
        );
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[0].name, "FuzzDecode");
        assert_eq!(
            decls[0].doc.as_deref(),
            Some("FuzzDecode finds decoder bugs.\n\nIt seeds from testdata.")
        );
        assert_eq!(decls[0].params.len(), 1);
        assert_eq!(
            decls[0].params[0].ty,
            TypeExpr::Pointer(Box::new(TypeExpr::Named {
                qualifier: Some("testing".into()),
                name: "F".into(),
            }))
        );
        assert_eq!(decls[1].name, "helper");
        assert_eq!(decls[1].params.len(), 3);
        assert_eq!(decls[1].params[1].name.as_deref(), Some("b"));
        assert_eq!(
            decls[1].params[1].ty,
            TypeExpr::Named {
                qualifier: None,
                name: "int".into()
            }
        );
        assert!(decls[1].doc.is_none());
    }

    #[test]
    fn doc_must_touch_the_declaration() {
        let decls = parse("package p\n\n// detached\n\nfunc FuzzA(f *testing.F) {}\n");
        assert_eq!(decls.len(), 1);
        assert!(decls[0].doc.is_none());
    }

    #[test]
    fn block_doc_and_directives() {
        let decls = parse(
            "package p\n/* finds\n   things */\nfunc A() {}\n//go:noinline\n// real doc\nfunc B() {}\n",
        );
        assert_eq!(decls[0].doc.as_deref(), Some("finds\nthings"));
        assert_eq!(decls[1].doc.as_deref(), Some("real doc"));
    }

    #[test]
    fn methods_literals_and_generics() {
        let decls = parse(
            r#"package p
var handler = func(f *testing.F) {}
var helper =
	func(t *testing.T) {}
func (s *Server) FuzzMethod(f *testing.F) {}
func Map[T any](xs []T, fn func(T) T) []T { return xs }
func Unnamed(*testing.F, int) {}
"#,
        );
        assert_eq!(decls.len(), 3);
        assert!(decls[0].is_method);
        assert_eq!(decls[1].name, "Map");
        assert_eq!(decls[1].params.len(), 2);
        assert_eq!(decls[1].params[0].ty, TypeExpr::Other("[]T".into()));
        assert_eq!(decls[2].params.len(), 2);
        assert!(decls[2].params[0].name.is_none());
        assert_eq!(decls[0].line, 5);
    }

    #[test]
    fn func_literal_on_continuation_line_is_not_a_declaration() {
        let decls = parse(
            "package p\n\nimport \"testing\"\n\nvar helper =\n\tfunc(t *testing.T) {}\n\nfunc FuzzOk(f *testing.F) {}\n",
        );
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].name, "FuzzOk");
        assert_eq!(decls[0].line, 8);
    }

    #[test]
    fn strings_may_contain_brackets_and_comment_markers() {
        let decls = parse(
            "package p\nvar s = `{ /* `\nvar r = '{'\nvar q = \"// }\"\nfunc FuzzOk(f *testing.F) {}\n",
        );
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].line, 5);
    }

    #[test]
    fn malformed_sources_are_errors() {
        let p = GoSourceParser::new();
        for src in [
            "package p\nfunc A() {",
            "package p\n/* open",
            "package p\nvar s = \"open\nfunc A() {}",
            "package p\nfunc A() { ) }",
            "package p\nfunc (",
        ] {
            assert!(p.parse_source("bad.go", src).is_err(), "accepted: {src:?}");
        }
        match p.parse_source("bad.go", "package p\n\nfunc A() {") {
            Err(DiscoveryError::Parse { file, line, .. }) => {
                assert_eq!(file, "bad.go");
                assert_eq!(line, 3);
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
