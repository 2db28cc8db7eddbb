//! Tokenizer: turns source text into a stream of tokens with INDENT/DEDENT structure.
//!
//! Indentation is tracked with a stack of column widths; newlines inside brackets and
//! after a trailing backslash are implicit line joins and produce no `Newline` token.
//! String literals are decoded here, except f-strings whose raw body is handed to the
//! parser so replacement fields can be parsed as expressions.

use num_bigint::BigInt;
use num_traits::ToPrimitive;
use strum::{EnumString, IntoStaticStr};

use crate::{
    exception_public::CodeLoc,
    parse::{CodeRange, ParseError},
};

/// Reserved words. Soft keywords (`match`, `case`, `_`) are lexed as names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum Keyword {
    #[strum(serialize = "False")]
    False,
    #[strum(serialize = "None")]
    None,
    #[strum(serialize = "True")]
    True,
    And,
    As,
    Assert,
    Async,
    Await,
    Break,
    Class,
    Continue,
    Def,
    Del,
    Elif,
    Else,
    Except,
    Finally,
    For,
    From,
    Global,
    If,
    Import,
    In,
    Is,
    Lambda,
    Nonlocal,
    Not,
    Or,
    Pass,
    Raise,
    Return,
    Try,
    While,
    With,
    Yield,
}

/// Punctuation and operator tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub(crate) enum Punct {
    #[strum(serialize = "(")]
    LParen,
    #[strum(serialize = ")")]
    RParen,
    #[strum(serialize = "[")]
    LBracket,
    #[strum(serialize = "]")]
    RBracket,
    #[strum(serialize = "{")]
    LBrace,
    #[strum(serialize = "}")]
    RBrace,
    #[strum(serialize = ",")]
    Comma,
    #[strum(serialize = ":")]
    Colon,
    #[strum(serialize = ";")]
    Semi,
    #[strum(serialize = ".")]
    Dot,
    #[strum(serialize = "...")]
    Ellipsis,
    #[strum(serialize = "->")]
    Arrow,
    #[strum(serialize = "=")]
    Assign,
    #[strum(serialize = ":=")]
    Walrus,
    #[strum(serialize = "+")]
    Plus,
    #[strum(serialize = "-")]
    Minus,
    #[strum(serialize = "*")]
    Star,
    #[strum(serialize = "/")]
    Slash,
    #[strum(serialize = "//")]
    DoubleSlash,
    #[strum(serialize = "%")]
    Percent,
    #[strum(serialize = "**")]
    DoubleStar,
    #[strum(serialize = "@")]
    At,
    #[strum(serialize = "&")]
    Amper,
    #[strum(serialize = "|")]
    Pipe,
    #[strum(serialize = "^")]
    Caret,
    #[strum(serialize = "~")]
    Tilde,
    #[strum(serialize = "<<")]
    LShift,
    #[strum(serialize = ">>")]
    RShift,
    #[strum(serialize = "<")]
    Less,
    #[strum(serialize = ">")]
    Greater,
    #[strum(serialize = "<=")]
    LessEq,
    #[strum(serialize = ">=")]
    GreaterEq,
    #[strum(serialize = "==")]
    EqEq,
    #[strum(serialize = "!=")]
    NotEq,
    #[strum(serialize = "+=")]
    PlusEq,
    #[strum(serialize = "-=")]
    MinusEq,
    #[strum(serialize = "*=")]
    StarEq,
    #[strum(serialize = "/=")]
    SlashEq,
    #[strum(serialize = "//=")]
    DoubleSlashEq,
    #[strum(serialize = "%=")]
    PercentEq,
    #[strum(serialize = "**=")]
    DoubleStarEq,
    #[strum(serialize = "@=")]
    AtEq,
    #[strum(serialize = "&=")]
    AmperEq,
    #[strum(serialize = "|=")]
    PipeEq,
    #[strum(serialize = "^=")]
    CaretEq,
    #[strum(serialize = "<<=")]
    LShiftEq,
    #[strum(serialize = ">>=")]
    RShiftEq,
}

/// Operators ordered longest first so greedy matching picks `**=` over `**` over `*`.
const PUNCTUATION: &[(&str, Punct)] = &[
    ("...", Punct::Ellipsis),
    ("**=", Punct::DoubleStarEq),
    ("//=", Punct::DoubleSlashEq),
    ("<<=", Punct::LShiftEq),
    (">>=", Punct::RShiftEq),
    ("->", Punct::Arrow),
    (":=", Punct::Walrus),
    ("**", Punct::DoubleStar),
    ("//", Punct::DoubleSlash),
    ("<<", Punct::LShift),
    (">>", Punct::RShift),
    ("<=", Punct::LessEq),
    (">=", Punct::GreaterEq),
    ("==", Punct::EqEq),
    ("!=", Punct::NotEq),
    ("+=", Punct::PlusEq),
    ("-=", Punct::MinusEq),
    ("*=", Punct::StarEq),
    ("/=", Punct::SlashEq),
    ("%=", Punct::PercentEq),
    ("@=", Punct::AtEq),
    ("&=", Punct::AmperEq),
    ("|=", Punct::PipeEq),
    ("^=", Punct::CaretEq),
    ("(", Punct::LParen),
    (")", Punct::RParen),
    ("[", Punct::LBracket),
    ("]", Punct::RBracket),
    ("{", Punct::LBrace),
    ("}", Punct::RBrace),
    (",", Punct::Comma),
    (":", Punct::Colon),
    (";", Punct::Semi),
    (".", Punct::Dot),
    ("=", Punct::Assign),
    ("+", Punct::Plus),
    ("-", Punct::Minus),
    ("*", Punct::Star),
    ("/", Punct::Slash),
    ("%", Punct::Percent),
    ("@", Punct::At),
    ("&", Punct::Amper),
    ("|", Punct::Pipe),
    ("^", Punct::Caret),
    ("~", Punct::Tilde),
    ("<", Punct::Less),
    (">", Punct::Greater),
];

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    Name(String),
    Keyword(Keyword),
    Int(i64),
    BigInt(BigInt),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// Undecoded body of an f-string; `raw` is set for `rf"..."`.
    FString {
        body: String,
        raw: bool,
    },
    Punct(Punct),
    Newline,
    Indent,
    Dedent,
    EndOfFile,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub tok: Tok,
    pub range: CodeRange,
}

/// Tokenizes a whole module.
pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
    indents: Vec<u32>,
    paren_depth: usize,
    at_line_start: bool,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 0,
            indents: vec![0],
            paren_depth: 0,
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    fn loc(&self) -> CodeLoc {
        CodeLoc::new(self.line, self.col)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 0;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn error(&self, msg: impl Into<String>) -> ParseError {
        ParseError::syntax(msg.into(), CodeRange::point(self.loc()))
    }

    fn push(&mut self, tok: Tok, start: CodeLoc) {
        let range = CodeRange::new(start, self.loc());
        self.tokens.push(Token { tok, range });
    }

    fn run(mut self) -> Result<Vec<Token>, ParseError> {
        loop {
            if self.at_line_start && self.paren_depth == 0 {
                if !self.handle_indentation()? {
                    break;
                }
            }
            let Some(c) = self.peek() else { break };
            let start = self.loc();
            match c {
                ' ' | '\t' | '\x0c' | '\r' => {
                    self.bump();
                }
                '#' => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.bump();
                    }
                }
                '\n' => {
                    self.bump();
                    if self.paren_depth == 0 {
                        self.push(Tok::Newline, start);
                        self.at_line_start = true;
                    }
                }
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.bump();
                    self.bump();
                }
                '\\' if self.peek_at(1) == Some('\r') && self.peek_at(2) == Some('\n') => {
                    self.bump();
                    self.bump();
                    self.bump();
                }
                '0'..='9' => self.lex_number()?,
                '.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.lex_number()?,
                '\'' | '"' => self.lex_string(String::new())?,
                c if is_identifier_start(c) => self.lex_name()?,
                _ => self.lex_punct()?,
            }
        }
        let end = self.loc();
        if !matches!(self.tokens.last().map(|t| &t.tok), None | Some(Tok::Newline)) {
            self.push(Tok::Newline, end);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent, end);
        }
        self.push(Tok::EndOfFile, end);
        Ok(self.tokens)
    }

    /// Measures leading whitespace of a logical line and emits INDENT/DEDENT tokens.
    ///
    /// Returns `false` at end of input. Blank and comment-only lines are skipped entirely.
    fn handle_indentation(&mut self) -> Result<bool, ParseError> {
        loop {
            let mut width = 0u32;
            while let Some(c) = self.peek() {
                match c {
                    ' ' => width += 1,
                    '\t' => width = (width / 8 + 1) * 8,
                    '\x0c' => width = 0,
                    _ => break,
                }
                self.bump();
            }
            match self.peek() {
                None => return Ok(false),
                Some('\n') => {
                    self.bump();
                    continue;
                }
                Some('\r') if self.peek_at(1) == Some('\n') => {
                    self.bump();
                    self.bump();
                    continue;
                }
                Some('#') => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.bump();
                    }
                    continue;
                }
                Some(_) => {}
            }
            self.at_line_start = false;
            let start = self.loc();
            let current = *self.indents.last().expect("indent stack is never empty");
            if width > current {
                self.indents.push(width);
                self.push(Tok::Indent, start);
            } else {
                while width < *self.indents.last().expect("indent stack is never empty") {
                    self.indents.pop();
                    self.push(Tok::Dedent, start);
                }
                if width != *self.indents.last().expect("indent stack is never empty") {
                    return Err(ParseError::indentation(
                        "unindent does not match any outer indentation level",
                        CodeRange::point(start),
                    ));
                }
            }
            return Ok(true);
        }
    }

    fn lex_name(&mut self) -> Result<(), ParseError> {
        let start = self.loc();
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if is_identifier_continue(c) {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if matches!(self.peek(), Some('\'' | '"')) && is_string_prefix(&name) {
            return self.lex_string_at(name, start);
        }
        let tok = match name.parse::<Keyword>() {
            Ok(kw) => Tok::Keyword(kw),
            Err(_) => Tok::Name(name),
        };
        self.push(tok, start);
        Ok(())
    }

    fn lex_punct(&mut self) -> Result<(), ParseError> {
        let start = self.loc();
        for (text, punct) in PUNCTUATION {
            if text.chars().enumerate().all(|(i, c)| self.peek_at(i) == Some(c)) {
                for _ in 0..text.len() {
                    self.bump();
                }
                match punct {
                    Punct::LParen | Punct::LBracket | Punct::LBrace => self.paren_depth += 1,
                    Punct::RParen | Punct::RBracket | Punct::RBrace => {
                        self.paren_depth = self.paren_depth.saturating_sub(1);
                    }
                    _ => {}
                }
                self.push(Tok::Punct(*punct), start);
                return Ok(());
            }
        }
        let c = self.peek().unwrap_or('?');
        Err(self.error(format!("invalid character '{c}' (U+{:04X})", u32::from(c))))
    }

    fn lex_number(&mut self) -> Result<(), ParseError> {
        let start = self.loc();
        let mut text = String::new();
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x' | 'X' | 'o' | 'O' | 'b' | 'B')) {
            self.bump();
            let radix = match self.bump() {
                Some('x' | 'X') => 16,
                Some('o' | 'O') => 8,
                _ => 2,
            };
            while let Some(c) = self.peek() {
                if c == '_' {
                    self.bump();
                } else if c.is_digit(radix) {
                    text.push(c);
                    self.bump();
                } else if c.is_ascii_alphanumeric() {
                    return Err(self.error("invalid digit in integer literal"));
                } else {
                    break;
                }
            }
            if text.is_empty() {
                return Err(self.error("invalid integer literal"));
            }
            let tok = int_token(&text, radix).ok_or_else(|| self.error("invalid integer literal"))?;
            self.push(tok, start);
            return Ok(());
        }

        let mut is_float = false;
        self.take_digits(&mut text);
        if self.peek() == Some('.') && !matches!(self.peek_at(1), Some('.')) {
            is_float = true;
            text.push('.');
            self.bump();
            self.take_digits(&mut text);
        }
        if matches!(self.peek(), Some('e' | 'E'))
            && (self.peek_at(1).is_some_and(|c| c.is_ascii_digit())
                || (matches!(self.peek_at(1), Some('+' | '-')) && self.peek_at(2).is_some_and(|c| c.is_ascii_digit())))
        {
            is_float = true;
            text.push('e');
            self.bump();
            if let Some(sign @ ('+' | '-')) = self.peek() {
                text.push(sign);
                self.bump();
            }
            self.take_digits(&mut text);
        }
        if matches!(self.peek(), Some('j' | 'J')) {
            return Err(self.error("complex number literals are not supported"));
        }
        let tok = if is_float {
            Tok::Float(text.parse().map_err(|_| self.error("invalid float literal"))?)
        } else {
            if text.len() > 1 && text.starts_with('0') && text.chars().any(|c| c != '0') {
                return Err(self.error(
                    "leading zeros in decimal integer literals are not permitted; use an 0o prefix for octal integers",
                ));
            }
            int_token(&text, 10).ok_or_else(|| self.error("invalid integer literal"))?
        };
        self.push(tok, start);
        Ok(())
    }

    fn take_digits(&mut self, text: &mut String) {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else if c == '_' && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn lex_string(&mut self, prefix: String) -> Result<(), ParseError> {
        let start = self.loc();
        self.lex_string_at(prefix, start)
    }

    fn lex_string_at(&mut self, prefix: String, start: CodeLoc) -> Result<(), ParseError> {
        let prefix = prefix.to_ascii_lowercase();
        let raw = prefix.contains('r');
        let is_bytes = prefix.contains('b');
        let is_fstring = prefix.contains('f');
        let quote = self.bump().expect("caller checked for a quote");
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        // collect the undecoded body first, then decode according to the prefix
        let mut body = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(ParseError::syntax(
                    if triple {
                        "unterminated triple-quoted string literal"
                    } else {
                        "unterminated string literal"
                    },
                    CodeRange::point(start),
                ));
            };
            if c == '\n' && !triple {
                return Err(ParseError::syntax("unterminated string literal", CodeRange::point(start)));
            }
            if c == '\\' {
                body.push(c);
                self.bump();
                if let Some(next) = self.bump() {
                    body.push(next);
                }
                continue;
            }
            if c == quote {
                if !triple {
                    self.bump();
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.bump();
                    self.bump();
                    self.bump();
                    break;
                }
            }
            body.push(c);
            self.bump();
        }

        let tok = if is_fstring {
            Tok::FString { body, raw }
        } else if is_bytes {
            let decoded = if raw { body } else { decode_escapes(&body) };
            let mut bytes = Vec::with_capacity(decoded.len());
            for c in decoded.chars() {
                let b = u8::try_from(u32::from(c))
                    .map_err(|_| ParseError::syntax("bytes can only contain ASCII literal characters", CodeRange::point(start)))?;
                bytes.push(b);
            }
            Tok::Bytes(bytes)
        } else if raw {
            Tok::Str(body)
        } else {
            Tok::Str(decode_escapes(&body))
        };
        self.push(tok, start);
        Ok(())
    }
}

fn int_token(digits: &str, radix: u32) -> Option<Tok> {
    let big = BigInt::parse_bytes(digits.as_bytes(), radix)?;
    Some(match big.to_i64() {
        Some(i) => Tok::Int(i),
        None => Tok::BigInt(big),
    })
}

fn is_identifier_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_identifier_continue(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

fn is_string_prefix(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "r" | "u" | "b" | "f" | "br" | "rb" | "fr" | "rf"
    )
}

/// Decodes backslash escapes in a non-raw string body.
///
/// Unknown escapes keep their backslash, matching Python's lenient behaviour.
pub(crate) fn decode_escapes(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(next) = chars.next() else {
            out.push('\\');
            break;
        };
        match next {
            '\n' => {}
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            '0'..='7' => {
                let mut value = next.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(d) => {
                            value = value * 8 + d;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(value).unwrap_or('\u{fffd}'));
            }
            'x' | 'u' | 'U' => {
                let len = match next {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let hex: String = (0..len).filter_map(|_| chars.next_if(char::is_ascii_hexdigit)).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(ch) if hex.len() == len => out.push(ch),
                    _ => {
                        out.push('\\');
                        out.push(next);
                        out.push_str(&hex);
                    }
                }
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn kinds(source: &str) -> Vec<Tok> {
        tokenize(source).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn indentation_produces_indent_and_dedent() {
        let toks = kinds("if x:\n    y\nz\n");
        assert_eq!(
            toks,
            vec![
                Tok::Keyword(Keyword::If),
                Tok::Name("x".into()),
                Tok::Punct(Punct::Colon),
                Tok::Newline,
                Tok::Indent,
                Tok::Name("y".into()),
                Tok::Newline,
                Tok::Dedent,
                Tok::Name("z".into()),
                Tok::Newline,
                Tok::EndOfFile,
            ]
        );
    }

    #[test]
    fn brackets_join_lines() {
        let toks = kinds("x = [1,\n     2]\n");
        assert_eq!(toks.iter().filter(|t| **t == Tok::Newline).count(), 1);
    }

    #[test]
    fn raw_strings_keep_backslashes() {
        assert_eq!(kinds(r#"r"say \"hi\"""#)[0], Tok::Str(r#"say \"hi\""#.to_owned()));
        assert_eq!(kinds(r#""a\nb""#)[0], Tok::Str("a\nb".to_owned()));
    }

    #[test]
    fn numbers() {
        assert_eq!(kinds("0xff")[0], Tok::Int(255));
        assert_eq!(kinds("1_000")[0], Tok::Int(1000));
        assert_eq!(kinds("1.5e3")[0], Tok::Float(1500.0));
        assert!(matches!(kinds("99999999999999999999")[0], Tok::BigInt(_)));
    }

    #[test]
    fn bad_dedent_is_an_error() {
        let err = tokenize("if x:\n        a\n    b\n").unwrap_err();
        assert!(err.message().contains("unindent"));
    }
}
