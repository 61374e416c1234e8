//! Strict literal syntax for event lines.
//!
//! Scenario lines store their payload as a mapping literal written in the
//! familiar `{'type': 'delay', 'value': '2'}` notation. Only plain data is
//! accepted: strings, integers, floats, `True`/`False`/`None`, lists, tuples
//! and string-keyed mappings. Names, calls and operators are rejected, so a
//! scenario file can never execute anything by being read.

use std::fmt;

use logos::Logos;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// A parsed literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Literal>),
    /// Insertion-ordered; keys are always strings.
    Map(Vec<(String, Literal)>),
}

/// Errors produced while reading a literal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LiteralError {
    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("unexpected `{found}` at offset {offset}")]
    Unexpected { found: String, offset: usize },

    #[error("names are not allowed in literals: `{name}` at offset {offset}")]
    Name { name: String, offset: usize },

    #[error("mapping keys must be strings (offset {offset})")]
    NonStringKey { offset: usize },

    #[error("nesting too deep at offset {offset}")]
    TooDeep { offset: usize },
}

/// Deepest list/tuple/mapping nesting a line may use.
const MAX_DEPTH: usize = 64;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
enum Token {
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token("True")]
    True,
    #[token("False")]
    False,
    #[token("None")]
    None,

    #[regex(r"[+-]?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r"[+-]?([0-9]+\.[0-9]*|\.[0-9]+)([eE][+-]?[0-9]+)?", finite_float)]
    #[regex(r"[+-]?[0-9]+[eE][+-]?[0-9]+", finite_float)]
    Float(f64),

    // Optional `u` prefix keeps files written by older recorders readable.
    #[regex(r#"u?'([^'\\\n]|\\.)*'"#, |lex| unescape(lex.slice()))]
    #[regex(r#"u?"([^"\\\n]|\\.)*""#, |lex| unescape(lex.slice()))]
    Str(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", priority = 1)]
    Name,
}

/// Parses a literal at the start of `src`.
///
/// Returns the value and the byte offset just past it, so callers can keep
/// whatever follows (event lines may carry a trailing comment).
pub fn parse_prefix(src: &str) -> Result<(Literal, usize), LiteralError> {
    let mut parser = Parser::new(src);
    let value = parser.value()?;
    Ok((value, parser.consumed()))
}

/// Parses `src` as exactly one literal; trailing tokens are an error.
#[cfg(test)]
pub fn parse(src: &str) -> Result<Literal, LiteralError> {
    let (value, consumed) = parse_prefix(src)?;
    let rest = &src[consumed..];
    match rest.trim_start().chars().next() {
        None => Ok(value),
        Some(c) => Err(LiteralError::Unexpected {
            found: c.to_string(),
            offset: consumed + (rest.len() - rest.trim_start().len()),
        }),
    }
}

/// Overflowing exponents (`1e999`) have no finite value to write back.
fn finite_float(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    lex.slice().parse::<f64>().ok().filter(|v| v.is_finite())
}

struct Parser<'src> {
    lexer: logos::Lexer<'src, Token>,
    peeked: Option<Token>,
    depth: usize,
}

impl<'src> Parser<'src> {
    fn new(src: &'src str) -> Self {
        Self {
            lexer: Token::lexer(src),
            peeked: None,
            depth: 0,
        }
    }

    fn consumed(&self) -> usize {
        self.lexer.span().end
    }

    fn offset(&self) -> usize {
        self.lexer.span().start
    }

    fn next(&mut self) -> Result<Token, LiteralError> {
        if let Some(token) = self.peeked.take() {
            return Ok(token);
        }
        match self.lexer.next() {
            Some(Ok(token)) => Ok(token),
            Some(Err(())) => Err(LiteralError::Unexpected {
                found: self.lexer.slice().to_string(),
                offset: self.offset(),
            }),
            None => Err(LiteralError::UnexpectedEnd),
        }
    }

    fn peek(&mut self) -> Result<&Token, LiteralError> {
        if self.peeked.is_none() {
            self.peeked = Some(self.next()?);
        }
        self.peeked.as_ref().ok_or(LiteralError::UnexpectedEnd)
    }

    fn unexpected(&self) -> LiteralError {
        LiteralError::Unexpected {
            found: self.lexer.slice().to_string(),
            offset: self.offset(),
        }
    }

    fn value(&mut self) -> Result<Literal, LiteralError> {
        match self.next()? {
            Token::None => Ok(Literal::None),
            Token::True => Ok(Literal::Bool(true)),
            Token::False => Ok(Literal::Bool(false)),
            Token::Int(n) => Ok(Literal::Int(n)),
            Token::Float(f) => Ok(Literal::Float(f)),
            Token::Str(s) => Ok(Literal::Str(s)),
            Token::LBracket => self.nested(|p| p.sequence(&Token::RBracket).map(Literal::List)),
            Token::LParen => self.nested(|p| p.sequence(&Token::RParen).map(Literal::List)),
            Token::LBrace => self.nested(Self::mapping),
            Token::Name => Err(LiteralError::Name {
                name: self.lexer.slice().to_string(),
                offset: self.offset(),
            }),
            _ => Err(self.unexpected()),
        }
    }

    fn nested(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<Literal, LiteralError>,
    ) -> Result<Literal, LiteralError> {
        if self.depth >= MAX_DEPTH {
            return Err(LiteralError::TooDeep {
                offset: self.offset(),
            });
        }
        self.depth += 1;
        let value = parse(self);
        self.depth -= 1;
        value
    }

    /// Items up to `close`, allowing a trailing comma.
    fn sequence(&mut self, close: &Token) -> Result<Vec<Literal>, LiteralError> {
        let mut items = Vec::new();
        loop {
            if self.peek()? == close {
                self.next()?;
                return Ok(items);
            }
            items.push(self.value()?);
            match self.next()? {
                Token::Comma => {}
                ref t if t == close => return Ok(items),
                _ => return Err(self.unexpected()),
            }
        }
    }

    fn mapping(&mut self) -> Result<Literal, LiteralError> {
        let mut entries: Vec<(String, Literal)> = Vec::new();
        loop {
            if *self.peek()? == Token::RBrace {
                self.next()?;
                return Ok(Literal::Map(entries));
            }
            let key = match self.next()? {
                Token::Str(s) => s,
                _ => {
                    return Err(LiteralError::NonStringKey {
                        offset: self.offset(),
                    });
                }
            };
            if self.next()? != Token::Colon {
                return Err(self.unexpected());
            }
            let value = self.value()?;
            // Later duplicates win, matching how a mapping literal behaves.
            match entries.iter_mut().find(|(k, _)| *k == key) {
                Some(entry) => entry.1 = value,
                None => entries.push((key, value)),
            }
            match self.next()? {
                Token::Comma => {}
                Token::RBrace => return Ok(Literal::Map(entries)),
                _ => return Err(self.unexpected()),
            }
        }
    }
}

/// Strips the quotes (and optional `u` prefix) and resolves escapes.
pub fn unescape(quoted: &str) -> Option<String> {
    let quoted = quoted.strip_prefix('u').unwrap_or(quoted);
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            '0' => out.push('\0'),
            'x' => out.push(hex_char(&mut chars, 2)?),
            'u' => out.push(hex_char(&mut chars, 4)?),
            'U' => out.push(hex_char(&mut chars, 8)?),
            other => {
                // Unknown escapes are kept verbatim.
                out.push('\\');
                out.push(other);
            }
        }
    }
    Some(out)
}

fn hex_char(chars: &mut std::str::Chars<'_>, digits: usize) -> Option<char> {
    let hex: String = chars.take(digits).collect();
    if hex.len() != digits {
        return None;
    }
    u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32)
}

/// Quotes a string the way scenario files and the progress channel expect:
/// single quotes unless the text contains a single quote and no double quote.
pub fn py_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Renders a float so it reads back as a float (`5.0`, not `5`).
pub fn float_repr(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(v) => f.write_str(&float_repr(*v)),
            Self::Str(s) => f.write_str(&py_repr(s)),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Map(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {value}", py_repr(key))?;
                }
                f.write_str("}")
            }
        }
    }
}

impl Serialize for Literal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::None => serializer.serialize_none(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(n) => serializer.serialize_i64(*n),
            Self::Float(v) => serializer.serialize_f64(*v),
            Self::Str(s) => serializer.serialize_str(s),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(entries) => serialize_entries(entries, serializer),
        }
    }
}

/// Serializes ordered key/value pairs as a map.
pub fn serialize_entries<S: Serializer>(
    entries: &[(String, Literal)],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(entries.len()))?;
    for (key, value) in entries {
        map.serialize_entry(key, value)?;
    }
    map.end()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, Literal)]) -> Literal {
        Literal::Map(
            entries
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn parses_typical_event_mapping() {
        let parsed = parse("{'type': 'mouse_click', 'patterns': ['a.png', \"b.png\"], 'timeout': 5.0}")
            .unwrap();
        assert_eq!(
            parsed,
            map(&[
                ("type", Literal::Str("mouse_click".into())),
                (
                    "patterns",
                    Literal::List(vec![
                        Literal::Str("a.png".into()),
                        Literal::Str("b.png".into()),
                    ])
                ),
                ("timeout", Literal::Float(5.0)),
            ])
        );
    }

    #[test]
    fn parses_scalars() {
        assert_eq!(parse("True").unwrap(), Literal::Bool(true));
        assert_eq!(parse("None").unwrap(), Literal::None);
        assert_eq!(parse("-3").unwrap(), Literal::Int(-3));
        assert_eq!(parse("+.5").unwrap(), Literal::Float(0.5));
        assert_eq!(parse("1e3").unwrap(), Literal::Float(1000.0));
        assert_eq!(parse("u'legacy'").unwrap(), Literal::Str("legacy".into()));
    }

    #[test]
    fn tuples_read_as_lists_and_trailing_commas_are_fine() {
        assert_eq!(
            parse("(1, 2,)").unwrap(),
            Literal::List(vec![Literal::Int(1), Literal::Int(2)])
        );
        assert_eq!(parse("{'a': 1,}").unwrap(), map(&[("a", Literal::Int(1))]));
    }

    #[test]
    fn resolves_escapes() {
        assert_eq!(
            parse(r"'it\'s\n\x41é'").unwrap(),
            Literal::Str("it's\nAé".into())
        );
    }

    #[test]
    fn rejects_names_and_calls() {
        assert!(matches!(
            parse("{'type': os}").unwrap_err(),
            LiteralError::Name { ref name, .. } if name == "os"
        ));
        assert!(matches!(
            parse("__import__('os')").unwrap_err(),
            LiteralError::Name { .. }
        ));
    }

    #[test]
    fn deep_nesting_is_an_error_not_a_crash() {
        let deep = format!("{{'type': 'delay', 'value': {}", "[".repeat(200_000));
        assert!(matches!(
            parse_prefix(&deep).unwrap_err(),
            LiteralError::TooDeep { .. }
        ));

        let fine = format!("{}1{}", "[".repeat(MAX_DEPTH), "]".repeat(MAX_DEPTH));
        assert!(parse(&fine).is_ok());
        let too_deep = format!("[{fine}]");
        assert!(matches!(parse(&too_deep), Err(LiteralError::TooDeep { .. })));
    }

    #[test]
    fn overflowing_floats_are_rejected() {
        assert!(parse("1e999").is_err());
        assert!(parse("-1.5e400").is_err());
        assert_eq!(parse("1.5e3").unwrap(), Literal::Float(1500.0));
    }

    #[test]
    fn rejects_non_string_keys() {
        assert!(matches!(
            parse("{1: 'a'}").unwrap_err(),
            LiteralError::NonStringKey { .. }
        ));
    }

    #[test]
    fn rejects_unterminated_input() {
        assert_eq!(
            parse("{'type': 'delay'").unwrap_err(),
            LiteralError::UnexpectedEnd
        );
        assert!(parse("{'type': 'delay' 'value'}").is_err());
    }

    #[test]
    fn prefix_parse_reports_consumed_offset() {
        let src = "{'type': 'label'}  # note";
        let (_, consumed) = parse_prefix(src).unwrap();
        assert_eq!(&src[consumed..], "  # note");
    }

    #[test]
    fn display_reads_back() {
        let value = map(&[
            ("s", Literal::Str("it's".into())),
            ("f", Literal::Float(2.0)),
            ("l", Literal::List(vec![Literal::Bool(false), Literal::None])),
        ]);
        let text = value.to_string();
        assert_eq!(text, "{'s': \"it's\", 'f': 2.0, 'l': [False, None]}");
        assert_eq!(parse(&text).unwrap(), value);
    }

    #[test]
    fn py_repr_escapes_quote_and_controls() {
        assert_eq!(py_repr("a'b\"c"), "'a\\'b\"c'");
        assert_eq!(py_repr("tab\there"), "'tab\\there'");
        assert_eq!(py_repr(""), "''");
    }
}
