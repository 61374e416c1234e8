//! Recursive descent parser, one function per precedence level.
//!
//! ```text
//! or      := and ('or' and)*
//! and     := not ('and' not)*
//! not     := 'not' not | compare
//! compare := sum (cmp_op sum)*
//! sum     := product (('+' | '-') product)*
//! product := unary (('*' | '/' | '//' | '%') unary)*
//! unary   := ('-' | '+') unary | power
//! power   := atom ('**' unary)?
//! atom    := literal | NAME | NAME '(' args ')' | '(' or ')'
//! ```

use std::ops::Range;

use super::ExprError;
use super::lexer::{Token, tokenize};
use super::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Name(String),
    Neg(Box<Expr>),
    Pos(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `a < b <= c` keeps every operand so each is evaluated once.
    Compare(Box<Expr>, Vec<(CompareOp, Expr)>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Pow => "**",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::In => "in",
            Self::NotIn => "not in",
        }
    }
}

/// Deepest nesting of parentheses, calls and prefix operators.
const MAX_DEPTH: usize = 64;

/// Longest expression in tokens. Operator chains build trees as deep as they
/// are long, and evaluation recurses through them.
const MAX_TOKENS: usize = 4096;

/// Parses a complete expression; trailing tokens are an error.
pub fn parse(src: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(src)?;
    if tokens.len() > MAX_TOKENS {
        return Err(ExprError::Syntax(format!(
            "expression is longer than {MAX_TOKENS} tokens"
        )));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.or()?;
    match parser.tokens.get(parser.pos) {
        None => Ok(expr),
        Some((_, span)) => Err(parser.unexpected(span.clone(), src)),
    }
}

struct Parser {
    tokens: Vec<(Token, Range<usize>)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|(t, _)| t)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), ExprError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error_here(&format!("expected {what}")))
        }
    }

    fn error_here(&self, what: &str) -> ExprError {
        match self.tokens.get(self.pos) {
            Some((token, span)) => {
                ExprError::Syntax(format!("{what}, found {token:?} at offset {}", span.start))
            }
            None => ExprError::Syntax(format!("{what}, found end of input")),
        }
    }

    fn unexpected(&self, span: Range<usize>, src: &str) -> ExprError {
        ExprError::Syntax(format!(
            "unexpected `{}` at offset {}",
            &src[span.clone()],
            span.start
        ))
    }

    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ExprError>,
    ) -> Result<T, ExprError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error_here(&format!("nesting deeper than {MAX_DEPTH} levels")));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    // ── Precedence levels ──

    fn or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.and()?;
        while self.eat(&Token::Or) {
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.not()?;
        while self.eat(&Token::And) {
            let right = self.not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.nested(Self::not)?)));
        }
        self.compare()
    }

    fn compare(&mut self) -> Result<Expr, ExprError> {
        let first = self.sum()?;
        let mut rest = Vec::new();
        while let Some(op) = self.compare_op() {
            rest.push((op, self.sum()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare(Box::new(first), rest))
        }
    }

    fn compare_op(&mut self) -> Option<CompareOp> {
        let op = match self.peek()? {
            Token::Eq => CompareOp::Eq,
            Token::Ne => CompareOp::Ne,
            Token::Lt => CompareOp::Lt,
            Token::Le => CompareOp::Le,
            Token::Gt => CompareOp::Gt,
            Token::Ge => CompareOp::Ge,
            Token::In => CompareOp::In,
            Token::Not if self.peek_at(1) == Some(&Token::In) => {
                self.pos += 1;
                CompareOp::NotIn
            }
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn sum(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.product()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.product()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn product(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::DoubleSlash) => BinaryOp::FloorDiv,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::Neg(Box::new(self.nested(Self::unary)?)));
        }
        if self.eat(&Token::Plus) {
            return Ok(Expr::Pos(Box::new(self.nested(Self::unary)?)));
        }
        self.power()
    }

    /// Right associative, and binds tighter than a unary minus on its left.
    fn power(&mut self) -> Result<Expr, ExprError> {
        let base = self.atom()?;
        if self.eat(&Token::DoubleStar) {
            let exponent = self.nested(Self::unary)?;
            return Ok(Expr::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Expr, ExprError> {
        let before = self.pos;
        let Some(token) = self.advance() else {
            return Err(self.error_here("expected an expression"));
        };
        let expr = match token {
            Token::Int(n) => Expr::Literal(Value::Int(n)),
            Token::Float(v) => Expr::Literal(Value::Float(v)),
            Token::Str(mut s) => {
                // Adjacent string literals concatenate.
                while let Some(Token::Str(more)) = self.peek() {
                    s.push_str(more);
                    self.pos += 1;
                }
                Expr::Literal(Value::Str(s))
            }
            Token::True => Expr::Literal(Value::Bool(true)),
            Token::False => Expr::Literal(Value::Bool(false)),
            Token::None => Expr::Literal(Value::None),
            Token::Name(name) => {
                if self.eat(&Token::LParen) {
                    Expr::Call(name, self.nested(Self::arguments)?)
                } else {
                    Expr::Name(name)
                }
            }
            Token::LParen => {
                let inner = self.nested(Self::or)?;
                self.expect(&Token::RParen, "`)`")?;
                inner
            }
            _ => {
                self.pos = before;
                return Err(self.error_here("expected an expression"));
            }
        };
        Ok(expr)
    }

    /// Call arguments after the opening parenthesis.
    fn arguments(&mut self) -> Result<Vec<Expr>, ExprError> {
        let mut args = Vec::new();
        loop {
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            args.push(self.or()?);
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RParen, "`,` or `)`")?;
                return Ok(args);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(n: i64) -> Box<Expr> {
        Box::new(Expr::Literal(Value::Int(n)))
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        assert_eq!(
            parse("1 + 2 * 3").unwrap(),
            Expr::Binary(
                BinaryOp::Add,
                int(1),
                Box::new(Expr::Binary(BinaryOp::Mul, int(2), int(3)))
            )
        );
    }

    #[test]
    fn power_is_right_associative_and_beats_negation() {
        assert_eq!(
            parse("-2 ** 3 ** 2").unwrap(),
            Expr::Neg(Box::new(Expr::Binary(
                BinaryOp::Pow,
                int(2),
                Box::new(Expr::Binary(BinaryOp::Pow, int(3), int(2)))
            )))
        );
    }

    #[test]
    fn chained_comparison_and_not_in() {
        let Expr::Compare(_, rest) = parse("1 < 2 not in 'abc'").unwrap() else {
            panic!("expected a comparison");
        };
        let ops: Vec<_> = rest.iter().map(|(op, _)| *op).collect();
        assert_eq!(ops, vec![CompareOp::Lt, CompareOp::NotIn]);
    }

    #[test]
    fn calls_and_adjacent_strings() {
        assert_eq!(
            parse("max(1, 'a' 'b',)").unwrap(),
            Expr::Call(
                "max".into(),
                vec![
                    Expr::Literal(Value::Int(1)),
                    Expr::Literal(Value::Str("ab".into()))
                ]
            )
        );
        assert_eq!(parse("len()").unwrap(), Expr::Call("len".into(), vec![]));
    }

    #[test]
    fn rejects_incomplete_and_trailing_input() {
        assert!(matches!(parse("1 +"), Err(ExprError::Syntax(_))));
        assert!(matches!(parse("(1"), Err(ExprError::Syntax(_))));
        assert!(matches!(parse("1 2"), Err(ExprError::Syntax(_))));
        assert!(matches!(parse(""), Err(ExprError::Syntax(_))));
        assert!(matches!(parse("= 3"), Err(ExprError::Syntax(_))));
    }

    #[test]
    fn deep_nesting_and_huge_inputs_are_syntax_errors() {
        let deep = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
        assert!(matches!(parse(&deep), Err(ExprError::Syntax(_))));
        assert!(matches!(parse(&"-".repeat(1000)), Err(ExprError::Syntax(_))));
        assert!(matches!(
            parse(&format!("{}True", "not ".repeat(1000))),
            Err(ExprError::Syntax(_))
        ));

        let long = vec!["1"; 3000].join(" + ");
        assert!(matches!(parse(&long), Err(ExprError::Syntax(m)) if m.contains("tokens")));

        let fine = format!("{}1{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert_eq!(parse(&fine).unwrap(), Expr::Literal(Value::Int(1)));
    }
}
