//! The expression language of `equation` and `condition` events.
//!
//! One expression per event, Python-flavoured: literals, arithmetic,
//! comparisons, `and`/`or`/`not`, and a handful of conversion builtins.
//! Variables are not names in the language; scenarios splice them in with
//! `{NAME}` substitution before the text reaches the parser.

mod eval;
mod lexer;
mod parser;
mod value;

pub use value::Value;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("name '{0}' is not defined")]
    Name(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("value error: {0}")]
    Value(String),

    #[error("division by zero")]
    ZeroDivision,

    #[error("integer overflow")]
    Overflow,
}

/// Parses and evaluates a single expression.
pub fn evaluate(src: &str) -> Result<Value, ExprError> {
    eval::eval(&parser::parse(src)?)
}

/// Splits `KEY = expression` at the first `=` that isn't part of an operator.
pub fn split_equation(src: &str) -> Result<(&str, &str), ExprError> {
    let bytes = src.as_bytes();
    let at = (0..bytes.len())
        .find(|&i| {
            bytes[i] == b'='
                && bytes.get(i + 1) != Some(&b'=')
                && (i == 0 || !matches!(bytes[i - 1], b'=' | b'!' | b'<' | b'>'))
        })
        .ok_or_else(|| ExprError::Syntax(format!("expected `KEY = expression`, got {src:?}")))?;

    let key = src[..at].trim();
    let expression = src[at + 1..].trim();
    let valid_key = key
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_key {
        return Err(ExprError::Syntax(format!("invalid variable name {key:?}")));
    }
    Ok((key, expression))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_at_the_assignment() {
        assert_eq!(split_equation("N = 1 + 2").unwrap(), ("N", "1 + 2"));
        assert_eq!(
            split_equation("OK = 'a' == 'a'").unwrap(),
            ("OK", "'a' == 'a'")
        );
        assert_eq!(split_equation("_x=1").unwrap(), ("_x", "1"));
    }

    #[test]
    fn rejects_missing_or_invalid_keys() {
        assert!(split_equation("1 + 2").is_err());
        assert!(split_equation("1N = 2").is_err());
        assert!(split_equation(" = 2").is_err());
        assert!(split_equation("a b = 2").is_err());
    }

    #[test]
    fn evaluates_substituted_text() {
        assert_eq!(evaluate("int('3') + 1").unwrap().to_string(), "4");
        assert_eq!(evaluate("None or 0").unwrap().to_string(), "0");
    }
}
