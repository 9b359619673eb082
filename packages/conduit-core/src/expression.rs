//! Control expressions: `@component.operation(arg, ...)`.
//!
//! The control bus receives expressions as message payloads and evaluates
//! them against a component resolver. This module only parses; resolution
//! and invocation live with the dispatch core.
//!
//! Grammar:
//!
//! ```text
//! expression := '@'? name '.' operation '(' [literal (',' literal)*] ')'
//! name       := [A-Za-z_][A-Za-z0-9_-]*
//! operation  := [A-Za-z_][A-Za-z0-9_]*
//! literal    := 'single' | "double" | integer | float | true | false | null
//! ```

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::types::Value;

static EXPRESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*@?([A-Za-z_][A-Za-z0-9_\-]*)\.([A-Za-z_][A-Za-z0-9_]*)\s*\((.*)\)\s*$")
        .expect("control expression pattern is valid")
});

/// A parsed control expression.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlExpression {
    /// Name of the component the operation is invoked on.
    pub target: String,
    /// Operation name.
    pub operation: String,
    /// Literal arguments, in call order.
    pub arguments: Vec<Value>,
}

/// Errors from parsing a control expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression does not match '@component.operation(args)': {expression}")]
    Malformed { expression: String },
    #[error("unterminated string literal starting at offset {offset}")]
    UnterminatedString { offset: usize },
    #[error("invalid literal '{token}'")]
    InvalidLiteral { token: String },
    #[error("missing argument at offset {offset}")]
    MissingArgument { offset: usize },
}

impl ControlExpression {
    /// Parses `input` into a control expression.
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError`] when the input does not match the grammar.
    pub fn parse(input: &str) -> Result<Self, ExpressionError> {
        let captures = EXPRESSION
            .captures(input)
            .ok_or_else(|| ExpressionError::Malformed {
                expression: input.to_string(),
            })?;
        let arguments = parse_arguments(&captures[3])?;
        let expression = Self {
            target: captures[1].to_string(),
            operation: captures[2].to_string(),
            arguments,
        };
        tracing::trace!(%expression, "parsed control expression");
        Ok(expression)
    }
}

impl fmt::Display for ControlExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}.{}(", self.target, self.operation)?;
        for (i, arg) in self.arguments.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write_literal(f, arg)?;
        }
        f.write_str(")")
    }
}

/// Renders an argument in the form `parse_string` and `parse_literal` read back.
fn write_literal(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::String(s) => {
            f.write_str("\"")?;
            for c in s.chars() {
                match c {
                    '"' => f.write_str("\\\"")?,
                    '\\' => f.write_str("\\\\")?,
                    '\n' => f.write_str("\\n")?,
                    '\t' => f.write_str("\\t")?,
                    '\r' => f.write_str("\\r")?,
                    '\0' => f.write_str("\\0")?,
                    c => write!(f, "{c}")?,
                }
            }
            f.write_str("\"")
        }
        // Keep whole floats from reading back as integers.
        Value::Float(x) if x.is_finite() && x.fract() == 0.0 => write!(f, "{x:.1}"),
        other => write!(f, "{other}"),
    }
}

fn parse_arguments(src: &str) -> Result<Vec<Value>, ExpressionError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut args = Vec::new();
    let mut i = 0;

    if src.trim().is_empty() {
        return Ok(args);
    }

    loop {
        while i < chars.len() && chars[i].1.is_whitespace() {
            i += 1;
        }
        let offset = chars.get(i).map_or(src.len(), |(o, _)| *o);
        if i >= chars.len() || chars[i].1 == ',' {
            return Err(ExpressionError::MissingArgument { offset });
        }

        if chars[i].1 == '\'' || chars[i].1 == '"' {
            let (value, next) = parse_string(&chars, i)?;
            args.push(Value::String(value));
            i = next;
        } else {
            let start = i;
            while i < chars.len() && chars[i].1 != ',' {
                i += 1;
            }
            let token: String = chars[start..i].iter().map(|(_, c)| c).collect();
            args.push(parse_literal(token.trim())?);
        }

        while i < chars.len() && chars[i].1.is_whitespace() {
            i += 1;
        }
        match chars.get(i) {
            None => return Ok(args),
            Some((_, ',')) => i += 1,
            Some((o, _)) => {
                return Err(ExpressionError::InvalidLiteral {
                    token: src[*o..].trim().to_string(),
                })
            }
        }
    }
}

/// Reads a quoted string starting at `start`; returns the content and the
/// index just past the closing quote.
fn parse_string(chars: &[(usize, char)], start: usize) -> Result<(String, usize), ExpressionError> {
    let (offset, quote) = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i].1 {
            '\\' if i + 1 < chars.len() => {
                let escaped = match chars[i + 1].1 {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    other => other,
                };
                out.push(escaped);
                i += 2;
            }
            c if c == quote => return Ok((out, i + 1)),
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(ExpressionError::UnterminatedString { offset })
}

fn parse_literal(token: &str) -> Result<Value, ExpressionError> {
    match token {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        "null" => return Ok(Value::Null),
        _ => {}
    }
    if let Ok(i) = token.parse::<i64>() {
        return Ok(Value::Int(i));
    }
    match token.parse::<f64>() {
        Ok(f) if f.is_finite() => Ok(Value::Float(f)),
        _ => Err(ExpressionError::InvalidLiteral {
            token: token.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn parses_lifecycle_call_without_arguments() {
        let expr = ControlExpression::parse("@inbound.stop()").unwrap();
        assert_eq!(expr.target, "inbound");
        assert_eq!(expr.operation, "stop");
        assert!(expr.arguments.is_empty());
    }

    #[test]
    fn at_sign_is_optional() {
        let expr = ControlExpression::parse("  worker-1.isRunning( ) ").unwrap();
        assert_eq!(expr.target, "worker-1");
        assert_eq!(expr.operation, "isRunning");
    }

    #[test]
    fn parses_mixed_literals() {
        let expr =
            ControlExpression::parse(r#"@svc.configure('a, b', "q\"x", 42, -1.5, true, null)"#)
                .unwrap();
        assert_eq!(
            expr.arguments,
            vec![
                Value::from("a, b"),
                Value::from("q\"x"),
                Value::Int(42),
                Value::Float(-1.5),
                Value::Bool(true),
                Value::Null,
            ]
        );
    }

    #[test]
    fn rejects_missing_parentheses() {
        let err = ControlExpression::parse("@svc.stop").unwrap_err();
        assert!(matches!(err, ExpressionError::Malformed { .. }));
    }

    #[test]
    fn rejects_unterminated_string() {
        let err = ControlExpression::parse("@svc.say('hello)").unwrap_err();
        assert_eq!(err, ExpressionError::UnterminatedString { offset: 0 });
    }

    #[test]
    fn rejects_bare_word_argument() {
        let err = ControlExpression::parse("@svc.say(hello)").unwrap_err();
        assert_eq!(
            err,
            ExpressionError::InvalidLiteral {
                token: "hello".to_string()
            }
        );
    }

    #[test]
    fn rejects_trailing_comma() {
        let err = ControlExpression::parse("@svc.add(1,)").unwrap_err();
        assert!(matches!(err, ExpressionError::MissingArgument { .. }));
    }

    #[test]
    fn rejects_garbage_after_string() {
        let err = ControlExpression::parse("@svc.say('a' 'b')").unwrap_err();
        assert!(matches!(err, ExpressionError::InvalidLiteral { .. }));
    }

    #[test]
    fn display_renders_parseable_form() {
        let expr = ControlExpression::parse("@svc.add(1, 'two')").unwrap();
        assert_eq!(expr.to_string(), "@svc.add(1, \"two\")");
        assert_eq!(ControlExpression::parse(&expr.to_string()).unwrap(), expr);
    }

    #[test]
    fn display_escapes_what_the_parser_reads() {
        let expr = ControlExpression::parse(r#"@svc.say("a\r\0b\"c\\", 'tab\there', 2.0)"#).unwrap();
        assert_eq!(
            expr.arguments,
            vec![Value::from("a\r\0b\"c\\"), Value::from("tab\there"), Value::Float(2.0)]
        );
        assert_eq!(expr.to_string(), r#"@svc.say("a\r\0b\"c\\", "tab\there", 2.0)"#);
        assert_eq!(ControlExpression::parse(&expr.to_string()).unwrap(), expr);
    }

    proptest! {
        #[test]
        fn integer_arguments_parse_exactly(values in proptest::collection::vec(any::<i64>(), 0..6)) {
            let rendered: Vec<String> = values.iter().map(ToString::to_string).collect();
            let input = format!("@c.op({})", rendered.join(", "));
            let expr = ControlExpression::parse(&input).unwrap();
            let expected: Vec<Value> = values.into_iter().map(Value::Int).collect();
            prop_assert_eq!(expr.arguments, expected);
        }

        #[test]
        fn display_round_trips_any_string(s in any::<String>(), x in -1.0e12f64..1.0e12) {
            let expr = ControlExpression {
                target: "c".to_string(),
                operation: "op".to_string(),
                arguments: vec![Value::String(s), Value::Float(x.trunc()), Value::Float(x)],
            };
            prop_assert_eq!(ControlExpression::parse(&expr.to_string()).unwrap(), expr);
        }

        #[test]
        fn quoted_strings_keep_separators(s in "[a-zA-Z0-9 ,()]{0,24}") {
            let input = format!("@c.op('{s}')");
            let expr = ControlExpression::parse(&input).unwrap();
            prop_assert_eq!(expr.arguments, vec![Value::String(s)]);
        }
    }
}
