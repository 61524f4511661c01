//! Expression evaluator for scripted programs
//!
//! Just enough to drive conditions and arithmetic: `$var` and `$obj.member`
//! references, integer/float/string literals, `+ - * /`, comparisons,
//! unary minus and parentheses. Unset variables read as empty.

use std::cmp::Ordering;

use crate::engine::{Key, Value};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(Value),
    Var(String),
    Member(String),
    Op(&'static str),
    Open,
    Close,
}

const OPERATORS: [&str; 10] = ["==", "!=", "<=", ">=", "<", ">", "+", "-", "*", "/"];

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut rest = source;
    loop {
        rest = rest.trim_start();
        let Some(c) = rest.chars().next() else {
            return Ok(tokens);
        };

        if c == '(' || c == ')' {
            tokens.push(if c == '(' { Token::Open } else { Token::Close });
            rest = &rest[1..];
        } else if c == '$' || c == '.' {
            let name_len = rest[1..]
                .find(|ch: char| !(ch.is_alphanumeric() || ch == '_'))
                .unwrap_or(rest.len() - 1);
            if name_len == 0 {
                return Err(format!("expected a name after '{}'", c));
            }
            let name = rest[1..1 + name_len].to_string();
            if c == '$' {
                tokens.push(Token::Var(name));
            } else if matches!(tokens.last(), Some(Token::Var(_)) | Some(Token::Member(_))) {
                tokens.push(Token::Member(name));
            } else {
                return Err(format!("unexpected '.{}'", name));
            }
            rest = &rest[1 + name_len..];
        } else if c == '"' || c == '\'' {
            let end = rest[1..]
                .find(c)
                .ok_or_else(|| "unterminated string".to_string())?;
            tokens.push(Token::Literal(Value::String(rest[1..1 + end].to_string())));
            rest = &rest[end + 2..];
        } else if c.is_ascii_digit() {
            let len = rest
                .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
                .unwrap_or(rest.len());
            let text = &rest[..len];
            let value = if text.contains('.') {
                text.parse().map(Value::Float)
                    .map_err(|_| format!("invalid number '{}'", text))?
            } else {
                text.parse().map(Value::Integer)
                    .map_err(|_| format!("invalid number '{}'", text))?
            };
            tokens.push(Token::Literal(value));
            rest = &rest[len..];
        } else if let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) {
            tokens.push(Token::Op(*op));
            rest = &rest[op.len()..];
        } else {
            return Err(format!("unexpected character '{}'", c));
        }
    }
}

/// A number coerced from a value
#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Undefined => Some(Number::Int(0)),
            Value::Integer(i) => Some(Number::Int(*i)),
            Value::Float(f) => Some(Number::Float(*f)),
            Value::String(s) => {
                let s = s.trim();
                if s.is_empty() {
                    Some(Number::Int(0))
                } else if let Ok(i) = s.parse() {
                    Some(Number::Int(i))
                } else {
                    s.parse().ok().map(Number::Float)
                }
            }
            Value::Object(_) => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }
}

fn arithmetic(op: &str, left: &Value, right: &Value) -> Result<Value, String> {
    let (Some(a), Some(b)) = (Number::from_value(left), Number::from_value(right)) else {
        return Err(format!("operands of '{}' must be numbers", op));
    };
    let value = match (a, b) {
        (Number::Int(a), Number::Int(b)) => match op {
            "+" => Value::Integer(a.wrapping_add(b)),
            "-" => Value::Integer(a.wrapping_sub(b)),
            "*" => Value::Integer(a.wrapping_mul(b)),
            _ if b == 0 => return Err("division by zero".to_string()),
            _ => match (a.checked_rem(b), a.checked_div(b)) {
                (Some(0), Some(quotient)) => Value::Integer(quotient),
                // Inexact, or i64::MIN / -1
                _ => Value::Float(a as f64 / b as f64),
            },
        },
        (a, b) => {
            let (a, b) = (a.as_f64(), b.as_f64());
            match op {
                "+" => Value::Float(a + b),
                "-" => Value::Float(a - b),
                "*" => Value::Float(a * b),
                _ if b == 0.0 => return Err("division by zero".to_string()),
                _ => Value::Float(a / b),
            }
        }
    };
    Ok(value)
}

fn compare(op: &str, left: &Value, right: &Value) -> Result<Value, String> {
    let ordering = match (left, right) {
        (Value::Object(_), _) | (_, Value::Object(_)) => match op {
            "==" => return Ok(Value::Integer((left == right) as i64)),
            "!=" => return Ok(Value::Integer((left != right) as i64)),
            _ => return Err(format!("objects cannot be compared with '{}'", op)),
        },
        _ => match (Number::from_value(left), Number::from_value(right)) {
            (Some(a), Some(b)) => a.as_f64().partial_cmp(&b.as_f64()),
            _ => left.to_text().partial_cmp(&right.to_text()),
        },
    };
    let Some(ordering) = ordering else {
        return Ok(Value::Integer(0));
    };
    let result = match op {
        "==" => ordering == Ordering::Equal,
        "!=" => ordering != Ordering::Equal,
        "<" => ordering == Ordering::Less,
        "<=" => ordering != Ordering::Greater,
        ">" => ordering == Ordering::Greater,
        _ => ordering != Ordering::Less,
    };
    Ok(Value::Integer(result as i64))
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    lookup: &'a dyn Fn(&str) -> Option<Value>,
}

impl Parser<'_> {
    fn peek_op(&self, ops: &[&str]) -> Option<&'static str> {
        match self.tokens.get(self.pos) {
            Some(Token::Op(op)) if ops.contains(op) => Some(*op),
            _ => None,
        }
    }

    fn comparison(&mut self) -> Result<Value, String> {
        let left = self.additive()?;
        match self.peek_op(&["==", "!=", "<=", ">=", "<", ">"]) {
            Some(op) => {
                self.pos += 1;
                let right = self.additive()?;
                compare(op, &left, &right)
            }
            None => Ok(left),
        }
    }

    fn additive(&mut self) -> Result<Value, String> {
        let mut value = self.multiplicative()?;
        while let Some(op) = self.peek_op(&["+", "-"]) {
            self.pos += 1;
            let right = self.multiplicative()?;
            value = arithmetic(op, &value, &right)?;
        }
        Ok(value)
    }

    fn multiplicative(&mut self) -> Result<Value, String> {
        let mut value = self.unary()?;
        while let Some(op) = self.peek_op(&["*", "/"]) {
            self.pos += 1;
            let right = self.unary()?;
            value = arithmetic(op, &value, &right)?;
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<Value, String> {
        if self.peek_op(&["-"]).is_some() {
            self.pos += 1;
            let operand = self.unary()?;
            return arithmetic("-", &Value::Integer(0), &operand);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Value, String> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| "unexpected end of expression".to_string())?;
        self.pos += 1;
        match token {
            Token::Literal(value) => Ok(value),
            Token::Var(name) => {
                let mut value = (self.lookup)(&name).unwrap_or(Value::Undefined);
                let mut path = name;
                while let Some(Token::Member(member)) = self.tokens.get(self.pos) {
                    let obj = value
                        .as_object()
                        .ok_or_else(|| format!("{} is not an object", path))?;
                    value = obj
                        .get(&Key::Name(member.clone()))
                        .unwrap_or(Value::Undefined);
                    path = format!("{}.{}", path, member);
                    self.pos += 1;
                }
                Ok(value)
            }
            Token::Open => {
                let value = self.comparison()?;
                match self.tokens.get(self.pos) {
                    Some(Token::Close) => {
                        self.pos += 1;
                        Ok(value)
                    }
                    _ => Err("missing ')'".to_string()),
                }
            }
            other => Err(format!("unexpected {:?}", other)),
        }
    }
}

/// Evaluate `source`, resolving `$name` through `lookup`
pub fn evaluate(source: &str, lookup: &dyn Fn(&str) -> Option<Value>) -> Result<Value, String> {
    let mut parser = Parser {
        tokens: tokenize(source)?,
        pos: 0,
        lookup,
    };
    let value = parser.comparison()?;
    if parser.pos < parser.tokens.len() {
        return Err(format!("unexpected trailing input in '{}'", source));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(source: &str) -> Result<Value, String> {
        evaluate(source, &|name| match name {
            "x" => Some(Value::Integer(4)),
            "s" => Some(Value::from("abc")),
            "n" => Some(Value::from(" 12 ")),
            _ => None,
        })
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), Value::Integer(7));
        assert_eq!(eval("(1 + 2) * 3").unwrap(), Value::Integer(9));
        assert_eq!(eval("$x - 1").unwrap(), Value::Integer(3));
        assert_eq!(eval("-$x").unwrap(), Value::Integer(-4));
        assert_eq!(eval("$x / 2").unwrap(), Value::Integer(2));
        assert_eq!(eval("$x / 8").unwrap(), Value::Float(0.5));
        assert_eq!(eval("1.5 + 1").unwrap(), Value::Float(2.5));
        assert_eq!(eval("$n + 1").unwrap(), Value::Integer(13));
        assert_eq!(eval("$unset + 1").unwrap(), Value::Integer(1));
    }

    #[test]
    fn test_comparison() {
        assert_eq!(eval("$x > 3").unwrap(), Value::Integer(1));
        assert_eq!(eval("$x <= 3").unwrap(), Value::Integer(0));
        assert_eq!(eval("$s == 'abc'").unwrap(), Value::Integer(1));
        assert_eq!(eval("$s != \"abd\"").unwrap(), Value::Integer(1));
        assert_eq!(eval("$n == 12").unwrap(), Value::Integer(1));
    }

    #[test]
    fn test_literals() {
        assert_eq!(eval("'hi there'").unwrap(), Value::from("hi there"));
        assert_eq!(eval("$unset").unwrap(), Value::Undefined);
    }

    #[test]
    fn test_min_integer_division_does_not_overflow() {
        let lookup = |name: &str| (name == "m").then_some(Value::Integer(i64::MIN));
        assert_eq!(
            evaluate("$m / -1", &lookup).unwrap(),
            Value::Float(-(i64::MIN as f64))
        );
        assert_eq!(evaluate("$m / 2", &lookup).unwrap(), Value::Integer(i64::MIN / 2));
    }

    #[test]
    fn test_errors() {
        assert!(eval("$s * 2").is_err());
        assert!(eval("1 / 0").is_err());
        assert!(eval("(1 + 2").is_err());
        assert!(eval("1 2").is_err());
        assert!(eval("'open").is_err());
        assert!(eval("$x.member").is_err());
        assert!(eval("#").is_err());
    }
}
