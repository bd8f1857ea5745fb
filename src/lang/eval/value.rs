use std::fmt;
use std::rc::Rc;

use crate::lang::error::{Error, Result};
use crate::lang::object::ObjectInstance;

pub type ObjectRef = Rc<ObjectInstance>;

#[derive(Clone, Debug)]
pub enum Constant {
    None,
    Boolean(bool),
    /// All numbers are double precision floats
    Number(f64),
    String(String),
    /// Unresolved identifier. Only ever appears in the AST, evaluation resolves it.
    Variable(String),
    Object(ObjectRef),
}

impl Constant {
    /// Build a literal from the text of a number, string or identifier token
    pub fn from_lexeme(text: &str) -> Constant {
        match text {
            "True" => return Constant::Boolean(true),
            "False" => return Constant::Boolean(false),
            "None" => return Constant::None,
            _ => (),
        }

        if let Some(body) = text.strip_prefix('"') {
            return Constant::String(body.strip_suffix('"').unwrap_or(body).to_string());
        }

        let numeric = text.chars().next().map_or(false, |c| c.is_ascii_digit());
        match text.parse::<f64>() {
            Ok(n) if numeric => Constant::Number(n),
            _ => Constant::Variable(text.to_string()),
        }
    }

    pub fn type_str(&self) -> &'static str {
        match self {
            Constant::None => "None",
            Constant::Boolean(_) => "Boolean",
            Constant::Number(_) => "Number",
            Constant::String(_) => "String",
            Constant::Variable(_) => "Variable",
            Constant::Object(_) => "Object",
        }
    }

    /// `False`, `None`, `0` and the empty string are false, everything else is true
    pub fn truthy(&self) -> bool {
        match self {
            Constant::None => false,
            Constant::Boolean(b) => *b,
            Constant::Number(n) => *n != 0.0,
            Constant::String(s) => !s.is_empty(),
            Constant::Variable(_) | Constant::Object(_) => true,
        }
    }

    pub fn as_number(&self) -> Result<f64> {
        match self {
            Constant::Number(n) => Ok(*n),
            v => Err(Error::type_mismatch(format!(
                "Expected Number, got {}",
                v.short_display()
            ))),
        }
    }

    pub fn as_object(&self) -> Result<&ObjectRef> {
        match self {
            Constant::Object(o) => Ok(o),
            v => Err(Error::type_mismatch(format!(
                "Expected Object, got {}",
                v.short_display()
            ))),
        }
    }

    /// Type and value, for error messages
    pub fn short_display(&self) -> String {
        match self {
            Constant::None => "None".to_string(),
            Constant::String(s) => format!("String \"{}\"", s),
            Constant::Object(o) => format!("{}", o),
            v => format!("{} {}", v.type_str(), v),
        }
    }

    /// Like `Display` but strings keep their quotes
    pub fn repr(&self) -> String {
        match self {
            Constant::String(s) => format!("\"{}\"", s),
            v => v.to_string(),
        }
    }
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::None, Constant::None) => true,
            (Constant::Boolean(a), Constant::Boolean(b)) => a == b,
            (Constant::Number(a), Constant::Number(b)) => a == b,
            (Constant::String(a), Constant::String(b)) => a == b,
            (Constant::Variable(a), Constant::Variable(b)) => a == b,
            (Constant::Object(a), Constant::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::None => write!(f, "None"),
            Constant::Boolean(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Constant::Number(n) => write!(f, "{}", format_number(*n)),
            Constant::String(s) => write!(f, "{}", s),
            Constant::Variable(name) => write!(f, "{}", name),
            Constant::Object(o) => write!(f, "{}", o),
        }
    }
}

#[test]
fn test_from_lexeme() {
    let tests = vec![
        ("12", Constant::Number(12.0)),
        ("0.5", Constant::Number(0.5)),
        ("\"hi there\"", Constant::String("hi there".to_string())),
        ("\"unterminated", Constant::String("unterminated".to_string())),
        ("\"\"", Constant::String(String::new())),
        ("True", Constant::Boolean(true)),
        ("False", Constant::Boolean(false)),
        ("None", Constant::None),
        ("speed", Constant::Variable("speed".to_string())),
        ("inf", Constant::Variable("inf".to_string())),
    ];

    for (input, expected) in tests {
        assert_eq!(Constant::from_lexeme(input), expected, "lexeme: {}", input);
    }
}

#[test]
fn test_truthy() {
    let tests = vec![
        (Constant::None, false),
        (Constant::Boolean(false), false),
        (Constant::Boolean(true), true),
        (Constant::Number(0.0), false),
        (Constant::Number(-2.0), true),
        (Constant::String(String::new()), false),
        (Constant::String("0".to_string()), true),
    ];

    for (value, expected) in tests {
        assert_eq!(value.truthy(), expected, "value: {:?}", value);
    }
}

#[test]
fn test_display() {
    assert_eq!(Constant::Number(3.0).to_string(), "3");
    assert_eq!(Constant::Number(-0.25).to_string(), "-0.25");
    assert_eq!(Constant::Boolean(true).to_string(), "True");
    assert_eq!(Constant::String("x".to_string()).to_string(), "x");
    assert_eq!(Constant::String("x".to_string()).repr(), "\"x\"");
    assert_eq!(Constant::None.to_string(), "None");
}
