use crate::lang::ast::{BinaryOp, UnaryOp};
use crate::lang::error::{Error, ErrorKind, Result};
use crate::lang::eval::value::Constant;

fn mismatch(op: BinaryOp, lhs: &Constant, rhs: &Constant) -> Error {
    Error::type_mismatch(format!(
        "Cannot apply '{}' to {} and {}",
        op,
        lhs.short_display(),
        rhs.short_display()
    ))
}

/// Text a value contributes to a string concatenation
fn concat_piece(value: &Constant) -> Option<String> {
    match value {
        Constant::String(s) => Some(s.clone()),
        Constant::Number(_) => Some(value.to_string()),
        _ => None,
    }
}

pub fn binary(op: BinaryOp, lhs: &Constant, rhs: &Constant) -> Result<Constant> {
    match op {
        BinaryOp::Eq => return Ok(Constant::Boolean(lhs == rhs)),
        BinaryOp::NotEq => return Ok(Constant::Boolean(lhs != rhs)),
        BinaryOp::And | BinaryOp::Or => {
            let (l, r) = match (lhs, rhs) {
                (Constant::Boolean(l), Constant::Boolean(r)) => (*l, *r),
                _ => return Err(mismatch(op, lhs, rhs)),
            };
            let result = if op == BinaryOp::And { l && r } else { l || r };
            return Ok(Constant::Boolean(result));
        }
        _ => (),
    }

    if op == BinaryOp::Add {
        if let (Constant::String(_), _) | (_, Constant::String(_)) = (lhs, rhs) {
            return match (concat_piece(lhs), concat_piece(rhs)) {
                (Some(l), Some(r)) => Ok(Constant::String(l + &r)),
                _ => Err(mismatch(op, lhs, rhs)),
            };
        }
    }

    if op.is_comparison() {
        let ordering = match (lhs, rhs) {
            (Constant::Number(l), Constant::Number(r)) => l.partial_cmp(r),
            (Constant::String(l), Constant::String(r)) => Some(l.cmp(r)),
            _ => return Err(mismatch(op, lhs, rhs)),
        };
        let result = match ordering {
            Some(o) => match op {
                BinaryOp::Lt => o.is_lt(),
                BinaryOp::LtEq => o.is_le(),
                BinaryOp::Gt => o.is_gt(),
                _ => o.is_ge(),
            },
            // NaN compares false with everything
            None => false,
        };
        return Ok(Constant::Boolean(result));
    }

    let (l, r) = match (lhs, rhs) {
        (Constant::Number(l), Constant::Number(r)) => (*l, *r),
        _ => return Err(mismatch(op, lhs, rhs)),
    };

    let result = match op {
        BinaryOp::Add => l + r,
        BinaryOp::Sub => l - r,
        BinaryOp::Mul => l * r,
        BinaryOp::Div | BinaryOp::Mod if r == 0.0 => {
            return Err(Error::new(ErrorKind::DivisionByZero, "Divide by zero"))
        }
        BinaryOp::Div => l / r,
        BinaryOp::Mod => l % r,
        _ => return Err(mismatch(op, lhs, rhs)),
    };

    Ok(Constant::Number(result))
}

pub fn unary(op: UnaryOp, operand: &Constant) -> Result<Constant> {
    match (op, operand) {
        (UnaryOp::Neg, Constant::Number(n)) => Ok(Constant::Number(-n)),
        (UnaryOp::Not, Constant::Boolean(b)) => Ok(Constant::Boolean(!b)),
        (op, v) => Err(Error::type_mismatch(format!(
            "Cannot apply '{}' to {}",
            op,
            v.short_display()
        ))),
    }
}

#[cfg(test)]
fn n(v: f64) -> Constant {
    Constant::Number(v)
}

#[cfg(test)]
fn s(v: &str) -> Constant {
    Constant::String(v.to_string())
}

#[test]
fn test_arithmetic() {
    let tests = vec![
        (BinaryOp::Add, n(1.0), n(2.0), n(3.0)),
        (BinaryOp::Sub, n(1.0), n(2.0), n(-1.0)),
        (BinaryOp::Mul, n(1.5), n(2.0), n(3.0)),
        (BinaryOp::Div, n(7.0), n(2.0), n(3.5)),
        (BinaryOp::Mod, n(7.0), n(4.0), n(3.0)),
        (BinaryOp::Add, n(3.0), s("x"), s("3x")),
        (BinaryOp::Add, s("v"), n(1.5), s("v1.5")),
        (BinaryOp::Add, s("a"), s("b"), s("ab")),
        (BinaryOp::Lt, n(1.0), n(2.0), Constant::Boolean(true)),
        (BinaryOp::GtEq, n(1.0), n(2.0), Constant::Boolean(false)),
        (BinaryOp::Lt, s("a"), s("b"), Constant::Boolean(true)),
        (BinaryOp::Eq, n(1.0), n(1.0), Constant::Boolean(true)),
        (BinaryOp::Eq, n(1.0), s("1"), Constant::Boolean(false)),
        (BinaryOp::NotEq, Constant::None, n(0.0), Constant::Boolean(true)),
        (BinaryOp::Eq, Constant::None, Constant::None, Constant::Boolean(true)),
        (
            BinaryOp::And,
            Constant::Boolean(true),
            Constant::Boolean(false),
            Constant::Boolean(false),
        ),
        (
            BinaryOp::Or,
            Constant::Boolean(true),
            Constant::Boolean(false),
            Constant::Boolean(true),
        ),
    ];

    for (op, lhs, rhs, expected) in tests {
        assert_eq!(binary(op, &lhs, &rhs).unwrap(), expected, "{:?} {} {:?}", lhs, op, rhs);
    }
}

#[test]
fn test_type_errors() {
    let tests = vec![
        (BinaryOp::Sub, n(3.0), s("x")),
        (BinaryOp::Mul, s("a"), n(2.0)),
        (BinaryOp::Add, Constant::None, s("x")),
        (BinaryOp::Add, Constant::Boolean(true), n(1.0)),
        (BinaryOp::Lt, n(1.0), s("2")),
        (BinaryOp::And, n(1.0), Constant::Boolean(true)),
    ];

    for (op, lhs, rhs) in tests {
        let err = binary(op, &lhs, &rhs).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type, "{:?} {} {:?}", lhs, op, rhs);
    }

    assert_eq!(unary(UnaryOp::Neg, &s("x")).unwrap_err().kind, ErrorKind::Type);
    assert_eq!(unary(UnaryOp::Not, &n(1.0)).unwrap_err().kind, ErrorKind::Type);
}

#[test]
fn test_division_by_zero() {
    for op in vec![BinaryOp::Div, BinaryOp::Mod] {
        let err = binary(op, &n(5.0), &n(0.0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DivisionByZero);
    }
}
