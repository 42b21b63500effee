//! Atomic comparison for value and general comparisons, and the ordering
//! used by `order by`.
use crate::compiler::expr::CompOp;
use crate::engine::collation::Collation;
use crate::engine::runtime::Error;
use crate::xdm::AtomicValue;
use core::cmp::Ordering;

/// Operands after type promotion.
enum Promoted<'v> {
    Num(f64, f64),
    Int(i64, i64),
    Str(&'v str, &'v str),
    Bool(bool, bool),
}

fn cast_boolean(s: &str) -> Result<bool, Error> {
    match s.trim() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(Error::context_type(format!("cannot cast \"{other}\" to xs:boolean"))),
    }
}

/// Applies the promotion rules. In general comparisons untyped content
/// adopts the type of the other operand; in value comparisons it is a string.
fn promote<'v>(a: &'v AtomicValue, b: &'v AtomicValue, general: bool) -> Result<Promoted<'v>, Error> {
    use AtomicValue as V;
    Ok(match (a, b) {
        (V::Integer(x), V::Integer(y)) => Promoted::Int(*x, *y),
        (V::Boolean(x), V::Boolean(y)) => Promoted::Bool(*x, *y),
        (V::String(x) | V::UntypedAtomic(x), V::String(y) | V::UntypedAtomic(y)) => Promoted::Str(x, y),
        (V::UntypedAtomic(s), V::Boolean(y)) if general => Promoted::Bool(cast_boolean(s)?, *y),
        (V::Boolean(x), V::UntypedAtomic(s)) if general => Promoted::Bool(*x, cast_boolean(s)?),
        _ if a.is_numeric() && b.is_numeric() => {
            Promoted::Num(a.to_double().unwrap_or(f64::NAN), b.to_double().unwrap_or(f64::NAN))
        }
        (V::UntypedAtomic(_), _) if general && b.is_numeric() => {
            Promoted::Num(a.to_double().unwrap_or(f64::NAN), b.to_double().unwrap_or(f64::NAN))
        }
        (_, V::UntypedAtomic(_)) if general && a.is_numeric() => {
            Promoted::Num(a.to_double().unwrap_or(f64::NAN), b.to_double().unwrap_or(f64::NAN))
        }
        _ => {
            return Err(Error::context_type(format!(
                "cannot compare {} with {}",
                a.atomic_type().name(),
                b.atomic_type().name()
            )));
        }
    })
}

fn apply(op: CompOp, ord: Option<Ordering>) -> bool {
    match ord {
        // NaN: only `!=` holds
        None => op == CompOp::Ne,
        Some(o) => match op {
            CompOp::Eq => o == Ordering::Equal,
            CompOp::Ne => o != Ordering::Equal,
            CompOp::Lt => o == Ordering::Less,
            CompOp::Le => o != Ordering::Greater,
            CompOp::Gt => o == Ordering::Greater,
            CompOp::Ge => o != Ordering::Less,
        },
    }
}

pub(crate) fn compare_atomic(
    op: CompOp,
    a: &AtomicValue,
    b: &AtomicValue,
    general: bool,
    collation: &dyn Collation,
) -> Result<bool, Error> {
    let ord = match promote(a, b, general)? {
        Promoted::Int(x, y) => Some(x.cmp(&y)),
        Promoted::Num(x, y) => x.partial_cmp(&y),
        Promoted::Str(x, y) => Some(collation.compare(x, y)),
        Promoted::Bool(x, y) => Some(x.cmp(&y)),
    };
    Ok(apply(op, ord))
}

/// Existential comparison: true if some pair of operands satisfies `op`.
pub(crate) fn compare_general(
    op: CompOp,
    lhs: &[AtomicValue],
    rhs: &[AtomicValue],
    collation: &dyn Collation,
) -> Result<bool, Error> {
    for a in lhs {
        for b in rhs {
            if compare_atomic(op, a, b, true, collation)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Order of two optional sort keys: empty sorts first, NaN right after.
pub(crate) fn order_keys(
    a: Option<&AtomicValue>,
    b: Option<&AtomicValue>,
    collation: &dyn Collation,
) -> Result<Ordering, Error> {
    let (a, b) = match (a, b) {
        (None, None) => return Ok(Ordering::Equal),
        (None, Some(_)) => return Ok(Ordering::Less),
        (Some(_), None) => return Ok(Ordering::Greater),
        (Some(a), Some(b)) => (a, b),
    };
    Ok(match promote(a, b, false)? {
        Promoted::Int(x, y) => x.cmp(&y),
        Promoted::Num(x, y) => match (x.is_nan(), y.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        },
        Promoted::Str(x, y) => collation.compare(x, y),
        Promoted::Bool(x, y) => x.cmp(&y),
    })
}
