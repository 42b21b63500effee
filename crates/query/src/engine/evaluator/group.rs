//! `group by` partitioning.
//!
//! Tuples are partitioned by the composite key of their atomized grouping
//! values. Partitions keep first-seen order. Each output tuple is the first
//! tuple of its partition with the grouping variables bound to the key and
//! every non-grouping copy bound to the concatenated values of all
//! contributing tuples.
use super::EvalContext;
use super::functions::atomize;
use crate::compiler::expr::GroupBy;
use crate::consts::EVAL_TARGET;
use crate::engine::collation::Collation;
use crate::engine::runtime::{Error, ErrorCode};
use crate::xdm::{AtomicValue, Item, Value};
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::trace;

/// One component of a composite key. Numeric values compare by value
/// regardless of their type, all NaNs group together and strings compare by
/// collation key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyAtom {
    Empty,
    Bool(bool),
    Int(i64),
    Num(u64),
    NaN,
    Str(String),
}

impl KeyAtom {
    fn of(value: Option<&AtomicValue>, collation: &dyn Collation) -> KeyAtom {
        let Some(value) = value else { return KeyAtom::Empty };
        match value {
            AtomicValue::Boolean(b) => KeyAtom::Bool(*b),
            AtomicValue::Integer(i) => KeyAtom::Int(*i),
            AtomicValue::Double(d) => KeyAtom::of_double(*d),
            // untyped grouping values are compared as strings
            AtomicValue::String(s) | AtomicValue::UntypedAtomic(s) => KeyAtom::Str(collation.key(s)),
        }
    }

    /// Integral doubles share the integer key so `1` and `1.0` meet; `-0`
    /// lands on `Int(0)`.
    #[allow(clippy::cast_possible_truncation)]
    fn of_double(d: f64) -> KeyAtom {
        const LIMIT: f64 = 9_223_372_036_854_775_808.0; // 2^63
        if d.is_nan() {
            KeyAtom::NaN
        } else if d.fract() == 0.0 && (-LIMIT..LIMIT).contains(&d) {
            KeyAtom::Int(d as i64)
        } else {
            KeyAtom::Num(d.to_bits())
        }
    }
}

struct Partition<'a> {
    repr: EvalContext<'a>,
    keys: Vec<Option<AtomicValue>>,
    members: Vec<Vec<Item>>,
}

pub(super) fn partition<'a>(
    ctx: &EvalContext<'a>,
    tuples: Vec<EvalContext<'a>>,
    group: &GroupBy,
) -> Result<Vec<EvalContext<'a>>, Error> {
    let collations = group
        .specs
        .iter()
        .map(|s| ctx.collation(s.collation.as_deref()))
        .collect::<Result<Vec<Arc<dyn Collation>>, Error>>()?;
    let mut parts: IndexMap<Vec<KeyAtom>, Partition<'a>> = IndexMap::new();
    for tuple in tuples {
        tuple.dyn_ctx.check_deadline()?;
        let mut keys = Vec::with_capacity(group.specs.len());
        for spec in &group.specs {
            let v = spec.expr.value(&tuple)?;
            match v.items() {
                [] => keys.push(None),
                [item] => keys.push(Some(atomize(&tuple, item))),
                items => {
                    return Err(Error::from_code(
                        ErrorCode::GroupingCardinality,
                        format!("grouping key {} yields {} items", spec.var, items.len()),
                    )
                    .at(spec.expr.info.pos));
                }
            }
        }
        let composite: Vec<KeyAtom> =
            keys.iter().zip(&collations).map(|(k, c)| KeyAtom::of(k.as_ref(), c.as_ref())).collect();
        let mut contributed = Vec::with_capacity(group.non_group.len());
        for (orig, _) in &group.non_group {
            contributed.push(tuple.lookup(orig)?);
        }
        let part = match parts.entry(composite) {
            indexmap::map::Entry::Occupied(e) => e.into_mut(),
            indexmap::map::Entry::Vacant(e) => {
                trace!(target: EVAL_TARGET, partition = e.index(), "new group partition");
                e.insert(Partition { repr: tuple, keys, members: vec![Vec::new(); group.non_group.len()] })
            }
        };
        for (acc, v) in part.members.iter_mut().zip(contributed) {
            acc.extend(v.iter().cloned());
        }
    }
    let mut out = Vec::with_capacity(parts.len());
    for (_, part) in parts {
        let mut t = part.repr;
        for (spec, key) in group.specs.iter().zip(part.keys) {
            t.bind(&spec.var, key.map_or_else(Value::empty, |k| Value::single(k)))?;
        }
        for ((_, copy), items) in group.non_group.iter().zip(part.members) {
            t.bind(copy, Value::from_vec(items))?;
        }
        out.push(t);
    }
    Ok(out)
}
