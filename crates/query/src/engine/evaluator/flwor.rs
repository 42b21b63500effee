//! FLWOR evaluation as a stream of variable tuples.
//!
//! Each tuple is an [`EvalContext`] carrying the bindings made so far.
//! `for`, `let` and `where` transform the tuple stream lazily; `group by` and
//! `order by` need the whole stream and materialize it.
use super::EvalContext;
use super::comparison::order_keys;
use super::cursors::IterCursor;
use super::functions::atomize;
use super::group;
use crate::compiler::expr::{Clause, Expr, Flwor, OrderBy};
use crate::compiler::var::Var;
use crate::engine::runtime::Error;
use crate::xdm::{AtomicValue, ItemResult, ItemStream, Value};
use core::cmp::Ordering;

type Tuples<'a> = Box<dyn Iterator<Item = Result<EvalContext<'a>, Error>> + 'a>;

fn for_clause<'a>(input: Tuples<'a>, var: &'a Var, pos: Option<&'a Var>, expr: &'a Expr) -> Tuples<'a> {
    Box::new(input.flat_map(move |tuple| -> Tuples<'a> {
        let tuple = match tuple {
            Ok(t) => t,
            Err(e) => return Box::new(core::iter::once(Err(e))),
        };
        let items = match expr.iter(&tuple) {
            Ok(s) => s,
            Err(e) => return Box::new(core::iter::once(Err(e))),
        };
        Box::new(items.enumerate().map(move |(i, item)| {
            let item = item?;
            tuple.dyn_ctx.check_deadline()?;
            let value = Value::single(item);
            var.check(&value)?;
            let mut next = tuple.clone();
            next.bind(var, value)?;
            if let Some(p) = pos {
                next.bind(p, Value::single(i64::try_from(i + 1).unwrap_or(i64::MAX)))?;
            }
            Ok(next)
        }))
    }))
}

fn let_clause<'a>(input: Tuples<'a>, var: &'a Var, expr: &'a Expr) -> Tuples<'a> {
    Box::new(input.map(move |tuple| {
        let mut tuple = tuple?;
        let value = expr.value(&tuple)?;
        var.check(&value)?;
        tuple.bind(var, value)?;
        Ok(tuple)
    }))
}

fn where_clause<'a>(input: Tuples<'a>, cond: &'a Expr) -> Tuples<'a> {
    Box::new(input.filter_map(move |tuple| match tuple {
        Ok(t) => match cond.ebv(&t) {
            Ok(true) => Some(Ok(t)),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        },
        Err(e) => Some(Err(e)),
    }))
}

/// Sort key of one tuple: at most one atomic value per key expression.
fn sort_key(tuple: &EvalContext<'_>, order: &OrderBy) -> Result<Vec<Option<AtomicValue>>, Error> {
    order
        .keys
        .iter()
        .map(|k| {
            let v = k.expr.value(tuple)?;
            match v.items() {
                [] => Ok(None),
                [item] => Ok(Some(atomize(tuple, item))),
                _ => Err(Error::cardinality("order by key must not yield more than one item")),
            }
        })
        .collect()
}

/// Stable sort of the tuples by their keys.
fn order_tuples<'a>(
    ctx: &EvalContext<'a>,
    tuples: Vec<EvalContext<'a>>,
    order: &OrderBy,
) -> Result<Vec<EvalContext<'a>>, Error> {
    let collation = ctx.collation(None)?;
    let mut keyed = tuples
        .into_iter()
        .map(|t| {
            t.dyn_ctx.check_deadline()?;
            Ok((sort_key(&t, order)?, t))
        })
        .collect::<Result<Vec<_>, Error>>()?;
    let mut failure: Option<Error> = None;
    keyed.sort_by(|(a, _), (b, _)| {
        for ((x, y), key) in a.iter().zip(b).zip(&order.keys) {
            match order_keys(x.as_ref(), y.as_ref(), collation.as_ref()) {
                Ok(Ordering::Equal) => {}
                Ok(o) => return if key.descending { o.reverse() } else { o },
                Err(e) => {
                    failure.get_or_insert(e);
                    return Ordering::Equal;
                }
            }
        }
        Ordering::Equal
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(keyed.into_iter().map(|(_, t)| t).collect()),
    }
}

pub(super) fn eval<'a>(ctx: &EvalContext<'a>, flwor: &'a Flwor) -> Result<ItemStream<'a>, Error> {
    let mut tuples: Tuples<'a> = Box::new(core::iter::once(Ok(ctx.clone())));
    for clause in &flwor.clauses {
        tuples = match clause {
            Clause::For { var, pos, expr } => for_clause(tuples, var, pos.as_ref(), expr),
            Clause::Let { var, expr } => let_clause(tuples, var, expr),
            Clause::Where(cond) => where_clause(tuples, cond),
        };
    }
    if flwor.group.is_some() || flwor.order.is_some() {
        let mut all = tuples.collect::<Result<Vec<_>, Error>>()?;
        if let Some(g) = &flwor.group {
            all = group::partition(ctx, all, g)?;
        }
        if let Some(o) = &flwor.order {
            all = order_tuples(ctx, all, o)?;
        }
        tuples = Box::new(all.into_iter().map(Ok));
    }
    let ret = &flwor.ret;
    let items = tuples.flat_map(move |tuple| -> Box<dyn Iterator<Item = ItemResult> + 'a> {
        match tuple.and_then(|t| ret.iter(&t)) {
            Ok(s) => Box::new(s),
            Err(e) => Box::new(core::iter::once(Err(e))),
        }
    });
    Ok(ItemStream::new(IterCursor::new(items)))
}
