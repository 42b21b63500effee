//! Builtin function implementations and the atomization / effective boolean
//! value rules they share with the rest of the evaluator.
use super::EvalContext;
use super::comparison::compare_atomic;
use super::cursors::IterCursor;
use crate::compiler::expr::{CompOp, Expr};
use crate::compiler::functions::Function;
use crate::engine::collation::Collation;
use crate::engine::runtime::Error;
use crate::model::{Node, NodeKind};
use crate::path::{Axis, axis_nodes};
use crate::xdm::{AtomicValue, Item, ItemResult, ItemStream, SequenceCursor, Value};
use compact_str::CompactString;

/// Atomized value of an item: nodes yield their string value as untyped
/// content.
pub(crate) fn atomize(ctx: &EvalContext<'_>, item: &Item) -> AtomicValue {
    match item {
        Item::Atomic(a) => a.clone(),
        Item::Node(n) => AtomicValue::UntypedAtomic(n.string_value(ctx.tree())),
    }
}

fn string_of(ctx: &EvalContext<'_>, item: &Item) -> CompactString {
    match item {
        Item::Atomic(a) => a.lexical(),
        Item::Node(n) => n.string_value(ctx.tree()),
    }
}

fn atomic_ebv(a: &AtomicValue) -> bool {
    match a {
        AtomicValue::Boolean(b) => *b,
        AtomicValue::Integer(i) => *i != 0,
        AtomicValue::Double(d) => *d != 0.0 && !d.is_nan(),
        AtomicValue::String(s) | AtomicValue::UntypedAtomic(s) => !s.is_empty(),
    }
}

fn ebv_error() -> Error {
    Error::context_type("effective boolean value is not defined for a sequence of two or more atomic values")
}

/// Effective boolean value of a materialized sequence.
pub(crate) fn effective_boolean(items: &[Item]) -> Result<bool, Error> {
    match items {
        [] => Ok(false),
        [Item::Node(_), ..] => Ok(true),
        [Item::Atomic(a)] => Ok(atomic_ebv(a)),
        _ => Err(ebv_error()),
    }
}

/// Effective boolean value of a stream, pulling at most two items, together
/// with the relevance score of the deciding item.
pub(crate) fn ebv_scored(mut stream: ItemStream<'_>) -> Result<(bool, Option<f64>), Error> {
    match stream.next_item().transpose()? {
        None => Ok((false, None)),
        Some(Item::Node(n)) => Ok((true, n.score())),
        Some(Item::Atomic(a)) => {
            if stream.next_item().transpose()?.is_some() {
                return Err(ebv_error());
            }
            Ok((atomic_ebv(&a), None))
        }
    }
}

/// `fn:one-or-more`: passes items through, failing if there is none.
struct NonEmptyCursor<'a> {
    inner: ItemStream<'a>,
    seen: bool,
}

impl SequenceCursor for NonEmptyCursor<'_> {
    fn next_item(&mut self) -> Option<ItemResult> {
        match self.inner.next_item() {
            None if !self.seen => {
                self.seen = true;
                Some(Err(Error::cardinality("fn:one-or-more called with an empty sequence")))
            }
            other => {
                self.seen = true;
                other
            }
        }
    }
}

fn single<'a>(v: impl Into<Item>) -> ItemStream<'a> {
    Value::single(v).stream()
}

fn string_arg(ctx: &EvalContext<'_>, arg: &Expr) -> Result<CompactString, Error> {
    Ok(arg.item(ctx)?.map(|i| string_of(ctx, &i)).unwrap_or_default())
}

fn collation_arg(ctx: &EvalContext<'_>, arg: Option<&Expr>) -> Result<std::sync::Arc<dyn Collation>, Error> {
    match arg {
        Some(e) => {
            let uri = string_arg(ctx, e)?;
            ctx.collation(Some(uri.as_str()))
        }
        None => ctx.collation(None),
    }
}

pub(crate) fn call<'a>(ctx: &EvalContext<'a>, func: Function, args: &'a [Expr]) -> Result<ItemStream<'a>, Error> {
    func.check_arity(args.len())?;
    Ok(match (func, args) {
        (Function::True, _) => single(true),
        (Function::False, _) => single(false),
        (Function::Empty, [arg]) => single(arg.iter(ctx)?.next_item().transpose()?.is_none()),
        (Function::Exists, [arg]) => single(arg.iter(ctx)?.next_item().transpose()?.is_some()),
        (Function::Boolean, [arg]) => single(arg.ebv(ctx)?),
        (Function::Not, [arg]) => single(!arg.ebv(ctx)?),
        (Function::ZeroOrOne, [arg]) => {
            let v = arg.value(ctx)?;
            if v.len() > 1 {
                return Err(Error::cardinality("fn:zero-or-one called with a sequence of more than one item"));
            }
            v.stream()
        }
        (Function::ExactlyOne, [arg]) => {
            let v = arg.value(ctx)?;
            if v.len() != 1 {
                return Err(Error::cardinality(format!("fn:exactly-one called with {} items", v.len())));
            }
            v.stream()
        }
        (Function::OneOrMore, [arg]) => ItemStream::new(NonEmptyCursor { inner: arg.iter(ctx)?, seen: false }),
        (Function::Unordered, [arg]) => arg.iter(ctx)?,
        (Function::Count, [arg]) => {
            let mut n: i64 = 0;
            for it in arg.iter(ctx)? {
                it?;
                n += 1;
            }
            single(n)
        }
        (Function::Position, _) => single(i64::try_from(ctx.focus()?.position).unwrap_or(i64::MAX)),
        (Function::Last, _) => {
            let size = ctx.focus()?.size.ok_or_else(|| Error::context_type("context size is unknown"))?;
            single(i64::try_from(size).unwrap_or(i64::MAX))
        }
        (Function::Data, [arg]) => {
            let inner = ctx.clone();
            ItemStream::new(IterCursor::new(arg.iter(ctx)?.map(move |it| it.map(|i| Item::Atomic(atomize(&inner, &i))))))
        }
        (Function::String, []) => single(AtomicValue::String(string_of(ctx, ctx.context_item()?))),
        (Function::String, [arg]) => single(AtomicValue::String(string_arg(ctx, arg)?)),
        (Function::StartsWith, [s, prefix, rest @ ..]) => {
            let collation = collation_arg(ctx, rest.first())?;
            let s = collation.key(&string_arg(ctx, s)?);
            let prefix = collation.key(&string_arg(ctx, prefix)?);
            single(s.starts_with(&prefix))
        }
        (Function::DeepEqual, [a, b, rest @ ..]) => {
            let collation = collation_arg(ctx, rest.first())?;
            let a = a.value(ctx)?;
            let b = b.value(ctx)?;
            single(deep_equal_seq(ctx, a.items(), b.items(), collation.as_ref())?)
        }
        (Function::RandomNumber, _) => single(AtomicValue::Double(rand::random::<f64>())),
        (f, args) => {
            return Err(Error::context_type(format!("fn:{} cannot be called with {} arguments", f.def().local, args.len())));
        }
    })
}

fn deep_equal_seq(ctx: &EvalContext<'_>, a: &[Item], b: &[Item], collation: &dyn Collation) -> Result<bool, Error> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (x, y) in a.iter().zip(b) {
        let same = match (x, y) {
            (Item::Atomic(x), Item::Atomic(y)) => deep_equal_atomic(x, y, collation),
            (Item::Node(x), Item::Node(y)) => deep_equal_node(ctx, x, y, collation)?,
            _ => false,
        };
        if !same {
            return Ok(false);
        }
    }
    Ok(true)
}

fn deep_equal_atomic(a: &AtomicValue, b: &AtomicValue, collation: &dyn Collation) -> bool {
    let both_nan = matches!((a.to_double(), b.to_double()), (Some(x), Some(y)) if x.is_nan() && y.is_nan());
    if both_nan && a.is_numeric() && b.is_numeric() {
        return true;
    }
    // incomparable values are simply unequal
    compare_atomic(CompOp::Eq, a, b, false, collation).unwrap_or(false)
}

fn children(ctx: &EvalContext<'_>, n: &Node, axis: Axis) -> Result<Vec<Node>, Error> {
    Ok(axis_nodes(ctx.dyn_ctx, n, axis)?
        .filter(|c| !matches!(c.kind(), NodeKind::Comment | NodeKind::ProcessingInstruction))
        .collect())
}

fn deep_equal_node(ctx: &EvalContext<'_>, a: &Node, b: &Node, collation: &dyn Collation) -> Result<bool, Error> {
    if a.kind() != b.kind() {
        return Ok(false);
    }
    let tree = ctx.tree();
    match a.kind() {
        NodeKind::Document => deep_equal_children(ctx, a, b, collation),
        NodeKind::Element => {
            if a.name(tree) != b.name(tree) {
                return Ok(false);
            }
            let attrs_a = children(ctx, a, Axis::Attribute)?;
            let attrs_b = children(ctx, b, Axis::Attribute)?;
            if attrs_a.len() != attrs_b.len() {
                return Ok(false);
            }
            for x in &attrs_a {
                let mut matched = false;
                for y in &attrs_b {
                    if deep_equal_node(ctx, x, y, collation)? {
                        matched = true;
                        break;
                    }
                }
                if !matched {
                    return Ok(false);
                }
            }
            deep_equal_children(ctx, a, b, collation)
        }
        NodeKind::Attribute | NodeKind::ProcessingInstruction => Ok(a.name(tree) == b.name(tree)
            && collation.compare(&a.string_value(tree), &b.string_value(tree)).is_eq()),
        NodeKind::Text | NodeKind::Comment => {
            Ok(collation.compare(&a.string_value(tree), &b.string_value(tree)).is_eq())
        }
    }
}

fn deep_equal_children(ctx: &EvalContext<'_>, a: &Node, b: &Node, collation: &dyn Collation) -> Result<bool, Error> {
    let ca = children(ctx, a, Axis::Child)?;
    let cb = children(ctx, b, Axis::Child)?;
    if ca.len() != cb.len() {
        return Ok(false);
    }
    for (x, y) in ca.iter().zip(&cb) {
        if !deep_equal_node(ctx, x, y, collation)? {
            return Ok(false);
        }
    }
    Ok(true)
}
