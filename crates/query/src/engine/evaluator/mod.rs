//! Pull-based evaluation of compiled expression trees.
//!
//! Every expression yields an [`ItemStream`]. Steps, index probes, sequences
//! and FLWOR tuples are produced lazily; only where an operation needs the
//! whole input (sorting path results, buffered predicates, grouping and
//! ordering) is a sequence materialized.
use crate::compiler::compile::CompiledQuery;
use crate::compiler::expr::{Construct, Expr, ExprKind, LogicOp, PosRange, Step};
use crate::compiler::var::{Bindings, Var, VarKind, unbound};
use crate::consts::EVAL_TARGET;
use crate::engine::collation::{Collation, resolve_collation};
use crate::engine::runtime::{DynamicContext, Error, SourcePos, StaticContext};
use crate::model::{Fragment, Node, TreeStore};
use crate::path::AxisCursor;
use crate::xdm::{Item, ItemStream, Value};
use compact_str::CompactString;
use itertools::Itertools;
use std::sync::Arc;
use tracing::debug;

mod comparison;
mod cursors;
mod flwor;
pub(crate) mod functions;
mod group;

use cursors::{IndexCursor, LocatedCursor, SeqCursor, StepCursor};
use functions::{atomize, ebv_scored};

/// Context item with its position and, when known, the context size.
#[derive(Debug, Clone)]
pub(crate) struct Focus {
    pub(crate) item: Item,
    pub(crate) position: usize,
    pub(crate) size: Option<usize>,
}

/// Everything an expression can observe while it is evaluated.
///
/// Cloning is cheap enough to do per tuple: the contexts are borrowed and
/// variable values live behind `Arc`s.
#[derive(Clone)]
pub struct EvalContext<'a> {
    pub dyn_ctx: &'a DynamicContext,
    pub static_ctx: &'a StaticContext,
    pub(crate) focus: Option<Focus>,
    pub(crate) vars: Bindings,
}

impl<'a> EvalContext<'a> {
    pub fn new(dyn_ctx: &'a DynamicContext, static_ctx: &'a StaticContext, slots: usize) -> Self {
        let focus = dyn_ctx.context_item.clone().map(|item| Focus { item, position: 1, size: Some(1) });
        Self { dyn_ctx, static_ctx, focus, vars: Bindings::with_size(slots) }
    }

    pub(crate) fn with_focus(&self, item: Item, position: usize, size: Option<usize>) -> Self {
        let mut ctx = self.clone();
        ctx.focus = Some(Focus { item, position, size });
        ctx
    }

    pub(crate) fn focus(&self) -> Result<&Focus, Error> {
        self.focus.as_ref().ok_or_else(|| Error::context_type("context item is absent"))
    }

    pub fn context_item(&self) -> Result<&Item, Error> {
        Ok(&self.focus()?.item)
    }

    pub(crate) fn context_node(&self) -> Result<&Node, Error> {
        match self.context_item()? {
            Item::Node(n) => Ok(n),
            Item::Atomic(a) => Err(Error::context_type(format!("context item {a} is not a node"))),
        }
    }

    pub(crate) fn tree(&self) -> Option<&'a dyn TreeStore> {
        self.dyn_ctx.data.as_ref().map(|d| d.tree.as_ref())
    }

    pub(crate) fn collation(&self, uri: Option<&str>) -> Result<Arc<dyn Collation>, Error> {
        resolve_collation(self.dyn_ctx, self.static_ctx, uri)
    }

    pub(crate) fn bind(&mut self, var: &Var, value: Value) -> Result<(), Error> {
        self.vars.bind(var, value)
    }

    pub(crate) fn lookup(&self, var: &Var) -> Result<Value, Error> {
        if var.kind == VarKind::Global {
            return self.dyn_ctx.globals.get(&var.id).cloned().ok_or_else(|| unbound(var));
        }
        self.vars.lookup(var).cloned()
    }
}

impl Expr {
    /// Lazily evaluates the expression. Errors carry the position of the
    /// innermost failing expression.
    pub fn iter<'a>(&'a self, ctx: &EvalContext<'a>) -> Result<ItemStream<'a>, Error> {
        let stream = self.stream(ctx).map_err(|e| e.at(self.info.pos))?;
        if self.info.pos == SourcePos::default() {
            return Ok(stream);
        }
        Ok(ItemStream::new(LocatedCursor::new(stream, self.info.pos)))
    }

    pub fn value(&self, ctx: &EvalContext<'_>) -> Result<Value, Error> {
        if let ExprKind::Literal(v) = &self.kind {
            return Ok(v.clone());
        }
        self.iter(ctx)?.materialize()
    }

    /// At most one item; a second one is a cardinality error.
    pub fn item(&self, ctx: &EvalContext<'_>) -> Result<Option<Item>, Error> {
        let mut s = self.iter(ctx)?;
        let Some(first) = s.next_item().transpose()? else { return Ok(None) };
        if s.next_item().transpose()?.is_some() {
            return Err(Error::cardinality("sequence of more than one item is not allowed").at(self.info.pos));
        }
        Ok(Some(first))
    }

    /// Effective boolean value.
    pub fn ebv(&self, ctx: &EvalContext<'_>) -> Result<bool, Error> {
        let (b, _) = ebv_scored(self.iter(ctx)?)?;
        Ok(b)
    }

    fn stream<'a>(&'a self, ctx: &EvalContext<'a>) -> Result<ItemStream<'a>, Error> {
        Ok(match &self.kind {
            ExprKind::Literal(v) => v.stream(),
            ExprKind::ContextItem => Value::single(ctx.context_item()?.clone()).stream(),
            ExprKind::Root => Value::single(root_of(ctx)?).stream(),
            ExprKind::VarRef(v) => ctx.lookup(v)?.stream(),
            ExprKind::IterStep(step) => step_stream(ctx, step, None)?,
            ExprKind::IterPosStep(step, range) => step_stream(ctx, step, Some(*range))?,
            ExprKind::AxisStep(step) => buffered_step(ctx, step)?.stream(),
            ExprKind::Path { root, steps } => path_stream(ctx, root.as_deref(), steps)?,
            ExprKind::RangeAccess(r) => ItemStream::new(IndexCursor::new(ctx.dyn_ctx, r.kind, r.scan(ctx.dyn_ctx)?)),
            ExprKind::TextAccess(t) => ItemStream::new(IndexCursor::new(ctx.dyn_ctx, t.kind, t.scan(ctx.dyn_ctx)?)),
            ExprKind::Compare { op, general, lhs, rhs } => {
                let lhs = lhs.iter(ctx)?.map(|it| it.map(|i| atomize(ctx, &i))).collect::<Result<Vec<_>, _>>()?;
                let rhs = rhs.iter(ctx)?.map(|it| it.map(|i| atomize(ctx, &i))).collect::<Result<Vec<_>, _>>()?;
                let collation = ctx.collation(None)?;
                if *general {
                    Value::single(comparison::compare_general(*op, &lhs, &rhs, collation.as_ref())?).stream()
                } else {
                    match (lhs.as_slice(), rhs.as_slice()) {
                        ([], _) | (_, []) => ItemStream::empty(),
                        ([a], [b]) => {
                            Value::single(comparison::compare_atomic(*op, a, b, false, collation.as_ref())?).stream()
                        }
                        _ => return Err(Error::cardinality("value comparison requires single operands")),
                    }
                }
            }
            ExprKind::Logic { op, operands } => {
                let mut result = *op == LogicOp::And;
                for operand in operands {
                    if operand.ebv(ctx)? != result {
                        result = !result;
                        break;
                    }
                }
                Value::single(result).stream()
            }
            ExprKind::Call(c) => functions::call(ctx, c.func, &c.args)?,
            ExprKind::UserCall { func, args } => {
                let mut frame = EvalContext {
                    dyn_ctx: ctx.dyn_ctx,
                    static_ctx: ctx.static_ctx,
                    focus: None,
                    vars: Bindings::with_size(func.scope_size),
                };
                for (param, arg) in func.params.iter().zip(args) {
                    let v = arg.value(ctx)?;
                    param.check(&v)?;
                    frame.bind(param, v)?;
                }
                let v = func.body.value(&frame)?;
                if let Some(t) = func.ret
                    && let Some(code) = t.mismatch(&v)
                {
                    return Err(Error::from_code(
                        code,
                        format!("{}: result of type {} does not match declared type {t}", func.name, v.seq_type()),
                    ));
                }
                v.stream()
            }
            ExprKind::Construct(c) => construct(ctx, c)?.stream(),
            ExprKind::Flwor(f) => flwor::eval(ctx, f)?,
            ExprKind::Seq(items) => ItemStream::new(SeqCursor::new(ctx.clone(), items)),
        })
    }
}

fn root_of(ctx: &EvalContext<'_>) -> Result<Item, Error> {
    let node = ctx.context_node()?;
    let Some(id) = node.id() else {
        return Err(Error::context_type("root of a constructed node is not a document"));
    };
    let tree = ctx.dyn_ctx.data()?.tree.as_ref();
    let root = tree.root(id);
    Ok(Item::Node(Node::db(root, tree.kind(root))))
}

fn step_stream<'a>(
    ctx: &EvalContext<'a>,
    step: &'a Step,
    range: Option<PosRange>,
) -> Result<ItemStream<'a>, Error> {
    let node = ctx.context_node()?;
    let axis = AxisCursor::new(ctx.dyn_ctx, node, step.axis, &step.test)?;
    Ok(ItemStream::new(StepCursor::new(ctx.clone(), axis, &step.preds, range)))
}

/// Generic step: all candidates are collected first so that predicates see
/// the context size and the full positional range.
fn buffered_step<'a>(ctx: &EvalContext<'a>, step: &'a Step) -> Result<Value, Error> {
    let node = ctx.context_node()?;
    let mut nodes = AxisCursor::new(ctx.dyn_ctx, node, step.axis, &step.test)?.collect::<Result<Vec<_>, _>>()?;
    for pred in &step.preds {
        let size = nodes.len();
        let mut kept = Vec::with_capacity(size);
        for (i, n) in nodes.into_iter().enumerate() {
            let inner = ctx.with_focus(Item::Node(n.clone()), i + 1, Some(size));
            let v = pred.value(&inner)?;
            let (keep, score) = match v.items() {
                [Item::Atomic(a)] if a.is_numeric() => (a.to_double() == Some((i + 1) as f64), None),
                items => (functions::effective_boolean(items)?, items.first().and_then(Item::score)),
            };
            if keep {
                kept.push(if score.is_some() { n.with_score(score) } else { n });
            }
        }
        nodes = kept;
    }
    Ok(nodes.into_iter().map(Item::Node).collect())
}

/// Nodes in document order without duplicates; atomics keep their order.
/// A mix of both is an error.
fn normalize(items: Vec<Item>) -> Result<Vec<Item>, Error> {
    let nodes = items.iter().filter(|i| i.is_node()).count();
    if nodes == 0 {
        return Ok(items);
    }
    if nodes != items.len() {
        return Err(Error::context_type("path step yields both nodes and atomic values"));
    }
    Ok(items
        .into_iter()
        .filter_map(|i| match i {
            Item::Node(n) => Some(n),
            Item::Atomic(_) => None,
        })
        .sorted_by(|a, b| a.doc_order(b))
        .dedup()
        .map(Item::Node)
        .collect())
}

fn path_stream<'a>(ctx: &EvalContext<'a>, root: Option<&'a Expr>, steps: &'a [Expr]) -> Result<ItemStream<'a>, Error> {
    let mut input: Vec<Item> = match root {
        Some(r) => r.value(ctx)?.items().to_vec(),
        None => vec![ctx.context_item()?.clone()],
    };
    let Some((last, inner)) = steps.split_last() else {
        return Ok(Value::from_vec(input).stream());
    };
    for step in inner {
        input = normalize(apply_step(ctx, &input, step)?)?;
        if input.is_empty() {
            return Ok(ItemStream::empty());
        }
    }
    // a forward step from a single node already yields document order
    if let [single] = input.as_slice()
        && last.as_step().is_some_and(|s| !s.axis.is_reverse())
    {
        return last.iter(&ctx.with_focus(single.clone(), 1, Some(1)));
    }
    Ok(Value::from_vec(normalize(apply_step(ctx, &input, last)?)?).stream())
}

fn apply_step<'a>(ctx: &EvalContext<'a>, input: &[Item], step: &'a Expr) -> Result<Vec<Item>, Error> {
    let size = input.len();
    let mut out = Vec::new();
    for (i, item) in input.iter().enumerate() {
        let inner = ctx.with_focus(item.clone(), i + 1, Some(size));
        for it in step.iter(&inner)? {
            out.push(it?);
        }
    }
    Ok(out)
}

fn construct(ctx: &EvalContext<'_>, c: &Construct) -> Result<Value, Error> {
    let content = match c {
        Construct::Element { content, .. } | Construct::Text(content) => content,
    };
    let items = content.value(ctx)?;
    let text = CompactString::from(items.iter().map(|i| atomize(ctx, i).lexical()).join(" "));
    Ok(match c {
        Construct::Element { name, .. } => Value::single(Node::fragment(Fragment::element(name.clone(), text))),
        Construct::Text(_) if items.is_empty() => Value::empty(),
        Construct::Text(_) => Value::single(Node::fragment(Fragment::text(text))),
    })
}

/// Evaluates with a throwaway dynamic context; used by the compiler to fold
/// expressions that depend on nothing but their literal inputs.
pub(crate) fn pre_evaluate(expr: &Expr, static_ctx: &StaticContext) -> Result<Value, Error> {
    let dyn_ctx = DynamicContext::default();
    let ctx = EvalContext::new(&dyn_ctx, static_ctx, 0);
    expr.value(&ctx)
}

/// Evaluates a compiled query and materializes the result.
pub fn evaluate(compiled: &CompiledQuery, dyn_ctx: &DynamicContext) -> Result<Value, Error> {
    evaluate_stream(compiled, dyn_ctx)?.materialize()
}

/// Evaluates a compiled query lazily. Errors raised while pulling items are
/// returned from the stream.
#[must_use = "streams are lazy and do nothing unless consumed"]
pub fn evaluate_stream<'a>(compiled: &'a CompiledQuery, dyn_ctx: &'a DynamicContext) -> Result<ItemStream<'a>, Error> {
    debug!(target: EVAL_TARGET, root = compiled.root.name(), slots = compiled.scope_size, "evaluating query");
    let ctx = EvalContext::new(dyn_ctx, &compiled.static_ctx, compiled.scope_size);
    compiled.root.iter(&ctx)
}

/// Evaluates a query whose result is at most one item.
pub fn evaluate_single(compiled: &CompiledQuery, dyn_ctx: &DynamicContext) -> Result<Option<Item>, Error> {
    let ctx = EvalContext::new(dyn_ctx, &compiled.static_ctx, compiled.scope_size);
    compiled.root.item(&ctx)
}
