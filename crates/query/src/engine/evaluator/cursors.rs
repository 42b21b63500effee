use super::EvalContext;
use super::functions::ebv_scored;
use crate::compiler::expr::{Expr, PosRange};
use crate::engine::runtime::{DynamicContext, Error, SourcePos};
use crate::model::{IndexKind, Node, NodeId};
use crate::path::AxisCursor;
use crate::xdm::{Item, ItemResult, ItemStream, SequenceCursor};

/// Attaches a source position to errors raised while pulling items.
pub(super) struct LocatedCursor<'a> {
    inner: ItemStream<'a>,
    pos: SourcePos,
}

impl<'a> LocatedCursor<'a> {
    pub(super) fn new(inner: ItemStream<'a>, pos: SourcePos) -> Self {
        Self { inner, pos }
    }
}

impl SequenceCursor for LocatedCursor<'_> {
    fn next_item(&mut self) -> Option<ItemResult> {
        self.inner.next_item().map(|r| r.map_err(|e| e.at(self.pos)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Adapts any iterator of item results.
pub(super) struct IterCursor<I> {
    inner: I,
}

impl<I> IterCursor<I> {
    pub(super) fn new(inner: I) -> Self {
        Self { inner }
    }
}

impl<I: Iterator<Item = ItemResult>> SequenceCursor for IterCursor<I> {
    fn next_item(&mut self) -> Option<ItemResult> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Turns index hits into nodes. Hits are ascending ids, i.e. document order.
pub(super) struct IndexCursor<'a> {
    dyn_ctx: &'a DynamicContext,
    kind: IndexKind,
    hits: Box<dyn Iterator<Item = NodeId> + 'a>,
    done: bool,
}

impl<'a> IndexCursor<'a> {
    pub(super) fn new(dyn_ctx: &'a DynamicContext, kind: IndexKind, hits: Box<dyn Iterator<Item = NodeId> + 'a>) -> Self {
        Self { dyn_ctx, kind, hits, done: false }
    }
}

impl SequenceCursor for IndexCursor<'_> {
    fn next_item(&mut self) -> Option<ItemResult> {
        if self.done {
            return None;
        }
        if let Err(e) = self.dyn_ctx.check_deadline() {
            self.done = true;
            return Some(Err(e));
        }
        let id = self.hits.next()?;
        Some(Ok(Item::Node(Node::db(id, self.kind.node_kind()))))
    }
}

/// Concatenation of the operands of a sequence expression, each evaluated
/// only once the previous one is exhausted.
pub(super) struct SeqCursor<'a> {
    ctx: EvalContext<'a>,
    rest: core::slice::Iter<'a, Expr>,
    current: Option<ItemStream<'a>>,
}

impl<'a> SeqCursor<'a> {
    pub(super) fn new(ctx: EvalContext<'a>, items: &'a [Expr]) -> Self {
        Self { ctx, rest: items.iter(), current: None }
    }
}

impl SequenceCursor for SeqCursor<'_> {
    fn next_item(&mut self) -> Option<ItemResult> {
        loop {
            if let Some(cur) = self.current.as_mut() {
                if let Some(it) = cur.next_item() {
                    return Some(it);
                }
                self.current = None;
            }
            let next = self.rest.next()?;
            match next.iter(&self.ctx) {
                Ok(s) => self.current = Some(s),
                Err(e) => {
                    self.rest = Default::default();
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Lazy step without positional predicates, or with a single positional
/// window that is applied by counting.
///
/// With a window the predicates are ignored: the window is the predicate.
pub(super) struct StepCursor<'a> {
    ctx: EvalContext<'a>,
    axis: AxisCursor<'a>,
    preds: &'a [Expr],
    range: Option<PosRange>,
    pos: i64,
    done: bool,
}

impl<'a> StepCursor<'a> {
    pub(super) fn new(ctx: EvalContext<'a>, axis: AxisCursor<'a>, preds: &'a [Expr], range: Option<PosRange>) -> Self {
        Self { ctx, axis, preds, range, pos: 0, done: false }
    }

    /// Runs all predicates against `node`; the score of the last test item
    /// that carries one is attached to the node.
    fn filter(&self, node: Node) -> Result<Option<Node>, Error> {
        let mut score = None;
        let pos = usize::try_from(self.pos).unwrap_or(usize::MAX);
        for pred in self.preds {
            let inner = self.ctx.with_focus(Item::Node(node.clone()), pos, None);
            let (keep, s) = ebv_scored(pred.iter(&inner)?)?;
            if !keep {
                return Ok(None);
            }
            score = s.or(score);
        }
        Ok(Some(if score.is_some() { node.with_score(score) } else { node }))
    }
}

impl SequenceCursor for StepCursor<'_> {
    fn next_item(&mut self) -> Option<ItemResult> {
        if self.done {
            return None;
        }
        loop {
            if self.range.is_some_and(|r| self.pos >= r.max) {
                self.done = true;
                return None;
            }
            let node = match self.axis.next() {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                Some(Ok(n)) => n,
            };
            self.pos += 1;
            if let Some(range) = self.range {
                if range.contains(self.pos) {
                    return Some(Ok(Item::Node(node)));
                }
                continue;
            }
            match self.filter(node) {
                Ok(Some(n)) => return Some(Ok(Item::Node(n))),
                Ok(None) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
