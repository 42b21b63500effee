//! Index access expressions and the compiler rule that introduces them.
//!
//! The rule recognises a root-anchored element step with a single value
//! predicate and replaces it by a lookup in the text or attribute value
//! index followed by a walk back to the element:
//!
//! ```text
//! /descendant::E[text() = 'v']       =>  TEXT-ACCESS('v')/parent::E
//! /descendant::E[@a = 'v']           =>  ATTR-ACCESS('v')/self::attribute(a)/parent::E
//! /descendant::E[@a >= 1 and @a <= 5] => ATTR-RANGE(1, 5)/self::attribute(a)/parent::E
//! ```
//!
//! The rule only fires when the store is up to date, declares no namespaces
//! and indexes the required value kind.
use crate::compiler::compile::CompileContext;
use crate::compiler::expr::{CompOp, Expr, ExprKind, LogicOp, Step};
use crate::compiler::functions::Function;
use crate::consts::{CODEPOINT_URI, COMPILE_TARGET, EVAL_TARGET};
use crate::engine::runtime::{DynamicContext, Error, ErrorCode};
use crate::model::{ExpandedName, IndexKind, NodeId, NodeKind, ValueIndex};
use crate::path::{Axis, KindTest, NameTest, NodeTest};
use crate::xdm::{Occurrence, SeqType};
use compact_str::CompactString;
use tracing::{debug, trace};

/// Numeric range probe: nodes whose value lies in `[min, max]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeAccess {
    pub kind: IndexKind,
    pub min: f64,
    pub max: f64,
}

/// Token probe: nodes whose value equals (or starts with) `token`.
#[derive(Debug, Clone, PartialEq)]
pub struct TextAccess {
    pub kind: IndexKind,
    pub token: CompactString,
    pub prefix: bool,
}

fn index_of<'a>(dyn_ctx: &'a DynamicContext, kind: IndexKind) -> Result<&'a dyn ValueIndex, Error> {
    let index = dyn_ctx
        .data()?
        .index
        .as_deref()
        .filter(|ix| ix.has_index(kind))
        .ok_or_else(|| Error::from_code(ErrorCode::IndexUnavailable, format!("no {kind} index available")))?;
    Ok(index)
}

impl RangeAccess {
    pub(crate) fn scan<'a>(&self, dyn_ctx: &'a DynamicContext) -> Result<Box<dyn Iterator<Item = NodeId> + 'a>, Error> {
        let index = index_of(dyn_ctx, self.kind)?;
        trace!(target: EVAL_TARGET, kind = %self.kind, min = self.min, max = self.max, "range index scan");
        Ok(index.range_scan(self.kind, self.min, self.max))
    }
}

impl TextAccess {
    pub(crate) fn scan<'a>(&self, dyn_ctx: &'a DynamicContext) -> Result<Box<dyn Iterator<Item = NodeId> + 'a>, Error> {
        let index = index_of(dyn_ctx, self.kind)?;
        trace!(target: EVAL_TARGET, kind = %self.kind, token = %self.token, prefix = self.prefix, "text index scan");
        Ok(index.text_scan(self.kind, &self.token, self.prefix))
    }
}

/// What a predicate operand reads from the element it filters.
#[derive(Debug, Clone, PartialEq)]
enum Target {
    /// `text()`
    Text,
    /// `@name`
    Attr(ExpandedName),
    /// `.`
    Context,
}

impl Target {
    fn of(e: &Expr) -> Option<Target> {
        if matches!(e.kind, ExprKind::ContextItem) {
            return Some(Target::Context);
        }
        let step = e.as_step()?;
        if !step.preds.is_empty() {
            return None;
        }
        match (step.axis, &step.test) {
            (Axis::Child, NodeTest::Kind(KindTest::Text)) => Some(Target::Text),
            (Axis::Attribute, NodeTest::Name(NameTest::Name(n)))
            | (Axis::Attribute, NodeTest::Kind(KindTest::Attribute(Some(NameTest::Name(n))))) => {
                Some(Target::Attr(n.clone()))
            }
            _ => None,
        }
    }

    fn index_kind(&self) -> IndexKind {
        match self {
            Target::Attr(_) => IndexKind::Attribute,
            Target::Text | Target::Context => IndexKind::Text,
        }
    }

    /// Text and context targets see several values per element unless the
    /// element is a leaf; combined probes then need the leaf guarantee.
    fn single_valued(&self, leaf: bool) -> bool {
        matches!(self, Target::Attr(_)) || leaf
    }
}

#[derive(Debug)]
enum Probe {
    Text { target: Target, token: CompactString, prefix: bool },
    Range { target: Target, min: f64, max: f64 },
}

impl Probe {
    fn target(&self) -> &Target {
        match self {
            Probe::Text { target, .. } | Probe::Range { target, .. } => target,
        }
    }

    fn into_expr(self) -> Expr {
        let kind = self.target().index_kind();
        let ty = SeqType::node(kind.node_kind(), Occurrence::ZeroOrMore);
        let ek = match self {
            Probe::Text { token, prefix, .. } => ExprKind::TextAccess(TextAccess { kind, token, prefix }),
            Probe::Range { min, max, .. } => ExprKind::RangeAccess(RangeAccess { kind, min, max }),
        };
        Expr::new(ek, ty)
    }
}

fn compare_probe(pred: &Expr, leaf: bool, codepoint: bool) -> Option<Probe> {
    let ExprKind::Compare { op, general: true, lhs, rhs } = &pred.kind else { return None };
    let (op, operand, lit) = if lhs.as_literal().is_some() && rhs.as_literal().is_none() {
        (op.swap(), rhs.as_ref(), lhs.as_ref())
    } else {
        (*op, lhs.as_ref(), rhs.as_ref())
    };
    let target = Target::of(operand)?;
    if matches!(target, Target::Context) && !leaf {
        return None;
    }
    if let Some(s) = lit.as_string_literal() {
        if op != CompOp::Eq || !codepoint || (matches!(target, Target::Context) && s.is_empty()) {
            return None;
        }
        return Some(Probe::Text { target, token: CompactString::from(s), prefix: false });
    }
    let n = lit.as_number_literal()?;
    let (min, max) = match op {
        CompOp::Eq => (n, n),
        CompOp::Ge => (n, f64::INFINITY),
        CompOp::Le => (f64::NEG_INFINITY, n),
        _ => return None,
    };
    Some(Probe::Range { target, min, max })
}

fn probe_for(pred: &Expr, leaf: bool, codepoint: bool) -> Option<Probe> {
    match &pred.kind {
        ExprKind::Compare { .. } => compare_probe(pred, leaf, codepoint),
        ExprKind::Logic { op: LogicOp::And, operands } if operands.len() == 2 => {
            let a = compare_probe(&operands[0], leaf, codepoint)?;
            let b = compare_probe(&operands[1], leaf, codepoint)?;
            match (a, b) {
                (Probe::Range { target: ta, min: mina, max: maxa }, Probe::Range { target: tb, min: minb, max: maxb })
                    if ta == tb && ta.single_valued(leaf) =>
                {
                    Some(Probe::Range { target: ta, min: mina.max(minb), max: maxa.min(maxb) })
                }
                _ => None,
            }
        }
        ExprKind::Call(c) if c.func == Function::StartsWith && c.args.len() == 2 => {
            let token = c.args[1].as_string_literal()?;
            if !leaf || !codepoint || token.is_empty() || Target::of(&c.args[0])? != Target::Text {
                return None;
            }
            Some(Probe::Text { target: Target::Text, token: CompactString::from(token), prefix: true })
        }
        _ => None,
    }
}

pub(crate) fn is_desc_or_self_node(e: &Expr) -> bool {
    e.as_step()
        .is_some_and(|s| s.axis == Axis::DescendantOrSelf && s.test == NodeTest::AnyKind && s.preds.is_empty())
}

/// Position of the element step an index probe could replace.
fn element_step(steps: &[Expr]) -> Option<(usize, &Step)> {
    let idx = match steps {
        [first, second, ..] if is_desc_or_self_node(first) && second.as_step().is_some_and(|s| s.axis == Axis::Child) => 1,
        [first, ..] if first.as_step().is_some_and(|s| s.axis == Axis::Descendant) => 0,
        _ => return None,
    };
    let step = steps[idx].as_step()?;
    (step.test.kind(step.axis) == Some(NodeKind::Element) && step.preds.len() == 1).then_some((idx, step))
}

/// Tries to replace a root-anchored path by an index probe. Returns `None`
/// whenever equivalence cannot be proven.
pub(crate) fn rewrite_path(cc: &CompileContext<'_>, root: Option<&Expr>, steps: &[Expr]) -> Option<Expr> {
    if !cc.static_ctx.index_rewrites || !matches!(root.map(|r| &r.kind), Some(ExprKind::Root)) {
        return None;
    }
    let data = cc.data?;
    if !data.tree.is_up_to_date() || data.tree.namespace_count() != 0 {
        return None;
    }
    let index = data.index.as_deref()?;
    let (idx, step) = element_step(steps)?;
    let codepoint = cc.static_ctx.default_collation == CODEPOINT_URI;
    let probe = probe_for(&step.preds[0], step.leaf, codepoint)?;
    let kind = probe.target().index_kind();
    if !index.has_index(kind) {
        return None;
    }
    let mut new_steps = Vec::with_capacity(steps.len() - idx + 1);
    if let Target::Attr(name) = probe.target() {
        let test = NodeTest::Kind(KindTest::Attribute(Some(NameTest::Name(name.clone()))));
        new_steps.push(Expr::step(Axis::SelfAxis, test, Vec::new()));
    }
    new_steps.push(Expr::step(Axis::Parent, step.test.clone(), Vec::new()));
    new_steps.extend(steps[idx + 1..].iter().cloned());
    debug!(target: COMPILE_TARGET, probe = ?probe, "applying {kind} index");
    Some(Expr::path(Some(probe.into_expr()), new_steps))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_step() -> Expr {
        Expr::step(Axis::Child, NodeTest::Kind(KindTest::Text), vec![])
    }

    #[test]
    fn literal_on_the_left_is_swapped() {
        let pred = Expr::compare(CompOp::Le, true, Expr::int(3), text_step());
        match probe_for(&pred, false, true) {
            Some(Probe::Range { min, max, .. }) => {
                assert_eq!(min, 3.0);
                assert_eq!(max, f64::INFINITY);
            }
            other => panic!("unexpected probe {other:?}"),
        }
    }

    #[test]
    fn combined_text_ranges_need_leaf() {
        let pred = Expr::and(vec![
            Expr::compare(CompOp::Ge, true, text_step(), Expr::int(1)),
            Expr::compare(CompOp::Le, true, text_step(), Expr::int(5)),
        ]);
        assert!(probe_for(&pred, false, true).is_none());
        assert!(matches!(probe_for(&pred, true, true), Some(Probe::Range { min, max, .. }) if min == 1.0 && max == 5.0));
    }

    #[test]
    fn string_equality_needs_codepoint() {
        let pred = Expr::compare(CompOp::Eq, true, text_step(), Expr::string("x"));
        assert!(probe_for(&pred, false, false).is_none());
        assert!(probe_for(&pred, false, true).is_some());
    }

    #[test]
    fn strict_bounds_are_not_probes() {
        let pred = Expr::compare(CompOp::Gt, true, text_step(), Expr::int(1));
        assert!(probe_for(&pred, true, true).is_none());
    }
}
