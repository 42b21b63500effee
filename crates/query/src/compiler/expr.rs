//! The expression algebra.
//!
//! An [`Expr`] exclusively owns its children. Compilation consumes a tree and
//! returns a rewritten one, so no node is ever shared between two parents.
use crate::compiler::functions::Function;
use crate::compiler::var::{Var, VarId};
use crate::engine::runtime::SourcePos;
use crate::index::{RangeAccess, TextAccess};
use crate::model::{ExpandedName, NodeKind};
use crate::path::{Axis, NodeTest};
use crate::xdm::{AtomicValue, Item, ItemType, Occurrence, SeqType, Value};
use std::sync::Arc;

/// Static information every expression carries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExprInfo {
    pub ty: SeqType,
    /// Statically known number of result items, `-1` if unknown.
    pub size: i64,
    pub pos: SourcePos,
}

impl ExprInfo {
    fn of(ty: SeqType) -> Self {
        Self { ty, size: ty.occ.static_size(), pos: SourcePos::default() }
    }
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub info: ExprInfo,
}

/// A location step: axis, node test and predicates.
#[derive(Debug, Clone)]
pub struct Step {
    pub axis: Axis,
    pub test: NodeTest,
    pub preds: Vec<Expr>,
    /// Set by the compiler when the summary proves every matching element
    /// has at most one text child and no element children.
    pub leaf: bool,
}

/// Inclusive 1-based position window of a positional step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PosRange {
    pub min: i64,
    pub max: i64,
}

impl PosRange {
    pub fn contains(&self, pos: i64) -> bool {
        pos >= self.min && pos <= self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompOp {
    pub fn symbol(self, general: bool) -> &'static str {
        match (self, general) {
            (CompOp::Eq, true) => "=",
            (CompOp::Ne, true) => "!=",
            (CompOp::Lt, true) => "<",
            (CompOp::Le, true) => "<=",
            (CompOp::Gt, true) => ">",
            (CompOp::Ge, true) => ">=",
            (CompOp::Eq, false) => "eq",
            (CompOp::Ne, false) => "ne",
            (CompOp::Lt, false) => "lt",
            (CompOp::Le, false) => "le",
            (CompOp::Gt, false) => "gt",
            (CompOp::Ge, false) => "ge",
        }
    }

    /// Operator with swapped operands: `a < b` iff `b > a`.
    pub fn swap(self) -> CompOp {
        match self {
            CompOp::Lt => CompOp::Gt,
            CompOp::Le => CompOp::Ge,
            CompOp::Gt => CompOp::Lt,
            CompOp::Ge => CompOp::Le,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicOp {
    And,
    Or,
}

#[derive(Debug, Clone)]
pub struct FuncCall {
    pub func: Function,
    pub args: Vec<Expr>,
}

/// A user-defined function. Its parameters are function-parameter variables
/// living in their own frame.
#[derive(Debug, Clone)]
pub struct UserFunc {
    pub name: ExpandedName,
    pub params: Vec<Var>,
    pub ret: Option<SeqType>,
    pub body: Expr,
    pub(crate) scope_size: usize,
    pub(crate) compiled: bool,
}

impl UserFunc {
    pub fn new(name: &str, params: Vec<Var>, ret: Option<SeqType>, body: Expr) -> Self {
        Self { name: ExpandedName::local(name), params, ret, body, scope_size: 0, compiled: false }
    }
}

#[derive(Debug, Clone)]
pub enum Construct {
    /// Element with the string value of `content` as its text. `namespaces`
    /// is set when the constructor declares namespace bindings.
    Element { name: ExpandedName, content: Box<Expr>, namespaces: bool },
    Text(Box<Expr>),
}

#[derive(Debug, Clone)]
pub enum Clause {
    For { var: Var, pos: Option<Var>, expr: Expr },
    Let { var: Var, expr: Expr },
    Where(Expr),
}

/// One grouping key: the variable bound to the key and the expression
/// producing it.
#[derive(Debug, Clone)]
pub struct GroupSpec {
    pub var: Var,
    pub expr: Expr,
    pub collation: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GroupBy {
    pub specs: Vec<GroupSpec>,
    /// Non-grouping variables: the pre-grouping binding and the copy that
    /// receives the accumulated sequence of each partition.
    pub non_group: Vec<(Var, Var)>,
}

#[derive(Debug, Clone)]
pub struct OrderKey {
    pub expr: Expr,
    pub descending: bool,
}

#[derive(Debug, Clone)]
pub struct OrderBy {
    pub keys: Vec<OrderKey>,
}

#[derive(Debug, Clone)]
pub struct Flwor {
    pub clauses: Vec<Clause>,
    pub group: Option<GroupBy>,
    pub order: Option<OrderBy>,
    pub ret: Expr,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Value),
    ContextItem,
    /// Document node of the context node.
    Root,
    VarRef(Var),
    /// Generic step: buffers candidates and evaluates predicates with full
    /// positional context.
    AxisStep(Step),
    /// Forward-only step whose predicates never look at positions.
    IterStep(Step),
    /// Step with a single positional predicate, evaluated without buffering.
    IterPosStep(Step, PosRange),
    Path { root: Option<Box<Expr>>, steps: Vec<Expr> },
    RangeAccess(RangeAccess),
    TextAccess(TextAccess),
    Compare { op: CompOp, general: bool, lhs: Box<Expr>, rhs: Box<Expr> },
    Logic { op: LogicOp, operands: Vec<Expr> },
    Call(FuncCall),
    UserCall { func: Arc<UserFunc>, args: Vec<Expr> },
    Construct(Construct),
    Flwor(Box<Flwor>),
    Seq(Vec<Expr>),
}

/// Dependency flags queried by the compiler before relocating, caching or
/// pre-evaluating an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Use {
    /// Reads the context position or size.
    Pos,
    /// Reads the context item.
    Ctx,
    /// Non-deterministic: may return different results per evaluation.
    Ndt,
    /// Constructs new nodes.
    Cns,
    /// Produces namespace declarations.
    Nsp,
    /// References a (non-constant) variable.
    Var,
}

impl Expr {
    pub fn new(kind: ExprKind, ty: SeqType) -> Self {
        Self { kind, info: ExprInfo::of(ty) }
    }

    /// Sets the source position.
    pub fn at(mut self, pos: SourcePos) -> Self {
        self.info.pos = pos;
        self
    }

    pub fn literal(value: Value) -> Self {
        let ty = value.seq_type();
        let size = value.len() as i64;
        Self { kind: ExprKind::Literal(value), info: ExprInfo { ty, size, pos: SourcePos::default() } }
    }

    pub fn empty() -> Self {
        Self::literal(Value::empty())
    }

    pub fn int(i: i64) -> Self {
        Self::literal(Value::single(AtomicValue::Integer(i)))
    }

    pub fn double(d: f64) -> Self {
        Self::literal(Value::single(AtomicValue::Double(d)))
    }

    pub fn string(s: &str) -> Self {
        Self::literal(Value::single(AtomicValue::string(s)))
    }

    pub fn boolean(b: bool) -> Self {
        Self::literal(Value::single(AtomicValue::Boolean(b)))
    }

    pub fn context() -> Self {
        Self::new(ExprKind::ContextItem, SeqType::ITEM_ONE)
    }

    pub fn root() -> Self {
        Self::new(ExprKind::Root, SeqType::node(NodeKind::Document, Occurrence::One))
    }

    pub fn var(var: &Var) -> Self {
        Self::new(ExprKind::VarRef(var.clone()), var.ty)
    }

    pub fn step(axis: Axis, test: NodeTest, preds: Vec<Expr>) -> Self {
        let ty = step_type(axis, &test);
        Self::new(ExprKind::AxisStep(Step { axis, test, preds, leaf: false }), ty)
    }

    pub fn path(root: Option<Expr>, steps: Vec<Expr>) -> Self {
        Self::new(ExprKind::Path { root: root.map(Box::new), steps }, SeqType::NODE_ZM)
    }

    pub fn compare(op: CompOp, general: bool, lhs: Expr, rhs: Expr) -> Self {
        let ty = if general { SeqType::BOOLEAN } else { SeqType::BOOLEAN.with_occ(Occurrence::ZeroOrOne) };
        Self::new(ExprKind::Compare { op, general, lhs: Box::new(lhs), rhs: Box::new(rhs) }, ty)
    }

    pub fn and(operands: Vec<Expr>) -> Self {
        Self::new(ExprKind::Logic { op: LogicOp::And, operands }, SeqType::BOOLEAN)
    }

    pub fn or(operands: Vec<Expr>) -> Self {
        Self::new(ExprKind::Logic { op: LogicOp::Or, operands }, SeqType::BOOLEAN)
    }

    pub fn call(func: Function, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::Call(FuncCall { func, args }), func.def().ret)
    }

    pub fn user_call(func: Arc<UserFunc>, args: Vec<Expr>) -> Self {
        let ty = func.ret.unwrap_or(SeqType::ITEM_ZM);
        Self::new(ExprKind::UserCall { func, args }, ty)
    }

    pub fn element(name: &str, content: Expr) -> Self {
        Self::new(
            ExprKind::Construct(Construct::Element {
                name: ExpandedName::local(name),
                content: Box::new(content),
                namespaces: false,
            }),
            SeqType::node(NodeKind::Element, Occurrence::One),
        )
    }

    /// Element constructor that declares namespace bindings.
    pub fn element_ns(name: ExpandedName, content: Expr) -> Self {
        Self::new(
            ExprKind::Construct(Construct::Element { name, content: Box::new(content), namespaces: true }),
            SeqType::node(NodeKind::Element, Occurrence::One),
        )
    }

    pub fn text_node(content: Expr) -> Self {
        Self::new(
            ExprKind::Construct(Construct::Text(Box::new(content))),
            SeqType::node(NodeKind::Text, Occurrence::ZeroOrOne),
        )
    }

    pub fn flwor(clauses: Vec<Clause>, group: Option<GroupBy>, order: Option<OrderBy>, ret: Expr) -> Self {
        Self::new(ExprKind::Flwor(Box::new(Flwor { clauses, group, order, ret })), SeqType::ITEM_ZM)
    }

    pub fn seq(items: Vec<Expr>) -> Self {
        Self::new(ExprKind::Seq(items), SeqType::ITEM_ZM)
    }

    pub fn ty(&self) -> SeqType {
        self.info.ty
    }

    pub fn size(&self) -> i64 {
        self.info.size
    }

    pub fn as_literal(&self) -> Option<&Value> {
        match &self.kind {
            ExprKind::Literal(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_empty_literal(&self) -> bool {
        self.as_literal().is_some_and(Value::is_empty)
    }

    /// The integer value of a single-integer literal.
    pub(crate) fn as_integer(&self) -> Option<i64> {
        match self.as_literal()?.items() {
            [Item::Atomic(AtomicValue::Integer(i))] => Some(*i),
            _ => None,
        }
    }

    pub(crate) fn as_string_literal(&self) -> Option<&str> {
        match self.as_literal()?.items() {
            [Item::Atomic(AtomicValue::String(s))] => Some(s.as_str()),
            _ => None,
        }
    }

    pub(crate) fn as_number_literal(&self) -> Option<f64> {
        match self.as_literal()?.items() {
            [Item::Atomic(a)] if a.is_numeric() => a.to_double(),
            _ => None,
        }
    }

    pub fn is_function(&self, f: Function) -> bool {
        matches!(&self.kind, ExprKind::Call(c) if c.func == f)
    }

    pub fn as_step(&self) -> Option<&Step> {
        match &self.kind {
            ExprKind::AxisStep(s) | ExprKind::IterStep(s) | ExprKind::IterPosStep(s, _) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn as_step_mut(&mut self) -> Option<&mut Step> {
        match &mut self.kind {
            ExprKind::AxisStep(s) | ExprKind::IterStep(s) | ExprKind::IterPosStep(s, _) => Some(s),
            _ => None,
        }
    }

    /// Direct child expressions, in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Literal(_)
            | ExprKind::ContextItem
            | ExprKind::Root
            | ExprKind::VarRef(_)
            | ExprKind::RangeAccess(_)
            | ExprKind::TextAccess(_) => Vec::new(),
            ExprKind::AxisStep(s) | ExprKind::IterStep(s) | ExprKind::IterPosStep(s, _) => s.preds.iter().collect(),
            ExprKind::Path { root, steps } => root.iter().map(|r| r.as_ref()).chain(steps.iter()).collect(),
            ExprKind::Compare { lhs, rhs, .. } => vec![lhs.as_ref(), rhs.as_ref()],
            ExprKind::Logic { operands, .. } | ExprKind::Seq(operands) => operands.iter().collect(),
            ExprKind::Call(c) => c.args.iter().collect(),
            ExprKind::UserCall { args, .. } => args.iter().collect(),
            ExprKind::Construct(Construct::Element { content, .. }) | ExprKind::Construct(Construct::Text(content)) => {
                vec![content.as_ref()]
            }
            ExprKind::Flwor(f) => {
                let mut out = Vec::new();
                for c in &f.clauses {
                    match c {
                        Clause::For { expr, .. } | Clause::Let { expr, .. } | Clause::Where(expr) => out.push(expr),
                    }
                }
                if let Some(g) = &f.group {
                    out.extend(g.specs.iter().map(|s| &s.expr));
                }
                if let Some(o) = &f.order {
                    out.extend(o.keys.iter().map(|k| &k.expr));
                }
                out.push(&f.ret);
                out
            }
        }
    }

    /// Dependency analysis.
    pub fn uses(&self, u: Use) -> bool {
        match &self.kind {
            ExprKind::Literal(_) => false,
            // index probes read the database bound to the dynamic context
            ExprKind::ContextItem | ExprKind::Root | ExprKind::RangeAccess(_) | ExprKind::TextAccess(_) => u == Use::Ctx,
            ExprKind::VarRef(_) => u == Use::Var,
            ExprKind::AxisStep(s) | ExprKind::IterStep(s) | ExprKind::IterPosStep(s, _) => match u {
                // predicates are evaluated against the step's own focus
                Use::Ctx => true,
                Use::Pos => false,
                _ => s.preds.iter().any(|p| p.uses(u)),
            },
            ExprKind::Path { root, steps } => match u {
                Use::Ctx | Use::Pos => match root {
                    Some(r) => r.uses(u),
                    None => u == Use::Ctx,
                },
                _ => root.as_ref().is_some_and(|r| r.uses(u)) || steps.iter().any(|s| s.uses(u)),
            },
            ExprKind::Call(c) => c.func.uses(u, c.args.len()) || c.args.iter().any(|a| a.uses(u)),
            ExprKind::UserCall { func, args } => {
                args.iter().any(|a| a.uses(u)) || (matches!(u, Use::Ndt | Use::Cns | Use::Nsp) && func.body.uses(u))
            }
            ExprKind::Construct(c) => {
                let own = match c {
                    Construct::Element { namespaces, .. } => u == Use::Cns || (u == Use::Nsp && *namespaces),
                    Construct::Text(_) => u == Use::Cns,
                };
                own || self.children().iter().any(|e| e.uses(u))
            }
            _ => self.children().iter().any(|e| e.uses(u)),
        }
    }

    /// Whether `var` is referenced anywhere below this expression.
    pub fn references(&self, var: VarId) -> bool {
        match &self.kind {
            ExprKind::VarRef(v) => v.id == var,
            ExprKind::Flwor(f) => {
                f.group.as_ref().is_some_and(|g| g.non_group.iter().any(|(orig, _)| orig.id == var))
                    || self.children().iter().any(|e| e.references(var))
            }
            _ => self.children().iter().any(|e| e.references(var)),
        }
    }

    /// Structural equality: `true` only if both expressions are guaranteed to
    /// yield identical results for identical bindings.
    pub fn same_as(&self, other: &Expr) -> bool {
        fn all_same(a: &[Expr], b: &[Expr]) -> bool {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_as(y))
        }
        fn step_same(a: &Step, b: &Step) -> bool {
            a.axis == b.axis && a.test == b.test && all_same(&a.preds, &b.preds)
        }
        match (&self.kind, &other.kind) {
            (ExprKind::Literal(a), ExprKind::Literal(b)) => a == b,
            (ExprKind::ContextItem, ExprKind::ContextItem) | (ExprKind::Root, ExprKind::Root) => true,
            (ExprKind::VarRef(a), ExprKind::VarRef(b)) => a.id == b.id,
            (ExprKind::AxisStep(a), ExprKind::AxisStep(b)) | (ExprKind::IterStep(a), ExprKind::IterStep(b)) => {
                step_same(a, b)
            }
            (ExprKind::IterPosStep(a, ra), ExprKind::IterPosStep(b, rb)) => ra == rb && step_same(a, b),
            (ExprKind::Path { root: ra, steps: sa }, ExprKind::Path { root: rb, steps: sb }) => {
                let roots = match (ra, rb) {
                    (None, None) => true,
                    (Some(a), Some(b)) => a.same_as(b),
                    _ => false,
                };
                roots && all_same(sa, sb)
            }
            (ExprKind::RangeAccess(a), ExprKind::RangeAccess(b)) => a == b,
            (ExprKind::TextAccess(a), ExprKind::TextAccess(b)) => a == b,
            (
                ExprKind::Compare { op: oa, general: ga, lhs: la, rhs: ra },
                ExprKind::Compare { op: ob, general: gb, lhs: lb, rhs: rb },
            ) => oa == ob && ga == gb && la.same_as(lb) && ra.same_as(rb),
            (ExprKind::Logic { op: oa, operands: a }, ExprKind::Logic { op: ob, operands: b }) => {
                oa == ob && all_same(a, b)
            }
            (ExprKind::Call(a), ExprKind::Call(b)) => a.func == b.func && !a.func.is_ndt() && all_same(&a.args, &b.args),
            (ExprKind::Seq(a), ExprKind::Seq(b)) => all_same(a, b),
            // constructors yield fresh identities; FLWORs and user calls are not compared
            _ => false,
        }
    }
}

/// Static type of a step before predicates are considered.
pub(crate) fn step_type(axis: Axis, test: &NodeTest) -> SeqType {
    let item = ItemType::Node(test.kind(axis));
    let occ = match axis {
        Axis::SelfAxis | Axis::Parent => Occurrence::ZeroOrOne,
        _ => Occurrence::ZeroOrMore,
    };
    SeqType::new(item, occ)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separately_built_constructors_differ() {
        let a = Expr::element("e", Expr::string("x"));
        let b = a.clone();
        assert!(!a.same_as(&b));
        assert!(a.uses(Use::Cns));
        assert!(!a.uses(Use::Nsp));
    }

    #[test]
    fn step_predicates_bind_position() {
        let s = Expr::step(Axis::Child, NodeTest::name("a"), vec![Expr::call(Function::Position, vec![])]);
        assert!(!s.uses(Use::Pos));
        assert!(s.uses(Use::Ctx));
    }

    #[test]
    fn random_calls_are_never_the_same() {
        let a = Expr::call(Function::RandomNumber, vec![]);
        assert!(!a.same_as(&a.clone()));
        let b = Expr::call(Function::True, vec![]);
        assert!(b.same_as(&b.clone()));
    }
}
