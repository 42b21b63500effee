//! The compile pass.
//!
//! Compilation consumes an expression tree and returns a rewritten one. It
//! infers types, resolves variables to frame slots, propagates constants,
//! folds literal-only subexpressions and picks specialised step variants.
//! Every rewrite is optional: when a rewrite cannot be proven safe the
//! original expression is kept, never an error raised.
use crate::compiler::expr::{
    Clause, CompOp, Construct, Expr, ExprInfo, ExprKind, Flwor, FuncCall, GroupBy, GroupSpec, LogicOp, OrderBy,
    OrderKey, PosRange, Step, Use, UserFunc, step_type,
};
use crate::compiler::functions::{Function, FunctionTable, function_table};
use crate::compiler::plan::PlanNode;
use crate::compiler::var::{Var, VarId, VarKind, VarScope, unbound};
use crate::consts::COMPILE_TARGET;
use crate::engine::evaluator::functions::effective_boolean;
use crate::engine::evaluator::pre_evaluate;
use crate::engine::runtime::{Error, ErrorCode, SourcePos, StaticContext};
use crate::index::{self, is_desc_or_self_node};
use crate::model::{Data, NodeKind};
use crate::path::{Axis, structural_nodes};
use crate::xdm::{AtomicType, Item, ItemType, Occurrence, SeqType, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

type CResult<T> = Result<T, Error>;

/// A compiled expression tree together with the frame size its evaluation
/// needs and the static context it was compiled under.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub root: Expr,
    pub(crate) scope_size: usize,
    pub static_ctx: Arc<StaticContext>,
}

impl CompiledQuery {
    pub fn plan(&self) -> PlanNode {
        self.root.plan()
    }

    /// Number of variable slots in the top-level frame.
    pub fn scope_size(&self) -> usize {
        self.scope_size
    }
}

/// Compile without a database: no summary pruning, no index rewrites.
pub fn compile(expr: Expr, static_ctx: &StaticContext) -> Result<CompiledQuery, Error> {
    compile_inner(expr, static_ctx, None)
}

/// Compile against the database the query will run on, enabling summary
/// based pruning and index access rewrites.
pub fn compile_with_data(expr: Expr, static_ctx: &StaticContext, data: &Data) -> Result<CompiledQuery, Error> {
    compile_inner(expr, static_ctx, Some(data))
}

fn compile_inner(expr: Expr, static_ctx: &StaticContext, data: Option<&Data>) -> Result<CompiledQuery, Error> {
    let mut cc = CompileContext::new(static_ctx, data);
    let root = cc.compile(expr)?;
    debug!(target: COMPILE_TARGET, slots = cc.scope.len(), "compiled query");
    Ok(CompiledQuery { root, scope_size: cc.scope.len(), static_ctx: Arc::new(static_ctx.clone()) })
}

/// State threaded through one compilation.
pub struct CompileContext<'c> {
    pub(crate) static_ctx: &'c StaticContext,
    pub(crate) functions: &'static FunctionTable,
    pub(crate) data: Option<&'c Data>,
    scope: VarScope,
    /// Bindings in scope at the current point, innermost last.
    visible: Vec<Var>,
    constants: HashMap<VarId, Value>,
    /// Static type of the context item, `None` at the top level.
    focus: Option<SeqType>,
}

impl<'c> CompileContext<'c> {
    pub fn new(static_ctx: &'c StaticContext, data: Option<&'c Data>) -> Self {
        Self {
            static_ctx,
            functions: function_table(),
            data,
            scope: VarScope::new(),
            visible: Vec::new(),
            constants: HashMap::new(),
            focus: None,
        }
    }

    /// Compiles `e` and returns its replacement. Errors carry the position
    /// of the innermost offending expression.
    pub fn compile(&mut self, e: Expr) -> CResult<Expr> {
        let pos = e.info.pos;
        let out = self.compile_kind(e).map_err(|err| err.at(pos))?;
        Ok(if out.info.pos == SourcePos::default() { out.at(pos) } else { out })
    }

    fn compile_kind(&mut self, e: Expr) -> CResult<Expr> {
        let Expr { kind, info } = e;
        match kind {
            ExprKind::Literal(_) | ExprKind::Root | ExprKind::RangeAccess(_) | ExprKind::TextAccess(_) => {
                Ok(Expr { kind, info })
            }
            ExprKind::ContextItem => Ok(Expr::new(ExprKind::ContextItem, self.focus.unwrap_or(SeqType::ITEM_ONE))),
            ExprKind::VarRef(v) => self.compile_var_ref(v),
            ExprKind::AxisStep(s) | ExprKind::IterStep(s) | ExprKind::IterPosStep(s, _) => self.compile_step(s),
            ExprKind::Path { root, steps } => self.compile_path(root.map(|r| *r), steps),
            ExprKind::Compare { op, general, lhs, rhs } => self.compile_compare(op, general, *lhs, *rhs),
            ExprKind::Logic { op, operands } => self.compile_logic(op, operands),
            ExprKind::Call(FuncCall { func, args }) => self.compile_call(func, args),
            ExprKind::UserCall { func, args } => self.compile_user_call(func, args),
            ExprKind::Construct(c) => self.compile_construct(c, info),
            ExprKind::Flwor(f) => {
                let mark = self.visible.len();
                let out = self.compile_flwor(*f, mark);
                self.visible.truncate(mark);
                out
            }
            ExprKind::Seq(items) => self.compile_seq(items),
        }
    }

    fn with_focus<T>(&mut self, focus: Option<SeqType>, f: impl FnOnce(&mut Self) -> CResult<T>) -> CResult<T> {
        let saved = core::mem::replace(&mut self.focus, focus);
        let out = f(self);
        self.focus = saved;
        out
    }

    fn declare(&mut self, var: &mut Var) {
        self.scope.add(var);
        self.scope.update(var);
        self.visible.push(var.clone());
    }

    fn compile_var_ref(&mut self, var: Var) -> CResult<Expr> {
        if let Some(value) = self.constants.get(&var.id) {
            debug!(target: COMPILE_TARGET, var = %var, "inlining variable");
            return Ok(Expr::literal(value.clone()));
        }
        if let Some(bound) = self.visible.iter().rev().find(|v| v.id == var.id) {
            return Ok(Expr::var(bound));
        }
        if var.kind == VarKind::Global {
            return Ok(Expr::var(&var));
        }
        Err(unbound(&var))
    }

    /// Value of a `let` initializer that can replace every reference to
    /// the variable, if any.
    fn constant_value(&self, var: &Var, init: &Expr) -> Option<Value> {
        if !self.static_ctx.constant_propagation
            || var.checks_type()
            || init.uses(Use::Nsp)
            || init.uses(Use::Cns)
            || init.uses(Use::Ndt)
            || matches!(init.kind, ExprKind::UserCall { .. })
        {
            return None;
        }
        if let Some(v) = init.as_literal() {
            return Some(v.clone());
        }
        if init.uses(Use::Ctx) || init.uses(Use::Pos) || init.uses(Use::Var) {
            return None;
        }
        pre_evaluate(init, self.static_ctx).ok()
    }

    /// Replaces a literal-only expression by its value. Evaluation errors
    /// leave the expression in place so they surface at run time.
    fn fold(&self, e: Expr) -> Expr {
        if e.children().iter().any(|c| c.as_literal().is_none())
            || [Use::Ndt, Use::Ctx, Use::Pos, Use::Cns].into_iter().any(|u| e.uses(u))
        {
            return e;
        }
        match pre_evaluate(&e, self.static_ctx) {
            Ok(v) => {
                debug!(target: COMPILE_TARGET, expr = e.name(), "pre-evaluating expression");
                Expr::literal(v).at(e.info.pos)
            }
            Err(_) => e,
        }
    }

    // ---- steps and paths ----

    fn compile_step(&mut self, mut step: Step) -> CResult<Expr> {
        let base = step_type(step.axis, &step.test);
        if let Some(kind) = step.test.kind(step.axis)
            && !step.axis.can_yield(kind)
        {
            debug!(target: COMPILE_TARGET, axis = %step.axis, test = %step.test, "removing step that cannot match");
            return Ok(Expr::empty());
        }
        let focus = Some(base.with_occ(Occurrence::One));
        let preds = core::mem::take(&mut step.preds);
        let mut kept = Vec::with_capacity(preds.len());
        for p in preds {
            let p = self.with_focus(focus, |cc| cc.compile_ebv(p, true))?;
            match literal_predicate(&p) {
                PredShape::Keep => kept.push(p),
                PredShape::Always => debug!(target: COMPILE_TARGET, "removing always-true predicate"),
                PredShape::Never => {
                    debug!(target: COMPILE_TARGET, "predicate never matches, step is empty");
                    return Ok(Expr::empty());
                }
            }
        }
        step.preds = kept;
        Ok(specialize(step, base))
    }

    fn compile_path(&mut self, root: Option<Expr>, steps: Vec<Expr>) -> CResult<Expr> {
        let root = match root {
            Some(r) => Some(self.compile(r)?),
            None => None,
        };
        if root.as_ref().is_some_and(Expr::is_empty_literal) {
            return Ok(Expr::empty());
        }
        let mut prev = root.as_ref().map(Expr::ty).or(self.focus);
        let mut compiled = Vec::with_capacity(steps.len());
        for s in steps {
            let focus = prev.map(|t| t.with_occ(Occurrence::One));
            let s = self.with_focus(focus, |cc| cc.compile(s))?;
            if s.is_empty_literal() {
                debug!(target: COMPILE_TARGET, "path step selects nothing");
                return Ok(Expr::empty());
            }
            prev = Some(s.ty());
            compiled.push(s);
        }

        let rooted = matches!(root.as_ref().map(|r| &r.kind), Some(ExprKind::Root));
        if rooted
            && self.static_ctx.path_pruning
            && let Some(data) = self.data
            && prune(data, &mut compiled)
        {
            debug!(target: COMPILE_TARGET, "path summary proves the path empty");
            return Ok(Expr::empty());
        }
        if let Some(rewritten) = index::rewrite_path(self, root.as_ref(), &compiled) {
            return self.compile(rewritten);
        }

        match (root, compiled.len()) {
            (Some(r), 0) => Ok(r),
            (None, 1) if compiled[0].as_step().is_some_and(|s| !s.axis.is_reverse()) => Ok(compiled.swap_remove(0)),
            (None, 0) => Ok(Expr::new(ExprKind::ContextItem, self.focus.unwrap_or(SeqType::ITEM_ONE))),
            (root, _) => {
                let last = compiled.last().map(Expr::ty).unwrap_or(SeqType::NODE_ZM);
                let ty = SeqType::new(last.item, Occurrence::ZeroOrMore);
                Ok(Expr::new(ExprKind::Path { root: root.map(Box::new), steps: compiled }, ty))
            }
        }
    }

    // ---- comparisons, logic and functions ----

    fn compile_compare(&mut self, op: CompOp, general: bool, lhs: Expr, rhs: Expr) -> CResult<Expr> {
        let lhs = self.compile(lhs)?;
        let rhs = self.compile(rhs)?;
        if lhs.is_empty_literal() || rhs.is_empty_literal() {
            debug!(target: COMPILE_TARGET, "comparison with empty sequence");
            return Ok(if general { Expr::boolean(false) } else { Expr::empty() });
        }
        let ty = if general || (lhs.ty().one() && rhs.ty().one()) {
            SeqType::BOOLEAN
        } else {
            SeqType::BOOLEAN.with_occ(Occurrence::ZeroOrOne)
        };
        let e = Expr::new(ExprKind::Compare { op, general, lhs: Box::new(lhs), rhs: Box::new(rhs) }, ty);
        Ok(self.fold(e))
    }

    fn compile_logic(&mut self, op: LogicOp, operands: Vec<Expr>) -> CResult<Expr> {
        let absorbing = op == LogicOp::Or;
        let mut out: Vec<Expr> = Vec::with_capacity(operands.len());
        for operand in operands {
            let Expr { kind, info } = self.compile_ebv(operand, false)?;
            let parts = match kind {
                ExprKind::Logic { op: inner, operands } if inner == op => operands,
                kind => vec![Expr { kind, info }],
            };
            for p in parts {
                if let Some(v) = p.as_literal()
                    && let Ok(b) = effective_boolean(v.items())
                {
                    if b == absorbing {
                        debug!(target: COMPILE_TARGET, op = ?op, "operand decides the result");
                        return Ok(Expr::boolean(absorbing));
                    }
                    continue;
                }
                if out.iter().any(|q| q.same_as(&p)) {
                    debug!(target: COMPILE_TARGET, op = ?op, "removing duplicate operand");
                    continue;
                }
                out.push(p);
            }
        }
        Ok(match out.len() {
            0 => Expr::boolean(!absorbing),
            1 => to_boolean(out.swap_remove(0)),
            _ => Expr::new(ExprKind::Logic { op, operands: out }, SeqType::BOOLEAN),
        })
    }

    /// Compiles an expression whose effective boolean value is all that is
    /// consumed. Inside predicates a numeric value selects a position, so
    /// `boolean()` is only dropped when the operand cannot be a number.
    fn compile_ebv(&mut self, e: Expr, predicate: bool) -> CResult<Expr> {
        let e = self.compile(e)?;
        let info = e.info;
        Ok(match e.kind {
            ExprKind::Call(FuncCall { func: Function::Boolean, mut args })
                if args.len() == 1 && (!predicate || !args[0].ty().may_be_number()) =>
            {
                debug!(target: COMPILE_TARGET, "removing redundant boolean()");
                args.swap_remove(0)
            }
            ExprKind::Call(FuncCall { func: Function::Exists, mut args })
                if args.len() == 1 && args[0].ty().item.is_node() =>
            {
                debug!(target: COMPILE_TARGET, "removing redundant exists()");
                args.swap_remove(0)
            }
            kind => Expr { kind, info },
        })
    }

    fn compile_call(&mut self, func: Function, args: Vec<Expr>) -> CResult<Expr> {
        self.functions.resolve(&func.def().name(), args.len())?;
        let mut args = args.into_iter().map(|a| self.compile(a)).collect::<CResult<Vec<_>>>()?;
        let simple = |a: &Expr| a.size() >= 0 && !a.uses(Use::Ndt) && !a.uses(Use::Cns);
        match func {
            Function::Empty | Function::Exists if simple(&args[0]) => {
                debug!(target: COMPILE_TARGET, func = func.def().local, "folding on static size");
                let present = args[0].size() > 0;
                return Ok(Expr::boolean(if func == Function::Exists { present } else { !present }));
            }
            Function::Count if simple(&args[0]) => {
                debug!(target: COMPILE_TARGET, "folding count() on static size");
                return Ok(Expr::int(args[0].size()));
            }
            Function::Boolean if is_single_boolean(&args[0]) => {
                debug!(target: COMPILE_TARGET, "removing redundant boolean()");
                return Ok(args.swap_remove(0));
            }
            Function::Not => return Ok(self.compile_not(args.swap_remove(0))),
            Function::ZeroOrOne | Function::ExactlyOne | Function::OneOrMore | Function::Unordered => {
                let t = args[0].ty();
                let satisfied = match func {
                    Function::ZeroOrOne => t.zero_or_one(),
                    Function::ExactlyOne => t.one(),
                    Function::OneOrMore => t.occ.min() >= 1,
                    _ => true,
                };
                if satisfied {
                    debug!(target: COMPILE_TARGET, func = func.def().local, "removing cardinality check");
                    return Ok(args.swap_remove(0));
                }
                let ty = SeqType::new(t.item, func.def().ret.occ);
                return Ok(Expr::new(ExprKind::Call(FuncCall { func, args }), ty));
            }
            _ => {}
        }
        Ok(self.fold(Expr::call(func, args)))
    }

    fn compile_not(&self, arg: Expr) -> Expr {
        let info = arg.info;
        match arg.kind {
            ExprKind::Call(FuncCall { func: Function::Empty, args }) => {
                debug!(target: COMPILE_TARGET, "rewriting not(empty()) to exists()");
                Expr::call(Function::Exists, args)
            }
            ExprKind::Call(FuncCall { func: Function::Exists, args }) => {
                debug!(target: COMPILE_TARGET, "rewriting not(exists()) to empty()");
                Expr::call(Function::Empty, args)
            }
            ExprKind::Call(FuncCall { func: Function::Not, mut args }) if args.len() == 1 => {
                debug!(target: COMPILE_TARGET, "rewriting not(not()) to boolean()");
                to_boolean(args.swap_remove(0))
            }
            ExprKind::Compare { op: op @ (CompOp::Eq | CompOp::Ne), general, lhs, rhs }
                if lhs.size() == 1 && rhs.size() == 1 =>
            {
                debug!(target: COMPILE_TARGET, "inverting comparison");
                let op = if op == CompOp::Eq { CompOp::Ne } else { CompOp::Eq };
                Expr::new(ExprKind::Compare { op, general, lhs, rhs }, info.ty)
            }
            kind => self.fold(Expr::call(Function::Not, vec![Expr { kind, info }])),
        }
    }

    fn compile_user_call(&mut self, mut func: Arc<UserFunc>, args: Vec<Expr>) -> CResult<Expr> {
        if args.len() != func.params.len() {
            return Err(Error::from_code(
                ErrorCode::InvalidArgument,
                format!("function {} expects {} arguments, got {}", func.name, func.params.len(), args.len()),
            ));
        }
        let args = args.into_iter().map(|a| self.compile(a)).collect::<CResult<Vec<_>>>()?;
        if !func.compiled {
            let f = Arc::make_mut(&mut func);
            let mut inner = CompileContext::new(self.static_ctx, self.data);
            for p in &mut f.params {
                inner.declare(p);
            }
            let body = core::mem::replace(&mut f.body, Expr::empty());
            f.body = inner.compile(body)?;
            f.scope_size = inner.scope.len();
            f.compiled = true;
            debug!(target: COMPILE_TARGET, name = %f.name, slots = f.scope_size, "compiled function body");
        }
        let ty = func.ret.unwrap_or(func.body.ty());
        Ok(Expr::new(ExprKind::UserCall { func, args }, ty))
    }

    fn compile_construct(&mut self, c: Construct, info: ExprInfo) -> CResult<Expr> {
        let c = match c {
            Construct::Element { name, content, namespaces } => {
                Construct::Element { name, content: Box::new(self.compile(*content)?), namespaces }
            }
            Construct::Text(content) => Construct::Text(Box::new(self.compile(*content)?)),
        };
        Ok(Expr::new(ExprKind::Construct(c), info.ty))
    }

    fn compile_seq(&mut self, items: Vec<Expr>) -> CResult<Expr> {
        let mut out = Vec::with_capacity(items.len());
        for it in items {
            let Expr { kind, info } = self.compile(it)?;
            match kind {
                ExprKind::Seq(inner) => out.extend(inner),
                ExprKind::Literal(v) if v.is_empty() => {}
                kind => out.push(Expr { kind, info }),
            }
        }
        if out.len() < 2 {
            return Ok(out.pop().unwrap_or_else(Expr::empty));
        }
        if out.iter().all(|e| e.as_literal().is_some()) {
            debug!(target: COMPILE_TARGET, items = out.len(), "merging literal sequence");
            let items: Vec<Item> = out.iter().filter_map(Expr::as_literal).flat_map(|v| v.iter().cloned()).collect();
            return Ok(Expr::literal(Value::from_vec(items)));
        }
        let item = out.iter().map(|e| e.ty().item).reduce(ItemType::union).unwrap_or(ItemType::Item);
        let occ = if out.iter().any(|e| e.ty().occ.min() >= 1) { Occurrence::OneOrMore } else { Occurrence::ZeroOrMore };
        let size = out.iter().try_fold(0i64, |acc, e| (e.size() >= 0).then(|| acc + e.size())).unwrap_or(-1);
        let mut e = Expr::new(ExprKind::Seq(out), SeqType::new(item, occ));
        e.info.size = size;
        Ok(e)
    }

    // ---- FLWOR ----

    fn compile_flwor(&mut self, flwor: Flwor, mark: usize) -> CResult<Expr> {
        let Flwor { clauses, group, order, ret } = flwor;
        let grouped: Vec<VarId> =
            group.as_ref().map(|g| g.non_group.iter().map(|(orig, _)| orig.id).collect()).unwrap_or_default();
        let mut out = Vec::with_capacity(clauses.len());
        for clause in clauses {
            match clause {
                Clause::For { mut var, pos, expr } => {
                    let expr = self.compile(expr)?;
                    if expr.is_empty_literal() {
                        debug!(target: COMPILE_TARGET, var = %var, "for clause iterates over nothing");
                        return Ok(Expr::empty());
                    }
                    var.refine_type(expr.ty().with_occ(Occurrence::One))?;
                    self.declare(&mut var);
                    let pos = match pos {
                        Some(mut p) => {
                            p.refine_type(SeqType::INTEGER)?;
                            self.declare(&mut p);
                            Some(p)
                        }
                        None => None,
                    };
                    out.push(Clause::For { var, pos, expr });
                }
                Clause::Let { mut var, expr } => {
                    let expr = self.compile(expr)?;
                    if let Some(value) = self.constant_value(&var, &expr) {
                        debug!(target: COMPILE_TARGET, var = %var, "pre-evaluating variable");
                        self.constants.insert(var.id, value);
                        // the grouping clause still reads the binding
                        if !grouped.contains(&var.id) {
                            continue;
                        }
                    }
                    var.refine_type(expr.ty())?;
                    self.declare(&mut var);
                    out.push(Clause::Let { var, expr });
                }
                Clause::Where(cond) => {
                    let cond = self.compile_ebv(cond, false)?;
                    if let Some(v) = cond.as_literal()
                        && let Ok(b) = effective_boolean(v.items())
                    {
                        if !b {
                            debug!(target: COMPILE_TARGET, "where clause is never satisfied");
                            return Ok(Expr::empty());
                        }
                        debug!(target: COMPILE_TARGET, "removing always-true where clause");
                        continue;
                    }
                    out.push(Clause::Where(cond));
                }
            }
        }
        let group = match group {
            Some(g) => Some(self.compile_group(g, mark)?),
            None => None,
        };
        let order = match order {
            Some(o) => Some(OrderBy {
                keys: o
                    .keys
                    .into_iter()
                    .map(|k| Ok(OrderKey { expr: self.compile(k.expr)?, descending: k.descending }))
                    .collect::<CResult<Vec<_>>>()?,
            }),
            None => None,
        };
        let ret = self.compile(ret)?;
        if out.is_empty() && group.is_none() {
            debug!(target: COMPILE_TARGET, "removing FLWOR without clauses");
            return Ok(ret);
        }
        let only_lets = group.is_none() && out.iter().all(|c| matches!(c, Clause::Let { .. }));
        let ty = if only_lets { ret.ty() } else { SeqType::new(ret.ty().item, Occurrence::ZeroOrMore) };
        Ok(Expr::new(ExprKind::Flwor(Box::new(Flwor { clauses: out, group, order, ret })), ty))
    }

    fn compile_group(&mut self, g: GroupBy, mark: usize) -> CResult<GroupBy> {
        let mut specs = Vec::with_capacity(g.specs.len());
        for GroupSpec { mut var, expr, collation } in g.specs {
            let expr = self.compile(expr)?;
            var.refine_type(SeqType::ATOMIC_ZO)?;
            specs.push(GroupSpec { var, expr, collation });
        }
        let mut non_group = Vec::with_capacity(g.non_group.len());
        for (orig, mut copy) in g.non_group {
            let orig = self.visible.iter().rev().find(|v| v.id == orig.id).cloned().ok_or_else(|| unbound(&orig))?;
            copy.refine_type(SeqType::new(orig.ty.item, Occurrence::ZeroOrMore))?;
            non_group.push((orig, copy));
        }
        // after grouping only the keys and the accumulated copies are visible
        self.visible.truncate(mark);
        for s in &mut specs {
            self.declare(&mut s.var);
        }
        for (_, copy) in &mut non_group {
            self.declare(copy);
        }
        debug!(target: COMPILE_TARGET, keys = specs.len(), rebinds = non_group.len(), "compiled group by");
        Ok(GroupBy { specs, non_group })
    }
}

enum PredShape {
    Keep,
    Always,
    Never,
}

/// Classifies a literal predicate. Numeric literals select a position:
/// only positive integral values can ever match.
fn literal_predicate(p: &Expr) -> PredShape {
    let Some(v) = p.as_literal() else { return PredShape::Keep };
    match v.items() {
        [Item::Atomic(a)] if a.is_numeric() => match a.to_double() {
            Some(d) if d >= 1.0 && d.fract() == 0.0 => PredShape::Keep,
            _ => PredShape::Never,
        },
        items => match effective_boolean(items) {
            Ok(true) => PredShape::Always,
            Ok(false) => PredShape::Never,
            Err(_) => PredShape::Keep,
        },
    }
}

/// Position window selected by a predicate, for `[n]` and
/// `[position() op n]`.
fn position_range(pred: &Expr) -> Option<PosRange> {
    if let Some(n) = pred.as_number_literal() {
        let n = n as i64;
        return Some(PosRange { min: n, max: n });
    }
    let ExprKind::Compare { op, lhs, rhs, .. } = &pred.kind else { return None };
    let (op, n) = if lhs.is_function(Function::Position) {
        (*op, rhs.as_integer()?)
    } else if rhs.is_function(Function::Position) {
        (op.swap(), lhs.as_integer()?)
    } else {
        return None;
    };
    Some(match op {
        CompOp::Eq => PosRange { min: n, max: n },
        CompOp::Lt => PosRange { min: 1, max: n.saturating_sub(1) },
        CompOp::Le => PosRange { min: 1, max: n },
        CompOp::Gt => PosRange { min: n.saturating_add(1).max(1), max: i64::MAX },
        CompOp::Ge => PosRange { min: n.max(1), max: i64::MAX },
        CompOp::Ne => return None,
    })
}

/// Picks the cheapest step variant that is equivalent to the generic one.
fn specialize(step: Step, base: SeqType) -> Expr {
    if let [pred] = step.preds.as_slice()
        && let Some(range) = position_range(pred)
    {
        if range.max < range.min.max(1) {
            debug!(target: COMPILE_TARGET, "positional predicate never matches, step is empty");
            return Expr::empty();
        }
        debug!(target: COMPILE_TARGET, min = range.min, max = range.max, "rewriting step to positional step");
        let occ = if range.min == range.max { Occurrence::ZeroOrOne } else { base.occ };
        return Expr::new(ExprKind::IterPosStep(step, range), base.with_occ(occ));
    }
    if step.preds.iter().any(|p| p.uses(Use::Pos) || p.ty().may_be_number()) {
        return Expr::new(ExprKind::AxisStep(step), base);
    }
    debug!(target: COMPILE_TARGET, axis = %step.axis, test = %step.test, "rewriting step to iterator step");
    Expr::new(ExprKind::IterStep(step), base)
}

/// Walks the path summary along the leading steps of a root-anchored path.
/// Returns `true` if the path provably selects nothing; records leaf
/// information on the steps it can answer.
fn prune(data: &Data, steps: &mut [Expr]) -> bool {
    let Some(summary) = data.trusted_summary() else { return false };
    let mut current = vec![summary.root()];
    let mut i = 0;
    while i < steps.len() {
        // `//E` is `descendant-or-self::node()/child::E`, i.e. `descendant::E`
        let (axis, idx) = match steps.get(i + 1).and_then(Expr::as_step) {
            Some(next) if next.axis == Axis::Child && is_desc_or_self_node(&steps[i]) => (Axis::Descendant, i + 1),
            _ => match steps[i].as_step() {
                Some(s) => (s.axis, i),
                None => return false,
            },
        };
        let Some(step) = steps[idx].as_step_mut() else { return false };
        let has_preds = !step.preds.is_empty();
        let found = match structural_nodes(data, &current, axis, &step.test, has_preds) {
            Some(found) => found,
            // predicates only narrow the result: the unfiltered set still
            // bounds it and tells whether the element is a leaf
            None if has_preds => match structural_nodes(data, &current, axis, &step.test, false) {
                Some(found) => found,
                None => return false,
            },
            None => return false,
        };
        if found.is_empty() {
            return true;
        }
        if step.test.kind(axis) == Some(NodeKind::Element) {
            step.leaf = found.iter().all(|&pn| summary.is_leaf(pn));
        }
        if has_preds {
            return false;
        }
        current = found;
        i = idx + 1;
    }
    false
}

fn is_single_boolean(e: &Expr) -> bool {
    e.ty().one() && e.ty().item == ItemType::Atomic(AtomicType::Boolean)
}

fn to_boolean(e: Expr) -> Expr {
    if is_single_boolean(&e) { e } else { Expr::call(Function::Boolean, vec![e]) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::NodeTest;

    fn child(name: &str, preds: Vec<Expr>) -> Expr {
        Expr::step(Axis::Child, NodeTest::name(name), preds)
    }

    fn compiled(e: Expr) -> Expr {
        compile(e, &StaticContext::default()).unwrap().root
    }

    #[test]
    fn numeric_literal_predicate_becomes_positional() {
        let e = compiled(child("a", vec![Expr::int(2)]));
        assert!(matches!(e.kind, ExprKind::IterPosStep(_, PosRange { min: 2, max: 2 })));
    }

    #[test]
    fn position_comparisons_become_windows() {
        let pos = || Expr::call(Function::Position, vec![]);
        let e = compiled(child("a", vec![Expr::compare(CompOp::Le, true, pos(), Expr::int(3))]));
        assert!(matches!(e.kind, ExprKind::IterPosStep(_, PosRange { min: 1, max: 3 })));
        let e = compiled(child("a", vec![Expr::compare(CompOp::Lt, true, Expr::int(2), pos())]));
        assert!(matches!(e.kind, ExprKind::IterPosStep(_, PosRange { min: 3, max: i64::MAX })));
    }

    #[test]
    fn zero_position_is_empty() {
        assert!(compiled(child("a", vec![Expr::int(0)])).is_empty_literal());
        assert!(compiled(child("a", vec![Expr::double(1.5)])).is_empty_literal());
    }

    #[test]
    fn attribute_axis_cannot_yield_text() {
        use crate::path::KindTest;
        let e = compiled(Expr::step(Axis::Attribute, NodeTest::Kind(KindTest::Text), vec![]));
        assert!(e.is_empty_literal());
    }

    #[test]
    fn last_keeps_generic_step() {
        let last = Expr::call(Function::Last, vec![]);
        let e = compiled(child("a", vec![Expr::compare(CompOp::Eq, true, Expr::call(Function::Position, vec![]), last)]));
        assert!(matches!(e.kind, ExprKind::AxisStep(_)));
    }

    #[test]
    fn and_with_false_folds() {
        let e = compiled(Expr::and(vec![child("a", vec![]), Expr::boolean(false)]));
        assert_eq!(e.as_literal().map(|v| v.items().to_vec()), Some(vec![Item::from(false)]));
    }

    #[test]
    fn not_empty_becomes_exists() {
        let e = compiled(Expr::call(Function::Not, vec![Expr::call(Function::Empty, vec![child("a", vec![])])]));
        assert!(e.is_function(Function::Exists));
    }
}
