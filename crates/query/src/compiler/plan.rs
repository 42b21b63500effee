//! Query plan dump.
//!
//! The plan is a small tree of named nodes with attributes, rendered as
//! indented XML-like text. Variables are shown by name and identity, never
//! by slot, so two compilations of the same tree print the same plan.
use crate::compiler::expr::{Clause, CompOp, Construct, Expr, ExprKind, LogicOp, Step};
use crate::xdm::{Item, Value};
use core::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanNode {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<PlanNode>,
}

impl PlanNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), attrs: Vec::new(), children: Vec::new() }
    }

    pub fn attr(mut self, key: &str, value: impl ToString) -> Self {
        self.attrs.push((key.to_string(), value.to_string()));
        self
    }

    pub fn child(mut self, child: PlanNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn children<I: IntoIterator<Item = PlanNode>>(mut self, it: I) -> Self {
        self.children.extend(it);
        self
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{:indent$}<{}", "", self.name, indent = depth * 2)?;
        for (k, v) in &self.attrs {
            write!(f, " {k}=\"{}\"", v.replace('"', "&quot;"))?;
        }
        if self.children.is_empty() {
            return writeln!(f, "/>");
        }
        writeln!(f, ">")?;
        for c in &self.children {
            c.write_indented(f, depth + 1)?;
        }
        writeln!(f, "{:indent$}</{}>", "", self.name, indent = depth * 2)
    }
}

impl fmt::Display for PlanNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

fn value_text(v: &Value) -> String {
    let parts: Vec<String> = v
        .iter()
        .map(|it| match it {
            Item::Atomic(a) => a.to_string(),
            Item::Node(n) => format!("{}()", n.kind().test_name()),
        })
        .collect();
    match parts.len() {
        1 => parts.concat(),
        _ => format!("({})", parts.join(", ")),
    }
}

fn step_plan(name: &str, step: &Step) -> PlanNode {
    let mut node = PlanNode::new(name).attr("axis", step.axis).attr("test", &step.test);
    if step.leaf {
        node = node.attr("leaf", true);
    }
    node.children(step.preds.iter().map(Expr::plan))
}

impl Expr {
    /// Short name of the expression kind, as used in plans and logs.
    pub fn name(&self) -> &'static str {
        match &self.kind {
            ExprKind::Literal(_) => "Literal",
            ExprKind::ContextItem => "ContextItem",
            ExprKind::Root => "Root",
            ExprKind::VarRef(_) => "VarRef",
            ExprKind::AxisStep(_) => "AxisStep",
            ExprKind::IterStep(_) => "IterStep",
            ExprKind::IterPosStep(..) => "IterPosStep",
            ExprKind::Path { .. } => "Path",
            ExprKind::RangeAccess(_) => "RangeAccess",
            ExprKind::TextAccess(_) => "TextAccess",
            ExprKind::Compare { general: true, .. } => "GeneralComparison",
            ExprKind::Compare { general: false, .. } => "ValueComparison",
            ExprKind::Logic { op: LogicOp::And, .. } => "And",
            ExprKind::Logic { op: LogicOp::Or, .. } => "Or",
            ExprKind::Call(_) => "FnCall",
            ExprKind::UserCall { .. } => "UserCall",
            ExprKind::Construct(Construct::Element { .. }) => "ElementConstructor",
            ExprKind::Construct(Construct::Text(_)) => "TextConstructor",
            ExprKind::Flwor(_) => "Flwor",
            ExprKind::Seq(_) => "Seq",
        }
    }

    pub fn plan(&self) -> PlanNode {
        let node = PlanNode::new(self.name());
        match &self.kind {
            ExprKind::Literal(v) => node.attr("value", value_text(v)).attr("type", v.seq_type()),
            ExprKind::ContextItem | ExprKind::Root => node,
            ExprKind::VarRef(v) => node.attr("name", v),
            ExprKind::AxisStep(s) | ExprKind::IterStep(s) => step_plan(self.name(), s),
            ExprKind::IterPosStep(s, r) => {
                let max = if r.max == i64::MAX { "last".to_string() } else { r.max.to_string() };
                step_plan(self.name(), s).attr("min", r.min).attr("max", max)
            }
            ExprKind::Path { root, steps } => {
                node.children(root.iter().map(|r| r.plan())).children(steps.iter().map(Expr::plan))
            }
            ExprKind::RangeAccess(r) => node.attr("index", r.kind).attr("min", r.min).attr("max", r.max),
            ExprKind::TextAccess(t) => {
                let node = node.attr("index", t.kind).attr("token", &t.token);
                if t.prefix { node.attr("prefix", true) } else { node }
            }
            ExprKind::Compare { op, general, lhs, rhs } => {
                node.attr("op", CompOp::symbol(*op, *general)).child(lhs.plan()).child(rhs.plan())
            }
            ExprKind::Logic { operands, .. } | ExprKind::Seq(operands) => node.children(operands.iter().map(Expr::plan)),
            ExprKind::Call(c) => node.attr("name", format!("fn:{}", c.func.def().local)).children(c.args.iter().map(Expr::plan)),
            ExprKind::UserCall { func, args } => node.attr("name", &func.name).children(args.iter().map(Expr::plan)),
            ExprKind::Construct(Construct::Element { name, content, .. }) => node.attr("name", name).child(content.plan()),
            ExprKind::Construct(Construct::Text(content)) => node.child(content.plan()),
            ExprKind::Flwor(f) => {
                let mut node = node;
                for c in &f.clauses {
                    node = node.child(match c {
                        Clause::For { var, pos, expr } => {
                            let n = PlanNode::new("For").attr("var", var);
                            let n = match pos {
                                Some(p) => n.attr("at", p),
                                None => n,
                            };
                            n.child(expr.plan())
                        }
                        Clause::Let { var, expr } => PlanNode::new("Let").attr("var", var).child(expr.plan()),
                        Clause::Where(e) => PlanNode::new("Where").child(e.plan()),
                    });
                }
                if let Some(g) = &f.group {
                    let specs = g.specs.iter().map(|s| {
                        let n = PlanNode::new("GroupSpec").attr("var", &s.var);
                        let n = match &s.collation {
                            Some(c) => n.attr("collation", c),
                            None => n,
                        };
                        n.child(s.expr.plan())
                    });
                    let copies =
                        g.non_group.iter().map(|(orig, copy)| PlanNode::new("Rebind").attr("from", orig).attr("to", copy));
                    node = node.child(PlanNode::new("GroupBy").children(specs).children(copies));
                }
                if let Some(o) = &f.order {
                    let keys = o.keys.iter().map(|k| {
                        PlanNode::new("OrderKey")
                            .attr("dir", if k.descending { "descending" } else { "ascending" })
                            .child(k.expr.plan())
                    });
                    node = node.child(PlanNode::new("OrderBy").children(keys));
                }
                node.child(PlanNode::new("Return").child(f.ret.plan()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::{Axis, NodeTest};

    #[test]
    fn renders_nested_nodes() {
        let e = Expr::step(Axis::Child, NodeTest::name("a"), vec![Expr::int(2)]);
        let text = e.plan().to_string();
        assert_eq!(
            text,
            "<AxisStep axis=\"child\" test=\"a\">\n  <Literal value=\"2\" type=\"xs:integer\"/>\n</AxisStep>\n"
        );
    }

    #[test]
    fn string_literals_are_escaped() {
        let text = Expr::string("x").plan().to_string();
        assert_eq!(text, "<Literal value=\"&quot;x&quot;\" type=\"xs:string\"/>\n");
    }
}
