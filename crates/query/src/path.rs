//! Axes, node tests, live axis traversal and structural-summary lookups.
use crate::engine::runtime::{DynamicContext, Error};
use crate::model::{Data, ExpandedName, Node, NodeKind, PathNodeId, TreeStore};
use core::fmt;
use string_cache::DefaultAtom;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    SelfAxis,
    Child,
    Descendant,
    DescendantOrSelf,
    Attribute,
    Parent,
    Ancestor,
    AncestorOrSelf,
    FollowingSibling,
    PrecedingSibling,
    Following,
    Preceding,
}

impl Axis {
    pub fn is_reverse(self) -> bool {
        matches!(
            self,
            Axis::Parent | Axis::Ancestor | Axis::AncestorOrSelf | Axis::PrecedingSibling | Axis::Preceding
        )
    }

    /// Axes whose results all lie in the subtree of the context node.
    pub fn is_downward(self) -> bool {
        matches!(self, Axis::SelfAxis | Axis::Child | Axis::Descendant | Axis::DescendantOrSelf | Axis::Attribute)
    }

    pub fn principal_kind(self) -> NodeKind {
        match self {
            Axis::Attribute => NodeKind::Attribute,
            _ => NodeKind::Element,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Axis::SelfAxis => "self",
            Axis::Child => "child",
            Axis::Descendant => "descendant",
            Axis::DescendantOrSelf => "descendant-or-self",
            Axis::Attribute => "attribute",
            Axis::Parent => "parent",
            Axis::Ancestor => "ancestor",
            Axis::AncestorOrSelf => "ancestor-or-self",
            Axis::FollowingSibling => "following-sibling",
            Axis::PrecedingSibling => "preceding-sibling",
            Axis::Following => "following",
            Axis::Preceding => "preceding",
        }
    }

    /// Whether nodes of `kind` can ever be reached via this axis.
    pub fn can_yield(self, kind: NodeKind) -> bool {
        match self {
            Axis::Attribute => kind == NodeKind::Attribute,
            Axis::Child | Axis::Descendant | Axis::FollowingSibling | Axis::PrecedingSibling
            | Axis::Following | Axis::Preceding => !matches!(kind, NodeKind::Attribute | NodeKind::Document),
            Axis::Parent | Axis::Ancestor => matches!(kind, NodeKind::Element | NodeKind::Document),
            Axis::SelfAxis | Axis::DescendantOrSelf | Axis::AncestorOrSelf => true,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NameTest {
    Name(ExpandedName),
    /// `*`
    Any,
    /// `*:local`
    NsWildcard(DefaultAtom),
    /// `prefix:*`, resolved to the namespace URI
    LocalWildcard(Option<DefaultAtom>),
}

impl NameTest {
    pub fn matches(&self, name: Option<&ExpandedName>) -> bool {
        let Some(name) = name else { return false };
        match self {
            NameTest::Any => true,
            NameTest::Name(n) => n == name,
            NameTest::NsWildcard(local) => &name.local == local,
            NameTest::LocalWildcard(ns) => &name.ns_uri == ns,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KindTest {
    Document,
    Element(Option<NameTest>),
    Attribute(Option<NameTest>),
    Text,
    Comment,
    Pi(Option<DefaultAtom>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeTest {
    /// `node()`
    AnyKind,
    /// Name test applied to the axis' principal node kind.
    Name(NameTest),
    Kind(KindTest),
}

impl NodeTest {
    pub fn name(local: &str) -> Self {
        NodeTest::Name(NameTest::Name(ExpandedName::local(local)))
    }

    /// Node kind the test restricts to on `axis`, `None` for `node()`.
    pub fn kind(&self, axis: Axis) -> Option<NodeKind> {
        match self {
            NodeTest::AnyKind => None,
            NodeTest::Name(_) => Some(axis.principal_kind()),
            NodeTest::Kind(k) => Some(match k {
                KindTest::Document => NodeKind::Document,
                KindTest::Element(_) => NodeKind::Element,
                KindTest::Attribute(_) => NodeKind::Attribute,
                KindTest::Text => NodeKind::Text,
                KindTest::Comment => NodeKind::Comment,
                KindTest::Pi(_) => NodeKind::ProcessingInstruction,
            }),
        }
    }

    fn name_test(&self) -> Option<&NameTest> {
        match self {
            NodeTest::Name(n) | NodeTest::Kind(KindTest::Element(Some(n))) | NodeTest::Kind(KindTest::Attribute(Some(n))) => {
                Some(n)
            }
            _ => None,
        }
    }

    /// Whether the test needs the node name to decide.
    fn needs_name(&self) -> bool {
        matches!(self.name_test(), Some(t) if *t != NameTest::Any) || matches!(self, NodeTest::Kind(KindTest::Pi(Some(_))))
    }

    pub fn matches(&self, axis: Axis, kind: NodeKind, name: Option<&ExpandedName>) -> bool {
        if let Some(k) = self.kind(axis)
            && k != kind
        {
            return false;
        }
        match self {
            NodeTest::Kind(KindTest::Pi(Some(target))) => name.is_some_and(|n| &n.local == target),
            _ => match self.name_test() {
                Some(NameTest::Any) | None => true,
                Some(t) => t.matches(name),
            },
        }
    }

    pub fn matches_node(&self, axis: Axis, node: &Node, tree: Option<&dyn TreeStore>) -> bool {
        if let Some(k) = self.kind(axis)
            && k != node.kind()
        {
            return false;
        }
        if !self.needs_name() {
            return true;
        }
        let name = node.name(tree);
        self.matches(axis, node.kind(), name.as_ref())
    }

    /// `(kind, name)` the structural summary can answer for, or `None` when
    /// the summary does not track enough to decide. A `None` kind is `node()`.
    pub(crate) fn structural_filter(&self, axis: Axis) -> Option<(Option<NodeKind>, Option<ExpandedName>)> {
        let kind = self.kind(axis);
        if kind == Some(NodeKind::ProcessingInstruction) {
            return None;
        }
        match self.name_test() {
            None | Some(NameTest::Any) => Some((kind, None)),
            Some(NameTest::Name(n)) => Some((kind, Some(n.clone()))),
            Some(NameTest::NsWildcard(_) | NameTest::LocalWildcard(_)) => None,
        }
    }
}

impl fmt::Display for NameTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameTest::Name(n) => write!(f, "{n}"),
            NameTest::Any => f.write_str("*"),
            NameTest::NsWildcard(l) => write!(f, "*:{l}"),
            NameTest::LocalWildcard(Some(ns)) => write!(f, "Q{{{ns}}}*"),
            NameTest::LocalWildcard(None) => f.write_str("Q{}*"),
        }
    }
}

impl fmt::Display for NodeTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeTest::AnyKind => f.write_str("node()"),
            NodeTest::Name(n) => write!(f, "{n}"),
            NodeTest::Kind(k) => match k {
                KindTest::Document => f.write_str("document-node()"),
                KindTest::Element(None) => f.write_str("element()"),
                KindTest::Element(Some(n)) => write!(f, "element({n})"),
                KindTest::Attribute(None) => f.write_str("attribute()"),
                KindTest::Attribute(Some(n)) => write!(f, "attribute({n})"),
                KindTest::Text => f.write_str("text()"),
                KindTest::Comment => f.write_str("comment()"),
                KindTest::Pi(None) => f.write_str("processing-instruction()"),
                KindTest::Pi(Some(t)) => write!(f, "processing-instruction({t})"),
            },
        }
    }
}

/// Candidate nodes reachable from `node` via `axis`, in axis order.
pub(crate) fn axis_nodes<'a>(
    dyn_ctx: &'a DynamicContext,
    node: &Node,
    axis: Axis,
) -> Result<Box<dyn Iterator<Item = Node> + 'a>, Error> {
    match node.id() {
        Some(id) => {
            let tree = dyn_ctx.data()?.tree.as_ref();
            Ok(Box::new(tree.axis_iter(id, axis).map(move |n| Node::db(n, tree.kind(n)))))
        }
        None => fragment_axis(node, axis),
    }
}

fn fragment_axis<'a>(node: &Node, axis: Axis) -> Result<Box<dyn Iterator<Item = Node> + 'a>, Error> {
    let Some(frag) = node.as_fragment() else {
        return Ok(Box::new(core::iter::empty()));
    };
    let children = frag.children().to_vec();
    Ok(match axis {
        Axis::SelfAxis => Box::new(core::iter::once(node.clone())),
        Axis::DescendantOrSelf => Box::new(core::iter::once(node.clone()).chain(children)),
        Axis::Child | Axis::Descendant => Box::new(children.into_iter()),
        Axis::Attribute => Box::new(core::iter::empty()),
        other => {
            return Err(Error::context_type(format!("axis {other} is not supported on constructed nodes")));
        }
    })
}

/// Lazy axis traversal filtered by a node test, consulting the deadline
/// between candidates.
pub(crate) struct AxisCursor<'a> {
    dyn_ctx: &'a DynamicContext,
    tree: Option<&'a dyn TreeStore>,
    inner: Box<dyn Iterator<Item = Node> + 'a>,
    axis: Axis,
    test: &'a NodeTest,
    done: bool,
}

impl<'a> AxisCursor<'a> {
    pub(crate) fn new(dyn_ctx: &'a DynamicContext, node: &Node, axis: Axis, test: &'a NodeTest) -> Result<Self, Error> {
        let inner = axis_nodes(dyn_ctx, node, axis)?;
        let tree = dyn_ctx.data.as_ref().map(|d| d.tree.as_ref());
        Ok(Self { dyn_ctx, tree, inner, axis, test, done: false })
    }
}

impl Iterator for AxisCursor<'_> {
    type Item = Result<Node, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if let Err(e) = self.dyn_ctx.check_deadline() {
                self.done = true;
                return Some(Err(e));
            }
            let n = self.inner.next()?;
            if self.test.matches_node(self.axis, &n, self.tree) {
                return Some(Ok(n));
            }
        }
    }
}

/// Structural positions reachable from `start` by one step, or `None` when
/// the summary cannot answer safely. Steps with predicates, stores with
/// namespaces or pending updates, processing-instruction tests, namespace
/// wildcards and axes that leave the subtree all fall back to traversal.
/// `node()` matches every kind the axis yields.
pub fn structural_nodes(
    data: &Data,
    start: &[PathNodeId],
    axis: Axis,
    test: &NodeTest,
    has_predicates: bool,
) -> Option<Vec<PathNodeId>> {
    if has_predicates || !axis.is_downward() {
        return None;
    }
    let summary = data.trusted_summary()?;
    let (kind, name) = test.structural_filter(axis)?;
    summary.reachable(start, axis, kind, name.as_ref())
}
