//! Node handles and the storage capabilities the query core consumes.
//!
//! The core never owns documents. It talks to three read-only collaborators:
//! - [`TreeStore`]: node kinds, names, values and axis neighbours
//! - [`PathSummary`]: structural positions reachable from the document root
//! - [`ValueIndex`]: text/attribute value lookups by token or numeric range
//!
//! All three are bundled in [`Data`], which the dynamic context carries and
//! the compiler may consult when proving rewrites safe.
use crate::path::Axis;
use compact_str::CompactString;
use core::cmp::Ordering;
use core::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use string_cache::DefaultAtom;

/// Pre-order position of a node in its store. Smaller ids precede larger ones
/// in document order.
pub type NodeId = u32;

/// Identifier of a node in the path summary.
pub type PathNodeId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKind {
    Document,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
}

impl NodeKind {
    pub fn test_name(self) -> &'static str {
        match self {
            NodeKind::Document => "document-node",
            NodeKind::Element => "element",
            NodeKind::Attribute => "attribute",
            NodeKind::Text => "text",
            NodeKind::Comment => "comment",
            NodeKind::ProcessingInstruction => "processing-instruction",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpandedName {
    pub ns_uri: Option<DefaultAtom>,
    pub local: DefaultAtom,
}

impl ExpandedName {
    pub fn local(local: &str) -> Self {
        Self { ns_uri: None, local: DefaultAtom::from(local) }
    }
}

impl fmt::Display for ExpandedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ns_uri {
            Some(ns) => write!(f, "Q{{{ns}}}{}", self.local),
            None => f.write_str(&self.local),
        }
    }
}

static FRAGMENT_IDS: AtomicU64 = AtomicU64::new(0);

/// A node created during evaluation rather than read from a store.
///
/// Every fragment carries a fresh identity; two constructor evaluations
/// never yield equal nodes even if their content is the same.
#[derive(Debug)]
pub struct Fragment {
    id: u64,
    kind: NodeKind,
    name: Option<ExpandedName>,
    value: CompactString,
    children: Vec<Node>,
}

impl Fragment {
    pub fn element(name: ExpandedName, content: CompactString) -> Arc<Fragment> {
        let id = FRAGMENT_IDS.fetch_add(1, AtomicOrdering::Relaxed);
        let children = if content.is_empty() { Vec::new() } else { vec![Node::fragment(Fragment::text(content.clone()))] };
        Arc::new(Fragment { id, kind: NodeKind::Element, name: Some(name), value: content, children })
    }

    pub fn text(content: CompactString) -> Arc<Fragment> {
        let id = FRAGMENT_IDS.fetch_add(1, AtomicOrdering::Relaxed);
        Arc::new(Fragment { id, kind: NodeKind::Text, name: None, value: content, children: Vec::new() })
    }

    pub fn name(&self) -> Option<&ExpandedName> {
        self.name.as_ref()
    }

    pub fn value(&self) -> &CompactString {
        &self.value
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }
}

#[derive(Debug, Clone)]
pub(crate) enum NodeHandle {
    Db(NodeId),
    Fragment(Arc<Fragment>),
}

/// Opaque node reference carried by items.
///
/// Equality is node identity; the relevance score is payload and does not
/// take part in comparisons.
#[derive(Debug, Clone)]
pub struct Node {
    handle: NodeHandle,
    kind: NodeKind,
    score: Option<f64>,
}

impl Node {
    pub fn db(id: NodeId, kind: NodeKind) -> Self {
        Self { handle: NodeHandle::Db(id), kind, score: None }
    }

    pub fn fragment(f: Arc<Fragment>) -> Self {
        let kind = f.kind;
        Self { handle: NodeHandle::Fragment(f), kind, score: None }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Store id, `None` for constructed nodes.
    pub fn id(&self) -> Option<NodeId> {
        match &self.handle {
            NodeHandle::Db(id) => Some(*id),
            NodeHandle::Fragment(_) => None,
        }
    }

    pub fn as_fragment(&self) -> Option<&Arc<Fragment>> {
        match &self.handle {
            NodeHandle::Fragment(f) => Some(f),
            NodeHandle::Db(_) => None,
        }
    }

    pub fn score(&self) -> Option<f64> {
        self.score
    }

    pub fn with_score(mut self, score: Option<f64>) -> Self {
        self.score = score;
        self
    }

    /// Total document order: stored nodes by pre-order id, then constructed
    /// nodes in creation order.
    pub fn doc_order(&self, other: &Node) -> Ordering {
        match (&self.handle, &other.handle) {
            (NodeHandle::Db(a), NodeHandle::Db(b)) => a.cmp(b),
            (NodeHandle::Db(_), NodeHandle::Fragment(_)) => Ordering::Less,
            (NodeHandle::Fragment(_), NodeHandle::Db(_)) => Ordering::Greater,
            (NodeHandle::Fragment(a), NodeHandle::Fragment(b)) => a.id.cmp(&b.id),
        }
    }

    pub fn name(&self, tree: Option<&dyn TreeStore>) -> Option<ExpandedName> {
        match &self.handle {
            NodeHandle::Db(id) => tree.and_then(|t| t.name(*id)),
            NodeHandle::Fragment(f) => f.name.clone(),
        }
    }

    pub fn string_value(&self, tree: Option<&dyn TreeStore>) -> CompactString {
        match &self.handle {
            NodeHandle::Db(id) => tree.map(|t| t.value(*id)).unwrap_or_default(),
            NodeHandle::Fragment(f) => f.value.clone(),
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.doc_order(other) == Ordering::Equal
    }
}

impl Eq for Node {}

/// Node storage capability.
pub trait TreeStore: Send + Sync {
    fn kind(&self, id: NodeId) -> NodeKind;
    fn name(&self, id: NodeId) -> Option<ExpandedName>;
    /// String value: text content for leaves, concatenated descendant text
    /// for elements and documents.
    fn value(&self, id: NodeId) -> CompactString;
    /// Axis neighbours in the axis' natural order (reverse document order
    /// for reverse axes).
    fn axis_iter<'s>(&'s self, id: NodeId, axis: Axis) -> Box<dyn Iterator<Item = NodeId> + 's>;
    /// Document node of the tree containing `id`.
    fn root(&self, id: NodeId) -> NodeId;
    fn is_up_to_date(&self) -> bool {
        true
    }
    fn namespace_count(&self) -> usize {
        0
    }
}

/// Structural summary capability.
pub trait PathSummary: Send + Sync {
    fn root(&self) -> PathNodeId;
    /// Structural nodes reachable from `start` via `axis` whose kind is `kind`
    /// (any kind the axis yields when `None`) and, when given, whose name is
    /// `name`. `None` means the summary cannot answer safely.
    fn reachable(
        &self,
        start: &[PathNodeId],
        axis: Axis,
        kind: Option<NodeKind>,
        name: Option<&ExpandedName>,
    ) -> Option<Vec<PathNodeId>>;
    /// Whether every element at this structural position only has text children.
    fn is_leaf(&self, node: PathNodeId) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    Text,
    Attribute,
}

impl IndexKind {
    pub fn node_kind(self) -> NodeKind {
        match self {
            IndexKind::Text => NodeKind::Text,
            IndexKind::Attribute => NodeKind::Attribute,
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IndexKind::Text => "text",
            IndexKind::Attribute => "attribute",
        })
    }
}

/// Value index capability. Scans yield ids in ascending order.
pub trait ValueIndex: Send + Sync {
    fn has_index(&self, kind: IndexKind) -> bool;
    /// Nodes whose value, read as a number, lies in `[min, max]`.
    fn range_scan<'s>(&'s self, kind: IndexKind, min: f64, max: f64) -> Box<dyn Iterator<Item = NodeId> + 's>;
    /// Nodes whose value equals `token`, or starts with it when `prefix` is set.
    fn text_scan<'s>(&'s self, kind: IndexKind, token: &str, prefix: bool) -> Box<dyn Iterator<Item = NodeId> + 's>;
}

/// The read-only resources a query runs against.
#[derive(Clone)]
pub struct Data {
    pub tree: Arc<dyn TreeStore>,
    pub summary: Option<Arc<dyn PathSummary>>,
    pub index: Option<Arc<dyn ValueIndex>>,
}

impl Data {
    pub fn new(tree: Arc<dyn TreeStore>) -> Self {
        Self { tree, summary: None, index: None }
    }

    pub fn with_summary(mut self, summary: Arc<dyn PathSummary>) -> Self {
        self.summary = Some(summary);
        self
    }

    pub fn with_index(mut self, index: Arc<dyn ValueIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Summary usable for compile-time reasoning: present and describing an
    /// up-to-date, namespace-free store.
    pub fn trusted_summary(&self) -> Option<&dyn PathSummary> {
        if !self.tree.is_up_to_date() || self.tree.namespace_count() != 0 {
            return None;
        }
        self.summary.as_deref()
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Data")
            .field("summary", &self.summary.is_some())
            .field("index", &self.index.is_some())
            .finish()
    }
}
