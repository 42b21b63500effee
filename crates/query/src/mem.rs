//! In-memory tree store for tests, benches and throwaway documents.
//!
//! Nodes are laid out in pre-order (node, its attributes, its children),
//! so document order is id order and every subtree is a contiguous id range.
//! The store also implements the structural summary and value index
//! capabilities, which makes a single `MemStore` a complete [`Data`] bundle.
//!
//! Example:
//! ```
//! use basalt_query::mem::{doc, elem, text, attr};
//!
//! // <root id="r"><child>Hello</child><child world="yes"/></root>
//! let store = doc()
//!     .child(
//!         elem("root")
//!             .attr(attr("id", "r"))
//!             .child(elem("child").child(text("Hello")))
//!             .child(elem("child").attr(attr("world", "yes"))),
//!     )
//!     .build();
//! assert_eq!(store.len(), 7);
//! ```
use crate::engine::string_intern::expanded;
use crate::model::{Data, ExpandedName, IndexKind, NodeId, NodeKind, PathNodeId, PathSummary, TreeStore, ValueIndex};
use crate::path::Axis;
use crate::xdm::parse_double;
use compact_str::CompactString;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

#[derive(Debug)]
struct MemNode {
    kind: NodeKind,
    name: Option<ExpandedName>,
    parent: Option<NodeId>,
    size: u32,
    attr_count: u32,
    value: CompactString,
}

#[derive(Debug)]
struct SummaryNode {
    kind: NodeKind,
    name: Option<ExpandedName>,
    children: Vec<PathNodeId>,
    leaf: bool,
}

#[derive(Debug)]
pub struct MemStore {
    nodes: Vec<MemNode>,
    summary: Vec<SummaryNode>,
    text_values: BTreeMap<CompactString, Vec<NodeId>>,
    attr_values: BTreeMap<CompactString, Vec<NodeId>>,
    up_to_date: bool,
    namespaces: usize,
    text_indexed: bool,
    attr_indexed: bool,
}

impl MemStore {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Marks the store as modified since its summary and indexes were built.
    pub fn stale(mut self) -> Self {
        self.up_to_date = false;
        self
    }

    pub fn with_indexes(mut self, text: bool, attribute: bool) -> Self {
        self.text_indexed = text;
        self.attr_indexed = attribute;
        self
    }

    /// Wraps the store as tree, summary and index of one [`Data`] bundle.
    pub fn into_data(self) -> Data {
        let s = Arc::new(self);
        Data { tree: s.clone(), summary: Some(s.clone()), index: Some(s) }
    }

    fn node(&self, id: NodeId) -> &MemNode {
        &self.nodes[id as usize]
    }

    fn end(&self, id: NodeId) -> NodeId {
        id + self.node(id).size
    }

    fn first_child(&self, id: NodeId) -> NodeId {
        id + 1 + self.node(id).attr_count
    }

    fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let end = self.end(id);
        let mut c = self.first_child(id);
        core::iter::from_fn(move || {
            if c >= end {
                return None;
            }
            let cur = c;
            c += self.node(cur).size;
            Some(cur)
        })
    }

    fn is_attr(&self, id: NodeId) -> bool {
        self.node(id).kind == NodeKind::Attribute
    }

    fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut cur = self.node(id).parent;
        core::iter::from_fn(move || {
            let p = cur?;
            cur = self.node(p).parent;
            Some(p)
        })
    }
}

impl TreeStore for MemStore {
    fn kind(&self, id: NodeId) -> NodeKind {
        self.node(id).kind
    }

    fn name(&self, id: NodeId) -> Option<ExpandedName> {
        self.node(id).name.clone()
    }

    fn value(&self, id: NodeId) -> CompactString {
        self.node(id).value.clone()
    }

    fn axis_iter<'s>(&'s self, id: NodeId, axis: Axis) -> Box<dyn Iterator<Item = NodeId> + 's> {
        let total = self.nodes.len() as NodeId;
        match axis {
            Axis::SelfAxis => Box::new(core::iter::once(id)),
            Axis::Child => Box::new(self.children(id)),
            Axis::Descendant => Box::new((self.first_child(id)..self.end(id)).filter(move |&n| !self.is_attr(n))),
            Axis::DescendantOrSelf => Box::new(
                core::iter::once(id).chain((self.first_child(id)..self.end(id)).filter(move |&n| !self.is_attr(n))),
            ),
            Axis::Attribute => Box::new(id + 1..self.first_child(id)),
            Axis::Parent => Box::new(self.node(id).parent.into_iter()),
            Axis::Ancestor => Box::new(self.ancestors(id)),
            Axis::AncestorOrSelf => Box::new(core::iter::once(id).chain(self.ancestors(id))),
            Axis::FollowingSibling => match self.node(id).parent {
                Some(p) if !self.is_attr(id) => Box::new(self.children(p).filter(move |&c| c > id)),
                _ => Box::new(core::iter::empty()),
            },
            Axis::PrecedingSibling => match self.node(id).parent {
                Some(p) if !self.is_attr(id) => {
                    let mut before: Vec<NodeId> = self.children(p).take_while(|&c| c < id).collect();
                    before.reverse();
                    Box::new(before.into_iter())
                }
                _ => Box::new(core::iter::empty()),
            },
            Axis::Following => {
                let start = match self.node(id).parent {
                    Some(p) if self.is_attr(id) => self.first_child(p),
                    _ => self.end(id),
                };
                Box::new((start..total).filter(move |&n| !self.is_attr(n)))
            }
            Axis::Preceding => {
                let r = match self.node(id).parent {
                    Some(p) if self.is_attr(id) => p,
                    _ => id,
                };
                Box::new((0..r).rev().filter(move |&n| !self.is_attr(n) && self.end(n) <= r))
            }
        }
    }

    fn root(&self, id: NodeId) -> NodeId {
        self.ancestors(id).last().unwrap_or(id)
    }

    fn is_up_to_date(&self) -> bool {
        self.up_to_date
    }

    fn namespace_count(&self) -> usize {
        self.namespaces
    }
}

impl MemStore {
    fn summary_matches(&self, pn: PathNodeId, kind: Option<NodeKind>, name: Option<&ExpandedName>) -> bool {
        let s = &self.summary[pn as usize];
        kind.is_none_or(|k| s.kind == k) && name.is_none_or(|n| s.name.as_ref() == Some(n))
    }

    fn summary_descendants(&self, pn: PathNodeId, out: &mut Vec<PathNodeId>) {
        for &c in &self.summary[pn as usize].children {
            if self.summary[c as usize].kind != NodeKind::Attribute {
                out.push(c);
                self.summary_descendants(c, out);
            }
        }
    }
}

impl PathSummary for MemStore {
    fn root(&self) -> PathNodeId {
        0
    }

    fn reachable(
        &self,
        start: &[PathNodeId],
        axis: Axis,
        kind: Option<NodeKind>,
        name: Option<&ExpandedName>,
    ) -> Option<Vec<PathNodeId>> {
        let mut cands = Vec::new();
        for &pn in start {
            let node = self.summary.get(pn as usize)?;
            match axis {
                Axis::SelfAxis => cands.push(pn),
                Axis::Child => cands.extend(
                    node.children.iter().copied().filter(|&c| self.summary[c as usize].kind != NodeKind::Attribute),
                ),
                Axis::Attribute => cands.extend(
                    node.children.iter().copied().filter(|&c| self.summary[c as usize].kind == NodeKind::Attribute),
                ),
                Axis::DescendantOrSelf => {
                    cands.push(pn);
                    self.summary_descendants(pn, &mut cands);
                }
                Axis::Descendant => self.summary_descendants(pn, &mut cands),
                _ => return None,
            }
        }
        cands.retain(|&c| self.summary_matches(c, kind, name));
        cands.sort_unstable();
        cands.dedup();
        Some(cands)
    }

    fn is_leaf(&self, node: PathNodeId) -> bool {
        self.summary.get(node as usize).is_some_and(|s| s.leaf)
    }
}

impl MemStore {
    fn index_for(&self, kind: IndexKind) -> &BTreeMap<CompactString, Vec<NodeId>> {
        match kind {
            IndexKind::Text => &self.text_values,
            IndexKind::Attribute => &self.attr_values,
        }
    }
}

impl ValueIndex for MemStore {
    fn has_index(&self, kind: IndexKind) -> bool {
        match kind {
            IndexKind::Text => self.text_indexed,
            IndexKind::Attribute => self.attr_indexed,
        }
    }

    fn range_scan<'s>(&'s self, kind: IndexKind, min: f64, max: f64) -> Box<dyn Iterator<Item = NodeId> + 's> {
        let mut ids: Vec<NodeId> = self
            .index_for(kind)
            .iter()
            .filter(|(k, _)| {
                let v = parse_double(k);
                v >= min && v <= max
            })
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect();
        ids.sort_unstable();
        Box::new(ids.into_iter())
    }

    fn text_scan<'s>(&'s self, kind: IndexKind, token: &str, prefix: bool) -> Box<dyn Iterator<Item = NodeId> + 's> {
        let index = self.index_for(kind);
        if !prefix {
            return Box::new(index.get(token).into_iter().flatten().copied());
        }
        let mut ids: Vec<NodeId> = index
            .range::<str, _>((core::ops::Bound::Included(token), core::ops::Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(token))
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect();
        ids.sort_unstable();
        Box::new(ids.into_iter())
    }
}

/// Builder for one node and its subtree.
#[derive(Debug, Clone)]
pub struct NodeBuilder {
    kind: NodeKind,
    name: Option<ExpandedName>,
    value: CompactString,
    attrs: Vec<NodeBuilder>,
    children: Vec<NodeBuilder>,
    namespaces: usize,
}

impl NodeBuilder {
    fn new(kind: NodeKind, name: Option<ExpandedName>, value: &str) -> Self {
        Self { kind, name, value: CompactString::from(value), attrs: Vec::new(), children: Vec::new(), namespaces: 0 }
    }

    pub fn child(mut self, child: NodeBuilder) -> Self {
        debug_assert!(child.kind != NodeKind::Attribute);
        self.children.push(child);
        self
    }

    pub fn children<I: IntoIterator<Item = NodeBuilder>>(mut self, it: I) -> Self {
        self.children.extend(it);
        self
    }

    pub fn attr(mut self, attr: NodeBuilder) -> Self {
        debug_assert!(attr.kind == NodeKind::Attribute);
        self.attrs.push(attr);
        self
    }

    /// Declares a namespace binding on the element.
    pub fn namespace(mut self, _prefix: &str, _uri: &str) -> Self {
        self.namespaces += 1;
        self
    }

    /// Lays out the tree rooted at this builder. A bare element is wrapped
    /// in a document node.
    pub fn build(self) -> MemStore {
        let root = if self.kind == NodeKind::Document { self } else { doc().child(self) };
        let mut store = MemStore {
            nodes: Vec::new(),
            summary: vec![SummaryNode { kind: NodeKind::Document, name: None, children: Vec::new(), leaf: false }],
            text_values: BTreeMap::new(),
            attr_values: BTreeMap::new(),
            up_to_date: true,
            namespaces: 0,
            text_indexed: true,
            attr_indexed: true,
        };
        let mut not_leaf: HashSet<PathNodeId> = HashSet::new();
        store.lay_out(root, None, 0, &mut not_leaf);
        for (i, s) in store.summary.iter_mut().enumerate() {
            s.leaf = s.kind == NodeKind::Element && !not_leaf.contains(&(i as PathNodeId));
        }
        store
    }
}

impl MemStore {
    fn summary_child(&mut self, parent: PathNodeId, kind: NodeKind, name: &Option<ExpandedName>) -> PathNodeId {
        if let Some(&c) = self.summary[parent as usize]
            .children
            .iter()
            .find(|&&c| self.summary[c as usize].kind == kind && &self.summary[c as usize].name == name)
        {
            return c;
        }
        let id = self.summary.len() as PathNodeId;
        self.summary.push(SummaryNode { kind, name: name.clone(), children: Vec::new(), leaf: false });
        self.summary[parent as usize].children.push(id);
        id
    }

    fn lay_out(
        &mut self,
        b: NodeBuilder,
        parent: Option<NodeId>,
        parent_pn: PathNodeId,
        not_leaf: &mut HashSet<PathNodeId>,
    ) -> u32 {
        let id = self.nodes.len() as NodeId;
        self.namespaces += b.namespaces;
        let pn = if b.kind == NodeKind::Document { 0 } else { self.summary_child(parent_pn, b.kind, &b.name) };
        self.nodes.push(MemNode {
            kind: b.kind,
            name: b.name,
            parent,
            size: 1,
            attr_count: b.attrs.len() as u32,
            value: b.value.clone(),
        });
        match b.kind {
            NodeKind::Text => self.text_values.entry(b.value).or_default().push(id),
            NodeKind::Attribute => self.attr_values.entry(b.value).or_default().push(id),
            _ => {}
        }
        let mut size = 1;
        for a in b.attrs {
            size += self.lay_out(a, Some(id), pn, not_leaf);
        }
        let mut texts = 0;
        for c in b.children {
            match c.kind {
                NodeKind::Element => {
                    not_leaf.insert(pn);
                }
                NodeKind::Text => texts += 1,
                _ => {}
            }
            size += self.lay_out(c, Some(id), pn, not_leaf);
        }
        if texts > 1 {
            not_leaf.insert(pn);
        }
        self.nodes[id as usize].size = size;
        if matches!(self.nodes[id as usize].kind, NodeKind::Element | NodeKind::Document) {
            let value: CompactString = (id + 1..id + size)
                .filter(|&n| self.nodes[n as usize].kind == NodeKind::Text)
                .map(|n| self.nodes[n as usize].value.as_str())
                .collect();
            self.nodes[id as usize].value = value;
        }
        size
    }
}

// Convenience helper functions for concise test code
pub fn doc() -> NodeBuilder {
    NodeBuilder::new(NodeKind::Document, None, "")
}

pub fn elem(name: &str) -> NodeBuilder {
    NodeBuilder::new(NodeKind::Element, Some(expanded(None, name)), "")
}

pub fn elem_ns(ns_uri: &str, local: &str) -> NodeBuilder {
    NodeBuilder::new(NodeKind::Element, Some(expanded(Some(ns_uri), local)), "")
}

pub fn text(v: &str) -> NodeBuilder {
    NodeBuilder::new(NodeKind::Text, None, v)
}

pub fn attr(name: &str, v: &str) -> NodeBuilder {
    NodeBuilder::new(NodeKind::Attribute, Some(expanded(None, name)), v)
}

pub fn comment(v: &str) -> NodeBuilder {
    NodeBuilder::new(NodeKind::Comment, None, v)
}

pub fn pi(target: &str, data: &str) -> NodeBuilder {
    NodeBuilder::new(NodeKind::ProcessingInstruction, Some(expanded(None, target)), data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemStore {
        // 0 doc, 1 r, 2 @id, 3 a, 4 "x", 5 b, 6 @k, 7 c, 8 "y"
        doc()
            .child(
                elem("r")
                    .attr(attr("id", "1"))
                    .child(elem("a").child(text("x")))
                    .child(elem("b").attr(attr("k", "v")).child(elem("c").child(text("y")))),
            )
            .build()
    }

    fn collect(s: &MemStore, id: NodeId, axis: Axis) -> Vec<NodeId> {
        s.axis_iter(id, axis).collect()
    }

    #[test]
    fn preorder_layout() {
        let s = sample();
        assert_eq!(s.len(), 9);
        assert_eq!(collect(&s, 1, Axis::Child), vec![3, 5]);
        assert_eq!(collect(&s, 1, Axis::Attribute), vec![2]);
        assert_eq!(collect(&s, 1, Axis::Descendant), vec![3, 4, 5, 7, 8]);
        assert_eq!(s.value(1).as_str(), "xy");
    }

    #[test]
    fn reverse_axes_are_in_reverse_order() {
        let s = sample();
        assert_eq!(collect(&s, 8, Axis::Ancestor), vec![7, 5, 1, 0]);
        assert_eq!(collect(&s, 7, Axis::Preceding), vec![4, 3]);
        assert_eq!(collect(&s, 5, Axis::PrecedingSibling), vec![3]);
    }

    #[test]
    fn following_skips_attributes() {
        let s = sample();
        assert_eq!(collect(&s, 3, Axis::Following), vec![5, 7, 8]);
        assert_eq!(collect(&s, 2, Axis::Following), vec![3, 4, 5, 7, 8]);
        assert!(collect(&s, 2, Axis::FollowingSibling).is_empty());
    }

    #[test]
    fn summary_tracks_leaves() {
        let s = sample();
        let a = s.reachable(&[0], Axis::Descendant, Some(NodeKind::Element), Some(&ExpandedName::local("a"))).unwrap();
        let b = s.reachable(&[0], Axis::Descendant, Some(NodeKind::Element), Some(&ExpandedName::local("b"))).unwrap();
        assert_eq!(a.len(), 1);
        assert!(s.is_leaf(a[0]));
        assert!(!s.is_leaf(b[0]));
    }

    #[test]
    fn prefix_scan() {
        let s = doc().child(elem("r").child(elem("a").child(text("apple"))).child(elem("a").child(text("apricot")))).build();
        let hits: Vec<_> = s.text_scan(IndexKind::Text, "ap", true).collect();
        assert_eq!(hits.len(), 2);
        assert_eq!(s.text_scan(IndexKind::Text, "apple", false).count(), 1);
    }
}
