//! Axis step evaluation: candidate order, predicates and positional
//! short-circuiting.

use basalt_query::compiler::expr::CompOp;
use basalt_query::{
    Axis, Data, DynamicContextBuilder, Error, ErrorCode, Expr, ExprKind, ExpandedName, Function, Item, KindTest,
    MemStore, NameTest, Node, NodeId, NodeKind, NodeTest, PathSummary, StaticContext, TreeStore, Value, Var, VarKind, compile,
    doc, elem, evaluate, text,
};
use basalt_query::DynamicContext;
use compact_str::CompactString;
use rstest::{fixture, rstest};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// `<r><a>1</a>...<a>5</a></r>`; the `a` elements get ids 2, 4, 6, 8, 10.
#[fixture]
fn five() -> MemStore {
    doc().child(elem("r").children((1..=5).map(|i| elem("a").child(text(&i.to_string()))))).build()
}

fn r() -> Node {
    Node::db(1, NodeKind::Element)
}

fn child(name: &str, preds: Vec<Expr>) -> Expr {
    Expr::step(Axis::Child, NodeTest::name(name), preds)
}

fn ids(v: &Value) -> Vec<NodeId> {
    v.iter().filter_map(|i| i.as_node().and_then(Node::id)).collect()
}

fn run_on(data: Data, context: impl Into<Item>, e: Expr) -> Result<Value, Error> {
    let q = compile(e, &StaticContext::default())?;
    let dc = DynamicContextBuilder::new().with_data(data).with_context_item(context).build();
    evaluate(&q, &dc)
}

/// Tree store that counts how many axis candidates were pulled.
struct Counting {
    inner: MemStore,
    pulled: Arc<AtomicUsize>,
}

impl TreeStore for Counting {
    fn kind(&self, id: NodeId) -> NodeKind {
        self.inner.kind(id)
    }
    fn name(&self, id: NodeId) -> Option<ExpandedName> {
        self.inner.name(id)
    }
    fn value(&self, id: NodeId) -> CompactString {
        self.inner.value(id)
    }
    fn axis_iter<'s>(&'s self, id: NodeId, axis: Axis) -> Box<dyn Iterator<Item = NodeId> + 's> {
        let pulled = self.pulled.clone();
        Box::new(self.inner.axis_iter(id, axis).inspect(move |_| {
            pulled.fetch_add(1, Ordering::Relaxed);
        }))
    }
    fn root(&self, id: NodeId) -> NodeId {
        TreeStore::root(&self.inner, id)
    }
}

#[rstest]
fn child_step_yields_children_in_document_order() {
    let store = doc()
        .child(elem("r").child(elem("a")).child(elem("b")).child(elem("a")).child(text("t")).child(elem("a")))
        .build();
    let out = run_on(store.into_data(), r(), child("a", vec![])).unwrap();
    assert_eq!(ids(&out), vec![2, 4, 6]);
}

#[rstest]
fn positional_predicate_stops_after_the_match(five: MemStore) {
    let pulled = Arc::new(AtomicUsize::new(0));
    let data = Data::new(Arc::new(Counting { inner: five, pulled: pulled.clone() }));
    let q = compile(child("a", vec![Expr::int(2)]), &StaticContext::default()).unwrap();
    assert!(matches!(q.root.kind, ExprKind::IterPosStep(..)));
    let dc = DynamicContextBuilder::new().with_data(data).with_context_item(r()).build();
    let out = evaluate(&q, &dc).unwrap();
    assert_eq!(ids(&out), vec![4]);
    assert_eq!(pulled.load(Ordering::Relaxed), 2);
}

#[rstest]
fn predicates_see_the_surviving_set(five: MemStore) {
    // a[. != "2"][2] selects the third a
    let not_two = Expr::compare(CompOp::Ne, true, Expr::context(), Expr::string("2"));
    let out = run_on(five.into_data(), r(), child("a", vec![not_two, Expr::int(2)])).unwrap();
    assert_eq!(ids(&out), vec![6]);
}

#[rstest]
#[case::last(vec![Expr::call(Function::Last, vec![])], vec![10])]
#[case::position_eq_last(
    vec![Expr::compare(CompOp::Eq, true, Expr::call(Function::Position, vec![]), Expr::call(Function::Last, vec![]))],
    vec![10]
)]
#[case::window(vec![Expr::compare(CompOp::Gt, true, Expr::call(Function::Position, vec![]), Expr::int(3))], vec![8, 10])]
#[case::before(vec![Expr::compare(CompOp::Lt, true, Expr::call(Function::Position, vec![]), Expr::int(3))], vec![2, 4])]
#[case::beyond(vec![Expr::int(9)], vec![])]
fn positional_forms(five: MemStore, #[case] preds: Vec<Expr>, #[case] expected: Vec<NodeId>) {
    let out = run_on(five.into_data(), r(), child("a", preds)).unwrap();
    assert_eq!(ids(&out), expected);
}

#[rstest]
fn reverse_axis_positions_count_from_the_context(five: MemStore) {
    let text_3 = Node::db(7, NodeKind::Text);
    let data = five.into_data();
    let parent = Expr::step(Axis::Ancestor, NodeTest::Name(NameTest::Any), vec![Expr::int(1)]);
    assert_eq!(ids(&run_on(data.clone(), text_3.clone(), parent).unwrap()), vec![6]);
    let top = Expr::step(Axis::Ancestor, NodeTest::AnyKind, vec![Expr::call(Function::Last, vec![])]);
    assert_eq!(ids(&run_on(data, text_3, top).unwrap()), vec![0]);
}

#[rstest]
fn path_results_are_sorted_and_unique(five: MemStore) {
    let path = Expr::path(
        Some(Expr::root()),
        vec![
            Expr::step(Axis::Descendant, NodeTest::name("a"), vec![]),
            Expr::step(Axis::Parent, NodeTest::Name(NameTest::Any), vec![]),
        ],
    );
    assert_eq!(ids(&run_on(five.into_data(), r(), path).unwrap()), vec![1]);
}

#[rstest]
fn descendant_text_nodes(five: MemStore) {
    let path = Expr::path(
        Some(Expr::root()),
        vec![
            Expr::step(Axis::DescendantOrSelf, NodeTest::AnyKind, vec![]),
            Expr::step(Axis::Child, NodeTest::Kind(KindTest::Text), vec![]),
        ],
    );
    let out = run_on(five.into_data(), r(), path).unwrap();
    assert_eq!(ids(&out), vec![3, 5, 7, 9, 11]);
}

#[rstest]
fn scores_survive_predicate_filtering(five: MemStore) {
    let g = Var::new(Some("hit"), None, VarKind::Global);
    let scored = Node::db(3, NodeKind::Text).with_score(Some(0.75));
    let q = compile(child("a", vec![Expr::var(&g)]), &StaticContext::default()).unwrap();
    let dc = DynamicContextBuilder::new()
        .with_data(five.into_data())
        .with_context_item(r())
        .with_variable(&g, Value::single(scored))
        .build();
    let out = evaluate(&q, &dc).unwrap();
    assert_eq!(out.len(), 5);
    assert!(out.iter().all(|i| i.score() == Some(0.75)));
}

#[rstest]
fn atomic_context_item_is_a_type_error(five: MemStore) {
    let err = run_on(five.into_data(), Item::from(1), child("a", vec![])).unwrap_err();
    assert_eq!(err.code, ErrorCode::ContextType);
}

#[rstest]
fn missing_context_item_is_a_type_error() {
    let q = compile(child("a", vec![]), &StaticContext::default()).unwrap();
    let err = evaluate(&q, &DynamicContext::default()).unwrap_err();
    assert_eq!(err.code, ErrorCode::ContextType);
}

#[rstest]
fn summary_answers_structural_queries(five: MemStore) {
    let root = PathSummary::root(&five);
    let a = five.reachable(&[root], Axis::Descendant, Some(NodeKind::Element), Some(&ExpandedName::local("a")));
    assert_eq!(a.map(|f| f.len()), Some(1));
    let none = five.reachable(&[root], Axis::Child, Some(NodeKind::Element), Some(&ExpandedName::local("a")));
    assert_eq!(none, Some(vec![]));
}
