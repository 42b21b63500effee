use basalt_query::compiler::expr::CompOp;
use basalt_query::compiler::functions::call_by_name;
use basalt_query::consts::SIMPLE_CASE_URI;
use basalt_query::{
    Axis, Clause, DynamicContextBuilder, ErrorCode, Expr, ExprKind, Function, Item, KindTest, Node, NodeKind,
    NodeTest, SourcePos, StaticContext, StaticContextBuilder, Var, compile, doc, elem, evaluate,
};
use rstest::{fixture, rstest};
use tracing_subscriber::EnvFilter;

/// Routes compile-pass events to the test output; `RUST_LOG=basalt_query::compile=debug` shows the rewrites.
#[fixture]
fn traced() {
    let _ = tracing_subscriber::fmt().with_test_writer().with_env_filter(EnvFilter::from_default_env()).try_init();
}

fn child(name: &str, preds: Vec<Expr>) -> Expr {
    Expr::step(Axis::Child, NodeTest::name(name), preds)
}

fn literal_items(e: &Expr) -> Option<Vec<Item>> {
    e.as_literal().map(|v| v.items().to_vec())
}

fn compiled(e: Expr) -> Expr {
    compile(e, &StaticContext::default()).unwrap().root
}

fn plan_text(e: &Expr) -> String {
    e.plan().to_string()
}

#[rstest]
fn compiling_twice_changes_nothing(_traced: ()) {
    let x = Var::local("x");
    let query = Expr::flwor(
        vec![Clause::For { var: x.clone(), pos: None, expr: child("a", vec![Expr::int(2)]) }],
        None,
        None,
        Expr::path(
            Some(Expr::var(&x)),
            vec![child("b", vec![Expr::compare(CompOp::Eq, true, Expr::context(), Expr::string("v"))])],
        ),
    );
    let once = compile(query, &StaticContext::default()).unwrap();
    let twice = compile(once.root.clone(), &StaticContext::default()).unwrap();
    assert_eq!(plan_text(&once.root), plan_text(&twice.root));
}

#[rstest]
fn literal_only_expressions_fold() {
    let count = Expr::call(Function::Count, vec![Expr::seq(vec![Expr::int(1), Expr::int(2), Expr::int(3)])]);
    assert_eq!(literal_items(&compiled(count)), Some(vec![Item::from(3)]));

    let eq = Expr::compare(CompOp::Eq, true, Expr::int(1), Expr::int(1));
    assert_eq!(literal_items(&compiled(eq)), Some(vec![Item::from(true)]));

    let merged = compiled(Expr::seq(vec![Expr::int(1), Expr::empty(), Expr::string("x")]));
    assert_eq!(literal_items(&merged), Some(vec![Item::from(1), Item::from("x")]));
}

#[rstest]
fn comparison_with_empty_operand() {
    let general = Expr::compare(CompOp::Eq, true, child("a", vec![]), Expr::empty());
    assert_eq!(literal_items(&compiled(general)), Some(vec![Item::from(false)]));
    let value = Expr::compare(CompOp::Eq, false, child("a", vec![]), Expr::empty());
    assert!(compiled(value).is_empty_literal());
}

#[rstest]
#[case::text_on_attribute_axis(Expr::step(Axis::Attribute, NodeTest::Kind(KindTest::Text), vec![]))]
#[case::false_predicate(child("a", vec![Expr::boolean(false)]))]
#[case::zero_position(child("a", vec![Expr::int(0)]))]
#[case::empty_window(child(
    "a",
    vec![Expr::compare(CompOp::Lt, true, Expr::call(Function::Position, vec![]), Expr::int(1))]
))]
fn steps_that_cannot_match_become_empty(#[case] step: Expr) {
    assert!(compiled(step).is_empty_literal());
}

#[rstest]
fn true_predicates_are_removed() {
    let e = compiled(child("a", vec![Expr::boolean(true)]));
    let step = e.as_step().unwrap();
    assert!(step.preds.is_empty());
    assert!(matches!(e.kind, ExprKind::IterStep(_)));
}

#[rstest]
fn non_positional_predicates_pick_the_iterator_step() {
    let e = compiled(child("a", vec![child("b", vec![])]));
    assert!(matches!(e.kind, ExprKind::IterStep(_)));
    let e = compiled(child("a", vec![Expr::call(Function::Last, vec![])]));
    assert!(matches!(e.kind, ExprKind::AxisStep(_)));
}

#[rstest]
fn plan_names_step_variants() {
    let e = compiled(child("a", vec![Expr::int(3)]));
    let plan = plan_text(&e);
    assert!(plan.contains("<IterPosStep axis=\"child\" test=\"a\""), "{plan}");
    assert!(plan.contains("min=\"3\""), "{plan}");
}

#[rstest]
fn not_of_equality_is_inverted() {
    let e = compiled(Expr::call(
        Function::Not,
        vec![Expr::compare(CompOp::Eq, true, Expr::context(), Expr::string("x"))],
    ));
    assert!(matches!(e.kind, ExprKind::Compare { op: CompOp::Ne, .. }));
}

#[rstest]
#[case::on_the_failing_call(Expr::call(Function::ExactlyOne, vec![child("a", vec![])]).at(SourcePos::new(2, 5)), SourcePos::new(2, 5))]
#[case::on_the_enclosing_sequence(
    Expr::seq(vec![Expr::int(1), Expr::call(Function::ExactlyOne, vec![child("a", vec![])])]).at(SourcePos::new(3, 9)),
    SourcePos::new(3, 9)
)]
fn runtime_errors_carry_the_source_position(#[case] e: Expr, #[case] pos: SourcePos) {
    let store = doc().child(elem("r").child(elem("a")).child(elem("a"))).build();
    let q = compile(e, &StaticContext::default()).unwrap();
    let dc = DynamicContextBuilder::new()
        .with_data(store.into_data())
        .with_context_item(Node::db(1, NodeKind::Element))
        .build();
    let err = evaluate(&q, &dc).unwrap_err();
    assert_eq!(err.code, ErrorCode::Cardinality);
    assert_eq!(err.position, Some(pos));
}

#[rstest]
fn unknown_collation_is_reported_at_run_time() {
    let e = Expr::call(
        Function::StartsWith,
        vec![Expr::string("abc"), Expr::string("a"), Expr::string("urn:no-such-collation")],
    );
    let q = compile(e, &StaticContext::default()).unwrap();
    let err = evaluate(&q, &Default::default()).unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidArgument);
}

#[rstest]
fn default_collation_is_captured_at_compile_time() {
    let e = Expr::compare(CompOp::Eq, true, Expr::string("ABC"), Expr::string("abc"));
    let sc = StaticContextBuilder::new().with_default_collation(SIMPLE_CASE_URI).build();
    let q = compile(e.clone(), &sc).unwrap();
    let out = evaluate(&q, &Default::default()).unwrap();
    assert_eq!(out.items(), &[Item::from(true)]);
    let q = compile(e, &StaticContext::default()).unwrap();
    assert_eq!(evaluate(&q, &Default::default()).unwrap().items(), &[Item::from(false)]);
}

#[rstest]
fn arity_is_checked() {
    let err = compile(Expr::call(Function::Count, vec![]), &StaticContext::default()).unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidArgument);
}

#[rstest]
fn calls_resolve_by_name() {
    let e = call_by_name("count", vec![Expr::seq(vec![Expr::int(1), Expr::int(2)])]).unwrap();
    assert!(e.is_function(Function::Count));
    assert_eq!(literal_items(&compiled(e)), Some(vec![Item::from(2)]));
}

#[rstest]
#[case::wrong_arity("count", 0)]
#[case::unknown_name("tally", 1)]
fn unresolvable_calls_are_rejected(#[case] name: &str, #[case] arity: usize) {
    let err = call_by_name(name, vec![Expr::int(1); arity]).unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidArgument);
}

#[rstest]
fn constructed_elements_are_never_folded() {
    let e = compiled(Expr::element("e", Expr::seq(vec![Expr::int(1), Expr::string("x")])));
    assert!(matches!(e.kind, ExprKind::Construct(_)));
    let out = evaluate(&compile(e, &StaticContext::default()).unwrap(), &Default::default()).unwrap();
    let node = out.items()[0].as_node().unwrap().clone();
    assert_eq!(node.string_value(None).as_str(), "1 x");
}

#[rstest]
fn text_children_of_a_constructed_element() {
    let e = Expr::path(
        Some(Expr::element("e", Expr::string("hello"))),
        vec![Expr::step(Axis::Child, NodeTest::Kind(KindTest::Text), vec![])],
    );
    let out = evaluate(&compile(e, &StaticContext::default()).unwrap(), &Default::default()).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out.items()[0].as_node().map(Node::kind), Some(NodeKind::Text));
}
