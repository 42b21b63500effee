//! `group by` and `order by`.

use basalt_query::consts::SIMPLE_CASE_URI;
use basalt_query::{
    Axis, Clause, DynamicContext, DynamicContextBuilder, Error, ErrorCode, Expr, Function, GroupBy, GroupSpec, Item,
    MemStore, Node, NodeKind, NodeTest, OrderBy, OrderKey, SourcePos, StaticContext, Value, Var, attr, compile, doc,
    elem, evaluate, text,
};
use rstest::rstest;

/// `<r><t k="1">a</t><t k="2">b</t><t k="1">c</t></r>`
fn keyed() -> MemStore {
    let t = |k: &str, v: &str| elem("t").attr(attr("k", k)).child(text(v));
    doc().child(elem("r").child(t("1", "a")).child(t("2", "b")).child(t("1", "c"))).build()
}

fn ts() -> Expr {
    Expr::path(
        Some(Expr::root()),
        vec![Expr::step(Axis::Child, NodeTest::name("r"), vec![]), Expr::step(Axis::Child, NodeTest::name("t"), vec![])],
    )
}

fn attr_of(var: &Var, name: &str) -> Expr {
    Expr::path(Some(Expr::var(var)), vec![Expr::step(Axis::Attribute, NodeTest::name(name), vec![])])
}

fn lexical(v: &Value) -> Vec<String> {
    v.iter()
        .map(|i| match i {
            Item::Atomic(a) => a.lexical().to_string(),
            Item::Node(n) => format!("node {:?}", n.id()),
        })
        .collect()
}

fn run_on(store: MemStore, e: Expr) -> Result<Value, Error> {
    let q = compile(e, &StaticContext::default())?;
    let dc = DynamicContextBuilder::new()
        .with_data(store.into_data())
        .with_context_item(Node::db(0, NodeKind::Document))
        .build();
    evaluate(&q, &dc)
}

fn run(e: Expr) -> Result<Value, Error> {
    let q = compile(e, &StaticContext::default())?;
    evaluate(&q, &DynamicContext::default())
}

fn group(var: &Var, expr: Expr, non_group: Vec<(Var, Var)>) -> GroupBy {
    GroupBy { specs: vec![GroupSpec { var: var.clone(), expr, collation: None }], non_group }
}

fn count(var: &Var) -> Expr {
    Expr::call(Function::Count, vec![Expr::var(var)])
}

#[rstest]
fn partitions_keep_first_seen_order() {
    let (t, k, tc) = (Var::local("t"), Var::local("k"), Var::local("tc"));
    let e = Expr::flwor(
        vec![Clause::For { var: t.clone(), pos: None, expr: ts() }],
        Some(group(&k, attr_of(&t, "k"), vec![(t.clone(), tc.clone())])),
        None,
        Expr::seq(vec![Expr::var(&k), Expr::call(Function::Data, vec![Expr::var(&tc)])]),
    );
    let out = run_on(keyed(), e).unwrap();
    assert_eq!(lexical(&out), ["1", "a", "c", "2", "b"]);
}

#[rstest]
fn multi_item_key_is_rejected() {
    let (t, k) = (Var::local("t"), Var::local("k"));
    let key = Expr::seq(vec![attr_of(&t, "k"), Expr::string("x")]).at(SourcePos::new(4, 12));
    let e = Expr::flwor(
        vec![Clause::For { var: t.clone(), pos: None, expr: ts() }],
        Some(group(&k, key, vec![])),
        None,
        Expr::var(&k),
    );
    let err = run_on(keyed(), e).unwrap_err();
    assert_eq!(err.code, ErrorCode::GroupingCardinality);
    assert_eq!(err.position, Some(SourcePos::new(4, 12)));
}

#[rstest]
fn numeric_keys() {
    let (x, k, xs) = (Var::local("x"), Var::local("k"), Var::local("xs"));
    let input = Expr::seq(vec![
        Expr::double(f64::NAN),
        Expr::int(1),
        Expr::double(f64::NAN),
        Expr::double(1.0),
        Expr::double(-0.0),
        Expr::int(0),
    ]);
    let e = Expr::flwor(
        vec![Clause::For { var: x.clone(), pos: None, expr: input }],
        Some(group(&k, Expr::var(&x), vec![(x.clone(), xs.clone())])),
        None,
        count(&xs),
    );
    let out = run(e).unwrap();
    assert_eq!(out.items(), &[Item::from(2), Item::from(2), Item::from(2)]);
}

#[rstest]
fn integers_beyond_double_precision_group_apart() {
    let (x, k, xs) = (Var::local("x"), Var::local("k"), Var::local("xs"));
    let big = 1_i64 << 53;
    let input = Expr::seq(vec![Expr::int(big), Expr::int(big + 1), Expr::double(9_007_199_254_740_992.0)]);
    let e = Expr::flwor(
        vec![Clause::For { var: x.clone(), pos: None, expr: input }],
        Some(group(&k, Expr::var(&x), vec![(x.clone(), xs.clone())])),
        None,
        count(&xs),
    );
    assert_eq!(run(e).unwrap().items(), &[Item::from(2), Item::from(1)]);
}

#[rstest]
fn empty_key_is_its_own_group() {
    let (x, k, xs) = (Var::local("x"), Var::local("k"), Var::local("xs"));
    let store = doc()
        .child(elem("r").child(elem("t").attr(attr("k", ""))).child(elem("t")).child(elem("t")))
        .build();
    let e = Expr::flwor(
        vec![Clause::For { var: x.clone(), pos: None, expr: ts() }],
        Some(group(&k, attr_of(&x, "k"), vec![(x.clone(), xs.clone())])),
        None,
        count(&xs),
    );
    assert_eq!(run_on(store, e).unwrap().items(), &[Item::from(1), Item::from(2)]);
}

#[rstest]
fn keys_follow_their_collation() {
    let (s, k, ss) = (Var::local("s"), Var::local("k"), Var::local("ss"));
    let input = Expr::seq(vec![Expr::string("a"), Expr::string("A"), Expr::string("b")]);
    let spec = GroupSpec { var: k.clone(), expr: Expr::var(&s), collation: Some(SIMPLE_CASE_URI.to_string()) };
    let e = Expr::flwor(
        vec![Clause::For { var: s.clone(), pos: None, expr: input }],
        Some(GroupBy { specs: vec![spec], non_group: vec![(s.clone(), ss.clone())] }),
        None,
        count(&ss),
    );
    assert_eq!(run(e).unwrap().items(), &[Item::from(2), Item::from(1)]);
}

#[rstest]
fn constant_let_still_feeds_the_group() {
    let (c, x, k, cs) = (Var::local("c"), Var::local("x"), Var::local("k"), Var::local("cs"));
    let e = Expr::flwor(
        vec![
            Clause::Let { var: c.clone(), expr: Expr::int(5) },
            Clause::For { var: x.clone(), pos: None, expr: Expr::seq(vec![Expr::int(1), Expr::int(2), Expr::int(1)]) },
        ],
        Some(group(&k, Expr::var(&x), vec![(c.clone(), cs.clone())])),
        None,
        Expr::var(&cs),
    );
    assert_eq!(run(e).unwrap().items(), &[Item::from(5), Item::from(5), Item::from(5)]);
}

#[rstest]
fn grouped_tuples_can_be_ordered() {
    let (t, k, tc) = (Var::local("t"), Var::local("k"), Var::local("tc"));
    let e = Expr::flwor(
        vec![Clause::For { var: t.clone(), pos: None, expr: ts() }],
        Some(group(&k, attr_of(&t, "k"), vec![(t.clone(), tc.clone())])),
        Some(OrderBy { keys: vec![OrderKey { expr: Expr::var(&k), descending: true }] }),
        Expr::seq(vec![Expr::var(&k), count(&tc)]),
    );
    assert_eq!(lexical(&run_on(keyed(), e).unwrap()), ["2", "1", "1", "2"]);
}

#[rstest]
#[case::ascending(false, ["n", "a", "b"])]
#[case::descending(true, ["b", "a", "n"])]
fn empty_order_keys_sort_least(#[case] descending: bool, #[case] expected: [&str; 3]) {
    let t = Var::local("t");
    let store = doc()
        .child(
            elem("r")
                .child(elem("t").attr(attr("k", "2")).child(text("b")))
                .child(elem("t").child(text("n")))
                .child(elem("t").attr(attr("k", "1")).child(text("a"))),
        )
        .build();
    let e = Expr::flwor(
        vec![Clause::For { var: t.clone(), pos: None, expr: ts() }],
        None,
        Some(OrderBy { keys: vec![OrderKey { expr: attr_of(&t, "k"), descending }] }),
        Expr::call(Function::Data, vec![Expr::var(&t)]),
    );
    assert_eq!(lexical(&run_on(store, e).unwrap()), expected);
}

#[rstest]
fn order_is_stable_for_equal_keys() {
    let (x, i) = (Var::local("x"), Var::local("i"));
    let input = Expr::seq(vec![Expr::string("b"), Expr::string("a"), Expr::string("b"), Expr::string("a")]);
    let e = Expr::flwor(
        vec![Clause::For { var: x.clone(), pos: Some(i.clone()), expr: input }],
        None,
        Some(OrderBy { keys: vec![OrderKey { expr: Expr::var(&x), descending: false }] }),
        Expr::var(&i),
    );
    assert_eq!(run(e).unwrap().items(), &[Item::from(2), Item::from(4), Item::from(1), Item::from(3)]);
}

#[rstest]
fn multi_item_order_key_is_rejected() {
    let x = Var::local("x");
    let e = Expr::flwor(
        vec![Clause::For { var: x.clone(), pos: None, expr: Expr::seq(vec![Expr::int(1), Expr::int(2)]) }],
        None,
        Some(OrderBy {
            keys: vec![OrderKey { expr: Expr::seq(vec![Expr::var(&x), Expr::var(&x)]), descending: false }],
        }),
        Expr::var(&x),
    );
    assert_eq!(run(e).unwrap_err().code, ErrorCode::Cardinality);
}
