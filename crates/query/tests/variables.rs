use basalt_query::compiler::expr::{CompOp, UserFunc};
use basalt_query::{
    Clause, DynamicContext, DynamicContextBuilder, ErrorCode, ExpandedName, Expr, ExprKind, Function, Item, SeqType,
    StaticContext, StaticContextBuilder, Value, Var, VarKind, compile, evaluate,
};
use rstest::rstest;
use std::sync::Arc;

fn ints(v: &[i64]) -> Expr {
    Expr::seq(v.iter().map(|&i| Expr::int(i)).collect())
}

fn run(e: Expr) -> Value {
    let q = compile(e, &StaticContext::default()).unwrap();
    evaluate(&q, &DynamicContext::default()).unwrap()
}

fn items(v: &[i64]) -> Vec<Item> {
    v.iter().map(|&i| Item::from(i)).collect()
}

#[rstest]
fn for_binds_each_item_in_turn() {
    let x = Var::local("x");
    let e = Expr::flwor(vec![Clause::For { var: x.clone(), pos: None, expr: ints(&[1, 2, 3]) }], None, None, Expr::var(&x));
    assert_eq!(run(e).items(), items(&[1, 2, 3]).as_slice());
}

#[rstest]
fn positional_variable_counts_from_one() {
    let x = Var::local("x");
    let i = Var::local("i");
    let e = Expr::flwor(
        vec![Clause::For {
            var: x.clone(),
            pos: Some(i.clone()),
            expr: Expr::seq(vec![Expr::string("a"), Expr::string("b")]),
        }],
        None,
        None,
        Expr::var(&i),
    );
    assert_eq!(run(e).items(), items(&[1, 2]).as_slice());
}

#[rstest]
fn where_filters_tuples() {
    let x = Var::local("x");
    let e = Expr::flwor(
        vec![
            Clause::For { var: x.clone(), pos: None, expr: ints(&[1, 2, 3, 4]) },
            Clause::Where(Expr::compare(CompOp::Gt, true, Expr::var(&x), Expr::int(2))),
        ],
        None,
        None,
        Expr::var(&x),
    );
    assert_eq!(run(e).items(), items(&[3, 4]).as_slice());
}

#[rstest]
fn constant_let_is_inlined() {
    let x = Var::local("x");
    let e = Expr::flwor(
        vec![Clause::Let { var: x.clone(), expr: Expr::int(5) }],
        None,
        None,
        Expr::seq(vec![Expr::var(&x), Expr::var(&x)]),
    );
    let q = compile(e, &StaticContext::default()).unwrap();
    assert_eq!(q.root.as_literal().map(|v| v.items().to_vec()), Some(items(&[5, 5])));
}

#[rstest]
fn non_deterministic_let_is_evaluated_once() {
    let r = Var::local("r");
    let e = Expr::flwor(
        vec![Clause::Let { var: r.clone(), expr: Expr::call(Function::RandomNumber, vec![]) }],
        None,
        None,
        Expr::seq(vec![Expr::var(&r), Expr::var(&r)]),
    );
    let q = compile(e, &StaticContext::default()).unwrap();
    assert!(matches!(q.root.kind, ExprKind::Flwor(_)));
    let out = evaluate(&q, &DynamicContext::default()).unwrap();
    assert_eq!(out.len(), 2);
    assert_eq!(out.items()[0], out.items()[1]);
}

fn identity() -> Arc<UserFunc> {
    let p = Var::new(Some("p"), None, VarKind::FunctionParam);
    Arc::new(UserFunc::new("id", vec![p.clone()], None, Expr::var(&p)))
}

fn keeps_let(e: &Expr) -> bool {
    match &e.kind {
        ExprKind::Flwor(f) => f.clauses.iter().any(|c| matches!(c, Clause::Let { .. })),
        _ => false,
    }
}

#[rstest]
#[case::declared_type(Some(SeqType::INTEGER), Expr::int(5), false)]
#[case::element_constructor(None, Expr::element("e", Expr::string("x")), true)]
#[case::text_constructor(None, Expr::text_node(Expr::string("x")), true)]
#[case::namespace_element(
    None,
    Expr::element_ns(ExpandedName { ns_uri: Some("urn:x".into()), local: "e".into() }, Expr::string("x")),
    true
)]
#[case::user_function_call(None, Expr::user_call(identity(), vec![Expr::int(5)]), false)]
fn excluded_lets_stay_bound(#[case] declared: Option<SeqType>, #[case] init: Expr, #[case] is_node: bool) {
    let x = Var::new(Some("x"), declared, VarKind::Local);
    let e = Expr::flwor(
        vec![Clause::Let { var: x.clone(), expr: init }],
        None,
        None,
        Expr::seq(vec![Expr::var(&x), Expr::var(&x)]),
    );
    let q = compile(e, &StaticContext::default()).unwrap();
    assert!(keeps_let(&q.root), "{}", q.plan());

    let out = evaluate(&q, &DynamicContext::default()).unwrap();
    assert_eq!(out.len(), 2);
    // both references see the one bound value, constructed nodes included
    assert_eq!(out.items()[0], out.items()[1]);
    assert_eq!(out.items()[0].as_node().is_some(), is_node);
}

#[rstest]
fn propagation_can_be_switched_off() {
    let x = Var::local("x");
    let e = Expr::flwor(vec![Clause::Let { var: x.clone(), expr: Expr::int(5) }], None, None, Expr::var(&x));
    let sc = StaticContextBuilder::new().with_constant_propagation(false).build();
    let q = compile(e, &sc).unwrap();
    assert!(matches!(q.root.kind, ExprKind::Flwor(_)));
    assert_eq!(evaluate(&q, &DynamicContext::default()).unwrap().items(), items(&[5]).as_slice());
}

#[rstest]
fn disjoint_declared_type_fails_to_compile() {
    let n = Var::new(Some("n"), Some(SeqType::NODE_ONE), VarKind::Local);
    let e = Expr::flwor(vec![Clause::For { var: n.clone(), pos: None, expr: ints(&[1, 2]) }], None, None, Expr::var(&n));
    let err = compile(e, &StaticContext::default()).unwrap_err();
    assert_eq!(err.code, ErrorCode::TypeConflict);
}

#[rstest]
fn declared_type_is_checked_when_binding() {
    let g = Var::new(Some("g"), None, VarKind::Global);
    let x = Var::new(Some("x"), Some(SeqType::INTEGER), VarKind::Local);
    let e = Expr::flwor(vec![Clause::Let { var: x.clone(), expr: Expr::var(&g) }], None, None, Expr::var(&x));
    let q = compile(e, &StaticContext::default()).unwrap();

    let one = DynamicContextBuilder::new().with_variable(&g, Value::single(7)).build();
    assert_eq!(evaluate(&q, &one).unwrap().items(), items(&[7]).as_slice());

    let two = DynamicContextBuilder::new().with_variable(&g, Value::from_vec(items(&[1, 2]))).build();
    assert_eq!(evaluate(&q, &two).unwrap_err().code, ErrorCode::Cardinality);
}

#[rstest]
fn wrong_item_type_is_a_type_conflict() {
    let g = Var::new(Some("g"), None, VarKind::Global);
    let x = Var::new(Some("x"), Some(SeqType::INTEGER), VarKind::Local);
    let e = Expr::flwor(vec![Clause::Let { var: x.clone(), expr: Expr::var(&g) }], None, None, Expr::var(&x));
    let q = compile(e, &StaticContext::default()).unwrap();
    let dc = DynamicContextBuilder::new().with_variable(&g, Value::single("seven")).build();
    assert_eq!(evaluate(&q, &dc).unwrap_err().code, ErrorCode::TypeConflict);
}

#[rstest]
fn reference_outside_its_scope_is_rejected() {
    let stray = Var::local("stray");
    let err = compile(Expr::var(&stray), &StaticContext::default()).unwrap_err();
    assert_eq!(err.code, ErrorCode::UnboundVariable);
}

#[rstest]
fn globals_come_from_the_dynamic_context() {
    let g = Var::new(Some("g"), None, VarKind::Global);
    let q = compile(Expr::var(&g), &StaticContext::default()).unwrap();
    let bound = DynamicContextBuilder::new().with_variable(&g, Value::single("hi")).build();
    assert_eq!(evaluate(&q, &bound).unwrap().items(), &[Item::from("hi")]);
    let err = evaluate(&q, &DynamicContext::default()).unwrap_err();
    assert_eq!(err.code, ErrorCode::UnboundVariable);
}

#[rstest]
fn same_name_different_binding() {
    let outer = Var::local("x");
    let inner = Var::local("x");
    let e = Expr::flwor(
        vec![
            Clause::For { var: outer.clone(), pos: None, expr: ints(&[1, 2]) },
            Clause::For { var: inner.clone(), pos: None, expr: ints(&[10]) },
        ],
        None,
        None,
        Expr::seq(vec![Expr::var(&outer), Expr::var(&inner)]),
    );
    let sc = StaticContextBuilder::new().with_constant_propagation(false).build();
    let q = compile(e, &sc).unwrap();
    let out = evaluate(&q, &DynamicContext::default()).unwrap();
    assert_eq!(out.items(), items(&[1, 10, 2, 10]).as_slice());
}

#[rstest]
fn user_function_parameters_get_their_own_frame() {
    let p = Var::new(Some("p"), None, VarKind::FunctionParam);
    let body = Expr::seq(vec![Expr::var(&p), Expr::var(&p)]);
    let twice = Arc::new(UserFunc::new("twice", vec![p], None, body));
    let x = Var::local("x");
    let e = Expr::flwor(
        vec![Clause::For { var: x.clone(), pos: None, expr: ints(&[3, 4]) }],
        None,
        None,
        Expr::user_call(twice, vec![Expr::var(&x)]),
    );
    assert_eq!(run(e).items(), items(&[3, 3, 4, 4]).as_slice());
}

#[rstest]
fn user_function_result_is_checked() {
    let p = Var::new(Some("p"), None, VarKind::FunctionParam);
    let body = Expr::seq(vec![Expr::var(&p), Expr::var(&p)]);
    let f = Arc::new(UserFunc::new("bad", vec![p], Some(SeqType::INTEGER), body));
    let q = compile(Expr::user_call(f, vec![Expr::int(1)]), &StaticContext::default()).unwrap();
    assert_eq!(evaluate(&q, &DynamicContext::default()).unwrap_err().code, ErrorCode::Cardinality);
}

#[rstest]
fn user_function_result_item_type_is_checked() {
    let p = Var::new(Some("p"), None, VarKind::FunctionParam);
    let f = Arc::new(UserFunc::new("label", vec![p.clone()], Some(SeqType::INTEGER), Expr::var(&p)));
    let q = compile(Expr::user_call(f, vec![Expr::string("x")]), &StaticContext::default()).unwrap();
    assert_eq!(evaluate(&q, &DynamicContext::default()).unwrap_err().code, ErrorCode::TypeConflict);
}

#[rstest]
fn user_function_arity_is_checked() {
    let p = Var::new(Some("p"), None, VarKind::FunctionParam);
    let f = Arc::new(UserFunc::new("one", vec![p.clone()], None, Expr::var(&p)));
    let err = compile(Expr::user_call(f, vec![]), &StaticContext::default()).unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidArgument);
}
