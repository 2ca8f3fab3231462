use std::sync::Arc;

use aqb_broker::{AqlQuery, Dimension, Measure, QueryContext, NON_AGGREGATION_QUERY_LIMIT};
use aqb_catalog::{Column, DataType, EnumDict, SchemaRegistry, TableSchema};
use aqb_common::{CompileError, CompileOptions};
use aqb_expr::{parse_expr, BinaryOp, Expr, ExprType, UnaryOp};
use chrono::{TimeZone, Utc};

fn trips_schema() -> TableSchema {
    TableSchema::new(
        "trips",
        vec![
            Column::new("request_at", DataType::Uint32),
            Column::new("fare", DataType::Float32),
            Column::new("city_id", DataType::Uint16),
            Column::new("flag", DataType::Bool),
            Column::new("total_ms", DataType::Int64),
            Column::new("retired", DataType::Uint32).deleted(),
        ],
    )
    .with_enum_dict("city_id", EnumDict::from_cases(&["SF", "NYC"]))
}

fn cities_schema() -> TableSchema {
    TableSchema::new(
        "cities",
        vec![
            Column::new("id", DataType::Uint16),
            Column::new("population", DataType::Uint32),
        ],
    )
}

fn registry() -> SchemaRegistry {
    let registry = SchemaRegistry::new();
    registry.register_table(trips_schema());
    registry.register_table(cities_schema());
    registry
}

fn count_measure() -> Measure {
    Measure::from_expr("count(*)")
}

fn compile(query: AqlQuery) -> QueryContext {
    compile_with(query, CompileOptions::default())
}

fn compile_with(query: AqlQuery, options: CompileOptions) -> QueryContext {
    let registry = registry();
    let mut ctx = QueryContext::new(query, options);
    ctx.compile(&registry);
    ctx
}

// -------------------------
// End-to-end scenarios
// -------------------------

#[test]
fn enum_equality_filter_translates_to_dictionary_value() {
    let ctx = compile(AqlQuery {
        table: "trips".to_string(),
        measures: vec![count_measure()],
        filters: vec!["city_id = 'SF'".to_string()],
        ..AqlQuery::default()
    });
    assert!(ctx.error().is_none(), "{:?}", ctx.error());

    let Expr::Binary(eq) = &ctx.query.filters_parsed[0] else {
        panic!("expected equality filter");
    };
    assert_eq!(eq.op, BinaryOp::Eq);
    assert_eq!(eq.expr_type, ExprType::Boolean);
    let var = eq.lhs.as_var_ref().expect("column on the left");
    assert_eq!(var.expr_type, ExprType::Unsigned);
    let binding = var.binding.as_ref().expect("bound column");
    assert_eq!((binding.table_id, binding.column_id), (0, 2));
    let Expr::NumberLiteral(n) = eq.rhs.as_ref() else {
        panic!("expected translated literal");
    };
    assert_eq!((n.int, n.expr_type), (0, ExprType::Unsigned));
}

#[test]
fn unknown_enum_case_compiles_to_unmatchable_sentinel() {
    let ctx = compile(AqlQuery {
        table: "trips".to_string(),
        measures: vec![count_measure()],
        filters: vec!["city_id = 'XYZ'".to_string()],
        ..AqlQuery::default()
    });
    assert!(ctx.error().is_none());

    let Expr::Binary(eq) = &ctx.query.filters_parsed[0] else {
        panic!("expected equality filter");
    };
    let Expr::NumberLiteral(n) = eq.rhs.as_ref() else {
        panic!("expected translated literal");
    };
    assert_eq!(n.int, -1);
}

#[test]
fn dayofweek_dimension_expands_and_lays_out() {
    let ctx = compile(AqlQuery {
        table: "trips".to_string(),
        measures: vec![count_measure()],
        dimensions: vec![Dimension::from_expr("dayofweek(request_at)")],
        ..AqlQuery::default()
    });
    assert!(ctx.error().is_none(), "{:?}", ctx.error());

    let parsed = ctx.query.dimensions[0].expr_parsed.as_ref().unwrap();
    assert_eq!(parsed.to_string(), "((((request_at / 86400) + 4) % 7) + 1)");
    assert_eq!(parsed.expr_type(), ExprType::Unsigned);

    assert_eq!(ctx.dimension_vector_index, vec![0]);
    // 4 data bytes plus 1 validity byte.
    assert_eq!(ctx.dim_row_bytes, 5);
    assert_eq!(ctx.num_dims_per_dim_width, [0, 1, 0, 0]);
}

#[test]
fn non_aggregation_wildcard_expands_to_live_columns() {
    let registry = SchemaRegistry::new();
    registry.register_table(TableSchema::new(
        "events",
        vec![
            Column::new("a", DataType::Uint32),
            Column::new("b", DataType::GeoShape).deleted(),
            Column::new("c", DataType::Uint8),
            Column::new("d", DataType::GeoShape),
        ],
    ));
    let mut ctx = QueryContext::new(
        AqlQuery {
            table: "events".to_string(),
            measures: vec![Measure::from_expr("1")],
            dimensions: vec![Dimension::from_expr("*")],
            ..AqlQuery::default()
        },
        CompileOptions::default(),
    );
    ctx.compile(&registry);
    assert!(ctx.error().is_none(), "{:?}", ctx.error());

    assert!(ctx.is_non_aggregation_query);
    assert_eq!(ctx.query.limit, NON_AGGREGATION_QUERY_LIMIT);
    let dims: Vec<&str> = ctx
        .query
        .dimensions
        .iter()
        .map(|d| d.expr.as_str())
        .collect();
    assert_eq!(dims, vec!["a", "c"]);
    for dim in &ctx.query.dimensions {
        let parsed = dim.expr_parsed.as_ref().unwrap();
        assert!(parsed.as_var_ref().unwrap().binding.is_some());
    }
    // a is 4 bytes, c is 1 byte, plus two validity bytes.
    assert_eq!(ctx.dim_row_bytes, 7);
    assert_eq!(ctx.dimension_vector_index, vec![0, 1]);
}

#[test]
fn top_level_conjunctions_flatten_into_the_filter_list() {
    let registry = SchemaRegistry::new();
    registry.register_table(TableSchema::new(
        "events",
        vec![
            Column::new("p", DataType::Bool),
            Column::new("q", DataType::Bool),
            Column::new("r", DataType::Bool),
            Column::new("s", DataType::Bool),
        ],
    ));
    let mut ctx = QueryContext::new(
        AqlQuery {
            table: "events".to_string(),
            measures: vec![count_measure()],
            filters: vec!["p AND q AND r".to_string(), "s".to_string()],
            ..AqlQuery::default()
        },
        CompileOptions::default(),
    );
    ctx.compile(&registry);
    assert!(ctx.error().is_none(), "{:?}", ctx.error());

    // [AND(AND(p, q), r), s] splits in place, appending right sides.
    let rendered: Vec<String> = ctx
        .query
        .filters_parsed
        .iter()
        .map(|f| f.to_string())
        .collect();
    assert_eq!(rendered, vec!["p", "s", "r", "q"]);
}

#[test]
fn convert_tz_folds_to_a_fixed_offset() {
    let registry = registry();
    let mut ctx = QueryContext::new(
        AqlQuery {
            table: "trips".to_string(),
            measures: vec![count_measure()],
            dimensions: vec![Dimension::from_expr(
                "convert_tz(request_at, 'UTC', 'America/Los_Angeles')",
            )],
            ..AqlQuery::default()
        },
        CompileOptions::default(),
    )
    .with_now(Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap());
    ctx.compile(&registry);
    assert!(ctx.error().is_none(), "{:?}", ctx.error());

    let parsed = ctx.query.dimensions[0].expr_parsed.as_ref().unwrap();
    assert_eq!(parsed.to_string(), "(request_at + -25200)");
    assert_eq!(parsed.expr_type(), ExprType::Unsigned);
}

// -------------------------
// Measure policy
// -------------------------

#[test]
fn exactly_one_measure_is_required() {
    let ctx = compile(AqlQuery {
        table: "trips".to_string(),
        measures: vec![],
        ..AqlQuery::default()
    });
    assert_eq!(ctx.error(), Some(&CompileError::TooManyMeasures(0)));

    let ctx = compile(AqlQuery {
        table: "trips".to_string(),
        measures: vec![count_measure(), Measure::from_expr("sum(fare)")],
        ..AqlQuery::default()
    });
    assert_eq!(ctx.error(), Some(&CompileError::TooManyMeasures(2)));
}

#[test]
fn measures_must_be_aggregates_or_literals() {
    let ctx = compile(AqlQuery {
        table: "trips".to_string(),
        measures: vec![Measure::from_expr("fare")],
        ..AqlQuery::default()
    });
    assert!(matches!(ctx.error(), Some(CompileError::ArgShape(_))));

    let ctx = compile(AqlQuery {
        table: "trips".to_string(),
        measures: vec![Measure::from_expr("sum(fare, 1)")],
        ..AqlQuery::default()
    });
    assert!(matches!(ctx.error(), Some(CompileError::Arity { .. })));
}

#[test]
fn non_aggregation_limit_defaults_only_when_zero() {
    let ctx = compile(AqlQuery {
        table: "trips".to_string(),
        measures: vec![Measure::from_expr("1")],
        ..AqlQuery::default()
    });
    assert!(ctx.is_non_aggregation_query);
    assert_eq!(ctx.query.limit, NON_AGGREGATION_QUERY_LIMIT);

    let ctx = compile(AqlQuery {
        table: "trips".to_string(),
        measures: vec![Measure::from_expr("1")],
        limit: 17,
        ..AqlQuery::default()
    });
    assert_eq!(ctx.query.limit, 17);
}

#[test]
fn hll_binary_responses_require_an_hll_measure() {
    let ctx = compile_with(
        AqlQuery {
            table: "trips".to_string(),
            measures: vec![count_measure()],
            ..AqlQuery::default()
        },
        CompileOptions::hll_binary(),
    );
    assert!(matches!(ctx.error(), Some(CompileError::HllRequired(_))));

    // countdistincthll rewrites to hll before the policy check.
    let ctx = compile_with(
        AqlQuery {
            table: "trips".to_string(),
            measures: vec![Measure::from_expr("countdistincthll(city_id)")],
            ..AqlQuery::default()
        },
        CompileOptions::hll_binary(),
    );
    assert!(ctx.error().is_none(), "{:?}", ctx.error());
    let Some(Expr::Call(call)) = &ctx.query.measures[0].expr_parsed else {
        panic!("expected call measure");
    };
    assert_eq!(call.name, "hll");
}

#[test]
fn measure_local_filters_are_rewritten_and_flattened() {
    let mut measure = count_measure();
    measure.filters = vec!["flag AND city_id = 'SF'".to_string()];
    let ctx = compile(AqlQuery {
        table: "trips".to_string(),
        measures: vec![measure],
        ..AqlQuery::default()
    });
    assert!(ctx.error().is_none(), "{:?}", ctx.error());

    let filters = &ctx.query.measures[0].filters_parsed;
    assert_eq!(filters.len(), 2);
    assert!(filters
        .iter()
        .all(|f| f.expr_type() != ExprType::Unknown));
}

// -------------------------
// Binding and joins
// -------------------------

#[test]
fn joins_bind_aliases_and_rewrite_conditions() {
    let ctx = compile(AqlQuery {
        table: "trips".to_string(),
        joins: vec![aqb_broker::Join {
            table: "cities".to_string(),
            alias: "c".to_string(),
            conditions: vec!["c.id = trips.city_id".to_string()],
            conditions_parsed: vec![],
        }],
        measures: vec![count_measure()],
        ..AqlQuery::default()
    });
    assert!(ctx.error().is_none(), "{:?}", ctx.error());

    assert_eq!(ctx.tables.len(), 2);
    assert_eq!(ctx.table_id_by_alias["c"], 1);
    let Expr::Binary(eq) = &ctx.query.joins[0].conditions_parsed[0] else {
        panic!("expected equality condition");
    };
    let lhs = eq.lhs.as_var_ref().unwrap();
    assert_eq!(lhs.binding.as_ref().unwrap().table_id, 1);
    let rhs = eq.rhs.as_var_ref().unwrap();
    assert_eq!(rhs.binding.as_ref().unwrap().table_id, 0);
}

#[test]
fn alias_conflicts_and_unknown_tables_fail_binding() {
    let ctx = compile(AqlQuery {
        table: "trips".to_string(),
        joins: vec![aqb_broker::Join {
            table: "cities".to_string(),
            alias: "trips".to_string(),
            conditions: vec![],
            conditions_parsed: vec![],
        }],
        measures: vec![count_measure()],
        ..AqlQuery::default()
    });
    assert_eq!(
        ctx.error(),
        Some(&CompileError::AliasConflict("trips".to_string()))
    );

    let ctx = compile(AqlQuery {
        table: "nope".to_string(),
        measures: vec![count_measure()],
        ..AqlQuery::default()
    });
    assert!(matches!(ctx.error(), Some(CompileError::UnknownTable(_))));
}

#[test]
fn schema_locks_release_on_success_and_failure() {
    let registry = registry();

    let mut ctx = QueryContext::new(
        AqlQuery {
            table: "trips".to_string(),
            measures: vec![count_measure()],
            ..AqlQuery::default()
        },
        CompileOptions::default(),
    );
    ctx.compile(&registry);
    assert!(ctx.error().is_none());
    assert!(registry.get("trips").unwrap().try_write().is_some());

    // Error path: deleted column referenced in a filter.
    let mut ctx = QueryContext::new(
        AqlQuery {
            table: "trips".to_string(),
            measures: vec![count_measure()],
            filters: vec!["retired > 1".to_string()],
            ..AqlQuery::default()
        },
        CompileOptions::default(),
    );
    ctx.compile(&registry);
    assert!(matches!(
        ctx.error(),
        Some(CompileError::DeletedColumn { .. })
    ));
    assert!(registry.get("trips").unwrap().try_write().is_some());
    // The registry write side is reachable too.
    assert!(registry.drop_table("cities"));
}

// -------------------------
// Rewritten-query invariants
// -------------------------

#[test]
fn rewritten_queries_contain_no_unknown_types_or_structural_leftovers() {
    let mut measure = count_measure();
    measure.filters = vec!["flag AND fare > 1".to_string()];
    let ctx = compile(AqlQuery {
        table: "trips".to_string(),
        joins: vec![aqb_broker::Join {
            table: "cities".to_string(),
            alias: String::new(),
            conditions: vec!["cities.id = trips.city_id".to_string()],
            conditions_parsed: vec![],
        }],
        measures: vec![measure],
        dimensions: vec![
            Dimension::from_expr("city_id"),
            Dimension::from_expr("hour(request_at)"),
        ],
        filters: vec![
            "(city_id IN ('SF', 'NYC')) AND fare > 10".to_string(),
            "city_id NOT IN ('SF')".to_string(),
        ],
        ..AqlQuery::default()
    });
    assert!(ctx.error().is_none(), "{:?}", ctx.error());

    let mut stack: Vec<&Expr> = Vec::new();
    for join in &ctx.query.joins {
        stack.extend(join.conditions_parsed.iter());
    }
    for measure in &ctx.query.measures {
        stack.push(measure.expr_parsed.as_ref().unwrap());
        stack.extend(measure.filters_parsed.iter());
    }
    for dim in &ctx.query.dimensions {
        stack.push(dim.expr_parsed.as_ref().unwrap());
    }
    stack.extend(ctx.query.filters_parsed.iter());

    while let Some(e) = stack.pop() {
        assert!(
            !matches!(e, Expr::Paren(_)),
            "paren node survived rewriting: {e}"
        );
        if let Expr::Binary(b) = e {
            assert!(
                b.op != BinaryOp::In && b.op != BinaryOp::NotIn,
                "IN survived rewriting: {e}"
            );
        }
        match e {
            // count(*) keeps its untyped wildcard argument; every other
            // node must come out typed.
            Expr::Wildcard => {}
            other => assert!(
                other.expr_type() != ExprType::Unknown || matches!(other, Expr::StringLiteral(_)),
                "unknown type survived rewriting: {other}"
            ),
        }
        match e {
            Expr::Unary(u) => stack.push(&u.child),
            Expr::Binary(b) => {
                stack.push(&b.lhs);
                stack.push(&b.rhs);
            }
            Expr::Call(c) => stack.extend(c.args.iter()),
            Expr::Case(c) => {
                for wt in &c.when_thens {
                    stack.push(&wt.when);
                    stack.push(&wt.then);
                }
                if let Some(else_expr) = &c.else_expr {
                    stack.push(else_expr);
                }
            }
            _ => {}
        }
    }
}

#[test]
fn dimension_vector_index_is_a_width_bucketed_permutation() {
    let ctx = compile(AqlQuery {
        table: "trips".to_string(),
        measures: vec![count_measure()],
        dimensions: vec![
            Dimension::from_expr("flag"),
            Dimension::from_expr("request_at"),
            Dimension::from_expr("total_ms"),
            Dimension::from_expr("city_id"),
        ],
        ..AqlQuery::default()
    });
    assert!(ctx.error().is_none(), "{:?}", ctx.error());

    // Widths are [1, 4, 8, 2]; buckets assign 8B first, then 4B, 2B, 1B.
    assert_eq!(ctx.dimension_vector_index, vec![3, 1, 0, 2]);
    assert_eq!(ctx.num_dims_per_dim_width, [1, 1, 1, 1]);
    assert_eq!(ctx.dim_row_bytes, 8 + 4 + 2 + 1 + 4);

    let mut sorted = ctx.dimension_vector_index.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, vec![0, 1, 2, 3]);
}

#[test]
fn empty_dimension_list_has_empty_layout() {
    let ctx = compile(AqlQuery {
        table: "trips".to_string(),
        measures: vec![count_measure()],
        ..AqlQuery::default()
    });
    assert!(ctx.error().is_none());
    assert_eq!(ctx.dim_row_bytes, 0);
    assert!(ctx.dimension_vector_index.is_empty());
}

#[test]
fn wildcard_dimension_requires_non_aggregation() {
    let ctx = compile(AqlQuery {
        table: "trips".to_string(),
        measures: vec![count_measure()],
        dimensions: vec![Dimension::from_expr("*")],
        ..AqlQuery::default()
    });
    assert!(matches!(ctx.error(), Some(CompileError::ArgShape(_))));
}

#[test]
fn enum_dimensions_record_reverse_dictionaries() {
    let ctx = compile(AqlQuery {
        table: "trips".to_string(),
        measures: vec![count_measure()],
        dimensions: vec![
            Dimension::from_expr("request_at"),
            Dimension::from_expr("city_id"),
        ],
        ..AqlQuery::default()
    });
    assert!(ctx.error().is_none());
    assert_eq!(
        ctx.dimension_enum_reverse_dicts.get(&1),
        Some(&vec!["SF".to_string(), "NYC".to_string()])
    );
    assert!(!ctx.dimension_enum_reverse_dicts.contains_key(&0));
}

// -------------------------
// Serialization round trip
// -------------------------

#[test]
fn rewritten_query_renders_canonical_text() {
    let ctx = compile(AqlQuery {
        table: "trips".to_string(),
        joins: vec![aqb_broker::Join {
            table: "cities".to_string(),
            alias: "c".to_string(),
            conditions: vec!["c.id = trips.city_id".to_string()],
            conditions_parsed: vec![],
        }],
        measures: vec![Measure::from_expr("sum(fare)")],
        dimensions: vec![Dimension::from_expr("dayofweek(request_at)")],
        filters: vec!["city_id = 'SF'".to_string()],
        ..AqlQuery::default()
    });
    assert!(ctx.error().is_none(), "{:?}", ctx.error());

    let rewritten = ctx.rewritten_query();
    assert_eq!(rewritten.measures[0].expr, "sum(fare)");
    assert_eq!(rewritten.joins[0].conditions[0], "(c.id = trips.city_id)");
    assert_eq!(
        rewritten.dimensions[0].expr,
        "((((request_at / 86400) + 4) % 7) + 1)"
    );
    assert_eq!(rewritten.filters[0], "(city_id = 0)");
}

#[test]
fn rendered_filters_reparse_and_rewrite_to_the_same_tree() {
    let ctx = compile(AqlQuery {
        table: "trips".to_string(),
        measures: vec![count_measure()],
        filters: vec!["fare > 10 AND flag".to_string(), "city_id = 'NYC'".to_string()],
        ..AqlQuery::default()
    });
    assert!(ctx.error().is_none(), "{:?}", ctx.error());

    // Recompile the canonical text the way a data node would.
    let registry = registry();
    let mut recompiled = QueryContext::new(
        AqlQuery {
            table: "trips".to_string(),
            measures: vec![count_measure()],
            ..AqlQuery::default()
        },
        CompileOptions::default(),
    );
    recompiled.compile(&registry);
    for original in &ctx.query.filters_parsed {
        let reparsed = parse_expr(&original.to_string()).unwrap();
        let rewritten = recompiled.rewrite(reparsed);
        assert!(recompiled.error().is_none());
        assert_eq!(&rewritten, original, "{original}");
    }
}

#[test]
fn queries_deserialize_from_request_json_and_compile() {
    let query: AqlQuery = serde_json::from_str(
        r#"{
            "table": "trips",
            "measures": [{"expr": "count(*)"}],
            "dimensions": [{"expr": "city_id"}],
            "filters": ["city_id = 'SF'"]
        }"#,
    )
    .unwrap();
    let ctx = compile(query);
    assert!(ctx.error().is_none(), "{:?}", ctx.error());
    assert_eq!(ctx.query.filters_parsed.len(), 1);
}

#[test]
fn boolean_equality_filters_reduce_to_predicates() {
    let ctx = compile(AqlQuery {
        table: "trips".to_string(),
        measures: vec![count_measure()],
        filters: vec!["flag = true".to_string()],
        ..AqlQuery::default()
    });
    assert!(ctx.error().is_none());
    let Expr::Unary(u) = &ctx.query.filters_parsed[0] else {
        panic!("expected predicate");
    };
    assert_eq!(u.op, UnaryOp::IsTrue);
}
