use std::sync::Arc;

use aqb_catalog::{DataType, SchemaReader};
use aqb_common::CompileError;
use aqb_expr::{call_names, parse_expr, BinaryOp, Expr, ExprType, VarRef};
use tracing::debug;

use crate::context::QueryContext;
use crate::query::Dimension;
use crate::NON_AGGREGATION_QUERY_LIMIT;

impl QueryContext {
    /// Compiles the query: binds schemas, parses and rewrites every
    /// expression slot, enforces the measure policy, expands wildcards,
    /// flattens filters, and plans the dimension layout.
    ///
    /// The first failure sticks in `self.error` and short-circuits the
    /// remaining stages; the partial context is still returned to the
    /// caller for error reporting.
    pub fn compile(&mut self, reader: &dyn SchemaReader) {
        debug!(
            request_id = %self.request_id,
            table = %self.query.table,
            "compiling query"
        );
        self.read_schema(reader);
        if self.error.is_some() {
            return;
        }
        self.process_joins();
        if self.error.is_some() {
            return;
        }
        self.process_measures();
        if self.error.is_some() {
            return;
        }
        self.process_dimensions();
        if self.error.is_some() {
            return;
        }
        self.process_filters();
        if self.error.is_some() {
            return;
        }
        self.sort_dimension_columns();
        debug!(
            request_id = %self.request_id,
            dimensions = self.query.dimensions.len(),
            dim_row_bytes = self.dim_row_bytes,
            "query compiled"
        );
    }

    /// Resolves the main and join tables against a registry snapshot.
    ///
    /// Each distinct schema's read lock is taken exactly once, just long
    /// enough to clone an immutable snapshot for the context; the registry
    /// guard drops when binding completes, on every exit path.
    fn read_schema(&mut self, reader: &dyn SchemaReader) {
        self.tables = Vec::with_capacity(1 + self.query.joins.len());
        let snapshot = reader.snapshot();

        let main = match snapshot.get_schema(&self.query.table) {
            Ok(shared) => Arc::new(shared.read().clone()),
            Err(err) => {
                self.fail(err);
                return;
            }
        };
        self.schema_by_name
            .insert(self.query.table.clone(), Arc::clone(&main));
        self.tables.push(main);
        self.table_id_by_alias.insert(self.query.table.clone(), 0);

        let joins: Vec<(String, String)> = self
            .query
            .joins
            .iter()
            .map(|j| (j.table.clone(), j.alias.clone()))
            .collect();
        for (i, (table, alias)) in joins.into_iter().enumerate() {
            let shared = match snapshot.get_schema(&table) {
                Ok(shared) => shared,
                Err(err) => {
                    self.fail(err);
                    return;
                }
            };
            let schema = match self.schema_by_name.get(&table) {
                Some(bound) => Arc::clone(bound),
                None => {
                    let bound = Arc::new(shared.read().clone());
                    self.schema_by_name.insert(table.clone(), Arc::clone(&bound));
                    bound
                }
            };
            self.tables.push(schema);

            let alias = if alias.is_empty() { table } else { alias };
            if self.table_id_by_alias.contains_key(&alias) {
                self.fail(CompileError::AliasConflict(alias));
                return;
            }
            self.table_id_by_alias.insert(alias, 1 + i);
        }
    }

    fn process_joins(&mut self) {
        let mut joins = std::mem::take(&mut self.query.joins);
        'outer: for join in &mut joins {
            join.conditions_parsed = Vec::with_capacity(join.conditions.len());
            for condition in &join.conditions {
                let parsed = match parse_expr(condition) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        self.fail(CompileError::Parse(format!(
                            "failed to parse join condition {condition}: {err}"
                        )));
                        break 'outer;
                    }
                };
                let rewritten = self.rewrite(parsed);
                join.conditions_parsed.push(rewritten);
                if self.error.is_some() {
                    break 'outer;
                }
            }
        }
        self.query.joins = joins;
    }

    fn process_measures(&mut self) {
        let mut measures = std::mem::take(&mut self.query.measures);
        'outer: for measure in &mut measures {
            let parsed = match parse_expr(&measure.expr) {
                Ok(parsed) => parsed,
                Err(err) => {
                    self.fail(CompileError::Parse(format!(
                        "failed to parse measure {}: {err}",
                        measure.expr
                    )));
                    break 'outer;
                }
            };
            measure.expr_parsed = Some(self.rewrite(parsed));
            if self.error.is_some() {
                break 'outer;
            }

            measure.filters_parsed = Vec::with_capacity(measure.filters.len());
            for filter in &measure.filters {
                let parsed = match parse_expr(filter) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        self.fail(CompileError::Parse(format!(
                            "failed to parse measure filter {filter}: {err}"
                        )));
                        break 'outer;
                    }
                };
                let rewritten = self.rewrite(parsed);
                measure.filters_parsed.push(rewritten);
                if self.error.is_some() {
                    break 'outer;
                }
            }
            measure.filters_parsed = normalize_and_filters(std::mem::take(
                &mut measure.filters_parsed,
            ));
        }
        self.query.measures = measures;
        if self.error.is_some() {
            return;
        }

        if self.query.measures.len() != 1 {
            self.fail(CompileError::TooManyMeasures(self.query.measures.len()));
            return;
        }

        match &self.query.measures[0].expr_parsed {
            Some(Expr::NumberLiteral(_)) => {
                self.is_non_aggregation_query = true;
                // In case the client forgot to provide a limit.
                if self.query.limit == 0 {
                    self.query.limit = NON_AGGREGATION_QUERY_LIMIT;
                }
            }
            Some(Expr::Call(aggregate)) => {
                if aggregate.args.len() != 1 {
                    self.fail(CompileError::Arity {
                        name: aggregate.name.clone(),
                        expected: 1,
                        got: aggregate.args.len(),
                    });
                    return;
                }
                if self.return_hll_binary && aggregate.name != call_names::HLL {
                    self.fail(CompileError::HllRequired(self.query.measures[0].expr.clone()));
                }
            }
            _ => {
                self.fail(CompileError::ArgShape(format!(
                    "expect aggregate function, but got {}",
                    self.query.measures[0].expr
                )));
            }
        }
    }

    fn process_dimensions(&mut self) {
        let raw_dims = std::mem::take(&mut self.query.dimensions);
        self.dimension_vector_index = vec![0; raw_dims.len()];
        let mut dims: Vec<Dimension> = Vec::with_capacity(raw_dims.len());
        for mut dim in raw_dims {
            let parsed = match parse_expr(&dim.expr) {
                Ok(parsed) => parsed,
                Err(err) => {
                    self.fail(CompileError::Parse(format!(
                        "failed to parse dimension {}: {err}",
                        dim.expr
                    )));
                    self.query.dimensions = dims;
                    return;
                }
            };
            if matches!(parsed, Expr::Wildcard) {
                if self.is_non_aggregation_query {
                    dims.extend(self.all_columns_dimension());
                } else {
                    self.fail(CompileError::ArgShape(
                        "wildcard dimension requires a non-aggregation query".to_string(),
                    ));
                    self.query.dimensions = dims;
                    return;
                }
            } else {
                dim.expr_parsed = Some(parsed);
                dims.push(dim);
            }
        }

        for (idx, dim) in dims.iter_mut().enumerate() {
            if let Some(parsed) = dim.expr_parsed.take() {
                let rewritten = self.rewrite(parsed);
                if let Expr::VarRef(var) = &rewritten {
                    if let Some(dict) = var
                        .binding
                        .as_ref()
                        .and_then(|binding| binding.enum_dict.as_ref())
                    {
                        if !dict.reverse_dict.is_empty() {
                            self.dimension_enum_reverse_dicts
                                .insert(idx, dict.reverse_dict.clone());
                        }
                    }
                }
                dim.expr_parsed = Some(rewritten);
            }
        }
        self.query.dimensions = dims;
    }

    fn process_filters(&mut self) {
        let filters = self.query.filters.clone();
        let mut parsed_filters = Vec::with_capacity(filters.len());
        for filter in &filters {
            let parsed = match parse_expr(filter) {
                Ok(parsed) => parsed,
                Err(err) => {
                    self.fail(CompileError::Parse(format!(
                        "failed to parse filter {filter}: {err}"
                    )));
                    self.query.filters_parsed = parsed_filters;
                    return;
                }
            };
            let rewritten = self.rewrite(parsed);
            parsed_filters.push(rewritten);
            if self.error.is_some() {
                self.query.filters_parsed = parsed_filters;
                return;
            }
        }
        self.query.filters_parsed = normalize_and_filters(parsed_filters);
    }

    /// Assigns each dimension its physical output position, wider columns
    /// first, and totals the dimension row bytes.
    fn sort_dimension_columns(&mut self) {
        let mut ordered_index = 0;
        let num_dimensions = self.query.dimensions.len();
        // Reallocated here with the post-expansion length; this allocation
        // is the authoritative one.
        self.dimension_vector_index = vec![0; num_dimensions];
        let mut byte_width = 1usize << (self.num_dims_per_dim_width.len() - 1);
        for bucket in 0..self.num_dims_per_dim_width.len() {
            for (origin_index, dim) in self.query.dimensions.iter().enumerate() {
                let data_bytes = dim
                    .expr_parsed
                    .as_ref()
                    .map_or(0, dimension_data_bytes);
                if data_bytes == byte_width {
                    self.dimension_vector_index[origin_index] = ordered_index;
                    self.num_dims_per_dim_width[bucket] += 1;
                    self.dim_row_bytes += data_bytes;
                    ordered_index += 1;
                }
            }
            byte_width >>= 1;
        }
        // One byte per dimension column for validity.
        self.dim_row_bytes += num_dimensions;
    }

    /// Wildcard expansion: one dimension per non-deleted, non-GeoShape
    /// column of the main table, in schema order.
    fn all_columns_dimension(&self) -> Vec<Dimension> {
        self.tables[0]
            .columns
            .iter()
            .filter(|column| !column.deleted && column.data_type != DataType::GeoShape)
            .map(|column| Dimension {
                expr: column.name.clone(),
                expr_parsed: Some(Expr::VarRef(VarRef::new(&column.name))),
            })
            .collect()
    }
}

/// Flattens top-level AND conjunctions into the filter list.
///
/// Iterative: an `AND(a, b)` element is replaced by `a` with `b` appended
/// to the end; terminates when every element is a non-AND node.
pub fn normalize_and_filters(mut filters: Vec<Expr>) -> Vec<Expr> {
    let mut i = 0;
    while i < filters.len() {
        match std::mem::replace(&mut filters[i], Expr::Wildcard) {
            Expr::Binary(conjunction) if conjunction.op == BinaryOp::And => {
                filters[i] = *conjunction.lhs;
                filters.push(*conjunction.rhs);
            }
            other => {
                filters[i] = other;
                i += 1;
            }
        }
    }
    filters
}

/// Bytes one dimension value occupies in the dimension row.
fn dimension_data_bytes(e: &Expr) -> usize {
    if let Expr::VarRef(var) = e {
        if let Some(binding) = &var.binding {
            return binding.data_type.bytes();
        }
    }
    match e.expr_type() {
        ExprType::Boolean => 1,
        _ => 4,
    }
}
