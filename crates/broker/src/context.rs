use std::collections::HashMap;
use std::sync::Arc;

use aqb_catalog::TableSchema;
use aqb_common::{CompileError, CompileOptions};
use chrono::{DateTime, Utc};

use crate::query::AqlQuery;

/// Dimension slot counts per width bucket, widest (8 bytes) first.
pub type DimCountsPerDimWidth = [usize; 4];

/// Mutable compilation scratchpad for one query.
///
/// Created per request, mutated only by the compilation pipeline on one
/// thread, and handed to the dispatch layer afterwards. The first error
/// sticks in `error`; later stages are skipped once it is set.
#[derive(Debug)]
pub struct QueryContext {
    /// The working query; expression slots are replaced by rewritten trees.
    pub query: AqlQuery,
    /// The sole measure is a literal, so raw rows are returned up to `limit`.
    pub is_non_aggregation_query: bool,
    /// Client negotiated an `application/hll` response.
    pub return_hll_binary: bool,
    /// First compile failure; sticky.
    pub error: Option<CompileError>,
    /// Bound table snapshots; index 0 is the main table, joins follow in
    /// declaration order.
    pub tables: Vec<Arc<TableSchema>>,
    /// Table alias to index into `tables`.
    pub table_id_by_alias: HashMap<String, usize>,
    /// Distinct bound schemas by table name.
    pub schema_by_name: HashMap<String, Arc<TableSchema>>,
    /// Slot counts per dimension width bucket, filled by the layout planner.
    pub num_dims_per_dim_width: DimCountsPerDimWidth,
    /// Reverse enum dictionaries keyed by final dimension index, used for
    /// response post-processing.
    pub dimension_enum_reverse_dicts: HashMap<usize, Vec<String>>,
    /// Physical output position of each dimension after width bucketing.
    pub dimension_vector_index: Vec<usize>,
    /// Bytes per dimension row, including one validity byte per dimension.
    pub dim_row_bytes: usize,
    /// Request correlation id carried into logs.
    pub request_id: String,
    /// Compile-time clock, fixed at construction; used only by the
    /// `convert_tz` offset fold.
    pub(crate) now: DateTime<Utc>,
}

impl QueryContext {
    /// Builds a context for one request.
    pub fn new(query: AqlQuery, options: CompileOptions) -> Self {
        Self {
            query,
            is_non_aggregation_query: false,
            return_hll_binary: options.return_hll_binary,
            error: None,
            tables: Vec::new(),
            table_id_by_alias: HashMap::new(),
            schema_by_name: HashMap::new(),
            num_dims_per_dim_width: DimCountsPerDimWidth::default(),
            dimension_enum_reverse_dicts: HashMap::new(),
            dimension_vector_index: Vec::new(),
            dim_row_bytes: 0,
            request_id: options.request_id,
            now: Utc::now(),
        }
    }

    /// Pins the compile-time clock; tests use this to make `convert_tz`
    /// folding deterministic.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// The sticky compile error, if any stage failed.
    pub fn error(&self) -> Option<&CompileError> {
        self.error.as_ref()
    }

    /// Records the first failure; later ones are dropped.
    pub(crate) fn fail(&mut self, error: CompileError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// The query with every compiled expression slot re-rendered to
    /// canonical text, ready for dispatch to data nodes.
    pub fn rewritten_query(&self) -> AqlQuery {
        let mut query = self.query.clone();
        for measure in &mut query.measures {
            if let Some(parsed) = &measure.expr_parsed {
                measure.expr = parsed.to_string();
            }
        }
        for join in &mut query.joins {
            for (condition, parsed) in join
                .conditions
                .iter_mut()
                .zip(join.conditions_parsed.iter())
            {
                *condition = parsed.to_string();
            }
        }
        for dimension in &mut query.dimensions {
            if let Some(parsed) = &dimension.expr_parsed {
                dimension.expr = parsed.to_string();
            }
        }
        for (filter, parsed) in query.filters.iter_mut().zip(query.filters_parsed.iter()) {
            *filter = parsed.to_string();
        }
        for measure in &mut query.supporting_measures {
            if let Some(parsed) = &measure.expr_parsed {
                measure.expr = parsed.to_string();
            }
        }
        for dimension in &mut query.supporting_dimensions {
            if let Some(parsed) = &dimension.expr_parsed {
                dimension.expr = parsed.to_string();
            }
        }
        query
    }
}
