use aqb_expr::Expr;
use serde::{Deserialize, Serialize};

/// One join clause of an analytic query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Join {
    pub table: String,
    /// Optional alias; the table name is used when empty.
    #[serde(default)]
    pub alias: String,
    /// Equi-join conditions as expression text.
    #[serde(default)]
    pub conditions: Vec<String>,
    /// Rewritten condition trees, parallel to `conditions`.
    #[serde(skip)]
    pub conditions_parsed: Vec<Expr>,
}

/// An aggregate (or literal) output column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measure {
    pub expr: String,
    #[serde(skip)]
    pub expr_parsed: Option<Expr>,
    /// Measure-local filters as expression text.
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(skip)]
    pub filters_parsed: Vec<Expr>,
}

/// A group-by output column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dimension {
    pub expr: String,
    #[serde(skip)]
    pub expr_parsed: Option<Expr>,
}

/// The analytic query, mirroring the JSON shape of the request body.
///
/// String slots carry the client's expression text; the parsed slots are
/// filled by compilation and skipped by serde. After the AND-flattening
/// pass `filters_parsed` can be longer than `filters`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AqlQuery {
    pub table: String,
    #[serde(default)]
    pub joins: Vec<Join>,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
    #[serde(default)]
    pub measures: Vec<Measure>,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(skip)]
    pub filters_parsed: Vec<Expr>,
    #[serde(default)]
    pub limit: usize,
    /// Measures evaluated for post-processing support; carried through the
    /// query but never compiled by this pipeline.
    #[serde(default)]
    pub supporting_measures: Vec<Measure>,
    /// Dimensions evaluated for post-processing support; same treatment as
    /// `supporting_measures`.
    #[serde(default)]
    pub supporting_dimensions: Vec<Dimension>,
}

impl Dimension {
    /// A dimension from raw expression text.
    pub fn from_expr(expr: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            expr_parsed: None,
        }
    }
}

impl Measure {
    /// A measure from raw expression text.
    pub fn from_expr(expr: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            expr_parsed: None,
            filters: Vec::new(),
            filters_parsed: Vec::new(),
        }
    }
}
