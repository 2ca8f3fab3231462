//! Query compilation core of the AQB broker tier.
//!
//! Architecture role:
//! - binds an analytic query against live table schemas
//! - rewrites every expression slot into a normalized, typed tree
//! - flattens filters, enforces the measure policy, expands wildcard
//!   dimensions, and plans the dimension row layout
//!
//! Key modules:
//! - [`query`] — the AQL request model
//! - [`context`] — the per-request compilation scratchpad
//! - [`compiler`] — the staged pipeline
//! - [`rewriter`] — the bottom-up expression transformer
//!
//! The HTTP handler, data-node dispatch, and cluster membership live with
//! external collaborators; this crate starts at a parsed [`AqlQuery`] plus a
//! schema reader and ends at a context ready for dispatch.

pub mod compiler;
pub mod context;
pub mod query;
pub mod rewriter;

pub use compiler::normalize_and_filters;
pub use context::{DimCountsPerDimWidth, QueryContext};
pub use query::{AqlQuery, Dimension, Join, Measure};

/// Default row limit applied to non-aggregation queries that omit one.
pub const NON_AGGREGATION_QUERY_LIMIT: usize = 1000;
/// Seconds in one day.
pub const SECONDS_PER_DAY: i64 = 86400;
/// Seconds in one hour.
pub const SECONDS_PER_HOUR: i64 = 3600;
/// Days in one week.
pub const DAYS_PER_WEEK: i64 = 7;
/// Unix epoch day-of-week alignment (epoch was a Thursday).
pub const WEEKDAY_OFFSET: i64 = 4;
