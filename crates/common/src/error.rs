use thiserror::Error;

/// Canonical AQB compile-error taxonomy.
///
/// Every failure the query compilation core can produce is one of these
/// kinds. The broker's HTTP collaborator maps any of them to a 400 response
/// carrying the rendered message.
///
/// Classification guidance:
/// - binding failures: [`CompileError::UnknownTable`], [`CompileError::AliasConflict`],
///   [`CompileError::UnknownColumn`], [`CompileError::DeletedColumn`]
/// - typing failures: [`CompileError::Type`], [`CompileError::StringOnlyEqNeq`],
///   [`CompileError::OversizeNumericOp`]
/// - function/shape failures: [`CompileError::UnknownFunction`], [`CompileError::Arity`],
///   [`CompileError::ArgShape`] and the per-function kinds below
///
/// The enum is `Clone` because compilation keeps the first error in a sticky
/// context slot and still hands the partial context back to the caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// Expression text did not parse.
    #[error("failed to parse expression: {0}")]
    Parse(String),

    /// Main or join table (or a table alias inside an identifier) is not in
    /// the schema registry.
    #[error("unknown table {0}")]
    UnknownTable(String),

    /// Two joins (or a join and the main table) map the same alias.
    #[error("table alias {0} is redefined")]
    AliasConflict(String),

    /// Identifier names a column the aliased table does not have.
    #[error("unknown column {column} for table alias {table}")]
    UnknownColumn {
        /// Column segment of the identifier.
        column: String,
        /// Alias segment the column was looked up under.
        table: String,
    },

    /// Column exists but is marked deleted in the live schema.
    #[error("column {column} of table {table} has been deleted")]
    DeletedColumn {
        /// Deleted column name.
        column: String,
        /// Owning table name.
        table: String,
    },

    /// Illegal implicit cast (boolean from a geo-typed expression).
    #[error("type error: {0}")]
    Type(String),

    /// String literal used with an operator other than EQ/NEQ.
    #[error("string type only support EQ and NEQ operators")]
    StringOnlyEqNeq,

    /// Unary operator outside the supported set.
    #[error("unsupported unary expression {0}")]
    UnsupportedUnaryOp(String),

    /// Binary operator outside the supported set.
    #[error("unsupported binary expression {0}")]
    UnsupportedBinaryOp(String),

    /// Call to a function the rewriter does not recognize.
    #[error("unknown function {0}")]
    UnknownFunction(String),

    /// Function called with the wrong number of arguments.
    #[error("expect {expected} argument(s) for {name}, but got {got}")]
    Arity {
        /// Function name as written (lowercased).
        name: String,
        /// Required argument count.
        expected: usize,
        /// Observed argument count.
        got: usize,
    },

    /// Argument (or measure) has the wrong node shape.
    #[error("{0}")]
    ArgShape(String),

    /// Any unary op other than `GET_HLL_VALUE` applied to a UUID column.
    #[error("uuid column type only supports countdistincthll unary expression")]
    UuidOpRestricted,

    /// Arithmetic/bitwise op on a column wider than four bytes.
    #[error("numeric operations not supported for column over 4 bytes length, got {0}")]
    OversizeNumericOp(String),

    /// Client requested an HLL binary response but the measure is not `hll`.
    #[error("expect hll aggregate function as client specify 'Accept' as 'application/hll', but got {0}")]
    HllRequired(String),

    /// `hll` applied to a column that is not a Uint32 sketch column.
    #[error("expect 1 argument to be a valid hll column for hll, but got {0}")]
    HllColumnTypeMismatch(String),

    /// Geo-point literal text did not parse.
    #[error("failed to parse geo point: {0}")]
    GeoParse(String),

    /// `geography_intersects` arguments are not one shape and one point column.
    #[error("{0}")]
    GeoArgMismatch(String),

    /// Malformed `convert_tz` call.
    #[error("failed to rewrite convert_tz: {0}")]
    BadConvertTz(String),

    /// `from_unixtime` argument is not exactly `column / 1000`.
    #[error("from_unixtime must be time column / 1000")]
    BadFromUnixtime,

    /// Malformed `dayofweek` call.
    #[error("dayofweek takes exactly 1 argument")]
    BadDayOfWeek,

    /// Array function applied to a non-array column or malformed index.
    #[error("{0}")]
    BadArrayArg(String),

    /// Query declared more or fewer than one measure.
    #[error("expect one measure per query, but got {0}")]
    TooManyMeasures(usize),

    /// Left side of IN / NOT IN is not a column reference.
    #[error("lhs of IN or NOT_IN must be a valid column")]
    InNotInOnNonVarRef,

    /// `NOT` over a predicate that cannot be negated (geography_intersects).
    #[error("NOT {0} condition is not allowed")]
    NotForbidden(String),
}

/// Standard AQB result alias.
pub type Result<T> = std::result::Result<T, CompileError>;
