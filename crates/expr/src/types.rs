use std::fmt;

use aqb_catalog::DataType;
use aqb_common::CompileError;

use crate::ast::{Expr, UnaryExpr, UnaryOp};

/// Expression type attached to every AST node by the rewriter.
///
/// The derived order is the widening lattice: `Boolean < Unsigned < Signed
/// < Float`. `GeoPoint` and `GeoShape` are leaves that never widen;
/// `Unknown` marks nodes the rewriter has not resolved yet and must not
/// survive in a well-formed output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ExprType {
    #[default]
    Unknown,
    Boolean,
    Unsigned,
    Signed,
    Float,
    GeoPoint,
    GeoShape,
}

impl ExprType {
    /// The common type both operands of a binary op are widened to.
    pub fn widen(self, other: ExprType) -> ExprType {
        self.max(other)
    }
}

impl fmt::Display for ExprType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExprType::Unknown => "unknown",
            ExprType::Boolean => "boolean",
            ExprType::Unsigned => "unsigned",
            ExprType::Signed => "signed",
            ExprType::Float => "float",
            ExprType::GeoPoint => "geopoint",
            ExprType::GeoShape => "geoshape",
        };
        f.write_str(name)
    }
}

/// Expression type of a storage column type.
pub fn expr_type_of(data_type: &DataType) -> ExprType {
    match data_type {
        DataType::Bool => ExprType::Boolean,
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => ExprType::Signed,
        DataType::Uint8 | DataType::Uint16 | DataType::Uint32 | DataType::Uuid => {
            ExprType::Unsigned
        }
        DataType::Float32 => ExprType::Float,
        DataType::GeoPoint => ExprType::GeoPoint,
        DataType::GeoShape => ExprType::GeoShape,
        DataType::ArrayOf(elem) => expr_type_of(elem),
    }
}

/// A cast that could not be applied; hands the untouched expression back so
/// the caller can keep its node-unchanged error contract.
#[derive(Debug)]
pub struct CastFailure {
    pub expr: Expr,
    pub error: CompileError,
}

/// Implicitly casts `e` to `to`.
///
/// Identity when the types already match. Number literals are retyped in
/// place; any other node is wrapped in a synthesized cast node (re-casting
/// a cast retargets it instead of nesting). The only rejected cast is
/// boolean from a geo-typed expression.
pub fn cast(e: Expr, to: ExprType) -> Result<Expr, CastFailure> {
    let from = e.expr_type();
    if from == to {
        return Ok(e);
    }
    if to == ExprType::Boolean && matches!(from, ExprType::GeoPoint | ExprType::GeoShape) {
        let error = CompileError::Type(format!("cannot cast {from} expression {e} to boolean"));
        return Err(CastFailure { expr: e, error });
    }
    Ok(match e {
        Expr::NumberLiteral(mut n) => {
            n.expr_type = to;
            Expr::NumberLiteral(n)
        }
        Expr::Unary(u) if u.op == UnaryOp::Cast => Expr::Unary(UnaryExpr {
            op: UnaryOp::Cast,
            child: u.child,
            expr_type: to,
        }),
        other => Expr::Unary(UnaryExpr {
            op: UnaryOp::Cast,
            child: Box::new(other),
            expr_type: to,
        }),
    })
}
