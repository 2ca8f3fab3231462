use std::fmt;
use std::sync::Arc;

use aqb_catalog::{DataType, EnumDict};

use crate::types::ExprType;

/// Names of the call-style functions the rewriter recognizes.
pub mod call_names {
    pub const AVG: &str = "avg";
    pub const CONTAINS: &str = "contains";
    pub const CONVERT_TZ: &str = "convert_tz";
    pub const COUNT: &str = "count";
    pub const COUNT_DISTINCT_HLL: &str = "countdistincthll";
    pub const DAY_OF_WEEK: &str = "dayofweek";
    pub const ELEMENT_AT: &str = "element_at";
    pub const FROM_UNIXTIME: &str = "from_unixtime";
    pub const GEOGRAPHY_INTERSECTS: &str = "geography_intersects";
    pub const HEX: &str = "hex";
    pub const HLL: &str = "hll";
    pub const HOUR: &str = "hour";
    pub const LENGTH: &str = "length";
    pub const LIST: &str = "list";
    pub const MAX: &str = "max";
    pub const MIN: &str = "min";
    pub const SUM: &str = "sum";
}

/// Unary operator tokens.
///
/// `Cast` is synthesized by the cast engine and never produced by the
/// parser; the calendar extractors and `GetHllValue` parse from their
/// call-style spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Exclamation,
    IsTrue,
    IsFalse,
    IsNull,
    IsNotNull,
    UnaryMinus,
    BitwiseNot,
    GetMonthStart,
    GetQuarterStart,
    GetYearStart,
    GetWeekStart,
    GetDayOfMonth,
    GetDayOfYear,
    GetMonthOfYear,
    GetQuarterOfYear,
    GetHllValue,
    Cast,
}

impl UnaryOp {
    /// Call-style spelling for operators that parse and render as calls.
    pub fn call_name(self) -> Option<&'static str> {
        Some(match self {
            UnaryOp::GetMonthStart => "get_month_start",
            UnaryOp::GetQuarterStart => "get_quarter_start",
            UnaryOp::GetYearStart => "get_year_start",
            UnaryOp::GetWeekStart => "get_week_start",
            UnaryOp::GetDayOfMonth => "get_day_of_month",
            UnaryOp::GetDayOfYear => "get_day_of_year",
            UnaryOp::GetMonthOfYear => "get_month_of_year",
            UnaryOp::GetQuarterOfYear => "get_quarter_of_year",
            UnaryOp::GetHllValue => "get_hll_value",
            _ => return None,
        })
    }

    /// Inverse of [`UnaryOp::call_name`].
    pub fn from_call_name(name: &str) -> Option<UnaryOp> {
        Some(match name {
            "get_month_start" => UnaryOp::GetMonthStart,
            "get_quarter_start" => UnaryOp::GetQuarterStart,
            "get_year_start" => UnaryOp::GetYearStart,
            "get_week_start" => UnaryOp::GetWeekStart,
            "get_day_of_month" => UnaryOp::GetDayOfMonth,
            "get_day_of_year" => UnaryOp::GetDayOfYear,
            "get_month_of_year" => UnaryOp::GetMonthOfYear,
            "get_quarter_of_year" => UnaryOp::GetQuarterOfYear,
            "get_hll_value" => UnaryOp::GetHllValue,
            _ => return None,
        })
    }
}

/// Binary operator tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    BitwiseLeftShift,
    BitwiseRightShift,
    And,
    Or,
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Neq,
    In,
    NotIn,
    Floor,
    ConvertTz,
}

impl BinaryOp {
    /// Operators subject to the four-byte column restriction.
    ///
    /// `BitwiseRightShift` is deliberately exempt; the restriction window
    /// has always closed at the left shift.
    pub fn blocks_wide_columns(self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Sub
                | BinaryOp::Mul
                | BinaryOp::Div
                | BinaryOp::Mod
                | BinaryOp::BitwiseAnd
                | BinaryOp::BitwiseOr
                | BinaryOp::BitwiseXor
                | BinaryOp::BitwiseLeftShift
        )
    }

    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::BitwiseAnd => "&",
            BinaryOp::BitwiseOr => "|",
            BinaryOp::BitwiseXor => "^",
            BinaryOp::BitwiseLeftShift => "<<",
            BinaryOp::BitwiseRightShift => ">>",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::Eq => "=",
            BinaryOp::Neq => "!=",
            BinaryOp::In => "IN",
            BinaryOp::NotIn => "NOT IN",
            BinaryOp::Floor => "FLOOR",
            BinaryOp::ConvertTz => "CONVERT_TZ",
        }
    }
}

/// Integer or decimal literal. `text` preserves the source spelling for
/// canonical rendering; `int` carries the value the rewriter computes with.
#[derive(Debug, Clone, PartialEq)]
pub struct NumberLiteral {
    pub int: i64,
    pub text: String,
    pub expr_type: ExprType,
}

impl NumberLiteral {
    /// An unsigned integer literal synthesized by the rewriter.
    pub fn unsigned(int: i64) -> Self {
        Self {
            int,
            text: int.to_string(),
            expr_type: ExprType::Unsigned,
        }
    }
}

/// Untyped quoted string; only meaningful in the narrow positions the
/// rewriter translates (enum equality, timezone names, geo-point text).
#[derive(Debug, Clone, PartialEq)]
pub struct StringLiteral {
    pub val: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BooleanLiteral {
    pub val: bool,
}

/// `(lat, lng)` literal; produced by the rewriter, never by the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct GeopointLiteral {
    pub val: (f32, f32),
}

/// Resolution state filled into a [`VarRef`] by the rewriter.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnBinding {
    pub table_id: usize,
    pub column_id: usize,
    pub data_type: DataType,
    pub enum_dict: Option<Arc<EnumDict>>,
    pub is_hll_column: bool,
}

/// Column reference, optionally qualified as `alias.column`.
#[derive(Debug, Clone, PartialEq)]
pub struct VarRef {
    pub name: String,
    pub expr_type: ExprType,
    /// `None` until the rewriter resolves the identifier.
    pub binding: Option<ColumnBinding>,
}

impl VarRef {
    /// An unresolved reference, as the parser produces it.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expr_type: ExprType::Unknown,
            binding: None,
        }
    }

    /// Whether the reference resolved to a UUID column.
    pub fn is_uuid_column(&self) -> bool {
        self.binding
            .as_ref()
            .is_some_and(|b| b.data_type == DataType::Uuid)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnaryExpr {
    pub op: UnaryOp,
    pub child: Box<Expr>,
    pub expr_type: ExprType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpr {
    pub op: BinaryOp,
    pub lhs: Box<Expr>,
    pub rhs: Box<Expr>,
    pub expr_type: ExprType,
}

/// Named function call; `name` is always lowercased.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub name: String,
    pub args: Vec<Expr>,
    pub expr_type: ExprType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhenThen {
    pub when: Expr,
    pub then: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Case {
    pub when_thens: Vec<WhenThen>,
    pub else_expr: Option<Box<Expr>>,
    pub expr_type: ExprType,
}

/// The expression tree.
///
/// `Paren` exists only between parse and rewrite; `Wildcard` is legal only
/// as a dimension of a non-aggregation query and expands before rewriting.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    NumberLiteral(NumberLiteral),
    StringLiteral(StringLiteral),
    BooleanLiteral(BooleanLiteral),
    GeopointLiteral(GeopointLiteral),
    VarRef(VarRef),
    Unary(UnaryExpr),
    Binary(BinaryExpr),
    Call(Call),
    Case(Case),
    Paren(Box<Expr>),
    Wildcard,
}

impl Expr {
    /// The inferred type of this node; `Unknown` before rewriting.
    pub fn expr_type(&self) -> ExprType {
        match self {
            Expr::NumberLiteral(n) => n.expr_type,
            Expr::StringLiteral(_) => ExprType::Unknown,
            Expr::BooleanLiteral(_) => ExprType::Boolean,
            Expr::GeopointLiteral(_) => ExprType::GeoPoint,
            Expr::VarRef(v) => v.expr_type,
            Expr::Unary(u) => u.expr_type,
            Expr::Binary(b) => b.expr_type,
            Expr::Call(c) => c.expr_type,
            Expr::Case(c) => c.expr_type,
            Expr::Paren(child) => child.expr_type(),
            Expr::Wildcard => ExprType::Unknown,
        }
    }

    /// Borrow as a column reference if this node is one.
    pub fn as_var_ref(&self) -> Option<&VarRef> {
        match self {
            Expr::VarRef(v) => Some(v),
            _ => None,
        }
    }

    /// Whether this node references a UUID column.
    pub fn is_uuid_column(&self) -> bool {
        self.as_var_ref().is_some_and(VarRef::is_uuid_column)
    }

    /// Strips synthesized cast wrappers and parentheses.
    pub fn unwrapped(&self) -> &Expr {
        match self {
            Expr::Paren(child) => child.unwrapped(),
            Expr::Unary(u) if u.op == UnaryOp::Cast => u.child.unwrapped(),
            other => other,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::NumberLiteral(n) => f.write_str(&n.text),
            Expr::StringLiteral(s) => write!(f, "'{}'", s.val.replace('\'', "''")),
            Expr::BooleanLiteral(b) => f.write_str(if b.val { "true" } else { "false" }),
            Expr::GeopointLiteral(g) => write!(f, "point({}, {})", g.val.0, g.val.1),
            Expr::VarRef(v) => f.write_str(&v.name),
            Expr::Unary(u) => match u.op {
                UnaryOp::Not => write!(f, "NOT {}", u.child),
                UnaryOp::Exclamation => write!(f, "!{}", u.child),
                UnaryOp::UnaryMinus => write!(f, "-{}", u.child),
                UnaryOp::BitwiseNot => write!(f, "~{}", u.child),
                UnaryOp::IsTrue => write!(f, "{} IS TRUE", u.child),
                UnaryOp::IsFalse => write!(f, "{} IS FALSE", u.child),
                UnaryOp::IsNull => write!(f, "{} IS NULL", u.child),
                UnaryOp::IsNotNull => write!(f, "{} IS NOT NULL", u.child),
                // The serialized form carries no cast syntax; data nodes
                // re-derive casts when they recompile the expression.
                UnaryOp::Cast => write!(f, "{}", u.child),
                op => write!(
                    f,
                    "{}({})",
                    op.call_name().expect("call-style unary op"),
                    u.child
                ),
            },
            Expr::Binary(b) => match b.op {
                BinaryOp::In | BinaryOp::NotIn => {
                    write!(f, "{} {} {}", b.lhs, b.op.symbol(), b.rhs)
                }
                BinaryOp::Floor => write!(f, "floor({}, {})", b.lhs, b.rhs),
                BinaryOp::ConvertTz => write!(f, "convert_tz({}, {})", b.lhs, b.rhs),
                _ => write!(f, "({} {} {})", b.lhs, b.op.symbol(), b.rhs),
            },
            Expr::Call(c) => {
                write!(f, "{}(", c.name)?;
                for (i, arg) in c.args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Expr::Case(c) => {
                f.write_str("CASE")?;
                for wt in &c.when_thens {
                    write!(f, " WHEN {} THEN {}", wt.when, wt.then)?;
                }
                if let Some(else_expr) = &c.else_expr {
                    write!(f, " ELSE {else_expr}")?;
                }
                f.write_str(" END")
            }
            Expr::Paren(child) => write!(f, "({child})"),
            Expr::Wildcard => f.write_str("*"),
        }
    }
}
