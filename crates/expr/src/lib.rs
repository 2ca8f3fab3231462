//! Expression model for the AQB query compilation core.
//!
//! Architecture role:
//! - defines the typed expression AST shared by the parser and the broker's
//!   rewriter, with canonical text rendering for data-node dispatch
//! - hosts the expression type lattice and the implicit cast engine
//! - lowers `sqlparser` ASTs into the domain AST (the core does no lexing)
//!
//! Key modules:
//! - [`ast`]
//! - [`parser`]
//! - [`types`]

pub mod ast;
pub mod parser;
pub mod types;

pub use ast::{
    call_names, BinaryExpr, BinaryOp, BooleanLiteral, Call, Case, ColumnBinding, Expr,
    GeopointLiteral, NumberLiteral, StringLiteral, UnaryExpr, UnaryOp, VarRef, WhenThen,
};
pub use parser::parse_expr;
pub use types::{cast, expr_type_of, CastFailure, ExprType};
