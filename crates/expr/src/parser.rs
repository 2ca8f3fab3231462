use aqb_common::{CompileError, Result};
use sqlparser::ast::{
    BinaryOperator as SqlBinaryOp, Expr as SqlExpr, Function, FunctionArg, FunctionArgExpr,
    Ident, ObjectName, UnaryOperator as SqlUnaryOp, Value,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;

use crate::ast::{
    call_names, BinaryExpr, BinaryOp, BooleanLiteral, Call, Case, Expr, NumberLiteral,
    StringLiteral, UnaryExpr, UnaryOp, VarRef, WhenThen,
};
use crate::types::ExprType;

/// Parses one expression into the domain AST.
///
/// The resulting tree may contain `Paren` nodes and `Unknown` types; the
/// rewriter removes both. A bare `*` parses to `Wildcard`.
pub fn parse_expr(text: &str) -> Result<Expr> {
    if text.trim() == "*" {
        return Ok(Expr::Wildcard);
    }

    let dialect = GenericDialect {};
    let mut parser = Parser::new(&dialect)
        .try_with_sql(text)
        .map_err(|e| CompileError::Parse(e.to_string()))?;
    let parsed = parser
        .parse_expr()
        .map_err(|e| CompileError::Parse(e.to_string()))?;
    if parser.peek_token().token != Token::EOF {
        return Err(CompileError::Parse(format!(
            "unexpected trailing input in expression {text}"
        )));
    }
    lower_expr(&parsed)
}

fn lower_expr(e: &SqlExpr) -> Result<Expr> {
    match e {
        SqlExpr::Identifier(id) => Ok(Expr::VarRef(VarRef::new(id.value.clone()))),
        SqlExpr::CompoundIdentifier(parts) => {
            Ok(Expr::VarRef(VarRef::new(compound_ident_to_string(parts))))
        }
        SqlExpr::Value(v) => lower_value(v),
        SqlExpr::Nested(inner) => Ok(Expr::Paren(Box::new(lower_expr(inner)?))),
        SqlExpr::UnaryOp { op, expr } => lower_unary(op, expr),
        SqlExpr::IsNull(inner) => Ok(unary(UnaryOp::IsNull, lower_expr(inner)?)),
        SqlExpr::IsNotNull(inner) => Ok(unary(UnaryOp::IsNotNull, lower_expr(inner)?)),
        SqlExpr::IsTrue(inner) => Ok(unary(UnaryOp::IsTrue, lower_expr(inner)?)),
        SqlExpr::IsFalse(inner) => Ok(unary(UnaryOp::IsFalse, lower_expr(inner)?)),
        SqlExpr::BinaryOp { left, op, right } => {
            let bop = lower_binop(op)?;
            Ok(Expr::Binary(BinaryExpr {
                op: bop,
                lhs: Box::new(lower_expr(left)?),
                rhs: Box::new(lower_expr(right)?),
                expr_type: ExprType::Unknown,
            }))
        }
        SqlExpr::InList {
            expr,
            list,
            negated,
        } => {
            let values = list.iter().map(lower_expr).collect::<Result<Vec<_>>>()?;
            Ok(Expr::Binary(BinaryExpr {
                op: if *negated { BinaryOp::NotIn } else { BinaryOp::In },
                lhs: Box::new(lower_expr(expr)?),
                rhs: Box::new(Expr::Call(Call {
                    name: call_names::LIST.to_string(),
                    args: values,
                    expr_type: ExprType::Unknown,
                })),
                expr_type: ExprType::Unknown,
            }))
        }
        SqlExpr::Function(func) => lower_function(func),
        SqlExpr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            if operand.is_some() {
                return Err(CompileError::Parse(
                    "CASE <expr> WHEN ... form is not supported; use CASE WHEN ...".to_string(),
                ));
            }
            if conditions.len() != results.len() {
                return Err(CompileError::Parse(
                    "CASE has mismatched WHEN/THEN branch count".to_string(),
                ));
            }
            let when_thens = conditions
                .iter()
                .zip(results.iter())
                .map(|(when, then)| {
                    Ok(WhenThen {
                        when: lower_expr(when)?,
                        then: lower_expr(then)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let else_expr = else_result
                .as_deref()
                .map(lower_expr)
                .transpose()?
                .map(Box::new);
            Ok(Expr::Case(Case {
                when_thens,
                else_expr,
                expr_type: ExprType::Unknown,
            }))
        }
        other => Err(CompileError::Parse(format!(
            "unsupported expression {other}"
        ))),
    }
}

fn lower_unary(op: &SqlUnaryOp, operand: &SqlExpr) -> Result<Expr> {
    let child = lower_expr(operand)?;
    Ok(match op {
        SqlUnaryOp::Plus => child,
        SqlUnaryOp::Minus => unary(UnaryOp::UnaryMinus, child),
        SqlUnaryOp::Not => unary(UnaryOp::Not, child),
        SqlUnaryOp::PGBitwiseNot => unary(UnaryOp::BitwiseNot, child),
        other => {
            return Err(CompileError::UnsupportedUnaryOp(other.to_string()));
        }
    })
}

fn lower_binop(op: &SqlBinaryOp) -> Result<BinaryOp> {
    Ok(match op {
        SqlBinaryOp::Plus => BinaryOp::Add,
        SqlBinaryOp::Minus => BinaryOp::Sub,
        SqlBinaryOp::Multiply => BinaryOp::Mul,
        SqlBinaryOp::Divide => BinaryOp::Div,
        SqlBinaryOp::Modulo => BinaryOp::Mod,
        SqlBinaryOp::BitwiseAnd => BinaryOp::BitwiseAnd,
        SqlBinaryOp::BitwiseOr => BinaryOp::BitwiseOr,
        SqlBinaryOp::BitwiseXor => BinaryOp::BitwiseXor,
        SqlBinaryOp::PGBitwiseShiftLeft => BinaryOp::BitwiseLeftShift,
        SqlBinaryOp::PGBitwiseShiftRight => BinaryOp::BitwiseRightShift,
        SqlBinaryOp::And => BinaryOp::And,
        SqlBinaryOp::Or => BinaryOp::Or,
        SqlBinaryOp::Lt => BinaryOp::Lt,
        SqlBinaryOp::LtEq => BinaryOp::Lte,
        SqlBinaryOp::Gt => BinaryOp::Gt,
        SqlBinaryOp::GtEq => BinaryOp::Gte,
        SqlBinaryOp::Eq => BinaryOp::Eq,
        SqlBinaryOp::NotEq => BinaryOp::Neq,
        other => {
            return Err(CompileError::UnsupportedBinaryOp(other.to_string()));
        }
    })
}

fn lower_value(v: &Value) -> Result<Expr> {
    match v {
        Value::Number(text, _) => {
            if text.contains('.') || text.contains('e') || text.contains('E') {
                let val: f64 = text
                    .parse()
                    .map_err(|_| CompileError::Parse(format!("bad number literal {text}")))?;
                Ok(Expr::NumberLiteral(NumberLiteral {
                    int: val as i64,
                    text: text.clone(),
                    expr_type: ExprType::Float,
                }))
            } else {
                let int: i64 = text
                    .parse()
                    .map_err(|_| CompileError::Parse(format!("bad number literal {text}")))?;
                Ok(Expr::NumberLiteral(NumberLiteral {
                    int,
                    text: text.clone(),
                    expr_type: ExprType::Unsigned,
                }))
            }
        }
        Value::SingleQuotedString(s) => Ok(Expr::StringLiteral(StringLiteral { val: s.clone() })),
        Value::Boolean(b) => Ok(Expr::BooleanLiteral(BooleanLiteral { val: *b })),
        other => Err(CompileError::Parse(format!("unsupported literal {other}"))),
    }
}

fn lower_function(func: &Function) -> Result<Expr> {
    let name = object_name_to_string(&func.name).to_ascii_lowercase();
    let args = lower_function_args(func)?;

    // Calendar extractors and get_hll_value are unary operators that use
    // call spelling in query text.
    if let Some(op) = UnaryOp::from_call_name(&name) {
        if args.len() != 1 {
            return Err(CompileError::Arity {
                name,
                expected: 1,
                got: args.len(),
            });
        }
        let child = args.into_iter().next().expect("one argument");
        return Ok(unary(op, child));
    }

    Ok(Expr::Call(Call {
        name,
        args,
        expr_type: ExprType::Unknown,
    }))
}

fn lower_function_args(func: &Function) -> Result<Vec<Expr>> {
    func.args
        .iter()
        .map(|arg| match arg {
            FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => lower_expr(e),
            FunctionArg::Unnamed(FunctionArgExpr::Wildcard) => Ok(Expr::Wildcard),
            other => Err(CompileError::Parse(format!(
                "unsupported function argument {other}"
            ))),
        })
        .collect()
}

fn unary(op: UnaryOp, child: Expr) -> Expr {
    Expr::Unary(UnaryExpr {
        op,
        child: Box::new(child),
        expr_type: ExprType::Unknown,
    })
}

fn compound_ident_to_string(parts: &[Ident]) -> String {
    parts
        .iter()
        .map(|p| p.value.clone())
        .collect::<Vec<_>>()
        .join(".")
}

fn object_name_to_string(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|p| p.value.clone())
        .collect::<Vec<_>>()
        .join(".")
}
