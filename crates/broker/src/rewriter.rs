use aqb_catalog::{geo_point_from_string, DataType};
use aqb_common::CompileError;
use aqb_expr::{
    call_names, cast, expr_type_of, BinaryExpr, BinaryOp, BooleanLiteral, Call, Case,
    ColumnBinding, Expr, ExprType, GeopointLiteral, NumberLiteral, UnaryExpr, UnaryOp, VarRef,
    WhenThen,
};
use chrono::Offset;
use chrono_tz::Tz;

use crate::context::QueryContext;
use crate::{DAYS_PER_WEEK, SECONDS_PER_DAY, SECONDS_PER_HOUR, WEEKDAY_OFFSET};

impl QueryContext {
    /// Walks the expression tree and resolves identifiers and types bottom
    /// up. Also translates enum strings, normalizes operators, expands the
    /// macro-style functions, and enforces the domain validation rules.
    ///
    /// Errors stick in the context and leave the offending node unchanged;
    /// once one is set the walk becomes a no-op.
    pub fn rewrite(&mut self, e: Expr) -> Expr {
        if self.error.is_some() {
            return e;
        }
        let e = self.rewrite_children(e);
        if self.error.is_some() {
            return e;
        }
        self.rewrite_node(e)
    }

    /// Children first, so parent rules see final child types.
    fn rewrite_children(&mut self, e: Expr) -> Expr {
        match e {
            Expr::Paren(child) => Expr::Paren(Box::new(self.rewrite(*child))),
            Expr::Unary(mut u) => {
                u.child = Box::new(self.rewrite(*u.child));
                Expr::Unary(u)
            }
            Expr::Binary(mut b) => {
                b.lhs = Box::new(self.rewrite(*b.lhs));
                b.rhs = Box::new(self.rewrite(*b.rhs));
                Expr::Binary(b)
            }
            Expr::Call(mut c) => {
                c.args = c.args.into_iter().map(|arg| self.rewrite(arg)).collect();
                Expr::Call(c)
            }
            Expr::Case(mut c) => {
                c.when_thens = c
                    .when_thens
                    .into_iter()
                    .map(|wt| WhenThen {
                        when: self.rewrite(wt.when),
                        then: self.rewrite(wt.then),
                    })
                    .collect();
                if let Some(else_expr) = c.else_expr.take() {
                    c.else_expr = Some(Box::new(self.rewrite(*else_expr)));
                }
                Expr::Case(c)
            }
            leaf => leaf,
        }
    }

    fn rewrite_node(&mut self, e: Expr) -> Expr {
        match e {
            // Strip parenthesis from the input.
            Expr::Paren(child) => *child,
            Expr::VarRef(v) => self.rewrite_var_ref(v),
            Expr::Unary(u) => self.rewrite_unary(u),
            Expr::Binary(b) => self.rewrite_binary(b),
            Expr::Call(c) => self.rewrite_call(c),
            Expr::Case(c) => self.rewrite_case(c),
            leaf => leaf,
        }
    }

    fn resolve_column(&self, identifier: &str) -> Result<(usize, usize), CompileError> {
        let (table_alias, column) = match identifier.split_once('.') {
            Some((alias, column)) => (alias, column),
            None => (self.query.table.as_str(), identifier),
        };

        let table_id = *self
            .table_id_by_alias
            .get(table_alias)
            .ok_or_else(|| CompileError::UnknownTable(format!("alias {table_alias}")))?;
        let column_id = *self.tables[table_id]
            .column_ids
            .get(column)
            .ok_or_else(|| CompileError::UnknownColumn {
                column: column.to_string(),
                table: table_alias.to_string(),
            })?;
        Ok((table_id, column_id))
    }

    fn rewrite_var_ref(&mut self, mut v: VarRef) -> Expr {
        let (table_id, column_id) = match self.resolve_column(&v.name) {
            Ok(ids) => ids,
            Err(err) => {
                self.fail(err);
                return Expr::VarRef(v);
            }
        };
        let schema = &self.tables[table_id];
        let column = &schema.columns[column_id];
        if column.deleted {
            self.fail(CompileError::DeletedColumn {
                column: column.name.clone(),
                table: schema.name.clone(),
            });
            return Expr::VarRef(v);
        }
        v.expr_type = expr_type_of(&column.data_type);
        v.binding = Some(ColumnBinding {
            table_id,
            column_id,
            data_type: column.data_type.clone(),
            enum_dict: schema.enum_dicts.get(&column.name).cloned(),
            is_hll_column: column.hll_config.is_hll_column,
        });
        Expr::VarRef(v)
    }

    fn rewrite_unary(&mut self, mut u: UnaryExpr) -> Expr {
        if u.child.is_uuid_column() && u.op != UnaryOp::GetHllValue {
            self.fail(CompileError::UuidOpRestricted);
            return Expr::Unary(u);
        }
        if let Some(err) = block_oversize_unary(u.op, &u.child) {
            self.fail(err);
            return Expr::Unary(u);
        }

        u.expr_type = u.child.expr_type();
        match u.op {
            UnaryOp::Exclamation | UnaryOp::Not | UnaryOp::IsFalse => {
                // Normalize the operator.
                u.op = UnaryOp::Not;
                u.expr_type = ExprType::Boolean;
                u.child = Box::new(self.cast_expr(*u.child, ExprType::Boolean));
                if let Expr::Call(call) = u.child.as_ref() {
                    if call.name == call_names::GEOGRAPHY_INTERSECTS {
                        self.fail(CompileError::NotForbidden(
                            call_names::GEOGRAPHY_INTERSECTS.to_string(),
                        ));
                    }
                }
                Expr::Unary(u)
            }
            UnaryOp::UnaryMinus => {
                // Upgrade to signed.
                if u.expr_type < ExprType::Signed {
                    u.expr_type = ExprType::Signed;
                }
                Expr::Unary(u)
            }
            UnaryOp::IsNull | UnaryOp::IsNotNull => {
                u.expr_type = ExprType::Boolean;
                Expr::Unary(u)
            }
            UnaryOp::IsTrue => {
                // Strip IS TRUE if the child is already boolean.
                if u.child.expr_type() == ExprType::Boolean {
                    return *u.child;
                }
                // Otherwise rewrite to NOT(NOT(child)).
                u.op = UnaryOp::Not;
                u.expr_type = ExprType::Boolean;
                u.child = Box::new(self.cast_expr(*u.child, ExprType::Boolean));
                Expr::Unary(UnaryExpr {
                    op: UnaryOp::Not,
                    child: Box::new(Expr::Unary(u)),
                    expr_type: ExprType::Boolean,
                })
            }
            UnaryOp::BitwiseNot
            | UnaryOp::GetMonthStart
            | UnaryOp::GetQuarterStart
            | UnaryOp::GetYearStart
            | UnaryOp::GetWeekStart
            | UnaryOp::GetDayOfMonth
            | UnaryOp::GetDayOfYear
            | UnaryOp::GetMonthOfYear
            | UnaryOp::GetQuarterOfYear
            | UnaryOp::GetHllValue => {
                u.expr_type = ExprType::Unsigned;
                u.child = Box::new(self.cast_expr(*u.child, ExprType::Unsigned));
                Expr::Unary(u)
            }
            // Synthesized by the cast engine; already typed.
            UnaryOp::Cast => Expr::Unary(u),
        }
    }

    fn rewrite_binary(&mut self, mut b: BinaryExpr) -> Expr {
        if let Some(err) = block_oversize_binary(b.op, &b.lhs, &b.rhs) {
            self.fail(err);
            return Expr::Binary(b);
        }

        if b.op != BinaryOp::Eq && b.op != BinaryOp::Neq {
            let lhs_is_string = matches!(b.lhs.as_ref(), Expr::StringLiteral(_));
            let rhs_is_string = matches!(b.rhs.as_ref(), Expr::StringLiteral(_));
            if lhs_is_string || rhs_is_string {
                self.fail(CompileError::StringOnlyEqNeq);
                return Expr::Binary(b);
            }
        }

        let highest = b.lhs.expr_type().widen(b.rhs.expr_type());
        match b.op {
            BinaryOp::Add | BinaryOp::Sub => {
                b.expr_type = highest;
                if highest == ExprType::Float {
                    b.lhs = Box::new(self.cast_expr(*b.lhs, ExprType::Float));
                    b.rhs = Box::new(self.cast_expr(*b.rhs, ExprType::Float));
                } else if b.op == BinaryOp::Sub {
                    // lhs - rhs can go negative; upgrade to signed at least.
                    b.expr_type = ExprType::Signed;
                }
                Expr::Binary(b)
            }
            BinaryOp::Mul | BinaryOp::Mod => {
                b.expr_type = highest;
                b.lhs = Box::new(self.cast_expr(*b.lhs, highest));
                b.rhs = Box::new(self.cast_expr(*b.rhs, highest));
                Expr::Binary(b)
            }
            BinaryOp::Div => {
                b.expr_type = ExprType::Float;
                b.lhs = Box::new(self.cast_expr(*b.lhs, ExprType::Float));
                b.rhs = Box::new(self.cast_expr(*b.rhs, ExprType::Float));
                Expr::Binary(b)
            }
            BinaryOp::BitwiseAnd
            | BinaryOp::BitwiseOr
            | BinaryOp::BitwiseXor
            | BinaryOp::BitwiseLeftShift
            | BinaryOp::BitwiseRightShift
            | BinaryOp::Floor
            | BinaryOp::ConvertTz => {
                b.expr_type = ExprType::Unsigned;
                b.lhs = Box::new(self.cast_expr(*b.lhs, ExprType::Unsigned));
                b.rhs = Box::new(self.cast_expr(*b.rhs, ExprType::Unsigned));
                Expr::Binary(b)
            }
            BinaryOp::And | BinaryOp::Or => {
                b.expr_type = ExprType::Boolean;
                b.lhs = Box::new(self.cast_expr(*b.lhs, ExprType::Boolean));
                b.rhs = Box::new(self.cast_expr(*b.rhs, ExprType::Boolean));
                Expr::Binary(b)
            }
            BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => {
                b.expr_type = ExprType::Boolean;
                b.lhs = Box::new(self.cast_expr(*b.lhs, highest));
                b.rhs = Box::new(self.cast_expr(*b.rhs, highest));
                Expr::Binary(b)
            }
            BinaryOp::Eq | BinaryOp::Neq => self.rewrite_equality(b, highest),
            BinaryOp::In => self.expand_in_op(b),
            BinaryOp::NotIn => {
                let expanded = self.expand_in_op(b);
                match expanded {
                    Expr::BooleanLiteral(lit) => {
                        Expr::BooleanLiteral(BooleanLiteral { val: !lit.val })
                    }
                    chain => Expr::Unary(UnaryExpr {
                        op: UnaryOp::Not,
                        child: Box::new(chain),
                        expr_type: ExprType::Boolean,
                    }),
                }
            }
        }
    }

    fn rewrite_equality(&mut self, mut b: BinaryExpr, highest: ExprType) -> Expr {
        // Canonicalize so a column reference sits on the left when exactly
        // one side is one.
        if b.lhs.as_var_ref().is_none() && b.rhs.as_var_ref().is_some() {
            std::mem::swap(&mut b.lhs, &mut b.rhs);
        }
        b.expr_type = ExprType::Boolean;

        // column = true|false reduces to IS TRUE / NOT.
        if b.lhs.as_var_ref().is_some() {
            if let Expr::BooleanLiteral(rhs_bool) = b.rhs.as_ref() {
                let truthy = (b.op == BinaryOp::Eq && rhs_bool.val)
                    || (b.op == BinaryOp::Neq && !rhs_bool.val);
                let op = if truthy { UnaryOp::IsTrue } else { UnaryOp::Not };
                return Expr::Unary(UnaryExpr {
                    op,
                    child: b.lhs,
                    expr_type: ExprType::Boolean,
                });
            }
        }

        // enum_column = 'case' translates through the dictionary. A missing
        // case matches against -1: nullable data under NOT/AND/OR makes an
        // unmatchable sentinel the safe substitute.
        let mut enum_value: Option<i64> = None;
        if let (Some(lhs_var), Expr::StringLiteral(rhs_str)) =
            (b.lhs.as_var_ref(), b.rhs.as_ref())
        {
            if let Some(dict) = lhs_var
                .binding
                .as_ref()
                .and_then(|binding| binding.enum_dict.as_ref())
            {
                enum_value = Some(dict.dict.get(&rhs_str.val).copied().unwrap_or(-1));
            }
        }
        if let Some(value) = enum_value {
            b.rhs = Box::new(Expr::NumberLiteral(NumberLiteral {
                int: value,
                text: value.to_string(),
                expr_type: ExprType::Unsigned,
            }));
            return Expr::Binary(b);
        }

        let lhs_is_geo_point = b
            .lhs
            .as_var_ref()
            .and_then(|var| var.binding.as_ref())
            .is_some_and(|binding| binding.data_type == DataType::GeoPoint);
        let rhs_string = match b.rhs.as_ref() {
            Expr::StringLiteral(s) => Some(s.val.clone()),
            _ => None,
        };

        b.lhs = Box::new(self.cast_expr(*b.lhs, highest));
        b.rhs = Box::new(self.cast_expr(*b.rhs, highest));

        if let Some(text) = rhs_string {
            if lhs_is_geo_point {
                match geo_point_from_string(&text) {
                    Ok(val) => b.rhs = Box::new(Expr::GeopointLiteral(GeopointLiteral { val })),
                    Err(err) => self.fail(err),
                }
            }
        }
        Expr::Binary(b)
    }

    /// Expands `lhs IN list(...)` into a left-associated OR chain of
    /// equality predicates, each run through the rewriter so enum and geo
    /// translation apply per element. An empty list folds to `false`.
    fn expand_in_op(&mut self, b: BinaryExpr) -> Expr {
        if b.lhs.as_var_ref().is_none() {
            self.fail(CompileError::InNotInOnNonVarRef);
            return Expr::Binary(b);
        }
        let BinaryExpr {
            op,
            lhs,
            rhs,
            expr_type,
        } = b;
        let list = match *rhs {
            Expr::Call(list) => list,
            other => {
                self.fail(CompileError::ArgShape(
                    "rhs of IN or NOT_IN must be a list of values".to_string(),
                ));
                return Expr::Binary(BinaryExpr {
                    op,
                    lhs,
                    rhs: Box::new(other),
                    expr_type,
                });
            }
        };

        let mut expanded = Expr::BooleanLiteral(BooleanLiteral { val: false });
        for value in list.args {
            let equality = Expr::Binary(BinaryExpr {
                op: BinaryOp::Eq,
                lhs: lhs.clone(),
                rhs: Box::new(value),
                expr_type: ExprType::Unknown,
            });
            let rewritten = self.rewrite(equality);
            expanded = match expanded {
                Expr::BooleanLiteral(_) => rewritten,
                chain => Expr::Binary(BinaryExpr {
                    op: BinaryOp::Or,
                    lhs: Box::new(chain),
                    rhs: Box::new(rewritten),
                    expr_type: ExprType::Boolean,
                }),
            };
        }
        expanded
    }

    fn rewrite_call(&mut self, mut c: Call) -> Expr {
        c.name.make_ascii_lowercase();
        let name = c.name.clone();
        match name.as_str() {
            call_names::CONVERT_TZ => self.rewrite_convert_tz(c),
            call_names::COUNT => {
                c.expr_type = ExprType::Unsigned;
                Expr::Call(c)
            }
            call_names::DAY_OF_WEEK => {
                if c.args.len() != 1 {
                    self.fail(CompileError::BadDayOfWeek);
                    return Expr::Call(c);
                }
                let ts = c.args.remove(0);
                // dayofweek(ts) = (ts / secondsPerDay + 4) % 7 + 1, with
                // Thursday epoch alignment and 1-based Sunday.
                unsigned_binary(
                    BinaryOp::Add,
                    unsigned_binary(
                        BinaryOp::Mod,
                        unsigned_binary(
                            BinaryOp::Add,
                            unsigned_binary(BinaryOp::Div, ts, unsigned_literal(SECONDS_PER_DAY)),
                            unsigned_literal(WEEKDAY_OFFSET),
                        ),
                        unsigned_literal(DAYS_PER_WEEK),
                    ),
                    unsigned_literal(1),
                )
            }
            call_names::FROM_UNIXTIME => self.rewrite_from_unixtime(c),
            call_names::HOUR => {
                if c.args.len() != 1 {
                    self.fail(CompileError::Arity {
                        name: c.name.clone(),
                        expected: 1,
                        got: c.args.len(),
                    });
                    return Expr::Call(c);
                }
                let ts = c.args.remove(0);
                // hour(ts) = (ts % secondsPerDay) / secondsPerHour
                unsigned_binary(
                    BinaryOp::Div,
                    unsigned_binary(BinaryOp::Mod, ts, unsigned_literal(SECONDS_PER_DAY)),
                    unsigned_literal(SECONDS_PER_HOUR),
                )
            }
            // List of literals used as the IN right-hand side; nothing to
            // cast here.
            call_names::LIST => Expr::Call(c),
            call_names::GEOGRAPHY_INTERSECTS => self.rewrite_geography_intersects(c),
            call_names::HEX => {
                if c.args.len() != 1 {
                    self.fail(CompileError::Arity {
                        name: c.name.clone(),
                        expected: 1,
                        got: c.args.len(),
                    });
                    return Expr::Call(c);
                }
                let is_uuid = c.args[0].is_uuid_column();
                if !is_uuid {
                    self.fail(CompileError::ArgShape(format!(
                        "expect 1 argument to be a valid uuid column for hex, but got {}",
                        c.args[0]
                    )));
                    return Expr::Call(c);
                }
                c.expr_type = c.args[0].expr_type();
                Expr::Call(c)
            }
            call_names::COUNT_DISTINCT_HLL => {
                if c.args.len() != 1 {
                    self.fail(CompileError::Arity {
                        name: c.name.clone(),
                        expected: 1,
                        got: c.args.len(),
                    });
                    return Expr::Call(c);
                }
                let is_hll_column = match c.args[0].as_var_ref() {
                    Some(var) => var
                        .binding
                        .as_ref()
                        .is_some_and(|binding| binding.is_hll_column),
                    None => {
                        self.fail(CompileError::ArgShape(
                            "expect 1 argument to be a column for countdistincthll".to_string(),
                        ));
                        return Expr::Call(c);
                    }
                };
                c.name = call_names::HLL.to_string();
                // No-op on a sketch column; lift anything else into a
                // sketch at query time.
                if !is_hll_column {
                    let column = c.args.remove(0);
                    c.args.push(Expr::Unary(UnaryExpr {
                        op: UnaryOp::GetHllValue,
                        child: Box::new(column),
                        expr_type: ExprType::Unsigned,
                    }));
                }
                c.expr_type = ExprType::Unsigned;
                Expr::Call(c)
            }
            call_names::HLL => {
                if c.args.len() != 1 {
                    self.fail(CompileError::Arity {
                        name: c.name.clone(),
                        expected: 1,
                        got: c.args.len(),
                    });
                    return Expr::Call(c);
                }
                let is_sketch = c.args[0]
                    .as_var_ref()
                    .and_then(|var| var.binding.as_ref())
                    .is_some_and(|binding| binding.data_type == DataType::Uint32);
                if !is_sketch {
                    self.fail(CompileError::HllColumnTypeMismatch(c.args[0].to_string()));
                    return Expr::Call(c);
                }
                c.expr_type = c.args[0].expr_type();
                Expr::Call(c)
            }
            call_names::SUM | call_names::MIN | call_names::MAX | call_names::AVG => {
                if c.args.len() != 1 {
                    self.fail(CompileError::Arity {
                        name: c.name.clone(),
                        expected: 1,
                        got: c.args.len(),
                    });
                    return Expr::Call(c);
                }
                // avg always aggregates in float.
                if c.name == call_names::AVG {
                    let arg = c.args.remove(0);
                    c.args.push(self.cast_expr(arg, ExprType::Float));
                }
                c.expr_type = c.args[0].expr_type();
                Expr::Call(c)
            }
            call_names::LENGTH | call_names::CONTAINS | call_names::ELEMENT_AT => {
                self.rewrite_array_call(c)
            }
            _ => {
                self.fail(CompileError::UnknownFunction(c.name.clone()));
                Expr::Call(c)
            }
        }
    }

    fn rewrite_convert_tz(&mut self, c: Call) -> Expr {
        if c.args.len() != 3 {
            self.fail(CompileError::BadConvertTz(
                "convert_tz must have 3 arguments".to_string(),
            ));
            return Expr::Call(c);
        }
        let from_tz = match timezone_arg(&c.args[1], "2nd") {
            Ok(tz) => tz,
            Err(err) => {
                self.fail(err);
                return Expr::Call(c);
            }
        };
        let to_tz = match timezone_arg(&c.args[2], "3rd") {
            Ok(tz) => tz,
            Err(err) => {
                self.fail(err);
                return Expr::Call(c);
            }
        };
        // Fixed-form fold: the offset delta is computed once at compile
        // time against the context clock.
        let from_offset = self.now.with_timezone(&from_tz).offset().fix().local_minus_utc();
        let to_offset = self.now.with_timezone(&to_tz).offset().fix().local_minus_utc();
        let offset_seconds = i64::from(to_offset - from_offset);

        let mut args = c.args;
        let ts = args.remove(0);
        Expr::Binary(BinaryExpr {
            op: BinaryOp::Add,
            lhs: Box::new(ts),
            rhs: Box::new(unsigned_literal(offset_seconds)),
            expr_type: ExprType::Unsigned,
        })
    }

    fn rewrite_from_unixtime(&mut self, c: Call) -> Expr {
        // Only from_unixtime(time_col / 1000) is accepted, for backward
        // compatibility; the rewrite strips the call and the divide. The
        // divide was already rewritten underneath us, so the column may sit
        // behind a synthesized float cast.
        let column = c.args.first().and_then(|arg| match arg.unwrapped() {
            Expr::Binary(divide) if divide.op == BinaryOp::Div => {
                match divide.rhs.unwrapped() {
                    Expr::NumberLiteral(divisor) if divisor.int == 1000 => {
                        match divide.lhs.unwrapped() {
                            Expr::VarRef(var) => Some(var.clone()),
                            _ => None,
                        }
                    }
                    _ => None,
                }
            }
            _ => None,
        });
        match column {
            Some(var) => Expr::VarRef(var),
            None => {
                self.fail(CompileError::BadFromUnixtime);
                Expr::Call(c)
            }
        }
    }

    fn rewrite_geography_intersects(&mut self, mut c: Call) -> Expr {
        if c.args.len() != 2 {
            self.fail(CompileError::Arity {
                name: c.name.clone(),
                expected: 2,
                got: c.args.len(),
            });
            return Expr::Call(c);
        }
        let mut is_point = [false; 2];
        let mut bad_arg: Option<String> = None;
        for (i, arg) in c.args.iter().enumerate() {
            let geo_type = arg
                .as_var_ref()
                .and_then(|var| var.binding.as_ref())
                .map(|binding| binding.data_type.clone());
            match geo_type {
                Some(DataType::GeoPoint) => is_point[i] = true,
                Some(DataType::GeoShape) => is_point[i] = false,
                _ => {
                    bad_arg = Some(arg.to_string());
                    break;
                }
            }
        }
        if let Some(arg) = bad_arg {
            self.fail(CompileError::GeoArgMismatch(format!(
                "expect argument to be a valid geo shape or geo point column for {}, but got {arg}",
                c.name
            )));
            return Expr::Call(c);
        }
        if is_point[0] == is_point[1] {
            self.fail(CompileError::GeoArgMismatch(format!(
                "expect exactly one geo shape column and one geo point column for {}, got {}",
                c.name,
                Expr::Call(c.clone())
            )));
            return Expr::Call(c);
        }
        // Shape first, point second.
        if is_point[0] {
            c.args.swap(0, 1);
        }
        c.expr_type = ExprType::Boolean;
        Expr::Call(c)
    }

    fn rewrite_array_call(&mut self, mut c: Call) -> Expr {
        if c.args.is_empty() {
            self.fail(CompileError::BadArrayArg(format!(
                "array function {} requires arguments",
                c.name
            )));
            return Expr::Call(c);
        }
        let first_is_array = c.args[0]
            .as_var_ref()
            .and_then(|var| var.binding.as_ref())
            .is_some_and(|binding| binding.data_type.is_array());
        if !first_is_array {
            self.fail(CompileError::BadArrayArg(format!(
                "array function {} requires first argument to be array type column, but got {}",
                c.name, c.args[0]
            )));
            return Expr::Call(c);
        }

        if c.name == call_names::LENGTH {
            if c.args.len() != 1 {
                self.fail(CompileError::Arity {
                    name: c.name.clone(),
                    expected: 1,
                    got: c.args.len(),
                });
                return Expr::Call(c);
            }
            c.expr_type = ExprType::Unsigned;
        } else if c.name == call_names::CONTAINS {
            if c.args.len() != 2 {
                self.fail(CompileError::Arity {
                    name: c.name.clone(),
                    expected: 2,
                    got: c.args.len(),
                });
                return Expr::Call(c);
            }
            // Element type compatibility is checked on data nodes.
            c.expr_type = ExprType::Boolean;
        } else {
            if c.args.len() != 2 {
                self.fail(CompileError::Arity {
                    name: c.name.clone(),
                    expected: 2,
                    got: c.args.len(),
                });
                return Expr::Call(c);
            }
            if !matches!(c.args[1], Expr::NumberLiteral(_)) {
                self.fail(CompileError::BadArrayArg(format!(
                    "array function {} takes array type column and an index",
                    c.name
                )));
                return Expr::Call(c);
            }
            c.expr_type = c.args[0].expr_type();
        }
        Expr::Call(c)
    }

    fn rewrite_case(&mut self, mut c: Case) -> Expr {
        let mut highest = c
            .else_expr
            .as_ref()
            .map_or(ExprType::Unknown, |e| e.expr_type());
        for wt in &c.when_thens {
            highest = highest.widen(wt.then.expr_type());
        }
        // Cast else and thens to the highest type, whens to boolean.
        if let Some(else_expr) = c.else_expr.take() {
            c.else_expr = Some(Box::new(self.cast_expr(*else_expr, highest)));
        }
        c.when_thens = c
            .when_thens
            .into_iter()
            .map(|wt| WhenThen {
                when: self.cast_expr(wt.when, ExprType::Boolean),
                then: self.cast_expr(wt.then, highest),
            })
            .collect();
        c.expr_type = highest;
        Expr::Case(c)
    }

    /// Applies an implicit cast, converting a cast failure into the sticky
    /// error while handing the expression back unchanged.
    fn cast_expr(&mut self, e: Expr, to: ExprType) -> Expr {
        match cast(e, to) {
            Ok(cast_expr) => cast_expr,
            Err(failure) => {
                self.fail(failure.error);
                failure.expr
            }
        }
    }
}

fn unsigned_literal(int: i64) -> Expr {
    Expr::NumberLiteral(NumberLiteral::unsigned(int))
}

fn unsigned_binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary(BinaryExpr {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        expr_type: ExprType::Unsigned,
    })
}

fn timezone_arg(arg: &Expr, position: &str) -> Result<Tz, CompileError> {
    let Expr::StringLiteral(name) = arg else {
        return Err(CompileError::BadConvertTz(format!(
            "{position} argument of convert_tz must be a string"
        )));
    };
    name.val
        .parse::<Tz>()
        .map_err(|_| CompileError::BadConvertTz(format!("unknown timezone {}", name.val)))
}

fn block_oversize_unary(op: UnaryOp, child: &Expr) -> Option<CompileError> {
    if matches!(op, UnaryOp::UnaryMinus | UnaryOp::BitwiseNot) {
        oversize_operand(child)
    } else {
        None
    }
}

fn block_oversize_binary(op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Option<CompileError> {
    if op.blocks_wide_columns() {
        oversize_operand(lhs).or_else(|| oversize_operand(rhs))
    } else {
        None
    }
}

fn oversize_operand(e: &Expr) -> Option<CompileError> {
    let too_wide = e
        .as_var_ref()
        .and_then(|var| var.binding.as_ref())
        .is_some_and(|binding| binding.data_type.bytes() > 4);
    too_wide.then(|| CompileError::OversizeNumericOp(e.to_string()))
}
