//! Typed SQL expression tree.
//!
//! Expressions are built by the algebrizer, rewritten by the optimizer and
//! evaluated row-at-a-time during execution. Every comparison node is
//! type-reconciled at build time (see [`reconcile`]), so evaluation never
//! sees an incomparable operand pair that planning could have rejected.

pub mod aggregates;
pub mod functions;
pub mod reconcile;
pub mod value;
pub mod visitor;

use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::{DocsqlError, DocsqlResult};
use crate::plan::PlanStage;
use crate::plan::context::EvalCtx;
use crate::plan::row::Row;

pub use aggregates::AggregateFunction;
pub use functions::ScalarFunction;
pub use value::{SqlType, SqlValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    In,
    NotIn,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Neq | BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte
        )
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod
        )
    }
}

/// Fully-resolved reference to a plan column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub select_id: u32,
    pub table: String,
    pub name: String,
    pub sql_type: SqlType,
}

/// One aggregate call. `arg` is `None` for `COUNT(*)`.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateExpr {
    pub func: AggregateFunction,
    pub arg: Option<Box<SqlExpr>>,
    pub distinct: bool,
}

/// An embedded subquery plan.
///
/// Non-correlated subqueries are wrapped in a cache stage by the algebrizer,
/// so re-evaluation per outer row replays the materialized result.
#[derive(Debug, Clone)]
pub struct SubqueryExpr {
    pub plan: Arc<PlanStage>,
    pub id: u64,
    pub correlated: bool,
    pub sql_type: SqlType,
}

impl PartialEq for SubqueryExpr {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    Literal(SqlValue),
    Column(ColumnRef),
    Unary {
        op: UnaryOp,
        expr: Box<SqlExpr>,
    },
    Binary {
        left: Box<SqlExpr>,
        op: BinaryOp,
        right: Box<SqlExpr>,
    },
    IsNull {
        expr: Box<SqlExpr>,
        negated: bool,
    },
    Between {
        expr: Box<SqlExpr>,
        low: Box<SqlExpr>,
        high: Box<SqlExpr>,
        negated: bool,
    },
    ScalarFn {
        func: ScalarFunction,
        args: Vec<SqlExpr>,
    },
    Aggregate(AggregateExpr),
    Tuple(Vec<SqlExpr>),
    Subquery(SubqueryExpr),
    Exists(SubqueryExpr),
    /// Runtime type conversion inserted by reconciliation or `CAST`.
    Convert {
        expr: Box<SqlExpr>,
        to: SqlType,
    },
}

impl SqlExpr {
    pub fn literal(value: SqlValue) -> SqlExpr {
        SqlExpr::Literal(value)
    }

    pub fn boolean(value: bool) -> SqlExpr {
        SqlExpr::Literal(SqlValue::Boolean(value))
    }

    /// Static type, used by planning and reconciliation.
    pub fn static_type(&self) -> SqlType {
        match self {
            SqlExpr::Literal(value) => value.sql_type(),
            SqlExpr::Column(col) => col.sql_type,
            SqlExpr::Unary { op, expr } => match op {
                UnaryOp::Neg => expr.static_type(),
                UnaryOp::Not => SqlType::Boolean,
            },
            SqlExpr::Binary { left, op, right } => {
                if op.is_arithmetic() {
                    if *op == BinaryOp::Div
                        || left.static_type() == SqlType::Float
                        || right.static_type() == SqlType::Float
                    {
                        SqlType::Float
                    } else {
                        SqlType::Int
                    }
                } else {
                    SqlType::Boolean
                }
            }
            SqlExpr::IsNull { .. } | SqlExpr::Between { .. } | SqlExpr::Exists(_) => {
                SqlType::Boolean
            }
            SqlExpr::ScalarFn { func, args } => {
                let arg_types: Vec<SqlType> = args.iter().map(SqlExpr::static_type).collect();
                func.return_type(&arg_types)
            }
            SqlExpr::Aggregate(agg) => {
                let arg = agg
                    .arg
                    .as_ref()
                    .map(|a| a.static_type())
                    .unwrap_or(SqlType::Int);
                agg.func.return_type(arg)
            }
            SqlExpr::Tuple(_) => SqlType::Tuple,
            SqlExpr::Subquery(sub) => sub.sql_type,
            SqlExpr::Convert { to, .. } => *to,
        }
    }

    /// Whether the expression is store-independent and row-independent, i.e.
    /// foldable to a literal at plan time.
    pub fn is_constant(&self) -> bool {
        match self {
            SqlExpr::Literal(_) => true,
            SqlExpr::Column(_)
            | SqlExpr::Aggregate(_)
            | SqlExpr::Subquery(_)
            | SqlExpr::Exists(_) => false,
            SqlExpr::Unary { expr, .. } => expr.is_constant(),
            SqlExpr::Binary { left, right, .. } => left.is_constant() && right.is_constant(),
            SqlExpr::IsNull { expr, .. } => expr.is_constant(),
            SqlExpr::Between {
                expr, low, high, ..
            } => expr.is_constant() && low.is_constant() && high.is_constant(),
            SqlExpr::ScalarFn { args, .. } => args.iter().all(SqlExpr::is_constant),
            SqlExpr::Tuple(items) => items.iter().all(SqlExpr::is_constant),
            SqlExpr::Convert { expr, .. } => expr.is_constant(),
        }
    }

    /// Evaluate as a predicate: NULL and non-truthy values both reject.
    pub fn matches(&self, ctx: &EvalCtx) -> DocsqlResult<bool> {
        Ok(self.evaluate(ctx)?.is_truthy())
    }

    pub fn evaluate(&self, ctx: &EvalCtx) -> DocsqlResult<SqlValue> {
        match self {
            SqlExpr::Literal(value) => Ok(value.clone()),
            SqlExpr::Column(col) => Ok(ctx
                .lookup(col.select_id, &col.table, &col.name)
                .map(|v| v.data)
                .unwrap_or(SqlValue::Null)),
            SqlExpr::Unary { op, expr } => evaluate_unary(*op, &expr.evaluate(ctx)?),
            SqlExpr::Binary { left, op, right } => {
                // IN over a subquery consumes the whole result set, one
                // member per row, rather than the scalar one-row form.
                if matches!(op, BinaryOp::In | BinaryOp::NotIn) {
                    if let SqlExpr::Subquery(sub) = right.as_ref() {
                        let rows = SqlExpr::drain_subquery(sub, ctx)?;
                        let members = SqlValue::Tuple(
                            rows.into_iter()
                                .map(|row| {
                                    row.values
                                        .into_iter()
                                        .next()
                                        .map(|v| v.data)
                                        .unwrap_or(SqlValue::Null)
                                })
                                .collect(),
                        );
                        return evaluate_binary(*op, &left.evaluate(ctx)?, &members);
                    }
                }
                evaluate_binary(*op, &left.evaluate(ctx)?, &right.evaluate(ctx)?)
            }
            SqlExpr::IsNull { expr, negated } => {
                let is_null = expr.evaluate(ctx)? == SqlValue::Null;
                Ok(SqlValue::Boolean(is_null != *negated))
            }
            SqlExpr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let value = expr.evaluate(ctx)?;
                let low = low.evaluate(ctx)?;
                let high = high.evaluate(ctx)?;
                if value == SqlValue::Null || low == SqlValue::Null || high == SqlValue::Null {
                    return Ok(SqlValue::Null);
                }
                let within = value.compare(&low) != Ordering::Less
                    && value.compare(&high) != Ordering::Greater;
                Ok(SqlValue::Boolean(within != *negated))
            }
            SqlExpr::ScalarFn { func, args } => {
                let values = args
                    .iter()
                    .map(|a| a.evaluate(ctx))
                    .collect::<DocsqlResult<Vec<_>>>()?;
                func.evaluate(&values)
            }
            SqlExpr::Aggregate(agg) => Err(DocsqlError::Internal(format!(
                "{} evaluated outside a grouping stage",
                agg.func.name()
            ))),
            SqlExpr::Tuple(items) => Ok(SqlValue::Tuple(
                items
                    .iter()
                    .map(|i| i.evaluate(ctx))
                    .collect::<DocsqlResult<Vec<_>>>()?,
            )),
            SqlExpr::Subquery(sub) => evaluate_scalar_subquery(sub, ctx),
            SqlExpr::Exists(sub) => {
                let mut iter = sub.plan.open(&ctx.exec)?;
                let found = iter.next()?.is_some();
                iter.close()?;
                Ok(SqlValue::Boolean(found))
            }
            SqlExpr::Convert { expr, to } => convert_value(expr.evaluate(ctx)?, *to),
        }
    }

    /// Drain a subquery plan into its full row set.
    pub fn drain_subquery(sub: &SubqueryExpr, ctx: &EvalCtx) -> DocsqlResult<Vec<Row>> {
        let mut iter = sub.plan.open(&ctx.exec)?;
        let mut rows = vec![];
        loop {
            match iter.next() {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => break,
                Err(e) => {
                    iter.close()?;
                    return Err(e);
                }
            }
        }
        iter.close()?;
        Ok(rows)
    }
}

fn evaluate_unary(op: UnaryOp, value: &SqlValue) -> DocsqlResult<SqlValue> {
    if *value == SqlValue::Null {
        return Ok(SqlValue::Null);
    }
    match op {
        UnaryOp::Not => Ok(SqlValue::Boolean(!value.is_truthy())),
        UnaryOp::Neg => match value {
            SqlValue::Int(n) => n
                .checked_neg()
                .map(SqlValue::Int)
                .ok_or_else(|| DocsqlError::Evaluation("integer overflow in negation".to_string())),
            SqlValue::Float(f) => Ok(SqlValue::Float(-f)),
            other => Err(DocsqlError::Evaluation(format!(
                "cannot negate {other}"
            ))),
        },
    }
}

fn evaluate_binary(op: BinaryOp, left: &SqlValue, right: &SqlValue) -> DocsqlResult<SqlValue> {
    match op {
        BinaryOp::And => Ok(SqlValue::Boolean(left.is_truthy() && right.is_truthy())),
        BinaryOp::Or => Ok(SqlValue::Boolean(left.is_truthy() || right.is_truthy())),
        BinaryOp::In => evaluate_in(left, right),
        BinaryOp::NotIn => match evaluate_in(left, right)? {
            SqlValue::Boolean(b) => Ok(SqlValue::Boolean(!b)),
            other => Ok(other),
        },
        _ if op.is_comparison() => {
            if *left == SqlValue::Null || *right == SqlValue::Null {
                return Ok(SqlValue::Null);
            }
            let ord = left.compare(right);
            let result = match op {
                BinaryOp::Eq => ord == Ordering::Equal,
                BinaryOp::Neq => ord != Ordering::Equal,
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Lte => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                BinaryOp::Gte => ord != Ordering::Less,
                _ => unreachable!(),
            };
            Ok(SqlValue::Boolean(result))
        }
        _ => evaluate_arithmetic(op, left, right),
    }
}

fn evaluate_in(left: &SqlValue, right: &SqlValue) -> DocsqlResult<SqlValue> {
    if *left == SqlValue::Null {
        return Ok(SqlValue::Null);
    }
    let SqlValue::Tuple(members) = right else {
        return Err(DocsqlError::Evaluation(format!(
            "IN requires a list, got {right}"
        )));
    };
    let mut saw_null = false;
    for member in members {
        if *member == SqlValue::Null {
            saw_null = true;
            continue;
        }
        if left.compare(member) == Ordering::Equal {
            return Ok(SqlValue::Boolean(true));
        }
    }
    if saw_null {
        Ok(SqlValue::Null)
    } else {
        Ok(SqlValue::Boolean(false))
    }
}

fn evaluate_arithmetic(op: BinaryOp, left: &SqlValue, right: &SqlValue) -> DocsqlResult<SqlValue> {
    if *left == SqlValue::Null || *right == SqlValue::Null {
        return Ok(SqlValue::Null);
    }
    // Integer-preserving paths first.
    if let (SqlValue::Int(a), SqlValue::Int(b)) = (left, right) {
        let checked = match op {
            BinaryOp::Add => a.checked_add(*b),
            BinaryOp::Sub => a.checked_sub(*b),
            BinaryOp::Mul => a.checked_mul(*b),
            BinaryOp::Mod => {
                if *b == 0 {
                    return Ok(SqlValue::Null);
                }
                a.checked_rem(*b)
            }
            BinaryOp::Div => None,
            _ => unreachable!(),
        };
        if op != BinaryOp::Div {
            return checked.map(SqlValue::Int).ok_or_else(|| {
                DocsqlError::Evaluation("integer overflow in arithmetic".to_string())
            });
        }
    }
    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Err(DocsqlError::Evaluation(format!(
            "cannot apply arithmetic to {left} and {right}"
        )));
    };
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Ok(SqlValue::Null);
            }
            a / b
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                return Ok(SqlValue::Null);
            }
            a % b
        }
        _ => unreachable!(),
    };
    Ok(SqlValue::Float(result))
}

fn evaluate_scalar_subquery(sub: &SubqueryExpr, ctx: &EvalCtx) -> DocsqlResult<SqlValue> {
    let mut iter = sub.plan.open(&ctx.exec)?;
    let first = match iter.next() {
        Ok(row) => row,
        Err(e) => {
            iter.close()?;
            return Err(e);
        }
    };
    let Some(row) = first else {
        iter.close()?;
        return Ok(SqlValue::Null);
    };
    if iter.next()?.is_some() {
        iter.close()?;
        return Err(DocsqlError::Evaluation(
            "scalar subquery returned more than one row".to_string(),
        ));
    }
    iter.close()?;
    if row.values.len() == 1 {
        Ok(row.values.into_iter().next().map(|v| v.data).unwrap_or(SqlValue::Null))
    } else {
        Ok(SqlValue::Tuple(row.values.into_iter().map(|v| v.data).collect()))
    }
}

/// Runtime conversion backing `Convert` nodes.
///
/// NULL converts to NULL for every target; failed conversions are errors,
/// not NULLs, so a bad comparison surfaces instead of silently dropping rows.
pub fn convert_value(value: SqlValue, to: SqlType) -> DocsqlResult<SqlValue> {
    if value == SqlValue::Null || value.sql_type() == to {
        return Ok(value);
    }
    let fail = |value: &SqlValue| DocsqlError::TypeConversion {
        value: value.to_string(),
        target: to.to_string(),
    };
    match to {
        SqlType::Varchar => Ok(SqlValue::Varchar(match &value {
            SqlValue::Varchar(s) => s.clone(),
            SqlValue::ObjectId(s) => s.clone(),
            other => other.to_string(),
        })),
        SqlType::Int => match &value {
            SqlValue::Float(f) => Ok(SqlValue::Int(*f as i64)),
            SqlValue::Boolean(b) => Ok(SqlValue::Int(*b as i64)),
            SqlValue::Varchar(s) => s
                .trim()
                .parse::<f64>()
                .map(|f| SqlValue::Int(f as i64))
                .map_err(|_| fail(&value)),
            SqlValue::Date(ms) | SqlValue::Timestamp(ms) => Ok(SqlValue::Int(*ms)),
            _ => Err(fail(&value)),
        },
        SqlType::Float => value
            .as_f64()
            .map(SqlValue::Float)
            .ok_or_else(|| fail(&value)),
        SqlType::Boolean => Ok(SqlValue::Boolean(value.is_truthy())),
        SqlType::Date => match &value {
            SqlValue::Timestamp(ms) => Ok(SqlValue::Date(ms - ms.rem_euclid(86_400_000))),
            SqlValue::Int(ms) => Ok(SqlValue::Date(*ms)),
            _ => Err(fail(&value)),
        },
        SqlType::Timestamp => match &value {
            SqlValue::Date(ms) | SqlValue::Int(ms) => Ok(SqlValue::Timestamp(*ms)),
            _ => Err(fail(&value)),
        },
        SqlType::ObjectId | SqlType::Null | SqlType::Tuple => Err(fail(&value)),
    }
}
