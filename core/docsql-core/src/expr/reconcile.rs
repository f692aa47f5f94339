//! Static type reconciliation for comparison operands.
//!
//! Runs once at plan build time on every comparison node. Similar types pass
//! through untouched; bridgeable pairs get a `Convert` node wrapped around
//! the lower-precedence operand; incomparable pairs are rejected before any
//! row is read. Reconciliation is idempotent — re-running it on already
//! reconciled operands changes nothing.

use crate::error::{DocsqlError, DocsqlResult};
use crate::expr::{SqlExpr, SqlType};

/// Reconcile the two operands of a comparison.
pub fn reconcile(left: SqlExpr, right: SqlExpr) -> DocsqlResult<(SqlExpr, SqlExpr)> {
    let lt = left.static_type();
    let rt = right.static_type();

    if lt == SqlType::Tuple || rt == SqlType::Tuple {
        return reconcile_tuples(left, right);
    }
    if lt.is_similar_to(rt) || lt == SqlType::Null || rt == SqlType::Null {
        return Ok((left, right));
    }
    if !lt.is_comparable_to(rt) {
        return Err(DocsqlError::IncomparableTypes {
            left: lt.to_string(),
            right: rt.to_string(),
        });
    }
    // ObjectId is never a conversion target: the other operand keeps its
    // type and the ObjectId side converts toward it.
    let target = if lt == SqlType::ObjectId {
        rt
    } else if rt == SqlType::ObjectId {
        lt
    } else if lt.precedence() >= rt.precedence() {
        lt
    } else {
        rt
    };
    Ok((convert_to(left, target), convert_to(right, target)))
}

fn convert_to(expr: SqlExpr, target: SqlType) -> SqlExpr {
    if expr.static_type().is_similar_to(target) {
        expr
    } else {
        SqlExpr::Convert {
            expr: Box::new(expr),
            to: target,
        }
    }
}

fn reconcile_tuples(left: SqlExpr, right: SqlExpr) -> DocsqlResult<(SqlExpr, SqlExpr)> {
    match (left, right) {
        // Component-wise, with a singleton broadcasting against any width.
        (SqlExpr::Tuple(ls), SqlExpr::Tuple(rs)) => {
            if ls.len() == rs.len() {
                let mut out_l = Vec::with_capacity(ls.len());
                let mut out_r = Vec::with_capacity(rs.len());
                for (l, r) in ls.into_iter().zip(rs) {
                    let (l, r) = reconcile(l, r)?;
                    out_l.push(l);
                    out_r.push(r);
                }
                Ok((SqlExpr::Tuple(out_l), SqlExpr::Tuple(out_r)))
            } else if ls.len() == 1 {
                let single = unwrap_singleton(ls);
                let (single, rs) = reconcile_scalar_tuple(single, rs)?;
                Ok((single, SqlExpr::Tuple(rs)))
            } else if rs.len() == 1 {
                let single = unwrap_singleton(rs);
                let (single, ls) = reconcile_scalar_tuple(single, ls)?;
                Ok((SqlExpr::Tuple(ls), single))
            } else {
                Err(DocsqlError::IncomparableTypes {
                    left: format!("tuple of {}", ls.len()),
                    right: format!("tuple of {}", rs.len()),
                })
            }
        }
        // Scalar against a tuple: reconcile the scalar with every member
        // (the IN-list case).
        (scalar, SqlExpr::Tuple(members)) => {
            let (scalar, members) = reconcile_scalar_tuple(scalar, members)?;
            Ok((scalar, SqlExpr::Tuple(members)))
        }
        (SqlExpr::Tuple(members), scalar) => {
            let (scalar, members) = reconcile_scalar_tuple(scalar, members)?;
            Ok((SqlExpr::Tuple(members), scalar))
        }
        // Subquery operands reconcile against the subquery's declared type;
        // the conversion wraps the outer operand, never the plan.
        (left, right) => {
            let lt = left.static_type();
            let rt = right.static_type();
            if lt == SqlType::Tuple || rt == SqlType::Tuple {
                // Tuple-typed subquery (multi-column row value): accept and
                // compare by value order at runtime.
                return Ok((left, right));
            }
            reconcile(left, right)
        }
    }
}

fn unwrap_singleton(mut items: Vec<SqlExpr>) -> SqlExpr {
    match items.pop() {
        Some(item) => item,
        None => SqlExpr::Tuple(vec![]),
    }
}

fn reconcile_scalar_tuple(
    scalar: SqlExpr,
    members: Vec<SqlExpr>,
) -> DocsqlResult<(SqlExpr, Vec<SqlExpr>)> {
    let mut scalar = scalar;
    let mut out = Vec::with_capacity(members.len());
    for member in members {
        let (s, m) = reconcile(scalar, member)?;
        scalar = s;
        out.push(m);
    }
    Ok((scalar, out))
}
