//! Algebrizer: parsed statement + logical schema -> plan tree.
//!
//! Resolution is a planning-time concern: unknown and ambiguous column
//! references, unknown tables and unsupported syntax all fail here, before
//! any store round trip. Every comparison the algebrizer builds goes
//! through type reconciliation, so execution never sees an unreconciled
//! operand pair.

use std::sync::Arc;

use ahash::AHashMap;
use sqlparser::ast::{
    BinaryOperator as SqlBinaryOp, DataType, DuplicateTreatment, Expr as AstExpr,
    FunctionArg, FunctionArgExpr, FunctionArguments, GroupByExpr, JoinConstraint, JoinOperator,
    OrderByExpr, Query, Select, SelectItem, SetExpr, Statement, TableFactor, TableWithJoins,
    UnaryOperator as SqlUnaryOp, Value as AstValue,
};

use crate::auth::SharedAuth;
use crate::error::{DocsqlError, DocsqlResult};
use crate::expr::reconcile::reconcile;
use crate::expr::visitor::contains_aggregate;
use crate::expr::{
    AggregateExpr, AggregateFunction, BinaryOp, ColumnRef, ScalarFunction, SqlExpr, SqlType,
    SqlValue, SubqueryExpr, UnaryOp,
};
use crate::plan::{
    CacheStage, Column, DualStage, FilterStage, GroupByStage, JoinKind, JoinStage, LimitStage,
    OrderByStage, OrderTerm, PlanStage, ProjectStage, ProjectedColumn, SchemaTableKind,
    SchemaTablesStage, SourceAppendStage, SourceRemoveStage, SourceStage, SubquerySourceStage,
};
use crate::schema::Schema;

/// One aliased table visible in a scope.
struct ScopeTable {
    alias: String,
    columns: Vec<Column>,
}

/// Lexical scope chain for column resolution.
struct Scope<'a> {
    parent: Option<&'a Scope<'a>>,
    tables: &'a [ScopeTable],
}

impl Scope<'_> {
    /// Resolve a possibly-qualified column name. The second component is
    /// true when the binding came from an enclosing scope.
    fn resolve(&self, qualifier: Option<&str>, name: &str) -> DocsqlResult<(ColumnRef, bool)> {
        if let Some(column) = self.resolve_local(qualifier, name)? {
            return Ok((column, false));
        }
        if let Some(parent) = self.parent {
            let (column, _) = parent.resolve(qualifier, name)?;
            return Ok((column, true));
        }
        let shown = match qualifier {
            Some(q) => format!("{q}.{name}"),
            None => name.to_string(),
        };
        Err(DocsqlError::UnknownColumn(shown))
    }

    fn resolve_local(
        &self,
        qualifier: Option<&str>,
        name: &str,
    ) -> DocsqlResult<Option<ColumnRef>> {
        let mut found: Option<ColumnRef> = None;
        for table in self.tables {
            if let Some(q) = qualifier {
                if table.alias != q {
                    continue;
                }
            }
            if let Some(column) = table.columns.iter().find(|c| c.name == name) {
                if found.is_some() {
                    return Err(DocsqlError::AmbiguousColumn(name.to_string()));
                }
                found = Some(ColumnRef {
                    select_id: column.select_id,
                    table: column.table.clone(),
                    name: column.name.clone(),
                    sql_type: column.sql_type,
                });
            }
        }
        Ok(found)
    }
}

/// Correlation facts gathered while algebrizing one query.
#[derive(Default)]
struct Correlation {
    /// An expression in this query referenced an enclosing scope.
    uses_outer: bool,
    /// A nested subquery of this query references enclosing rows, so this
    /// query must publish its rows on the correlated-row stack.
    has_correlated: bool,
}

pub struct Algebrizer {
    schema: Arc<Schema>,
    auth: SharedAuth,
    default_db: String,
    next_select_id: u32,
    next_subquery_id: u64,
}

impl Algebrizer {
    pub fn new(schema: Arc<Schema>, auth: SharedAuth, default_db: &str) -> Self {
        Self {
            schema,
            auth,
            default_db: default_db.to_string(),
            next_select_id: 0,
            next_subquery_id: 0,
        }
    }

    /// Algebrize one parsed statement into an executable plan tree.
    pub fn algebrize(&mut self, statement: &Statement) -> DocsqlResult<Arc<PlanStage>> {
        match statement {
            Statement::Query(query) => {
                let (plan, _) = self.algebrize_query(query, None, 0)?;
                Ok(plan)
            }
            other => Err(DocsqlError::Unsupported(format!(
                "statement kind: {other}"
            ))),
        }
    }

    fn algebrize_query(
        &mut self,
        query: &Query,
        outer: Option<&Scope<'_>>,
        depth: usize,
    ) -> DocsqlResult<(Arc<PlanStage>, bool)> {
        if query.with.is_some() {
            return Err(DocsqlError::Unsupported("WITH clauses".to_string()));
        }
        let select = match query.body.as_ref() {
            SetExpr::Select(select) => select,
            other => {
                return Err(DocsqlError::Unsupported(format!(
                    "query body: {other}"
                )));
            }
        };
        if select.distinct.is_some() {
            return Err(DocsqlError::Unsupported("SELECT DISTINCT".to_string()));
        }

        let select_id = self.next_select_id;
        self.next_select_id += 1;
        let mut corr = Correlation::default();

        // FROM clause first: it defines the scope everything else resolves
        // against.
        let (mut plan, tables) = self.algebrize_from(&select.from, outer, depth, &mut corr)?;
        let scope = Scope {
            parent: outer,
            tables: &tables,
        };

        // Select-list aliases are visible to ORDER BY and HAVING.
        let mut aliases: AHashMap<String, SqlExpr> = AHashMap::new();
        for item in &select.projection {
            if let SelectItem::ExprWithAlias { expr, alias } = item {
                let algebrized = self.algebrize_expr(expr, &scope, depth, &mut corr)?;
                aliases.insert(alias.value.clone(), algebrized);
            }
        }

        let selection = match &select.selection {
            Some(expr) => Some(self.algebrize_expr(expr, &scope, depth, &mut corr)?),
            None => None,
        };

        let group_keys = match &select.group_by {
            GroupByExpr::Expressions(exprs, _) => exprs
                .iter()
                .map(|e| self.algebrize_expr(e, &scope, depth, &mut corr))
                .collect::<DocsqlResult<Vec<_>>>()?,
            GroupByExpr::All(_) => {
                return Err(DocsqlError::Unsupported("GROUP BY ALL".to_string()));
            }
        };

        let projections =
            self.algebrize_projection(select, &scope, select_id, depth, &mut corr)?;

        let having = match &select.having {
            Some(expr) => Some(self.algebrize_expr(expr, &scope, depth, &mut corr)?),
            None => None,
        };

        let grouped = !group_keys.is_empty()
            || projections.iter().any(|p| contains_aggregate(&p.expr))
            || having.as_ref().is_some_and(contains_aggregate);
        if !grouped && having.is_some() {
            return Err(DocsqlError::Unsupported(
                "HAVING without grouping".to_string(),
            ));
        }

        let order_terms = self.algebrize_order_by(query, &scope, &aliases, depth, &mut corr)?;
        let limits = algebrize_limits(query)?;

        // Assemble bottom-up. A query containing correlated subqueries
        // publishes each of its source rows at this nesting depth and pops
        // them again above the final projection.
        if corr.has_correlated {
            plan = Arc::new(PlanStage::SourceAppend(SourceAppendStage::new(plan, depth)));
        }
        if let Some(predicate) = selection {
            plan = Arc::new(PlanStage::Filter(FilterStage::new(plan, predicate)));
        }

        if grouped {
            plan = self.assemble_grouped(
                plan,
                select_id,
                group_keys,
                projections,
                having,
                order_terms,
                limits,
            )?;
        } else {
            if !order_terms.is_empty() {
                plan = Arc::new(PlanStage::OrderBy(OrderByStage::new(plan, order_terms)));
            }
            if let Some((skip, limit)) = limits {
                plan = Arc::new(PlanStage::Limit(LimitStage::new(plan, skip, limit)));
            }
            plan = Arc::new(PlanStage::Project(ProjectStage::new(plan, projections)));
        }

        if corr.has_correlated {
            plan = Arc::new(PlanStage::SourceRemove(SourceRemoveStage::new(plan, depth)));
        }
        Ok((plan, corr.uses_outer))
    }

    /// Grouped assembly: GroupBy computes the select list plus hidden
    /// columns for HAVING and for order terms that are not select items;
    /// a final Project trims the hidden columns off again.
    #[allow(clippy::too_many_arguments)]
    fn assemble_grouped(
        &mut self,
        child: Arc<PlanStage>,
        select_id: u32,
        keys: Vec<SqlExpr>,
        projections: Vec<ProjectedColumn>,
        having: Option<SqlExpr>,
        order_terms: Vec<OrderTerm>,
        limits: Option<(u64, u64)>,
    ) -> DocsqlResult<Arc<PlanStage>> {
        let mut gb_projections = projections.clone();
        let mut hidden = 0u32;
        let mut hide = |expr: SqlExpr, gb: &mut Vec<ProjectedColumn>| -> SqlExpr {
            let name = format!("__hidden_{hidden}");
            hidden += 1;
            let column = Column::new(select_id, "", &name, expr.static_type());
            gb.push(ProjectedColumn::new(column.clone(), expr));
            SqlExpr::Column(ColumnRef {
                select_id,
                table: String::new(),
                name,
                sql_type: column.sql_type,
            })
        };

        let having_ref = having.map(|expr| hide(expr, &mut gb_projections));
        let order_refs: Vec<OrderTerm> = order_terms
            .into_iter()
            .map(|term| {
                // An order term that is exactly a select item reads the
                // grouped output column; anything else becomes a hidden
                // grouped projection.
                let matched = projections
                    .iter()
                    .find(|p| p.expr == term.expr)
                    .map(|p| {
                        SqlExpr::Column(ColumnRef {
                            select_id: p.column.select_id,
                            table: p.column.table.clone(),
                            name: p.column.name.clone(),
                            sql_type: p.column.sql_type,
                        })
                    });
                OrderTerm {
                    expr: matched.unwrap_or_else(|| hide(term.expr, &mut gb_projections)),
                    ascending: term.ascending,
                }
            })
            .collect();

        let needs_trim = hidden > 0;
        let mut plan = Arc::new(PlanStage::GroupBy(GroupByStage::new(
            child,
            keys,
            gb_projections,
        )));
        if let Some(predicate) = having_ref {
            plan = Arc::new(PlanStage::Filter(FilterStage::new(plan, predicate)));
        }
        if !order_refs.is_empty() {
            plan = Arc::new(PlanStage::OrderBy(OrderByStage::new(plan, order_refs)));
        }
        if let Some((skip, limit)) = limits {
            plan = Arc::new(PlanStage::Limit(LimitStage::new(plan, skip, limit)));
        }
        if needs_trim {
            let trimmed = projections
                .iter()
                .map(|p| {
                    ProjectedColumn::new(
                        p.column.clone(),
                        SqlExpr::Column(ColumnRef {
                            select_id: p.column.select_id,
                            table: p.column.table.clone(),
                            name: p.column.name.clone(),
                            sql_type: p.column.sql_type,
                        }),
                    )
                })
                .collect();
            plan = Arc::new(PlanStage::Project(ProjectStage::new(plan, trimmed)));
        }
        Ok(plan)
    }

    fn algebrize_from(
        &mut self,
        from: &[TableWithJoins],
        outer: Option<&Scope<'_>>,
        depth: usize,
        corr: &mut Correlation,
    ) -> DocsqlResult<(Arc<PlanStage>, Vec<ScopeTable>)> {
        if from.is_empty() {
            return Ok((Arc::new(PlanStage::Dual(DualStage::new())), vec![]));
        }
        let mut plan: Option<Arc<PlanStage>> = None;
        let mut tables: Vec<ScopeTable> = vec![];
        for table_with_joins in from {
            let (factor_plan, factor_table) =
                self.algebrize_factor(&table_with_joins.relation, outer, depth, corr)?;
            tables.push(factor_table);
            // A comma list is a left-leaning chain of cross joins.
            plan = Some(match plan {
                None => factor_plan,
                Some(left) => Arc::new(PlanStage::Join(JoinStage::new(
                    left,
                    factor_plan,
                    JoinKind::Cross,
                    None,
                ))),
            });
            for join in &table_with_joins.joins {
                let (right_plan, right_table) =
                    self.algebrize_factor(&join.relation, outer, depth, corr)?;
                tables.push(right_table);
                let (kind, constraint) = match &join.join_operator {
                    JoinOperator::Inner(c) => (JoinKind::Inner, Some(c)),
                    JoinOperator::LeftOuter(c) => (JoinKind::Left, Some(c)),
                    JoinOperator::RightOuter(c) => (JoinKind::Right, Some(c)),
                    JoinOperator::CrossJoin => (JoinKind::Cross, None),
                    other => {
                        return Err(DocsqlError::Unsupported(format!(
                            "join operator: {other:?}"
                        )));
                    }
                };
                let (kind, predicate) = match constraint {
                    Some(JoinConstraint::On(expr)) => {
                        let scope = Scope {
                            parent: outer,
                            tables: &tables,
                        };
                        (kind, Some(self.algebrize_expr(expr, &scope, depth, corr)?))
                    }
                    Some(JoinConstraint::Natural) => (JoinKind::Natural, None),
                    Some(JoinConstraint::Using(_)) => {
                        return Err(DocsqlError::Unsupported("JOIN USING".to_string()));
                    }
                    Some(JoinConstraint::None) | None => (kind, None),
                };
                let left = match plan.take() {
                    Some(left) => left,
                    None => {
                        return Err(DocsqlError::Internal(
                            "join without a left-hand source".to_string(),
                        ));
                    }
                };
                plan = Some(Arc::new(PlanStage::Join(JoinStage::new(
                    left, right_plan, kind, predicate,
                ))));
            }
        }
        match plan {
            Some(plan) => Ok((plan, tables)),
            None => Ok((Arc::new(PlanStage::Dual(DualStage::new())), tables)),
        }
    }

    fn algebrize_factor(
        &mut self,
        factor: &TableFactor,
        outer: Option<&Scope<'_>>,
        depth: usize,
        corr: &mut Correlation,
    ) -> DocsqlResult<(Arc<PlanStage>, ScopeTable)> {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let parts: Vec<String> = name.0.iter().map(|i| i.value.clone()).collect();
                let (db, table) = match parts.as_slice() {
                    [table] => (self.default_db.clone(), table.clone()),
                    [db, table] => (db.clone(), table.clone()),
                    _ => {
                        return Err(DocsqlError::Unsupported(format!(
                            "table reference: {name}"
                        )));
                    }
                };
                let alias_name = alias
                    .as_ref()
                    .map(|a| a.name.value.clone())
                    .unwrap_or_else(|| table.clone());
                let select_id = self.next_select_id;
                let stage = if db.eq_ignore_ascii_case("information_schema") {
                    let kind = SchemaTableKind::from_table_name(&table).ok_or_else(|| {
                        DocsqlError::UnknownTable {
                            db: db.clone(),
                            table: table.clone(),
                        }
                    })?;
                    PlanStage::SchemaTables(SchemaTablesStage::new(
                        kind,
                        Arc::clone(&self.schema),
                        Arc::clone(&self.auth),
                        select_id,
                        &alias_name,
                    ))
                } else {
                    let table_schema = self.schema.must_table(&db, &table)?;
                    PlanStage::Source(SourceStage::for_table(
                        &db,
                        &alias_name,
                        select_id,
                        table_schema,
                    ))
                };
                let scope_table = ScopeTable {
                    alias: alias_name,
                    columns: stage.columns(),
                };
                Ok((Arc::new(stage), scope_table))
            }
            TableFactor::Derived {
                subquery, alias, ..
            } => {
                let alias_name = alias
                    .as_ref()
                    .map(|a| a.name.value.clone())
                    .ok_or_else(|| {
                        DocsqlError::Unsupported("derived table without an alias".to_string())
                    })?;
                let (inner, uses_outer) = self.algebrize_query(subquery, outer, depth + 1)?;
                let inner = if uses_outer {
                    corr.has_correlated = true;
                    corr.uses_outer = true;
                    inner
                } else {
                    let id = self.next_subquery_id;
                    self.next_subquery_id += 1;
                    Arc::new(PlanStage::Cache(CacheStage::new(inner, id)))
                };
                let select_id = self.next_select_id;
                let stage = SubquerySourceStage::new(inner, select_id, &alias_name, vec![])?;
                let scope_table = ScopeTable {
                    alias: alias_name,
                    columns: stage.columns(),
                };
                Ok((Arc::new(PlanStage::SubquerySource(stage)), scope_table))
            }
            other => Err(DocsqlError::Unsupported(format!(
                "table factor: {other}"
            ))),
        }
    }

    fn algebrize_projection(
        &mut self,
        select: &Select,
        scope: &Scope<'_>,
        select_id: u32,
        depth: usize,
        corr: &mut Correlation,
    ) -> DocsqlResult<Vec<ProjectedColumn>> {
        let mut projections = vec![];
        for item in &select.projection {
            match item {
                SelectItem::Wildcard(_) => {
                    for table in scope.tables {
                        push_table_columns(&mut projections, table);
                    }
                }
                SelectItem::QualifiedWildcard(name, _) => {
                    let qualifier = name.to_string();
                    let table = scope
                        .tables
                        .iter()
                        .find(|t| t.alias == qualifier)
                        .ok_or_else(|| DocsqlError::UnknownColumn(format!("{qualifier}.*")))?;
                    push_table_columns(&mut projections, table);
                }
                SelectItem::UnnamedExpr(expr) => {
                    let name = derived_name(expr);
                    let algebrized = self.algebrize_expr(expr, scope, depth, corr)?;
                    let column = Column::new(select_id, "", &name, algebrized.static_type());
                    projections.push(ProjectedColumn::new(column, algebrized));
                }
                SelectItem::ExprWithAlias { expr, alias } => {
                    let algebrized = self.algebrize_expr(expr, scope, depth, corr)?;
                    let column =
                        Column::new(select_id, "", &alias.value, algebrized.static_type());
                    projections.push(ProjectedColumn::new(column, algebrized));
                }
            }
        }
        Ok(projections)
    }

    fn algebrize_order_by(
        &mut self,
        query: &Query,
        scope: &Scope<'_>,
        aliases: &AHashMap<String, SqlExpr>,
        depth: usize,
        corr: &mut Correlation,
    ) -> DocsqlResult<Vec<OrderTerm>> {
        let Some(order_by) = &query.order_by else {
            return Ok(vec![]);
        };
        order_by
            .exprs
            .iter()
            .map(|ob: &OrderByExpr| {
                // A bare identifier naming a select alias sorts by that
                // select expression.
                let expr = match &ob.expr {
                    AstExpr::Identifier(ident) if aliases.contains_key(&ident.value) => {
                        aliases[&ident.value].clone()
                    }
                    other => self.algebrize_expr(other, scope, depth, corr)?,
                };
                Ok(OrderTerm {
                    expr,
                    ascending: ob.asc.unwrap_or(true),
                })
            })
            .collect()
    }

    fn algebrize_expr(
        &mut self,
        expr: &AstExpr,
        scope: &Scope<'_>,
        depth: usize,
        corr: &mut Correlation,
    ) -> DocsqlResult<SqlExpr> {
        match expr {
            AstExpr::Identifier(ident) => {
                let (column, outer) = scope.resolve(None, &ident.value)?;
                corr.uses_outer |= outer;
                Ok(SqlExpr::Column(column))
            }
            AstExpr::CompoundIdentifier(idents) => {
                let parts: Vec<&str> = idents.iter().map(|i| i.value.as_str()).collect();
                let (qualifier, name) = match parts.as_slice() {
                    [qualifier, name] => (*qualifier, *name),
                    _ => {
                        return Err(DocsqlError::Unsupported(format!(
                            "column reference: {expr}"
                        )));
                    }
                };
                let (column, outer) = scope.resolve(Some(qualifier), name)?;
                corr.uses_outer |= outer;
                Ok(SqlExpr::Column(column))
            }
            AstExpr::Value(value) => algebrize_literal(value),
            AstExpr::Nested(inner) => self.algebrize_expr(inner, scope, depth, corr),
            AstExpr::UnaryOp { op, expr } => {
                let inner = self.algebrize_expr(expr, scope, depth, corr)?;
                match op {
                    SqlUnaryOp::Plus => Ok(inner),
                    SqlUnaryOp::Minus => Ok(SqlExpr::Unary {
                        op: UnaryOp::Neg,
                        expr: Box::new(inner),
                    }),
                    SqlUnaryOp::Not => Ok(SqlExpr::Unary {
                        op: UnaryOp::Not,
                        expr: Box::new(inner),
                    }),
                    other => Err(DocsqlError::Unsupported(format!(
                        "unary operator: {other}"
                    ))),
                }
            }
            AstExpr::BinaryOp { left, op, right } => {
                let op = convert_binary_op(op)?;
                let left = self.algebrize_expr(left, scope, depth, corr)?;
                let right = self.algebrize_expr(right, scope, depth, corr)?;
                let (left, right) = if op.is_comparison() || op.is_arithmetic() {
                    reconcile(left, right)?
                } else {
                    (left, right)
                };
                Ok(SqlExpr::Binary {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                })
            }
            AstExpr::IsNull(inner) => Ok(SqlExpr::IsNull {
                expr: Box::new(self.algebrize_expr(inner, scope, depth, corr)?),
                negated: false,
            }),
            AstExpr::IsNotNull(inner) => Ok(SqlExpr::IsNull {
                expr: Box::new(self.algebrize_expr(inner, scope, depth, corr)?),
                negated: true,
            }),
            AstExpr::Between {
                expr,
                negated,
                low,
                high,
            } => {
                let subject = self.algebrize_expr(expr, scope, depth, corr)?;
                let low = self.algebrize_expr(low, scope, depth, corr)?;
                let high = self.algebrize_expr(high, scope, depth, corr)?;
                let (subject, low) = reconcile(subject, low)?;
                let (subject, high) = reconcile(subject, high)?;
                Ok(SqlExpr::Between {
                    expr: Box::new(subject),
                    low: Box::new(low),
                    high: Box::new(high),
                    negated: *negated,
                })
            }
            AstExpr::InList {
                expr,
                list,
                negated,
            } => {
                let subject = self.algebrize_expr(expr, scope, depth, corr)?;
                let members = list
                    .iter()
                    .map(|e| self.algebrize_expr(e, scope, depth, corr))
                    .collect::<DocsqlResult<Vec<_>>>()?;
                let (subject, members) = reconcile(subject, SqlExpr::Tuple(members))?;
                Ok(SqlExpr::Binary {
                    left: Box::new(subject),
                    op: if *negated { BinaryOp::NotIn } else { BinaryOp::In },
                    right: Box::new(members),
                })
            }
            AstExpr::InSubquery {
                expr,
                subquery,
                negated,
            } => {
                let subject = self.algebrize_expr(expr, scope, depth, corr)?;
                let sub = self.algebrize_subquery_expr(subquery, scope, depth, corr)?;
                let (subject, sub) = reconcile(subject, SqlExpr::Subquery(sub))?;
                Ok(SqlExpr::Binary {
                    left: Box::new(subject),
                    op: if *negated { BinaryOp::NotIn } else { BinaryOp::In },
                    right: Box::new(sub),
                })
            }
            AstExpr::Exists { subquery, negated } => {
                let sub = self.algebrize_subquery_expr(subquery, scope, depth, corr)?;
                let exists = SqlExpr::Exists(sub);
                if *negated {
                    Ok(SqlExpr::Unary {
                        op: UnaryOp::Not,
                        expr: Box::new(exists),
                    })
                } else {
                    Ok(exists)
                }
            }
            AstExpr::Subquery(subquery) => {
                let sub = self.algebrize_subquery_expr(subquery, scope, depth, corr)?;
                Ok(SqlExpr::Subquery(sub))
            }
            AstExpr::Cast {
                expr, data_type, ..
            } => {
                let inner = self.algebrize_expr(expr, scope, depth, corr)?;
                Ok(SqlExpr::Convert {
                    expr: Box::new(inner),
                    to: convert_cast_type(data_type)?,
                })
            }
            AstExpr::Tuple(items) => Ok(SqlExpr::Tuple(
                items
                    .iter()
                    .map(|e| self.algebrize_expr(e, scope, depth, corr))
                    .collect::<DocsqlResult<Vec<_>>>()?,
            )),
            AstExpr::Function(func) => self.algebrize_function(func, scope, depth, corr),
            other => Err(DocsqlError::Unsupported(format!("expression: {other}"))),
        }
    }

    fn algebrize_function(
        &mut self,
        func: &sqlparser::ast::Function,
        scope: &Scope<'_>,
        depth: usize,
        corr: &mut Correlation,
    ) -> DocsqlResult<SqlExpr> {
        let name = func.name.to_string().to_uppercase();
        let (args, distinct, star) = match &func.args {
            FunctionArguments::None => (vec![], false, false),
            FunctionArguments::Subquery(_) => {
                return Err(DocsqlError::Unsupported(
                    "subquery function arguments".to_string(),
                ));
            }
            FunctionArguments::List(list) => {
                let distinct =
                    matches!(list.duplicate_treatment, Some(DuplicateTreatment::Distinct));
                let mut args = vec![];
                let mut star = false;
                for arg in &list.args {
                    let arg_expr = match arg {
                        FunctionArg::Unnamed(inner) => inner,
                        FunctionArg::Named { arg, .. } => arg,
                    };
                    match arg_expr {
                        FunctionArgExpr::Expr(e) => {
                            args.push(self.algebrize_expr(e, scope, depth, corr)?);
                        }
                        FunctionArgExpr::Wildcard | FunctionArgExpr::QualifiedWildcard(_) => {
                            star = true;
                        }
                    }
                }
                (args, distinct, star)
            }
        };

        if let Some(aggregate) = AggregateFunction::from_name(&name) {
            let arg = if star || (aggregate == AggregateFunction::Count && args.is_empty()) {
                None
            } else {
                let mut args = args;
                if args.len() != 1 {
                    return Err(DocsqlError::Evaluation(format!(
                        "{name} takes one argument, got {}",
                        args.len()
                    )));
                }
                Some(Box::new(args.remove(0)))
            };
            return Ok(SqlExpr::Aggregate(AggregateExpr {
                func: aggregate,
                arg,
                distinct,
            }));
        }
        if let Some(scalar) = ScalarFunction::from_name(&name) {
            scalar.check_arity(args.len())?;
            return Ok(SqlExpr::ScalarFn { func: scalar, args });
        }
        Err(DocsqlError::Unsupported(format!("function: {name}")))
    }

    fn algebrize_subquery_expr(
        &mut self,
        query: &Query,
        scope: &Scope<'_>,
        depth: usize,
        corr: &mut Correlation,
    ) -> DocsqlResult<SubqueryExpr> {
        let (plan, uses_outer) = self.algebrize_query(query, Some(scope), depth + 1)?;
        let id = self.next_subquery_id;
        self.next_subquery_id += 1;
        let plan = if uses_outer {
            corr.has_correlated = true;
            corr.uses_outer = true;
            plan
        } else {
            Arc::new(PlanStage::Cache(CacheStage::new(plan, id)))
        };
        let columns = plan.columns();
        let sql_type = match columns.as_slice() {
            [single] => single.sql_type,
            _ => SqlType::Tuple,
        };
        Ok(SubqueryExpr {
            plan,
            id,
            correlated: uses_outer,
            sql_type,
        })
    }
}

fn push_table_columns(projections: &mut Vec<ProjectedColumn>, table: &ScopeTable) {
    for column in &table.columns {
        projections.push(ProjectedColumn::new(
            column.clone(),
            SqlExpr::Column(ColumnRef {
                select_id: column.select_id,
                table: column.table.clone(),
                name: column.name.clone(),
                sql_type: column.sql_type,
            }),
        ));
    }
}

fn derived_name(expr: &AstExpr) -> String {
    match expr {
        AstExpr::Identifier(ident) => ident.value.clone(),
        AstExpr::CompoundIdentifier(idents) => idents
            .last()
            .map(|i| i.value.clone())
            .unwrap_or_else(|| expr.to_string()),
        other => other.to_string(),
    }
}

fn algebrize_literal(value: &AstValue) -> DocsqlResult<SqlExpr> {
    let literal = match value {
        AstValue::Number(raw, _) => {
            if let Ok(n) = raw.parse::<i64>() {
                SqlValue::Int(n)
            } else {
                raw.parse::<f64>().map(SqlValue::Float).map_err(|_| {
                    DocsqlError::Evaluation(format!("invalid numeric literal: {raw}"))
                })?
            }
        }
        AstValue::SingleQuotedString(s) | AstValue::DoubleQuotedString(s) => {
            SqlValue::Varchar(s.clone())
        }
        AstValue::Boolean(b) => SqlValue::Boolean(*b),
        AstValue::Null => SqlValue::Null,
        other => {
            return Err(DocsqlError::Unsupported(format!("literal: {other}")));
        }
    };
    Ok(SqlExpr::Literal(literal))
}

fn convert_binary_op(op: &SqlBinaryOp) -> DocsqlResult<BinaryOp> {
    match op {
        SqlBinaryOp::Plus => Ok(BinaryOp::Add),
        SqlBinaryOp::Minus => Ok(BinaryOp::Sub),
        SqlBinaryOp::Multiply => Ok(BinaryOp::Mul),
        SqlBinaryOp::Divide => Ok(BinaryOp::Div),
        SqlBinaryOp::Modulo => Ok(BinaryOp::Mod),
        SqlBinaryOp::Eq => Ok(BinaryOp::Eq),
        SqlBinaryOp::NotEq => Ok(BinaryOp::Neq),
        SqlBinaryOp::Lt => Ok(BinaryOp::Lt),
        SqlBinaryOp::LtEq => Ok(BinaryOp::Lte),
        SqlBinaryOp::Gt => Ok(BinaryOp::Gt),
        SqlBinaryOp::GtEq => Ok(BinaryOp::Gte),
        SqlBinaryOp::And => Ok(BinaryOp::And),
        SqlBinaryOp::Or => Ok(BinaryOp::Or),
        other => Err(DocsqlError::Unsupported(format!(
            "binary operator: {other}"
        ))),
    }
}

fn convert_cast_type(data_type: &DataType) -> DocsqlResult<SqlType> {
    let rendered = data_type.to_string().to_uppercase();
    let base = rendered.split('(').next().unwrap_or("").trim();
    match base {
        "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" => Ok(SqlType::Int),
        "FLOAT" | "DOUBLE" | "DOUBLE PRECISION" | "REAL" | "DECIMAL" | "NUMERIC" => {
            Ok(SqlType::Float)
        }
        "VARCHAR" | "CHAR" | "TEXT" | "STRING" | "CHARACTER VARYING" => Ok(SqlType::Varchar),
        "BOOLEAN" | "BOOL" => Ok(SqlType::Boolean),
        "DATE" => Ok(SqlType::Date),
        "TIMESTAMP" | "DATETIME" => Ok(SqlType::Timestamp),
        _ => Err(DocsqlError::Unsupported(format!(
            "cast target: {rendered}"
        ))),
    }
}

fn algebrize_limits(query: &Query) -> DocsqlResult<Option<(u64, u64)>> {
    if query.limit.is_none() && query.offset.is_none() {
        return Ok(None);
    }
    let limit = match &query.limit {
        Some(expr) => extract_u64(expr)?,
        // OFFSET without LIMIT keeps everything past the offset.
        None => u64::MAX,
    };
    let skip = match &query.offset {
        Some(offset) => extract_u64(&offset.value)?,
        None => 0,
    };
    Ok(Some((skip, limit)))
}

fn extract_u64(expr: &AstExpr) -> DocsqlResult<u64> {
    match expr {
        AstExpr::Value(AstValue::Number(raw, _)) => raw.parse::<u64>().map_err(|_| {
            DocsqlError::Evaluation(format!(
                "LIMIT/OFFSET must be a non-negative integer, got {raw}"
            ))
        }),
        other => Err(DocsqlError::Unsupported(format!(
            "non-literal LIMIT/OFFSET: {other}"
        ))),
    }
}
