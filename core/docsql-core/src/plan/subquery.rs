//! Subquery relabeling stages.
//!
//! Both stages re-identify a child's rows under an outer scope: the values
//! keep their positions but take on the outer select id and alias, so the
//! enclosing query addresses derived rows as ordinary table columns.
//! `SubquerySourceStage` additionally renames columns positionally when the
//! derived table declares a column alias list (`... AS t(a, b)`).

use std::sync::Arc;

use crate::error::{DocsqlError, DocsqlResult};
use crate::plan::context::ExecutionCtx;
use crate::plan::row::{Column, Row};
use crate::plan::{Iter, PlanStage};

#[derive(Debug, Clone)]
pub struct SubqueryStage {
    pub child: Arc<PlanStage>,
    pub select_id: u32,
    pub alias: String,
}

impl SubqueryStage {
    pub fn new(child: Arc<PlanStage>, select_id: u32, alias: &str) -> Self {
        Self {
            child,
            select_id,
            alias: alias.to_string(),
        }
    }

    pub fn open(&self, ctx: &ExecutionCtx) -> DocsqlResult<Box<dyn Iter>> {
        Ok(Box::new(RelabelIter {
            child: self.child.open(ctx)?,
            columns: self.columns(),
            done: false,
        }))
    }

    pub fn columns(&self) -> Vec<Column> {
        self.child
            .columns()
            .iter()
            .map(|c| c.relabeled(self.select_id, &self.alias))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct SubquerySourceStage {
    pub child: Arc<PlanStage>,
    pub select_id: u32,
    pub alias: String,
    /// Positional column renames; empty keeps the child's names.
    pub column_names: Vec<String>,
}

impl SubquerySourceStage {
    pub fn new(
        child: Arc<PlanStage>,
        select_id: u32,
        alias: &str,
        column_names: Vec<String>,
    ) -> DocsqlResult<Self> {
        if !column_names.is_empty() && column_names.len() != child.columns().len() {
            return Err(DocsqlError::Schema(format!(
                "derived table {alias} declares {} columns but produces {}",
                column_names.len(),
                child.columns().len()
            )));
        }
        Ok(Self {
            child,
            select_id,
            alias: alias.to_string(),
            column_names,
        })
    }

    pub fn open(&self, ctx: &ExecutionCtx) -> DocsqlResult<Box<dyn Iter>> {
        Ok(Box::new(RelabelIter {
            child: self.child.open(ctx)?,
            columns: self.columns(),
            done: false,
        }))
    }

    pub fn columns(&self) -> Vec<Column> {
        self.child
            .columns()
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let mut column = c.relabeled(self.select_id, &self.alias);
                if let Some(name) = self.column_names.get(i) {
                    column.name = name.clone();
                }
                column
            })
            .collect()
    }
}

/// Rewrites each child row's values to the relabeled column identities,
/// relying on positional alignment.
struct RelabelIter {
    child: Box<dyn Iter>,
    columns: Vec<Column>,
    done: bool,
}

impl Iter for RelabelIter {
    fn next(&mut self) -> DocsqlResult<Option<Row>> {
        if self.done {
            return Ok(None);
        }
        let row = match self.child.next() {
            Ok(Some(row)) => row,
            Ok(None) => {
                self.done = true;
                return Ok(None);
            }
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };
        if row.values.len() != self.columns.len() {
            self.done = true;
            return Err(DocsqlError::Internal(format!(
                "row width {} does not match declared columns {}",
                row.values.len(),
                self.columns.len()
            )));
        }
        let values = self
            .columns
            .iter()
            .zip(row.values)
            .map(|(column, value)| column.value(value.data))
            .collect();
        Ok(Some(Row::new(values)))
    }

    fn close(&mut self) -> DocsqlResult<()> {
        self.child.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{SqlExpr, SqlType, SqlValue};
    use crate::plan::drain;
    use crate::plan::dual::DualStage;
    use crate::plan::project::{ProjectStage, ProjectedColumn};

    fn inner() -> Arc<PlanStage> {
        Arc::new(PlanStage::Project(ProjectStage::new(
            Arc::new(PlanStage::Dual(DualStage::new())),
            vec![ProjectedColumn::new(
                Column::new(2, "", "x", SqlType::Int),
                SqlExpr::Literal(SqlValue::Int(5)),
            )],
        )))
    }

    #[test]
    fn test_relabel_under_outer_alias() {
        let stage = SubqueryStage::new(inner(), 1, "d");
        let columns = stage.columns();
        assert_eq!(columns[0].select_id, 1);
        assert_eq!(columns[0].table, "d");
        assert_eq!(columns[0].name, "x");

        let rows = drain(stage.open(&ExecutionCtx::detached()).unwrap()).unwrap();
        assert_eq!(rows[0].get(1, "d", "x").unwrap().data, SqlValue::Int(5));
        assert!(rows[0].get(2, "", "x").is_none());
    }

    #[test]
    fn test_positional_renames() {
        let stage = SubquerySourceStage::new(inner(), 1, "d", vec!["renamed".into()]).unwrap();
        let rows = drain(stage.open(&ExecutionCtx::detached()).unwrap()).unwrap();
        assert_eq!(rows[0].get(1, "d", "renamed").unwrap().data, SqlValue::Int(5));
    }

    #[test]
    fn test_rename_width_mismatch_rejected() {
        let result = SubquerySourceStage::new(inner(), 1, "d", vec!["a".into(), "b".into()]);
        assert!(matches!(result, Err(DocsqlError::Schema(_))));
    }
}
