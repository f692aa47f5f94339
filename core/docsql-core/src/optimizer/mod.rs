//! Rule-based plan rewriting.
//!
//! Rules run in a fixed order over the algebrized tree and every rewrite is
//! required to be row-equivalent. The driver is fail-open: a rule that
//! returns an error is logged and skipped, and the plan from before that
//! rule keeps going — a broken rewrite must never take queries down with it.
//!
//! Rules preserve sharing: a subtree a rule does not touch comes back as the
//! identical `Arc`, observable through `Arc::ptr_eq`.

pub mod promote_joins;
pub mod pushdown;
pub mod simplify;

use std::sync::Arc;

use crate::error::DocsqlResult;
use crate::plan::PlanStage;

pub use promote_joins::PromoteJoins;
pub use pushdown::Pushdown;
pub use simplify::Simplify;

/// One row-equivalence-preserving rewrite over a whole plan tree.
pub trait OptimizationRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, plan: &Arc<PlanStage>) -> DocsqlResult<Arc<PlanStage>>;
}

pub struct Optimizer {
    rules: Vec<Box<dyn OptimizationRule>>,
}

impl Optimizer {
    /// The standard pass order: fold constants, turn cross products into
    /// inner joins, then push work into source pipelines.
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(Simplify),
                Box::new(PromoteJoins),
                Box::new(Pushdown),
            ],
        }
    }

    /// An optimizer that rewrites nothing; the escape hatch when a rewrite
    /// is suspected of changing results.
    pub fn disabled() -> Self {
        Self { rules: vec![] }
    }

    pub fn with_rules(rules: Vec<Box<dyn OptimizationRule>>) -> Self {
        Self { rules }
    }

    pub fn optimize(&self, plan: Arc<PlanStage>) -> Arc<PlanStage> {
        let mut current = plan;
        for rule in &self.rules {
            match rule.apply(&current) {
                Ok(next) => {
                    if !Arc::ptr_eq(&next, &current) {
                        tracing::debug!(rule = rule.name(), "rule rewrote the plan");
                    }
                    current = next;
                }
                Err(e) => {
                    tracing::warn!(
                        rule = rule.name(),
                        error = %e,
                        "optimization rule failed; continuing with the unrewritten plan"
                    );
                }
            }
        }
        current
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Bottom-up traversal applying `f` to every node.
///
/// Children are mapped first; a node whose children all come back pointer-
/// identical is not rebuilt, so untouched subtrees keep their `Arc`.
pub(crate) fn map_stages(
    plan: &Arc<PlanStage>,
    f: &impl Fn(&Arc<PlanStage>) -> DocsqlResult<Arc<PlanStage>>,
) -> DocsqlResult<Arc<PlanStage>> {
    let children = plan.children();
    let mut mapped = Vec::with_capacity(children.len());
    let mut changed = false;
    for child in children {
        let next = map_stages(child, f)?;
        changed |= !Arc::ptr_eq(child, &next);
        mapped.push(next);
    }
    let node = if changed {
        Arc::new(plan.with_children(mapped)?)
    } else {
        Arc::clone(plan)
    };
    f(&node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DocsqlError;
    use crate::expr::{SqlExpr, SqlValue};
    use crate::plan::{DualStage, FilterStage, LimitStage};

    struct FailingRule;

    impl OptimizationRule for FailingRule {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn apply(&self, _plan: &Arc<PlanStage>) -> DocsqlResult<Arc<PlanStage>> {
            Err(DocsqlError::Internal("deliberate".to_string()))
        }
    }

    fn fixture() -> Arc<PlanStage> {
        Arc::new(PlanStage::Limit(LimitStage::new(
            Arc::new(PlanStage::Filter(FilterStage::new(
                Arc::new(PlanStage::Dual(DualStage::new())),
                SqlExpr::boolean(true),
            ))),
            0,
            10,
        )))
    }

    #[test]
    fn test_failing_rule_keeps_plan() {
        let plan = fixture();
        let optimizer = Optimizer::with_rules(vec![Box::new(FailingRule)]);
        let optimized = optimizer.optimize(Arc::clone(&plan));
        assert!(Arc::ptr_eq(&plan, &optimized));
    }

    #[test]
    fn test_disabled_optimizer_is_identity() {
        let plan = fixture();
        let optimized = Optimizer::disabled().optimize(Arc::clone(&plan));
        assert!(Arc::ptr_eq(&plan, &optimized));
    }

    #[test]
    fn test_map_stages_preserves_untouched_arcs() {
        let plan = fixture();
        let mapped = map_stages(&plan, &|node| Ok(Arc::clone(node))).unwrap();
        assert!(Arc::ptr_eq(&plan, &mapped));
    }
}
