//! Aggregate function catalog and per-partition accumulation.
//!
//! An [`Accumulator`] consumes one value per input row of a group partition
//! and yields the aggregate result; NULL inputs are skipped by every
//! function except `COUNT(*)`, which counts rows unconditionally.

use ahash::AHashSet;

use crate::error::{DocsqlError, DocsqlResult};
use crate::expr::value::{SqlType, SqlValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn from_name(name: &str) -> Option<AggregateFunction> {
        let func = match name.to_ascii_uppercase().as_str() {
            "COUNT" => AggregateFunction::Count,
            "SUM" => AggregateFunction::Sum,
            "AVG" => AggregateFunction::Avg,
            "MIN" => AggregateFunction::Min,
            "MAX" => AggregateFunction::Max,
            _ => return None,
        };
        Some(func)
    }

    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
        }
    }

    /// Static result type given the argument's static type.
    pub fn return_type(&self, arg: SqlType) -> SqlType {
        match self {
            AggregateFunction::Count => SqlType::Int,
            AggregateFunction::Avg => SqlType::Float,
            AggregateFunction::Sum => {
                if arg == SqlType::Float {
                    SqlType::Float
                } else {
                    SqlType::Int
                }
            }
            AggregateFunction::Min | AggregateFunction::Max => arg,
        }
    }

    pub fn accumulator(&self, distinct: bool) -> Accumulator {
        Accumulator {
            func: *self,
            distinct,
            seen: AHashSet::new(),
            count: 0,
            sum: 0.0,
            int_sum: 0,
            float_seen: false,
            extreme: None,
        }
    }
}

/// Running state for one aggregate over one group partition.
pub struct Accumulator {
    func: AggregateFunction,
    distinct: bool,
    seen: AHashSet<Vec<u8>>,
    count: i64,
    sum: f64,
    int_sum: i64,
    float_seen: bool,
    extreme: Option<SqlValue>,
}

impl Accumulator {
    /// Feed one input value. `COUNT(*)` is fed `None` per row.
    pub fn accumulate(&mut self, value: Option<SqlValue>) -> DocsqlResult<()> {
        let Some(value) = value else {
            self.count += 1;
            return Ok(());
        };
        if value == SqlValue::Null {
            return Ok(());
        }
        if self.distinct {
            let mut key = vec![];
            value.encode_key(&mut key);
            if !self.seen.insert(key) {
                return Ok(());
            }
        }
        self.count += 1;
        match self.func {
            AggregateFunction::Count => {}
            AggregateFunction::Sum | AggregateFunction::Avg => {
                match &value {
                    SqlValue::Int(n) => self.int_sum += n,
                    _ => self.float_seen = true,
                }
                self.sum += value.as_f64().ok_or_else(|| {
                    DocsqlError::Evaluation(format!(
                        "{} over non-numeric value {value}",
                        self.func.name()
                    ))
                })?;
            }
            AggregateFunction::Min => {
                let replace = match &self.extreme {
                    Some(current) => value.compare(current) == std::cmp::Ordering::Less,
                    None => true,
                };
                if replace {
                    self.extreme = Some(value);
                }
            }
            AggregateFunction::Max => {
                let replace = match &self.extreme {
                    Some(current) => value.compare(current) == std::cmp::Ordering::Greater,
                    None => true,
                };
                if replace {
                    self.extreme = Some(value);
                }
            }
        }
        Ok(())
    }

    /// Final result over the partition. Empty input yields NULL for every
    /// function except COUNT, which yields 0.
    pub fn finish(self) -> SqlValue {
        match self.func {
            AggregateFunction::Count => SqlValue::Int(self.count),
            AggregateFunction::Sum => {
                if self.count == 0 {
                    SqlValue::Null
                } else if self.float_seen {
                    SqlValue::Float(self.sum)
                } else {
                    SqlValue::Int(self.int_sum)
                }
            }
            AggregateFunction::Avg => {
                if self.count == 0 {
                    SqlValue::Null
                } else {
                    SqlValue::Float(self.sum / self.count as f64)
                }
            }
            AggregateFunction::Min | AggregateFunction::Max => {
                self.extreme.unwrap_or(SqlValue::Null)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(func: AggregateFunction, distinct: bool, values: Vec<Option<SqlValue>>) -> SqlValue {
        let mut acc = func.accumulator(distinct);
        for value in values {
            acc.accumulate(value).unwrap();
        }
        acc.finish()
    }

    #[test]
    fn test_count_star_counts_nulls() {
        // COUNT(*) counts every row, COUNT(col) skips NULLs.
        let star = run(AggregateFunction::Count, false, vec![None, None, None]);
        assert_eq!(star, SqlValue::Int(3));
        let col = run(
            AggregateFunction::Count,
            false,
            vec![Some(SqlValue::Int(1)), Some(SqlValue::Null), Some(SqlValue::Int(2))],
        );
        assert_eq!(col, SqlValue::Int(2));
    }

    #[test]
    fn test_sum_stays_integral() {
        let sum = run(
            AggregateFunction::Sum,
            false,
            vec![Some(SqlValue::Int(2)), Some(SqlValue::Int(3))],
        );
        assert_eq!(sum, SqlValue::Int(5));
        let mixed = run(
            AggregateFunction::Sum,
            false,
            vec![Some(SqlValue::Int(2)), Some(SqlValue::Float(0.5))],
        );
        assert_eq!(mixed, SqlValue::Float(2.5));
    }

    #[test]
    fn test_avg_and_empty_partitions() {
        let avg = run(
            AggregateFunction::Avg,
            false,
            vec![Some(SqlValue::Int(1)), Some(SqlValue::Int(2))],
        );
        assert_eq!(avg, SqlValue::Float(1.5));
        assert_eq!(run(AggregateFunction::Avg, false, vec![]), SqlValue::Null);
        assert_eq!(run(AggregateFunction::Sum, false, vec![]), SqlValue::Null);
        assert_eq!(run(AggregateFunction::Count, false, vec![]), SqlValue::Int(0));
        assert_eq!(run(AggregateFunction::Min, false, vec![]), SqlValue::Null);
    }

    #[test]
    fn test_min_max() {
        let values = vec![
            Some(SqlValue::Int(4)),
            Some(SqlValue::Float(1.5)),
            Some(SqlValue::Null),
            Some(SqlValue::Int(9)),
        ];
        assert_eq!(
            run(AggregateFunction::Min, false, values.clone()),
            SqlValue::Float(1.5)
        );
        assert_eq!(run(AggregateFunction::Max, false, values), SqlValue::Int(9));
    }

    #[test]
    fn test_distinct_dedupes_across_representations() {
        // 2 and 2.0 share a key, so DISTINCT folds them.
        let count = run(
            AggregateFunction::Count,
            true,
            vec![
                Some(SqlValue::Int(2)),
                Some(SqlValue::Float(2.0)),
                Some(SqlValue::Int(3)),
            ],
        );
        assert_eq!(count, SqlValue::Int(2));
    }

    #[test]
    fn test_sum_non_numeric_errors() {
        let mut acc = AggregateFunction::Sum.accumulator(false);
        assert!(acc.accumulate(Some(SqlValue::ObjectId("ff".into()))).is_err());
    }
}
