//! Scalar function catalog and evaluation.

use crate::error::{DocsqlError, DocsqlResult};
use crate::expr::value::{SqlType, SqlValue};

/// Built-in scalar functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarFunction {
    Upper,
    Lower,
    Length,
    Concat,
    Trim,
    Abs,
    Round,
    Floor,
    Ceil,
    Sqrt,
    Power,
    Coalesce,
    Year,
    Month,
    Day,
}

impl ScalarFunction {
    /// Look up a function by its SQL name (case-insensitive).
    pub fn from_name(name: &str) -> Option<ScalarFunction> {
        let func = match name.to_ascii_uppercase().as_str() {
            "UPPER" | "UCASE" => ScalarFunction::Upper,
            "LOWER" | "LCASE" => ScalarFunction::Lower,
            "LENGTH" | "CHAR_LENGTH" => ScalarFunction::Length,
            "CONCAT" => ScalarFunction::Concat,
            "TRIM" => ScalarFunction::Trim,
            "ABS" => ScalarFunction::Abs,
            "ROUND" => ScalarFunction::Round,
            "FLOOR" => ScalarFunction::Floor,
            "CEIL" | "CEILING" => ScalarFunction::Ceil,
            "SQRT" => ScalarFunction::Sqrt,
            "POWER" | "POW" => ScalarFunction::Power,
            "COALESCE" => ScalarFunction::Coalesce,
            "YEAR" => ScalarFunction::Year,
            "MONTH" => ScalarFunction::Month,
            "DAY" | "DAYOFMONTH" => ScalarFunction::Day,
            _ => return None,
        };
        Some(func)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScalarFunction::Upper => "UPPER",
            ScalarFunction::Lower => "LOWER",
            ScalarFunction::Length => "LENGTH",
            ScalarFunction::Concat => "CONCAT",
            ScalarFunction::Trim => "TRIM",
            ScalarFunction::Abs => "ABS",
            ScalarFunction::Round => "ROUND",
            ScalarFunction::Floor => "FLOOR",
            ScalarFunction::Ceil => "CEIL",
            ScalarFunction::Sqrt => "SQRT",
            ScalarFunction::Power => "POWER",
            ScalarFunction::Coalesce => "COALESCE",
            ScalarFunction::Year => "YEAR",
            ScalarFunction::Month => "MONTH",
            ScalarFunction::Day => "DAY",
        }
    }

    /// Arity check at plan time. `None` means variadic (at least one arg).
    pub fn arity(&self) -> Option<usize> {
        match self {
            ScalarFunction::Concat | ScalarFunction::Coalesce => None,
            ScalarFunction::Power => Some(2),
            ScalarFunction::Round => None, // 1 or 2 args
            _ => Some(1),
        }
    }

    pub fn check_arity(&self, count: usize) -> DocsqlResult<()> {
        let ok = match self {
            ScalarFunction::Concat | ScalarFunction::Coalesce => count >= 1,
            ScalarFunction::Round => count == 1 || count == 2,
            ScalarFunction::Power => count == 2,
            _ => count == 1,
        };
        if ok {
            Ok(())
        } else {
            Err(DocsqlError::Evaluation(format!(
                "wrong argument count for {}: got {count}",
                self.name()
            )))
        }
    }

    /// Static result type given the argument types.
    pub fn return_type(&self, args: &[SqlType]) -> SqlType {
        match self {
            ScalarFunction::Upper
            | ScalarFunction::Lower
            | ScalarFunction::Concat
            | ScalarFunction::Trim => SqlType::Varchar,
            ScalarFunction::Length
            | ScalarFunction::Year
            | ScalarFunction::Month
            | ScalarFunction::Day => SqlType::Int,
            ScalarFunction::Sqrt | ScalarFunction::Power => SqlType::Float,
            ScalarFunction::Abs
            | ScalarFunction::Round
            | ScalarFunction::Floor
            | ScalarFunction::Ceil => args.first().copied().unwrap_or(SqlType::Float),
            ScalarFunction::Coalesce => args
                .iter()
                .copied()
                .find(|t| *t != SqlType::Null)
                .unwrap_or(SqlType::Null),
        }
    }

    /// Evaluate against already-materialized argument values.
    ///
    /// NULL in any required argument yields NULL; COALESCE is the one
    /// function defined over NULL inputs.
    pub fn evaluate(&self, args: &[SqlValue]) -> DocsqlResult<SqlValue> {
        self.check_arity(args.len())?;
        if *self == ScalarFunction::Coalesce {
            return Ok(args
                .iter()
                .find(|v| **v != SqlValue::Null)
                .cloned()
                .unwrap_or(SqlValue::Null));
        }
        if args.iter().any(|v| *v == SqlValue::Null) {
            return Ok(SqlValue::Null);
        }
        match self {
            ScalarFunction::Upper => Ok(SqlValue::Varchar(string_arg(self, &args[0])?.to_uppercase())),
            ScalarFunction::Lower => Ok(SqlValue::Varchar(string_arg(self, &args[0])?.to_lowercase())),
            ScalarFunction::Trim => {
                Ok(SqlValue::Varchar(string_arg(self, &args[0])?.trim().to_string()))
            }
            ScalarFunction::Length => {
                Ok(SqlValue::Int(string_arg(self, &args[0])?.chars().count() as i64))
            }
            ScalarFunction::Concat => {
                let mut out = String::new();
                for arg in args {
                    match arg {
                        SqlValue::Varchar(s) => out.push_str(s),
                        other => out.push_str(&other.to_string()),
                    }
                }
                Ok(SqlValue::Varchar(out))
            }
            ScalarFunction::Abs => match &args[0] {
                SqlValue::Int(n) => Ok(SqlValue::Int(n.abs())),
                other => Ok(SqlValue::Float(numeric_arg(self, other)?.abs())),
            },
            ScalarFunction::Round => {
                let value = numeric_arg(self, &args[0])?;
                let places = match args.get(1) {
                    Some(v) => numeric_arg(self, v)? as i32,
                    None => 0,
                };
                let scale = 10f64.powi(places);
                let rounded = (value * scale).round() / scale;
                match &args[0] {
                    SqlValue::Int(_) if places >= 0 => Ok(SqlValue::Int(rounded as i64)),
                    _ => Ok(SqlValue::Float(rounded)),
                }
            }
            ScalarFunction::Floor => Ok(SqlValue::Float(numeric_arg(self, &args[0])?.floor())),
            ScalarFunction::Ceil => Ok(SqlValue::Float(numeric_arg(self, &args[0])?.ceil())),
            ScalarFunction::Sqrt => {
                let value = numeric_arg(self, &args[0])?;
                if value < 0.0 {
                    return Err(DocsqlError::Evaluation(
                        "SQRT of a negative number".to_string(),
                    ));
                }
                Ok(SqlValue::Float(value.sqrt()))
            }
            ScalarFunction::Power => {
                let base = numeric_arg(self, &args[0])?;
                let exp = numeric_arg(self, &args[1])?;
                Ok(SqlValue::Float(base.powf(exp)))
            }
            ScalarFunction::Year => Ok(SqlValue::Int(civil_part(self, &args[0])?.0)),
            ScalarFunction::Month => Ok(SqlValue::Int(civil_part(self, &args[0])?.1)),
            ScalarFunction::Day => Ok(SqlValue::Int(civil_part(self, &args[0])?.2)),
            ScalarFunction::Coalesce => unreachable!("handled above"),
        }
    }
}

fn string_arg(func: &ScalarFunction, value: &SqlValue) -> DocsqlResult<String> {
    match value {
        SqlValue::Varchar(s) => Ok(s.clone()),
        SqlValue::Tuple(_) => Err(DocsqlError::Evaluation(format!(
            "{} expects a scalar argument",
            func.name()
        ))),
        other => Ok(other.to_string().trim_matches('\'').to_string()),
    }
}

fn numeric_arg(func: &ScalarFunction, value: &SqlValue) -> DocsqlResult<f64> {
    value.as_f64().ok_or_else(|| {
        DocsqlError::Evaluation(format!(
            "{} expects a numeric argument, got {value}",
            func.name()
        ))
    })
}

/// Split an epoch-ms temporal value into (year, month, day).
fn civil_part(func: &ScalarFunction, value: &SqlValue) -> DocsqlResult<(i64, i64, i64)> {
    let ms = match value {
        SqlValue::Date(ms) | SqlValue::Timestamp(ms) => *ms,
        other => {
            return Err(DocsqlError::Evaluation(format!(
                "{} expects a temporal argument, got {other}",
                func.name()
            )));
        }
    };
    Ok(civil_from_days(ms.div_euclid(86_400_000)))
}

/// Gregorian calendar date for a day count since 1970-01-01.
fn civil_from_days(days: i64) -> (i64, i64, i64) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    (if month <= 2 { year + 1 } else { year }, month, day)
}
