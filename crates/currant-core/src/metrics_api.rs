//! Metric type system.
//!
//! A metric is a stateless descriptor shared by every test case. The value it
//! describes lives in a [`MetricValue`] cell owned by the test case, so a
//! descriptor never has to know which test it is being applied to.

use crate::model::{CoverageCounters, TestResult};
use rusqlite::types::{ToSql, ToSqlOutput, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Storage kind of a metric. Decides the SQL column type and which
/// [`MetricValue`] variant a cell holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Text,
    Integer,
    Double,
}

impl MetricKind {
    pub fn sql_type(&self) -> &'static str {
        match self {
            MetricKind::Text => "TEXT",
            MetricKind::Integer => "INTEGER",
            MetricKind::Double => "REAL",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Text => "text",
            MetricKind::Integer => "integer",
            MetricKind::Double => "double",
        }
    }
}

/// A typed, nullable metric value. `None` is SQL `NULL`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MetricValue {
    Text(Option<String>),
    Integer(Option<i64>),
    Double(Option<f64>),
}

impl MetricValue {
    pub fn null(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Text => MetricValue::Text(None),
            MetricKind::Integer => MetricValue::Integer(None),
            MetricKind::Double => MetricValue::Double(None),
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Text(_) => MetricKind::Text,
            MetricValue::Integer(_) => MetricKind::Integer,
            MetricValue::Double(_) => MetricKind::Double,
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            MetricValue::Text(v) => v.is_none(),
            MetricValue::Integer(v) => v.is_none(),
            MetricValue::Double(v) => v.is_none(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetricValue::Text(v) => v.as_deref(),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            MetricValue::Integer(v) => *v,
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            MetricValue::Double(v) => *v,
            _ => None,
        }
    }

    /// Plain numeric reading: integers and doubles as-is, text parsed when it
    /// holds a number, NULL as 0.0.
    pub fn to_f64(&self) -> f64 {
        match self {
            MetricValue::Integer(v) => v.map(|x| x as f64).unwrap_or(0.0),
            MetricValue::Double(v) => v.unwrap_or(0.0),
            MetricValue::Text(v) => v
                .as_deref()
                .and_then(|s| s.trim().parse::<f64>().ok())
                .unwrap_or(0.0),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Text(Some(s)) => write!(f, "{}", s),
            MetricValue::Integer(Some(v)) => write!(f, "{}", v),
            MetricValue::Double(Some(v)) => write!(f, "{:.3}", v),
            _ => write!(f, "-"),
        }
    }
}

impl ToSql for MetricValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let v = match self {
            MetricValue::Text(Some(s)) => Value::Text(s.clone()),
            MetricValue::Integer(Some(i)) => Value::Integer(*i),
            MetricValue::Double(Some(d)) => Value::Real(*d),
            _ => Value::Null,
        };
        Ok(ToSqlOutput::Owned(v))
    }
}

/// Behaviour bundle of one metric.
///
/// Every hook defaults to a no-op; an implementation overrides only the
/// events it reacts to. Hooks receive the cell of the test case being
/// updated and must keep the variant matching [`Metric::kind`].
pub trait Metric: Send + Sync {
    /// Column in the `testresults` relation. Must be a lowercase SQL identifier.
    fn column_name(&self) -> &str;

    fn display_name(&self) -> String;

    fn kind(&self) -> MetricKind;

    fn min_display_width(&self) -> usize;

    /// Value a freshly created test case starts with.
    fn default_value(&self) -> MetricValue {
        MetricValue::null(self.kind())
    }

    fn format_for_display(&self, value: &MetricValue) -> String {
        value.to_string()
    }

    /// Numeric feature used by the classifier.
    fn numeric_projection(&self, value: &MetricValue) -> f64 {
        value.to_f64()
    }

    fn participates_in_training(&self) -> bool {
        true
    }

    fn training_attribute(&self) -> String {
        self.display_name()
    }

    /// Opt-in garbage collection: a test case is removed from the store when
    /// any of its metrics says so.
    fn eligible_for_deletion(&self, _value: &MetricValue) -> bool {
        false
    }

    fn on_result(&self, _value: &mut MetricValue, _result: TestResult) {}

    fn on_duration(&self, _value: &mut MetricValue, _duration: Duration) {}

    fn on_coverage(&self, _value: &mut MetricValue, _coverage: &CoverageCounters) {}

    fn on_uniqueness(&self, _value: &mut MetricValue, _score: f64) {}

    fn on_execution_presence(&self, _value: &mut MetricValue, _was_executed: bool) {}
}

impl fmt::Debug for dyn Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metric")
            .field("column", &self.column_name())
            .field("kind", &self.kind())
            .finish()
    }
}
