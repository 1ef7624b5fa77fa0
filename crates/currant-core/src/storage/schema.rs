use crate::metrics_api::{Metric, MetricKind};
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;

pub const TABLE_TESTRESULTS: &str = "testresults";
pub const TABLE_MODEL: &str = "model";
pub const COLUMN_TESTNAME: &str = "testname";

pub const MODEL_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS model (
  type TEXT PRIMARY KEY,
  content BLOB NOT NULL
);
"#;

/// Column layout of `testresults`, derived from the registered metric set.
#[derive(Debug, Clone)]
pub struct TableSchema {
    columns: Vec<(String, MetricKind)>,
}

impl TableSchema {
    pub fn from_metrics(metrics: &[Arc<dyn Metric>]) -> anyhow::Result<Self> {
        let ident = Regex::new(r"^[a-z_][a-z0-9_]*$")?;
        let mut seen = HashSet::new();
        let mut columns = Vec::with_capacity(metrics.len());

        for m in metrics {
            let col = m.column_name();
            if !ident.is_match(col) {
                anyhow::bail!("invalid metric column name '{}'", col);
            }
            if col == COLUMN_TESTNAME {
                anyhow::bail!("metric column '{}' is reserved", col);
            }
            if !seen.insert(col.to_string()) {
                anyhow::bail!("duplicate metric column '{}'", col);
            }
            if m.default_value().kind() != m.kind() {
                anyhow::bail!(
                    "metric '{}' declares {} but its default is {}",
                    col,
                    m.kind().as_str(),
                    m.default_value().kind().as_str()
                );
            }
            columns.push((col.to_string(), m.kind()));
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[(String, MetricKind)] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(c, _)| c.as_str())
    }

    pub fn create_testresults_sql(&self) -> String {
        let mut cols = vec![format!("  {} TEXT NOT NULL UNIQUE", COLUMN_TESTNAME)];
        for (name, kind) in &self.columns {
            cols.push(format!("  {} {}", name, kind.sql_type()));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
            TABLE_TESTRESULTS,
            cols.join(",\n")
        )
    }

    pub fn insert_sql(&self) -> String {
        let mut names = vec![COLUMN_TESTNAME.to_string()];
        names.extend(self.columns.iter().map(|(c, _)| c.clone()));
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();
        format!(
            "INSERT OR IGNORE INTO {} ({}) VALUES ({})",
            TABLE_TESTRESULTS,
            names.join(", "),
            placeholders.join(", ")
        )
    }

    /// Registers a name with every metric column left NULL.
    pub fn insert_name_sql(&self) -> String {
        format!(
            "INSERT OR IGNORE INTO {} ({}) VALUES (?1)",
            TABLE_TESTRESULTS, COLUMN_TESTNAME
        )
    }

    pub fn select_sql(&self, by_name: bool) -> String {
        let mut names = vec![COLUMN_TESTNAME.to_string()];
        names.extend(self.columns.iter().map(|(c, _)| c.clone()));
        let mut sql = format!("SELECT {} FROM {}", names.join(", "), TABLE_TESTRESULTS);
        if by_name {
            sql.push_str(&format!(" WHERE {} = ?1", COLUMN_TESTNAME));
        } else {
            sql.push_str(" ORDER BY rowid ASC");
        }
        sql
    }

    pub fn update_sql(&self, column: &str) -> String {
        format!(
            "UPDATE {} SET {} = ?1 WHERE {} = ?2",
            TABLE_TESTRESULTS, column, COLUMN_TESTNAME
        )
    }
}
