use crate::metrics_api::{Metric, MetricKind, MetricValue};
use crate::model::{MetricCell, TestCase};
use crate::storage::schema::{TableSchema, MODEL_DDL, TABLE_MODEL, TABLE_TESTRESULTS};
use anyhow::Context;
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Tag under which the classifier blob is stored.
pub const MODEL_TAG: &str = "hoeffding";

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    metrics: Vec<Arc<dyn Metric>>,
    schema: TableSchema,
}

impl Store {
    pub fn open(path: &Path, metrics: Vec<Arc<dyn Metric>>) -> anyhow::Result<Self> {
        let schema = TableSchema::from_metrics(&metrics)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("failed to open sqlite db")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            metrics,
            schema,
        })
    }

    pub fn memory(metrics: Vec<Arc<dyn Metric>>) -> anyhow::Result<Self> {
        let schema = TableSchema::from_metrics(&metrics)?;
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            metrics,
            schema,
        })
    }

    pub fn metrics(&self) -> &[Arc<dyn Metric>] {
        &self.metrics
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("store connection mutex poisoned"))
    }

    /// Creates both relations when absent. An existing `testresults` table
    /// whose columns disagree with the registered metrics is reported, not
    /// migrated.
    pub fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(&self.schema.create_testresults_sql())
            .context("create testresults")?;
        conn.execute_batch(MODEL_DDL).context("create model")?;

        let existing = get_columns(&conn, TABLE_TESTRESULTS)?;
        let drift = schema_drift(&self.schema, &existing);
        if !drift.is_empty() {
            tracing::error!(
                event = "currant.store.schema_drift",
                problems = ?drift,
                "stored testresults layout differs from the registered metrics; run `currant reset`"
            );
        }
        Ok(())
    }

    /// Drops and recreates both relations. All history and the model are lost.
    pub fn reset(&self) -> anyhow::Result<()> {
        {
            let conn = self.lock()?;
            conn.execute_batch(&format!(
                "DROP TABLE IF EXISTS {}; DROP TABLE IF EXISTS {};",
                TABLE_TESTRESULTS, TABLE_MODEL
            ))
            .context("drop tables")?;
        }
        self.init_schema()
    }

    pub fn get(&self, name: &str) -> anyhow::Result<Option<TestCase>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&self.schema.select_sql(true))?;
        let tc = stmt
            .query_row(params![name], |row| self.row_to_test_case(row))
            .optional()
            .with_context(|| format!("read test case '{}'", name))?;
        Ok(tc)
    }

    /// Reads `name`, inserting a row of defaults first when absent.
    pub fn get_or_create(&self, name: &str) -> anyhow::Result<TestCase> {
        if let Some(tc) = self.get(name)? {
            return Ok(tc);
        }
        self.insert(&TestCase::new(name, &self.metrics))?;
        self.get(name)?
            .ok_or_else(|| anyhow::anyhow!("test case '{}' vanished after insert", name))
    }

    fn insert(&self, tc: &TestCase) -> anyhow::Result<()> {
        let conn = self.lock()?;
        let mut values: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(tc.cells().len() + 1);
        let name = tc.name().to_string();
        values.push(&name);
        for cell in tc.cells() {
            values.push(&cell.value);
        }
        conn.execute(&self.schema.insert_sql(), values.as_slice())
            .with_context(|| format!("insert test case '{}'", tc.name()))?;
        Ok(())
    }

    /// Writes every cell of `tc` to its column. A failing column is logged
    /// and skipped; the others still commit. Returns the number of columns
    /// that failed.
    pub fn update_all(&self, tc: &TestCase) -> anyhow::Result<usize> {
        let mut conn = self.lock()?;
        // Only the key column, so a broken metric column cannot block the
        // per-column writes below.
        if let Err(e) = conn.execute(&self.schema.insert_name_sql(), params![tc.name()]) {
            tracing::warn!(
                event = "currant.store.insert_failed",
                test = %tc.name(),
                error = %e,
                "failed to register test case row"
            );
        }

        let tx = conn.transaction()?;
        let mut failed = 0;
        for cell in tc.cells() {
            let column = cell.metric.column_name();
            let res = tx.execute(
                &self.schema.update_sql(column),
                params![&cell.value, tc.name()],
            );
            if let Err(e) = res {
                failed += 1;
                tracing::warn!(
                    event = "currant.store.update_failed",
                    test = %tc.name(),
                    column = %column,
                    error = %e,
                    "failed to write metric column"
                );
            }
        }
        tx.commit().context("commit test case update")?;
        Ok(failed)
    }

    /// Every stored test case, in insertion order.
    pub fn list_all(&self) -> anyhow::Result<Vec<TestCase>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&self.schema.select_sql(false))?;
        let rows = stmt.query_map([], |row| self.row_to_test_case(row))?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn names(&self) -> anyhow::Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT testname FROM {} ORDER BY rowid ASC",
            TABLE_TESTRESULTS
        ))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn count(&self) -> anyhow::Result<i64> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", TABLE_TESTRESULTS),
            [],
            |r| r.get(0),
        )?;
        Ok(n)
    }

    pub fn delete(&self, name: &str) -> anyhow::Result<bool> {
        let conn = self.lock()?;
        let n = conn.execute(
            &format!("DELETE FROM {} WHERE testname = ?1", TABLE_TESTRESULTS),
            params![name],
        )?;
        Ok(n > 0)
    }

    /// Removes every test case that one of its metrics marks deletable and
    /// returns the removed names.
    pub fn delete_eligible(&self) -> anyhow::Result<Vec<String>> {
        let doomed: Vec<String> = self
            .list_all()?
            .into_iter()
            .filter(TestCase::eligible_for_deletion)
            .map(|tc| tc.name().to_string())
            .collect();
        for name in &doomed {
            self.delete(name)?;
        }
        Ok(doomed)
    }

    pub fn model_get(&self, tag: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let conn = self.lock()?;
        let blob = conn
            .query_row(
                &format!("SELECT content FROM {} WHERE type = ?1", TABLE_MODEL),
                params![tag],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(blob)
    }

    pub fn model_put(&self, tag: &str, content: &[u8]) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO {}(type, content) VALUES (?1, ?2)
                 ON CONFLICT(type) DO UPDATE SET content=excluded.content",
                TABLE_MODEL
            ),
            params![tag, content],
        )?;
        Ok(())
    }

    fn row_to_test_case(&self, row: &rusqlite::Row<'_>) -> rusqlite::Result<TestCase> {
        let name: String = row.get(0)?;
        let mut cells = Vec::with_capacity(self.metrics.len());
        for (i, m) in self.metrics.iter().enumerate() {
            let raw: Value = row.get(i + 1)?;
            cells.push(MetricCell {
                metric: Arc::clone(m),
                value: value_from_sql(m.kind(), raw),
            });
        }
        Ok(TestCase::from_cells(name, cells))
    }
}

/// Converts a raw SQLite value into the variant of `kind`. SQLite does not
/// enforce column types, so cross-type values are coerced where sensible and
/// become NULL otherwise.
fn value_from_sql(kind: MetricKind, raw: Value) -> MetricValue {
    match (kind, raw) {
        (MetricKind::Text, Value::Text(s)) => MetricValue::Text(Some(s)),
        (MetricKind::Text, Value::Integer(i)) => MetricValue::Text(Some(i.to_string())),
        (MetricKind::Text, Value::Real(d)) => MetricValue::Text(Some(d.to_string())),
        (MetricKind::Integer, Value::Integer(i)) => MetricValue::Integer(Some(i)),
        (MetricKind::Integer, Value::Real(d)) => MetricValue::Integer(Some(d as i64)),
        (MetricKind::Integer, Value::Text(s)) => MetricValue::Integer(s.trim().parse().ok()),
        (MetricKind::Double, Value::Real(d)) => MetricValue::Double(Some(d)),
        (MetricKind::Double, Value::Integer(i)) => MetricValue::Double(Some(i as f64)),
        (MetricKind::Double, Value::Text(s)) => MetricValue::Double(s.trim().parse().ok()),
        (kind, _) => MetricValue::null(kind),
    }
}

fn get_columns(conn: &Connection, table: &str) -> anyhow::Result<HashMap<String, String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?))
    })?;
    let mut out = HashMap::new();
    for r in rows {
        let (name, ty) = r?;
        out.insert(name, ty.to_ascii_uppercase());
    }
    Ok(out)
}

fn schema_drift(schema: &TableSchema, existing: &HashMap<String, String>) -> Vec<String> {
    let mut problems = Vec::new();
    for (col, kind) in schema.columns() {
        match existing.get(col) {
            None => problems.push(format!("missing column {}", col)),
            Some(ty) if ty != kind.sql_type() => problems.push(format!(
                "column {} is {} but metric is {}",
                col,
                ty,
                kind.sql_type()
            )),
            Some(_) => {}
        }
    }
    let mut extra: Vec<&String> = existing
        .keys()
        .filter(|c| c.as_str() != "testname" && !schema.column_names().any(|n| n == c.as_str()))
        .collect();
    extra.sort();
    for col in extra {
        problems.push(format!("unregistered column {}", col));
    }
    problems
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Count;

    impl Metric for Count {
        fn column_name(&self) -> &str {
            "count"
        }
        fn display_name(&self) -> String {
            "Count".into()
        }
        fn kind(&self) -> MetricKind {
            MetricKind::Integer
        }
        fn min_display_width(&self) -> usize {
            5
        }
        fn default_value(&self) -> MetricValue {
            MetricValue::Integer(Some(0))
        }
        fn eligible_for_deletion(&self, value: &MetricValue) -> bool {
            value.as_integer().unwrap_or(0) > 2
        }
    }

    struct Label;

    impl Metric for Label {
        fn column_name(&self) -> &str {
            "label"
        }
        fn display_name(&self) -> String {
            "Label".into()
        }
        fn kind(&self) -> MetricKind {
            MetricKind::Text
        }
        fn min_display_width(&self) -> usize {
            1
        }
    }

    fn store() -> Store {
        let metrics: Vec<Arc<dyn Metric>> = vec![Arc::new(Count), Arc::new(Label)];
        let s = Store::memory(metrics).unwrap();
        s.init_schema().unwrap();
        s
    }

    #[test]
    fn init_schema_is_idempotent() {
        let s = store();
        s.init_schema().unwrap();
        assert_eq!(s.count().unwrap(), 0);
    }

    #[test]
    fn get_or_create_inserts_defaults_once() {
        let s = store();
        let a = s.get_or_create("t1").unwrap();
        let b = s.get_or_create("t1").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.value("count"), Some(&MetricValue::Integer(Some(0))));
        assert_eq!(a.value("label"), Some(&MetricValue::Text(None)));
        assert_eq!(s.count().unwrap(), 1);
    }

    #[test]
    fn update_all_round_trips_values_and_nulls() {
        let s = store();
        let mut tc = s.get_or_create("t1").unwrap();
        tc.set_value("count", MetricValue::Integer(Some(7))).unwrap();
        tc.set_value("label", MetricValue::Text(Some("x".into())))
            .unwrap();
        assert_eq!(s.update_all(&tc).unwrap(), 0);
        assert_eq!(s.get("t1").unwrap().unwrap(), tc);

        tc.set_value("label", MetricValue::Text(None)).unwrap();
        s.update_all(&tc).unwrap();
        assert_eq!(
            s.get("t1").unwrap().unwrap().value("label"),
            Some(&MetricValue::Text(None))
        );
    }

    #[test]
    fn update_all_registers_unknown_names() {
        let s = store();
        let mut tc = TestCase::new("late", s.metrics());
        tc.set_value("count", MetricValue::Integer(Some(2))).unwrap();
        assert_eq!(s.update_all(&tc).unwrap(), 0);
        assert_eq!(s.get("late").unwrap().unwrap(), tc);
    }

    #[test]
    fn list_names_and_delete() {
        let s = store();
        for n in ["b", "a", "c"] {
            s.get_or_create(n).unwrap();
        }
        assert_eq!(s.names().unwrap(), vec!["b", "a", "c"]);
        assert!(s.delete("a").unwrap());
        assert!(!s.delete("a").unwrap());
        let all: Vec<String> = s
            .list_all()
            .unwrap()
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(all, vec!["b", "c"]);
    }

    #[test]
    fn delete_eligible_removes_flagged_rows() {
        let s = store();
        let mut stale = s.get_or_create("stale").unwrap();
        s.get_or_create("fresh").unwrap();
        stale.set_value("count", MetricValue::Integer(Some(3))).unwrap();
        s.update_all(&stale).unwrap();

        assert_eq!(s.delete_eligible().unwrap(), vec!["stale".to_string()]);
        assert_eq!(s.names().unwrap(), vec!["fresh"]);
    }

    #[test]
    fn model_slot_upserts() {
        let s = store();
        assert_eq!(s.model_get(MODEL_TAG).unwrap(), None);
        s.model_put(MODEL_TAG, b"one").unwrap();
        s.model_put(MODEL_TAG, b"two").unwrap();
        assert_eq!(s.model_get(MODEL_TAG).unwrap(), Some(b"two".to_vec()));
    }

    #[test]
    fn reset_clears_everything() {
        let s = store();
        s.get_or_create("t").unwrap();
        s.model_put(MODEL_TAG, b"m").unwrap();
        s.reset().unwrap();
        assert_eq!(s.count().unwrap(), 0);
        assert_eq!(s.model_get(MODEL_TAG).unwrap(), None);
    }

    #[test]
    fn drift_is_detected() {
        let metrics: Vec<Arc<dyn Metric>> = vec![Arc::new(Count), Arc::new(Label)];
        let schema = TableSchema::from_metrics(&metrics).unwrap();
        let mut existing = HashMap::new();
        existing.insert("testname".to_string(), "TEXT".to_string());
        existing.insert("count".to_string(), "TEXT".to_string());
        existing.insert("old".to_string(), "REAL".to_string());
        let problems = schema_drift(&schema, &existing);
        assert_eq!(
            problems,
            vec![
                "column count is TEXT but metric is INTEGER".to_string(),
                "missing column label".to_string(),
                "unregistered column old".to_string(),
            ]
        );
    }

    #[test]
    fn coerces_cross_type_values() {
        assert_eq!(
            value_from_sql(MetricKind::Double, Value::Integer(2)),
            MetricValue::Double(Some(2.0))
        );
        assert_eq!(
            value_from_sql(MetricKind::Integer, Value::Text("x".into())),
            MetricValue::Integer(None)
        );
        assert_eq!(
            value_from_sql(MetricKind::Text, Value::Null),
            MetricValue::Text(None)
        );
    }
}
