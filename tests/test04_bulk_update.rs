#![cfg(feature = "test-utils")]

use pg_transact::prelude::*;
use pg_transact::test_utils::{setup_postgres_embedded, stop_postgres_embedded};
use tokio::runtime::Runtime;

fn text(s: &str) -> SqlValue {
    SqlValue::Text(s.to_string())
}

#[test]
fn bulk_update_batches_match_single_statement_result() -> Result<(), Box<dyn std::error::Error>> {
    let mut cfg = deadpool_postgres::Config::new();
    cfg.dbname = Some("test_db_update".to_string());
    let embedded = setup_postgres_embedded(&cfg)?;
    let db = Database::connect(embedded.config.clone())?;

    let rt = Runtime::new()?;
    let result = rt.block_on(async {
        let handle = db.handle();
        handle
            .exec(
                "CREATE TABLE upd_t (k BIGINT PRIMARY KEY, v TEXT NOT NULL, n BIGINT NOT NULL)",
                &[],
            )
            .await?;

        let mut seed = Vec::new();
        for k in 0..25i64 {
            seed.push(SqlValue::Int(k));
            seed.push(text(&format!("v{k}")));
            seed.push(SqlValue::Int(k * 10));
        }
        handle
            .bulk_insert("upd_t", &["k", "v", "n"], &seed, ConflictAction::Error)
            .await?;

        // Columnar input: one slice per column, key first. A batch size of
        // 10 forces three statements over 25 rows; the final state must be
        // what a single unbounded statement would produce.
        let keys: Vec<SqlValue> = (0..25i64).map(SqlValue::Int).collect();
        let vs: Vec<SqlValue> = (0..25i64).map(|k| text(&format!("u{k}"))).collect();
        let ns: Vec<SqlValue> = (0..25i64).map(|k| SqlValue::Int(k * 100)).collect();
        let affected = handle
            .bulk_update_with_batch_size(
                "upd_t",
                &["k", "v", "n"],
                &["BIGINT", "TEXT", "BIGINT"],
                &[keys, vs, ns],
                10,
            )
            .await?;
        assert_eq!(affected, 25);

        let rs = handle
            .query("SELECT k, v, n FROM upd_t ORDER BY k", &[])
            .await?;
        assert_eq!(rs.len(), 25);
        for row in &rs.rows {
            let k = row.get("k").and_then(SqlValue::as_int).unwrap();
            assert_eq!(row.get("v").and_then(SqlValue::as_text), Some(format!("u{k}").as_str()));
            assert_eq!(row.get("n").and_then(SqlValue::as_int), Some(k * 100));
        }

        // Rows absent from the table are simply not matched.
        let affected = handle
            .bulk_update(
                "upd_t",
                &["k", "v"],
                &["BIGINT", "TEXT"],
                &[vec![SqlValue::Int(999)], vec![text("ghost")]],
            )
            .await?;
        assert_eq!(affected, 0);

        Ok::<_, Box<dyn std::error::Error>>(())
    });
    stop_postgres_embedded(embedded);
    result
}
