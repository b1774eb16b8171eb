#![cfg(feature = "test-utils")]

use pg_transact::prelude::*;
use pg_transact::test_utils::{setup_postgres_embedded, stop_postgres_embedded};
use tokio::runtime::Runtime;

fn text(s: &str) -> SqlValue {
    SqlValue::Text(s.to_string())
}

#[test]
fn bulk_insert_upsert_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
    let mut cfg = deadpool_postgres::Config::new();
    cfg.dbname = Some("test_db".to_string());
    let embedded = setup_postgres_embedded(&cfg)?;
    let db = Database::connect(embedded.config.clone())?;

    let rt = Runtime::new()?;
    let result = rt.block_on(async {
        let handle = db.handle();
        handle
            .exec(
                "CREATE TABLE upsert_t (k BIGINT PRIMARY KEY, v TEXT NOT NULL)",
                &[],
            )
            .await?;

        // Seed (1,"foo"),(2,"bar").
        let seeded = handle
            .bulk_insert(
                "upsert_t",
                &["k", "v"],
                &[SqlValue::Int(1), text("foo"), SqlValue::Int(2), text("bar")],
                ConflictAction::Error,
            )
            .await?;
        assert_eq!(seeded, 2);

        // Upsert (3,"baz"),(1,"moo"): new key inserts, existing key is
        // overwritten.
        handle
            .bulk_insert(
                "upsert_t",
                &["k", "v"],
                &[SqlValue::Int(3), text("baz"), SqlValue::Int(1), text("moo")],
                ConflictAction::Upsert {
                    conflict_columns: &["k"],
                },
            )
            .await?;

        let rs = handle
            .query("SELECT k, v FROM upsert_t ORDER BY k", &[])
            .await?;
        let got: Vec<(i64, String)> = rs
            .rows
            .iter()
            .map(|row| {
                (
                    row.get("k").and_then(SqlValue::as_int).unwrap(),
                    row.get("v").and_then(SqlValue::as_text).unwrap().to_string(),
                )
            })
            .collect();
        assert_eq!(
            got,
            vec![
                (1, "moo".to_string()),
                (2, "bar".to_string()),
                (3, "baz".to_string())
            ]
        );

        // Upserting the same key again takes the latest value.
        handle
            .bulk_insert(
                "upsert_t",
                &["k", "v"],
                &[SqlValue::Int(1), text("final")],
                ConflictAction::Upsert {
                    conflict_columns: &["k"],
                },
            )
            .await?;
        let row = handle
            .query_row("SELECT v FROM upsert_t WHERE k = $1", &[SqlValue::Int(1)])
            .await?;
        assert_eq!(row.get("v").and_then(SqlValue::as_text), Some("final"));

        // ON CONFLICT DO NOTHING is idempotent: re-running the same insert
        // on present keys changes nothing.
        let before = handle
            .query_row("SELECT COUNT(*)::BIGINT FROM upsert_t", &[])
            .await?
            .get_by_index(0)
            .and_then(SqlValue::as_int)
            .unwrap();
        let skipped = handle
            .bulk_insert(
                "upsert_t",
                &["k", "v"],
                &[SqlValue::Int(1), text("zzz"), SqlValue::Int(2), text("zzz")],
                ConflictAction::Nothing,
            )
            .await?;
        assert_eq!(skipped, 0);
        let after = handle
            .query_row("SELECT COUNT(*)::BIGINT FROM upsert_t", &[])
            .await?
            .get_by_index(0)
            .and_then(SqlValue::as_int)
            .unwrap();
        assert_eq!(before, after);
        let row = handle
            .query_row("SELECT v FROM upsert_t WHERE k = $1", &[SqlValue::Int(1)])
            .await?;
        assert_eq!(row.get("v").and_then(SqlValue::as_text), Some("final"));

        // RETURNING feeds rows through the scan callback in order.
        let mut returned = Vec::new();
        handle
            .bulk_insert_returning(
                "upsert_t",
                &["k", "v"],
                &[SqlValue::Int(10), text("x"), SqlValue::Int(11), text("y")],
                ConflictAction::Error,
                &["k"],
                |row| {
                    returned.push(row.get("k").and_then(SqlValue::as_int).ok_or(DbError::NoRows)?);
                    Ok(())
                },
            )
            .await?;
        assert_eq!(returned, vec![10, 11]);

        // A plain insert onto an existing key is a constraint violation,
        // classified as such and never as a serialization failure.
        let err = handle
            .bulk_insert(
                "upsert_t",
                &["k", "v"],
                &[SqlValue::Int(1), text("dup")],
                ConflictAction::Error,
            )
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
        assert!(!err.is_serialization_failure());
        assert!(matches!(err, DbError::BatchFailed { ref rows, .. } if *rows == (0..1)));

        Ok::<_, Box<dyn std::error::Error>>(())
    });
    stop_postgres_embedded(embedded);
    result
}

#[test]
fn bulk_insert_chunks_below_parameter_ceiling() -> Result<(), Box<dyn std::error::Error>> {
    let mut cfg = deadpool_postgres::Config::new();
    cfg.dbname = Some("test_db_chunks".to_string());
    let embedded = setup_postgres_embedded(&cfg)?;
    let db = Database::connect(embedded.config.clone())?;

    let rt = Runtime::new()?;
    let result = rt.block_on(async {
        let handle = db.handle();
        handle
            .exec(
                "CREATE TABLE chunk_t (k BIGINT PRIMARY KEY, v TEXT NOT NULL, n BIGINT NOT NULL)",
                &[],
            )
            .await?;

        // 700 rows x 3 columns = 2100 values: forces three batches under
        // the 1000-parameter ceiling (333 rows per full batch).
        let mut values = Vec::with_capacity(700 * 3);
        for k in 0..700i64 {
            values.push(SqlValue::Int(k));
            values.push(text(&format!("v{k}")));
            values.push(SqlValue::Int(k * 10));
        }
        let affected = handle
            .bulk_insert("chunk_t", &["k", "v", "n"], &values, ConflictAction::Error)
            .await?;
        assert_eq!(affected, 700);

        let count = handle
            .query_row("SELECT COUNT(*)::BIGINT FROM chunk_t", &[])
            .await?
            .get_by_index(0)
            .and_then(SqlValue::as_int)
            .unwrap();
        assert_eq!(count, 700);

        // Rows from the final partial batch made it intact.
        let row = handle
            .query_row("SELECT v, n FROM chunk_t WHERE k = $1", &[SqlValue::Int(699)])
            .await?;
        assert_eq!(row.get("v").and_then(SqlValue::as_text), Some("v699"));
        assert_eq!(row.get("n").and_then(SqlValue::as_int), Some(6990));

        Ok::<_, Box<dyn std::error::Error>>(())
    });
    stop_postgres_embedded(embedded);
    result
}
