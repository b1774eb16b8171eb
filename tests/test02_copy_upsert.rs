#![cfg(feature = "test-utils")]

use futures_util::stream;
use pg_transact::prelude::*;
use pg_transact::test_utils::{setup_postgres_embedded, stop_postgres_embedded};
use tokio::runtime::Runtime;

fn text(s: &str) -> SqlValue {
    SqlValue::Text(s.to_string())
}

#[test]
fn copy_upsert_stages_and_folds() -> Result<(), Box<dyn std::error::Error>> {
    let mut cfg = deadpool_postgres::Config::new();
    cfg.dbname = Some("test_db_copy".to_string());
    let embedded = setup_postgres_embedded(&cfg)?;
    let db = Database::connect(embedded.config.clone())?;

    let rt = Runtime::new()?;
    let result = rt.block_on(async {
        let handle = db.handle();
        handle
            .exec(
                "CREATE TABLE copy_t (
                    id BIGSERIAL PRIMARY KEY,
                    k BIGINT NOT NULL UNIQUE,
                    v TEXT NOT NULL
                )",
                &[],
            )
            .await?;

        // Existing rows get server-assigned ids 1 and 2.
        handle
            .bulk_insert(
                "copy_t",
                &["k", "v"],
                &[SqlValue::Int(11), text("foo"), SqlValue::Int(12), text("bar")],
                ConflictAction::Error,
            )
            .await?;

        // Copy-upsert (13,"baz"),(11,"moo") with the identity column
        // dropped from the staging shape.
        let folded = handle
            .transact(IsolationLevel::ReadCommitted, |h| {
                Box::pin(async move {
                    let rows = stream::iter(vec![
                        Ok(vec![SqlValue::Int(13), text("baz")]),
                        Ok(vec![SqlValue::Int(11), text("moo")]),
                    ]);
                    h.copy_upsert("copy_t", &["k", "v"], rows, &["k"], Some("id")).await
                })
            })
            .await?;
        assert_eq!(folded, 2);

        let rs = handle
            .query("SELECT id, k, v FROM copy_t ORDER BY id", &[])
            .await?;
        let got: Vec<(i64, i64, String)> = rs
            .rows
            .iter()
            .map(|row| {
                (
                    row.get("id").and_then(SqlValue::as_int).unwrap(),
                    row.get("k").and_then(SqlValue::as_int).unwrap(),
                    row.get("v").and_then(SqlValue::as_text).unwrap().to_string(),
                )
            })
            .collect();
        assert_eq!(
            got,
            vec![
                (1, 11, "moo".to_string()),
                (2, 12, "bar".to_string()),
                (3, 13, "baz".to_string())
            ]
        );

        Ok::<_, Box<dyn std::error::Error>>(())
    });
    stop_postgres_embedded(embedded);
    result
}

#[test]
fn copy_upsert_error_stream_aborts_without_fold() -> Result<(), Box<dyn std::error::Error>> {
    let mut cfg = deadpool_postgres::Config::new();
    cfg.dbname = Some("test_db_copy_err".to_string());
    let embedded = setup_postgres_embedded(&cfg)?;
    let db = Database::connect(embedded.config.clone())?;

    let rt = Runtime::new()?;
    let result = rt.block_on(async {
        let handle = db.handle();
        handle
            .exec(
                "CREATE TABLE copy_err_t (k BIGINT PRIMARY KEY, v TEXT NOT NULL)",
                &[],
            )
            .await?;

        // The first error item becomes the call's result; rows staged
        // before it never reach the target.
        let err = handle
            .transact(IsolationLevel::ReadCommitted, |h| {
                Box::pin(async move {
                    let rows = stream::iter(vec![
                        Ok(vec![SqlValue::Int(14), text("zap")]),
                        Err(DbError::Execution("producer failed".to_string())),
                        Ok(vec![SqlValue::Int(15), text("never read")]),
                    ]);
                    h.copy_upsert("copy_err_t", &["k", "v"], rows, &["k"], None).await
                })
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("producer failed"), "{err}");

        let count = handle
            .query_row("SELECT COUNT(*)::BIGINT FROM copy_err_t", &[])
            .await?
            .get_by_index(0)
            .and_then(SqlValue::as_int)
            .unwrap();
        assert_eq!(count, 0);

        // The copy loader depends on a transaction-scoped staging table and
        // refuses to run against the bare pool.
        let rows = stream::iter(Vec::<Result<Vec<SqlValue>, DbError>>::new());
        let err = handle
            .copy_upsert("copy_err_t", &["k", "v"], rows, &["k"], None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::TransactionRequired("copy_upsert")));

        Ok::<_, Box<dyn std::error::Error>>(())
    });
    stop_postgres_embedded(embedded);
    result
}
