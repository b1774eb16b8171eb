use postgresql_embedded::PostgreSQL;

use super::SHARED_RUNTIME;
use crate::pool::Database;
use crate::value::SqlValue;

/// A running embedded PostgreSQL instance.
pub struct EmbeddedPostgres {
    pub postgresql: PostgreSQL,
    pub port: u16,
    /// Pool config pointing at the embedded server with working
    /// credentials.
    pub config: deadpool_postgres::Config,
}

/// Set up an embedded PostgreSQL instance for testing.
///
/// Only `cfg.dbname` is consulted; host, port, and credentials come from the
/// embedded server. The returned config is ready for
/// [`Database::connect`].
///
/// # Errors
/// Returns an error if the embedded server cannot be set up or started, the
/// database cannot be created, or the post-start connectivity check fails.
///
/// # Panics
/// Panics if `cfg.dbname` is `None`.
pub fn setup_postgres_embedded(
    cfg: &deadpool_postgres::Config,
) -> Result<EmbeddedPostgres, Box<dyn std::error::Error>> {
    SHARED_RUNTIME.block_on(async {
        let mut postgresql = PostgreSQL::default();

        // Bundled binaries, so no download conflicts between test processes.
        postgresql.setup().await?;
        postgresql.start().await?;

        let settings = postgresql.settings();
        let port = settings.port;
        let host = settings.host.clone();
        let user = settings.username.clone();
        let password = settings.password.clone();

        let db_name = cfg.dbname.as_ref().expect("dbname is required");
        postgresql.create_database(db_name).await?;

        let mut final_cfg = cfg.clone();
        final_cfg.host = Some(host);
        final_cfg.port = Some(port);
        final_cfg.user = Some(user);
        final_cfg.password = Some(password);

        // Quick connectivity check before handing the config to a test.
        let db = Database::connect(final_cfg.clone())?;
        let row = db.handle().query_row("SELECT 1", &[]).await?;
        assert_eq!(row.get_by_index(0), Some(&SqlValue::Int(1)));

        Ok(EmbeddedPostgres {
            postgresql,
            port,
            config: final_cfg,
        })
    })
}

/// Stop a previously started embedded PostgreSQL instance.
pub fn stop_postgres_embedded(postgres: EmbeddedPostgres) {
    let EmbeddedPostgres { postgresql, .. } = postgres;
    SHARED_RUNTIME.block_on(async move {
        let _ = postgresql.stop().await;
    });
}
