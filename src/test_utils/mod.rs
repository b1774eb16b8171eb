//! Embedded-PostgreSQL harness for integration tests, behind the
//! `test-utils` feature.

use std::sync::LazyLock;
use tokio::runtime::Runtime;

/// Shared tokio runtime for test utilities to avoid creating one per setup
/// call.
pub(crate) static SHARED_RUNTIME: LazyLock<Runtime> =
    LazyLock::new(|| Runtime::new().expect("Failed to create tokio runtime for test utilities"));

pub mod postgres;

pub use postgres::{EmbeddedPostgres, setup_postgres_embedded, stop_postgres_embedded};
