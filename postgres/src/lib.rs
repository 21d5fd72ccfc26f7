//! `PostgreSQL` storage for the Questline task engine.
//!
//! Implements the repository and unit-of-work traits from `questline-core`
//! over `sqlx`. Repositories come in two bindings:
//!
//! - pool-bound, for the read paths (task catalog, progress queries)
//! - transaction-bound, handed out by [`PostgresUnitOfWork`] so every
//!   operation inside one unit of work runs on the same transaction
//!
//! Transactional integrity leans on `sqlx`: dropping an uncommitted
//! [`sqlx::Transaction`] rolls it back, so no exit path can leave a
//! transaction open.
//!
//! # Example
//!
//! ```ignore
//! use questline_postgres::{connect, PostgresUnitOfWorkManager};
//!
//! let pool = connect("postgres://localhost/questline").await?;
//! questline_postgres::run_migrations(&pool).await?;
//! let manager = PostgresUnitOfWorkManager::new(pool.clone());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod events;
mod progress;
mod tasks;
mod unit_of_work;

pub use events::PostgresEventLedger;
pub use progress::PostgresProgressRepository;
pub use tasks::PostgresTaskRepository;
pub use unit_of_work::{PostgresUnitOfWork, PostgresUnitOfWorkManager};

use questline_core::error::TaskError;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, Postgres};
use sqlx::Transaction;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Connect to `PostgreSQL` with a small default pool.
///
/// # Errors
///
/// [`TaskError::Storage`] when the connection cannot be established.
pub async fn connect(database_url: &str) -> Result<PgPool, TaskError> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(TaskError::storage)
}

/// Apply the embedded schema migrations.
///
/// # Errors
///
/// [`TaskError::Storage`] when a migration fails.
pub async fn run_migrations(pool: &PgPool) -> Result<(), TaskError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(TaskError::storage)?;
    tracing::info!("database migrations applied");
    Ok(())
}

/// A transaction shared between the repositories of one unit of work.
///
/// `None` after commit or rollback; repository calls on a closed unit of
/// work surface [`TaskError::UnitOfWorkClosed`].
pub(crate) type SharedTx = Arc<Mutex<Option<Transaction<'static, Postgres>>>>;

/// Where a repository executes its queries.
#[derive(Clone)]
pub(crate) enum Db {
    /// Directly on the pool; each query acquires its own connection.
    Pool(PgPool),
    /// On the shared transaction of an open unit of work.
    Tx(SharedTx),
}

/// A live connection handle resolved from a [`Db`] binding.
pub(crate) enum Conn<'a> {
    Pool(sqlx::pool::PoolConnection<Postgres>),
    Tx(MutexGuard<'a, Option<Transaction<'static, Postgres>>>),
}

impl Db {
    /// Resolve to a connection: acquire from the pool, or lock the shared
    /// transaction slot.
    pub(crate) async fn conn(&self) -> Result<Conn<'_>, TaskError> {
        match self {
            Self::Pool(pool) => Ok(Conn::Pool(
                pool.acquire().await.map_err(TaskError::storage)?,
            )),
            Self::Tx(tx) => Ok(Conn::Tx(tx.lock().await)),
        }
    }
}

impl Conn<'_> {
    /// The underlying connection, if the unit of work is still open.
    pub(crate) fn as_conn(&mut self) -> Result<&mut PgConnection, TaskError> {
        match self {
            Self::Pool(conn) => Ok(&mut *conn),
            Self::Tx(guard) => guard
                .as_mut()
                .map(|tx| &mut **tx)
                .ok_or(TaskError::UnitOfWorkClosed),
        }
    }
}

/// Column value outside the domain range, i.e. a corrupt row.
pub(crate) fn column_u32(value: i32, column: &str) -> Result<u32, TaskError> {
    u32::try_from(value).map_err(|_| TaskError::Storage(format!("negative {column} column")))
}

/// Domain value outside the column range.
pub(crate) fn bind_i32(value: u32, column: &str) -> Result<i32, TaskError> {
    i32::try_from(value).map_err(|_| TaskError::Storage(format!("{column} out of range")))
}
