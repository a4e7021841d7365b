//! Statement execution against the pool or a shared transaction
//!
//! Repositories hold an `Executor` instead of a pool so the same repository
//! code runs inside and outside a transaction. A transaction-bound executor
//! shares one `Transaction` behind a mutex; once the unit of work finishes the
//! slot is emptied and further use fails with `TransactionClosed`.
//! Nested units of work run inside a savepoint of the outer transaction.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{RepoError, Result};
use crate::orm::Statement;

type SharedTransaction = Arc<Mutex<Option<Transaction<'static, Sqlite>>>>;

static SAVEPOINT_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Clone)]
pub enum Executor {
    Pool(SqlitePool),
    Tx(SharedTransaction),
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Executor::Pool(_) => f.write_str("Executor::Pool"),
            Executor::Tx(_) => f.write_str("Executor::Tx"),
        }
    }
}

impl Executor {
    pub fn is_transaction(&self) -> bool {
        matches!(self, Executor::Tx(_))
    }

    /// Execute the statement and return all rows
    pub async fn fetch_all(&self, statement: &Statement) -> Result<Vec<SqliteRow>> {
        log_statement(statement);
        match self {
            Executor::Pool(pool) => Ok(statement.query().fetch_all(pool).await?),
            Executor::Tx(shared) => {
                let mut guard = shared.lock().await;
                let tx = guard.as_mut().ok_or(RepoError::TransactionClosed)?;
                Ok(statement.query().fetch_all(&mut **tx).await?)
            }
        }
    }

    /// Execute the statement and return the first row, if any
    pub async fn fetch_optional(&self, statement: &Statement) -> Result<Option<SqliteRow>> {
        log_statement(statement);
        match self {
            Executor::Pool(pool) => Ok(statement.query().fetch_optional(pool).await?),
            Executor::Tx(shared) => {
                let mut guard = shared.lock().await;
                let tx = guard.as_mut().ok_or(RepoError::TransactionClosed)?;
                Ok(statement.query().fetch_optional(&mut **tx).await?)
            }
        }
    }

    /// Execute a `SELECT COUNT(*)` statement
    pub async fn count(&self, statement: &Statement) -> Result<u64> {
        log_statement(statement);
        let row = match self {
            Executor::Pool(pool) => statement.query().fetch_one(pool).await?,
            Executor::Tx(shared) => {
                let mut guard = shared.lock().await;
                let tx = guard.as_mut().ok_or(RepoError::TransactionClosed)?;
                statement.query().fetch_one(&mut **tx).await?
            }
        };
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    /// Execute the statement and return the number of rows affected
    pub async fn execute(&self, statement: &Statement) -> Result<u64> {
        log_statement(statement);
        let result = match self {
            Executor::Pool(pool) => statement.query().execute(pool).await?,
            Executor::Tx(shared) => {
                let mut guard = shared.lock().await;
                let tx = guard.as_mut().ok_or(RepoError::TransactionClosed)?;
                statement.query().execute(&mut **tx).await?
            }
        };
        Ok(result.rows_affected())
    }

    /// Run `f` as one unit of work.
    ///
    /// On the pool this begins a transaction, commits when `f` succeeds and
    /// rolls back when it fails. A transaction-bound executor wraps `f` in a
    /// savepoint instead: a failing `f` undoes only its own writes and the
    /// outer owner still decides commit/rollback. If the returned future is
    /// dropped midway, the transaction is rolled back when its last handle is
    /// released.
    pub async fn atomic<F, Fut, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(Executor) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let pool = match self {
            Executor::Tx(_) => return self.savepoint(f).await,
            Executor::Pool(pool) => pool,
        };

        let tx = pool.begin().await?;
        let shared: SharedTransaction = Arc::new(Mutex::new(Some(tx)));
        let result = f(Executor::Tx(Arc::clone(&shared))).await;
        let tx = shared.lock().await.take();

        match (result, tx) {
            (Ok(value), Some(tx)) => {
                tx.commit().await?;
                debug!("Transaction committed");
                Ok(value)
            }
            (Ok(_), None) => Err(RepoError::TransactionClosed),
            (Err(e), Some(tx)) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Failed to roll back transaction");
                }
                debug!(error = %e, "Transaction rolled back");
                Err(e)
            }
            (Err(e), None) => Err(e),
        }
    }

    async fn savepoint<F, Fut, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(Executor) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let name = format!("repokit_sp_{}", SAVEPOINT_SEQ.fetch_add(1, Ordering::Relaxed));
        self.execute(&Statement::new(format!("SAVEPOINT {name}"))).await?;

        match f(self.clone()).await {
            Ok(value) => {
                self.execute(&Statement::new(format!("RELEASE {name}"))).await?;
                Ok(value)
            }
            Err(e) => {
                let undo = async {
                    self.execute(&Statement::new(format!("ROLLBACK TO {name}"))).await?;
                    self.execute(&Statement::new(format!("RELEASE {name}"))).await
                };
                if let Err(rollback) = undo.await {
                    warn!(savepoint = %name, error = %rollback, "Failed to roll back savepoint");
                }
                debug!(savepoint = %name, error = %e, "Savepoint rolled back");
                Err(e)
            }
        }
    }
}

impl From<SqlitePool> for Executor {
    fn from(pool: SqlitePool) -> Self {
        Executor::Pool(pool)
    }
}

fn log_statement(statement: &Statement) {
    debug!(sql = %statement.sql, binds = statement.values.len(), "Executing statement");
}
