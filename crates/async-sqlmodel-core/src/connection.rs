//! Database connection abstraction.
//!
//! `Connection` is the boundary to the database driver. The session drives
//! `query` for loads and `execute` for flushes and transaction control;
//! tests supply mocks. Both operations are cancel-correct: they take a
//! `Cx` and return `Outcome`.

use crate::error::Error;
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};
use std::future::Future;

/// A database connection.
///
/// # Example
///
/// ```ignore
/// let rows = conn.query(&cx, "SELECT * FROM heroes WHERE id = $1", &[Value::BigInt(1)]).await;
/// ```
pub trait Connection: Send + Sync {
    /// Execute a query and return all rows.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Execute a statement and return the number of affected rows.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;
}

/// Fold an `Outcome` into a `Result`, mapping cancellation and panics onto
/// the error taxonomy. Used by the synchronous read path, which has no
/// outcome channel of its own to forward them through.
#[allow(clippy::result_large_err)]
pub fn outcome_to_result<T>(outcome: Outcome<T, Error>) -> crate::Result<T> {
    match outcome {
        Outcome::Ok(v) => Ok(v),
        Outcome::Err(e) => Err(e),
        Outcome::Cancelled(_) => Err(Error::Cancelled),
        Outcome::Panicked(_) => Err(Error::Custom("database task panicked".to_string())),
    }
}
