//! Scoped database transactions.
//!
//! Multi-step writes go through [`with_transaction`], which owns the
//! begin/commit/rollback pairing. Call sites never issue those statements
//! directly, so a failed step can not leave a transaction open.

use super::error::DatabaseError;
use futures::future::BoxFuture;
use sqlx::{PgConnection, PgPool};

/// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`.
pub async fn with_transaction<T, F>(pool: &PgPool, f: F) -> Result<T, DatabaseError>
where
    T: Send,
    F: for<'t> FnOnce(&'t mut PgConnection) -> BoxFuture<'t, Result<T, DatabaseError>> + Send,
{
    let mut tx = pool.begin().await.map_err(DatabaseError::from_sqlx)?;

    match f(&mut tx).await {
        Ok(value) => {
            tx.commit().await.map_err(DatabaseError::from_sqlx)?;
            Ok(value)
        }
        Err(err) => {
            // Rollback failures are secondary to the original error
            let _ = tx.rollback().await;
            Err(err)
        }
    }
}
