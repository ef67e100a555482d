//! Session-scoped operation runner
//!
//! [`Connection::with_session`] runs a list of operations one after another
//! on a single driver session. It is fail-fast, not transactional: work done
//! by operations before a failure is not rolled back.
//!
//! # Examples
//!
//! ```ignore
//! use futures::FutureExt;
//! use tournabyte_mongodb::session::operation;
//!
//! conn.with_session(&cancel, vec![
//!     operation(|session: &mut ClientSession| async move {
//!         users.insert_one(doc! { "name": "ada" }).session(session).await?;
//!         Ok(())
//!     }.boxed()),
//! ]).await?;
//! ```

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::client::DriverClient;
use crate::connection::Connection;
use crate::{Result, StoreError};

/// One step run inside a session
#[async_trait]
pub trait SessionOperation<S: Send + 'static>: Send + Sync {
    async fn run(&self, session: &mut S) -> Result<()>;
}

#[async_trait]
impl<S, F> SessionOperation<S> for F
where
    S: Send + 'static,
    F: for<'a> Fn(&'a mut S) -> BoxFuture<'a, Result<()>> + Send + Sync,
{
    async fn run(&self, session: &mut S) -> Result<()> {
        (self)(session).await
    }
}

pub type BoxedOperation<S> = Box<dyn SessionOperation<S>>;

/// Box a closure as a session operation
pub fn operation<S, F>(op: F) -> BoxedOperation<S>
where
    S: Send + 'static,
    F: for<'a> Fn(&'a mut S) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    Box::new(op)
}

/// Releases the session when dropped, including on unwind and cancellation
struct SessionGuard<'c, C: DriverClient> {
    client: &'c C,
    session: Option<C::Session>,
}

impl<'c, C: DriverClient> SessionGuard<'c, C> {
    fn new(client: &'c C, session: C::Session) -> Self {
        Self {
            client,
            session: Some(session),
        }
    }

    fn session_mut(&mut self) -> Result<&mut C::Session> {
        self.session
            .as_mut()
            .ok_or_else(|| StoreError::Internal("session already released".to_string()))
    }
}

impl<C: DriverClient> Drop for SessionGuard<'_, C> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.client.release_session(session);
            debug!("Session released");
        }
    }
}

impl<C: DriverClient> Connection<C> {
    /// Run `ops` in order on one session.
    ///
    /// # Errors
    ///
    /// - `SessionStart` if no session could be acquired; nothing runs
    /// - the first failing operation's error, unchanged; later operations
    ///   never run
    /// - `Cancelled` if `cancel` fires during acquisition or an operation
    ///
    /// The session is released exactly once on every path.
    #[instrument(skip_all, fields(operations = ops.len()))]
    pub async fn with_session(
        &self,
        cancel: &CancellationToken,
        ops: Vec<BoxedOperation<C::Session>>,
    ) -> Result<()> {
        let acquired = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(StoreError::Cancelled("session acquisition".to_string()));
            }
            acquired = self.client().acquire_session() => acquired,
        };
        let session = acquired.map_err(|err| match err {
            StoreError::SessionStart(_) => err,
            other => StoreError::SessionStart(other.to_string()),
        })?;

        let mut guard = SessionGuard::new(self.client(), session);
        let session = guard.session_mut()?;

        for (index, op) in ops.iter().enumerate() {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    Err(StoreError::Cancelled(format!("session operation {}", index)))
                }
                result = op.run(&mut *session) => result,
            };

            if let Err(err) = outcome {
                debug!(index, error = %err, "Session operation failed, skipping the rest");
                return Err(err);
            }
        }

        Ok(())
    }
}
