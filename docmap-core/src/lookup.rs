//! Immediate and deferred execution of store operations.
//!
//! Every operation that reaches the store returns a [`Lookup`]. Under
//! [`Mode::Immediate`] the backend future is driven to completion on the calling
//! thread and the lookup is already [`Lookup::Ready`]; under [`Mode::Deferred`] the
//! future is handed back untouched as [`Lookup::Pending`].
//!
//! Callers that simply `.await` a lookup work in both modes. Immediate-mode callers
//! that never suspend use [`Lookup::wait`] instead.
//!
//! # Example
//!
//! ```ignore
//! // deferred
//! let count = db.queryset(&users).count().await?;
//!
//! // immediate
//! let count = db.queryset(&users).count().wait()?;
//! ```

use futures::{
    FutureExt,
    executor::block_on,
    future::{self, BoxFuture},
};
use serde::{Deserialize, Serialize};
use std::future::{Future, IntoFuture};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// How a database handle executes store operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Block the calling thread until the store answers.
    ///
    /// The backend future is polled with [`futures::executor::block_on`], so the
    /// backend must not depend on a reactor owned by another runtime.
    Immediate,
    /// Return pending lookups that the caller must await.
    #[default]
    Deferred,
}

impl Mode {
    /// Runs a store future according to this mode.
    pub fn run<T, F>(self, future: F) -> Lookup<T>
    where
        T: Send + 'static,
        F: Future<Output = DocumentStoreResult<T>> + Send + 'static,
    {
        match self {
            Mode::Immediate => Lookup::Ready(block_on(future)),
            Mode::Deferred => Lookup::Pending(future.boxed()),
        }
    }
}

/// The outcome of a store operation: either already available or still pending.
pub enum Lookup<T> {
    /// The operation has completed.
    Ready(DocumentStoreResult<T>),
    /// The operation completes when the future is awaited.
    Pending(BoxFuture<'static, DocumentStoreResult<T>>),
}

impl<T: Send + 'static> Lookup<T> {
    /// Creates a lookup that already failed.
    pub fn failed(err: DocumentStoreError) -> Self {
        Lookup::Ready(Err(err))
    }

    /// Returns `true` if the result is available without suspending.
    pub fn is_ready(&self) -> bool {
        matches!(self, Lookup::Ready(_))
    }

    /// Returns the result of an immediate lookup.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Usage`] for a pending lookup, which can only
    /// be awaited.
    pub fn wait(self) -> DocumentStoreResult<T> {
        match self {
            Lookup::Ready(result) => result,
            Lookup::Pending(_) => Err(DocumentStoreError::Usage(
                "a deferred lookup must be awaited".to_string(),
            )),
        }
    }

    /// Transforms the successful result without changing the mode.
    pub fn map<U, F>(self, f: F) -> Lookup<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.and_then(|value| Ok(f(value)))
    }

    /// Chains a fallible transformation onto the successful result.
    pub fn and_then<U, F>(self, f: F) -> Lookup<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> DocumentStoreResult<U> + Send + 'static,
    {
        match self {
            Lookup::Ready(result) => Lookup::Ready(result.and_then(f)),
            Lookup::Pending(future) => {
                Lookup::Pending(async move { future.await.and_then(f) }.boxed())
            }
        }
    }
}

impl<T: Send + 'static> IntoFuture for Lookup<T> {
    type Output = DocumentStoreResult<T>;
    type IntoFuture = BoxFuture<'static, DocumentStoreResult<T>>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            Lookup::Ready(result) => future::ready(result).boxed(),
            Lookup::Pending(future) => future,
        }
    }
}

impl<T> std::fmt::Debug for Lookup<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lookup::Ready(_) => f.write_str("Lookup::Ready"),
            Lookup::Pending(_) => f.write_str("Lookup::Pending"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_mode_is_ready() {
        let lookup = Mode::Immediate.run(async { Ok(7) });

        assert!(lookup.is_ready());
        assert_eq!(lookup.map(|v| v * 2).wait(), Ok(14));
    }

    #[test]
    fn waiting_on_pending_is_a_usage_error() {
        let lookup = Mode::Deferred.run(async { Ok(7) });

        assert!(!lookup.is_ready());
        assert!(matches!(lookup.wait(), Err(DocumentStoreError::Usage(_))));
    }

    #[tokio::test]
    async fn both_modes_can_be_awaited() {
        let ready = Mode::Immediate.run(async { Ok(1) });
        let pending = Mode::Deferred.run(async { Ok(2) });

        assert_eq!(ready.await, Ok(1));
        assert_eq!(pending.and_then(|v| Ok(v + 1)).await, Ok(3));
    }
}
