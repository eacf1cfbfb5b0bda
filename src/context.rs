//! Cancellable lifecycle context
//!
//! A [`Context`] is handed to every call that may block on I/O. It is done
//! once its token is cancelled or its deadline passes, whichever comes first.
//! Cancelling a context cancels all of its children.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::{Error, Result};

/// Cancellation token plus optional deadline
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never done unless cancelled explicitly
    pub fn background() -> Self {
        Self::default()
    }

    /// Wrap an existing token
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Child context, cancelled together with `self`
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Child context that is additionally done after `timeout`
    ///
    /// The earlier of the parent's deadline and the new one wins.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            token: self.token.child_token(),
            deadline: Some(match self.deadline {
                Some(parent) if parent < deadline => parent,
                _ => deadline,
            }),
        }
    }

    /// Cancel this context and its children
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Underlying cancellation token
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the context is done
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Why the context is done, or `None` while it is still live
    pub fn err(&self) -> Option<Error> {
        if self.token.is_cancelled() {
            return Some(Error::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Error::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is done, yielding the reason
    pub async fn done(&self) -> Error {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => Error::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => Error::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                Error::Cancelled
            }
        }
    }

    /// Run `fut` unless the context finishes first
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            res = fut => res,
            err = self.done() => Err(err),
        }
    }
}
