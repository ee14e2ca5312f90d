// Copyright 2026 the DepFlow authors

//! Deferred values
//!
//! A [`Deferred`] is a single-shot eventual value: it completes exactly once,
//! with a JSON value or a failure message. Run inputs and `async` nodes
//! accept deferreds; the driver awaits them on background tasks and writes
//! the resolved value into the graph, triggering recomputation.
//!
//! `Deferred` is cheaply cloneable (a shared future), so a declaration
//! carrying one can be cloned by the preprocessor without re-running the
//! underlying work.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;

/// What a deferred completes with: a value, or a failure message.
///
/// The message is a plain `String` so the future stays cloneable; the driver
/// rewraps it as [`Error::DeferredFailed`](crate::error::Error::DeferredFailed)
/// with the input or node name attached.
pub type DeferredResult = std::result::Result<Value, String>;

/// A cloneable, single-shot eventual value.
#[derive(Clone)]
pub struct Deferred {
    inner: Shared<BoxFuture<'static, DeferredResult>>,
}

impl Deferred {
    /// Wrap a future as a deferred value.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let rate = Deferred::new(async {
    ///     Ok(fetch_rate().await?)
    /// });
    /// graph.run(inputs_with(rate)).await?;
    /// ```
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = DeferredResult> + Send + 'static,
    {
        Self {
            inner: future.boxed().shared(),
        }
    }

    /// A deferred that is already complete.
    #[must_use]
    pub fn ready(value: Value) -> Self {
        Self::new(std::future::ready(Ok(value)))
    }

    /// A deferred that is already failed.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::new(std::future::ready(Err(reason)))
    }

    /// A deferred that completes with `value` after `delay`.
    ///
    /// Mostly useful in tests and demos of reactive settling.
    #[must_use]
    pub fn after(delay: Duration, value: Value) -> Self {
        Self::new(async move {
            tokio::time::sleep(delay).await;
            Ok(value)
        })
    }

    /// Await completion. Safe to call from any number of clones; the
    /// underlying future runs once.
    pub async fn wait(&self) -> DeferredResult {
        self.inner.clone().await
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.peek() {
            Some(Ok(v)) => write!(f, "Deferred(resolved: {v})"),
            Some(Err(e)) => write!(f, "Deferred(failed: {e})"),
            None => write!(f, "Deferred(pending)"),
        }
    }
}

/// A run input: either an immediate value or a deferred one.
#[derive(Clone, Debug)]
pub enum Input {
    /// The value is available now.
    Value(Value),
    /// The value arrives later; the driver awaits it and recomputes.
    Deferred(Deferred),
}

impl From<Value> for Input {
    fn from(value: Value) -> Self {
        Input::Value(value)
    }
}

impl From<Deferred> for Input {
    fn from(deferred: Deferred) -> Self {
        Input::Deferred(deferred)
    }
}
