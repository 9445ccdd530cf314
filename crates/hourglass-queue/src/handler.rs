//! Message handler trait.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

/// Processes delivered payloads.
///
/// `Ok(true)` acknowledges the message, `Ok(false)` negatively acknowledges
/// it. An `Err` leaves the message in-flight until its deadline passes.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: &str) -> anyhow::Result<bool>;
}

/// Handler backed by an async closure.
pub struct FnHandler<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

/// Wrap an async closure as a [`MessageHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F, Fut>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<bool>> + Send,
{
    FnHandler {
        f,
        _fut: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F, Fut>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<bool>> + Send,
{
    async fn handle(&self, payload: &str) -> anyhow::Result<bool> {
        (self.f)(payload.to_string()).await
    }
}
