//! Handler abstraction and the static handler registry.
//!
//! Handlers come in two shapes: plain functions that block, and functions
//! returning a future. Both are wrapped behind the object-safe [`Handler`]
//! trait so the dispatcher only ever drives one [`Completion`] type.

use crate::context::{InvocationContext, InvocationMeta};
use crate::value::Fields;
use futures::future::BoxFuture;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// The normalized result of starting a handler.
pub type Completion = BoxFuture<'static, anyhow::Result<Fields>>;

/// Everything a handler receives for one call.
#[derive(Debug, Clone)]
pub struct HandlerCall {
    pub method: String,
    pub input: Fields,
    pub meta: InvocationMeta,
    pub ctx: InvocationContext,
}

/// A named unit of business logic reachable through the invoke endpoint.
#[async_trait::async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, call: HandlerCall) -> anyhow::Result<Fields>;
}

/// Start `handler` on `call`, producing an owned future.
pub fn completion(handler: Arc<dyn Handler>, call: HandlerCall) -> Completion {
    Box::pin(async move { handler.call(call).await })
}

/// Adapter for blocking handler functions; runs them on the blocking pool.
pub struct SyncHandler<F> {
    func: Arc<F>,
}

impl<F> SyncHandler<F>
where
    F: Fn(HandlerCall) -> anyhow::Result<Fields> + Send + Sync + 'static,
{
    pub fn new(func: F) -> Self {
        Self {
            func: Arc::new(func),
        }
    }
}

#[async_trait::async_trait]
impl<F> Handler for SyncHandler<F>
where
    F: Fn(HandlerCall) -> anyhow::Result<Fields> + Send + Sync + 'static,
{
    async fn call(&self, call: HandlerCall) -> anyhow::Result<Fields> {
        let func = self.func.clone();
        match tokio::task::spawn_blocking(move || func(call)).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(anyhow::anyhow!(panic_message(e.into_panic()))),
            Err(e) => Err(anyhow::anyhow!("handler task failed: {}", e)),
        }
    }
}

/// Adapter for handler functions returning a future.
pub struct AsyncHandler<F> {
    func: F,
}

impl<F, Fut> AsyncHandler<F>
where
    F: Fn(HandlerCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Fields>> + Send + 'static,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait::async_trait]
impl<F, Fut> Handler for AsyncHandler<F>
where
    F: Fn(HandlerCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Fields>> + Send + 'static,
{
    async fn call(&self, call: HandlerCall) -> anyhow::Result<Fields> {
        (self.func)(call).await
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Handlers by name. Built once at startup, read-only while serving.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one with the same name.
    pub fn register(mut self, name: impl Into<String>, handler: impl Handler) -> Self {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    /// Register a blocking function.
    ///
    /// The function runs on tokio's blocking pool, which still carries the
    /// runtime handle. Its context's async calls are reached by blocking on
    /// them:
    ///
    /// ```rust,ignore
    /// registry.register_sync("lookup", |call| {
    ///     let handle = tokio::runtime::Handle::current();
    ///     let user = handle.block_on(call.ctx.kv_get("users", "42"))?;
    ///     // ...
    /// })
    /// ```
    ///
    /// `ctx.log` needs no runtime and can be called directly.
    pub fn register_sync<F>(self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(HandlerCall) -> anyhow::Result<Fields> + Send + Sync + 'static,
    {
        self.register(name, SyncHandler::new(func))
    }

    /// Register a function returning a future.
    pub fn register_async<F, Fut>(self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(HandlerCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Fields>> + Send + 'static,
    {
        self.register(name, AsyncHandler::new(func))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
